#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array4, ArrayD, IxDyn};
use orchid_vision::models::{InferenceBackend, LoadRequest, ModelEntry, ModelFamily, ModelLoader};
use orchid_vision::{ModelRegistry, Result, VisionError};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// 返回固定输出的后端
pub struct StaticBackend {
    output: ArrayD<f32>,
    pub calls: Arc<AtomicUsize>,
}

impl StaticBackend {
    pub fn detections(rows: &[[f32; 6]]) -> Self {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Self {
            output: ArrayD::from_shape_vec(IxDyn(&[1, rows.len(), 6]), flat).unwrap(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn logits(values: &[f32]) -> Self {
        Self {
            output: ArrayD::from_shape_vec(IxDyn(&[1, values.len()]), values.to_vec()).unwrap(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InferenceBackend for StaticBackend {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.output.clone()])
    }
}

/// 和 ORT 后端一样在锁内执行前向推理，并记录同时在推理中的调用数
pub struct LockedBackend {
    session: Mutex<ArrayD<f32>>,
    active: AtomicUsize,
    pub max_active: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
}

impl LockedBackend {
    pub fn detections(rows: &[[f32; 6]]) -> Self {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Self {
            session: Mutex::new(ArrayD::from_shape_vec(IxDyn(&[1, rows.len(), 6]), flat).unwrap()),
            active: AtomicUsize::new(0),
            max_active: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InferenceBackend for LockedBackend {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let session = self.session.lock();
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(running, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(5));
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![session.clone()])
    }
}

pub struct BrokenBackend;

impl InferenceBackend for BrokenBackend {
    fn forward(&self, _input: &Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        Err(VisionError::Internal("session crashed".into()))
    }
}

/// 路径不存在（名字含 missing）时失败的加载器
pub struct PathCheckingLoader;

impl ModelLoader for PathCheckingLoader {
    fn accelerator_available(&self) -> bool {
        false
    }

    fn load(&self, request: &LoadRequest<'_>) -> Result<Box<dyn InferenceBackend>> {
        if request.model_path.to_string_lossy().contains("missing") {
            return Err(VisionError::model_load(request.name, "file not found"));
        }
        Ok(match request.family {
            ModelFamily::Detector => Box::new(StaticBackend::detections(&[])),
            ModelFamily::Classifier => Box::new(StaticBackend::logits(&[0.0; 8])),
        })
    }
}

pub const DETECTOR_ROWS: [[f32; 6]; 3] = [
    [100.0, 100.0, 200.0, 200.0, 0.92, 0.0],
    [300.0, 320.0, 420.0, 400.0, 0.45, 1.0],
    [50.0, 400.0, 90.0, 600.0, 0.75, 1.0],
];

/// disease（检测器）、species（分类器）、broken（推理总是失败）
pub fn test_registry() -> ModelRegistry {
    let detector = ModelEntry::new(
        "disease",
        ModelFamily::Detector,
        Box::new(StaticBackend::detections(&DETECTOR_ROWS)),
    )
    .with_labels(vec!["black_rot".into(), "leaf_spot".into()]);

    let classifier = ModelEntry::new(
        "species",
        ModelFamily::Classifier,
        Box::new(StaticBackend::logits(&[0.1, 0.2, 3.0, 0.4, 0.0, 0.0, 0.0, 0.0])),
    );

    let broken = ModelEntry::new("broken", ModelFamily::Detector, Box::new(BrokenBackend));

    ModelRegistry::from_entries(vec![detector, classifier, broken]).unwrap()
}

pub fn sample_image(width: u32, height: u32) -> DynamicImage {
    let mut img = RgbImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        *pixel = Rgb([(x % 256) as u8, (y % 256) as u8, 90]);
    }
    DynamicImage::ImageRgb8(img)
}

pub fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}
