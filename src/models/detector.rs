use crate::models::{ModelEntry, RawBox, RawPrediction};
use crate::utils::error::VisionError;
use crate::Result;
use ndarray::{ArrayD, ArrayView2, Axis, Ix3};
use std::collections::HashMap;

/// 原始检测头的候选框分数下限
pub const CANDIDATE_THRESHOLD: f32 = 0.25;

/// NMS 的 IoU 门限
pub const NMS_IOU_THRESHOLD: f32 = 0.7;

/// 单张图片最多保留的检测框数
pub const MAX_DETECTIONS: usize = 300;

/// 解析检测器输出。
///
/// 支持两种布局：
/// - 端到端输出 `[1, N, 6]`，每行 `x1, y1, x2, y2, score, class`，模型内已做 NMS，保持原顺序；
/// - 原始 YOLO 检测头 `[1, 4 + nc, N]`，每列 `cx, cy, w, h` 加各类别分数，
///   在此处做候选过滤和按类别的 NMS，结果按分数降序。
pub fn decode(entry: &ModelEntry, outputs: Vec<ArrayD<f32>>) -> Result<RawPrediction> {
    let output = outputs
        .into_iter()
        .next()
        .ok_or_else(|| VisionError::inference(&entry.name, "detector returned no outputs"))?;

    let shape = output.shape().to_vec();
    tracing::debug!("Detection output shape: {:?}", shape);

    let output = output.into_dimensionality::<Ix3>().map_err(|_| {
        VisionError::inference(
            &entry.name,
            format!("unsupported detection output shape {:?}, expected 3D", shape),
        )
    })?;

    if shape[0] != 1 {
        return Err(VisionError::inference(
            &entry.name,
            format!("expected batch size 1 for detection, got {}", shape[0]),
        ));
    }

    let rows = output.index_axis(Axis(0), 0);

    let boxes = if shape[2] == 6 {
        parse_end_to_end(rows)
    } else if shape[1] > 4 {
        let candidates = parse_raw_head(rows);
        let kept = non_maximum_suppression(candidates, NMS_IOU_THRESHOLD, MAX_DETECTIONS);
        tracing::debug!("Raw detection head decoded, {} box(es) after NMS", kept.len());
        kept
    } else {
        return Err(VisionError::inference(
            &entry.name,
            format!("unsupported detection output shape {:?}", shape),
        ));
    };

    Ok(RawPrediction::Detection { boxes })
}

fn class_id(value: f32) -> Option<usize> {
    if value.is_finite() && value >= 0.0 {
        Some(value.round() as usize)
    } else {
        None
    }
}

/// 端到端输出，行即检测框
fn parse_end_to_end(rows: ArrayView2<'_, f32>) -> Vec<RawBox> {
    rows.axis_iter(Axis(0))
        .filter_map(|row| {
            let class_id = class_id(row[5])?;
            Some(RawBox {
                x1: row[0],
                y1: row[1],
                x2: row[2],
                y2: row[3],
                score: row[4],
                class_id,
            })
        })
        .collect()
}

/// 原始检测头，列即候选框
fn parse_raw_head(rows: ArrayView2<'_, f32>) -> Vec<RawBox> {
    let num_classes = rows.nrows() - 4;
    let mut candidates = Vec::new();

    for column in rows.axis_iter(Axis(1)) {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for c in 0..num_classes {
            let score = column[4 + c];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < CANDIDATE_THRESHOLD {
            continue;
        }

        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        candidates.push(RawBox {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
            score: best_score,
            class_id: best_class,
        });
    }

    candidates
}

/// 按类别做非极大值抑制，结果按分数降序，最多保留 `max_detections` 个
pub fn non_maximum_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32, max_detections: usize) -> Vec<RawBox> {
    boxes.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut kept: Vec<RawBox> = Vec::new();
    let mut kept_by_class: HashMap<usize, Vec<usize>> = HashMap::new();

    for candidate in boxes {
        if kept.len() >= max_detections {
            break;
        }

        let same_class = kept_by_class.entry(candidate.class_id).or_default();
        let suppressed = same_class
            .iter()
            .any(|&i| iou(&kept[i], &candidate) > iou_threshold);
        if !suppressed {
            same_class.push(kept.len());
            kept.push(candidate);
        }
    }

    kept
}

/// 两个角点格式框的交并比
pub fn iou(a: &RawBox, b: &RawBox) -> f32 {
    let inter_x1 = a.x1.max(b.x1);
    let inter_y1 = a.y1.max(b.y1);
    let inter_x2 = a.x2.min(b.x2);
    let inter_y2 = a.y2.min(b.y2);

    let intersection = (inter_x2 - inter_x1).max(0.0) * (inter_y2 - inter_y1).max(0.0);
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
