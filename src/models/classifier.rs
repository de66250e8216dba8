use crate::models::{ModelEntry, RawPrediction};
use crate::utils::error::VisionError;
use crate::Result;
use ndarray::ArrayD;

/// 解析分类器输出：logits 经 softmax 得到各类别概率
pub fn decode(entry: &ModelEntry, outputs: Vec<ArrayD<f32>>) -> Result<RawPrediction> {
    let logits = outputs
        .into_iter()
        .next()
        .ok_or_else(|| VisionError::inference(&entry.name, "classifier returned no outputs"))?;

    let shape = logits.shape().to_vec();
    if shape.first().copied().unwrap_or(0) != 1 {
        return Err(VisionError::inference(
            &entry.name,
            format!("expected batch size 1 for classification, got shape {:?}", shape),
        ));
    }

    let values: Vec<f32> = logits.iter().copied().collect();
    if values.is_empty() {
        return Err(VisionError::inference(&entry.name, "classifier output is empty"));
    }

    if values.len() != entry.labels.len() {
        return Err(VisionError::inference(
            &entry.name,
            format!(
                "classifier produced {} scores but {} labels are configured",
                values.len(),
                entry.labels.len()
            ),
        ));
    }

    tracing::debug!("Classification output shape: {:?}", shape);

    Ok(RawPrediction::Classification {
        probabilities: softmax(&values),
    })
}

/// 数值稳定的 softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        exps.into_iter().map(|v| v / sum).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}

/// 最大概率的索引与值，相同概率取较小索引
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, best_p)) if p <= best_p => best,
            _ => Some((i, p)),
        })
}

/// 按概率降序取前 k 个，概率相同时较小索引在前
pub fn top_k(probabilities: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    // 稳定排序保证并列时索引顺序不变
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}
