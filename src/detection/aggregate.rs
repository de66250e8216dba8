use crate::detection::types::{DetectionRecord, ResponsePayload, SpeciesPrediction};
use crate::image::DetectionResult;
use crate::models::ModelFamily;
use crate::utils::error::VisionError;
use crate::Result;
use base64::Engine;

/// 将推理结果转换为响应负载
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn aggregate(result: DetectionResult) -> Result<ResponsePayload> {
        match result.family {
            ModelFamily::Detector => {
                let image = result
                    .annotated_image
                    .as_deref()
                    .map(|bytes| base64::engine::general_purpose::STANDARD.encode(bytes));

                let detections: Vec<DetectionRecord> = result
                    .detections
                    .into_iter()
                    .map(|det| DetectionRecord {
                        class: det.class_name,
                        confidence: det.confidence,
                        bbox: det.bbox,
                    })
                    .collect();

                Ok(ResponsePayload::Detection {
                    num_detections: detections.len(),
                    detections,
                    image,
                })
            }
            ModelFamily::Classifier => {
                let (primary_species, confidence) = result
                    .primary_class
                    .zip(result.primary_confidence)
                    .ok_or_else(|| {
                        VisionError::Internal("classification result has no primary class".to_string())
                    })?;

                let all_predictions = result
                    .top_classes
                    .into_iter()
                    .map(|c| SpeciesPrediction {
                        species: c.class_name,
                        confidence: c.confidence,
                    })
                    .collect();

                Ok(ResponsePayload::Classification {
                    primary_species,
                    confidence,
                    all_predictions,
                    is_orchid: result.is_relevant,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{BoundingBox, ClassScore, Detection, StageTimings};

    fn detector_result(annotated: Option<Vec<u8>>) -> DetectionResult {
        DetectionResult {
            family: ModelFamily::Detector,
            detections: vec![Detection {
                class_name: "black_rot".into(),
                confidence: 0.82,
                bbox: BoundingBox { x1: 1, y1: 2, x2: 30, y2: 40 },
            }],
            annotated_image: annotated,
            primary_class: None,
            primary_confidence: None,
            top_classes: Vec::new(),
            is_relevant: false,
            timings: StageTimings::default(),
        }
    }

    #[test]
    fn test_detection_payload_json() {
        let payload = ResultAggregator::aggregate(detector_result(Some(vec![1, 2, 3]))).unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["num_detections"], 1);
        assert_eq!(json["detections"][0]["class"], "black_rot");
        assert_eq!(json["detections"][0]["bbox"]["x2"], 30);
        assert_eq!(json["image"], "AQID");
    }

    #[test]
    fn test_detection_payload_without_image() {
        let payload = ResultAggregator::aggregate(detector_result(None)).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("image").is_none());
    }

    #[test]
    fn test_classification_payload() {
        let result = DetectionResult {
            family: ModelFamily::Classifier,
            detections: Vec::new(),
            annotated_image: None,
            primary_class: Some("Cattleya".into()),
            primary_confidence: Some(0.7),
            top_classes: vec![
                ClassScore { class_name: "Cattleya".into(), class_id: 2, confidence: 0.7 },
                ClassScore { class_name: "Cymbidium".into(), class_id: 3, confidence: 0.15 },
            ],
            is_relevant: true,
            timings: StageTimings::default(),
        };

        let payload = ResultAggregator::aggregate(result).unwrap();
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["primary_species"], "Cattleya");
        assert_eq!(json["is_orchid"], true);
        assert_eq!(json["all_predictions"][1]["species"], "Cymbidium");
        assert_eq!(payload.num_detections(), 0);
    }

    #[test]
    fn test_classification_without_primary_is_internal_error() {
        let mut result = detector_result(None);
        result.family = ModelFamily::Classifier;
        assert!(matches!(
            ResultAggregator::aggregate(result),
            Err(VisionError::Internal(_))
        ));
    }
}
