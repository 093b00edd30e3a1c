//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS post-processing,
//! operating on RGB images decoded from caller uploads.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::types::BoundingBox;

const DET_INPUT_SIZE: usize = 640;
const DET_MEAN: f32 = 127.5;
const DET_STD: f32 = 128.0;
const DET_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DET_NMS_THRESHOLD: f32 = 0.4;
const DET_STRIDES: [usize; 3] = [8, 16, 32];
const DET_ANCHORS_PER_CELL: usize = 2;
/// 3 strides × (score, bbox, kps) tensors.
const DET_NUM_OUTPUTS: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detection model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied by the letterbox resize, kept for mapping
/// detections back into original image coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// SCRFD-based multi-face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            outputs = num_outputs,
            "loaded SCRFD detection model"
        );

        // Standard SCRFD export ordering: [0-2] scores, [3-5] bboxes,
        // [6-8] landmarks, each for strides 8/16/32.
        if num_outputs < DET_NUM_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model requires {DET_NUM_OUTPUTS} outputs, got {num_outputs}"
            )));
        }

        Ok(Self { session })
    }

    /// Detect all faces in an RGB image.
    ///
    /// Returns bounding boxes in original image coordinates, sorted by
    /// descending confidence, with five-point landmarks attached.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut all = Vec::new();
        for (stride_pos, &stride) in DET_STRIDES.iter().enumerate() {
            let (_, scores) = outputs[stride_pos]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[stride_pos + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[stride_pos + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            all.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let mut result = nms(all, DET_NMS_THRESHOLD);
        result.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(result)
    }
}

/// Letterbox an RGB image into the square NCHW input tensor.
///
/// The padding value equals the normalization mean, so padded regions
/// normalize to exactly 0.0 and the tensor can start zeroed.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let scale = (DET_INPUT_SIZE as f32 / w as f32).min(DET_INPUT_SIZE as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let pad_x = (DET_INPUT_SIZE - new_w as usize) as f32 / 2.0;
    let pad_y = (DET_INPUT_SIZE - new_h as usize) as f32 / 2.0;
    let (x0, y0) = (pad_x.floor() as usize, pad_y.floor() as usize);

    let mut tensor = Array4::<f32>::zeros((1, 3, DET_INPUT_SIZE, DET_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + x0, y as usize + y0);
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel.0[c] as f32 - DET_MEAN) / DET_STD;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Decode detections for a single stride level.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = DET_INPUT_SIZE / stride;
    let num_anchors = grid * grid * DET_ANCHORS_PER_CELL;

    let unmap = |x: f32, y: f32| {
        (
            (x - letterbox.pad_x) / letterbox.scale,
            (y - letterbox.pad_y) / letterbox.scale,
        )
    };

    let mut detections = Vec::new();
    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= DET_CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / DET_ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        // Box offsets are [left, top, right, bottom] distances in stride units.
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let (x1, y1) = unmap(
            anchor_cx - bboxes[off] * stride as f32,
            anchor_cy - bboxes[off + 1] * stride as f32,
        );
        let (x2, y2) = unmap(
            anchor_cx + bboxes[off + 2] * stride as f32,
            anchor_cy + bboxes[off + 3] * stride as f32,
        );

        let kps_off = idx * 10;
        let landmarks = if kps_off + 9 < kps.len() {
            let mut lms = [(0.0f32, 0.0f32); 5];
            for (i, lm) in lms.iter_mut().enumerate() {
                *lm = unmap(
                    anchor_cx + kps[kps_off + i * 2] * stride as f32,
                    anchor_cy + kps[kps_off + i * 2 + 1] * stride as f32,
                );
            }
            Some(lms)
        } else {
            None
        };

        detections.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-Maximum Suppression: drop detections overlapping a stronger one.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Intersection-over-Union of two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: conf,
            landmarks: None,
        }
    }

    #[test]
    fn iou_identical() {
        let a = make_bbox(0.0, 0.0, 100.0, 100.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_disjoint() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(20.0, 20.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn iou_half_overlap() {
        let a = make_bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = make_bbox(5.0, 0.0, 10.0, 10.0, 1.0);
        // Overlap 5x10 = 50, union 150.
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn nms_suppresses_overlapping() {
        let detections = vec![
            make_bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            make_bbox(5.0, 5.0, 100.0, 100.0, 0.8),
            make_bbox(200.0, 200.0, 50.0, 50.0, 0.7),
        ];
        let result = nms(detections, 0.4);
        assert_eq!(result.len(), 2);
        assert!((result[0].confidence - 0.9).abs() < 1e-6);
        assert!((result[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_distant_faces() {
        let detections = vec![
            make_bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            make_bbox(50.0, 50.0, 10.0, 10.0, 0.8),
            make_bbox(100.0, 0.0, 10.0, 10.0, 0.7),
        ];
        assert_eq!(nms(detections, 0.4).len(), 3);
    }

    #[test]
    fn nms_empty() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn letterbox_roundtrip() {
        // A 320x240 image letterboxed into 640x640: original coordinates
        // must survive the map/unmap pair.
        let image = RgbImage::new(320, 240);
        let (_, letterbox) = preprocess(&image);

        let (orig_x, orig_y) = (100.0f32, 50.0f32);
        let lx = orig_x * letterbox.scale + letterbox.pad_x;
        let ly = orig_y * letterbox.scale + letterbox.pad_y;

        let rx = (lx - letterbox.pad_x) / letterbox.scale;
        let ry = (ly - letterbox.pad_y) / letterbox.scale;
        assert!((rx - orig_x).abs() < 0.1);
        assert!((ry - orig_y).abs() < 0.1);
    }

    #[test]
    fn preprocess_pads_to_zero() {
        // A wide image leaves top/bottom padding, which must normalize to 0.
        let image = RgbImage::from_pixel(100, 10, image::Rgb([255, 255, 255]));
        let (tensor, letterbox) = preprocess(&image);

        assert!(letterbox.pad_y > 0.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        assert_eq!(tensor[[0, 2, DET_INPUT_SIZE - 1, 0]], 0.0);

        // The image region itself carries the normalized white value.
        let mid_y = DET_INPUT_SIZE / 2;
        let expected = (255.0 - DET_MEAN) / DET_STD;
        assert!((tensor[[0, 0, mid_y, DET_INPUT_SIZE / 2]] - expected).abs() < 1e-6);
    }

    #[test]
    fn decode_stride_skips_low_scores() {
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let grid = DET_INPUT_SIZE / 8;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let scores = vec![0.1f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];

        assert!(decode_stride(&scores, &bboxes, &kps, 8, &letterbox).is_empty());
    }

    #[test]
    fn decode_stride_emits_confident_anchor() {
        let letterbox = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let grid = DET_INPUT_SIZE / 32;
        let anchors = grid * grid * DET_ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.95;
        // Offsets of 1 stride in every direction: a 64x64 box at the origin anchor.
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.5f32; anchors * 10];

        let dets = decode_stride(&scores, &bboxes, &kps, 32, &letterbox);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.confidence - 0.95).abs() < 1e-6);
        assert!((d.width - 64.0).abs() < 1e-3);
        assert!((d.height - 64.0).abs() < 1e-3);
        assert!(d.landmarks.is_some());
    }
}
