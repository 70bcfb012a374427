use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::pipeline::encoder::{Embedding, FaceEncoder};

const SCRFD_MODEL_URL_HF: &str = "https://huggingface.co/ykk648/face_lib/resolve/main/face_detect/scrfd_onnx/scrfd_500m_bnkps.onnx";
const SCRFD_MODEL_URL_GH: &str = "https://github.com/deepinsight/insightface/releases/download/v0.7/scrfd_500m_bnkps.onnx";
const ARCFACE_MODEL_URL: &str = "https://huggingface.co/maze/faceX/resolve/e010b5098c3685fd00b22dd2aec6f37320e3d850/w600k_r50.onnx";

const SCRFD_FILE: &str = "scrfd_500m_bnkps.onnx";
const ARCFACE_FILE: &str = "w600k_r50.onnx";

const DETECT_SIZE: u32 = 640;
const EMBED_SIZE: u32 = 112;

#[derive(Debug, Clone)]
struct Bbox {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

/// SCRFD face detection + ArcFace embedding, both through ONNX Runtime.
/// Sessions are mutex-guarded because `ort` inference needs `&mut Session`.
pub struct OnnxFaceEncoder {
    models_dir: PathBuf,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
    scrfd: Option<Mutex<Session>>,
    arcface: Option<Mutex<Session>>,
}

impl OnnxFaceEncoder {
    pub fn new(models_dir: PathBuf) -> Self {
        let confidence_threshold = std::env::var("FACEAPP_FACE_CONFIDENCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.5);
        let nms_iou_threshold = std::env::var("FACEAPP_FACE_NMS_IOU")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.4);
        Self { models_dir, confidence_threshold, nms_iou_threshold, scrfd: None, arcface: None }
    }

    /// Downloads any missing model files and loads both sessions. Matching
    /// cannot work without the models, so failures here are fatal to boot.
    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.models_dir).context("Failed to create models directory")?;
        self.download_models().await?;
        self.load_models()
    }

    async fn download_models(&self) -> Result<()> {
        let client = reqwest::Client::new();
        let scrfd_path = self.models_dir.join(SCRFD_FILE);
        let arcface_path = self.models_dir.join(ARCFACE_FILE);

        if !scrfd_path.exists() {
            info!("Downloading SCRFD face detection model...");
            if let Err(e) = download_file(&client, SCRFD_MODEL_URL_HF, &scrfd_path).await {
                warn!("SCRFD download from Hugging Face failed: {e:#}. Trying GitHub...");
                download_file(&client, SCRFD_MODEL_URL_GH, &scrfd_path).await?;
            }
        }
        if !arcface_path.exists() {
            info!("Downloading ArcFace recognition model...");
            download_file(&client, ARCFACE_MODEL_URL, &arcface_path).await?;
        }
        Ok(())
    }

    fn load_models(&mut self) -> Result<()> {
        let scrfd_path = self.models_dir.join(SCRFD_FILE);
        let arcface_path = self.models_dir.join(ARCFACE_FILE);
        let scrfd = Session::builder()?
            .commit_from_file(&scrfd_path)
            .context("Failed to create SCRFD session")?;
        let arcface = Session::builder()?
            .commit_from_file(&arcface_path)
            .context("Failed to create ArcFace session")?;
        self.scrfd = Some(Mutex::new(scrfd));
        self.arcface = Some(Mutex::new(arcface));
        info!("Face models loaded: SCRFD={:?} ArcFace={:?}", scrfd_path, arcface_path);
        Ok(())
    }

    /// Letterbox to 640x640 BGR, normalized to [-1, 1], NCHW.
    fn preprocess_detect(&self, image: &DynamicImage) -> (Vec<i64>, Vec<f32>, f32) {
        let (ow, oh) = (image.width() as f32, image.height() as f32);
        let scale = DETECT_SIZE as f32 / ow.max(oh);
        let nw = (ow * scale).max(1.0) as u32;
        let nh = (oh * scale).max(1.0) as u32;
        let resized = image.resize_exact(nw, nh, image::imageops::FilterType::Triangle);
        let mut padded = DynamicImage::new_rgb8(DETECT_SIZE, DETECT_SIZE);
        image::imageops::overlay(&mut padded, &resized, 0, 0);
        let rgb = padded.to_rgb8();
        let mut data = Vec::with_capacity((3 * DETECT_SIZE * DETECT_SIZE) as usize);
        for c in 0..3 {
            for y in 0..DETECT_SIZE {
                for x in 0..DETECT_SIZE {
                    let p = rgb.get_pixel(x, y);
                    // InsightFace models expect BGR channel order.
                    let v = match c {
                        0 => p[2],
                        1 => p[1],
                        _ => p[0],
                    } as f32;
                    data.push((v - 127.5) / 128.0);
                }
            }
        }
        (vec![1, 3, DETECT_SIZE as i64, DETECT_SIZE as i64], data, scale)
    }

    fn preprocess_embed(&self, crop: &DynamicImage) -> (Vec<i64>, Vec<f32>) {
        let resized = crop.resize_exact(EMBED_SIZE, EMBED_SIZE, image::imageops::FilterType::Triangle);
        let rgb = resized.to_rgb8();
        let mut data = Vec::with_capacity((3 * EMBED_SIZE * EMBED_SIZE) as usize);
        for c in 0..3 {
            for y in 0..EMBED_SIZE {
                for x in 0..EMBED_SIZE {
                    let p = rgb.get_pixel(x, y);
                    let v = match c {
                        0 => p[2],
                        1 => p[1],
                        _ => p[0],
                    } as f32;
                    data.push((v - 127.5) / 128.0);
                }
            }
        }
        (vec![1, 3, EMBED_SIZE as i64, EMBED_SIZE as i64], data)
    }

    fn detect(&self, image: &DynamicImage) -> Result<Vec<Bbox>> {
        let mut session = self.scrfd.as_ref().context("Detection model not loaded")?.lock();
        let (shape, data, scale) = self.preprocess_detect(image);
        let (img_w, img_h) = (image.width() as f32, image.height() as f32);

        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((shape, data)).context("Failed to create SCRFD input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("SCRFD inference failed")?;

        let mut raw: Vec<Bbox> = Vec::new();
        for stride in [8usize, 16, 32] {
            let (Some(sv), Some(bv)) = (
                outputs.get(&format!("score_{stride}")),
                outputs.get(&format!("bbox_{stride}")),
            ) else {
                continue;
            };
            let (Ok((_, scores)), Ok((_, boxes))) =
                (sv.try_extract_tensor::<f32>(), bv.try_extract_tensor::<f32>())
            else {
                continue;
            };
            let side = DETECT_SIZE as usize / stride;
            let grid_points = side * side;
            if grid_points == 0 || scores.len() % grid_points != 0 {
                warn!(stride, scores = scores.len(), "unexpected SCRFD output shape");
                continue;
            }
            let anchors = scores.len() / grid_points;
            for i in 0..grid_points {
                let cy = (i / side) as f32 * stride as f32;
                let cx = (i % side) as f32 * stride as f32;
                for a in 0..anchors {
                    let idx = i * anchors + a;
                    let conf = scores[idx];
                    if conf < self.confidence_threshold {
                        continue;
                    }
                    let b = idx * 4;
                    if b + 3 >= boxes.len() {
                        continue;
                    }
                    // Distances (l, t, r, b) from the anchor center, in
                    // stride units; map back to original image space.
                    let x1 = ((cx - boxes[b] * stride as f32) / scale).clamp(0.0, img_w);
                    let y1 = ((cy - boxes[b + 1] * stride as f32) / scale).clamp(0.0, img_h);
                    let x2 = ((cx + boxes[b + 2] * stride as f32) / scale).clamp(0.0, img_w);
                    let y2 = ((cy + boxes[b + 3] * stride as f32) / scale).clamp(0.0, img_h);
                    if x2 - x1 >= 8.0 && y2 - y1 >= 8.0 {
                        raw.push(Bbox { x1, y1, x2, y2, confidence: conf });
                    }
                }
            }
        }

        let keep = nms(&raw, self.nms_iou_threshold);
        Ok(keep.into_iter().map(|i| raw[i].clone()).collect())
    }

    fn embed(&self, crop: &DynamicImage) -> Result<Option<Embedding>> {
        let mut session = self.arcface.as_ref().context("Recognition model not loaded")?.lock();
        let (shape, data) = self.preprocess_embed(crop);

        let input_name = session.inputs[0].name.clone();
        let input = Value::from_array((shape, data)).context("Failed to create ArcFace input tensor")?;
        let outputs = session
            .run(ort::inputs![input_name => input])
            .context("ArcFace inference failed")?;

        let key = outputs
            .keys()
            .next()
            .context("ArcFace model produced no outputs")?
            .to_string();
        let value = outputs.get(&key).context("ArcFace output missing")?;
        let (_, slice) = value
            .try_extract_tensor::<f32>()
            .context("Failed to extract ArcFace output tensor")?;
        let mut v = slice.to_vec();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Ok(None);
        }
        for x in &mut v {
            *x /= norm;
        }
        Ok(Some(v))
    }
}

impl FaceEncoder for OnnxFaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Vec<Embedding> {
        let boxes = match self.detect(image) {
            Ok(b) => b,
            Err(e) => {
                warn!("face detection failed: {e:#}");
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        for bbox in boxes {
            let x1 = bbox.x1.max(0.0) as u32;
            let y1 = bbox.y1.max(0.0) as u32;
            let x2 = bbox.x2.min(image.width() as f32) as u32;
            let y2 = bbox.y2.min(image.height() as f32) as u32;
            if x2 <= x1 || y2 <= y1 {
                continue;
            }
            let crop = image.crop_imm(x1, y1, x2 - x1, y2 - y1);
            match self.embed(&crop) {
                Ok(Some(embedding)) => out.push(embedding),
                Ok(None) => warn!(confidence = bbox.confidence, "zero-norm embedding, skipping face"),
                Err(e) => warn!("face embedding failed: {e:#}"),
            }
        }
        out
    }
}

async fn download_file(client: &reqwest::Client, url: &str, path: &Path) -> Result<()> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to download model from {url}"))?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download model: HTTP {}", response.status());
    }
    let bytes = response.bytes().await.context("Failed to read model body")?;
    if bytes.len() < 1024 {
        anyhow::bail!("Downloaded model is suspiciously small ({} bytes)", bytes.len());
    }
    std::fs::write(path, &bytes).with_context(|| format!("Failed to write model file {path:?}"))?;
    info!("Downloaded model to {:?} ({} bytes)", path, bytes.len());
    Ok(())
}

fn nms(boxes: &[Bbox], iou_threshold: f32) -> Vec<usize> {
    if boxes.is_empty() {
        return vec![];
    }
    let mut indices: Vec<usize> = (0..boxes.len()).collect();
    indices.sort_by(|&a, &b| {
        boxes[b].confidence.partial_cmp(&boxes[a].confidence).unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = Vec::new();
    let mut suppressed = vec![false; boxes.len()];
    for i in 0..indices.len() {
        let ia = indices[i];
        if suppressed[ia] {
            continue;
        }
        keep.push(ia);
        for &ib in indices.iter().skip(i + 1) {
            if !suppressed[ib] && iou(&boxes[ia], &boxes[ib]) > iou_threshold {
                suppressed[ib] = true;
            }
        }
    }
    keep
}

fn iou(a: &Bbox, b: &Bbox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Bbox {
        Bbox { x1, y1, x2, y2, confidence }
    }

    #[test]
    fn nms_suppresses_overlapping_boxes() {
        let boxes = vec![
            bbox(0.0, 0.0, 100.0, 100.0, 0.9),
            bbox(5.0, 5.0, 105.0, 105.0, 0.8),
            bbox(200.0, 200.0, 300.0, 300.0, 0.7),
        ];
        let keep = nms(&boxes, 0.4);
        assert_eq!(keep, vec![0, 2]);
    }

    #[test]
    fn iou_disjoint_is_zero() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(20.0, 20.0, 30.0, 30.0, 1.0);
        assert_eq!(iou(&a, &b), 0.0);
    }
}
