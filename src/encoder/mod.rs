use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::EnvError;

#[cfg(feature = "candle")]
pub mod bvae;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Batch of square single-channel images, one flat row-major vector per image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub side: usize,
    pub images: Vec<Vec<f32>>,
}

impl ImageBatch {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn pixels_per_image(&self) -> usize {
        self.side * self.side
    }
}

/// Output of one encoder call: per-image distribution parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    pub mean: Vec<Vec<f32>>,
    pub logvar: Vec<Vec<f32>>,
    pub sigma: Vec<Vec<f32>>,
    pub preprocessed: ImageBatch,
}

/// Pretrained image-to-latent model.
///
/// Inference only: implementations must not mutate their weights.
pub trait LatentEncoder: Send {
    fn latent_dims(&self) -> usize;

    fn input_side(&self) -> usize;

    fn encode(&self, batch: &ImageBatch) -> Result<EncodedBatch, EnvError>;

    fn decode(&self, latents: &[Vec<f32>]) -> Result<ImageBatch, EnvError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderManifest {
    pub name: String,
    pub version: String,
    pub latent_dims: usize,
    pub input_side: usize,
    pub weights: PathBuf,
}

impl EncoderManifest {
    pub fn load(artifact_dir: &Path) -> Result<Self, EnvError> {
        let path = artifact_dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path).map_err(|err| {
            EnvError::EncoderUnavailable(format!("failed to read {}: {err}", path.display()))
        })?;
        let manifest: EncoderManifest = serde_json::from_str(&content).map_err(|err| {
            EnvError::EncoderUnavailable(format!("failed to parse {}: {err}", path.display()))
        })?;
        if manifest.latent_dims == 0 {
            return Err(EnvError::EncoderUnavailable(format!(
                "{} declares zero latent dimensions",
                path.display()
            )));
        }
        Ok(manifest)
    }

    pub fn artifact_id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Loads the pretrained encoder stored in `artifact_dir`.
pub fn load_encoder(artifact_dir: &Path) -> Result<Box<dyn LatentEncoder>, EnvError> {
    let manifest = EncoderManifest::load(artifact_dir)?;
    tracing::info!(
        target: "encoder",
        artifact = %manifest.artifact_id(),
        latent_dims = manifest.latent_dims,
        input_side = manifest.input_side,
        "encoder_artifact_found"
    );

    #[cfg(feature = "candle")]
    {
        let encoder = bvae::BvaeEncoder::load(&manifest, artifact_dir)?;
        Ok(Box::new(encoder))
    }

    #[cfg(not(feature = "candle"))]
    {
        Err(EnvError::EncoderUnavailable(format!(
            "cannot load {}: built without the `candle` feature",
            manifest.artifact_id()
        )))
    }
}

/// Turns a pair of raw viewport screenshots into deterministic latent vectors.
pub struct LatentEncoderAdapter {
    encoder: Box<dyn LatentEncoder>,
}

impl LatentEncoderAdapter {
    pub fn new(encoder: Option<Box<dyn LatentEncoder>>) -> Result<Self, EnvError> {
        let encoder = encoder.ok_or_else(|| {
            EnvError::EncoderUnavailable("no pretrained encoder was supplied".to_string())
        })?;
        Ok(Self { encoder })
    }

    pub fn latent_dims(&self) -> usize {
        self.encoder.latent_dims()
    }

    pub fn input_side(&self) -> usize {
        self.encoder.input_side()
    }

    /// Encodes both viewports in one batch and keeps only the means.
    pub fn encode_pair(
        &self,
        left: &[f32],
        right: &[f32],
    ) -> Result<(Vec<f32>, Vec<f32>), EnvError> {
        let side = self.encoder.input_side();
        let expected = side * side;
        for (name, pixels) in [("left", left), ("right", right)] {
            if pixels.len() != expected {
                return Err(EnvError::InvalidObservation(format!(
                    "{name} screenshot has {} pixels, encoder expects {side}x{side}",
                    pixels.len()
                )));
            }
        }

        let batch = ImageBatch {
            side,
            images: vec![left.to_vec(), right.to_vec()],
        };
        let encoded = self.encoder.encode(&batch)?;
        let mut means = encoded.mean.into_iter();
        let (Some(left_mean), Some(right_mean)) = (means.next(), means.next()) else {
            return Err(EnvError::EncoderInference(
                "encoder returned fewer than two mean vectors".to_string(),
            ));
        };

        let dims = self.encoder.latent_dims();
        if left_mean.len() != dims || right_mean.len() != dims {
            return Err(EnvError::EncoderInference(format!(
                "encoder returned means of length {}/{}, expected {dims}",
                left_mean.len(),
                right_mean.len()
            )));
        }
        Ok((left_mean, right_mean))
    }

    pub fn decode_latent(&self, latents: &[Vec<f32>]) -> Result<ImageBatch, EnvError> {
        self.encoder.decode(latents)
    }
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use uuid::Uuid;

    use super::{EncoderManifest, LatentEncoderAdapter, cosine_similarity, load_encoder};
    use crate::{error::EnvErrorKind, testing::MeanPoolEncoder};

    #[test]
    fn adapter_requires_an_encoder() {
        let err = LatentEncoderAdapter::new(None)
            .err()
            .expect("missing encoder must fail");
        assert_eq!(err.kind(), EnvErrorKind::EncoderUnavailable);
    }

    #[test]
    fn encode_pair_is_deterministic_and_sized() {
        let adapter = LatentEncoderAdapter::new(Some(Box::new(MeanPoolEncoder::new(4, 8))))
            .expect("adapter");
        let left: Vec<f32> = (0..16).map(|v| v as f32 * 10.0).collect();
        let right = vec![255.0; 16];

        let first = adapter.encode_pair(&left, &right).expect("encodes");
        let second = adapter.encode_pair(&left, &right).expect("encodes");
        assert_eq!(first, second);
        assert_eq!(first.0.len(), 8);
        assert_eq!(first.1.len(), 8);
    }

    #[test]
    fn encode_pair_rejects_wrong_pixel_count() {
        let adapter = LatentEncoderAdapter::new(Some(Box::new(MeanPoolEncoder::new(4, 2))))
            .expect("adapter");
        let err = adapter
            .encode_pair(&[0.0; 15], &[0.0; 16])
            .expect_err("short screenshot must fail");
        assert_eq!(err.kind(), EnvErrorKind::InvalidObservation);
    }

    #[test]
    fn decode_latent_returns_full_images() {
        let adapter = LatentEncoderAdapter::new(Some(Box::new(MeanPoolEncoder::new(4, 4))))
            .expect("adapter");
        let (left, _) = adapter.encode_pair(&[128.0; 16], &[0.0; 16]).expect("encodes");
        let images = adapter.decode_latent(&[left]).expect("decodes");
        assert_eq!(images.len(), 1);
        assert_eq!(images.images[0].len(), images.pixels_per_image());
    }

    #[test]
    fn cosine_similarity_handles_parallel_and_zero_vectors() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn manifest_is_read_from_artifact_dir() {
        let dir = std::env::temp_dir().join(format!("polyomino-encoder-test-{}", Uuid::now_v7()));
        fs::create_dir_all(&dir).expect("temp dir should exist");
        fs::write(
            dir.join("manifest.json"),
            r#"{"name":"bvae","version":"32dims-90acc","latent_dims":32,"input_side":128,"weights":"bvae.safetensors"}"#,
        )
        .expect("manifest should be written");

        let manifest = EncoderManifest::load(&dir).expect("manifest loads");
        assert_eq!(manifest.latent_dims, 32);
        assert_eq!(manifest.artifact_id(), "bvae@32dims-90acc");

        let _ = fs::remove_file(dir.join("manifest.json"));
        let _ = fs::remove_dir(&dir);
    }

    #[test]
    fn missing_artifact_is_unavailable() {
        let dir = std::env::temp_dir().join(format!("polyomino-missing-{}", Uuid::now_v7()));
        let err = load_encoder(&dir).err().expect("missing artifact must fail");
        assert_eq!(err.kind(), EnvErrorKind::EncoderUnavailable);
    }
}
