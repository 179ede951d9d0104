//! β-VAE encoder/decoder inference on candle.
//!
//! Layout of the safetensors artifact (channels-first convolution kernels):
//!
//! - `encoder_conv{1..5}.{weight,bias}` 3x3 convolutions, 32..512 filters
//! - `encoder_bnorm{1..5}.{gamma,beta,moving_mean,moving_variance}`
//! - `encoder_dense1`, `encoder_mu`, `encoder_logvar` linear layers
//! - `decoder_dense1`, `decoder_convT{1..5}` for reconstruction

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{
    Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig, Linear, VarBuilder,
};

use crate::{
    encoder::{EncodedBatch, EncoderManifest, ImageBatch, LatentEncoder},
    error::EnvError,
};

const ENCODER_FILTERS: [usize; 5] = [32, 64, 128, 256, 512];
const DECODER_FILTERS: [usize; 5] = [256, 128, 64, 32, 1];
const DOWNSAMPLE: usize = 32;
const BATCH_NORM_EPS: f64 = 1e-3;
const LOGVAR_MIN: f32 = -20.0;
const LOGVAR_MAX: f32 = 5.0;

fn inference_error(err: candle_core::Error) -> EnvError {
    EnvError::EncoderInference(err.to_string())
}

/// Batch normalization folded into a per-channel affine map using the
/// stored moving statistics.
struct FrozenBatchNorm {
    scale: Tensor,
    shift: Tensor,
}

impl FrozenBatchNorm {
    fn load(channels: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        let gamma = vb.get(channels, "gamma")?;
        let beta = vb.get(channels, "beta")?;
        let moving_mean = vb.get(channels, "moving_mean")?;
        let moving_variance = vb.get(channels, "moving_variance")?;

        let scale = gamma.div(&moving_variance.affine(1.0, BATCH_NORM_EPS)?.sqrt()?)?;
        let shift = beta.sub(&moving_mean.mul(&scale)?)?;
        Ok(Self {
            scale: scale.reshape((1, channels, 1, 1))?,
            shift: shift.reshape((1, channels, 1, 1))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.broadcast_mul(&self.scale)?.broadcast_add(&self.shift)
    }
}

struct ConvBlock {
    conv: Conv2d,
    norm: FrozenBatchNorm,
}

impl ConvBlock {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv.forward(xs)?.relu()?;
        self.norm.forward(&xs)?.max_pool2d(2)
    }
}

pub struct BvaeEncoder {
    device: Device,
    input_side: usize,
    latent_dims: usize,
    blocks: Vec<ConvBlock>,
    dense: Linear,
    mu: Linear,
    logvar: Linear,
    decoder_dense: Linear,
    decoder_convs: Vec<ConvTranspose2d>,
}

impl BvaeEncoder {
    pub fn load(manifest: &EncoderManifest, artifact_dir: &Path) -> Result<Self, EnvError> {
        if manifest.input_side == 0 || manifest.input_side % DOWNSAMPLE != 0 {
            return Err(EnvError::EncoderUnavailable(format!(
                "input side {} is not a multiple of {DOWNSAMPLE}",
                manifest.input_side
            )));
        }

        let device = Device::Cpu;
        let weights_path = artifact_dir.join(&manifest.weights);
        let tensors = candle_core::safetensors::load(&weights_path, &device).map_err(|err| {
            EnvError::EncoderUnavailable(format!(
                "failed to load weights {}: {err}",
                weights_path.display()
            ))
        })?;
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &device);

        Self::build(manifest, vb, device).map_err(|err| {
            EnvError::EncoderUnavailable(format!(
                "weights for {} do not match the network: {err}",
                manifest.artifact_id()
            ))
        })
    }

    fn build(
        manifest: &EncoderManifest,
        vb: VarBuilder,
        device: Device,
    ) -> candle_core::Result<Self> {
        let conv_config = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let mut blocks = Vec::with_capacity(ENCODER_FILTERS.len());
        let mut in_channels = 1;
        for (index, filters) in ENCODER_FILTERS.iter().copied().enumerate() {
            let layer = index + 1;
            let conv = candle_nn::conv2d(
                in_channels,
                filters,
                3,
                conv_config,
                vb.pp(format!("encoder_conv{layer}")),
            )?;
            let norm = FrozenBatchNorm::load(filters, vb.pp(format!("encoder_bnorm{layer}")))?;
            blocks.push(ConvBlock { conv, norm });
            in_channels = filters;
        }

        let bottleneck_side = manifest.input_side / DOWNSAMPLE;
        let flattened = bottleneck_side * bottleneck_side * in_channels;
        let latent_dims = manifest.latent_dims;
        let dense = candle_nn::linear(flattened, 2 * latent_dims, vb.pp("encoder_dense1"))?;
        let mu = candle_nn::linear(2 * latent_dims, latent_dims, vb.pp("encoder_mu"))?;
        let logvar = candle_nn::linear(2 * latent_dims, latent_dims, vb.pp("encoder_logvar"))?;

        let decoder_dense = candle_nn::linear(latent_dims, flattened, vb.pp("decoder_dense1"))?;
        let deconv_config = ConvTranspose2dConfig {
            padding: 1,
            output_padding: 1,
            stride: 2,
            dilation: 1,
        };
        let mut decoder_convs = Vec::with_capacity(DECODER_FILTERS.len());
        let mut in_channels = ENCODER_FILTERS[ENCODER_FILTERS.len() - 1];
        for (index, filters) in DECODER_FILTERS.iter().copied().enumerate() {
            decoder_convs.push(candle_nn::conv_transpose2d(
                in_channels,
                filters,
                3,
                deconv_config,
                vb.pp(format!("decoder_convT{}", index + 1)),
            )?);
            in_channels = filters;
        }

        Ok(Self {
            device,
            input_side: manifest.input_side,
            latent_dims,
            blocks,
            dense,
            mu,
            logvar,
            decoder_dense,
            decoder_convs,
        })
    }

    fn run_encoder(&self, batch: &ImageBatch) -> candle_core::Result<(Tensor, Tensor, Tensor)> {
        let side = self.input_side;
        let flat: Vec<f32> = batch.images.iter().flatten().copied().collect();
        let input = Tensor::from_vec(flat, (batch.len(), side, side, 1), &self.device)?;
        let preprocessed = input.affine(1.0 / 255.0, 0.0)?;

        let mut xs = preprocessed.permute((0, 3, 1, 2))?.contiguous()?;
        for block in &self.blocks {
            xs = block.forward(&xs)?;
        }
        // flatten in channels-last order to match the dense layer's training layout
        let xs = xs.permute((0, 2, 3, 1))?.contiguous()?.flatten_from(1)?;
        let hidden = self.dense.forward(&xs)?;
        Ok((self.mu.forward(&hidden)?, self.logvar.forward(&hidden)?, preprocessed))
    }

    fn run_decoder(&self, latents: &[Vec<f32>]) -> candle_core::Result<Vec<Vec<f32>>> {
        let bottleneck_side = self.input_side / DOWNSAMPLE;
        let channels = ENCODER_FILTERS[ENCODER_FILTERS.len() - 1];
        let flat: Vec<f32> = latents.iter().flatten().copied().collect();
        let z = Tensor::from_vec(flat, (latents.len(), self.latent_dims), &self.device)?;

        let mut xs = self
            .decoder_dense
            .forward(&z)?
            .relu()?
            .reshape((latents.len(), bottleneck_side, bottleneck_side, channels))?
            .permute((0, 3, 1, 2))?
            .contiguous()?;
        let last = self.decoder_convs.len() - 1;
        for (index, deconv) in self.decoder_convs.iter().enumerate() {
            xs = deconv.forward(&xs)?;
            xs = if index == last {
                // sigmoid
                (xs.neg()?.exp()? + 1.0)?.recip()?
            } else {
                xs.relu()?
            };
        }
        xs.permute((0, 2, 3, 1))?
            .contiguous()?
            .flatten_from(1)?
            .to_vec2::<f32>()
    }
}

impl LatentEncoder for BvaeEncoder {
    fn latent_dims(&self) -> usize {
        self.latent_dims
    }

    fn input_side(&self) -> usize {
        self.input_side
    }

    fn encode(&self, batch: &ImageBatch) -> Result<EncodedBatch, EnvError> {
        if batch.side != self.input_side {
            return Err(EnvError::InvalidObservation(format!(
                "image side {} does not match encoder input side {}",
                batch.side, self.input_side
            )));
        }

        let (mu, logvar, preprocessed) = self.run_encoder(batch).map_err(inference_error)?;
        let mean = mu.to_vec2::<f32>().map_err(inference_error)?;
        let logvar: Vec<Vec<f32>> = logvar
            .to_vec2::<f32>()
            .map_err(inference_error)?
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.clamp(LOGVAR_MIN, LOGVAR_MAX)).collect())
            .collect();
        let sigma = logvar
            .iter()
            .map(|row| row.iter().map(|v| (0.5 * v).exp()).collect())
            .collect();
        let preprocessed = ImageBatch {
            side: self.input_side,
            images: preprocessed
                .flatten_from(1)
                .and_then(|xs| xs.to_vec2::<f32>())
                .map_err(inference_error)?,
        };

        Ok(EncodedBatch {
            mean,
            logvar,
            sigma,
            preprocessed,
        })
    }

    fn decode(&self, latents: &[Vec<f32>]) -> Result<ImageBatch, EnvError> {
        if let Some(bad) = latents.iter().find(|z| z.len() != self.latent_dims) {
            return Err(EnvError::EncoderInference(format!(
                "latent vector has {} dims, expected {}",
                bad.len(),
                self.latent_dims
            )));
        }
        if latents.is_empty() {
            return Ok(ImageBatch {
                side: self.input_side,
                images: Vec::new(),
            });
        }

        let images = self.run_decoder(latents).map_err(inference_error)?;
        Ok(ImageBatch {
            side: self.input_side,
            images,
        })
    }
}
