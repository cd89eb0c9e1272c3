//! Encoder/decoder embedding network.
//!
//! Encoder: D → … → 2, decoder: 2 → … → D, both plain MLPs. A model built
//! with `time_dim > 0` concatenates a sinusoidal embedding of the
//! (normalised) epoch time to the input of both halves, so one model can
//! serve every epoch.

use burn::module::AutodiffModule;
use burn::nn::{Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Relu,
    Silu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Layer widths from input to latent, e.g. [512, 256, 128, 64, 32, 2].
    pub encoder_dims: Vec<usize>,
    /// Layer widths from latent to output, e.g. [2, 32, 64, 128, 256, 512].
    pub decoder_dims: Vec<usize>,
    /// Width of the sinusoidal time embedding; 0 disables time conditioning.
    pub time_dim: usize,
    pub activation: Activation,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::for_input_dim(512)
    }
}

impl ModelConfig {
    /// Default layout for a D-dimensional representation.
    pub fn for_input_dim(dim: usize) -> Self {
        let (encoder_dims, decoder_dims) = generate_dimension_array(dim);
        Self {
            encoder_dims,
            decoder_dims,
            time_dim: 0,
            activation: Activation::Relu,
        }
    }

    /// Shared time-conditioned layout: `depth` hidden layers of `hidden`.
    pub fn time_conditioned(dim: usize, hidden: usize, depth: usize, time_dim: usize) -> Self {
        let mut encoder_dims = vec![dim];
        encoder_dims.extend(std::iter::repeat_n(hidden, depth));
        encoder_dims.push(2);
        let decoder_dims = encoder_dims.iter().rev().copied().collect();
        Self {
            encoder_dims,
            decoder_dims,
            time_dim,
            activation: Activation::Silu,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.encoder_dims.first().copied().unwrap_or(0)
    }

    pub fn latent_dim(&self) -> usize {
        self.encoder_dims.last().copied().unwrap_or(0)
    }

    pub fn validate(&self) -> Result<()> {
        if self.encoder_dims.len() < 2 || self.decoder_dims.len() < 2 {
            return Err(VisError::Config(
                "encoder and decoder need at least one layer".into(),
            ));
        }
        if self.decoder_dims.first() != self.encoder_dims.last()
            || self.decoder_dims.last() != self.encoder_dims.first()
        {
            return Err(VisError::Config(format!(
                "decoder {:?} does not mirror encoder {:?}",
                self.decoder_dims, self.encoder_dims
            )));
        }
        if self.encoder_dims.contains(&0) {
            return Err(VisError::Config("zero-width layer".into()));
        }
        Ok(())
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<VisModel<B>> {
        self.validate()?;
        let silu = self.activation == Activation::Silu;
        Ok(VisModel {
            encoder: Mlp::new(&self.encoder_dims, self.time_dim, silu, device),
            decoder: Mlp::new(&self.decoder_dims, self.time_dim, silu, device),
            time_dim: self.time_dim,
        })
    }
}

/// `[D, D/2→pow2, …]` down to five widths (floor 2), then the 2-D latent.
/// The decoder is the mirror image.
pub fn generate_dimension_array(dim: usize) -> (Vec<usize>, Vec<usize>) {
    let mut encoder = vec![dim];
    while encoder.len() < 5 {
        let half = encoder[encoder.len() - 1] / 2;
        let pow2 = if half == 0 { 0 } else { 1usize << (usize::BITS - 1 - half.leading_zeros()) };
        encoder.push(pow2.max(2));
    }
    encoder.push(2);
    let decoder = encoder.iter().rev().copied().collect();
    (encoder, decoder)
}

/// Sinusoidal embedding of times `t` [M] → [M, dim].
///
/// Frequencies are log-spaced in [1e-4, 1] and scaled by 2π; an odd `dim`
/// gets one zero column of padding.
pub fn time_embedding<B: Backend>(t: Tensor<B, 1>, dim: usize) -> Tensor<B, 2> {
    let device = t.device();
    let [m] = t.dims();
    let half = dim / 2;

    let freqs: Vec<f32> = (0..half)
        .map(|i| {
            let frac = if half > 1 { i as f64 / (half - 1) as f64 } else { 0.0 };
            let log_f = (1e-4f64).ln() * (1.0 - frac);
            (log_f.exp() * 2.0 * std::f64::consts::PI) as f32
        })
        .collect();
    let freqs = Tensor::<B, 1>::from_data(TensorData::new(freqs, [half]), &device);

    let ang = t.reshape([m, 1]) * freqs.reshape([1, half]);
    let mut parts = vec![ang.clone().sin(), ang.cos()];
    if dim % 2 == 1 {
        parts.push(Tensor::zeros([m, 1], &device));
    }
    Tensor::cat(parts, 1)
}

/// Feed-forward stack; every layer but the last is followed by the activation.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
    silu: bool,
}

impl<B: Backend> Mlp<B> {
    fn new(dims: &[usize], extra_input: usize, silu: bool, device: &B::Device) -> Self {
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let d_in = if i == 0 { w[0] + extra_input } else { w[0] };
                LinearConfig::new(d_in, w[1]).init(device)
            })
            .collect();
        Self { layers, silu }
    }

    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = input;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = if self.silu {
                    activation::silu(x)
                } else {
                    activation::relu(x)
                };
            }
        }
        x
    }
}

#[derive(Module, Debug)]
pub struct VisModel<B: Backend> {
    pub encoder: Mlp<B>,
    pub decoder: Mlp<B>,
    time_dim: usize,
}

impl<B: Backend> VisModel<B> {
    /// High-D → 2-D. `t` is ignored by plain models and defaults to 0 for
    /// time-conditioned ones.
    pub fn encode(&self, x: Tensor<B, 2>, t: Option<Tensor<B, 1>>) -> Tensor<B, 2> {
        self.encoder.forward(self.condition(x, t))
    }

    /// 2-D → high-D.
    pub fn decode(&self, y: Tensor<B, 2>, t: Option<Tensor<B, 1>>) -> Tensor<B, 2> {
        self.decoder.forward(self.condition(y, t))
    }

    fn condition(&self, x: Tensor<B, 2>, t: Option<Tensor<B, 1>>) -> Tensor<B, 2> {
        if self.time_dim == 0 {
            return x;
        }
        let [m, _] = x.dims();
        let t = t.unwrap_or_else(|| Tensor::zeros([m], &x.device()));
        let te = time_embedding(t, self.time_dim);
        Tensor::cat(vec![x, te], 1)
    }
}

/// Gradient-free deep copy of a trained model, used as the reference of the
/// next epoch's temporal term. Burn tensors are immutable values, so the
/// copy can never observe later updates of the live model.
#[derive(Debug, Clone)]
pub struct FrozenModel<B: Backend> {
    model: VisModel<B>,
}

impl<B: Backend> FrozenModel<B> {
    pub fn freeze<AB>(model: &VisModel<AB>) -> Self
    where
        AB: AutodiffBackend<InnerBackend = B>,
    {
        Self {
            model: model.valid(),
        }
    }

    pub fn encode(&self, x: Tensor<B, 2>, t: Option<Tensor<B, 1>>) -> Tensor<B, 2> {
        self.model.encode(x, t)
    }

    pub fn model(&self) -> &VisModel<B> {
        &self.model
    }
}
