//! Backend selection for inference and training.
//!
//! `AutoBackend` runs projection and rendering; `TrainBackend` wraps it
//! with autodiff for the embedding trainer. The `wgpu` feature moves both
//! onto the GPU without touching call sites.

use burn::backend::Autodiff;
use burn::prelude::*;

#[cfg(not(feature = "wgpu"))]
pub type AutoBackend = burn::backend::NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type AutoBackend = burn::backend::Wgpu;

pub type TrainBackend = Autodiff<AutoBackend>;

pub type AutoDevice = <AutoBackend as Backend>::Device;

pub fn get_device() -> AutoDevice {
    AutoDevice::default()
}

pub fn print_backend_info() {
    let name = if cfg!(feature = "wgpu") { "wgpu" } else { "ndarray" };
    log::info!("🖥  backend: {} (autodiff for training), device {:?}", name, get_device());
}
