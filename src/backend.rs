//! Backend abstraction - Multi-backend support
//!
//! Supports both CUDA (GPU) and NdArray (CPU) backends, chosen at compile
//! time, plus the runtime device selector read from the configuration.

use std::fmt;
use std::str::FromStr;

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

use crate::utils::error::{PipelineError, Result};

// --------------------------------------------------------------------------------
// BACKEND SELECTION: CUDA (preferred) or NdArray (fallback)
// --------------------------------------------------------------------------------

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// Autodiff backend, needed for saliency maps
pub type TrainingBackend = Autodiff<DefaultBackend>;

pub type Device = <DefaultBackend as Backend>::Device;

/// Get the default device
pub fn default_device() -> Device {
    Device::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    #[cfg(feature = "cuda")]
    {
        "CUDA (GPU)"
    }

    #[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
    {
        "NdArray (CPU)"
    }
}

/// Compute device requested by the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Whatever the compiled backend prefers
    Auto,
    Cpu,
    /// CUDA device by ordinal
    Cuda(usize),
}

impl FromStr for DeviceSelector {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(DeviceSelector::Auto),
            "cpu" => Ok(DeviceSelector::Cpu),
            "cuda" | "gpu" => Ok(DeviceSelector::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|index| index.parse().ok())
                .map(DeviceSelector::Cuda)
                .ok_or_else(|| {
                    PipelineError::Config(format!(
                        "unknown device '{}', expected auto, cpu, cuda or cuda:N",
                        s
                    ))
                }),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Auto => write!(f, "auto"),
            DeviceSelector::Cpu => write!(f, "cpu"),
            DeviceSelector::Cuda(index) => write!(f, "cuda:{}", index),
        }
    }
}

/// Resolve a selector against the compiled backend
#[cfg(feature = "cuda")]
pub fn select_device(selector: DeviceSelector) -> Result<Device> {
    match selector {
        DeviceSelector::Auto => Ok(default_device()),
        DeviceSelector::Cuda(index) => Ok(burn_cuda::CudaDevice::new(index)),
        DeviceSelector::Cpu => Err(PipelineError::Config(
            "device 'cpu' requested but this build uses the CUDA backend".to_string(),
        )),
    }
}

/// Resolve a selector against the compiled backend
#[cfg(not(feature = "cuda"))]
pub fn select_device(selector: DeviceSelector) -> Result<Device> {
    match selector {
        DeviceSelector::Auto | DeviceSelector::Cpu => Ok(default_device()),
        DeviceSelector::Cuda(_) => Err(PipelineError::Config(format!(
            "device '{}' requested but this build has no CUDA support (enable the `cuda` feature)",
            selector
        ))),
    }
}
