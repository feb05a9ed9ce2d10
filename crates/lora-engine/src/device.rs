//! Device and numeric precision selection.
//!
//! Provides:
//! - [`DevicePreference`]: what the operator asked for (`auto|cuda|cpu|mps`)
//! - [`Accelerators`]: what the runtime reports as available
//! - [`resolve_placement`]: the decision function combining the two

use std::fmt;
use std::str::FromStr;

/// Device requested in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cuda,
    Cpu,
    Mps,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => write!(f, "auto"),
            DevicePreference::Cuda => write!(f, "cuda"),
            DevicePreference::Cpu => write!(f, "cpu"),
            DevicePreference::Mps => write!(f, "mps"),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cuda" => Ok(DevicePreference::Cuda),
            "cpu" => Ok(DevicePreference::Cpu),
            "mps" => Ok(DevicePreference::Mps),
            other => Err(format!("unknown device `{other}` (expected auto, cuda, cpu or mps)")),
        }
    }
}

/// Device a model actually runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    Cpu,
    Cuda,
    Mps,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda => write!(f, "cuda"),
            Device::Mps => write!(f, "mps"),
        }
    }
}

/// Numeric precision of the model weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Precision {
    BFloat16,
    Float16,
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::BFloat16 => write!(f, "bf16"),
            Precision::Float16 => write!(f, "f16"),
        }
    }
}

/// Accelerators a runtime can use on this host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accelerators {
    pub cuda: bool,
    pub mps: bool,
}

impl Accelerators {
    /// No accelerators, CPU only.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Resolved device plus precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub device: Device,
    pub precision: Precision,
}

impl Placement {
    /// Placement on `device` with the precision that device runs best at:
    /// bfloat16 on CPU, float16 on accelerators.
    pub fn on(device: Device) -> Self {
        let precision = match device {
            Device::Cpu => Precision::BFloat16,
            Device::Cuda | Device::Mps => Precision::Float16,
        };
        Self { device, precision }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device, self.precision)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device {0} was requested but is not available")]
    Unavailable(Device),
}

/// Pick the device and precision for a model.
///
/// `auto` probes CUDA first, then MPS, then falls back to CPU. MPS is skipped
/// for large models: it cannot address buffers over 2^32 bytes, which 7B-class
/// weights exceed. An explicit accelerator preference is honored only when
/// that accelerator is available.
pub fn resolve_placement(
    preference: DevicePreference,
    accelerators: Accelerators,
    large_model: bool,
) -> Result<Placement, DeviceError> {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda if accelerators.cuda => Device::Cuda,
        DevicePreference::Cuda => return Err(DeviceError::Unavailable(Device::Cuda)),
        DevicePreference::Mps if accelerators.mps => Device::Mps,
        DevicePreference::Mps => return Err(DeviceError::Unavailable(Device::Mps)),
        DevicePreference::Auto => {
            if accelerators.cuda {
                Device::Cuda
            } else if accelerators.mps && !large_model {
                Device::Mps
            } else {
                Device::Cpu
            }
        }
    };

    Ok(Placement::on(device))
}
