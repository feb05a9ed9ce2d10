//! Accelerator availability for lora-serve runtimes.
//!
//! Accelerators are compile-time gated by the `cuda` and `metal` cargo
//! features. Metal is only reported on macOS. The `LORA_SERVE_DISABLE_ACCEL`
//! environment variable hides every accelerator, which forces `auto`
//! placement onto the CPU without rebuilding.

use lora_engine::{Accelerators, Device};

/// Environment variable that hides all accelerators when set to a truthy value.
pub const DISABLE_ACCEL_ENV: &str = "LORA_SERVE_DISABLE_ACCEL";

/// Accelerator devices compiled into this build.
pub fn compiled() -> &'static [Device] {
    &[
        #[cfg(feature = "cuda")]
        Device::Cuda,
        #[cfg(all(feature = "metal", target_os = "macos"))]
        Device::Mps,
    ]
}

/// Probe which accelerators a runtime may use on this host.
pub fn probe_accelerators() -> Accelerators {
    if accel_disabled(std::env::var(DISABLE_ACCEL_ENV).ok().as_deref()) {
        tracing::debug!("accelerators disabled via {DISABLE_ACCEL_ENV}");
        return Accelerators::none();
    }
    from_devices(compiled())
}

fn from_devices(devices: &[Device]) -> Accelerators {
    Accelerators {
        cuda: devices.contains(&Device::Cuda),
        mps: devices.contains(&Device::Mps),
    }
}

fn accel_disabled(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}
