use std::path::Path;

use candle_core::Device;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};

/// Free accelerator memory kept in reserve for the KV cache and activations.
const KV_HEADROOM_MB: u64 = 1024;

/// Selects the best available compute device.
///
/// When the `cuda` feature is enabled and `prefer_gpu` is true, attempts to
/// acquire CUDA device `cuda_device_id`; with `metal`, the default Metal
/// device. Falls back to CPU on any error. A missing accelerator is not an
/// error.
pub fn select_device(prefer_gpu: bool, #[allow(unused_variables)] cuda_device_id: usize) -> CoreResult<Device> {
    #[cfg(feature = "cuda")]
    if prefer_gpu {
        match Device::new_cuda(cuda_device_id) {
            Ok(dev) => {
                info!(cuda_device_id, "Using CUDA device");
                return Ok(dev);
            }
            Err(e) => warn!(error = %e, "CUDA unavailable, falling back to CPU"),
        }
    }

    #[cfg(feature = "metal")]
    if prefer_gpu {
        match Device::new_metal(0) {
            Ok(dev) => {
                info!("Using Metal device");
                return Ok(dev);
            }
            Err(e) => warn!(error = %e, "Metal unavailable, falling back to CPU"),
        }
    }

    #[cfg(not(any(feature = "cuda", feature = "metal")))]
    if prefer_gpu {
        warn!("GPU requested but kdgen was built without the `cuda` or `metal` feature");
    }

    info!("Using CPU device");
    Ok(Device::Cpu)
}

/// Human-readable device label for logs.
pub fn device_name(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Cuda(_) => "cuda",
        Device::Metal(_) => "metal",
    }
}

/// Decide where the weights in `model_dir` should live.
///
/// On CPU this is a no-op. On an accelerator the free memory is compared with
/// the size of the weight files plus a KV-cache reserve. When they do not fit,
/// `cpu_offload` moves the whole model to CPU; without it the load fails.
/// When free memory cannot be queried the accelerator is used as-is.
pub fn place_weights(device: Device, model_dir: &Path, cpu_offload: bool) -> CoreResult<Device> {
    if matches!(device, Device::Cpu) {
        return Ok(device);
    }

    let Some(free_mb) = query_free_vram_mb() else {
        info!("Cannot query free accelerator memory, loading optimistically");
        return Ok(device);
    };

    let needed_mb = weights_size_mb(model_dir) + KV_HEADROOM_MB;
    match fits_or_offloads(free_mb, needed_mb, cpu_offload) {
        Placement::Accelerator => {
            info!(free_mb, needed_mb, "Weights fit on accelerator");
            Ok(device)
        }
        Placement::Cpu => {
            warn!(free_mb, needed_mb, "Insufficient accelerator memory, offloading model to CPU");
            Ok(Device::Cpu)
        }
        Placement::DoesNotFit => Err(CoreError::config(
            "device",
            format!(
                "model needs ~{needed_mb} MiB but only {free_mb} MiB are free; \
                 enable cpu_offload or use a smaller quantization"
            ),
        )),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Placement {
    Accelerator,
    Cpu,
    DoesNotFit,
}

fn fits_or_offloads(free_mb: u64, needed_mb: u64, cpu_offload: bool) -> Placement {
    if free_mb >= needed_mb {
        Placement::Accelerator
    } else if cpu_offload {
        Placement::Cpu
    } else {
        Placement::DoesNotFit
    }
}

/// Free VRAM in MiB reported by `nvidia-smi`, if available.
fn query_free_vram_mb() -> Option<u64> {
    let output = std::process::Command::new("nvidia-smi")
        .args(["--query-gpu=memory.free", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Total size of `.gguf` and `.safetensors` files in `dir`, in MiB.
fn weights_size_mb(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let bytes: u64 = entries
        .flatten()
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.ends_with(".gguf") || name.ends_with(".safetensors")
        })
        // Hub snapshots hold symlinks into the blob store; follow them.
        .filter_map(|e| std::fs::metadata(e.path()).ok())
        .map(|m| m.len())
        .sum();
    bytes / (1024 * 1024)
}
