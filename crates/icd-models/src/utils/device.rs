use anyhow::{anyhow, Result};
use candle_core::Device;

/// Converts an accelerator ordinal into a Candle `Device`.
///
/// A negative ordinal disables acceleration and returns the CPU device.
/// Otherwise the CUDA device with that ordinal is opened; any failure to do
/// so (no CUDA build, no such device) is returned unchanged.
pub fn resolve_device(gpu: i32) -> Result<Device> {
    if gpu < 0 {
        return Ok(Device::Cpu);
    }
    let device = Device::new_cuda(gpu as usize)?;
    log::info!("Using CUDA device {}", gpu);
    Ok(device)
}

/// Converts a device string (`cpu`, `cuda`, `cuda:N`) to an accelerator ordinal
/// understood by `resolve_device`.
pub fn parse_device_ordinal(device_str: &str) -> Result<i32> {
    if device_str.starts_with("cuda") {
        if device_str == "cuda" {
            return Ok(0);
        }
        device_str
            .split(':')
            .nth(1)
            .and_then(|s| s.parse::<i32>().ok())
            .filter(|n| *n >= 0)
            .ok_or_else(|| anyhow!("Invalid CUDA device string: {}", device_str))
    } else {
        match device_str {
            "cpu" => Ok(-1),
            _ => Err(anyhow!("Unsupported device type: {}", device_str)),
        }
    }
}

pub fn device_label(device: &Device) -> String {
    match device {
        Device::Cpu => "cpu".to_string(),
        Device::Cuda(_) => "cuda".to_string(),
        Device::Metal(_) => "metal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ordinal_is_cpu() {
        let device = resolve_device(-1).unwrap();
        assert!(matches!(device, Device::Cpu));
        assert_eq!(device_label(&device), "cpu");
    }

    #[test]
    fn device_strings() {
        assert_eq!(parse_device_ordinal("cpu").unwrap(), -1);
        assert_eq!(parse_device_ordinal("cuda").unwrap(), 0);
        assert_eq!(parse_device_ordinal("cuda:2").unwrap(), 2);
        assert!(parse_device_ordinal("cuda:x").is_err());
        assert!(parse_device_ordinal("tpu").is_err());
    }
}
