use anyhow::{Context, Result, anyhow};
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device named `device_name`, or the host's default input device.
pub fn get_or_default_input(device_name: Option<String>) -> Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    let Some(target) = device_name else {
        return host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device"));
    };

    host.input_devices()
        .context("Failed to enumerate input devices")?
        .find(|d| d.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("No input device named {:?}", target))
}

/// Finds the output device named `device_name`, or the host's default output device.
pub fn get_or_default_output(device_name: Option<String>) -> Result<Device> {
    let host = get_host();
    let Some(target) = device_name else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };

    host.output_devices()
        .context("Failed to enumerate output devices")?
        .find(|d| d.name().is_ok_and(|name| name == target))
        .ok_or_else(|| anyhow!("No output device named {:?}", target))
}

// One line per device: ` * name(2ch, 48000hz) [default]`.
fn describe(name: &str, channels: u16, sample_rate: u32, default_name: Option<&str>) -> String {
    let mut d = format!(" * {}({}ch, {}hz)", name, channels, sample_rate);
    if default_name == Some(name) {
        d.push_str(" [default]");
    }
    d
}

pub fn get_available_inputs() -> Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }
    let host = get_host();
    let default_device = host.default_input_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.input_devices().context("No input devices found")? {
        let Ok(name) = device.name() else { continue };
        let Ok(cfg) = device.default_input_config() else {
            tracing::debug!("Skipping input device without default config: {}", name);
            continue;
        };
        device_names.push(describe(
            &name,
            cfg.channels(),
            cfg.sample_rate().0,
            default_device.as_deref(),
        ));
    }
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> Result<String> {
    let host = get_host();
    let default_device = host.default_output_device().and_then(|d| d.name().ok());

    let mut device_names = Vec::new();
    for device in host.output_devices().context("No output devices found")? {
        let Ok(name) = device.name() else { continue };
        let Ok(cfg) = device.default_output_config() else {
            tracing::debug!("Skipping output device without default config: {}", name);
            continue;
        };
        device_names.push(describe(
            &name,
            cfg.channels(),
            cfg.sample_rate().0,
            default_device.as_deref(),
        ));
    }
    Ok(device_names.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_marks_default_device() {
        assert_eq!(
            describe("USB Mic", 1, 16_000, Some("USB Mic")),
            " * USB Mic(1ch, 16000hz) [default]"
        );
        assert_eq!(
            describe("Speakers", 2, 48_000, Some("USB Mic")),
            " * Speakers(2ch, 48000hz)"
        );
    }
}
