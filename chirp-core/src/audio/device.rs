//! Input device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Heuristic flag for devices that capture system output rather than a microphone.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "wave out",
];

/// Best-effort check for loopback / system-output capture devices.
///
/// A field recording of a bird should never be taken from one of these.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// List all available audio input devices, default first.
///
/// Returns an empty `Vec` if enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => {
            let mut list: Vec<DeviceInfo> = devices
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("Input Device {}", idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_loopback_like: is_loopback_like_name(&name),
                        name,
                    }
                })
                .collect();
            list.sort_by_key(|d| (!d.is_default, d.is_loopback_like, d.name.to_ascii_lowercase()));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

/// Resolve the device to record from: the named device if present, then the
/// system default, then the first non-loopback input.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_input_device(
    host: &cpal::Host,
    preferred_name: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    use crate::error::ChirpError;

    if let Some(preferred) = preferred_name {
        match host.input_devices() {
            Ok(mut devices) => {
                if let Some(device) =
                    devices.find(|d| d.name().map(|n| n == preferred).unwrap_or(false))
                {
                    return Ok(device);
                }
                warn!("preferred input device '{preferred}' not found, falling back");
            }
            Err(e) => warn!("failed to list input devices while resolving preference: {e}"),
        }
    }

    if let Some(default) = host.default_input_device() {
        return Ok(default);
    }

    let mut devices = host
        .input_devices()
        .map_err(|e| ChirpError::AudioDevice(e.to_string()))?;
    let fallback = devices
        .find(|d| !d.name().map(|n| is_loopback_like_name(&n)).unwrap_or(false))
        .ok_or(ChirpError::NoDefaultInputDevice)?;
    warn!("no default input device, falling back to first microphone-like input");
    Ok(fallback)
}

#[cfg(test)]
mod tests {
    use super::is_loopback_like_name;

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("USB Shotgun Microphone"));
    }
}
