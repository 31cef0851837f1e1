//! Audio device enumeration and selection

use std::fmt;
use std::str::FromStr;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SupportedStreamConfigRange};
use serde::{Deserialize, Serialize};

use crate::{AudioError, AudioResult};

/// Audio device information
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Position in the host's device list, usable as a selector
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub channels: u16,
    pub sample_rates: Vec<u32>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rates = self
            .sample_rates
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{:>3}{} {} ({} ch, {} Hz)",
            self.index,
            if self.is_default { " *" } else { "  " },
            self.name,
            self.channels,
            rates
        )
    }
}

/// How the user picked a device
///
/// JSON strings are parsed like command line values, so `"default"` and
/// `"3"` mean the same thing in a config file as on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(untagged, from = "RawSelector")]
pub enum DeviceSelector {
    /// Host default
    #[default]
    Default,
    /// Position in [`list_input_devices`] / [`list_output_devices`]
    Index(usize),
    /// Exact device name
    Name(String),
}

impl DeviceSelector {
    fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("default") {
            return DeviceSelector::Default;
        }
        match s.parse::<usize>() {
            Ok(index) => DeviceSelector::Index(index),
            Err(_) => DeviceSelector::Name(s.to_string()),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DeviceSelector::parse(s))
    }
}

/// Selector as written in JSON: `null`, an index or any string
#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelector {
    Unset,
    Index(usize),
    Text(String),
}

impl From<RawSelector> for DeviceSelector {
    fn from(raw: RawSelector) -> Self {
        match raw {
            RawSelector::Unset => DeviceSelector::Default,
            RawSelector::Index(index) => DeviceSelector::Index(index),
            RawSelector::Text(text) => DeviceSelector::parse(&text),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Default => f.write_str("default"),
            DeviceSelector::Index(i) => write!(f, "#{i}"),
            DeviceSelector::Name(name) => f.write_str(name),
        }
    }
}

/// Get the audio host (platform-specific backend)
pub fn get_host() -> Host {
    cpal::default_host()
}

#[derive(Clone, Copy)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }

    fn devices(self, host: &Host) -> AudioResult<Vec<Device>> {
        let devices: Result<Vec<Device>, _> = match self {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        };
        devices.map_err(|e| AudioError::BackendError(e.to_string()))
    }

    fn default_device(self, host: &Host) -> Option<Device> {
        match self {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
    }

    fn configs(self, device: &Device) -> Vec<SupportedStreamConfigRange> {
        let configs: Result<Vec<SupportedStreamConfigRange>, _> = match self {
            Direction::Input => device.supported_input_configs().map(|c| c.collect()),
            Direction::Output => device.supported_output_configs().map(|c| c.collect()),
        };
        configs.unwrap_or_default()
    }
}

fn list_devices(direction: Direction) -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_name = direction
        .default_device(&host)
        .and_then(|d| d.name().ok());

    let devices = direction
        .devices(&host)?
        .into_iter()
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| format!("<unnamed {index}>"));
            let (channels, sample_rates) = extract_device_info(&direction.configs(&device));
            DeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels,
                sample_rates,
            }
        })
        .collect();

    Ok(devices)
}

/// List available input devices
pub fn list_input_devices() -> AudioResult<Vec<DeviceInfo>> {
    list_devices(Direction::Input)
}

/// List available output devices
pub fn list_output_devices() -> AudioResult<Vec<DeviceInfo>> {
    list_devices(Direction::Output)
}

fn select_device(
    host: &Host,
    direction: Direction,
    selector: &DeviceSelector,
) -> AudioResult<Device> {
    match selector {
        DeviceSelector::Default => direction
            .default_device(host)
            .ok_or(AudioError::NoDevice(direction.label())),
        DeviceSelector::Index(index) => direction
            .devices(host)?
            .into_iter()
            .nth(*index)
            .ok_or_else(|| {
                AudioError::DeviceNotFound(format!("{} device #{}", direction.label(), index))
            }),
        DeviceSelector::Name(name) => {
            for device in direction.devices(host)? {
                if let Ok(device_name) = device.name()
                    && device_name == *name
                {
                    return Ok(device);
                }
            }
            Err(AudioError::DeviceNotFound(name.clone()))
        }
    }
}

/// Resolve an input device selector
pub fn select_input_device(host: &Host, selector: &DeviceSelector) -> AudioResult<Device> {
    select_device(host, Direction::Input, selector)
}

/// Resolve an output device selector
pub fn select_output_device(host: &Host, selector: &DeviceSelector) -> AudioResult<Device> {
    select_device(host, Direction::Output, selector)
}

fn extract_device_info(configs: &[SupportedStreamConfigRange]) -> (u16, Vec<u32>) {
    let max_channels = configs.iter().map(|c| c.channels()).max().unwrap_or(0);

    let mut sample_rates: Vec<u32> = configs
        .iter()
        .flat_map(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;

            [8000, 16000, 22050, 32000, 44100, 48000, 96000]
                .into_iter()
                .filter(move |&rate| rate >= min && rate <= max)
        })
        .collect();

    sample_rates.sort_unstable();
    sample_rates.dedup();

    (max_channels, sample_rates)
}
