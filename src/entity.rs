//! Read models for the climate and temperature-sensor entities, and the
//! commands their actions produce.

use crate::models::mcontrol::{CloudDeviceRecord, CloudMode, DeviceId, Power, Wind};
use crate::services::control::ControlOverrides;

pub const MIN_TEMP_C: f64 = 16.0;
pub const MAX_TEMP_C: f64 = 30.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HvacMode {
    Off,
    Cool,
    Heat,
    Auto,
    Dry,
    FanOnly,
}

impl HvacMode {
    pub fn from_cloud(mode: CloudMode) -> Self {
        match mode {
            CloudMode::Cool => HvacMode::Cool,
            CloudMode::Heat => HvacMode::Heat,
            CloudMode::Auto => HvacMode::Auto,
            CloudMode::Fan => HvacMode::FanOnly,
            CloudMode::Dry => HvacMode::Dry,
        }
    }

    /// `None` for off, which is a power change rather than a mode.
    pub fn to_cloud(self) -> Option<CloudMode> {
        match self {
            HvacMode::Off => None,
            HvacMode::Cool => Some(CloudMode::Cool),
            HvacMode::Heat => Some(CloudMode::Heat),
            HvacMode::Auto => Some(CloudMode::Auto),
            HvacMode::Dry => Some(CloudMode::Dry),
            HvacMode::FanOnly => Some(CloudMode::Fan),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Some(HvacMode::Off),
            "cool" => Some(HvacMode::Cool),
            "heat" => Some(HvacMode::Heat),
            "auto" => Some(HvacMode::Auto),
            "dry" => Some(HvacMode::Dry),
            "fan" | "fan_only" => Some(HvacMode::FanOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FanMode {
    Auto,
    Low,
    Medium,
    High,
}

impl FanMode {
    pub fn from_cloud(wind: Wind) -> Self {
        match wind {
            Wind::Auto => FanMode::Auto,
            Wind::Low => FanMode::Low,
            Wind::Mid => FanMode::Medium,
            Wind::High => FanMode::High,
        }
    }

    pub fn to_cloud(self) -> Wind {
        match self {
            FanMode::Auto => Wind::Auto,
            FanMode::Low => Wind::Low,
            FanMode::Medium => Wind::Mid,
            FanMode::High => Wind::High,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(FanMode::Auto),
            "low" => Some(FanMode::Low),
            "medium" | "mid" => Some(FanMode::Medium),
            "high" => Some(FanMode::High),
            _ => None,
        }
    }
}

/// What the climate entity shows for one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimateView {
    pub device_id: DeviceId,
    pub name: String,
    pub hvac_mode: HvacMode,
    pub current_temperature: Option<f64>,
    pub target_temperature: Option<f64>,
    pub fan_mode: FanMode,
    pub swing_on: bool,
}

impl ClimateView {
    pub fn from_record(record: &CloudDeviceRecord) -> Self {
        let hvac_mode = if record.is_on() {
            HvacMode::from_cloud(record.mode.unwrap_or(CloudMode::Auto))
        } else {
            HvacMode::Off
        };
        ClimateView {
            device_id: record.id.clone(),
            name: record.display_name(),
            hvac_mode,
            current_temperature: parse_temp(record.fact_temp.as_deref()),
            target_temperature: parse_temp(record.set_temp.as_deref()),
            fan_mode: FanMode::from_cloud(record.wind.unwrap_or(Wind::Auto)),
            swing_on: record.swing_on(),
        }
    }
}

/// The separate room-temperature sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureSensorView {
    pub unique_id: String,
    pub name: String,
    pub celsius: Option<f64>,
}

impl TemperatureSensorView {
    pub fn from_record(record: &CloudDeviceRecord) -> Self {
        TemperatureSensorView {
            unique_id: format!("{}_temperature", record.id),
            name: format!("{} Temperature", record.display_name()),
            celsius: parse_temp(record.fact_temp.as_deref()),
        }
    }
}

fn parse_temp(raw: Option<&str>) -> Option<f64> {
    raw?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

// =====================
// Entity actions
// =====================

pub fn set_hvac_mode(mode: HvacMode) -> ControlOverrides {
    match mode.to_cloud() {
        None => turn_off(),
        Some(cloud) => ControlOverrides::default().with_power(Power::On).with_mode(cloud),
    }
}

/// Target temperature, optionally with a mode in the same call. Fractions are truncated.
pub fn set_temperature(celsius: f64, mode: Option<HvacMode>) -> ControlOverrides {
    let base = match mode {
        Some(m) => set_hvac_mode(m),
        None => ControlOverrides::default(),
    };
    base.with_set_temp(celsius.trunc() as i32)
}

pub fn set_fan_mode(fan: FanMode) -> ControlOverrides {
    ControlOverrides::default().with_wind(fan.to_cloud())
}

pub fn set_swing(on: bool) -> ControlOverrides {
    ControlOverrides::default().with_swing(on)
}

pub fn turn_on() -> ControlOverrides {
    ControlOverrides::default().with_power(Power::On)
}

pub fn turn_off() -> ControlOverrides {
    ControlOverrides::default().with_power(Power::Off)
}
