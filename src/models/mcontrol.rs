//! Wire and domain models for the aircontrolbase.com cloud and the CCM21-i gateway.
//!
//! Notes
//! - Cloud records keep every field the vendor sends: the ones we interpret are
//!   typed, the rest ride along in `extra` so control payloads stay complete.
//! - Temperatures are decimal strings on the cloud side. Numbers are accepted
//!   and normalised to strings.
//! - Power, mode and wind values we do not recognise read as absent, and a
//!   record that cannot be read at all is dropped. Neither fails the response.

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// =====================
// Identifiers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalAddress(pub u16);

// =====================
// Cloud enums
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Power {
    #[serde(rename = "y")]
    On,
    #[serde(rename = "n")]
    Off,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudMode {
    Cool,
    Heat,
    Auto,
    Fan,
    Dry,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Wind {
    Auto,
    Low,
    Mid,
    High,
}

// =====================
// Cloud records
// =====================

/// One AC unit as reported by `getDetails`, and the exact shape `control` expects back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudDeviceRecord {
    pub id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_lenient", skip_serializing_if = "Option::is_none")]
    pub power: Option<Power>,
    #[serde(default, deserialize_with = "de_lenient", skip_serializing_if = "Option::is_none")]
    pub mode: Option<CloudMode>,
    #[serde(default, deserialize_with = "de_lenient", skip_serializing_if = "Option::is_none")]
    pub wind: Option<Wind>,
    #[serde(
        rename = "setTemp",
        default,
        deserialize_with = "de_opt_decimal_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub set_temp: Option<String>,
    #[serde(
        rename = "factTemp",
        default,
        deserialize_with = "de_opt_decimal_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub fact_temp: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal_string", skip_serializing_if = "Option::is_none")]
    pub swing: Option<String>,
    /// Lock values and anything else the vendor adds. Passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CloudDeviceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        CloudDeviceRecord {
            id: DeviceId(id.into()),
            name: None,
            power: None,
            mode: None,
            wind: None,
            set_temp: None,
            fact_temp: None,
            swing: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_on(&self) -> bool {
        self.power == Some(Power::On)
    }

    pub fn swing_on(&self) -> bool {
        match self.swing.as_deref() {
            None | Some("") | Some("0") | Some("off") | Some("n") => false,
            Some(_) => true,
        }
    }

    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("AC {}", self.id))
    }

    /// Overlay a local reading, translated into cloud vocabulary.
    pub fn apply_local(&mut self, state: &LocalDeviceState) {
        self.power = Some(if state.is_on { Power::On } else { Power::Off });
        // Off has no cloud mode; power carries it.
        self.mode = Some(state.mode.to_cloud().unwrap_or(CloudMode::Auto));
        self.wind = Some(state.fan_speed.to_cloud());
        self.set_temp = Some(state.setpoint_temperature.to_string());
        self.fact_temp = Some(state.measured_temperature.to_string());
        self.swing = Some(if state.swing_on { "1" } else { "0" }.to_string());
    }
}

fn de_opt_decimal_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct V;
    impl<'de> serde::de::Visitor<'de> for V {
        type Value = Option<String>;

        fn expecting(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
            write!(f, "a string, a number or null")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Some(value.to_string()))
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            // 24.0 -> "24", 24.5 -> "24.5"
            if value.fract() == 0.0 && value.abs() < 1e15 {
                Ok(Some(format!("{}", value as i64)))
            } else {
                Ok(Some(value.to_string()))
            }
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: serde::Deserializer<'de>,
        {
            deserializer.deserialize_any(V)
        }
    }

    deserializer.deserialize_option(V)
}

/// Unknown or empty values read as `None` instead of failing the record.
fn de_lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(value) => value,
    };
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => {
            warn!("Ignoring unrecognised cloud value {}", value);
            Ok(None)
        }
    }
}

/// Records that do not parse are logged and skipped.
fn de_records<'de, D>(deserializer: D) -> Result<Vec<CloudDeviceRecord>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    let mut records = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<CloudDeviceRecord>(value) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping unreadable device record at index {}: {}", index, e),
        }
    }
    Ok(records)
}

/// Every device the account can see, keyed by cloud identifier.
pub type DeviceSnapshot = BTreeMap<DeviceId, CloudDeviceRecord>;

// =====================
// Cloud envelopes
// =====================

/// Fields every cloud response may carry. Only `code` is interpreted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiStatus {
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl ApiStatus {
    pub fn code_is(&self, expected: i64) -> bool {
        match &self.code {
            Some(Value::Number(n)) => n.as_i64() == Some(expected),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok() == Some(expected),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub result: Option<LoginResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
    #[serde(default, deserialize_with = "de_opt_decimal_string")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailsResponse {
    #[serde(default)]
    pub result: Option<DetailsResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailsResult {
    #[serde(default)]
    pub areas: Vec<Area>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Area {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_records")]
    pub data: Vec<CloudDeviceRecord>,
}

impl DetailsResult {
    /// Flatten `areas[].data[]` into one list, preserving order.
    pub fn into_devices(self) -> Vec<CloudDeviceRecord> {
        self.areas.into_iter().flat_map(|a| a.data).collect()
    }
}

// =====================
// Local gateway
// =====================

/// One row of the gateway's `get_mbdata_all` answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStatusEntry {
    #[serde(default)]
    pub addr: Option<LocalAddress>,
    #[serde(rename = "Data", default)]
    pub data: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LocalMode {
    Cool,
    Heat,
    Dry,
    Fan,
    Off,
    Auto,
    Unknown(u8),
}

impl LocalMode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => LocalMode::Cool,
            1 => LocalMode::Heat,
            2 => LocalMode::Dry,
            3 => LocalMode::Fan,
            4 => LocalMode::Off,
            5 => LocalMode::Auto,
            other => LocalMode::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            LocalMode::Cool => 0,
            LocalMode::Heat => 1,
            LocalMode::Dry => 2,
            LocalMode::Fan => 3,
            LocalMode::Off => 4,
            LocalMode::Auto => 5,
            LocalMode::Unknown(c) => c,
        }
    }

    /// `None` for off: the cloud expresses that through power alone.
    pub fn to_cloud(self) -> Option<CloudMode> {
        match self {
            LocalMode::Cool => Some(CloudMode::Cool),
            LocalMode::Heat => Some(CloudMode::Heat),
            LocalMode::Dry => Some(CloudMode::Dry),
            LocalMode::Fan => Some(CloudMode::Fan),
            LocalMode::Off => None,
            LocalMode::Auto | LocalMode::Unknown(_) => Some(CloudMode::Auto),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LocalFan {
    Auto,
    Low,
    Medium,
    High,
    Off,
    Unknown(u8),
}

impl LocalFan {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => LocalFan::Auto,
            2 => LocalFan::Low,
            3 => LocalFan::Medium,
            4 => LocalFan::High,
            5 => LocalFan::Off,
            other => LocalFan::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            LocalFan::Auto => 0,
            LocalFan::Low => 2,
            LocalFan::Medium => 3,
            LocalFan::High => 4,
            LocalFan::Off => 5,
            LocalFan::Unknown(c) => c,
        }
    }

    pub fn to_cloud(self) -> Wind {
        match self {
            LocalFan::Low => Wind::Low,
            LocalFan::Medium => Wind::Mid,
            LocalFan::High => Wind::High,
            // no cloud "fan off"
            LocalFan::Auto | LocalFan::Off | LocalFan::Unknown(_) => Wind::Auto,
        }
    }
}

/// A decoded gateway reading for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDeviceState {
    pub address: LocalAddress,
    pub mode: LocalMode,
    pub fan_speed: LocalFan,
    pub measured_temperature: i8,
    pub setpoint_temperature: u8,
    pub swing_on: bool,
    pub error_code: u8,
    pub is_on: bool,
}
