//! Control dispatch: desired-state changes become full-record cloud control calls.
//!
//! Bookkeeping happens before the network call: cooldown start, remembered
//! mode/wind selection and the optimistic snapshot entry. A failed call leaves
//! all three in place.

use crate::client::McontrolClientError;
use crate::coordinator::PollCoordinator;
use crate::directory::{CloudTransport, LocalTransport};
use crate::models::mcontrol::{CloudDeviceRecord, CloudMode, DeviceId, Power, Wind};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Fields a command changes. Anything `None` keeps the base record's value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlOverrides {
    pub power: Option<Power>,
    pub mode: Option<CloudMode>,
    pub wind: Option<Wind>,
    pub set_temp: Option<i32>,
    pub swing: Option<bool>,
}

impl ControlOverrides {
    pub fn with_power(mut self, power: Power) -> Self {
        self.power = Some(power);
        self
    }

    pub fn with_mode(mut self, mode: CloudMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_wind(mut self, wind: Wind) -> Self {
        self.wind = Some(wind);
        self
    }

    pub fn with_set_temp(mut self, celsius: i32) -> Self {
        self.set_temp = Some(celsius);
        self
    }

    pub fn with_swing(mut self, on: bool) -> Self {
        self.swing = Some(on);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == ControlOverrides::default()
    }

    pub fn apply_to(&self, record: &mut CloudDeviceRecord) {
        if let Some(power) = self.power {
            record.power = Some(power);
        }
        if let Some(mode) = self.mode {
            record.mode = Some(mode);
        }
        if let Some(wind) = self.wind {
            record.wind = Some(wind);
        }
        if let Some(t) = self.set_temp {
            record.set_temp = Some(t.to_string());
        }
        if let Some(on) = self.swing {
            record.swing = Some(if on { "1" } else { "0" }.to_string());
        }
    }
}

#[derive(Debug)]
pub enum ControlError {
    UnknownDevice(DeviceId),
    Cloud(McontrolClientError),
}

impl Display for ControlError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::UnknownDevice(id) => write!(f, "unknown device {}", id),
            ControlError::Cloud(e) => write!(f, "control call failed: {}", e),
        }
    }
}

impl Error for ControlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ControlError::Cloud(e) => Some(e),
            ControlError::UnknownDevice(_) => None,
        }
    }
}

impl<C: CloudTransport, L: LocalTransport> PollCoordinator<C, L> {
    pub fn send(&mut self, id: &DeviceId, overrides: &ControlOverrides) -> Result<(), ControlError> {
        self.send_at(id, overrides, Utc::now())
    }

    pub fn send_at(
        &mut self,
        id: &DeviceId,
        overrides: &ControlOverrides,
        now: DateTime<Utc>,
    ) -> Result<(), ControlError> {
        // 1) Complete base record: cloud template first, then last published state
        let mut record = self
            .cached_record(id)
            .or_else(|| self.snapshot.get(id))
            .cloned()
            .ok_or_else(|| ControlError::UnknownDevice(id.clone()))?;

        // 2) Apply the requested changes
        overrides.apply_to(&mut record);

        // 3) Cooldown, remembered selection and optimistic state, before any I/O
        self.last_command = Some(now);
        self.remember_selection(id, overrides);
        self.snapshot.insert(id.clone(), record.clone());
        self.notify();

        // 4) Full-record control call; nothing above is rolled back on failure
        match self.cloud.control(&record) {
            Ok(()) => {
                info!("Sent command to {}: {:?}", id, overrides);
                Ok(())
            }
            Err(e) => {
                warn!("Command to {} failed: {}", id, e);
                Err(ControlError::Cloud(e))
            }
        }
    }

    fn remember_selection(&mut self, id: &DeviceId, overrides: &ControlOverrides) {
        if overrides.power == Some(Power::Off) {
            self.overrides.remove(id);
            return;
        }
        if overrides.mode.is_none() && overrides.wind.is_none() {
            return;
        }
        let entry = self.overrides.entry(id.clone()).or_default();
        if let Some(mode) = overrides.mode {
            entry.mode = Some(mode);
        }
        if let Some(wind) = overrides.wind {
            entry.wind = Some(wind);
        }
    }
}
