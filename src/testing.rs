//! In-memory transports for unit tests.

use crate::client::McontrolClientError;
use crate::decode::encode_status;
use crate::directory::{CloudTransport, LocalTransport};
use crate::models::mcontrol::{
    CloudDeviceRecord, CloudMode, LocalAddress, LocalDeviceState, LocalFan, LocalMode, LocalStatusEntry, Power, Wind,
};
use serde_json::Value;
use std::cell::{Cell, RefCell};

pub fn cloud_device(id: &str, fact_temp: &str, set_temp: &str) -> CloudDeviceRecord {
    let mut r = CloudDeviceRecord::new(id);
    r.name = Some(format!("Unit {}", id));
    r.power = Some(Power::On);
    r.mode = Some(CloudMode::Cool);
    r.wind = Some(Wind::Auto);
    r.fact_temp = Some(fact_temp.to_string());
    r.set_temp = Some(set_temp.to_string());
    r.swing = Some("0".to_string());
    r.extra.insert("lock".to_string(), Value::from("0"));
    r.extra.insert("coolLockValue".to_string(), Value::from(""));
    r
}

pub fn local_state(addr: u16, temp: i8, setpoint: u8) -> LocalDeviceState {
    LocalDeviceState {
        address: LocalAddress(addr),
        mode: LocalMode::Cool,
        fan_speed: LocalFan::Auto,
        measured_temperature: temp,
        setpoint_temperature: setpoint,
        swing_on: false,
        error_code: 0,
        is_on: true,
    }
}

pub struct MockCloud {
    devices: RefCell<Vec<CloudDeviceRecord>>,
    pub fail_fetch: Cell<bool>,
    pub fail_auth: Cell<bool>,
    pub fail_control: Cell<bool>,
    pub fetches: Cell<usize>,
    pub controls: RefCell<Vec<CloudDeviceRecord>>,
}

impl MockCloud {
    pub fn new(devices: Vec<CloudDeviceRecord>) -> Self {
        MockCloud {
            devices: RefCell::new(devices),
            fail_fetch: Cell::new(false),
            fail_auth: Cell::new(false),
            fail_control: Cell::new(false),
            fetches: Cell::new(0),
            controls: RefCell::new(Vec::new()),
        }
    }

    pub fn set_devices(&self, devices: Vec<CloudDeviceRecord>) {
        *self.devices.borrow_mut() = devices;
    }
}

impl CloudTransport for MockCloud {
    fn fetch_devices(&self) -> Result<Vec<CloudDeviceRecord>, McontrolClientError> {
        self.fetches.set(self.fetches.get() + 1);
        if self.fail_auth.get() {
            return Err(McontrolClientError::Auth("session expired again after re-login".to_string()));
        }
        if self.fail_fetch.get() {
            return Err(McontrolClientError::Transport("connection refused".to_string()));
        }
        Ok(self.devices.borrow().clone())
    }

    fn control(&self, record: &CloudDeviceRecord) -> Result<(), McontrolClientError> {
        self.controls.borrow_mut().push(record.clone());
        if self.fail_control.get() {
            return Err(McontrolClientError::Http {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        Ok(())
    }
}

pub struct MockLocal {
    entries: RefCell<Vec<LocalStatusEntry>>,
}

impl MockLocal {
    pub fn new(states: Vec<LocalDeviceState>) -> Self {
        let mock = MockLocal {
            entries: RefCell::new(Vec::new()),
        };
        mock.set_states(states);
        mock
    }

    pub fn set_states(&self, states: Vec<LocalDeviceState>) {
        *self.entries.borrow_mut() = states
            .iter()
            .map(|s| LocalStatusEntry {
                addr: Some(s.address),
                data: Some(encode_status(s)),
            })
            .collect();
    }
}

impl LocalTransport for MockLocal {
    fn fetch_status(&self) -> Vec<LocalStatusEntry> {
        self.entries.borrow().clone()
    }
}
