//! Seeded stand-ins for the cloud and the gateway, sharing one simulated plant.
//!
//! Both sides report the *running* mode the way the real hardware does: a unit
//! configured for auto shows up as cool or heat depending on the room.

use crate::client::McontrolClientError;
use crate::decode::encode_status;
use crate::directory::{CloudTransport, LocalTransport};
use crate::models::mcontrol::{
    CloudDeviceRecord, CloudMode, DeviceId, LocalAddress, LocalDeviceState, LocalFan, LocalMode, LocalStatusEntry,
    Power, Wind,
};
use log::{debug, info};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

const SEED: u64 = 0x0A1C_0B45_EC0D_E21A;
const AMBIENT_C: f64 = 27.0;
const FIRST_ADDRESS: u16 = 1;
const STEP_EVERY: Duration = Duration::from_secs(5);
const UNIT_NAMES: [&str; 8] = [
    "Living Room",
    "Kitchen",
    "Bedroom 1",
    "Bedroom 2",
    "Home Office",
    "Guest Room",
    "Hallway",
    "Nursery",
];

#[derive(Debug, Clone)]
struct FakeUnit {
    id: DeviceId,
    name: String,
    address: LocalAddress,
    power: Power,
    mode: CloudMode,
    wind: Wind,
    setpoint: u8,
    room_c: f64,
    swing: bool,
}

impl FakeUnit {
    fn running_mode(&self) -> CloudMode {
        match self.mode {
            CloudMode::Auto if self.room_c > f64::from(self.setpoint) => CloudMode::Cool,
            CloudMode::Auto => CloudMode::Heat,
            other => other,
        }
    }

    fn room_reading(&self) -> i8 {
        self.room_c.round().clamp(-128.0, 127.0) as i8
    }

    fn to_cloud_record(&self) -> CloudDeviceRecord {
        let mut r = CloudDeviceRecord::new(self.id.0.clone());
        r.name = Some(self.name.clone());
        r.power = Some(self.power);
        r.mode = Some(self.running_mode());
        r.wind = Some(self.wind);
        r.set_temp = Some(self.setpoint.to_string());
        r.fact_temp = Some(self.room_reading().to_string());
        r.swing = Some(if self.swing { "1" } else { "0" }.to_string());
        for key in ["lock", "unlock"] {
            r.extra.insert(key.to_string(), Value::from("0"));
        }
        for key in ["modeLockValue", "coolLockValue", "heatLockValue", "windLockValue"] {
            r.extra.insert(key.to_string(), Value::from(""));
        }
        r
    }

    fn to_local_state(&self) -> LocalDeviceState {
        let mode = match (self.power, self.running_mode()) {
            (Power::Off, _) => LocalMode::Off,
            (Power::On, CloudMode::Cool) => LocalMode::Cool,
            (Power::On, CloudMode::Heat) => LocalMode::Heat,
            (Power::On, CloudMode::Dry) => LocalMode::Dry,
            (Power::On, CloudMode::Fan) => LocalMode::Fan,
            (Power::On, CloudMode::Auto) => LocalMode::Auto,
        };
        let fan_speed = match self.wind {
            Wind::Auto => LocalFan::Auto,
            Wind::Low => LocalFan::Low,
            Wind::Mid => LocalFan::Medium,
            Wind::High => LocalFan::High,
        };
        LocalDeviceState {
            address: self.address,
            mode,
            fan_speed,
            measured_temperature: self.room_reading(),
            setpoint_temperature: self.setpoint,
            swing_on: self.swing,
            error_code: 0,
            is_on: self.power == Power::On,
        }
    }
}

pub struct FakePlant {
    units: Vec<FakeUnit>,
    rng: SmallRng,
    last_step: Instant,
}

impl FakePlant {
    pub fn new(count: usize) -> Rc<RefCell<FakePlant>> {
        let mut rng = SmallRng::seed_from_u64(SEED);
        let count = count.max(1);
        let units = (0..count)
            .map(|i| {
                let on = rng.random_bool(0.6);
                FakeUnit {
                    id: DeviceId(format!("fake{:04x}", 0x8a10 + i)),
                    name: UNIT_NAMES
                        .get(i)
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| format!("Unit {}", i + 1)),
                    // gateway numbers the units in reverse, so only temperatures can line them up
                    address: LocalAddress(FIRST_ADDRESS + (count - 1 - i) as u16),
                    power: if on { Power::On } else { Power::Off },
                    mode: if rng.random_bool(0.5) { CloudMode::Auto } else { CloudMode::Cool },
                    wind: Wind::Auto,
                    setpoint: 18 + (i % 12) as u8,
                    room_c: AMBIENT_C + rng.random_range(-4.0..4.0),
                    swing: false,
                }
            })
            .collect();
        info!("Fake plant: simulating {} unit(s)", count);
        Rc::new(RefCell::new(FakePlant {
            units,
            rng,
            last_step: Instant::now(),
        }))
    }

    /// Move every room a little towards its target (or towards ambient when off).
    /// At most once per `STEP_EVERY`, so back-to-back reads agree.
    fn step(&mut self) {
        if self.last_step.elapsed() < STEP_EVERY {
            return;
        }
        self.last_step = Instant::now();
        for unit in &mut self.units {
            let target = match unit.power {
                Power::On => f64::from(unit.setpoint),
                Power::Off => AMBIENT_C,
            };
            let noise = self.rng.random_range(-0.2..0.2);
            unit.room_c += (target - unit.room_c) * 0.1 + noise;
        }
    }

    fn apply(&mut self, record: &CloudDeviceRecord) -> Result<(), McontrolClientError> {
        let unit = self
            .units
            .iter_mut()
            .find(|u| u.id == record.id)
            .ok_or_else(|| McontrolClientError::Http {
                status: 404,
                message: format!("unknown device {}", record.id),
            })?;
        if let Some(power) = record.power {
            unit.power = power;
        }
        if let Some(mode) = record.mode {
            unit.mode = mode;
        }
        if let Some(wind) = record.wind {
            unit.wind = wind;
        }
        if let Some(t) = record.set_temp.as_deref().and_then(|s| s.parse::<u8>().ok()) {
            unit.setpoint = t;
        }
        unit.swing = record.swing_on();
        debug!("Fake plant: {} now {:?}", unit.id, unit);
        Ok(())
    }
}

pub struct FakeCloud {
    plant: Rc<RefCell<FakePlant>>,
}

impl FakeCloud {
    pub fn new(plant: Rc<RefCell<FakePlant>>) -> Self {
        FakeCloud { plant }
    }
}

impl CloudTransport for FakeCloud {
    fn fetch_devices(&self) -> Result<Vec<CloudDeviceRecord>, McontrolClientError> {
        let mut plant = self.plant.borrow_mut();
        plant.step();
        Ok(plant.units.iter().map(FakeUnit::to_cloud_record).collect())
    }

    fn control(&self, record: &CloudDeviceRecord) -> Result<(), McontrolClientError> {
        self.plant.borrow_mut().apply(record)
    }
}

pub struct FakeLocal {
    plant: Rc<RefCell<FakePlant>>,
}

impl FakeLocal {
    pub fn new(plant: Rc<RefCell<FakePlant>>) -> Self {
        FakeLocal { plant }
    }
}

impl LocalTransport for FakeLocal {
    fn fetch_status(&self) -> Vec<LocalStatusEntry> {
        let mut plant = self.plant.borrow_mut();
        plant.step();
        plant
            .units
            .iter()
            .map(|u| LocalStatusEntry {
                addr: Some(u.address),
                data: Some(encode_status(&u.to_local_state())),
            })
            .collect()
    }
}
