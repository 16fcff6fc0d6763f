//! Poll coordinator: picks a data source per tick, merges readings into the
//! published snapshot and protects fresh commands from stale polls.
//!
//! Tick policy
//! - Inside the command cooldown: re-publish the previous snapshot untouched.
//! - Local gateway configured and at least one unit mapped: overlay gateway
//!   readings on the cached cloud records. No gateway data falls back to cloud.
//!   Devices without a gateway address are still refreshed from the cloud.
//! - Otherwise: full cloud re-fetch.
//! - Finally force remembered mode/wind selections over whatever was polled,
//!   because both sources report the running values, never the configured ones.

use crate::client::McontrolClientError;
use crate::directory::{CloudDeviceDirectory, CloudTransport, LocalDeviceDirectory, LocalTransport};
use crate::models::mcontrol::{CloudDeviceRecord, CloudMode, DeviceId, DeviceSnapshot, Wind};
use crate::reconcile::{AddressMap, reconcile};
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_COMMAND_COOLDOWN_SECS: u64 = 15;

#[derive(Debug)]
pub enum CoordinatorError {
    /// Initial cloud fetch failed; nothing can be set up.
    Setup(McontrolClientError),
    /// A steady-state cloud poll failed. The next tick may succeed.
    Update(McontrolClientError),
}

impl CoordinatorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::Update(e) if !matches!(e, McontrolClientError::Auth(_)))
    }
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinatorError::Setup(e) => write!(f, "initial device fetch failed: {}", e),
            CoordinatorError::Update(e) => write!(f, "error fetching data: {}", e),
        }
    }
}

impl Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CoordinatorError::Setup(e) | CoordinatorError::Update(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    /// Polls are suppressed for this long after any command.
    pub command_cooldown: TimeDelta,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            command_cooldown: TimeDelta::seconds(DEFAULT_COMMAND_COOLDOWN_SECS as i64),
        }
    }
}

/// Which path a tick took.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Cooldown,
    Local,
    /// Gateway gave nothing this tick; cloud answered instead.
    CloudFallback,
    Cloud,
}

/// Last commanded selection for one device.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ModeOverride {
    pub mode: Option<CloudMode>,
    pub wind: Option<Wind>,
}

type SnapshotCallback = Box<dyn Fn(&DeviceSnapshot)>;

pub struct PollCoordinator<C, L> {
    pub(crate) cloud: CloudDeviceDirectory<C>,
    local: Option<LocalDeviceDirectory<L>>,
    settings: CoordinatorSettings,
    pub(crate) cloud_records: BTreeMap<DeviceId, CloudDeviceRecord>,
    address_map: AddressMap,
    pub(crate) overrides: BTreeMap<DeviceId, ModeOverride>,
    pub(crate) last_command: Option<DateTime<Utc>>,
    pub(crate) snapshot: DeviceSnapshot,
    available: bool,
    subscribers: Vec<SnapshotCallback>,
}

impl<C: CloudTransport, L: LocalTransport> PollCoordinator<C, L> {
    /// Fetch the device list once and, with a gateway, build the address map.
    pub fn setup(cloud: C, local: Option<L>, settings: CoordinatorSettings) -> Result<Self, CoordinatorError> {
        let cloud = CloudDeviceDirectory::new(cloud);
        let devices = cloud.fetch_all().map_err(CoordinatorError::Setup)?;

        let local = local.map(LocalDeviceDirectory::new);
        let address_map = match &local {
            Some(dir) => {
                let states = dir.fetch_all();
                if states.is_empty() {
                    warn!("Local gateway reported no units at setup; polling cloud only");
                }
                reconcile(&devices, &states)
            }
            None => AddressMap::default(),
        };

        let mut cloud_records = BTreeMap::new();
        for device in devices {
            if local.is_some() && address_map.address_of(&device.id).is_none() {
                warn!("Device {} has no local address; it will only update from the cloud", device.id);
            }
            cloud_records.insert(device.id.clone(), device);
        }
        info!(
            "Coordinator ready: {} device(s), {} mapped to the local gateway",
            cloud_records.len(),
            address_map.len()
        );

        Ok(PollCoordinator {
            cloud,
            local,
            settings,
            snapshot: cloud_records.clone(),
            cloud_records,
            address_map,
            overrides: BTreeMap::new(),
            last_command: None,
            available: true,
            subscribers: Vec::new(),
        })
    }

    pub fn tick(&mut self) -> Result<TickOutcome, CoordinatorError> {
        self.tick_at(Utc::now())
    }

    pub fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, CoordinatorError> {
        if self.in_cooldown(now) {
            debug!("Command cooldown active; keeping current snapshot");
            self.notify();
            return Ok(TickOutcome::Cooldown);
        }

        let (mut next, outcome) = match self.poll_local() {
            Some(mut next) => {
                self.refresh_unmapped(&mut next);
                (next, TickOutcome::Local)
            }
            None => {
                let outcome = if self.local_active() {
                    TickOutcome::CloudFallback
                } else {
                    TickOutcome::Cloud
                };
                match self.poll_cloud() {
                    Ok(next) => (next, outcome),
                    Err(e) => {
                        self.available = false;
                        return Err(CoordinatorError::Update(e));
                    }
                }
            }
        };

        apply_overrides(&self.overrides, &mut next);
        self.snapshot = next;
        self.available = true;
        self.notify();
        Ok(outcome)
    }

    fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.last_command
            .is_some_and(|sent| now - sent < self.settings.command_cooldown)
    }

    fn local_active(&self) -> bool {
        self.local.is_some() && !self.address_map.is_empty()
    }

    fn poll_local(&self) -> Option<DeviceSnapshot> {
        let local = self.local.as_ref()?;
        if self.address_map.is_empty() {
            return None;
        }

        let states = local.fetch_all();
        if states.is_empty() {
            warn!("Local poll returned no units; falling back to cloud for this tick");
            return None;
        }
        // Unmapped or silent units keep their last published entry.
        let mut next = self.snapshot.clone();
        for state in &states {
            let Some(id) = self.address_map.id_at(state.address) else {
                debug!("Local unit at address {} is not mapped to a cloud device", state.address.0);
                continue;
            };
            let Some(mut record) = self.cloud_records.get(id).or_else(|| self.snapshot.get(id)).cloned() else {
                continue;
            };
            record.apply_local(state);
            next.insert(id.clone(), record);
        }
        Some(next)
    }

    fn has_unmapped(&self) -> bool {
        self.snapshot.keys().any(|id| self.address_map.address_of(id).is_none())
    }

    /// Cloud pass for the devices the gateway cannot see. A failure here only
    /// leaves those devices at their previous entry.
    fn refresh_unmapped(&mut self, next: &mut DeviceSnapshot) {
        if !self.has_unmapped() {
            return;
        }
        let devices = match self.cloud.fetch_all() {
            Ok(devices) => devices,
            Err(e) => {
                warn!("Cloud refresh of unmapped devices failed: {}", e);
                return;
            }
        };
        for device in devices {
            if self.address_map.address_of(&device.id).is_none() && next.contains_key(&device.id) {
                next.insert(device.id.clone(), device.clone());
            }
            self.cloud_records.insert(device.id.clone(), device);
        }
    }

    fn poll_cloud(&mut self) -> Result<DeviceSnapshot, McontrolClientError> {
        let devices = self.cloud.fetch_all()?;

        let mut next = DeviceSnapshot::new();
        for device in devices {
            self.cloud_records.insert(device.id.clone(), device.clone());
            next.insert(device.id.clone(), device);
        }
        for (id, previous) in &self.snapshot {
            if !next.contains_key(id) {
                warn!("Device {} missing from cloud response; keeping last known state", id);
                next.insert(id.clone(), previous.clone());
            }
        }
        Ok(next)
    }

    pub(crate) fn notify(&self) {
        for subscriber in &self.subscribers {
            subscriber(&self.snapshot);
        }
    }

    pub fn current_snapshot(&self) -> &DeviceSnapshot {
        &self.snapshot
    }

    /// Called after every successful tick, cooldown ticks included, and after commands.
    pub fn subscribe(&mut self, callback: impl Fn(&DeviceSnapshot) + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    /// False after a failed cloud poll until the next successful one.
    pub fn is_available(&self) -> bool {
        self.available
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.address_map
    }

    /// Last full record the cloud returned for this device.
    pub fn cached_record(&self, id: &DeviceId) -> Option<&CloudDeviceRecord> {
        self.cloud_records.get(id)
    }

    pub fn override_for(&self, id: &DeviceId) -> Option<&ModeOverride> {
        self.overrides.get(id)
    }

    pub fn last_command_at(&self) -> Option<DateTime<Utc>> {
        self.last_command
    }
}

fn apply_overrides(overrides: &BTreeMap<DeviceId, ModeOverride>, snapshot: &mut DeviceSnapshot) {
    for (id, selection) in overrides {
        let Some(record) = snapshot.get_mut(id) else { continue };
        if let Some(mode) = selection.mode {
            record.mode = Some(mode);
        }
        if let Some(wind) = selection.wind {
            record.wind = Some(wind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mcontrol::{LocalAddress, LocalFan, LocalMode, Power};
    use crate::services::control::ControlOverrides;
    use crate::testing::{MockCloud, MockLocal, cloud_device, local_state};
    use chrono::TimeZone;
    use std::cell::Cell;
    use std::rc::Rc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
    }

    fn two_devices() -> MockCloud {
        MockCloud::new(vec![cloud_device("A", "24", "22"), cloud_device("B", "26", "25")])
    }

    fn two_units() -> MockLocal {
        MockLocal::new(vec![local_state(1, 24, 22), local_state(2, 26, 25)])
    }

    #[test]
    fn setup_maps_devices_by_temperature() {
        let cloud = two_devices();
        let local = two_units();
        let coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();
        let map = coord.address_map();
        assert_eq!(map.address_of(&"A".into()), Some(LocalAddress(1)));
        assert_eq!(map.address_of(&"B".into()), Some(LocalAddress(2)));
        assert_eq!(coord.current_snapshot().len(), 2);
    }

    #[test]
    fn setup_fails_when_cloud_fails() {
        let cloud = two_devices();
        cloud.fail_fetch.set(true);
        let result = PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default());
        assert!(matches!(result, Err(CoordinatorError::Setup(_))));
    }

    #[test]
    fn setup_without_local_units_has_empty_map() {
        let cloud = two_devices();
        let local = MockLocal::new(vec![]);
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();
        assert!(coord.address_map().is_empty());
        assert_eq!(coord.tick_at(t0()).unwrap(), TickOutcome::Cloud);
    }

    #[test]
    fn local_tick_overlays_cached_record() {
        let cloud = two_devices();
        let local = two_units();
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();

        let mut heating = local_state(1, 19, 23);
        heating.mode = LocalMode::Heat;
        heating.fan_speed = LocalFan::Medium;
        local.set_states(vec![heating, local_state(2, 26, 25)]);

        let fetches_before = cloud.fetches.get();
        assert_eq!(coord.tick_at(t0()).unwrap(), TickOutcome::Local);
        assert_eq!(cloud.fetches.get(), fetches_before);

        let a = &coord.current_snapshot()[&DeviceId::from("A")];
        assert_eq!(a.mode, Some(CloudMode::Heat));
        assert_eq!(a.wind, Some(Wind::Mid));
        assert_eq!(a.fact_temp.as_deref(), Some("19"));
        assert_eq!(a.set_temp.as_deref(), Some("23"));
        assert_eq!(a.name.as_deref(), Some("Unit A"));
        assert_eq!(a.extra["lock"], "0");
    }

    #[test]
    fn local_off_unit_reports_power_off() {
        let cloud = two_devices();
        let local = two_units();
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();

        let mut off = local_state(2, 26, 25);
        off.mode = LocalMode::Off;
        off.is_on = false;
        local.set_states(vec![local_state(1, 24, 22), off]);
        coord.tick_at(t0()).unwrap();

        let b = &coord.current_snapshot()[&DeviceId::from("B")];
        assert_eq!(b.power, Some(Power::Off));
    }

    #[test]
    fn local_failure_falls_back_to_cloud() {
        let cloud = two_devices();
        let local = two_units();
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();

        local.set_states(vec![]);
        let fetches_before = cloud.fetches.get();
        assert_eq!(coord.tick_at(t0()).unwrap(), TickOutcome::CloudFallback);
        assert_eq!(cloud.fetches.get(), fetches_before + 1);
        assert!(coord.is_available());

        // next tick tries the gateway again
        local.set_states(vec![local_state(1, 24, 22), local_state(2, 26, 25)]);
        assert_eq!(coord.tick_at(t0()).unwrap(), TickOutcome::Local);
    }

    #[test]
    fn unmapped_device_follows_the_cloud_on_local_ticks() {
        let cloud = two_devices();
        let local = MockLocal::new(vec![local_state(1, 24, 22)]);
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();
        assert_eq!(coord.address_map().address_of(&"B".into()), None);

        cloud.set_devices(vec![cloud_device("A", "24", "22"), cloud_device("B", "31", "25")]);
        for _ in 0..3 {
            assert_eq!(coord.tick_at(t0()).unwrap(), TickOutcome::Local);
        }
        let snap = coord.current_snapshot();
        assert_eq!(snap[&DeviceId::from("B")].fact_temp.as_deref(), Some("31"));
        assert_eq!(snap[&DeviceId::from("A")].fact_temp.as_deref(), Some("24"));
        assert_eq!(coord.cached_record(&"B".into()).and_then(|r| r.fact_temp.as_deref()), Some("31"));
    }

    #[test]
    fn unmapped_refresh_failure_keeps_local_tick() {
        let cloud = two_devices();
        let local = MockLocal::new(vec![local_state(1, 24, 22)]);
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();

        cloud.fail_fetch.set(true);
        local.set_states(vec![local_state(1, 20, 22)]);
        assert_eq!(coord.tick_at(t0()).unwrap(), TickOutcome::Local);
        let snap = coord.current_snapshot();
        assert_eq!(snap[&DeviceId::from("A")].fact_temp.as_deref(), Some("20"));
        assert_eq!(snap[&DeviceId::from("B")].fact_temp.as_deref(), Some("26"));
        assert!(coord.is_available());
    }

    #[test]
    fn fully_mapped_local_tick_skips_the_cloud() {
        let cloud = two_devices();
        let local = two_units();
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();
        let fetches = cloud.fetches.get();
        coord.tick_at(t0()).unwrap();
        assert_eq!(cloud.fetches.get(), fetches);
    }

    #[test]
    fn silent_unit_keeps_previous_entry() {
        let cloud = two_devices();
        let local = two_units();
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();

        local.set_states(vec![local_state(1, 24, 22), local_state(2, 30, 25)]);
        coord.tick_at(t0()).unwrap();
        local.set_states(vec![local_state(1, 24, 22)]);
        coord.tick_at(t0()).unwrap();

        let b = &coord.current_snapshot()[&DeviceId::from("B")];
        assert_eq!(b.fact_temp.as_deref(), Some("30"));
    }

    #[test]
    fn cloud_failure_is_retryable_and_marks_unavailable() {
        let cloud = two_devices();
        let mut coord = PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default()).unwrap();

        cloud.fail_fetch.set(true);
        let err = coord.tick_at(t0()).expect_err("cloud down");
        assert!(err.is_retryable());
        assert!(!coord.is_available());
        assert_eq!(coord.current_snapshot().len(), 2);

        cloud.fail_fetch.set(false);
        assert_eq!(coord.tick_at(t0()).unwrap(), TickOutcome::Cloud);
        assert!(coord.is_available());
    }

    #[test]
    fn setup_devices_survive_missing_cloud_entries() {
        let cloud = two_devices();
        let mut coord = PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default()).unwrap();

        cloud.set_devices(vec![cloud_device("A", "20", "20")]);
        coord.tick_at(t0()).unwrap();
        let snap = coord.current_snapshot();
        assert!(snap.contains_key(&DeviceId::from("B")));
        assert_eq!(snap[&DeviceId::from("A")].fact_temp.as_deref(), Some("20"));
    }

    #[test]
    fn cooldown_boundary() {
        let cloud = two_devices();
        let mut coord = PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default()).unwrap();

        let sent = t0();
        coord
            .send_at(&"A".into(), &ControlOverrides::default().with_set_temp(20), sent)
            .unwrap();

        assert_eq!(
            coord.tick_at(sent + TimeDelta::milliseconds(14_900)).unwrap(),
            TickOutcome::Cooldown
        );
        assert_eq!(
            coord.tick_at(sent + TimeDelta::milliseconds(15_100)).unwrap(),
            TickOutcome::Cloud
        );
    }

    #[test]
    fn cooldown_tick_republishes_unchanged() {
        let cloud = two_devices();
        let mut coord = PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default()).unwrap();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        coord.subscribe(move |_| seen.set(seen.get() + 1));

        coord
            .send_at(&"B".into(), &ControlOverrides::default().with_power(Power::Off), t0())
            .unwrap();
        let after_send = coord.current_snapshot().clone();
        let fetches = cloud.fetches.get();

        coord.tick_at(t0() + TimeDelta::seconds(5)).unwrap();
        assert_eq!(coord.current_snapshot(), &after_send);
        assert_eq!(cloud.fetches.get(), fetches);
        // one for the optimistic write, one for the cooldown tick
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn commanded_mode_survives_running_state() {
        let cloud = two_devices();
        let mut coord = PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default()).unwrap();

        let heat = ControlOverrides::default().with_power(Power::On).with_mode(CloudMode::Heat);
        coord.send_at(&"A".into(), &heat, t0()).unwrap();

        // the unit is running auto; the vendor reports that
        let mut running = cloud_device("A", "24", "22");
        running.mode = Some(CloudMode::Auto);
        cloud.set_devices(vec![running, cloud_device("B", "26", "25")]);

        coord.tick_at(t0() + TimeDelta::seconds(1)).unwrap();
        assert_eq!(coord.current_snapshot()[&DeviceId::from("A")].mode, Some(CloudMode::Heat));
        coord.tick_at(t0() + TimeDelta::seconds(60)).unwrap();
        assert_eq!(coord.current_snapshot()[&DeviceId::from("A")].mode, Some(CloudMode::Heat));
    }

    #[test]
    fn override_beats_local_running_mode() {
        let cloud = two_devices();
        let local = two_units();
        let mut coord = PollCoordinator::setup(&cloud, Some(&local), CoordinatorSettings::default()).unwrap();

        coord
            .send_at(&"A".into(), &ControlOverrides::default().with_mode(CloudMode::Dry), t0())
            .unwrap();

        let mut running = local_state(1, 24, 22);
        running.mode = LocalMode::Auto;
        local.set_states(vec![running, local_state(2, 26, 25)]);

        assert_eq!(
            coord.tick_at(t0() + TimeDelta::seconds(30)).unwrap(),
            TickOutcome::Local
        );
        assert_eq!(coord.current_snapshot()[&DeviceId::from("A")].mode, Some(CloudMode::Dry));
    }
}
