//! One-shot pairing of cloud identifiers with gateway addresses.
//!
//! The two sources share no key. Matching runs in two passes:
//! 1. attribute match: room temperature and setpoint rendered as decimal strings
//!    must be equal on both sides; the first unconsumed address wins;
//! 2. positional match: leftovers are zipped in cloud order × ascending address.
//!
//! Devices added to the account later are never mapped.

use crate::models::mcontrol::{CloudDeviceRecord, DeviceId, LocalAddress, LocalDeviceState};
use log::{debug, info};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressMap {
    by_id: BTreeMap<DeviceId, LocalAddress>,
    by_address: BTreeMap<LocalAddress, DeviceId>,
}

impl AddressMap {
    fn insert(&mut self, id: DeviceId, address: LocalAddress) {
        self.by_address.insert(address, id.clone());
        self.by_id.insert(id, address);
    }

    pub fn address_of(&self, id: &DeviceId) -> Option<LocalAddress> {
        self.by_id.get(id).copied()
    }

    pub fn id_at(&self, address: LocalAddress) -> Option<&DeviceId> {
        self.by_address.get(&address)
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}

pub fn reconcile(cloud: &[CloudDeviceRecord], local: &[LocalDeviceState]) -> AddressMap {
    let mut local_sorted: Vec<&LocalDeviceState> = local.iter().collect();
    local_sorted.sort_by_key(|s| s.address);

    let mut map = AddressMap::default();
    let mut unmatched_cloud: Vec<&CloudDeviceRecord> = Vec::new();
    let mut consumed = vec![false; local_sorted.len()];

    for record in cloud {
        let candidate = local_sorted
            .iter()
            .enumerate()
            .find(|(i, state)| !consumed[*i] && attributes_match(record, state));
        match candidate {
            Some((i, state)) => {
                consumed[i] = true;
                debug!("Matched {} to address {} by temperature", record.id, state.address.0);
                map.insert(record.id.clone(), state.address);
            }
            None => unmatched_cloud.push(record),
        }
    }

    let leftover_addresses = local_sorted
        .iter()
        .enumerate()
        .filter(|(i, _)| !consumed[*i])
        .map(|(_, s)| s.address);
    for (record, address) in unmatched_cloud.iter().zip(leftover_addresses) {
        debug!("Matched {} to address {} by position", record.id, address.0);
        map.insert(record.id.clone(), address);
    }

    info!(
        "Address map built: {} of {} cloud device(s) mapped to {} local unit(s)",
        map.len(),
        cloud.len(),
        local.len()
    );
    map
}

fn attributes_match(record: &CloudDeviceRecord, state: &LocalDeviceState) -> bool {
    let (Some(fact), Some(set)) = (record.fact_temp.as_deref(), record.set_temp.as_deref()) else {
        return false;
    };
    fact == state.measured_temperature.to_string() && set == state.setpoint_temperature.to_string()
}
