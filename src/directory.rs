//! Transport seams and the directories the coordinator talks to.

use crate::client::McontrolClientError;
use crate::decode::{NO_DATA, decode_status};
use crate::models::mcontrol::{CloudDeviceRecord, LocalDeviceState, LocalStatusEntry};
use log::{debug, warn};

/// The vendor cloud: full device list and full-record control.
pub trait CloudTransport {
    fn fetch_devices(&self) -> Result<Vec<CloudDeviceRecord>, McontrolClientError>;
    fn control(&self, record: &CloudDeviceRecord) -> Result<(), McontrolClientError>;
}

/// The LAN gateway. Implementations swallow every failure into an empty list.
pub trait LocalTransport {
    fn fetch_status(&self) -> Vec<LocalStatusEntry>;
}

impl<T: CloudTransport + ?Sized> CloudTransport for &T {
    fn fetch_devices(&self) -> Result<Vec<CloudDeviceRecord>, McontrolClientError> {
        (**self).fetch_devices()
    }

    fn control(&self, record: &CloudDeviceRecord) -> Result<(), McontrolClientError> {
        (**self).control(record)
    }
}

impl<T: LocalTransport + ?Sized> LocalTransport for &T {
    fn fetch_status(&self) -> Vec<LocalStatusEntry> {
        (**self).fetch_status()
    }
}

pub struct CloudDeviceDirectory<C> {
    transport: C,
}

impl<C: CloudTransport> CloudDeviceDirectory<C> {
    pub fn new(transport: C) -> Self {
        CloudDeviceDirectory { transport }
    }

    /// Every device on the account, in vendor order. An empty list is a valid answer.
    pub fn fetch_all(&self) -> Result<Vec<CloudDeviceRecord>, McontrolClientError> {
        let devices = self.transport.fetch_devices()?;
        if devices.is_empty() {
            warn!("Cloud returned no devices");
        } else {
            debug!("Cloud returned {} device(s)", devices.len());
        }
        Ok(devices)
    }

    /// Send the complete record. The vendor resets any field left out.
    pub fn control(&self, record: &CloudDeviceRecord) -> Result<(), McontrolClientError> {
        self.transport.control(record)
    }
}

pub struct LocalDeviceDirectory<L> {
    transport: L,
}

impl<L: LocalTransport> LocalDeviceDirectory<L> {
    pub fn new(transport: L) -> Self {
        LocalDeviceDirectory { transport }
    }

    /// Decoded states of every reporting unit, ascending by address.
    pub fn fetch_all(&self) -> Vec<LocalDeviceState> {
        let mut states = decode_entries(self.transport.fetch_status());
        states.sort_by_key(|s| s.address);
        debug!("Local poll found {} active AC unit(s)", states.len());
        states
    }
}

fn decode_entries(entries: Vec<LocalStatusEntry>) -> Vec<LocalDeviceState> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let addr = entry.addr?;
            let data = entry.data.as_deref().unwrap_or(NO_DATA);
            if data == NO_DATA {
                return None;
            }
            decode_status(addr, data)
        })
        .collect()
}
