//! Blocking client for the CCM21-i LAN gateway status page.
//!
//! Local polling is best effort: every failure is logged and reported as "no units".

use crate::client::parse_json;
use crate::directory::LocalTransport;
use crate::models::mcontrol::LocalStatusEntry;
use http::StatusCode;
use log::warn;
use std::time::Duration;

const LOCAL_STATUS_PATH: &str = "/ajax";

pub struct LocalClient {
    agent: ureq::Agent,
    url: String,
}

impl LocalClient {
    pub fn new(host: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        LocalClient {
            agent: ureq::Agent::new_with_config(config),
            url: status_url(host),
        }
    }

    fn try_fetch(&self) -> Result<Vec<LocalStatusEntry>, String> {
        let mut resp = self
            .agent
            .post(&self.url)
            .send_form([("_web_cmd", "get_mbdata_all"), ("_ajax", "1")])
            .map_err(|e| e.to_string())?;
        if resp.status() != StatusCode::OK {
            return Err(format!("http {}", resp.status().as_u16()));
        }
        let body = resp.body_mut().read_to_string().map_err(|e| e.to_string())?;
        parse_json(&body).map_err(|e| e.to_string())
    }
}

impl LocalTransport for LocalClient {
    fn fetch_status(&self) -> Vec<LocalStatusEntry> {
        match self.try_fetch() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Local API error ({}): {}", self.url, e);
                Vec::new()
            }
        }
    }
}

fn status_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}{}", host, LOCAL_STATUS_PATH)
    } else {
        format!("http://{}{}", host, LOCAL_STATUS_PATH)
    }
}
