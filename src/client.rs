//! Blocking HTTP client for the aircontrolbase.com cloud.
//!
//! - Uses `ureq` (no async); every request carries the configured global timeout.
//! - Form-encoded POSTs, JSON answers.
//!
//! Authentication
//! - Logs in with account/password, keeps the session cookie and user id.
//! - When a call answers with the session-expired code, logs in again and retries
//!   that call once. A second expiry is an authentication failure.

use crate::directory::CloudTransport;
use crate::models::mcontrol::{ApiStatus, CloudDeviceRecord, DetailsResponse, LoginResponse};
use http::header::SET_COOKIE;
use http::{HeaderMap, StatusCode};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://www.aircontrolbase.com";
const LOGIN_PATH: &str = "/web/user/login";
const DETAILS_PATH: &str = "/web/userGroup/getDetails";
const CONTROL_PATH: &str = "/web/device/control";
const ACCEPT: &str = "application/json, text/plain, */*";

/// Vendor status code for an expired session cookie.
pub const SESSION_EXPIRED_CODE: i64 = 40018;

#[derive(Debug)]
pub enum McontrolClientError {
    /// Login rejected, or the session expired twice within one call.
    Auth(String),
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
}

impl core::fmt::Display for McontrolClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            McontrolClientError::Auth(e) => write!(f, "auth error: {}", e),
            McontrolClientError::Transport(s) => write!(f, "transport error: {}", s),
            McontrolClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            McontrolClientError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for McontrolClientError {}

impl From<ureq::Error> for McontrolClientError {
    fn from(value: ureq::Error) -> Self {
        McontrolClientError::Transport(value.to_string())
    }
}

#[derive(Debug, Default)]
struct Session {
    user_id: Option<String>,
    cookie: Option<String>,
}

pub struct McontrolClient {
    agent: ureq::Agent,
    base_url: String,
    account: String,
    password: String,
    session: RefCell<Session>,
}

impl McontrolClient {
    /// Build the client and log in once, so bad credentials fail here.
    pub fn new(
        base_url: impl Into<String>,
        account: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, McontrolClientError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        let client = McontrolClient {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account: account.into(),
            password: password.into(),
            session: RefCell::new(Session::default()),
        };
        client.login()?;
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn login(&self) -> Result<(), McontrolClientError> {
        let mut resp = self
            .agent
            .post(&self.url(LOGIN_PATH))
            .header("Accept", ACCEPT)
            .send_form([("account", self.account.as_str()), ("password", self.password.as_str())])?;

        if resp.status() != StatusCode::OK {
            return Err(McontrolClientError::Auth(format!(
                "login failed with http {}",
                resp.status().as_u16()
            )));
        }

        let cookie = session_cookie(resp.headers());
        let body = resp.body_mut().read_to_string()?;
        let login: LoginResponse = parse_json(&body)?;

        let user_id = login
            .result
            .and_then(|r| r.id)
            .ok_or_else(|| McontrolClientError::Auth("login response missing user id".to_string()))?;
        if cookie.is_none() {
            warn!("Login succeeded without a session cookie; subsequent calls may be rejected");
        }
        debug!("Login successful, user_id: {}", user_id);

        let mut s = self.session.borrow_mut();
        s.user_id = Some(user_id);
        s.cookie = cookie;
        Ok(())
    }

    fn post_authenticated(&self, path: &str, data: &[(&str, String)]) -> Result<String, McontrolClientError> {
        let (user_id, cookie) = {
            let s = self.session.borrow();
            (s.user_id.clone().unwrap_or_default(), s.cookie.clone().unwrap_or_default())
        };

        let mut form: Vec<(&str, &str)> = Vec::with_capacity(data.len() + 1);
        form.push(("userId", user_id.as_str()));
        form.extend(data.iter().map(|(k, v)| (*k, v.as_str())));

        let mut resp = self
            .agent
            .post(&self.url(path))
            .header("Accept", ACCEPT)
            .header("Cookie", cookie.as_str())
            .send_form(form)?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp
                .body_mut()
                .read_to_string()
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(McontrolClientError::Http {
                status: status.as_u16(),
                message: format!("{} failed: {}", path, body),
            });
        }
        Ok(resp.body_mut().read_to_string()?)
    }

    /// Authenticated call returning the raw body. Re-logs in once on session expiry.
    fn api_call(&self, path: &str, data: &[(&str, String)]) -> Result<String, McontrolClientError> {
        let logged_in = {
            let s = self.session.borrow();
            s.user_id.is_some() && s.cookie.is_some()
        };
        if !logged_in {
            self.login()?;
        }

        retry_on_expiry(path, || self.login(), || self.post_authenticated(path, data))
    }
}

/// Run `post`; on a session-expired answer, `login` and run it once more.
fn retry_on_expiry(
    path: &str,
    mut login: impl FnMut() -> Result<(), McontrolClientError>,
    mut post: impl FnMut() -> Result<String, McontrolClientError>,
) -> Result<String, McontrolClientError> {
    let body = post()?;
    if !is_session_expired(&body) {
        return Ok(body);
    }

    debug!("Session expired calling {}, re-authenticating", path);
    login()?;
    let body = post()?;
    if is_session_expired(&body) {
        return Err(McontrolClientError::Auth(format!(
            "session expired again after re-login calling {}",
            path
        )));
    }
    Ok(body)
}

impl CloudTransport for McontrolClient {
    fn fetch_devices(&self) -> Result<Vec<CloudDeviceRecord>, McontrolClientError> {
        let body = self.api_call(DETAILS_PATH, &[])?;
        let details: DetailsResponse = parse_json(&body)?;
        match details.result {
            Some(result) => Ok(result.into_devices()),
            None => {
                warn!("No result in device response: {}", body);
                Ok(Vec::new())
            }
        }
    }

    fn control(&self, record: &CloudDeviceRecord) -> Result<(), McontrolClientError> {
        let payload = serde_json::to_string(record).map_err(|e| McontrolClientError::Json(e.to_string()))?;
        self.api_call(
            CONTROL_PATH,
            &[("control", payload.clone()), ("operation", payload)],
        )?;
        debug!(
            "Controlled device {}: mode={:?}, temp={:?}, wind={:?}, power={:?}",
            record.id, record.mode, record.set_temp, record.wind, record.power
        );
        Ok(())
    }
}

/// Decode a body, naming the failing field on error.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, McontrolClientError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| McontrolClientError::Json(e.to_string()))
}

fn is_session_expired(body: &str) -> bool {
    serde_json::from_str::<ApiStatus>(body)
        .map(|s| s.code_is(SESSION_EXPIRED_CODE))
        .unwrap_or(false)
}

/// First `Set-Cookie` reduced to its `name=value` pair.
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .find(|pair| !pair.is_empty())
        .map(str::to_string)
}
