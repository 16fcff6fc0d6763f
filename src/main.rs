pub mod models {
    pub mod mcontrol;
}

pub mod client;
pub mod config;
pub mod coordinator;
pub mod decode;
pub mod directory;
pub mod entity;
pub mod local;
pub mod reconcile;
pub mod services {
    pub mod commands;
    pub mod control;
    pub mod fake_data;
    pub mod realtime;
}
#[cfg(test)]
mod testing;

use crate::client::McontrolClient;
use crate::config::Config;
use crate::coordinator::{CoordinatorSettings, PollCoordinator};
use crate::directory::{CloudTransport, LocalTransport};
use crate::local::LocalClient;
use crate::services::fake_data::{FakeCloud, FakeLocal, FakePlant};
use crate::services::{commands, realtime};
use chrono::TimeDelta;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (base_url={}, local_host={}, poll={}s, local_poll={}s, cooldown={}s, timeout={}s, fake_devices={}, commands_enabled={})",
        cfg.base_url,
        cfg.local_host.as_deref().unwrap_or("-"),
        cfg.poll_interval.as_secs(),
        cfg.local_poll_interval.as_secs(),
        cfg.command_cooldown.as_secs(),
        cfg.request_timeout.as_secs(),
        cfg.fake_devices,
        cfg.commands_enabled
    );

    // 2) Build transports
    if cfg.fake_devices > 0 {
        info!("Running against {} fake device(s)", cfg.fake_devices);
        let plant = FakePlant::new(cfg.fake_devices);
        return run_with(&cfg, FakeCloud::new(Rc::clone(&plant)), Some(FakeLocal::new(plant)));
    }

    let cloud = McontrolClient::new(&cfg.base_url, &cfg.email, &cfg.password, cfg.request_timeout)
        .map_err(|e| format!("Cloud login failed (credentials wrong?): {}", e))?;
    info!("Logged in to {}", cfg.base_url);
    let local = cfg.local_host.as_deref().map(|host| {
        info!("Local polling enabled via gateway {}", host);
        LocalClient::new(host, cfg.request_timeout)
    });
    run_with(&cfg, cloud, local)
}

fn run_with<C: CloudTransport, L: LocalTransport>(cfg: &Config, cloud: C, local: Option<L>) -> Result<(), String> {
    // 3) Discover devices and map them to gateway addresses
    let settings = CoordinatorSettings {
        command_cooldown: TimeDelta::from_std(cfg.command_cooldown)
            .map_err(|e| format!("COMMAND_COOLDOWN_SECS out of range: {}", e))?,
    };
    let mut coordinator = PollCoordinator::setup(cloud, local, settings).map_err(|e| e.to_string())?;
    realtime::log_snapshot(coordinator.current_snapshot(), coordinator.is_available());
    coordinator.subscribe(realtime::change_logger());

    // 4) Command console on stdin
    let (tx, rx) = mpsc::channel();
    if cfg.commands_enabled {
        thread::Builder::new()
            .name("commands".to_string())
            .spawn(move || commands::read_commands(std::io::stdin().lock(), tx))
            .map_err(|e| format!("failed to start command reader: {}", e))?;
        info!("Reading control commands from stdin");
    } else {
        drop(tx);
        info!("Command console disabled via COMMANDS_ENABLED={}", cfg.commands_enabled);
    }

    // 5) Polling loop (steady cadence)
    let interval = cfg.tick_interval();
    info!(
        "Starting poll loop: devices={}, interval={}s",
        coordinator.current_snapshot().len(),
        interval.as_secs()
    );
    realtime::run_loop(&mut coordinator, &rx, interval)
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        let value = match arg.as_str() {
            "--env-file" => args.next(),
            s if s.starts_with("--env-file=") => Some(s["--env-file=".len()..].to_string()),
            "--" => break,
            other => return Err(format!("unrecognised argument: {}", other)),
        };
        let path = value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
        if env_file.replace(PathBuf::from(path)).is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
    }

    let (path, explicit) = match env_file {
        Some(path) if !path.is_file() => return Err(format!("env file not found: {}", path.display())),
        Some(path) => (path, true),
        None => {
            let path = Path::new(".env").to_path_buf();
            if !path.is_file() {
                return Ok(None);
            }
            (path, false)
        }
    };
    load_env_file(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit }))
}

fn load_env_file(path: &Path) -> Result<(), String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    for (index, line) in text.lines().enumerate() {
        let Some((key, value)) = parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        // Values already in the process environment win.
        if std::env::var_os(&key).is_none() {
            // Only called before any other thread exists.
            unsafe {
                std::env::set_var(key, value);
            }
        }
    }
    Ok(())
}

/// One `KEY=value` line. Supports `export`, quotes and trailing `#` comments.
fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name: {:?}", key));
    }

    let raw = raw.trim();
    let value = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => {
            let body = &raw[1..];
            let end = body.find(q).ok_or_else(|| format!("unterminated {} quote", q))?;
            let rest = body[end + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            body[..end].to_string()
        }
        _ => raw.split(" #").next().unwrap_or_default().trim_end().to_string(),
    };
    Ok(Some((key.to_string(), value)))
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "mcontrol-poller {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
