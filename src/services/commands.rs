//! Line-oriented command console.
//!
//! ```text
//! status
//! <device-id> on|off
//! <device-id> [hvac=<off|cool|heat|auto|dry|fan>] [temp=<16-30>] [fan=<auto|low|medium|high>] [swing=<on|off>]
//! ```

use crate::entity::{self, FanMode, HvacMode, MAX_TEMP_C, MIN_TEMP_C};
use crate::models::mcontrol::DeviceId;
use crate::services::control::ControlOverrides;
use log::{debug, warn};
use std::io::BufRead;
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Control { device_id: DeviceId, overrides: ControlOverrides },
    Status,
}

pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Ok(None);
    };
    if first.starts_with('#') {
        return Ok(None);
    }
    if first.eq_ignore_ascii_case("status") {
        return match words.next() {
            None => Ok(Some(Command::Status)),
            Some(extra) => Err(format!("unexpected argument to status: {}", extra)),
        };
    }

    let device_id = DeviceId(first.to_string());
    let mut power: Option<bool> = None;
    let mut hvac: Option<HvacMode> = None;
    let mut temp: Option<f64> = None;
    let mut fan: Option<FanMode> = None;
    let mut swing: Option<bool> = None;

    for word in words {
        match word.split_once('=') {
            None if word.eq_ignore_ascii_case("on") => power = Some(true),
            None if word.eq_ignore_ascii_case("off") => power = Some(false),
            None => return Err(format!("unrecognised action: {}", word)),
            Some((key, value)) => match key.to_ascii_lowercase().as_str() {
                "hvac" | "mode" => {
                    hvac = Some(HvacMode::parse(value).ok_or_else(|| format!("unknown hvac mode: {}", value))?);
                }
                "temp" | "temperature" => {
                    let t = value
                        .parse::<f64>()
                        .map_err(|_| format!("temperature must be a number: {}", value))?;
                    if !(MIN_TEMP_C..=MAX_TEMP_C).contains(&t) {
                        return Err(format!("temperature {} outside {}..={}", t, MIN_TEMP_C, MAX_TEMP_C));
                    }
                    temp = Some(t);
                }
                "fan" | "wind" => {
                    fan = Some(FanMode::parse(value).ok_or_else(|| format!("unknown fan mode: {}", value))?);
                }
                "swing" => {
                    swing = Some(parse_switch(value).ok_or_else(|| format!("swing must be on or off: {}", value))?);
                }
                other => return Err(format!("unrecognised setting: {}", other)),
            },
        }
    }

    let mut overrides = match (temp, hvac) {
        (Some(t), mode) => entity::set_temperature(t, mode),
        (None, Some(mode)) => entity::set_hvac_mode(mode),
        (None, None) => ControlOverrides::default(),
    };
    if let Some(fan) = fan {
        overrides.wind = entity::set_fan_mode(fan).wind;
    }
    if let Some(on) = swing {
        overrides.swing = entity::set_swing(on).swing;
    }
    match power {
        Some(true) if overrides.power.is_none() => overrides.power = entity::turn_on().power,
        Some(false) => overrides.power = entity::turn_off().power,
        _ => {}
    }

    if overrides.is_empty() {
        return Err(format!("nothing to change for {}", device_id));
    }
    Ok(Some(Command::Control { device_id, overrides }))
}

fn parse_switch(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" | "y" => Some(true),
        "off" | "0" | "false" | "n" => Some(false),
        _ => None,
    }
}

/// Read commands until EOF or until the receiving loop is gone.
pub fn read_commands(input: impl BufRead, tx: Sender<Command>) {
    for line in input.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Command input closed: {}", e);
                return;
            }
        };
        match parse_command(&line) {
            Ok(Some(cmd)) => {
                debug!("Queued command: {:?}", cmd);
                if tx.send(cmd).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring command {:?}: {}", line.trim(), e),
        }
    }
    debug!("Command input reached EOF");
}
