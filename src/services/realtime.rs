use crate::coordinator::PollCoordinator;
use crate::directory::{CloudTransport, LocalTransport};
use crate::entity::{ClimateView, TemperatureSensorView};
use crate::models::mcontrol::DeviceSnapshot;
use crate::services::commands::Command;
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

/// Tick at a steady cadence and run queued commands in between, all on this thread.
pub fn run_loop<C: CloudTransport, L: LocalTransport>(
    coordinator: &mut PollCoordinator<C, L>,
    commands: &Receiver<Command>,
    interval: Duration,
) -> Result<(), String> {
    let mut commands_open = true;
    let mut next_tick = Instant::now();

    loop {
        let now = Instant::now();
        if now >= next_tick {
            match coordinator.tick() {
                Ok(outcome) => debug!("Tick complete ({:?})", outcome),
                Err(e) if e.is_retryable() => warn!("Update failed, retrying next tick: {}", e),
                Err(e) => return Err(e.to_string()),
            }
            // Maintain steady cadence
            next_tick += interval;
            if next_tick <= Instant::now() {
                next_tick = Instant::now() + interval;
            }
            continue;
        }

        let wait = next_tick - now;
        if !commands_open {
            thread::sleep(wait);
            continue;
        }
        match commands.recv_timeout(wait) {
            Ok(cmd) => handle_command(coordinator, cmd),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Command channel closed; polling only");
                commands_open = false;
            }
        }
    }
}

fn handle_command<C: CloudTransport, L: LocalTransport>(coordinator: &mut PollCoordinator<C, L>, cmd: Command) {
    match cmd {
        Command::Status => {
            log_snapshot(coordinator.current_snapshot(), coordinator.is_available());
            for id in coordinator.current_snapshot().keys() {
                if let Some(selection) = coordinator.override_for(id) {
                    info!("{}: remembered selection mode={:?} wind={:?}", id, selection.mode, selection.wind);
                }
            }
            if let Some(at) = coordinator.last_command_at() {
                info!("Last command sent at {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        Command::Control { device_id, overrides } => {
            if let Err(e) = coordinator.send(&device_id, &overrides) {
                error!("Command for {} failed: {}", device_id, e);
            }
        }
    }
}

pub fn log_snapshot(snapshot: &DeviceSnapshot, available: bool) {
    if !available {
        info!("Cloud currently unavailable; showing last known state");
    }
    for record in snapshot.values() {
        let view = ClimateView::from_record(record);
        info!(
            "{} [{}]: {:?} target={} current={} fan={:?} swing={}",
            view.name,
            view.device_id,
            view.hvac_mode,
            format_temp(view.target_temperature),
            format_temp(view.current_temperature),
            view.fan_mode,
            if view.swing_on { "on" } else { "off" }
        );
        let sensor = TemperatureSensorView::from_record(record);
        debug!("{} [{}]: {}", sensor.name, sensor.unique_id, format_temp(sensor.celsius));
    }
}

/// Subscriber that logs only the devices whose published record changed.
pub fn change_logger() -> impl Fn(&DeviceSnapshot) + 'static {
    let last = RefCell::new(DeviceSnapshot::new());
    move |snapshot: &DeviceSnapshot| {
        let mut last = last.borrow_mut();
        for (id, record) in snapshot {
            if last.get(id) == Some(record) {
                continue;
            }
            let view = ClimateView::from_record(record);
            info!(
                "{} changed: {:?} target={} current={} fan={:?}",
                view.name,
                view.hvac_mode,
                format_temp(view.target_temperature),
                format_temp(view.current_temperature),
                view.fan_mode
            );
        }
        *last = snapshot.clone();
    }
}

fn format_temp(t: Option<f64>) -> String {
    t.map(|v| format!("{v}°C")).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorSettings;
    use crate::models::mcontrol::{DeviceId, Power};
    use crate::services::control::ControlOverrides;
    use crate::testing::{MockCloud, MockLocal, cloud_device};

    #[test]
    fn commands_run_through_the_coordinator() {
        let cloud = MockCloud::new(vec![cloud_device("A", "24", "22")]);
        let mut coord =
            PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default()).unwrap();

        handle_command(
            &mut coord,
            Command::Control {
                device_id: "A".into(),
                overrides: ControlOverrides::default().with_power(Power::Off),
            },
        );
        handle_command(
            &mut coord,
            Command::Control {
                device_id: "missing".into(),
                overrides: ControlOverrides::default().with_power(Power::Off),
            },
        );
        handle_command(&mut coord, Command::Status);

        assert_eq!(cloud.controls.borrow().len(), 1);
        assert_eq!(coord.current_snapshot()[&DeviceId::from("A")].power, Some(Power::Off));
    }

    #[test]
    fn auth_failure_stops_the_loop() {
        let cloud = MockCloud::new(vec![cloud_device("A", "24", "22")]);
        let mut coord =
            PollCoordinator::<_, &MockLocal>::setup(&cloud, None, CoordinatorSettings::default()).unwrap();
        cloud.fail_auth.set(true);

        let (tx, rx) = std::sync::mpsc::channel();
        drop(tx);
        let err = run_loop(&mut coord, &rx, Duration::from_millis(10)).expect_err("auth failure is fatal");
        assert!(err.contains("auth error"), "{err}");
    }
}
