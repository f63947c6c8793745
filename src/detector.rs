// Event detection over successive UPS samples.

use chrono::Local;

use crate::status::{PowerState, UpsStatus};

pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One alert ready for the mailer. Built per triggering condition and
/// discarded after dispatch.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub low_battery_percent: i64,
    pub min_runtime_minutes: i64,
    /// When set, a persisting low-power condition alerts only once until it
    /// clears. Off by default: repeated alerts while degraded are wanted.
    pub debounce_low_power: bool,
}

/// Compares each new sample against the previous one. Owns the only copy of
/// the last observed status; the polling loop is the sole caller.
pub struct EventDetector {
    thresholds: Thresholds,
    last: Option<UpsStatus>,
    low_power_active: bool,
}

impl EventDetector {
    pub fn new(thresholds: Thresholds) -> EventDetector {
        EventDetector {
            thresholds,
            last: None,
            low_power_active: false,
        }
    }

    /// Process one fully parsed sample and return any alerts it triggers.
    ///
    /// The first sample ever observed only seeds the baseline. A transition
    /// alert fires only on the exact mains-lost / mains-restored pairs;
    /// anything involving `Unknown` stays silent so a garbled sample cannot
    /// fake a power event. The threshold check is independent of the
    /// transition check and re-fires every tick the condition holds unless
    /// debounce is configured.
    pub fn on_sample(&mut self, current: &UpsStatus) -> Vec<Notification> {
        let mut alerts = Vec::new();

        if let Some(last) = &self.last {
            if let Some(event) = transition_label(last.power_state(), current.power_state()) {
                alerts.push(transition_notification(event, current));
            }
        }

        let low_power = current.charge_percent() < self.thresholds.low_battery_percent
            || current.runtime_minutes() < self.thresholds.min_runtime_minutes;
        if low_power && !(self.thresholds.debounce_low_power && self.low_power_active) {
            alerts.push(low_power_notification(&self.thresholds, current));
        }
        self.low_power_active = low_power;

        self.last = Some(current.clone());
        alerts
    }

    /// Seed the baseline without running detection, for the first successful
    /// sample at startup.
    pub fn prime(&mut self, status: &UpsStatus) {
        self.last = Some(status.clone());
    }
}

fn transition_label(from: PowerState, to: PowerState) -> Option<&'static str> {
    match (from, to) {
        (PowerState::Online, PowerState::OnBattery) => {
            Some("mains interrupted, running on battery")
        }
        (PowerState::OnBattery, PowerState::Online) => Some("mains restored, running on line power"),
        _ => None,
    }
}

fn transition_notification(event: &str, current: &UpsStatus) -> Notification {
    let now = Local::now().format(TIMESTAMP_FORMAT);
    Notification {
        subject: format!("[UPS event] {event}"),
        body: format!(
            "UPS power source changed.\n\
             - Event: {event}\n\
             - Battery charge: {}%\n\
             - Runtime remaining: {} min\n\
             - Time: {now}\n\
             - Full status:\n{}",
            current.charge_percent(),
            current.runtime_minutes(),
            current.annotated(),
        ),
    }
}

fn low_power_notification(thresholds: &Thresholds, current: &UpsStatus) -> Notification {
    let now = Local::now().format(TIMESTAMP_FORMAT);
    Notification {
        subject: "[UPS alert] battery charge or runtime low".to_string(),
        body: format!(
            "UPS battery is running low.\n\
             - Battery charge: {}% (threshold {}%)\n\
             - Runtime remaining: {} min (threshold {} min)\n\
             - Time: {now}\n\
             - Full status:\n{}",
            current.charge_percent(),
            thresholds.low_battery_percent,
            current.runtime_minutes(),
            thresholds.min_runtime_minutes,
            current.annotated(),
        ),
    }
}
