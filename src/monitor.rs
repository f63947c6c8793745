// The polling loop and everything scheduled on top of it.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};

use crate::detector::{EventDetector, Notification, Thresholds, TIMESTAMP_FORMAT};
use crate::mailer::Mailer;
use crate::status::UpsStatus;
use crate::ups::Upsc;

/// Wall-clock cadence for the periodic full-status report: every
/// `interval_days` days at a fixed time-of-day.
#[derive(Debug, Clone, Copy)]
pub struct ReportSchedule {
    interval_days: i64,
    at: NaiveTime,
}

impl ReportSchedule {
    /// Invalid scheduling parameters are a startup error; nothing else in
    /// this program is allowed to be fatal once the loop is running.
    pub fn new(interval_days: u32, at: &str) -> anyhow::Result<ReportSchedule> {
        if interval_days == 0 {
            bail!("report_interval_days must be at least 1");
        }
        let at = NaiveTime::parse_from_str(at, "%H:%M")
            .with_context(|| format!("invalid report_time {at:?}, expected HH:MM"))?;
        Ok(ReportSchedule {
            interval_days: i64::from(interval_days),
            at,
        })
    }

    /// First occurrence strictly after `now`. Also used to reschedule after
    /// firing, which makes missed occurrences skip forward instead of
    /// replaying.
    fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let mut next = now.date().and_time(self.at);
        while next <= now {
            next += ChronoDuration::days(self.interval_days);
        }
        next
    }
}

/// One sequential loop: query, parse, detect, notify, sleep. The report
/// cadence is checked once per iteration, so its resolution is bounded by
/// the poll interval.
pub struct Monitor {
    upsc: Upsc,
    detector: EventDetector,
    mailer: Mailer,
    poll_interval: Duration,
    report: ReportSchedule,
}

impl Monitor {
    pub fn new(
        upsc: Upsc,
        detector: EventDetector,
        mailer: Mailer,
        poll_interval: Duration,
        report: ReportSchedule,
    ) -> Monitor {
        Monitor {
            upsc,
            detector,
            mailer,
            poll_interval,
            report,
        }
    }

    pub fn run(&mut self) -> ! {
        tracing::info!(device = self.upsc.device(), "monitor starting");
        self.send_startup_report();

        let mut next_poll = Instant::now();
        let mut next_report = self.report.next_after(Local::now().naive_local());
        tracing::info!(next_report = %next_report, "report scheduled");

        loop {
            if Instant::now() >= next_poll {
                self.tick();
                next_poll += self.poll_interval;
                // A tick that ran long would otherwise cause a burst of
                // catch-up polls.
                if next_poll <= Instant::now() {
                    next_poll = Instant::now() + self.poll_interval;
                }
            }

            let now = Local::now().naive_local();
            if now >= next_report {
                self.send_full_report();
                next_report = self.report.next_after(now);
                tracing::info!(next_report = %next_report, "report rescheduled");
            }

            let pause = next_poll.saturating_duration_since(Instant::now());
            thread::sleep(pause);
        }
    }

    /// One poll: a failed or empty query skips the tick entirely, leaving
    /// the detector baseline untouched.
    fn tick(&mut self) {
        let Some(status) = self.sample() else { return };
        for alert in self.detector.on_sample(&status) {
            self.dispatch(&alert);
        }
    }

    /// Query and parse, mapping every failure mode to `None` plus a log line.
    fn sample(&self) -> Option<UpsStatus> {
        let raw = match self.upsc.query() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "UPS query failed, skipping tick");
                return None;
            }
        };
        let status = UpsStatus::parse(&raw);
        if status.is_empty() {
            tracing::warn!("UPS query returned no data, skipping tick");
            return None;
        }
        if status.unparsed_lines() > 0 {
            tracing::debug!(lines = status.unparsed_lines(), "sample had unparsed lines");
        }
        Some(status)
    }

    fn dispatch(&self, alert: &Notification) {
        if let Err(e) = self.mailer.send(&alert.subject, &alert.body) {
            tracing::error!(error = %e, subject = %alert.subject, "failed to send notification");
        }
    }

    /// Sent once at process start, before any cadence timer. The first good
    /// sample also seeds the detector baseline so the loop's first real tick
    /// cannot fake a transition.
    fn send_startup_report(&mut self) {
        let now = Local::now().format(TIMESTAMP_FORMAT);
        let body = match self.sample() {
            Some(status) => {
                self.detector.prime(&status);
                format!(
                    "UPS monitor started.\n\
                     - Started: {now}\n\
                     - Device: {}\n\
                     - Current status:\n{}",
                    self.upsc.device(),
                    status.annotated(),
                )
            }
            None => format!(
                "UPS monitor started but the device is not answering.\n\
                 - Started: {now}\n\
                 - Device: {}\n\
                 Polling continues; status will appear in the next report.",
                self.upsc.device(),
            ),
        };
        self.dispatch(&Notification {
            subject: "[UPS report] monitor started".to_string(),
            body,
        });
    }

    /// The scheduled full dump. Ignores thresholds and transitions on
    /// purpose: it exists to show the UPS is alive and what it looks like.
    fn send_full_report(&self) {
        let now = Local::now().format(TIMESTAMP_FORMAT);
        let status_dump = match self.sample() {
            Some(status) => status.annotated(),
            None => "(device did not answer)".to_string(),
        };
        self.dispatch(&Notification {
            subject: format!("[UPS report] {}", Local::now().format("%Y-%m-%d")),
            body: format!(
                "Periodic UPS status report.\n\
                 - Generated: {now}\n\
                 - Device: {}\n\
                 - Full status:\n{status_dump}",
                self.upsc.device(),
            ),
        });
    }

    /// `test` subcommand: one diagnostic mail with whatever the device says
    /// right now.
    pub fn send_test_message(&self) {
        let status_dump = match self.sample() {
            Some(status) => status.annotated(),
            None => "(device did not answer)".to_string(),
        };
        self.dispatch(&Notification {
            subject: "[UPS test] diagnostic notification".to_string(),
            body: format!(
                "Test notification requested from the command line.\n\
                 - Device: {}\n\
                 - Current status:\n{status_dump}",
                self.upsc.device(),
            ),
        });
    }

    /// `simulate-low-battery` subcommand: degrade the live sample (15%
    /// charge, 180 s runtime) and run it through the threshold check. The
    /// real detector baseline is never touched.
    pub fn simulate_low_battery(&self, thresholds: Thresholds) {
        let base = self.sample().unwrap_or_else(|| UpsStatus::parse(""));
        let degraded = base
            .with_value("battery.charge", "15")
            .with_value("battery.runtime", "180");

        let mut detector = EventDetector::new(thresholds);
        detector.prime(&degraded);
        let alerts = detector.on_sample(&degraded);
        if alerts.is_empty() {
            tracing::warn!("simulated sample did not breach the configured thresholds");
        }
        for alert in &alerts {
            self.dispatch(alert);
        }
        tracing::info!(alerts = alerts.len(), "low-battery simulation done");
    }

    /// Fallback subcommand: relay an externally raised event name (NUT's
    /// NOTIFYCMD hands us one) verbatim.
    pub fn relay_external_event(&self, event: &str) {
        let now = Local::now().format(TIMESTAMP_FORMAT);
        let status_dump = match self.sample() {
            Some(status) => status.annotated(),
            None => "(device did not answer)".to_string(),
        };
        self.dispatch(&Notification {
            subject: format!("[UPS external event] {event}"),
            body: format!(
                "Received external UPS event: {event}\n\
                 - Time: {now}\n\
                 - Device: {}\n\
                 - Current status:\n{status_dump}",
                self.upsc.device(),
            ),
        });
    }
}
