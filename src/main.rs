mod detector;
mod mailer;
mod monitor;
mod status;
mod ups;

use std::fs::OpenOptions;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// The following define polling, detection and reporting behaviour.
const UPSC_PATH: &str = "upsc"; // NUT status query tool, resolved via PATH.
const UPS_NAME: &str = "ups"; // Device name as configured in NUT.
const POLL_INTERVAL: u64 = 60; // Seconds between polls.
const QUERY_TIMEOUT: u64 = 10; // Seconds before a hung query is killed.
const LOW_BATTERY_THRESHOLD: i64 = 20; // Percent charge below which we alert.
const MIN_RUNTIME_MINUTES: i64 = 5; // Runtime minutes below which we alert.
const DEBOUNCE_LOW_POWER: bool = false; // Alert once per episode instead of per tick.
const REPORT_INTERVAL_DAYS: u32 = 2; // Days between full-status reports.
const REPORT_TIME: &str = "00:00"; // Time of day for the full-status report.
const LOG_FILE: &str = "upsmon.log";

#[derive(Deserialize, Serialize, Debug)]
struct Settings {
    upsc_path: String,
    ups_name: String,
    poll_interval: u64,
    query_timeout: u64,
    low_battery_threshold: i64,
    min_runtime_minutes: i64,
    debounce_low_power: bool,
    report_interval_days: u32,
    report_time: String,
    log_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            upsc_path: UPSC_PATH.to_string(),
            ups_name: UPS_NAME.to_string(),
            poll_interval: POLL_INTERVAL,
            query_timeout: QUERY_TIMEOUT,
            low_battery_threshold: LOW_BATTERY_THRESHOLD,
            min_runtime_minutes: MIN_RUNTIME_MINUTES,
            debounce_low_power: DEBOUNCE_LOW_POWER,
            report_interval_days: REPORT_INTERVAL_DAYS,
            report_time: REPORT_TIME.to_string(),
            log_file: LOG_FILE.to_string(),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(name = "upsmon", about = "UPS monitor that emails on power events.", version)]
struct Cli {
    /// Monitor configuration file.
    #[clap(long, default_value = "upsmon.toml")]
    config: String,

    /// SMTP configuration file.
    #[clap(long, default_value = "mailer.toml")]
    mailer_config: String,

    #[clap(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Send one diagnostic notification with the current full status.
    Test,
    /// Synthesise a degraded sample and run it through threshold detection.
    SimulateLowBattery,
    /// Anything else is relayed verbatim as an external UPS event, so the
    /// binary can sit behind NUT's NOTIFYCMD.
    #[clap(external_subcommand)]
    External(Vec<String>),
}

fn init_logging(log_file: &str) -> anyhow::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("failed to open log file {log_file}"))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_target(false).with_ansi(false).with_writer(file))
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings: Settings = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::file(&cli.config))
        .extract()
        .context("failed to read monitor config")?;

    let mailer_settings: mailer::MailerSettings = Figment::new()
        .merge(Toml::file(&cli.mailer_config))
        .extract()
        .context("failed to read smtp config")?;

    init_logging(&settings.log_file)?;

    if cfg!(debug_assertions) {
        tracing::debug!(?settings, "monitor configuration");
    }

    // Anything wrong with the configuration must surface here, before the
    // loop starts; after this point no error is fatal.
    let report = monitor::ReportSchedule::new(settings.report_interval_days, &settings.report_time)?;
    let mailer = mailer::Mailer::new(mailer_settings).context("invalid smtp configuration")?;

    let upsc = ups::Upsc::new(
        &settings.upsc_path,
        &settings.ups_name,
        Duration::from_secs(settings.query_timeout),
    );
    let thresholds = detector::Thresholds {
        low_battery_percent: settings.low_battery_threshold,
        min_runtime_minutes: settings.min_runtime_minutes,
        debounce_low_power: settings.debounce_low_power,
    };
    let mut monitor = monitor::Monitor::new(
        upsc,
        detector::EventDetector::new(thresholds),
        mailer,
        Duration::from_secs(settings.poll_interval),
        report,
    );

    match cli.action {
        None => monitor.run(),
        Some(Action::Test) => monitor.send_test_message(),
        Some(Action::SimulateLowBattery) => monitor.simulate_low_battery(thresholds),
        Some(Action::External(args)) => monitor.relay_external_event(&args.join(" ")),
    }

    Ok(())
}
