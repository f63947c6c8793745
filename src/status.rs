// Parsing and rendering of `upsc` output.
//
// `upsc` prints one `key: value` pair per line. We keep every line in its
// original order so a rendered dump matches what the tool printed; lines
// without a separator stay verbatim but contribute nothing to lookups.

const SEPARATOR: &str = ": ";

const CHARGE_KEY: &str = "battery.charge";
const RUNTIME_KEY: &str = "battery.runtime";
const STATUS_KEY: &str = "ups.status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Online,
    OnBattery,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Pair { key: String, value: String },
    Verbatim(String),
}

/// One parsed `upsc` sample. Built once per poll, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsStatus {
    lines: Vec<Line>,
}

impl UpsStatus {
    /// Total parse of raw `upsc` output. Never fails: malformed lines are
    /// preserved verbatim and surface only in rendering.
    pub fn parse(raw: &str) -> UpsStatus {
        let lines = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match line.split_once(SEPARATOR) {
                Some((key, value)) => Line::Pair {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                },
                None => Line::Verbatim(line.to_string()),
            })
            .collect();

        UpsStatus { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Count of lines that did not parse as `key: value`, for diagnostics.
    pub fn unparsed_lines(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, Line::Verbatim(_)))
            .count()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Pair { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    /// Copy of this sample with one value replaced (or appended if absent).
    /// Used to synthesise degraded samples for the low-battery simulation.
    pub fn with_value(&self, key: &str, new_value: &str) -> UpsStatus {
        let mut lines = self.lines.clone();
        match lines.iter_mut().find_map(|line| match line {
            Line::Pair { key: k, value } if k == key => Some(value),
            _ => None,
        }) {
            Some(value) => *value = new_value.to_string(),
            None => lines.push(Line::Pair {
                key: key.to_string(),
                value: new_value.to_string(),
            }),
        }
        UpsStatus { lines }
    }

    /// Battery charge as a percentage. 0 if the field is absent or garbled.
    pub fn charge_percent(&self) -> i64 {
        self.get(CHARGE_KEY)
            .and_then(|v| v.trim_end_matches('%').trim().parse().ok())
            .unwrap_or(0)
    }

    /// Remaining runtime in whole minutes. The UPS reports seconds; 0 if the
    /// field is absent or garbled.
    pub fn runtime_minutes(&self) -> i64 {
        self.get(RUNTIME_KEY)
            .and_then(|v| v.parse::<i64>().ok())
            .map(|secs| secs / 60)
            .unwrap_or(0)
    }

    /// Power source, from the `ups.status` flags. NUT reports "OL" while on
    /// mains and "OB" while on battery, possibly alongside other flags
    /// ("OL CHRG", "OB LB"). Anything else maps to `Unknown`.
    pub fn power_state(&self) -> PowerState {
        match self.get(STATUS_KEY) {
            Some(v) if v.contains("OB") => PowerState::OnBattery,
            Some(v) if v.contains("OL") => PowerState::Online,
            _ => PowerState::Unknown,
        }
    }

    /// Lossless dump: every parsed pair back as `key: value`, every verbatim
    /// line as-is, in input order. Re-parsing the result reproduces the same
    /// status.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Pair { key, value } => {
                    out.push_str(key);
                    out.push_str(SEPARATOR);
                    out.push_str(value);
                }
                Line::Verbatim(l) => out.push_str(l),
            }
            out.push('\n');
        }
        out
    }

    /// Label-enriched dump for notification bodies: `key: label - value`.
    /// Keys with no known label fall back to the key itself.
    pub fn annotated(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Pair { key, value } => {
                    out.push_str(&format!("{key}: {} - {value}", label_for(key)));
                }
                Line::Verbatim(l) => out.push_str(l),
            }
            out.push('\n');
        }
        out
    }
}

/// Display label for a NUT parameter key; the key itself if unknown.
/// Rendering only, never consulted by detection logic.
pub fn label_for(key: &str) -> &str {
    LABELS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, label)| *label)
        .unwrap_or(key)
}

static LABELS: &[(&str, &str)] = &[
    ("battery.charge", "Battery charge"),
    ("battery.charge.low", "Low-charge threshold"),
    ("battery.charge.warning", "Charge warning threshold"),
    ("battery.mfr.date", "Battery manufacture date"),
    ("battery.runtime", "Battery runtime remaining"),
    ("battery.runtime.low", "Low-runtime threshold"),
    ("battery.temperature", "Battery temperature"),
    ("battery.type", "Battery type"),
    ("battery.voltage", "Battery voltage"),
    ("battery.voltage.nominal", "Battery nominal voltage"),
    ("device.mfr", "Device manufacturer"),
    ("device.model", "Device model"),
    ("device.serial", "Device serial"),
    ("device.type", "Device type"),
    ("driver.name", "Driver name"),
    ("driver.parameter.pollfreq", "Driver poll frequency"),
    ("driver.parameter.pollinterval", "Driver poll interval"),
    ("driver.parameter.port", "Driver port"),
    ("driver.version", "Driver version"),
    ("driver.version.data", "Driver data version"),
    ("driver.version.internal", "Driver internal version"),
    ("input.sensitivity", "Input sensitivity"),
    ("input.transfer.high", "High transfer voltage"),
    ("input.transfer.low", "Low transfer voltage"),
    ("input.transfer.reason", "Last transfer reason"),
    ("input.voltage", "Input voltage"),
    ("output.current", "Output current"),
    ("output.frequency", "Output frequency"),
    ("output.voltage", "Output voltage"),
    ("output.voltage.nominal", "Output nominal voltage"),
    ("ups.beeper.status", "Beeper status"),
    ("ups.delay.shutdown", "Shutdown delay"),
    ("ups.delay.start", "Start delay"),
    ("ups.firmware", "Firmware version"),
    ("ups.firmware.aux", "Auxiliary firmware version"),
    ("ups.load", "Load percentage"),
    ("ups.mfr", "UPS manufacturer"),
    ("ups.mfr.date", "UPS manufacture date"),
    ("ups.model", "UPS model"),
    ("ups.productid", "Product id"),
    ("ups.serial", "UPS serial"),
    ("ups.status", "UPS status"),
    ("ups.test.result", "Self-test result"),
    ("ups.timer.reboot", "Reboot timer"),
    ("ups.timer.shutdown", "Shutdown timer"),
    ("ups.timer.start", "Start timer"),
    ("ups.vendorid", "Vendor id"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const SAMPLE: &str = indoc! {"
        battery.charge: 100
        battery.runtime: 6000
        device.model: SUA2200R2ICH
        ups.status: OL
    "};

    #[test]
    fn parses_pairs_and_keeps_order() {
        let status = UpsStatus::parse(SAMPLE);
        assert_eq!(status.get("battery.charge"), Some("100"));
        assert_eq!(status.get("device.model"), Some("SUA2200R2ICH"));
        assert_eq!(status.get("nonexistent"), None);
        assert_eq!(status.unparsed_lines(), 0);
    }

    #[test]
    fn malformed_lines_survive_verbatim() {
        let status = UpsStatus::parse("garbage without separator\nups.status: OL\n");
        assert_eq!(status.unparsed_lines(), 1);
        assert_eq!(status.get("ups.status"), Some("OL"));
        assert!(status.render().contains("garbage without separator"));
    }

    #[test]
    fn charge_defaults_to_zero_when_absent() {
        let status = UpsStatus::parse("ups.status: OL\n");
        assert_eq!(status.charge_percent(), 0);
    }

    #[test]
    fn charge_defaults_to_zero_when_garbled() {
        let status = UpsStatus::parse("battery.charge: lots\n");
        assert_eq!(status.charge_percent(), 0);
    }

    #[test]
    fn charge_tolerates_percent_suffix() {
        let status = UpsStatus::parse("battery.charge: 87%\n");
        assert_eq!(status.charge_percent(), 87);
    }

    #[test]
    fn runtime_defaults_to_zero_when_absent() {
        let status = UpsStatus::parse("ups.status: OL\n");
        assert_eq!(status.runtime_minutes(), 0);
    }

    #[test]
    fn runtime_converts_seconds_to_whole_minutes() {
        let status = UpsStatus::parse("battery.runtime: 6000\n");
        assert_eq!(status.runtime_minutes(), 100);
        let status = UpsStatus::parse("battery.runtime: 119\n");
        assert_eq!(status.runtime_minutes(), 1);
    }

    #[test]
    fn power_state_from_status_flags() {
        let online = UpsStatus::parse("ups.status: OL CHRG\n");
        assert_eq!(online.power_state(), PowerState::Online);
        let on_battery = UpsStatus::parse("ups.status: OB DISCHRG\n");
        assert_eq!(on_battery.power_state(), PowerState::OnBattery);
        let odd = UpsStatus::parse("ups.status: FSD\n");
        assert_eq!(odd.power_state(), PowerState::Unknown);
        let missing = UpsStatus::parse("battery.charge: 50\n");
        assert_eq!(missing.power_state(), PowerState::Unknown);
    }

    #[test]
    fn render_round_trips_through_parse() {
        let status = UpsStatus::parse(SAMPLE);
        let reparsed = UpsStatus::parse(&status.render());
        assert_eq!(status, reparsed);
    }

    #[test]
    fn annotation_is_additive_not_lossy() {
        let status = UpsStatus::parse(SAMPLE);
        let annotated = status.annotated();
        assert!(annotated.contains("battery.charge: Battery charge - 100"));
        // Unknown keys fall back to the key itself.
        let status = UpsStatus::parse("custom.key: 42\n");
        assert!(status.annotated().contains("custom.key: custom.key - 42"));
    }

    #[test]
    fn with_value_replaces_or_appends() {
        let status = UpsStatus::parse(SAMPLE);
        let degraded = status.with_value("battery.charge", "15");
        assert_eq!(degraded.charge_percent(), 15);
        assert_eq!(status.charge_percent(), 100);
        let extended = status.with_value("battery.date", "2024/01/01");
        assert_eq!(extended.get("battery.date"), Some("2024/01/01"));
    }

    #[test]
    fn empty_input_parses_to_empty_status() {
        assert!(UpsStatus::parse("").is_empty());
        assert!(UpsStatus::parse("\n\n").is_empty());
    }
}
