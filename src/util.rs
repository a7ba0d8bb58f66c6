use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

const WATCHDOG_SETTINGS: &str = "WATCHDOG_SETTINGS";

const WATCHDOG_STATE_DIR: &str = "WATCHDOG_STATE_DIR";

const APP_DIR: &str = "server-watchdog";

/// Settings file path from the environment, if any.
pub fn get_settings_path() -> Option<String> {
    std::env::var(WATCHDOG_SETTINGS).ok()
}

/// Directory for state files: `WATCHDOG_STATE_DIR`, else the platform config
/// directory, else the working directory.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(WATCHDOG_STATE_DIR) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
}

/// An amount of space, either absolute or relative to a device's capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpaceAmount {
    Bytes(u64),
    Percent(f64),
}

impl SpaceAmount {
    /// Absolute byte count given the total capacity of the device.
    pub fn resolve(self, total: u64) -> u64 {
        match self {
            SpaceAmount::Bytes(bytes) => bytes,
            SpaceAmount::Percent(percent) => ((total as f64) * percent / 100.0).round() as u64,
        }
    }
}

/// Parse `"1024"`, `"512KB"`, `"10 MB"`, `"2GB"`, `"1TB"` or `"15%"`.
pub fn parse_size(value: &str) -> anyhow::Result<SpaceAmount> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number
        .parse()
        .with_context(|| format!("invalid size '{value}'"))?;
    if !number.is_finite() || number < 0.0 {
        bail!("invalid size '{value}'");
    }

    let multiplier: f64 = match unit.trim().to_ascii_uppercase().as_str() {
        "%" => {
            if number > 100.0 {
                bail!("percentage '{value}' is above 100");
            }
            return Ok(SpaceAmount::Percent(number));
        }
        "" | "B" => 1.0,
        "KB" | "K" => 1024.0,
        "MB" | "M" => 1024.0 * 1024.0,
        "GB" | "G" => 1024.0 * 1024.0 * 1024.0,
        "TB" | "T" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        other => bail!("unknown size unit '{other}' in '{value}'"),
    };

    let bytes = number * multiplier;
    if bytes > u64::MAX as f64 {
        bail!("size '{value}' is too large");
    }
    Ok(SpaceAmount::Bytes(bytes.round() as u64))
}

/// Parse a port list such as `"80,443,8000-8010"`. The result is sorted and
/// free of duplicates.
pub fn parse_ports(value: &str) -> anyhow::Result<Vec<u16>> {
    let mut ports = vec![];

    for part in value.split(',').map(str::trim) {
        if part.is_empty() {
            continue;
        }
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_port(start)?;
                let end = parse_port(end)?;
                if end < start {
                    bail!("invalid port range '{part}'");
                }
                ports.extend(start..=end);
            }
            None => ports.push(parse_port(part)?),
        }
    }

    if ports.is_empty() {
        bail!("no ports given in '{value}'");
    }
    ports.sort_unstable();
    ports.dedup();
    Ok(ports)
}

fn parse_port(value: &str) -> anyhow::Result<u16> {
    let port: u16 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid port '{value}'"))?;
    if port == 0 {
        bail!("port 0 is not allowed");
    }
    Ok(port)
}

/// Parse a timespan like `"90"` (seconds), `"500ms"`, `"30s"`, `"5 min"`,
/// `"1h30m"` or `"2 days"`.
pub fn parse_timespan(value: &str) -> anyhow::Result<Duration> {
    let text = value.trim();
    if let Ok(seconds) = text.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    let mut total = Duration::ZERO;
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            bail!("invalid timespan '{value}'");
        }
        let amount: u64 = rest[..digits]
            .parse()
            .with_context(|| format!("invalid timespan '{value}'"))?;
        rest = rest[digits..].trim_start();

        let unit_len = rest
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(rest.len());
        let unit = rest[..unit_len].to_ascii_lowercase();
        rest = rest[unit_len..].trim_start();

        let unit_duration = match unit.as_str() {
            "ms" => Duration::from_millis(1),
            "s" | "sec" | "secs" => Duration::from_secs(1),
            "m" | "min" | "mins" => Duration::from_secs(60),
            "h" | "hour" | "hours" => Duration::from_secs(60 * 60),
            "d" | "day" | "days" => Duration::from_secs(24 * 60 * 60),
            "w" | "week" | "weeks" => Duration::from_secs(7 * 24 * 60 * 60),
            _ => bail!("unknown timespan unit '{unit}' in '{value}'"),
        };
        let amount = u32::try_from(amount).with_context(|| format!("timespan '{value}' is too large"))?;
        total += unit_duration * amount;
    }

    Ok(total)
}
