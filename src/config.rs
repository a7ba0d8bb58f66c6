use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use lettre::message::Mailbox;
use regex::Regex;
use tracing::trace;

use crate::monitors::disk::DiskSpaceProbe;
use crate::notify::Severity;
use crate::util::{parse_ports, parse_size, parse_timespan};

const MAX_NAME_LENGTH: usize = 256;
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const MIN_LOG_MAX_AGE: Duration = Duration::from_secs(10 * 60);

/// Stands in for secrets in `Debug` output.
const REDACTED: &str = "<redacted>";

/// A timespan given either as plain seconds or as text (`"30s"`, `"5m"`).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum Timespan {
    Seconds(u64),
    Text(String),
}

impl Timespan {
    pub fn to_duration(&self) -> anyhow::Result<Duration> {
        match self {
            Timespan::Seconds(seconds) => Ok(Duration::from_secs(*seconds)),
            Timespan::Text(text) => parse_timespan(text),
        }
    }
}

/// An amount of space given either as plain bytes or as text (`"2GB"`, `"10%"`).
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum SpaceValue {
    Bytes(u64),
    Text(String),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,

    pub server: ServerConfig,

    /// Directory for persisted monitor state (defaults to the platform
    /// config directory)
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub log: LogConfig,

    pub channels: BTreeMap<String, ChannelConfig>,

    #[serde(default)]
    pub processes: Vec<ProcessConfig>,

    #[serde(default)]
    pub webs: Vec<WebConfig>,

    #[serde(default)]
    pub tcp_ports: Vec<TcpPortsConfig>,

    #[serde(default)]
    pub free_disk_space: Vec<DiskConfig>,
}

#[derive(Clone, serde::Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: IpAddr,
    pub port: u16,
    pub api_key: String,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("api_key", &REDACTED)
            .finish()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_folder")]
    pub folder: PathBuf,

    /// Log files older than this are deleted
    pub max_age: Option<Timespan>,

    /// Timestamps in local time instead of UTC
    #[serde(default)]
    pub use_local_time: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            folder: default_log_folder(),
            max_age: None,
            use_local_time: false,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChannelConfig {
    pub file: Option<FileOutputConfig>,
    pub webhook: Option<WebhookOutputConfig>,
    pub email: Option<EmailOutputConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FileOutputConfig {
    #[serde(default = "enabled_by_default", alias = "enable")]
    pub enabled: bool,
}

#[derive(Clone, serde::Deserialize)]
pub struct WebhookOutputConfig {
    #[serde(default = "enabled_by_default", alias = "enable")]
    pub enabled: bool,
    /// Incoming webhook URLs carry their token in the path
    pub url: String,
}

impl fmt::Debug for WebhookOutputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookOutputConfig")
            .field("enabled", &self.enabled)
            .field("url", &REDACTED)
            .finish()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EmailOutputConfig {
    #[serde(default = "enabled_by_default", alias = "enable")]
    pub enabled: bool,
    pub subject: Option<String>,
    pub sender: String,
    pub receivers: Vec<String>,
    pub smtp: SmtpConfig,
}

#[derive(Clone, serde::Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Implicit TLS
    #[serde(default)]
    pub use_tls: bool,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

/// Process discovery rule
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProcessConfig {
    /// Friendly name given to discovered processes
    pub name: String,
    /// Glob matched against the executable name
    pub executable: String,
    /// Glob matched against the command line arguments
    pub args: Option<String>,
    /// Also watch forked children of a matching process
    #[serde(default)]
    pub include_children: bool,
    pub channel: String,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct WebConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub content: Vec<ContentRuleConfig>,
    pub interval: Option<Timespan>,
    pub timeout: Option<Timespan>,
    pub channel: String,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ContentRuleConfig {
    /// Regular expression run against the response body
    pub search: String,
    /// 1-based capture groups whose value must change between checks
    #[serde(default)]
    pub check_changes: Vec<usize>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TcpPortsConfig {
    pub name: String,
    pub address: String,
    /// e.g. `"80,443,8000-8010"`
    pub ports: String,
    pub interval: Option<Timespan>,
    pub timeout: Option<Timespan>,
    pub channel: String,
    #[serde(default)]
    pub severity: Severity,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DiskConfig {
    /// Mount point or any path on the device
    pub device: PathBuf,
    pub interval: Option<Timespan>,
    pub minimum_free: SpaceValue,
    pub channel: String,
    #[serde(default)]
    pub severity: Severity,
}

fn default_name() -> String {
    String::from("SERVER-WATCHDOG")
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_log_folder() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_max_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_smtp_port() -> u16 {
    25
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn enabled_by_default() -> bool {
    true
}

/// Validated configuration with every relative path, timespan, size and
/// pattern resolved.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub name: String,
    pub server: ServerConfig,
    pub state_dir: PathBuf,
    pub log: ResolvedLogConfig,
    pub channels: BTreeMap<String, ResolvedChannel>,
    pub processes: Vec<ResolvedProcessRule>,
    pub webs: Vec<ResolvedWebConfig>,
    pub tcp_ports: Vec<ResolvedTcpConfig>,
    pub free_disk_space: Vec<ResolvedDiskConfig>,
}

#[derive(Debug, Clone)]
pub struct ResolvedLogConfig {
    pub folder: PathBuf,
    pub max_age: Duration,
    pub use_local_time: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedChannel {
    pub file: bool,
    pub webhook: Option<ResolvedWebhookConfig>,
    pub email: Option<ResolvedEmailConfig>,
}

#[derive(Clone)]
pub struct ResolvedWebhookConfig {
    pub url: String,
}

impl fmt::Debug for ResolvedWebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedWebhookConfig")
            .field("url", &REDACTED)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedEmailConfig {
    pub subject: Option<String>,
    pub sender: Mailbox,
    pub receivers: Vec<Mailbox>,
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone)]
pub struct ResolvedProcessRule {
    pub name: String,
    pub executable: glob::Pattern,
    pub args: Option<glob::Pattern>,
    pub include_children: bool,
    pub channel: String,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub struct ResolvedWebConfig {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub content: Vec<ResolvedContentRule>,
    pub interval: Duration,
    pub timeout: Duration,
    pub channel: String,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub struct ResolvedContentRule {
    pub search: Regex,
    pub check_changes: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedTcpConfig {
    pub name: String,
    pub address: String,
    pub ports: Vec<u16>,
    pub interval: Duration,
    pub timeout: Duration,
    pub channel: String,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub struct ResolvedDiskConfig {
    pub device: PathBuf,
    pub minimum_free: u64,
    pub interval: Duration,
    pub channel: String,
    pub severity: Severity,
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid settings file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

impl Config {
    /// Validate the settings and resolve them into monitor definitions.
    ///
    /// Relative paths are taken relative to `base_dir`; percentage disk
    /// thresholds are turned into bytes using `disks`.
    pub fn resolve(self, base_dir: &Path, disks: &dyn DiskSpaceProbe) -> anyhow::Result<ResolvedConfig> {
        let name = self.name.trim().to_string();
        ensure!(!name.is_empty(), "name must not be empty");
        ensure!(
            name.len() <= MAX_NAME_LENGTH,
            "name must not exceed {MAX_NAME_LENGTH} characters"
        );

        ensure!(self.server.port != 0, "server port must not be 0");
        ensure!(
            !self.server.api_key.trim().is_empty(),
            "server api_key must not be empty"
        );

        let log = resolve_log(self.log, base_dir)?;

        let state_dir = match self.state_dir {
            Some(dir) => base_dir.join(dir),
            None => crate::util::default_state_dir(),
        };

        ensure!(!self.channels.is_empty(), "at least one channel must be configured");
        let mut channels = BTreeMap::new();
        for (channel_name, channel) in self.channels {
            let key = channel_name.trim().to_lowercase();
            ensure!(!key.is_empty(), "channel names must not be empty");
            let resolved =
                resolve_channel(channel).with_context(|| format!("invalid channel '{channel_name}'"))?;
            if channels.insert(key.clone(), resolved).is_some() {
                bail!("channel '{key}' is defined more than once");
            }
        }
        let channel_of = |channel: &str| -> anyhow::Result<String> {
            let key = channel.trim().to_lowercase();
            ensure!(channels.contains_key(&key), "unknown channel '{channel}'");
            Ok(key)
        };

        let processes = self
            .processes
            .into_iter()
            .map(|process| {
                let name = process.name.clone();
                resolve_process(process, &channel_of)
                    .with_context(|| format!("invalid process rule '{name}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let webs = self
            .webs
            .into_iter()
            .map(|web| {
                let url = web.url.clone();
                resolve_web(web, &channel_of).with_context(|| format!("invalid web check '{url}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let tcp_ports = self
            .tcp_ports
            .into_iter()
            .map(|tcp| {
                let name = tcp.name.clone();
                resolve_tcp(tcp, &channel_of)
                    .with_context(|| format!("invalid tcp port group '{name}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let free_disk_space = self
            .free_disk_space
            .into_iter()
            .map(|disk| {
                let device = disk.device.display().to_string();
                resolve_disk(disk, &channel_of, disks)
                    .with_context(|| format!("invalid free disk space check '{device}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(ResolvedConfig {
            name,
            server: self.server,
            state_dir,
            log,
            channels,
            processes,
            webs,
            tcp_ports,
            free_disk_space,
        })
    }
}

fn resolve_log(log: LogConfig, base_dir: &Path) -> anyhow::Result<ResolvedLogConfig> {
    let max_age = match log.max_age {
        Some(max_age) => max_age.to_duration().context("invalid log max_age")?,
        None => default_log_max_age(),
    };
    ensure!(
        max_age >= MIN_LOG_MAX_AGE,
        "log max_age must be at least 10 minutes"
    );
    Ok(ResolvedLogConfig {
        folder: base_dir.join(log.folder),
        max_age,
        use_local_time: log.use_local_time,
    })
}

fn resolve_channel(channel: ChannelConfig) -> anyhow::Result<ResolvedChannel> {
    let mut resolved = ResolvedChannel {
        file: channel.file.is_some_and(|file| file.enabled),
        ..Default::default()
    };

    if let Some(webhook) = channel.webhook.filter(|w| w.enabled) {
        let url = reqwest::Url::parse(&webhook.url)
            .with_context(|| format!("invalid webhook url '{}'", webhook.url))?;
        ensure!(
            matches!(url.scheme(), "http" | "https"),
            "webhook url must use http or https"
        );
        resolved.webhook = Some(ResolvedWebhookConfig { url: webhook.url });
    }

    if let Some(email) = channel.email.filter(|e| e.enabled) {
        if let Some(subject) = &email.subject {
            ensure!(
                subject.len() <= MAX_NAME_LENGTH,
                "email subject must not exceed {MAX_NAME_LENGTH} characters"
            );
        }
        let sender: Mailbox = email
            .sender
            .parse()
            .with_context(|| format!("invalid email sender '{}'", email.sender))?;
        ensure!(!email.receivers.is_empty(), "email needs at least one receiver");
        let receivers = email
            .receivers
            .iter()
            .map(|receiver| {
                receiver
                    .parse::<Mailbox>()
                    .with_context(|| format!("invalid email receiver '{receiver}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        ensure!(!email.smtp.host.trim().is_empty(), "smtp host must not be empty");
        ensure!(email.smtp.port != 0, "smtp port must not be 0");

        resolved.email = Some(ResolvedEmailConfig {
            subject: email.subject.filter(|s| !s.trim().is_empty()),
            sender,
            receivers,
            smtp: email.smtp,
        });
    }

    ensure!(
        resolved.file || resolved.webhook.is_some() || resolved.email.is_some(),
        "at least one output must be enabled"
    );
    Ok(resolved)
}

fn interval_or_default(value: Option<Timespan>) -> anyhow::Result<Duration> {
    let interval = match value {
        Some(interval) => interval.to_duration().context("invalid interval")?,
        None => default_check_interval(),
    };
    ensure!(
        interval >= MIN_CHECK_INTERVAL,
        "interval must be at least {} seconds",
        MIN_CHECK_INTERVAL.as_secs()
    );
    Ok(interval)
}

fn timeout_or_default(value: Option<Timespan>) -> anyhow::Result<Duration> {
    let timeout = match value {
        Some(timeout) => timeout.to_duration().context("invalid timeout")?,
        None => default_timeout(),
    };
    ensure!(timeout >= MIN_TIMEOUT, "timeout must be at least 1 second");
    Ok(timeout)
}

fn resolve_process(
    process: ProcessConfig,
    channel_of: &impl Fn(&str) -> anyhow::Result<String>,
) -> anyhow::Result<ResolvedProcessRule> {
    ensure!(!process.name.trim().is_empty(), "name must not be empty");
    ensure!(
        !process.executable.trim().is_empty(),
        "executable must not be empty"
    );
    let executable = glob::Pattern::new(&process.executable)
        .with_context(|| format!("invalid executable pattern '{}'", process.executable))?;
    let args = process
        .args
        .as_deref()
        .filter(|args| !args.trim().is_empty())
        .map(|args| {
            glob::Pattern::new(args).with_context(|| format!("invalid args pattern '{args}'"))
        })
        .transpose()?;

    Ok(ResolvedProcessRule {
        name: process.name,
        executable,
        args,
        include_children: process.include_children,
        channel: channel_of(&process.channel)?,
        severity: process.severity,
    })
}

fn resolve_web(
    web: WebConfig,
    channel_of: &impl Fn(&str) -> anyhow::Result<String>,
) -> anyhow::Result<ResolvedWebConfig> {
    let url = reqwest::Url::parse(&web.url).context("invalid url")?;
    ensure!(
        matches!(url.scheme(), "http" | "https"),
        "url must use http or https"
    );

    let content = web
        .content
        .into_iter()
        .map(|rule| {
            let search = Regex::new(&rule.search)
                .with_context(|| format!("invalid search expression '{}'", rule.search))?;
            let groups = search.captures_len() - 1;
            for &group in &rule.check_changes {
                ensure!(
                    (1..=groups).contains(&group),
                    "capture group {group} does not exist in '{}'",
                    rule.search
                );
            }
            Ok(ResolvedContentRule {
                search,
                check_changes: rule.check_changes,
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(ResolvedWebConfig {
        url: web.url,
        headers: web.headers.into_iter().collect(),
        content,
        interval: interval_or_default(web.interval)?,
        timeout: timeout_or_default(web.timeout)?,
        channel: channel_of(&web.channel)?,
        severity: web.severity,
    })
}

fn resolve_tcp(
    tcp: TcpPortsConfig,
    channel_of: &impl Fn(&str) -> anyhow::Result<String>,
) -> anyhow::Result<ResolvedTcpConfig> {
    ensure!(!tcp.name.trim().is_empty(), "name must not be empty");
    ensure!(!tcp.address.trim().is_empty(), "address must not be empty");

    Ok(ResolvedTcpConfig {
        ports: parse_ports(&tcp.ports)?,
        name: tcp.name,
        address: tcp.address.trim().to_string(),
        interval: interval_or_default(tcp.interval)?,
        timeout: timeout_or_default(tcp.timeout)?,
        channel: channel_of(&tcp.channel)?,
        severity: tcp.severity,
    })
}

fn resolve_disk(
    disk: DiskConfig,
    channel_of: &impl Fn(&str) -> anyhow::Result<String>,
    disks: &dyn DiskSpaceProbe,
) -> anyhow::Result<ResolvedDiskConfig> {
    ensure!(
        !disk.device.as_os_str().is_empty(),
        "device must not be empty"
    );

    let amount = match &disk.minimum_free {
        SpaceValue::Bytes(bytes) => crate::util::SpaceAmount::Bytes(*bytes),
        SpaceValue::Text(text) => parse_size(text)?,
    };
    let minimum_free = match amount {
        crate::util::SpaceAmount::Bytes(bytes) => bytes,
        percent => {
            let usage = disks
                .usage(&disk.device)
                .with_context(|| format!("cannot determine the size of {}", disk.device.display()))?;
            percent.resolve(usage.total)
        }
    };

    Ok(ResolvedDiskConfig {
        minimum_free,
        interval: interval_or_default(disk.interval)?,
        channel: channel_of(&disk.channel)?,
        severity: disk.severity,
        device: disk.device,
    })
}
