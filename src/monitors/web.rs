//! HTTP endpoint checks
//!
//! A site is healthy when it answers `200 OK` and every content rule passes.
//! A content rule runs a regular expression against the body. A rule without
//! tracked capture groups always passes. A rule that tracks capture groups
//! passes only when it matches and at least one tracked value differs from
//! the one seen on the previous check, which turns a counter or timestamp on
//! a status page into a heartbeat.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::config::{ResolvedContentRule, ResolvedWebConfig};
use crate::engine::{AtomicHealth, CheckOutcome, CheckTarget, Health, Monitor, MonitorContext, ScheduledItem};
use crate::state::IdentityHasher;

pub const STATE_KEY: &str = "webcheck";

pub struct WebTarget {
    url: String,
    headers: Vec<(String, String)>,
    rules: Vec<ResolvedContentRule>,
    client: Client,
    identity: u64,
    health: AtomicHealth,
    /// Last seen value per tracked capture group, per rule
    last_seen: Mutex<Vec<Vec<String>>>,
}

impl WebTarget {
    pub fn new(config: &ResolvedWebConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        let identity = config
            .content
            .iter()
            .fold(
                IdentityHasher::new()
                    .field(&config.url)
                    .field(&config.channel)
                    .field(config.severity.as_str()),
                |hasher, rule| hasher.field(rule.search.as_str()),
            )
            .finish();

        let last_seen = config
            .content
            .iter()
            .map(|rule| vec![String::new(); rule.check_changes.len()])
            .collect();

        Ok(Self {
            url: config.url.clone(),
            headers: config.headers.clone(),
            rules: config.content.clone(),
            client,
            identity,
            health: AtomicHealth::default(),
            last_seen: Mutex::new(last_seen),
        })
    }

    pub fn health(&self) -> Health {
        self.health.load()
    }

    async fn probe(&self) -> anyhow::Result<bool> {
        let request = self
            .headers
            .iter()
            .fold(self.client.get(&self.url), |request, (name, value)| {
                request.header(name, value)
            });
        let response = request.send().await?;

        if response.status() != StatusCode::OK {
            debug!(url = %self.url, status = %response.status(), "unexpected status");
            return Ok(false);
        }
        if self.rules.is_empty() {
            return Ok(true);
        }

        let body = response.text().await?;
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(evaluate_rules(&self.rules, &body, &mut last_seen))
    }

    fn reset_last_seen(&self) {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        for values in last_seen.iter_mut() {
            values.iter_mut().for_each(String::clear);
        }
    }
}

/// Run every rule against `body`, updating the tracked values. All rules are
/// evaluated so tracked values stay current even when an earlier rule fails.
fn evaluate_rules(rules: &[ResolvedContentRule], body: &str, last_seen: &mut [Vec<String>]) -> bool {
    let mut passed = true;

    for (rule, seen) in rules.iter().zip(last_seen.iter_mut()) {
        if rule.check_changes.is_empty() {
            continue;
        }
        let Some(captures) = rule.search.captures(body) else {
            passed = false;
            continue;
        };

        let mut changed = false;
        for (slot, &group) in rule.check_changes.iter().enumerate() {
            let Some(value) = captures.get(group).map(|m| m.as_str()) else {
                continue;
            };
            if let Some(previous) = seen.get_mut(slot) {
                if previous != value {
                    *previous = value.to_string();
                    changed = true;
                }
            }
        }
        passed &= changed;
    }

    passed
}

#[async_trait]
impl CheckTarget for WebTarget {
    type Status = Health;

    fn identity(&self) -> u64 {
        self.identity
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    fn status(&self) -> Health {
        self.health.load()
    }

    fn restore(&self, status: Health) {
        self.health.store(status);
    }

    async fn check(&self) -> CheckOutcome {
        let current = match self.probe().await {
            Ok(ok) => Health::from_ok(ok),
            Err(e) => {
                warn!(url = %self.url, "web check failed: {e}");
                Health::Unhealthy
            }
        };

        let previous = self.health.swap(current);
        if previous == Health::Unhealthy && current == Health::Healthy {
            self.reset_last_seen();
        }
        CheckOutcome::transition(previous, current, || format!("Site '{}' is down.", self.url))
    }
}

pub type WebMonitor = Monitor<WebTarget>;

impl WebMonitor {
    pub async fn from_config(
        configs: &[ResolvedWebConfig],
        context: &MonitorContext,
    ) -> anyhow::Result<Self> {
        let items = configs
            .iter()
            .map(|config| {
                Ok(ScheduledItem::new(
                    WebTarget::new(config)?,
                    &config.channel,
                    config.severity,
                    config.interval,
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Monitor::start(STATE_KEY, items, context).await)
    }
}
