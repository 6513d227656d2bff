//! Provider configuration and its resolution from caller overrides

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::event::Metadata;
use super::host::EnvironmentSnapshot;

pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_METADATA_INTERVAL_MS: u64 = 5000;

/// Deployment environment; `dev` turns on lifecycle diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Prod,
    Dev,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Dev => "dev",
        }
    }
}

/// Fully resolved configuration, fixed for one provider activation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Flush period in milliseconds
    pub batch_interval: u64,
    /// Heartbeat period in milliseconds
    pub metadata_interval: u64,
    pub send_metadata: bool,
    pub send_metadata_only_when_visible: bool,
    pub environment: Environment,
    /// Trace every built envelope
    pub debug: bool,
    pub default_metadata: Metadata,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            batch_interval: DEFAULT_BATCH_INTERVAL_MS,
            metadata_interval: DEFAULT_METADATA_INTERVAL_MS,
            send_metadata: true,
            send_metadata_only_when_visible: false,
            environment: Environment::default(),
            debug: false,
            default_metadata: Metadata::new(),
        }
    }
}

impl AnalyticsConfig {
    pub fn batch_period(&self) -> Duration {
        Duration::from_millis(self.batch_interval)
    }

    pub fn metadata_period(&self) -> Duration {
        Duration::from_millis(self.metadata_interval)
    }

    pub fn is_dev(&self) -> bool {
        self.environment == Environment::Dev
    }

    /// Whether switching to `other` requires restarting the timers
    pub fn schedule_differs(&self, other: &AnalyticsConfig) -> bool {
        self.batch_interval != other.batch_interval
            || self.metadata_interval != other.metadata_interval
            || self.send_metadata != other.send_metadata
            || self.send_metadata_only_when_visible != other.send_metadata_only_when_visible
            || self.environment != other.environment
    }
}

/// Caller-supplied partial configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_metadata: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_metadata_only_when_visible: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    /// Layered onto the environment snapshot, key by key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_metadata: Option<Metadata>,
}

impl ConfigOverrides {
    /// Stack `top` over `self`; fields set in `top` win
    pub fn overlay(self, top: &ConfigOverrides) -> Self {
        let default_metadata = match (self.default_metadata, &top.default_metadata) {
            (Some(mut base), Some(extra)) => {
                base.extend(extra.clone());
                Some(base)
            }
            (base, extra) => extra.clone().or(base),
        };

        Self {
            batch_interval: top.batch_interval.or(self.batch_interval),
            metadata_interval: top.metadata_interval.or(self.metadata_interval),
            send_metadata: top.send_metadata.or(self.send_metadata),
            send_metadata_only_when_visible: top
                .send_metadata_only_when_visible
                .or(self.send_metadata_only_when_visible),
            environment: top.environment.or(self.environment),
            debug: top.debug.or(self.debug),
            default_metadata,
        }
    }
}

/// Merge `overrides` over the documented defaults.
///
/// The default metadata is always a fresh environment snapshot; caller-supplied
/// `default_metadata` entries replace matching keys and add new ones.
pub fn resolve(overrides: Option<&ConfigOverrides>, environment: &dyn EnvironmentSnapshot) -> AnalyticsConfig {
    let defaults = AnalyticsConfig::default();
    let mut default_metadata = environment.snapshot().into_metadata();

    let Some(overrides) = overrides else {
        return AnalyticsConfig {
            default_metadata,
            ..defaults
        };
    };

    if let Some(extra) = &overrides.default_metadata {
        default_metadata.extend(extra.clone());
    }

    AnalyticsConfig {
        batch_interval: overrides.batch_interval.unwrap_or(defaults.batch_interval),
        metadata_interval: overrides.metadata_interval.unwrap_or(defaults.metadata_interval),
        send_metadata: overrides.send_metadata.unwrap_or(defaults.send_metadata),
        send_metadata_only_when_visible: overrides
            .send_metadata_only_when_visible
            .unwrap_or(defaults.send_metadata_only_when_visible),
        environment: overrides.environment.unwrap_or(defaults.environment),
        debug: overrides.debug.unwrap_or(defaults.debug),
        default_metadata,
    }
}
