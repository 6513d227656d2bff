use beacon::{AnalyticsConfig, Environment};
use beacon::observability::SinkKind;
use colored::*;
use eyre::{Context, Result, eyre};
use std::fs;
use std::path::PathBuf;

use crate::cli::{ConfigAction, OutputFormat};
use crate::config::{Config, LogLevel};

pub fn run(action: ConfigAction, config_path: Option<&PathBuf>, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show { format } => show(OutputFormat::resolve(format), config),
        ConfigAction::Get { key } => get(&key, config),
        ConfigAction::Set { key, value } => set(&key, &value, config_path, config),
    }
}

fn show(format: OutputFormat, config: &Config) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(config)?);
        }
        OutputFormat::Text => {
            let defaults = AnalyticsConfig::default();
            let analytics = &config.analytics;

            println!("{}", "Beacon Configuration".bold());
            println!();

            println!("  log_level: {}", config.log_level.as_filter());
            println!();

            println!("{}:", "analytics".cyan());
            println!(
                "  batch_interval: {}ms",
                analytics.batch_interval.unwrap_or(defaults.batch_interval)
            );
            println!(
                "  metadata_interval: {}ms",
                analytics.metadata_interval.unwrap_or(defaults.metadata_interval)
            );
            println!(
                "  send_metadata: {}",
                analytics.send_metadata.unwrap_or(defaults.send_metadata)
            );
            println!(
                "  send_metadata_only_when_visible: {}",
                analytics
                    .send_metadata_only_when_visible
                    .unwrap_or(defaults.send_metadata_only_when_visible)
            );
            println!(
                "  environment: {}",
                analytics.environment.unwrap_or(defaults.environment).as_str()
            );
            println!("  debug: {}", analytics.debug.unwrap_or(defaults.debug));
            if let Some(ref extra) = analytics.default_metadata {
                let keys: Vec<&str> = extra.keys().map(String::as_str).collect();
                println!("  default_metadata: {}", keys.join(", "));
            }
            println!();

            println!("{}:", "queue".cyan());
            match config.queue.capacity {
                Some(capacity) => println!("  capacity: {}", capacity),
                None => println!("  capacity: {}", "unbounded".dimmed()),
            }
            println!();

            println!("{}:", "delivery".cyan());
            println!("  sinks: {}", sink_names(&config.delivery.sinks));
            println!(
                "  http_endpoint: {}",
                config.delivery.http_endpoint.as_deref().unwrap_or("(none)")
            );
            println!("  http_timeout: {}ms", config.delivery.http_timeout_ms);
            println!("  events_dir: {}", config.delivery.events_dir.display());
        }
    }

    Ok(())
}

fn sink_names(sinks: &[SinkKind]) -> String {
    sinks
        .iter()
        .map(|s| format!("{:?}", s).to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// Look up a value by dot-notation key
fn lookup(key: &str, config: &Config) -> Option<String> {
    let defaults = AnalyticsConfig::default();
    let analytics = &config.analytics;

    let value = match key {
        "log_level" | "log-level" => config.log_level.as_filter().to_string(),
        "analytics.batch_interval" => analytics.batch_interval.unwrap_or(defaults.batch_interval).to_string(),
        "analytics.metadata_interval" => analytics
            .metadata_interval
            .unwrap_or(defaults.metadata_interval)
            .to_string(),
        "analytics.send_metadata" => analytics.send_metadata.unwrap_or(defaults.send_metadata).to_string(),
        "analytics.send_metadata_only_when_visible" => analytics
            .send_metadata_only_when_visible
            .unwrap_or(defaults.send_metadata_only_when_visible)
            .to_string(),
        "analytics.environment" => analytics.environment.unwrap_or(defaults.environment).as_str().to_string(),
        "analytics.debug" => analytics.debug.unwrap_or(defaults.debug).to_string(),
        "queue.capacity" => config
            .queue
            .capacity
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unbounded".to_string()),
        "delivery.sinks" => sink_names(&config.delivery.sinks),
        "delivery.http_endpoint" => config.delivery.http_endpoint.clone().unwrap_or_default(),
        "delivery.http_timeout_ms" => config.delivery.http_timeout_ms.to_string(),
        "delivery.events_dir" => config.delivery.events_dir.display().to_string(),
        _ => return None,
    };
    Some(value)
}

fn get(key: &str, config: &Config) -> Result<()> {
    match lookup(key, config) {
        Some(v) => println!("{}", v),
        None => {
            eprintln!("{} Unknown config key: {}", "✗".red(), key);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    value.parse().context("Invalid boolean value (use 'true' or 'false')")
}

fn parse_millis(value: &str) -> Result<u64> {
    value.parse().context("Invalid interval (use milliseconds)")
}

/// Apply one key/value pair to a copy of `config`
fn apply(key: &str, value: &str, config: &Config) -> Result<Config> {
    let mut new_config = config.clone();

    match key {
        "log_level" | "log-level" => {
            new_config.log_level =
                serde_yaml::from_str::<LogLevel>(value).map_err(|_| eyre!("Invalid log level: {}", value))?;
        }
        "analytics.batch_interval" => new_config.analytics.batch_interval = Some(parse_millis(value)?),
        "analytics.metadata_interval" => new_config.analytics.metadata_interval = Some(parse_millis(value)?),
        "analytics.send_metadata" => new_config.analytics.send_metadata = Some(parse_bool(value)?),
        "analytics.send_metadata_only_when_visible" => {
            new_config.analytics.send_metadata_only_when_visible = Some(parse_bool(value)?);
        }
        "analytics.environment" => {
            new_config.analytics.environment = Some(
                serde_yaml::from_str::<Environment>(value)
                    .map_err(|_| eyre!("Invalid environment (use 'prod' or 'dev')"))?,
            );
        }
        "analytics.debug" => new_config.analytics.debug = Some(parse_bool(value)?),
        "queue.capacity" => {
            new_config.queue.capacity = match value {
                "unbounded" | "none" => None,
                n => Some(n.parse().context("Invalid capacity")?),
            };
        }
        "delivery.sinks" => {
            new_config.delivery.sinks = value
                .split(',')
                .map(|s| {
                    serde_yaml::from_str::<SinkKind>(s.trim()).map_err(|_| eyre!("Unknown sink: {}", s.trim()))
                })
                .collect::<Result<Vec<_>>>()?;
        }
        "delivery.http_endpoint" => {
            new_config.delivery.http_endpoint = (!value.is_empty()).then(|| value.to_string());
        }
        "delivery.http_timeout_ms" => new_config.delivery.http_timeout_ms = parse_millis(value)?,
        "delivery.events_dir" => new_config.delivery.events_dir = value.into(),
        _ => {
            eyre::bail!("Unknown config key: {}", key);
        }
    }

    Ok(new_config)
}

fn set(key: &str, value: &str, config_path: Option<&PathBuf>, config: &Config) -> Result<()> {
    println!("{} Setting {} = {}", "→".blue(), key.cyan(), value.green());

    let new_config = apply(key, value, config)?;

    let config_path = config_path
        .cloned()
        .unwrap_or_else(|| Config::beacon_dir().join("beacon.yaml"));
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let yaml_str = serde_yaml::to_string(&new_config).context("Failed to serialize config")?;
    fs::write(&config_path, yaml_str).context("Failed to write config file")?;

    println!("  {} Saved to {}", "✓".green(), config_path.display());

    Ok(())
}
