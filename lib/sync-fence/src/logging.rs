// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Optional `tracing` subscriber for binaries and tests using fences.
//!
//! - Configuration loaded from:
//!   1. Environment variables (highest priority).
//!   2. Optional TOML file pointed to by the `FENCE_LOGGING_CONFIG_PATH` environment variable.
//!
//! Output is compact and human readable by default; set `FENCE_LOGGING_JSONL=1` for JSON
//! lines. Filters come from the `FENCE_LOG` environment variable (standard `EnvFilter`
//! syntax) plus the `log_filters` table of the TOML file.
//!
//! Example:
//! ```toml
//! log_level = "warn"
//!
//! [log_filters]
//! "sync_fence::wait" = "trace"
//! ```
//!
//! Libraries should not call [`init`]; fence lifecycle events are emitted with
//! `tracing` regardless and go wherever the application's subscriber sends them.

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// ENV used to set the log filter
const FILTER_ENV: &str = "FENCE_LOG";

/// ENV used to set the path to the logging configuration file
const CONFIG_PATH_ENV: &str = "FENCE_LOGGING_CONFIG_PATH";

/// ENV used to switch to JSON lines output
const JSONL_ENV: &str = "FENCE_LOGGING_JSONL";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "info";

static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct LoggingConfig {
    log_level: String,
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::new(),
        }
    }
}

/// Install a global subscriber once per process.
///
/// Does nothing if another global subscriber is already installed.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let filter_layer = filters(load_config());
    let installed = if jsonl_logging_enabled() {
        let l = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    } else {
        let l = fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(filter_layer);
        tracing_subscriber::registry().with(l).try_init()
    };

    if let Err(e) = installed {
        eprintln!("fence logging not installed: {e}");
    }
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config
        .log_level
        .parse::<Directive>()
        .unwrap_or_else(|e| {
            eprintln!("Invalid log level '{}': {e}", config.log_level);
            LevelFilter::INFO.into()
        });

    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    // apply the log_filters from the config file
    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> LoggingConfig {
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();
    let figment = Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file(config_path));

    figment.extract().unwrap_or_else(|e| {
        eprintln!("Failed loading logging config: {e}");
        LoggingConfig::default()
    })
}

fn jsonl_logging_enabled() -> bool {
    std::env::var(JSONL_ENV).is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}
