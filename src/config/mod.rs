//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::BTreeSet, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    application::render::{RenderOptions, RenderTimings, Verbosity},
    domain::document::normalize_logical_path,
};

mod cli;

pub use cli::{CliArgs, Command, ExportOverrides, RenderArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vaultpress";
const ENV_PREFIX: &str = "VAULTPRESS";
const DEFAULT_VAULT_ROOT: &str = ".";
const DEFAULT_OUTPUT_DIR: &str = "site";
const DEFAULT_ATTACH_TIMEOUT_MS: u64 = 2000;
const DEFAULT_SECTION_TIMEOUT_MS: u64 = 2000;
const DEFAULT_SETTLE_TIMEOUT_MS: u64 = 500;
const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub export: ExportSettings,
    pub timings: RenderTimings,
    pub vault: VaultSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub verbosity: Verbosity,
    pub files_to_export: BTreeSet<String>,
    pub inline_html: bool,
    pub display_progress: bool,
    pub make_headers_trees: bool,
}

impl ExportSettings {
    /// Session-wide render defaults derived from these settings.
    pub fn render_defaults(&self) -> RenderOptions {
        RenderOptions {
            inline_html: self.inline_html,
            display_progress: self.display_progress,
            make_headers_trees: self.make_headers_trees,
            files_to_export: self.files_to_export.clone(),
            ..RenderOptions::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub root: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("export.files_to_export")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command_or_default() {
        Command::Render(args) => raw.apply_export_overrides(&args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration from the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    use clap::Parser;

    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    export: RawExportSettings,
    timings: RawTimingSettings,
    vault: RawVaultSettings,
}

impl RawSettings {
    fn apply_export_overrides(&mut self, overrides: &ExportOverrides) {
        if let Some(vault) = overrides.vault.as_ref() {
            self.vault.root = Some(vault.clone());
        }
        if let Some(dir) = overrides.output_dir.as_ref() {
            self.vault.output_dir = Some(dir.clone());
        }
        if let Some(inline) = overrides.inline_html {
            self.export.inline_html = Some(inline);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(verbosity) = overrides.verbosity.as_ref() {
            self.export.verbosity = Some(verbosity.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            export,
            timings,
            vault,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            export: build_export_settings(export)?,
            timings: build_timings(timings)?,
            vault: build_vault_settings(vault)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_export_settings(export: RawExportSettings) -> Result<ExportSettings, LoadError> {
    let verbosity = match export.verbosity {
        Some(value) => Verbosity::from_str(&value)
            .map_err(|reason| LoadError::invalid("export.verbosity", reason))?,
        None => Verbosity::default(),
    };

    let files_to_export = export
        .files_to_export
        .unwrap_or_default()
        .iter()
        .map(|path| {
            normalize_logical_path(path)
                .map_err(|err| LoadError::invalid("export.files_to_export", err.to_string()))
        })
        .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(ExportSettings {
        verbosity,
        files_to_export,
        inline_html: export.inline_html.unwrap_or(false),
        display_progress: export.display_progress.unwrap_or(true),
        make_headers_trees: export.make_headers_trees.unwrap_or(true),
    })
}

fn build_timings(timings: RawTimingSettings) -> Result<RenderTimings, LoadError> {
    let attach_ms = positive_ms(
        timings.attach_timeout_ms,
        DEFAULT_ATTACH_TIMEOUT_MS,
        "timings.attach_timeout_ms",
    )?;
    let section_ms = positive_ms(
        timings.section_timeout_ms,
        DEFAULT_SECTION_TIMEOUT_MS,
        "timings.section_timeout_ms",
    )?;
    let settle_timeout_ms = positive_ms(
        timings.settle_timeout_ms,
        DEFAULT_SETTLE_TIMEOUT_MS,
        "timings.settle_timeout_ms",
    )?;
    let settle_delay_ms = positive_ms(
        timings.settle_delay_ms,
        DEFAULT_SETTLE_DELAY_MS,
        "timings.settle_delay_ms",
    )?;
    let poll_ms = positive_ms(
        timings.poll_interval_ms,
        DEFAULT_POLL_INTERVAL_MS,
        "timings.poll_interval_ms",
    )?;

    let shortest_timeout = attach_ms.min(section_ms).min(settle_timeout_ms);
    if poll_ms > shortest_timeout {
        return Err(LoadError::invalid(
            "timings.poll_interval_ms",
            format!("must not exceed the shortest timeout ({shortest_timeout} ms)"),
        ));
    }

    Ok(RenderTimings {
        attach_timeout: Duration::from_millis(attach_ms),
        section_timeout: Duration::from_millis(section_ms),
        settle_timeout: Duration::from_millis(settle_timeout_ms),
        settle_delay: Duration::from_millis(settle_delay_ms),
        poll_interval: Duration::from_millis(poll_ms),
    })
}

fn build_vault_settings(vault: RawVaultSettings) -> Result<VaultSettings, LoadError> {
    let root = vault
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_VAULT_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("vault.root", "must not be empty"));
    }

    let output_dir = vault
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    if output_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid("vault.output_dir", "must not be empty"));
    }

    Ok(VaultSettings { root, output_dir })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExportSettings {
    verbosity: Option<String>,
    files_to_export: Option<Vec<String>>,
    inline_html: Option<bool>,
    display_progress: Option<bool>,
    make_headers_trees: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTimingSettings {
    attach_timeout_ms: Option<u64>,
    section_timeout_ms: Option<u64>,
    settle_timeout_ms: Option<u64>,
    settle_delay_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVaultSettings {
    root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
}

fn positive_ms(value: Option<u64>, default: u64, key: &'static str) -> Result<u64, LoadError> {
    let value = value.unwrap_or(default);
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}
