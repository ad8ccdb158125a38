//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::{
    HarvestRules, ScanMode, SessionConfig,
    render::{CompilerConfig, DEFAULT_PREAMBLE},
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fragview";
const DEFAULT_COMPILER_PROGRAM: &str = "typst";
const DEFAULT_FORMAT: &str = "svg";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
const DEFAULT_DEBOUNCE_MS: u64 = 300;
const DEFAULT_POLL_MS: u64 = 250;

/// Command-line arguments for the fragview binary.
#[derive(Debug, Parser)]
#[command(
    name = "fragview",
    version,
    about = "Render embedded markup fragments through a content-addressed cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FRAGVIEW_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render every fragment in a file once and list the attached artifacts.
    Render(RenderArgs),
    /// Follow a file, re-rendering fragments after each quiet period.
    Watch(WatchArgs),
    /// Print the cache key and artifact path a fragment would use.
    Key(KeyArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Document to render.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// How often to re-read the file.
    #[arg(long = "poll-ms", value_name = "MILLIS", default_value_t = DEFAULT_POLL_MS)]
    pub poll_ms: u64,

    /// Document to follow.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    #[command(flatten)]
    pub overrides: Overrides,

    /// Fragment source, delimiters included.
    #[arg(long = "fragment", value_name = "TEXT")]
    pub fragment: String,

    /// Document whose global context applies.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the compiler executable.
    #[arg(long = "compiler", value_name = "PATH")]
    pub compiler_program: Option<PathBuf>,

    /// Override the artifact cache directory.
    #[arg(long = "cache-dir", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Override the compile timeout (0 disables it).
    #[arg(long = "timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override the number of compilers allowed to run at once.
    #[arg(long = "max-jobs", value_name = "COUNT")]
    pub max_concurrent_jobs: Option<usize>,

    /// Override the idle delay before a rescan.
    #[arg(long = "debounce-ms", value_name = "MILLIS")]
    pub debounce_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

impl Command {
    pub fn overrides(&self) -> &Overrides {
        match self {
            Command::Render(args) => &args.overrides,
            Command::Watch(args) => &args.overrides,
            Command::Key(args) => &args.overrides,
        }
    }
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub compiler: CompilerSettings,
    pub scan: ScanSettings,
    pub context: HarvestRules,
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
pub struct CompilerSettings {
    pub program: PathBuf,
    pub preamble: String,
    pub format: String,
    pub cache_dir: PathBuf,
    pub scratch_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub max_concurrent_jobs: usize,
}

#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub debounce: Duration,
    pub mode: ScanMode,
}

impl Settings {
    pub fn compiler_config(&self) -> CompilerConfig {
        CompilerConfig {
            program: self.compiler.program.clone(),
            preamble: self.compiler.preamble.clone(),
            cache_dir: self.compiler.cache_dir.clone(),
            format: self.compiler.format.clone(),
            scratch_dir: self.compiler.scratch_dir.clone(),
            timeout: self.compiler.timeout,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            debounce: self.scan.debounce,
            mode: self.scan.mode,
            max_concurrent_jobs: self.compiler.max_concurrent_jobs,
            harvest: self.context.clone(),
        }
    }
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

    builder = builder.add_source(Environment::with_prefix("FRAGVIEW").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(cli.command.overrides());

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    compiler: RawCompilerSettings,
    scan: RawScanSettings,
    context: RawContextSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(program) = overrides.compiler_program.as_ref() {
            self.compiler.program = Some(program.clone());
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.compiler.cache_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.compiler.timeout_seconds = Some(seconds);
        }
        if let Some(max) = overrides.max_concurrent_jobs {
            self.compiler.max_concurrent_jobs = Some(max);
        }
        if let Some(ms) = overrides.debounce_ms {
            self.scan.debounce_ms = Some(ms);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            compiler,
            scan,
            context,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            compiler: build_compiler_settings(compiler)?,
            scan: build_scan_settings(scan)?,
            context: build_context_settings(context)?,
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

fn build_compiler_settings(compiler: RawCompilerSettings) -> Result<CompilerSettings, LoadError> {
    let program = compiler
        .program
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPILER_PROGRAM));
    if program.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "compiler.program",
            "path must not be empty",
        ));
    }

    let format = compiler
        .format
        .map(|value| value.trim().trim_start_matches('.').to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_FORMAT.to_string());
    if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LoadError::invalid(
            "compiler.format",
            "must be a plain file extension such as `svg` or `png`",
        ));
    }

    let cache_dir = compiler.cache_dir.unwrap_or_else(default_cache_dir);
    if cache_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "compiler.cache_dir",
            "path must not be empty",
        ));
    }

    let timeout_seconds = compiler.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
    let timeout = (timeout_seconds > 0).then(|| Duration::from_secs(timeout_seconds));

    let max_concurrent_jobs = compiler
        .max_concurrent_jobs
        .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS);
    if max_concurrent_jobs == 0 {
        return Err(LoadError::invalid(
            "compiler.max_concurrent_jobs",
            "must be greater than zero",
        ));
    }

    Ok(CompilerSettings {
        program,
        preamble: compiler
            .preamble
            .unwrap_or_else(|| DEFAULT_PREAMBLE.to_string()),
        format,
        cache_dir,
        scratch_dir: compiler.scratch_dir,
        timeout,
        max_concurrent_jobs,
    })
}

fn build_scan_settings(scan: RawScanSettings) -> Result<ScanSettings, LoadError> {
    let debounce_ms = scan.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS);
    if debounce_ms == 0 {
        return Err(LoadError::invalid(
            "scan.debounce_ms",
            "must be greater than zero",
        ));
    }

    Ok(ScanSettings {
        debounce: Duration::from_millis(debounce_ms),
        mode: scan.mode.unwrap_or_default(),
    })
}

fn build_context_settings(context: RawContextSettings) -> Result<HarvestRules, LoadError> {
    let defaults = HarvestRules::default();
    let rules = HarvestRules {
        directive_prefix: context.directive_prefix.unwrap_or(defaults.directive_prefix),
        fence_open: context.fence_open.unwrap_or(defaults.fence_open),
        fence_close: context.fence_close.unwrap_or(defaults.fence_close),
        require_declaration_prefix: context
            .require_declaration_prefix
            .unwrap_or(defaults.require_declaration_prefix),
        declaration_keywords: context
            .declaration_keywords
            .unwrap_or(defaults.declaration_keywords),
    };

    if rules.directive_prefix.trim().is_empty() {
        return Err(LoadError::invalid(
            "context.directive_prefix",
            "must not be empty",
        ));
    }
    if !rules.fence_open.is_empty() && rules.fence_close.trim().is_empty() {
        return Err(LoadError::invalid(
            "context.fence_close",
            "must not be empty when fence_open is set",
        ));
    }
    if rules.require_declaration_prefix && rules.declaration_keywords.is_empty() {
        return Err(LoadError::invalid(
            "context.declaration_keywords",
            "must list at least one keyword when require_declaration_prefix is set",
        ));
    }

    Ok(rules)
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("fragview-cache")
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompilerSettings {
    program: Option<PathBuf>,
    preamble: Option<String>,
    format: Option<String>,
    cache_dir: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    timeout_seconds: Option<u64>,
    max_concurrent_jobs: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawScanSettings {
    debounce_ms: Option<u64>,
    mode: Option<ScanMode>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContextSettings {
    directive_prefix: Option<String>,
    fence_open: Option<String>,
    fence_close: Option<String>,
    require_declaration_prefix: Option<bool>,
    declaration_keywords: Option<Vec<String>>,
}

#[cfg(test)]
mod tests;
