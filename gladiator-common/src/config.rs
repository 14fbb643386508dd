//! Configuration loading and result root resolution
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--result-root, --port)
//! 2. Environment variables (GLADIATOR_RESULT_ROOT)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)
//!
//! A missing or unreadable TOML file never aborts startup: a warning is
//! logged and the built-in defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the result root
pub const RESULT_ROOT_ENV: &str = "GLADIATOR_RESULT_ROOT";

/// Environment variable naming an explicit TOML config file
pub const CONFIG_FILE_ENV: &str = "GLADIATOR_CONFIG";

/// Bootstrap configuration loaded from TOML file
///
/// Cannot change while the service is running.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TomlConfig {
    /// Folder holding one working directory per job
    #[serde(default)]
    pub result_root: Option<PathBuf>,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// HTTP bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Scheduling knobs for the job registry and stage runner
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Locations of external analysis tools
    #[serde(default)]
    pub tools: ToolPaths,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            result_root: None,
            port: default_port(),
            bind_address: default_bind_address(),
            logging: LoggingConfig::default(),
            pipeline: PipelineSettings::default(),
            tools: ToolPaths::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Scheduling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineSettings {
    /// Upper bound on cancellation latency for in-process stages
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval of the registry housekeeping task
    #[serde(default = "default_housekeeping_interval_secs")]
    pub housekeeping_interval_secs: u64,

    /// Buffered pipeline events before slow SSE clients start lagging
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl PipelineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_secs(self.housekeeping_interval_secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            housekeeping_interval_secs: default_housekeeping_interval_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Installation paths of the external tools the pipeline drives
///
/// Tools without an entry here (OpenMS, pyprophet, msproteomicstools) are
/// resolved through `PATH`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Templates, iRT files and helper scripts
    pub share_dir: PathBuf,
    /// Trans-Proteomic Pipeline binaries (xinteract, spectrast, Mayu.pl ...)
    pub tpp_bin: PathBuf,
    pub comet: PathBuf,
    pub tandem: PathBuf,
    pub dia_umpire_jar: PathBuf,
    /// Wine prefix holding ProteoWizard; msconvert is used for RAW files when it exists
    pub wine_prefix: PathBuf,
    pub thermo_raw_parser_dir: PathBuf,
    pub thermo_raw_parser_url: String,
    /// Scratch folder for the ThermoRawFileParser download
    pub download_dir: PathBuf,
}

impl ToolPaths {
    /// Path of a Trans-Proteomic Pipeline binary
    pub fn tpp(&self, name: &str) -> PathBuf {
        self.tpp_bin.join(name)
    }

    /// Path of a file shipped in the share directory
    pub fn share(&self, name: &str) -> PathBuf {
        self.share_dir.join(name)
    }

    pub fn thermo_raw_parser_exe(&self) -> PathBuf {
        self.thermo_raw_parser_dir.join("ThermoRawFileParser.exe")
    }

    /// Location of the downloaded ThermoRawFileParser archive
    pub fn thermo_raw_parser_archive(&self) -> PathBuf {
        let name = self
            .thermo_raw_parser_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("ThermoRawFileParser.zip");
        self.download_dir.join(name)
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            share_dir: PathBuf::from("/opt/gladiator"),
            tpp_bin: PathBuf::from("/opt/tpp/bin"),
            comet: PathBuf::from("/opt/comet/comet-ms"),
            tandem: PathBuf::from("/opt/tandem/tandem"),
            dia_umpire_jar: PathBuf::from("/opt/dia-umpire/DIA_Umpire_SE.jar"),
            wine_prefix: PathBuf::from("/wineprefix64"),
            thermo_raw_parser_dir: PathBuf::from("/opt/ThermoRawFileParser"),
            thermo_raw_parser_url: "https://github.com/compomics/ThermoRawFileParser/releases/download/v1.3.4/ThermoRawFileParser.zip".to_string(),
            download_dir: PathBuf::from("/root"),
        }
    }
}

fn default_port() -> u16 {
    5780
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_housekeeping_interval_secs() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    256
}

/// Built-in result root used when nothing else is configured
pub fn default_result_root() -> PathBuf {
    PathBuf::from("/run-files")
}

impl TomlConfig {
    /// Load configuration from an explicit TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load configuration, falling back to defaults on any problem
    ///
    /// `explicit` takes precedence over `GLADIATOR_CONFIG` and the platform
    /// config locations.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from))
            .or_else(locate_config_file);

        let Some(path) = path else {
            info!("No config file found, using built-in defaults");
            return Self::default();
        };

        match Self::load(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write configuration as TOML, creating parent folders
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Locate the default configuration file for the platform
///
/// Tries `~/.config/gladiator/config.toml`, then `/etc/gladiator/config.toml`.
pub fn locate_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("gladiator").join("config.toml"));
    if let Some(path) = user_config {
        if path.is_file() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/gladiator/config.toml");
    if cfg!(unix) && system_config.is_file() {
        return Some(system_config);
    }

    None
}

/// Resolves the result root following the settings priority order
pub struct ResultRootResolver<'a> {
    cli_arg: Option<PathBuf>,
    toml: Option<&'a TomlConfig>,
}

impl<'a> ResultRootResolver<'a> {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, toml: &'a TomlConfig) -> Self {
        self.toml = Some(toml);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(RESULT_ROOT_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml.and_then(|t| t.result_root.clone()) {
            return path;
        }

        default_result_root()
    }
}

impl Default for ResultRootResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates the result root on startup
pub struct ResultRootInitializer {
    root: PathBuf,
}

impl ResultRootInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the folder if missing; safe to call repeatedly
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            info!("Creating result root {}", self.root.display());
            std::fs::create_dir_all(&self.root)?;
        } else if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "Result root is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
