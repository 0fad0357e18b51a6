//! Configuration loaded from `hercules.toml`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::path_utils::absolutize;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "hercules.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HerculesConfig {
    /// Where to find the interpreter, obfuscator and linter
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Limits for external processes
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// HTTP service settings
    #[serde(default)]
    pub server: ServerSettings,
}

/// External tool discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Interpreter names to try, in order. Only the last one is version-checked.
    #[serde(default = "default_interpreter_candidates")]
    pub interpreter_candidates: Vec<String>,
    /// Text that must appear in `<interpreter> -v` for the generic candidate
    #[serde(default = "default_required_version")]
    pub required_version: String,
    /// Obfuscator installation directory, relative to the installation root
    #[serde(default = "default_obfuscator_dir")]
    pub obfuscator_dir: PathBuf,
    /// Entry point inside the obfuscator directory
    #[serde(default = "default_entry_file")]
    pub entry_file: String,
    /// Syntax linter program
    #[serde(default = "default_linter")]
    pub linter: PathBuf,
    /// Extra arguments passed to the linter before the file name
    #[serde(default)]
    pub linter_args: Vec<String>,
    /// Directory relative tool paths resolve against: the config file's
    /// directory when loaded from one, otherwise the executable's directory
    #[serde(skip)]
    pub root: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            interpreter_candidates: default_interpreter_candidates(),
            required_version: default_required_version(),
            obfuscator_dir: default_obfuscator_dir(),
            entry_file: default_entry_file(),
            linter: default_linter(),
            linter_args: Vec::new(),
            root: None,
        }
    }
}

fn default_interpreter_candidates() -> Vec<String> {
    vec!["lua54".to_string(), "lua5.4".to_string(), "lua".to_string()]
}

fn default_required_version() -> String {
    "5.4".to_string()
}

fn default_obfuscator_dir() -> PathBuf {
    PathBuf::from("Obfuscator").join("src")
}

fn default_entry_file() -> String {
    "hercules.lua".to_string()
}

fn default_linter() -> PathBuf {
    PathBuf::from("luacheck")
}

/// Process time limits in seconds; 0 disables the limit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default)]
    pub obfuscate_secs: u64,
    #[serde(default)]
    pub lint_secs: u64,
}

impl TimeoutConfig {
    pub fn obfuscate(&self) -> Option<Duration> {
        non_zero_secs(self.obfuscate_secs)
    }

    pub fn lint(&self) -> Option<Duration> {
        non_zero_secs(self.lint_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// HTTP service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    44756
}

impl HerculesConfig {
    /// Load configuration from a TOML file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: HerculesConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        config.tools.root = Some(absolutize(dir)?);
        Ok(config)
    }

    /// Resolve the configuration to use.
    ///
    /// An explicit path must exist. Otherwise `./hercules.toml` is tried,
    /// then `<config dir>/hercules/hercules.toml`, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_config_file(path);
        }

        match find_config_file(Path::new(".")) {
            Some(path) => {
                tracing::debug!("Using config file {}", path.display());
                Self::from_config_file(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Find a config file in `dir` or in the user's config directory
pub fn find_config_file(dir: &Path) -> Option<PathBuf> {
    let local = dir.join(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }

    dirs::config_dir()
        .map(|config| config.join("hercules").join(CONFIG_FILE_NAME))
        .filter(|path| path.is_file())
}
