//! External tool discovery
//!
//! The pipeline needs a Lua 5.4 interpreter and the obfuscator's entry
//! script. Both are looked up once, when the orchestrator is built; a missing
//! tool is fatal because nothing else can work without it.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::ToolsConfig;
use crate::error::{HerculesError, Result};
use crate::process;

/// Resolved locations of the external tools
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPaths {
    /// Interpreter executable
    pub interpreter: PathBuf,
    /// Absolute path of the obfuscator entry script
    pub entry_file: PathBuf,
    /// Absolute directory the obfuscator must run from
    pub working_dir: PathBuf,
}

/// Finds the interpreter and obfuscator on this machine
#[derive(Debug, Clone)]
pub struct ToolLocator {
    interpreter_candidates: Vec<String>,
    required_version: String,
    obfuscator_dir: PathBuf,
    entry_file: String,
    /// Installation root that a relative `obfuscator_dir` hangs off
    root: Option<PathBuf>,
    /// Overrides `PATH` for the interpreter lookup
    search_path: Option<OsString>,
}

impl ToolLocator {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            interpreter_candidates: config.interpreter_candidates.clone(),
            required_version: config.required_version.clone(),
            obfuscator_dir: config.obfuscator_dir.clone(),
            entry_file: config.entry_file.clone(),
            root: config.root.clone().or_else(install_root),
            search_path: None,
        }
    }

    /// Resolve a relative `obfuscator_dir` against `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Where the obfuscator is expected, before canonicalisation
    pub fn obfuscator_dir(&self) -> PathBuf {
        match &self.root {
            Some(root) if self.obfuscator_dir.is_relative() => root.join(&self.obfuscator_dir),
            _ => self.obfuscator_dir.clone(),
        }
    }

    /// Search these directories instead of `PATH`
    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    /// Find the interpreter.
    ///
    /// Candidates are tried in order and the first hit wins. When only the
    /// last, generic candidate resolves, it must also report the required
    /// version from `-v`.
    pub fn locate_interpreter(&self) -> Option<PathBuf> {
        let last = self.interpreter_candidates.len().checked_sub(1)?;

        for (i, name) in self.interpreter_candidates.iter().enumerate() {
            let Some(path) = self.which(name) else {
                continue;
            };

            if i == last && i > 0 && !self.reports_required_version(&path) {
                tracing::debug!(
                    "{} does not report version {}",
                    path.display(),
                    self.required_version
                );
                return None;
            }

            tracing::debug!("Using interpreter {}", path.display());
            return Some(path);
        }

        None
    }

    /// Find the obfuscator directory and its entry script
    pub fn locate_obfuscator(&self) -> Option<(PathBuf, PathBuf)> {
        let dir = self.obfuscator_dir();
        let entry = dir.join(&self.entry_file);
        if !entry.is_file() {
            tracing::debug!("No obfuscator entry at {}", entry.display());
            return None;
        }

        let dir = dir.canonicalize().ok()?;
        let entry = dir.join(&self.entry_file);
        Some((dir, entry))
    }

    /// Resolve both tools or fail
    pub fn locate(&self) -> Result<ToolPaths> {
        let interpreter = self.locate_interpreter().ok_or_else(|| {
            tracing::error!("Could not find Lua {}", self.required_version);
            HerculesError::ToolNotFound(format!(
                "Lua {} interpreter (tried {})",
                self.required_version,
                self.interpreter_candidates.join(", ")
            ))
        })?;

        let (working_dir, entry_file) = self.locate_obfuscator().ok_or_else(|| {
            tracing::error!("Could not find Obfuscator");
            HerculesError::ToolNotFound(format!(
                "obfuscator entry point {}",
                self.obfuscator_dir().join(&self.entry_file).display()
            ))
        })?;

        Ok(ToolPaths {
            interpreter,
            entry_file,
            working_dir,
        })
    }

    fn which(&self, name: &str) -> Option<PathBuf> {
        match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().ok()?;
                which::which_in(name, Some(paths), cwd).ok()
            }
            None => which::which(name).ok(),
        }
    }

    fn reports_required_version(&self, interpreter: &Path) -> bool {
        match process::run(interpreter, &["-v"], None, None) {
            Ok(output) => {
                output.stdout.contains(&self.required_version)
                    || output.stderr.contains(&self.required_version)
            }
            Err(e) => {
                tracing::warn!("Failed to query {} version: {}", interpreter.display(), e);
                false
            }
        }
    }
}

/// Directory holding the running executable
fn install_root() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(Path::to_path_buf)
}

impl Default for ToolLocator {
    fn default() -> Self {
        Self::new(&ToolsConfig::default())
    }
}
