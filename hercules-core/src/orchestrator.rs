//! Obfuscation pipeline
//!
//! One attempt walks `Idle -> ResolvingMethods -> Invoking -> Validating`
//! and ends in `Succeeded` or `Failed`:
//!
//! 1. the bitkey is resolved to method switches (bad bitkeys never reach the
//!    external tool),
//! 2. the interpreter runs the obfuscator entry script from the obfuscator's
//!    own directory, rewriting the file in place (`--overwrite`),
//! 3. the rewritten file goes back through the syntax gate.
//!
//! The working directory is handed to the child process; this process never
//! changes its own, so one orchestrator can serve concurrent callers.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::config::HerculesConfig;
use crate::error::Result;
use crate::methods::{MethodRegistry, Preset};
use crate::path_utils::{absolutize, collect_lua_files};
use crate::process;
use crate::selector::BitkeySelector;
use crate::tools::{ToolLocator, ToolPaths};
use crate::validator::SyntaxValidator;

/// Switch telling the obfuscator to rewrite the input file
pub const OVERWRITE_FLAG: &str = "--overwrite";

/// Pipeline state of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    ResolvingMethods,
    Invoking,
    Validating,
    Succeeded,
    Failed,
}

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Bitkey outside `0..=max`; nothing was run
    InvalidBitkey,
    /// Input rejected by the syntax gate before obfuscation (source pipeline only)
    PreObfuscationSyntaxRejected,
    /// The obfuscator exited non-zero
    InvocationFailure { exit_code: Option<i32> },
    /// The obfuscator or the linter was killed after the configured timeout
    TimedOut,
    /// The obfuscator succeeded but its output does not pass the syntax gate
    PostObfuscationSyntaxRejected,
    /// A process could not be started or a file could not be read or written
    Io,
}

/// Terminal value of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObfuscationResult {
    pub success: bool,
    /// Diagnostic text: linter output, captured obfuscator output, or an error message
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ObfuscationResult {
    pub fn succeeded(output: String) -> Self {
        Self {
            success: true,
            output,
            failure: None,
        }
    }

    pub fn failed(kind: FailureKind, output: String) -> Self {
        Self {
            success: false,
            output,
            failure: Some(kind),
        }
    }
}

/// Result of obfuscating an in-memory source buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceObfuscation {
    #[serde(flatten)]
    pub result: ObfuscationResult,
    /// Transformed source, present on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Per-file outcome of a directory run
#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: ObfuscationResult,
}

/// Drives the external obfuscator
#[derive(Debug, Clone)]
pub struct ObfuscationOrchestrator {
    selector: BitkeySelector,
    validator: SyntaxValidator,
    tools: ToolPaths,
    timeout: Option<Duration>,
}

impl ObfuscationOrchestrator {
    /// Build an orchestrator for the built-in method catalog.
    ///
    /// Fails with `ToolNotFound` when the interpreter or the obfuscator is
    /// missing; such an orchestrator would be useless.
    pub fn new(config: &HerculesConfig) -> Result<Self> {
        let tools = ToolLocator::new(&config.tools).locate()?;
        tracing::info!(
            "Using {} with {}",
            tools.interpreter.display(),
            tools.entry_file.display()
        );

        Ok(Self::with_parts(
            BitkeySelector::new(MethodRegistry::builtin()),
            SyntaxValidator::from_config(config),
            tools,
        )
        .with_timeout(config.timeouts.obfuscate()))
    }

    /// Assemble an orchestrator from already-resolved parts
    pub fn with_parts(selector: BitkeySelector, validator: SyntaxValidator, tools: ToolPaths) -> Self {
        Self {
            selector,
            validator,
            tools,
            timeout: None,
        }
    }

    /// Kill the obfuscator after `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn selector(&self) -> &BitkeySelector {
        &self.selector
    }

    pub fn registry(&self) -> &MethodRegistry {
        self.selector.registry()
    }

    pub fn validator(&self) -> &SyntaxValidator {
        &self.validator
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Obfuscator switches: methods in bit order, then the preset, then `--overwrite`
    pub fn build_flags(&self, bitkey: i64, preset: Option<Preset>) -> Result<Vec<String>> {
        let mut flags: Vec<String> = self
            .selector
            .resolve_methods(bitkey)?
            .into_iter()
            .map(|m| m.flag())
            .collect();

        if let Some(preset) = preset {
            flags.push(preset.flag().to_string());
        }
        flags.push(OVERWRITE_FLAG.to_string());

        Ok(flags)
    }

    /// Obfuscate `file_path` in place and re-validate it
    pub fn obfuscate(&self, file_path: &Path, bitkey: i64, preset: Option<Preset>) -> ObfuscationResult {
        let mut stage = Stage::Idle;

        advance(&mut stage, Stage::ResolvingMethods, file_path);
        let flags = match self.build_flags(bitkey, preset) {
            Ok(flags) => flags,
            Err(e) => {
                advance(&mut stage, Stage::Failed, file_path);
                return ObfuscationResult::failed(FailureKind::InvalidBitkey, e.to_string());
            }
        };

        advance(&mut stage, Stage::Invoking, file_path);
        let target = match absolutize(file_path) {
            Ok(path) => path,
            Err(e) => {
                advance(&mut stage, Stage::Failed, file_path);
                return ObfuscationResult::failed(FailureKind::Io, e.to_string());
            }
        };

        let mut args: Vec<OsString> = Vec::with_capacity(flags.len() + 2);
        args.push(self.tools.entry_file.clone().into_os_string());
        args.push(target.clone().into_os_string());
        args.extend(flags.into_iter().map(OsString::from));

        let output = match process::run(
            &self.tools.interpreter,
            &args,
            Some(&self.tools.working_dir),
            self.timeout,
        ) {
            Ok(output) => output,
            Err(e) => {
                advance(&mut stage, Stage::Failed, file_path);
                return ObfuscationResult::failed(
                    FailureKind::Io,
                    format!("Failed to run {}: {}", self.tools.interpreter.display(), e),
                );
            }
        };

        if output.timed_out {
            advance(&mut stage, Stage::Failed, file_path);
            return ObfuscationResult::failed(FailureKind::TimedOut, output.combined());
        }
        if !output.success() {
            advance(&mut stage, Stage::Failed, file_path);
            tracing::warn!(
                "Obfuscator failed on {} (exit code {:?})",
                file_path.display(),
                output.code
            );
            return ObfuscationResult::failed(
                FailureKind::InvocationFailure {
                    exit_code: output.code,
                },
                output.combined(),
            );
        }

        advance(&mut stage, Stage::Validating, file_path);
        match self.validator.validate_file(&target) {
            Ok(validation) if validation.accepted => {
                advance(&mut stage, Stage::Succeeded, file_path);
                tracing::info!("Obfuscated {}", file_path.display());
                ObfuscationResult::succeeded(validation.output)
            }
            Ok(validation) if validation.timed_out => {
                advance(&mut stage, Stage::Failed, file_path);
                ObfuscationResult::failed(FailureKind::TimedOut, validation.output)
            }
            Ok(validation) => {
                advance(&mut stage, Stage::Failed, file_path);
                ObfuscationResult::failed(
                    FailureKind::PostObfuscationSyntaxRejected,
                    validation.output,
                )
            }
            Err(e) => {
                advance(&mut stage, Stage::Failed, file_path);
                ObfuscationResult::failed(FailureKind::Io, e.to_string())
            }
        }
    }

    /// Gate, obfuscate and return an in-memory source buffer.
    ///
    /// The buffer is written to a scratch `.lua` file that is removed on
    /// every path. Input that fails the syntax gate is not obfuscated.
    pub fn obfuscate_source(&self, source: &str, bitkey: i64, preset: Option<Preset>) -> SourceObfuscation {
        if let Err(e) = self.selector.resolve(bitkey) {
            return SourceObfuscation {
                result: ObfuscationResult::failed(FailureKind::InvalidBitkey, e.to_string()),
                source: None,
            };
        }

        let scratch = match write_scratch(source) {
            Ok(file) => file,
            Err(e) => {
                return SourceObfuscation {
                    result: ObfuscationResult::failed(FailureKind::Io, e.to_string()),
                    source: None,
                }
            }
        };

        match self.validator.validate_file(scratch.path()) {
            Ok(validation) if validation.accepted => {}
            Ok(validation) if validation.timed_out => {
                return SourceObfuscation {
                    result: ObfuscationResult::failed(FailureKind::TimedOut, validation.output),
                    source: None,
                }
            }
            Ok(validation) => {
                return SourceObfuscation {
                    result: ObfuscationResult::failed(
                        FailureKind::PreObfuscationSyntaxRejected,
                        validation.output,
                    ),
                    source: None,
                }
            }
            Err(e) => {
                return SourceObfuscation {
                    result: ObfuscationResult::failed(FailureKind::Io, e.to_string()),
                    source: None,
                }
            }
        }

        let result = self.obfuscate(scratch.path(), bitkey, preset);
        if !result.success {
            return SourceObfuscation {
                result,
                source: None,
            };
        }

        match fs::read_to_string(scratch.path()) {
            Ok(transformed) => SourceObfuscation {
                result,
                source: Some(transformed),
            },
            Err(e) => SourceObfuscation {
                result: ObfuscationResult::failed(FailureKind::Io, e.to_string()),
                source: None,
            },
        }
    }

    /// Obfuscate every `.lua` file below `dir`, continuing past failures
    pub fn obfuscate_tree(&self, dir: &Path, bitkey: i64, preset: Option<Preset>) -> Result<Vec<FileOutcome>> {
        self.selector.resolve(bitkey)?;

        let files = collect_lua_files(dir)?;
        tracing::info!("Obfuscating {} files in {}", files.len(), dir.display());

        let outcomes: Vec<FileOutcome> = files
            .into_iter()
            .map(|path| {
                let result = self.obfuscate(&path, bitkey, preset);
                FileOutcome { path, result }
            })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.result.success).count();
        if failed > 0 {
            tracing::warn!("{} of {} files failed", failed, outcomes.len());
        }

        Ok(outcomes)
    }
}

fn advance(stage: &mut Stage, next: Stage, file: &Path) {
    tracing::debug!("{}: {:?} -> {:?}", file.display(), stage, next);
    *stage = next;
}

fn write_scratch(source: &str) -> std::io::Result<tempfile::NamedTempFile> {
    let mut scratch = tempfile::Builder::new()
        .prefix("hercules-")
        .suffix(".lua")
        .tempfile()?;
    scratch.write_all(source.as_bytes())?;
    scratch.flush()?;
    Ok(scratch)
}
