//! Hercules CLI
//!
//! Command-line interface for the Hercules Lua obfuscation pipeline.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hercules_core::{
    git, HerculesConfig, MethodRegistry, ObfuscationOrchestrator, ObfuscationResult, Preset,
    SyntaxValidator,
};
use hercules_server::{run_server, ServerConfig};

#[derive(Parser)]
#[command(name = "hercules")]
#[command(about = "Drive the Hercules Lua obfuscator")]
#[command(version)]
struct Cli {
    /// Configuration file (default: ./hercules.toml, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Which methods to enable
#[derive(Args, Debug, Clone)]
struct Selection {
    /// Bitkey selecting methods (bit i enables method i, see `hercules methods`)
    #[arg(short, long, allow_negative_numbers = true, conflicts_with = "method")]
    bitkey: Option<i64>,

    /// Method keys to enable (repeatable); default: the default-enabled methods
    #[arg(short, long)]
    method: Vec<String>,

    /// Intensity preset: minimal, moderate or maximum
    #[arg(short, long)]
    preset: Option<Preset>,
}

impl Selection {
    fn bitkey(&self, registry: &MethodRegistry) -> Result<i64> {
        if let Some(bitkey) = self.bitkey {
            return Ok(bitkey);
        }
        if self.method.is_empty() {
            return Ok(registry.default_bitkey());
        }
        Ok(registry.bitkey_for(self.method.as_slice())?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List obfuscation methods and their bits
    Methods,

    /// Show which methods a bitkey selects
    Resolve {
        /// Bitkey to resolve
        #[arg(allow_negative_numbers = true)]
        bitkey: i64,
    },

    /// Check Lua syntax with the configured linter
    Check {
        /// Lua file to check
        file: PathBuf,
    },

    /// Obfuscate a Lua file in place
    Obfuscate {
        /// Lua file to obfuscate
        file: PathBuf,

        #[command(flatten)]
        selection: Selection,
    },

    /// Obfuscate every .lua file in a directory
    ObfuscateDir {
        /// Directory to process (recursively)
        dir: PathBuf,

        #[command(flatten)]
        selection: Selection,

        /// Commit the results (the directory must be a git working copy)
        #[arg(long)]
        commit: bool,

        /// Push after committing
        #[arg(long, requires = "commit")]
        push: bool,

        /// Commit message
        #[arg(long, default_value = git::DEFAULT_COMMIT_MESSAGE)]
        message: String,
    },

    /// Start the HTTP server
    Serve {
        /// Port to listen on (default: from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Stop the running server
    Stop {
        /// Port the server listens on (default: from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show server status
    Status {
        /// Port the server listens on (default: from config)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("hercules=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let config = HerculesConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Methods => cmd_methods(),
        Commands::Resolve { bitkey } => cmd_resolve(bitkey)?,
        Commands::Check { file } => cmd_check(&config, &file)?,
        Commands::Obfuscate { file, selection } => cmd_obfuscate(&config, &file, &selection).await?,
        Commands::ObfuscateDir {
            dir,
            selection,
            commit,
            push,
            message,
        } => cmd_obfuscate_dir(&config, dir, selection, commit, push, message).await?,
        Commands::Serve { port } => cmd_serve(&config, port).await?,
        Commands::Stop { port } => cmd_stop(&config, port).await?,
        Commands::Status { port } => cmd_status(&config, port).await?,
    }

    Ok(())
}

/// Build the pipeline; missing tools end the process
fn orchestrator(config: &HerculesConfig) -> Result<ObfuscationOrchestrator> {
    ObfuscationOrchestrator::new(config).context("Shutting down due to missing tools")
}

fn cmd_methods() {
    let registry = MethodRegistry::builtin();

    println!("{:<4} {:<20} {:<20} {}", "BIT", "KEY", "NAME", "DEFAULT");
    for method in registry.methods() {
        println!(
            "{:<4} {:<20} {:<20} {}",
            method.bit,
            method.key,
            method.name,
            if method.default_enabled { "yes" } else { "no" }
        );
    }
    println!(
        "\nValid bitkeys: 0..={} (default {})",
        registry.max_bitkey(),
        registry.default_bitkey()
    );
    println!(
        "Presets: {}",
        Preset::ALL.map(|p| p.as_str()).join(", ")
    );
}

fn cmd_resolve(bitkey: i64) -> Result<()> {
    let selector = hercules_core::BitkeySelector::default();
    let methods = selector.resolve(bitkey)?;

    if methods.is_empty() {
        println!("Bitkey {} selects no methods.", bitkey);
    } else {
        println!("Bitkey {} selects: {}", bitkey, methods.join(", "));
    }
    Ok(())
}

fn cmd_check(config: &HerculesConfig, file: &Path) -> Result<()> {
    let validator = SyntaxValidator::from_config(config);
    let validation = validator
        .validate_file(file)
        .with_context(|| format!("Failed to run linter on {}", file.display()))?;

    print!("{}", validation.output);
    if !validation.accepted {
        anyhow::bail!("{} has syntax errors", file.display());
    }
    println!("{} passed syntax check.", file.display());
    Ok(())
}

async fn cmd_obfuscate(config: &HerculesConfig, file: &Path, selection: &Selection) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let bitkey = selection.bitkey(orchestrator.registry())?;
    let preset = selection.preset;
    tracing::info!("Obfuscating {} with bitkey {}", file.display(), bitkey);

    let file = file.to_path_buf();
    let (file, result) = tokio::task::spawn_blocking(move || {
        let result = orchestrator.obfuscate(&file, bitkey, preset);
        (file, result)
    })
    .await?;

    report(&file, &result)
}

async fn cmd_obfuscate_dir(
    config: &HerculesConfig,
    dir: PathBuf,
    selection: Selection,
    commit: bool,
    push: bool,
    message: String,
) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let bitkey = selection.bitkey(orchestrator.registry())?;
    let preset = selection.preset;

    let work_dir = dir.clone();
    let outcomes =
        tokio::task::spawn_blocking(move || orchestrator.obfuscate_tree(&work_dir, bitkey, preset))
            .await??;

    let mut failed = 0;
    for outcome in &outcomes {
        if outcome.result.success {
            println!("ok      {}", outcome.path.display());
        } else {
            failed += 1;
            println!("FAILED  {}", outcome.path.display());
            println!("{}", indent(&outcome.result.output));
        }
    }
    println!(
        "\n{} files, {} obfuscated, {} failed",
        outcomes.len(),
        outcomes.len() - failed,
        failed
    );

    if commit {
        if git::commit_all(&dir, &message)? {
            println!("Committed: {}", message);
            if push {
                git::push(&dir)?;
                println!("Pushed changes.");
            }
        } else {
            println!("No changes to commit.");
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, outcomes.len());
    }
    Ok(())
}

fn report(file: &Path, result: &ObfuscationResult) -> Result<()> {
    if !result.output.is_empty() {
        println!("{}", result.output.trim_end());
    }
    match &result.failure {
        None => {
            println!("Obfuscated {}", file.display());
            Ok(())
        }
        Some(kind) => anyhow::bail!("Obfuscation of {} failed: {:?}", file.display(), kind),
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("        {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn server_url(config: &HerculesConfig, port: Option<u16>, path: &str) -> String {
    format!(
        "http://{}:{}{}",
        config.server.host,
        port.unwrap_or(config.server.port),
        path
    )
}

/// Start the HTTP server
async fn cmd_serve(config: &HerculesConfig, port: Option<u16>) -> Result<()> {
    let orchestrator = orchestrator(config)?;
    let mut server_config = ServerConfig::from(&config.server);
    if let Some(port) = port {
        server_config.port = port;
    }

    println!("Starting Hercules server on port {}...", server_config.port);
    println!("Stop with: hercules stop");
    run_server(server_config, orchestrator).await
}

/// Stop the running server
async fn cmd_stop(config: &HerculesConfig, port: Option<u16>) -> Result<()> {
    let client = reqwest::Client::new();

    match client.post(server_url(config, port, "/shutdown")).send().await {
        Ok(response) if response.status().is_success() => {
            println!("Server stopped.");
        }
        Ok(response) => {
            println!("Server refused to stop: {}", response.status());
        }
        Err(_) => {
            println!("Server is not running.");
        }
    }
    Ok(())
}

/// Show server status
async fn cmd_status(config: &HerculesConfig, port: Option<u16>) -> Result<()> {
    let client = reqwest::Client::new();

    match client.get(server_url(config, port, "/health")).send().await {
        Ok(response) => {
            let health: serde_json::Value = response.json().await?;
            println!("Server status: {}", serde_json::to_string_pretty(&health)?);
        }
        Err(_) => {
            println!("Server is not running.");
            println!("Start it with: hercules serve");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_obfuscate() {
        let cli = Cli::try_parse_from([
            "hercules",
            "obfuscate",
            "main.lua",
            "--bitkey",
            "5",
            "--preset",
            "moderate",
        ])
        .unwrap();
        match cli.command {
            Commands::Obfuscate { file, selection } => {
                assert_eq!(file, PathBuf::from("main.lua"));
                assert_eq!(selection.bitkey, Some(5));
                assert_eq!(selection.preset, Some(Preset::Moderate));
            }
            _ => panic!("expected obfuscate"),
        }
    }

    #[test]
    fn test_negative_bitkey_reaches_resolution() {
        let cli = Cli::try_parse_from(["hercules", "resolve", "-1"]).unwrap();
        match cli.command {
            Commands::Resolve { bitkey } => {
                assert_eq!(bitkey, -1);
                assert!(cmd_resolve(bitkey).is_err());
            }
            _ => panic!("expected resolve"),
        }
    }

    #[test]
    fn test_selection_bitkey() {
        let registry = MethodRegistry::builtin();
        let by_key = Selection {
            bitkey: None,
            method: vec!["control_flow".to_string(), "bytecode_encoding".to_string()],
            preset: None,
        };
        assert_eq!(by_key.bitkey(&registry).unwrap(), 0b10001);

        let defaults = Selection {
            bitkey: None,
            method: Vec::new(),
            preset: None,
        };
        assert_eq!(defaults.bitkey(&registry).unwrap(), registry.default_bitkey());

        let unknown = Selection {
            bitkey: None,
            method: vec!["teleport".to_string()],
            preset: None,
        };
        assert!(unknown.bitkey(&registry).is_err());
    }

    #[test]
    fn test_push_requires_commit() {
        assert!(Cli::try_parse_from(["hercules", "obfuscate-dir", "src", "--push"]).is_err());
    }

    #[test]
    fn test_bad_preset() {
        assert!(Cli::try_parse_from(["hercules", "obfuscate", "a.lua", "--preset", "extreme"]).is_err());
    }
}
