//! Hercules Core Library
//!
//! This crate drives the external Hercules Lua obfuscator:
//! - Method catalog and bitkey resolution
//! - External tool discovery (Lua 5.4 interpreter, obfuscator entry point)
//! - Syntax gate backed by an external linter
//! - The obfuscation pipeline itself
//! - Configuration and the local git workflow around it

pub mod config;
pub mod error;
pub mod git;
pub mod methods;
pub mod orchestrator;
pub mod path_utils;
pub mod process;
pub mod selector;
pub mod tools;
pub mod validator;

// Re-export commonly used types
pub use config::{HerculesConfig, ServerSettings, TimeoutConfig, ToolsConfig};
pub use error::{HerculesError, Result};
pub use methods::{BuiltinMethod, Method, MethodRegistry, Preset};
pub use orchestrator::{
    FailureKind, FileOutcome, ObfuscationOrchestrator, ObfuscationResult, SourceObfuscation, Stage,
};
pub use path_utils::{absolutize, collect_lua_files, is_lua_file};
pub use selector::BitkeySelector;
pub use tools::{ToolLocator, ToolPaths};
pub use validator::{SyntaxValidator, Validation};
