//! Lua syntax gate backed by an external linter (luacheck by default)

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{HerculesConfig, ToolsConfig};
use crate::error::Result;
use crate::process;

/// Linter exit codes that mean "no hard error": clean (0) or warnings only (1)
pub const ACCEPTED_EXIT_CODES: [i32; 2] = [0, 1];

/// Outcome of one lint run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    pub accepted: bool,
    /// Linter stdout, verbatim
    pub output: String,
    /// The linter was killed after the configured timeout; `accepted` is false
    #[serde(default)]
    pub timed_out: bool,
}

/// Runs the linter against Lua source
#[derive(Debug, Clone)]
pub struct SyntaxValidator {
    linter: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl SyntaxValidator {
    pub fn new(linter: impl Into<PathBuf>) -> Self {
        Self {
            linter: linter.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_config(config: &HerculesConfig) -> Self {
        Self::from_tools(&config.tools).with_timeout(config.timeouts.lint())
    }

    pub fn from_tools(tools: &ToolsConfig) -> Self {
        Self::new(tools.linter.clone()).with_args(tools.linter_args.clone())
    }

    /// Arguments placed before the file name
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lint a source buffer through a scratch `.lua` file.
    ///
    /// The scratch file is removed when this returns, whatever the outcome.
    pub fn validate_source(&self, source: &str) -> Result<Validation> {
        let mut scratch = tempfile::Builder::new()
            .prefix("hercules-")
            .suffix(".lua")
            .tempfile()?;
        scratch.write_all(source.as_bytes())?;
        scratch.flush()?;

        self.validate_file(scratch.path())
    }

    /// Lint a file in place. The caller owns the file.
    pub fn validate_file(&self, path: &Path) -> Result<Validation> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        args.push(path.as_os_str().to_os_string());

        let output = process::run(&self.linter, &args, None, self.timeout)?;
        let accepted = !output.timed_out
            && output
                .code
                .map(|code| ACCEPTED_EXIT_CODES.contains(&code))
                .unwrap_or(false);

        if accepted {
            tracing::debug!("{} passed syntax check", path.display());
        } else if output.timed_out {
            tracing::warn!("Linter timed out on {}", path.display());
        } else {
            tracing::warn!(
                "{} failed syntax check (exit code {:?})",
                path.display(),
                output.code
            );
        }

        Ok(Validation {
            accepted,
            output: output.stdout,
            timed_out: output.timed_out,
        })
    }
}

impl Default for SyntaxValidator {
    fn default() -> Self {
        Self::from_tools(&ToolsConfig::default())
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Fake linter: rejects files containing `ndo`, warns on `-- warn`,
    /// and records the path it was given in `seen.txt` next to itself.
    pub(crate) const FAKE_LINTER: &str = r#"
dir=$(dirname "$0")
file="$1"
echo "$file" > "$dir/seen.txt"
if grep -q 'ndo' "$file"; then
    echo "Checking $file 1 error"
    exit 2
fi
if grep -q -- '-- warn' "$file"; then
    echo "Checking $file 1 warning"
    exit 1
fi
echo "Checking $file OK"
exit 0
"#;

    pub(crate) fn fake_validator(dir: &Path) -> SyntaxValidator {
        let script = dir.join("lint.sh");
        fs::write(&script, FAKE_LINTER).unwrap();
        SyntaxValidator::new("sh").with_args(vec![script.to_string_lossy().into_owned()])
    }

    const VALID: &str = "local function add(a, b)\n    return a + b\nend\nprint(add(1, 2))\n";
    const BROKEN: &str = "for i = 1, ndo\n    print(i)\nend\n";

    #[test]
    fn test_valid_source_is_accepted() {
        let dir = TempDir::new().unwrap();
        let validator = fake_validator(dir.path());

        let result = validator.validate_source(VALID).unwrap();
        assert!(result.accepted);
        assert!(result.output.contains("OK"));
    }

    #[test]
    fn test_broken_source_is_rejected() {
        let dir = TempDir::new().unwrap();
        let validator = fake_validator(dir.path());

        let result = validator.validate_source(BROKEN).unwrap();
        assert!(!result.accepted);
        assert!(result.output.contains("1 error"));
    }

    #[test]
    fn test_warnings_are_accepted() {
        let dir = TempDir::new().unwrap();
        let validator = fake_validator(dir.path());

        let result = validator.validate_source("local x = 1 -- warn\n").unwrap();
        assert!(result.accepted);
        assert!(result.output.contains("1 warning"));
    }

    #[test]
    fn test_scratch_file_is_removed() {
        let dir = TempDir::new().unwrap();
        let validator = fake_validator(dir.path());

        for source in [VALID, BROKEN] {
            validator.validate_source(source).unwrap();
            let seen = fs::read_to_string(dir.path().join("seen.txt")).unwrap();
            let scratch = PathBuf::from(seen.trim());
            assert!(scratch.extension().map(|e| e == "lua").unwrap_or(false));
            assert!(!scratch.exists(), "{} was left behind", scratch.display());
        }
    }

    #[test]
    fn test_validate_file_keeps_file() {
        let dir = TempDir::new().unwrap();
        let validator = fake_validator(dir.path());
        let path = dir.path().join("script.lua");
        fs::write(&path, VALID).unwrap();

        let result = validator.validate_file(&path).unwrap();
        assert!(result.accepted);
        assert!(path.exists());
        let seen = fs::read_to_string(dir.path().join("seen.txt")).unwrap();
        assert_eq!(seen.trim(), path.to_string_lossy());
    }

    #[test]
    fn test_missing_linter_is_an_error() {
        let validator = SyntaxValidator::new("hercules-no-such-linter");
        assert!(validator.validate_source(VALID).is_err());
    }

    #[test]
    fn test_linter_timeout_is_flagged() {
        let validator = SyntaxValidator::new("sh")
            .with_args(vec!["-c".into(), "sleep 5".into(), "sh".into()])
            .with_timeout(Some(Duration::from_millis(200)));
        let result = validator.validate_file(Path::new("slow.lua")).unwrap();
        assert!(!result.accepted);
        assert!(result.timed_out);
    }

    #[test]
    fn test_non_utf8_path_reaches_linter() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let dir = TempDir::new().unwrap();
        let validator = SyntaxValidator::new("sh").with_args(vec![
            "-c".into(),
            "grep -q ndo \"$1\" && exit 2; exit 0".into(),
            "sh".into(),
        ]);
        let path = dir.path().join(OsString::from_vec(b"caf\xE9.lua".to_vec()));
        fs::write(&path, BROKEN).unwrap();

        let result = validator.validate_file(&path).unwrap();
        assert!(!result.accepted);
        assert!(!result.timed_out);
    }

    #[test]
    fn test_other_exit_codes_are_rejected() {
        let validator = SyntaxValidator::new("sh").with_args(vec!["-c".into(), "exit 3".into(), "sh".into()]);
        let result = validator.validate_file(Path::new("whatever.lua")).unwrap();
        assert!(!result.accepted);
    }
}
