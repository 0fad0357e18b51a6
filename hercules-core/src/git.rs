//! Git integration
//!
//! Commits obfuscated files in a local working copy and pushes them back to
//! the remote it was cloned from. Everything goes through the `git` CLI.

use std::path::Path;
use std::process::{Command, Output};

use crate::error::{HerculesError, Result};

/// Commit message used for obfuscation runs
pub const DEFAULT_COMMIT_MESSAGE: &str = "Automated commit: Obfuscated .lua files";

/// Whether `project_dir` is the root of a git working copy
pub fn is_repository(project_dir: &Path) -> bool {
    project_dir.join(".git").exists()
}

/// Whether the working copy has staged, unstaged or untracked changes
pub fn has_changes(project_dir: &Path) -> Result<bool> {
    ensure_repository(project_dir)?;

    let output = git(project_dir, &["status", "--porcelain"])?;
    Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
}

/// Stage everything and commit it.
///
/// Returns `false` without committing when there is nothing to commit.
pub fn commit_all(project_dir: &Path, message: &str) -> Result<bool> {
    ensure_repository(project_dir)?;

    git(project_dir, &["add", "-A"])?;

    if !has_changes(project_dir)? {
        tracing::info!("No changes to commit.");
        return Ok(false);
    }

    git(project_dir, &["commit", "-m", message])?;
    tracing::info!("Committed changes in {}", project_dir.display());
    Ok(true)
}

/// Push the current branch to its upstream
pub fn push(project_dir: &Path) -> Result<String> {
    ensure_repository(project_dir)?;

    let output = git(project_dir, &["push"])?;
    // git reports push progress on stderr
    Ok(String::from_utf8_lossy(&output.stderr).to_string())
}

fn ensure_repository(project_dir: &Path) -> Result<()> {
    if is_repository(project_dir) {
        Ok(())
    } else {
        Err(HerculesError::Git(format!(
            "Not a git repository: {}",
            project_dir.display()
        )))
    }
}

fn git(project_dir: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .args(args)
        .current_dir(project_dir)
        .output()
        .map_err(|e| HerculesError::Git(format!("Failed to run git {}: {}", args[0], e)))?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(HerculesError::Git(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) {
        git(dir, &["init", "-q"]).unwrap();
        git(dir, &["config", "user.email", "bot@example.com"]).unwrap();
        git(dir, &["config", "user.name", "Hercules Bot"]).unwrap();
    }

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_not_a_repository() {
        let temp_dir = TempDir::new().unwrap();
        assert!(!is_repository(temp_dir.path()));
        assert!(matches!(
            commit_all(temp_dir.path(), DEFAULT_COMMIT_MESSAGE),
            Err(HerculesError::Git(_))
        ));
        assert!(push(temp_dir.path()).is_err());
    }

    #[test]
    fn test_commit_all() {
        if !git_available() {
            return;
        }
        let temp_dir = TempDir::new().unwrap();
        init_repo(temp_dir.path());
        fs::write(temp_dir.path().join("main.lua"), "print(1)").unwrap();

        assert!(has_changes(temp_dir.path()).unwrap());
        assert!(commit_all(temp_dir.path(), DEFAULT_COMMIT_MESSAGE).unwrap());
        assert!(!has_changes(temp_dir.path()).unwrap());

        let log = git(temp_dir.path(), &["log", "-1", "--pretty=format:%s"]).unwrap();
        assert_eq!(String::from_utf8_lossy(&log.stdout), DEFAULT_COMMIT_MESSAGE);

        // Nothing left to commit
        assert!(!commit_all(temp_dir.path(), DEFAULT_COMMIT_MESSAGE).unwrap());
    }
}
