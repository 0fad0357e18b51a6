//! Path helpers for Lua sources handed to the obfuscator

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{HerculesError, Result};

/// Whether `path` names a `.lua` file (by extension)
#[inline]
pub fn is_lua_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("lua"))
        .unwrap_or(false)
}

/// Anchor a relative path at the current directory
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Recursively collect `.lua` files below `dir`, sorted, skipping `.git`
pub fn collect_lua_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(HerculesError::NotADirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    walk(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if entry.file_name() == ".git" {
                continue;
            }
            walk(&path, files)?;
        } else if file_type.is_file() && is_lua_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}
