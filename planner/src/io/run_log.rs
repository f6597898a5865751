//! Per-run artifact layout under `<state_dir>/runs/<run_id>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub result_path: PathBuf,
}

impl RunPaths {
    pub fn new(state_dir: &Path, run_id: &str) -> Self {
        let dir = state_dir.join("runs").join(run_id);
        Self {
            result_path: dir.join("result.json"),
            dir,
        }
    }
}

/// Artifact files written for one oracle call.
#[derive(Debug, Clone)]
pub struct CallPaths {
    pub prompt_path: PathBuf,
    pub schema_path: PathBuf,
    pub output_path: PathBuf,
    pub executor_log_path: PathBuf,
}

impl CallPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            prompt_path: dir.join("prompt.md"),
            schema_path: dir.join("schema.json"),
            output_path: dir.join("output.json"),
            executor_log_path: dir.join("executor.log"),
        }
    }
}

pub fn write_text(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
