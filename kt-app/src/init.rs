//! Configuration scaffolding for `karrytask init`.
//!
//! Writes the config template to the config path (`~/.karrytask/config.toml`
//! unless `--config` names another file) without overwriting an existing file.

use anyhow::Result;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

const CONFIG_TEMPLATE: &str = include_str!("../../config-templates/config.toml");

/// Initializes `config_path` (default location when `None`).
pub async fn initialize(config_path: Option<PathBuf>) -> Result<InitReport> {
    let config_path = match config_path {
        Some(p) => p,
        None => crate::config::default_config_path()?,
    };
    initialize_config(&config_path).await
}

pub async fn initialize_config(config_path: &Path) -> Result<InitReport> {
    let root = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", config_path.display()))?;
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| anyhow::anyhow!("create config root {}: {e}", root.display()))?;

    let mut report = InitReport {
        root: root.to_path_buf(),
        config_path: config_path.to_path_buf(),
        ..InitReport::default()
    };

    let target = config_path.to_path_buf();
    match tokio::fs::metadata(&target).await {
        Ok(_) => report.skipped.push(target),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::write(&target, CONFIG_TEMPLATE)
                .await
                .map_err(|e| anyhow::anyhow!("write config template {}: {e}", target.display()))?;
            tracing::info!(path = %target.display(), "config template written");
            report.created.push(target);
        }
        Err(err) => {
            return Err(anyhow::anyhow!(
                "inspect config path {}: {err}",
                target.display()
            ));
        }
    }

    Ok(report)
}
