//! Configuration for trackfit.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides. Files are read
//! from `~/.config/trackfit/config.toml` and `.trackfit/config.toml` in the
//! workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Project runs are grouped under. The tracker callback refuses to
    /// construct without one.
    #[serde(default)]
    pub project: Option<String>,
    /// Root directory of the local run store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Name given to new runs (a generated name is used when unset).
    #[serde(default)]
    pub run_name: Option<String>,
    /// Upload checkpoint files at the end of each epoch.
    #[serde(default = "default_true")]
    pub log_model_weights: bool,
    /// Leave the session open after the fit finishes.
    #[serde(default)]
    pub keep_session_running: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            project: None,
            store_dir: default_store_dir(),
            run_name: None,
            log_model_weights: true,
            keep_session_running: false,
        }
    }
}

impl TrackerConfig {
    /// Resolve `store_dir` against a workspace when it is relative.
    pub fn resolved_store_dir(&self, workspace: &Path) -> PathBuf {
        if self.store_dir.is_absolute() {
            self.store_dir.clone()
        } else {
            workspace.join(&self.store_dir)
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(".trackfit/runs")
}

fn default_true() -> bool {
    true
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TRACKFIT_`)
/// 3. Workspace-local config (`.trackfit/config.toml`)
/// 4. User config (`~/.config/trackfit/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TrackerConfig>,
) -> Result<TrackerConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrackerConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "trackfit", "trackfit") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".trackfit").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // TRACKFIT_PROJECT, TRACKFIT_KEEP_SESSION_RUNNING, ...
    figment = figment.merge(Env::prefixed("TRACKFIT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert!(config.project.is_none());
        assert!(config.log_model_weights);
        assert!(!config.keep_session_running);
        assert_eq!(config.store_dir, PathBuf::from(".trackfit/runs"));
    }

    #[test]
    fn test_workspace_file_layer() {
        let dir = TempDir::new().unwrap();
        let cfg_dir = dir.path().join(".trackfit");
        std::fs::create_dir_all(&cfg_dir).unwrap();
        std::fs::write(
            cfg_dir.join("config.toml"),
            "project = \"vision/resnet\"\nkeep_session_running = true\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.project.as_deref(), Some("vision/resnet"));
        assert!(config.keep_session_running);
        assert!(config.log_model_weights);
    }

    #[test]
    fn test_overrides_win() {
        let dir = TempDir::new().unwrap();
        let overrides = TrackerConfig {
            project: Some("override/project".into()),
            log_model_weights: false,
            ..Default::default()
        };
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.project.as_deref(), Some("override/project"));
        assert!(!config.log_model_weights);
    }

    #[test]
    fn test_resolved_store_dir() {
        let config = TrackerConfig::default();
        let ws = Path::new("/tmp/ws");
        assert_eq!(
            config.resolved_store_dir(ws),
            PathBuf::from("/tmp/ws/.trackfit/runs")
        );

        let abs = TrackerConfig {
            store_dir: PathBuf::from("/var/runs"),
            ..Default::default()
        };
        assert_eq!(abs.resolved_store_dir(ws), PathBuf::from("/var/runs"));
    }
}
