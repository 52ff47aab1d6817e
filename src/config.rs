use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_VERSION: u64 = 1;

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("satchel")
}

fn default_platform_url() -> String {
    "https://platform.satchel.app/v1".to_string()
}

fn default_chat_limit() -> usize {
    5
}

fn default_summarize_limit() -> usize {
    5
}

fn default_background_limit() -> usize {
    3
}

fn default_auto_continue_ms() -> u64 {
    5000
}

fn default_complete_clear_ms() -> u64 {
    1000
}

fn default_fail_clear_ms() -> u64 {
    3000
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct SatchelConfig {
    /// Directory holding persisted store snapshots.
    pub data_directory: PathBuf,
    /// Base URL of the cloud platform the client delegates to.
    #[serde(default = "default_platform_url")]
    pub platform_url: String,
    /// API token for the platform, if the user pasted one into settings.
    /// Absent means "rely on ambient sign-in", which may be unavailable.
    #[serde(default)]
    pub platform_token: Option<String>,
    #[serde(default = "default_chat_limit")]
    pub chat_task_limit: usize,
    #[serde(default = "default_summarize_limit")]
    pub summarize_task_limit: usize,
    #[serde(default = "default_background_limit")]
    pub background_task_limit: usize,
    /// Delay before an extracted-text task auto-continues into generation.
    #[serde(default = "default_auto_continue_ms")]
    pub auto_continue_ms: u64,
    /// How long a completed task stays visible before auto-clearing.
    #[serde(default = "default_complete_clear_ms")]
    pub complete_clear_ms: u64,
    /// How long a failed task stays visible before auto-clearing.
    #[serde(default = "default_fail_clear_ms")]
    pub fail_clear_ms: u64,
    #[serde(default)]
    pub debug_logging: bool,
}

impl Default for SatchelConfig {
    fn default() -> Self {
        Self {
            data_directory: default_data_dir(),
            platform_url: default_platform_url(),
            platform_token: None,
            chat_task_limit: default_chat_limit(),
            summarize_task_limit: default_summarize_limit(),
            background_task_limit: default_background_limit(),
            auto_continue_ms: default_auto_continue_ms(),
            complete_clear_ms: default_complete_clear_ms(),
            fail_clear_ms: default_fail_clear_ms(),
            debug_logging: false,
        }
    }
}

impl SatchelConfig {
    /// Load config from `<data dir>/config.json`, falling back to defaults.
    pub fn load() -> Self {
        let path = default_data_dir().join("config.json");
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn stores_dir(&self) -> PathBuf {
        self.data_directory.join("stores")
    }

    pub fn store_path(&self, name: &str) -> PathBuf {
        self.stores_dir().join(format!("{}.json", name))
    }

    pub fn config_path(&self) -> PathBuf {
        self.data_directory.join("config.json")
    }

    pub fn auto_continue_delay(&self) -> Duration {
        Duration::from_millis(self.auto_continue_ms)
    }

    pub fn complete_clear_delay(&self) -> Duration {
        Duration::from_millis(self.complete_clear_ms)
    }

    pub fn fail_clear_delay(&self) -> Duration {
        Duration::from_millis(self.fail_clear_ms)
    }

    /// Ensure the data and store directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_directory)?;
        std::fs::create_dir_all(self.stores_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg: SatchelConfig = serde_json::from_str(r#"{"data_directory": "/tmp/satchel"}"#)
            .expect("partial config should deserialize");
        assert_eq!(cfg.chat_task_limit, 5);
        assert_eq!(cfg.background_task_limit, 3);
        assert_eq!(cfg.auto_continue_ms, 5000);
        assert_eq!(cfg.platform_token, None);
    }

    #[test]
    fn store_path_lands_under_stores_dir() {
        let cfg = SatchelConfig {
            data_directory: PathBuf::from("/tmp/satchel"),
            ..Default::default()
        };
        assert_eq!(
            cfg.store_path("sessions"),
            PathBuf::from("/tmp/satchel/stores/sessions.json")
        );
    }
}
