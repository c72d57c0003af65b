use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::grouping::DEFAULT_GROUP_WINDOW_MS;
use super::paging::DEFAULT_PAGE_SIZE;
use super::typing::{DEFAULT_TYPING_IDLE, DEFAULT_TYPING_TTL};
use super::AppCore;

pub(crate) const CONFIG_FILE_NAME: &str = "deskchat_config.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub(crate) page_size: Option<usize>,
    pub(crate) group_window_secs: Option<u64>,
    pub(crate) typing_ttl_ms: Option<u64>,
    pub(crate) typing_idle_ms: Option<u64>,
    pub(crate) signed_url_ttl_secs: Option<u64>,
    // Mirror logs into <data_dir>/deskchat.log.
    pub(crate) log_to_file: Option<bool>,
}

pub(crate) fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let Ok(bytes) = std::fs::read(&path) else {
        return AppConfig::default();
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "ignoring malformed config");
            AppConfig::default()
        }
    }
}

impl AppConfig {
    pub(crate) fn page_size(&self) -> usize {
        if let Some(n) = std::env::var("DESKCHAT_PAGE_SIZE")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
        {
            return n;
        }
        self.page_size
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub(crate) fn group_window_ms(&self) -> i64 {
        self.group_window_secs
            .map(|s| s as i64 * 1000)
            .unwrap_or(DEFAULT_GROUP_WINDOW_MS)
    }

    pub(crate) fn typing_ttl(&self) -> Duration {
        self.typing_ttl_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TYPING_TTL)
    }

    pub(crate) fn typing_idle(&self) -> Duration {
        self.typing_idle_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TYPING_IDLE)
    }

    pub(crate) fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs.unwrap_or(3600).max(1))
    }

    pub(crate) fn log_to_file(&self) -> bool {
        self.log_to_file == Some(true)
    }
}

impl AppCore {
    pub(super) fn page_size(&self) -> usize {
        self.config.page_size()
    }
}
