use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::FeedVariant;

const DEFAULT_ENV_PREFIX: &str = "REELFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub ui: UIConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    #[serde(default)]
    pub subject_id: Option<u64>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            user_agent: default_user_agent(),
            page_limit: default_page_limit(),
            subject_id: None,
        }
    }
}

fn default_base_url() -> String {
    crate::api::DEFAULT_BASE_URL.to_string()
}

fn default_user_agent() -> String {
    format!("reelfeed/{}", crate::VERSION)
}

fn default_page_limit() -> u32 {
    100
}

/// Gesture tuning. The defaults were picked for browser wheel/touch
/// cadence; terminals may want different values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationConfig {
    #[serde(default = "default_wheel_threshold")]
    pub wheel_threshold: f64,
    #[serde(default = "default_wheel_idle", with = "humantime_serde")]
    pub wheel_idle: Duration,
    #[serde(default = "default_touch_threshold")]
    pub touch_threshold: f64,
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            wheel_threshold: default_wheel_threshold(),
            wheel_idle: default_wheel_idle(),
            touch_threshold: default_touch_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

fn default_wheel_threshold() -> f64 {
    100.0
}

fn default_wheel_idle() -> Duration {
    Duration::from_millis(150)
}

fn default_touch_threshold() -> f64 {
    50.0
}

fn default_cooldown() -> Duration {
    Duration::from_millis(400)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default)]
    pub variant: FeedVariant,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_prefetch_depth")]
    pub prefetch_depth: usize,
    #[serde(default = "default_load_more_threshold")]
    pub load_more_threshold: usize,
    #[serde(default = "default_empty_scope_notice", with = "humantime_serde")]
    pub empty_scope_notice: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            variant: FeedVariant::default(),
            window_size: default_window_size(),
            prefetch_depth: default_prefetch_depth(),
            load_more_threshold: default_load_more_threshold(),
            empty_scope_notice: default_empty_scope_notice(),
        }
    }
}

impl FeedConfig {
    /// Window sizes are odd so the active item sits in the middle.
    pub fn odd_window_size(&self) -> usize {
        let size = self.window_size.max(1);
        if size % 2 == 0 {
            size + 1
        } else {
            size
        }
    }
}

fn default_window_size() -> usize {
    5
}

fn default_prefetch_depth() -> usize {
    2
}

fn default_load_more_threshold() -> usize {
    5
}

fn default_empty_scope_notice() -> Duration {
    Duration::from_millis(1500)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    #[serde(default = "default_auto_retries")]
    pub auto_retries: u32,
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(default = "default_mpv_path")]
    pub mpv_path: String,
    #[serde(default)]
    pub fullscreen: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            auto_retries: default_auto_retries(),
            retry_delay: default_retry_delay(),
            mpv_path: default_mpv_path(),
            fullscreen: false,
        }
    }
}

fn default_auto_retries() -> u32 {
    2
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_mpv_path() -> String {
    "mpv".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrefetchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_prefetch_workers")]
    pub workers: usize,
    #[serde(default = "default_prefetch_bytes")]
    pub bytes: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: default_prefetch_workers(),
            bytes: default_prefetch_bytes(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_prefetch_workers() -> usize {
    2
}

fn default_prefetch_bytes() -> u64 {
    512 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default = "default_transition", with = "humantime_serde")]
    pub transition: Duration,
    #[serde(default = "default_tick_rate", with = "humantime_serde")]
    pub tick_rate: Duration,
    #[serde(default = "default_wheel_notch_delta")]
    pub wheel_notch_delta: f64,
    #[serde(default = "default_touch_row_px")]
    pub touch_row_px: f64,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            transition: default_transition(),
            tick_rate: default_tick_rate(),
            wheel_notch_delta: default_wheel_notch_delta(),
            touch_row_px: default_touch_row_px(),
        }
    }
}

fn default_transition() -> Duration {
    Duration::from_millis(500)
}

fn default_tick_rate() -> Duration {
    Duration::from_millis(50)
}

fn default_wheel_notch_delta() -> f64 {
    40.0
}

fn default_touch_row_px() -> f64 {
    16.0
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    for (key, value) in map {
        apply_env_value(cfg, &key, value);
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "api.base_url" => cfg.api.base_url = value,
        "api.api_key" => cfg.api.api_key = value,
        "api.user_agent" => cfg.api.user_agent = value,
        "api.page_limit" => set_parsed(&mut cfg.api.page_limit, &value),
        "api.subject_id" => cfg.api.subject_id = value.trim().parse::<u64>().ok(),
        "navigation.wheel_threshold" => set_parsed(&mut cfg.navigation.wheel_threshold, &value),
        "navigation.wheel_idle" => set_duration(&mut cfg.navigation.wheel_idle, &value),
        "navigation.touch_threshold" => set_parsed(&mut cfg.navigation.touch_threshold, &value),
        "navigation.cooldown" => set_duration(&mut cfg.navigation.cooldown, &value),
        "feed.variant" => match value.trim().to_ascii_lowercase().as_str() {
            "trending" => cfg.feed.variant = FeedVariant::Trending,
            "following" => cfg.feed.variant = FeedVariant::Following,
            _ => {}
        },
        "feed.window_size" => set_parsed(&mut cfg.feed.window_size, &value),
        "feed.prefetch_depth" => set_parsed(&mut cfg.feed.prefetch_depth, &value),
        "feed.load_more_threshold" => set_parsed(&mut cfg.feed.load_more_threshold, &value),
        "feed.empty_scope_notice" => set_duration(&mut cfg.feed.empty_scope_notice, &value),
        "playback.auto_retries" => set_parsed(&mut cfg.playback.auto_retries, &value),
        "playback.retry_delay" => set_duration(&mut cfg.playback.retry_delay, &value),
        "playback.mpv_path" => cfg.playback.mpv_path = value,
        "playback.fullscreen" => cfg.playback.fullscreen = truthy(&value),
        "prefetch.enabled" => cfg.prefetch.enabled = truthy(&value),
        "prefetch.workers" => set_parsed(&mut cfg.prefetch.workers, &value),
        "prefetch.bytes" => set_parsed(&mut cfg.prefetch.bytes, &value),
        "ui.transition" => set_duration(&mut cfg.ui.transition, &value),
        "ui.tick_rate" => set_duration(&mut cfg.ui.tick_rate, &value),
        "ui.wheel_notch_delta" => set_parsed(&mut cfg.ui.wheel_notch_delta, &value),
        "ui.touch_row_px" => set_parsed(&mut cfg.ui.touch_row_px, &value),
        _ => {}
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, value: &str) {
    if let Ok(parsed) = value.trim().parse::<T>() {
        *slot = parsed;
    }
}

fn set_duration(slot: &mut Duration, value: &str) {
    if let Ok(duration) = humantime::parse_duration(value.trim()) {
        *slot = duration;
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("reelfeed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("REELFEED_TEST_DEFAULTS".into()),
        })
        .unwrap();
        assert_eq!(cfg.feed.window_size, 5);
        assert_eq!(cfg.navigation.cooldown, Duration::from_millis(400));
        assert_eq!(cfg.playback.auto_retries, 2);
        assert_eq!(cfg.api.base_url, crate::api::DEFAULT_BASE_URL);
    }

    #[test]
    fn reads_partial_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "navigation:\n  cooldown: 250ms\n  wheel_threshold: 80\nfeed:\n  variant: following\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("REELFEED_TEST_YAML".into()),
        })
        .unwrap();
        assert_eq!(cfg.navigation.cooldown, Duration::from_millis(250));
        assert_eq!(cfg.navigation.wheel_threshold, 80.0);
        assert_eq!(cfg.navigation.wheel_idle, Duration::from_millis(150));
        assert_eq!(cfg.feed.variant, FeedVariant::Following);
    }

    #[test]
    fn env_overrides() {
        env::set_var("REELFEED_TEST_ENV_PLAYBACK__RETRY_DELAY", "2s");
        env::set_var("REELFEED_TEST_ENV_API__SUBJECT_ID", "194");
        let cfg = load(LoadOptions {
            config_file: Some(PathBuf::from("/nonexistent/reelfeed.yaml")),
            env_prefix: Some("REELFEED_TEST_ENV".into()),
        })
        .unwrap();
        assert_eq!(cfg.playback.retry_delay, Duration::from_secs(2));
        assert_eq!(cfg.api.subject_id, Some(194));
        env::remove_var("REELFEED_TEST_ENV_PLAYBACK__RETRY_DELAY");
        env::remove_var("REELFEED_TEST_ENV_API__SUBJECT_ID");
    }

    #[test]
    fn even_window_sizes_round_up() {
        let feed = FeedConfig {
            window_size: 4,
            ..FeedConfig::default()
        };
        assert_eq!(feed.odd_window_size(), 5);
        let feed = FeedConfig {
            window_size: 0,
            ..FeedConfig::default()
        };
        assert_eq!(feed.odd_window_size(), 1);
    }
}
