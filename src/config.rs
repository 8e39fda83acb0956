use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_LOGIN_WAIT_SECS: u64 = 300;
pub const DEFAULT_LOGIN_POLL_MS: u64 = 2000;
pub const DEFAULT_PUBLISH_CONFIRM_SECS: u64 = 180;
pub const DEFAULT_ELEMENT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ELEMENT_POLL_MS: u64 = 250;
pub const DEFAULT_OPTIONAL_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_SETTLE_MS: u64 = 1_000;
pub const DEFAULT_UPLOAD_SETTLE_MS: u64 = 3_000;
pub const DEFAULT_CHROME_READY_SECS: u64 = 30;
pub const DEFAULT_CDP_CALL_TIMEOUT_SECS: u64 = 30;

pub const DEBUG_PORT_START: u16 = 9300;
pub const DEBUG_PORT_END: u16 = 9800;

pub const MP_HOME_URL: &str = "https://mp.weixin.qq.com/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Raw DevTools protocol over a websocket.
    #[default]
    Cdp,
    /// chromiumoxide-managed connection.
    Chromium,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cdp => "cdp",
            Self::Chromium => "chromium",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cdp" | "raw" => Some(Self::Cdp),
            "chromium" | "chromiumoxide" | "library" => Some(Self::Chromium),
            _ => None,
        }
    }
}

/// Bounds for every suspension point in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub login_wait_secs: u64,
    pub login_poll_ms: u64,
    pub publish_confirm_secs: u64,
    pub element_timeout_ms: u64,
    pub element_poll_ms: u64,
    pub optional_timeout_ms: u64,
    pub settle_ms: u64,
    pub upload_settle_ms: u64,
    pub chrome_ready_secs: u64,
    pub cdp_call_timeout_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            login_wait_secs: DEFAULT_LOGIN_WAIT_SECS,
            login_poll_ms: DEFAULT_LOGIN_POLL_MS,
            publish_confirm_secs: DEFAULT_PUBLISH_CONFIRM_SECS,
            element_timeout_ms: DEFAULT_ELEMENT_TIMEOUT_MS,
            element_poll_ms: DEFAULT_ELEMENT_POLL_MS,
            optional_timeout_ms: DEFAULT_OPTIONAL_TIMEOUT_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            upload_settle_ms: DEFAULT_UPLOAD_SETTLE_MS,
            chrome_ready_secs: DEFAULT_CHROME_READY_SECS,
            cdp_call_timeout_secs: DEFAULT_CDP_CALL_TIMEOUT_SECS,
        }
    }
}

impl Timeouts {
    pub fn login_wait(&self) -> Duration {
        Duration::from_secs(self.login_wait_secs)
    }

    pub fn login_poll(&self) -> Duration {
        Duration::from_millis(self.login_poll_ms.max(1))
    }

    pub fn publish_confirm(&self) -> Duration {
        Duration::from_secs(self.publish_confirm_secs)
    }

    pub fn element(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn element_poll(&self) -> Duration {
        Duration::from_millis(self.element_poll_ms.max(1))
    }

    pub fn optional(&self) -> Duration {
        Duration::from_millis(self.optional_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn upload_settle(&self) -> Duration {
        Duration::from_millis(self.upload_settle_ms)
    }

    pub fn chrome_ready(&self) -> Duration {
        Duration::from_secs(self.chrome_ready_secs)
    }

    pub fn cdp_call(&self) -> Duration {
        Duration::from_secs(self.cdp_call_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    pub profile_dir: PathBuf,
    pub chrome_path: Option<PathBuf>,
    /// Attach to an already-running Chrome on this port instead of launching.
    pub attach_port: Option<u16>,
    pub debug_port_start: u16,
    pub debug_port_end: u16,
    pub headless: bool,
    pub backend: BackendKind,
    pub target_url: String,
    pub close_browser_on_teardown: bool,
    pub screenshot_dir: Option<PathBuf>,
    pub timeouts: Timeouts,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            chrome_path: None,
            attach_port: None,
            debug_port_start: DEBUG_PORT_START,
            debug_port_end: DEBUG_PORT_END,
            headless: false,
            backend: BackendKind::default(),
            target_url: MP_HOME_URL.to_string(),
            close_browser_on_teardown: true,
            screenshot_dir: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl AutomationConfig {
    /// Read a JSON config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&body)
            .with_context(|| format!("Invalid config JSON in {}", path.display()))?;
        info!("[Config] loaded {}", path.display());
        Ok(config)
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(dir) = lookup("MP_PUBLISHER_PROFILE_DIR").filter(|v| !v.trim().is_empty()) {
            self.profile_dir = PathBuf::from(dir);
        }
        if let Some(chrome) = lookup("MP_PUBLISHER_CHROME").filter(|v| !v.trim().is_empty()) {
            self.chrome_path = Some(PathBuf::from(chrome));
        }
        if let Some(port) = lookup("MP_PUBLISHER_DEBUG_PORT").and_then(|v| v.trim().parse().ok()) {
            self.attach_port = Some(port);
        }
        if let Some(flag) = lookup("MP_PUBLISHER_HEADLESS") {
            self.headless = is_truthy(&flag);
        }
        if let Some(backend) = lookup("MP_PUBLISHER_BACKEND").and_then(|v| BackendKind::parse(&v)) {
            self.backend = backend;
        }
        if let Some(dir) = lookup("MP_PUBLISHER_SCREENSHOT_DIR").filter(|v| !v.trim().is_empty()) {
            self.screenshot_dir = Some(PathBuf::from(dir));
        }
        self
    }
}

/// `~/.mp-publisher/profile`, or a relative fallback when there is no home.
pub fn default_profile_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".mp-publisher").join("profile"))
        .unwrap_or_else(|| PathBuf::from(".mp-publisher/profile"))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
