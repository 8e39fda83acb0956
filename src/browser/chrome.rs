//! Chrome process helpers: locate the executable, launch it against a
//! persistent profile with a debugging port, and find sessions that are
//! already running for that profile.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;

pub const READY_POLL_INTERVAL_MS: u64 = 500;
pub const WINDOW_SIZE: (u32, u32) = (1280, 900);

#[derive(Debug, Deserialize)]
struct DevToolsTarget {
    #[serde(rename = "type")]
    target_type: String,
}

#[derive(Debug, Deserialize)]
pub struct DevToolsVersion {
    #[serde(rename = "Browser", default)]
    pub browser: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromeSessionMode {
    ReusedExisting,
    LaunchedNew,
    Attached,
}

impl ChromeSessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReusedExisting => "reused_existing",
            Self::LaunchedNew => "launched_new",
            Self::Attached => "attached",
        }
    }
}

/// A Chrome instance reachable on a debugging port.
#[derive(Debug)]
pub struct ChromeSession {
    pub port: u16,
    pub mode: ChromeSessionMode,
    /// Present only when this process spawned the browser.
    pub child: Option<Child>,
}

#[derive(Debug, Clone)]
pub struct LaunchOptions<'a> {
    pub chrome_path: &'a Path,
    pub profile_dir: &'a Path,
    pub url: &'a str,
    pub headless: bool,
    pub port_range: (u16, u16),
}

/// First free localhost port in `range`.
pub fn allocate_port(range: (u16, u16)) -> Result<u16> {
    (range.0..=range.1)
        .find(|port| TcpListener::bind(("127.0.0.1", *port)).is_ok())
        .with_context(|| {
            format!(
                "No available Chrome debugging port in range {}-{}",
                range.0, range.1
            )
        })
}

/// Locate a Chrome/Chromium executable for the current OS.
pub fn detect_chrome() -> Result<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let paths = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ];
        if let Some(path) = paths.iter().map(PathBuf::from).find(|p| p.exists()) {
            return Ok(path);
        }
    }

    #[cfg(target_os = "windows")]
    {
        let paths = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        if let Some(path) = paths.iter().map(PathBuf::from).find(|p| p.exists()) {
            return Ok(path);
        }
    }

    let names = [
        "google-chrome",
        "google-chrome-stable",
        "chromium-browser",
        "chromium",
        "chrome",
    ];
    for name in &names {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    bail!("Could not find a Chrome or Chromium executable. Install Google Chrome or set MP_PUBLISHER_CHROME.")
}

fn chrome_args(options: &LaunchOptions<'_>, port: u16) -> Vec<String> {
    let mut args = vec![
        format!("--user-data-dir={}", options.profile_dir.display()),
        format!("--remote-debugging-port={}", port),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        format!("--window-size={},{}", WINDOW_SIZE.0, WINDOW_SIZE.1),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    } else {
        args.push("--new-window".to_string());
    }
    args.push(options.url.to_string());
    args
}

/// Spawn Chrome on a freshly allocated debugging port.
pub fn launch_chrome_with_debug(options: &LaunchOptions<'_>) -> Result<(Child, u16)> {
    let port = allocate_port(options.port_range)?;
    info!(
        "[Chrome launch] profile={} port={} headless={} url={}",
        options.profile_dir.display(),
        port,
        options.headless,
        options.url
    );

    let child = Command::new(options.chrome_path)
        .args(chrome_args(options, port))
        .spawn()
        .with_context(|| format!("Failed to launch {}", options.chrome_path.display()))?;

    info!(
        "[Chrome launch] pid={} port={} profile={}",
        child.id(),
        port,
        options.profile_dir.display()
    );
    Ok((child, port))
}

/// Reuse a debuggable Chrome already bound to the profile, or launch one.
///
/// A profile held by a Chrome without a reachable debugging port cannot be
/// shared and is reported as busy.
pub async fn prepare_chrome_session(options: &LaunchOptions<'_>) -> Result<ChromeSession> {
    if let Some(port) = discover_profile_debug_port(options.profile_dir).await {
        info!(
            "[Chrome session] reusing debuggable session profile={} port={}",
            options.profile_dir.display(),
            port
        );
        return Ok(ChromeSession {
            port,
            mode: ChromeSessionMode::ReusedExisting,
            child: None,
        });
    }

    if is_profile_busy(options.profile_dir) {
        bail!(
            "PROFILE_BUSY: profile {} is open in a Chrome without a debugging port; close that window and retry",
            options.profile_dir.display()
        );
    }

    let (child, port) = launch_chrome_with_debug(options)?;
    Ok(ChromeSession {
        port,
        mode: ChromeSessionMode::LaunchedNew,
        child: Some(child),
    })
}

/// Poll the debugging endpoint until a page target exists.
///
/// Returns the live port, which can differ from `port` when Chrome handed
/// the profile to an already-running instance.
pub async fn wait_for_chrome_ready(port: u16, profile_dir: &Path, timeout: Duration) -> Result<u16> {
    let start = std::time::Instant::now();
    let mut active_port = port;
    let mut saw_version = false;
    let mut rediscovered = false;

    loop {
        if start.elapsed() > timeout {
            if saw_version {
                bail!(
                    "CHROME_NOT_READY: port {} answered but no page target appeared within {:?}",
                    active_port,
                    timeout
                );
            }
            bail!(
                "CHROME_NOT_READY: Chrome did not open debugging port {} within {:?}",
                active_port,
                timeout
            );
        }

        if is_port_version_ready(active_port).await {
            saw_version = true;
            match has_page_target(active_port).await {
                Ok(true) => {
                    info!("[Chrome ready] port={} page target present", active_port);
                    return Ok(active_port);
                }
                Ok(false) => debug!("[Chrome ready] port={} waiting for page target", active_port),
                Err(e) => debug!("[Chrome ready] port={} target list failed: {}", active_port, e),
            }
        }

        if !rediscovered {
            rediscovered = true;
            if let Some(found) = discover_profile_debug_port(profile_dir).await {
                if found != active_port {
                    info!(
                        "[Chrome ready] switching port by profile rediscovery {} -> {}",
                        active_port, found
                    );
                    active_port = found;
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(READY_POLL_INTERVAL_MS)).await;
    }
}

pub async fn fetch_version(port: u16) -> Result<DevToolsVersion> {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    let version = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to reach {}", url))?
        .error_for_status()?
        .json::<DevToolsVersion>()
        .await
        .context("Malformed /json/version response")?;
    Ok(version)
}

/// Debugging port of a live Chrome bound to `profile_dir`, if any.
pub async fn discover_profile_debug_port(profile_dir: &Path) -> Option<u16> {
    let mut candidates: BTreeSet<u16> = BTreeSet::new();
    candidates.extend(read_devtools_active_port(profile_dir));
    candidates.extend(running_profile_debug_ports(profile_dir));

    for port in candidates {
        if is_port_version_ready(port).await {
            return Some(port);
        }
    }
    None
}

fn read_devtools_active_port(profile_dir: &Path) -> Option<u16> {
    let body = std::fs::read_to_string(profile_dir.join("DevToolsActivePort")).ok()?;
    body.lines().next()?.trim().parse::<u16>().ok()
}

#[cfg(unix)]
fn running_profile_debug_ports(profile_dir: &Path) -> Vec<u16> {
    let output = match Command::new("ps").args(["-ax", "-o", "command="]).output() {
        Ok(output) if output.status.success() => output,
        _ => return Vec::new(),
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| matches_profile_user_data_dir(line, profile_dir))
        .filter_map(|line| extract_flag_u16(line, "--remote-debugging-port="))
        .collect()
}

#[cfg(not(unix))]
fn running_profile_debug_ports(_profile_dir: &Path) -> Vec<u16> {
    Vec::new()
}

fn matches_profile_user_data_dir(cmdline: &str, profile_dir: &Path) -> bool {
    let profile = profile_dir.to_string_lossy();
    [
        format!("--user-data-dir={}", profile),
        format!("--user-data-dir=\"{}\"", profile),
        format!("--user-data-dir='{}'", profile),
    ]
    .iter()
    .any(|flag| cmdline.contains(flag.as_str()))
}

fn extract_flag_u16(cmdline: &str, prefix: &str) -> Option<u16> {
    cmdline
        .split_whitespace()
        .filter_map(|token| token.strip_prefix(prefix))
        .find_map(|raw| raw.trim_matches('"').trim_matches('\'').parse::<u16>().ok())
}

async fn is_port_version_ready(port: u16) -> bool {
    let url = format!("http://127.0.0.1:{}/json/version", port);
    matches!(reqwest::get(&url).await, Ok(resp) if resp.status().is_success())
}

async fn has_page_target(port: u16) -> Result<bool> {
    let url = format!("http://127.0.0.1:{}/json/list", port);
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to request {}", url))?;
    if !resp.status().is_success() {
        return Ok(false);
    }
    let targets: Vec<DevToolsTarget> = resp.json().await.unwrap_or_default();
    Ok(targets.iter().any(|t| t.target_type == "page"))
}

fn has_singleton_artifacts(profile_dir: &Path) -> bool {
    ["SingletonLock", "SingletonCookie", "SingletonSocket"]
        .iter()
        .any(|name| profile_dir.join(name).exists())
}

/// Chrome's `SingletonLock` is a symlink to `<host>-<pid>`.
fn singleton_lock_pid(profile_dir: &Path) -> Option<u32> {
    let target = std::fs::read_link(profile_dir.join("SingletonLock")).ok()?;
    let name = target.file_name()?.to_string_lossy().to_string();
    name.rsplit('-').next()?.parse::<u32>().ok()
}

#[cfg(unix)]
pub fn is_pid_running(pid: u32) -> bool {
    Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "pid="])
        .output()
        .map(|out| out.status.success() && !String::from_utf8_lossy(&out.stdout).trim().is_empty())
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_pid_running(_pid: u32) -> bool {
    false
}

/// Whether another Chrome currently holds `profile_dir`.
pub fn is_profile_busy(profile_dir: &Path) -> bool {
    if !has_singleton_artifacts(profile_dir) {
        return false;
    }
    match singleton_lock_pid(profile_dir) {
        Some(pid) => is_pid_running(pid),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_debug_port_from_command_line() {
        let cmd = "/opt/chrome --user-data-dir=/home/u/.mp-publisher/profile --remote-debugging-port=9301 https://mp.weixin.qq.com/";
        assert_eq!(extract_flag_u16(cmd, "--remote-debugging-port="), Some(9301));
        assert_eq!(extract_flag_u16("chrome --remote-debugging-port=\"9400\"", "--remote-debugging-port="), Some(9400));
        assert_eq!(extract_flag_u16("chrome --headless", "--remote-debugging-port="), None);
    }

    #[test]
    fn profile_flag_matching_accepts_quoted_forms() {
        let profile = Path::new("/tmp/mp profile");
        assert!(matches_profile_user_data_dir(
            "chrome --user-data-dir=\"/tmp/mp profile\" --remote-debugging-port=1",
            profile
        ));
        assert!(!matches_profile_user_data_dir(
            "chrome --user-data-dir=/tmp/other",
            profile
        ));
    }

    #[test]
    fn reads_devtools_active_port_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("DevToolsActivePort"), "9322\n/devtools/browser/abc\n").unwrap();
        assert_eq!(read_devtools_active_port(dir.path()), Some(9322));
    }

    #[test]
    fn empty_profile_is_not_busy() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_profile_busy(dir.path()));
    }

    #[test]
    fn headless_launch_args_skip_new_window() {
        let chrome = PathBuf::from("/usr/bin/chromium");
        let profile = PathBuf::from("/tmp/profile");
        let options = LaunchOptions {
            chrome_path: &chrome,
            profile_dir: &profile,
            url: "https://mp.weixin.qq.com/",
            headless: true,
            port_range: (9300, 9310),
        };
        let args = chrome_args(&options, 9301);
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(!args.contains(&"--new-window".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://mp.weixin.qq.com/"));
    }
}
