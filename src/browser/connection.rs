//! Connection Manager: one owned browser connection per run.

use crate::browser::cdp::CdpBrowser;
use crate::browser::chrome::{self, ChromeSessionMode, LaunchOptions};
use crate::browser::chromium::ChromiumBrowser;
use crate::browser::driver::{PageDriver, PageTarget};
use crate::browser::profile::ProfileLock;
use crate::config::{AutomationConfig, BackendKind};
use crate::error::{PublishError, Result};
use async_trait::async_trait;
use log::{info, warn};
use std::process::Child;
use std::sync::Arc;

/// Browser-level operations a transport must provide.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    fn is_open(&self) -> bool;

    async fn list_pages(&self) -> Result<Vec<PageTarget>>;

    async fn attach_page(&self, target_id: &str) -> Result<Arc<dyn PageDriver>>;

    async fn open_page(&self, url: &str) -> Result<Arc<dyn PageDriver>>;

    /// Ask the browser process to exit.
    async fn shutdown_browser(&self) -> Result<()>;

    /// Drop the transport without touching the browser.
    async fn disconnect(&self);
}

/// Where the orchestrator gets its pages from.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Pick the open page whose URL contains `pattern` (or whose target id
    /// equals it); otherwise open a new page on `fallback_url`.
    async fn resolve_page(&self, pattern: &str, fallback_url: &str) -> Result<Arc<dyn PageDriver>>;
}

/// Produces a live connection. Kept behind a trait so request validation
/// can be proven to happen before any browser is touched.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch_or_attach(&self) -> Result<Connection>;
}

pub struct Connection {
    backend: Arc<dyn BrowserBackend>,
    child: Option<Child>,
    lock: Option<ProfileLock>,
    mode: ChromeSessionMode,
    port: u16,
    close_browser: bool,
    torn_down: bool,
}

impl Connection {
    pub fn with_backend(
        backend: Arc<dyn BrowserBackend>,
        mode: ChromeSessionMode,
        port: u16,
    ) -> Self {
        Self {
            backend,
            child: None,
            lock: None,
            mode,
            port,
            close_browser: false,
            torn_down: false,
        }
    }

    pub fn with_profile_lock(mut self, lock: ProfileLock) -> Self {
        self.lock = Some(lock);
        self
    }

    fn with_child(mut self, child: Option<Child>, close_browser: bool) -> Self {
        self.child = child;
        self.close_browser = close_browser;
        self
    }

    pub fn mode(&self) -> ChromeSessionMode {
        self.mode
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_open(&self) -> bool {
        !self.torn_down && self.backend.is_open()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn holds_profile_lock(&self) -> bool {
        self.lock.as_ref().is_some_and(|lock| !lock.is_released())
    }

    pub async fn pages(&self) -> Result<Vec<PageTarget>> {
        self.ensure_open()?;
        self.backend.list_pages().await
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(PublishError::ConnectionClosed)
        }
    }

    /// Release everything this connection owns.
    ///
    /// Idempotent; errors are logged, never returned. A browser we launched
    /// is closed when configured to; a reused or attached one is left alone.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if self.close_browser && self.child.is_some() && self.backend.is_open() {
            if let Err(e) = self.backend.shutdown_browser().await {
                warn!("[Teardown] Browser.close failed: {}", e);
            }
        }
        self.backend.disconnect().await;

        if let Some(mut child) = self.child.take() {
            if self.close_browser {
                reap_child(&mut child);
            } else {
                info!("[Teardown] leaving browser pid={} running", child.id());
            }
        }

        if let Some(lock) = self.lock.as_mut() {
            lock.release();
        }
        info!(
            "[Teardown] done mode={} port={}",
            self.mode.as_str(),
            self.port
        );
    }
}

#[async_trait]
impl PageSource for Connection {
    async fn resolve_page(&self, pattern: &str, fallback_url: &str) -> Result<Arc<dyn PageDriver>> {
        let pages = self.pages().await?;
        if let Some(target) = pick_page(&pages, pattern) {
            info!("[Page] attach id={} url={}", target.id, target.url);
            return self.backend.attach_page(&target.id).await;
        }
        info!(
            "[Page] no tab matches {:?} among {}, opening {}",
            pattern,
            pages.len(),
            fallback_url
        );
        self.backend.open_page(fallback_url).await
    }
}

/// Exact target id first, then the first URL containing `pattern`.
pub fn pick_page<'a>(pages: &'a [PageTarget], pattern: &str) -> Option<&'a PageTarget> {
    if pattern.is_empty() {
        return None;
    }
    pages
        .iter()
        .find(|p| p.id == pattern)
        .or_else(|| pages.iter().find(|p| p.url.contains(pattern)))
}

fn reap_child(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => info!("[Teardown] browser exited {}", status),
        _ => {
            if let Err(e) = child.kill() {
                warn!("[Teardown] kill pid={} failed: {}", child.id(), e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        warn!("[Teardown] connection dropped without teardown, releasing synchronously");
        if let Some(mut child) = self.child.take() {
            if self.close_browser {
                reap_child(&mut child);
            }
        }
        if let Some(lock) = self.lock.as_mut() {
            lock.release();
        }
    }
}

/// Launches or attaches to Chrome per [`AutomationConfig`].
pub struct ChromeLauncher {
    config: AutomationConfig,
}

impl ChromeLauncher {
    pub fn new(config: AutomationConfig) -> Self {
        Self { config }
    }

    async fn connect_backend(&self, port: u16) -> Result<Arc<dyn BrowserBackend>> {
        let backend: Arc<dyn BrowserBackend> = match self.config.backend {
            BackendKind::Cdp => {
                Arc::new(CdpBrowser::connect(port, self.config.timeouts.cdp_call()).await?)
            }
            BackendKind::Chromium => Arc::new(ChromiumBrowser::connect(port).await?),
        };
        Ok(backend)
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch_or_attach(&self) -> Result<Connection> {
        let config = &self.config;
        let lock = ProfileLock::acquire(&config.profile_dir)?;

        let session = if let Some(port) = config.attach_port {
            info!("[Chrome session] attaching to port {}", port);
            chrome::ChromeSession {
                port,
                mode: ChromeSessionMode::Attached,
                child: None,
            }
        } else {
            let chrome_path = match &config.chrome_path {
                Some(path) => path.clone(),
                None => chrome::detect_chrome().map_err(|e| PublishError::Launch(format!("{:#}", e)))?,
            };
            let options = LaunchOptions {
                chrome_path: &chrome_path,
                profile_dir: &config.profile_dir,
                url: &config.target_url,
                headless: config.headless,
                port_range: (config.debug_port_start, config.debug_port_end),
            };
            chrome::prepare_chrome_session(&options).await.map_err(|e| {
                let message = format!("{:#}", e);
                if message.starts_with("PROFILE_BUSY") {
                    PublishError::ProfileBusy(config.profile_dir.clone())
                } else {
                    PublishError::Launch(message)
                }
            })?
        };

        let chrome::ChromeSession { port, mode, child } = session;
        let mut pending = Connection::with_backend(Arc::new(Detached), mode, port)
            .with_profile_lock(lock)
            .with_child(child, config.close_browser_on_teardown);

        let ready = chrome::wait_for_chrome_ready(
            port,
            &config.profile_dir,
            config.timeouts.chrome_ready(),
        )
        .await;
        let port = match ready {
            Ok(port) => port,
            Err(e) => {
                pending.teardown().await;
                return Err(PublishError::Launch(format!("{:#}", e)));
            }
        };

        let backend = match self.connect_backend(port).await {
            Ok(backend) => backend,
            Err(e) => {
                pending.teardown().await;
                return Err(e);
            }
        };

        info!(
            "[Chrome session] ready mode={} port={} backend={}",
            mode.as_str(),
            port,
            config.backend.as_str()
        );
        pending.backend = backend;
        pending.port = port;
        Ok(pending)
    }
}

/// Placeholder backend while the browser is still coming up.
struct Detached;

#[async_trait]
impl BrowserBackend for Detached {
    fn is_open(&self) -> bool {
        false
    }

    async fn list_pages(&self) -> Result<Vec<PageTarget>> {
        Err(PublishError::ConnectionClosed)
    }

    async fn attach_page(&self, _target_id: &str) -> Result<Arc<dyn PageDriver>> {
        Err(PublishError::ConnectionClosed)
    }

    async fn open_page(&self, _url: &str) -> Result<Arc<dyn PageDriver>> {
        Err(PublishError::ConnectionClosed)
    }

    async fn shutdown_browser(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str, url: &str) -> PageTarget {
        PageTarget {
            id: id.into(),
            url: url.into(),
            title: String::new(),
        }
    }

    #[test]
    fn pick_page_prefers_target_id_then_url() {
        let pages = vec![
            target("A1", "https://mp.weixin.qq.com/cgi-bin/home?token=1"),
            target("B2", "https://mp.weixin.qq.com/cgi-bin/appmsg?t=media/appmsg_edit_v2"),
        ];
        assert_eq!(pick_page(&pages, "B2").map(|p| p.id.as_str()), Some("B2"));
        assert_eq!(pick_page(&pages, "appmsg_edit").map(|p| p.id.as_str()), Some("B2"));
        assert_eq!(pick_page(&pages, "cgi-bin").map(|p| p.id.as_str()), Some("A1"));
        assert!(pick_page(&pages, "channels.weixin").is_none());
        assert!(pick_page(&pages, "").is_none());
    }

    /// Backend whose websocket already went away.
    #[derive(Default)]
    struct Lost {
        shutdowns: std::sync::atomic::AtomicUsize,
        disconnects: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl BrowserBackend for Lost {
        fn is_open(&self) -> bool {
            false
        }

        async fn list_pages(&self) -> Result<Vec<PageTarget>> {
            Err(PublishError::Connection("websocket closed".into()))
        }

        async fn attach_page(&self, _target_id: &str) -> Result<Arc<dyn PageDriver>> {
            Err(PublishError::Connection("websocket closed".into()))
        }

        async fn open_page(&self, _url: &str) -> Result<Arc<dyn PageDriver>> {
            Err(PublishError::Connection("websocket closed".into()))
        }

        async fn shutdown_browser(&self) -> Result<()> {
            self.shutdowns.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(PublishError::ConnectionClosed)
        }

        async fn disconnect(&self) {
            self.disconnects.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn teardown_after_lost_connection_reaps_child_and_releases_lock() {
        use std::sync::atomic::Ordering;

        let dir = tempfile::tempdir().unwrap();
        let lock = ProfileLock::acquire(dir.path()).unwrap();
        let lock_path = lock.path().to_path_buf();
        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let backend = Arc::new(Lost::default());
        let mut conn = Connection::with_backend(backend.clone(), ChromeSessionMode::LaunchedNew, 9302)
            .with_profile_lock(lock)
            .with_child(Some(child), true);
        assert!(conn.pages().await.unwrap_err().is_connection_lost());

        conn.teardown().await;
        conn.teardown().await;

        assert_eq!(backend.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(backend.disconnects.load(Ordering::SeqCst), 1);
        assert!(conn.child.is_none());
        assert!(!lock_path.exists());
        assert!(ProfileLock::acquire(dir.path()).is_ok());
    }

    #[tokio::test]
    async fn detached_connection_rejects_calls_and_tears_down_twice() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProfileLock::acquire(dir.path()).unwrap();
        let mut conn = Connection::with_backend(Arc::new(Detached), ChromeSessionMode::Attached, 9300)
            .with_profile_lock(lock);
        assert!(conn.holds_profile_lock());
        assert!(matches!(conn.pages().await, Err(PublishError::ConnectionClosed)));
        conn.teardown().await;
        conn.teardown().await;
        assert!(conn.is_torn_down());
        assert!(!conn.holds_profile_lock());
    }
}
