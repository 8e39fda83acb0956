//! chromiumoxide-backed transport.

use crate::browser::connection::BrowserBackend;
use crate::browser::driver::{Key, PageDriver, PageTarget, Point};
use crate::error::{PublishError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::dom::{
    GetDocumentParams, QuerySelectorParams, SetFileInputFilesParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchMouseEventParams, DispatchMouseEventType, InsertTextParams,
    MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use log::{debug, info};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

fn cdp_err(context: &str, e: impl std::fmt::Display) -> PublishError {
    PublishError::Protocol(format!("{}: {}", context, e))
}

pub struct ChromiumBrowser {
    browser: Mutex<Browser>,
    open: Arc<AtomicBool>,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    /// Connect to a Chrome already listening on `port`.
    pub async fn connect(port: u16) -> Result<Self> {
        let debug_url = format!("http://127.0.0.1:{}", port);
        let (browser, mut handler) = Browser::connect(&debug_url)
            .await
            .map_err(|e| PublishError::Connection(format!("chromium connect {}: {}", debug_url, e)))?;

        let open = Arc::new(AtomicBool::new(true));
        let handler_open = open.clone();
        let handler = tokio::spawn(async move {
            while let Some(_event) = handler.next().await {}
            handler_open.store(false, Ordering::SeqCst);
            info!("[Chromium] handler loop ended");
        });

        info!("[Chromium] connected on port {}", port);
        Ok(Self {
            browser: Mutex::new(browser),
            open,
            handler,
        })
    }

    fn wrap(&self, page: Page) -> Arc<dyn PageDriver> {
        Arc::new(ChromiumPage {
            page,
            open: self.open.clone(),
        })
    }
}

#[async_trait]
impl BrowserBackend for ChromiumBrowser {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn list_pages(&self) -> Result<Vec<PageTarget>> {
        let pages = self
            .browser
            .lock()
            .await
            .pages()
            .await
            .map_err(|e| cdp_err("pages", e))?;
        let mut targets = Vec::with_capacity(pages.len());
        for page in pages {
            let url = page.url().await.ok().flatten().unwrap_or_default();
            let title = page.get_title().await.ok().flatten().unwrap_or_default();
            targets.push(PageTarget {
                id: page.target_id().inner().clone(),
                url,
                title,
            });
        }
        Ok(targets)
    }

    async fn attach_page(&self, target_id: &str) -> Result<Arc<dyn PageDriver>> {
        let pages = self
            .browser
            .lock()
            .await
            .pages()
            .await
            .map_err(|e| cdp_err("pages", e))?;
        let page = pages
            .into_iter()
            .find(|p| p.target_id().inner().as_str() == target_id)
            .ok_or_else(|| PublishError::Protocol(format!("no page with target id {}", target_id)))?;
        page.bring_to_front()
            .await
            .map_err(|e| cdp_err("bringToFront", e))?;
        Ok(self.wrap(page))
    }

    async fn open_page(&self, url: &str) -> Result<Arc<dyn PageDriver>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page(url)
            .await
            .map_err(|e| cdp_err("new_page", e))?;
        debug!("[Chromium] opened {}", url);
        Ok(self.wrap(page))
    }

    async fn shutdown_browser(&self) -> Result<()> {
        if !self.is_open() {
            return Ok(());
        }
        self.browser
            .lock()
            .await
            .close()
            .await
            .map_err(|e| cdp_err("Browser.close", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.handler.abort();
    }
}

pub struct ChromiumPage {
    page: Page,
    open: Arc<AtomicBool>,
}

impl ChromiumPage {
    async fn mouse_event(&self, kind: DispatchMouseEventType, point: Point) -> Result<()> {
        let mut builder = DispatchMouseEventParams::builder()
            .r#type(kind.clone())
            .x(point.x)
            .y(point.y);
        if kind != DispatchMouseEventType::MouseMoved {
            builder = builder.button(MouseButton::Left).click_count(1);
        }
        let params = builder.build().map_err(|e| cdp_err("mouse params", e))?;
        self.page
            .execute(params)
            .await
            .map_err(|e| cdp_err("Input.dispatchMouseEvent", e))?;
        Ok(())
    }

    async fn key_event(&self, params: Value) -> Result<()> {
        let params: DispatchKeyEventParams = serde_json::from_value(params)?;
        self.page
            .execute(params)
            .await
            .map_err(|e| cdp_err("Input.dispatchKeyEvent", e))?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(|e| cdp_err("evaluate", e))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| cdp_err("navigate", e))?;
        Ok(())
    }

    async fn mouse_click(&self, point: Point) -> Result<()> {
        self.mouse_event(DispatchMouseEventType::MouseMoved, point).await?;
        self.mouse_event(DispatchMouseEventType::MousePressed, point).await?;
        self.mouse_event(DispatchMouseEventType::MouseReleased, point).await
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.page
            .execute(InsertTextParams::new(text))
            .await
            .map_err(|e| cdp_err("Input.insertText", e))?;
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        self.key_event(key.key_down_params()).await?;
        self.key_event(key.key_up_params()).await
    }

    async fn set_file_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<bool> {
        let doc = self
            .page
            .execute(GetDocumentParams::builder().depth(0).build())
            .await
            .map_err(|e| cdp_err("DOM.getDocument", e))?;
        let query = QuerySelectorParams::new(doc.result.root.node_id, selector);
        let node_id = match self.page.execute(query).await {
            Ok(found) => found.result.node_id,
            Err(e) => {
                debug!("[Chromium] querySelector {} failed: {}", selector, e);
                return Ok(false);
            }
        };
        if *node_id.inner() == 0 {
            return Ok(false);
        }

        let paths = files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        let mut set_files = SetFileInputFilesParams::new(paths);
        set_files.node_id = Some(node_id);
        self.page
            .execute(set_files)
            .await
            .map_err(|e| cdp_err("DOM.setFileInputFiles", e))?;
        Ok(true)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| cdp_err("screenshot", e))
    }
}
