//! Raw DevTools protocol transport.
//!
//! One websocket to the browser endpoint; pages are driven through
//! flattened target sessions, so every page call carries a `sessionId`.

use crate::browser::chrome;
use crate::browser::connection::BrowserBackend;
use crate::browser::driver::{Key, PageDriver, PageTarget, Point};
use crate::error::{PublishError, Result};
use async_trait::async_trait;
use base64::Engine;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Request/response multiplexer over a single DevTools websocket.
pub struct CdpTransport {
    sink: tokio::sync::Mutex<WsSink>,
    pending: Pending,
    next_id: AtomicU64,
    open: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl CdpTransport {
    pub async fn connect(ws_url: &str, call_timeout: Duration) -> Result<Arc<Self>> {
        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| PublishError::Connection(format!("websocket {}: {}", ws_url, e)))?;
        let (sink, mut reader) = stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        let reader_pending = pending.clone();
        let reader_open = open.clone();
        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("[CDP] websocket read failed: {}", e);
                        break;
                    }
                };
                if let Some((id, outcome)) = route_message(&text) {
                    let waiter = reader_pending.lock().ok().and_then(|mut map| map.remove(&id));
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(outcome);
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            drain_pending(&reader_pending);
            info!("[CDP] websocket closed");
        });

        info!("[CDP] connected {}", ws_url);
        Ok(Arc::new(Self {
            sink: tokio::sync::Mutex::new(sink),
            pending,
            next_id: AtomicU64::new(1),
            open,
            call_timeout,
        }))
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Send one command and wait for its response.
    pub async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        if !self.is_open() {
            return Err(PublishError::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut message = json!({ "id": id, "method": method, "params": params });
        if let Some(session) = session_id {
            message["sessionId"] = Value::String(session.to_string());
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| PublishError::Protocol("pending map poisoned".into()))?
            .insert(id, tx);

        let sent = self
            .sink
            .lock()
            .await
            .send(Message::Text(message.to_string()))
            .await;
        if let Err(e) = sent {
            self.forget(id);
            self.open.store(false, Ordering::SeqCst);
            return Err(PublishError::Connection(format!("send {}: {}", method, e)));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(PublishError::ConnectionClosed),
            Err(_) => {
                self.forget(id);
                Err(PublishError::timeout(method, self.call_timeout))
            }
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!("[CDP] close frame failed: {}", e);
        }
        self.open.store(false, Ordering::SeqCst);
        drain_pending(&self.pending);
    }

    fn forget(&self, id: u64) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&id);
        }
    }
}

fn drain_pending(pending: &Pending) {
    if let Ok(mut map) = pending.lock() {
        for (_, waiter) in map.drain() {
            let _ = waiter.send(Err(PublishError::ConnectionClosed));
        }
    }
}

/// Match a websocket frame to a pending call id.
///
/// Events (frames without an `id`) and malformed frames yield `None`.
pub(crate) fn route_message(text: &str) -> Option<(u64, Result<Value>)> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let id = frame.get("id")?.as_u64()?;
    if let Some(error) = frame.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        return Some((id, Err(PublishError::Protocol(format!("{} (code {})", message, code)))));
    }
    Some((id, Ok(frame.get("result").cloned().unwrap_or(Value::Null))))
}

/// Browser-level handle on the raw transport.
pub struct CdpBrowser {
    transport: Arc<CdpTransport>,
}

impl CdpBrowser {
    /// Connect through the endpoint advertised by `/json/version`.
    pub async fn connect(port: u16, call_timeout: Duration) -> Result<Self> {
        let version = chrome::fetch_version(port)
            .await
            .map_err(|e| PublishError::Connection(format!("{:#}", e)))?;
        debug!("[CDP] browser={} port={}", version.browser, port);
        let transport = CdpTransport::connect(&version.web_socket_debugger_url, call_timeout).await?;
        Ok(Self { transport })
    }
}

#[async_trait]
impl BrowserBackend for CdpBrowser {
    fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    async fn list_pages(&self) -> Result<Vec<PageTarget>> {
        let result = self.transport.call("Target.getTargets", json!({}), None).await?;
        let infos = result
            .get("targetInfos")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(infos
            .iter()
            .filter(|info| info.get("type").and_then(Value::as_str) == Some("page"))
            .map(|info| PageTarget {
                id: string_field(info, "targetId"),
                url: string_field(info, "url"),
                title: string_field(info, "title"),
            })
            .collect())
    }

    async fn attach_page(&self, target_id: &str) -> Result<Arc<dyn PageDriver>> {
        let result = self
            .transport
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| PublishError::Protocol("attachToTarget returned no sessionId".into()))?
            .to_string();

        let page = CdpPage {
            transport: self.transport.clone(),
            session_id,
            target_id: target_id.to_string(),
        };
        page.call("Page.enable", json!({})).await?;
        page.call("Runtime.enable", json!({})).await?;
        page.call("Page.bringToFront", json!({})).await?;
        debug!("[CDP] attached target={} session={}", page.target_id, page.session_id);
        Ok(Arc::new(page))
    }

    async fn open_page(&self, url: &str) -> Result<Arc<dyn PageDriver>> {
        let result = self
            .transport
            .call("Target.createTarget", json!({ "url": url }), None)
            .await?;
        let target_id = result
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| PublishError::Protocol("createTarget returned no targetId".into()))?
            .to_string();
        self.attach_page(&target_id).await
    }

    async fn shutdown_browser(&self) -> Result<()> {
        if !self.transport.is_open() {
            return Ok(());
        }
        match self.transport.call("Browser.close", json!({}), None).await {
            Ok(_) | Err(PublishError::ConnectionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn disconnect(&self) {
        self.transport.close().await;
    }
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// One page bound to a flattened target session.
pub struct CdpPage {
    transport: Arc<CdpTransport>,
    session_id: String,
    target_id: String,
}

impl CdpPage {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.transport
            .call(method, params, Some(&self.session_id))
            .await
    }

    async fn mouse_event(&self, kind: &str, point: Point, click_count: u32) -> Result<()> {
        let mut params = json!({ "type": kind, "x": point.x, "y": point.y });
        if kind != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(click_count);
        }
        self.call("Input.dispatchMouseEvent", params).await?;
        Ok(())
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("script threw");
            return Err(PublishError::Protocol(format!("evaluate: {}", text)));
        }
        Ok(result
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let result = self.call("Page.navigate", json!({ "url": url })).await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            return Err(PublishError::Protocol(format!("navigate {}: {}", url, error)));
        }
        Ok(())
    }

    async fn mouse_click(&self, point: Point) -> Result<()> {
        self.mouse_event("mouseMoved", point, 0).await?;
        self.mouse_event("mousePressed", point, 1).await?;
        self.mouse_event("mouseReleased", point, 1).await
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.call("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        self.call("Input.dispatchKeyEvent", key.key_down_params()).await?;
        self.call("Input.dispatchKeyEvent", key.key_up_params()).await?;
        Ok(())
    }

    async fn set_file_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<bool> {
        let doc = self.call("DOM.getDocument", json!({ "depth": 0 })).await?;
        let root = doc
            .pointer("/root/nodeId")
            .and_then(Value::as_i64)
            .ok_or_else(|| PublishError::Protocol("getDocument returned no root".into()))?;
        let found = self
            .call(
                "DOM.querySelector",
                json!({ "nodeId": root, "selector": selector }),
            )
            .await?;
        let node_id = found.get("nodeId").and_then(Value::as_i64).unwrap_or(0);
        if node_id == 0 {
            return Ok(false);
        }
        let paths: Vec<String> = files
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        self.call(
            "DOM.setFileInputFiles",
            json!({ "nodeId": node_id, "files": paths }),
        )
        .await?;
        Ok(true)
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        let result = self
            .call("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| PublishError::Protocol("captureScreenshot returned no data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| PublishError::Protocol(format!("screenshot decode: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_results_and_errors_by_id() {
        let (id, outcome) = route_message(r#"{"id":7,"result":{"value":1}}"#).unwrap();
        assert_eq!(id, 7);
        assert_eq!(outcome.unwrap()["value"], 1);

        let (id, outcome) =
            route_message(r#"{"id":8,"error":{"code":-32000,"message":"No node"}}"#).unwrap();
        assert_eq!(id, 8);
        match outcome {
            Err(PublishError::Protocol(msg)) => assert!(msg.contains("No node")),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[test]
    fn events_and_garbage_are_ignored() {
        assert!(route_message(r#"{"method":"Page.loadEventFired","params":{}}"#).is_none());
        assert!(route_message("not json").is_none());
    }

    #[test]
    fn missing_result_is_null() {
        let (_, outcome) = route_message(r#"{"id":3}"#).unwrap();
        assert_eq!(outcome.unwrap(), Value::Null);
    }
}
