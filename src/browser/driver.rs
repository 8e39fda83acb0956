use crate::browser::js;
use crate::element::{Candidate, DomNode, Locator};
use crate::error::{PublishError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Backspace,
    Escape,
    SelectAll,
}

impl Key {
    /// `Input.dispatchKeyEvent` fields for the key-down half of the press.
    pub fn key_down_params(&self) -> Value {
        match self {
            Self::Enter => serde_json::json!({
                "type": "keyDown",
                "key": "Enter",
                "code": "Enter",
                "windowsVirtualKeyCode": 13,
                "nativeVirtualKeyCode": 13,
                "text": "\r",
                "unmodifiedText": "\r",
            }),
            Self::Backspace => serde_json::json!({
                "type": "rawKeyDown",
                "key": "Backspace",
                "code": "Backspace",
                "windowsVirtualKeyCode": 8,
                "nativeVirtualKeyCode": 8,
            }),
            Self::Escape => serde_json::json!({
                "type": "rawKeyDown",
                "key": "Escape",
                "code": "Escape",
                "windowsVirtualKeyCode": 27,
                "nativeVirtualKeyCode": 27,
            }),
            Self::SelectAll => serde_json::json!({
                "type": "rawKeyDown",
                "key": "a",
                "code": "KeyA",
                "windowsVirtualKeyCode": 65,
                "nativeVirtualKeyCode": 65,
                "modifiers": if cfg!(target_os = "macos") { 4 } else { 2 },
                "commands": ["selectAll"],
            }),
        }
    }

    pub fn key_up_params(&self) -> Value {
        let mut params = self.key_down_params();
        if let Some(obj) = params.as_object_mut() {
            obj.insert("type".into(), Value::String("keyUp".into()));
            obj.remove("text");
            obj.remove("unmodifiedText");
            obj.remove("commands");
        }
        params
    }
}

/// One open tab as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    pub id: String,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HitTest {
    Hit,
    Covered(String),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasteResult {
    /// The editor consumed the event (called `preventDefault`).
    Handled,
    /// The event was delivered but nothing claimed it.
    Unhandled,
    Missing,
}

/// A controllable page.
///
/// Transports implement the raw methods; the DOM probes have default
/// implementations on top of `evaluate` that both transports share.
#[async_trait]
pub trait PageDriver: Send + Sync {
    fn is_open(&self) -> bool;

    async fn evaluate(&self, expression: &str) -> Result<Value>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn mouse_click(&self, point: Point) -> Result<()>;

    async fn insert_text(&self, text: &str) -> Result<()>;

    async fn press_key(&self, key: Key) -> Result<()>;

    /// Returns `false` when `selector` matched nothing.
    async fn set_file_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<bool>;

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Err(PublishError::NotSupported("screenshot".into()))
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.evaluate("window.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn query_candidates(&self, locator: &Locator, limit: usize) -> Result<Vec<Candidate>> {
        let script = js::query_candidates(locator, limit)?;
        evaluate_json(self, &script).await
    }

    async fn proximity_snapshot(&self, anchor: &str, ancestor_depth: usize) -> Result<Vec<DomNode>> {
        let script = js::proximity_snapshot(anchor, ancestor_depth)?;
        evaluate_json(self, &script).await
    }

    /// Scrolls the element to the viewport centre and returns its fresh box.
    async fn scroll_into_view(&self, selector: &str) -> Result<Option<Rect>> {
        let script = js::scroll_into_view(selector)?;
        evaluate_json(self, &script).await
    }

    async fn hit_test(&self, selector: &str, point: Point) -> Result<HitTest> {
        let script = js::hit_test(selector, point)?;
        let raw: String = evaluate_json(self, &script).await?;
        Ok(match raw.as_str() {
            "hit" => HitTest::Hit,
            "missing" => HitTest::Missing,
            other => HitTest::Covered(other.trim_start_matches("covered:").to_string()),
        })
    }

    async fn dispatch_paste(&self, selector: &str, html: &str, text: &str) -> Result<PasteResult> {
        let script = js::dispatch_paste(selector, html, text)?;
        let raw: String = evaluate_json(self, &script).await?;
        Ok(match raw.as_str() {
            "handled" => PasteResult::Handled,
            "unhandled" => PasteResult::Unhandled,
            _ => PasteResult::Missing,
        })
    }
}

/// Evaluate a script that returns `JSON.stringify(...)` and decode it.
///
/// Scripts stringify on the page side so both transports hand back a plain
/// string regardless of how they serialise remote objects.
pub async fn evaluate_json<T, D>(driver: &D, script: &str) -> Result<T>
where
    T: DeserializeOwned,
    D: PageDriver + ?Sized,
{
    match driver.evaluate(script).await? {
        Value::String(raw) => Ok(serde_json::from_str(&raw)?),
        Value::Null => Ok(serde_json::from_value(Value::Null)?),
        other => Ok(serde_json::from_value(other)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_center_and_area() {
        let rect = Rect::new(10.0, 20.0, 100.0, 40.0);
        assert!(rect.has_area());
        assert_eq!(rect.center(), Point { x: 60.0, y: 40.0 });
        assert!(!Rect::new(10.0, 20.0, 0.0, 40.0).has_area());
    }

    #[test]
    fn key_up_drops_text_payload() {
        let down = Key::Enter.key_down_params();
        let up = Key::Enter.key_up_params();
        assert_eq!(down["text"], "\r");
        assert_eq!(up["type"], "keyUp");
        assert!(up.get("text").is_none());
        assert!(Key::SelectAll.key_up_params().get("commands").is_none());
    }
}
