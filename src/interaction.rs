//! Atomic UI actions.
//!
//! Expected misses (element gone, element covered, paste ignored) come back
//! as an [`ActionOutcome`]; only transport trouble is an `Err`.

use crate::browser::driver::{HitTest, Key, PageDriver, PasteResult, Point};
use crate::element::{get_bounding_center, ResolvedElement};
use crate::error::{PublishError, Result};
use log::{debug, info, warn};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const COVERED_RETRY_WAIT_MS: u64 = 400;
pub const FOCUS_SETTLE_MS: u64 = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    /// Another element sits on top of the target (reported after one retry).
    Covered(String),
    /// The element left the DOM or has no box any more.
    Detached,
    /// The page did not take the action, e.g. nobody handled a paste.
    Rejected(String),
}

impl ActionOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Completed => "completed".to_string(),
            Self::Covered(by) => format!("covered by {}", by),
            Self::Detached => "element detached".to_string(),
            Self::Rejected(reason) => format!("rejected: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ClickTarget<'a> {
    Element(&'a ResolvedElement),
    At(Point),
}

fn ensure_open(page: &dyn PageDriver) -> Result<()> {
    if page.is_open() {
        Ok(())
    } else {
        Err(PublishError::ConnectionClosed)
    }
}

/// Press and release the left button on the target.
///
/// Elements are scrolled into view and hit-tested first; a covered element
/// gets one retry after a short wait.
pub async fn click(page: &dyn PageDriver, target: ClickTarget<'_>) -> Result<ActionOutcome> {
    ensure_open(page)?;
    let element = match target {
        ClickTarget::At(point) => {
            page.mouse_click(point).await?;
            return Ok(ActionOutcome::Completed);
        }
        ClickTarget::Element(element) => element,
    };

    let selector = element.selector();
    let mut covered_by = String::new();
    for attempt in 0..2 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(COVERED_RETRY_WAIT_MS)).await;
        }
        let Some(point) = get_bounding_center(page, element).await? else {
            return Ok(ActionOutcome::Detached);
        };
        match page.hit_test(&selector, point).await? {
            HitTest::Hit => {
                page.mouse_click(point).await?;
                debug!(
                    "[Click] {} at ({:.0},{:.0}) attempt={}",
                    element.target, point.x, point.y, attempt
                );
                return Ok(ActionOutcome::Completed);
            }
            HitTest::Missing => return Ok(ActionOutcome::Detached),
            HitTest::Covered(by) => {
                debug!("[Click] {} covered by {} attempt={}", element.target, by, attempt);
                covered_by = by;
            }
        }
    }
    warn!("[Click] {} still covered by {}", element.target, covered_by);
    Ok(ActionOutcome::Covered(covered_by))
}

/// Click into the element, then insert `text` line by line.
///
/// Line breaks are sent as Enter key presses; contenteditable regions do
/// not turn a literal `\n` into a new paragraph.
pub async fn type_text(
    page: &dyn PageDriver,
    element: &ResolvedElement,
    text: &str,
) -> Result<ActionOutcome> {
    let focused = click(page, ClickTarget::Element(element)).await?;
    if !focused.is_completed() {
        return Ok(focused);
    }
    tokio::time::sleep(Duration::from_millis(FOCUS_SETTLE_MS)).await;

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            page.press_key(Key::Enter).await?;
        }
        let line = line.trim_end_matches('\r');
        if !line.is_empty() {
            page.insert_text(line).await?;
        }
    }
    Ok(ActionOutcome::Completed)
}

/// Select everything in a focused field and delete it.
pub async fn clear_field(page: &dyn PageDriver, element: &ResolvedElement) -> Result<ActionOutcome> {
    let focused = click(page, ClickTarget::Element(element)).await?;
    if !focused.is_completed() {
        return Ok(focused);
    }
    page.press_key(Key::SelectAll).await?;
    page.press_key(Key::Backspace).await?;
    Ok(ActionOutcome::Completed)
}

/// Check that every path is an existing, readable file and make it absolute.
pub fn check_upload_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    paths
        .iter()
        .map(|path| {
            let readable = path.is_file() && std::fs::File::open(path).is_ok();
            if !readable {
                return Err(PublishError::FileNotFound(path.clone()));
            }
            Ok(absolute(path))
        })
        .collect()
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Attach local files to a file input.
///
/// Paths are checked before anything is sent to the browser.
pub async fn set_files(
    page: &dyn PageDriver,
    input: &ResolvedElement,
    paths: &[PathBuf],
) -> Result<ActionOutcome> {
    let files = check_upload_files(paths)?;
    ensure_open(page)?;
    if !page.set_file_input_files(&input.selector(), &files).await? {
        return Ok(ActionOutcome::Detached);
    }
    info!("[Upload] {} <- {} file(s)", input.target, files.len());
    Ok(ActionOutcome::Completed)
}

/// Deliver a paste event carrying both HTML and plain text.
pub async fn paste_rich_content(
    page: &dyn PageDriver,
    element: &ResolvedElement,
    html: &str,
    plain_text_fallback: &str,
) -> Result<ActionOutcome> {
    let focused = click(page, ClickTarget::Element(element)).await?;
    if !focused.is_completed() {
        return Ok(focused);
    }
    tokio::time::sleep(Duration::from_millis(FOCUS_SETTLE_MS)).await;
    let outcome = match page
        .dispatch_paste(&element.selector(), html, plain_text_fallback)
        .await?
    {
        PasteResult::Handled => ActionOutcome::Completed,
        PasteResult::Unhandled => ActionOutcome::Rejected("paste event not handled".into()),
        PasteResult::Missing => ActionOutcome::Detached,
    };
    info!(
        "[Paste] {} html_len={} text_len={} outcome={}",
        element.target,
        html.len(),
        plain_text_fallback.len(),
        outcome.describe()
    );
    Ok(outcome)
}

/// Run a read-only query in the page, e.g. a URL or count probe.
pub async fn evaluate_in_page(page: &dyn PageDriver, expression: &str) -> Result<Value> {
    ensure_open(page)?;
    page.evaluate(expression).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_check_rejects_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("cover.png");
        std::fs::write(&present, b"png").unwrap();
        let missing = dir.path().join("absent.png");

        let ok = check_upload_files(&[present.clone()]).unwrap();
        assert!(ok[0].is_absolute());

        match check_upload_files(&[present, missing.clone()]) {
            Err(PublishError::FileNotFound(path)) => assert_eq!(path, missing),
            other => panic!("expected FileNotFound, got {:?}", other),
        }
    }

    #[test]
    fn directories_are_not_uploadable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_upload_files(&[dir.path().to_path_buf()]).is_err());
    }
}
