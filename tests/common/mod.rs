#![allow(dead_code)]

use async_trait::async_trait;
use mp_publisher::browser::driver::{HitTest, Key, PageDriver, PageTarget, PasteResult, Point, Rect};
use mp_publisher::browser::{BrowserBackend, PageSource};
use mp_publisher::config::Timeouts;
use mp_publisher::element::{Candidate, DomNode, ElementDescriptor, Locator};
use mp_publisher::error::{PublishError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const HOME_URL: &str = "https://mp.weixin.qq.com/";
pub const LOGGED_IN_URL: &str =
    "https://mp.weixin.qq.com/cgi-bin/home?t=home/index&lang=zh_CN&token=12345";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate(String),
    Click(Point),
    Insert(String),
    Key(Key),
    Files(u64, Vec<PathBuf>),
    Paste(String),
}

#[derive(Default)]
struct FakeState {
    url: String,
    pending_login: Option<(usize, String)>,
    url_reads: usize,
    next_ref: u64,
    elements: HashMap<String, Vec<Candidate>>,
    proximity: HashMap<String, Vec<DomNode>>,
    rects: HashMap<u64, Rect>,
    covered: HashMap<u64, Vec<String>>,
    detached: Vec<u64>,
    reveal_on_click: HashMap<u64, Vec<(String, Candidate)>>,
    url_on_click: HashMap<u64, String>,
    paste: Option<PasteResult>,
    proximity_errors: HashMap<String, String>,
    url_errors: Option<(usize, usize, String)>,
    actions: Vec<Action>,
}

/// In-memory page: elements are registered per locator, input is recorded.
pub struct FakePage {
    state: Mutex<FakeState>,
    open: AtomicBool,
}

fn ref_from_selector(selector: &str) -> Option<u64> {
    selector
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()
}

fn rect_for(ref_id: u64) -> Rect {
    Rect::new(10.0, 40.0 * ref_id as f64, 100.0, 30.0)
}

impl FakePage {
    pub fn new(url: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                url: url.to_string(),
                next_ref: 1,
                ..FakeState::default()
            }),
            open: AtomicBool::new(true),
        })
    }

    fn candidate(state: &mut FakeState, text: &str, visible: bool) -> Candidate {
        let ref_id = state.next_ref;
        state.next_ref += 1;
        let rect = rect_for(ref_id);
        state.rects.insert(ref_id, rect);
        Candidate {
            ref_id,
            tag: "div".into(),
            text: text.into(),
            rect,
            display: if visible { "block" } else { "none" }.into(),
            visibility: "visible".into(),
        }
    }

    /// Register a visible match for `locator`; returns its ref id.
    pub fn add(&self, locator: &Locator, text: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let candidate = Self::candidate(&mut state, text, true);
        let id = candidate.ref_id;
        state
            .elements
            .entry(locator.to_string())
            .or_default()
            .push(candidate);
        id
    }

    pub fn add_hidden(&self, locator: &Locator, text: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let candidate = Self::candidate(&mut state, text, false);
        let id = candidate.ref_id;
        state
            .elements
            .entry(locator.to_string())
            .or_default()
            .push(candidate);
        id
    }

    /// Register a zero-size match (rendered but collapsed).
    pub fn add_collapsed(&self, locator: &Locator) -> u64 {
        let mut state = self.state.lock().unwrap();
        let mut candidate = Self::candidate(&mut state, "", true);
        candidate.rect = Rect::default();
        let id = candidate.ref_id;
        state
            .elements
            .entry(locator.to_string())
            .or_default()
            .push(candidate);
        id
    }

    /// Register a match on the descriptor's first locator.
    pub fn add_element(&self, descriptor: &ElementDescriptor) -> u64 {
        self.add(&descriptor.locators[0], &descriptor.name)
    }

    pub fn add_proximity(&self, anchor: &str, root: DomNode) {
        let mut state = self.state.lock().unwrap();
        fn register(node: &DomNode, rects: &mut HashMap<u64, Rect>) {
            rects.insert(node.ref_id, node.rect);
            for child in &node.children {
                register(child, rects);
            }
        }
        register(&root, &mut state.rects);
        state.proximity.entry(anchor.to_string()).or_default().push(root);
    }

    /// Hit tests on `ref_id` report it covered by `by` this many times.
    pub fn cover(&self, ref_id: u64, times: usize, by: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .covered
            .insert(ref_id, std::iter::repeat(by.to_string()).take(times).collect());
    }

    pub fn detach(&self, ref_id: u64) {
        self.state.lock().unwrap().detached.push(ref_id);
    }

    /// Clicking `ref_id` makes `locator` match a new visible element.
    pub fn reveal_on_click(&self, ref_id: u64, locator: &Locator, text: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let candidate = Self::candidate(&mut state, text, true);
        let id = candidate.ref_id;
        state
            .reveal_on_click
            .entry(ref_id)
            .or_default()
            .push((locator.to_string(), candidate));
        id
    }

    pub fn url_on_click(&self, ref_id: u64, url: &str) {
        self.state
            .lock()
            .unwrap()
            .url_on_click
            .insert(ref_id, url.to_string());
    }

    /// The URL switches to `url` after `reads` URL probes.
    pub fn login_after(&self, reads: usize, url: &str) {
        self.state.lock().unwrap().pending_login = Some((reads, url.to_string()));
    }

    /// Proximity snapshots around `anchor` fail with a script error.
    pub fn fail_proximity(&self, anchor: &str, message: &str) {
        self.state
            .lock()
            .unwrap()
            .proximity_errors
            .insert(anchor.to_string(), message.to_string());
    }

    /// URL reads number `first..first + count` (1-based) fail with a script error.
    pub fn fail_url_reads(&self, first: usize, count: usize, message: &str) {
        self.state.lock().unwrap().url_errors = Some((first, count, message.to_string()));
    }

    pub fn set_paste_result(&self, result: PasteResult) {
        self.state.lock().unwrap().paste = Some(result);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    pub fn url(&self) -> String {
        self.state.lock().unwrap().url.clone()
    }

    pub fn inserted_text(&self) -> String {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Insert(text) => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("|")
    }

    pub fn clicks_on(&self, ref_id: u64) -> usize {
        let center = rect_for(ref_id).center();
        self.actions()
            .iter()
            .filter(|a| **a == Action::Click(center))
            .count()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Key(key) => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Navigate(url) => Some(url),
                _ => None,
            })
            .collect()
    }

    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PublishError::ConnectionClosed)
        }
    }

    fn record(&self, action: Action) {
        self.state.lock().unwrap().actions.push(action);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn evaluate(&self, _expression: &str) -> Result<Value> {
        self.check_open()?;
        Ok(Value::Null)
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        state.url = url.to_string();
        state.actions.push(Action::Navigate(url.to_string()));
        Ok(())
    }

    async fn mouse_click(&self, point: Point) -> Result<()> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Click(point));
        let clicked = state
            .rects
            .iter()
            .find(|(_, rect)| rect.center() == point)
            .map(|(id, _)| *id);
        if let Some(id) = clicked {
            if let Some(revealed) = state.reveal_on_click.remove(&id) {
                for (locator, candidate) in revealed {
                    state.elements.entry(locator).or_default().push(candidate);
                }
            }
            if let Some(url) = state.url_on_click.get(&id).cloned() {
                state.url = url;
            }
        }
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.check_open()?;
        self.record(Action::Insert(text.to_string()));
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        self.check_open()?;
        self.record(Action::Key(key));
        Ok(())
    }

    async fn set_file_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<bool> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        match ref_from_selector(selector) {
            Some(id) if state.rects.contains_key(&id) && !state.detached.contains(&id) => {
                state.actions.push(Action::Files(id, files.to_vec()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.check_open()?;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn current_url(&self) -> Result<String> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        state.url_reads += 1;
        if let Some((first, count, message)) = &state.url_errors {
            if (*first..*first + *count).contains(&state.url_reads) {
                return Err(PublishError::Protocol(message.clone()));
            }
        }
        if let Some((reads, url)) = state.pending_login.clone() {
            if state.url_reads > reads {
                state.url = url;
                state.pending_login = None;
            }
        }
        Ok(state.url.clone())
    }

    async fn query_candidates(&self, locator: &Locator, limit: usize) -> Result<Vec<Candidate>> {
        self.check_open()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .elements
            .get(&locator.to_string())
            .map(|found| {
                found
                    .iter()
                    .filter(|c| !state.detached.contains(&c.ref_id))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn proximity_snapshot(&self, anchor: &str, _ancestor_depth: usize) -> Result<Vec<DomNode>> {
        self.check_open()?;
        let state = self.state.lock().unwrap();
        if let Some(message) = state.proximity_errors.get(anchor) {
            return Err(PublishError::Protocol(message.clone()));
        }
        Ok(state.proximity.get(anchor).cloned().unwrap_or_default())
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<Option<Rect>> {
        self.check_open()?;
        let state = self.state.lock().unwrap();
        Ok(ref_from_selector(selector)
            .filter(|id| !state.detached.contains(id))
            .and_then(|id| state.rects.get(&id).copied()))
    }

    async fn hit_test(&self, selector: &str, _point: Point) -> Result<HitTest> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        let Some(id) = ref_from_selector(selector) else {
            return Ok(HitTest::Missing);
        };
        if state.detached.contains(&id) {
            return Ok(HitTest::Missing);
        }
        if let Some(queue) = state.covered.get_mut(&id) {
            if let Some(by) = queue.pop() {
                return Ok(HitTest::Covered(by));
            }
        }
        Ok(HitTest::Hit)
    }

    async fn dispatch_paste(&self, _selector: &str, html: &str, _text: &str) -> Result<PasteResult> {
        self.check_open()?;
        let mut state = self.state.lock().unwrap();
        state.actions.push(Action::Paste(html.to_string()));
        Ok(state.paste.unwrap_or(PasteResult::Handled))
    }
}

/// Hands out the same page for every request.
pub struct FakeSource {
    pub page: Arc<FakePage>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(page: Arc<FakePage>) -> Self {
        Self {
            page,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageSource for FakeSource {
    async fn resolve_page(&self, pattern: &str, _fallback_url: &str) -> Result<Arc<dyn PageDriver>> {
        self.page.check_open()?;
        self.requests.lock().unwrap().push(pattern.to_string());
        Ok(self.page.clone())
    }
}

/// Browser with a fixed tab list; attaching or opening yields `page`.
pub struct FakeBackend {
    pub page: Arc<FakePage>,
    pub tabs: Vec<PageTarget>,
    pub open: AtomicBool,
    pub attached: Mutex<Vec<String>>,
    pub opened: Mutex<Vec<String>>,
    pub shutdowns: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeBackend {
    pub fn new(page: Arc<FakePage>, tabs: Vec<PageTarget>) -> Arc<Self> {
        Arc::new(Self {
            page,
            tabs,
            open: AtomicBool::new(true),
            attached: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            shutdowns: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BrowserBackend for FakeBackend {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn list_pages(&self) -> Result<Vec<PageTarget>> {
        Ok(self.tabs.clone())
    }

    async fn attach_page(&self, target_id: &str) -> Result<Arc<dyn PageDriver>> {
        self.attached.lock().unwrap().push(target_id.to_string());
        Ok(self.page.clone())
    }

    async fn open_page(&self, url: &str) -> Result<Arc<dyn PageDriver>> {
        self.opened.lock().unwrap().push(url.to_string());
        self.page.navigate(url).await?;
        Ok(self.page.clone())
    }

    async fn shutdown_browser(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.page.close();
    }
}

pub fn tab(id: &str, url: &str) -> PageTarget {
    PageTarget {
        id: id.into(),
        url: url.into(),
        title: String::new(),
    }
}

/// Short bounds so paused-clock tests stay quick to reason about.
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        login_wait_secs: 10,
        login_poll_ms: 100,
        publish_confirm_secs: 10,
        element_timeout_ms: 500,
        element_poll_ms: 50,
        optional_timeout_ms: 200,
        settle_ms: 10,
        upload_settle_ms: 20,
        chrome_ready_secs: 1,
        cdp_call_timeout_secs: 1,
    }
}

/// Proximity-tree leaf whose box matches what `FakePage::clicks_on` expects.
pub fn dom(ref_id: u64, text: &str) -> DomNode {
    DomNode {
        ref_id,
        tag: "span".into(),
        text: text.into(),
        rect: rect_for(ref_id),
        display: "inline".into(),
        visibility: "visible".into(),
        ..Default::default()
    }
}

pub fn dom_label(ref_id: u64, text: &str) -> DomNode {
    DomNode {
        anchor: true,
        ..dom(ref_id, text)
    }
}

pub fn dom_row(ref_id: u64, children: Vec<DomNode>) -> DomNode {
    let text = children
        .iter()
        .map(|c| c.text.clone())
        .collect::<Vec<_>>()
        .join(" ");
    DomNode {
        tag: "div".into(),
        children,
        ..dom(ref_id, &text)
    }
}
