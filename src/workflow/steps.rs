//! Step bodies used by the orchestrator.
//!
//! Each returns a short detail string on success. Whether a failure blocks
//! the run is decided by the caller, not here.

use crate::browser::driver::{Key, PageDriver};
use crate::config::Timeouts;
use crate::element::{
    find_by_proximity, find_first_visible, ElementDescriptor, NotFound, Resolution, ResolveOptions,
    ResolvedElement,
};
use crate::error::PublishError;
use crate::interaction::{self, ActionOutcome, ClickTarget};
use crate::platforms::traits::{extract_token, CoverFlow, DialogAction, FlagFlow, SiteProfile, SubmitControls};
use crate::workflow::request::PublishRequest;
use crate::workflow::result::{ErrorInfo, ErrorKind};
use crate::workflow::state::Stage;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub(crate) enum StepError {
    NotFound(NotFound),
    Interaction {
        target: String,
        outcome: ActionOutcome,
    },
    Timeout {
        what: String,
        after: Duration,
    },
    Transport(PublishError),
}

impl From<PublishError> for StepError {
    fn from(error: PublishError) -> Self {
        Self::Transport(error)
    }
}

impl StepError {
    /// Only a lost connection ends the run from inside a best-effort step;
    /// any other error costs the step alone.
    pub(crate) fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connection_lost() || matches!(e, PublishError::Cancelled),
            _ => false,
        }
    }

    pub(crate) fn detail(&self) -> String {
        match self {
            Self::NotFound(miss) => format!(
                "{} not found after {}ms",
                miss.target,
                miss.waited.as_millis()
            ),
            Self::Interaction { target, outcome } => format!("{}: {}", target, outcome.describe()),
            Self::Timeout { what, after } => format!("{} did not complete within {:?}", what, after),
            Self::Transport(e) => e.to_string(),
        }
    }

    pub(crate) fn trace(&self) -> Vec<String> {
        match self {
            Self::NotFound(miss) => miss.trace(),
            _ => Vec::new(),
        }
    }

    /// Diagnostic for a step whose failure stops the run.
    pub(crate) fn into_info(self, step: &str, stage: Stage) -> ErrorInfo {
        let kind = match &self {
            Self::NotFound(_) => ErrorKind::ElementNotFound,
            Self::Interaction { .. } => ErrorKind::Interaction,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Transport(e) => return ErrorInfo::from_error(step, stage, e),
        };
        let trace = self.trace();
        ErrorInfo::new(kind, step, stage, self.detail()).with_trace(trace)
    }
}

fn expect_completed(element: &ResolvedElement, outcome: ActionOutcome) -> Result<(), StepError> {
    if outcome.is_completed() {
        Ok(())
    } else {
        Err(StepError::Interaction {
            target: element.target.clone(),
            outcome,
        })
    }
}

pub(crate) struct StepContext<'a> {
    pub page: &'a dyn PageDriver,
    pub timeouts: &'a Timeouts,
}

impl<'a> StepContext<'a> {
    pub fn required(&self) -> ResolveOptions {
        ResolveOptions {
            timeout: self.timeouts.element(),
            poll_interval: self.timeouts.element_poll(),
            ..ResolveOptions::default()
        }
    }

    pub fn optional(&self) -> ResolveOptions {
        self.required().with_timeout(self.timeouts.optional())
    }

    pub async fn settle(&self) {
        tokio::time::sleep(self.timeouts.settle()).await;
    }

    pub async fn resolve(
        &self,
        descriptor: &ElementDescriptor,
        options: ResolveOptions,
    ) -> Result<ResolvedElement, StepError> {
        match find_first_visible(self.page, descriptor, &options).await? {
            Resolution::Found(element) => Ok(element),
            Resolution::NotFound(miss) => Err(StepError::NotFound(miss)),
        }
    }

    pub async fn click_element(&self, element: &ResolvedElement) -> Result<(), StepError> {
        let outcome = interaction::click(self.page, ClickTarget::Element(element)).await?;
        expect_completed(element, outcome)
    }

    pub async fn click(
        &self,
        descriptor: &ElementDescriptor,
        options: ResolveOptions,
    ) -> Result<ResolvedElement, StepError> {
        let element = self.resolve(descriptor, options).await?;
        self.click_element(&element).await?;
        Ok(element)
    }

    /// `Ok(false)` when the element never showed up.
    pub async fn click_if_present(&self, descriptor: &ElementDescriptor) -> Result<bool, StepError> {
        match self.resolve(descriptor, self.optional()).await {
            Ok(element) => {
                self.click_element(&element).await?;
                Ok(true)
            }
            Err(StepError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn fill(
        &self,
        descriptor: &ElementDescriptor,
        text: &str,
        options: ResolveOptions,
    ) -> Result<String, StepError> {
        let field = self.resolve(descriptor, options).await?;
        let cleared = interaction::clear_field(self.page, &field).await?;
        expect_completed(&field, cleared)?;
        let typed = interaction::type_text(self.page, &field, text).await?;
        expect_completed(&field, typed)?;
        Ok(format!("{} chars via {}", text.chars().count(), field.locator))
    }

    pub async fn upload(
        &self,
        descriptor: &ElementDescriptor,
        files: &[PathBuf],
        options: ResolveOptions,
    ) -> Result<String, StepError> {
        let input = self.resolve(descriptor, options.allow_hidden()).await?;
        let outcome = interaction::set_files(self.page, &input, files).await?;
        expect_completed(&input, outcome)?;
        tokio::time::sleep(self.timeouts.upload_settle()).await;
        Ok(format!("{} file(s) via {}", files.len(), input.locator))
    }

    /// Best-effort Escape to close a half-finished dialog.
    pub async fn dismiss_dialog(&self) {
        if let Err(e) = self.page.press_key(Key::Escape).await {
            debug!("[MP dialog] escape failed: {}", e);
        }
    }
}

/// Poll the page URL until it shows a logged-in session with a token.
pub(crate) async fn wait_for_login(
    page: &dyn PageDriver,
    profile: &SiteProfile,
    timeouts: &Timeouts,
) -> Result<String, StepError> {
    let start = Instant::now();
    let mut announced = false;
    loop {
        let url = match page.current_url().await {
            Ok(url) => url,
            Err(e) if e.is_connection_lost() => return Err(e.into()),
            // Navigation after the QR scan tears the execution context down.
            Err(e) => {
                debug!("[MP login] url read failed, polling again: {}", e);
                String::new()
            }
        };
        if profile.is_logged_in_url(&url) && extract_token(&url).is_some() {
            info!(
                "[MP login] logged in after {}s",
                start.elapsed().as_secs()
            );
            return Ok(url);
        }
        if start.elapsed() >= timeouts.login_wait() {
            return Err(StepError::Timeout {
                what: "login".into(),
                after: timeouts.login_wait(),
            });
        }
        if !announced {
            announced = true;
            info!(
                "[MP login] waiting for QR-code login, up to {}s (url={})",
                timeouts.login_wait().as_secs(),
                url
            );
        }
        tokio::time::sleep(timeouts.login_poll()).await;
    }
}

/// Open picker, upload, pick from library, confirm. Stops at the first
/// sub-step that fails.
pub(crate) async fn cover_flow(
    ctx: &StepContext<'_>,
    flow: &CoverFlow,
    cover: &Path,
) -> Result<String, StepError> {
    ctx.click(&flow.entry, ctx.optional()).await?;
    ctx.settle().await;
    ctx.click(&flow.picker_entry, ctx.optional()).await?;
    ctx.settle().await;
    ctx.upload(&flow.file_input, &[cover.to_path_buf()], ctx.optional())
        .await?;
    ctx.click(&flow.library_item, ctx.optional()).await?;
    ctx.settle().await;
    let cropped = ctx.click_if_present(&flow.next).await?;
    if cropped {
        ctx.settle().await;
    }
    ctx.click(&flow.confirm, ctx.optional()).await?;
    ctx.settle().await;
    Ok(format!(
        "cover {} set{}",
        cover.display(),
        if cropped { " (cropped)" } else { "" }
    ))
}

/// Label-relative settings dialog: value -> dialog actions -> confirm.
pub(crate) async fn flag_flow(
    ctx: &StepContext<'_>,
    flow: &FlagFlow,
    choice: Option<&str>,
) -> Result<String, StepError> {
    let value = match find_by_proximity(ctx.page, &flow.value, &ctx.optional()).await? {
        Resolution::Found(element) => element,
        Resolution::NotFound(miss) => return Err(StepError::NotFound(miss)),
    };
    debug!("[MP {}] value element text={:?}", flow.name, value.text);
    ctx.click_element(&value).await?;
    ctx.settle().await;

    for action in &flow.dialog {
        match action {
            DialogAction::Click(descriptor) => {
                ctx.click(descriptor, ctx.optional()).await?;
            }
            DialogAction::ClickIfPresent(descriptor) => {
                if !ctx.click_if_present(descriptor).await? {
                    debug!("[MP {}] {} not shown, skipped", flow.name, descriptor.name);
                }
            }
            DialogAction::ChooseByText { scope } => {
                let Some(choice) = choice else { continue };
                let option = ElementDescriptor::new(format!("{} option {:?}", flow.name, choice))
                    .text(scope.as_str(), choice);
                ctx.click(&option, ctx.optional()).await?;
            }
        }
        ctx.settle().await;
    }

    ctx.click(&flow.confirm, ctx.optional()).await?;
    ctx.settle().await;
    Ok(format!("{} set (was {:?})", flow.name, value.text))
}

/// Paste an article body, falling back to typed plain text when the editor
/// ignores the paste.
pub(crate) async fn insert_article_body(
    ctx: &StepContext<'_>,
    body: &ElementDescriptor,
    request: &PublishRequest,
) -> Result<String, StepError> {
    let editor = ctx.resolve(body, ctx.required()).await?;
    if !request.is_html() {
        let typed = interaction::type_text(ctx.page, &editor, &request.content).await?;
        expect_completed(&editor, typed)?;
        return Ok(format!("typed {} chars", request.content.chars().count()));
    }

    let plain = request.plain_text();
    let pasted = interaction::paste_rich_content(ctx.page, &editor, &request.content, &plain).await?;
    match pasted {
        ActionOutcome::Completed => Ok(format!("pasted html_len={}", request.content.len())),
        ActionOutcome::Rejected(reason) => {
            warn!("[MP content] paste {}, typing plain text instead", reason);
            let typed = interaction::type_text(ctx.page, &editor, &plain).await?;
            expect_completed(&editor, typed)?;
            Ok(format!("typed fallback {} chars", plain.chars().count()))
        }
        other => Err(StepError::Interaction {
            target: editor.target,
            outcome: other,
        }),
    }
}

pub(crate) async fn type_body(
    ctx: &StepContext<'_>,
    body: &ElementDescriptor,
    text: &str,
) -> Result<String, StepError> {
    let editor = ctx.resolve(body, ctx.required()).await?;
    let typed = interaction::type_text(ctx.page, &editor, text).await?;
    expect_completed(&editor, typed)?;
    Ok(format!("typed {} chars", text.chars().count()))
}

pub(crate) async fn save_draft(
    ctx: &StepContext<'_>,
    controls: &SubmitControls,
) -> Result<String, StepError> {
    let button = ctx.click(&controls.save, ctx.required()).await?;
    ctx.settle().await;
    match ctx.resolve(&controls.saved_marker, ctx.optional()).await {
        Ok(marker) => Ok(format!("saved via {} ({})", button.locator, marker.text)),
        Err(StepError::NotFound(_)) => {
            warn!("[MP save] clicked {} but saw no saved marker", button.locator);
            Ok(format!("save clicked via {}, unconfirmed", button.locator))
        }
        Err(e) => Err(e),
    }
}

pub(crate) async fn start_publish(
    ctx: &StepContext<'_>,
    controls: &SubmitControls,
) -> Result<String, StepError> {
    let button = ctx.click(&controls.publish, ctx.required()).await?;
    ctx.settle().await;
    let confirmed = ctx.click_if_present(&controls.publish_confirm).await?;
    if confirmed {
        ctx.settle().await;
    }
    Ok(format!(
        "publish via {}{}",
        button.locator,
        if confirmed { ", dialog confirmed" } else { "" }
    ))
}

/// Wait for the second QR confirmation to go through.
pub(crate) async fn wait_for_published(
    ctx: &StepContext<'_>,
    controls: &SubmitControls,
) -> Result<String, StepError> {
    let start = Instant::now();
    let limit = ctx.timeouts.publish_confirm();
    let single_look = ctx.required().with_timeout(Duration::ZERO);
    info!("[MP publish] waiting for QR confirmation, up to {}s", limit.as_secs());
    loop {
        let url = match ctx.page.current_url().await {
            Ok(url) => url,
            Err(e) if e.is_connection_lost() => return Err(e.into()),
            Err(e) => {
                debug!("[MP publish] url read failed, polling again: {}", e);
                String::new()
            }
        };
        if let Some(marker) = controls
            .published_url_markers
            .iter()
            .find(|m| url.contains(m.as_str()))
        {
            return Ok(format!("published (url marker {})", marker));
        }
        match ctx.resolve(&controls.published_marker, single_look).await {
            Ok(marker) => return Ok(format!("published ({})", marker.text)),
            Err(StepError::NotFound(_)) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => debug!("[MP publish] marker lookup failed, polling again: {}", e.detail()),
        }
        if start.elapsed() >= limit {
            return Err(StepError::Timeout {
                what: "publish confirmation".into(),
                after: limit,
            });
        }
        tokio::time::sleep(ctx.timeouts.login_poll()).await;
    }
}
