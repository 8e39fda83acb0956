//! Publish state machine.
//!
//! Mandatory steps (login, editor, title, body, save, publish) block the run
//! when they fail. Cover, author, summary and the settings dialogs are
//! best-effort: a failure is logged as `OptionalStepFailed` and the run
//! moves on.

use crate::browser::connection::PageSource;
use crate::browser::driver::PageDriver;
use crate::config::Timeouts;
use crate::platforms::traits::{extract_token, FlagFlow, SiteProfile};
use crate::workflow::hooks::{CheckpointHook, NoopHook};
use crate::workflow::request::{PostKind, PublishRequest};
use crate::workflow::result::{ErrorInfo, ErrorKind, StepOutcome, WorkflowResult};
use crate::workflow::state::{SessionState, Stage};
use crate::workflow::steps::{self, StepContext, StepError};
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum Halt {
    Blocked(ErrorInfo),
    Cancelled,
}

pub struct Orchestrator {
    profile: SiteProfile,
    request: PublishRequest,
    timeouts: Timeouts,
    hook: Arc<dyn CheckpointHook>,
    state: SessionState,
    steps: Vec<StepOutcome>,
    page: Option<Arc<dyn PageDriver>>,
}

impl Orchestrator {
    pub fn new(profile: SiteProfile, request: PublishRequest, timeouts: Timeouts) -> Self {
        Self {
            profile,
            request,
            timeouts,
            hook: Arc::new(NoopHook),
            state: SessionState::new(),
            steps: Vec::new(),
            page: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CheckpointHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drive the whole workflow once. Never returns an error: every way a
    /// run can end is described by the [`WorkflowResult`].
    pub async fn run(mut self, source: &dyn PageSource, cancel: &CancellationToken) -> WorkflowResult {
        if let Err(e) = self.request.validate() {
            warn!("[MP run] rejected before launch: {}", e);
            return WorkflowResult::aborted(ErrorInfo::validation(&e));
        }
        info!(
            "[MP run] start kind={} title={:?} cover={} images={} submit={} draft_only={}",
            self.request.post_kind.as_str(),
            self.request.title,
            self.request.cover.is_some(),
            self.request.content_images.len(),
            self.request.submit,
            self.request.draft_only
        );

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Halt::Cancelled),
            outcome = self.drive(source) => outcome,
        };

        match outcome {
            Ok(()) => {}
            Err(Halt::Blocked(info)) => self.halt(info),
            Err(Halt::Cancelled) => {
                let stage = self.state.stage();
                info!("[MP run] cancelled at {}", stage);
                self.halt(ErrorInfo::new(
                    ErrorKind::Cancelled,
                    "cancel",
                    stage,
                    "workflow cancelled by caller",
                ));
            }
        }
        self.finish().await
    }

    async fn drive(&mut self, source: &dyn PageSource) -> Result<(), Halt> {
        let home = self.open_home(source).await?;
        self.enter(Stage::AwaitingLogin);
        self.await_login(home.as_ref()).await?;

        self.enter(Stage::Editing);
        let editor = self.open_editor(source).await?;
        self.page = Some(editor.clone());
        let page = editor.as_ref();
        self.checkpoint("editor_ready", page).await;
        self.fill_fields(page).await?;

        if let Some(cover) = self.request.cover.clone() {
            self.enter(Stage::UploadingCover);
            let result = {
                let ctx = self.ctx(page);
                steps::cover_flow(&ctx, &self.profile.cover, &cover).await
            };
            self.optional_step("cover", page, result).await?;
        }

        self.enter(Stage::InsertingContent);
        self.insert_content(page).await?;
        self.checkpoint("content_inserted", page).await;

        if self.request.original {
            self.enter(Stage::ConfiguringOriginal);
            let flow = self.profile.original.clone();
            self.configure("original", page, &flow, None).await?;
        }
        if self.request.reward {
            self.enter(Stage::ConfiguringReward);
            let flow = self.profile.reward.clone();
            self.configure("reward", page, &flow, None).await?;
        }
        if let Some(collection) = self.request.collection.clone() {
            self.enter(Stage::ConfiguringCollection);
            let flow = self.profile.collection.clone();
            self.configure("collection", page, &flow, Some(&collection))
                .await?;
        }

        if self.request.submit {
            self.enter(Stage::Saving);
            self.checkpoint("before_save", page).await;
            let result = {
                let ctx = self.ctx(page);
                steps::save_draft(&ctx, &self.profile.submit).await
            };
            self.required_step("save", result)?;

            if self.request.wants_publish() {
                self.enter(Stage::Publishing);
                let result = {
                    let ctx = self.ctx(page);
                    steps::start_publish(&ctx, &self.profile.submit).await
                };
                self.required_step("publish", result)?;

                self.enter(Stage::AwaitingQrConfirmation);
                let result = {
                    let ctx = self.ctx(page);
                    steps::wait_for_published(&ctx, &self.profile.submit).await
                };
                self.required_step("publish_confirmation", result)?;
            }
        }

        self.enter(Stage::Done);
        Ok(())
    }

    async fn open_home(&mut self, source: &dyn PageSource) -> Result<Arc<dyn PageDriver>, Halt> {
        let host = self.profile.info.host.clone();
        let home_url = self.profile.info.login_url.clone();
        let opened = async {
            let page = source.resolve_page(&host, &home_url).await?;
            let url = page.current_url().await?;
            if !url.contains(&host) {
                page.navigate(&home_url).await?;
            }
            Ok::<_, StepError>(page)
        }
        .await;
        let page = self.take("open_home", opened)?;
        self.record("open_home", true, home_url, None);
        Ok(page)
    }

    async fn await_login(&mut self, page: &dyn PageDriver) -> Result<(), Halt> {
        let result = steps::wait_for_login(page, &self.profile, &self.timeouts).await;
        let url = self.take("login", result)?;
        self.state.logged_in = true;
        self.state.token = extract_token(&url);
        self.record("login", true, "token acquired", None);
        Ok(())
    }

    async fn open_editor(&mut self, source: &dyn PageSource) -> Result<Arc<dyn PageDriver>, Halt> {
        let token = self.state.token.clone().unwrap_or_default();
        let url = self.profile.editor_url(&token, self.request.post_kind);
        self.state.editor_url = Some(url.clone());

        let opened = async {
            let page = source
                .resolve_page(&self.profile.editor_url_marker, &url)
                .await?;
            if !self.profile.is_editor_url(&page.current_url().await?) {
                page.navigate(&url).await?;
            }
            tokio::time::sleep(self.timeouts.settle()).await;
            Ok::<_, StepError>(page)
        }
        .await;
        let page = self.take("open_editor", opened)?;
        self.record("open_editor", true, self.request.post_kind.as_str(), None);
        Ok(page)
    }

    async fn fill_fields(&mut self, page: &dyn PageDriver) -> Result<(), Halt> {
        let result = {
            let ctx = self.ctx(page);
            ctx.fill(&self.profile.fields.title, self.request.title.trim(), ctx.required())
                .await
        };
        self.required_step("title", result)?;

        if let Some(author) = self.request.author.clone() {
            let result = {
                let ctx = self.ctx(page);
                ctx.fill(&self.profile.fields.author, &author, ctx.optional())
                    .await
            };
            self.optional_step("author", page, result).await?;
        }
        if let Some(summary) = self.request.summary.clone() {
            let result = {
                let ctx = self.ctx(page);
                ctx.fill(&self.profile.fields.summary, &summary, ctx.optional())
                    .await
            };
            self.optional_step("summary", page, result).await?;
        }
        Ok(())
    }

    async fn insert_content(&mut self, page: &dyn PageDriver) -> Result<(), Halt> {
        let kind = self.request.post_kind;
        let images = self.request.content_images.clone();
        match kind {
            PostKind::ImageText => {
                let result = {
                    let ctx = self.ctx(page);
                    ctx.upload(self.profile.fields.image_input(kind), &images, ctx.required())
                        .await
                };
                self.required_step("content_images", result)?;

                let text = self.request.plain_text();
                let result = {
                    let ctx = self.ctx(page);
                    steps::type_body(&ctx, self.profile.fields.body(kind), &text).await
                };
                self.required_step("body", result)?;
            }
            PostKind::Article => {
                let result = {
                    let ctx = self.ctx(page);
                    steps::insert_article_body(&ctx, self.profile.fields.body(kind), &self.request)
                        .await
                };
                self.required_step("body", result)?;

                if !images.is_empty() {
                    let result = {
                        let ctx = self.ctx(page);
                        ctx.upload(self.profile.fields.image_input(kind), &images, ctx.optional())
                            .await
                    };
                    self.optional_step("content_images", page, result).await?;
                }
            }
        }
        Ok(())
    }

    async fn configure(
        &mut self,
        step: &str,
        page: &dyn PageDriver,
        flow: &FlagFlow,
        choice: Option<&str>,
    ) -> Result<(), Halt> {
        let result = {
            let ctx = self.ctx(page);
            steps::flag_flow(&ctx, flow, choice).await
        };
        self.optional_step(step, page, result).await
    }

    fn ctx<'a>(&'a self, page: &'a dyn PageDriver) -> StepContext<'a> {
        StepContext {
            page,
            timeouts: &self.timeouts,
        }
    }

    fn enter(&mut self, stage: Stage) {
        match self.state.advance(stage) {
            Ok(()) => info!("[MP run] stage -> {}", stage),
            Err(e) => warn!("[MP run] {}", e),
        }
    }

    fn record(&mut self, step: &str, success: bool, detail: impl Into<String>, kind: Option<ErrorKind>) {
        self.steps.push(StepOutcome {
            step: step.to_string(),
            stage: self.state.stage(),
            success,
            detail: detail.into(),
            error_kind: kind,
            at: Utc::now(),
        });
    }

    /// Unwrap a mandatory result; a failure is recorded and halts the run.
    fn take<T>(&mut self, step: &str, result: Result<T, StepError>) -> Result<T, Halt> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                let info = error.into_info(step, self.state.stage());
                self.record(step, false, info.message.clone(), Some(info.kind));
                Err(Halt::Blocked(info))
            }
        }
    }

    fn required_step(&mut self, step: &str, result: Result<String, StepError>) -> Result<(), Halt> {
        let detail = self.take(step, result)?;
        info!("[MP {}] ok: {}", step, detail);
        self.record(step, true, detail, None);
        Ok(())
    }

    async fn optional_step(
        &mut self,
        step: &str,
        page: &dyn PageDriver,
        result: Result<String, StepError>,
    ) -> Result<(), Halt> {
        match result {
            Ok(detail) => {
                info!("[MP {}] ok: {}", step, detail);
                self.record(step, true, detail, None);
                Ok(())
            }
            Err(error) if error.is_fatal() => self.take(step, Err(error)),
            Err(error) => {
                let detail = error.detail();
                warn!("[MP {}] skipped: {}", step, detail);
                self.ctx(page).dismiss_dialog().await;
                self.record(step, false, detail, Some(ErrorKind::OptionalStepFailed));
                Ok(())
            }
        }
    }

    fn halt(&mut self, info: ErrorInfo) {
        warn!("[MP run] blocked: {}", info);
        if let Err(e) = self.state.block(info) {
            warn!("[MP run] {}", e);
        }
    }

    async fn checkpoint(&self, name: &str, page: &dyn PageDriver) {
        self.hook.checkpoint(name, self.state.stage(), page).await;
    }

    async fn finish(self) -> WorkflowResult {
        if let Some(page) = self.page.as_ref().filter(|p| p.is_open()) {
            let name = if self.state.stage() == Stage::Done {
                "done"
            } else {
                "blocked"
            };
            self.checkpoint(name, page.as_ref()).await;
        }
        let result = WorkflowResult {
            final_stage: self.state.stage(),
            steps: self.steps,
            error: self.state.last_error().cloned(),
        };
        info!("[MP run] finished {}", result.summary());
        result
    }
}
