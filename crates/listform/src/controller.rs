//! The form controller: bootstrap, save, submit, delete and attachments.
//!
//! [`FormController::initialize`] runs the bootstrap pipeline:
//!
//! 1. resolve the signed-in principal
//! 2. resolve the principal's groups
//! 3. pre-render hook
//! 4. compile the list schema
//! 5. apply the surface bindings
//! 6. fetch and bind the item and its attachments
//! 7. fetch the workflow history
//! 8. post-render hook
//! 9. resolve element visibility and editable fields
//! 10. final decorations
//!
//! Progress and outcomes are published as [`FormEvent`]s.

use listform_client::{
    Attachment, FieldUpdate, ItemWrite, ListClient, ListService, Person, Principal,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::attachments::{prepare_files, AttachmentUploader, PendingFile, UploadReport};
use crate::binder::{PendingLookups, RecordBinder, RecordInfo};
use crate::codec;
use crate::config::FormConfig;
use crate::error::{FormError, Result, SchemaError};
use crate::field::{FieldModel, ModelValue};
use crate::history::{fetch_history, HistoryEntry};
use crate::logging::ErrorLog;
use crate::permissions::{editable_field_keys, resolve_visibility, PermissionDenial, VisibilityContext};
use crate::pipeline::{step_async, Pipeline, PipelineState, Step, StepOutcome};
use crate::schema::{Schema, SchemaCompiler};
use crate::surface::{ElementId, RenderedSurface, SurfaceRuntime};
use crate::validation::{validate, AttachmentRule, Violation};

const EVENT_CAPACITY: usize = 64;

/// Something the presentation layer should know about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FormEvent {
    /// Progress text
    Status { message: String },
    /// Bootstrap finished
    Initialized,
    /// Values were (re)bound from the store
    Bound { item_id: Option<u64> },
    /// Bootstrap halted
    Failed { reason: String },
    /// Message for the user
    Dialog { title: String, message: String },
    Saved { item_id: u64 },
    Submitted { item_id: u64, redirect: String },
    Deleted { redirect: String },
    ElementsHidden { denials: Vec<PermissionDenial> },
    AttachmentAdded { attachment: Attachment },
}

impl FormEvent {
    fn status(message: impl Into<String>) -> Self {
        FormEvent::Status {
            message: message.into(),
        }
    }

    fn dialog(title: impl Into<String>, message: impl Into<String>) -> Self {
        FormEvent::Dialog {
            title: title.into(),
            message: message.into(),
        }
    }
}

/// `Err(reason)` stops the current operation.
pub type HookResult = std::result::Result<(), String>;

pub type PreRenderHook = Arc<dyn Fn(&Principal) -> HookResult + Send + Sync>;
pub type PostRenderHook = Arc<dyn Fn(&Schema, &RenderedSurface) -> HookResult + Send + Sync>;
/// Receives the schema and whether the save is a submit.
pub type PreSaveHook = Arc<dyn Fn(&Schema, bool) -> HookResult + Send + Sync>;

#[derive(Clone, Default)]
struct Hooks {
    pre_render: Option<PreRenderHook>,
    post_render: Option<PostRenderHook>,
    pre_save: Option<PreSaveHook>,
}

/// Everything a bootstrapped form knows.
#[derive(Debug, Clone)]
pub struct FormSession {
    pub principal: Arc<Principal>,
    pub schema: Arc<Schema>,
    /// Surface with hidden elements removed
    pub surface: RenderedSurface,
    pub record: RecordInfo,
    pub author: Option<Person>,
    pub attachments: Vec<Attachment>,
    pub history: Vec<HistoryEntry>,
    pub denials: Vec<PermissionDenial>,
    pub editable_keys: Vec<String>,
}

impl FormSession {
    pub fn is_new(&self) -> bool {
        self.record.id.is_none()
    }
}

// ==================== Bootstrap ====================

/// Context threaded through the bootstrap steps.
struct Bootstrap {
    service: Arc<dyn ListService>,
    runtime: Arc<dyn SurfaceRuntime>,
    binder: RecordBinder,
    config: FormConfig,
    hooks: Hooks,
    events: broadcast::Sender<FormEvent>,
    principal: Principal,
    schema: Option<Arc<Schema>>,
    surface: RenderedSurface,
    info: RecordInfo,
    author: Option<Person>,
    attachments: Vec<Attachment>,
    history: Vec<HistoryEntry>,
    pending: PendingLookups,
    denials: Vec<PermissionDenial>,
    editable_keys: Vec<String>,
}

impl Bootstrap {
    fn emit(&self, event: FormEvent) {
        let _ = self.events.send(event);
    }

    fn into_session(self) -> Option<(FormSession, PendingLookups)> {
        let session = FormSession {
            principal: Arc::new(self.principal),
            schema: self.schema?,
            surface: self.surface,
            record: self.info,
            author: self.author,
            attachments: self.attachments,
            history: self.history,
            denials: self.denials,
            editable_keys: self.editable_keys,
        };
        Some((session, self.pending))
    }
}

const SCHEMA_MISSING: &str = "list schema has not been compiled";

fn resolve_principal() -> impl Step<Bootstrap> {
    step_async("principal", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            match ctx.service.current_principal().await {
                Ok(principal) => {
                    debug!(principal = principal.id, "Resolved principal");
                    ctx.principal = principal;
                    StepOutcome::advance_with("Retrieved your profile.")
                }
                Err(e) => StepOutcome::fail(format!("Failed to retrieve your profile: {}", e)),
            }
        })
    })
}

fn resolve_groups() -> impl Step<Bootstrap> {
    step_async("groups", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            match ctx.service.principal_groups(ctx.principal.id).await {
                Ok(groups) => {
                    ctx.principal.groups = groups;
                    StepOutcome::advance_with("Retrieved your groups.")
                }
                Err(e) => StepOutcome::fail(format!("Failed to retrieve your groups: {}", e)),
            }
        })
    })
}

fn pre_render() -> impl Step<Bootstrap> {
    step_async("pre-render", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            match ctx.hooks.pre_render.as_ref().map(|hook| hook(&ctx.principal)) {
                Some(Err(reason)) => StepOutcome::fail(reason),
                _ => StepOutcome::advance(),
            }
        })
    })
}

fn compile_schema() -> impl Step<Bootstrap> {
    step_async("schema", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            let list = match ctx.service.list_schema(&ctx.config.list_name).await {
                Ok(list) => list,
                Err(e) => return StepOutcome::fail(SchemaError::Unreachable(e.to_string()).to_string()),
            };
            match SchemaCompiler::new(ctx.config.collision_policy).compile(&list) {
                Ok(schema) => {
                    ctx.schema = Some(Arc::new(schema));
                    StepOutcome::advance_with("Retrieved list schema.")
                }
                Err(e) => StepOutcome::fail(e.to_string()),
            }
        })
    })
}

fn apply_bindings() -> impl Step<Bootstrap> {
    step_async("bindings", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            let Some(schema) = ctx.schema.clone() else {
                return StepOutcome::fail(SCHEMA_MISSING);
            };
            match ctx.runtime.apply_bindings(&schema).await {
                Ok(surface) => {
                    ctx.surface = surface;
                    StepOutcome::advance()
                }
                Err(e) => StepOutcome::fail(e.to_string()),
            }
        })
    })
}

fn bind_item() -> impl Step<Bootstrap> {
    step_async("item", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            let Some(schema) = ctx.schema.clone() else {
                return StepOutcome::fail(SCHEMA_MISSING);
            };
            let Some(item_id) = ctx.config.item_id else {
                ctx.emit(FormEvent::Bound { item_id: None });
                return StepOutcome::advance();
            };

            let record = match ctx.service.get_item(&ctx.config.list_name, item_id).await {
                Ok(record) => record,
                Err(e) => {
                    return StepOutcome::fail(format!("Failed to retrieve item {}: {}", item_id, e))
                }
            };
            let report = ctx.binder.bind(&record, &schema, &ctx.principal);
            ctx.info = report.info;
            ctx.pending = report.pending;

            if schema.enable_attachments {
                match ctx.binder.fetch_attachments(&record).await {
                    Ok(attachments) => ctx.attachments = attachments,
                    Err(e) => {
                        return StepOutcome::fail(format!("Failed to retrieve attachments: {}", e))
                    }
                }
            }
            if ctx.config.include_user_profiles {
                ctx.author = ctx.binder.fetch_author(&record).await;
            }

            ctx.emit(FormEvent::Bound {
                item_id: Some(item_id),
            });
            StepOutcome::advance_with("Retrieved form data.")
        })
    })
}

fn load_history() -> impl Step<Bootstrap> {
    step_async("history", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            let (Some(item_id), true) = (ctx.info.id, ctx.config.include_workflow_history) else {
                return StepOutcome::advance();
            };
            let Some(schema) = ctx.schema.clone() else {
                return StepOutcome::fail(SCHEMA_MISSING);
            };

            match fetch_history(
                ctx.service.as_ref(),
                &ctx.config.workflow_history_list_name,
                &schema.list_id,
                item_id,
                ctx.config.history_limit,
            )
            .await
            {
                Ok(history) => {
                    ctx.history = history;
                    StepOutcome::advance_with("Retrieved workflow history.")
                }
                Err(e) => StepOutcome::fail(format!("Failed to retrieve workflow history. {}", e)),
            }
        })
    })
}

fn post_render() -> impl Step<Bootstrap> {
    step_async("post-render", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            let Some(schema) = ctx.schema.clone() else {
                return StepOutcome::fail(SCHEMA_MISSING);
            };
            match ctx.hooks.post_render.as_ref().map(|hook| hook(schema.as_ref(), &ctx.surface)) {
                Some(Err(reason)) => StepOutcome::fail(reason),
                _ => StepOutcome::advance(),
            }
        })
    })
}

fn resolve_permissions() -> impl Step<Bootstrap> {
    step_async("permissions", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            let Some(schema) = ctx.schema.clone() else {
                return StepOutcome::fail(SCHEMA_MISSING);
            };
            let visibility = VisibilityContext {
                is_new: ctx.info.id.is_none(),
                is_author: ctx.info.is_author,
            };
            let denials = resolve_visibility(&ctx.surface, &ctx.principal, visibility);

            if !denials.is_empty() {
                let ids: Vec<ElementId> = denials.iter().map(|d| d.element_id.clone()).collect();
                ctx.runtime.hide(&ids).await;
                ctx.surface = ctx.surface.without(&ids);
                ctx.emit(FormEvent::ElementsHidden {
                    denials: denials.clone(),
                });
            }

            ctx.editable_keys = editable_field_keys(&ctx.surface, &schema);
            ctx.denials = denials;
            debug!(editable = ?ctx.editable_keys, "Resolved editable fields");
            StepOutcome::advance_with("Retrieved your permissions.")
        })
    })
}

fn decorate() -> impl Step<Bootstrap> {
    step_async("decorate", |ctx: &mut Bootstrap| {
        Box::pin(async move {
            let Some(schema) = ctx.schema.clone() else {
                return StepOutcome::fail(SCHEMA_MISSING);
            };
            match ctx.runtime.decorate(&ctx.surface, &schema).await {
                Ok(()) => StepOutcome::advance(),
                Err(e) => StepOutcome::fail(e.to_string()),
            }
        })
    })
}

// ==================== Controller ====================

/// Drives one form against one list.
pub struct FormController {
    service: Arc<dyn ListService>,
    runtime: Arc<dyn SurfaceRuntime>,
    config: FormConfig,
    binder: RecordBinder,
    error_log: ErrorLog,
    hooks: Hooks,
    events: broadcast::Sender<FormEvent>,
    session: RwLock<Option<FormSession>>,
    pending: Mutex<PendingLookups>,
    /// Held for a whole upload batch; the store takes one attachment write at a time
    uploads: Mutex<()>,
}

impl FormController {
    pub fn new(
        service: Arc<dyn ListService>,
        runtime: Arc<dyn SurfaceRuntime>,
        config: FormConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            binder: RecordBinder::new(Arc::clone(&service)),
            error_log: ErrorLog::from_config(Arc::clone(&service), &config),
            service,
            runtime,
            config,
            hooks: Hooks::default(),
            events,
            session: RwLock::new(None),
            pending: Mutex::new(PendingLookups::default()),
            uploads: Mutex::new(()),
        }
    }

    /// Validate `config` and talk to the list service over HTTP.
    pub fn connect(config: FormConfig, runtime: Arc<dyn SurfaceRuntime>) -> Result<Self> {
        config.validate()?;
        let client = ListClient::new(config.client_config())?;
        Ok(Self::new(Arc::new(client), runtime, config))
    }

    /// Take the item id from the page location and link it from error-log entries.
    pub fn with_location(mut self, location: &str) -> Self {
        self.config = self.config.with_location(location);
        self.error_log = self.error_log.with_location(location);
        self
    }

    pub fn with_pre_render(
        mut self,
        hook: impl Fn(&Principal) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.hooks.pre_render = Some(Arc::new(hook));
        self
    }

    pub fn with_post_render(
        mut self,
        hook: impl Fn(&Schema, &RenderedSurface) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.hooks.post_render = Some(Arc::new(hook));
        self
    }

    /// Runs before validation on every save; `Err` cancels the save.
    pub fn with_pre_save(
        mut self,
        hook: impl Fn(&Schema, bool) -> HookResult + Send + Sync + 'static,
    ) -> Self {
        self.hooks.pre_save = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &FormConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FormEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: FormEvent) {
        let _ = self.events.send(event);
    }

    fn step_timeout(&self) -> Option<Duration> {
        self.config.step_timeout_secs.map(Duration::from_secs)
    }

    /// Report a failure to the user and the remote error log.
    async fn report_failure(&self, title: &str, message: &str) {
        self.emit(FormEvent::dialog(title, message));
        self.error_log.record(message).await;
    }

    // ==================== Bootstrap ====================

    /// Run the bootstrap pipeline. Halts at the first failing step.
    pub async fn initialize(&self) -> Result<()> {
        let mut ctx = Bootstrap {
            service: Arc::clone(&self.service),
            runtime: Arc::clone(&self.runtime),
            binder: self.binder.clone(),
            config: self.config.clone(),
            hooks: self.hooks.clone(),
            events: self.events.clone(),
            principal: Principal::default(),
            schema: None,
            surface: RenderedSurface::default(),
            info: RecordInfo::default(),
            author: None,
            attachments: Vec::new(),
            history: Vec::new(),
            pending: PendingLookups::default(),
            denials: Vec::new(),
            editable_keys: Vec::new(),
        };

        let status_events = self.events.clone();
        let failure_events = self.events.clone();
        let mut pipeline = Pipeline::new(format!("bootstrap {}", self.config.list_name))
            .with_step_timeout(self.step_timeout())
            .then(resolve_principal())
            .then(resolve_groups())
            .then(pre_render())
            .then(compile_schema())
            .then(apply_bindings())
            .then(bind_item())
            .then(load_history())
            .then(post_render())
            .then(resolve_permissions())
            .then(decorate())
            .on_each_advance(move |outcome| {
                if outcome.success && outcome.message.is_some() {
                    let _ = status_events.send(FormEvent::status(outcome.message()));
                }
            })
            .on_failure(move |outcome| {
                let _ = failure_events.send(FormEvent::Failed {
                    reason: outcome.message().to_string(),
                });
            });

        if pipeline.run(&mut ctx).await != PipelineState::Completed {
            let reason = pipeline
                .last_outcome()
                .map(|o| o.message().to_string())
                .unwrap_or_default();
            ctx.pending.abort();
            self.report_failure("Error", &reason).await;
            return Err(FormError::Pipeline(reason));
        }

        let (session, pending) = ctx
            .into_session()
            .ok_or_else(|| FormError::Pipeline(SCHEMA_MISSING.to_string()))?;
        info!(
            list = %self.config.list_name,
            item_id = ?session.record.id,
            editable = session.editable_keys.len(),
            "Form initialized"
        );
        *self.pending.lock().await = pending;
        *self.session.write().await = Some(session);
        self.emit(FormEvent::Initialized);
        Ok(())
    }

    /// Copy of the session state.
    pub async fn session(&self) -> Result<FormSession> {
        self.session
            .read()
            .await
            .clone()
            .ok_or(FormError::NotInitialized)
    }

    pub async fn schema(&self) -> Result<Arc<Schema>> {
        Ok(self.session().await?.schema)
    }

    /// Observable model for one field.
    pub async fn field_model(&self, key: &str) -> Result<Arc<FieldModel>> {
        self.schema()
            .await?
            .get(key)
            .cloned()
            .ok_or_else(|| FormError::UnknownField(key.to_string()))
    }

    /// Keys the principal may write back.
    pub async fn editable_keys(&self) -> Vec<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.editable_keys.clone())
            .unwrap_or_default()
    }

    /// Wait for people and collection lookups of the latest bind.
    pub async fn settle_lookups(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock().await);
        pending.settle().await
    }

    // ==================== Save ====================

    /// Current submit blockers.
    pub async fn validate(&self) -> Result<Vec<Violation>> {
        let session = self.session().await?;
        Ok(self.violations(&session))
    }

    fn violations(&self, session: &FormSession) -> Vec<Violation> {
        validate(
            &session.surface,
            &session.schema,
            AttachmentRule {
                required: self.config.require_attachments,
                attached: session.attachments.len(),
                message: &self.config.attachment_message,
            },
        )
    }

    /// Save the editable fields.
    pub async fn save_editable(&self, is_submit: bool) -> Result<u64> {
        let keys = self.editable_keys().await;
        self.save(&keys, is_submit).await
    }

    /// Draft saves are offered when configured or when the list tracks submission.
    pub fn drafts_allowed(&self, schema: &Schema) -> bool {
        self.config.allow_save || schema.submitted_key().is_some()
    }

    /// Write `write_set` to the store. A submit is validated first and
    /// redirects on success; a draft save re-binds the stored item.
    pub async fn save(&self, write_set: &[String], is_submit: bool) -> Result<u64> {
        let schema = self.schema().await?;
        if !is_submit && !self.drafts_allowed(&schema) {
            return Err(FormError::NotAllowed("saving drafts is disabled".into()));
        }
        self.write(write_set, is_submit).await
    }

    async fn write(&self, write_set: &[String], is_submit: bool) -> Result<u64> {
        let session = self.session().await?;
        let schema = Arc::clone(&session.schema);

        if let Some(Err(reason)) = self.hooks.pre_save.as_ref().map(|hook| hook(schema.as_ref(), is_submit)) {
            info!(reason = %reason, "Save cancelled by pre-save hook");
            return Err(FormError::Vetoed(reason));
        }

        if is_submit {
            let violations = self.violations(&session);
            if !violations.is_empty() {
                let labels: Vec<&str> = violations.iter().map(|v| v.label.as_str()).collect();
                self.emit(FormEvent::dialog(
                    "Form Validation Error",
                    format!("Please complete: {}", labels.join(", ")),
                ));
                return Err(FormError::Validation(violations));
            }
        }

        let fields = build_field_updates(&schema, write_set, is_submit)?;
        let write = match session.record.id {
            Some(id) => ItemWrite::update(id, session.record.metadata.clone(), fields),
            None => ItemWrite::create(fields),
        };

        let item_id = match self.service.save_item(&self.config.list_name, &write).await {
            Ok(id) => id,
            Err(e) => {
                self.report_failure("Save Failed", &format!("Failed to save the form: {}", e))
                    .await;
                return Err(e.into());
            }
        };
        info!(list = %self.config.list_name, item_id, is_submit, "Form saved");
        self.emit(FormEvent::Saved { item_id });

        if is_submit {
            self.emit(FormEvent::Submitted {
                item_id,
                redirect: self.config.submit_redirect(),
            });
            return Ok(item_id);
        }

        if session.is_new() {
            if let Some(session) = self.session.write().await.as_mut() {
                session.record.id = Some(item_id);
            }
        }
        self.refresh().await?;
        Ok(item_id)
    }

    /// Re-fetch the item and re-bind every field.
    pub async fn refresh(&self) -> Result<()> {
        let session = self.session().await?;
        let item_id = session.record.id.ok_or(FormError::NoItem)?;

        let record = self.service.get_item(&self.config.list_name, item_id).await?;
        let report = self.binder.bind(&record, &session.schema, &session.principal);
        let previous = std::mem::replace(&mut *self.pending.lock().await, report.pending);
        previous.abort();
        if let Some(current) = self.session.write().await.as_mut() {
            current.record = report.info;
        }

        let attachments = if session.schema.enable_attachments {
            self.binder.fetch_attachments(&record).await?
        } else {
            Vec::new()
        };
        let history = if self.config.include_workflow_history {
            match fetch_history(
                self.service.as_ref(),
                &self.config.workflow_history_list_name,
                &session.schema.list_id,
                item_id,
                self.config.history_limit,
            )
            .await
            {
                Ok(history) => history,
                Err(e) => {
                    warn!(item_id, "Failed to refresh workflow history: {}", e);
                    session.history.clone()
                }
            }
        } else {
            Vec::new()
        };

        if let Some(current) = self.session.write().await.as_mut() {
            current.attachments = attachments;
            current.history = history;
        }
        self.emit(FormEvent::Bound {
            item_id: Some(item_id),
        });
        Ok(())
    }

    /// Delete the bound item. Returns the redirect target.
    pub async fn delete(&self) -> Result<String> {
        if !self.config.allow_delete {
            return Err(FormError::NotAllowed("deleting items is disabled".into()));
        }
        let session = self.session().await?;
        let metadata = session.record.metadata.clone().ok_or(FormError::NoItem)?;

        if let Err(e) = self.service.delete_item(&metadata).await {
            self.report_failure("Delete Failed", &format!("Failed to delete the form: {}", e))
                .await;
            return Err(e.into());
        }

        self.pending.lock().await.abort();
        session.schema.reset_values();
        if let Some(current) = self.session.write().await.as_mut() {
            current.record = RecordInfo::default();
            current.attachments.clear();
            current.history.clear();
        }

        let redirect = self.config.delete_redirect();
        info!(uri = %metadata.uri, "Form deleted");
        self.emit(FormEvent::Deleted {
            redirect: redirect.clone(),
        });
        Ok(redirect)
    }

    // ==================== Attachments ====================

    /// Upload files one at a time. A new form is saved as a draft first.
    ///
    /// A failed upload halts the batch; the report lists what was stored.
    pub async fn upload_attachments(&self, files: Vec<PendingFile>) -> Result<UploadReport> {
        let _batch = self.uploads.lock().await;
        let session = self.session().await?;
        if !session.schema.enable_attachments {
            return Err(FormError::NotAllowed("attachments are disabled for this list".into()));
        }
        let files = prepare_files(files, &session.attachments, &self.config)?;

        let item_id = match session.record.id {
            Some(id) => id,
            None => self.write(&session.editable_keys, false).await?,
        };

        let report = AttachmentUploader::new(Arc::clone(&self.service), &self.config.list_name)
            .with_step_timeout(self.step_timeout())
            .upload(item_id, files)
            .await;

        if let Some(current) = self.session.write().await.as_mut() {
            current.attachments.extend(report.uploaded.iter().cloned());
        }
        for attachment in &report.uploaded {
            self.emit(FormEvent::AttachmentAdded {
                attachment: attachment.clone(),
            });
        }
        if let Some(ref failure) = report.failure {
            self.report_failure("Upload Failed", failure).await;
        }
        Ok(report)
    }

    pub async fn delete_attachment(&self, name: &str) -> Result<()> {
        let session = self.session().await?;
        let attachment = session
            .attachments
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| FormError::Attachment(format!("no attachment named '{}'", name)))?;

        self.service.delete_attachment(&attachment).await?;
        if let Some(current) = self.session.write().await.as_mut() {
            current.attachments.retain(|a| a.name != name);
        }
        self.emit(FormEvent::status(format!("Deleted {}", name)));
        Ok(())
    }

    // ==================== People ====================

    /// People whose name, department or job title starts with `term`.
    pub async fn search_people(&self, term: &str) -> Result<Vec<Person>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .service
            .search_people(term, self.config.people_search_limit)
            .await?)
    }
}

/// Encode the write set, plus the submitted flag while it is still unset.
fn build_field_updates(
    schema: &Schema,
    write_set: &[String],
    is_submit: bool,
) -> Result<Vec<FieldUpdate>> {
    let mut fields = Vec::with_capacity(write_set.len() + 1);
    let submitted_key = schema.submitted_key();

    if let Some(model) = submitted_key.and_then(|key| schema.get(key)) {
        if matches!(model.get(), ModelValue::Null | ModelValue::Bool(false)) {
            let flag = if is_submit { "1" } else { "0" };
            fields.push(FieldUpdate::new(model.descriptor().name.clone(), flag));
        }
    }

    for key in write_set {
        if Some(key.as_str()) == submitted_key {
            continue;
        }
        let model = schema
            .get(key)
            .ok_or_else(|| FormError::UnknownField(key.clone()))?;
        let descriptor = model.descriptor();
        if descriptor.read_only {
            debug!(field = %key, "Skipping read-only field");
            continue;
        }
        fields.push(FieldUpdate::new(
            descriptor.name.clone(),
            codec::encode(&descriptor.field_type, &model.get()),
        ));
    }
    Ok(fields)
}
