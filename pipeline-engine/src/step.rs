// Step & Trigger Contract
// The polymorphic interface every step kind satisfies, plus the factory
// signature the registry stores

use crate::data::{OutputBag, Value};
use crate::interpolate::InterpolationError;
use crate::registry::Registry;
use crate::state::PipelineState;
use crate::webhook::WebhookMux;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Raw configuration map handed to a step factory.
pub type ConfigMap = HashMap<String, Value>;

/// Errors a step can raise, at construction or at run time.
///
/// A runtime step error never aborts the run: the scheduler logs it and
/// suppresses the step's publication, which downstream steps observe as a
/// missing output.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("missing config key '{0}'")]
    MissingConfig(String),

    #[error("invalid config for '{key}': {message}")]
    InvalidConfig { key: String, message: String },

    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request failed with status {0}")]
    Http(u16),

    #[error("http transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("subprocess failed: {0}")]
    Subprocess(String),

    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Message(String),
}

impl StepError {
    pub fn missing_config(key: &str) -> Self {
        StepError::MissingConfig(key.to_string())
    }

    pub fn invalid_config(key: &str, message: impl Into<String>) -> Self {
        StepError::InvalidConfig {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// A named unit of work.
///
/// `run` is invoked at most once per run, only after every declared
/// dependency has published. Steps read prior outputs through `state` but
/// never write it; the engine stores the returned bag.
#[async_trait]
pub trait Step: Send + Sync {
    /// Stable identity within the pipeline.
    fn name(&self) -> &str;

    /// Execute the step against the current run state.
    async fn run(
        &self,
        token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step").field("name", &self.name()).finish()
    }
}

impl std::fmt::Debug for dyn Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger").field("name", &self.name()).finish()
    }
}

/// Callback invoked once per trigger fire with the fire payload.
pub type OnFire = Arc<dyn Fn(Value) + Send + Sync>;

/// A step variant that initiates new runs in response to external events.
///
/// Its `run` blocks until a fire arrives; `set_on_trigger` installs the
/// handler the trigger runner uses to spawn a fresh run per fire.
pub trait Trigger: Step {
    fn set_on_trigger(&self, callback: OnFire);
}

/// Collaborators available to factories at construction time.
///
/// The registry handle lets composite steps (foreach) load sub-pipelines;
/// the webhook mux is the injected HTTP demultiplexer trigger kinds
/// register against. No process-global state is involved.
#[derive(Clone)]
pub struct BuildContext {
    pub registry: Arc<Registry>,
    pub webhooks: Option<Arc<WebhookMux>>,
}

impl BuildContext {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            webhooks: None,
        }
    }

    pub fn with_webhooks(mut self, mux: Arc<WebhookMux>) -> Self {
        self.webhooks = Some(mux);
        self
    }
}

/// Factory installing a step kind: `(name, config, collaborators)`.
pub type StepFactory =
    Arc<dyn Fn(&str, &ConfigMap, &BuildContext) -> Result<Arc<dyn Step>, StepError> + Send + Sync>;

/// Factory installing a trigger kind.
pub type TriggerFactory = Arc<
    dyn Fn(&str, &ConfigMap, &BuildContext) -> Result<Arc<dyn Trigger>, StepError> + Send + Sync,
>;
