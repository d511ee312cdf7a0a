// Lifecycle Manager
// Start/stop/pause/resume over catalog-tracked pipelines, with state
// events fanned out to registered listeners

use crate::catalog::{Catalog, CatalogError, ExecutionLog, ExecutionRecord, LogLevel};
use crate::data::Value;
use crate::events::{change_channel, ChangeKind};
use crate::loader::{load_pipeline, LoadError};
use crate::registry::Registry;
use crate::runner::Pipeline;
use crate::step::BuildContext;
use crate::webhook::WebhookMux;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Wire-visible pipeline lifecycle states.
///
/// `CREATED -> RUNNING -> (PAUSED <-> RUNNING) -> {COMPLETED, STOPPED, ERROR}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Error,
    Completed,
}

impl PipelineStatus {
    /// Terminal for a single run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Completed | PipelineStatus::Stopped | PipelineStatus::Error
        )
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStatus::Created => "CREATED",
            PipelineStatus::Running => "RUNNING",
            PipelineStatus::Paused => "PAUSED",
            PipelineStatus::Stopped => "STOPPED",
            PipelineStatus::Error => "ERROR",
            PipelineStatus::Completed => "COMPLETED",
        };
        write!(f, "{}", s)
    }
}

/// A pipeline state transition, delivered to every registered listener.
#[derive(Debug, Clone, Serialize)]
pub struct StateEvent {
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub old_state: PipelineStatus,
    pub new_state: PipelineStatus,
    pub timestamp: DateTime<Utc>,
    pub execution_id: Option<i64>,
    pub error: Option<String>,
}

/// Listener invoked asynchronously on every [`StateEvent`].
pub trait StateListener: Send + Sync {
    fn on_state_change(&self, event: StateEvent);
}

impl<F> StateListener for F
where
    F: Fn(StateEvent) + Send + Sync,
{
    fn on_state_change(&self, event: StateEvent) {
        self(event)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("pipeline {0} is already running")]
    AlreadyRunning(i64),

    #[error("pipeline {0} is not running")]
    NotRunning(i64),

    #[error("pipeline {0} is not paused")]
    NotPaused(i64),

    #[error("pipeline {0} is disabled")]
    Disabled(i64),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// In-memory handle for an in-flight run.
struct RunHandle {
    execution_id: i64,
    token: CancellationToken,
    status: Mutex<PipelineStatus>,
    started_at: Instant,
}

/// Read-only view of a running pipeline.
#[derive(Debug, Clone)]
pub struct RunningPipeline {
    pub pipeline_id: i64,
    pub execution_id: i64,
    pub status: PipelineStatus,
}

/// Tracks in-flight runs and drives the per-pipeline state machine.
///
/// Every transition is persisted through the injected catalog and
/// emitted to listeners; each listener is invoked on its own task so a
/// slow listener cannot block the scheduler.
pub struct LifecycleManager {
    catalog: Arc<dyn Catalog>,
    registry: Arc<Registry>,
    webhooks: Option<Arc<WebhookMux>>,
    pipelines: RwLock<HashMap<i64, Pipeline>>,
    running: RwLock<HashMap<i64, RunHandle>>,
    listeners: RwLock<Vec<Arc<dyn StateListener>>>,
}

impl LifecycleManager {
    pub fn new(catalog: Arc<dyn Catalog>, registry: Arc<Registry>) -> Self {
        Self {
            catalog,
            registry,
            webhooks: None,
            pipelines: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Inject the HTTP demultiplexer webhook triggers register against.
    pub fn with_webhooks(mut self, mux: Arc<WebhookMux>) -> Self {
        self.webhooks = Some(mux);
        self
    }

    pub fn add_state_listener(&self, listener: Arc<dyn StateListener>) {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    pub fn is_running(&self, pipeline_id: i64) -> bool {
        let running = self.running.read().unwrap_or_else(|e| e.into_inner());
        running.contains_key(&pipeline_id)
    }

    /// Nominal status: the in-flight run's status if one exists, the
    /// catalog state otherwise.
    pub async fn status(&self, pipeline_id: i64) -> Result<PipelineStatus, LifecycleError> {
        {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            if let Some(handle) = running.get(&pipeline_id) {
                let status = handle.status.lock().unwrap_or_else(|e| e.into_inner());
                return Ok(*status);
            }
        }
        Ok(self.catalog.load(pipeline_id).await?.state)
    }

    pub fn running_pipelines(&self) -> Vec<RunningPipeline> {
        let running = self.running.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<RunningPipeline> = running
            .iter()
            .map(|(id, handle)| RunningPipeline {
                pipeline_id: *id,
                execution_id: handle.execution_id,
                status: *handle.status.lock().unwrap_or_else(|e| e.into_inner()),
            })
            .collect();
        list.sort_by_key(|r| r.pipeline_id);
        list
    }

    /// Start a run of an enabled, idle pipeline.
    pub async fn start(
        self: &Arc<Self>,
        pipeline_id: i64,
        trigger_type: &str,
        trigger_data: Option<Value>,
    ) -> Result<ExecutionRecord, LifecycleError> {
        if self.is_running(pipeline_id) {
            return Err(LifecycleError::AlreadyRunning(pipeline_id));
        }

        let record = self.catalog.load(pipeline_id).await?;
        if !record.enabled {
            return Err(LifecycleError::Disabled(pipeline_id));
        }

        let pipeline = self.loaded_pipeline(pipeline_id, &record.configuration)?;

        let execution = self
            .catalog
            .record_start(pipeline_id, trigger_type, trigger_data)
            .await?;
        self.catalog
            .update_pipeline_state(pipeline_id, PipelineStatus::Running)
            .await?;

        let token = CancellationToken::new();
        {
            let mut running = self.running.write().unwrap_or_else(|e| e.into_inner());
            running.insert(
                pipeline_id,
                RunHandle {
                    execution_id: execution.id,
                    token: token.clone(),
                    status: Mutex::new(PipelineStatus::Running),
                    started_at: Instant::now(),
                },
            );
        }

        self.emit(StateEvent {
            pipeline_id,
            pipeline_name: record.name.clone(),
            old_state: record.state,
            new_state: PipelineStatus::Running,
            timestamp: Utc::now(),
            execution_id: Some(execution.id),
            error: None,
        });

        tracing::info!(
            pipeline = pipeline_id,
            execution = execution.id,
            trigger = trigger_type,
            "pipeline run started"
        );

        let manager = self.clone();
        let execution_id = execution.id;
        let pipeline_name = record.name;
        tokio::spawn(async move {
            manager
                .drive_run(pipeline_id, pipeline_name, execution_id, pipeline, token)
                .await;
        });

        Ok(execution)
    }

    /// Cancel the in-flight run; its terminal state becomes `STOPPED`.
    pub fn stop(&self, pipeline_id: i64) -> Result<(), LifecycleError> {
        let running = self.running.read().unwrap_or_else(|e| e.into_inner());
        let handle = running
            .get(&pipeline_id)
            .ok_or(LifecycleError::NotRunning(pipeline_id))?;

        handle.token.cancel();
        let mut status = handle.status.lock().unwrap_or_else(|e| e.into_inner());
        *status = PipelineStatus::Stopped;
        Ok(())
    }

    /// Mark the run paused. Steps already in flight are not interrupted;
    /// the nominal status is what triggers consult before firing.
    pub async fn pause(&self, pipeline_id: i64) -> Result<(), LifecycleError> {
        let execution_id = {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            let handle = running
                .get(&pipeline_id)
                .ok_or(LifecycleError::NotRunning(pipeline_id))?;
            let mut status = handle.status.lock().unwrap_or_else(|e| e.into_inner());
            if *status != PipelineStatus::Running {
                return Err(LifecycleError::NotRunning(pipeline_id));
            }
            *status = PipelineStatus::Paused;
            handle.execution_id
        };

        let record = self.catalog.load(pipeline_id).await?;
        self.catalog
            .update_pipeline_state(pipeline_id, PipelineStatus::Paused)
            .await?;

        self.emit(StateEvent {
            pipeline_id,
            pipeline_name: record.name,
            old_state: PipelineStatus::Running,
            new_state: PipelineStatus::Paused,
            timestamp: Utc::now(),
            execution_id: Some(execution_id),
            error: None,
        });
        Ok(())
    }

    /// Return a paused run to `RUNNING`.
    pub async fn resume(&self, pipeline_id: i64) -> Result<(), LifecycleError> {
        let execution_id = {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            let handle = running
                .get(&pipeline_id)
                .ok_or(LifecycleError::NotRunning(pipeline_id))?;
            let mut status = handle.status.lock().unwrap_or_else(|e| e.into_inner());
            if *status != PipelineStatus::Paused {
                return Err(LifecycleError::NotPaused(pipeline_id));
            }
            *status = PipelineStatus::Running;
            handle.execution_id
        };

        let record = self.catalog.load(pipeline_id).await?;
        self.catalog
            .update_pipeline_state(pipeline_id, PipelineStatus::Running)
            .await?;

        self.emit(StateEvent {
            pipeline_id,
            pipeline_name: record.name,
            old_state: PipelineStatus::Paused,
            new_state: PipelineStatus::Running,
            timestamp: Utc::now(),
            execution_id: Some(execution_id),
            error: None,
        });
        Ok(())
    }

    /// Arm the pipeline's triggers so every fire starts a run through
    /// this manager. Returns the number of armed triggers.
    pub async fn activate_triggers(self: &Arc<Self>, pipeline_id: i64) -> Result<usize, LifecycleError> {
        let record = self.catalog.load(pipeline_id).await?;
        let pipeline = self.loaded_pipeline(pipeline_id, &record.configuration)?;

        let count = pipeline.trigger_names().len();
        let manager = self.clone();
        pipeline.arm_triggers(move |_steps_pipeline, data| {
            let manager = manager.clone();
            tokio::spawn(async move {
                match manager.start(pipeline_id, "webhook", Some(data)).await {
                    Ok(execution) => {
                        tracing::debug!(
                            pipeline = pipeline_id,
                            execution = execution.id,
                            "trigger fire accepted"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(pipeline = pipeline_id, error = %err, "trigger fire rejected");
                    }
                }
            });
        });

        Ok(count)
    }

    /// Drop the cached executable pipeline, forcing a reload on the next
    /// start (used after the stored configuration changes).
    pub fn invalidate(&self, pipeline_id: i64) {
        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        pipelines.remove(&pipeline_id);
    }

    fn loaded_pipeline(
        &self,
        pipeline_id: i64,
        configuration: &crate::config::PipelineConfig,
    ) -> Result<Pipeline, LoadError> {
        {
            let pipelines = self.pipelines.read().unwrap_or_else(|e| e.into_inner());
            if let Some(pipeline) = pipelines.get(&pipeline_id) {
                return Ok(pipeline.clone());
            }
        }

        let mut ctx = BuildContext::new(self.registry.clone());
        if let Some(mux) = &self.webhooks {
            ctx = ctx.with_webhooks(mux.clone());
        }

        let pipeline = load_pipeline(configuration, &ctx)?;
        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        pipelines.insert(pipeline_id, pipeline.clone());
        Ok(pipeline)
    }

    async fn drive_run(
        &self,
        pipeline_id: i64,
        pipeline_name: String,
        execution_id: i64,
        pipeline: Pipeline,
        token: CancellationToken,
    ) {
        let started_at = {
            let running = self.running.read().unwrap_or_else(|e| e.into_inner());
            running
                .get(&pipeline_id)
                .map(|handle| handle.started_at)
                .unwrap_or_else(Instant::now)
        };

        let (change_tx, mut change_rx) = change_channel();
        let catalog = self.catalog.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = change_rx.recv().await {
                let message = match event.kind {
                    ChangeKind::Start => format!("step {} started", event.step_name),
                    ChangeKind::End => format!("step {} completed", event.step_name),
                };
                let entry = ExecutionLog {
                    execution_id,
                    step_name: Some(event.step_name),
                    level: LogLevel::Info,
                    message,
                    data: event.data.map(Value::Object),
                    timestamp: Utc::now(),
                };
                if let Err(err) = catalog.record_log(entry).await {
                    tracing::warn!(execution = execution_id, error = %err, "failed to record log");
                }
            }
        });

        let result = {
            let mut run_pipeline = pipeline.without_triggers();
            run_pipeline.set_on_change(change_tx);
            run_pipeline.run(&token).await
        };
        let _ = forwarder.await;

        let final_state = if token.is_cancelled() {
            PipelineStatus::Stopped
        } else if result.is_err() {
            PipelineStatus::Error
        } else {
            PipelineStatus::Completed
        };
        let error_message = result.err().map(|e| e.to_string());
        let duration_ms = started_at.elapsed().as_millis() as i64;

        if let Err(err) = self
            .catalog
            .record_end(execution_id, final_state, duration_ms, error_message.clone())
            .await
        {
            tracing::warn!(execution = execution_id, error = %err, "failed to close execution");
        }
        if let Err(err) = self
            .catalog
            .update_pipeline_state(pipeline_id, final_state)
            .await
        {
            tracing::warn!(pipeline = pipeline_id, error = %err, "failed to persist final state");
        }

        {
            let mut running = self.running.write().unwrap_or_else(|e| e.into_inner());
            running.remove(&pipeline_id);
        }

        tracing::info!(
            pipeline = pipeline_id,
            execution = execution_id,
            state = %final_state,
            duration_ms,
            "pipeline run finished"
        );

        self.emit(StateEvent {
            pipeline_id,
            pipeline_name,
            old_state: PipelineStatus::Running,
            new_state: final_state,
            timestamp: Utc::now(),
            execution_id: Some(execution_id),
            error: error_message,
        });
    }

    /// Fan out to a snapshot of the listener list, one task per listener.
    fn emit(&self, event: StateEvent) {
        let listeners: Vec<Arc<dyn StateListener>> = {
            let listeners = self.listeners.read().unwrap_or_else(|e| e.into_inner());
            listeners.clone()
        };

        for listener in listeners {
            let event = event.clone();
            tokio::spawn(async move {
                listener.on_state_change(event);
            });
        }
    }
}
