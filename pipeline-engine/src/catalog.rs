// Catalog Adapter
// The injected interface to the external pipeline/execution store

use crate::config::PipelineConfig;
use crate::data::Value;
use crate::lifecycle::PipelineStatus;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use thiserror::Error;

/// A stored pipeline definition, already parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    pub state: PipelineStatus,
    pub configuration: PipelineConfig,
}

/// One tracked execution of a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub pipeline_id: i64,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub trigger_type: String,
    pub trigger_data: Option<Value>,
}

/// A log line attached to an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub execution_id: i64,
    pub step_name: Option<String>,
    pub level: LogLevel,
    pub message: String,
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("pipeline {0} not found")]
    NotFound(i64),

    #[error("execution {0} not found")]
    ExecutionNotFound(i64),

    #[error("catalog storage error: {0}")]
    Storage(String),
}

/// The engine never touches pipeline storage directly; a thin adapter
/// with this shape is injected instead.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch a pipeline definition by id.
    async fn load(&self, pipeline_id: i64) -> Result<PipelineRecord, CatalogError>;

    /// Create an execution record for a starting run.
    async fn record_start(
        &self,
        pipeline_id: i64,
        trigger_type: &str,
        trigger_data: Option<Value>,
    ) -> Result<ExecutionRecord, CatalogError>;

    /// Close an execution record with its terminal status.
    async fn record_end(
        &self,
        execution_id: i64,
        status: PipelineStatus,
        duration_ms: i64,
        error_message: Option<String>,
    ) -> Result<(), CatalogError>;

    /// Append a log entry to an execution.
    async fn record_log(&self, entry: ExecutionLog) -> Result<(), CatalogError>;

    /// Persist the pipeline's current lifecycle state.
    async fn update_pipeline_state(
        &self,
        pipeline_id: i64,
        state: PipelineStatus,
    ) -> Result<(), CatalogError>;
}

/// In-memory catalog for tests and single-process embedding. The
/// relational store lives behind the same trait, outside the engine.
#[derive(Default)]
pub struct MemoryCatalog {
    pipelines: RwLock<HashMap<i64, PipelineRecord>>,
    executions: RwLock<HashMap<i64, ExecutionRecord>>,
    logs: RwLock<Vec<ExecutionLog>>,
    next_execution_id: AtomicI64,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            next_execution_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn insert_pipeline(&self, record: PipelineRecord) {
        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        pipelines.insert(record.id, record);
    }

    pub fn execution(&self, id: i64) -> Option<ExecutionRecord> {
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        executions.get(&id).cloned()
    }

    pub fn executions_for(&self, pipeline_id: i64) -> Vec<ExecutionRecord> {
        let executions = self.executions.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<ExecutionRecord> = executions
            .values()
            .filter(|e| e.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        list.sort_by_key(|e| e.id);
        list
    }

    pub fn logs(&self) -> Vec<ExecutionLog> {
        let logs = self.logs.read().unwrap_or_else(|e| e.into_inner());
        logs.clone()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn load(&self, pipeline_id: i64) -> Result<PipelineRecord, CatalogError> {
        let pipelines = self.pipelines.read().unwrap_or_else(|e| e.into_inner());
        pipelines
            .get(&pipeline_id)
            .cloned()
            .ok_or(CatalogError::NotFound(pipeline_id))
    }

    async fn record_start(
        &self,
        pipeline_id: i64,
        trigger_type: &str,
        trigger_data: Option<Value>,
    ) -> Result<ExecutionRecord, CatalogError> {
        let id = self.next_execution_id.fetch_add(1, Ordering::SeqCst);
        let record = ExecutionRecord {
            id,
            pipeline_id,
            status: PipelineStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            error_message: None,
            trigger_type: trigger_type.to_string(),
            trigger_data,
        };

        let mut executions = self.executions.write().unwrap_or_else(|e| e.into_inner());
        executions.insert(id, record.clone());
        Ok(record)
    }

    async fn record_end(
        &self,
        execution_id: i64,
        status: PipelineStatus,
        duration_ms: i64,
        error_message: Option<String>,
    ) -> Result<(), CatalogError> {
        let mut executions = self.executions.write().unwrap_or_else(|e| e.into_inner());
        let record = executions
            .get_mut(&execution_id)
            .ok_or(CatalogError::ExecutionNotFound(execution_id))?;

        record.status = status;
        record.completed_at = Some(Utc::now());
        record.duration_ms = Some(duration_ms);
        record.error_message = error_message;
        Ok(())
    }

    async fn record_log(&self, entry: ExecutionLog) -> Result<(), CatalogError> {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        logs.push(entry);
        Ok(())
    }

    async fn update_pipeline_state(
        &self,
        pipeline_id: i64,
        state: PipelineStatus,
    ) -> Result<(), CatalogError> {
        let mut pipelines = self.pipelines.write().unwrap_or_else(|e| e.into_inner());
        let record = pipelines
            .get_mut(&pipeline_id)
            .ok_or(CatalogError::NotFound(pipeline_id))?;
        record.state = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> PipelineRecord {
        PipelineRecord {
            id,
            name: format!("p{id}"),
            enabled: true,
            state: PipelineStatus::Created,
            configuration: PipelineConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_execution_round_trip() {
        let catalog = MemoryCatalog::new();
        catalog.insert_pipeline(record(1));

        let execution = catalog.record_start(1, "manual", None).await.unwrap();
        assert_eq!(execution.status, PipelineStatus::Running);

        catalog
            .record_end(execution.id, PipelineStatus::Completed, 12, None)
            .await
            .unwrap();

        let stored = catalog.execution(execution.id).unwrap();
        assert_eq!(stored.status, PipelineStatus::Completed);
        assert_eq!(stored.duration_ms, Some(12));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_pipeline() {
        let catalog = MemoryCatalog::new();
        assert!(matches!(
            catalog.load(9).await,
            Err(CatalogError::NotFound(9))
        ));
    }
}
