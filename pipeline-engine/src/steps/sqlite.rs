use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs a SQL statement against a SQLite database.
///
/// SELECT publishes the rows as an array of column-keyed objects; any
/// other statement publishes a rows-affected summary. The connection is
/// opened and closed within a single invocation.
pub struct SqliteStep {
    name: String,
    connection: InterpolateValue<String>,
    query: InterpolateValue<String>,
}

#[async_trait]
impl Step for SqliteStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let connection = self.connection.resolve(state)?;
        let query = self.query.resolve(state)?;

        tokio::task::spawn_blocking(move || execute(&connection, &query))
            .await
            .map_err(|err| StepError::Message(format!("sqlite task failed: {err}")))?
    }
}

fn execute(connection: &str, query: &str) -> Result<OutputBag, StepError> {
    let conn = Connection::open(connection)?;

    if query.trim_start().to_uppercase().starts_with("SELECT") {
        let mut stmt = conn.prepare(query)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt.query([])?;
        let mut results = Vec::new();

        while let Some(row) = rows.next()? {
            let mut object = HashMap::new();
            for (i, column) in columns.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(n) => Value::Int(n),
                    ValueRef::Real(f) => Value::Float(f),
                    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
                    ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).to_string()),
                };
                object.insert(column.clone(), value);
            }
            results.push(Value::Object(object));
        }

        Ok(default_output(Value::Array(results)))
    } else {
        let affected = conn.execute(query, [])?;
        Ok(default_output(Value::String(format!(
            "Rows affected: {}",
            affected
        ))))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let connection = require(config, "connection")?.clone();
    let query = require(config, "query")?.clone();

    Ok(Arc::new(SqliteStep {
        name: name.to_string(),
        connection: InterpolateValue::new("connection", connection),
        query: InterpolateValue::new("query", query),
    }))
}
