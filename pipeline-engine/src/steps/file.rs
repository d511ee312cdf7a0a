use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reads a file and publishes its contents as a string.
pub struct FileStep {
    name: String,
    path: InterpolateValue<String>,
}

#[async_trait]
impl Step for FileStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let path = self.path.resolve(state)?;
        let contents = tokio::fs::read_to_string(&path).await?;
        Ok(default_output(Value::String(contents)))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let path = require(config, "path")?.clone();
    Ok(Arc::new(FileStep {
        name: name.to_string(),
        path: InterpolateValue::new("path", path),
    }))
}
