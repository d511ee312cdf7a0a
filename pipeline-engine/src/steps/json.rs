use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Decodes a resolved JSON string into a structured value.
pub struct JsonStep {
    name: String,
    data: InterpolateValue<String>,
}

#[async_trait]
impl Step for JsonStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let raw = self.data.resolve(state)?;
        let decoded: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(default_output(Value::from(decoded)))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let data = require(config, "data")?.clone();
    Ok(Arc::new(JsonStep {
        name: name.to_string(),
        data: InterpolateValue::new("data", data),
    }))
}
