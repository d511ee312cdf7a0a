use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Echoes the resolved value to standard output and republishes it.
pub struct StdoutStep {
    name: String,
    value: InterpolateValue<String>,
}

#[async_trait]
impl Step for StdoutStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let value = self.value.resolve(state)?;
        println!("{}", value);
        Ok(default_output(Value::String(value)))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let value = require(config, "value")?.clone();
    Ok(Arc::new(StdoutStep {
        name: name.to_string(),
        value: InterpolateValue::new("value", value),
    }))
}
