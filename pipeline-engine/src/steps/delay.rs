use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for a configured number of milliseconds, then publishes null.
pub struct DelayStep {
    name: String,
    delay: InterpolateValue<i64>,
}

#[async_trait]
impl Step for DelayStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let ms = self.delay.resolve(state)?;
        let duration = Duration::from_millis(ms.max(0) as u64);

        tokio::select! {
            _ = token.cancelled() => Err(StepError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(default_output(Value::Null)),
        }
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let ms = require(config, "ms")?.clone();
    Ok(Arc::new(DelayStep {
        name: name.to_string(),
        delay: InterpolateValue::new("ms", ms),
    }))
}
