use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Uppercases the resolved string.
pub struct UppercaseStep {
    name: String,
    value: InterpolateValue<String>,
}

#[async_trait]
impl Step for UppercaseStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let value = self.value.resolve(state)?;
        Ok(default_output(Value::String(value.to_uppercase())))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let value = require(config, "value")?.clone();
    Ok(Arc::new(UppercaseStep {
        name: name.to_string(),
        value: InterpolateValue::new("value", value),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{default_output as bag, DEFAULT_OUTPUT};
    use crate::registry::Registry;

    #[tokio::test]
    async fn test_uppercases_upstream_output() {
        let state = PipelineState::new();
        state.set("a", bag(Value::String("hi".into())));

        let mut config = ConfigMap::new();
        config.insert("value".to_string(), Value::String("ctx.a".into()));

        let ctx = BuildContext::new(Arc::new(Registry::with_builtins()));
        let step = factory("b", &config, &ctx).unwrap();
        let out = step.run(&CancellationToken::new(), &state).await.unwrap();

        assert_eq!(out.get(DEFAULT_OUTPUT), Some(&Value::String("HI".into())));
    }
}
