use crate::data::{single_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Publishes exactly one of the outputs `true` or `false`.
///
/// The unchosen branch is intentionally left unpublished, so steps gated
/// on it observe a missing output and cascade-skip.
pub struct IfStep {
    name: String,
    condition: InterpolateValue<bool>,
}

#[async_trait]
impl Step for IfStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let condition = self.condition.resolve(state)?;

        if condition {
            Ok(single_output("true", Value::Null))
        } else {
            Ok(single_output("false", Value::Null))
        }
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let condition = require(config, "condition")?.clone();
    Ok(Arc::new(IfStep {
        name: name.to_string(),
        condition: InterpolateValue::new("condition", condition),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::default_output;
    use crate::registry::Registry;

    fn ctx() -> BuildContext {
        BuildContext::new(Arc::new(Registry::with_builtins()))
    }

    async fn run_if(condition: Value, state: &PipelineState) -> OutputBag {
        let mut config = ConfigMap::new();
        config.insert("condition".to_string(), condition);
        let step = factory("gate", &config, &ctx()).unwrap();
        step.run(&CancellationToken::new(), state).await.unwrap()
    }

    #[tokio::test]
    async fn test_true_branch_published_alone() {
        let state = PipelineState::new();
        let bag = run_if(Value::String("true".into()), &state).await;

        assert!(bag.contains_key("true"));
        assert!(!bag.contains_key("false"));
    }

    #[tokio::test]
    async fn test_condition_evaluates_against_state() {
        let state = PipelineState::new();
        state.set("n", default_output(Value::Int(3)));

        let bag = run_if(Value::String("ctx.n > 5".into()), &state).await;
        assert!(bag.contains_key("false"));
    }

    #[tokio::test]
    async fn test_boolean_literal_condition() {
        let state = PipelineState::new();
        let bag = run_if(Value::Bool(false), &state).await;
        assert!(bag.contains_key("false"));
    }
}
