use crate::config::{PipelineConfig, StepSpec};
use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::loader::load_pipeline;
use crate::runner::Pipeline;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs a sub-pipeline once per list item, sequentially by item index.
///
/// Each iteration gets a fresh state pre-populated with `foreach.item`
/// and `foreach.index`, so sub-steps address the loop bindings as
/// `ctx.foreach.item` and `ctx.foreach.index`.
pub struct ForeachStep {
    name: String,
    list: InterpolateValue<Vec<Value>>,
    sub: Pipeline,
}

#[async_trait]
impl Step for ForeachStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let items = self.list.resolve(state)?;

        for (index, item) in items.iter().enumerate() {
            if token.is_cancelled() {
                return Err(StepError::Cancelled);
            }

            let sub_state = Arc::new(PipelineState::new());
            let mut bindings = OutputBag::new();
            bindings.insert("item".to_string(), item.clone());
            bindings.insert("index".to_string(), Value::Int(index as i64));
            sub_state.set("foreach", bindings);

            self.sub
                .run_with_state(token, sub_state)
                .await
                .map_err(|err| {
                    StepError::Message(format!("iteration {} failed: {}", index, err))
                })?;
        }

        Ok(default_output(Value::String(format!(
            "processed {} items",
            items.len()
        ))))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let list = require(config, "list")?.clone();

    let steps_value = require(config, "steps")?.clone();
    let specs: Vec<StepSpec> = serde_json::from_value(serde_json::Value::from(steps_value))
        .map_err(|err| StepError::invalid_config("steps", err.to_string()))?;

    let sub = load_pipeline(&PipelineConfig { steps: specs }, ctx)
        .map_err(|err| StepError::invalid_config("steps", err.to_string()))?;

    Ok(Arc::new(ForeachStep {
        name: name.to_string(),
        list: InterpolateValue::new("list", list),
        sub,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DEFAULT_OUTPUT;
    use crate::registry::Registry;
    use std::collections::HashMap;

    fn ctx() -> BuildContext {
        BuildContext::new(Arc::new(Registry::with_builtins()))
    }

    fn sub_step(name: &str, kind: &str, config: Vec<(&str, Value)>) -> Value {
        let mut spec = HashMap::new();
        spec.insert("name".to_string(), Value::String(name.to_string()));
        spec.insert("type".to_string(), Value::String(kind.to_string()));
        spec.insert(
            "config".to_string(),
            Value::Object(
                config
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
        );
        Value::Object(spec)
    }

    #[tokio::test]
    async fn test_runs_sub_pipeline_per_item() {
        let mut config = ConfigMap::new();
        config.insert(
            "list".to_string(),
            Value::Array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]),
        );
        config.insert(
            "steps".to_string(),
            Value::Array(vec![sub_step(
                "p",
                "stdout",
                vec![("value", Value::String("ctx.foreach.item".into()))],
            )]),
        );

        let step = factory("F", &config, &ctx()).unwrap();
        let state = PipelineState::new();
        let bag = step.run(&CancellationToken::new(), &state).await.unwrap();

        assert_eq!(
            bag.get(DEFAULT_OUTPUT),
            Some(&Value::String("processed 3 items".into()))
        );
    }

    #[tokio::test]
    async fn test_list_resolved_from_state() {
        let state = PipelineState::new();
        let mut obj = HashMap::new();
        obj.insert(
            "list".to_string(),
            Value::Array(vec![Value::Int(1), Value::Int(2)]),
        );
        state.set("L", default_output(Value::Object(obj)));

        let mut config = ConfigMap::new();
        config.insert("list".to_string(), Value::String("ctx.L.list".into()));
        config.insert(
            "steps".to_string(),
            Value::Array(vec![sub_step(
                "p",
                "stdout",
                vec![("value", Value::String("ctx.foreach.index".into()))],
            )]),
        );

        let step = factory("F", &config, &ctx()).unwrap();
        let bag = step.run(&CancellationToken::new(), &state).await.unwrap();
        assert_eq!(
            bag.get(DEFAULT_OUTPUT),
            Some(&Value::String("processed 2 items".into()))
        );
    }

    #[test]
    fn test_invalid_sub_step_kind_fails_construction() {
        let mut config = ConfigMap::new();
        config.insert("list".to_string(), Value::Array(vec![]));
        config.insert(
            "steps".to_string(),
            Value::Array(vec![sub_step("p", "teleport", vec![])]),
        );

        assert!(factory("F", &config, &ctx()).is_err());
    }
}
