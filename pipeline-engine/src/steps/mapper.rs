use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::{InterpolateValue, TargetType};
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builds an object from a list of named fields, each resolved against
/// state and coerced to its declared type tag.
pub struct MapperStep {
    name: String,
    fields: Vec<(String, InterpolateValue<Value>)>,
}

#[async_trait]
impl Step for MapperStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        _token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let mut object = HashMap::new();
        for (field, value) in &self.fields {
            object.insert(field.clone(), value.resolve(state)?);
        }
        Ok(default_output(Value::Object(object)))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let Value::Array(raw_fields) = require(config, "fields")? else {
        return Err(StepError::invalid_config(
            "fields",
            "expected a list of field maps",
        ));
    };

    let mut fields = Vec::with_capacity(raw_fields.len());

    for raw in raw_fields {
        let Value::Object(field) = raw else {
            return Err(StepError::invalid_config(
                "fields",
                format!("each field must be a map, got {}", raw.type_name()),
            ));
        };

        let Some(Value::String(field_name)) = field.get("name") else {
            return Err(StepError::invalid_config(
                "fields",
                "field map must contain a string 'name'",
            ));
        };
        let Some(value) = field.get("value") else {
            return Err(StepError::invalid_config(
                "fields",
                format!("field '{}' has no 'value'", field_name),
            ));
        };

        // Unknown tags are treated as string.
        let target = match field.get("type") {
            Some(Value::String(tag)) => TargetType::from_tag(tag).unwrap_or(TargetType::String),
            _ => TargetType::String,
        };

        fields.push((
            field_name.clone(),
            InterpolateValue::with_target(field_name, value.clone(), target),
        ));
    }

    Ok(Arc::new(MapperStep {
        name: name.to_string(),
        fields,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DEFAULT_OUTPUT;
    use crate::registry::Registry;

    fn ctx() -> BuildContext {
        BuildContext::new(Arc::new(Registry::with_builtins()))
    }

    fn field(name: &str, value: Value, tag: Option<&str>) -> Value {
        let mut map = HashMap::new();
        map.insert("name".to_string(), Value::String(name.to_string()));
        map.insert("value".to_string(), value);
        if let Some(tag) = tag {
            map.insert("type".to_string(), Value::String(tag.to_string()));
        }
        Value::Object(map)
    }

    async fn run_mapper(fields: Vec<Value>) -> OutputBag {
        let mut config = ConfigMap::new();
        config.insert("fields".to_string(), Value::Array(fields));
        let step = factory("m", &config, &ctx()).unwrap();

        let state = PipelineState::new();
        step.run(&CancellationToken::new(), &state).await.unwrap()
    }

    #[tokio::test]
    async fn test_type_tags_drive_coercion() {
        let bag = run_mapper(vec![
            field("x", Value::String("'1'".into()), Some("int")),
            field("flag", Value::String("'yes'".into()), Some("bool")),
            field("label", Value::String("'7'".into()), None),
        ])
        .await;

        let Some(Value::Object(obj)) = bag.get(DEFAULT_OUTPUT) else {
            panic!("expected object output")
        };
        assert_eq!(obj["x"], Value::Int(1));
        assert_eq!(obj["flag"], Value::Bool(true));
        assert_eq!(obj["label"], Value::String("7".into()));
    }

    #[tokio::test]
    async fn test_unknown_tag_is_string() {
        let bag = run_mapper(vec![field("v", Value::String("'3'".into()), Some("decimal"))]).await;
        let Some(Value::Object(obj)) = bag.get(DEFAULT_OUTPUT) else {
            panic!("expected object output")
        };
        assert_eq!(obj["v"], Value::String("3".into()));
    }

    #[tokio::test]
    async fn test_literal_list_passes_through_untouched() {
        let list = Value::Array(vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
        let bag = run_mapper(vec![field("list", list.clone(), None)]).await;
        let Some(Value::Object(obj)) = bag.get(DEFAULT_OUTPUT) else {
            panic!("expected object output")
        };
        assert_eq!(obj["list"], list);
    }

    #[test]
    fn test_malformed_field_is_construction_error() {
        let mut config = ConfigMap::new();
        config.insert(
            "fields".to_string(),
            Value::Array(vec![Value::String("oops".into())]),
        );
        assert!(factory("m", &config, &ctx()).is_err());
    }
}
