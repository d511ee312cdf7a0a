// Declarative Pipeline Configuration
// The parsed document the loader turns into an executable pipeline

use crate::data::Value;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A parsed pipeline document. How it was serialized (YAML, JSON, a
/// catalog row) is the front door's concern, not the engine's.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// One declarative node of the pipeline graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique name within the pipeline.
    pub name: String,

    /// Registry kind, e.g. `file` or `webhook`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Dependency strings: `stepName` or `stepName:outputName`.
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Opaque kind-specific configuration.
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl StepSpec {
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            inputs: Vec::new(),
            config: HashMap::new(),
        }
    }

    pub fn with_input(mut self, input: &str) -> Self {
        self.inputs.push(input.to_string());
        self
    }

    pub fn with_config(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_from_json() {
        let json = r#"{
            "steps": [
                {"name": "a", "type": "file", "config": {"path": "'in.txt'"}},
                {"name": "b", "type": "stdout", "inputs": ["a"], "config": {"value": "ctx.a"}}
            ]
        }"#;

        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.steps.len(), 2);
        assert_eq!(config.steps[0].kind, "file");
        assert_eq!(config.steps[1].inputs, vec!["a"]);
        assert_eq!(
            config.steps[1].config.get("value"),
            Some(&Value::String("ctx.a".into()))
        );
    }

    #[test]
    fn test_builder_helpers() {
        let spec = StepSpec::new("s", "mapper")
            .with_input("a:out")
            .with_config("x", 3i64);
        assert_eq!(spec.inputs, vec!["a:out"]);
        assert_eq!(spec.config.get("x"), Some(&Value::Int(3)));
    }
}
