// Built-in Steps
// The step and trigger kinds shipped with the engine

pub mod conditional;
pub mod delay;
pub mod file;
pub mod foreach;
pub mod http_client;
pub mod json;
pub mod mapper;
pub mod plugin;
pub mod sqlite;
pub mod stdout;
pub mod uppercase;
pub mod webhook;

use crate::data::Value;
use crate::registry::Registry;
use crate::step::{ConfigMap, StepError};

use std::sync::Arc;

/// Install every built-in kind into the registry.
pub fn register_builtins(registry: &mut Registry) {
    registry.register_step("delay", Arc::new(delay::factory));
    registry.register_step("file", Arc::new(file::factory));
    registry.register_step("stdout", Arc::new(stdout::factory));
    registry.register_step("uppercase", Arc::new(uppercase::factory));
    registry.register_step("mapper", Arc::new(mapper::factory));
    registry.register_step("if", Arc::new(conditional::factory));
    registry.register_step("foreach", Arc::new(foreach::factory));
    registry.register_step("http-client", Arc::new(http_client::factory));
    registry.register_step("sqlite", Arc::new(sqlite::factory));
    registry.register_step("json", Arc::new(json::factory));
    registry.register_step("plugin", Arc::new(plugin::factory));

    registry.register_trigger("webhook", Arc::new(webhook::factory));
}

pub(crate) fn require<'a>(config: &'a ConfigMap, key: &str) -> Result<&'a Value, StepError> {
    config.get(key).ok_or_else(|| StepError::missing_config(key))
}

pub(crate) fn require_str(config: &ConfigMap, key: &str) -> Result<String, StepError> {
    match require(config, key)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(StepError::invalid_config(
            key,
            format!("expected string, got {}", other.type_name()),
        )),
    }
}

pub(crate) fn optional_str(config: &ConfigMap, key: &str) -> Option<String> {
    match config.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}
