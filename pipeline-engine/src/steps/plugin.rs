use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::{InterpolateValue, TargetType};
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::require_str;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Manifest loaded from `plugin.json` next to the plugin executable.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub inputs: HashMap<String, PluginInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginInput {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub interpolation: bool,
    #[serde(default)]
    pub required: bool,
}

/// Runs an external executable as a step.
///
/// The resolved input map is marshalled to JSON on the child's standard
/// input; its standard output is decoded as JSON and published. A
/// non-zero exit or undecodable output fails the step.
pub struct PluginStep {
    name: String,
    command: PathBuf,
    config: ConfigMap,
    manifest: PluginManifest,
}

#[async_trait]
impl Step for PluginStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let mut resolved = serde_json::Map::new();

        for (key, input) in &self.manifest.inputs {
            let raw = self
                .config
                .get(key)
                .cloned()
                .or_else(|| input.default.clone().map(Value::from));
            let Some(raw) = raw else { continue };

            let value = if input.interpolation {
                let iv = match TargetType::from_tag(&input.kind) {
                    Some(target) => InterpolateValue::<Value>::with_target(key, raw, target),
                    None => InterpolateValue::new(key, raw),
                };
                iv.resolve(state)?
            } else {
                raw
            };

            resolved.insert(key.clone(), serde_json::Value::from(value));
        }

        let payload = serde_json::to_vec(&serde_json::Value::Object(resolved))?;

        let mut child = Command::new(&self.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        let output = tokio::select! {
            _ = token.cancelled() => return Err(StepError::Cancelled),
            result = child.wait_with_output() => result?,
        };

        if !output.status.success() {
            return Err(StepError::Subprocess(format!(
                "{} exited with {}",
                self.command.display(),
                output.status
            )));
        }

        tracing::debug!(
            step = %self.name,
            plugin = %self.manifest.name,
            bytes = output.stdout.len(),
            "plugin produced output"
        );

        let decoded: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        Ok(default_output(Value::from(decoded)))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let command = PathBuf::from(require_str(config, "command")?);

    let metadata = std::fs::metadata(&command).map_err(|_| {
        StepError::invalid_config("command", format!("command not found: {}", command.display()))
    })?;
    if !is_executable(&metadata) {
        return Err(StepError::invalid_config(
            "command",
            format!("command is not executable: {}", command.display()),
        ));
    }

    let manifest_path = command
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("plugin.json");
    let manifest_text = std::fs::read_to_string(&manifest_path).map_err(|_| {
        StepError::invalid_config(
            "command",
            format!("plugin manifest not found: {}", manifest_path.display()),
        )
    })?;
    let manifest: PluginManifest = serde_json::from_str(&manifest_text).map_err(|err| {
        StepError::invalid_config("command", format!("invalid plugin manifest: {err}"))
    })?;

    let mut other_config = config.clone();
    other_config.remove("command");

    for (key, input) in &manifest.inputs {
        if input.required && !other_config.contains_key(key) {
            return Err(StepError::missing_config(key));
        }
    }

    Ok(Arc::new(PluginStep {
        name: name.to_string(),
        command,
        config: other_config,
        manifest,
    }))
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DEFAULT_OUTPUT;
    use crate::registry::Registry;
    use std::io::Write;

    fn ctx() -> BuildContext {
        BuildContext::new(Arc::new(Registry::with_builtins()))
    }

    /// Lay down an echo plugin: a shell script that copies stdin to
    /// stdout, plus its manifest.
    fn write_echo_plugin(dir: &Path) -> PathBuf {
        let command = dir.join("echo-plugin");
        let mut script = std::fs::File::create(&command).unwrap();
        writeln!(script, "#!/bin/sh").unwrap();
        writeln!(script, "cat").unwrap();
        drop(script);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&command, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        std::fs::write(
            dir.join("plugin.json"),
            r#"{
                "name": "echo",
                "version": "1.0.0",
                "inputs": {
                    "text": {"type": "string", "label": "Text", "interpolation": true, "required": true}
                }
            }"#,
        )
        .unwrap();

        command
    }

    #[tokio::test]
    async fn test_round_trips_json_through_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        let command = write_echo_plugin(dir.path());

        let state = PipelineState::new();
        state.set("up", default_output(Value::String("hi".into())));

        let mut config = ConfigMap::new();
        config.insert(
            "command".to_string(),
            Value::String(command.display().to_string()),
        );
        config.insert("text".to_string(), Value::String("ctx.up".into()));

        let step = factory("p", &config, &ctx()).unwrap();
        let bag = step.run(&CancellationToken::new(), &state).await.unwrap();

        let Some(Value::Object(out)) = bag.get(DEFAULT_OUTPUT) else {
            panic!("expected decoded object")
        };
        assert_eq!(out["text"], Value::String("hi".into()));
    }

    #[test]
    fn test_missing_manifest_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let command = dir.path().join("lonely");
        std::fs::write(&command, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&command, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut config = ConfigMap::new();
        config.insert(
            "command".to_string(),
            Value::String(command.display().to_string()),
        );

        assert!(factory("p", &config, &ctx()).is_err());
    }

    #[test]
    fn test_missing_required_input_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let command = write_echo_plugin(dir.path());

        let mut config = ConfigMap::new();
        config.insert(
            "command".to_string(),
            Value::String(command.display().to_string()),
        );

        let err = factory("p", &config, &ctx()).unwrap_err();
        assert!(matches!(err, StepError::MissingConfig(key) if key == "text"));
    }

    #[test]
    fn test_missing_command_fails_construction() {
        let mut config = ConfigMap::new();
        config.insert(
            "command".to_string(),
            Value::String("/no/such/binary".into()),
        );
        assert!(factory("p", &config, &ctx()).is_err());
    }
}
