pub mod run;
pub mod serve;
pub mod validate;

use color_eyre::Result;
use pipeline_engine::PipelineConfig;
use std::path::Path;

/// Parse a pipeline document from a YAML file. Serialization concerns
/// stay here; the engine only ever sees the parsed configuration.
pub fn read_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        color_eyre::eyre::bail!("Pipeline file not found: {}", path.display());
    }
    let text = std::fs::read_to_string(path)?;
    let config: PipelineConfig = serde_yaml::from_str(&text)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to parse pipeline file: {}", e))?;
    Ok(config)
}
