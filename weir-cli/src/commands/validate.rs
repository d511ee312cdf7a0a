use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use pipeline_engine::{load_pipeline, BuildContext, Registry, WebhookMux};

/// Validate a pipeline file
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,
}

pub fn execute(args: ValidateArgs) -> Result<()> {
    output::status("Validating", &format!("{}", args.pipeline.display()));

    let config = super::read_config(&args.pipeline)?;
    output::success("document syntax valid");

    // Validation constructs real steps, so webhook triggers need a mux
    // even though nothing is served here.
    let mux = Arc::new(WebhookMux::new());
    let ctx = BuildContext::new(Arc::new(Registry::with_builtins())).with_webhooks(mux);

    match load_pipeline(&config, &ctx) {
        Ok(pipeline) => {
            output::success(&format!(
                "{} steps, {} triggers, dependencies acyclic",
                pipeline.step_names().len(),
                pipeline.trigger_names().len()
            ));
            Ok(())
        }
        Err(err) => {
            output::failure(&format!("{err}"));
            std::process::exit(1);
        }
    }
}
