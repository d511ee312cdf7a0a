use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use pipeline_engine::{
    change_channel, load_pipeline, BuildContext, ChangeKind, Registry, Value, DEFAULT_OUTPUT,
};
use tokio_util::sync::CancellationToken;

/// Run a pipeline file once
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Print each step's published outputs
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let config = super::read_config(&args.pipeline)?;

    output::status("Loading", &format!("{}", args.pipeline.display()));

    let ctx = BuildContext::new(Arc::new(Registry::with_builtins()));
    let mut pipeline = load_pipeline(&config, &ctx)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to load pipeline: {}", e))?;

    if pipeline.has_triggers() {
        output::info("pipeline declares triggers; `weir serve` arms them");
    }

    output::header(&format!(
        "Running {} steps",
        pipeline.step_names().len()
    ));

    let (tx, mut rx) = change_channel();
    pipeline.set_on_change(tx);

    let token = CancellationToken::new();
    let run_token = token.clone();
    let run = tokio::spawn(async move { pipeline.run(&run_token).await });

    // Stream step boundaries while the run progresses.
    let verbose = args.verbose;
    while let Some(event) = rx.recv().await {
        match event.kind {
            ChangeKind::Start => output::status("Running", &event.step_name),
            ChangeKind::End => {
                output::success(&event.step_name);
                if verbose {
                    if let Some(bag) = &event.data {
                        let rendered = bag
                            .get(DEFAULT_OUTPUT)
                            .cloned()
                            .unwrap_or(Value::Object(bag.clone()));
                        output::info(&format!("{} -> {}", event.step_name, rendered));
                    }
                }
            }
        }
    }

    let state = run.await??;

    let published = state.snapshot().len();
    output::header(&format!("Run complete: {published} steps published"));
    Ok(())
}
