use crate::output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use color_eyre::Result;

use pipeline_engine::{
    LifecycleManager, MemoryCatalog, PipelineRecord, PipelineStatus, Registry, StateEvent,
    WebhookMux,
};

/// Serve a pipeline's webhook triggers
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Path to the pipeline YAML file
    pub pipeline: PathBuf,

    /// Listen address for webhook endpoints
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: String,
}

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = super::read_config(&args.pipeline)?;

    let name = args
        .pipeline
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or("pipeline")
        .to_string();

    let catalog = Arc::new(MemoryCatalog::new());
    catalog.insert_pipeline(PipelineRecord {
        id: 1,
        name,
        enabled: true,
        state: PipelineStatus::Created,
        configuration: config,
    });

    let mux = Arc::new(WebhookMux::new());
    let manager = Arc::new(
        LifecycleManager::new(catalog, Arc::new(Registry::with_builtins()))
            .with_webhooks(mux.clone()),
    );

    manager.add_state_listener(Arc::new(|event: StateEvent| {
        tracing::info!(
            pipeline = event.pipeline_id,
            from = %event.old_state,
            to = %event.new_state,
            execution = event.execution_id,
            "pipeline state changed"
        );
    }));

    let armed = manager
        .activate_triggers(1)
        .await
        .map_err(|e| color_eyre::eyre::eyre!("Failed to arm triggers: {}", e))?;

    if armed == 0 {
        output::failure("pipeline declares no triggers; nothing to serve");
        std::process::exit(1);
    }

    output::header(&format!("Serving {armed} webhook trigger(s) on {}", args.addr));

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;
    axum::serve(listener, mux.router()).await?;
    Ok(())
}
