use crate::data::{default_output, OutputBag, Value};
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, OnFire, Step, StepError, Trigger};
use crate::steps::optional_str;

use async_trait::async_trait;
use axum::http::Method;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Trigger fired by HTTP requests to `/webhook/<name>` on the injected
/// mux. Each hit carries the request data map as the fire payload.
pub struct WebhookTrigger {
    name: String,
    fires: Arc<Mutex<mpsc::Receiver<Value>>>,
}

#[async_trait]
impl Step for WebhookTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the next fire arrives.
    async fn run(
        &self,
        token: &CancellationToken,
        _state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let mut fires = self.fires.lock().await;

        tokio::select! {
            _ = token.cancelled() => Err(StepError::Cancelled),
            fire = fires.recv() => match fire {
                Some(_) => Ok(default_output(Value::String("Webhook triggered".into()))),
                None => Err(StepError::Message("webhook endpoint unregistered".into())),
            },
        }
    }
}

impl Trigger for WebhookTrigger {
    fn set_on_trigger(&self, callback: OnFire) {
        let fires = self.fires.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut fires = fires.lock().await;
            while let Some(data) = fires.recv().await {
                tracing::info!(webhook = %name, "webhook triggered");
                callback(data);
            }
        });
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    ctx: &BuildContext,
) -> Result<Arc<dyn Trigger>, StepError> {
    let mux = ctx.webhooks.as_ref().ok_or_else(|| {
        StepError::Message("webhook trigger requires an http mux collaborator".into())
    })?;

    let method_str = optional_str(config, "method").unwrap_or_else(|| "GET".to_string());
    let method = Method::from_bytes(method_str.to_uppercase().as_bytes())
        .map_err(|_| StepError::invalid_config("method", format!("invalid method '{method_str}'")))?;

    let fires = mux.register(name, method);

    Ok(Arc::new(WebhookTrigger {
        name: name.to_string(),
        fires: Arc::new(Mutex::new(fires)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::webhook::WebhookMux;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ctx_with_mux() -> (BuildContext, Arc<WebhookMux>) {
        let mux = Arc::new(WebhookMux::new());
        let ctx =
            BuildContext::new(Arc::new(Registry::with_builtins())).with_webhooks(mux.clone());
        (ctx, mux)
    }

    async fn serve(mux: &Arc<WebhookMux>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = mux.router();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_requires_mux() {
        let ctx = BuildContext::new(Arc::new(Registry::with_builtins()));
        assert!(factory("W", &ConfigMap::new(), &ctx).is_err());
    }

    #[tokio::test]
    async fn test_each_http_hit_invokes_callback_once() {
        let (ctx, mux) = ctx_with_mux();
        let trigger = factory("W", &ConfigMap::new(), &ctx).unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        trigger.set_on_trigger(Arc::new(move |_data| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let base = serve(&mux).await;
        for _ in 0..2 {
            let response = reqwest::get(format!("{base}/webhook/W?k=v")).await.unwrap();
            assert_eq!(response.status().as_u16(), 200);
        }

        // The armed loop runs on its own task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_blocks_until_fire() {
        let (ctx, mux) = ctx_with_mux();
        let trigger = factory("hook", &ConfigMap::new(), &ctx).unwrap();
        let base = serve(&mux).await;

        let waiter = tokio::spawn(async move {
            let state = PipelineState::new();
            trigger.run(&CancellationToken::new(), &state).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        reqwest::get(format!("{base}/webhook/hook")).await.unwrap();

        let bag = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(
            bag.get(crate::data::DEFAULT_OUTPUT),
            Some(&Value::String("Webhook triggered".into()))
        );
    }
}
