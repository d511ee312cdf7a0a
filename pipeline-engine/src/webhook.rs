// Webhook Mux
// HTTP demultiplexer for webhook triggers, injected at construction time
// rather than held as process-global state

use crate::data::Value;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

struct Registration {
    method: Method,
    fire: mpsc::Sender<Value>,
}

/// Registration table behind a single `/webhook/{name}` route.
///
/// Triggers register at pipeline construction; requests resolve against
/// the table at dispatch time, so registrations can come and go while
/// the server task keeps running. A fired request hands its payload to
/// the registered trigger over a rendezvous channel.
#[derive(Default)]
pub struct WebhookMux {
    routes: RwLock<HashMap<String, Registration>>,
}

impl WebhookMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a webhook endpoint. Returns the fire channel the trigger
    /// awaits on. Registering an existing name replaces it.
    pub fn register(&self, name: &str, method: Method) -> mpsc::Receiver<Value> {
        let (tx, rx) = mpsc::channel(1);
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(name.to_string(), Registration { method, fire: tx });
        rx
    }

    pub fn unregister(&self, name: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.remove(name);
    }

    /// The axum router the host serves. The mux owns no listener; where
    /// it is bound is the embedder's decision.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/webhook/:name", any(dispatch))
            .with_state(self.clone())
    }
}

/// Convert a request into the single map handed to the trigger:
/// query parameters for GET (first value per key), the decoded body for
/// POST json/form/text. Unsupported content types get client errors.
async fn dispatch(
    State(mux): State<Arc<WebhookMux>>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let (expected, fire) = {
        let routes = mux.routes.read().unwrap_or_else(|e| e.into_inner());
        match routes.get(&name) {
            Some(r) => (r.method.clone(), r.fire.clone()),
            None => return (StatusCode::NOT_FOUND, "unknown webhook").into_response(),
        }
    };

    if method != expected {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    }

    let data = if method == Method::GET {
        Value::Object(
            query
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
        )
    } else if method == Method::POST {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();

        match content_type.as_str() {
            "application/json" => match serde_json::from_slice::<serde_json::Value>(&body) {
                Ok(v @ serde_json::Value::Object(_)) => Value::from(v),
                _ => return (StatusCode::BAD_REQUEST, "invalid json").into_response(),
            },
            "application/x-www-form-urlencoded" => {
                match serde_urlencoded::from_bytes::<HashMap<String, String>>(&body) {
                    Ok(form) => Value::Object(
                        form.into_iter()
                            .map(|(k, v)| (k, Value::String(v)))
                            .collect(),
                    ),
                    Err(_) => {
                        return (StatusCode::BAD_REQUEST, "invalid form data").into_response()
                    }
                }
            }
            "text/plain" => {
                let mut map = HashMap::new();
                map.insert(
                    "body".to_string(),
                    Value::String(String::from_utf8_lossy(&body).to_string()),
                );
                Value::Object(map)
            }
            other => {
                tracing::warn!(webhook = %name, content_type = %other, "unsupported content type");
                return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported content type")
                    .into_response();
            }
        }
    } else {
        return (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
    };

    tracing::info!(webhook = %name, method = %method, "webhook fired");

    match fire.send(data).await {
        Ok(()) => (StatusCode::OK, "Webhook triggered").into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "trigger not armed").into_response(),
    }
}
