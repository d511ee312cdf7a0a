use crate::data::{default_output, OutputBag, Value};
use crate::interpolate::InterpolateValue;
use crate::state::PipelineState;
use crate::step::{BuildContext, ConfigMap, Step, StepError};
use crate::steps::{optional_str, require, require_str};

use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseFormat {
    Json,
    Text,
}

/// Performs an HTTP request and publishes
/// `{ statusCode, headers, body }`. Non-2xx responses fail the step.
pub struct HttpClientStep {
    name: String,
    url: InterpolateValue<String>,
    method: Method,
    headers: HashMap<String, String>,
    body: Option<Value>,
    response: ResponseFormat,
}

#[async_trait]
impl Step for HttpClientStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        token: &CancellationToken,
        state: &PipelineState,
    ) -> Result<OutputBag, StepError> {
        let url = self.url.resolve(state)?;

        let client = reqwest::Client::new();
        let mut request = client.request(self.method.clone(), &url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(body) = &self.body {
            request = request.json(&serde_json::Value::from(body.clone()));
        }

        let response = tokio::select! {
            _ = token.cancelled() => return Err(StepError::Cancelled),
            result = request.send() => result?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(StepError::Http(status.as_u16()));
        }

        // First value per header name.
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            headers
                .entry(key.to_string())
                .or_insert_with(|| Value::String(String::from_utf8_lossy(value.as_bytes()).to_string()));
        }

        let body = match self.response {
            ResponseFormat::Json => Value::from(response.json::<serde_json::Value>().await?),
            ResponseFormat::Text => Value::String(response.text().await?),
        };

        let mut output = HashMap::new();
        output.insert("statusCode".to_string(), Value::Int(status.as_u16() as i64));
        output.insert("headers".to_string(), Value::Object(headers));
        output.insert("body".to_string(), body);

        Ok(default_output(Value::Object(output)))
    }
}

pub fn factory(
    name: &str,
    config: &ConfigMap,
    _ctx: &BuildContext,
) -> Result<Arc<dyn Step>, StepError> {
    let url = require(config, "url")?.clone();

    let method_str = require_str(config, "method")?;
    let method = Method::from_bytes(method_str.to_uppercase().as_bytes())
        .map_err(|_| StepError::invalid_config("method", format!("invalid method '{method_str}'")))?;

    let mut headers = HashMap::new();
    if let Some(Value::Object(raw)) = config.get("headers") {
        for (key, value) in raw {
            headers.insert(key.clone(), value.as_string());
        }
    }

    let body = config.get("body").cloned();
    if body.is_some()
        && headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
            != Some("application/json")
    {
        return Err(StepError::invalid_config(
            "body",
            "a request body requires the Content-Type: application/json header",
        ));
    }

    let response = match optional_str(config, "response").as_deref() {
        None | Some("json") => ResponseFormat::Json,
        Some("text") => ResponseFormat::Text,
        Some(other) => {
            return Err(StepError::invalid_config(
                "response",
                format!("expected 'json' or 'text', got '{other}'"),
            ))
        }
    };

    Ok(Arc::new(HttpClientStep {
        name: name.to_string(),
        url: InterpolateValue::new("url", url),
        method,
        headers,
        body,
        response,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DEFAULT_OUTPUT;
    use crate::registry::Registry;
    use axum::routing::get;
    use axum::Router;

    fn ctx() -> BuildContext {
        BuildContext::new(Arc::new(Registry::with_builtins()))
    }

    async fn serve_json() -> String {
        let app = Router::new().route(
            "/data",
            get(|| async { axum::Json(serde_json::json!({"greeting": "hi"})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/data")
    }

    #[tokio::test]
    async fn test_get_json_response() {
        let url = serve_json().await;

        let mut config = ConfigMap::new();
        config.insert("url".to_string(), Value::String(format!("'{url}'")));
        config.insert("method".to_string(), Value::String("GET".into()));

        let step = factory("h", &config, &ctx()).unwrap();
        let state = PipelineState::new();
        let bag = step.run(&CancellationToken::new(), &state).await.unwrap();

        let Some(Value::Object(out)) = bag.get(DEFAULT_OUTPUT) else {
            panic!("expected object output")
        };
        assert_eq!(out["statusCode"], Value::Int(200));
        let Value::Object(body) = &out["body"] else {
            panic!("expected decoded body")
        };
        assert_eq!(body["greeting"], Value::String("hi".into()));
    }

    #[tokio::test]
    async fn test_non_2xx_fails_step() {
        let url = serve_json().await.replace("/data", "/missing");

        let mut config = ConfigMap::new();
        config.insert("url".to_string(), Value::String(format!("'{url}'")));
        config.insert("method".to_string(), Value::String("GET".into()));
        config.insert("response".to_string(), Value::String("text".into()));

        let step = factory("h", &config, &ctx()).unwrap();
        let state = PipelineState::new();
        let err = step
            .run(&CancellationToken::new(), &state)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Http(404)));
    }

    #[test]
    fn test_body_without_json_content_type_rejected() {
        let mut config = ConfigMap::new();
        config.insert("url".to_string(), Value::String("'http://x'".into()));
        config.insert("method".to_string(), Value::String("POST".into()));
        config.insert("body".to_string(), Value::Object(HashMap::new()));

        assert!(factory("h", &config, &ctx()).is_err());
    }

    #[test]
    fn test_invalid_method_rejected() {
        let mut config = ConfigMap::new();
        config.insert("url".to_string(), Value::String("'http://x'".into()));
        config.insert("method".to_string(), Value::String("FLY ME".into()));

        assert!(factory("h", &config, &ctx()).is_err());
    }
}
