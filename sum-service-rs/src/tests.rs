// sum-service-rs/src/tests.rs
// Tests for the sum service, focusing on the dispatch and repair paths

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use tower::util::ServiceExt;

    use crate::llm_client::{CompletionBackend, LlmError};
    use crate::repair::RepairInterceptor;
    use crate::validation::{
        validate_payload, SumRequest, SUM_REQUEST_SCHEMA, SUM_REQUEST_SCHEMA_JSON,
    };
    use crate::{create_router, AppState};

    enum Script {
        Reply(String),
        Fail,
    }

    /// Backend that returns a fixed completion and counts invocations
    struct ScriptedBackend {
        script: Script,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(script: Script) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.script {
                Script::Reply(text) => Ok(text.clone()),
                Script::Fail => Err(LlmError::NetworkError(
                    "Connection failed: simulated outage".to_string(),
                )),
            }
        }
    }

    /// Backend that rebuilds its answer from the payload embedded in the
    /// prompt, renaming a "values" field to "numbers". Lets concurrent
    /// requests observe their own payloads.
    struct RenamingBackend;

    #[async_trait]
    impl CompletionBackend for RenamingBackend {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            // The raw payload sits in the last fenced block of the prompt
            let payload = prompt.rsplit("```").nth(1).unwrap_or("").trim();
            let value: serde_json::Value = serde_json::from_str(payload)
                .map_err(|e| LlmError::ParseError(e.to_string()))?;
            let values = value
                .get("values")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            Ok(serde_json::json!({ "numbers": values }).to_string())
        }
    }

    fn router_with(backend: Arc<dyn CompletionBackend>) -> axum::Router {
        create_router(Arc::new(AppState::new(backend)))
    }

    async fn post_sum(app: axum::Router, body: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/sum")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn sum_of(body: &[u8]) -> f64 {
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        value["sum"].as_f64().unwrap()
    }

    #[tokio::test]
    async fn test_valid_payload_passes_through_without_repair() {
        // The backend would produce a different sum; it must never be asked
        let backend = Arc::new(ScriptedBackend::new(Script::Reply(
            r#"{"numbers": [99]}"#.to_string(),
        )));
        let app = router_with(backend.clone());

        let (status, body) = post_sum(app, r#"{"numbers": [1, 2, 3]}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(sum_of(&body), 6.0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repair_of_stringified_numbers() {
        let backend = Arc::new(ScriptedBackend::new(Script::Reply(
            r#"{"numbers": [1, 2, 3]}"#.to_string(),
        )));
        let app = router_with(backend.clone());

        let (status, body) = post_sum(app, r#"{"numbers": ["1", "2", "3"]}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(sum_of(&body), 6.0);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repair_of_renamed_field() {
        let app = router_with(Arc::new(RenamingBackend));

        let (status, body) = post_sum(app, r#"{"values": [1, 2, 3]}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(sum_of(&body), 6.0);
    }

    #[tokio::test]
    async fn test_repair_accepts_fenced_model_output() {
        let backend = Arc::new(ScriptedBackend::new(Script::Reply(
            "Here is the corrected payload:\n```json\n{\"numbers\": [1, 2, 3]}\n```".to_string(),
        )));
        let app = router_with(backend);

        let (status, body) = post_sum(app, r#"{"values": [1, 2, 3]}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(sum_of(&body), 6.0);
    }

    #[tokio::test]
    async fn test_backend_failure_falls_back_to_validation_error() {
        let raw = r#"{"values": [1, 2, 3]}"#;
        let app = router_with(Arc::new(ScriptedBackend::new(Script::Fail)));

        let (status, body) = post_sum(app, raw).await;

        // Byte-for-byte the response the validator would have produced with
        // no repair mechanism present
        let expected = validate_payload(raw).unwrap_err().to_response();
        let expected_status = expected.status();
        let expected_body = to_bytes(expected.into_body(), usize::MAX).await.unwrap();

        assert_eq!(status, expected_status);
        assert_eq!(body, expected_body.to_vec());
    }

    #[tokio::test]
    async fn test_unparsable_model_output_falls_back() {
        let raw = r#"{"values": [1, 2, 3]}"#;
        let app = router_with(Arc::new(ScriptedBackend::new(Script::Reply(
            "I cannot reformat this payload.".to_string(),
        ))));

        let (status, body) = post_sum(app, raw).await;

        let expected = validate_payload(raw).unwrap_err().to_response();
        let expected_body = to_bytes(expected.into_body(), usize::MAX).await.unwrap();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, expected_body.to_vec());
    }

    #[tokio::test]
    async fn test_non_conformant_output_never_reaches_handler() {
        let backend = Arc::new(ScriptedBackend::new(Script::Reply(
            r#"{"numbers": "still not an array"}"#.to_string(),
        )));
        let interceptor =
            RepairInterceptor::new(backend, &*SUM_REQUEST_SCHEMA, &*SUM_REQUEST_SCHEMA_JSON);
        let failure = validate_payload(r#"{"numbers": "still not an array"}"#).unwrap_err();

        let handler_calls = Arc::new(AtomicUsize::new(0));
        let calls = handler_calls.clone();

        let response = interceptor
            .on_validation_failure(failure, move |_request: SumRequest| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                "ok".into_response()
            })
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(handler_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prompt_rendering_is_deterministic() {
        let backend = Arc::new(ScriptedBackend::new(Script::Fail));
        let interceptor =
            RepairInterceptor::new(backend, &*SUM_REQUEST_SCHEMA, &*SUM_REQUEST_SCHEMA_JSON);

        let raw = r#"{"values": [1, 2, 3]}"#;
        let first = interceptor.render_prompt(raw);
        let second = interceptor.render_prompt(raw);

        assert_eq!(first, second);
        assert!(first.contains(raw));
        assert!(first.contains("\"numbers\""));
    }

    #[tokio::test]
    async fn test_custom_template_substitution() {
        let backend = Arc::new(ScriptedBackend::new(Script::Fail));
        let interceptor =
            RepairInterceptor::new(backend, &*SUM_REQUEST_SCHEMA, &*SUM_REQUEST_SCHEMA_JSON)
                .with_template("fix {payload} to match {schema}");

        let prompt = interceptor.render_prompt("bad body");
        assert!(prompt.starts_with("fix bad body to match"));
        assert!(prompt.contains("\"numbers\""));
    }

    #[tokio::test]
    async fn test_concurrent_repairs_are_isolated() {
        let app = router_with(Arc::new(RenamingBackend));

        let (first, second) = tokio::join!(
            post_sum(app.clone(), r#"{"values": [1, 2, 3]}"#),
            post_sum(app, r#"{"values": [10, 20]}"#),
        );

        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(sum_of(&first.1), 6.0);
        assert_eq!(second.0, StatusCode::OK);
        assert_eq!(sum_of(&second.1), 30.0);
    }

    #[tokio::test]
    async fn test_wrong_content_type_is_rejected() {
        let app = router_with(Arc::new(ScriptedBackend::new(Script::Fail)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/sum")
                    .header("content-type", "text/plain")
                    .body(Body::from("1,2,3"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = router_with(Arc::new(ScriptedBackend::new(Script::Fail)));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["healthy"], true);
        assert_eq!(value["service_name"], "sum-service");
    }
}
