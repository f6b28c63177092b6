use std::sync::Arc;
use std::time::Duration;

use gemini_agent::agent::Agent;
use gemini_agent::config::{BackendMode, GeminiConfig, MetadataProbe};
use gemini_agent::llm::{Content, GeminiBackend, GeminiClient, LlmBackend, LlmClient, LlmError};
use gemini_agent::tools::ToolRegistry;
use serde_json::json;
use wiremock::matchers::{
    body_partial_json, body_string_contains, header, method, path,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> GeminiConfig {
    GeminiConfig {
        api_key: Some("test-key".to_string()),
        api_base: server.uri(),
        vertex_api_base: server.uri(),
        metadata_base: server.uri(),
        ..GeminiConfig::default()
    }
}

fn text_reply(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] }
        }]
    })
}

#[tokio::test]
async fn test_generate_content_request_shape() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{ "role": "user", "parts": [{ "text": "hello" }] }]
        })))
        .and(body_string_contains("functionDeclarations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("Hi there")))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::with_api_key(
        reqwest::Client::new(),
        &server.uri(),
        "gemini-2.0-flash",
        "test-key",
    );
    let response = client
        .generate_content(
            &[Content::user_text("hello")],
            &ToolRegistry::new().declarations(),
        )
        .await
        .unwrap();

    assert_eq!(response.text.as_deref(), Some("Hi there"));
    assert!(response.function_calls.is_empty());
}

#[tokio::test]
async fn test_api_error_message_is_extracted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT" }
        })))
        .mount(&server)
        .await;

    let client = GeminiClient::with_api_key(reqwest::Client::new(), &server.uri(), "m", "bad");
    let err = client
        .generate_content(&[Content::user_text("hello")], &[])
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::Api { status: 400, .. }));
    assert_eq!(err.to_string(), "Gemini API error (400): API key not valid");
}

#[tokio::test]
async fn test_api_key_mode_without_key_fails_to_connect() {
    let backend = GeminiBackend::new(BackendMode::ApiKey { api_key: None }, &GeminiConfig::default());

    let err = backend.connect("gemini-2.0-flash").await.err().unwrap();

    assert_eq!(
        err.to_string(),
        "Missing GEMINI_API_KEY. Set it in environment or use Vertex AI in GCP."
    );
}

#[tokio::test]
async fn test_vertex_connect_falls_back_from_default_model() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    for missing in ["gemini-2.0-flash", "gemini-1.5-flash-exp"] {
        Mock::given(method("GET"))
            .and(path(format!("/v1beta1/publishers/google/models/{}", missing)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": { "code": 404, "message": "Publisher model not found" }
            })))
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/v1beta1/publishers/google/models/gemini-1.5-flash"))
        .and(header("authorization", "Bearer ya29.token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "gemini-1.5-flash" })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(
            "/v1/projects/demo-project/locations/us-central1/publishers/google/models/gemini-1.5-flash:generateContent",
        ))
        .and(header("authorization", "Bearer ya29.token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("from vertex")))
        .mount(&server)
        .await;

    let mode = BackendMode::ManagedCredential {
        project: Some("demo-project".to_string()),
        location: "us-central1".to_string(),
    };
    let backend = GeminiBackend::new(mode, &config_for(&server));

    let client = backend.connect("gemini-2.0-flash").await.unwrap();
    assert_eq!(client.model(), "gemini-1.5-flash");

    let response = client
        .generate_content(&[Content::user_text("hi")], &[])
        .await
        .unwrap();
    assert_eq!(response.text.as_deref(), Some("from vertex"));
}

#[tokio::test]
async fn test_vertex_non_default_model_does_not_fall_back() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/instance/service-accounts/default/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "t" })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1beta1/publishers/google/models/gemini-1.5-pro"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "Permission denied" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mode = BackendMode::ManagedCredential {
        project: Some("p".to_string()),
        location: "us-central1".to_string(),
    };
    let backend = GeminiBackend::new(mode, &config_for(&server));

    let err = backend.connect("gemini-1.5-pro").await.err().unwrap();
    assert_eq!(
        err.to_string(),
        "Model gemini-1.5-pro not available in Vertex AI. Error: Permission denied"
    );
}

#[tokio::test]
async fn test_metadata_probe_reads_project_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_string("demo-project\n"))
        .mount(&server)
        .await;

    let probe = MetadataProbe::new(server.uri());
    assert_eq!(probe.project_id().await.as_deref(), Some("demo-project"));

    let mode = BackendMode::resolve(&GeminiConfig::default(), &probe).await;
    assert_eq!(
        mode,
        BackendMode::ManagedCredential {
            project: Some("demo-project".to_string()),
            location: "us-central1".to_string(),
        }
    );
}

#[tokio::test]
async fn test_slow_metadata_server_falls_back_to_api_key_mode() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/computeMetadata/v1/project/project-id"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("too-late")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let probe = MetadataProbe::new(server.uri()).with_timeout(Duration::from_millis(100));
    let gemini = GeminiConfig {
        api_key: Some("k".to_string()),
        ..GeminiConfig::default()
    };

    let mode = BackendMode::resolve(&gemini, &probe).await;
    assert_eq!(
        mode,
        BackendMode::ApiKey {
            api_key: Some("k".to_string())
        }
    );
}

#[tokio::test]
async fn test_agent_round_trip_through_gemini_api() {
    let server = MockServer::start().await;

    // Second round: the calculator result is in the history
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(body_string_contains("functionResponse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("2 ** 10 is 1024.")))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{
                        "functionCall": { "name": "calculator", "args": { "expression": "2 ** 10" } }
                    }]
                }
            }]
        })))
        .mount(&server)
        .await;

    let backend = Arc::new(GeminiBackend::new(
        BackendMode::ApiKey {
            api_key: Some("test-key".to_string()),
        },
        &config_for(&server),
    ));
    let agent = Agent::new(backend, ToolRegistry::new(), 6);

    let output = agent.run("What is 2 ** 10?", "gemini-2.0-flash").await.unwrap();

    assert_eq!(output.text, "2 ** 10 is 1024.");
    assert_eq!(output.tools.len(), 1);
    assert_eq!(
        output.tools[0].result,
        json!({ "expression": "2 ** 10", "value": 1024 })
    );

    let requests = server.received_requests().await.unwrap();
    let last: serde_json::Value = requests.last().unwrap().body_json().unwrap();
    assert_eq!(
        last["contents"][2],
        json!({
            "role": "function",
            "parts": [{
                "functionResponse": {
                    "name": "calculator",
                    "response": {
                        "name": "calculator",
                        "content": { "expression": "2 ** 10", "value": 1024 }
                    }
                }
            }]
        })
    );
}
