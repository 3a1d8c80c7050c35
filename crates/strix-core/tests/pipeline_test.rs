use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use strix_core::provider::catalog::ModelCatalog;
use strix_core::{Backend, ModelClient, ModelProvider, ProviderConfig, ProviderError, RuleEngine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A canned model for exercising the engine without a backend.
struct ScriptedModel {
    reply: &'static str,
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModel {
    async fn ask(&self, _prompt: &str) -> String {
        self.reply.to_string()
    }
}

#[tokio::test]
async fn rules_and_model_compose_into_one_answerer() {
    let rules = "\
pattern,reply
hi,Hello! Mention me with a question.
*syllabus*,The syllabus is pinned in #general.
*,@llm
";
    let engine = RuleEngine::from_csv_str(rules)
        .unwrap()
        .with_model(Arc::new(ScriptedModel {
            reply: "Owls hoot to claim territory.",
        }));

    assert_eq!(engine.rule_count(), 3);
    assert_eq!(engine.respond("hi").await, "Hello! Mention me with a question.");
    assert_eq!(
        engine.respond("where is the syllabus?").await,
        "The syllabus is pinned in #general."
    );
    assert_eq!(
        engine.respond("why do owls hoot?").await,
        "Owls hoot to claim territory."
    );
}

#[test]
fn the_catalog_recommendation_scales_with_parameter_count() {
    let catalog = ModelCatalog::from_response(&json!({
        "data": [
            { "id": "a", "ollama": { "details": { "parameter_size": "7B" } } },
            { "id": "b", "ollama": { "details": { "parameter_size": "13B" } } },
        ]
    }))
    .unwrap();
    assert_eq!(catalog.recommend().unwrap().id, "b");
}

#[test]
fn backend_tokens_parse_or_fail_loudly() {
    assert_eq!("ollama".parse::<Backend>().unwrap(), Backend::Ollama);
    assert_eq!("open-webui".parse::<Backend>().unwrap(), Backend::OpenWebUi);
    assert!("grpc".parse::<Backend>().is_err());
}

/// Read one HTTP/1.1 request (headers plus content-length body) off a socket.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before the headers ended");
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let lowered = line.to_ascii_lowercase();
            let value = lowered.strip_prefix("content-length:")?;
            value.trim().parse::<usize>().ok()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed before the body ended");
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf).to_string()
}

async fn write_response(socket: &mut TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();
}

#[tokio::test]
async fn two_phase_routing_drives_the_second_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let catalog = json!({
        "models": [
            { "model": "small:1b", "details": { "parameter_size": "1B" } },
            { "model": "big:13b", "details": { "parameter_size": "13B" } },
        ]
    })
    .to_string();
    let routing = json!({
        "response": "{\"model\":\"big:13b\",\"prompt\":\"Explain hooting briefly.\",\"reason\":\"largest model\"}"
    })
    .to_string();
    let answer = json!({ "response": "Owls hoot to claim territory." }).to_string();

    let server = tokio::spawn(async move {
        let mut requests = Vec::new();
        for reply in [catalog, routing, answer] {
            let (mut socket, _) = listener.accept().await.unwrap();
            requests.push(read_request(&mut socket).await);
            write_response(&mut socket, &reply).await;
        }
        requests
    });

    let provider = ModelProvider::connect(ProviderConfig {
        base_url,
        api_key: None,
        model: Some("small:1b".to_string()),
        backend: Backend::Ollama,
        timeout: Duration::from_secs(5),
    })
    .await
    .unwrap();
    assert_eq!(provider.recommended_model(), "big:13b");

    let outcome = provider.request("why do owls hoot?").await;
    let requests = server.await.unwrap();

    assert!(requests[0].starts_with("GET /api/tags"));
    assert!(requests[1].starts_with("POST /api/generate"));
    // The routing phase asks the configured model and carries the user text.
    assert!(requests[1].contains("\"model\":\"small:1b\""));
    assert!(requests[1].contains("why do owls hoot?"));
    // The answer phase asks the routed model with the crafted prompt.
    assert!(requests[2].starts_with("POST /api/generate"));
    assert!(requests[2].contains("\"model\":\"big:13b\""));
    assert!(requests[2].contains("Explain hooting briefly."));

    assert_eq!(outcome.text, "Owls hoot to claim territory.");
    assert_eq!(outcome.state.model, "big:13b");
    assert_eq!(outcome.state.reason, "largest model");
    assert!(outcome.elapsed_secs.is_some());
    assert!(outcome.raw.is_some());
}

#[tokio::test]
async fn connecting_to_a_dead_backend_is_a_typed_error() {
    let err = ModelProvider::connect(ProviderConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        api_key: None,
        model: None,
        backend: Backend::Ollama,
        timeout: Duration::from_secs(2),
    })
    .await
    .unwrap_err();
    assert!(matches!(err, ProviderError::Catalog(_)));
}
