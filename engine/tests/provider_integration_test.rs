//! Integration tests for the HTTP providers
//!
//! A wiremock server stands in for the OpenAI-compatible and Ollama APIs so
//! request shape, error mapping and the invoker's retry path can be checked
//! without a real model.

use std::sync::Arc;

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use cogtrace_engine::config::ResilienceConfig;
use cogtrace_engine::llm::invoker::{
    FallbackReason, GenerationParams, InvocationOutcome, ModelInvoker,
};
use cogtrace_engine::llm::ollama::OllamaProvider;
use cogtrace_engine::llm::openai::OpenAICompatibleProvider;
use cogtrace_engine::llm::{LLMError, LLMProvider, Message};

fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

fn messages() -> Vec<Message> {
    vec![
        Message::system("You are a programming tutor."),
        Message::user("¿qué es una pila?"),
    ]
}

#[tokio::test]
async fn test_openai_request_and_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "tutor-model", "max_tokens": 256})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("Una pila es LIFO.")))
        .expect(1)
        .mount(&server)
        .await;

    let provider =
        OpenAICompatibleProvider::new(server.uri(), "tutor-model", Some("sk-test".into())).unwrap();
    let text = provider.generate(&messages(), 0.2, 256).await.unwrap();

    assert_eq!(text, "Una pila es LIFO.");
}

#[tokio::test]
async fn test_openai_error_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&server)
        .await;

    let provider = OpenAICompatibleProvider::new(server.uri(), "tutor-model", None).unwrap();
    let err = provider.generate(&messages(), 0.2, 64).await.unwrap_err();

    assert!(matches!(err, LLMError::AuthenticationFailed(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_openai_malformed_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let provider = OpenAICompatibleProvider::new(server.uri(), "tutor-model", None).unwrap();
    let err = provider.generate(&messages(), 0.2, 64).await.unwrap_err();
    assert!(matches!(err, LLMError::ParseError(_)));
}

#[tokio::test]
async fn test_ollama_request_carries_options() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "llama3.1:8b",
            "stream": false,
            "options": {"num_predict": 128}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "llama3.1:8b",
            "message": {"role": "assistant", "content": "Pensá en una pila de platos."},
            "done": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OllamaProvider::new(server.uri(), "llama3.1:8b").unwrap();
    let text = provider.generate(&messages(), 0.5, 128).await.unwrap();
    assert_eq!(text, "Pensá en una pila de platos.");
}

#[tokio::test]
async fn test_ollama_connection_error() {
    let provider = OllamaProvider::new("http://127.0.0.1:1", "llama3.1:8b").unwrap();
    let err = provider.generate(&messages(), 0.5, 16).await.unwrap_err();

    assert!(matches!(
        err,
        LLMError::ProviderUnavailable(_) | LLMError::NetworkError(_)
    ));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invoker_retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response("Listo.")))
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAICompatibleProvider::new(server.uri(), "m", None).unwrap());
    let invoker = ModelInvoker::new(
        provider,
        ResilienceConfig {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 5,
            call_timeout_ms: 2_000,
            failure_threshold: 5,
            cooldown_ms: 1_000,
        },
    );

    let invocation = invoker
        .invoke(
            &messages(),
            &GenerationParams {
                temperature: 0.2,
                max_tokens: 64,
            },
            "fallback",
        )
        .await;

    assert_eq!(invocation.text, "Listo.");
    assert_eq!(invocation.outcome, InvocationOutcome::Generated);
    assert_eq!(invocation.attempts, 3);
}

#[tokio::test]
async fn test_invoker_does_not_retry_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .expect(1)
        .mount(&server)
        .await;

    let provider = Arc::new(OpenAICompatibleProvider::new(server.uri(), "m", None).unwrap());
    let invoker = ModelInvoker::new(provider, ResilienceConfig::default());

    let invocation = invoker
        .invoke(
            &messages(),
            &GenerationParams {
                temperature: 0.2,
                max_tokens: 64,
            },
            "Probá de nuevo más tarde.",
        )
        .await;

    assert_eq!(invocation.text, "Probá de nuevo más tarde.");
    assert_eq!(
        invocation.outcome,
        InvocationOutcome::Fallback(FallbackReason::NonTransient)
    );
}
