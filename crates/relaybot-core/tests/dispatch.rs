//! End-to-end dispatch tests: real provider and Messenger channel against
//! mock HTTP servers, plus counter and context properties with in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};
use serde_json::json;

use relaybot_core::agent::{
    CompletionClient, DispatchOutcome, Dispatcher, HUMAN_SUPPORT_PAYLOAD, SERVICE_INFO_PAYLOAD,
};
use relaybot_core::channel::FacebookChannel;
use relaybot_core::config::{BotConfig, MessengerConfig, ProviderConfig};
use relaybot_core::provider::OpenAiCompatProvider;
use relaybot_core::service::usage::{InMemoryUsageCounter, UsageCounter, UsageStats};
use relaybot_core::session::{ContextStore, InMemoryContextStore};
use relaybot_core::types::{InboundEvent, Turn};

struct Relay {
    dispatcher: Dispatcher,
    contexts: Arc<InMemoryContextStore>,
    usage: Arc<InMemoryUsageCounter>,
}

fn relay(openai_base: String, graph_base: String) -> Relay {
    let provider_config = ProviderConfig {
        api_key: "sk-test".into(),
        api_base: openai_base,
        timeout_secs: 5,
        ..Default::default()
    };
    let messenger = MessengerConfig {
        page_access_token: "page-token".into(),
        verify_token: "vtok".into(),
        graph_api_base: graph_base,
        send_timeout_secs: 5,
    };
    let bot = BotConfig::default();

    let provider = Arc::new(OpenAiCompatProvider::new(
        provider_config.api_key.clone(),
        Some(provider_config.api_base.clone()),
        Duration::from_secs(provider_config.timeout_secs),
    ));
    let completion = CompletionClient::from_config(provider, &provider_config, &bot);
    let contexts = Arc::new(InMemoryContextStore::new(bot.context_limit));
    let usage = Arc::new(InMemoryUsageCounter::new());
    let dispatcher = Dispatcher::new(
        contexts.clone(),
        completion,
        Arc::new(FacebookChannel::from_config(&messenger)),
        usage.clone(),
        bot,
    );
    Relay {
        dispatcher,
        contexts,
        usage,
    }
}

fn completion_body(text: &str) -> String {
    json!({
        "choices": [{
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
    })
    .to_string()
}

#[tokio::test]
async fn test_text_message_end_to_end() {
    let mut openai = Server::new_async().await;
    let mut graph = Server::new_async().await;
    let bot = BotConfig::default();

    let completion_mock = openai
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(Matcher::PartialJson(json!({
            "model": "gpt-4o-mini",
            "messages": [
                { "role": "system", "content": bot.system_prompt },
                { "role": "user", "content": "كم سعر الاشتراك؟" }
            ]
        })))
        .with_status(200)
        .with_body(completion_body("الاشتراك مجاني."))
        .expect(1)
        .create_async()
        .await;

    let send_mock = graph
        .mock("POST", "/me/messages")
        .match_query(Matcher::UrlEncoded("access_token".into(), "page-token".into()))
        .match_body(Matcher::Json(json!({
            "messaging_type": "RESPONSE",
            "recipient": { "id": "USER_1" },
            "message": {
                "text": "الاشتراك مجاني.",
                "quick_replies": [
                    { "content_type": "text", "title": bot.human_support_title, "payload": HUMAN_SUPPORT_PAYLOAD },
                    { "content_type": "text", "title": bot.service_info_title, "payload": SERVICE_INFO_PAYLOAD }
                ]
            }
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let relay = relay(openai.url(), graph.url());
    let outcome = relay
        .dispatcher
        .dispatch(&InboundEvent::text("USER_1", "كم سعر الاشتراك؟"))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Answered { fallback: false });
    completion_mock.assert_async().await;
    send_mock.assert_async().await;
    assert_eq!(
        relay.contexts.get_context("USER_1"),
        vec![Turn::user("كم سعر الاشتراك؟"), Turn::assistant("الاشتراك مجاني.")]
    );
    assert_eq!(relay.usage.get("USER_1").await.unwrap().unwrap().messages, 1);
}

#[tokio::test]
async fn test_provider_outage_sends_fallback() {
    let mut openai = Server::new_async().await;
    let mut graph = Server::new_async().await;
    let fallback = BotConfig::default().fallback_reply;

    let _completion = openai
        .mock("POST", "/chat/completions")
        .with_status(503)
        .with_body(r#"{"error":{"message":"overloaded"}}"#)
        .create_async()
        .await;
    let send_mock = graph
        .mock("POST", "/me/messages")
        .match_query(Matcher::Any)
        .match_body(Matcher::PartialJson(json!({ "message": { "text": fallback } })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let relay = relay(openai.url(), graph.url());
    let outcome = relay
        .dispatcher
        .dispatch(&InboundEvent::text("USER_1", "hello"))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Answered { fallback: true });
    send_mock.assert_async().await;
    assert_eq!(relay.usage.get("USER_1").await.unwrap().unwrap().messages, 1);
}

#[tokio::test]
async fn test_messenger_outage_does_not_fail_dispatch() {
    let mut openai = Server::new_async().await;
    let mut graph = Server::new_async().await;

    let _completion = openai
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(completion_body("ok"))
        .create_async()
        .await;
    let _send = graph
        .mock("POST", "/me/messages")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let relay = relay(openai.url(), graph.url());
    let outcome = relay
        .dispatcher
        .dispatch(&InboundEvent::text("USER_1", "hello"))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Answered { fallback: false });
}

#[tokio::test]
async fn test_support_request_skips_model() {
    let mut openai = Server::new_async().await;
    let mut graph = Server::new_async().await;
    let bot = BotConfig::default();

    let completion_mock = openai
        .mock("POST", "/chat/completions")
        .expect(0)
        .create_async()
        .await;
    let send_mock = graph
        .mock("POST", "/me/messages")
        .match_query(Matcher::Any)
        .match_body(Matcher::Json(json!({
            "messaging_type": "RESPONSE",
            "recipient": { "id": "USER_1" },
            "message": { "text": bot.human_support_reply }
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let relay = relay(openai.url(), graph.url());
    let outcome = relay
        .dispatcher
        .dispatch(&InboundEvent::text("USER_1", "أريد التحدث إلى شخص من فضلك"))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::HumanSupport);
    completion_mock.assert_async().await;
    send_mock.assert_async().await;
    assert!(relay.usage.get("USER_1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_quick_reply_sends_nothing() {
    let mut openai = Server::new_async().await;
    let mut graph = Server::new_async().await;

    let completion_mock = openai
        .mock("POST", "/chat/completions")
        .expect(0)
        .create_async()
        .await;
    let send_mock = graph
        .mock("POST", "/me/messages")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let relay = relay(openai.url(), graph.url());
    let outcome = relay
        .dispatcher
        .dispatch(&InboundEvent::quick_reply("USER_1", "GET_STARTED"))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Ignored);
    completion_mock.assert_async().await;
    send_mock.assert_async().await;
}

#[tokio::test]
async fn test_counters_are_per_user() {
    let mut openai = Server::new_async().await;
    let mut graph = Server::new_async().await;

    let _completion = openai
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(completion_body("ok"))
        .expect_at_least(1)
        .create_async()
        .await;
    let _send = graph
        .mock("POST", "/me/messages")
        .match_query(Matcher::Any)
        .with_status(200)
        .expect_at_least(1)
        .create_async()
        .await;

    let relay = relay(openai.url(), graph.url());
    for i in 0..7 {
        let user = if i % 3 == 0 { "A" } else { "B" };
        relay
            .dispatcher
            .dispatch(&InboundEvent::text(user, format!("message {i}")))
            .await
            .unwrap();
    }

    assert_eq!(relay.usage.get("A").await.unwrap().unwrap().messages, 3);
    assert_eq!(relay.usage.get("B").await.unwrap().unwrap().messages, 4);
    assert_eq!(
        relay.usage.stats().await.unwrap(),
        UsageStats { users: 2, messages: 7 }
    );

    // Two turns per answered message, capped at the window size.
    assert_eq!(relay.contexts.get_context("A").len(), 6);
    assert_eq!(relay.contexts.get_context("B").len(), 8);
    assert!(relay.contexts.get_context("C").is_empty());
}
