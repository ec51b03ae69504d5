//! Shared fixtures for router scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use steward_agent::{Router, TurnRequest, TurnResult};
use steward_core::capability::{CapabilityCatalogue, CapabilityDescriptor, ContentChunk};
use steward_core::error::{CapabilityError, ProviderError};
use steward_core::message::{Message, MessageToolCall};
use steward_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use steward_core::task::{EntityKind, EntityRecord, NewEntity, TaskStore};
use steward_discovery::{DiscoverySettings, ToolDiscoveryCache};
use steward_memory::{InMemoryStore, MemorySystem};
use steward_tools::{InMemoryTaskStore, default_catalogue};

// ── Scripted provider ────────────────────────────────────────────────────

/// Returns scripted responses in order and records every request.
pub struct ScriptedProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: ProviderError) -> Self {
        Self {
            responses: Mutex::new(vec![Err(error)]),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let count = requests.len();
        if count >= responses.len() {
            panic!("ScriptedProvider exhausted: call #{count}, have {}", responses.len());
        }
        requests.push(request);
        responses[count].clone()
    }
}

pub fn text(content: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(content),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn tools(calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tools("", calls),
        usage: None,
        model: "mock-model".into(),
    }
}

pub fn call(name: &str, args: Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

// ── Capability catalogue ─────────────────────────────────────────────────

/// One weather service answering every forecast with the same text.
#[derive(Default)]
pub struct WeatherCatalogue {
    pub invocations: AtomicUsize,
}

#[async_trait]
impl CapabilityCatalogue for WeatherCatalogue {
    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, CapabilityError> {
        Ok(vec![CapabilityDescriptor {
            service: "weather".into(),
            name: "forecast".into(),
            description: "Current weather for a city".into(),
            schema: serde_json::json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }])
    }

    async fn invoke(&self, _service: &str, _operation: &str, arguments: Value) -> Result<Vec<ContentChunk>, CapabilityError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let city = arguments.get("city").and_then(Value::as_str).unwrap_or("somewhere");
        Ok(vec![ContentChunk::text(format!("Sunny and 21C in {city}"))])
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub store: Arc<InMemoryTaskStore>,
    pub memory: Arc<MemorySystem>,
    pub router: Router,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::build(provider, None)
    }

    pub fn with_discovery(provider: ScriptedProvider, catalogue: Arc<WeatherCatalogue>) -> Self {
        Self::build(provider, Some(catalogue))
    }

    fn build(provider: ScriptedProvider, catalogue: Option<Arc<WeatherCatalogue>>) -> Self {
        let provider = Arc::new(provider);
        let store = Arc::new(InMemoryTaskStore::new());
        let memory = Arc::new(MemorySystem::in_memory());
        let registry = Arc::new(default_catalogue(store.clone(), memory.clone()));

        let discovery = catalogue.map(|catalogue| {
            Arc::new(ToolDiscoveryCache::new(
                Arc::new(InMemoryStore::new()),
                catalogue,
                provider.clone(),
                "mock-model",
                DiscoverySettings::default(),
            ))
        });

        let router = Router::new(provider.clone(), "mock-model", registry, store.clone(), memory.clone())
            .with_discovery(discovery);

        Self {
            provider,
            store,
            memory,
            router,
        }
    }

    pub async fn turn(&self, utterance: &str) -> TurnResult {
        self.router.handle_turn(TurnRequest::new(utterance, "s1", "u1")).await
    }

    pub async fn task(&self, title: &str) -> EntityRecord {
        self.store
            .create(
                EntityKind::Task,
                NewEntity {
                    title: title.into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    pub async fn project(&self, title: &str) -> EntityRecord {
        self.store
            .create(
                EntityKind::Project,
                NewEntity {
                    title: title.into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }
}
