//! Discovery cache behaviour against a scripted catalogue and provider.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use steward_core::capability::{CapabilityCatalogue, CapabilityDescriptor, ContentChunk};
use steward_core::embedding::Embedder;
use steward_core::error::{CapabilityError, MemoryError, ProviderError};
use steward_core::event::{DomainEvent, EventBus};
use steward_core::memory::{Collection, MemoryRecord, MemoryStore, RecordFilter};
use steward_core::message::Message;
use steward_core::provider::{Provider, ProviderRequest, ProviderResponse};
use steward_discovery::{
    DiscoveryError, DiscoveryRecord, DiscoverySettings, Provenance, RecordKind, SolutionDescriptor,
    ToolDiscoveryCache,
};
use steward_memory::InMemoryStore;

/// Hashed bag-of-words vectors; shared words mean high similarity.
struct WordEmbedder;

#[async_trait]
impl Embedder for WordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut v = vec![0.0f32; 64];
        for word in text.to_lowercase().split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let h = word.bytes().fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(b as u32));
            v[(h % 64) as usize] += 1.0;
        }
        Ok(v)
    }
}

#[derive(Default)]
struct WeatherCatalogue {
    empty: bool,
    list_delay: Option<Duration>,
    invoke_delay: Option<Duration>,
    lists: AtomicUsize,
    invocations: AtomicUsize,
}

#[async_trait]
impl CapabilityCatalogue for WeatherCatalogue {
    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>, CapabilityError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        if self.empty {
            return Ok(vec![]);
        }
        Ok(vec![CapabilityDescriptor {
            service: "weather".into(),
            name: "forecast".into(),
            description: "Daily weather forecast for a city".into(),
            schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }])
    }

    async fn invoke(&self, service: &str, operation: &str, arguments: Value) -> Result<Vec<ContentChunk>, CapabilityError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.invoke_delay {
            tokio::time::sleep(delay).await;
        }
        assert_eq!((service, operation), ("weather", "forecast"));
        let city = arguments.get("city").and_then(Value::as_str).unwrap_or("?");
        Ok(vec![ContentChunk::text(format!("Sunny in {city}, 21C"))])
    }
}

/// Always answers with the same proposal text.
struct ScriptedProvider {
    reply: String,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderResponse {
            message: Message::assistant(self.reply.clone()),
            usage: None,
            model: request.model,
        })
    }
}

const FORECAST: &str = r#"{"service": "weather", "operation": "forecast", "arguments": {"city": "Paris"}}"#;

struct Harness {
    store: Arc<InMemoryStore>,
    catalogue: Arc<WeatherCatalogue>,
    provider: Arc<ScriptedProvider>,
    cache: ToolDiscoveryCache,
}

fn harness(catalogue: WeatherCatalogue, reply: &str, embedder: bool) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let catalogue = Arc::new(catalogue);
    let provider = Arc::new(ScriptedProvider::new(reply));
    let embedder: Option<Arc<dyn Embedder>> = embedder.then(|| Arc::new(WordEmbedder) as Arc<dyn Embedder>);
    let cache = ToolDiscoveryCache::new(
        store.clone(),
        catalogue.clone(),
        provider.clone(),
        "test-model",
        DiscoverySettings::default(),
    )
    .with_embedder(embedder);
    Harness {
        store,
        catalogue,
        provider,
        cache,
    }
}

/// A successful Paris forecast solution, embedded.
async fn seed_paris_solution(h: &Harness) {
    let mut seeded = DiscoveryRecord::new(RecordKind::Solution, "weather forecast for Paris", None);
    seeded.success = true;
    seeded.solution = Some(SolutionDescriptor {
        service: "weather".into(),
        operation: "forecast".into(),
        arguments: json!({"city": "Paris"}),
    });
    let embedding = WordEmbedder.embed(&seeded.request).await.unwrap();
    h.store
        .put(
            MemoryRecord::new(Collection::Discovery, seeded.key(), serde_json::to_value(&seeded).unwrap())
                .with_embedding(Some(embedding)),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn synthesizes_then_reuses_answer_for_similar_request() {
    let h = harness(WeatherCatalogue::default(), FORECAST, true);

    let first = h.cache.discover("weather forecast for Paris", Some("weather")).await.unwrap();
    assert_eq!(first.provenance, Provenance::Synthesized);
    assert_eq!(first.answer, "Sunny in Paris, 21C");

    let second = h
        .cache
        .discover("weather forecast for Paris tomorrow please", None)
        .await
        .unwrap();
    assert_eq!(second.provenance, Provenance::ReusedAnswer);
    assert_eq!(second.answer, "Sunny in Paris, 21C");
    assert!(second.similarity.unwrap() >= 0.65);

    assert_eq!(h.catalogue.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);

    let answers = h.cache.records(RecordKind::Answer, 10).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].times_used, 1);
}

#[tokio::test]
async fn unrelated_request_is_not_reused() {
    let h = harness(WeatherCatalogue::default(), FORECAST, true);
    h.cache.discover("weather forecast for Paris", None).await.unwrap();

    let other = h.cache.discover("stock price of ACME", None).await.unwrap();
    assert_eq!(other.provenance, Provenance::Synthesized);
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn very_similar_cached_solution_is_re_executed() {
    let h = harness(WeatherCatalogue::default(), "{\"none\": \"unused\"}", true);

    seed_paris_solution(&h).await;

    let outcome = h.cache.discover("the weather forecast for Paris", None).await.unwrap();
    assert_eq!(outcome.provenance, Provenance::ReusedSolution);
    assert!(outcome.similarity.unwrap() >= 0.85);
    assert_eq!(outcome.answer, "Sunny in Paris, 21C");
    assert_eq!(h.catalogue.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);

    // The re-executed answer is cached for the next similar request
    assert_eq!(h.cache.records(RecordKind::Answer, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn solution_below_floor_is_not_reused() {
    let h = harness(WeatherCatalogue::default(), FORECAST, true);

    seed_paris_solution(&h).await;

    let outcome = h
        .cache
        .discover("weather forecast for Paris tomorrow please", None)
        .await
        .unwrap();
    assert_eq!(outcome.provenance, Provenance::Synthesized);
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exact_text_reuse_without_embedder() {
    let h = harness(WeatherCatalogue::default(), FORECAST, false);

    h.cache.discover("What's the weather forecast for Paris?", None).await.unwrap();
    let again = h.cache.discover("whats the weather forecast for paris", None).await.unwrap();
    assert_eq!(again.provenance, Provenance::ReusedAnswer);
    assert_eq!(again.similarity, None);

    let different = h.cache.discover("weather forecast for Paris please", None).await.unwrap();
    assert_eq!(different.provenance, Provenance::Synthesized);
    assert_eq!(h.catalogue.invocations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn decline_is_logged_as_failed_solution() {
    let h = harness(WeatherCatalogue::default(), r#"{"none": "no stock data source"}"#, true);

    let err = h.cache.discover("stock price of ACME", None).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::NoSuitableCapability { ref reason } if reason.contains("stock")));
    assert!(!err.is_retryable());

    let solutions = h.cache.records(RecordKind::Solution, 10).await.unwrap();
    assert_eq!(solutions.len(), 1);
    assert!(!solutions[0].success);
    assert!(h.cache.records(RecordKind::Answer, 10).await.unwrap().is_empty());

    // Failed records are never reused
    assert!(h.cache.discover("stock price of ACME", None).await.is_err());
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_capability_is_rejected_without_invocation() {
    let h = harness(
        WeatherCatalogue::default(),
        r#"{"service": "stocks", "operation": "quote", "arguments": {}}"#,
        true,
    );
    let err = h.cache.discover("stock price of ACME", None).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::NoSuitableCapability { .. }));
    assert_eq!(h.catalogue.invocations.load(Ordering::SeqCst), 0);

    let solutions = h.cache.records(RecordKind::Solution, 10).await.unwrap();
    assert_eq!(solutions[0].solution.as_ref().unwrap().service, "stocks");
}

#[tokio::test]
async fn empty_catalogue_skips_the_llm() {
    let h = harness(
        WeatherCatalogue {
            empty: true,
            ..WeatherCatalogue::default()
        },
        FORECAST,
        true,
    );
    let err = h.cache.discover("weather forecast for Paris", None).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::NoSuitableCapability { .. }));
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_handshake_times_out() {
    let h = harness(
        WeatherCatalogue {
            list_delay: Some(Duration::from_secs(11)),
            ..WeatherCatalogue::default()
        },
        FORECAST,
        true,
    );
    let err = h.cache.discover("weather forecast for Paris", None).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Timeout { ref stage, timeout_secs: 10 } if stage == "handshake"));
    assert!(err.is_retryable());
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_invocation_times_out() {
    let h = harness(
        WeatherCatalogue {
            invoke_delay: Some(Duration::from_secs(31)),
            ..WeatherCatalogue::default()
        },
        FORECAST,
        true,
    );
    let err = h.cache.discover("weather forecast for Paris", None).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Timeout { ref stage, timeout_secs: 30 } if stage == "invocation"));

    let solutions = h.cache.records(RecordKind::Solution, 10).await.unwrap();
    assert_eq!(solutions.len(), 1);
    assert!(!solutions[0].success);
}

#[tokio::test(start_paused = true)]
async fn timed_out_cached_solution_is_not_retried() {
    let h = harness(
        WeatherCatalogue {
            invoke_delay: Some(Duration::from_secs(31)),
            ..WeatherCatalogue::default()
        },
        FORECAST,
        true,
    );
    seed_paris_solution(&h).await;

    let err = h.cache.discover("the weather forecast for Paris", None).await.unwrap_err();

    assert!(matches!(err, DiscoveryError::Timeout { ref stage, timeout_secs: 30 } if stage == "invocation"));
    assert!(err.is_retryable());
    assert_eq!(h.catalogue.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(h.catalogue.lists.load(Ordering::SeqCst), 0);
    assert_eq!(h.provider.calls.load(Ordering::SeqCst), 0);
}

/// Delegates to an in-memory store but has no similarity index.
struct UnindexedStore(InMemoryStore);

#[async_trait]
impl MemoryStore for UnindexedStore {
    fn name(&self) -> &str {
        "unindexed"
    }

    async fn put(&self, record: MemoryRecord) -> Result<(), MemoryError> {
        self.0.put(record).await
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<MemoryRecord>, MemoryError> {
        self.0.get(collection, key).await
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, MemoryError> {
        self.0.delete(collection, key).await
    }

    async fn scan(&self, collection: Collection, filter: &RecordFilter) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.0.scan(collection, filter).await
    }

    async fn claim(
        &self,
        collection: Collection,
        filter: &RecordFilter,
        field: &str,
        from: &str,
        to: &str,
    ) -> Result<Option<MemoryRecord>, MemoryError> {
        self.0.claim(collection, filter, field, from, to).await
    }

    async fn purge_expired(&self) -> Result<usize, MemoryError> {
        self.0.purge_expired().await
    }
}

#[tokio::test]
async fn missing_similarity_index_falls_back_to_exact_text() {
    let catalogue = Arc::new(WeatherCatalogue::default());
    let provider = Arc::new(ScriptedProvider::new(FORECAST));
    let cache = ToolDiscoveryCache::new(
        Arc::new(UnindexedStore(InMemoryStore::new())),
        catalogue.clone(),
        provider.clone(),
        "test-model",
        DiscoverySettings::default(),
    )
    .with_embedder(Some(Arc::new(WordEmbedder) as Arc<dyn Embedder>));

    let first = cache.discover("weather forecast for Paris", None).await.unwrap();
    assert_eq!(first.provenance, Provenance::Synthesized);

    let again = cache.discover("Weather forecast for Paris!", None).await.unwrap();
    assert_eq!(again.provenance, Provenance::ReusedAnswer);
    assert_eq!(again.similarity, None);
    assert_eq!(again.answer, "Sunny in Paris, 21C");
    assert_eq!(catalogue.invocations.load(Ordering::SeqCst), 1);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn discovery_events_are_published() {
    let events = Arc::new(EventBus::new(16));
    let mut rx = events.subscribe();
    let h = harness(WeatherCatalogue::default(), FORECAST, true);
    let cache = h.cache.with_events(events);

    cache.discover("weather forecast for Paris", None).await.unwrap();

    let mut logged = 0;
    while let Ok(event) = rx.try_recv() {
        if let DomainEvent::DiscoveryLogged { service, success, .. } = event.as_ref() {
            assert_eq!(service, "weather");
            assert!(*success);
            logged += 1;
        }
    }
    // One solution record and one answer record
    assert_eq!(logged, 2);
}
