//! End-to-end pipeline tests: ingestion from caller text through chunking,
//! embedding, and vector writes, plus deletion and recipe adaptation, all
//! against a real SQLite database and filesystem object store with
//! in-memory model clients.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use appliance_pilot::adapt::{AdaptError, AdaptationEngine};
use appliance_pilot::chunker::ChunkOptions;
use appliance_pilot::config::RetrievalConfig;
use appliance_pilot::extract::PdfTextParser;
use appliance_pilot::indexer::ChunkIndexer;
use appliance_pilot::ingest::{extracted_text_object_key, manual_object_key, IngestionCoordinator};
use appliance_pilot::jobs::{JobQueue, SubmitError};
use appliance_pilot::llm::{EmbeddingClient, GenerationClient};
use appliance_pilot::models::{IngestionJob, ProcessingStatus, Recipe, VectorQuery};
use appliance_pilot::object_store::{FsObjectStore, ObjectStore};
use appliance_pilot::resolver::TextSourceResolver;
use appliance_pilot::server::{build_router, AppState};
use appliance_pilot::store::{vector_ids_for_deletion, ApplianceStore};
use appliance_pilot::vector::{SqliteVectorIndex, VectorIndex};
use appliance_pilot::{db, migrate};

// ─── Test model clients ─────────────────────────────────────────────

/// Deterministic embedding derived from the text bytes; close enough for
/// exercising storage and scoped retrieval.
struct HashEmbeddingClient;

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        for (i, b) in text.bytes().enumerate() {
            v[i % 8] += b as f32 / 255.0;
        }
        v
    }
}

/// Simulates an embedding provider that fails every call.
struct EmptyEmbeddingClient;

#[async_trait]
impl EmbeddingClient for EmptyEmbeddingClient {
    async fn embed(&self, _text: &str) -> Vec<f32> {
        Vec::new()
    }
}

/// Replays a fixed script of responses, one per `generate` call.
struct ScriptedGenerationClient {
    responses: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedGenerationClient {
    fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }

    fn failing() -> Self {
        Self::new(vec![])
    }
}

/// Never responds; parks whichever worker calls it.
struct HangingGenerationClient;

#[async_trait]
impl GenerationClient for HangingGenerationClient {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
        std::future::pending().await
    }

    async fn generate_vision(
        &self,
        _prompt: &str,
        _bytes: &[u8],
        _content_type: &str,
    ) -> Result<String> {
        std::future::pending().await
    }
}

#[async_trait]
impl GenerationClient for ScriptedGenerationClient {
    async fn generate(&self, _system: &str, _user: &str) -> Result<String> {
        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(r)) => Ok(r),
            Some(Err(e)) => bail!("{}", e),
            None => bail!("generation script exhausted"),
        }
    }

    async fn generate_vision(
        &self,
        _prompt: &str,
        _bytes: &[u8],
        _content_type: &str,
    ) -> Result<String> {
        bail!("vision not scripted")
    }
}

// ─── Shared setup ───────────────────────────────────────────────────

struct TestEnv {
    _tmp: TempDir,
    pool: sqlx::SqlitePool,
    store: Arc<ApplianceStore>,
    objects: Arc<dyn ObjectStore>,
    index: Arc<dyn VectorIndex>,
}

async fn test_env() -> TestEnv {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("pipeline.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    TestEnv {
        store: Arc::new(ApplianceStore::new(pool.clone())),
        objects: Arc::new(FsObjectStore::new(tmp.path().join("objects"))),
        index: Arc::new(SqliteVectorIndex::new(pool.clone())),
        pool,
        _tmp: tmp,
    }
}

fn coordinator(
    env: &TestEnv,
    embedding: Arc<dyn EmbeddingClient>,
    generation: Arc<dyn GenerationClient>,
) -> IngestionCoordinator {
    let resolver = TextSourceResolver::new(
        env.objects.clone(),
        Arc::new(PdfTextParser),
        generation.clone(),
        200,
    )
    .unwrap();
    let indexer = ChunkIndexer::new(embedding, env.index.clone(), 500);
    IngestionCoordinator::new(
        env.store.clone(),
        env.objects.clone(),
        resolver,
        indexer,
        generation,
        ChunkOptions {
            target_chars: 200,
            overlap_chars: 40,
            max_chunks: 40,
        },
    )
}

fn text_job(owner: &str, id: &str, text: &str) -> IngestionJob {
    IngestionJob {
        owner_id: owner.to_string(),
        appliance_id: id.to_string(),
        manual_key: manual_object_key(id),
        manual_url: None,
        payload: None,
        content_type: None,
        extracted_text: Some(text.to_string()),
        nickname: None,
    }
}

fn sample_manual_text() -> String {
    let paragraphs = [
        "The convection oven heats from 80C to 230C and supports air fry, roast, bake, and dehydrate modes with a fan boost toggle.",
        "Air fry mode works best between 180C and 205C. Always preheat for at least three minutes before loading the basket.",
        "Roast mode applies top and bottom heat evenly. Reduce conventional recipe temperatures by 15C when the fan is active.",
        "The dehydrate mode holds a steady low temperature between 30C and 80C for up to 12 hours.",
        "Clean the crumb tray after every use. Never cover the interior walls with aluminium foil.",
        "Error code E2 indicates a blocked fan. Unplug the unit and let it cool before inspecting.",
    ];
    paragraphs.join("\n\n")
}

async fn vector_count(env: &TestEnv, appliance_id: &str) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM manual_vectors WHERE appliance_id = ?")
        .bind(appliance_id)
        .fetch_one(&env.pool)
        .await
        .unwrap()
}

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn text_ingestion_runs_to_completed() {
    let env = test_env().await;
    let generation = Arc::new(ScriptedGenerationClient::new(vec![
        Ok(r#"{"brand":"Breville","model":"BOV900","capacity":null,"wattage":"1800W","features":["air fry","dehydrate"]}"#.to_string()),
        Ok("Convection runs about 15C hotter than conventional ovens.".to_string()),
    ]));
    let coord = coordinator(&env, Arc::new(HashEmbeddingClient), generation);

    env.store
        .create_queued("a1", "u1", Some("garage oven"), &manual_object_key("a1"))
        .await
        .unwrap();
    coord.run(text_job("u1", "a1", &sample_manual_text())).await.unwrap();

    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    assert_eq!(appliance.processing_status, ProcessingStatus::Completed);
    assert_eq!(appliance.brand.as_deref(), Some("Breville"));
    assert_eq!(appliance.model.as_deref(), Some("BOV900"));
    assert_eq!(
        appliance.extracted_text_key.as_deref(),
        Some(extracted_text_object_key("a1").as_str())
    );
    assert!(appliance.agent_instructions.is_some());

    // Nothing was stored at the manual key for a text-only ingestion
    assert_eq!(appliance.manual_key, None);

    let specs = appliance.specs.unwrap();
    assert!(specs.vector_chunk_count > 1);
    assert_eq!(specs.features, vec!["air fry", "dehydrate"]);
    assert_eq!(vector_count(&env, "a1").await, specs.vector_chunk_count as i64);

    // The normalized text is durably stored
    let stored = env
        .objects
        .get_text(&extracted_text_object_key("a1"))
        .await
        .unwrap();
    assert_eq!(stored, sample_manual_text());
}

#[tokio::test]
async fn job_without_any_source_marks_failed() {
    let env = test_env().await;
    let coord = coordinator(
        &env,
        Arc::new(HashEmbeddingClient),
        Arc::new(ScriptedGenerationClient::failing()),
    );

    env.store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    let mut job = text_job("u1", "a1", "");
    job.extracted_text = None;
    assert!(coord.run(job).await.is_err());

    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    assert_eq!(appliance.processing_status, ProcessingStatus::Failed);
}

#[tokio::test]
async fn spec_extraction_failure_still_completes() {
    let env = test_env().await;
    let coord = coordinator(
        &env,
        Arc::new(HashEmbeddingClient),
        Arc::new(ScriptedGenerationClient::failing()),
    );

    env.store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    coord.run(text_job("u1", "a1", &sample_manual_text())).await.unwrap();

    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    assert_eq!(appliance.processing_status, ProcessingStatus::Completed);
    assert_eq!(appliance.brand, None);
    assert_eq!(appliance.agent_instructions, None);
    // Chunks are indexed regardless of spec extraction
    let specs = appliance.specs.unwrap();
    assert!(specs.vector_chunk_count > 0);
}

#[tokio::test]
async fn failed_embeddings_complete_with_zero_vectors() {
    let env = test_env().await;
    let coord = coordinator(
        &env,
        Arc::new(EmptyEmbeddingClient),
        Arc::new(ScriptedGenerationClient::failing()),
    );

    env.store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    coord.run(text_job("u1", "a1", &sample_manual_text())).await.unwrap();

    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    assert_eq!(appliance.processing_status, ProcessingStatus::Completed);
    assert_eq!(appliance.specs.unwrap().vector_chunk_count, 0);
    assert_eq!(vector_count(&env, "a1").await, 0);
}

#[tokio::test]
async fn reingestion_overwrites_instead_of_duplicating() {
    let env = test_env().await;
    let coord = coordinator(
        &env,
        Arc::new(HashEmbeddingClient),
        Arc::new(ScriptedGenerationClient::new(vec![
            Err("no provider".to_string()),
            Err("no provider".to_string()),
        ])),
    );

    env.store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    coord.run(text_job("u1", "a1", &sample_manual_text())).await.unwrap();
    let first_count = vector_count(&env, "a1").await;
    assert!(first_count > 0);

    assert!(env.store.requeue("u1", "a1").await.unwrap());
    coord.run(text_job("u1", "a1", &sample_manual_text())).await.unwrap();

    // Deterministic ids make the second run an overwrite
    assert_eq!(vector_count(&env, "a1").await, first_count);
    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    assert_eq!(appliance.processing_status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn queued_job_runs_through_worker_pool() {
    let env = test_env().await;
    let coord = Arc::new(coordinator(
        &env,
        Arc::new(HashEmbeddingClient),
        Arc::new(ScriptedGenerationClient::failing()),
    ));
    let queue = JobQueue::start(coord, 1, 4);

    let created = env
        .store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    assert_eq!(created.processing_status, ProcessingStatus::Queued);

    let handle = queue.submit(text_job("u1", "a1", &sample_manual_text())).unwrap();
    handle.await.unwrap().unwrap();

    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    assert_eq!(appliance.processing_status, ProcessingStatus::Completed);
}

// ─── Deletion ───────────────────────────────────────────────────────

#[tokio::test]
async fn deletion_ids_cover_every_stored_vector() {
    let env = test_env().await;
    let coord = coordinator(
        &env,
        Arc::new(HashEmbeddingClient),
        Arc::new(ScriptedGenerationClient::failing()),
    );

    env.store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    coord.run(text_job("u1", "a1", &sample_manual_text())).await.unwrap();

    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    let ids = vector_ids_for_deletion(&appliance);
    assert_eq!(ids.len() as i64, vector_count(&env, "a1").await);

    env.index.delete(&ids).await.unwrap();
    assert_eq!(vector_count(&env, "a1").await, 0);
}

// ─── Adaptation ─────────────────────────────────────────────────────

fn adaptation_engine(env: &TestEnv, generation: Arc<dyn GenerationClient>) -> AdaptationEngine {
    AdaptationEngine::new(
        env.store.clone(),
        env.objects.clone(),
        env.index.clone(),
        Arc::new(HashEmbeddingClient),
        generation,
        RetrievalConfig::default(),
    )
}

async fn completed_appliance(env: &TestEnv, id: &str, owner: &str) {
    let coord = coordinator(
        env,
        Arc::new(HashEmbeddingClient),
        Arc::new(ScriptedGenerationClient::failing()),
    );
    env.store
        .create_queued(id, owner, None, &manual_object_key(id))
        .await
        .unwrap();
    coord.run(text_job(owner, id, &sample_manual_text())).await.unwrap();
}

fn sample_recipe(owner: &str) -> Recipe {
    Recipe {
        id: "r1".to_string(),
        owner_id: owner.to_string(),
        title: "Roast Chicken".to_string(),
        steps: vec![
            "Preheat oven to 220C".to_string(),
            "Roast 50 minutes until golden".to_string(),
        ],
    }
}

#[tokio::test]
async fn adaptation_returns_tailored_steps() {
    let env = test_env().await;
    completed_appliance(&env, "a1", "u1").await;
    env.store.insert_recipe(&sample_recipe("u1")).await.unwrap();

    let engine = adaptation_engine(
        &env,
        Arc::new(ScriptedGenerationClient::new(vec![
            Ok("roast poultry at high heat".to_string()),
            Ok(r#"{"tailored_steps":["Preheat to 205C on roast mode","Roast 45 minutes"],"change_summary":"Lowered temperature for convection."}"#.to_string()),
        ])),
    );

    let adapted = engine.adapt("u1", "r1", "a1").await.unwrap();
    assert_eq!(adapted.tailored_steps.len(), 2);
    assert!(adapted.tailored_steps[0].contains("205C"));
    assert_eq!(adapted.change_summary, "Lowered temperature for convection.");
}

#[tokio::test]
async fn unparsable_tailoring_degrades_to_original_steps() {
    let env = test_env().await;
    completed_appliance(&env, "a1", "u1").await;
    let recipe = sample_recipe("u1");
    env.store.insert_recipe(&recipe).await.unwrap();

    let engine = adaptation_engine(
        &env,
        Arc::new(ScriptedGenerationClient::new(vec![
            Ok("roast poultry at high heat".to_string()),
            Ok("Sure! Here is how I would adapt the recipe...".to_string()),
        ])),
    );

    let adapted = engine.adapt("u1", "r1", "a1").await.unwrap();
    assert_eq!(adapted.tailored_steps, recipe.steps);
    assert!(!adapted.change_summary.is_empty());
}

#[tokio::test]
async fn adaptation_requires_completed_ingestion() {
    let env = test_env().await;
    env.store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    env.store.insert_recipe(&sample_recipe("u1")).await.unwrap();

    let engine = adaptation_engine(&env, Arc::new(ScriptedGenerationClient::failing()));
    match engine.adapt("u1", "r1", "a1").await {
        Err(AdaptError::NotReady(status)) => assert_eq!(status, ProcessingStatus::Queued),
        other => panic!("expected NotReady, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn adaptation_is_owner_scoped() {
    let env = test_env().await;
    completed_appliance(&env, "a1", "u1").await;
    env.store.insert_recipe(&sample_recipe("u1")).await.unwrap();

    let engine = adaptation_engine(&env, Arc::new(ScriptedGenerationClient::failing()));
    assert!(matches!(
        engine.adapt("u2", "r1", "a1").await,
        Err(AdaptError::ApplianceNotFound)
    ));
}

// ─── HTTP surface ───────────────────────────────────────────────────

fn app_state(env: &TestEnv, queue: JobQueue) -> AppState {
    AppState {
        store: env.store.clone(),
        objects: env.objects.clone(),
        index: env.index.clone(),
        queue,
        adaptation: Arc::new(adaptation_engine(
            env,
            Arc::new(ScriptedGenerationClient::failing()),
        )),
    }
}

async fn spawn_server(state: AppState) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn rejected_reingest_restores_prior_status() {
    let env = test_env().await;
    completed_appliance(&env, "a1", "u1").await;

    // One worker parked on a never-returning generation call plus a job
    // waiting in the depth-1 queue: every further submit is rejected.
    let parked = Arc::new(coordinator(
        &env,
        Arc::new(HashEmbeddingClient),
        Arc::new(HangingGenerationClient),
    ));
    let queue = JobQueue::start(parked, 1, 1);
    queue
        .submit(text_job("u1", "blk1", &sample_manual_text()))
        .unwrap();
    loop {
        // Accepted once the worker has pulled the first job off the queue
        match queue.submit(text_job("u1", "blk2", &sample_manual_text())) {
            Ok(_) => break,
            Err(SubmitError::QueueFull) => {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            Err(e) => panic!("unexpected submit error: {}", e),
        }
    }
    assert!(matches!(
        queue.submit(text_job("u1", "blk3", &sample_manual_text())),
        Err(SubmitError::QueueFull)
    ));

    let addr = spawn_server(app_state(&env, queue)).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://{}/appliances/a1/reingest", addr))
        .header("x-owner-id", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "queue_full");

    // The rejected requeue must not strand the record in QUEUED
    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    assert_eq!(appliance.processing_status, ProcessingStatus::Completed);
}

#[tokio::test]
async fn delete_removes_row_objects_and_vectors() {
    let env = test_env().await;
    let coord = coordinator(
        &env,
        Arc::new(HashEmbeddingClient),
        Arc::new(ScriptedGenerationClient::failing()),
    );
    env.store
        .create_queued("a1", "u1", None, &manual_object_key("a1"))
        .await
        .unwrap();
    // Byte upload, so both the raw manual and the extracted text get stored
    let mut job = text_job("u1", "a1", "");
    job.extracted_text = None;
    job.payload = Some(sample_manual_text().into_bytes());
    job.content_type = Some("text/plain".to_string());
    coord.run(job).await.unwrap();

    let appliance = env.store.get("u1", "a1").await.unwrap().unwrap();
    let manual_key = appliance.manual_key.clone().unwrap();
    let text_key = appliance.extracted_text_key.clone().unwrap();
    assert!(env.objects.get(&manual_key).await.is_ok());
    assert!(env.objects.get(&text_key).await.is_ok());
    assert!(vector_count(&env, "a1").await > 0);

    let idle_queue = JobQueue::start(
        Arc::new(coordinator(
            &env,
            Arc::new(HashEmbeddingClient),
            Arc::new(ScriptedGenerationClient::failing()),
        )),
        1,
        4,
    );
    let addr = spawn_server(app_state(&env, idle_queue)).await;
    let client = reqwest::Client::new();
    let resp = client
        .delete(format!("http://{}/appliances/a1", addr))
        .header("x-owner-id", "u1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    // Row, stored objects, and vectors are all gone
    assert!(env.store.get("u1", "a1").await.unwrap().is_none());
    assert!(env.objects.get(&manual_key).await.is_err());
    assert!(env.objects.get(&text_key).await.is_err());
    assert_eq!(vector_count(&env, "a1").await, 0);
}
