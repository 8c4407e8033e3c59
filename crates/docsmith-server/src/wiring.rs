//! Daemon wiring: construct every subsystem from configuration and connect
//! the scheduler to stream polling and the batch-processor tick.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docsmith_core::config::DocsmithConfig;
use docsmith_core::net::http_client;
use docsmith_docindex::DocIndexService;
use docsmith_llm::anthropic::AnthropicProvider;
use docsmith_llm::{LlmGateway, TierMap};
use docsmith_pipeline::BatchProcessor;
use docsmith_ruleset::RulesetEngine;
use docsmith_scheduler::{parse_schedule, Scheduler};
use docsmith_store::Store;
use docsmith_streams::StreamManager;
use docsmith_vector::{Embedder, HttpEmbedder, VectorKey, VectorStore};

use crate::app::AppState;

pub async fn build_state(
    config: DocsmithConfig,
    cancel: CancellationToken,
) -> anyhow::Result<Arc<AppState>> {
    let store = Arc::new(Store::open(&config.database.path)?);

    let llm_client = http_client(
        &config.network,
        Duration::from_secs(config.llm.request_timeout_secs),
    )?;
    let provider = Arc::new(AnthropicProvider::new(
        llm_client,
        config.llm.api_key.clone(),
        config.llm.base_url.clone(),
    ));
    let gateway = Arc::new(LlmGateway::new(
        provider,
        store.clone(),
        TierMap::from_config(&config.llm),
        Duration::from_secs(config.llm.request_timeout_secs),
    ));

    let embed_client = http_client(
        &config.network,
        Duration::from_secs(config.embedding.request_timeout_secs),
    )?;
    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
        embed_client,
        config.embedding.api_key.clone(),
        config.embedding.base_url.clone(),
        config.embedding.model.clone(),
        config.embedding.dimension,
    ));
    let vectors = Arc::new(VectorStore::new(config.embedding.dimension));

    let doc_index = Arc::new(DocIndexService::new(
        store.clone(),
        config.docindex.clone(),
        config.tenant.docs_path.clone(),
    ));

    let ruleset_engine = Arc::new(RulesetEngine::new(
        gateway.clone(),
        config.pipeline.ruleset_reject_before_modify,
    ));

    let adapter_client = http_client(
        &config.network,
        Duration::from_secs(config.network.adapter_fetch_timeout_secs),
    )?;
    let manager = Arc::new(StreamManager::new(
        store.clone(),
        config.tenant.tenant_id.clone(),
        adapter_client,
        config.pipeline.backpressure_threshold,
        cancel.clone(),
    ));

    let processor = Arc::new(BatchProcessor::new(
        store.clone(),
        gateway.clone(),
        embedder.clone(),
        vectors.clone(),
        ruleset_engine,
        doc_index.clone(),
        config.pipeline.clone(),
        config.tenant.clone(),
        cancel.clone(),
    ));

    Ok(Arc::new(AppState {
        config,
        store,
        embedder,
        vectors,
        doc_index,
        manager,
        processor,
    }))
}

/// Embed every indexed documentation page into the vector store so the RAG
/// step has something to retrieve.
pub async fn index_documentation(state: &Arc<AppState>) -> anyhow::Result<()> {
    let (index, _compact) = state
        .doc_index
        .get_or_generate(&state.config.tenant.documentation_commit)?;
    if index.pages.is_empty() {
        warn!("documentation snapshot has no indexed pages");
        return Ok(());
    }

    let texts: Vec<String> = index
        .pages
        .iter()
        .map(|p| format!("{}\n{}\n{}", p.title, p.summary, p.sections.join("\n")))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let vectors = state.embedder.embed(&refs).await?;

    for (page, vector) in index.pages.iter().zip(vectors) {
        state.vectors.upsert(
            VectorKey::new(
                state.config.tenant.tenant_id.clone(),
                "docs",
                page.path.clone(),
            ),
            vector,
            serde_json::json!({"title": page.title, "summary": page.summary}),
        )?;
    }
    info!(pages = index.pages.len(), "documentation embedded for retrieval");
    Ok(())
}

/// Register scheduler jobs: one batch-processor tick plus one poller per
/// scheduled stream. Returns the scheduler task handle and its shutdown
/// sender.
pub fn start_scheduler(
    state: &Arc<AppState>,
) -> (tokio::task::JoinHandle<()>, tokio::sync::watch::Sender<bool>) {
    let scheduler = Arc::new(Scheduler::new());

    match parse_schedule(&state.config.scheduling.batch_tick_cron) {
        Ok(schedule) => {
            let processor = state.processor.clone();
            scheduler.add_job("batch-processor-tick", schedule, move || {
                let processor = processor.clone();
                async move {
                    match processor.tick().await {
                        Ok(summary) => info!(
                            committed = summary.batches_committed,
                            proposals = summary.proposals_written,
                            failed = summary.streams_failed,
                            "batch tick complete"
                        ),
                        Err(e) => warn!(error = %e, "batch tick failed"),
                    }
                }
            });
        }
        Err(e) => warn!(error = %e, "bad batch_tick_cron; batch processing disabled"),
    }

    if state.config.scheduling.stream_scheduling_enabled {
        for (stream_id, expr) in state.manager.scheduled() {
            match parse_schedule(&expr) {
                Ok(schedule) => {
                    let manager = state.manager.clone();
                    let id = stream_id.clone();
                    scheduler.add_job(&format!("stream-poll:{stream_id}"), schedule, move || {
                        let manager = manager.clone();
                        let id = id.clone();
                        async move {
                            if let Err(e) = manager.run_once(&id).await {
                                warn!(stream_id = %id, error = %e, "scheduled poll failed");
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "bad stream schedule, poller not registered")
                }
            }
        }
    }

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(scheduler.run(rx));
    (handle, tx)
}
