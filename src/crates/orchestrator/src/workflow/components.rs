use crate::config::{ConfigError, GenerationConfig, PipelineConfig};
use crate::registry::{AccountRegistry, StaticAccountRegistry};
use crate::retrieval::{HttpRetrievalClient, LocalRetrievalClient, RetrievalAdapter};
use crate::stages::{StageInstructions, StageRunner, StageSettings};
use crate::Result;
use checkpoint::{FileReviewStore, ReviewStore};
use integration::{FetchCache, IntegrationClient, ProcessDataSource, WorkerPool};
use async_trait::async_trait;
use llm::{ClaudeClient, GenerationRequest, GenerationService, RemoteLlmConfig};
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Everything a [`WorkflowOrchestrator`](super::WorkflowOrchestrator) talks to.
///
/// Components are shared handles; the same cache, pool and store can back
/// several orchestrators.
#[derive(Clone)]
pub struct PipelineComponents {
    pub registry: Arc<dyn AccountRegistry>,
    pub integration: Arc<IntegrationClient>,
    pub retrieval: Arc<RetrievalAdapter>,
    pub stages: Arc<StageRunner>,
    pub store: Arc<dyn ReviewStore>,
    /// Worker pool behind `integration`, when it is process backed
    pub workers: Option<Arc<WorkerPool>>,
}

impl fmt::Debug for PipelineComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineComponents")
            .field("accounts", &self.registry.accounts().len())
            .field("retrieval", &self.retrieval)
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

impl PipelineComponents {
    pub fn new(
        registry: Arc<dyn AccountRegistry>,
        integration: Arc<IntegrationClient>,
        retrieval: Arc<RetrievalAdapter>,
        stages: Arc<StageRunner>,
        store: Arc<dyn ReviewStore>,
    ) -> Self {
        Self {
            registry,
            integration,
            retrieval,
            stages,
            store,
            workers: None,
        }
    }

    pub fn with_workers(mut self, workers: Arc<WorkerPool>) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Build the production wiring: process workers behind a fetch cache,
    /// the remote generation service, configured retrieval sources and a
    /// file-backed review store.
    ///
    /// The generation client is built on first use, so review commands work
    /// without an API key in the environment.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self> {
        let registry = StaticAccountRegistry::new(config.accounts.clone())?;

        let workers = Arc::new(WorkerPool::new(config.worker.clone()));
        let cache = Arc::new(FetchCache::new(config.cache.clone()));
        let integration = IntegrationClient::new(Arc::new(ProcessDataSource::new(workers.clone())))
            .with_cache(cache);

        let mut retrieval = RetrievalAdapter::new();
        if let Some(base_url) = &config.retrieval.base_url {
            let client = HttpRetrievalClient::new(base_url, config.retrieval.timeout())
                .map_err(|e| ConfigError::Invalid(format!("retrieval client: {}", e)))?
                .with_top_k(config.retrieval.top_k)
                .with_min_relevance(config.retrieval.min_relevance);
            retrieval = retrieval.with_remote(Arc::new(client));
        }
        if let Some(dir) = &config.retrieval.local_dir {
            let client = LocalRetrievalClient::new(dir)
                .with_top_k(config.retrieval.top_k)
                .with_min_relevance(config.retrieval.min_relevance);
            retrieval = retrieval.with_local(Arc::new(client));
        }

        let generation = &config.generation;
        let generator = DeferredGenerator::new(generation.clone());

        let instructions = match &config.stages.instructions_dir {
            Some(dir) => StageInstructions::load(dir).await.map_err(|source| ConfigError::Read {
                path: dir.clone(),
                source,
            })?,
            None => StageInstructions::default(),
        };
        let stages = StageRunner::new(Arc::new(generator))
            .with_instructions(instructions)
            .with_settings(StageSettings {
                model: None,
                planning_max_tokens: generation.planning_max_tokens,
                structuring_max_tokens: generation.structuring_max_tokens,
                briefs_max_tokens: generation.briefs_max_tokens,
                min_planning_chars: config.stages.min_planning_chars,
            });

        let store = FileReviewStore::open(&config.review.store_dir).await?;
        info!(
            accounts = registry.len(),
            store_dir = %config.review.store_dir.display(),
            "Pipeline components ready"
        );

        Ok(Self::new(
            Arc::new(registry),
            Arc::new(integration),
            Arc::new(retrieval),
            Arc::new(stages),
            Arc::new(store),
        )
        .with_workers(workers))
    }
}

/// Remote generation client created the first time a stage needs it.
struct DeferredGenerator {
    config: GenerationConfig,
    client: OnceCell<ClaudeClient>,
}

impl DeferredGenerator {
    fn new(config: GenerationConfig) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> llm::Result<&ClaudeClient> {
        self.client
            .get_or_try_init(|| async {
                let llm_config = RemoteLlmConfig::from_env(
                    &self.config.api_key_env,
                    self.config.base_url.clone(),
                    self.config.model.clone(),
                )?
                .with_timeout(self.config.timeout());
                debug!(model = %self.config.model, "Creating generation client");
                ClaudeClient::new(llm_config)
            })
            .await
    }
}

#[async_trait]
impl GenerationService for DeferredGenerator {
    async fn generate(&self, request: GenerationRequest) -> llm::Result<String> {
        self.client().await?.generate(request).await
    }

    async fn ready(&self) -> llm::Result<()> {
        self.client().await.map(|_| ())
    }
}
