//! Application state wiring

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{AppConfig, VectorProvider};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::ingestion::DocumentIntake;
use crate::processing::{
    CallbackReconciler, FastLaneProcessor, HeavyLaneDispatcher, ProcessingQueue, StateMachine,
};
use crate::providers::{
    ConverterClient, Embedder, ExternalHybridIndex, HttpConverter, HttpEmbedder,
    HttpRemoteSource, RemoteSource, SqliteVectorIndex, VectorIndex,
};
use crate::retrieval::HybridSearch;
use crate::storage::MetadataStore;
use crate::sync::FolderSynchronizer;
use crate::types::profile::ProfileConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AppConfig,
    store: Arc<MetadataStore>,
    events: EventBus,
    queue: Arc<ProcessingQueue>,
    state_machine: Arc<StateMachine>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndex>,
    intake: Arc<DocumentIntake>,
    search: Arc<HybridSearch>,
    reconciler: Arc<CallbackReconciler>,
    synchronizer: Arc<FolderSynchronizer>,
    converter: Arc<dyn ConverterClient>,
    shutdown_tx: watch::Sender<bool>,
    ready: RwLock<bool>,
}

impl AppState {
    /// Build the state with production providers and start the background
    /// workers.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = Arc::new(MetadataStore::open(&config.storage.db_path)?);

        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embedding)?);
        let vector_index: Arc<dyn VectorIndex> = match config.search.vector_provider {
            VectorProvider::RelationalWithVectorExt => {
                Arc::new(SqliteVectorIndex::new(store.clone()))
            }
            VectorProvider::ExternalHybrid => {
                let endpoint = config.search.external_endpoint.as_deref().ok_or_else(|| {
                    Error::Config("external-hybrid provider requires search.external_endpoint".into())
                })?;
                Arc::new(ExternalHybridIndex::new(
                    endpoint,
                    "chunks",
                    Duration::from_secs(10),
                )?)
            }
        };
        let converter: Arc<dyn ConverterClient> = Arc::new(HttpConverter::new(&config.converter)?);
        let remote: Arc<dyn RemoteSource> = Arc::new(HttpRemoteSource::new(&config.remote)?);

        let state = Self::assemble(config, store, embedder, vector_index, converter, remote)?;
        state.start_workers();
        Ok(state)
    }

    /// Wire the components around injected providers. Workers are not
    /// started; call `start_workers` when a runtime is available.
    pub fn assemble(
        config: AppConfig,
        store: Arc<MetadataStore>,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndex>,
        converter: Arc<dyn ConverterClient>,
        remote: Arc<dyn RemoteSource>,
    ) -> Result<Self> {
        let events = EventBus::new();

        // The default profile carries the configured quality/chunking knobs.
        store.seed_default_profile(&ProfileConfig::from_app_config(&config))?;

        let state_machine = Arc::new(StateMachine::new(store.clone(), events.clone()));
        let queue = Arc::new(ProcessingQueue::new(store.clone(), config.queue.clone())?);

        let fast_lane = Arc::new(FastLaneProcessor::new(
            store.clone(),
            state_machine.clone(),
            embedder.clone(),
            vector_index.clone(),
        ));
        let intake = Arc::new(DocumentIntake::new(
            store.clone(),
            queue.clone(),
            fast_lane.clone(),
            events.clone(),
            config.storage.upload_dir.clone(),
        ));
        let search = Arc::new(HybridSearch::new(
            store.clone(),
            embedder.clone(),
            vector_index.clone(),
            config.search.clone(),
        ));
        let reconciler = Arc::new(CallbackReconciler::new(
            store.clone(),
            state_machine.clone(),
            queue.clone(),
            embedder.clone(),
            vector_index.clone(),
        ));
        let synchronizer = Arc::new(FolderSynchronizer::new(
            store.clone(),
            state_machine.clone(),
            intake.clone(),
            remote,
            events.clone(),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                events,
                queue,
                state_machine,
                embedder,
                vector_index,
                intake,
                search,
                reconciler,
                synchronizer,
                converter,
                shutdown_tx,
                ready: RwLock::new(true),
            }),
        })
    }

    /// Spawn the heavy-lane dispatcher.
    pub fn start_workers(&self) {
        let dispatcher = Arc::new(HeavyLaneDispatcher::new(
            self.inner.queue.clone(),
            self.inner.state_machine.clone(),
            self.inner.converter.clone(),
            self.inner.config.queue.max_concurrent_jobs,
        ));
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            dispatcher.run(shutdown_rx).await;
        });
    }

    /// Graceful shutdown: stop the dispatcher (reserved jobs go back to the
    /// queue) and let in-flight syncs stop at their page boundary.
    pub fn shutdown(&self) {
        self.inner
            .synchronizer
            .cancel_flag()
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let _ = self.inner.shutdown_tx.send(true);
        *self.inner.ready.write() = false;
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<MetadataStore> {
        &self.inner.store
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn queue(&self) -> &Arc<ProcessingQueue> {
        &self.inner.queue
    }

    pub fn state_machine(&self) -> &Arc<StateMachine> {
        &self.inner.state_machine
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.inner.embedder
    }

    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.inner.vector_index
    }

    pub fn intake(&self) -> &Arc<DocumentIntake> {
        &self.inner.intake
    }

    pub fn search(&self) -> &Arc<HybridSearch> {
        &self.inner.search
    }

    pub fn reconciler(&self) -> &Arc<CallbackReconciler> {
        &self.inner.reconciler
    }

    pub fn synchronizer(&self) -> &Arc<FolderSynchronizer> {
        &self.inner.synchronizer
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Effective profile for an upload: explicit override, else the default.
    pub fn resolve_upload_profile(
        &self,
        override_id: Option<Uuid>,
    ) -> Result<(Option<Uuid>, ProfileConfig)> {
        if let Some(id) = override_id {
            let profile = self
                .inner
                .store
                .get_profile(id)?
                .ok_or_else(|| Error::ProfileNotFound(id.to_string()))?;
            if profile.is_archived {
                return Err(Error::StateConflict(format!(
                    "profile {} is archived",
                    profile.name
                )));
            }
            return Ok((Some(profile.id), profile.config));
        }
        let default = self.inner.store.get_default_profile()?;
        Ok((Some(default.id), default.config))
    }
}
