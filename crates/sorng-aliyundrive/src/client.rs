//! Client façade: owns the transport, credential store, cache, limiter and
//! background tasks. Operations live in the sibling modules as free
//! functions taking `&DriveClient`.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::{spawn_refresh_job, TokenRefresher};
use crate::cache::{spawn_sweeper, TransferCache};
use crate::config::{DriveConfig, RefreshSchedule};
use crate::credential::{Credential, CredentialState, CredentialStore};
use crate::dispatcher::Dispatcher;
use crate::error::DriveResult;
use crate::rate_limit::TokenBucket;
use crate::transport::{HttpTransport, Transport};

pub struct DriveClient {
    config: DriveConfig,
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    refresher: Arc<TokenRefresher>,
    dispatcher: Dispatcher,
    cache: Arc<TransferCache>,
    limiter: Option<Arc<TokenBucket>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DriveClient {
    // ── Construction ─────────────────────────────────────────────

    /// Client backed by [`HttpTransport`].
    pub async fn new(config: DriveConfig) -> DriveResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.timeout())?);
        Self::with_transport(config, transport).await
    }

    /// Client over an arbitrary transport. Starts the cache sweeper and, if
    /// enabled, the refresh job; then registers `initial_credentials`,
    /// logging (not failing on) refresh errors.
    pub async fn with_transport(config: DriveConfig, transport: Arc<dyn Transport>) -> DriveResult<Self> {
        config.validate()?;
        let schedule = if config.auto_refresh {
            Some(RefreshSchedule::parse(&config.refresh_schedule)?)
        } else {
            None
        };

        let store = Arc::new(CredentialStore::new());
        let refresher = Arc::new(TokenRefresher::new(
            Arc::clone(&transport),
            Arc::clone(&store),
            config.auth_endpoint.clone(),
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&transport), Arc::clone(&refresher));
        let cache = Arc::new(TransferCache::new(config.cache_ttl()));

        let limiter = if config.upload_rate_limit > 0 {
            info!("Upload rate limit: {} bytes/s", config.upload_rate_limit);
            Some(Arc::new(TokenBucket::new(config.upload_rate_limit)))
        } else {
            info!("Upload rate limit disabled");
            None
        };

        let shutdown = CancellationToken::new();
        let mut tasks = vec![spawn_sweeper(
            &cache,
            config.cache_sweep_interval(),
            shutdown.child_token(),
        )];
        if let Some(schedule) = schedule {
            info!("Token auto-refresh enabled ({})", config.refresh_schedule);
            tasks.push(spawn_refresh_job(
                Arc::clone(&refresher),
                schedule,
                shutdown.child_token(),
            ));
        }

        let initial = config.initial_credentials.clone();
        let client = Self {
            config,
            transport,
            store,
            refresher,
            dispatcher,
            cache,
            limiter,
            shutdown,
            tasks: Mutex::new(tasks),
        };

        for refresh_token in initial {
            let credential = Arc::new(Credential::new(refresh_token));
            if let Err(e) = client.add_credential(&credential).await {
                warn!("Initial credential failed to refresh: {}", e);
            }
        }
        Ok(client)
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    pub fn api_endpoint(&self) -> &str {
        &self.config.api_endpoint
    }

    pub fn cache(&self) -> &Arc<TransferCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn limiter(&self) -> Option<&Arc<TokenBucket>> {
        self.limiter.as_ref()
    }

    // ── Credentials ──────────────────────────────────────────────

    /// Register under a temporary id, then refresh. On success the entry is
    /// re-keyed to the confirmed user id; on failure it stays registered
    /// and the refresh error is returned.
    pub async fn add_credential(&self, credential: &Arc<Credential>) -> DriveResult<CredentialState> {
        let temp_id = Uuid::new_v4().to_string();
        credential.set_user_id(&temp_id).await;
        self.store.insert(temp_id.clone(), Arc::clone(credential)).await;
        debug!("Registered credential under temporary id {}", temp_id);
        self.refresher.refresh(credential).await
    }

    pub async fn refresh_token(&self, credential: &Arc<Credential>) -> DriveResult<CredentialState> {
        self.refresher.refresh(credential).await
    }

    /// Refresh every registered credential now. Returns how many succeeded.
    pub async fn refresh_all_tokens(&self) -> usize {
        self.refresher.refresh_all().await
    }

    pub async fn credential(&self, user_id: &str) -> Option<Arc<Credential>> {
        self.store.get(user_id).await
    }

    pub async fn remove_credential(&self, user_id: &str) -> Option<Arc<Credential>> {
        self.store.remove(user_id).await
    }

    // ── Cache ────────────────────────────────────────────────────

    pub async fn evict_cache_with_prefix(&self, prefix: &str) -> usize {
        self.cache.evict_prefix(prefix).await
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Stop background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
        debug!("Drive client shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for DriveClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
