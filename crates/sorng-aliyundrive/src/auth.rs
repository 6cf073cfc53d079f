//! Refresh-token exchange and the scheduled refresh job.
//!
//! Refreshes are serialized per credential: a caller that waited on the
//! lock while another refresh landed does not refresh a second time.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::DriveClient;
use crate::config::RefreshSchedule;
use crate::credential::{mask, Credential, CredentialState, CredentialStore};
use crate::error::{DriveError, DriveResult};
use crate::transport::{ApiRequest, Transport};
use crate::types::{TokenResponse, UserInfo};

#[derive(Debug, Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
    grant_type: &'a str,
}

/// Exchanges refresh tokens and keeps the store index in sync.
pub struct TokenRefresher {
    transport: Arc<dyn Transport>,
    store: Arc<CredentialStore>,
    auth_endpoint: String,
}

impl TokenRefresher {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<CredentialStore>,
        auth_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            auth_endpoint: auth_endpoint.into(),
        }
    }

    /// Unconditional refresh.
    pub async fn refresh(&self, credential: &Arc<Credential>) -> DriveResult<CredentialState> {
        let _guard = credential.lock_refresh().await;
        self.refresh_locked(credential).await
    }

    /// Refresh only if no other refresh completed since `observed_generation`.
    pub async fn refresh_if_stale(
        &self,
        credential: &Arc<Credential>,
        observed_generation: u64,
    ) -> DriveResult<()> {
        let _guard = credential.lock_refresh().await;
        if credential.generation() != observed_generation {
            debug!("Token already replaced by a concurrent refresh");
            return Ok(());
        }
        self.refresh_locked(credential).await.map(|_| ())
    }

    async fn refresh_locked(&self, credential: &Arc<Credential>) -> DriveResult<CredentialState> {
        let refresh_token = credential.refresh_token().await;
        debug!("Refreshing token {}", mask(&refresh_token));

        let body = RefreshBody {
            refresh_token: &refresh_token,
            grant_type: "refresh_token",
        };
        let request = ApiRequest::post(&self.auth_endpoint, "/v2/account/token", &body)?;
        let response = self.transport.send(&request).await.map_err(|e| {
            error!("Token refresh failed: {}", e);
            e
        })?;
        if let Some(err) = response.api_error() {
            error!("Token refresh rejected: {} {}", err.code, err.message);
            return Err(err.into());
        }
        let token: TokenResponse = response.decode()?;
        if token.access_token.is_empty() {
            error!("Token refresh returned no access token");
            return Err(DriveError::api("InvalidResponse", "refresh returned no access token"));
        }

        let state = credential.apply_refresh(&token).await;
        if !state.user_id.is_empty() && self.store.rekey(credential, &state.user_id).await {
            debug!("Credential re-keyed to {}", state.user_id);
        }
        info!("Refreshed token for user {} ({})", state.user_id, state.name);
        Ok(state)
    }

    /// Refresh every stored credential, logging failures. Returns the
    /// number that succeeded.
    pub async fn refresh_all(&self) -> usize {
        let mut ok = 0;
        for credential in self.store.all().await {
            match self.refresh(&credential).await {
                Ok(_) => ok += 1,
                Err(e) => warn!("Scheduled token refresh failed: {}", e),
            }
        }
        ok
    }
}

/// Spawn the periodic refresh loop. Stops when `cancel` fires.
pub fn spawn_refresh_job(
    refresher: Arc<TokenRefresher>,
    schedule: RefreshSchedule,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let delay = schedule.next_delay();
            info!("Next token refresh in {:?}", delay);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Token refresh job stopped");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    let n = refresher.refresh_all().await;
                    debug!("Token refresh job refreshed {} credential(s)", n);
                }
            }
        }
    })
}

/// Account details of the credential's user.
pub async fn get_user_info(
    client: &DriveClient,
    credential: &Arc<Credential>,
) -> DriveResult<UserInfo> {
    let request = ApiRequest::post(client.api_endpoint(), "/v2/user/get", &serde_json::json!({}))?;
    client.dispatcher().call(credential, request).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
