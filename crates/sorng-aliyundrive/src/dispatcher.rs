//! Authenticated request dispatch with a single auth-retry.

use std::sync::Arc;

use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::auth::TokenRefresher;
use crate::credential::Credential;
use crate::error::DriveResult;
use crate::transport::{ApiRequest, RawResponse, Transport};
use crate::types::CODE_ACCESS_TOKEN_INVALID;

/// Attaches bearer auth and retries exactly once on `AccessTokenInvalid`.
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    refresher: Arc<TokenRefresher>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, refresher: Arc<TokenRefresher>) -> Self {
        Self {
            transport,
            refresher,
        }
    }

    /// Send `request` on behalf of `credential`.
    ///
    /// Only `AccessTokenInvalid` triggers a refresh + resend; the resend's
    /// outcome is returned unchanged. Other application errors are left in
    /// the response for the caller to inspect.
    pub async fn send(
        &self,
        credential: &Arc<Credential>,
        request: &ApiRequest,
    ) -> DriveResult<RawResponse> {
        let generation = credential.generation();
        let first = self.send_once(credential, request).await?;

        match first.api_error() {
            Some(err) if err.code == CODE_ACCESS_TOKEN_INVALID => {
                warn!(
                    "Access token rejected on {}, refreshing and retrying once",
                    request.path()
                );
                self.refresher.refresh_if_stale(credential, generation).await?;
                self.send_once(credential, request).await
            }
            _ => Ok(first),
        }
    }

    /// [`Dispatcher::send`] followed by error extraction and decoding.
    pub async fn call<T: DeserializeOwned>(
        &self,
        credential: &Arc<Credential>,
        request: ApiRequest,
    ) -> DriveResult<T> {
        self.send(credential, &request).await?.into_result()
    }

    async fn send_once(
        &self,
        credential: &Arc<Credential>,
        request: &ApiRequest,
    ) -> DriveResult<RawResponse> {
        let token = credential.access_token().await;
        debug!("{} {}", request.method, request.path());
        if token.is_empty() {
            self.transport.send(request).await
        } else {
            self.transport.send(&request.clone().with_bearer(&token)).await
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
