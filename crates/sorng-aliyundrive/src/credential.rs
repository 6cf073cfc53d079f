//! Per-account credentials and the store that indexes them by user id.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::types::{TokenResponse, DEFAULT_ROOT_FILE_ID};

/// Callback fired after every successful refresh.
pub type ChangeHandler = Box<dyn Fn(&CredentialState) + Send + Sync>;

/// Mutable portion of a credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialState {
    pub user_id: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub access_token: String,
    #[serde(skip_serializing, default)]
    pub refresh_token: String,
    pub root_folder: String,
    pub default_drive_id: String,
}

impl fmt::Debug for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialState")
            .field("user_id", &self.user_id)
            .field("name", &self.name)
            .field("access_token", &mask(&self.access_token))
            .field("refresh_token", &mask(&self.refresh_token))
            .field("root_folder", &self.root_folder)
            .field("default_drive_id", &self.default_drive_id)
            .finish()
    }
}

/// Short, log-safe rendering of a secret.
pub(crate) fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "<empty>".to_string();
    }
    let head: String = secret.chars().take(4).collect();
    format!("{head}…({} chars)", secret.chars().count())
}

/// One account. Shared as `Arc<Credential>`; refreshes mutate it in place.
pub struct Credential {
    state: RwLock<CredentialState>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
    subscribers: RwLock<Vec<ChangeHandler>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// A credential that only knows its refresh token. Unusable for
    /// authenticated calls until the first refresh.
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self::from_state(CredentialState {
            user_id: String::new(),
            name: String::new(),
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            root_folder: DEFAULT_ROOT_FILE_ID.to_string(),
            default_drive_id: String::new(),
        })
    }

    pub fn from_state(mut state: CredentialState) -> Self {
        if state.root_folder.is_empty() {
            state.root_folder = DEFAULT_ROOT_FILE_ID.to_string();
        }
        Self {
            state: RwLock::new(state),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Start path resolution somewhere other than the drive root.
    pub fn with_root_folder(mut self, root_folder: impl Into<String>) -> Self {
        let root = root_folder.into();
        self.state.get_mut().root_folder = if root.is_empty() {
            DEFAULT_ROOT_FILE_ID.to_string()
        } else {
            root
        };
        self
    }

    /// Append a subscriber. Subscribers fire in registration order.
    pub async fn register_change_event(&self, handler: ChangeHandler) {
        self.subscribers.write().await.push(handler);
    }

    pub async fn snapshot(&self) -> CredentialState {
        self.state.read().await.clone()
    }

    pub async fn user_id(&self) -> String {
        self.state.read().await.user_id.clone()
    }

    pub async fn access_token(&self) -> String {
        self.state.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> String {
        self.state.read().await.refresh_token.clone()
    }

    pub async fn default_drive_id(&self) -> String {
        self.state.read().await.default_drive_id.clone()
    }

    pub async fn root_folder(&self) -> String {
        self.state.read().await.root_folder.clone()
    }

    /// Number of successful refreshes applied so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }

    /// Overwrite tokens and identity from a token response, then notify
    /// subscribers with the new state.
    pub(crate) async fn apply_refresh(&self, token: &TokenResponse) -> CredentialState {
        let updated = {
            let mut s = self.state.write().await;
            s.access_token = token.access_token.clone();
            s.refresh_token = token.refresh_token.clone();
            s.name = token.nick_name.clone();
            s.default_drive_id = token.default_drive_id.clone();
            if !token.user_id.is_empty() {
                s.user_id = token.user_id.clone();
            }
            s.clone()
        };
        self.generation.fetch_add(1, Ordering::AcqRel);

        for handler in self.subscribers.read().await.iter() {
            handler(&updated);
        }
        updated
    }

    pub(crate) async fn set_user_id(&self, user_id: &str) {
        self.state.write().await.user_id = user_id.to_string();
    }
}

// ── Store ────────────────────────────────────────────────────────

/// Credentials indexed by user id (or a temporary id before the first refresh).
#[derive(Default)]
pub struct CredentialStore {
    entries: RwLock<HashMap<String, Arc<Credential>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, key: impl Into<String>, credential: Arc<Credential>) {
        self.entries.write().await.insert(key.into(), credential);
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Credential>> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn remove(&self, key: &str) -> Option<Arc<Credential>> {
        self.entries.write().await.remove(key)
    }

    pub async fn all(&self) -> Vec<Arc<Credential>> {
        self.entries.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Key under which this exact credential is stored.
    pub async fn key_of(&self, credential: &Arc<Credential>) -> Option<String> {
        self.entries
            .read()
            .await
            .iter()
            .find(|(_, c)| Arc::ptr_eq(c, credential))
            .map(|(k, _)| k.clone())
    }

    /// Store `credential` under `new_key`, dropping any previous key that
    /// pointed at it. Returns true when the index changed.
    pub async fn rekey(&self, credential: &Arc<Credential>, new_key: &str) -> bool {
        let mut entries = self.entries.write().await;
        let old_key = entries
            .iter()
            .find(|(_, c)| Arc::ptr_eq(c, credential))
            .map(|(k, _)| k.clone());
        if old_key.as_deref() == Some(new_key) {
            return false;
        }
        if let Some(ref k) = old_key {
            entries.remove(k);
        }
        entries.insert(new_key.to_string(), Arc::clone(credential));
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
