//! # SortOfRemote NG – Aliyun Drive Integration
//!
//! Async client for the Aliyun Drive API.
//!
//! ## Features
//!
//! - **Credentials** – refresh-token exchange, per-account store, change
//!   subscribers, optional scheduled refresh
//! - **Dispatch** – bearer auth with exactly one refresh-and-retry on
//!   `AccessTokenInvalid`
//! - **Rapid upload** – pre-hash probe and content proof, skipping the
//!   transfer when the service already holds the bytes
//! - **Chunked upload** – sequential parts with progress, cancellation and
//!   a shared bytes/sec limiter
//! - **Paths** – resolve `/a/b/c` to file ids, `mkdir` / `mkdir_all`
//! - **Files** – list, get, download (with ranges), search, rename, move,
//!   trash
//! - **Cache** – TTL cache of listings, metadata and download links with
//!   prefix eviction on every mutation

pub mod error;
pub mod types;
pub mod config;
pub mod transport;
pub mod credential;
pub mod auth;
pub mod dispatcher;
pub mod cache;
pub mod rate_limit;
pub mod parts;
pub mod part_stream;
pub mod uploads;
pub mod rapid;
pub mod folders;
pub mod files;
pub mod client;

#[cfg(test)]
pub(crate) mod testing;

pub use client::DriveClient;
pub use config::DriveConfig;
pub use credential::{Credential, CredentialState, CredentialStore};
pub use error::{DriveError, DriveErrorKind, DriveResult};
pub use folders::{PathOutcome, ResolvedPath};
pub use part_stream::ProgressCallback;
pub use transport::{ApiRequest, HttpTransport, RawResponse, Transport};
pub use uploads::UploadOptions;
