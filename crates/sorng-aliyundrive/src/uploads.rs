//! Sequential chunked uploads.
//!
//! A session is negotiated with `createWithFolders`, each part is PUT to
//! its pre-signed URL in order, and `/v2/file/complete` merges them.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use log::{debug, error, info};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::client::DriveClient;
use crate::credential::Credential;
use crate::error::{DriveError, DriveErrorKind, DriveResult};
use crate::part_stream::{part_stream, PartLayers, ProgressCallback};
use crate::parts::{attach_upload_urls, plan_parts, to_part_info, PartDescriptor};
use crate::transport::ApiRequest;
use crate::types::{
    CompleteUploadResponse, CreateFileBody, CreateFileResponse, DriveFile, FileType,
    FILE_STATUS_AVAILABLE,
};

/// Fired once after a successful completion.
pub type CompletionHook = Box<dyn FnOnce(DriveFile) -> BoxFuture<'static, ()> + Send>;

/// What to upload and where.
#[derive(Clone)]
pub struct UploadOptions {
    pub parent_file_id: String,
    pub name: String,
    pub size: u64,
    pub progress: Option<ProgressCallback>,
    pub cancel: CancellationToken,
}

impl UploadOptions {
    pub fn new(parent_file_id: impl Into<String>, name: impl Into<String>, size: u64) -> Self {
        Self {
            parent_file_id: parent_file_id.into(),
            name: name.into(),
            size,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: impl Fn(u64) -> bool + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn validate(&self) -> DriveResult<()> {
        if self.name.trim().is_empty() {
            return Err(DriveError::invalid("file name must not be empty"));
        }
        if self.name.contains('/') {
            return Err(DriveError::invalid("file name must not contain '/'"));
        }
        if self.parent_file_id.is_empty() {
            return Err(DriveError::invalid("parent folder id must not be empty"));
        }
        Ok(())
    }
}

/// State for one in-flight upload.
pub struct UploadSession {
    pub file_id: String,
    pub upload_id: String,
    pub parts: Vec<PartDescriptor>,
    pub progress: Option<ProgressCallback>,
    pub cancel: CancellationToken,
    pub on_complete: Option<CompletionHook>,
}

impl UploadSession {
    /// Build a session from a create-file response and the local part plan.
    pub fn from_response(
        created: CreateFileResponse,
        mut parts: Vec<PartDescriptor>,
        options: &UploadOptions,
    ) -> DriveResult<Self> {
        attach_upload_urls(&mut parts, &created.part_info_list)?;
        Ok(Self {
            file_id: created.file_id,
            upload_id: created.upload_id,
            parts,
            progress: options.progress.clone(),
            cancel: options.cancel.clone(),
            on_complete: None,
        })
    }

    pub fn with_completion_hook(mut self, hook: CompletionHook) -> Self {
        self.on_complete = Some(hook);
        self
    }
}

#[derive(Debug, Serialize)]
struct CompleteBody<'a> {
    drive_id: &'a str,
    upload_id: &'a str,
    file_id: &'a str,
}

/// Plain (non-dedup) upload of `reader`, which must yield `options.size` bytes.
pub async fn upload_file<R>(
    client: &DriveClient,
    credential: &Arc<Credential>,
    options: UploadOptions,
    reader: &mut R,
) -> DriveResult<DriveFile>
where
    R: AsyncRead + Unpin + Send,
{
    options.validate()?;
    let parts = plan_parts(options.size, client.config().chunk_size)?;
    let body = create_body(credential, &options, &parts).await;
    let created: CreateFileResponse = client
        .dispatcher()
        .call(credential, create_request(client, &body)?)
        .await?;
    let session = UploadSession::from_response(created, parts, &options)?
        .with_completion_hook(evict_parent_hook(client, &options.parent_file_id));
    run_session(client, credential, session, reader).await
}

/// Base create-file body with the part plan attached.
pub(crate) async fn create_body(
    credential: &Arc<Credential>,
    options: &UploadOptions,
    parts: &[PartDescriptor],
) -> CreateFileBody {
    CreateFileBody {
        drive_id: credential.default_drive_id().await,
        parent_file_id: options.parent_file_id.clone(),
        name: options.name.clone(),
        file_type: FileType::File,
        size: Some(options.size),
        part_info_list: to_part_info(parts),
        ..Default::default()
    }
}

pub(crate) fn create_request(client: &DriveClient, body: &CreateFileBody) -> DriveResult<ApiRequest> {
    ApiRequest::post(client.api_endpoint(), "/adrive/v2/file/createWithFolders", body)
}

/// Completion hook that drops cached listings of the destination folder.
pub(crate) fn evict_parent_hook(client: &DriveClient, parent_file_id: &str) -> CompletionHook {
    let cache = Arc::clone(client.cache());
    let parent = parent_file_id.to_string();
    Box::new(move |_file: DriveFile| {
        async move {
            cache.evict_prefix(&parent).await;
        }
        .boxed()
    })
}

/// Upload every part in order, then complete.
pub async fn run_session<R>(
    client: &DriveClient,
    credential: &Arc<Credential>,
    mut session: UploadSession,
    reader: &mut R,
) -> DriveResult<DriveFile>
where
    R: AsyncRead + Unpin + Send,
{
    let total = session.parts.len();
    for part in &session.parts {
        if session.cancel.is_cancelled() {
            return Err(DriveError::cancelled("upload cancelled"));
        }
        let url = part.upload_url.as_deref().ok_or_else(|| {
            DriveError::upload_failed(format!("no upload URL for part {}", part.part_number))
        })?;

        let mut buf = vec![0u8; part.size as usize];
        reader.read_exact(&mut buf).await.map_err(|e| {
            DriveError::new(
                DriveErrorKind::Io,
                format!("failed to read part {} ({} bytes): {}", part.part_number, part.size, e),
            )
        })?;

        let layers = PartLayers {
            progress: session.progress.clone(),
            limiter: client.limiter().cloned(),
            cancel: session.cancel.clone(),
            cancelled: Default::default(),
        };
        debug!("Uploading part {}/{} ({} bytes)", part.part_number, total, part.size);
        let result = client
            .transport()
            .put_part(url, part.size, part_stream(Bytes::from(buf), layers.clone()))
            .await;
        if layers.was_cancelled() {
            return Err(DriveError::cancelled(format!(
                "upload cancelled during part {}",
                part.part_number
            )));
        }
        result?;
    }

    let mut trailing = [0u8; 1];
    let extra = reader.read(&mut trailing).await?;
    if extra > 0 {
        return Err(DriveError::new(
            DriveErrorKind::Io,
            format!(
                "source is longer than the declared {} bytes",
                session.parts.iter().map(|p| p.size).sum::<u64>()
            ),
        ));
    }

    let file = complete_upload(client, credential, &session).await?;
    info!("Upload of {} finished ({} part(s))", file.name, total);
    if let Some(hook) = session.on_complete.take() {
        hook(file.clone()).await;
    }
    Ok(file)
}

async fn complete_upload(
    client: &DriveClient,
    credential: &Arc<Credential>,
    session: &UploadSession,
) -> DriveResult<DriveFile> {
    let drive_id = credential.default_drive_id().await;
    let body = CompleteBody {
        drive_id: &drive_id,
        upload_id: &session.upload_id,
        file_id: &session.file_id,
    };
    let request = ApiRequest::post(client.api_endpoint(), "/v2/file/complete", &body)?;
    let response = client.dispatcher().send(credential, &request).await?;

    if let Some(err) = response.api_error() {
        error!("Completing upload {} failed: {} {}", session.upload_id, err.code, err.message);
        return Err(DriveError {
            kind: DriveErrorKind::UploadFailed,
            message: err.message,
            api_code: Some(err.code),
        });
    }
    let done: CompleteUploadResponse = response.decode()?;
    if done.file.status != FILE_STATUS_AVAILABLE {
        error!(
            "Upload {} completed with status {:?}",
            session.upload_id, done.file.status
        );
        return Err(DriveError::upload_failed(format!(
            "upload completed with status '{}'",
            done.file.status
        )));
    }
    Ok(done.file)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys, CacheValue};
    use crate::config::DriveConfig;
    use crate::testing::{create_response, logged_in, test_client_with, MockTransport};
    use crate::transport::RawResponse;
    use crate::types::FileList;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn upload_handler(req: &ApiRequest) -> DriveResult<RawResponse> {
        match req.path() {
            "/adrive/v2/file/createWithFolders" => {
                let n = req.body.as_ref().unwrap()["part_info_list"].as_array().unwrap().len();
                Ok(RawResponse::json(200, &create_response("f-new", "up-1", n, false)))
            }
            "/v2/file/complete" => Ok(RawResponse::json(
                200,
                &json!({"file_id": "f-new", "name": "a.bin", "status": "available", "upload_id": "up-1"}),
            )),
            other => panic!("unexpected {other}"),
        }
    }

    fn small_chunks() -> DriveConfig {
        DriveConfig {
            chunk_size: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn uploads_parts_in_order_and_completes() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let data = b"0123456789".to_vec();

        let file = upload_file(&client, &cred, UploadOptions::new("root", "a.bin", 10), &mut &data[..])
            .await
            .unwrap();
        assert_eq!(file.file_id, "f-new");

        let parts = mock.parts();
        let urls: Vec<&str> = parts.iter().map(|(u, _)| u.as_str()).collect();
        assert_eq!(urls, vec!["https://upload.test/1", "https://upload.test/2", "https://upload.test/3"]);
        assert_eq!(parts[0].1, b"0123");
        assert_eq!(parts[2].1, b"89");

        let create = &mock.requests()[0];
        let body = create.body.as_ref().unwrap();
        assert_eq!(body["size"], 10);
        assert_eq!(body["drive_id"], "drive-1");
        assert_eq!(body["check_name_mode"], "auto_rename");
        assert!(body.get("pre_hash").is_none());
    }

    #[tokio::test]
    async fn zero_size_uploads_one_empty_part() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let empty: &[u8] = &[];
        upload_file(&client, &cred, UploadOptions::new("root", "e.txt", 0), &mut &empty[..])
            .await
            .unwrap();
        let parts = mock.parts();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].1.is_empty());
    }

    #[tokio::test]
    async fn progress_reports_every_byte() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let seen = Arc::new(AtomicU64::new(0));
        let s = Arc::clone(&seen);
        let opts = UploadOptions::new("root", "a.bin", 10).with_progress(move |n| {
            s.fetch_add(n, Ordering::SeqCst);
            true
        });
        upload_file(&client, &cred, opts, &mut &b"0123456789"[..]).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn progress_false_aborts_before_complete() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let opts = UploadOptions::new("root", "a.bin", 10).with_progress(|_| false);
        let err = upload_file(&client, &cred, opts, &mut &b"0123456789"[..])
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(mock.requests().iter().all(|r| r.path() != "/v2/file/complete"));
    }

    #[tokio::test]
    async fn short_source_fails_with_io_before_send() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let err = upload_file(&client, &cred, UploadOptions::new("root", "a.bin", 10), &mut &b"012345"[..])
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriveErrorKind::Io);
        assert_eq!(mock.parts().len(), 1);
    }

    #[tokio::test]
    async fn long_source_fails_with_io_before_complete() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let err = upload_file(&client, &cred, UploadOptions::new("root", "a.bin", 3), &mut &b"abcdef"[..])
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriveErrorKind::Io);
        assert_eq!(mock.parts().len(), 1);
        assert!(mock.requests().iter().all(|r| r.path() != "/v2/file/complete"));
    }

    #[tokio::test]
    async fn non_available_status_fails() {
        let mock = MockTransport::new(|req| match req.path() {
            "/v2/file/complete" => Ok(RawResponse::json(200, &json!({"file_id": "f-new", "status": "uploading"}))),
            _ => upload_handler(req),
        });
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let err = upload_file(&client, &cred, UploadOptions::new("root", "a.bin", 3), &mut &b"abc"[..])
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriveErrorKind::UploadFailed);
        assert!(err.message.contains("uploading"));
    }

    #[tokio::test]
    async fn complete_api_error_carries_server_message() {
        let mock = MockTransport::new(|req| match req.path() {
            "/v2/file/complete" => Ok(RawResponse::json(
                200,
                &json!({"code": "PartNotSequential", "message": "part 2 missing"}),
            )),
            _ => upload_handler(req),
        });
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let err = upload_file(&client, &cred, UploadOptions::new("root", "a.bin", 3), &mut &b"abc"[..])
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriveErrorKind::UploadFailed);
        assert_eq!(err.message, "part 2 missing");
        assert!(err.has_api_code("PartNotSequential"));
    }

    #[tokio::test]
    async fn success_evicts_parent_listing() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let key = keys::listing("folder-1", "", "updated_at", crate::types::OrderDirection::Desc);
        client.cache().set(key.clone(), CacheValue::Listing(FileList::default())).await;

        upload_file(&client, &cred, UploadOptions::new("folder-1", "a.bin", 3), &mut &b"abc"[..])
            .await
            .unwrap();
        assert!(client.cache().get(&key).await.is_none());
    }

    #[tokio::test]
    async fn rejects_empty_name() {
        let mock = MockTransport::new(upload_handler);
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in(&client).await;
        let err = upload_file(&client, &cred, UploadOptions::new("root", " ", 3), &mut &b"abc"[..])
            .await
            .unwrap_err();
        assert_eq!(err.kind, DriveErrorKind::Validation);
        assert!(mock.requests().is_empty());
    }
}
