//! Rapid (content-addressed) upload.
//!
//! Stage 1 sends a SHA-1 of the first KiB. If the service reports
//! `PreHashMatched`, stage 2 proves possession with the full SHA-1 plus an
//! 8-byte sample whose offset is derived from the access token. Only a
//! genuine miss transfers bytes, through the chunked upload path.

use std::io::SeekFrom;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info};
use md5::Md5;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::client::DriveClient;
use crate::credential::Credential;
use crate::error::{DriveError, DriveResult};
use crate::files;
use crate::parts::{plan_parts, PartDescriptor};
use crate::types::{CreateFileBody, CreateFileResponse, DriveFile, CODE_PRE_HASH_MATCHED};
use crate::uploads::{
    create_body, create_request, evict_parent_hook, run_session, upload_file, UploadOptions,
    UploadSession,
};

/// Bytes hashed for the stage-1 probe.
pub const PRE_HASH_SIZE: usize = 1024;
/// Maximum sample length for the proof code.
pub const PROOF_SAMPLE_SIZE: u64 = 8;

const HASH_BUF_SIZE: usize = 256 * 1024;

// ── Hashing ──────────────────────────────────────────────────────

/// Lowercase hex SHA-1 of the first 1024 bytes (fewer if the file is shorter).
pub async fn compute_pre_hash<R>(reader: &mut R) -> DriveResult<String>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    reader.seek(SeekFrom::Start(0)).await?;
    let mut buf = vec![0u8; PRE_HASH_SIZE];
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(hex::encode(Sha1::digest(&buf[..filled])))
}

/// Uppercase hex SHA-1 of the whole stream. Fails if it is not exactly
/// `size` bytes long.
pub async fn compute_content_hash<R>(reader: &mut R, size: u64) -> DriveResult<String>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    reader.seek(SeekFrom::Start(0)).await?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    if total != size {
        return Err(DriveError::new(
            crate::error::DriveErrorKind::Io,
            format!("source has {} bytes, expected {}", total, size),
        ));
    }
    Ok(hex::encode_upper(hasher.finalize()))
}

/// Sample window `(start, len)`: the first 16 hex digits of MD5(token) as an
/// integer, modulo `size`; at most 8 bytes, clipped to the end of the file.
pub fn proof_offset(access_token: &str, size: u64) -> (u64, u64) {
    if size == 0 {
        return (0, 0);
    }
    let digest = hex::encode(Md5::digest(access_token.as_bytes()));
    // 16 hex digits always fit in a u64.
    let value = u64::from_str_radix(&digest[..16], 16).unwrap_or(0);
    let start = value % size;
    (start, PROOF_SAMPLE_SIZE.min(size - start))
}

/// Base64 of the sample chosen by [`proof_offset`].
pub async fn compute_proof_code<R>(reader: &mut R, access_token: &str, size: u64) -> DriveResult<String>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let (start, len) = proof_offset(access_token, size);
    reader.seek(SeekFrom::Start(start)).await?;
    let mut sample = vec![0u8; len as usize];
    reader.read_exact(&mut sample).await?;
    Ok(STANDARD.encode(&sample))
}

// ── Upload ───────────────────────────────────────────────────────

/// Upload `reader`, skipping the transfer when the service already holds
/// identical content.
pub async fn upload_file_rapid<R>(
    client: &DriveClient,
    credential: &Arc<Credential>,
    options: UploadOptions,
    reader: &mut R,
) -> DriveResult<DriveFile>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    options.validate()?;
    if options.size == 0 {
        return upload_file(client, credential, options, reader).await;
    }

    let parts = plan_parts(options.size, client.config().chunk_size)?;
    let mut body = create_body(credential, &options, &parts).await;
    body.pre_hash = Some(compute_pre_hash(reader).await?);

    let request = create_request(client, &body)?;
    let response = client.dispatcher().send(credential, &request).await?;
    let created: CreateFileResponse = match response.api_error() {
        Some(err) if err.code == CODE_PRE_HASH_MATCHED => {
            debug!("Pre-hash matched for {}, sending content proof", options.name);
            return prove_and_upload(client, credential, options, parts, body, reader).await;
        }
        Some(err) => return Err(err.into()),
        None => response.decode()?,
    };

    if created.rapid_upload {
        return finish_rapid(client, credential, &options, &created).await;
    }
    upload_remaining(client, credential, options, parts, created, reader).await
}

async fn prove_and_upload<R>(
    client: &DriveClient,
    credential: &Arc<Credential>,
    options: UploadOptions,
    parts: Vec<PartDescriptor>,
    mut body: CreateFileBody,
    reader: &mut R,
) -> DriveResult<DriveFile>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    let token = credential.access_token().await;
    body.pre_hash = None;
    body.content_hash = Some(compute_content_hash(reader, options.size).await?);
    body.content_hash_name = Some("sha1".to_string());
    body.proof_code = Some(compute_proof_code(reader, &token, options.size).await?);
    body.proof_version = Some("v1".to_string());

    let created: CreateFileResponse = client
        .dispatcher()
        .call(credential, create_request(client, &body)?)
        .await?;
    if created.rapid_upload {
        return finish_rapid(client, credential, &options, &created).await;
    }
    debug!("Content proof for {} did not match, uploading", options.name);
    upload_remaining(client, credential, options, parts, created, reader).await
}

async fn finish_rapid(
    client: &DriveClient,
    credential: &Arc<Credential>,
    options: &UploadOptions,
    created: &CreateFileResponse,
) -> DriveResult<DriveFile> {
    let file = files::get_file(client, credential, &created.file_id).await?;
    evict_parent_hook(client, &options.parent_file_id)(file.clone()).await;
    info!("Rapid upload of {} matched existing content", file.name);
    Ok(file)
}

async fn upload_remaining<R>(
    client: &DriveClient,
    credential: &Arc<Credential>,
    options: UploadOptions,
    parts: Vec<PartDescriptor>,
    created: CreateFileResponse,
    reader: &mut R,
) -> DriveResult<DriveFile>
where
    R: AsyncRead + AsyncSeek + Unpin + Send,
{
    reader.seek(SeekFrom::Start(0)).await?;
    let session = UploadSession::from_response(created, parts, &options)?
        .with_completion_hook(evict_parent_hook(client, &options.parent_file_id));
    run_session(client, credential, session, reader).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriveConfig;
    use crate::error::DriveErrorKind;
    use crate::testing::{create_response, logged_in_with_token, test_client_with, MockTransport};
    use crate::transport::{ApiRequest, RawResponse};
    use serde_json::json;
    use std::io::Cursor;

    fn sample_data() -> Vec<u8> {
        (0..5000u32).map(|i| ((i * 7) % 256) as u8).collect()
    }

    #[tokio::test]
    async fn pre_hash_covers_first_kib() {
        let mut r = Cursor::new(sample_data());
        assert_eq!(
            compute_pre_hash(&mut r).await.unwrap(),
            "64cac4c1a5d413c9431a0c165feebc47beec2809"
        );
    }

    #[tokio::test]
    async fn pre_hash_of_short_file_uses_all_bytes() {
        let mut r = Cursor::new(b"hello world".to_vec());
        assert_eq!(
            compute_pre_hash(&mut r).await.unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[tokio::test]
    async fn content_hash_is_uppercase_sha1() {
        let mut r = Cursor::new(sample_data());
        assert_eq!(
            compute_content_hash(&mut r, 5000).await.unwrap(),
            "DAF3880D2A5190735A0B37924DC3D98969008723"
        );
    }

    #[tokio::test]
    async fn content_hash_rejects_size_mismatch() {
        let mut r = Cursor::new(sample_data());
        let err = compute_content_hash(&mut r, 6000).await.unwrap_err();
        assert_eq!(err.kind, DriveErrorKind::Io);
    }

    #[test]
    fn proof_offset_matches_reference() {
        assert_eq!(proof_offset("at-rapid", 5000), (1536, 8));
        assert_eq!(proof_offset("at-rapid", 10), (6, 4));
        assert_eq!(proof_offset("anything", 1), (0, 1));
    }

    #[tokio::test]
    async fn proof_code_matches_reference() {
        let mut r = Cursor::new(sample_data());
        assert_eq!(
            compute_proof_code(&mut r, "at-rapid", 5000).await.unwrap(),
            "AAcOFRwjKjE="
        );
        let mut r = Cursor::new(b"abcdefghij".to_vec());
        assert_eq!(compute_proof_code(&mut r, "at-rapid", 10).await.unwrap(), "Z2hpag==");
    }

    fn small_chunks() -> DriveConfig {
        DriveConfig {
            chunk_size: 2048,
            ..Default::default()
        }
    }

    fn is_create(req: &ApiRequest) -> bool {
        req.path() == "/adrive/v2/file/createWithFolders"
    }

    #[tokio::test]
    async fn full_match_transfers_nothing() {
        let mock = MockTransport::new(|req| {
            if is_create(req) {
                let body = req.body.as_ref().unwrap();
                if body.get("pre_hash").is_some() {
                    return Ok(RawResponse::json(
                        400,
                        &json!({"code": "PreHashMatched", "message": "pre hash matched"}),
                    ));
                }
                assert_eq!(body["content_hash"], "DAF3880D2A5190735A0B37924DC3D98969008723");
                assert_eq!(body["content_hash_name"], "sha1");
                assert_eq!(body["proof_code"], "AAcOFRwjKjE=");
                assert_eq!(body["proof_version"], "v1");
                return Ok(RawResponse::json(200, &create_response("f-dup", "", 0, true)));
            }
            assert_eq!(req.path(), "/v2/file/get");
            Ok(RawResponse::json(200, &json!({"file_id": "f-dup", "name": "big.bin", "status": "available"})))
        });
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in_with_token(&client, "at-rapid").await;

        let file = upload_file_rapid(
            &client,
            &cred,
            UploadOptions::new("root", "big.bin", 5000),
            &mut Cursor::new(sample_data()),
        )
        .await
        .unwrap();
        assert_eq!(file.file_id, "f-dup");
        assert!(mock.parts().is_empty());
        let paths: Vec<String> = mock.requests().iter().map(|r| r.path().to_string()).collect();
        assert_eq!(
            paths,
            vec!["/adrive/v2/file/createWithFolders", "/adrive/v2/file/createWithFolders", "/v2/file/get"]
        );
    }

    #[tokio::test]
    async fn pre_hash_miss_uploads_returned_parts() {
        let mock = MockTransport::new(|req| {
            if is_create(req) {
                assert!(req.body.as_ref().unwrap().get("content_hash").is_none());
                return Ok(RawResponse::json(200, &create_response("f-new", "up-1", 3, false)));
            }
            assert_eq!(req.path(), "/v2/file/complete");
            Ok(RawResponse::json(200, &json!({"file_id": "f-new", "status": "available"})))
        });
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in_with_token(&client, "at-rapid").await;
        let data = sample_data();

        upload_file_rapid(&client, &cred, UploadOptions::new("root", "big.bin", 5000), &mut Cursor::new(data.clone()))
            .await
            .unwrap();
        let parts = mock.parts();
        assert_eq!(parts.len(), 3);
        let sent: Vec<u8> = parts.into_iter().flat_map(|(_, b)| b).collect();
        assert_eq!(sent, data);
    }

    #[tokio::test]
    async fn proof_mismatch_falls_back_to_stage_two_parts() {
        let mock = MockTransport::new(|req| {
            if is_create(req) {
                let body = req.body.as_ref().unwrap();
                if body.get("pre_hash").is_some() {
                    return Ok(RawResponse::json(400, &json!({"code": "PreHashMatched", "message": "m"})));
                }
                let mut resp = create_response("f-2", "up-2", 3, false);
                resp["part_info_list"][0]["upload_url"] = json!("https://stage2.test/1");
                return Ok(RawResponse::json(200, &resp));
            }
            Ok(RawResponse::json(200, &json!({"file_id": "f-2", "status": "available"})))
        });
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in_with_token(&client, "at-rapid").await;

        let file = upload_file_rapid(
            &client,
            &cred,
            UploadOptions::new("root", "big.bin", 5000),
            &mut Cursor::new(sample_data()),
        )
        .await
        .unwrap();
        assert_eq!(file.file_id, "f-2");
        assert_eq!(mock.parts()[0].0, "https://stage2.test/1");
    }

    #[tokio::test]
    async fn other_stage_one_error_aborts() {
        let mock = MockTransport::new(|_| {
            Ok(RawResponse::json(400, &json!({"code": "QuotaExhausted.Drive", "message": "full"})))
        });
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in_with_token(&client, "at-rapid").await;
        let err = upload_file_rapid(
            &client,
            &cred,
            UploadOptions::new("root", "big.bin", 5000),
            &mut Cursor::new(sample_data()),
        )
        .await
        .unwrap_err();
        assert!(err.has_api_code("QuotaExhausted.Drive"));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn zero_size_skips_pre_hash() {
        let mock = MockTransport::new(|req| {
            if is_create(req) {
                assert!(req.body.as_ref().unwrap().get("pre_hash").is_none());
                return Ok(RawResponse::json(200, &create_response("f-0", "up-0", 1, false)));
            }
            Ok(RawResponse::json(200, &json!({"file_id": "f-0", "status": "available"})))
        });
        let client = test_client_with(&mock, small_chunks()).await;
        let cred = logged_in_with_token(&client, "at-rapid").await;
        upload_file_rapid(&client, &cred, UploadOptions::new("root", "empty", 0), &mut Cursor::new(Vec::new()))
            .await
            .unwrap();
        assert_eq!(mock.parts().len(), 1);
    }
}
