//! File reads (cached) and mutations (with cache eviction).

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;

use crate::cache::{keys, CacheValue};
use crate::client::DriveClient;
use crate::credential::Credential;
use crate::error::{DriveError, DriveResult};
use crate::transport::ApiRequest;
use crate::types::{
    CheckNameMode, DownloadUrl, DriveFile, FileList, FolderFilesOptions, PathResponse,
    DOWNLOAD_REFERER, DOWNLOAD_URL_EXPIRE_SECS, IMAGE_THUMBNAIL_PROCESS, IMAGE_URL_PROCESS,
    SEARCH_ORDER_DEFAULT, VIDEO_THUMBNAIL_PROCESS,
};

const PAGE_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
struct ListBody<'a> {
    drive_id: &'a str,
    parent_file_id: &'a str,
    limit: u32,
    marker: &'a str,
    order_by: &'a str,
    order_direction: &'a str,
    fields: &'a str,
    image_thumbnail_process: &'a str,
    image_url_process: &'a str,
    video_thumbnail_process: &'a str,
}

#[derive(Debug, Serialize)]
struct FileRef<'a> {
    drive_id: &'a str,
    file_id: &'a str,
}

// ── Reads ────────────────────────────────────────────────────────

/// One listing page. Hits are served from the cache; a fresh page also
/// seeds a file entry for each item.
pub async fn get_folder_files(
    client: &DriveClient,
    credential: &Arc<Credential>,
    options: &FolderFilesOptions,
) -> DriveResult<FileList> {
    let cache = client.cache();
    let key = keys::listing(
        &options.folder_file_id,
        &options.marker,
        &options.order_by,
        options.order_direction,
    );
    if let Some(hit) = cache.get_listing(&key).await {
        return Ok(hit);
    }

    let epoch = cache.epoch();
    let drive_id = credential.default_drive_id().await;
    let body = ListBody {
        drive_id: &drive_id,
        parent_file_id: &options.folder_file_id,
        limit: if options.limit == 0 { PAGE_LIMIT } else { options.limit },
        marker: &options.marker,
        order_by: &options.order_by,
        order_direction: options.order_direction.as_str(),
        fields: "*",
        image_thumbnail_process: IMAGE_THUMBNAIL_PROCESS,
        image_url_process: IMAGE_URL_PROCESS,
        video_thumbnail_process: VIDEO_THUMBNAIL_PROCESS,
    };
    let request = ApiRequest::post(client.api_endpoint(), "/v2/file/list", &body)?;
    let list: FileList = client.dispatcher().call(credential, request).await?;

    if cache
        .set_if_unchanged(key, CacheValue::Listing(list.clone()), epoch)
        .await
    {
        for item in &list.items {
            cache
                .set_if_unchanged(keys::file(&item.file_id), CacheValue::File(item.clone()), epoch)
                .await;
        }
    }
    Ok(list)
}

pub async fn get_file(
    client: &DriveClient,
    credential: &Arc<Credential>,
    file_id: &str,
) -> DriveResult<DriveFile> {
    let cache = client.cache();
    if let Some(hit) = cache.get_file(file_id).await {
        return Ok(hit);
    }
    let epoch = cache.epoch();
    let drive_id = credential.default_drive_id().await;
    let body = FileRef {
        drive_id: &drive_id,
        file_id,
    };
    let request = ApiRequest::post(client.api_endpoint(), "/v2/file/get", &body)?;
    let file: DriveFile = client.dispatcher().call(credential, request).await?;
    cache
        .set_if_unchanged(keys::file(file_id), CacheValue::File(file.clone()), epoch)
        .await;
    Ok(file)
}

/// Download link for a file. Cached links are reused only while they have
/// more than an hour of validity left.
pub async fn get_download_url(
    client: &DriveClient,
    credential: &Arc<Credential>,
    file_id: &str,
) -> DriveResult<DownloadUrl> {
    let cache = client.cache();
    if let Some(hit) = cache.get_download_url(file_id).await {
        return Ok(hit);
    }
    let epoch = cache.epoch();
    let drive_id = credential.default_drive_id().await;
    let body = serde_json::json!({
        "drive_id": drive_id,
        "file_id": file_id,
        "expire_sec": DOWNLOAD_URL_EXPIRE_SECS,
    });
    let request = ApiRequest::post(client.api_endpoint(), "/v2/file/get_download_url", &body)?;
    let url: DownloadUrl = client.dispatcher().call(credential, request).await?;
    cache
        .set_if_unchanged(keys::download_url(file_id), CacheValue::DownloadUrl(url.clone()), epoch)
        .await;
    Ok(url)
}

/// Turn `start-end` into `start-` when `end` runs past the file. Other
/// shapes pass through untouched.
pub fn normalize_range(range: &str, size: u64) -> String {
    let range = range.trim().trim_start_matches("bytes=");
    if let Some((start, end)) = range.split_once('-') {
        if let Ok(end) = end.trim().parse::<u64>() {
            if end >= size {
                return format!("{}-", start.trim());
            }
        }
    }
    range.to_string()
}

/// Fetch file content, optionally a byte range such as `"0-1023"`.
pub async fn download(
    client: &DriveClient,
    credential: &Arc<Credential>,
    file_id: &str,
    range: Option<&str>,
) -> DriveResult<Vec<u8>> {
    let link = get_download_url(client, credential, file_id).await?;
    if link.url.is_empty() {
        return Err(DriveError::api("InvalidResponse", "empty download url"));
    }
    let mut headers = BTreeMap::new();
    headers.insert("referer".to_string(), DOWNLOAD_REFERER.to_string());
    if let Some(r) = range.filter(|r| !r.trim().is_empty()) {
        let size = if link.size > 0 {
            link.size
        } else {
            get_file(client, credential, file_id).await?.size
        };
        headers.insert("range".to_string(), format!("bytes={}", normalize_range(r, size)));
    }
    debug!("Downloading {} (range {:?})", file_id, headers.get("range"));
    client.transport().fetch(&link.url, &headers).await
}

/// Backslash-escape `quote` and backslashes inside a query literal.
fn escape(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == quote || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

async fn run_search(
    client: &DriveClient,
    credential: &Arc<Credential>,
    query: String,
    marker: &str,
) -> DriveResult<FileList> {
    let drive_id = credential.default_drive_id().await;
    let body = serde_json::json!({
        "drive_id": drive_id,
        "limit": PAGE_LIMIT,
        "query": query,
        "marker": marker,
        "order_by": SEARCH_ORDER_DEFAULT,
        "image_thumbnail_process": IMAGE_THUMBNAIL_PROCESS,
        "image_url_process": IMAGE_URL_PROCESS,
        "video_thumbnail_process": VIDEO_THUMBNAIL_PROCESS,
    });
    let request = ApiRequest::post(client.api_endpoint(), "/v2/file/search", &body)?;
    client.dispatcher().call(credential, request).await
}

/// Drive-wide name search. Not cached.
pub async fn search(
    client: &DriveClient,
    credential: &Arc<Credential>,
    keyword: &str,
    marker: &str,
) -> DriveResult<FileList> {
    run_search(client, credential, format!("name match '{}'", escape(keyword, '\'')), marker).await
}

/// Exact-name lookup inside one folder.
pub async fn search_name_in_folder(
    client: &DriveClient,
    credential: &Arc<Credential>,
    name: &str,
    parent_file_id: &str,
) -> DriveResult<FileList> {
    let query = format!(
        "parent_file_id = \"{}\" and (name = \"{}\")",
        escape(parent_file_id, '"'),
        escape(name, '"')
    );
    run_search(client, credential, query, "").await
}

/// Ancestors of `file_id`, nearest first, starting with the file itself.
pub async fn get_path(
    client: &DriveClient,
    credential: &Arc<Credential>,
    file_id: &str,
) -> DriveResult<Vec<DriveFile>> {
    let drive_id = credential.default_drive_id().await;
    let body = FileRef {
        drive_id: &drive_id,
        file_id,
    };
    let request = ApiRequest::post(client.api_endpoint(), "/adrive/v1/file/get_path", &body)?;
    let resp: PathResponse = client.dispatcher().call(credential, request).await?;
    Ok(resp.items)
}

// ── Mutations ────────────────────────────────────────────────────

/// Drop cached listings of `parents` and everything keyed by `file_id`.
/// Empty parent ids are skipped; an empty prefix would clear the cache.
async fn evict_after_mutation(client: &DriveClient, file_id: &str, parents: &[&str]) {
    let cache = client.cache();
    for parent in parents.iter().filter(|p| !p.is_empty()) {
        cache.evict_prefix(parent).await;
    }
    cache.evict_prefix(file_id).await;
}

pub async fn rename_file(
    client: &DriveClient,
    credential: &Arc<Credential>,
    file_id: &str,
    new_name: &str,
) -> DriveResult<DriveFile> {
    if new_name.trim().is_empty() || new_name.contains('/') {
        return Err(DriveError::invalid(format!("invalid file name {:?}", new_name)));
    }
    let drive_id = credential.default_drive_id().await;
    let body = serde_json::json!({
        "drive_id": drive_id,
        "file_id": file_id,
        "name": new_name,
        "check_name_mode": CheckNameMode::Refuse,
    });
    let request = ApiRequest::post(client.api_endpoint(), "/v2/file/update", &body)?;
    let file: DriveFile = client.dispatcher().call(credential, request).await?;

    let parent = if file.parent_file_id.is_empty() {
        match get_file(client, credential, file_id).await {
            Ok(known) => known.parent_file_id,
            Err(e) => {
                warn!("Renamed {} but could not look up its parent: {}", file_id, e);
                String::new()
            }
        }
    } else {
        file.parent_file_id.clone()
    };
    evict_after_mutation(client, file_id, &[parent.as_str()]).await;
    Ok(file)
}

pub async fn move_file(
    client: &DriveClient,
    credential: &Arc<Credential>,
    file_id: &str,
    to_parent_file_id: &str,
) -> DriveResult<()> {
    let old = get_file(client, credential, file_id).await?;
    let drive_id = credential.default_drive_id().await;
    let body = serde_json::json!({
        "drive_id": drive_id,
        "file_id": file_id,
        "to_drive_id": drive_id,
        "to_parent_file_id": to_parent_file_id,
    });
    let request = ApiRequest::post(client.api_endpoint(), "/v2/file/move", &body)?;
    let _: serde_json::Value = client.dispatcher().call(credential, request).await?;

    evict_after_mutation(client, file_id, &[old.parent_file_id.as_str(), to_parent_file_id]).await;
    Ok(())
}

/// Move a file to the recycle bin.
pub async fn remove_file(
    client: &DriveClient,
    credential: &Arc<Credential>,
    file_id: &str,
) -> DriveResult<()> {
    let old = get_file(client, credential, file_id).await?;
    let drive_id = credential.default_drive_id().await;
    let body = FileRef {
        drive_id: &drive_id,
        file_id,
    };
    let request = ApiRequest::post(client.api_endpoint(), "/v2/recyclebin/trash", &body)?;
    let _: serde_json::Value = client.dispatcher().call(credential, request).await?;

    evict_after_mutation(client, file_id, &[old.parent_file_id.as_str()]).await;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
