//! Path resolution and folder creation.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::client::DriveClient;
use crate::credential::Credential;
use crate::error::{DriveError, DriveResult};
use crate::files;
use crate::transport::ApiRequest;
use crate::types::{
    CheckNameMode, CreateFileBody, CreateFileResponse, DriveFile, FileType, FolderFilesOptions,
    OrderDirection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathOutcome {
    /// Every component was found.
    Full,
    /// Resolution stopped at the first missing component.
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    /// Id of the deepest component that exists.
    pub file_id: String,
    /// Normalized path of that component, e.g. `/a/b`.
    pub resolved: String,
    pub outcome: PathOutcome,
}

impl ResolvedPath {
    pub fn is_full(&self) -> bool {
        self.outcome == PathOutcome::Full
    }
}

/// Split a path into components, dropping empty and `.` segments and
/// applying `..`. Climbing above the root stays at the root.
pub fn normalize_components(path: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s.to_string()),
        }
    }
    out
}

fn join(components: &[String]) -> String {
    format!("/{}", components.join("/"))
}

/// Walk `path` from the credential's root folder.
pub async fn resolve_path(
    client: &DriveClient,
    credential: &Arc<Credential>,
    path: &str,
) -> DriveResult<ResolvedPath> {
    resolve(client, credential, path, false).await
}

/// Like [`resolve_path`], but every component, the last one included, must
/// be a folder.
pub async fn resolve_folder(
    client: &DriveClient,
    credential: &Arc<Credential>,
    path: &str,
) -> DriveResult<ResolvedPath> {
    resolve(client, credential, path, true).await
}

async fn resolve(
    client: &DriveClient,
    credential: &Arc<Credential>,
    path: &str,
    last_is_folder: bool,
) -> DriveResult<ResolvedPath> {
    let components = normalize_components(path);
    let mut current = credential.root_folder().await;

    for (i, name) in components.iter().enumerate() {
        let folder_only = last_is_folder || i + 1 < components.len();
        match find_child(client, credential, &current, name, folder_only).await? {
            Some(child) => current = child.file_id,
            None => {
                debug!("Path {:?} resolved up to {:?}", path, join(&components[..i]));
                return Ok(ResolvedPath {
                    file_id: current,
                    resolved: join(&components[..i]),
                    outcome: PathOutcome::Partial,
                });
            }
        }
    }

    Ok(ResolvedPath {
        file_id: current,
        resolved: join(&components),
        outcome: PathOutcome::Full,
    })
}

/// Scan listing pages (newest first) for `name` under `parent`.
async fn find_child(
    client: &DriveClient,
    credential: &Arc<Credential>,
    parent: &str,
    name: &str,
    folder_only: bool,
) -> DriveResult<Option<DriveFile>> {
    let mut options = FolderFilesOptions {
        folder_file_id: parent.to_string(),
        order_by: "updated_at".to_string(),
        order_direction: OrderDirection::Desc,
        ..Default::default()
    };
    loop {
        let page = files::get_folder_files(client, credential, &options).await?;
        let found = page
            .items
            .iter()
            .find(|f| f.name == name && (!folder_only || f.is_folder()))
            .cloned();
        if found.is_some() {
            return Ok(found);
        }
        if !page.has_more() {
            return Ok(None);
        }
        options.marker = page.next_marker;
    }
}

/// Create folder `name` under `parent_file_id`.
pub async fn mkdir(
    client: &DriveClient,
    credential: &Arc<Credential>,
    parent_file_id: &str,
    name: &str,
) -> DriveResult<DriveFile> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(DriveError::invalid(format!("invalid folder name {:?}", name)));
    }
    let drive_id = credential.default_drive_id().await;
    let body = CreateFileBody {
        drive_id: drive_id.clone(),
        parent_file_id: parent_file_id.to_string(),
        name: name.to_string(),
        file_type: FileType::Folder,
        check_name_mode: CheckNameMode::Refuse,
        ..Default::default()
    };
    let request = ApiRequest::post(client.api_endpoint(), "/adrive/v2/file/createWithFolders", &body)?;
    let created: CreateFileResponse = client.dispatcher().call(credential, request).await?;
    client.cache().evict_prefix(parent_file_id).await;

    Ok(DriveFile {
        drive_id: if created.drive_id.is_empty() { drive_id } else { created.drive_id },
        file_id: created.file_id,
        parent_file_id: if created.parent_file_id.is_empty() {
            parent_file_id.to_string()
        } else {
            created.parent_file_id
        },
        name: if created.file_name.is_empty() { name.to_string() } else { created.file_name },
        file_type: FileType::Folder,
        ..Default::default()
    })
}

/// Ensure every component of `path` exists. Returns the final folder id.
pub async fn mkdir_all(
    client: &DriveClient,
    credential: &Arc<Credential>,
    path: &str,
) -> DriveResult<String> {
    let resolved = resolve_folder(client, credential, path).await?;
    if resolved.is_full() {
        return Ok(resolved.file_id);
    }
    let components = normalize_components(path);
    let matched = normalize_components(&resolved.resolved).len();
    let mut parent = resolved.file_id;
    for name in &components[matched..] {
        parent = mkdir(client, credential, &parent, name).await?.file_id;
    }
    Ok(parent)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
