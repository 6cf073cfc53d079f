//! Core types for the Aliyun Drive integration.
//!
//! Wire types use the service's snake_case JSON naming. Every field that the
//! service may omit is `#[serde(default)]` so partial payloads still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Constants
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Default API endpoint.
pub const API_ENDPOINT: &str = "https://api.aliyundrive.com";
/// Token endpoint host.
pub const AUTH_ENDPOINT: &str = "https://auth.aliyundrive.com";
/// Referer required by download URLs issued to web refresh tokens.
pub const DOWNLOAD_REFERER: &str = "https://www.aliyundrive.com/";

/// Root folder id used when a credential does not name one.
pub const DEFAULT_ROOT_FILE_ID: &str = "root";

/// Application code that triggers the single auth-retry.
pub const CODE_ACCESS_TOKEN_INVALID: &str = "AccessTokenInvalid";
/// Application code signalling a pre-hash candidate match.
pub const CODE_PRE_HASH_MATCHED: &str = "PreHashMatched";

/// Status of a file whose upload has been merged server-side.
pub const FILE_STATUS_AVAILABLE: &str = "available";

pub const IMAGE_THUMBNAIL_PROCESS: &str = "image/resize,w_400/format,jpeg";
pub const IMAGE_URL_PROCESS: &str = "image/resize,w_1920/format,jpeg";
pub const VIDEO_THUMBNAIL_PROCESS: &str = "video/snapshot,t_0,f_jpg,ar_auto,w_300";
pub const SEARCH_ORDER_DEFAULT: &str = "type ASC,updated_at DESC";

/// Download links are requested with a 4 hour lifetime.
pub const DOWNLOAD_URL_EXPIRE_SECS: u64 = 14_400;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    #[default]
    File,
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckNameMode {
    #[default]
    AutoRename,
    Refuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// File or folder metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DriveFile {
    pub drive_id: String,
    pub file_id: String,
    pub parent_file_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub status: String,
    pub size: u64,
    pub hidden: bool,
    pub starred: bool,
    pub encrypt_mode: String,
    pub category: Option<String>,
    pub content_hash: Option<String>,
    pub content_hash_name: Option<String>,
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub file_extension: Option<String>,
    pub download_url: Option<String>,
    pub thumbnail: Option<String>,
    pub url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.file_type == FileType::Folder
    }
}

/// One page of a folder listing or search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileList {
    pub items: Vec<DriveFile>,
    /// Empty when there are no further pages.
    pub next_marker: String,
}

impl FileList {
    pub fn has_more(&self) -> bool {
        !self.next_marker.is_empty()
    }
}

/// Options for a single folder-listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFilesOptions {
    pub folder_file_id: String,
    pub order_by: String,
    pub order_direction: OrderDirection,
    pub marker: String,
    pub limit: u32,
}

impl FolderFilesOptions {
    pub fn new(folder_file_id: impl Into<String>) -> Self {
        Self {
            folder_file_id: folder_file_id.into(),
            ..Default::default()
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }
}

impl Default for FolderFilesOptions {
    fn default() -> Self {
        Self {
            folder_file_id: DEFAULT_ROOT_FILE_ID.to_string(),
            order_by: "updated_at".to_string(),
            order_direction: OrderDirection::Desc,
            marker: String::new(),
            limit: 100,
        }
    }
}

/// A resolved, time-limited download link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DownloadUrl {
    pub url: String,
    pub method: String,
    pub size: u64,
    pub expiration: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Account
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Raw JSON response from the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
    pub user_id: String,
    pub user_name: String,
    pub nick_name: String,
    pub default_drive_id: String,
    pub default_sbox_drive_id: String,
    pub expire_time: Option<DateTime<Utc>>,
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserInfo {
    pub domain_id: String,
    pub user_id: String,
    pub user_name: String,
    pub nick_name: String,
    pub avatar: String,
    pub email: String,
    pub phone: String,
    pub role: String,
    pub status: String,
    pub description: String,
    pub default_drive_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Uploads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Part entry as exchanged with the create-file endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartInfo {
    pub part_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internal_upload_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Body of `createWithFolders`. Stage-1 probes fill `pre_hash`; stage-2
/// proofs fill `content_hash` + `proof_code`.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CreateFileBody {
    pub drive_id: String,
    pub parent_file_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub check_name_mode: CheckNameMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub part_info_list: Vec<PartInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CreateFileResponse {
    pub drive_id: String,
    pub file_id: String,
    pub file_name: String,
    pub parent_file_id: String,
    pub upload_id: String,
    pub rapid_upload: bool,
    pub exist: bool,
    pub location: String,
    pub encrypt_mode: String,
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub part_info_list: Vec<PartInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CompleteUploadResponse {
    #[serde(flatten)]
    pub file: DriveFile,
    pub upload_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PathResponse {
    pub items: Vec<DriveFile>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
