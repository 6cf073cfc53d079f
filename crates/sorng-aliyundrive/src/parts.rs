//! Splitting a file into upload parts.

use serde::{Deserialize, Serialize};

use crate::error::{DriveError, DriveResult};
use crate::types::PartInfo;

/// One contiguous byte range of the file. `end_offset` is inclusive; a
/// zero-size part is `0..=0` with `size == 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartDescriptor {
    pub part_number: u32,
    pub start_offset: u64,
    pub end_offset: u64,
    pub size: u64,
    pub upload_url: Option<String>,
}

/// Plan parts in ascending order. Every part but the last is exactly
/// `chunk_size` bytes; size 0 yields a single empty part.
pub fn plan_parts(size: u64, chunk_size: u64) -> DriveResult<Vec<PartDescriptor>> {
    if chunk_size == 0 {
        return Err(DriveError::invalid("chunk size must be positive"));
    }
    if size == 0 {
        return Ok(vec![PartDescriptor {
            part_number: 1,
            start_offset: 0,
            end_offset: 0,
            size: 0,
            upload_url: None,
        }]);
    }

    let count = size.div_ceil(chunk_size);
    let count = u32::try_from(count)
        .map_err(|_| DriveError::invalid(format!("too many parts ({count}) for chunk size {chunk_size}")))?;

    let mut parts = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for n in 1..=count {
        let len = chunk_size.min(size - offset);
        parts.push(PartDescriptor {
            part_number: n,
            start_offset: offset,
            end_offset: offset + len - 1,
            size: len,
            upload_url: None,
        });
        offset += len;
    }
    Ok(parts)
}

/// Wire form sent with a create-file request.
pub fn to_part_info(parts: &[PartDescriptor]) -> Vec<PartInfo> {
    parts
        .iter()
        .map(|p| PartInfo {
            part_number: p.part_number,
            ..Default::default()
        })
        .collect()
}

/// Copy server-issued upload URLs onto the plan, matching by part number.
pub fn attach_upload_urls(parts: &mut [PartDescriptor], infos: &[PartInfo]) -> DriveResult<()> {
    for part in parts.iter_mut() {
        let url = infos
            .iter()
            .find(|i| i.part_number == part.part_number)
            .and_then(|i| i.upload_url.clone())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                DriveError::upload_failed(format!("no upload URL for part {}", part.part_number))
            })?;
        part.upload_url = Some(url);
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
