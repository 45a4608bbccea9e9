use std::sync::Arc;

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::storage::StorageClient;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Detects the image type from magic bytes.
fn sniff_mime(body: &[u8]) -> Option<&'static str> {
    match body {
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

/// Rejects unsupported types, empty bodies and oversized files; returns the file extension.
pub fn check_upload(item: &UploadItem) -> AppResult<&'static str> {
    let ext = ext_from_mime(&item.content_type).ok_or_else(|| {
        AppError::ImageTypeRejected(format!(
            "unsupported image type '{}': only jpeg, png, gif and webp are allowed",
            item.content_type
        ))
    })?;
    if item.body.is_empty() {
        return Err(AppError::BadRequest("image file is empty".into()));
    }
    if item.body.len() > MAX_IMAGE_BYTES {
        return Err(AppError::ImageTypeRejected(format!(
            "image exceeds the {} MiB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(ext)
}

/// Decodes a `data:image/...;base64,` URI or a bare base64 string into an upload.
pub fn decode_base64_image(input: &str) -> AppResult<UploadItem> {
    let input = input.trim();
    let (declared, payload) = match input.strip_prefix("data:") {
        Some(rest) => {
            let (meta, data) = rest
                .split_once(',')
                .ok_or_else(|| AppError::BadRequest("malformed data uri".into()))?;
            let mime = meta
                .strip_suffix(";base64")
                .ok_or_else(|| AppError::BadRequest("data uri must be base64 encoded".into()))?;
            (Some(mime.to_string()), data)
        }
        None => (None, input),
    };

    let body = STANDARD
        .decode(payload.trim())
        .map_err(|_| AppError::BadRequest("invalid base64 image".into()))?;
    let content_type = match declared {
        Some(mime) => mime,
        None => sniff_mime(&body)
            .map(str::to_string)
            .ok_or_else(|| AppError::ImageTypeRejected("unrecognized image data".into()))?,
    };
    Ok(UploadItem {
        body: Bytes::from(body),
        content_type,
    })
}

/// Uploads every item under `properties/<scope>/`, returning public urls in order.
/// Nothing is left behind if one upload fails.
pub async fn upload_images(
    storage: &Arc<dyn StorageClient>,
    scope: &str,
    items: Vec<UploadItem>,
) -> AppResult<Vec<String>> {
    let mut checked = Vec::with_capacity(items.len());
    for item in items {
        let ext = check_upload(&item)?;
        checked.push((item, ext));
    }

    let mut urls = Vec::with_capacity(checked.len());
    for (item, ext) in checked {
        let key = format!("properties/{}/{}.{}", scope, Uuid::new_v4(), ext);
        let res = storage
            .put_object(&key, item.body, &item.content_type)
            .await
            .with_context(|| format!("put_object {}", key));
        match res {
            Ok(url) => urls.push(url),
            Err(e) => {
                release_images(Arc::clone(storage), urls);
                return Err(AppError::Storage(e));
            }
        }
    }
    Ok(urls)
}

/// Deletes blobs in the background, concurrently. Failures are logged, never returned.
pub fn release_images(storage: Arc<dyn StorageClient>, urls: Vec<String>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut set = JoinSet::new();
        for url in urls {
            let storage = Arc::clone(&storage);
            set.spawn(async move {
                let res = storage.delete_object(&url).await;
                (url, res)
            });
        }

        let mut released = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((url, Ok(()))) => {
                    info!(%url, "image released");
                    released += 1;
                }
                Ok((url, Err(e))) => warn!(%url, error = %e, "image release failed"),
                Err(e) => warn!(error = %e, "image release task failed"),
            }
        }
        released
    })
}
