//! Reconciles the image list of a property.
//!
//! Merge policy: when the client sends a keep-list it is authoritative and replaces
//! the stored list; without one the stored list is kept as is. New uploads are
//! appended after that base list. Stored images that do not survive are reported in
//! [`ImageSet::removed`] so their blobs can be released.

use serde_json::Value;

use crate::error::{AppError, AppResult, ValidationErrors};
use crate::properties::repo_types::PropertyImage;

pub const MAX_IMAGES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub images: Vec<PropertyImage>,
    pub removed: Vec<String>,
}

fn empty_url() -> AppError {
    let mut errors = ValidationErrors::new();
    errors.add("images", "image url cannot be empty");
    AppError::Validation(errors)
}

fn entry_from_value(v: &Value) -> AppResult<PropertyImage> {
    match v {
        Value::String(url) => Ok(PropertyImage::new(url.trim())),
        Value::Object(obj) => {
            let url = obj
                .get("url")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            let is_principal = obj
                .get("isPrincipal")
                .or_else(|| obj.get("principal"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(PropertyImage {
                url: url.to_string(),
                is_principal,
            })
        }
        _ => Err(AppError::BadRequest(
            "images must be a list of urls or {url, isPrincipal} objects".into(),
        )),
    }
}

/// Parses a keep-list sent either as structured JSON or as a comma separated string of urls.
pub fn parse_keep_list(value: &Value) -> AppResult<Vec<PropertyImage>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items.iter().map(entry_from_value).collect(),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Vec::new());
            }
            match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Array(_)) => parse_keep_list(&parsed),
                // blank entries are kept; reconcile rejects them
                _ => Ok(s.split(',').map(|url| PropertyImage::new(url.trim())).collect()),
            }
        }
        other => Ok(vec![entry_from_value(other)?]),
    }
}

/// Keeps the first principal claim, or promotes the first entry when none claims it.
pub fn enforce_principal(images: &mut [PropertyImage]) {
    let mut seen = false;
    for img in images.iter_mut() {
        if img.is_principal && !seen {
            seen = true;
        } else {
            img.is_principal = false;
        }
    }
    if !seen {
        if let Some(first) = images.first_mut() {
            first.is_principal = true;
        }
    }
}

/// Number of images the record will hold, checked before any blob is uploaded.
pub fn planned_len(
    existing: &[PropertyImage],
    keep: Option<&[PropertyImage]>,
    uploads: usize,
) -> usize {
    keep.map_or(existing.len(), <[PropertyImage]>::len) + uploads
}

pub fn reconcile(
    existing: &[PropertyImage],
    uploaded: Vec<String>,
    keep: Option<Vec<PropertyImage>>,
) -> AppResult<ImageSet> {
    let mut images = keep.unwrap_or_else(|| existing.to_vec());
    images.extend(uploaded.into_iter().map(PropertyImage::new));

    for img in images.iter_mut() {
        img.url = img.url.trim().to_string();
        if img.url.is_empty() {
            return Err(empty_url());
        }
    }
    if images.len() > MAX_IMAGES {
        return Err(AppError::TooManyImages {
            max: MAX_IMAGES,
            got: images.len(),
        });
    }
    enforce_principal(&mut images);

    let removed = existing
        .iter()
        .filter(|old| !images.iter().any(|img| img.url == old.url))
        .map(|old| old.url.clone())
        .collect();

    Ok(ImageSet { images, removed })
}
