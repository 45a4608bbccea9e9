use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::properties::repo_types::{Page, PageRequest, Property, PropertyFilter};

/// `GET /properties` query string. Everything arrives as text and is parsed strictly.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub property_type: Option<String>,
    pub deal_type: Option<String>,
    pub available: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn positive(name: &str, raw: Option<&str>, default: u32) -> AppResult<u32> {
    match raw {
        None => Ok(default),
        Some(s) => s
            .parse::<u32>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| AppError::BadRequest(format!("{name} must be a positive integer"))),
    }
}

impl ListQuery {
    pub fn filter(&self) -> AppResult<PropertyFilter> {
        let property_type = present(&self.property_type)
            .map(|s| s.parse().map_err(|e| AppError::BadRequest(format!("type {e}"))))
            .transpose()?;
        let deal_type = present(&self.deal_type)
            .map(|s| s.parse().map_err(|e| AppError::BadRequest(format!("dealType {e}"))))
            .transpose()?;
        let available = match present(&self.available) {
            None => None,
            Some("true") => Some(true),
            Some("false") => Some(false),
            Some(_) => return Err(AppError::BadRequest("available must be true or false".into())),
        };
        Ok(PropertyFilter {
            property_type,
            deal_type,
            available,
        })
    }

    /// Page size is clamped to the maximum rather than rejected.
    pub fn page(&self) -> AppResult<PageRequest> {
        let page = positive("page", present(&self.page), 1)?;
        let default_size = PageRequest::DEFAULT_PAGE_SIZE;
        let page_size = positive("pageSize", present(&self.page_size), default_size)?
            .min(PageRequest::MAX_PAGE_SIZE);
        Ok(PageRequest { page, page_size })
    }
}

#[derive(Debug, Serialize)]
pub struct PropertyEnvelope {
    pub success: bool,
    pub data: Property,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct PropertyListResponse {
    pub success: bool,
    pub data: Vec<Property>,
    pub pagination: Pagination,
}

impl From<Page<Property>> for PropertyListResponse {
    fn from(page: Page<Property>) -> Self {
        Self {
            success: true,
            pagination: Pagination {
                page: page.page,
                page_size: page.page_size,
                total: page.total_count,
                total_pages: page.total_pages,
            },
            data: page.items,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /upload-image` body: a data URI or bare base64 string.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UploadImageRequest {
    pub image: String,
    pub property_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UploadedImage {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct UploadImageResponse {
    pub success: bool,
    pub data: UploadedImage,
}
