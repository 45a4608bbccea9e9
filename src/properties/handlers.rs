use axum::{
    async_trait,
    extract::{
        rejection::QueryRejection, DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request,
        State,
    },
    http::{header::CONTENT_TYPE, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::{
    auth::AuthUser,
    error::{ApiJson, AppError, AppResult},
    images::{
        services::{UploadItem, MAX_IMAGE_BYTES},
        set::MAX_IMAGES,
    },
    properties::{
        dto::{
            DeleteResponse, ListQuery, PropertyEnvelope, PropertyListResponse, UploadImageRequest,
            UploadImageResponse, UploadedImage,
        },
        services::{
            create_property, delete_property, get_property, list_properties, update_property,
            upload_single_image,
        },
        validate::RawPropertyInput,
    },
    state::AppState,
};

/// Every image at full size plus room for the text fields.
const MAX_BODY_BYTES: usize = MAX_IMAGES * MAX_IMAGE_BYTES + 1024 * 1024;

const FILE_FIELDS: &[&str] = &["images", "images[]", "imagen"];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/properties", get(list).post(create))
        .route("/properties/:id", get(get_one).put(update).delete(remove))
        .route("/upload-image", post(upload_image))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

/// Property fields plus any uploaded files, from either a JSON or a multipart body.
pub struct PropertyPayload {
    pub fields: RawPropertyInput,
    pub files: Vec<UploadItem>,
}

/// Maps HTML form names onto the JSON field names.
fn form_key(name: &str) -> &str {
    match name {
        "price[amount]" | "price.amount" => "priceAmount",
        "price[currency]" | "price.currency" => "priceCurrency",
        "existingImages[]" => "existingImages",
        "images[]" => "images",
        other => other,
    }
}

fn push_field(map: &mut Map<String, Value>, key: &str, value: Value) {
    match map.get_mut(key) {
        Some(Value::Array(items)) => items.push(value),
        Some(slot) => {
            let first = slot.take();
            *slot = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key.to_string(), value);
        }
    }
}

async fn read_multipart(mut mp: Multipart) -> AppResult<PropertyPayload> {
    let mut map = Map::new();
    let mut files = Vec::new();

    while let Some(field) = mp.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_some() {
            if !FILE_FIELDS.contains(&name.as_str()) {
                debug!(field = %name, "ignoring unexpected file field");
                continue;
            }
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();
            let body = field.bytes().await?;
            // browsers send an empty part for an untouched file input
            if !body.is_empty() {
                files.push(UploadItem { body, content_type });
            }
            continue;
        }

        let text = field.text().await?;
        let key = form_key(&name);
        let value = match key {
            "price" => match serde_json::from_str::<Value>(&text) {
                Ok(obj @ Value::Object(_)) => obj,
                _ => Value::String(text),
            },
            _ => Value::String(text),
        };
        push_field(&mut map, key, value);
    }

    let fields = serde_json::from_value(Value::Object(map))
        .map_err(|e| AppError::BadRequest(format!("invalid form fields: {e}")))?;
    Ok(PropertyPayload { fields, files })
}

#[async_trait]
impl<S> FromRequest<S> for PropertyPayload
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let mp = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            read_multipart(mp).await
        } else {
            let ApiJson(fields) = ApiJson::<RawPropertyInput>::from_request(req, state).await?;
            Ok(PropertyPayload {
                fields,
                files: Vec::new(),
            })
        }
    }
}

#[instrument(skip(state, query))]
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> AppResult<Json<PropertyListResponse>> {
    let Query(query) = query?;
    let page = list_properties(&state, query.filter()?, query.page()?).await?;
    Ok(Json(page.into()))
}

#[instrument(skip(state))]
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PropertyEnvelope>> {
    let property = get_property(&state, &id).await?;
    Ok(Json(PropertyEnvelope {
        success: true,
        data: property,
    }))
}

#[instrument(skip(state, claims, payload))]
pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    payload: PropertyPayload,
) -> AppResult<(StatusCode, Json<PropertyEnvelope>)> {
    let property = create_property(&state, &claims, payload.fields, payload.files).await?;
    Ok((
        StatusCode::CREATED,
        Json(PropertyEnvelope {
            success: true,
            data: property,
        }),
    ))
}

#[instrument(skip(state, claims, payload))]
pub async fn update(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
    payload: PropertyPayload,
) -> AppResult<Json<PropertyEnvelope>> {
    let property = update_property(&state, &claims, &id, payload.fields, payload.files).await?;
    Ok(Json(PropertyEnvelope {
        success: true,
        data: property,
    }))
}

#[instrument(skip(state, claims))]
pub async fn remove(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<DeleteResponse>> {
    delete_property(&state, &claims, &id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "property deleted".into(),
    }))
}

#[instrument(skip(state, claims, body))]
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(body): ApiJson<UploadImageRequest>,
) -> AppResult<Json<UploadImageResponse>> {
    let url = upload_single_image(&state, &claims, &body.image, body.property_id).await?;
    Ok(Json(UploadImageResponse {
        success: true,
        data: UploadedImage { url },
    }))
}
