use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::Claims,
    error::{AppError, AppResult},
    images::{
        services::{decode_base64_image, release_images, upload_images, UploadItem},
        set::{parse_keep_list, planned_len, reconcile, MAX_IMAGES},
    },
    properties::{
        repo_types::{Page, PageRequest, Property, PropertyDraft, PropertyFilter, PropertyImage},
        validate::{validate, RawPropertyInput},
    },
    state::AppState,
};

fn not_found() -> AppError {
    AppError::NotFound("property not found".into())
}

/// Identifiers are UUIDs; anything else is rejected before the store is consulted.
pub fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::InvalidId)
}

fn keep_list_of(raw: &RawPropertyInput) -> AppResult<Option<Vec<PropertyImage>>> {
    raw.keep_list().map(parse_keep_list).transpose()
}

fn check_capacity(
    existing: &[PropertyImage],
    keep: Option<&[PropertyImage]>,
    uploads: usize,
) -> AppResult<()> {
    let got = planned_len(existing, keep, uploads);
    if got > MAX_IMAGES {
        return Err(AppError::TooManyImages {
            max: MAX_IMAGES,
            got,
        });
    }
    Ok(())
}

/// Drops blobs written for a request that did not complete.
fn discard(state: &AppState, urls: Vec<String>) {
    if !urls.is_empty() {
        release_images(Arc::clone(&state.storage), urls);
    }
}

/// Releases the blobs of `owner` that no other record references.
async fn release_owned(state: &AppState, owner: Uuid, urls: Vec<String>) {
    if urls.is_empty() {
        return;
    }
    match state.properties.images_in_use(&urls, owner).await {
        Ok(shared) => {
            if !shared.is_empty() {
                debug!(
                    property_id = %owner,
                    kept = shared.len(),
                    "images still referenced elsewhere"
                );
            }
            let owned = urls.into_iter().filter(|url| !shared.contains(url)).collect();
            discard(state, owned);
        }
        Err(e) => warn!(
            property_id = %owner,
            error = %e,
            "image usage lookup failed; nothing released"
        ),
    }
}

pub async fn create_property(
    state: &AppState,
    actor: &Claims,
    raw: RawPropertyInput,
    uploads: Vec<UploadItem>,
) -> AppResult<Property> {
    let fields = validate(&raw)?;
    let keep = keep_list_of(&raw)?;
    check_capacity(&[], keep.as_deref(), uploads.len())?;

    let id = Uuid::new_v4();
    let uploaded = upload_images(&state.storage, &id.to_string(), uploads).await?;
    let set = match reconcile(&[], uploaded.clone(), keep) {
        Ok(set) => set,
        Err(e) => {
            discard(state, uploaded);
            return Err(e);
        }
    };

    let draft = PropertyDraft {
        fields,
        images: set.images,
    };
    match state.properties.insert(id, draft).await {
        Ok(created) => {
            info!(
                property_id = %created.id,
                user_id = %actor.id,
                images = created.images.len(),
                "property created"
            );
            Ok(created)
        }
        Err(e) => {
            discard(state, uploaded);
            Err(e)
        }
    }
}

pub async fn get_property(state: &AppState, raw_id: &str) -> AppResult<Property> {
    let id = parse_id(raw_id)?;
    state.properties.find_by_id(id).await?.ok_or_else(not_found)
}

pub async fn list_properties(
    state: &AppState,
    filter: PropertyFilter,
    page: PageRequest,
) -> AppResult<Page<Property>> {
    state.properties.list(filter, page).await
}

/// Applies a partial update. The stored record and the patch are merged and the
/// combined record is validated as a whole before anything is written.
pub async fn update_property(
    state: &AppState,
    actor: &Claims,
    raw_id: &str,
    patch: RawPropertyInput,
    uploads: Vec<UploadItem>,
) -> AppResult<Property> {
    let id = parse_id(raw_id)?;
    let existing = state.properties.find_by_id(id).await?.ok_or_else(not_found)?;

    let merged = RawPropertyInput::from(&existing).overlay(patch);
    let fields = validate(&merged)?;
    let keep = keep_list_of(&merged)?;
    check_capacity(&existing.images, keep.as_deref(), uploads.len())?;

    let uploaded = upload_images(&state.storage, &id.to_string(), uploads).await?;
    let set = match reconcile(&existing.images, uploaded.clone(), keep) {
        Ok(set) => set,
        Err(e) => {
            discard(state, uploaded);
            return Err(e);
        }
    };

    let draft = PropertyDraft {
        fields,
        images: set.images,
    };
    let updated = match state.properties.update(id, draft).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            discard(state, uploaded);
            return Err(not_found());
        }
        Err(e) => {
            discard(state, uploaded);
            return Err(e);
        }
    };

    info!(
        property_id = %id,
        user_id = %actor.id,
        removed = set.removed.len(),
        "property updated"
    );
    release_owned(state, id, set.removed).await;
    Ok(updated)
}

/// Removes the record, then releases its blobs without waiting on them.
pub async fn delete_property(
    state: &AppState,
    actor: &Claims,
    raw_id: &str,
) -> AppResult<Property> {
    let id = parse_id(raw_id)?;
    let deleted = state.properties.delete(id).await?.ok_or_else(|| {
        warn!(property_id = %id, user_id = %actor.id, "delete of missing property");
        not_found()
    })?;

    info!(
        property_id = %id,
        user_id = %actor.id,
        images = deleted.images.len(),
        "property deleted"
    );
    release_owned(state, id, deleted.image_urls()).await;
    Ok(deleted)
}

/// Stores a single base64 image and returns its public url.
pub async fn upload_single_image(
    state: &AppState,
    actor: &Claims,
    image: &str,
    property_id: Option<Uuid>,
) -> AppResult<String> {
    if image.trim().is_empty() {
        return Err(AppError::BadRequest("image is required".into()));
    }
    let item = decode_base64_image(image)?;
    let scope = property_id.unwrap_or(actor.id).to_string();
    let mut urls = upload_images(&state.storage, &scope, vec![item]).await?;
    let url = urls
        .pop()
        .ok_or_else(|| AppError::Storage(anyhow::anyhow!("upload returned no url")))?;
    info!(user_id = %actor.id, %url, "image uploaded");
    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::auth::repo_types::Role;
    use crate::state::fake::FakeStorage;

    fn actor() -> Claims {
        Claims {
            id: Uuid::new_v4(),
            email: "agent@example.com".into(),
            role: Role::Agent,
            iat: 0,
            exp: usize::MAX,
            iss: "test".into(),
            aud: "test".into(),
        }
    }

    fn raw(value: serde_json::Value) -> RawPropertyInput {
        serde_json::from_value(value).unwrap()
    }

    fn casa_test() -> RawPropertyInput {
        raw(json!({
            "title": "Casa Test",
            "description": "Descripcion larga de prueba",
            "address": "Calle 123",
            "propertyType": "house",
            "dealType": "sale",
            "price": { "amount": 100000, "currency": "USD" },
            "bedrooms": 3,
            "bathrooms": 2,
            "rooms": 5,
            "areaSqMeters": 120
        }))
    }

    fn jpeg() -> UploadItem {
        UploadItem {
            body: Bytes::from_static(b"\xFF\xD8\xFFjpeg"),
            content_type: "image/jpeg".into(),
        }
    }

    /// Gives detached release tasks a chance to run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn create_with_one_upload_has_a_single_principal_image() {
        let state = AppState::fake();
        let created = create_property(&state, &actor(), casa_test(), vec![jpeg()])
            .await
            .unwrap();
        assert_eq!(created.images.len(), 1);
        assert!(created.images[0].is_principal);

        let found = get_property(&state, &created.id.to_string()).await.unwrap();
        assert_eq!(found, created);
    }

    #[tokio::test]
    async fn invalid_create_touches_neither_store() {
        let fake = Arc::new(FakeStorage::default());
        let state = AppState::fake_with_storage(fake.clone());
        let mut bad = casa_test();
        bad.title = None;
        let err = create_property(&state, &actor(), bad, vec![jpeg()]).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(fake.stored().is_empty());
        let page = list_properties(&state, PropertyFilter::default(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 0);
    }

    #[tokio::test]
    async fn too_many_images_is_rejected_before_upload() {
        let fake = Arc::new(FakeStorage::default());
        let state = AppState::fake_with_storage(fake.clone());
        let uploads = (0..21).map(|_| jpeg()).collect();
        let err = create_property(&state, &actor(), casa_test(), uploads).await.unwrap_err();
        assert!(matches!(err, AppError::TooManyImages { max: 20, got: 21 }));
        assert!(fake.stored().is_empty());
    }

    #[tokio::test]
    async fn rejected_file_type_fails_the_create() {
        let state = AppState::fake();
        let pdf = UploadItem {
            body: Bytes::from_static(b"%PDF"),
            content_type: "application/pdf".into(),
        };
        let err = create_property(&state, &actor(), casa_test(), vec![pdf]).await.unwrap_err();
        assert!(matches!(err, AppError::ImageTypeRejected(_)));
    }

    #[tokio::test]
    async fn malformed_and_unknown_ids() {
        let state = AppState::fake();
        let who = actor();
        assert!(matches!(get_property(&state, "not-a-uuid").await, Err(AppError::InvalidId)));
        assert!(matches!(
            delete_property(&state, &who, "123").await,
            Err(AppError::InvalidId)
        ));
        let missing = Uuid::new_v4().to_string();
        assert!(matches!(get_property(&state, &missing).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            update_property(&state, &who, &missing, casa_test(), vec![]).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            delete_property(&state, &who, &missing).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn partial_update_merges_and_revalidates() {
        let state = AppState::fake();
        let who = actor();
        let created = create_property(&state, &who, casa_test(), vec![]).await.unwrap();
        let id = created.id.to_string();

        let updated = update_property(&state, &who, &id, raw(json!({ "bedrooms": "4" })), vec![])
            .await
            .unwrap();
        assert_eq!(updated.bedrooms, 4);
        assert_eq!(updated.title, "Casa Test");
        assert_eq!(updated.created_at, created.created_at);

        let err = update_property(&state, &who, &id, raw(json!({ "title": "abc" })), vec![])
            .await
            .unwrap_err();
        match err {
            AppError::Validation(errors) => assert!(errors.contains("title")),
            other => panic!("unexpected {other:?}"),
        }
        let unchanged = get_property(&state, &id).await.unwrap();
        assert_eq!(unchanged.title, "Casa Test");
    }

    #[tokio::test]
    async fn update_releases_images_dropped_from_keep_list() {
        let fake = Arc::new(FakeStorage::default());
        let state = AppState::fake_with_storage(fake.clone());
        let who = actor();
        let created = create_property(&state, &who, casa_test(), vec![jpeg(), jpeg()])
            .await
            .unwrap();
        let urls = created.image_urls();

        let patch = raw(json!({ "existingImages": [urls[1].clone()] }));
        let updated = update_property(&state, &who, &created.id.to_string(), patch, vec![jpeg()])
            .await
            .unwrap();
        assert_eq!(updated.images.len(), 2);
        assert_eq!(updated.images[0].url, urls[1]);
        assert!(updated.images[0].is_principal);
        assert_eq!(updated.images.iter().filter(|i| i.is_principal).count(), 1);

        settle().await;
        assert_eq!(fake.deleted(), vec![urls[0].clone()]);
    }

    #[tokio::test]
    async fn delete_succeeds_even_when_blob_release_fails() {
        let fake = Arc::new(FakeStorage::failing_deletes());
        let state = AppState::fake_with_storage(fake.clone());
        let who = actor();
        let created = create_property(&state, &who, casa_test(), vec![jpeg()]).await.unwrap();
        let id = created.id.to_string();

        let deleted = delete_property(&state, &who, &id).await.unwrap();
        assert_eq!(deleted.id, created.id);
        settle().await;
        assert!(matches!(get_property(&state, &id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_releases_every_blob() {
        let fake = Arc::new(FakeStorage::default());
        let state = AppState::fake_with_storage(fake.clone());
        let who = actor();
        let created = create_property(&state, &who, casa_test(), vec![jpeg(), jpeg(), jpeg()])
            .await
            .unwrap();
        delete_property(&state, &who, &created.id.to_string()).await.unwrap();
        settle().await;

        let mut released = fake.deleted();
        released.sort();
        let mut expected = created.image_urls();
        expected.sort();
        assert_eq!(released, expected);
    }

    #[tokio::test]
    async fn blobs_shared_with_another_record_survive_its_delete() {
        let fake = Arc::new(FakeStorage::default());
        let state = AppState::fake_with_storage(fake.clone());
        let who = actor();
        let first = create_property(&state, &who, casa_test(), vec![jpeg()]).await.unwrap();
        let shared = first.image_urls();
        let second = create_property(&state, &who, casa_test(), vec![]).await.unwrap();
        let second_id = second.id.to_string();

        let patch = raw(json!({ "existingImages": shared.clone() }));
        let linked = update_property(&state, &who, &second_id, patch, vec![]).await.unwrap();
        assert_eq!(linked.image_urls(), shared);

        delete_property(&state, &who, &second_id).await.unwrap();
        settle().await;
        assert!(fake.deleted().is_empty());

        let kept = get_property(&state, &first.id.to_string()).await.unwrap();
        assert_eq!(kept.image_urls(), shared);
    }

    #[tokio::test]
    async fn uploads_are_keyed_under_the_property_id() {
        let state = AppState::fake();
        let who = actor();
        let created = create_property(&state, &who, casa_test(), vec![jpeg()]).await.unwrap();
        let id = created.id.to_string();
        let prefix = format!("https://fake.local/properties/{id}/");
        assert!(created.images[0].url.starts_with(&prefix));

        let patch = raw(json!({ "existingImages": created.image_urls() }));
        let updated = update_property(&state, &who, &id, patch, vec![jpeg()]).await.unwrap();
        assert_eq!(updated.images.len(), 2);
        assert!(updated.images.iter().all(|i| i.url.starts_with(&prefix)));
    }

    #[tokio::test]
    async fn single_image_upload_returns_public_url() {
        let fake = Arc::new(FakeStorage::default());
        let state = AppState::fake_with_storage(fake.clone());
        let png = "data:image/png;base64,iVBORw0KGgo=";
        let url = upload_single_image(&state, &actor(), png, None).await.unwrap();
        assert!(url.starts_with("https://fake.local/properties/"));
        assert!(url.ends_with(".png"));
        assert_eq!(fake.stored().len(), 1);

        assert!(matches!(
            upload_single_image(&state, &actor(), "  ", None).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
