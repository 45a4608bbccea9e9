use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppResult;
use crate::properties::repo_types::{
    Page, PageRequest, Property, PropertyDraft, PropertyFilter, PropertyRow,
};

/// Persistence port for property records. Records own their image list.
#[async_trait]
pub trait PropertyStore: Send + Sync {
    /// Persists a new record under `id`, stamping `created_at`/`updated_at`.
    async fn insert(&self, id: Uuid, draft: PropertyDraft) -> AppResult<Property>;
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Property>>;
    /// Newest first; ties broken by id so pages never overlap.
    async fn list(&self, filter: PropertyFilter, page: PageRequest) -> AppResult<Page<Property>>;
    /// Replaces every field of an existing record. `None` if it does not exist.
    async fn update(&self, id: Uuid, draft: PropertyDraft) -> AppResult<Option<Property>>;
    /// Removes a record and hands it back so its blobs can be released.
    async fn delete(&self, id: Uuid) -> AppResult<Option<Property>>;
    /// Those of `urls` still referenced by any record other than `except`.
    async fn images_in_use(&self, urls: &[String], except: Uuid) -> AppResult<Vec<String>>;
}

const PROPERTY_COLUMNS: &str = "id, title, description, address, property_type, deal_type, \
                                price_amount, price_currency, bedrooms, bathrooms, rooms, \
                                area_sq_meters, images, available, created_at, updated_at";

const FILTER_CLAUSE: &str = "($1::text IS NULL OR property_type = $1) \
                             AND ($2::text IS NULL OR deal_type = $2) \
                             AND ($3::bool IS NULL OR available = $3)";

#[derive(Clone)]
pub struct PgPropertyStore {
    db: PgPool,
}

impl PgPropertyStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PropertyStore for PgPropertyStore {
    async fn insert(&self, id: Uuid, draft: PropertyDraft) -> AppResult<Property> {
        let f = &draft.fields;
        let now = OffsetDateTime::now_utc();
        let sql = format!(
            r#"
            INSERT INTO properties (id, title, description, address, property_type, deal_type,
                                    price_amount, price_currency, bedrooms, bathrooms, rooms,
                                    area_sq_meters, images, available, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .bind(&f.title)
            .bind(&f.description)
            .bind(&f.address)
            .bind(f.property_type.as_str())
            .bind(f.deal_type.as_str())
            .bind(f.price.amount)
            .bind(f.price.currency.as_str())
            .bind(f.bedrooms)
            .bind(f.bathrooms)
            .bind(f.rooms)
            .bind(f.area_sq_meters)
            .bind(Json(&draft.images))
            .bind(f.available)
            .bind(now)
            .fetch_one(&self.db)
            .await?;
        Ok(row.into())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Property>> {
        let sql = format!("SELECT {PROPERTY_COLUMNS} FROM properties WHERE id = $1");
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self, filter: PropertyFilter, page: PageRequest) -> AppResult<Page<Property>> {
        let property_type = filter.property_type.map(|t| t.as_str());
        let deal_type = filter.deal_type.map(|d| d.as_str());

        let count_sql = format!("SELECT COUNT(*) FROM properties WHERE {FILTER_CLAUSE}");
        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(property_type)
            .bind(deal_type)
            .bind(filter.available)
            .fetch_one(&self.db)
            .await?;

        let sql = format!(
            r#"
            SELECT {PROPERTY_COLUMNS}
            FROM properties
            WHERE {FILTER_CLAUSE}
            ORDER BY created_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#
        );
        let rows = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(property_type)
            .bind(deal_type)
            .bind(filter.available)
            .bind(i64::from(page.page_size))
            .bind(page.offset() as i64)
            .fetch_all(&self.db)
            .await?;

        Ok(Page::new(
            rows.into_iter().map(Into::into).collect(),
            page,
            total.max(0) as u64,
        ))
    }

    async fn update(&self, id: Uuid, draft: PropertyDraft) -> AppResult<Option<Property>> {
        let f = &draft.fields;
        let sql = format!(
            r#"
            UPDATE properties
               SET title = $2, description = $3, address = $4, property_type = $5,
                   deal_type = $6, price_amount = $7, price_currency = $8, bedrooms = $9,
                   bathrooms = $10, rooms = $11, area_sq_meters = $12, images = $13,
                   available = $14, updated_at = $15
             WHERE id = $1
            RETURNING {PROPERTY_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .bind(&f.title)
            .bind(&f.description)
            .bind(&f.address)
            .bind(f.property_type.as_str())
            .bind(f.deal_type.as_str())
            .bind(f.price.amount)
            .bind(f.price.currency.as_str())
            .bind(f.bedrooms)
            .bind(f.bathrooms)
            .bind(f.rooms)
            .bind(f.area_sq_meters)
            .bind(Json(&draft.images))
            .bind(f.available)
            .bind(OffsetDateTime::now_utc())
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn delete(&self, id: Uuid) -> AppResult<Option<Property>> {
        let sql = format!("DELETE FROM properties WHERE id = $1 RETURNING {PROPERTY_COLUMNS}");
        let row = sqlx::query_as::<_, PropertyRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn images_in_use(&self, urls: &[String], except: Uuid) -> AppResult<Vec<String>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT img->>'url'
              FROM properties, jsonb_array_elements(images) AS img
             WHERE id <> $1 AND img->>'url' = ANY($2)
            "#,
        )
        .bind(except)
        .bind(urls)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(url,)| url).collect())
    }
}
