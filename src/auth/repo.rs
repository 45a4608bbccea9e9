use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, User};
use crate::error::{AppError, AppResult};

/// Persistence port for identities. Emails are matched lower-cased.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts a new identity; fails with `DuplicateEmail` if the email is taken.
    async fn insert(&self, user: NewUser) -> AppResult<User>;
    async fn find_by_email(&self, email: &str, active_only: bool) -> AppResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn touch_last_access(&self, id: Uuid, at: OffsetDateTime) -> AppResult<()>;
}

const USER_COLUMNS: &str = "id, email, password_hash, display_name, family_name, role, active, \
                            last_access_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: NewUser) -> AppResult<User> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password_hash, display_name, family_name, role, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        let res = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(user.email.to_lowercase())
            .bind(&user.password_hash)
            .bind(&user.display_name)
            .bind(&user.family_name)
            .bind(user.role.as_str())
            .bind(user.active)
            .fetch_one(&self.db)
            .await;

        match res {
            Ok(u) => Ok(u),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_email(&self, email: &str, active_only: bool) -> AppResult<Option<User>> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE lower(email) = lower($1) AND (active OR NOT $2)
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email.trim())
            .bind(active_only)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn touch_last_access(&self, id: Uuid, at: OffsetDateTime) -> AppResult<()> {
        sqlx::query("UPDATE users SET last_access_at = $2, updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
