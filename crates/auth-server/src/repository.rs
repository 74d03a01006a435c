//! User store abstraction.
//!
//! Handlers only see [`UserRepository`]; the Postgres implementation backs
//! production and the in-memory one backs tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::models::{NewUserRow, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with this email already exists")]
    Duplicate,

    /// Connection could not be acquired after retries
    #[error("user store unavailable")]
    Unavailable(#[source] anyhow::Error),

    #[error("user store query failed")]
    Query(#[source] anyhow::Error),
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StoreError::Duplicate
            }
            other => StoreError::Query(other.into()),
        }
    }
}

/// Input for creating a new user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub full_name: Option<String>,
    pub provider: Option<String>,
}

impl NewUser {
    fn as_row(&self) -> NewUserRow<'_> {
        NewUserRow {
            email: &self.email,
            password_hash: self.password_hash.as_deref(),
            full_name: self.full_name.as_deref(),
            provider: self.provider.as_deref(),
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Exact, case-sensitive email lookup.
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Create a user. Fails with [`StoreError::Duplicate`] if the email is taken.
    async fn create(&self, input: NewUser) -> Result<User, StoreError>;

    /// Fetch the user for an OAuth-verified email, creating a password-less
    /// record on first login.
    async fn get_or_create_oauth(&self, email: &str, provider: &str) -> Result<User, StoreError> {
        if let Some(user) = self.get_by_email(email).await? {
            return Ok(user);
        }

        let input = NewUser {
            email: email.to_string(),
            password_hash: None,
            full_name: None,
            provider: Some(provider.to_string()),
        };
        match self.create(input).await {
            Ok(user) => Ok(user),
            // Lost a race with a concurrent first login for the same email
            Err(StoreError::Duplicate) => self
                .get_by_email(email)
                .await?
                .ok_or_else(|| StoreError::Query(anyhow::anyhow!("user vanished after insert"))),
            Err(e) => Err(e),
        }
    }
}

/// Postgres-backed user store
pub struct PgUserRepository {
    pool: DbPool,
}

impl PgUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<db::DbConn, StoreError> {
        db::get_conn(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(e.into()))
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn().await?;
        Ok(db::users::get_by_email(&mut conn, email).await?)
    }

    async fn create(&self, input: NewUser) -> Result<User, StoreError> {
        let mut conn = self.conn().await?;
        Ok(db::users::create(&mut conn, input.as_row()).await?)
    }

    async fn get_or_create_oauth(&self, email: &str, provider: &str) -> Result<User, StoreError> {
        let mut conn = self.conn().await?;
        let input = NewUser {
            email: email.to_string(),
            password_hash: None,
            full_name: None,
            provider: Some(provider.to_string()),
        };

        let inserted = db::users::insert_if_absent(&mut conn, input.as_row()).await?;
        if inserted > 0 {
            tracing::info!("Created user for first OAuth login via {}", provider);
        }

        db::users::get_by_email(&mut conn, email)
            .await?
            .ok_or_else(|| StoreError::Query(anyhow::anyhow!("user missing after upsert")))
    }
}

/// In-memory user store keyed by email
#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn get_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(email).cloned())
    }

    async fn create(&self, input: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&input.email) {
            return Err(StoreError::Duplicate);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: input.email,
            password_hash: input.password_hash,
            full_name: input.full_name,
            provider: input.provider,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.email.clone(), user.clone());
        Ok(user)
    }
}

impl MemoryUserRepository {
    /// Remove a user; returns whether one existed.
    pub async fn remove(&self, email: &str) -> bool {
        self.users.write().await.remove(email).is_some()
    }
}
