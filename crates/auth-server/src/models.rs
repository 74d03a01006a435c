// Database models for Diesel
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

/// Database representation of users
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: Option<String>, // argon2 PHC string; None for OAuth-created users
    pub full_name: Option<String>,
    pub provider: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<User> for shared_types::UserResponse {
    fn from(user: User) -> Self {
        shared_types::UserResponse {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            provider: user.provider,
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Insertable struct for new users
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::users)]
pub struct NewUserRow<'a> {
    pub email: &'a str,
    pub password_hash: Option<&'a str>,
    pub full_name: Option<&'a str>,
    pub provider: Option<&'a str>,
}
