use std::time::Duration;

use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{
        deadpool::{Object, Pool, PoolError},
        AsyncDieselConnectionManager, ManagerConfig,
    },
    AsyncPgConnection, RunQueryDsl,
};

use crate::models::{NewUserRow, User};

pub type DbPool = Pool<AsyncPgConnection>;
pub type DbConn = Object<AsyncPgConnection>;

/// Attempts made to acquire a connection before giving up.
pub const MAX_RETRIES: u32 = 3;

/// Delay before the first retry; doubled after every failed attempt.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

async fn establish_tls_connection(config: String) -> diesel::ConnectionResult<AsyncPgConnection> {
    // Set up rustls TLS configuration
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

    // Parse the connection string and connect with TLS
    let (client, connection) = tokio_postgres::connect(&config, tls)
        .await
        .map_err(|e| diesel::ConnectionError::BadConnection(e.to_string()))?;

    // Spawn the connection task
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection error: {}", e);
        }
    });

    // Build the async connection from the tokio-postgres client
    AsyncPgConnection::try_from(client).await
}

pub fn establish_connection_pool(database_url: &str) -> anyhow::Result<DbPool> {
    let mut manager_config = ManagerConfig::default();
    manager_config.custom_setup =
        Box::new(|url| Box::pin(establish_tls_connection(url.to_string())));

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new_with_config(
        database_url,
        manager_config,
    );
    let pool = Pool::builder(config).max_size(15).build()?;

    Ok(pool)
}

/// Delay before retry number `attempt` (1-based): 0.5s, 1s, 2s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    RETRY_BACKOFF * 2u32.pow(attempt.saturating_sub(1))
}

/// Get a pooled connection, retrying with exponential backoff.
///
/// Returns the last pool error once `MAX_RETRIES` attempts have failed.
pub async fn get_conn(pool: &DbPool) -> Result<DbConn, PoolError> {
    let mut attempt = 0;
    loop {
        match pool.get().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                attempt += 1;
                if attempt >= MAX_RETRIES {
                    tracing::error!(
                        "Failed to connect to database after {} attempts: {}",
                        MAX_RETRIES,
                        e
                    );
                    return Err(e);
                }

                let delay = backoff_delay(attempt);
                tracing::warn!(
                    "Database connection failed, retrying in {:?}... ({}/{})",
                    delay,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// User database operations
pub mod users {
    use super::*;

    pub async fn get_by_email(
        conn: &mut AsyncPgConnection,
        email_val: &str,
    ) -> QueryResult<Option<User>> {
        use crate::schema::users::dsl::*;

        users
            .filter(email.eq(email_val))
            .select(User::as_select())
            .first::<User>(conn)
            .await
            .optional()
    }

    pub async fn create(conn: &mut AsyncPgConnection, new_user: NewUserRow<'_>) -> QueryResult<User> {
        use crate::schema::users::dsl::*;

        diesel::insert_into(users)
            .values(&new_user)
            .returning(User::as_returning())
            .get_result::<User>(conn)
            .await
    }

    /// Insert unless a row with the same email exists. Returns the number of
    /// inserted rows.
    pub async fn insert_if_absent(
        conn: &mut AsyncPgConnection,
        new_user: NewUserRow<'_>,
    ) -> QueryResult<usize> {
        use crate::schema::users::dsl::*;

        diesel::insert_into(users)
            .values(&new_user)
            .on_conflict(email)
            .do_nothing()
            .execute(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(2), Duration::from_millis(1000));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
    }
}
