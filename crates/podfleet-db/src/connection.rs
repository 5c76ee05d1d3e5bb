//! Opening the fleet database for the podfleet daemon.
//!
//! Every worker and sweep shares one WebSocket client. [`DbManager::open`]
//! connects, brings the schema up to date and hands out a
//! [`SurrealStore`] over that client.

use std::time::Duration;

use serde::Deserialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tracing::{info, warn};

use crate::error::DbError;
use crate::schema::run_migrations;
use crate::store::SurrealStore;

/// The `[db]` section of the daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// `host:port` of the SurrealDB server.
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root user to sign in as. Leave unset for a server started without
    /// authentication, as in local development.
    pub username: Option<String>,
    pub password: String,
    /// Give up on startup if the server has not answered by then.
    pub connect_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "podfleet".into(),
            database: "main".into(),
            username: Some("root".into()),
            password: "root".into(),
            connect_timeout_secs: 10,
        }
    }
}

impl DbConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Connection shared by the whole daemon.
#[derive(Clone)]
pub struct DbManager {
    db: Surreal<Client>,
}

impl DbManager {
    /// Connect, select the fleet namespace and database, and apply any
    /// pending migrations.
    pub async fn open(config: &DbConfig) -> Result<Self, DbError> {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            "Opening fleet database"
        );

        let db = tokio::time::timeout(config.connect_timeout(), Self::connect(config))
            .await
            .map_err(|_| {
                DbError::Connect(format!(
                    "{} did not answer within {}s",
                    config.url, config.connect_timeout_secs
                ))
            })??;

        let applied = run_migrations(&db).await?;
        info!(applied, "Fleet database ready");
        Ok(Self { db })
    }

    async fn connect(config: &DbConfig) -> Result<Surreal<Client>, DbError> {
        let db = Surreal::new::<Ws>(&config.url).await?;

        match &config.username {
            Some(username) => {
                db.signin(Root {
                    username: username.clone(),
                    password: config.password.clone(),
                })
                .await?;
            }
            None => warn!(url = %config.url, "Connecting without signing in"),
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await?;
        Ok(db)
    }

    /// Repositories over the shared client.
    pub fn store(&self) -> SurrealStore<Client> {
        SurrealStore::new(self.db.clone())
    }

    pub fn client(&self) -> &Surreal<Client> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_section_keeps_defaults() {
        let config: DbConfig = serde_json::from_value(serde_json::json!({
            "url": "db.fleet.internal:8000",
            "username": null,
        }))
        .unwrap();
        assert_eq!(config.url, "db.fleet.internal:8000");
        assert_eq!(config.namespace, "podfleet");
        assert!(config.username.is_none());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn unreachable_server_fails_startup() {
        let config = DbConfig {
            url: "127.0.0.1:1".into(),
            connect_timeout_secs: 2,
            ..Default::default()
        };
        let started = std::time::Instant::now();
        assert!(DbManager::open(&config).await.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
