use std::sync::Arc;
use std::time::Duration;

use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::db::{DbAdapter, DbError};
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection settings for the document store holding `sys_box`.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }

    pub async fn connect(&self) -> anyhow::Result<Arc<Surreal<Client>>> {
        let db = Surreal::<Client>::init();
        db.connect::<Ws>(&self.endpoint).await?;
        db.signin(Root {
            username: &self.username,
            password: &self.password,
        })
        .await?;
        db.use_ns(&self.namespace).use_db(&self.database).await?;
        Ok(Arc::new(db))
    }
}

pub async fn connect_mysql(config: &AppConfig) -> anyhow::Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(config.mysql_max_connections.max(1))
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.mysql_url)
        .await?;
    Ok(pool)
}

#[derive(Debug, Clone)]
pub struct SurrealAdapter {
    config: DbConfig,
}

impl SurrealAdapter {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl DbAdapter for SurrealAdapter {
    fn name(&self) -> &'static str {
        "surrealdb"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>> {
        let endpoint = self.config.endpoint.clone();
        let ns = self.config.namespace.clone();
        let db = self.config.database.clone();

        Box::pin(async move {
            let address = parse_socket_address(&endpoint, 8000)?;
            tcp_probe(&address, "surreal").await?;
            tracing::debug!(
                endpoint,
                namespace = ns,
                database = db,
                "surreal health check succeeded"
            );
            Ok(())
        })
    }
}

#[derive(Clone)]
pub struct MysqlAdapter {
    pool: MySqlPool,
}

impl MysqlAdapter {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

impl DbAdapter for MysqlAdapter {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            let ping = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(&self.pool);
            timeout(HEALTH_TIMEOUT, ping)
                .await
                .map_err(|_| DbError::Unavailable("mysql ping timed out".to_string()))?
                .map_err(|err| DbError::Operation(format!("mysql ping failed: {err}")))?;
            tracing::debug!("mysql health check succeeded");
            Ok(())
        })
    }
}

/// TCP reachability of an HTTP or Redis endpoint.
#[derive(Debug, Clone)]
pub struct EndpointProbe {
    name: &'static str,
    endpoint: String,
    default_port: u16,
}

impl EndpointProbe {
    pub fn new(name: &'static str, endpoint: impl Into<String>, default_port: u16) -> Self {
        Self {
            name,
            endpoint: endpoint.into(),
            default_port,
        }
    }
}

impl DbAdapter for EndpointProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    fn health_check(&self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            let address = parse_socket_address(&self.endpoint, self.default_port)?;
            tcp_probe(&address, self.name).await?;
            tracing::debug!(endpoint = %self.endpoint, name = self.name, "health check succeeded");
            Ok(())
        })
    }
}

async fn tcp_probe(address: &str, label: &str) -> Result<(), DbError> {
    let connect = timeout(HEALTH_TIMEOUT, TcpStream::connect(address))
        .await
        .map_err(|_| DbError::Unavailable(format!("{label} endpoint connect timed out")))?;
    connect.map_err(|err| DbError::Unavailable(format!("{label} endpoint connect failed: {err}")))?;
    Ok(())
}

fn parse_socket_address(endpoint: &str, default_port: u16) -> Result<String, DbError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("tcp://{endpoint}")
    };
    let parsed = Url::parse(&normalized)
        .map_err(|err| DbError::Unavailable(format!("invalid endpoint '{endpoint}': {err}")))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| DbError::Unavailable(format!("missing host in endpoint '{endpoint}'")))?;
    let port = parsed
        .port()
        .unwrap_or(match parsed.scheme() {
            "wss" | "https" => 443,
            "http" => 80,
            _ => default_port,
        });
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_address_falls_back_to_the_service_port() {
        assert_eq!(
            parse_socket_address("ws://db.internal", 8000).unwrap(),
            "db.internal:8000"
        );
        assert_eq!(
            parse_socket_address("redis://cache:6380/0", 6379).unwrap(),
            "cache:6380"
        );
        assert_eq!(parse_socket_address("broker", 9092).unwrap(), "broker:9092");
        assert_eq!(
            parse_socket_address("https://search.example.com", 9200).unwrap(),
            "search.example.com:443"
        );
    }
}
