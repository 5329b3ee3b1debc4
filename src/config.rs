use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// `DB_TYPE` — the backend the abstract repository trait is bound to at
/// startup. Mirrors the `/api/db` configuration object (database kind +
/// parameters) described as a closed enumeration rather than free-form
/// connection config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Sqlite,
    Postgresql,
    Mysql,
}

impl DbKind {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "sqlite" => Ok(DbKind::Sqlite),
            "postgresql" | "postgres" => Ok(DbKind::Postgresql),
            "mysql" => Ok(DbKind::Mysql),
            other => anyhow::bail!("unknown DB_TYPE '{other}' (expected sqlite|postgresql|mysql)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub kind: DbKind,
    pub sqlite_path: String,
    pub pg_host: String,
    pub pg_port: u16,
    pub pg_db: String,
    pub pg_schema: String,
    pub pg_user: String,
    pub pg_pwd: String,
    pub use_managed_identity: bool,
    pub pg_managed_identity_user: Option<String>,
}

impl DbConfig {
    /// Builds the sqlx connection string for the configured backend.
    pub fn connection_url(&self) -> String {
        match self.kind {
            DbKind::Sqlite => format!("sqlite://{}?mode=rwc", self.sqlite_path),
            DbKind::Postgresql => {
                if self.use_managed_identity {
                    let user = self.pg_managed_identity_user.as_deref().unwrap_or(&self.pg_user);
                    format!(
                        "postgres://{}@{}:{}/{}?options=-c search_path={}",
                        user, self.pg_host, self.pg_port, self.pg_db, self.pg_schema
                    )
                } else {
                    format!(
                        "postgres://{}:{}@{}:{}/{}?options=-c search_path={}",
                        self.pg_user, self.pg_pwd, self.pg_host, self.pg_port, self.pg_db, self.pg_schema
                    )
                }
            }
            DbKind::Mysql => format!(
                "mysql://{}:{}@{}:{}/{}",
                self.pg_user, self.pg_pwd, self.pg_host, self.pg_port, self.pg_db
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db: DbConfig,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    /// Health-monitor period; spec bounds this to 5-300s, default 30s.
    pub health_monitor_interval: Duration,
    pub log_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let db_kind = DbKind::parse(&env::var("DB_TYPE").unwrap_or_else(|_| "sqlite".to_string()))?;

        let health_monitor_secs: u64 = env::var("HEALTH_MONITOR_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("HEALTH_MONITOR_INTERVAL_SECS must be a number")?;
        if !(5..=300).contains(&health_monitor_secs) {
            anyhow::bail!("HEALTH_MONITOR_INTERVAL_SECS must be between 5 and 300");
        }

        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            db: DbConfig {
                kind: db_kind,
                sqlite_path: env::var("SQLITE_PATH").unwrap_or_else(|_| "dispatcher.db".to_string()),
                pg_host: env::var("PG_HOST").unwrap_or_else(|_| "localhost".to_string()),
                pg_port: env::var("PG_PORT")
                    .unwrap_or_else(|_| "5432".to_string())
                    .parse()
                    .context("PG_PORT must be a valid number")?,
                pg_db: env::var("PG_DB").unwrap_or_else(|_| "dispatcher".to_string()),
                pg_schema: env::var("PG_SCHEMA").unwrap_or_else(|_| "public".to_string()),
                pg_user: env::var("PG_USER").unwrap_or_else(|_| "postgres".to_string()),
                pg_pwd: env::var("PG_PWD").unwrap_or_default(),
                use_managed_identity: env::var("USE_MANAGED_IDENTITY")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
                pg_managed_identity_user: env::var("PG_MANAGED_IDENTITY_USER").ok(),
            },
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "dispatcher".to_string()),
            health_monitor_interval: Duration::from_secs(health_monitor_secs),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "./job-logs".to_string()),
        })
    }
}
