/// Database collaborator: one row in `security` per logged artifact.
use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::runtime::Handle;

const MAX_CONNECTIONS: u32 = 2;

/// Values bound into one insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRecord {
    pub camera: i32,
    pub filename: String,
    /// Frame number within the current second.
    pub frame: i32,
    pub file_type: i32,
    pub time_stamp: NaiveDateTime,
    pub text_left: Option<String>,
}

pub trait Database: Send {
    fn execute_insert(&mut self, record: &SecurityRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
}

impl Dialect {
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("mysql://") || url.starts_with("mariadb://") {
            Ok(Dialect::MySql)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Dialect::Postgres)
        } else {
            bail!("Unsupported database URL scheme (expected mysql:// or postgres://)");
        }
    }
}

/// Insert statement for `dialect`, with or without the caption column.
pub fn insert_sql(dialect: Dialect, with_text: bool) -> &'static str {
    match (dialect, with_text) {
        (Dialect::MySql, false) => {
            "INSERT INTO security (camera, filename, frame, file_type, time_stamp) \
             VALUES (?, ?, ?, ?, ?)"
        }
        (Dialect::MySql, true) => {
            "INSERT INTO security (camera, filename, frame, file_type, time_stamp, text_left) \
             VALUES (?, ?, ?, ?, ?, ?)"
        }
        (Dialect::Postgres, false) => {
            "INSERT INTO security (camera, filename, frame, file_type, time_stamp) \
             VALUES ($1, $2, $3, $4, $5)"
        }
        (Dialect::Postgres, true) => {
            "INSERT INTO security (camera, filename, frame, file_type, time_stamp, text_left) \
             VALUES ($1, $2, $3, $4, $5, $6)"
        }
    }
}

enum Pool {
    MySql(MySqlPool),
    Postgres(PgPool),
}

/// sqlx-backed database. Inserts block the calling (blocking-pool) thread on
/// the runtime that owns the pool.
pub struct SqlDatabase {
    pool: Pool,
    runtime: Handle,
}

impl SqlDatabase {
    /// Creates a lazy pool; no connection is made until the first insert.
    /// Must be called from within the tokio runtime.
    pub fn connect_lazy(url: &str, runtime: Handle) -> Result<Self> {
        let pool = match Dialect::from_url(url)? {
            Dialect::MySql => Pool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .connect_lazy(url)
                    .context("Invalid MySQL connection URL")?,
            ),
            Dialect::Postgres => Pool::Postgres(
                PgPoolOptions::new()
                    .max_connections(MAX_CONNECTIONS)
                    .connect_lazy(url)
                    .context("Invalid PostgreSQL connection URL")?,
            ),
        };
        Ok(Self { pool, runtime })
    }
}

impl Database for SqlDatabase {
    fn execute_insert(&mut self, record: &SecurityRecord) -> Result<()> {
        let with_text = record.text_left.is_some();
        let rows = match &self.pool {
            Pool::MySql(pool) => {
                let mut q = sqlx::query(insert_sql(Dialect::MySql, with_text))
                    .bind(record.camera)
                    .bind(&record.filename)
                    .bind(record.frame)
                    .bind(record.file_type)
                    .bind(record.time_stamp);
                if let Some(text) = &record.text_left {
                    q = q.bind(text);
                }
                self.runtime
                    .block_on(q.execute(pool))
                    .context("Insert into security failed")?
                    .rows_affected()
            }
            Pool::Postgres(pool) => {
                let mut q = sqlx::query(insert_sql(Dialect::Postgres, with_text))
                    .bind(record.camera)
                    .bind(&record.filename)
                    .bind(record.frame)
                    .bind(record.file_type)
                    .bind(record.time_stamp);
                if let Some(text) = &record.text_left {
                    q = q.bind(text);
                }
                self.runtime
                    .block_on(q.execute(pool))
                    .context("Insert into security failed")?
                    .rows_affected()
            }
        };
        log::debug!("[database] Inserted {rows} row(s) for {}", record.filename);
        Ok(())
    }
}
