//! # Catalog Store
//!
//! SQLite persistence for action descriptors (`.flowpilot/catalog.db`).
//! Written by the offline import; read once at startup to build the
//! in-memory [`ActionIndex`].

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::descriptor::{ActionDescriptor, Platform};
use super::embedding::Embedder;
use super::index::ActionIndex;
use crate::error::IndexError;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    /// Open or create the catalog at `path`
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create catalog directory {}", parent.display())
            })?;
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open catalog database")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an existing catalog without creating or migrating it
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Catalog not found at {}", path.as_ref().display()))?;

        let version: i32 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
                row.get(0)
            })
            .context("Catalog has no schema version table")?;
        if version < SCHEMA_VERSION {
            anyhow::bail!(
                "Catalog schema version {} is older than {}; re-run the import",
                version,
                SCHEMA_VERSION
            );
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS actions (
                id TEXT PRIMARY KEY,
                platform TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                parameters_json TEXT NOT NULL DEFAULT '{}',
                embedding_json TEXT NOT NULL DEFAULT '[]',
                embedder TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_actions_platform ON actions(platform)",
            [],
        )?;

        tracing::info!("Catalog initialized with schema version {}", SCHEMA_VERSION);
        Ok(())
    }

    /// Insert or replace descriptors; returns the number written
    pub fn insert(&self, descriptors: &[ActionDescriptor], embedder: &str) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        for d in descriptors {
            tx.execute(
                r#"
                INSERT OR REPLACE INTO actions
                    (id, platform, title, description, parameters_json, embedding_json, embedder, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    d.id,
                    d.platform.slug(),
                    d.title,
                    d.description,
                    serde_json::to_string(&d.parameters)?,
                    serde_json::to_string(&d.embedding)?,
                    embedder,
                    now,
                ],
            )?;
        }
        tx.commit()?;

        tracing::info!(count = descriptors.len(), embedder, "Stored actions");
        Ok(descriptors.len())
    }

    /// Load descriptors, optionally restricted to one platform, ordered by id
    pub fn load_corpus(&self, platform: Option<Platform>) -> Result<Vec<ActionDescriptor>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, platform, title, description, parameters_json, embedding_json
            FROM actions
            WHERE ?1 IS NULL OR platform = ?1
            ORDER BY id
            "#,
        )?;

        let rows = stmt.query_map(params![platform.map(|p| p.slug())], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut corpus = Vec::new();
        for row in rows {
            let (id, platform, title, description, parameters_json, embedding_json) = row?;
            let platform: Platform = platform
                .parse()
                .map_err(|e: String| anyhow::anyhow!("Action {}: {}", id, e))?;
            let parameters: BTreeMap<String, String> = serde_json::from_str(&parameters_json)
                .with_context(|| format!("Action {} has invalid parameters", id))?;
            let embedding: Vec<f32> = serde_json::from_str(&embedding_json)
                .with_context(|| format!("Action {} has invalid embedding", id))?;
            corpus.push(ActionDescriptor {
                id,
                platform,
                title,
                description,
                parameters,
                embedding,
            });
        }
        Ok(corpus)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM actions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Distinct platforms present in the catalog
    pub fn platforms(&self) -> Result<Vec<Platform>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT platform FROM actions ORDER BY platform")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut platforms = Vec::new();
        for row in rows {
            if let Ok(platform) = row?.parse() {
                platforms.push(platform);
            }
        }
        platforms.sort();
        Ok(platforms)
    }

    /// Embedder names used by stored rows
    pub fn embedders(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT DISTINCT embedder FROM actions ORDER BY embedder")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }
        Ok(names)
    }
}

/// Open the catalog at `path` and build the in-memory index from it.
pub fn load_index(
    path: impl AsRef<Path>,
    embedder: Box<dyn Embedder>,
) -> Result<ActionIndex, IndexError> {
    let path = path.as_ref();
    let store = CatalogStore::open_read_only(path)
        .map_err(|e| IndexError::unavailable(format!("{:#}", e)))?;
    let corpus = store
        .load_corpus(None)
        .map_err(|e| IndexError::unavailable(format!("{:#}", e)))?;

    if let Ok(names) = store.embedders() {
        let expected = embedder.name();
        if names.iter().any(|n| *n != expected) {
            tracing::warn!(
                stored = ?names,
                configured = %expected,
                "Catalog was embedded with a different embedder; similarities may be meaningless"
            );
        }
    }

    tracing::info!(path = %path.display(), actions = corpus.len(), "Loaded catalog");
    Ok(ActionIndex::build(corpus, embedder))
}
