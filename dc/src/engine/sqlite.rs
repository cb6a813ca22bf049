//! SQLite engine - payloads are single SQL statements
//!
//! Queries answer with a JSON array of row objects, other statements with
//! `{"changes": n}`. Databases live under a directory, or in memory when no
//! directory is configured (in which case they die with their owner).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Engine, EngineHandle};
use crate::domain::ResourceName;
use crate::error::{CoordError, CoordResult};

fn engine_err(e: impl std::fmt::Display) -> CoordError {
    CoordError::Engine(e.to_string())
}

/// Engine backed by rusqlite connections, one per open handle
#[derive(Clone)]
pub struct SqliteEngine {
    dir: Option<PathBuf>,
    conns: Arc<Mutex<HashMap<Uuid, Connection>>>,
}

impl SqliteEngine {
    /// Databases stored as files under `dir`
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            conns: Arc::default(),
        }
    }

    /// Databases kept in memory
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            conns: Arc::default(),
        }
    }

    fn run(conn: &Connection, sql: &str) -> CoordResult<Value> {
        let mut stmt = conn.prepare(sql).map_err(engine_err)?;

        if stmt.column_count() == 0 {
            let changes = stmt.execute([]).map_err(engine_err)?;
            return Ok(json!({ "changes": changes }));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([]).map_err(engine_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(engine_err)? {
            let mut obj = serde_json::Map::new();
            for (i, col) in columns.iter().enumerate() {
                let value = match row.get_ref(i).map_err(engine_err)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => json!(v),
                    ValueRef::Real(v) => json!(v),
                    ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
                    ValueRef::Blob(b) => json!(b),
                };
                obj.insert(col.clone(), value);
            }
            out.push(Value::Object(obj));
        }
        Ok(Value::Array(out))
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn open(&self, name: &ResourceName) -> CoordResult<EngineHandle> {
        debug!(%name, "SqliteEngine::open: called");
        let path = self.dir.as_ref().map(|dir| dir.join(name.file_stem()));
        if let Some(path) = &path {
            info!(%name, path = %path.display(), "Opening database file");
        }

        let conn = tokio::task::spawn_blocking(move || -> CoordResult<Connection> {
            match path {
                Some(path) => {
                    if let Some(dir) = path.parent() {
                        std::fs::create_dir_all(dir)?;
                    }
                    Connection::open(&path).map_err(engine_err)
                }
                None => Connection::open_in_memory().map_err(engine_err),
            }
        })
        .await
        .map_err(|e| engine_err(format!("open task failed: {}", e)))??;

        let handle = EngineHandle::new(name.clone());
        self.conns
            .lock()
            .map_err(|_| CoordError::Engine("connection table poisoned".to_string()))?
            .insert(handle.id(), conn);
        Ok(handle)
    }

    async fn close(&self, handle: EngineHandle) -> CoordResult<()> {
        debug!(name = %handle.name(), "SqliteEngine::close: called");
        let conn = self
            .conns
            .lock()
            .map_err(|_| CoordError::Engine("connection table poisoned".to_string()))?
            .remove(&handle.id());
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| engine_err(e))?;
        }
        Ok(())
    }

    async fn execute(&self, handle: &EngineHandle, payload: Vec<u8>) -> CoordResult<Vec<u8>> {
        let sql = String::from_utf8(payload).map_err(|e| CoordError::Engine(format!("payload is not UTF-8: {}", e)))?;
        debug!(name = %handle.name(), %sql, "SqliteEngine::execute: called");

        let conns = Arc::clone(&self.conns);
        let id = handle.id();
        let name = handle.name().clone();
        let result = tokio::task::spawn_blocking(move || -> CoordResult<Value> {
            let conns = conns
                .lock()
                .map_err(|_| CoordError::Engine("connection table poisoned".to_string()))?;
            let conn = conns
                .get(&id)
                .ok_or_else(|| CoordError::Engine(format!("{} is not open", name)))?;
            Self::run(conn, &sql)
        })
        .await
        .map_err(|e| engine_err(format!("execute task failed: {}", e)))??;

        serde_json::to_vec(&result).map_err(engine_err)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn exec(engine: &SqliteEngine, handle: &EngineHandle, sql: &str) -> Value {
        let out = engine.execute(handle, sql.as_bytes().to_vec()).await.unwrap();
        serde_json::from_slice(&out).unwrap()
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let engine = SqliteEngine::in_memory();
        let handle = engine.open(&ResourceName::from("db1")).await.unwrap();

        let created = exec(&engine, &handle, "CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER)").await;
        assert_eq!(created["changes"], 0);

        let inserted = exec(&engine, &handle, "INSERT INTO kv VALUES ('a', 1), ('b', 2)").await;
        assert_eq!(inserted["changes"], 2);

        let rows = exec(&engine, &handle, "SELECT k, v FROM kv ORDER BY k").await;
        assert_eq!(rows, json!([{"k": "a", "v": 1}, {"k": "b", "v": 2}]));
    }

    #[tokio::test]
    async fn test_bad_sql_is_engine_error() {
        let engine = SqliteEngine::in_memory();
        let handle = engine.open(&ResourceName::from("db1")).await.unwrap();

        let err = engine.execute(&handle, b"SELEKT 1".to_vec()).await.unwrap_err();
        assert!(matches!(err, CoordError::Engine(_)));
    }

    #[tokio::test]
    async fn test_on_disk_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let engine = SqliteEngine::on_disk(dir.path());
        let name = ResourceName::from("shared.db");

        let handle = engine.open(&name).await.unwrap();
        exec(&engine, &handle, "CREATE TABLE t (x INTEGER)").await;
        exec(&engine, &handle, "INSERT INTO t VALUES (42)").await;
        engine.close(handle).await.unwrap();

        // A new owner reopening the same file sees the data
        let other = SqliteEngine::on_disk(dir.path());
        let handle = other.open(&name).await.unwrap();
        let rows = exec(&other, &handle, "SELECT x FROM t").await;
        assert_eq!(rows, json!([{"x": 42}]));
    }

    #[tokio::test]
    async fn test_similar_names_get_separate_files() {
        let dir = TempDir::new().unwrap();
        let engine = SqliteEngine::on_disk(dir.path());

        let nested = engine.open(&ResourceName::from("x/y.db")).await.unwrap();
        exec(&engine, &nested, "CREATE TABLE t (v INTEGER)").await;
        exec(&engine, &nested, "INSERT INTO t VALUES (1)").await;

        let flat = engine.open(&ResourceName::from("x_y.db")).await.unwrap();
        let err = engine.execute(&flat, b"SELECT v FROM t".to_vec()).await.unwrap_err();
        assert!(matches!(err, CoordError::Engine(_)));
    }
}
