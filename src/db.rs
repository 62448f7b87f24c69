use crate::errors::{AppError, AppResult};
use crate::state::DbCommand;
use crate::watchlist::{self, UserProfile, WatchlistEntry, USER_KEY, WATCHLIST_KEY};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub type DbPool = Arc<Mutex<Connection>>;

pub fn init_db(data_dir: &Path) -> AppResult<DbPool> {
    std::fs::create_dir_all(data_dir).map_err(|e| AppError::Database(format!("create dir: {e}")))?;
    let db_path = data_dir.join("option_tracker.db");
    let conn = Connection::open(&db_path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    apply_schema(&conn)?;

    tracing::info!("database initialized at {}", db_path.display());
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
pub fn init_in_memory() -> AppResult<DbPool> {
    let conn = Connection::open_in_memory()?;
    apply_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn apply_schema(conn: &Connection) -> AppResult<()> {
    let schema = include_str!("../migrations/001_init.sql");
    conn.execute_batch(schema)?;
    Ok(())
}

/// Dedicated writer task. Reads commands from the bounded channel and owns all writes.
pub async fn run_db_writer(db: DbPool, mut rx: mpsc::Receiver<DbCommand>) {
    tracing::info!("db writer task started");

    while let Some(cmd) = rx.recv().await {
        if let Err(e) = execute_command(&db, cmd) {
            tracing::error!("db write error: {e}");
        }
    }

    tracing::info!("db writer task shutting down");
}

fn execute_command(db: &DbPool, cmd: DbCommand) -> AppResult<()> {
    let conn = db.lock().map_err(|e| AppError::Database(format!("lock poisoned: {e}")))?;

    match cmd {
        DbCommand::ToggleWatchlist { entry, reply } => {
            let result = read_watchlist(&conn).and_then(|mut list| {
                let added = watchlist::toggle(&mut list, entry);
                put_json(&conn, WATCHLIST_KEY, &list)?;
                Ok((added, list))
            });
            if let Ok((added, list)) = &result {
                tracing::info!(added, count = list.len(), "watchlist toggled");
            }
            let _ = reply.send(result);
        }
        DbCommand::RemoveWatchlist { key, reply } => {
            let result = read_watchlist(&conn).and_then(|mut list| {
                if watchlist::remove(&mut list, &key) {
                    put_json(&conn, WATCHLIST_KEY, &list)?;
                }
                Ok(list)
            });
            let _ = reply.send(result);
        }
        DbCommand::SaveUser { profile, reply } => {
            let result = put_json(&conn, USER_KEY, &profile);
            let _ = reply.send(result);
        }
        DbCommand::ClearUser { reply } => {
            let result = remove_key(&conn, USER_KEY);
            let _ = reply.send(result);
        }
    }
    Ok(())
}

// ── Blob helpers ──

fn get_blob(conn: &Connection, key: &str) -> AppResult<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM kv_store WHERE key = ?1", rusqlite::params![key], |row| {
            row.get::<_, String>(0)
        })
        .optional()?;
    Ok(value)
}

fn put_json<T: serde::Serialize>(conn: &Connection, key: &str, value: &T) -> AppResult<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, datetime('now'))",
        rusqlite::params![key, text],
    )?;
    Ok(())
}

fn remove_key(conn: &Connection, key: &str) -> AppResult<()> {
    conn.execute("DELETE FROM kv_store WHERE key = ?1", rusqlite::params![key])?;
    Ok(())
}

/// Malformed JSON is logged, the key dropped, and the value read as absent.
fn read_json<T: DeserializeOwned>(conn: &Connection, key: &str) -> AppResult<Option<T>> {
    let Some(text) = get_blob(conn, key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&text) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            tracing::warn!(key, error = %e, "discarding malformed stored value");
            remove_key(conn, key)?;
            Ok(None)
        }
    }
}

fn read_watchlist(conn: &Connection) -> AppResult<Vec<WatchlistEntry>> {
    Ok(read_json(conn, WATCHLIST_KEY)?.unwrap_or_default())
}

// ── Query helpers (cold path, these DO lock) ──

pub fn load_watchlist(db: &DbPool) -> AppResult<Vec<WatchlistEntry>> {
    let conn = db.lock().map_err(|e| AppError::Database(format!("lock: {e}")))?;
    read_watchlist(&conn)
}

pub fn load_user(db: &DbPool) -> AppResult<Option<UserProfile>> {
    let conn = db.lock().map_err(|e| AppError::Database(format!("lock: {e}")))?;
    read_json(&conn, USER_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::OptionType;
    use chrono::{NaiveDate, Utc};
    use tokio::sync::oneshot;

    fn entry(strike: f64) -> WatchlistEntry {
        WatchlistEntry::new(
            "AAPL",
            strike,
            NaiveDate::from_ymd_opt(2026, 12, 18).unwrap(),
            OptionType::Call,
            "Apple Inc.",
            3.1,
            Utc::now(),
        )
    }

    fn raw_put(db: &DbPool, key: &str, value: &str) {
        let conn = db.lock().unwrap();
        conn.execute("INSERT OR REPLACE INTO kv_store (key, value) VALUES (?1, ?2)", rusqlite::params![key, value])
            .unwrap();
    }

    #[test]
    fn test_toggle_persists_and_reloads() {
        let db = init_in_memory().unwrap();

        let (tx, mut rx) = oneshot::channel();
        execute_command(&db, DbCommand::ToggleWatchlist { entry: entry(200.0), reply: tx }).unwrap();
        let (added, list) = rx.try_recv().unwrap().unwrap();
        assert!(added);
        assert_eq!(list.len(), 1);

        let loaded = load_watchlist(&db).unwrap();
        assert_eq!(loaded, list);

        let (tx, mut rx) = oneshot::channel();
        execute_command(&db, DbCommand::ToggleWatchlist { entry: entry(200.0), reply: tx }).unwrap();
        let (added, list) = rx.try_recv().unwrap().unwrap();
        assert!(!added);
        assert!(list.is_empty());
        assert!(load_watchlist(&db).unwrap().is_empty());
    }

    #[test]
    fn test_remove_by_key() {
        let db = init_in_memory().unwrap();
        for strike in [190.0, 200.0] {
            let (tx, _rx) = oneshot::channel();
            execute_command(&db, DbCommand::ToggleWatchlist { entry: entry(strike), reply: tx }).unwrap();
        }
        let (tx, mut rx) = oneshot::channel();
        execute_command(
            &db,
            DbCommand::RemoveWatchlist { key: "AAPL_190_2026-12-18_calls".into(), reply: tx },
        )
        .unwrap();
        let list = rx.try_recv().unwrap().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].strike, 200.0);
    }

    #[test]
    fn test_malformed_watchlist_is_cleared() {
        let db = init_in_memory().unwrap();
        raw_put(&db, WATCHLIST_KEY, "{not json");
        assert!(load_watchlist(&db).unwrap().is_empty());

        let conn = db.lock().unwrap();
        assert_eq!(get_blob(&conn, WATCHLIST_KEY).unwrap(), None, "malformed key should be removed");
    }

    #[test]
    fn test_user_save_load_clear() {
        let db = init_in_memory().unwrap();
        assert_eq!(load_user(&db).unwrap(), None);

        let profile = UserProfile {
            id: "1234".into(),
            name: "Sam".into(),
            email: Some("sam@example.com".into()),
            picture: None,
            given_name: None,
            family_name: None,
            provider: Some("google".into()),
        };
        let (tx, mut rx) = oneshot::channel();
        execute_command(&db, DbCommand::SaveUser { profile: profile.clone(), reply: tx }).unwrap();
        rx.try_recv().unwrap().unwrap();
        assert_eq!(load_user(&db).unwrap(), Some(profile));

        let (tx, mut rx) = oneshot::channel();
        execute_command(&db, DbCommand::ClearUser { reply: tx }).unwrap();
        rx.try_recv().unwrap().unwrap();
        assert_eq!(load_user(&db).unwrap(), None);
    }

    #[test]
    fn test_malformed_user_is_cleared() {
        let db = init_in_memory().unwrap();
        raw_put(&db, USER_KEY, "[1, 2");
        assert_eq!(load_user(&db).unwrap(), None);
        assert_eq!(load_user(&db).unwrap(), None);
    }

    #[tokio::test]
    async fn test_writer_task_round_trip() {
        let db = init_in_memory().unwrap();
        let (db_tx, db_rx) = mpsc::channel(8);
        let writer = tokio::spawn(run_db_writer(db.clone(), db_rx));

        let (tx, rx) = oneshot::channel();
        db_tx.send(DbCommand::ToggleWatchlist { entry: entry(210.0), reply: tx }).await.unwrap();
        let (added, _) = rx.await.unwrap().unwrap();
        assert!(added);

        drop(db_tx);
        writer.await.unwrap();
        assert_eq!(load_watchlist(&db).unwrap().len(), 1);
    }
}
