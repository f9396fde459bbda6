use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, escape_like};

const TABLE: &str = "command_history";
const COLUMNS: &str = "id, command, context, timestamp";

/// One observed command. Written once, never updated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: i64,
    pub command: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only command log.
///
/// Methods are blocking; async callers should go through
/// `tokio::task::spawn_blocking`.
pub trait HistoryStore: Send + Sync {
    /// Append a command. The timestamp is assigned here.
    fn record(&self, command: &str, context: &str) -> Result<CommandRecord, StoreError>;

    fn get(&self, id: i64) -> Result<CommandRecord, StoreError>;

    /// Most recent first.
    fn recent(&self, limit: u32) -> Result<Vec<CommandRecord>, StoreError>;

    /// Records at or after `since`, oldest first.
    fn since(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<CommandRecord>, StoreError>;

    /// Records whose command starts with `prefix` (case-sensitive), most recent first.
    fn with_prefix(&self, prefix: &str, limit: u32) -> Result<Vec<CommandRecord>, StoreError>;

    fn count(&self) -> Result<u64, StoreError>;
}

/// SQLite-backed [`HistoryStore`].
#[derive(Clone)]
pub struct HistoryRepo {
    db: Database,
}

impl HistoryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<CommandRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params, |row| Ok(row_to_record(row)))?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().collect()
        })
    }
}

impl HistoryStore for HistoryRepo {
    fn record(&self, command: &str, context: &str) -> Result<CommandRecord, StoreError> {
        let timestamp = Utc::now();
        let stamp = timestamp.to_rfc3339_opts(SecondsFormat::Micros, false);

        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO command_history (command, context, timestamp) VALUES (?1, ?2, ?3)",
                params![command, context, stamp],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(id, command, "command recorded");

        Ok(CommandRecord {
            id,
            command: command.to_string(),
            context: context.to_string(),
            timestamp: row_helpers::parse_timestamp(&stamp, TABLE, "timestamp")?,
        })
    }

    fn get(&self, id: i64) -> Result<CommandRecord, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM command_history WHERE id = ?1");
        self.db.with_conn(|conn| {
            conn.query_row(&sql, [id], |row| Ok(row_to_record(row)))
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("command record {id}")))?
        })
    }

    fn recent(&self, limit: u32) -> Result<Vec<CommandRecord>, StoreError> {
        self.query(
            &format!("SELECT {COLUMNS} FROM command_history ORDER BY id DESC LIMIT ?1"),
            [limit],
        )
    }

    fn since(&self, since: DateTime<Utc>, limit: u32) -> Result<Vec<CommandRecord>, StoreError> {
        let stamp = since.to_rfc3339_opts(SecondsFormat::Micros, false);
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM command_history WHERE timestamp >= ?1
                 ORDER BY id ASC LIMIT ?2"
            ),
            params![stamp, limit],
        )
    }

    fn with_prefix(&self, prefix: &str, limit: u32) -> Result<Vec<CommandRecord>, StoreError> {
        // LIKE folds ASCII case; the substr check keeps the match exact.
        let pattern = format!("{}%", escape_like(prefix));
        self.query(
            &format!(
                "SELECT {COLUMNS} FROM command_history
                 WHERE command LIKE ?1 ESCAPE '\\' AND substr(command, 1, length(?2)) = ?2
                 ORDER BY id DESC LIMIT ?3"
            ),
            params![pattern, prefix, limit],
        )
    }

    fn count(&self) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM command_history", [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        })
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<CommandRecord, StoreError> {
    let raw_ts: String = row_helpers::get(row, 3, TABLE, "timestamp")?;
    Ok(CommandRecord {
        id: row_helpers::get(row, 0, TABLE, "id")?,
        command: row_helpers::get(row, 1, TABLE, "command")?,
        context: row_helpers::get(row, 2, TABLE, "context")?,
        timestamp: row_helpers::parse_timestamp(&raw_ts, TABLE, "timestamp")?,
    })
}
