use crate::retry::{RejectDecision, RejectPolicy};
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::path::Path;

/// SQLite record of reports that failed to parse, so they can be backed off
/// and eventually quarantined instead of being re-read every cycle.
///
/// The entry is removed once the report leaves the search directory (ingested
/// or quarantined); the pending and
/// ingested directories stay the source of truth for "already processed".
pub struct Ledger {
    conn: Connection,
}

/// A row from the rejections table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub path: String,
    pub attempts: u32,
    pub first_rejected: i64,
    pub last_rejected: i64,
    pub not_before: i64,
    pub last_error: String,
}

impl Ledger {
    /// Opens (or creates) the ledger database at the given path.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rejections (
                path           TEXT PRIMARY KEY,
                attempts       INTEGER NOT NULL,
                first_rejected INTEGER NOT NULL,
                last_rejected  INTEGER NOT NULL,
                not_before     INTEGER NOT NULL DEFAULT 0,
                last_error     TEXT NOT NULL
            );",
        )?;

        Ok(Self { conn })
    }

    /// If the report is still backing off at `now`, returns the time it
    /// becomes eligible again.
    pub fn deferred_until(&self, path: &Path, now: i64) -> Result<Option<i64>> {
        let not_before: Option<i64> = self
            .conn
            .query_row(
                "SELECT not_before FROM rejections WHERE path = ?1",
                params![key(path)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(not_before.filter(|&t| t > now))
    }

    /// Count another rejection and apply the policy. A quarantine decision
    /// keeps the entry; the caller moves the file and then calls `clear`.
    pub fn record(
        &self,
        path: &Path,
        error: &str,
        now: i64,
        policy: &RejectPolicy,
    ) -> Result<RejectDecision> {
        let key = key(path);
        self.conn.execute(
            "INSERT INTO rejections (path, attempts, first_rejected, last_rejected, last_error)
             VALUES (?1, 1, ?2, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET
                attempts = attempts + 1,
                last_rejected = excluded.last_rejected,
                last_error = excluded.last_error",
            params![key, now, error],
        )?;

        let attempts: u32 = self.conn.query_row(
            "SELECT attempts FROM rejections WHERE path = ?1",
            params![key],
            |row| row.get(0),
        )?;

        let decision = policy.evaluate(attempts, now);
        match &decision {
            RejectDecision::Defer { not_before, .. } => {
                self.conn.execute(
                    "UPDATE rejections SET not_before = ?2 WHERE path = ?1",
                    params![key, not_before],
                )?;
            }
            RejectDecision::RetryNextCycle | RejectDecision::Quarantine { .. } => {
                self.conn.execute(
                    "UPDATE rejections SET not_before = 0 WHERE path = ?1",
                    params![key],
                )?;
            }
        }
        Ok(decision)
    }

    /// Forget a report. Returns whether an entry existed.
    pub fn clear(&self, path: &Path) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM rejections WHERE path = ?1", params![key(path)])?;
        Ok(removed > 0)
    }

    /// All entries, oldest first.
    pub fn list(&self) -> Result<Vec<Rejection>> {
        let mut stmt = self.conn.prepare(
            "SELECT path, attempts, first_rejected, last_rejected, not_before, last_error
             FROM rejections ORDER BY first_rejected ASC, path ASC",
        )?;
        let rows = stmt.query_map([], map_rejection)?;
        rows.collect()
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn map_rejection(row: &rusqlite::Row) -> Result<Rejection> {
    Ok(Rejection {
        path: row.get(0)?,
        attempts: row.get(1)?,
        first_rejected: row.get(2)?,
        last_rejected: row.get(3)?,
        not_before: row.get(4)?,
        last_error: row.get(5)?,
    })
}
