//! SQLite run ledger.
//!
//! RULE: Only ledger.rs talks to the database.
//! The state machine calls ledger methods; it never executes SQL directly.
//!
//! The ledger is an audit trail, not a source of truth: resuming a run
//! only ever reads the checkpoint file.

use crate::{
    checkpoint::CheckpointHandle,
    error::SimResult,
    event::RunEventEntry,
    outcome::RunOutcome,
    policy::CheckpointTrigger,
    types::Turn,
};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct RunLedger {
    conn: Connection,
}

/// A checkpoint row, as recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub invocation_id: String,
    pub turn:          Turn,
    pub trigger:       String,
    pub checksum:      String,
    pub bytes:         usize,
}

/// An outcome row, as recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub invocation_id: String,
    pub status:        String,
    pub exit_code:     i32,
    pub final_turn:    Option<Turn>,
    pub error_kind:    Option<String>,
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl RunLedger {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: &Path) -> SimResult<Self> {
        let conn = Connection::open(path)?;
        // WAL mode: the scheduler may read while a run writes.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Open an in-memory ledger (the default when no path is configured).
    pub fn in_memory() -> SimResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> SimResult<()> {
        self.conn.execute_batch(include_str!("../../migrations/001_ledger.sql"))?;
        Ok(())
    }

    // ── Run ────────────────────────────────────────────────────

    /// Register a lineage. Later invocations of the same input are no-ops.
    pub fn register_run(
        &self,
        run_id: &str,
        input_sha256: &str,
        num_turns: Turn,
        layout_version: &str,
    ) -> SimResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO run (run_id, input_sha256, num_turns, layout_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, input_sha256, num_turns as i64, layout_version, now()],
        )?;
        Ok(())
    }

    // ── Invocation ─────────────────────────────────────────────

    pub fn start_invocation(
        &self,
        invocation_id: &str,
        run_id: &str,
        kernel: &str,
        start_turn: Turn,
    ) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO invocation (invocation_id, run_id, kernel, start_turn, runner_version, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                invocation_id,
                run_id,
                kernel,
                start_turn as i64,
                env!("CARGO_PKG_VERSION"),
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn invocation_count(&self, run_id: &str) -> SimResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM invocation WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &RunEventEntry) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO run_event (run_id, invocation_id, turn, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.run_id,
                entry.invocation_id,
                entry.turn as i64,
                entry.event_type,
                entry.payload,
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> SimResult<Vec<RunEventEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, invocation_id, turn, event_type, payload
             FROM run_event WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(RunEventEntry {
                    id:            Some(row.get(0)?),
                    run_id:        row.get(1)?,
                    invocation_id: row.get(2)?,
                    turn:          row.get::<_, i64>(3)? as Turn,
                    event_type:    row.get(4)?,
                    payload:       row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // ── Checkpoint ─────────────────────────────────────────────

    pub fn record_checkpoint(
        &self,
        run_id: &str,
        invocation_id: &str,
        trigger: CheckpointTrigger,
        handle: &CheckpointHandle,
    ) -> SimResult<()> {
        self.conn.execute(
            "INSERT INTO checkpoint (run_id, invocation_id, turn, trigger_kind, checksum, bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run_id,
                invocation_id,
                handle.turn as i64,
                trigger.as_str(),
                handle.checksum,
                handle.bytes as i64,
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn checkpoints_for_run(&self, run_id: &str) -> SimResult<Vec<CheckpointRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT invocation_id, turn, trigger_kind, checksum, bytes
             FROM checkpoint WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok(CheckpointRecord {
                    invocation_id: row.get(0)?,
                    turn:          row.get::<_, i64>(1)? as Turn,
                    trigger:       row.get(2)?,
                    checksum:      row.get(3)?,
                    bytes:         row.get::<_, i64>(4)? as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Outcome ────────────────────────────────────────────────

    pub fn record_outcome(&self, run_id: &str, invocation_id: &str, outcome: &RunOutcome) -> SimResult<()> {
        let kind = match &outcome.error {
            Some(e) => serde_json::to_value(e.kind)?.as_str().map(str::to_string),
            None => None,
        };
        let message = outcome.error.as_ref().map(|e| e.message.as_str());
        self.conn.execute(
            "INSERT INTO outcome (run_id, invocation_id, status, exit_code, final_turn, error_kind, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run_id,
                invocation_id,
                outcome.status.as_str(),
                outcome.exit_code,
                outcome.final_turn.map(|t| t as i64),
                kind,
                message,
                now(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_outcome(&self, run_id: &str) -> SimResult<Option<OutcomeRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT invocation_id, status, exit_code, final_turn, error_kind
                 FROM outcome WHERE run_id = ?1
                 ORDER BY id DESC LIMIT 1",
                params![run_id],
                |row| {
                    Ok(OutcomeRecord {
                        invocation_id: row.get(0)?,
                        status:        row.get(1)?,
                        exit_code:     row.get(2)?,
                        final_turn:    row.get::<_, Option<i64>>(3)?.map(|t| t as Turn),
                        error_kind:    row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }
}
