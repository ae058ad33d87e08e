use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, ErrorCode, OpenFlags};

use super::{BatchOutcome, DbFailure, FailureClass, Interrupter, ResultSet, SqlBackend, SqlSession};

/// SQLite database file. The file must already exist; it is never created.
pub struct SqliteBackend {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqlBackend for SqliteBackend {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }

    fn connect(&self) -> Result<Box<dyn SqlSession>, DbFailure> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.path, flags).map_err(to_failure)?;
        conn.busy_timeout(self.busy_timeout).map_err(to_failure)?;
        Ok(Box::new(SqliteSession { conn }))
    }
}

struct SqliteSession {
    conn: Connection,
}

impl SqlSession for SqliteSession {
    fn execute(&mut self, sql: &str) -> Result<BatchOutcome, DbFailure> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN").map_err(to_failure)?;
        }

        let mut outcome = BatchOutcome::Affected(0);
        let mut batch = Batch::new(&self.conn, sql);
        while let Some(mut stmt) = batch.next().map_err(to_failure)? {
            if stmt.column_count() > 0 {
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let width = columns.len();
                let mut rows = stmt.query([]).map_err(to_failure)?;
                let mut collected = Vec::new();
                while let Some(row) = rows.next().map_err(to_failure)? {
                    let mut values = Vec::with_capacity(width);
                    for i in 0..width {
                        values.push(value_to_json(row.get_ref(i).map_err(to_failure)?));
                    }
                    collected.push(values);
                }
                outcome = BatchOutcome::Rows(ResultSet {
                    columns,
                    rows: collected,
                });
            } else {
                let changed = stmt.execute([]).map_err(to_failure)?;
                outcome = BatchOutcome::Affected(changed as u64);
            }
        }
        Ok(outcome)
    }

    fn commit(&mut self) -> Result<(), DbFailure> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT").map_err(to_failure)?;
        }
        Ok(())
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let handle = self.conn.get_interrupt_handle();
        Some(Box::new(move || handle.interrupt()))
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn to_failure(err: rusqlite::Error) -> DbFailure {
    let class = match err.sqlite_error_code() {
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => FailureClass::Unreachable,
        Some(
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::OperationInterrupted,
        ) => FailureClass::Timeout,
        Some(
            ErrorCode::PermissionDenied
            | ErrorCode::ReadOnly
            | ErrorCode::AuthorizationForStatementDenied,
        ) => FailureClass::Permission,
        _ => return DbFailure::from_message(err.to_string()),
    };
    DbFailure::new(class, err.to_string())
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(bytes) => serde_json::Value::from(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => {
            serde_json::Value::from(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
    }
}
