//! Thin driver layer over `rusqlite`: connection setup, transaction state,
//! schema introspection and SQL trace logging. All higher layers go through
//! this type so that every statement is subject to the same logging and the
//! transaction counter cannot be bypassed.

use crate::error::{Result, TileDocError};
use crate::sql_functions::register_geometry_functions;
use log::{Level, log_enabled, trace};
use rusqlite::{Connection, OpenFlags, Statement};
use std::cell::Cell;
use std::path::Path;

/// The log target carrying every executed statement with its expanded
/// parameters (enable trace level for `tiledoc::sql` to see them).
pub(crate) const SQL_LOG_TARGET: &str = "tiledoc::sql";

pub(crate) struct DbConnection {
    conn: Connection,
    read_only: bool,
    transaction_count: Cell<u32>,
}

impl DbConnection {
    /// Open (creating if absent) a database file for read-write access and
    /// register the custom query functions.
    pub fn create_new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::wrap(conn, false)
    }

    /// Open an existing database file.
    pub fn open_existing<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI
        };
        let conn = Connection::open_with_flags(path, flags)?;
        Self::wrap(conn, read_only)
    }

    /// Open a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::wrap(Connection::open_in_memory()?, false)
    }

    fn wrap(conn: Connection, read_only: bool) -> Result<Self> {
        register_geometry_functions(&conn)?;
        Ok(Self {
            conn,
            read_only,
            transaction_count: Cell::new(0),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute a statement that returns no rows (DDL, plain commands).
    pub fn execute(&self, sql: &str) -> Result<()> {
        self.log_sql("execute", sql);
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Prepare a statement for binding and stepping by the caller.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        Ok(self.conn.prepare(sql)?)
    }

    /// Prepare via the connection's statement cache; used on hot insert
    /// paths where the SQL text repeats for the lifetime of the document.
    pub fn prepare_cached(&self, sql: &str) -> Result<rusqlite::CachedStatement<'_>> {
        Ok(self.conn.prepare_cached(sql)?)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Log a statement with its parameters expanded, if SQL tracing is on.
    pub fn log_statement(&self, statement: &Statement<'_>) {
        if log_enabled!(target: SQL_LOG_TARGET, Level::Trace) {
            match statement.expanded_sql() {
                Some(expanded) => self.log_sql("step", &expanded),
                None => self.log_sql("step", "**expansion failed**"),
            }
        }
    }

    fn log_sql(&self, operation: &str, sql: &str) {
        trace!(target: SQL_LOG_TARGET, "[{operation}] {sql}");
    }

    pub fn begin_transaction(&self) -> Result<()> {
        if self.is_transaction_pending() {
            return Err(TileDocError::TransactionMisuse(
                "'begin' while a transaction is already pending".to_string(),
            ));
        }

        self.execute("BEGIN;")?;
        self.transaction_count.set(self.transaction_count.get() + 1);
        Ok(())
    }

    pub fn end_transaction(&self, commit: bool) -> Result<()> {
        if !self.is_transaction_pending() {
            return Err(TileDocError::TransactionMisuse(
                "'commit'/'rollback' without a pending transaction".to_string(),
            ));
        }

        self.execute(if commit { "COMMIT;" } else { "ROLLBACK;" })?;
        self.transaction_count.set(self.transaction_count.get() - 1);
        Ok(())
    }

    pub fn is_transaction_pending(&self) -> bool {
        self.transaction_count.get() > 0
    }

    /// Column names and declared types of a table, via `pragma_table_info`.
    pub fn table_columns(&self, table_name: &str) -> Result<Vec<(String, String)>> {
        let mut statement = self
            .conn
            .prepare(&format!("SELECT name, type FROM pragma_table_info('{table_name}')"))?;
        let columns = statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<(String, String)>, _>>()?;
        Ok(columns)
    }

    /// Names of the indexes on a table, via `pragma_index_list`.
    pub fn index_names(&self, table_name: &str) -> Result<Vec<String>> {
        let mut statement = self
            .conn
            .prepare(&format!("SELECT name FROM pragma_index_list('{table_name}')"))?;
        let names = statement
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
