//! SQLite table store for ad hoc querying.

use crate::error::{LedgerError, SinkError};
use crate::models::{HistoricalDataset, Market, PriceRecord, TIMESTAMP_FORMAT};
use crate::sinks::{Sink, SinkKind};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

pub struct TableStoreSink {
    path: PathBuf,
    table: String,
}

impl TableStoreSink {
    /// `table` is spliced into SQL, so it must be a plain identifier.
    pub fn new(path: impl Into<PathBuf>, table: &str) -> Result<Self, LedgerError> {
        if !is_identifier(table) {
            return Err(LedgerError::InvalidConfig(format!(
                "table name '{}' is not a valid SQL identifier",
                table
            )));
        }
        Ok(Self {
            path: path.into(),
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn open_read_only(&self) -> Result<Connection, SinkError> {
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(conn)
    }

    fn table_present(&self) -> Result<bool, SinkError> {
        let conn = self.open_read_only()?;
        let found = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&self.table],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl Sink for TableStoreSink {
    fn kind(&self) -> SinkKind {
        SinkKind::TableStore
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn exists(&self) -> bool {
        // An unreadable file counts as present so that loading reports it.
        self.path.is_file() && self.table_present().unwrap_or(true)
    }

    fn write(&self, dataset: &HistoricalDataset) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(&self.path)?;
        let tx = conn.transaction()?;

        // Rebuild inside one transaction: readers see the old table or the new one.
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table};
             CREATE TABLE {table} (
                 timestamp TEXT NOT NULL,
                 market TEXT NOT NULL,
                 price REAL NOT NULL,
                 source_file TEXT NOT NULL,
                 PRIMARY KEY (timestamp, market)
             ) WITHOUT ROWID;",
            table = self.table
        ))?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (timestamp, market, price, source_file) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ))?;
            for record in dataset {
                stmt.execute(params![
                    record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    record.market.as_str(),
                    record.price,
                    record.source_file,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn read(&self) -> Result<Vec<PriceRecord>, SinkError> {
        let conn = self.open_read_only()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT timestamp, market, price, source_file FROM {} ORDER BY timestamp, market",
            self.table
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(ts, market, price, source)| {
                let timestamp = NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT)
                    .map_err(|e| SinkError::Schema(format!("bad timestamp '{}': {}", ts, e)))?;
                let market = market.parse::<Market>().map_err(SinkError::Schema)?;
                Ok(PriceRecord::new(timestamp, market, price, source))
            })
            .collect()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
