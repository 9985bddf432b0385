use super::{text_value, Table, Warehouse};
use crate::config::Database;
use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// File-backed warehouse. `database.database` is the path to the SQLite file,
/// which must already exist; it is opened read-only.
pub struct SqliteWarehouse {
    path: PathBuf,
    busy_timeout: Option<Duration>,
}

impl SqliteWarehouse {
    pub fn new(db: &Database) -> Self {
        let busy_timeout = match db.query_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs.into())),
        };
        Self {
            path: PathBuf::from(&db.database),
            busy_timeout,
        }
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("opening sqlite database: {}", self.path.display()))?;
        if let Some(t) = self.busy_timeout {
            conn.busy_timeout(t)?;
        }
        Ok(conn)
    }
}

impl Warehouse for SqliteWarehouse {
    fn execute(&self, query: &str) -> Result<Table> {
        let conn = self.connect()?;
        debug!("sqlite query on {}", self.path.display());

        let mut stmt = conn.prepare(query).with_context(|| "preparing query")?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([]).with_context(|| "executing query")?;
        while let Some(row) = cursor.next().with_context(|| "fetching row")? {
            let mut values = Vec::with_capacity(width);
            for (i, column) in columns.iter().enumerate() {
                values.push(render(row.get_ref(i)?, column)?);
            }
            rows.push(values);
        }

        Ok(Table { columns, rows })
    }
}

fn render(v: ValueRef<'_>, column: &str) -> Result<Option<String>> {
    Ok(match v {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(text_value(t, column)?),
        ValueRef::Blob(b) => Some(b.iter().map(|x| format!("{x:02x}")).collect()),
    })
}
