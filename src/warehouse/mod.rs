#[cfg(feature = "odbc")]
pub mod odbc;
pub mod sqlite;

use crate::config::Database;
use anyhow::Result;

pub use sqlite::SqliteWarehouse;

/// Rows as returned by the source, rendered to text. `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

/// Executes read queries. Each call opens its own connection and releases it
/// before returning, on success and on error.
pub trait Warehouse {
    fn execute(&self, query: &str) -> Result<Table>;
}

impl<W: Warehouse + ?Sized> Warehouse for Box<W> {
    fn execute(&self, query: &str) -> Result<Table> {
        (**self).execute(query)
    }
}

/// Picks the backend named by `database.driver`.
pub fn open(db: &Database) -> Result<Box<dyn Warehouse>> {
    if db.is_sqlite() {
        return Ok(Box::new(SqliteWarehouse::new(db)));
    }
    open_odbc(db)
}

#[cfg(feature = "odbc")]
fn open_odbc(db: &Database) -> Result<Box<dyn Warehouse>> {
    Ok(Box::new(odbc::OdbcWarehouse::new(db)?))
}

#[cfg(not(feature = "odbc"))]
fn open_odbc(db: &Database) -> Result<Box<dyn Warehouse>> {
    anyhow::bail!(
        "driver {:?} needs ODBC support; rebuild with `--features odbc` or use driver = \"sqlite\"",
        db.driver
    )
}

/// Decodes a text cell. Anything that is not valid UTF-8 is an error rather than
/// being replaced, so the CSV never carries altered values.
pub fn text_value(bytes: &[u8], column: &str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| anyhow::anyhow!("column {column:?}: value is not valid UTF-8: {e}"))
}

/// Names of the ODBC drivers registered on this machine.
#[cfg(feature = "odbc")]
pub fn drivers() -> Result<Vec<String>> {
    odbc::drivers()
}

#[cfg(not(feature = "odbc"))]
pub fn drivers() -> Result<Vec<String>> {
    anyhow::bail!("built without ODBC support; rebuild with `--features odbc`")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_value_refuses_non_utf8() {
        assert_eq!(text_value("Zoë".as_bytes(), "name").unwrap(), "Zoë");
        // 0xEB is `ë` in Windows-1252
        let err = text_value(b"Zo\xEB", "name").unwrap_err();
        assert!(err.to_string().contains("\"name\""));
    }
}
