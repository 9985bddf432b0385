use super::{text_value, Table, Warehouse};
use crate::config::Database;
use anyhow::{Context, Result};
use odbc_api::{buffers::TextRowSet, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tracing::debug;

const BATCH_ROWS: usize = 5000;
const MAX_TEXT_BYTES: usize = 64 * 1024;

pub struct OdbcWarehouse {
    env: Environment,
    connection_string: String,
    server: String,
    login_timeout: Option<u32>,
    query_timeout: Option<usize>,
}

impl OdbcWarehouse {
    pub fn new(db: &Database) -> Result<Self> {
        let env = Environment::new().with_context(|| "allocating ODBC environment")?;
        Ok(Self {
            env,
            connection_string: db.odbc_connection_string(),
            server: format!("{},{}/{}", db.host, db.port, db.database),
            login_timeout: (db.login_timeout_seconds > 0).then_some(db.login_timeout_seconds),
            query_timeout: (db.query_timeout_seconds > 0)
                .then_some(db.query_timeout_seconds as usize),
        })
    }
}

impl Warehouse for OdbcWarehouse {
    fn execute(&self, query: &str) -> Result<Table> {
        let options = ConnectionOptions {
            login_timeout_sec: self.login_timeout,
            ..Default::default()
        };
        let conn = self
            .env
            .connect_with_connection_string(&self.connection_string, options)
            .with_context(|| format!("connecting to {}", self.server))?;
        debug!("odbc connected to {}", self.server);

        let Some(mut cursor) = conn
            .execute(query, (), self.query_timeout)
            .with_context(|| "executing query")?
        else {
            return Ok(Table::default());
        };

        let columns = cursor
            .column_names()?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        let buffers = TextRowSet::for_cursor(BATCH_ROWS, &mut cursor, Some(MAX_TEXT_BYTES))?;
        let mut block = cursor.bind_buffer(buffers)?;

        // A value longer than its column buffer fails the fetch instead of
        // reaching the CSV cut short.
        let mut rows = Vec::new();
        while let Some(batch) = block
            .fetch_with_truncation_check(true)
            .with_context(|| format!("fetching rows (value limit {MAX_TEXT_BYTES} bytes)"))?
        {
            for r in 0..batch.num_rows() {
                let row = columns
                    .iter()
                    .enumerate()
                    .map(|(c, name)| batch.at(c, r).map(|v| text_value(v, name)).transpose())
                    .collect::<Result<Vec<_>>>()?;
                rows.push(row);
            }
        }

        Ok(Table { columns, rows })
    }
}

pub fn drivers() -> Result<Vec<String>> {
    let env = Environment::new().with_context(|| "allocating ODBC environment")?;
    Ok(env
        .drivers()
        .with_context(|| "listing ODBC drivers")?
        .into_iter()
        .map(|d| d.description)
        .collect())
}
