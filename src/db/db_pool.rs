use duckdb::{AccessMode, Config, Connection};
use parking_lot::Mutex;
use r2d2::ManageConnection;

pub const IN_MEMORY: &str = ":memory:";

pub struct DuckDBConnectionManager {
    connection_string: String,
    read_only: bool,
    // In-memory databases are per connection, so pooled handles clone this one
    shared: Option<Mutex<Connection>>,
}

impl DuckDBConnectionManager {
    pub fn new(connection_string: String, read_only: bool) -> Result<Self, duckdb::Error> {
        let shared = if connection_string == IN_MEMORY {
            Some(Mutex::new(Connection::open_in_memory()?))
        } else {
            None
        };

        Ok(Self {
            connection_string,
            read_only,
            shared,
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if let Some(shared) = &self.shared {
            return shared.lock().try_clone();
        }

        if self.read_only {
            let config = Config::default().access_mode(AccessMode::ReadOnly)?;
            Connection::open_with_flags(&self.connection_string, config)
        } else {
            Connection::open(&self.connection_string)
        }
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
