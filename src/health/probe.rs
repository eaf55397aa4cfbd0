//! Data store reachability probes.

use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DatabaseConfig, DatabaseKind};

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// A cheap round trip to the data store the daemon depends on.
pub trait DatabaseProbe: Send + Sync {
    /// Short label used in reports.
    fn name(&self) -> &str;

    fn ping(&self, timeout: Duration) -> io::Result<()>;
}

/// Connects to a database server and drops the connection.
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl DatabaseProbe for TcpProbe {
    fn name(&self) -> &str {
        "tcp"
    }

    fn ping(&self, timeout: Duration) -> io::Result<()> {
        let mut last_error = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", self.address),
            )
        }))
    }
}

/// Opens an SQLite file and checks its header.
pub struct SqliteProbe {
    path: PathBuf,
}

impl SqliteProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatabaseProbe for SqliteProbe {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn ping(&self, _timeout: Duration) -> io::Result<()> {
        let mut header = [0u8; 16];
        File::open(&self.path)?.read_exact(&mut header)?;
        if &header != SQLITE_HEADER {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not an SQLite database", self.path.display()),
            ));
        }
        Ok(())
    }
}

/// Used when the daemon has no data store.
pub struct NoDatabase;

impl DatabaseProbe for NoDatabase {
    fn name(&self) -> &str {
        "none"
    }

    fn ping(&self, _timeout: Duration) -> io::Result<()> {
        Ok(())
    }
}

pub fn probe_from_config(config: &DatabaseConfig) -> Arc<dyn DatabaseProbe> {
    match (config.kind, &config.address, &config.path) {
        (DatabaseKind::Tcp, Some(address), _) => Arc::new(TcpProbe::new(address.clone())),
        (DatabaseKind::Sqlite, _, Some(path)) => Arc::new(SqliteProbe::new(path.clone())),
        _ => Arc::new(NoDatabase),
    }
}
