//! Engine locator: derives connection parameters for discovered processes
//! from their on-disk runtime metadata.
//!
//! Postgres publishes its listen settings in `<datadir>/postmaster.pid`, a
//! line-positional file; Pgbouncer keeps them in its ini config whose path
//! appears on the command line. Both paths end in a [`ConnectionParams`]
//! value from which a conninfo is synthesized.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::connstr::ConnString;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PGBOUNCER_PORT: u16 = 6432;
const DEFAULT_POSTGRES_USERNAME: &str = "pgscv";
const DEFAULT_POSTGRES_DBNAME: &str = "postgres";
const DEFAULT_PGBOUNCER_USERNAME: &str = "pgscv";
const DEFAULT_PGBOUNCER_DBNAME: &str = "pgbouncer";

/// Errors produced while reading process metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// The postgres command line has no `-D <datadir>` argument.
    #[error("data directory argument not found")]
    DataDirArgMissing,

    /// The pgbouncer command line has no config file argument.
    #[error("config file argument not found")]
    ConfigFileArgMissing,

    /// A metadata file could not be read.
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A line-positional file has fewer lines than required.
    #[error("{path}: want {want} lines, got {got}")]
    TooFewLines {
        path: PathBuf,
        want: usize,
        got: usize,
    },

    /// A numeric field did not parse.
    #[error("invalid {field} value: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
}

/// Connection parameters extracted from process metadata. Transient: used
/// to synthesize a conninfo and a service id, then dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    pub pid: i32,
    pub datadir: PathBuf,
    pub start_ts: i64,
    pub unix_socket_dir: String,
    pub listen_addr: String,
    pub listen_port: u16,
}

/// Extract the data directory from a postgres command line (`-D <path>`).
pub fn parse_postgres_cmdline(cmdline: &[String]) -> Result<PathBuf, MetadataError> {
    for (i, arg) in cmdline.iter().enumerate() {
        if arg == "-D" {
            if let Some(path) = cmdline.get(i + 1) {
                return Ok(PathBuf::from(path));
            }
        }
    }
    Err(MetadataError::DataDirArgMissing)
}

/// Extract the config file path from a pgbouncer command line: the first
/// argument after the executable that is not a flag.
pub fn parse_pgbouncer_cmdline(cmdline: &[String]) -> Result<PathBuf, MetadataError> {
    for arg in cmdline.iter().skip(1) {
        if !arg.starts_with('-') {
            return Ok(PathBuf::from(arg));
        }
    }
    Err(MetadataError::ConfigFileArgMissing)
}

/// Read connection parameters from a `postmaster.pid` file.
pub fn read_postmaster_pid(path: &Path) -> Result<ConnectionParams, MetadataError> {
    let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_postmaster_pid(&content, path)
}

/// Parse `postmaster.pid` content. The first six lines are, in order: pid,
/// data directory, start timestamp, listen port, UNIX socket directory and
/// listen address. A `*` listen address means "all interfaces" and is
/// normalized to loopback.
fn parse_postmaster_pid(content: &str, path: &Path) -> Result<ConnectionParams, MetadataError> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < 6 {
        return Err(MetadataError::TooFewLines {
            path: path.to_path_buf(),
            want: 6,
            got: lines.len(),
        });
    }

    let pid = lines[0]
        .trim()
        .parse::<i32>()
        .map_err(|_| MetadataError::InvalidNumber {
            field: "pid",
            value: lines[0].to_string(),
        })?;
    let start_ts = lines[2]
        .trim()
        .parse::<i64>()
        .map_err(|_| MetadataError::InvalidNumber {
            field: "start timestamp",
            value: lines[2].to_string(),
        })?;
    let listen_port = lines[3]
        .trim()
        .parse::<u16>()
        .map_err(|_| MetadataError::InvalidNumber {
            field: "listen port",
            value: lines[3].to_string(),
        })?;

    let listen_addr = match lines[5].trim() {
        "*" => DEFAULT_HOST.to_string(),
        addr => addr.to_string(),
    };

    Ok(ConnectionParams {
        pid,
        datadir: PathBuf::from(lines[1].trim()),
        start_ts,
        unix_socket_dir: lines[4].trim().to_string(),
        listen_addr,
        listen_port,
    })
}

/// Read connection parameters from a pgbouncer ini file.
pub fn read_pgbouncer_ini(path: &Path) -> Result<ConnectionParams, MetadataError> {
    let content = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_pgbouncer_ini(&content)
}

/// Parse pgbouncer ini content. Only `listen_addr`, `listen_port` and
/// `unix_socket_dir` are of interest; the first comma-separated listen
/// address wins and `*` is normalized to loopback. Missing settings fall
/// back to the pgbouncer built-in defaults.
fn parse_pgbouncer_ini(content: &str) -> Result<ConnectionParams, MetadataError> {
    let mut params = ConnectionParams::default();

    for line in content.lines() {
        if line.starts_with(';') || line.starts_with('#') || line.is_empty() {
            continue;
        }

        let collapsed: String = line.split_whitespace().collect();
        let parts: Vec<&str> = collapsed.split('=').collect();
        if parts.len() != 2 {
            // unset parameters keep their defaults
            continue;
        }

        match parts[0] {
            "listen_addr" => {
                let first = parts[1].split(',').next().unwrap_or("");
                params.listen_addr = if first == "*" {
                    DEFAULT_HOST.to_string()
                } else {
                    first.to_string()
                };
            }
            "listen_port" => {
                params.listen_port =
                    parts[1]
                        .parse::<u16>()
                        .map_err(|_| MetadataError::InvalidNumber {
                            field: "listen_port",
                            value: parts[1].to_string(),
                        })?;
            }
            "unix_socket_dir" => {
                params.unix_socket_dir = parts[1].to_string();
            }
            _ => {}
        }
    }

    if params.unix_socket_dir.is_empty() {
        params.unix_socket_dir = "/tmp".to_string();
    }
    if params.listen_port == 0 {
        params.listen_port = DEFAULT_PGBOUNCER_PORT;
    }

    Ok(params)
}

/// Synthesize a postgres conninfo from locator output and the user's
/// defaults map. With `unix` set, the UNIX socket directory is used as the
/// host; otherwise the TCP listen address.
pub fn postgres_conninfo(
    params: &ConnectionParams,
    defaults: &BTreeMap<String, String>,
    unix: bool,
) -> ConnString {
    let host = if unix {
        (!params.unix_socket_dir.is_empty()).then(|| params.unix_socket_dir.clone())
    } else {
        (!params.listen_addr.is_empty()).then(|| params.listen_addr.clone())
    };

    ConnString {
        application_name: Some("pgscv".to_string()),
        host,
        port: (params.listen_port > 0).then_some(params.listen_port),
        user: Some(
            defaults
                .get("postgres_username")
                .cloned()
                .unwrap_or_else(|| DEFAULT_POSTGRES_USERNAME.to_string()),
        ),
        dbname: Some(
            defaults
                .get("postgres_dbname")
                .cloned()
                .unwrap_or_else(|| DEFAULT_POSTGRES_DBNAME.to_string()),
        ),
        password: defaults.get("postgres_password").cloned(),
    }
}

/// Synthesize a pgbouncer conninfo. The admin console database is always
/// `pgbouncer`; the TCP listen address is preferred over the socket
/// directory.
pub fn pgbouncer_conninfo(
    params: &ConnectionParams,
    defaults: &BTreeMap<String, String>,
) -> ConnString {
    let host = if !params.listen_addr.is_empty() {
        Some(params.listen_addr.clone())
    } else if !params.unix_socket_dir.is_empty() {
        Some(params.unix_socket_dir.clone())
    } else {
        None
    };

    ConnString {
        application_name: Some("pgscv".to_string()),
        host,
        port: (params.listen_port > 0).then_some(params.listen_port),
        user: Some(
            defaults
                .get("pgbouncer_username")
                .cloned()
                .unwrap_or_else(|| DEFAULT_PGBOUNCER_USERNAME.to_string()),
        ),
        dbname: Some(DEFAULT_PGBOUNCER_DBNAME.to_string()),
        password: defaults.get("pgbouncer_password").cloned(),
    }
}
