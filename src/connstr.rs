//! Connection string handling.
//!
//! Conninfo strings use the space-separated `key=value` form throughout the
//! agent. [`ConnString`] is the structured representation: discovery
//! synthesizes one from locator output, configuration entries are parsed
//! into one, and rendering back to text happens only at the boundary.

use sqlx::postgres::PgConnectOptions;
use thiserror::Error;

/// Errors produced while parsing a conninfo string.
#[derive(Debug, Error)]
pub enum ConnStringError {
    /// A token does not have the `key=value` form.
    #[error("malformed conninfo parameter: '{0}'")]
    MalformedParameter(String),

    /// The port value is not a valid number.
    #[error("invalid port value: '{0}'")]
    InvalidPort(String),
}

/// Structured conninfo. Only the keys the agent itself uses are modeled;
/// unrecognized keys are ignored during parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnString {
    pub application_name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub dbname: Option<String>,
    pub password: Option<String>,
}

impl ConnString {
    /// Parse a space-separated `key=value` conninfo string.
    ///
    /// # Errors
    /// Fails when a token has no `=` or the port does not parse.
    pub fn parse(s: &str) -> Result<Self, ConnStringError> {
        let mut conn = Self::default();

        for token in s.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| ConnStringError::MalformedParameter(token.to_string()))?;

            match key {
                "application_name" => conn.application_name = Some(value.to_string()),
                "host" => conn.host = Some(value.to_string()),
                "port" => {
                    let port = value
                        .parse::<u16>()
                        .map_err(|_| ConnStringError::InvalidPort(value.to_string()))?;
                    conn.port = Some(port);
                }
                "user" => conn.user = Some(value.to_string()),
                "dbname" => conn.dbname = Some(value.to_string()),
                "password" => conn.password = Some(value.to_string()),
                _ => {}
            }
        }

        Ok(conn)
    }

    /// Render back to `key=value` text in fixed key order.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(6);

        if let Some(ref v) = self.application_name {
            parts.push(format!("application_name={v}"));
        }
        if let Some(ref v) = self.host {
            parts.push(format!("host={v}"));
        }
        if let Some(port) = self.port {
            parts.push(format!("port={port}"));
        }
        if let Some(ref v) = self.user {
            parts.push(format!("user={v}"));
        }
        if let Some(ref v) = self.dbname {
            parts.push(format!("dbname={v}"));
        }
        if let Some(ref v) = self.password {
            parts.push(format!("password={v}"));
        }

        parts.join(" ")
    }

    /// Host used in service identifiers, falling back to loopback.
    pub fn host_or_default(&self) -> &str {
        self.host.as_deref().unwrap_or("127.0.0.1")
    }

    /// Port used in service identifiers, falling back to the Postgres default.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(5432)
    }

    /// Build sqlx connect options. A host beginning with `/` selects the
    /// UNIX socket directory.
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut opts = PgConnectOptions::new();

        if let Some(ref host) = self.host {
            if host.starts_with('/') {
                opts = opts.socket(host);
            } else {
                opts = opts.host(host);
            }
        }
        if let Some(port) = self.port {
            opts = opts.port(port);
        }
        if let Some(ref user) = self.user {
            opts = opts.username(user);
        }
        if let Some(ref dbname) = self.dbname {
            opts = opts.database(dbname);
        }
        if let Some(ref password) = self.password {
            opts = opts.password(password);
        }
        if let Some(ref name) = self.application_name {
            opts = opts.application_name(name);
        }

        opts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let conn =
            ConnString::parse("application_name=pgscv host=127.0.0.1 port=5432 user=pgscv dbname=postgres password=s3cret")
                .unwrap();

        assert_eq!(conn.application_name.as_deref(), Some("pgscv"));
        assert_eq!(conn.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(conn.port, Some(5432));
        assert_eq!(conn.user.as_deref(), Some("pgscv"));
        assert_eq!(conn.dbname.as_deref(), Some("postgres"));
        assert_eq!(conn.password.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let conn = ConnString::parse("host=db connect_timeout=5 sslmode=disable").unwrap();
        assert_eq!(conn.host.as_deref(), Some("db"));
        assert_eq!(conn.port, None);
    }

    #[test]
    fn test_parse_rejects_bare_token() {
        assert!(ConnString::parse("invalid").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_port() {
        assert!(ConnString::parse("host=db port=none").is_err());
        assert!(ConnString::parse("host=db port=99999").is_err());
    }

    #[test]
    fn test_render_round_trip() {
        let rendered = "application_name=pgscv host=/tmp port=5432 user=pgscv dbname=postgres";
        let conn = ConnString::parse(rendered).unwrap();
        assert_eq!(conn.render(), rendered);
    }

    #[test]
    fn test_render_skips_unset_keys() {
        let conn = ConnString {
            host: Some("10.0.0.1".to_string()),
            port: Some(6432),
            ..Default::default()
        };
        assert_eq!(conn.render(), "host=10.0.0.1 port=6432");
    }

    #[test]
    fn test_defaults_for_identifiers() {
        let conn = ConnString::parse("user=pgscv").unwrap();
        assert_eq!(conn.host_or_default(), "127.0.0.1");
        assert_eq!(conn.port_or_default(), 5432);
    }
}
