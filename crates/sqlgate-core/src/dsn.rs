// SPDX-License-Identifier: Apache-2.0

//! Connection string builders
//!
//! Each backend has its own connection-string grammar. The cleaned parameter
//! map is first sorted into the fields every backend understands plus an
//! open bag of backend-specific options, then rendered by one strategy per
//! [`Driver`]. Rendering is pure: the same driver and parameters always give
//! the same string.
//!
//! - `host`, `port`, `user`, `password`, `database` are shared by all drivers.
//! - `dsn`, when it holds a string, is used verbatim and everything else is ignored.
//! - Any other key is passed to the backend in its native option syntax.

use std::collections::BTreeMap;

use crate::driver::Driver;
use crate::types::{CleanedParams, Scalar};

/// Reserved key carrying a ready-made connection string.
pub const DSN_OVERRIDE_KEY: &str = "dsn";

const MYSQL_DEFAULT_PORT: i64 = 3306;
const ORACLE_DEFAULT_PORT: i64 = 1521;
const DEFAULT_HOST: &str = "localhost";
const SQLITE_MEMORY: &str = ":memory:";

/// Typed view over a cleaned parameter map
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionParams {
    pub host: Option<Scalar>,
    pub port: Option<Scalar>,
    pub user: Option<Scalar>,
    pub password: Option<Scalar>,
    pub database: Option<Scalar>,
    /// Verbatim connection string; bypasses every builder.
    pub dsn: Option<String>,
    /// Backend-specific options, sorted by key.
    pub extra: BTreeMap<String, Scalar>,
}

impl ConnectionParams {
    pub fn from_cleaned(params: &CleanedParams) -> Self {
        let mut out = Self::default();
        for (key, value) in params {
            let value = value.clone();
            match key.as_str() {
                "host" => out.host = Some(value),
                "port" => out.port = Some(value),
                "user" => out.user = Some(value),
                "password" => out.password = Some(value),
                "database" => out.database = Some(value),
                DSN_OVERRIDE_KEY => match value {
                    Scalar::Text(dsn) => out.dsn = Some(dsn),
                    other => {
                        out.extra.insert(key.clone(), other);
                    }
                },
                _ => {
                    out.extra.insert(key.clone(), value);
                }
            }
        }
        out
    }

    /// Renders the connection string for `driver`.
    pub fn build(&self, driver: Driver) -> String {
        if let Some(dsn) = &self.dsn {
            return dsn.clone();
        }

        match driver {
            Driver::Postgres => self.postgres(),
            Driver::MySql => self.mysql(),
            Driver::Sqlite => self.sqlite(),
            Driver::SqlServer => self.mssql(),
            Driver::Oracle => self.oracle(),
        }
    }

    /// Known fields in fixed order, then extension keys.
    fn pairs(&self) -> Vec<(&str, &Scalar)> {
        let known = [
            ("host", &self.host),
            ("port", &self.port),
            ("user", &self.user),
            ("password", &self.password),
            ("database", &self.database),
        ];
        known
            .into_iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
            .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v)))
            .collect()
    }

    fn query_string(&self) -> String {
        self.extra
            .iter()
            .map(|(k, v)| format!("{}={}", k, query_escape(&v.to_string())))
            .collect::<Vec<_>>()
            .join("&")
    }

    // Space-delimited keyword/value pairs.
    // See https://www.postgresql.org/docs/current/libpq-connect.html#LIBPQ-CONNSTRING-KEYWORD-VALUE
    fn postgres(&self) -> String {
        self.pairs()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, libpq_quote(&v.to_string())))
            .collect::<Vec<_>>()
            .join(" ")
    }

    // [user[:password]@]tcp(host:port)/database[?options]
    fn mysql(&self) -> String {
        let mut conn = credentials(&self.user, &self.password, ':');

        let host = display_or(&self.host, DEFAULT_HOST);
        let port = display_or(&self.port, &MYSQL_DEFAULT_PORT.to_string());
        conn.push_str(&format!("tcp({}:{})", host, port));
        conn.push('/');
        conn.push_str(&display_or(&self.database, ""));

        self.append_query(&mut conn);
        conn
    }

    // The database path is the target; everything else, including shared
    // keys such as `host`, becomes a query parameter.
    fn sqlite(&self) -> String {
        let mut conn = display_or(&self.database, SQLITE_MEMORY);
        let query = self
            .pairs()
            .into_iter()
            .filter(|(k, _)| *k != "database")
            .map(|(k, v)| format!("{}={}", k, query_escape(&v.to_string())))
            .collect::<Vec<_>>();

        if !query.is_empty() {
            conn.push('?');
            conn.push_str(&query.join("&"));
        }
        conn
    }

    // Semicolon-delimited ADO-style pairs.
    fn mssql(&self) -> String {
        self.pairs()
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    "host" => "server",
                    "user" => "user id",
                    other => other,
                };
                format!("{}={}", key, v)
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    // [user[/password]@]host:port/database[?options]
    fn oracle(&self) -> String {
        let mut conn = credentials(&self.user, &self.password, '/');

        conn.push_str(&display_or(&self.host, DEFAULT_HOST));
        conn.push(':');
        conn.push_str(&display_or(&self.port, &ORACLE_DEFAULT_PORT.to_string()));
        conn.push('/');
        conn.push_str(&display_or(&self.database, ""));

        self.append_query(&mut conn);
        conn
    }

    fn append_query(&self, conn: &mut String) {
        if !self.extra.is_empty() {
            conn.push('?');
            conn.push_str(&self.query_string());
        }
    }
}

/// Builds the connection string for a cleaned parameter map.
pub fn build(driver: Driver, params: &CleanedParams) -> String {
    ConnectionParams::from_cleaned(params).build(driver)
}

fn credentials(user: &Option<Scalar>, password: &Option<Scalar>, separator: char) -> String {
    let mut out = String::new();
    if let Some(user) = user {
        out.push_str(&user.to_string());
    }
    if let Some(password) = password {
        out.push(separator);
        out.push_str(&password.to_string());
    }
    if !out.is_empty() {
        out.push('@');
    }
    out
}

fn display_or(value: &Option<Scalar>, default: &str) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| default.to_string())
}

/// Form-style escaping, spaces become `+`.
fn query_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn libpq_quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
