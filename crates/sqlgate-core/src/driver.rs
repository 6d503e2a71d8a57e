// SPDX-License-Identifier: Apache-2.0

//! Driver Registry
//!
//! Maps the public driver names accepted in requests to the closed set of
//! backends the gateway knows how to reach.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Canonical backend identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Driver {
    Postgres,
    MySql,
    Sqlite,
    SqlServer,
    Oracle,
}

/// Public alias → canonical driver. Read-only for the life of the process.
const ALIASES: &[(&str, Driver)] = &[
    ("postgres", Driver::Postgres),
    ("postgresql", Driver::Postgres),
    ("mysql", Driver::MySql),
    ("mariadb", Driver::MySql),
    ("sqlite", Driver::Sqlite),
    ("mssql", Driver::SqlServer),
    ("sqlserver", Driver::SqlServer),
    ("oracle", Driver::Oracle),
];

impl Driver {
    pub const ALL: [Driver; 5] = [
        Driver::Postgres,
        Driver::MySql,
        Driver::Sqlite,
        Driver::SqlServer,
        Driver::Oracle,
    ];

    /// Canonical identifier, also the driver component of pool keys.
    pub fn id(&self) -> &'static str {
        match self {
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::Sqlite => "sqlite3",
            Driver::SqlServer => "mssql",
            Driver::Oracle => "oci8",
        }
    }

    /// Human-readable backend name
    pub fn name(&self) -> &'static str {
        match self {
            Driver::Postgres => "PostgreSQL",
            Driver::MySql => "MySQL / MariaDB",
            Driver::Sqlite => "SQLite",
            Driver::SqlServer => "SQL Server",
            Driver::Oracle => "Oracle",
        }
    }

    /// Positional placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Driver::Postgres => format!("${}", index),
            Driver::MySql | Driver::Sqlite => "?".to_string(),
            Driver::SqlServer => format!("@P{}", index),
            Driver::Oracle => format!(":{}", index),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Resolves a public alias. Matching is exact, as in the alias table.
pub fn resolve(alias: &str) -> EngineResult<Driver> {
    ALIASES
        .iter()
        .find(|(name, _)| *name == alias)
        .map(|(_, driver)| *driver)
        .ok_or_else(|| EngineError::unknown_driver(alias))
}

/// The full alias table, for callers that reject unknown drivers up front.
pub fn aliases() -> impl Iterator<Item = (&'static str, Driver)> {
    ALIASES.iter().copied()
}

pub fn is_known(alias: &str) -> bool {
    resolve(alias).is_ok()
}

impl FromStr for Driver {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve(s)
    }
}
