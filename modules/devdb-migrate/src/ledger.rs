use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{MigrateError, Result};

pub const DEFAULT_LEDGER_TABLE: &str = "_devdb_migrations";

/// A ledger row: proof that `version` was applied with body `checksum`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub checksum: String,
    pub applied_at: DateTime<Utc>,
    pub execution_ms: i64,
}

/// Validated, optionally schema-qualified ledger table name.
///
/// The name is interpolated into DDL, so only plain identifiers are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTable {
    schema: Option<String>,
    table: String,
}

impl LedgerTable {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = || MigrateError::InvalidLedgerTable(raw.to_string());
        let mut parts = raw.split('.');
        let first = parts.next().ok_or_else(invalid)?;
        let second = parts.next();
        if parts.next().is_some() {
            return Err(invalid());
        }

        let (schema, table) = match second {
            Some(table) => (Some(first), table),
            None => (None, first),
        };
        if !schema.map_or(true, is_identifier) || !is_identifier(table) {
            return Err(invalid());
        }

        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    /// Advisory lock key shared by every process using this ledger.
    pub fn lock_key(&self) -> i64 {
        let digest = Sha256::digest(format!("devdb-ledger:{}", self).as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }

    pub fn create_sql(&self) -> String {
        let table = self.to_string();
        format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                version      BIGINT      PRIMARY KEY,
                name         TEXT        NOT NULL,
                checksum     TEXT        NOT NULL,
                applied_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
                execution_ms BIGINT      NOT NULL DEFAULT 0
            )
            "#
        )
    }

    pub fn select_sql(&self) -> String {
        format!(
            "SELECT version, name, checksum, applied_at, execution_ms FROM {} ORDER BY version ASC",
            self
        )
    }

    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, name, checksum, execution_ms) VALUES ($1, $2, $3, $4) RETURNING applied_at",
            self
        )
    }
}

impl Default for LedgerTable {
    fn default() -> Self {
        Self {
            schema: None,
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl fmt::Display for LedgerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    starts_ok && s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_qualified_names() {
        assert_eq!(LedgerTable::parse("_devdb_migrations").unwrap(), LedgerTable::default());
        let t = LedgerTable::parse("ops.schema_history").unwrap();
        assert_eq!(t.to_string(), "ops.schema_history");
    }

    #[test]
    fn rejects_injection_and_junk() {
        for bad in [
            "",
            "1table",
            "a.b.c",
            "x; DROP TABLE users",
            "\"quoted\"",
            "has-dash",
            ".x",
            "x.",
        ] {
            assert!(LedgerTable::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(LedgerTable::parse(&"a".repeat(64)).is_err());
    }

    #[test]
    fn lock_key_is_deterministic_and_per_table() {
        let a = LedgerTable::parse("a_ledger").unwrap();
        let b = LedgerTable::parse("b_ledger").unwrap();
        assert_eq!(a.lock_key(), LedgerTable::parse("a_ledger").unwrap().lock_key());
        assert_ne!(a.lock_key(), b.lock_key());
    }
}
