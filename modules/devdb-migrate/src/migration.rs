use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{MigrateError, Result};

const EXTENSION: &str = ".sql";
const TIMESTAMP_VERSION_FORMAT: &str = "%Y%m%d%H%M%S";

/// One immutable schema change loaded from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: String,
    pub sql: String,
    /// Lowercase hex SHA-256 of `sql`.
    pub checksum: String,
    pub path: PathBuf,
}

impl Migration {
    pub fn new(version: i64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let name = name.into();
        let sql = sql.into();
        Self {
            version,
            path: PathBuf::from(format!("{version}_{name}{EXTENSION}")),
            checksum: checksum(&sql),
            name,
            sql,
        }
    }
}

pub fn checksum(sql: &str) -> String {
    hex::encode(Sha256::digest(sql.as_bytes()))
}

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<version>[0-9]+)_(?P<name>[A-Za-z0-9_-]+)\.sql$").expect("valid regex")
    })
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"))
}

/// Split `<version>_<name>.sql` into its parts.
pub fn parse_file_name(file_name: &str) -> std::result::Result<(i64, String), String> {
    let caps = file_name_pattern()
        .captures(file_name)
        .ok_or_else(|| "expected <version>_<name>.sql with an all-digit version".to_string())?;

    let raw_version = &caps["version"];
    let version: i64 = raw_version
        .parse()
        .map_err(|_| format!("version {raw_version} does not fit in a 64-bit integer"))?;
    if version <= 0 {
        return Err("version must be greater than zero".to_string());
    }
    Ok((version, caps["name"].to_string()))
}

/// Load every `.sql` file in `dir`, sorted ascending by version.
///
/// Other files, dotfiles and subdirectories are ignored. Duplicate versions,
/// unparseable names and file names whose lexical order disagrees with their
/// numeric order are all rejected.
pub fn discover(dir: &Path) -> Result<Vec<Migration>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        MigrateError::malformed(dir, format!("cannot read migrations directory: {e}"))
    })?;

    let mut found: Vec<(String, Migration)> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| MigrateError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|source| MigrateError::Io {
            path: path.clone(),
            source,
        })?;
        if file_type.is_dir() {
            continue;
        }

        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            return Err(MigrateError::malformed(&path, "file name is not valid UTF-8"));
        };
        if file_name.starts_with('.') || !file_name.ends_with(EXTENSION) {
            debug!(file = file_name.as_str(), "Skipping non-migration file");
            continue;
        }

        let (version, name) =
            parse_file_name(&file_name).map_err(|reason| MigrateError::malformed(&path, reason))?;
        let bytes = fs::read(&path).map_err(|source| MigrateError::Io {
            path: path.clone(),
            source,
        })?;
        let sql = String::from_utf8(bytes)
            .map_err(|_| MigrateError::malformed(&path, "body is not valid UTF-8"))?;

        found.push((
            file_name,
            Migration {
                version,
                name,
                checksum: checksum(&sql),
                sql,
                path,
            },
        ));
    }

    found.sort_by_key(|(_, m)| m.version);

    for pair in found.windows(2) {
        let (prev_file, prev) = &pair[0];
        let (file, current) = &pair[1];
        if prev.version == current.version {
            return Err(MigrateError::malformed(
                &current.path,
                format!("duplicate version {} (also used by {prev_file})", current.version),
            ));
        }
        if prev_file.as_str() > file.as_str() {
            return Err(MigrateError::malformed(
                &current.path,
                format!(
                    "file name sorts before {prev_file} but its version is higher; \
                     zero-pad versions so name order matches version order"
                ),
            ));
        }
    }

    let migrations: Vec<Migration> = found.into_iter().map(|(_, m)| m).collect();
    debug!(dir = %dir.display(), count = migrations.len(), "Discovered migrations");
    Ok(migrations)
}

/// Create an empty `<version>_<name>.sql` in `dir` and return its path.
///
/// Uses a UTC timestamp version for new or timestamp-versioned directories,
/// and the next integer (padded to the existing width) for directories that
/// use short sequential versions.
pub fn new_migration(dir: &Path, name: &str) -> Result<PathBuf> {
    if !name_pattern().is_match(name) {
        return Err(MigrateError::malformed(
            dir.join(name),
            "name must use only letters, digits, '_' and '-'",
        ));
    }

    fs::create_dir_all(dir).map_err(|source| MigrateError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let existing = discover(dir)?;

    let timestamp = Utc::now().format(TIMESTAMP_VERSION_FORMAT).to_string();
    let width = existing
        .iter()
        .filter_map(|m| m.path.file_name()?.to_str()?.split('_').next().map(str::len))
        .max();
    let max_version = existing.last().map(|m| m.version);

    let version_str = match (width, max_version) {
        (Some(width), Some(max)) if width < timestamp.len() => {
            let next = format!("{:0width$}", max + 1);
            if next.len() > width {
                return Err(MigrateError::malformed(
                    dir,
                    format!("version {} exceeds the {width}-digit padding of existing files", max + 1),
                ));
            }
            next
        }
        (_, Some(max)) => {
            let stamp: i64 = timestamp.parse().unwrap_or(0);
            stamp.max(max + 1).to_string()
        }
        _ => timestamp,
    };

    let path = dir.join(format!("{version_str}_{name}{EXTENSION}"));
    let header = format!("-- {name}\n-- Created {}\n\n", Utc::now().to_rfc3339());
    fs::write(&path, header).map_err(|source| MigrateError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn parses_version_and_name() {
        assert_eq!(parse_file_name("001_init.sql").unwrap(), (1, "init".to_string()));
        assert_eq!(
            parse_file_name("20240101120000_add-users_table.sql").unwrap(),
            (20240101120000, "add-users_table".to_string())
        );
    }

    #[test]
    fn rejects_bad_file_names() {
        assert!(parse_file_name("init.sql").is_err());
        assert!(parse_file_name("1init.sql").is_err());
        assert!(parse_file_name("1_.sql").is_err());
        assert!(parse_file_name("v1_init.sql").is_err());
        assert!(parse_file_name("1_in it.sql").is_err());
        assert!(parse_file_name("0_zero.sql").is_err());
        assert!(parse_file_name("99999999999999999999_big.sql").is_err());
    }

    #[test]
    fn checksum_is_stable_hex_sha256() {
        assert_eq!(
            checksum(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_ne!(checksum("SELECT 1;"), checksum("SELECT 1; "));
    }

    #[test]
    fn discover_sorts_by_version_and_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "003_c.sql", "SELECT 3;");
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "007_gap.sql", "SELECT 7;");
        write(dir.path(), "README.md", "docs");
        write(dir.path(), ".001_hidden.sql", "nope");
        fs::create_dir(dir.path().join("002_subdir.sql")).unwrap();

        let migrations = discover(dir.path()).unwrap();
        let versions: Vec<i64> = migrations.iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 3, 7]);
        assert_eq!(migrations[0].name, "a");
        assert_eq!(migrations[0].sql, "SELECT 1;");
        assert_eq!(migrations[0].checksum, checksum("SELECT 1;"));
    }

    #[test]
    fn discover_rejects_duplicate_versions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "01_b.sql", "SELECT 2;");

        let err = discover(dir.path()).unwrap_err();
        assert!(
            matches!(&err, MigrateError::Malformed { reason, .. } if reason.contains("duplicate version 1")),
            "{err}"
        );
    }

    #[test]
    fn discover_rejects_unpadded_versions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "9_a.sql", "SELECT 1;");
        write(dir.path(), "10_b.sql", "SELECT 2;");

        let err = discover(dir.path()).unwrap_err();
        assert!(matches!(&err, MigrateError::Malformed { reason, .. } if reason.contains("zero-pad")));
    }

    #[test]
    fn discover_rejects_unparseable_sql_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "schema.sql", "SELECT 2;");

        assert!(matches!(
            discover(dir.path()).unwrap_err(),
            MigrateError::Malformed { .. }
        ));
    }

    #[test]
    fn discover_missing_directory_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.kind(), "malformed-migration");
    }

    #[test]
    fn empty_directory_discovers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn new_migration_uses_timestamp_in_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = new_migration(dir.path(), "create_users").unwrap();
        let file_name = path.file_name().unwrap().to_str().unwrap();
        let (version, name) = parse_file_name(file_name).unwrap();
        assert_eq!(name, "create_users");
        assert_eq!(version.to_string().len(), 14);
        assert_eq!(discover(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn new_migration_continues_short_sequence() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELECT 2;");

        let path = new_migration(dir.path(), "c").unwrap();
        assert_eq!(path.file_name().unwrap(), "003_c.sql");
        assert_eq!(discover(dir.path()).unwrap().len(), 3);
    }

    #[test]
    fn new_migration_refuses_to_overflow_padding() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "99_last.sql", "SELECT 1;");
        assert!(new_migration(dir.path(), "next").is_err());
    }

    #[test]
    fn new_migration_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        assert!(new_migration(dir.path(), "has space").is_err());
    }
}
