//! Artifact file names: `<prefix>-backup-<YYYYMMDD>-<HHMMSS>-<dbname>.<ext>`.

use chrono::{DateTime, Local, TimeZone};

pub const DEFAULT_PREFIX: &str = "dbvault";
pub const ARCHIVE_EXTENSION: &str = "zip";
pub const ENCRYPTED_SUFFIX: &str = ".encrypted";

/// Backup file name for `db_name` stamped with the current local time.
pub fn generate_backup_filename(db_name: &str, extension: &str) -> String {
    backup_filename_at(DEFAULT_PREFIX, &Local::now(), db_name, extension)
}

pub fn backup_filename_at<Tz: TimeZone>(
    prefix: &str,
    at: &DateTime<Tz>,
    db_name: &str,
    extension: &str,
) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}-backup-{}-{}.{}",
        sanitize(prefix),
        at.format("%Y%m%d-%H%M%S"),
        sanitize(db_name),
        extension.trim_start_matches('.')
    )
}

/// The three artifact names of one backup run, sharing one timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupNames {
    pub dump: String,
    pub archive: String,
    pub encrypted: String,
}

impl BackupNames {
    pub fn new(prefix: &str, db_name: &str, dump_extension: &str) -> Self {
        Self::at(prefix, &Local::now(), db_name, dump_extension)
    }

    pub fn at<Tz: TimeZone>(
        prefix: &str,
        at: &DateTime<Tz>,
        db_name: &str,
        dump_extension: &str,
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let dump = backup_filename_at(prefix, at, db_name, dump_extension);
        let archive = backup_filename_at(prefix, at, db_name, ARCHIVE_EXTENSION);
        let encrypted = format!("{}{}", archive, ENCRYPTED_SUFFIX);
        Self {
            dump,
            archive,
            encrypted,
        }
    }
}

/// Keeps names filesystem-safe; anything outside `[A-Za-z0-9_.-]` becomes `_`.
fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "database".to_string()
    } else {
        cleaned
    }
}
