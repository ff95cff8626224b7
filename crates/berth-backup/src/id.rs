// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup identifiers.
//!
//! A [`BackupId`] is a UTC timestamp rendered as `YYYY-MM-DD_HH-MM-SS`. The
//! rendering is fixed-width and zero-padded, so the lexicographic order of
//! file names equals chronological order. Parsing only accepts that exact
//! shape; anything else in the backup directory is not ours.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDateTime, SubsecRound, Utc};

use crate::error::BackupError;

/// `strftime` format of a backup id.
pub const ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

const ID_LEN: usize = 19;

/// Identifier of one backup; names its artifacts and manifest lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackupId(NaiveDateTime);

impl BackupId {
    /// Id for the current second.
    pub fn now() -> Self {
        Self(Utc::now().naive_utc().trunc_subsecs(0))
    }

    /// Wrap a timestamp, dropping sub-second precision.
    pub fn from_datetime(at: NaiveDateTime) -> Self {
        Self(at.trunc_subsecs(0))
    }

    /// The timestamp.
    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// Parse the id prefix of an artifact file name (`<id>.<suffix>`).
    ///
    /// Returns `None` for names that do not start with a valid id.
    pub fn from_file_name(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (stem, _) = name.split_once('.')?;
        stem.parse().ok()
    }

    /// File name for this id with the given suffix, e.g. `gz` or `manifest`.
    pub fn file_name(&self, suffix: &str) -> String {
        format!("{}.{}", self, suffix)
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(ID_FORMAT))
    }
}

impl FromStr for BackupId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_LEN {
            return Err(BackupError::InvalidId(s.to_string()));
        }
        let at = NaiveDateTime::parse_from_str(s, ID_FORMAT)
            .map_err(|_| BackupError::InvalidId(s.to_string()))?;
        let id = Self(at);
        // chrono accepts some unpadded fields; insist on the canonical form.
        if id.to_string() != s {
            return Err(BackupError::InvalidId(s.to_string()));
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let id: BackupId = "2024-03-09_07-05-01".parse().unwrap();
        assert_eq!(id.to_string(), "2024-03-09_07-05-01");
    }

    #[test]
    fn test_rejects_other_shapes() {
        for bad in [
            "2024-3-09_07-05-01",
            "2024-03-09 07-05-01",
            "2024-03-09_07-05",
            "restore-work",
            "2024-13-09_07-05-01",
            "",
        ] {
            assert!(bad.parse::<BackupId>().is_err(), "accepted {}", bad);
        }
    }

    #[test]
    fn test_order_matches_string_order() {
        let mut ids = vec![
            "2024-10-01_00-00-00",
            "2024-09-30_23-59-59",
            "2025-01-01_00-00-00",
        ];
        let mut parsed: Vec<BackupId> = ids.iter().map(|s| s.parse().unwrap()).collect();
        ids.sort();
        parsed.sort();
        let rendered: Vec<String> = parsed.iter().map(|id| id.to_string()).collect();
        assert_eq!(rendered, ids);
    }

    #[test]
    fn test_from_file_name() {
        let id = BackupId::from_file_name(Path::new("/b/2024-03-09_07-05-01.lsn")).unwrap();
        assert_eq!(id.file_name("gz"), "2024-03-09_07-05-01.gz");
        assert!(BackupId::from_file_name(Path::new("/b/restore-work")).is_none());
        assert!(BackupId::from_file_name(Path::new("/b/notes.txt")).is_none());
    }
}
