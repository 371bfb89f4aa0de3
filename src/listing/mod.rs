/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use chrono::{DateTime, Utc};

mod dos;
mod mlsx;
pub(crate) mod time_val;
mod unix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpEntryType {
    File,
    Directory,
    Symlink,
    Unknown,
}

impl FtpEntryType {
    #[inline]
    pub fn maybe_file(&self) -> bool {
        matches!(self, FtpEntryType::File | FtpEntryType::Unknown)
    }
}

/// Permission triples as compact letter sets, e.g. `rw` for `rw-`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FtpEntryRights {
    pub user: String,
    pub group: String,
    pub other: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpFileEntry {
    pub entry_type: FtpEntryType,
    pub name: String,
    pub size: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    pub rights: Option<FtpEntryRights>,
    pub sticky: bool,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Symlink target, split off the `name -> target` form.
    pub target: Option<String>,
    /// A trailing `+` on the permission block (POSIX ACLs present).
    pub acl: bool,
}

impl FtpFileEntry {
    pub(crate) fn new(name: &str, entry_type: FtpEntryType) -> Self {
        FtpFileEntry {
            entry_type,
            name: name.to_string(),
            size: None,
            mtime: None,
            rights: None,
            sticky: false,
            owner: None,
            group: None,
            target: None,
            acl: false,
        }
    }
}

/// One parsed listing line; lines no parser recognizes are passed
/// through verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpListEntry {
    Entry(FtpFileEntry),
    Raw(String),
}

impl FtpListEntry {
    pub fn name(&self) -> &str {
        match self {
            FtpListEntry::Entry(e) => e.name.as_str(),
            FtpListEntry::Raw(line) => line.as_str(),
        }
    }

    pub fn as_entry(&self) -> Option<&FtpFileEntry> {
        match self {
            FtpListEntry::Entry(e) => Some(e),
            FtpListEntry::Raw(_) => None,
        }
    }
}

/// Which parsers apply to a listing line, keyed by how the listing was
/// requested: LIST output tries `ls -l` then MS-DOS, MLSD output is
/// machine format only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FtpListFormat {
    Ls,
    Machine,
}

pub(crate) fn parse_list_line(
    format: FtpListFormat,
    line: &str,
    now: DateTime<Utc>,
) -> Option<FtpListEntry> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return None;
    }
    match format {
        FtpListFormat::Ls => {
            if trimmed.starts_with("total ") {
                return None;
            }
            if let Some(entry) = unix::parse_line(trimmed, now) {
                return Some(FtpListEntry::Entry(entry));
            }
            if let Some(entry) = dos::parse_line(trimmed) {
                return Some(FtpListEntry::Entry(entry));
            }
        }
        FtpListFormat::Machine => {
            if let Some(entry) = mlsx::parse_line(trimmed) {
                return Some(FtpListEntry::Entry(entry));
            }
        }
    }
    Some(FtpListEntry::Raw(trimmed.to_string()))
}

/// Parse a single MLST/MLSD fact line.
pub(crate) fn parse_machine_line(line: &str) -> Option<FtpFileEntry> {
    mlsx::parse_line(line)
}

/// Advance past spaces and return the next space-delimited token.
fn next_token<'a>(line: &'a str, pos: &mut usize) -> Option<&'a str> {
    let bytes = line.as_bytes();
    while *pos < bytes.len() && bytes[*pos] == b' ' {
        *pos += 1;
    }
    if *pos >= bytes.len() {
        return None;
    }
    let start = *pos;
    while *pos < bytes.len() && bytes[*pos] != b' ' {
        *pos += 1;
    }
    Some(&line[start..*pos])
}

/// The rest of the line after skipping leading spaces.
fn rest_of_line<'a>(line: &'a str, pos: &mut usize) -> Option<&'a str> {
    let bytes = line.as_bytes();
    while *pos < bytes.len() && bytes[*pos] == b' ' {
        *pos += 1;
    }
    if *pos >= bytes.len() {
        None
    } else {
        Some(&line[*pos..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_line_dropped() {
        let now = Utc::now();
        assert!(parse_list_line(FtpListFormat::Ls, "total 24", now).is_none());
        assert!(parse_list_line(FtpListFormat::Ls, "", now).is_none());
    }

    #[test]
    fn unrecognized_line_is_raw() {
        let now = Utc::now();
        let entry = parse_list_line(FtpListFormat::Ls, "something odd", now).unwrap();
        assert_eq!(entry, FtpListEntry::Raw("something odd".to_string()));
        // machine format does not try the ls parsers
        let entry = parse_list_line(
            FtpListFormat::Machine,
            "-rw-r--r-- 1 u g 3 Jan 01 12:00 f",
            now,
        )
        .unwrap();
        assert!(matches!(entry, FtpListEntry::Raw(_)));
    }
}
