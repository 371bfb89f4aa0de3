/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use super::{time_val, FtpEntryRights, FtpEntryType, FtpFileEntry};

fn parse_type(value: &str) -> FtpEntryType {
    match value.to_lowercase().as_str() {
        "dir" | "cdir" | "pdir" => FtpEntryType::Directory,
        "file" => FtpEntryType::File,
        _ => FtpEntryType::Unknown,
    }
}

fn octal_triple(digit: u32) -> String {
    let mut s = String::with_capacity(3);
    if digit & 4 != 0 {
        s.push('r');
    }
    if digit & 2 != 0 {
        s.push('w');
    }
    if digit & 1 != 0 {
        s.push('x');
    }
    s
}

/// RFC 3659 `perm` letters mapped onto a user triple: `r` grants read,
/// `a c m p w` grant write, `e l` grant execute.
fn perm_letter_rights(perm: &str) -> FtpEntryRights {
    let mut user = String::with_capacity(3);
    if perm.contains('r') {
        user.push('r');
    }
    if perm.chars().any(|c| matches!(c, 'a' | 'c' | 'm' | 'p' | 'w')) {
        user.push('w');
    }
    if perm.chars().any(|c| matches!(c, 'e' | 'l')) {
        user.push('x');
    }
    FtpEntryRights {
        user,
        group: String::new(),
        other: String::new(),
    }
}

/// Parse one MLSx fact line (RFC 3659 §7): `fact1=val1;fact2=val2; name`.
/// Fact names are matched case-insensitively, `UNIX.*` facts included.
pub(super) fn parse_line(line: &str) -> Option<FtpFileEntry> {
    let (facts, name) = line.trim_start().split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut entry = FtpFileEntry::new(name, FtpEntryType::Unknown);
    let mut saw_fact = false;
    let mut unix_mode: Option<&str> = None;
    let mut perm: Option<&str> = None;

    for fact in facts.split(';') {
        if fact.is_empty() {
            continue;
        }
        let (key, value) = fact.split_once('=')?;
        saw_fact = true;
        match key.to_lowercase().as_str() {
            "type" => entry.entry_type = parse_type(value),
            "modify" => entry.mtime = Some(time_val::parse_from_str(value).ok()?),
            "size" => entry.size = Some(value.parse::<u64>().ok()?),
            "unix.mode" => unix_mode = Some(value),
            "unix.owner" | "unix.uid" => entry.owner = Some(value.to_string()),
            "unix.group" | "unix.gid" => entry.group = Some(value.to_string()),
            "perm" => perm = Some(value),
            _ => {}
        }
    }
    if !saw_fact {
        return None;
    }

    if let Some(mode) = unix_mode {
        let digits: Vec<u32> = mode.chars().filter_map(|c| c.to_digit(8)).collect();
        if digits.len() == mode.len() && (3..=4).contains(&digits.len()) {
            let triples = &digits[digits.len() - 3..];
            entry.rights = Some(FtpEntryRights {
                user: octal_triple(triples[0]),
                group: octal_triple(triples[1]),
                other: octal_triple(triples[2]),
            });
            if digits.len() == 4 {
                entry.sticky = digits[0] & 1 != 0;
            }
        }
    } else if let Some(perm) = perm {
        entry.rights = Some(perm_letter_rights(perm));
    }

    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn file_facts() {
        let e = parse_line("type=file;size=3;modify=20220101120000; foo.txt").unwrap();
        assert_eq!(e.entry_type, FtpEntryType::File);
        assert_eq!(e.size, Some(3));
        assert_eq!(e.mtime, Some(utc("2022-01-01T12:00:00Z")));
        assert_eq!(e.name, "foo.txt");
    }

    #[test]
    fn parent_dir_facts() {
        let e = parse_line(
            "type=pdir;sizd=4096;modify=20210525083610;UNIX.mode=0755;UNIX.uid=0;UNIX.gid=0;unique=804g2; /",
        )
        .unwrap();
        assert_eq!(e.entry_type, FtpEntryType::Directory);
        assert_eq!(e.name, "/");
        assert_eq!(e.size, None);
        let rights = e.rights.unwrap();
        assert_eq!(rights.user, "rwx");
        assert_eq!(rights.group, "rx");
        assert_eq!(rights.other, "rx");
        assert_eq!(e.owner.as_deref(), Some("0"));
        assert!(!e.sticky);
    }

    #[test]
    fn sticky_from_mode() {
        let e = parse_line("type=dir;UNIX.mode=1777; tmp").unwrap();
        assert!(e.sticky);
        assert_eq!(e.rights.unwrap().other, "rwx");
    }

    #[test]
    fn perm_letters() {
        let e = parse_line("type=file;perm=rawel; up.bin").unwrap();
        let rights = e.rights.unwrap();
        assert_eq!(rights.user, "rwx");
        assert!(rights.group.is_empty());
        let e = parse_line("type=file;perm=r; ro.bin").unwrap();
        assert_eq!(e.rights.unwrap().user, "r");
    }

    #[test]
    fn case_insensitive_keys() {
        let e = parse_line("Type=DIR;Size=9; data").unwrap();
        assert_eq!(e.entry_type, FtpEntryType::Directory);
        assert_eq!(e.size, Some(9));
    }

    #[test]
    fn name_with_spaces() {
        let e = parse_line("type=file;size=1; two words.txt").unwrap();
        assert_eq!(e.name, "two words.txt");
    }

    #[test]
    fn rejects_factless_line() {
        assert!(parse_line("plain text line").is_none());
        assert!(parse_line("-rw-r--r-- 1 o g 3 Jan 01 12:00 f").is_none());
    }
}
