/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use super::{next_token, rest_of_line, FtpEntryRights, FtpEntryType, FtpFileEntry};

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn month_number(token: &str) -> Option<u32> {
    let token = token.to_lowercase();
    MONTHS.iter().position(|m| *m == token).map(|i| i as u32 + 1)
}

fn rights_triple(chars: &[u8]) -> String {
    let mut s = String::with_capacity(3);
    if chars[0] == b'r' {
        s.push('r');
    }
    if chars[1] == b'w' {
        s.push('w');
    }
    if matches!(chars[2], b'x' | b's' | b't') {
        s.push('x');
    }
    s
}

/// Parse one `ls -l` style line. `now` anchors year inference for the
/// `Mon DD HH:MM` date form.
pub(super) fn parse_line(line: &str, now: DateTime<Utc>) -> Option<FtpFileEntry> {
    let bytes = line.as_bytes();
    if bytes.len() < 10 {
        return None;
    }
    let entry_type = match bytes[0] {
        b'-' => FtpEntryType::File,
        b'd' => FtpEntryType::Directory,
        b'l' => FtpEntryType::Symlink,
        _ => return None,
    };
    let perm = &bytes[1..10];
    if !perm.iter().all(|b| matches!(b, b'r' | b'w' | b'x' | b's' | b'S' | b't' | b'T' | b'-')) {
        return None;
    }

    let mut pos = 10;
    let acl = bytes.get(10) == Some(&b'+');
    if acl {
        pos = 11;
    }

    let links = next_token(line, &mut pos)?;
    links.parse::<u32>().ok()?;
    let owner = next_token(line, &mut pos)?;
    let group = next_token(line, &mut pos)?;
    let size = next_token(line, &mut pos)?.parse::<u64>().ok()?;
    let month = month_number(next_token(line, &mut pos)?)?;
    let day = next_token(line, &mut pos)?.parse::<u32>().ok()?;
    let year_or_time = next_token(line, &mut pos)?;
    let mtime = parse_date(month, day, year_or_time, now);
    let name_raw = rest_of_line(line, &mut pos)?;

    // sticky bit lives in the execute slot of the other-triple
    let mut sticky = false;
    let mut other = perm[6..9].to_vec();
    match other[2] {
        b't' => {
            sticky = true;
            other[2] = b'x';
        }
        b'T' => {
            sticky = true;
            other[2] = b'-';
        }
        _ => {}
    }

    let (name, target) = if entry_type == FtpEntryType::Symlink {
        match name_raw.split_once(" -> ") {
            Some((n, t)) => (n.to_string(), Some(t.to_string())),
            None => (name_raw.to_string(), None),
        }
    } else {
        (name_raw.to_string(), None)
    };

    let mut entry = FtpFileEntry::new(&name, entry_type);
    entry.size = Some(size);
    entry.mtime = mtime;
    entry.rights = Some(FtpEntryRights {
        user: rights_triple(&perm[0..3]),
        group: rights_triple(&perm[3..6]),
        other: rights_triple(&other),
    });
    entry.sticky = sticky;
    entry.owner = Some(owner.to_string());
    entry.group = Some(group.to_string());
    entry.target = target;
    entry.acl = acl;
    Some(entry)
}

/// Dates come as `Mon DD YYYY` or `Mon DD HH:MM`. Without a year, start
/// from the current one; a result more than 28 hours in the future rolls
/// back a year, more than 186 days in the past rolls forward one.
fn parse_date(month: u32, day: u32, year_or_time: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some((hh, mm)) = year_or_time.split_once(':') {
        let hour = hh.parse::<u32>().ok()?;
        let minute = mm.parse::<u32>().ok()?;
        let year = now.year();
        let candidate = ymd_hm(year, month, day, hour, minute)?;
        if candidate - now > Duration::hours(28) {
            ymd_hm(year - 1, month, day, hour, minute)
        } else if now - candidate > Duration::days(186) {
            ymd_hm(year + 1, month, day, hour, minute)
        } else {
            Some(candidate)
        }
    } else {
        let year = year_or_time.parse::<i32>().ok()?;
        ymd_hm(year, month, day, 0, 0)
    }
}

fn ymd_hm(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let dt = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn file_entry() {
        let now = utc("2022-06-15T00:00:00Z");
        let e = parse_line("-rw-r--r--   1 owner group  1234 Jan  5 12:30 readme.txt", now).unwrap();
        assert_eq!(e.entry_type, FtpEntryType::File);
        assert_eq!(e.name, "readme.txt");
        assert_eq!(e.size, Some(1234));
        assert_eq!(e.owner.as_deref(), Some("owner"));
        assert_eq!(e.group.as_deref(), Some("group"));
        assert_eq!(e.mtime, Some(utc("2022-01-05T12:30:00Z")));
        let rights = e.rights.unwrap();
        assert_eq!(rights.user, "rw");
        assert_eq!(rights.group, "r");
        assert_eq!(rights.other, "r");
        assert!(!e.sticky);
        assert!(!e.acl);
    }

    #[test]
    fn dir_with_year() {
        let now = utc("2022-06-15T00:00:00Z");
        let e = parse_line("drwxr-xr-x   2 root root  4096 Mar  1  2019 pub", now).unwrap();
        assert_eq!(e.entry_type, FtpEntryType::Directory);
        assert_eq!(e.mtime, Some(utc("2019-03-01T00:00:00Z")));
        assert_eq!(e.name, "pub");
    }

    #[test]
    fn symlink_target() {
        let now = utc("2022-06-15T00:00:00Z");
        let e = parse_line("lrwxrwxrwx   1 root root    22 Jan  5 08:00 link -> /var/target", now).unwrap();
        assert_eq!(e.entry_type, FtpEntryType::Symlink);
        assert_eq!(e.name, "link");
        assert_eq!(e.target.as_deref(), Some("/var/target"));
    }

    #[test]
    fn sticky_lower_t_keeps_execute() {
        let now = utc("2022-06-15T00:00:00Z");
        let e = parse_line("drwxrwxrwt   8 root root  4096 Jun  1 10:00 tmp", now).unwrap();
        assert!(e.sticky);
        assert_eq!(e.rights.unwrap().other, "rwx");
    }

    #[test]
    fn sticky_upper_t_drops_execute() {
        let now = utc("2022-06-15T00:00:00Z");
        let e = parse_line("drwxrwxrwT   8 root root  4096 Jun  1 10:00 tmp", now).unwrap();
        assert!(e.sticky);
        assert_eq!(e.rights.unwrap().other, "rw");
    }

    #[test]
    fn acl_marker() {
        let now = utc("2022-06-15T00:00:00Z");
        let e = parse_line("-rw-r--r--+  1 owner group  10 Jun  1 10:00 data.bin", now).unwrap();
        assert!(e.acl);
        assert_eq!(e.name, "data.bin");
    }

    #[test]
    fn name_with_spaces() {
        let now = utc("2022-06-15T00:00:00Z");
        let e = parse_line("-rw-r--r--   1 o g  10 Jun  1 10:00 with  spaces.txt", now).unwrap();
        assert_eq!(e.name, "with  spaces.txt");
    }

    #[test]
    fn year_inference_recent_past() {
        // February: Jan 01 is one month back, stays in the current year
        let now = utc("2022-02-10T00:00:00Z");
        let e = parse_line("-rw-r--r-- 1 o g 1 Jan  1 00:00 foo", now).unwrap();
        assert_eq!(e.mtime, Some(utc("2022-01-01T00:00:00Z")));
    }

    #[test]
    fn year_inference_future_rolls_back() {
        // early January: Dec 31 would be ~12 months ahead, so it was last year
        let now = utc("2022-01-02T00:00:00Z");
        let e = parse_line("-rw-r--r-- 1 o g 1 Dec 31 23:00 foo", now).unwrap();
        assert_eq!(e.mtime, Some(utc("2021-12-31T23:00:00Z")));
    }

    #[test]
    fn year_inference_far_past_rolls_forward() {
        // December: Jan 01 of the current year is more than 186 days back
        let now = utc("2022-12-20T00:00:00Z");
        let e = parse_line("-rw-r--r-- 1 o g 1 Jan  1 00:00 foo", now).unwrap();
        assert_eq!(e.mtime, Some(utc("2023-01-01T00:00:00Z")));
    }

    #[test]
    fn rejects_non_listing() {
        let now = utc("2022-06-15T00:00:00Z");
        assert!(parse_line("total 42", now).is_none());
        assert!(parse_line("-rw-r--r-- x o g 1 Jan 1 00:00 foo", now).is_none());
    }
}
