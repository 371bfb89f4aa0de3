/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use super::{next_token, rest_of_line, FtpEntryType, FtpFileEntry};

/// Parse one MS-DOS / IIS style line:
/// `MM-DD-YY HH:MM[AM|PM]  (<size>|<DIR>)  name`
pub(super) fn parse_line(line: &str) -> Option<FtpFileEntry> {
    let mut pos = 0;
    let date = next_token(line, &mut pos)?;
    let mut time = next_token(line, &mut pos)?.to_string();
    let mut size_or_dir = next_token(line, &mut pos)?;

    // the meridiem may be glued to the time or stand alone
    if size_or_dir.eq_ignore_ascii_case("am") || size_or_dir.eq_ignore_ascii_case("pm") {
        time.push_str(size_or_dir);
        size_or_dir = next_token(line, &mut pos)?;
    }

    let mtime = parse_date_time(date, &time)?;

    let (entry_type, size) = if size_or_dir.eq_ignore_ascii_case("<dir>") {
        (FtpEntryType::Directory, None)
    } else {
        (FtpEntryType::File, Some(size_or_dir.parse::<u64>().ok()?))
    };

    let name = rest_of_line(line, &mut pos)?;

    let mut entry = FtpFileEntry::new(name, entry_type);
    entry.size = size;
    entry.mtime = Some(mtime);
    Some(entry)
}

fn parse_date_time(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let mut dp = date.split('-');
    let month = dp.next()?.parse::<u32>().ok()?;
    let day = dp.next()?.parse::<u32>().ok()?;
    let year_raw = dp.next()?.parse::<i32>().ok()?;
    if dp.next().is_some() {
        return None;
    }
    let year = if year_raw < 70 {
        year_raw + 2000
    } else if year_raw < 100 {
        year_raw + 1900
    } else {
        year_raw
    };

    let (hm, meridiem) = split_meridiem(time);
    let (hh, mm) = hm.split_once(':')?;
    let mut hour = hh.parse::<u32>().ok()?;
    let minute = mm.parse::<u32>().ok()?;
    match meridiem {
        Some('p') if hour < 12 => hour += 12,
        Some('a') if hour == 12 => hour = 0,
        _ => {}
    }

    let dt = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&dt))
}

fn split_meridiem(time: &str) -> (&str, Option<char>) {
    let lower = time.to_lowercase();
    if let Some(hm) = lower.strip_suffix("am") {
        (&time[..hm.len()], Some('a'))
    } else if let Some(hm) = lower.strip_suffix("pm") {
        (&time[..hm.len()], Some('p'))
    } else {
        (time, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn file_entry() {
        let e = parse_line("01-16-02  11:35PM       1234 file.bin").unwrap();
        assert_eq!(e.entry_type, FtpEntryType::File);
        assert_eq!(e.name, "file.bin");
        assert_eq!(e.size, Some(1234));
        assert_eq!(e.mtime, Some(utc("2002-01-16T23:35:00Z")));
    }

    #[test]
    fn dir_entry_with_spaces_in_name() {
        let e = parse_line("01-01-26  12:00AM      <DIR>  My Documents").unwrap();
        assert_eq!(e.entry_type, FtpEntryType::Directory);
        assert_eq!(e.name, "My Documents");
        assert_eq!(e.size, None);
        assert_eq!(e.mtime, Some(utc("2026-01-01T00:00:00Z")));
    }

    #[test]
    fn separate_meridiem_token() {
        let e = parse_line("03-05-99 02:15 PM 42 notes.txt").unwrap();
        assert_eq!(e.mtime, Some(utc("1999-03-05T14:15:00Z")));
        assert_eq!(e.size, Some(42));
        assert_eq!(e.name, "notes.txt");
    }

    #[test]
    fn noon_and_midnight() {
        let e = parse_line("01-01-20  12:01PM  1 a").unwrap();
        assert_eq!(e.mtime, Some(utc("2020-01-01T12:01:00Z")));
        let e = parse_line("01-01-20  12:01AM  1 a").unwrap();
        assert_eq!(e.mtime, Some(utc("2020-01-01T00:01:00Z")));
    }

    #[test]
    fn year_windows() {
        let e = parse_line("01-01-69  01:00AM  1 a").unwrap();
        assert_eq!(e.mtime, Some(utc("2069-01-01T01:00:00Z")));
        let e = parse_line("01-01-70  01:00AM  1 a").unwrap();
        assert_eq!(e.mtime, Some(utc("1970-01-01T01:00:00Z")));
    }

    #[test]
    fn rejects_unix_line() {
        assert!(parse_line("-rw-r--r-- 1 o g 1 Jan 1 00:00 foo").is_none());
    }
}
