/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::error::FtpTimeParseError;

/// Parse an RFC 3659 time-val (`YYYYMMDDHHMMSS[.fraction]`), always UTC.
pub(crate) fn parse_from_str(s: &str) -> Result<DateTime<Utc>, FtpTimeParseError> {
    let s = s.trim();
    let (main, frac) = match s.split_once('.') {
        Some((m, f)) => (m, Some(f)),
        None => (s, None),
    };
    if main.len() != 14 {
        return Err(FtpTimeParseError);
    }
    let ndt =
        NaiveDateTime::parse_from_str(main, "%Y%m%d%H%M%S").map_err(|_| FtpTimeParseError)?;
    let ndt = match frac {
        Some(frac) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FtpTimeParseError);
            }
            let mut digits = [b'0'; 9];
            for (i, b) in frac.bytes().take(9).enumerate() {
                digits[i] = b;
            }
            let nanos: u32 = std::str::from_utf8(&digits)
                .unwrap_or("0")
                .parse()
                .map_err(|_| FtpTimeParseError)?;
            ndt.with_nanosecond(nanos).ok_or(FtpTimeParseError)?
        }
        None => ndt,
    };
    Ok(Utc.from_utc_datetime(&ndt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_no_dot() {
        let dt = parse_from_str("20211201102030").unwrap();
        let expected = DateTime::parse_from_rfc3339("2021-12-01T10:20:30+00:00").unwrap();
        assert_eq!(dt, expected.with_timezone(&Utc));
    }

    #[test]
    fn parse_dot_1() {
        let dt = parse_from_str("20211201102030.1").unwrap();
        let expected = DateTime::parse_from_rfc3339("2021-12-01T10:20:30.1+00:00").unwrap();
        assert_eq!(dt, expected.with_timezone(&Utc));
    }

    #[test]
    fn parse_dot_3() {
        let dt = parse_from_str("20211201102030.123").unwrap();
        let expected = DateTime::parse_from_rfc3339("2021-12-01T10:20:30.123+00:00").unwrap();
        assert_eq!(dt, expected.with_timezone(&Utc));
    }

    #[test]
    fn reject_malformed() {
        assert!(parse_from_str("2021120110203").is_err());
        assert!(parse_from_str("20211301102030").is_err());
        assert!(parse_from_str("20211201102030.").is_err());
        assert!(parse_from_str("garbage").is_err());
    }
}
