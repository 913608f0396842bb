//! Calendar dates stored as days since 1970-01-01.

use crate::{TypeError, TypeResult};

/// Days from the epoch to a proleptic Gregorian date.
///
/// # Errors
///
/// Fails if the day count does not fit in an `i32`.
pub fn days_from_civil(year: i32, month: u32, day: u32) -> TypeResult<i32> {
    let y = i64::from(year) - i64::from(month <= 2);
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let m = i64::from(month);
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    i32::try_from(era * 146_097 + doe - 719_468)
        .map_err(|_| TypeError::InvalidDate(format!("{year}-{month}-{day}")))
}

/// Calendar date of a day count.
#[must_use]
pub fn civil_from_days(days: i32) -> (i32, u32, u32) {
    let z = i64::from(days) + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year as i32, month, day)
}

/// Whether `year` is a leap year.
#[must_use]
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Number of days in a month, or `None` for an invalid month.
#[must_use]
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => Some(31),
        4 | 6 | 9 | 11 => Some(30),
        2 if is_leap_year(year) => Some(29),
        2 => Some(28),
        _ => None,
    }
}

/// Day count of a validated calendar date.
///
/// # Errors
///
/// Fails if the month or day is out of range.
pub fn date_from_parts(year: i32, month: i64, day: i64) -> TypeResult<i32> {
    let invalid = || TypeError::InvalidDate(format!("{year}-{month}-{day}"));
    let month = u32::try_from(month).map_err(|_| invalid())?;
    let day = u32::try_from(day).map_err(|_| invalid())?;
    match days_in_month(year, month) {
        Some(last) if (1..=last).contains(&day) => days_from_civil(year, month, day),
        _ => Err(invalid()),
    }
}

/// Parse an ISO `YYYY-MM-DD` date.
///
/// # Errors
///
/// Fails on malformed text or an impossible date.
pub fn parse_date(text: &str) -> TypeResult<i32> {
    let invalid = || TypeError::InvalidDate(text.to_string());
    let trimmed = text.trim();
    let (negative, body) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let mut parts = body.splitn(3, '-');
    let (Some(y), Some(m), Some(d)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };
    let digits = |s: &str, len: std::ops::RangeInclusive<usize>| {
        len.contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(y, 4..=6) || !digits(m, 2..=2) || !digits(d, 2..=2) {
        return Err(invalid());
    }

    let year: i32 = y.parse().map_err(|_| invalid())?;
    let year = if negative { -year } else { year };
    let month: i64 = m.parse().map_err(|_| invalid())?;
    let day: i64 = d.parse().map_err(|_| invalid())?;
    date_from_parts(year, month, day).map_err(|_| invalid())
}

/// Format a day count as ISO `YYYY-MM-DD`.
#[must_use]
pub fn format_date(days: i32) -> String {
    let (year, month, day) = civil_from_days(days);
    if year < 0 {
        format!("-{:04}-{month:02}-{day:02}", -year)
    } else {
        format!("{year:04}-{month:02}-{day:02}")
    }
}
