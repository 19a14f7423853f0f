//! Raw cell values as read from a workbook, and their one coercion to text.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDateTime),
    Empty,
}

impl CellValue {
    /// Empty cells and whitespace-only text both count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text as stored: the only coercion applied before a value reaches the store.
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Boolean(b) => b.to_string(),
            CellValue::Date(dt) => format_date(dt),
            CellValue::Empty => String::new(),
        }
    }
}

/// Integral values print without a fraction; everything else uses the
/// shortest decimal that round-trips.
pub fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        let int = n as i64;
        // -0.0 collapses to 0
        return int.to_string();
    }
    n.to_string()
}

/// `YYYY-MM-DD` for midnight, `YYYY-MM-DDTHH:MM:SS` otherwise.
pub fn format_date(dt: &NaiveDateTime) -> String {
    if dt.time() == NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    }
}

/// Largest serial a spreadsheet can display as a date (9999-12-31).
pub const MAX_DATE_SERIAL: f64 = 2_958_465.0;

/// Convert a spreadsheet date serial into a timestamp. Serials outside
/// `0..MAX_DATE_SERIAL + 1` have no date and yield `None`.
///
/// The 1900 system counts from 1899-12-30 and carries the phantom 1900-02-29
/// (serial 60), so serials below 60 are shifted by one day. The 1904 system
/// counts from 1904-01-01.
pub fn serial_to_datetime(serial: f64, date1904: bool) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 || serial >= MAX_DATE_SERIAL + 1.0 {
        return None;
    }

    let (base, serial) = if date1904 {
        (NaiveDate::from_ymd_opt(1904, 1, 1)?, serial)
    } else if serial < 60.0 {
        (NaiveDate::from_ymd_opt(1899, 12, 30)?, serial + 1.0)
    } else {
        (NaiveDate::from_ymd_opt(1899, 12, 30)?, serial)
    };

    let days = serial.trunc() as i64;
    let mut seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    let mut date = base.checked_add_signed(chrono::Duration::try_days(days)?)?;
    if seconds >= 86_400 {
        seconds -= 86_400;
        date = date.succ_opt()?;
    }
    let time = NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, 0)?;
    Some(date.and_time(time))
}

/// Parse the ISO-8601 payload of an OOXML `t="d"` cell.
pub fn parse_iso_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim().trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}
