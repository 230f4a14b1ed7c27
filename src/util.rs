// Parsing and formatting helpers.
//
// Every "dirty" cell conversion lives here so loaders can work with typed
// values only.
use chrono::NaiveDate;
use num_format::{Locale, ToFormattedString};
use serde_json::Value;

/// Parse a float cell, tolerating whitespace and thousands separators.
///
/// Returns `None` for empty cells and anything containing letters.
pub fn parse_f64_safe(s: Option<&str>) -> Option<f64> {
    let s = s?.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().any(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let s = s.replace(',', "");
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the leading integer of a cell. Anything without a leading run of
/// digits yields `None`.
pub fn parse_i64_lenient(s: Option<&str>) -> Option<i64> {
    let s = s?.trim().replace(',', "");
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, s.strip_prefix('+').unwrap_or(&s)),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    digits[..end].parse::<i64>().ok().map(|v| sign * v)
}

/// Count cells coerce to zero when absent, non-numeric or negative.
pub fn count_or_zero(s: Option<&str>) -> u64 {
    parse_i64_lenient(s)
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(0)
}

/// Same coercion policy as `count_or_zero`, for JSON cells.
pub fn json_count(v: Option<&Value>) -> u64 {
    match v {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => count_or_zero(Some(s)),
        _ => 0,
    }
}

/// Normalize a compact `YYYYMMDD` date (string or JSON number).
pub fn parse_compact_date(v: &Value) -> Option<NaiveDate> {
    let raw = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if raw.len() != 8 || !raw.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(&raw, "%Y%m%d").ok()
}

/// Extract the date embedded in a snapshot file name like `03-15-2020.csv`.
pub fn parse_snapshot_file_date(file_name: &str) -> Option<NaiveDate> {
    let stem = file_name.strip_suffix(".csv")?;
    let mut parts = stem.split('-');
    let (m, d, y) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !(all_digits(m) && all_digits(d) && all_digits(y)) {
        return None;
    }
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

fn padded_digits(s: &str, width: usize) -> Option<String> {
    let s = s.trim();
    if s.is_empty() || s.len() > width || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{:0>width$}", s, width = width))
}

/// Five-digit FIPS code. Spreadsheet exports often drop the leading zero.
pub fn fips_code(s: &str) -> Option<String> {
    padded_digits(s, 5)
}

/// County FIPS code from its two-digit state and three-digit county parts.
pub fn county_fips(state: &str, county: &str) -> Option<String> {
    Some(format!(
        "{}{}",
        padded_digits(state, 2)?,
        padded_digits(county, 3)?
    ))
}

pub fn format_number(n: f64, decimals: usize) -> String {
    let neg = n.is_sign_negative() && n != 0.0;
    let s = format!("{:.*}", decimals, n.abs());
    let mut parts = s.split('.');
    let int_val: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let mut res = int_val.to_formatted_string(&Locale::en);
    if let Some(frac) = parts.next() {
        res.push('.');
        res.push_str(frac);
    }
    if neg {
        format!("-{}", res)
    } else {
        res
    }
}

/// Integer counts for log lines, e.g. `9,855 rows`.
pub fn format_int<T>(n: T) -> String
where
    T: ToFormattedString,
{
    n.to_formatted_string(&Locale::en)
}
