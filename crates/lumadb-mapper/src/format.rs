//! Culture-invariant format rules for numbers and date-times
//!
//! Rendering always uses `.` as decimal point and `,` as group separator.
//! Parsing is tolerant: a value written with one template (or by another
//! writer with none) still parses as long as it is a valid number or
//! date-time, so formatting drift in stored data does not break decoding.

use std::fmt::Write as _;

use chrono::format::{Item as FormatItem, StrftimeItems};
use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

use lumadb_common::error::FormatError;

/// Time-zone handling declared on a date-time property.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateTimeKind {
    /// Keep the value's own offset
    #[default]
    Unspecified,
    /// Normalise to UTC
    Utc,
    /// Normalise to the host's local zone
    Local,
}

impl DateTimeKind {
    /// Convert `dt` into this kind's zone. The instant is unchanged.
    #[must_use]
    pub fn apply(self, dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self {
            DateTimeKind::Unspecified => dt,
            DateTimeKind::Utc => dt.with_timezone(&Utc).fixed_offset(),
            DateTimeKind::Local => dt.with_timezone(&Local).fixed_offset(),
        }
    }
}

/// Parsed numeric template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NumberFormat {
    /// Shortest round-trip representation
    General,
    /// `G<n>`: n significant digits
    Significant(usize),
    /// `F<n>`
    Fixed(usize),
    /// `N<n>`: fixed with thousands grouping
    Grouped(usize),
    /// `E<n>`
    Scientific { decimals: usize, upper: bool },
    /// `D<n>`: zero-padded integer
    Padded(usize),
    /// `X<n>`
    Hex { width: usize, upper: bool },
    /// Picture string such as `0.00` or `#,##0.0`
    Picture {
        min_integer: usize,
        decimals: usize,
        grouped: bool,
    },
}

impl NumberFormat {
    fn parse(template: &str) -> Result<Self, FormatError> {
        let unsupported = || FormatError::UnsupportedTemplate(template.to_string());
        let trimmed = template.trim();
        if trimmed.is_empty() {
            return Ok(NumberFormat::General);
        }

        if trimmed.chars().all(|c| matches!(c, '0' | '#' | '.' | ',')) {
            let (int_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));
            if frac_part.contains('.') || frac_part.contains(',') {
                return Err(unsupported());
            }
            return Ok(NumberFormat::Picture {
                min_integer: int_part.chars().filter(|c| *c == '0').count(),
                decimals: frac_part.len(),
                grouped: int_part.contains(','),
            });
        }

        let mut chars = trimmed.chars();
        let letter = chars.next().ok_or_else(unsupported)?;
        let digits = chars.as_str();
        let precision = if digits.is_empty() {
            None
        } else {
            Some(digits.parse::<usize>().map_err(|_| unsupported())?)
        };

        let format = match letter {
            'G' | 'g' | 'R' | 'r' => match precision {
                None | Some(0) => NumberFormat::General,
                Some(n) => NumberFormat::Significant(n),
            },
            'F' | 'f' => NumberFormat::Fixed(precision.unwrap_or(2)),
            'N' | 'n' => NumberFormat::Grouped(precision.unwrap_or(2)),
            'E' | 'e' => NumberFormat::Scientific {
                decimals: precision.unwrap_or(6),
                upper: letter == 'E',
            },
            'D' | 'd' => NumberFormat::Padded(precision.unwrap_or(0)),
            'X' | 'x' => NumberFormat::Hex {
                width: precision.unwrap_or(0),
                upper: letter == 'X',
            },
            _ => return Err(unsupported()),
        };
        Ok(format)
    }
}

fn render_error(template: &str, value: impl ToString) -> FormatError {
    FormatError::Render {
        template: template.to_string(),
        value: value.to_string(),
    }
}

fn parse_error(template: Option<&str>, input: &str) -> FormatError {
    FormatError::Parse {
        template: template.unwrap_or("G").to_string(),
        input: input.to_string(),
    }
}

/// Reject numeric templates that cannot render anything.
pub fn check_number_template(template: &str) -> Result<(), FormatError> {
    NumberFormat::parse(template).map(|_| ())
}

/// Render a signed integer.
pub fn render_i64(value: i64, template: Option<&str>) -> Result<String, FormatError> {
    let Some(template) = template else {
        return Ok(value.to_string());
    };
    match NumberFormat::parse(template)? {
        NumberFormat::General => Ok(value.to_string()),
        NumberFormat::Padded(width) => Ok(pad_integer(value < 0, &value.unsigned_abs().to_string(), width)),
        #[allow(clippy::cast_sign_loss)]
        NumberFormat::Hex { width, upper } => Ok(hex(value as u64, width, upper)),
        NumberFormat::Fixed(decimals) => Ok(fixed_integer(&value.to_string(), decimals)),
        NumberFormat::Grouped(decimals) => Ok(group(&fixed_integer(&value.to_string(), decimals))),
        NumberFormat::Picture {
            min_integer,
            decimals,
            grouped,
        } => Ok(picture(&fixed_integer(&value.to_string(), decimals), min_integer, grouped)),
        #[allow(clippy::cast_precision_loss)]
        other => render_float_format(value as f64, other, template),
    }
}

/// Render an unsigned integer.
pub fn render_u64(value: u64, template: Option<&str>) -> Result<String, FormatError> {
    let Some(template) = template else {
        return Ok(value.to_string());
    };
    match NumberFormat::parse(template)? {
        NumberFormat::General => Ok(value.to_string()),
        NumberFormat::Padded(width) => Ok(pad_integer(false, &value.to_string(), width)),
        NumberFormat::Hex { width, upper } => Ok(hex(value, width, upper)),
        NumberFormat::Fixed(decimals) => Ok(fixed_integer(&value.to_string(), decimals)),
        NumberFormat::Grouped(decimals) => Ok(group(&fixed_integer(&value.to_string(), decimals))),
        NumberFormat::Picture {
            min_integer,
            decimals,
            grouped,
        } => Ok(picture(&fixed_integer(&value.to_string(), decimals), min_integer, grouped)),
        #[allow(clippy::cast_precision_loss)]
        other => render_float_format(value as f64, other, template),
    }
}

/// Render a float. Non-finite values cannot be stored.
pub fn render_f64(value: f64, template: Option<&str>) -> Result<String, FormatError> {
    if !value.is_finite() {
        return Err(render_error(template.unwrap_or("G"), value));
    }
    match template {
        None => Ok(general_f64(value)),
        Some(template) => render_float_format(value, NumberFormat::parse(template)?, template),
    }
}

fn render_float_format(value: f64, format: NumberFormat, template: &str) -> Result<String, FormatError> {
    if !value.is_finite() {
        return Err(render_error(template, value));
    }
    let rendered = match format {
        NumberFormat::General => general_f64(value),
        NumberFormat::Significant(digits) => {
            let rounded: f64 = format!("{:.*e}", digits.saturating_sub(1), value)
                .parse()
                .map_err(|_| render_error(template, value))?;
            general_f64(rounded)
        }
        NumberFormat::Fixed(decimals) => format!("{:.*}", decimals, value),
        NumberFormat::Grouped(decimals) => group(&format!("{:.*}", decimals, value)),
        NumberFormat::Scientific { decimals, upper } => {
            let s = format!("{:.*e}", decimals, value);
            if upper {
                s.to_uppercase()
            } else {
                s
            }
        }
        NumberFormat::Picture {
            min_integer,
            decimals,
            grouped,
        } => picture(&format!("{:.*}", decimals, value), min_integer, grouped),
        NumberFormat::Padded(_) | NumberFormat::Hex { .. } => {
            return Err(render_error(template, value));
        }
    };
    Ok(rendered)
}

/// Shortest round-trip text, switching to exponent form at the extremes.
fn general_f64(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-5..1e16).contains(&magnitude) {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    }
}

fn pad_integer(negative: bool, digits: &str, width: usize) -> String {
    let sign = if negative { "-" } else { "" };
    format!("{}{:0>width$}", sign, digits, width = width)
}

fn hex(value: u64, width: usize, upper: bool) -> String {
    if upper {
        format!("{:0width$X}", value, width = width)
    } else {
        format!("{:0width$x}", value, width = width)
    }
}

fn fixed_integer(digits: &str, decimals: usize) -> String {
    if decimals == 0 {
        digits.to_string()
    } else {
        format!("{}.{}", digits, "0".repeat(decimals))
    }
}

/// Insert `,` every three digits of the integer part.
fn group(fixed: &str) -> String {
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    match frac_part {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

fn picture(fixed: &str, min_integer: usize, grouped: bool) -> String {
    let (sign, unsigned) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed),
    };
    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (unsigned, None),
    };
    let mut int_part = format!("{:0>width$}", int_part, width = min_integer);
    if min_integer == 0 && int_part == "0" && frac_part.is_some() {
        int_part.clear();
    }
    let body = match frac_part {
        Some(f) => format!("{}.{}", int_part, f),
        None => int_part,
    };
    let body = if grouped { group(&body) } else { body };
    format!("{}{}", sign, body)
}

/// Strip what invariant-culture writers may add around a number.
fn normalize(text: &str) -> String {
    let trimmed = text.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    trimmed.chars().filter(|c| *c != ',' && *c != '_').collect()
}

fn is_hex(template: Option<&str>) -> bool {
    matches!(
        template.map(|t| NumberFormat::parse(t)),
        Some(Ok(NumberFormat::Hex { .. }))
    )
}

/// Parse a float, accepting any valid numeric style.
pub fn parse_f64(text: &str, template: Option<&str>) -> Result<f64, FormatError> {
    if is_hex(template) {
        #[allow(clippy::cast_precision_loss)]
        return u64::from_str_radix(text.trim(), 16)
            .map(|v| v as f64)
            .map_err(|_| parse_error(template, text));
    }
    let value: f64 = normalize(text)
        .parse()
        .map_err(|_| parse_error(template, text))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(parse_error(template, text))
    }
}

/// Parse a signed integer; integral values written in float or exponent
/// form are accepted.
pub fn parse_i64(text: &str, template: Option<&str>) -> Result<i64, FormatError> {
    if is_hex(template) {
        #[allow(clippy::cast_possible_wrap)]
        return u64::from_str_radix(text.trim(), 16)
            .map(|v| v as i64)
            .map_err(|_| parse_error(template, text));
    }
    let normalized = normalize(text);
    if let Ok(value) = normalized.parse::<i64>() {
        return Ok(value);
    }
    let value = parse_f64(text, template)?;
    #[allow(clippy::cast_precision_loss)]
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    if value.fract() == 0.0 && in_range {
        #[allow(clippy::cast_possible_truncation)]
        return Ok(value as i64);
    }
    Err(parse_error(template, text))
}

/// Parse an unsigned integer; see [`parse_i64`].
pub fn parse_u64(text: &str, template: Option<&str>) -> Result<u64, FormatError> {
    if is_hex(template) {
        return u64::from_str_radix(text.trim(), 16).map_err(|_| parse_error(template, text));
    }
    let normalized = normalize(text);
    if let Ok(value) = normalized.parse::<u64>() {
        return Ok(value);
    }
    let value = parse_f64(text, template)?;
    #[allow(clippy::cast_precision_loss)]
    let in_range = value >= 0.0 && value < u64::MAX as f64;
    if value.fract() == 0.0 && in_range {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        return Ok(value as u64);
    }
    Err(parse_error(template, text))
}

const SORTABLE: &str = "%Y-%m-%dT%H:%M:%S";
const UNIVERSAL_SORTABLE: &str = "%Y-%m-%d %H:%M:%SZ";

enum DateFormat<'a> {
    RoundTrip,
    Pattern { pattern: &'a str, force_utc: bool },
}

fn date_format(template: Option<&str>) -> DateFormat<'_> {
    match template.map(str::trim) {
        None | Some("" | "o" | "O" | "round-trip") => DateFormat::RoundTrip,
        Some("s") => DateFormat::Pattern {
            pattern: SORTABLE,
            force_utc: false,
        },
        Some("u") => DateFormat::Pattern {
            pattern: UNIVERSAL_SORTABLE,
            force_utc: true,
        },
        Some(pattern) => DateFormat::Pattern {
            pattern,
            force_utc: false,
        },
    }
}

fn strftime_items(pattern: &str) -> Result<Vec<FormatItem<'_>>, FormatError> {
    let items: Vec<FormatItem<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, FormatItem::Error)) {
        return Err(FormatError::UnsupportedTemplate(pattern.to_string()));
    }
    Ok(items)
}

/// Reject date-time templates with invalid strftime items.
pub fn check_date_template(template: &str) -> Result<(), FormatError> {
    match date_format(Some(template)) {
        DateFormat::RoundTrip => Ok(()),
        DateFormat::Pattern { pattern, .. } => strftime_items(pattern).map(|_| ()),
    }
}

/// Render a date-time after applying its declared zone conversion.
pub fn render_datetime(
    value: &DateTime<FixedOffset>,
    kind: DateTimeKind,
    template: Option<&str>,
) -> Result<String, FormatError> {
    let value = kind.apply(*value);
    match date_format(template) {
        DateFormat::RoundTrip => Ok(value.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        DateFormat::Pattern { pattern, force_utc } => {
            let items = strftime_items(pattern)?;
            let value = if force_utc {
                DateTimeKind::Utc.apply(value)
            } else {
                value
            };
            let mut rendered = String::new();
            write!(rendered, "{}", value.format_with_items(items.into_iter()))
                .map_err(|_| render_error(pattern, value))?;
            Ok(rendered)
        }
    }
}

/// Parse a date-time and stamp the declared zone onto it.
pub fn parse_datetime(
    text: &str,
    kind: DateTimeKind,
    template: Option<&str>,
) -> Result<DateTime<FixedOffset>, FormatError> {
    let text = text.trim();
    let parsed = match date_format(template) {
        DateFormat::RoundTrip => DateTime::parse_from_rfc3339(text).ok(),
        DateFormat::Pattern { pattern, force_utc } => {
            strftime_items(pattern)?;
            let zone = if force_utc { DateTimeKind::Utc } else { kind };
            parse_with_pattern(text, pattern, zone)
        }
    };

    parsed
        .or_else(|| DateTime::parse_from_rfc3339(text).ok())
        .map(|dt| kind.apply(dt))
        .ok_or_else(|| parse_error(template.or(Some("o")), text))
}

fn parse_with_pattern(text: &str, pattern: &str, zone: DateTimeKind) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_str(text, pattern) {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(text, pattern)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, pattern)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    match zone {
        DateTimeKind::Local => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.fixed_offset()),
        DateTimeKind::Utc | DateTimeKind::Unspecified => Some(Utc.from_utc_datetime(&naive).fixed_offset()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn utc(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    #[test]
    fn test_integer_formats() {
        assert_eq!(render_i64(42, None).unwrap(), "42");
        assert_eq!(render_i64(42, Some("D5")).unwrap(), "00042");
        assert_eq!(render_i64(-42, Some("D5")).unwrap(), "-00042");
        assert_eq!(render_i64(255, Some("X4")).unwrap(), "00FF");
        assert_eq!(render_i64(1234567, Some("N0")).unwrap(), "1,234,567");
        assert_eq!(render_i64(7, Some("F2")).unwrap(), "7.00");
        assert_eq!(render_i64(7, Some("000")).unwrap(), "007");
    }

    #[test]
    fn test_float_formats() {
        assert_eq!(render_f64(3.14159, Some("F2")).unwrap(), "3.14");
        assert_eq!(render_f64(-1234.5, Some("N1")).unwrap(), "-1,234.5");
        assert_eq!(render_f64(1500.0, Some("E2")).unwrap(), "1.50E3");
        assert_eq!(render_f64(0.5, Some("0.00")).unwrap(), "0.50");
        assert_eq!(render_f64(0.5, Some("#.##")).unwrap(), ".50");
        assert_eq!(render_f64(123.456, Some("G4")).unwrap(), "123.5");
        assert_eq!(render_f64(0.1, None).unwrap(), "0.1");
    }

    #[test]
    fn test_extreme_floats_use_exponent() {
        assert_eq!(render_f64(1e300, None).unwrap(), "1e300");
        assert_eq!(render_f64(1e-7, None).unwrap(), "1e-7");
        assert_eq!(parse_f64(&render_f64(f64::MAX, None).unwrap(), None).unwrap(), f64::MAX);
    }

    #[test]
    fn test_non_finite_rejected() {
        assert!(render_f64(f64::NAN, None).is_err());
        assert!(render_f64(f64::INFINITY, Some("F2")).is_err());
        assert!(parse_f64("NaN", None).is_err());
    }

    #[test]
    fn test_unsupported_templates() {
        assert!(matches!(
            render_i64(1, Some("Q3")),
            Err(FormatError::UnsupportedTemplate(_))
        ));
        assert!(render_f64(1.5, Some("D3")).is_err());
        assert!(render_f64(1.5, Some("X")).is_err());
    }

    #[test]
    fn test_tolerant_parsing() {
        assert_eq!(parse_i64("1,234", None).unwrap(), 1234);
        assert_eq!(parse_i64(" +42 ", None).unwrap(), 42);
        assert_eq!(parse_i64("1.0E3", None).unwrap(), 1000);
        assert_eq!(parse_i64("00042", Some("D5")).unwrap(), 42);
        assert_eq!(parse_i64("00FF", Some("X4")).unwrap(), 255);
        assert!(parse_i64("1.5", None).is_err());
        assert_eq!(parse_f64("1.50E3", Some("F2")).unwrap(), 1500.0);
        assert_eq!(parse_u64("18446744073709551615", None).unwrap(), u64::MAX);
        assert!(parse_u64("-1", None).is_err());
    }

    #[test]
    fn test_integer_extremes_roundtrip() {
        for value in [i64::MIN, -1, 0, 1, i64::MAX] {
            let text = render_i64(value, None).unwrap();
            assert_eq!(parse_i64(&text, None).unwrap(), value);
        }
        let text = render_i64(i64::MIN, Some("X")).unwrap();
        assert_eq!(parse_i64(&text, Some("X")).unwrap(), i64::MIN);
    }

    #[test]
    fn test_round_trip_datetime() {
        let dt = utc("2024-03-01T12:30:45.123Z");
        let text = render_datetime(&dt, DateTimeKind::Unspecified, None).unwrap();
        assert_eq!(text, "2024-03-01T12:30:45.123Z");
        assert_eq!(parse_datetime(&text, DateTimeKind::Unspecified, None).unwrap(), dt);
    }

    #[test]
    fn test_utc_kind_normalises_offset() {
        let dt = utc("2024-03-01T14:00:00+02:00");
        let text = render_datetime(&dt, DateTimeKind::Utc, None).unwrap();
        assert_eq!(text, "2024-03-01T12:00:00Z");
        let back = parse_datetime(&text, DateTimeKind::Utc, None).unwrap();
        assert_eq!(back, dt);
        assert_eq!(back.offset().local_minus_utc(), 0);
    }

    #[test]
    fn test_custom_date_format() {
        let dt = utc("2024-03-01T00:00:00Z");
        let text = render_datetime(&dt, DateTimeKind::Utc, Some("%Y-%m-%d")).unwrap();
        assert_eq!(text, "2024-03-01");
        assert_eq!(parse_datetime(&text, DateTimeKind::Utc, Some("%Y-%m-%d")).unwrap(), dt);
    }

    #[test]
    fn test_sortable_aliases() {
        let dt = utc("2024-03-01T09:08:07Z");
        assert_eq!(
            render_datetime(&dt, DateTimeKind::Utc, Some("s")).unwrap(),
            "2024-03-01T09:08:07"
        );
        assert_eq!(
            render_datetime(&dt, DateTimeKind::Unspecified, Some("u")).unwrap(),
            "2024-03-01 09:08:07Z"
        );
        assert_eq!(parse_datetime("2024-03-01 09:08:07Z", DateTimeKind::Utc, Some("u")).unwrap(), dt);
    }

    #[test]
    fn test_invalid_strftime_is_error_not_panic() {
        let dt = utc("2024-03-01T00:00:00Z");
        assert!(matches!(
            render_datetime(&dt, DateTimeKind::Utc, Some("%Q")),
            Err(FormatError::UnsupportedTemplate(_))
        ));
    }

    #[test]
    fn test_date_parse_falls_back_to_round_trip() {
        let parsed = parse_datetime("2024-03-01T00:00:00Z", DateTimeKind::Utc, Some("%d/%m/%Y")).unwrap();
        assert_eq!(parsed, utc("2024-03-01T00:00:00Z"));
        assert!(parse_datetime("yesterday", DateTimeKind::Utc, None).is_err());
    }

    proptest! {
        #[test]
        fn prop_f64_general_roundtrip(value in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            let text = render_f64(value, None).unwrap();
            prop_assert_eq!(parse_f64(&text, None).unwrap(), value);
        }

        #[test]
        fn prop_i64_roundtrip_any_template(value in any::<i64>(), template in prop::sample::select(vec!["G", "D12", "N0", "X", "000"])) {
            let text = render_i64(value, Some(template)).unwrap();
            prop_assert_eq!(parse_i64(&text, Some(template)).unwrap(), value);
        }

        #[test]
        fn prop_datetime_roundtrip(secs in -62_000_000_000i64..250_000_000_000i64, nanos in 0u32..1_000_000_000) {
            let dt = DateTime::from_timestamp(secs, nanos).unwrap().fixed_offset();
            let text = render_datetime(&dt, DateTimeKind::Utc, None).unwrap();
            prop_assert_eq!(parse_datetime(&text, DateTimeKind::Utc, None).unwrap(), dt);
        }
    }
}
