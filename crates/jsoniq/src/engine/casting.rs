//! `cast as` conversions between atomic types.

use crate::engine::runtime::{Error, ErrorCode, SourceLocation};
use crate::types::ItemType;
use crate::xdm::{DurationValue, Item};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use core::str::FromStr;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};

const MILLIS_PER_DAY: i64 = 86_400_000;
const MILLIS_PER_HOUR: i64 = 3_600_000;
const MILLIS_PER_MINUTE: i64 = 60_000;

/// Cast an atomic `item` to `target`.
///
/// Pairs that fail [`ItemType::statically_castable_as`] are rejected with
/// `XPTY0004` before any value is inspected. A string whose lexical form does
/// not match the target fails with `FORG0001`; a value that has no
/// counterpart in the target (NaN to integer, out-of-range numbers) fails
/// with `FOCA0002`.
pub fn cast_item(item: &Item, target: ItemType, location: SourceLocation) -> Result<Item, Error> {
    let source = item.item_type();
    if !item.is_atomic() {
        return Err(Error::unexpected_type(
            format!("cannot cast a non-atomic {source} item to {target}"),
            location,
        ));
    }
    let abstract_or_structured = matches!(
        target,
        ItemType::Item
            | ItemType::Atomic
            | ItemType::JsonItem
            | ItemType::Object
            | ItemType::Array
            | ItemType::Function
    );
    if abstract_or_structured || !source.statically_castable_as(target) {
        return Err(Error::unexpected_type(
            format!("{source} cannot be cast to {target}"),
            location,
        ));
    }
    if source == target {
        return Ok(item.clone());
    }
    if target == ItemType::String {
        return Ok(Item::String(item.string_value()));
    }
    if let Item::String(text) = item {
        return parse_lexical(text.trim(), target, location);
    }
    match (item, target) {
        (_, ItemType::Integer) => to_integer(item, location),
        (_, ItemType::Decimal) => to_decimal(item, location),
        (_, ItemType::Double) => Ok(Item::Double(to_double(item))),
        (_, ItemType::Boolean) => Ok(Item::Boolean(to_boolean(item))),
        (Item::HexBinary(bytes), ItemType::Base64Binary) => Ok(Item::Base64Binary(bytes.clone())),
        (Item::Base64Binary(bytes), ItemType::HexBinary) => Ok(Item::HexBinary(bytes.clone())),
        (_, ItemType::Duration | ItemType::YearMonthDuration | ItemType::DayTimeDuration) => {
            let (months, millis) = duration_parts(item);
            Ok(match target {
                ItemType::YearMonthDuration => Item::YearMonthDuration(months),
                ItemType::DayTimeDuration => Item::DayTimeDuration(millis),
                _ => Item::Duration(DurationValue::new(months, millis)),
            })
        }
        (Item::DateTime(dt), ItemType::Date) => Ok(Item::Date {
            date: dt.date_naive(),
            tz: Some(dt.offset().local_minus_utc()),
        }),
        (Item::DateTime(dt), ItemType::Time) => Ok(Item::Time {
            time: dt.time(),
            tz: Some(dt.offset().local_minus_utc()),
        }),
        (Item::Date { date, tz }, ItemType::DateTime) => {
            // an absent timezone becomes UTC
            date_time(date.and_time(NaiveTime::MIN), tz.unwrap_or(0))
                .ok_or_else(|| invalid_value(item, target, location))
                .map(Item::DateTime)
        }
        _ => Err(Error::unexpected_type(
            format!("{source} cannot be cast to {target}"),
            location,
        )),
    }
}

fn to_integer(item: &Item, location: SourceLocation) -> Result<Item, Error> {
    let value = match item {
        Item::Integer(i) => Some(*i),
        Item::Decimal(d) => d.trunc().to_i64(),
        Item::Double(d) => {
            let t = d.trunc();
            (t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
        }
        Item::Boolean(b) => Some(i64::from(*b)),
        _ => None,
    };
    value
        .map(Item::Integer)
        .ok_or_else(|| invalid_value(item, ItemType::Integer, location))
}

fn to_decimal(item: &Item, location: SourceLocation) -> Result<Item, Error> {
    let value = match item {
        Item::Integer(i) => Some(Decimal::from(*i)),
        Item::Decimal(d) => Some(*d),
        Item::Double(d) => Decimal::from_f64(*d),
        Item::Boolean(b) => Some(Decimal::from(u8::from(*b))),
        _ => None,
    };
    value
        .map(Item::Decimal)
        .ok_or_else(|| invalid_value(item, ItemType::Decimal, location))
}

fn to_double(item: &Item) -> f64 {
    match item {
        Item::Integer(i) => *i as f64,
        Item::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
        Item::Double(d) => *d,
        Item::Boolean(b) => f64::from(u8::from(*b)),
        _ => f64::NAN,
    }
}

fn to_boolean(item: &Item) -> bool {
    match item {
        Item::Integer(i) => *i != 0,
        Item::Decimal(d) => !d.is_zero(),
        Item::Double(d) => !(d.is_nan() || *d == 0.0),
        Item::Boolean(b) => *b,
        _ => false,
    }
}

fn duration_parts(item: &Item) -> (i32, i64) {
    match item {
        Item::Duration(d) => (d.months, d.millis),
        Item::YearMonthDuration(months) => (*months, 0),
        Item::DayTimeDuration(millis) => (0, *millis),
        _ => (0, 0),
    }
}

fn date_time(naive: NaiveDateTime, offset_secs: i32) -> Option<DateTime<FixedOffset>> {
    let offset = FixedOffset::east_opt(offset_secs)?;
    offset.from_local_datetime(&naive).single()
}

fn parse_lexical(text: &str, target: ItemType, location: SourceLocation) -> Result<Item, Error> {
    let parsed = match target {
        ItemType::Integer => text.parse::<i64>().ok().map(Item::Integer),
        ItemType::Decimal => parse_decimal(text).map(Item::Decimal),
        ItemType::Double => parse_double(text).map(Item::Double),
        ItemType::Boolean => match text {
            "true" | "1" => Some(Item::Boolean(true)),
            "false" | "0" => Some(Item::Boolean(false)),
            _ => None,
        },
        ItemType::Null => (text == "null").then_some(Item::Null),
        ItemType::AnyUri => Some(Item::AnyUri(text.to_string())),
        ItemType::HexBinary => decode_hex(text).map(Item::HexBinary),
        ItemType::Base64Binary => {
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            BASE64_STANDARD.decode(compact).ok().map(Item::Base64Binary)
        }
        ItemType::DateTime => parse_date_time(text).map(Item::DateTime),
        ItemType::Date => split_timezone(text).and_then(|(body, tz)| {
            NaiveDate::parse_from_str(body, "%Y-%m-%d")
                .ok()
                .map(|date| Item::Date { date, tz })
        }),
        ItemType::Time => split_timezone(text).and_then(|(body, tz)| {
            NaiveTime::parse_from_str(body, "%H:%M:%S%.f")
                .ok()
                .map(|time| Item::Time { time, tz })
        }),
        ItemType::Duration => parse_duration(text)
            .map(|d| Item::Duration(DurationValue::new(d.months, d.millis))),
        ItemType::YearMonthDuration => parse_duration(text)
            .filter(|d| !d.has_day_time)
            .map(|d| Item::YearMonthDuration(d.months)),
        ItemType::DayTimeDuration => parse_duration(text)
            .filter(|d| !d.has_year_month)
            .map(|d| Item::DayTimeDuration(d.millis)),
        _ => None,
    };
    parsed.ok_or_else(|| {
        Error::from_code(
            ErrorCode::FORG0001,
            format!("\"{text}\" is not a valid {target} literal"),
        )
        .at(location)
    })
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    if text.is_empty() || text.contains(['e', 'E']) {
        return None;
    }
    Decimal::from_str(text).ok()
}

fn parse_double(text: &str) -> Option<f64> {
    match text {
        "INF" | "+INF" => return Some(f64::INFINITY),
        "-INF" => return Some(f64::NEG_INFINITY),
        "NaN" => return Some(f64::NAN),
        _ => {}
    }
    // the std parser also accepts "inf" and "nan", which are not valid here
    if text.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    text.parse::<f64>().ok()
}

fn parse_date_time(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    date_time(naive, 0)
}

/// Split a trailing `Z` or `±hh:mm` suffix off a date or time literal.
/// Returns `None` for a malformed offset.
fn split_timezone(text: &str) -> Option<(&str, Option<i32>)> {
    if let Some(body) = text.strip_suffix('Z') {
        return Some((body, Some(0)));
    }
    let bytes = text.as_bytes();
    let n = bytes.len();
    if n >= 6 && matches!(bytes[n - 6], b'+' | b'-') && bytes[n - 3] == b':' {
        let hours: i32 = text.get(n - 5..n - 3)?.parse().ok()?;
        let minutes: i32 = text.get(n - 2..)?.parse().ok()?;
        if hours > 14 || minutes > 59 {
            return None;
        }
        let secs = hours * 3600 + minutes * 60;
        let secs = if bytes[n - 6] == b'-' { -secs } else { secs };
        return Some((text.get(..n - 6)?, Some(secs)));
    }
    Some((text, None))
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16)?;
            let lo = (pair[1] as char).to_digit(16)?;
            u8::try_from(hi * 16 + lo).ok()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ParsedDuration {
    months: i32,
    millis: i64,
    has_year_month: bool,
    has_day_time: bool,
}

/// ISO 8601 duration: `-?P(nY)?(nM)?(nD)?(T(nH)?(nM)?(n(.n)?S)?)?`.
fn parse_duration(text: &str) -> Option<ParsedDuration> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let rest = rest.strip_prefix('P')?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((_, "")) => return None,
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };
    let mut months: i64 = 0;
    let mut millis: i64 = 0;
    let mut has_year_month = false;
    let mut has_day_time = false;
    let mut any = false;

    let mut expected = ['Y', 'M', 'D'].into_iter();
    for (number, unit) in components(date_part)? {
        // units must appear in order, each at most once
        expected.find(|u| *u == unit)?;
        let value: i64 = number.parse().ok()?;
        any = true;
        match unit {
            'Y' => {
                months = months.checked_add(value.checked_mul(12)?)?;
                has_year_month = true;
            }
            'M' => {
                months = months.checked_add(value)?;
                has_year_month = true;
            }
            _ => {
                millis = millis.checked_add(value.checked_mul(MILLIS_PER_DAY)?)?;
                has_day_time = true;
            }
        }
    }
    if let Some(time_part) = time_part {
        let mut expected = ['H', 'M', 'S'].into_iter();
        for (number, unit) in components(time_part)? {
            expected.find(|u| *u == unit)?;
            any = true;
            has_day_time = true;
            let part = match unit {
                'H' => number.parse::<i64>().ok()?.checked_mul(MILLIS_PER_HOUR)?,
                'M' => number.parse::<i64>().ok()?.checked_mul(MILLIS_PER_MINUTE)?,
                _ => seconds_to_millis(number)?,
            };
            millis = millis.checked_add(part)?;
        }
    }
    if !any {
        return None;
    }
    let months = i32::try_from(months).ok()?;
    Some(ParsedDuration {
        months: if negative { -months } else { months },
        millis: if negative { -millis } else { millis },
        has_year_month,
        has_day_time,
    })
}

fn components(part: &str) -> Option<Vec<(&str, char)>> {
    let mut out = Vec::new();
    let mut start = 0;
    for (i, c) in part.char_indices() {
        if c.is_ascii_digit() || c == '.' {
            continue;
        }
        let number = &part[start..i];
        if number.is_empty() {
            return None;
        }
        out.push((number, c));
        start = i + c.len_utf8();
    }
    (start == part.len()).then_some(out)
}

fn seconds_to_millis(number: &str) -> Option<i64> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    let whole: i64 = whole.parse().ok()?;
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut digits: String = fraction.chars().take(3).collect();
    while digits.len() < 3 {
        digits.push('0');
    }
    let fraction: i64 = digits.parse().ok()?;
    whole.checked_mul(1000)?.checked_add(fraction)
}

fn invalid_value(item: &Item, target: ItemType, location: SourceLocation) -> Error {
    Error::from_code(
        ErrorCode::FOCA0002,
        format!("{} cannot be represented as {target}", item.string_value()),
    )
    .at(location)
}
