use crate::engine::iterator::SharedIterator;
use crate::engine::runtime::{DynamicContext, Error, ErrorCode, SourceLocation};
use crate::types::ItemType;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, SecondsFormat};
use core::fmt;
use core::fmt::Write as _;
use core::str::FromStr;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type Sequence = Vec<Item>;

/// Generic `duration` value, canonicalized to a month part and a millisecond part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DurationValue {
    pub months: i32,
    pub millis: i64,
}

impl DurationValue {
    pub const fn new(months: i32, millis: i64) -> Self {
        Self { months, millis }
    }
}

/// Runtime value of the query language.
///
/// Structural values sit behind `Arc` so that cloning an item, which happens
/// whenever a sequence is bound into a context, stays cheap. Objects and
/// arrays are trees; nothing in the runtime builds a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    String(String),
    Integer(i64),
    Decimal(#[serde(with = "rust_decimal::serde::str")] Decimal),
    Double(f64),
    Boolean(bool),
    Null,
    Duration(DurationValue),
    // total months
    YearMonthDuration(i32),
    // total milliseconds
    DayTimeDuration(i64),
    DateTime(DateTime<FixedOffset>),
    Date {
        date: NaiveDate,
        // offset from UTC in seconds
        tz: Option<i32>,
    },
    Time {
        time: NaiveTime,
        tz: Option<i32>,
    },
    HexBinary(Vec<u8>),
    Base64Binary(Vec<u8>),
    AnyUri(String),
    Object(Arc<IndexMap<String, Item>>),
    Array(Arc<Vec<Item>>),
    // Kept last: skipped variants must not shift the encoded variant indices.
    #[serde(skip)]
    Function(FunctionItem),
}

impl Item {
    pub fn string(s: impl Into<String>) -> Self {
        Item::String(s.into())
    }

    pub fn object<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Item)>) -> Self {
        Item::Object(Arc::new(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn array(items: impl IntoIterator<Item = Item>) -> Self {
        Item::Array(Arc::new(items.into_iter().collect()))
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Item::String(_) => ItemType::String,
            Item::Integer(_) => ItemType::Integer,
            Item::Decimal(_) => ItemType::Decimal,
            Item::Double(_) => ItemType::Double,
            Item::Boolean(_) => ItemType::Boolean,
            Item::Null => ItemType::Null,
            Item::Duration(_) => ItemType::Duration,
            Item::YearMonthDuration(_) => ItemType::YearMonthDuration,
            Item::DayTimeDuration(_) => ItemType::DayTimeDuration,
            Item::DateTime(_) => ItemType::DateTime,
            Item::Date { .. } => ItemType::Date,
            Item::Time { .. } => ItemType::Time,
            Item::HexBinary(_) => ItemType::HexBinary,
            Item::Base64Binary(_) => ItemType::Base64Binary,
            Item::AnyUri(_) => ItemType::AnyUri,
            Item::Object(_) => ItemType::Object,
            Item::Array(_) => ItemType::Array,
            Item::Function(_) => ItemType::Function,
        }
    }

    pub fn is_atomic(&self) -> bool {
        !matches!(self, Item::Object(_) | Item::Array(_) | Item::Function(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Item::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Item::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// String payload of `string` and `anyURI` items.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Item::String(s) | Item::AnyUri(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Item>> {
        match self {
            Item::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Item]> {
        match self {
            Item::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Whether this item is, or nests, a function item.
    pub fn contains_function(&self) -> bool {
        match self {
            Item::Function(_) => true,
            Item::Array(members) => members.iter().any(Item::contains_function),
            Item::Object(fields) => fields.values().any(Item::contains_function),
            _ => false,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionItem> {
        match self {
            Item::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Lexical (canonical string) form of an atomic item; JSON text for
    /// objects and arrays.
    pub fn string_value(&self) -> String {
        match self {
            Item::String(s) | Item::AnyUri(s) => s.clone(),
            Item::Integer(i) => i.to_string(),
            Item::Decimal(d) => d.normalize().to_string(),
            Item::Double(d) => format_double(*d),
            Item::Boolean(b) => b.to_string(),
            Item::Null => "null".to_string(),
            Item::Duration(d) => format_duration(d.months, d.millis),
            Item::YearMonthDuration(m) => format_duration(*m, 0),
            Item::DayTimeDuration(ms) => format_duration(0, *ms),
            Item::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Item::Date { date, tz } => {
                format!("{}{}", date.format("%Y-%m-%d"), format_timezone(*tz))
            }
            Item::Time { time, tz } => {
                format!("{}{}", time.format("%H:%M:%S%.f"), format_timezone(*tz))
            }
            Item::HexBinary(bytes) => encode_hex_upper(bytes),
            Item::Base64Binary(bytes) => BASE64_STANDARD.encode(bytes),
            Item::Object(_) | Item::Array(_) | Item::Function(_) => self.to_string(),
        }
    }

    /// Convert a parsed JSON value into an item.
    ///
    /// Integral numbers become `integer` (or `decimal` beyond the 64-bit
    /// range), numbers with a fraction become `decimal`, numbers written with
    /// an exponent become `double`.
    pub fn from_json_value(value: serde_json::Value) -> Result<Item, Error> {
        Ok(match value {
            serde_json::Value::Null => Item::Null,
            serde_json::Value::Bool(b) => Item::Boolean(b),
            serde_json::Value::String(s) => Item::String(s),
            serde_json::Value::Number(n) => number_item(&n)?,
            serde_json::Value::Array(values) => Item::Array(Arc::new(
                values
                    .into_iter()
                    .map(Item::from_json_value)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            serde_json::Value::Object(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k, Item::from_json_value(v)?);
                }
                Item::Object(Arc::new(out))
            }
        })
    }

    fn write_json(&self, out: &mut String) {
        match self {
            Item::Integer(_) | Item::Decimal(_) | Item::Boolean(_) | Item::Null => {
                out.push_str(&self.string_value());
            }
            Item::Double(d) if d.is_finite() => out.push_str(&self.string_value()),
            Item::Object(map) => {
                if map.is_empty() {
                    out.push_str("{ }");
                    return;
                }
                out.push_str("{ ");
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&serde_json::Value::String(k.clone()).to_string());
                    out.push_str(" : ");
                    v.write_json(out);
                }
                out.push_str(" }");
            }
            Item::Array(items) => {
                if items.is_empty() {
                    out.push_str("[ ]");
                    return;
                }
                out.push_str("[ ");
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    v.write_json(out);
                }
                out.push_str(" ]");
            }
            Item::Function(f) => {
                let _ = write!(
                    out,
                    "\"{}#{}\"",
                    f.name.as_deref().unwrap_or("inline-function"),
                    f.arity()
                );
            }
            other => {
                out.push_str(&serde_json::Value::String(other.string_value()).to_string());
            }
        }
    }
}

/// JSON-style serialization: strings are quoted, objects and arrays nest.
impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write_json(&mut out);
        f.write_str(&out)
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Item::String(s.to_string())
    }
}

impl From<String> for Item {
    fn from(s: String) -> Self {
        Item::String(s)
    }
}

impl From<i64> for Item {
    fn from(i: i64) -> Self {
        Item::Integer(i)
    }
}

impl From<bool> for Item {
    fn from(b: bool) -> Self {
        Item::Boolean(b)
    }
}

impl From<f64> for Item {
    fn from(d: f64) -> Self {
        Item::Double(d)
    }
}

impl From<Decimal> for Item {
    fn from(d: Decimal) -> Self {
        Item::Decimal(d)
    }
}

fn number_item(n: &serde_json::Number) -> Result<Item, Error> {
    if let Some(i) = n.as_i64() {
        return Ok(Item::Integer(i));
    }
    let text = n.to_string();
    let invalid = || Error::from_code(ErrorCode::JNDY0021, format!("invalid JSON number: {text}"));
    if text.contains(['e', 'E']) {
        return text.parse::<f64>().map(Item::Double).map_err(|_| invalid());
    }
    match Decimal::from_str(&text) {
        Ok(d) => Ok(Item::Decimal(d)),
        // beyond decimal precision: keep the magnitude as a double
        Err(_) => text.parse::<f64>().map(Item::Double).map_err(|_| invalid()),
    }
}

pub(crate) fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_string()
    } else if d.is_infinite() {
        if d > 0.0 { "INF".to_string() } else { "-INF".to_string() }
    } else {
        d.to_string()
    }
}

pub(crate) fn format_timezone(tz: Option<i32>) -> String {
    match tz {
        None => String::new(),
        Some(0) => "Z".to_string(),
        Some(secs) => {
            let sign = if secs < 0 { '-' } else { '+' };
            let abs = secs.unsigned_abs();
            format!("{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
        }
    }
}

/// ISO 8601 lexical form, e.g. `-P1Y2M3DT4H5M6.5S`.
pub(crate) fn format_duration(months: i32, millis: i64) -> String {
    if months == 0 && millis == 0 {
        return "PT0S".to_string();
    }
    let negative = months < 0 || millis < 0;
    let months = months.unsigned_abs();
    let millis = millis.unsigned_abs();
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push('P');
    let (years, months) = (months / 12, months % 12);
    if years > 0 {
        let _ = write!(out, "{years}Y");
    }
    if months > 0 {
        let _ = write!(out, "{months}M");
    }
    let days = millis / 86_400_000;
    let rest = millis % 86_400_000;
    if days > 0 {
        let _ = write!(out, "{days}D");
    }
    if rest > 0 {
        out.push('T');
        let hours = rest / 3_600_000;
        let minutes = (rest % 3_600_000) / 60_000;
        let secs = (rest % 60_000) / 1000;
        let frac = rest % 1000;
        if hours > 0 {
            let _ = write!(out, "{hours}H");
        }
        if minutes > 0 {
            let _ = write!(out, "{minutes}M");
        }
        if secs > 0 || frac > 0 {
            if frac > 0 {
                let digits = format!("{frac:03}");
                let _ = write!(out, "{secs}.{}S", digits.trim_end_matches('0'));
            } else {
                let _ = write!(out, "{secs}S");
            }
        }
    }
    out
}

pub(crate) fn encode_hex_upper(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0F) as usize] as char);
    }
    out
}

/// Function item: a closure over parameter names and a compiled body.
///
/// The body is a shared, never-opened prototype; each invocation runs its own
/// structural copy, so a function item can be called re-entrantly.
#[derive(Clone)]
pub struct FunctionItem {
    pub name: Option<String>,
    pub parameters: Vec<String>,
    pub body: SharedIterator,
    pub closure: Vec<(String, Sequence)>,
}

impl FunctionItem {
    pub fn new(name: Option<String>, parameters: Vec<String>, body: SharedIterator) -> Self {
        Self {
            name,
            parameters,
            body,
            closure: Vec::new(),
        }
    }

    pub fn with_closure(mut self, closure: Vec<(String, Sequence)>) -> Self {
        self.closure = closure;
        self
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn invoke(
        &self,
        arguments: Vec<Sequence>,
        caller: &DynamicContext,
        location: SourceLocation,
    ) -> Result<Sequence, Error> {
        if arguments.len() != self.arity() {
            return Err(Error::unexpected_type(
                format!(
                    "function {} expects {} argument(s), got {}",
                    self.name.as_deref().unwrap_or("inline-function"),
                    self.arity(),
                    arguments.len()
                ),
                location,
            ));
        }
        let mut context = DynamicContext::new(Arc::clone(caller.configuration()));
        for (name, value) in &self.closure {
            context.add_variable_value(name.clone(), value.clone());
        }
        for (name, value) in self.parameters.iter().zip(arguments) {
            context.add_variable_value(name.clone(), value);
        }
        let mut body = self.body.boxed_clone();
        body.materialize(&context)
    }
}

impl PartialEq for FunctionItem {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.body, &other.body) && self.closure == other.closure
    }
}

impl fmt::Debug for FunctionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionItem")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("body", &self.body.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("42", Item::Integer(42))]
    #[case("-1.50", Item::Decimal(Decimal::new(-150, 2)))]
    #[case("2.5e3", Item::Double(2500.0))]
    #[case("null", Item::Null)]
    #[case("\"x\"", Item::string("x"))]
    fn json_scalars_map_to_items(#[case] text: &str, #[case] expected: Item) {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(Item::from_json_value(value).unwrap(), expected);
    }

    #[test]
    fn json_objects_keep_key_order() {
        let value: serde_json::Value = serde_json::from_str(r#"{"b": 1, "a": [true, null]}"#).unwrap();
        let item = Item::from_json_value(value).unwrap();
        let keys: Vec<&str> = item.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(item.to_string(), r#"{ "b" : 1, "a" : [ true, null ] }"#);
    }

    #[rstest]
    #[case(14, 0, "P1Y2M")]
    #[case(0, 93_784_500, "P1DT2H3M4.5S")]
    #[case(-3, 0, "-P3M")]
    #[case(0, 0, "PT0S")]
    fn durations_render_in_iso_form(#[case] months: i32, #[case] millis: i64, #[case] expected: &str) {
        assert_eq!(format_duration(months, millis), expected);
    }

    #[test]
    fn lexical_forms_of_binaries_and_dates() {
        assert_eq!(Item::HexBinary(vec![0x0f, 0xa0]).string_value(), "0FA0");
        assert_eq!(Item::Base64Binary(b"hi".to_vec()).string_value(), "aGk=");
        let date = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(Item::Date { date, tz: Some(3600) }.string_value(), "2024-02-29+01:00");
        assert_eq!(Item::Date { date, tz: None }.string_value(), "2024-02-29");
    }
}
