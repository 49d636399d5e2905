//! Value comparison of atomic items.

use crate::engine::runtime::{Error, SourceLocation};
use crate::xdm::Item;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use core::cmp::Ordering;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::Eq => "eq",
            ComparisonOperator::Ne => "ne",
            ComparisonOperator::Lt => "lt",
            ComparisonOperator::Le => "le",
            ComparisonOperator::Gt => "gt",
            ComparisonOperator::Ge => "ge",
        }
    }

    fn is_equality(&self) -> bool {
        matches!(self, ComparisonOperator::Eq | ComparisonOperator::Ne)
    }

    /// Apply the operator to an ordering; `None` stands for unordered (NaN).
    fn holds(&self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (ComparisonOperator::Ne, None) => true,
            (_, None) => false,
            (ComparisonOperator::Eq, Some(o)) => o == Ordering::Equal,
            (ComparisonOperator::Ne, Some(o)) => o != Ordering::Equal,
            (ComparisonOperator::Lt, Some(o)) => o == Ordering::Less,
            (ComparisonOperator::Le, Some(o)) => o != Ordering::Greater,
            (ComparisonOperator::Gt, Some(o)) => o == Ordering::Greater,
            (ComparisonOperator::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

/// Compare two atomic items with `operator`.
///
/// `null` compares equal to `null` and below every other atomic value.
/// Numbers compare across integer, decimal and double. Durations of
/// different subtypes only support `eq`/`ne`.
pub fn value_compare(
    operator: ComparisonOperator,
    left: &Item,
    right: &Item,
    location: SourceLocation,
) -> Result<bool, Error> {
    if is_duration(left) && is_duration(right) && !operator.is_equality() {
        let same_family = matches!(
            (left, right),
            (Item::YearMonthDuration(_), Item::YearMonthDuration(_))
                | (Item::DayTimeDuration(_), Item::DayTimeDuration(_))
        );
        if !same_family {
            return Err(incomparable(operator, left, right, location));
        }
    }
    let ordering = compare_atomics(left, right)
        .ok_or_else(|| incomparable(operator, left, right, location))?;
    Ok(operator.holds(ordering))
}

/// `None` when the two items have no common comparable type;
/// `Some(None)` when they do but are unordered (NaN).
pub fn compare_atomics(left: &Item, right: &Item) -> Option<Option<Ordering>> {
    let ordering = match (left, right) {
        (Item::Null, Item::Null) => Some(Ordering::Equal),
        (Item::Null, other) if other.is_atomic() => Some(Ordering::Less),
        (other, Item::Null) if other.is_atomic() => Some(Ordering::Greater),
        (Item::Integer(a), Item::Integer(b)) => Some(a.cmp(b)),
        (
            Item::Integer(_) | Item::Decimal(_) | Item::Double(_),
            Item::Integer(_) | Item::Decimal(_) | Item::Double(_),
        ) => compare_numbers(left, right)?,
        (Item::String(a) | Item::AnyUri(a), Item::String(b) | Item::AnyUri(b)) => {
            Some(a.cmp(b))
        }
        (Item::Boolean(a), Item::Boolean(b)) => Some(a.cmp(b)),
        (Item::DateTime(a), Item::DateTime(b)) => Some(a.cmp(b)),
        (Item::Date { date: a, tz: ta }, Item::Date { date: b, tz: tb }) => {
            Some(date_instant(*a, *ta).cmp(&date_instant(*b, *tb)))
        }
        (Item::Time { time: a, tz: ta }, Item::Time { time: b, tz: tb }) => {
            Some(time_instant(*a, *ta).cmp(&time_instant(*b, *tb)))
        }
        (
            Item::Duration(_) | Item::YearMonthDuration(_) | Item::DayTimeDuration(_),
            Item::Duration(_) | Item::YearMonthDuration(_) | Item::DayTimeDuration(_),
        ) => Some(duration_parts(left).cmp(&duration_parts(right))),
        (Item::HexBinary(a), Item::HexBinary(b))
        | (Item::Base64Binary(a), Item::Base64Binary(b)) => Some(a.cmp(b)),
        _ => return None,
    };
    Some(ordering)
}

fn compare_numbers(left: &Item, right: &Item) -> Option<Option<Ordering>> {
    if matches!(left, Item::Double(_)) || matches!(right, Item::Double(_)) {
        let a = as_double(left)?;
        let b = as_double(right)?;
        return Some(a.partial_cmp(&b));
    }
    Some(Some(as_decimal(left)?.cmp(&as_decimal(right)?)))
}

fn as_double(item: &Item) -> Option<f64> {
    match item {
        Item::Integer(i) => Some(*i as f64),
        Item::Decimal(d) => d.to_f64(),
        Item::Double(d) => Some(*d),
        _ => None,
    }
}

fn as_decimal(item: &Item) -> Option<Decimal> {
    match item {
        Item::Integer(i) => Some(Decimal::from(*i)),
        Item::Decimal(d) => Some(*d),
        _ => None,
    }
}

fn is_duration(item: &Item) -> bool {
    matches!(
        item,
        Item::Duration(_) | Item::YearMonthDuration(_) | Item::DayTimeDuration(_)
    )
}

fn duration_parts(item: &Item) -> (i32, i64) {
    match item {
        Item::Duration(d) => (d.months, d.millis),
        Item::YearMonthDuration(months) => (*months, 0),
        Item::DayTimeDuration(millis) => (0, *millis),
        _ => (0, 0),
    }
}

// values without a timezone are taken to be in UTC; seconds since the
// epoch in i64 leave room for every chrono date shifted by any offset
fn date_instant(date: NaiveDate, tz: Option<i32>) -> (i64, u32) {
    utc_seconds(date.and_time(NaiveTime::MIN), tz)
}

fn time_instant(time: NaiveTime, tz: Option<i32>) -> (i64, u32) {
    let reference = NaiveDate::from_ymd_opt(1972, 12, 31).unwrap_or_default();
    utc_seconds(reference.and_time(time), tz)
}

fn utc_seconds(local: NaiveDateTime, tz: Option<i32>) -> (i64, u32) {
    let local = local.and_utc();
    (
        local.timestamp() - i64::from(tz.unwrap_or(0)),
        local.timestamp_subsec_nanos(),
    )
}

fn incomparable(
    operator: ComparisonOperator,
    left: &Item,
    right: &Item,
    location: SourceLocation,
) -> Error {
    Error::unexpected_type(
        format!(
            "cannot compare {} with {} using {}",
            left.item_type(),
            right.item_type(),
            operator.symbol()
        ),
        location,
    )
}
