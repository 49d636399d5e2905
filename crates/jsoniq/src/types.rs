//! The fixed item-type lattice.
//!
//! ```text
//! item
//! ├── atomic
//! │   ├── string, boolean, null, anyURI, hexBinary, base64Binary
//! │   ├── decimal ── integer
//! │   ├── double
//! │   ├── dateTime, date, time
//! │   └── duration ── yearMonthDuration, dayTimeDuration
//! ├── json-item ── object, array
//! └── function
//! ```
//!
//! The hierarchy is at most three levels deep, so subtype checks are direct
//! membership tests per node rather than a lattice walk.

use crate::engine::runtime::{Error, ErrorCode};
use core::fmt;
use core::str::FromStr;
use std::collections::HashMap;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemType {
    Item,
    Atomic,
    String,
    Integer,
    Decimal,
    Double,
    Boolean,
    Null,
    Duration,
    YearMonthDuration,
    DayTimeDuration,
    DateTime,
    Date,
    Time,
    HexBinary,
    AnyUri,
    Base64Binary,
    JsonItem,
    Object,
    Array,
    Function,
}

static ITEM_TYPES_BY_NAME: LazyLock<HashMap<&'static str, ItemType>> =
    LazyLock::new(|| ItemType::ALL.iter().map(|t| (t.name(), *t)).collect());

impl ItemType {
    pub const ALL: [ItemType; 21] = [
        ItemType::Item,
        ItemType::Atomic,
        ItemType::String,
        ItemType::Integer,
        ItemType::Decimal,
        ItemType::Double,
        ItemType::Boolean,
        ItemType::Null,
        ItemType::Duration,
        ItemType::YearMonthDuration,
        ItemType::DayTimeDuration,
        ItemType::DateTime,
        ItemType::Date,
        ItemType::Time,
        ItemType::HexBinary,
        ItemType::AnyUri,
        ItemType::Base64Binary,
        ItemType::JsonItem,
        ItemType::Object,
        ItemType::Array,
        ItemType::Function,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ItemType::Item => "item",
            ItemType::Atomic => "atomic",
            ItemType::String => "string",
            ItemType::Integer => "integer",
            ItemType::Decimal => "decimal",
            ItemType::Double => "double",
            ItemType::Boolean => "boolean",
            ItemType::Null => "null",
            ItemType::Duration => "duration",
            ItemType::YearMonthDuration => "yearMonthDuration",
            ItemType::DayTimeDuration => "dayTimeDuration",
            ItemType::DateTime => "dateTime",
            ItemType::Date => "date",
            ItemType::Time => "time",
            ItemType::HexBinary => "hexBinary",
            ItemType::AnyUri => "anyURI",
            ItemType::Base64Binary => "base64Binary",
            ItemType::JsonItem => "json-item",
            ItemType::Object => "object",
            ItemType::Array => "array",
            ItemType::Function => "function",
        }
    }

    /// Look up a type by its lexical name.
    ///
    /// Names outside the fixed enumeration indicate a defect in compile-time
    /// type handling and fail with `JQRT0002`.
    pub fn from_name(name: &str) -> Result<ItemType, Error> {
        ITEM_TYPES_BY_NAME.get(name).copied().ok_or_else(|| {
            Error::from_code(ErrorCode::JQRT0002, format!("type unrecognized: {name}"))
        })
    }

    /// Every type is a subtype of itself and of `item`.
    pub fn is_subtype_of(&self, super_type: ItemType) -> bool {
        use ItemType::*;
        match super_type {
            Item => true,
            JsonItem => matches!(self, Object | Array | JsonItem),
            Atomic => matches!(
                self,
                String
                    | Integer
                    | Decimal
                    | Double
                    | Boolean
                    | Null
                    | AnyUri
                    | HexBinary
                    | Base64Binary
                    | DateTime
                    | Date
                    | Time
                    | Duration
                    | YearMonthDuration
                    | DayTimeDuration
                    | Atomic
            ),
            Duration => matches!(self, YearMonthDuration | DayTimeDuration | Duration),
            Decimal => matches!(self, Integer | Decimal),
            other => *self == other,
        }
    }

    /// Lowest common ancestor of `self` and `other` in the lattice.
    pub fn find_common_super_type(&self, other: ItemType) -> ItemType {
        if other.is_subtype_of(*self) {
            *self
        } else if self.is_subtype_of(other) {
            other
        } else if self.is_subtype_of(ItemType::Duration) && other.is_subtype_of(ItemType::Duration) {
            ItemType::Duration
        } else if self.is_subtype_of(ItemType::Atomic) && other.is_subtype_of(ItemType::Atomic) {
            ItemType::Atomic
        } else if self.is_subtype_of(ItemType::JsonItem) && other.is_subtype_of(ItemType::JsonItem) {
            ItemType::JsonItem
        } else {
            ItemType::Item
        }
    }

    /// Whether a value of this type may be cast to `target`, judged statically.
    ///
    /// The relation is reflexive but not transitive: string casts to and from
    /// everything, the numeric/boolean group, the binary pair and the duration
    /// family interconvert, dateTime casts to date or time and date casts to
    /// dateTime.
    pub fn statically_castable_as(&self, target: ItemType) -> bool {
        use ItemType::*;
        if *self == target {
            return true;
        }
        if *self == String || target == String {
            return true;
        }
        match self {
            Boolean | Integer | Double | Decimal => {
                matches!(target, Integer | Double | Decimal | Boolean)
            }
            Base64Binary | HexBinary => matches!(target, Base64Binary | HexBinary),
            Duration | YearMonthDuration | DayTimeDuration => target.is_subtype_of(Duration),
            DateTime => matches!(target, Date | Time),
            Date => target == DateTime,
            _ => false,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ItemType::Integer | ItemType::Decimal | ItemType::Double)
    }

    pub fn can_be_promoted_to_string(&self) -> bool {
        matches!(self, ItemType::String | ItemType::AnyUri)
    }

    pub fn is_atomic(&self) -> bool {
        self.is_subtype_of(ItemType::Atomic)
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ItemType::from_name(s)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::FaultKind;

    #[test]
    fn names_round_trip_through_registry() {
        for t in ItemType::ALL {
            assert_eq!(ItemType::from_name(t.name()).unwrap(), t);
        }
    }

    #[test]
    fn unknown_name_is_unrecognized_type_fault() {
        let err = ItemType::from_name("xs:gYear").unwrap_err();
        assert_eq!(err.kind(), FaultKind::UnrecognizedType);
        assert!(err.message.contains("xs:gYear"));
    }

    #[test]
    fn integer_sits_below_decimal() {
        assert!(ItemType::Integer.is_subtype_of(ItemType::Decimal));
        assert!(!ItemType::Double.is_subtype_of(ItemType::Decimal));
        assert_eq!(
            ItemType::Integer.find_common_super_type(ItemType::Decimal),
            ItemType::Decimal
        );
        assert_eq!(
            ItemType::Integer.find_common_super_type(ItemType::Double),
            ItemType::Atomic
        );
    }
}
