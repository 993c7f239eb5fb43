//! Lenient deserializers for values that commonly arrive as strings.
//!
//! Environment variables and hand-edited YAML don't always agree on types, so these helpers, used through
//! `serde_with`, accept a handful of reasonable encodings for the same value.
use std::fmt;

use serde::{
    de::{Error, SeqAccess, Unexpected, Visitor},
    Deserializer,
};
use serde_with::DeserializeAs;

/// Deserializes a `bool` from a native boolean, a `"true"`/`"false"` string (any case), or `0`/`1`.
pub struct PermissiveBool;

impl<'de> DeserializeAs<'de, bool> for PermissiveBool {
    fn deserialize_as<D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BoolVisitor;

        impl Visitor<'_> for BoolVisitor {
            type Value = bool;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a boolean, a \"true\"/\"false\" string, or 0/1")
            }

            fn visit_bool<E: Error>(self, value: bool) -> Result<bool, E> {
                Ok(value)
            }

            fn visit_str<E: Error>(self, value: &str) -> Result<bool, E> {
                if value.eq_ignore_ascii_case("true") {
                    Ok(true)
                } else if value.eq_ignore_ascii_case("false") {
                    Ok(false)
                } else {
                    Err(Error::invalid_value(Unexpected::Str(value), &self))
                }
            }

            fn visit_i64<E: Error>(self, value: i64) -> Result<bool, E> {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Signed(value), &self)),
                }
            }

            fn visit_u64<E: Error>(self, value: u64) -> Result<bool, E> {
                match value {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => Err(Error::invalid_value(Unexpected::Unsigned(value), &self)),
                }
            }
        }

        deserializer.deserialize_any(BoolVisitor)
    }
}

/// Deserializes a list of strings from either a comma-separated string or a sequence.
///
/// Entries are trimmed and empty entries are removed. Numeric entries in a sequence are converted to their string
/// form, so `[0.95, 0.99]` and `"0.95, 0.99"` produce the same result.
pub struct CommaSeparated;

impl<'de> DeserializeAs<'de, Vec<String>> for CommaSeparated {
    fn deserialize_as<D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ListVisitor;

        impl<'de> Visitor<'de> for ListVisitor {
            type Value = Vec<String>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a comma-separated string or a list of values")
            }

            fn visit_str<E: Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect())
            }

            fn visit_f64<E: Error>(self, value: f64) -> Result<Self::Value, E> {
                Ok(vec![value.to_string()])
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(item) = seq.next_element::<ListItem>()? {
                    let trimmed = item.0.trim();
                    if !trimmed.is_empty() {
                        values.push(trimmed.to_string());
                    }
                }
                Ok(values)
            }
        }

        deserializer.deserialize_any(ListVisitor)
    }
}

struct ListItem(String);

impl<'de> serde::Deserialize<'de> for ListItem {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ItemVisitor;

        impl Visitor<'_> for ItemVisitor {
            type Value = ListItem;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or a number")
            }

            fn visit_str<E: Error>(self, value: &str) -> Result<ListItem, E> {
                Ok(ListItem(value.to_string()))
            }

            fn visit_i64<E: Error>(self, value: i64) -> Result<ListItem, E> {
                Ok(ListItem(value.to_string()))
            }

            fn visit_u64<E: Error>(self, value: u64) -> Result<ListItem, E> {
                Ok(ListItem(value.to_string()))
            }

            fn visit_f64<E: Error>(self, value: f64) -> Result<ListItem, E> {
                Ok(ListItem(value.to_string()))
            }
        }

        deserializer.deserialize_any(ItemVisitor)
    }
}
