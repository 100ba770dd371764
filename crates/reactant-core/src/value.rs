//! Dynamic value types stored in observable bags

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A field value, computation result or action argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    /// Counts, quantities and numeric ids
    Int(i64),
    Float(f64),
    String(String),
    /// Opaque to deep observation: replacing the list is observed, editing
    /// it in place is not.
    List(Vec<Value>),
    /// Wrapped into a nested observable when stored in an entity
    Map(ValueMap),
}

/// Insertion-ordered bag of named values. Key enumeration and snapshots
/// follow the order fields were first written.
pub type ValueMap = IndexMap<String, Value>;

impl Value {
    /// Check if this is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool if this is a Bool
    pub fn as_bool(&self) -> Option<bool> {
        if let Value::Bool(b) = self {
            Some(*b)
        } else {
            None
        }
    }

    /// Get as i64 if this is an Int
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Int(i) = self {
            Some(*i)
        } else {
            None
        }
    }

    /// Floats, or integers widened to `f64`
    pub fn as_float(&self) -> Option<f64> {
        match *self {
            Value::Float(x) => Some(x),
            Value::Int(i) => Some(i as f64),
            _ => None,
        }
    }

    /// Get as string slice if this is a String
    pub fn as_str(&self) -> Option<&str> {
        if let Value::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Get as slice if this is a List
    pub fn as_list(&self) -> Option<&[Value]> {
        if let Value::List(items) = self {
            Some(items.as_slice())
        } else {
            None
        }
    }

    /// Get as map if this is a Map
    pub fn as_map(&self) -> Option<&ValueMap> {
        if let Value::Map(fields) = self {
            Some(fields)
        } else {
            None
        }
    }

    /// Render a scalar as an identity key.
    ///
    /// Strings are used verbatim, numbers and booleans through `Display`.
    /// Null, lists and maps cannot identify an entity.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(x) => Some(x.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::List(_) | Value::Map(_) => None,
        }
    }

    /// Short name of the variant, used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// False for null, `false`, zero and empty strings, lists and maps
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(x) => *x != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(fields) => !fields.is_empty(),
        }
    }
}

fn write_joined<I, F>(f: &mut fmt::Formatter<'_>, items: I, mut each: F) -> fmt::Result
where
    I: IntoIterator,
    F: FnMut(&mut fmt::Formatter<'_>, I::Item) -> fmt::Result,
{
    for (n, item) in items.into_iter().enumerate() {
        if n > 0 {
            f.write_str(", ")?;
        }
        each(f, item)?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                write_joined(f, items, |f, item| write!(f, "{item}"))?;
                f.write_str("]")
            }
            Value::Map(fields) => {
                f.write_str("{")?;
                write_joined(f, fields, |f, (key, value)| write!(f, "{key}: {value}"))?;
                f.write_str("}")
            }
        }
    }
}

macro_rules! value_from {
    ($($source:ty => |$v:ident| $body:expr),+ $(,)?) => {
        $(impl From<$source> for Value {
            fn from($v: $source) -> Self {
                $body
            }
        })+
    };
}

value_from! {
    bool => |v| Value::Bool(v),
    i64 => |v| Value::Int(v),
    i32 => |v| Value::Int(i64::from(v)),
    f64 => |v| Value::Float(v),
    String => |v| Value::String(v),
    &str => |v| Value::String(v.to_owned()),
    ValueMap => |v| Value::Map(v),
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

/// Build a [`ValueMap`] from `key => value` pairs.
///
/// ```
/// use reactant_core::{bag, Value};
///
/// let item = bag! { "id" => "x1", "qty" => 1 };
/// assert_eq!(item.get("qty"), Some(&Value::Int(1)));
/// ```
#[macro_export]
macro_rules! bag {
    () => {
        $crate::ValueMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::ValueMap::new();
        $(map.insert(::std::string::String::from($key), $crate::Value::from($value));)+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_match_variant() {
        let qty = Value::from(3);
        assert_eq!(qty.as_int(), Some(3));
        assert_eq!(qty.as_float(), Some(3.0));
        assert_eq!(qty.as_str(), None);
        assert_eq!(Value::from("bolt").as_str(), Some("bolt"));
        assert_eq!(Value::from(false).as_bool(), Some(false));
        assert!(Value::default().is_null());
    }

    #[test]
    fn test_value_as_key() {
        assert_eq!(Value::from("x1").as_key(), Some("x1".to_string()));
        assert_eq!(Value::Int(7).as_key(), Some("7".to_string()));
        assert_eq!(Value::Null.as_key(), None);
        assert_eq!(Value::List(vec![]).as_key(), None);
    }

    #[test]
    fn test_empty_containers_are_falsy() {
        assert!(!Value::List(Vec::new()).is_truthy());
        assert!(!Value::Map(ValueMap::new()).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from(vec![0]).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
    }

    #[test]
    fn test_bag_macro_and_display() {
        let map = bag! { "name" => "widget", "tags" => vec!["a", "b"] };
        assert_eq!(map.len(), 2);
        assert_eq!(
            Value::Map(map).to_string(),
            "{name: \"widget\", tags: [\"a\", \"b\"]}"
        );
    }

    #[test]
    fn test_value_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::from("x"));
    }

    #[test]
    fn test_serde_round_trip_keeps_order() {
        let map = bag! { "z" => 1, "a" => bag! { "inner" => true } };
        let text = ron::to_string(&Value::Map(map.clone())).unwrap();
        let back: Value = ron::from_str(&text).unwrap();
        assert_eq!(back.as_map().unwrap().keys().collect::<Vec<_>>(), vec!["z", "a"]);
    }
}
