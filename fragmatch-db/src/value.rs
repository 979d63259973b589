//! Attribute values and their declared types.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

/// Declared type of an attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Text,
    Real,
    Integer,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Real => "real",
            ValueType::Integer => "integer",
        }
    }

    /// Map a backend column declaration onto a value type using SQLite's
    /// affinity rules (which also cover the MySQL/PostgreSQL type names we emit).
    pub fn from_declared(declared: &str) -> ValueType {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            ValueType::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ValueType::Real
        } else {
            ValueType::Text
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(ValueType::Text),
            "real" | "float" | "double" => Ok(ValueType::Real),
            "integer" | "int" => Ok(ValueType::Integer),
            other => Err(format!("unknown value type '{other}' (expected text, real or integer)")),
        }
    }
}

/// A single attribute value as stored in a field table.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Real(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Guess the narrowest type for a textual value: integer, then real, then text.
    /// The empty string is NULL.
    pub fn infer(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Value::Null
        } else if let Ok(i) = trimmed.parse::<i64>() {
            Value::Integer(i)
        } else if let Ok(f) = trimmed.parse::<f64>() {
            Value::Real(f)
        } else {
            Value::Text(raw.to_string())
        }
    }

    /// Parse a textual value as the given type, falling back to text when it
    /// does not parse. The empty string is NULL.
    pub fn parse_as(raw: &str, ty: ValueType) -> Value {
        if raw.trim().is_empty() {
            return Value::Null;
        }
        Value::Text(raw.to_string()).coerce(ty)
    }

    /// The type this value would naturally be stored as.
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueType::Integer),
            Value::Real(_) => Some(ValueType::Real),
            Value::Text(_) => Some(ValueType::Text),
        }
    }

    /// Convert to the representation a column of type `ty` will hand back,
    /// so the write-through cache agrees with a later read.
    pub fn coerce(self, ty: ValueType) -> Value {
        match (ty, self) {
            (_, Value::Null) => Value::Null,
            (ValueType::Real, Value::Integer(i)) => Value::Real(i as f64),
            (ValueType::Real, Value::Text(s)) => match s.trim().parse::<f64>() {
                Ok(f) => Value::Real(f),
                Err(_) => Value::Text(s),
            },
            (ValueType::Integer, Value::Real(f)) if f.fract() == 0.0 => Value::Integer(f as i64),
            (ValueType::Integer, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => match s.trim().parse::<f64>() {
                    Ok(f) => Value::Real(f),
                    Err(_) => Value::Text(s),
                },
            },
            (ValueType::Text, Value::Integer(i)) => Value::Text(i.to_string()),
            (ValueType::Text, Value::Real(f)) => Value::Text(f.to_string()),
            (_, v) => v,
        }
    }

    /// Render as an SQL literal (used for column DEFAULT clauses).
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) if f.is_finite() => format!("{f:?}"),
            Value::Real(_) => "NULL".to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    /// Parse a DEFAULT expression as reported by table introspection.
    pub fn from_sql_literal(literal: Option<&str>, ty: ValueType) -> Value {
        let Some(raw) = literal.map(str::trim) else {
            return Value::Null;
        };
        if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
            return Value::Null;
        }
        if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            let inner = raw[1..raw.len() - 1].replace("''", "'");
            return Value::Text(inner).coerce(ty);
        }
        Value::Text(raw.to_string()).coerce(ty)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) | ValueRef::Blob(t) => {
                Value::Text(String::from_utf8_lossy(t).into_owned())
            }
        })
    }
}
