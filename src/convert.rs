//! Scalar coercion: raw JSON scalars into logical primitives of a requested kind.
//!
//! Conversions are looked up in a table keyed by target kind, so callers can replace or
//! extend individual entries without touching the resolver.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::error::{JsonIoError, Result};
use crate::graph::Value;
use crate::node::Scalar;
use crate::types::ScalarKind;

/// Converts one scalar into a value of a fixed kind, or explains why it can't.
pub type ConvertFn = fn(&Scalar) -> core::result::Result<Value, String>;

/// Dispatch table of scalar conversions.
#[derive(Clone)]
pub struct Converter {
    table: FxHashMap<ScalarKind, ConvertFn>,
}

impl core::fmt::Debug for Converter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kinds: Vec<_> = self.table.keys().map(|k| k.name()).collect();
        kinds.sort_unstable();
        f.debug_struct("Converter").field("kinds", &kinds).finish()
    }
}

impl Default for Converter {
    fn default() -> Self {
        let mut table: FxHashMap<ScalarKind, ConvertFn> = FxHashMap::default();
        table.insert(ScalarKind::Bool, to_bool);
        table.insert(ScalarKind::I8, to_i8);
        table.insert(ScalarKind::I16, to_i16);
        table.insert(ScalarKind::I32, to_i32);
        table.insert(ScalarKind::I64, to_i64);
        table.insert(ScalarKind::U8, to_u8);
        table.insert(ScalarKind::U16, to_u16);
        table.insert(ScalarKind::U32, to_u32);
        table.insert(ScalarKind::U64, to_u64);
        table.insert(ScalarKind::F32, to_f32);
        table.insert(ScalarKind::F64, to_f64);
        table.insert(ScalarKind::BigInt, to_bigint);
        table.insert(ScalarKind::Char, to_char);
        table.insert(ScalarKind::String, to_string);
        table.insert(ScalarKind::Date, to_date);
        table.insert(ScalarKind::DateTime, to_datetime);
        table.insert(ScalarKind::Uuid, to_uuid);
        Self { table }
    }
}

impl Converter {
    /// Coerce `scalar` into `kind`. `null` becomes the kind's zero value.
    pub fn convert(&self, scalar: &Scalar, kind: ScalarKind) -> Result<Value> {
        if let Scalar::Null = scalar {
            return Ok(kind.zero());
        }
        let Some(convert) = self.table.get(&kind) else {
            return Err(JsonIoError::conversion(
                describe(scalar),
                kind.name(),
                "no conversion registered",
            ));
        };
        convert(scalar).map_err(|reason| JsonIoError::conversion(describe(scalar), kind.name(), reason))
    }

    /// Replace the conversion used for `kind`.
    pub fn set(&mut self, kind: ScalarKind, convert: ConvertFn) {
        self.table.insert(kind, convert);
    }

    /// The value a scalar has when nothing is known about its destination.
    pub fn natural(scalar: &Scalar) -> Value {
        match scalar {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::I64(*i),
            Scalar::BigInt(i) => Value::BigInt(i.clone()),
            Scalar::Float(f) => Value::F64(*f),
            Scalar::String(s) => Value::String(s.clone()),
        }
    }
}

fn describe(scalar: &Scalar) -> String {
    format!("{} {scalar}", scalar.kind_name())
}

fn to_bool(scalar: &Scalar) -> core::result::Result<Value, String> {
    let b = match scalar {
        Scalar::Bool(b) => *b,
        Scalar::Int(0) => false,
        Scalar::Int(1) => true,
        Scalar::Float(f) if *f == 0.0 => false,
        Scalar::Float(f) if *f == 1.0 => true,
        Scalar::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => true,
            "false" | "no" | "off" | "0" => false,
            _ => return Err("not a boolean".to_string()),
        },
        _ => return Err("only 0 and 1 convert to booleans".to_string()),
    };
    Ok(Value::Bool(b))
}

/// Integral value of a float, if it has no fractional part.
fn integral(f: f64) -> core::result::Result<i128, String> {
    if !f.is_finite() || f.fract() != 0.0 {
        return Err("not an integral number".to_string());
    }
    if f < i128::MIN as f64 || f >= i128::MAX as f64 {
        return Err("out of range".to_string());
    }
    Ok(f as i128)
}

macro_rules! int_conversion {
    ($name:ident, $ty:ty, $variant:ident) => {
        fn $name(scalar: &Scalar) -> core::result::Result<Value, String> {
            let out_of_range = || format!("out of range for {}", stringify!($ty));
            let v: $ty = match scalar {
                Scalar::Int(i) => <$ty>::try_from(*i).map_err(|_| out_of_range())?,
                Scalar::BigInt(i) => <$ty>::try_from(i).map_err(|_| out_of_range())?,
                Scalar::Float(f) => <$ty>::try_from(integral(*f)?).map_err(|_| out_of_range())?,
                Scalar::Bool(b) => <$ty>::from(*b),
                Scalar::String(s) => {
                    let s = s.trim();
                    match s.parse::<$ty>() {
                        Ok(v) => v,
                        Err(_) => {
                            let f: f64 = s.parse().map_err(|_| "not a number".to_string())?;
                            <$ty>::try_from(integral(f)?).map_err(|_| out_of_range())?
                        }
                    }
                }
                Scalar::Null => 0,
            };
            Ok(Value::$variant(v))
        }
    };
}

int_conversion!(to_i8, i8, I8);
int_conversion!(to_i16, i16, I16);
int_conversion!(to_i32, i32, I32);
int_conversion!(to_i64, i64, I64);
int_conversion!(to_u8, u8, U8);
int_conversion!(to_u16, u16, U16);
int_conversion!(to_u32, u32, U32);
int_conversion!(to_u64, u64, U64);

fn float_of(scalar: &Scalar) -> core::result::Result<f64, String> {
    match scalar {
        Scalar::Int(i) => Ok(*i as f64),
        Scalar::BigInt(i) => i.to_string().parse().map_err(|_| "not a number".to_string()),
        Scalar::Float(f) => Ok(*f),
        Scalar::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Scalar::String(s) => s.trim().parse().map_err(|_| "not a number".to_string()),
        Scalar::Null => Ok(0.0),
    }
}

fn to_f32(scalar: &Scalar) -> core::result::Result<Value, String> {
    let f = float_of(scalar)?;
    if f.is_finite() && (f as f32).is_infinite() {
        return Err("out of range for f32".to_string());
    }
    Ok(Value::F32(f as f32))
}

fn to_f64(scalar: &Scalar) -> core::result::Result<Value, String> {
    float_of(scalar).map(Value::F64)
}

fn to_bigint(scalar: &Scalar) -> core::result::Result<Value, String> {
    let i = match scalar {
        Scalar::Int(i) => BigInt::from(*i),
        Scalar::BigInt(i) => i.clone(),
        Scalar::Float(f) => BigInt::from(integral(*f)?),
        Scalar::Bool(b) => BigInt::from(u8::from(*b)),
        Scalar::String(s) => s
            .trim()
            .parse()
            .map_err(|_| "not an integer".to_string())?,
        Scalar::Null => return Ok(Value::Null),
    };
    Ok(Value::BigInt(i))
}

fn to_char(scalar: &Scalar) -> core::result::Result<Value, String> {
    match scalar {
        Scalar::String(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Char(c)),
                _ => Err("expected exactly one character".to_string()),
            }
        }
        Scalar::Int(i) => u32::try_from(*i)
            .ok()
            .and_then(char::from_u32)
            .map(Value::Char)
            .ok_or_else(|| "not a valid code point".to_string()),
        _ => Err("not a character".to_string()),
    }
}

fn to_string(scalar: &Scalar) -> core::result::Result<Value, String> {
    Ok(match scalar {
        Scalar::String(s) => Value::String(s.clone()),
        Scalar::Null => Value::Null,
        other => Value::String(other.to_string()),
    })
}

fn datetime_from_millis(millis: i64) -> core::result::Result<DateTime<FixedOffset>, String> {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.fixed_offset())
        .ok_or_else(|| "epoch milliseconds out of range".to_string())
}

fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn to_date(scalar: &Scalar) -> core::result::Result<Value, String> {
    match scalar {
        Scalar::String(s) => {
            let s = s.trim();
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .or_else(|| parse_datetime(s).map(|dt| dt.date_naive()))
                .map(Value::Date)
                .ok_or_else(|| "not a date (expected YYYY-MM-DD)".to_string())
        }
        Scalar::Int(millis) => datetime_from_millis(*millis).map(|dt| Value::Date(dt.date_naive())),
        _ => Err("not a date".to_string()),
    }
}

fn to_datetime(scalar: &Scalar) -> core::result::Result<Value, String> {
    match scalar {
        Scalar::String(s) => parse_datetime(s.trim())
            .map(Value::DateTime)
            .ok_or_else(|| "not an RFC 3339 date-time".to_string()),
        Scalar::Int(millis) => datetime_from_millis(*millis).map(Value::DateTime),
        _ => Err("not a date-time".to_string()),
    }
}

fn to_uuid(scalar: &Scalar) -> core::result::Result<Value, String> {
    match scalar {
        Scalar::String(s) => Uuid::parse_str(s.trim())
            .map(Value::Uuid)
            .map_err(|e| e.to_string()),
        _ => Err("not a UUID".to_string()),
    }
}
