//! Constructor selection.
//!
//! Candidates are ranked by visibility, then by how many arguments they consume with and
//! without null padding, then by their parameter signature. The first candidate that accepts
//! its arguments wins and is remembered per (type, argument shape).

use core::cmp::Reverse;

use chrono::{DateTime, NaiveDate};
use log::{debug, trace};
use owo_colors::OwoColorize;

use crate::convert::Converter;
use crate::error::{JsonIoError, Result};
use crate::graph::Value;
use crate::lru::SyncLruCache;
use crate::node::Scalar;
use crate::types::{Constructor, ScalarKind, TypeDef, TypeRef};

/// A remembered winner: which constructor, and whether unmatched parameters got `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    /// Index into [`TypeDef::constructors`].
    pub index: usize,
    /// Pad unmatched parameters with `null` rather than non-null defaults.
    pub use_null: bool,
}

/// Shared memo of constructor choices.
pub type ConstructorCache = SyncLruCache<String, Choice>;

/// Compatibility of `scalar` with a parameter of type `ty`: the distance (lower is better)
/// and the coerced value. `None` when the argument can't be used for that parameter.
fn coerce(scalar: &Scalar, ty: &TypeRef, converter: &Converter) -> Option<(u8, Value)> {
    let nullable = matches!(ty, TypeRef::Option(_));
    let Some(kind) = ty.scalar_kind() else {
        return match (ty.strip_option(), scalar) {
            (TypeRef::Any, _) => Some((3, Converter::natural(scalar))),
            (_, Scalar::Null) => Some((1, Value::Null)),
            (TypeRef::Enum(def), Scalar::String(s)) => def.value(s).ok().map(|v| (0, v)),
            _ => None,
        };
    };
    if let Scalar::Null = scalar {
        let value = if nullable { Value::Null } else { kind.zero() };
        return Some((1, value));
    }
    let exact = matches!(
        (scalar, kind),
        (Scalar::Bool(_), ScalarKind::Bool)
            | (Scalar::Int(_), ScalarKind::I64)
            | (Scalar::Float(_), ScalarKind::F64)
            | (Scalar::BigInt(_), ScalarKind::BigInt)
            | (Scalar::String(_), ScalarKind::String)
    );
    let widening = kind.is_numeric() && matches!(scalar, Scalar::Int(_) | Scalar::Float(_) | Scalar::BigInt(_));
    let distance = if exact {
        0
    } else if widening {
        1
    } else {
        2
    };
    converter.convert(scalar, kind).ok().map(|v| (distance, v))
}

/// Non-null stand-in for a parameter no argument matched.
fn non_null_default(ty: &TypeRef) -> Value {
    match ty {
        TypeRef::Scalar(ScalarKind::String) => Value::String(String::new()),
        TypeRef::Scalar(ScalarKind::BigInt) => Value::BigInt(Default::default()),
        TypeRef::Scalar(ScalarKind::Date) => Value::Date(NaiveDate::default()),
        TypeRef::Scalar(ScalarKind::DateTime) => DateTime::from_timestamp(0, 0)
            .map(|epoch| Value::DateTime(epoch.fixed_offset()))
            .unwrap_or(Value::Null),
        TypeRef::Enum(def) => def
            .variants()
            .first()
            .and_then(|first| def.value(first).ok())
            .unwrap_or(Value::Null),
        other => other.zero(),
    }
}

/// Assign arguments to parameters: each parameter takes the closest remaining argument;
/// parameters left over get `null` (or their zero value when not nullable) or a non-null
/// default.
pub fn match_arguments(
    ctor: &Constructor,
    args: &[Scalar],
    use_null: bool,
    converter: &Converter,
) -> Vec<Value> {
    let mut used = vec![false; args.len()];
    ctor.params
        .iter()
        .map(|param| {
            let best = args
                .iter()
                .enumerate()
                .filter(|(i, _)| !used[*i])
                .filter_map(|(i, a)| coerce(a, &param.ty, converter).map(|(d, v)| (d, i, v)))
                .min_by_key(|(d, i, _)| (*d, *i));
            match best {
                Some((_, i, value)) => {
                    used[i] = true;
                    value
                }
                None if use_null => param.ty.zero(),
                None => non_null_default(&param.ty),
            }
        })
        .collect()
}

/// Non-null arguments weigh double the argument count.
fn score(args: &[Value]) -> usize {
    let non_null = args.iter().filter(|v| !v.is_null()).count();
    non_null * 100 + args.len() * 50
}

fn cache_key(type_name: &str, args: &[Scalar]) -> String {
    let mut key = String::from(type_name);
    for a in args {
        key.push(':');
        key.push_str(a.kind_name());
    }
    key
}

/// Build the initial fields of `def` from `args` (the record's scalar entries in document
/// order).
pub fn instantiate(
    def: &TypeDef,
    args: &[Scalar],
    converter: &Converter,
    cache: &ConstructorCache,
) -> Result<Vec<(String, Value)>> {
    let constructors = def.constructors();
    let key = cache_key(def.name(), args);

    if let Some(choice) = cache.get(&key) {
        if let Some(ctor) = constructors.get(choice.index) {
            let values = match_arguments(ctor, args, choice.use_null, converter);
            if let Ok(fields) = ctor.invoke(&values) {
                debug!("Constructor cache hit for {}", key.green());
                return Ok(fields);
            }
        }
    }

    struct Candidate {
        index: usize,
        with_nulls: Vec<Value>,
        with_defaults: Vec<Value>,
        signature: String,
    }

    let mut candidates: Vec<(Candidate, &Constructor)> = constructors
        .iter()
        .enumerate()
        .map(|(index, ctor)| {
            (
                Candidate {
                    index,
                    with_nulls: match_arguments(ctor, args, true, converter),
                    with_defaults: match_arguments(ctor, args, false, converter),
                    signature: ctor.signature(),
                },
                ctor,
            )
        })
        .collect();
    candidates.sort_by_key(|(c, ctor)| {
        (
            Reverse(ctor.visibility),
            Reverse(score(&c.with_nulls)),
            Reverse(score(&c.with_defaults)),
            c.signature.clone(),
        )
    });

    let mut last_error = String::from("no constructors");
    for (candidate, ctor) in &candidates {
        trace!(
            "Trying {}({})",
            def.name().blue(),
            candidate.signature.yellow()
        );
        match ctor.invoke(&candidate.with_nulls) {
            Ok(fields) => {
                cache.put(
                    key,
                    Choice {
                        index: candidate.index,
                        use_null: true,
                    },
                );
                return Ok(fields);
            }
            Err(e) => last_error = e,
        }
        if ctor.params.is_empty() {
            continue;
        }
        match ctor.invoke(&candidate.with_defaults) {
            Ok(fields) => {
                cache.put(
                    key,
                    Choice {
                        index: candidate.index,
                        use_null: false,
                    },
                );
                return Ok(fields);
            }
            Err(e) => last_error = e,
        }
    }

    Err(JsonIoError::Instantiation {
        type_name: def.name().to_string(),
        reason: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::types::{EnumDef, Param, Visibility};

    fn i32_ty() -> TypeRef {
        TypeRef::Scalar(ScalarKind::I32)
    }

    fn string_ty() -> TypeRef {
        TypeRef::Scalar(ScalarKind::String)
    }

    #[test]
    fn arguments_go_to_the_closest_parameter() {
        let ctor = Constructor::public(
            vec![Param::new("name", string_ty()), Param::new("age", i32_ty())],
            |_| Ok(Vec::new()),
        );
        let args = [Scalar::Int(42), Scalar::String("Ann".into())];
        let values = match_arguments(&ctor, &args, true, &Converter::default());
        assert_eq!(values, vec![Value::from("Ann"), Value::I32(42)]);
    }

    #[test]
    fn unmatched_parameters_are_padded() {
        let ctor = Constructor::public(
            vec![Param::new("name", string_ty()), Param::new("age", i32_ty())],
            |_| Ok(Vec::new()),
        );
        let converter = Converter::default();
        assert_eq!(
            match_arguments(&ctor, &[], true, &converter),
            vec![Value::Null, Value::I32(0)]
        );
        assert_eq!(
            match_arguments(&ctor, &[], false, &converter),
            vec![Value::String(String::new()), Value::I32(0)]
        );
    }

    #[test]
    fn variant_names_match_enum_parameters() {
        let color = TypeRef::Enum(Arc::new(EnumDef::new("Color", ["RED", "GREEN"])));
        let ctor = Constructor::public(
            vec![Param::new("age", i32_ty()), Param::new("color", color)],
            |_| Ok(Vec::new()),
        );
        let converter = Converter::default();
        let values = match_arguments(&ctor, &[Scalar::String("GREEN".into()), Scalar::Int(3)], true, &converter);
        assert_eq!(values[0], Value::I32(3));
        assert_eq!(
            values[1],
            Value::Enum {
                ty: "Color".into(),
                variant: "GREEN".into()
            }
        );
        let padded = match_arguments(&ctor, &[Scalar::String("BLUE".into())], false, &converter);
        assert_eq!(
            padded[1],
            Value::Enum {
                ty: "Color".into(),
                variant: "RED".into()
            }
        );
    }

    fn two_ctor_type() -> TypeDef {
        TypeDef::new("Temp")
            .without_default_constructor()
            .constructor(Constructor::new(
                Visibility::Private,
                vec![Param::new("c", i32_ty())],
                |args| Ok(vec![("via".to_string(), Value::from("private")), ("c".to_string(), args[0].clone())]),
            ))
            .constructor(Constructor::public(vec![Param::new("c", i32_ty())], |args| {
                if args[0] == Value::I32(0) {
                    return Err("zero degrees is not allowed".to_string());
                }
                Ok(vec![("via".to_string(), Value::from("public")), ("c".to_string(), args[0].clone())])
            }))
            .finish()
    }

    #[test]
    fn public_constructors_are_preferred() {
        let cache = ConstructorCache::new(8);
        let fields = instantiate(&two_ctor_type(), &[Scalar::Int(21)], &Converter::default(), &cache).unwrap();
        assert_eq!(fields[0].1, Value::from("public"));
        assert_eq!(cache.get(&"Temp:integer".to_string()), Some(Choice { index: 1, use_null: true }));
    }

    #[test]
    fn falls_back_to_the_next_candidate() {
        let cache = ConstructorCache::new(8);
        let fields = instantiate(&two_ctor_type(), &[Scalar::Int(0)], &Converter::default(), &cache).unwrap();
        assert_eq!(fields[0].1, Value::from("private"));
    }

    #[test]
    fn reports_the_last_failure() {
        let def = TypeDef::new("Never")
            .without_default_constructor()
            .constructor(Constructor::public(Vec::new(), |_| Err("nope".to_string())))
            .finish();
        let err = instantiate(&def, &[], &Converter::default(), &ConstructorCache::new(8)).unwrap_err();
        assert_eq!(err.to_string(), "unable to instantiate 'Never': nope");
    }
}
