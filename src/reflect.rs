//! Bridge to `facet` shapes: type definitions from `Shape`s, and concrete Rust values from
//! resolved graphs.

use std::sync::Arc;

use facet_core::{Characteristic, Def, EnumType, Facet, NumericType, PrimitiveType, Shape, Type, UserType};
use facet_reflect::{Partial, ReflectError};
use log::trace;
use owo_colors::OwoColorize;
use rustc_hash::FxHashSet;

use crate::convert::Converter;
use crate::error::{JsonIoError, Result};
use crate::graph::{Graph, Instance, ObjId, Value};
use crate::node::Scalar;
use crate::registry::TypeRegistry;
use crate::types::{EnumDef, ScalarKind, TypeDef, TypeRef};

/// Limit on how many objects [`extract`] may have open at once.
const MAX_EXTRACT_DEPTH: usize = 1000;

fn reflect_err(e: ReflectError) -> JsonIoError {
    JsonIoError::Reflect(e.to_string())
}

fn scalar_kind_of(shape: &'static Shape) -> Option<ScalarKind> {
    if shape.is_type::<String>() {
        return Some(ScalarKind::String);
    }
    if shape.is_type::<bool>() {
        return Some(ScalarKind::Bool);
    }
    if shape.is_type::<char>() {
        return Some(ScalarKind::Char);
    }
    let Type::Primitive(PrimitiveType::Numeric(numeric)) = shape.ty else {
        return None;
    };
    let size = shape.layout.sized_layout().ok()?.size();
    let kind = match (numeric, size) {
        (NumericType::Integer { signed: true }, 1) => ScalarKind::I8,
        (NumericType::Integer { signed: true }, 2) => ScalarKind::I16,
        (NumericType::Integer { signed: true }, 4) => ScalarKind::I32,
        (NumericType::Integer { signed: true }, 8) => ScalarKind::I64,
        (NumericType::Integer { signed: false }, 1) => ScalarKind::U8,
        (NumericType::Integer { signed: false }, 2) => ScalarKind::U16,
        (NumericType::Integer { signed: false }, 4) => ScalarKind::U32,
        (NumericType::Integer { signed: false }, 8) => ScalarKind::U64,
        (NumericType::Float, 4) => ScalarKind::F32,
        (NumericType::Float, 8) => ScalarKind::F64,
        _ => return None,
    };
    Some(kind)
}

/// Enums whose variants all carry no data read and write as variant names.
fn enum_def_of(shape: &'static Shape, ed: &EnumType) -> Option<EnumDef> {
    if ed.variants.iter().any(|v| !v.data.fields.is_empty()) {
        return None;
    }
    Some(EnumDef::new(shape.to_string(), ed.variants.iter().map(|v| v.name)))
}

/// The [`TypeRef`] for `shape`. Struct and enum shapes are queued on `pending` to be defined.
fn type_ref_of(shape: &'static Shape, pending: &mut Vec<&'static Shape>) -> TypeRef {
    match shape.def {
        Def::Option(od) => TypeRef::option(type_ref_of(od.t(), pending)),
        Def::List(ld) if ld.t().is_type::<u8>() => TypeRef::Bytes,
        Def::List(ld) => TypeRef::list(type_ref_of(ld.t(), pending)),
        Def::Map(md) => TypeRef::map(type_ref_of(md.k(), pending), type_ref_of(md.v(), pending)),
        Def::Pointer(pd) => match pd.pointee() {
            Some(pointee) => type_ref_of(pointee, pending),
            None => TypeRef::Any,
        },
        _ => {
            if let Some(kind) = scalar_kind_of(shape) {
                return TypeRef::Scalar(kind);
            }
            match shape.ty {
                Type::User(UserType::Struct(_)) => {
                    pending.push(shape);
                    TypeRef::named(shape.to_string())
                }
                Type::User(UserType::Enum(ed)) => match enum_def_of(shape, &ed) {
                    Some(def) => {
                        pending.push(shape);
                        TypeRef::Enum(Arc::new(def))
                    }
                    None => TypeRef::Any,
                },
                _ => TypeRef::Any,
            }
        }
    }
}

impl TypeRegistry {
    /// Register `T` and every struct and unit-only enum reachable from its fields, returning
    /// the type to read `T` as.
    pub fn register_facet<T: Facet<'static>>(&mut self) -> TypeRef {
        let mut pending = Vec::new();
        let root = type_ref_of(T::SHAPE, &mut pending);
        let mut seen = FxHashSet::default();
        while let Some(shape) = pending.pop() {
            let name = shape.to_string();
            if !seen.insert(name.clone()) {
                continue;
            }
            let sd = match shape.ty {
                Type::User(UserType::Struct(sd)) => sd,
                Type::User(UserType::Enum(ed)) => {
                    if let Some(def) = enum_def_of(shape, &ed) {
                        self.register_enum(def);
                    }
                    continue;
                }
                _ => continue,
            };
            let mut def = TypeDef::new(name);
            for field in sd.fields {
                def = def.field(field.name, type_ref_of(field.shape(), &mut pending));
            }
            trace!("Derived {} from {}", def.name().yellow(), shape.blue());
            self.register(def);
        }
        root
    }
}

/// Build a `T` from `value`. The value must be acyclic; fields missing from the graph take
/// their `Default` when the field type has one.
pub fn extract<T: Facet<'static>>(graph: &Graph, value: &Value) -> Result<T> {
    let mut wip = Partial::alloc_shape(T::SHAPE).map_err(reflect_err)?;
    let mut extractor = Extractor {
        graph,
        converter: Converter::default(),
        path: Vec::new(),
    };
    let mut stack = vec![Step::Fill(value.clone())];
    while let Some(step) = stack.pop() {
        extractor.step(&mut wip, step, &mut stack)?;
    }
    let heap = wip.build().map_err(reflect_err)?;
    heap.materialize::<T>().map_err(reflect_err)
}

/// Pending extraction work. Each step acts on the innermost open frame of the `Partial`.
enum Step {
    /// Fill the current frame with a value.
    Fill(Value),
    /// Close the current frame.
    End,
    /// Open field `index` of the struct built from `id` and fill it.
    Field {
        id: ObjId,
        index: usize,
        name: &'static str,
        owner: &'static Shape,
    },
    Item(Value),
    Key(Value, Value),
    MapValue(Value),
    /// All fields of `id` are queued; it may be entered again.
    Leave(ObjId),
}

struct Extractor<'g> {
    graph: &'g Graph,
    converter: Converter,
    /// Objects on the way down from the root.
    path: Vec<ObjId>,
}

impl Extractor<'_> {
    fn step(&mut self, wip: &mut Partial<'_>, step: Step, stack: &mut Vec<Step>) -> Result<()> {
        match step {
            Step::Fill(value) => self.fill(wip, value, stack)?,
            Step::End => {
                wip.end().map_err(reflect_err)?;
            }
            Step::Field {
                id,
                index,
                name,
                owner,
            } => {
                wip.begin_nth_field(index).map_err(reflect_err)?;
                match self.graph.field(id, name) {
                    Some(v) => {
                        stack.push(Step::End);
                        stack.push(Step::Fill(v.clone()));
                    }
                    None if wip.shape().is(Characteristic::Default) => {
                        wip.set_default().map_err(reflect_err)?;
                        wip.end().map_err(reflect_err)?;
                    }
                    None => {
                        return Err(JsonIoError::Reflect(format!(
                            "field '{name}' of {owner} is not in the graph"
                        )));
                    }
                }
            }
            Step::Item(value) => {
                wip.begin_list_item().map_err(reflect_err)?;
                stack.push(Step::End);
                stack.push(Step::Fill(value));
            }
            Step::Key(key, value) => {
                wip.begin_key().map_err(reflect_err)?;
                stack.push(Step::MapValue(value));
                stack.push(Step::End);
                stack.push(Step::Fill(key));
            }
            Step::MapValue(value) => {
                wip.begin_value().map_err(reflect_err)?;
                stack.push(Step::End);
                stack.push(Step::Fill(value));
            }
            Step::Leave(id) => {
                trace!("Leaving {}", id.bright_black());
                self.path.pop();
            }
        }
        Ok(())
    }

    /// Fill the current frame, queueing nested values instead of descending into them.
    fn fill(&mut self, wip: &mut Partial<'_>, value: Value, stack: &mut Vec<Step>) -> Result<()> {
        let shape = wip.shape();
        trace!("Filling {} with {}", shape.blue(), value.yellow());

        match shape.def {
            Def::Option(_) => {
                if value.is_null() {
                    wip.set_default().map_err(reflect_err)?;
                } else {
                    wip.begin_some().map_err(reflect_err)?;
                    stack.push(Step::End);
                    stack.push(Step::Fill(value));
                }
            }
            Def::Pointer(_) => {
                wip.begin_smart_ptr().map_err(reflect_err)?;
                stack.push(Step::End);
                stack.push(Step::Fill(value));
            }
            Def::List(_) => {
                let items = self.elements(&value, shape)?;
                wip.begin_list().map_err(reflect_err)?;
                stack.extend(items.into_iter().rev().map(Step::Item));
            }
            Def::Map(_) => {
                let entries = self.entries(&value, shape)?;
                wip.begin_map().map_err(reflect_err)?;
                stack.extend(entries.into_iter().rev().map(|(k, v)| Step::Key(k, v)));
            }
            _ => match shape.ty {
                Type::User(UserType::Struct(sd)) if scalar_kind_of(shape).is_none() => {
                    let id = self.object(&value, shape)?;
                    if self.path.len() >= MAX_EXTRACT_DEPTH {
                        return Err(JsonIoError::LimitExceeded {
                            what: "extraction depth",
                            limit: MAX_EXTRACT_DEPTH,
                        });
                    }
                    self.path.push(id);
                    stack.push(Step::Leave(id));
                    for (index, field) in sd.fields.iter().enumerate().rev() {
                        stack.push(Step::Field {
                            id,
                            index,
                            name: field.name,
                            owner: shape,
                        });
                    }
                }
                Type::User(UserType::Enum(_)) => self.set_variant(wip, shape, &value)?,
                _ => self.set_scalar(wip, shape, &value)?,
            },
        }
        Ok(())
    }

    /// The object `value` designates, refusing to enter one already being built.
    fn object(&self, value: &Value, shape: &'static Shape) -> Result<ObjId> {
        let Some(id) = value.as_object() else {
            return Err(JsonIoError::Reflect(format!("expected an object for {shape}, found {value}")));
        };
        if self.path.contains(&id) {
            return Err(JsonIoError::Reflect(format!(
                "{id} is part of a cycle and can't be extracted into {shape}"
            )));
        }
        Ok(id)
    }

    fn elements(&self, value: &Value, shape: &'static Shape) -> Result<Vec<Value>> {
        let id = self.object(value, shape)?;
        Ok(match self.graph.get(id) {
            Instance::Array { items, .. } | Instance::List { items, .. } => items.clone(),
            Instance::Set { items, .. } => items.iter().cloned().collect(),
            Instance::Bytes(bytes) => bytes.iter().map(|b| Value::U8(*b)).collect(),
            _ => return Err(JsonIoError::Reflect(format!("{id} is not a sequence, needed for {shape}"))),
        })
    }

    fn entries(&self, value: &Value, shape: &'static Shape) -> Result<Vec<(Value, Value)>> {
        let id = self.object(value, shape)?;
        Ok(match self.graph.get(id) {
            Instance::Map { entries, .. } => entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            Instance::Object { fields, .. } => fields
                .iter()
                .map(|(k, v)| (Value::String(k.clone()), v.clone()))
                .collect(),
            _ => return Err(JsonIoError::Reflect(format!("{id} is not a map, needed for {shape}"))),
        })
    }

    fn set_variant(&self, wip: &mut Partial<'_>, shape: &'static Shape, value: &Value) -> Result<()> {
        let name = match value {
            Value::Enum { variant, .. } => variant.as_str(),
            Value::String(s) => s.trim(),
            other => {
                return Err(JsonIoError::Reflect(format!("expected a variant of {shape}, found {other}")));
            }
        };
        let Some((index, _)) = wip.find_variant(name) else {
            return Err(JsonIoError::conversion(format!("string \"{name}\""), shape.to_string(), "no such variant"));
        };
        wip.select_nth_variant(index).map_err(reflect_err)?;
        Ok(())
    }

    fn set_scalar(&self, wip: &mut Partial<'_>, shape: &'static Shape, value: &Value) -> Result<()> {
        let Some(kind) = scalar_kind_of(shape) else {
            return Err(JsonIoError::Reflect(format!("{shape} is not supported")));
        };
        let scalar = match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::I8(v) => Scalar::Int(i64::from(*v)),
            Value::I16(v) => Scalar::Int(i64::from(*v)),
            Value::I32(v) => Scalar::Int(i64::from(*v)),
            Value::I64(v) => Scalar::Int(*v),
            Value::U8(v) => Scalar::Int(i64::from(*v)),
            Value::U16(v) => Scalar::Int(i64::from(*v)),
            Value::U32(v) => Scalar::Int(i64::from(*v)),
            Value::U64(v) => match i64::try_from(*v) {
                Ok(i) => Scalar::Int(i),
                Err(_) => Scalar::BigInt((*v).into()),
            },
            Value::F32(v) => Scalar::Float(f64::from(*v)),
            Value::F64(v) => Scalar::Float(*v),
            Value::BigInt(v) => Scalar::BigInt(v.clone()),
            Value::Char(c) => Scalar::String(c.to_string()),
            Value::String(s) => Scalar::String(s.clone()),
            other @ (Value::Date(_) | Value::DateTime(_) | Value::Uuid(_)) => Scalar::String(other.to_string()),
            Value::Enum { variant, .. } => Scalar::String(variant.clone()),
            Value::Object(id) => {
                return Err(JsonIoError::Reflect(format!("expected a scalar for {shape}, found {id}")));
            }
        };

        let out_of_range = |v: &dyn core::fmt::Display| JsonIoError::conversion(v.to_string(), shape.to_string(), "out of range");
        match self.converter.convert(&scalar, kind)? {
            Value::Bool(v) => wip.set(v),
            Value::I8(v) => wip.set(v),
            Value::I16(v) => wip.set(v),
            Value::I32(v) => wip.set(v),
            Value::I64(v) if shape.is_type::<isize>() => wip.set(isize::try_from(v).map_err(|_| out_of_range(&v))?),
            Value::I64(v) => wip.set(v),
            Value::U8(v) => wip.set(v),
            Value::U16(v) => wip.set(v),
            Value::U32(v) => wip.set(v),
            Value::U64(v) if shape.is_type::<usize>() => wip.set(usize::try_from(v).map_err(|_| out_of_range(&v))?),
            Value::U64(v) => wip.set(v),
            Value::F32(v) => wip.set(v),
            Value::F64(v) => wip.set(v),
            Value::Char(v) => wip.set(v),
            Value::String(v) => wip.set(v),
            other => {
                return Err(JsonIoError::Reflect(format!("can't store {other} in {shape}")));
            }
        }
        .map_err(reflect_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use facet::Facet;

    use super::*;
    use crate::types::ScalarKind;

    #[derive(Facet, Debug, PartialEq)]
    struct Address {
        city: String,
    }

    #[derive(Facet, Debug, PartialEq)]
    struct Person {
        name: String,
        age: u32,
        tags: Vec<String>,
        address: Option<Address>,
    }

    #[test]
    fn derives_type_definitions_from_shapes() {
        let mut registry = TypeRegistry::new();
        let root = registry.register_facet::<Person>();
        let TypeRef::Named(name) = &root else {
            panic!("expected a record type, got {root}");
        };
        let fields = registry.fields_of(name).unwrap();
        assert_eq!(fields["age"].ty, TypeRef::Scalar(ScalarKind::U32));
        assert_eq!(fields["tags"].ty, TypeRef::list(TypeRef::Scalar(ScalarKind::String)));
        let TypeRef::Option(address) = &fields["address"].ty else {
            panic!("expected an optional field");
        };
        assert!(registry.is_known(address));
    }

    #[test]
    fn extracts_plain_values() {
        let mut graph = Graph::new();
        let tags = graph.alloc(Instance::List {
            element: TypeRef::Any,
            items: vec![Value::from("a"), Value::from("b")],
        });
        let address = graph.alloc(Instance::Object {
            ty: None,
            fields: [("city".to_string(), Value::from("Oslo"))].into_iter().collect(),
        });
        let person = graph.alloc(Instance::Object {
            ty: None,
            fields: [
                ("name".to_string(), Value::from("Ann")),
                ("age".to_string(), Value::I64(41)),
                ("tags".to_string(), Value::Object(tags)),
                ("address".to_string(), Value::Object(address)),
            ]
            .into_iter()
            .collect(),
        });
        let extracted: Person = extract(&graph, &Value::Object(person)).unwrap();
        assert_eq!(
            extracted,
            Person {
                name: "Ann".to_string(),
                age: 41,
                tags: vec!["a".to_string(), "b".to_string()],
                address: Some(Address {
                    city: "Oslo".to_string()
                }),
            }
        );
    }

    #[test]
    fn missing_default_fields_are_filled() {
        let mut graph = Graph::new();
        let person = graph.alloc(Instance::Object {
            ty: None,
            fields: [
                ("name".to_string(), Value::from("Bo")),
                ("age".to_string(), Value::I32(3)),
            ]
            .into_iter()
            .collect(),
        });
        let extracted: Person = extract(&graph, &Value::Object(person)).unwrap();
        assert!(extracted.tags.is_empty());
        assert_eq!(extracted.address, None);
    }

    #[derive(Facet, Debug, PartialEq)]
    #[repr(u8)]
    enum Suit {
        Hearts,
        Spades,
    }

    #[derive(Facet, Debug, PartialEq)]
    struct Card {
        rank: u8,
        suit: Suit,
    }

    #[test]
    fn unit_enums_read_as_variant_names() {
        let mut registry = TypeRegistry::new();
        let root = registry.register_facet::<Card>();
        let TypeRef::Named(name) = &root else {
            panic!("expected a record type, got {root}");
        };
        let suit = registry.fields_of(name).unwrap()["suit"].ty.clone();
        let TypeRef::Enum(def) = &suit else {
            panic!("expected an enum field, got {suit}");
        };
        assert_eq!(def.variants(), ["Hearts", "Spades"]);
        assert_eq!(registry.resolve_type_name(&suit.to_string()), suit);

        let mut graph = Graph::new();
        let card = graph.alloc(Instance::Object {
            ty: None,
            fields: [
                ("rank".to_string(), Value::U8(12)),
                ("suit".to_string(), def.value("Spades").unwrap()),
            ]
            .into_iter()
            .collect(),
        });
        let extracted: Card = extract(&graph, &Value::Object(card)).unwrap();
        assert_eq!(extracted, Card { rank: 12, suit: Suit::Spades });

        if let Instance::Object { fields, .. } = graph.get_mut(card) {
            fields.insert("suit".to_string(), Value::from("Clubs"));
        }
        assert!(extract::<Card>(&graph, &Value::Object(card)).is_err());
    }

    #[derive(Facet, Debug)]
    struct Link {
        v: i32,
        next: Option<Box<Link>>,
    }

    fn chain(graph: &mut Graph, len: usize) -> Value {
        let mut next = Value::Null;
        for v in (0..len).rev() {
            let id = graph.alloc(Instance::Object {
                ty: None,
                fields: [
                    ("v".to_string(), Value::I32(v as i32)),
                    ("next".to_string(), next),
                ]
                .into_iter()
                .collect(),
            });
            next = Value::Object(id);
        }
        next
    }

    #[test]
    fn long_chains_extract_without_recursion() {
        let mut graph = Graph::new();
        let head = chain(&mut graph, 900);
        let extracted: Link = extract(&graph, &head).unwrap();
        let mut count = 1;
        let mut last = &extracted;
        while let Some(next) = &last.next {
            count += 1;
            last = next;
        }
        assert_eq!(count, 900);
        assert_eq!(last.v, 899);
    }

    #[test]
    fn chains_past_the_limit_are_rejected() {
        let mut graph = Graph::new();
        let head = chain(&mut graph, MAX_EXTRACT_DEPTH + 1);
        let err = extract::<Link>(&graph, &head).unwrap_err();
        assert!(matches!(
            err,
            JsonIoError::LimitExceeded { limit: MAX_EXTRACT_DEPTH, .. }
        ));
    }

    #[test]
    fn cycles_are_rejected() {
        let mut graph = Graph::new();
        let id = graph.alloc(Instance::untyped());
        if let Instance::Object { fields, .. } = graph.get_mut(id) {
            fields.insert("v".to_string(), Value::I32(1));
            fields.insert("next".to_string(), Value::Object(id));
        }
        let err = extract::<Link>(&graph, &Value::Object(id)).unwrap_err();
        assert!(matches!(err, JsonIoError::Reflect(_)));
    }
}
