//! The materialized object graph.
//!
//! Objects live in an arena ([`Graph`]) and refer to each other through [`ObjId`] handles, so
//! shared and cyclic structure needs no reference counting or interior mutability. A
//! [`Value`] is either a logical primitive (compared by value) or a handle (compared by
//! identity).

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

use chrono::{DateTime, FixedOffset, NaiveDate};
use indexmap::{IndexMap, IndexSet};
use num_bigint::BigInt;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::types::{ScalarKind, TypeRef};

/// Handle of an [`Instance`] inside a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjId(pub(crate) u32);

impl ObjId {
    /// Position of the instance in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A logical primitive or a handle to an arena instance.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Arbitrary precision integer.
    BigInt(BigInt),
    /// Single character.
    Char(char),
    /// String.
    String(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time with a fixed offset.
    DateTime(DateTime<FixedOffset>),
    /// UUID.
    Uuid(Uuid),
    /// A variant of an enumeration.
    Enum {
        /// Enumeration name.
        ty: String,
        /// Variant name.
        variant: String,
    },
    /// Handle to an instance in the graph.
    Object(ObjId),
}

impl Value {
    /// `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The handle, if this is an object.
    pub fn as_object(&self) -> Option<ObjId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The scalar kind of a logical primitive. `None` for nulls, enum variants and handles.
    pub fn kind(&self) -> Option<ScalarKind> {
        Some(match self {
            Value::Null | Value::Enum { .. } | Value::Object(_) => return None,
            Value::Bool(_) => ScalarKind::Bool,
            Value::I8(_) => ScalarKind::I8,
            Value::I16(_) => ScalarKind::I16,
            Value::I32(_) => ScalarKind::I32,
            Value::I64(_) => ScalarKind::I64,
            Value::U8(_) => ScalarKind::U8,
            Value::U16(_) => ScalarKind::U16,
            Value::U32(_) => ScalarKind::U32,
            Value::U64(_) => ScalarKind::U64,
            Value::F32(_) => ScalarKind::F32,
            Value::F64(_) => ScalarKind::F64,
            Value::BigInt(_) => ScalarKind::BigInt,
            Value::Char(_) => ScalarKind::Char,
            Value::String(_) => ScalarKind::String,
            Value::Date(_) => ScalarKind::Date,
            Value::DateTime(_) => ScalarKind::DateTime,
            Value::Uuid(_) => ScalarKind::Uuid,
        })
    }

    /// Name used in conversion errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Object(_) => "object",
            Value::Enum { .. } => "enum",
            other => other.kind().map(ScalarKind::name).unwrap_or("value"),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::I8(_) => 2,
            Value::I16(_) => 3,
            Value::I32(_) => 4,
            Value::I64(_) => 5,
            Value::U8(_) => 6,
            Value::U16(_) => 7,
            Value::U32(_) => 8,
            Value::U64(_) => 9,
            Value::F32(_) => 10,
            Value::F64(_) => 11,
            Value::BigInt(_) => 12,
            Value::Char(_) => 13,
            Value::String(_) => 14,
            Value::Date(_) => 15,
            Value::DateTime(_) => 16,
            Value::Uuid(_) => 17,
            Value::Enum { .. } => 18,
            Value::Object(_) => 19,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (I8(a), I8(b)) => a.cmp(b),
            (I16(a), I16(b)) => a.cmp(b),
            (I32(a), I32(b)) => a.cmp(b),
            (I64(a), I64(b)) => a.cmp(b),
            (U8(a), U8(b)) => a.cmp(b),
            (U16(a), U16(b)) => a.cmp(b),
            (U32(a), U32(b)) => a.cmp(b),
            (U64(a), U64(b)) => a.cmp(b),
            (F32(a), F32(b)) => a.total_cmp(b),
            (F64(a), F64(b)) => a.total_cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Char(a), Char(b)) => a.cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Enum { ty: t1, variant: v1 }, Enum { ty: t2, variant: v2 }) => (t1, v1).cmp(&(t2, v2)),
            (Object(a), Object(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::I8(v) => v.hash(state),
            Value::I16(v) => v.hash(state),
            Value::I32(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::U8(v) => v.hash(state),
            Value::U16(v) => v.hash(state),
            Value::U32(v) => v.hash(state),
            Value::U64(v) => v.hash(state),
            // total_cmp equality is bit equality
            Value::F32(v) => v.to_bits().hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::BigInt(v) => v.hash(state),
            Value::Char(v) => v.hash(state),
            Value::String(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Enum { ty, variant } => {
                ty.hash(state);
                variant.hash(state);
            }
            Value::Object(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::I8(v) => write!(f, "{v}"),
            Value::I16(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v}"),
            Value::U16(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v:?}"),
            Value::F64(v) => write!(f, "{v:?}"),
            Value::BigInt(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::Date(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Uuid(v) => write!(f, "{v}"),
            Value::Enum { variant, .. } => f.write_str(variant),
            Value::Object(id) => write!(f, "{id}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<ObjId> for Value {
    fn from(v: ObjId) -> Self {
        Value::Object(v)
    }
}

/// One arena slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Instance {
    /// A record. `ty` is the registered type name, `None` for untyped objects.
    Object {
        /// Registered type name.
        ty: Option<String>,
        /// Field values in declaration (or document) order.
        fields: IndexMap<String, Value>,
    },
    /// Fixed-length array with a declared component type.
    Array {
        /// Declared element type.
        component: TypeRef,
        /// Elements.
        items: Vec<Value>,
    },
    /// `byte[]`.
    Bytes(Vec<u8>),
    /// Growable, indexable collection.
    List {
        /// Declared element type.
        element: TypeRef,
        /// Elements.
        items: Vec<Value>,
    },
    /// Set. Insertion-ordered unless `sorted`.
    Set {
        /// Declared element type.
        element: TypeRef,
        /// Kept in ascending order.
        sorted: bool,
        /// Elements.
        items: IndexSet<Value>,
    },
    /// Associative container. Insertion-ordered unless `sorted`.
    Map {
        /// Declared key type.
        key: TypeRef,
        /// Declared value type.
        value: TypeRef,
        /// Kept in ascending key order.
        sorted: bool,
        /// Entries.
        entries: IndexMap<Value, Value>,
    },
}

impl Instance {
    /// A fresh untyped object.
    pub fn untyped() -> Self {
        Instance::Object {
            ty: None,
            fields: IndexMap::new(),
        }
    }

    /// The type this instance reports for itself.
    pub fn type_ref(&self) -> TypeRef {
        match self {
            Instance::Object { ty: Some(name), .. } => TypeRef::Named(name.clone()),
            Instance::Object { ty: None, .. } => TypeRef::Any,
            Instance::Array { component, .. } => TypeRef::Array(Box::new(component.clone())),
            Instance::Bytes(_) => TypeRef::Bytes,
            Instance::List { element, .. } => TypeRef::List(Box::new(element.clone())),
            Instance::Set {
                element, sorted, ..
            } => TypeRef::Set {
                element: Box::new(element.clone()),
                sorted: *sorted,
            },
            Instance::Map {
                key, value, sorted, ..
            } => TypeRef::Map {
                key: Box::new(key.clone()),
                value: Box::new(value.clone()),
                sorted: *sorted,
            },
        }
    }

    /// Object field lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Instance::Object { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    /// Indexable elements (arrays and lists).
    pub fn items(&self) -> Option<&[Value]> {
        match self {
            Instance::Array { items, .. } | Instance::List { items, .. } => Some(items),
            _ => None,
        }
    }
}

/// Arena of instances.
#[derive(Debug, Default, Clone)]
pub struct Graph {
    slots: Vec<Instance>,
}

impl Graph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an instance and return its handle.
    pub fn alloc(&mut self, instance: Instance) -> ObjId {
        let id = ObjId(self.slots.len() as u32);
        self.slots.push(instance);
        id
    }

    /// Instance by handle.
    pub fn get(&self, id: ObjId) -> &Instance {
        &self.slots[id.index()]
    }

    /// Mutable instance by handle.
    pub fn get_mut(&mut self, id: ObjId) -> &mut Instance {
        &mut self.slots[id.index()]
    }

    /// Number of instances.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No instances.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Field of an object instance.
    pub fn field(&self, id: ObjId, name: &str) -> Option<&Value> {
        self.get(id).field(name)
    }

    /// Follow a handle-valued field.
    pub fn follow(&self, id: ObjId, name: &str) -> Option<ObjId> {
        self.field(id, name).and_then(Value::as_object)
    }

    /// Structural equality of `a` (in `self`) and `b` (in `other`) up to renumbering of handles.
    ///
    /// Sharing must match too: two handles that are the same instance on one side must be the
    /// same instance on the other. Containers are compared in iteration order.
    pub fn isomorphic(&self, a: &Value, other: &Graph, b: &Value) -> bool {
        let mut forward: FxHashMap<ObjId, ObjId> = FxHashMap::default();
        let mut backward: FxHashMap<ObjId, ObjId> = FxHashMap::default();
        let mut stack: Vec<(Value, Value)> = vec![(a.clone(), b.clone())];

        while let Some((left, right)) = stack.pop() {
            let (l, r) = match (&left, &right) {
                (Value::Object(l), Value::Object(r)) => (*l, *r),
                (Value::Object(_), _) | (_, Value::Object(_)) => return false,
                _ => {
                    if left != right {
                        return false;
                    }
                    continue;
                }
            };
            match (forward.get(&l), backward.get(&r)) {
                (Some(mapped), _) if *mapped != r => return false,
                (_, Some(mapped)) if *mapped != l => return false,
                (Some(_), Some(_)) => continue,
                _ => {}
            }
            forward.insert(l, r);
            backward.insert(r, l);

            match (self.get(l), other.get(r)) {
                (
                    Instance::Object { ty: lt, fields: lf },
                    Instance::Object { ty: rt, fields: rf },
                ) => {
                    if lt != rt || lf.len() != rf.len() {
                        return false;
                    }
                    for (name, lv) in lf {
                        let Some(rv) = rf.get(name) else {
                            return false;
                        };
                        stack.push((lv.clone(), rv.clone()));
                    }
                }
                (
                    Instance::Array {
                        component: lc,
                        items: li,
                    },
                    Instance::Array {
                        component: rc,
                        items: ri,
                    },
                )
                | (
                    Instance::List {
                        element: lc,
                        items: li,
                    },
                    Instance::List {
                        element: rc,
                        items: ri,
                    },
                ) => {
                    if lc != rc || li.len() != ri.len() {
                        return false;
                    }
                    stack.extend(li.iter().cloned().zip(ri.iter().cloned()));
                }
                (Instance::Bytes(lb), Instance::Bytes(rb)) => {
                    if lb != rb {
                        return false;
                    }
                }
                (
                    Instance::Set {
                        element: le,
                        sorted: ls,
                        items: li,
                    },
                    Instance::Set {
                        element: re,
                        sorted: rs,
                        items: ri,
                    },
                ) => {
                    if le != re || ls != rs || li.len() != ri.len() {
                        return false;
                    }
                    stack.extend(li.iter().cloned().zip(ri.iter().cloned()));
                }
                (
                    Instance::Map {
                        key: lk,
                        value: lv,
                        sorted: ls,
                        entries: le,
                    },
                    Instance::Map {
                        key: rk,
                        value: rv,
                        sorted: rs,
                        entries: re,
                    },
                ) => {
                    if lk != rk || lv != rv || ls != rs || le.len() != re.len() {
                        return false;
                    }
                    for ((lk, lv), (rk, rv)) in le.iter().zip(re.iter()) {
                        stack.push((lk.clone(), rk.clone()));
                        stack.push((lv.clone(), rv.clone()));
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn person(graph: &mut Graph, name: &str) -> ObjId {
        graph.alloc(Instance::Object {
            ty: Some("Person".into()),
            fields: IndexMap::from([("name".to_string(), Value::from(name))]),
        })
    }

    fn link(graph: &mut Graph, from: ObjId, field: &str, to: ObjId) {
        if let Instance::Object { fields, .. } = graph.get_mut(from) {
            fields.insert(field.to_string(), Value::Object(to));
        }
    }

    #[test]
    fn floats_hash_and_compare_by_bits() {
        let mut set = HashSet::new();
        set.insert(Value::F64(f64::NAN));
        assert!(set.contains(&Value::F64(f64::NAN)));
        assert_ne!(Value::F64(0.0), Value::F64(-0.0));
        assert_ne!(Value::I32(1), Value::I64(1));
        assert!(Value::Null < Value::Bool(false));
    }

    #[test]
    fn isomorphic_ignores_numbering_but_not_sharing() {
        let mut g1 = Graph::new();
        let a = person(&mut g1, "a");
        link(&mut g1, a, "self", a);

        let mut g2 = Graph::new();
        let _padding = person(&mut g2, "unused");
        let b = person(&mut g2, "a");
        link(&mut g2, b, "self", b);
        assert!(g1.isomorphic(&Value::Object(a), &g2, &Value::Object(b)));

        // Same shape, but `self` points at a copy instead of the object itself.
        let mut g3 = Graph::new();
        let c = person(&mut g3, "a");
        let d = person(&mut g3, "a");
        link(&mut g3, c, "self", d);
        link(&mut g3, d, "self", d);
        assert!(!g1.isomorphic(&Value::Object(a), &g3, &Value::Object(c)));
    }

    #[test]
    fn isomorphic_compares_scalars_by_value() {
        let g = Graph::new();
        assert!(g.isomorphic(&Value::from("x"), &g, &Value::from("x")));
        assert!(!g.isomorphic(&Value::I32(1), &g, &Value::I32(2)));
    }
}
