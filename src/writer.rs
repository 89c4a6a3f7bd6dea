//! [`Graph`] → JSON text with `@id`/`@ref` identity.
//!
//! A tracing pass finds every instance reachable more than once. Those get an `@id` the first
//! time they are written and are written as `{"@ref":n}` afterwards, so cycles and sharing
//! survive a round trip. Output is driven by an explicit instruction stack, like the resolver.

use core::fmt::Write as _;

use base64::Engine;
use log::{debug, trace};
use owo_colors::OwoColorize;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{JsonIoError, Result};
use crate::graph::{Graph, Instance, ObjId, Value};
use crate::node::meta;
use crate::options::{TypeInfo, WriteOptions};
use crate::registry::TypeRegistry;
use crate::types::TypeRef;

/// Write `root` and everything reachable from it. The root is written for an untyped
/// position, so records carry their `@type` unless [`TypeInfo::Never`] is set.
pub fn write_graph(
    graph: &Graph,
    root: &Value,
    registry: &TypeRegistry,
    options: &WriteOptions,
) -> Result<String> {
    Writer::new(graph, registry, options).write(root, &TypeRef::Any)
}

#[derive(Debug)]
enum Instruction<'g> {
    Value {
        value: &'g Value,
        declared: TypeRef,
        depth: usize,
    },
    Key(&'g str),
    Text(&'static str),
}

/// One write. Holds the identity bookkeeping for a single output document.
pub struct Writer<'g> {
    graph: &'g Graph,
    registry: &'g TypeRegistry,
    options: &'g WriteOptions,
    shared: FxHashSet<ObjId>,
    ids: FxHashMap<ObjId, i64>,
    next_id: i64,
    out: String,
    stack: Vec<Instruction<'g>>,
}

impl<'g> Writer<'g> {
    /// Writer over `graph`; `registry` supplies declared field types.
    pub fn new(graph: &'g Graph, registry: &'g TypeRegistry, options: &'g WriteOptions) -> Self {
        Self {
            graph,
            registry,
            options,
            shared: FxHashSet::default(),
            ids: FxHashMap::default(),
            next_id: 1,
            out: String::new(),
            stack: Vec::new(),
        }
    }

    /// Write `root` for a position declared as `declared`.
    pub fn write(mut self, root: &'g Value, declared: &TypeRef) -> Result<String> {
        self.trace_shared(root);
        debug!("{} shared instances", self.shared.len());

        self.stack.push(Instruction::Value {
            value: root,
            declared: declared.clone(),
            depth: 0,
        });
        while let Some(insn) = self.stack.pop() {
            trace!("Instruction {:?}", insn.bright_red());
            match insn {
                Instruction::Text(text) => self.out.push_str(text),
                Instruction::Key(key) => {
                    write_string(&mut self.out, key);
                    self.out.push(':');
                }
                Instruction::Value {
                    value,
                    declared,
                    depth,
                } => match value {
                    Value::Object(id) => self.instance(*id, &declared, depth)?,
                    scalar => self.scalar(scalar, &declared)?,
                },
            }
        }
        Ok(self.out)
    }

    fn trace_shared(&mut self, root: &Value) {
        let mut seen = FxHashSet::default();
        let mut stack: Vec<ObjId> = root.as_object().into_iter().collect();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                self.shared.insert(id);
                continue;
            }
            let children: Vec<&Value> = match self.graph.get(id) {
                Instance::Object { fields, .. } => fields.values().collect(),
                Instance::Array { items, .. } | Instance::List { items, .. } => items.iter().collect(),
                Instance::Set { items, .. } => items.iter().collect(),
                Instance::Map { entries, .. } => entries.iter().flat_map(|(k, v)| [k, v]).collect(),
                Instance::Bytes(_) => Vec::new(),
            };
            stack.extend(children.into_iter().rev().filter_map(Value::as_object));
        }
    }

    fn meta_key(&self, key: &'static str) -> &'static str {
        if !self.options.short_meta_keys {
            return key;
        }
        match key {
            meta::ID => meta::SHORT_ID,
            meta::REF => meta::SHORT_REF,
            meta::TYPE => meta::SHORT_TYPE,
            meta::KEYS => meta::SHORT_KEYS,
            meta::ITEMS => meta::SHORT_ITEMS,
            other => other,
        }
    }

    /// The `@type` to write for `instance` at a position declared as `declared`.
    fn type_tag(&self, instance: &Instance, declared: &TypeRef) -> Option<String> {
        let actual = instance.type_ref();
        match self.options.type_info {
            TypeInfo::Never => None,
            TypeInfo::Always => Some(actual.to_string()),
            TypeInfo::Minimal => {
                let declared = declared.strip_option();
                let pinned = *declared == actual
                    || (*declared == TypeRef::Any
                        && matches!(
                            instance,
                            Instance::Object { ty: None, .. }
                                | Instance::Array {
                                    component: TypeRef::Any,
                                    ..
                                }
                        ));
                (!pinned).then(|| actual.to_string())
            }
        }
    }

    fn open_object(&mut self, id: Option<i64>, tag: Option<&str>) -> bool {
        let (id_key, type_key) = (self.meta_key(meta::ID), self.meta_key(meta::TYPE));
        self.out.push('{');
        let mut first = true;
        if let Some(n) = id {
            write_string(&mut self.out, id_key);
            let _ = write!(self.out, ":{n}");
            first = false;
        }
        if let Some(tag) = tag {
            if !first {
                self.out.push(',');
            }
            write_string(&mut self.out, type_key);
            self.out.push(':');
            write_string(&mut self.out, tag);
            first = false;
        }
        first
    }

    /// A bare array, or `{"@id":..,"@type":..,"@items":[..]}` when meta is needed.
    fn elements(
        &mut self,
        parts: &mut Vec<Instruction<'g>>,
        items: impl Iterator<Item = &'g Value>,
        element: &TypeRef,
        id: Option<i64>,
        tag: Option<&str>,
        depth: usize,
    ) {
        if tag.is_none() && id.is_none() {
            sequence(parts, items, element, depth);
            return;
        }
        if !self.open_object(id, tag) {
            parts.push(Instruction::Text(","));
        }
        parts.push(Instruction::Key(self.meta_key(meta::ITEMS)));
        sequence(parts, items, element, depth);
        parts.push(Instruction::Text("}"));
    }

    fn instance(&mut self, id: ObjId, declared: &TypeRef, depth: usize) -> Result<()> {
        if let Some(n) = self.ids.get(&id) {
            let key = self.meta_key(meta::REF);
            self.out.push('{');
            write_string(&mut self.out, key);
            let _ = write!(self.out, ":{n}}}");
            return Ok(());
        }
        if depth >= self.options.max_depth {
            return Err(JsonIoError::LimitExceeded {
                what: "write depth",
                limit: self.options.max_depth,
            });
        }

        let graph = self.graph;
        let instance = graph.get(id);
        let tag = self.type_tag(instance, declared);
        let id_meta = self.shared.contains(&id).then(|| {
            let n = self.next_id;
            self.next_id += 1;
            self.ids.insert(id, n);
            n
        });
        trace!("Writing {} as {:?}", id.blue(), tag.yellow());
        let depth = depth + 1;
        let mut parts = Vec::new();

        match instance {
            Instance::Bytes(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                if tag.is_none() && id_meta.is_none() {
                    write_string(&mut self.out, &encoded);
                    return Ok(());
                }
                let first = self.open_object(id_meta, tag.as_deref());
                if !first {
                    self.out.push(',');
                }
                write_string(&mut self.out, "value");
                self.out.push(':');
                write_string(&mut self.out, &encoded);
                self.out.push('}');
                return Ok(());
            }
            Instance::Array { items, component: element }
            | Instance::List { items, element } => {
                self.elements(&mut parts, items.iter(), element, id_meta, tag.as_deref(), depth);
            }
            Instance::Set { items, element, .. } => {
                self.elements(&mut parts, items.iter(), element, id_meta, tag.as_deref(), depth);
            }
            Instance::Map {
                key, value, entries, ..
            } => {
                let mut first = self.open_object(id_meta, tag.as_deref());
                let plain = entries
                    .keys()
                    .all(|k| matches!(k, Value::String(s) if meta::is_plain_key(s)));
                if plain {
                    for (k, v) in entries {
                        let Value::String(k) = k else { continue };
                        if !first {
                            parts.push(Instruction::Text(","));
                        }
                        first = false;
                        parts.push(Instruction::Key(k));
                        parts.push(Instruction::Value {
                            value: v,
                            declared: value.clone(),
                            depth,
                        });
                    }
                } else {
                    if !first {
                        parts.push(Instruction::Text(","));
                    }
                    parts.push(Instruction::Key(self.meta_key(meta::KEYS)));
                    sequence(&mut parts, entries.keys(), key, depth);
                    parts.push(Instruction::Text(","));
                    parts.push(Instruction::Key(self.meta_key(meta::ITEMS)));
                    sequence(&mut parts, entries.values(), value, depth);
                }
                parts.push(Instruction::Text("}"));
            }
            Instance::Object { ty, fields } => {
                let registry = self.registry;
                let declared_fields = ty.as_deref().and_then(|name| registry.fields_of(name));
                let mut first = self.open_object(id_meta, tag.as_deref());
                for (name, value) in fields {
                    if !first {
                        parts.push(Instruction::Text(","));
                    }
                    first = false;
                    let field_ty = declared_fields
                        .and_then(|f| f.get(name))
                        .map(|fd| fd.ty.clone())
                        .unwrap_or(TypeRef::Any);
                    parts.push(Instruction::Key(name));
                    parts.push(Instruction::Value {
                        value,
                        declared: field_ty,
                        depth,
                    });
                }
                parts.push(Instruction::Text("}"));
            }
        }

        self.stack.extend(parts.into_iter().rev());
        Ok(())
    }

    fn scalar(&mut self, value: &Value, declared: &TypeRef) -> Result<()> {
        let untyped = *declared.strip_option() == TypeRef::Any && self.options.type_info != TypeInfo::Never;
        if let (true, Value::Enum { ty, variant }) = (untyped, value) {
            let first = self.open_object(None, Some(ty));
            if !first {
                self.out.push(',');
            }
            write_string(&mut self.out, "name");
            self.out.push(':');
            write_string(&mut self.out, variant);
            self.out.push('}');
            return Ok(());
        }
        let object_form = untyped && value.kind().is_some_and(|k| !k.is_json_native());
        if !object_form {
            return self.scalar_text(value);
        }
        let Some(kind) = value.kind() else {
            return self.scalar_text(value);
        };
        let first = self.open_object(None, Some(kind.name()));
        if !first {
            self.out.push(',');
        }
        write_string(&mut self.out, "value");
        self.out.push(':');
        self.scalar_text(value)?;
        self.out.push('}');
        Ok(())
    }

    fn scalar_text(&mut self, value: &Value) -> Result<()> {
        let out = &mut self.out;
        match value {
            Value::Null => out.push_str("null"),
            Value::Bool(v) => write!(out, "{v}")?,
            Value::I8(v) => write!(out, "{v}")?,
            Value::I16(v) => write!(out, "{v}")?,
            Value::I32(v) => write!(out, "{v}")?,
            Value::I64(v) => write!(out, "{v}")?,
            Value::U8(v) => write!(out, "{v}")?,
            Value::U16(v) => write!(out, "{v}")?,
            Value::U32(v) => write!(out, "{v}")?,
            Value::U64(v) => write!(out, "{v}")?,
            Value::BigInt(v) => write!(out, "{v}")?,
            Value::F32(v) if v.is_finite() => write!(out, "{v:?}")?,
            Value::F64(v) if v.is_finite() => write!(out, "{v:?}")?,
            Value::F32(v) => write_non_finite(out, f64::from(*v), self.options.allow_nan_and_infinity),
            Value::F64(v) => write_non_finite(out, *v, self.options.allow_nan_and_infinity),
            Value::Char(c) => write_string(out, c.encode_utf8(&mut [0; 4])),
            Value::String(s) => write_string(out, s),
            Value::Date(_) | Value::DateTime(_) | Value::Uuid(_) => write_string(out, &value.to_string()),
            Value::Enum { variant, .. } => write_string(out, variant),
            Value::Object(id) => {
                return Err(JsonIoError::Write(format!("{id} is not a scalar")));
            }
        }
        Ok(())
    }
}

fn sequence<'g>(
    parts: &mut Vec<Instruction<'g>>,
    items: impl Iterator<Item = &'g Value>,
    element: &TypeRef,
    depth: usize,
) {
    parts.push(Instruction::Text("["));
    for (i, value) in items.enumerate() {
        if i > 0 {
            parts.push(Instruction::Text(","));
        }
        parts.push(Instruction::Value {
            value,
            declared: element.clone(),
            depth,
        });
    }
    parts.push(Instruction::Text("]"));
}

fn write_non_finite(out: &mut String, v: f64, allow: bool) {
    let text = match (allow, v.is_nan(), v > 0.0) {
        (false, _, _) => "null",
        (true, true, _) => "NaN",
        (true, false, true) => "Infinity",
        (true, false, false) => "-Infinity",
    };
    out.push_str(text);
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    fn write(graph: &Graph, root: &Value, options: &WriteOptions) -> String {
        write_graph(graph, root, &TypeRegistry::new(), options).unwrap()
    }

    #[test]
    fn escapes_strings() {
        let mut out = String::new();
        write_string(&mut out, "a\"b\\c\nd\u{1}");
        assert_eq!(out, r#""a\"b\\c\nd\u0001""#);
    }

    #[test]
    fn shared_instances_get_ids_in_write_order() {
        let mut graph = Graph::new();
        let leaf = graph.alloc(Instance::untyped());
        let root = graph.alloc(Instance::Object {
            ty: None,
            fields: [
                ("a".to_string(), Value::Object(leaf)),
                ("b".to_string(), Value::Object(leaf)),
            ]
            .into_iter()
            .collect(),
        });
        let json = write(&graph, &Value::Object(root), &WriteOptions::default());
        insta::assert_snapshot!(json, @r#"{"a":{"@id":1},"b":{"@ref":1}}"#);
    }

    #[test]
    fn non_native_scalars_in_untyped_positions_keep_their_kind() {
        let mut graph = Graph::new();
        let root = graph.alloc(Instance::Object {
            ty: None,
            fields: [
                ("n".to_string(), Value::I32(5)),
                ("x".to_string(), Value::F64(f64::NAN)),
            ]
            .into_iter()
            .collect(),
        });
        let json = write(&graph, &Value::Object(root), &WriteOptions::default());
        insta::assert_snapshot!(json, @r#"{"n":{"@type":"i32","value":5},"x":null}"#);
    }

    #[test]
    fn maps_with_non_string_keys_use_keys_and_items() {
        let mut graph = Graph::new();
        let mut entries = IndexMap::new();
        entries.insert(Value::I64(1), Value::from("one"));
        let map = graph.alloc(Instance::Map {
            key: TypeRef::Any,
            value: TypeRef::Any,
            sorted: false,
            entries,
        });
        let options = WriteOptions::default().short_meta_keys(true);
        let json = write(&graph, &Value::Object(map), &options);
        insta::assert_snapshot!(json, @r#"{"@t":"map","@k":[1],"@e":["one"]}"#);
    }

    #[test]
    fn depth_is_limited() {
        let mut graph = Graph::new();
        let inner = graph.alloc(Instance::untyped());
        let outer = graph.alloc(Instance::Object {
            ty: None,
            fields: [("inner".to_string(), Value::Object(inner))].into_iter().collect(),
        });
        let err = write_graph(
            &graph,
            &Value::Object(outer),
            &TypeRegistry::new(),
            &WriteOptions::default().max_depth(1),
        )
        .unwrap_err();
        assert!(matches!(err, JsonIoError::LimitExceeded { what: "write depth", .. }));
    }
}
