use std::sync::Arc;

use indexmap::IndexMap;

use super::{ResolveCore, Resolver, collapsed_value};
use crate::convert::Converter;
use crate::error::Result;
use crate::graph::{Graph, Instance, ObjId, Value};
use crate::node::{Document, NodeId, ObjectNode, meta};
use crate::options::ReadOptions;
use crate::types::TypeRef;

/// Schema-less resolution: objects stay untyped, record names are kept only as tags.
pub struct MapResolver<'a> {
    core: ResolveCore<'a>,
}

impl<'a> MapResolver<'a> {
    /// Resolver over `doc`.
    pub fn new(doc: Document, options: &'a ReadOptions, converter: &'a Converter) -> Self {
        Self {
            core: ResolveCore::new(doc, options, converter),
        }
    }

    /// The graph built so far.
    pub fn graph(&self) -> &Graph {
        self.core.graph()
    }

    /// Give up the graph.
    pub fn into_graph(self) -> Graph {
        self.core.into_graph()
    }
}

/// Replace record names with `Any`, at any depth.
fn erase_named(ty: &TypeRef) -> TypeRef {
    match ty {
        TypeRef::Named(_) => TypeRef::Any,
        TypeRef::Option(inner) => erase_named(inner),
        TypeRef::Array(inner) => TypeRef::array(erase_named(inner)),
        TypeRef::List(inner) => TypeRef::list(erase_named(inner)),
        TypeRef::Set { element, sorted } => TypeRef::Set {
            element: Box::new(erase_named(element)),
            sorted: *sorted,
        },
        TypeRef::Map { key, value, sorted } => TypeRef::Map {
            key: Box::new(erase_named(key)),
            value: Box::new(erase_named(value)),
            sorted: *sorted,
        },
        other => other.clone(),
    }
}

impl<'a> Resolver<'a> for MapResolver<'a> {
    fn core(&mut self) -> &mut ResolveCore<'a> {
        &mut self.core
    }

    fn create_instance(&mut self, node: &ObjectNode, hint: &TypeRef) -> Result<(Value, bool)> {
        let (ty, raw_tag) = match node.type_tag.as_deref() {
            Some(tag) => {
                let parsed = TypeRef::parse(tag);
                if parsed == TypeRef::Any {
                    if let Some(value) = collapsed_value(node) {
                        return Ok((value, true));
                    }
                }
                let raw = matches!(parsed, TypeRef::Named(_)).then(|| tag.to_string());
                (erase_named(&parsed), raw)
            }
            None => (erase_named(hint), None),
        };
        match self.core.create_structural(node, &ty, raw_tag)? {
            Some(created) => Ok(created),
            None => {
                let id = self.core.alloc(Instance::untyped());
                Ok((Value::Object(id), node.entries.is_empty()))
            }
        }
    }

    fn traverse_fields(&mut self, nid: NodeId, target: ObjId) -> Result<()> {
        let doc = Arc::clone(&self.core.doc);
        for (key, child) in &doc.object(nid).entries {
            self.assign_field(target, key, &TypeRef::Any, child)?;
        }
        Ok(())
    }

    /// Maps whose keys all came out as plain strings read back as plain objects. A key such
    /// as `"@id"` keeps the map a map, so it is written back with `@keys`/`@items`.
    fn finish_map(&mut self, target: ObjId) {
        let Instance::Map { entries, .. } = self.core.graph.get_mut(target) else {
            return;
        };
        if !entries
            .keys()
            .all(|k| matches!(k, Value::String(s) if meta::is_plain_key(s)))
        {
            return;
        }
        let fields: IndexMap<String, Value> = core::mem::take(entries)
            .into_iter()
            .filter_map(|(k, v)| match k {
                Value::String(k) => Some((k, v)),
                _ => None,
            })
            .collect();
        *self.core.graph.get_mut(target) = Instance::Object { ty: None, fields };
    }
}
