use std::sync::Arc;

use indexmap::IndexMap;
use log::{trace, warn};
use owo_colors::OwoColorize;

use super::{ResolveCore, Resolver, collapsed_value};
use crate::error::{JsonIoError, Result};
use crate::graph::{Graph, Instance, ObjId, Value};
use crate::node::{Document, Node, NodeId, ObjectNode, Scalar};
use crate::options::ReadOptions;
use crate::registry::{FactoryContext, TypeRegistry};
use crate::types::TypeRef;

/// Typed resolution driven by a [`TypeRegistry`].
pub struct ObjectResolver<'a> {
    core: ResolveCore<'a>,
    registry: &'a TypeRegistry,
}

impl<'a> ObjectResolver<'a> {
    /// Resolver over `doc`, using `registry` for type definitions, factories and conversions.
    pub fn new(doc: Document, registry: &'a TypeRegistry, options: &'a ReadOptions) -> Self {
        Self {
            core: ResolveCore::new(doc, options, registry.converter()),
            registry,
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

    /// The type to build for `node`: its `@type` when present, else the position's hint.
    /// Unknown record names fall back to the configured type, or fail.
    fn target_type(&self, node: &ObjectNode, hint: &TypeRef) -> Result<TypeRef> {
        let ty = match &node.type_tag {
            Some(tag) => self.registry.resolve_type_name(tag),
            None => hint.strip_option().clone(),
        };
        if self.registry.is_known(&ty) {
            return Ok(ty);
        }
        let options = self.core.options;
        if options.fail_on_unknown_type {
            return Err(JsonIoError::MissingType {
                name: ty.to_string(),
            });
        }
        let fallback = options.unknown_type.clone().unwrap_or(TypeRef::Any);
        warn!("Unknown type '{ty}', reading it as {fallback}");
        Ok(fallback)
    }

    fn create_record(&mut self, name: &str, node: &ObjectNode) -> Result<(Value, bool)> {
        let registry = self.registry;
        let def = registry.get(name).ok_or_else(|| JsonIoError::MissingType {
            name: name.to_string(),
        })?;
        let args: Vec<Scalar> = node
            .entries
            .values()
            .filter_map(|n| match n {
                Node::Scalar(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        let initial = match registry.instantiate(name, &args) {
            Ok(fields) => fields,
            Err(e) if self.core.options.allow_default_instantiation => {
                warn!("{e}; building '{name}' from field defaults");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut fields: IndexMap<String, Value> = def
            .fields()
            .iter()
            .map(|(n, fd)| (n.clone(), fd.ty.zero()))
            .collect();
        fields.extend(initial);
        let id = self.core.alloc(Instance::Object {
            ty: Some(def.name().to_string()),
            fields,
        });
        Ok((Value::Object(id), node.entries.is_empty()))
    }
}

impl<'a> Resolver<'a> for ObjectResolver<'a> {
    fn core(&mut self) -> &mut ResolveCore<'a> {
        &mut self.core
    }

    fn create_instance(&mut self, node: &ObjectNode, hint: &TypeRef) -> Result<(Value, bool)> {
        let registry = self.registry;
        let ty = self.target_type(node, hint)?;
        trace!("Instantiating {}", ty.yellow());

        if let Some(factory) = registry.factory_for(&ty) {
            let core = &mut self.core;
            let mut cx = FactoryContext {
                graph: &mut core.graph,
                document: &core.doc,
                converter: core.converter,
            };
            let (value, finished) = factory.new_instance(&ty, node, &mut cx)?;
            return Ok((value, finished || factory.is_object_final()));
        }

        let explicit_object = node
            .type_tag
            .as_deref()
            .is_some_and(|tag| registry.resolve_type_name(tag) == TypeRef::Any);
        if explicit_object {
            if let Some(value) = collapsed_value(node) {
                return Ok((value, true));
            }
        }

        if let Some(created) = self.core.create_structural(node, &ty, None)? {
            return Ok(created);
        }
        match ty.strip_option() {
            TypeRef::Named(name) => self.create_record(name, node),
            other => Err(JsonIoError::Instantiation {
                type_name: other.to_string(),
                reason: "no factory or definition".to_string(),
            }),
        }
    }

    fn traverse_fields(&mut self, nid: NodeId, target: ObjId) -> Result<()> {
        let doc = Arc::clone(&self.core.doc);
        let node = doc.object(nid);
        let registry = self.registry;
        let declared = match self.core.graph.get(target) {
            Instance::Object { ty: Some(name), .. } => registry.fields_of(name),
            _ => None,
        };

        for (key, child) in &node.entries {
            match declared {
                Some(fields) => match fields.get(key) {
                    Some(fd) => self.assign_field(target, key, &fd.ty, child)?,
                    None => self.missing_field(target, key, child)?,
                },
                None => self.assign_field(target, key, &TypeRef::Any, child)?,
            }
        }
        Ok(())
    }
}
