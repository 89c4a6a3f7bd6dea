//! [`Document`] → [`Graph`].
//!
//! Resolution walks the document with an explicit LIFO work stack. Instances are created when
//! their node is first met (so references to them can be wired immediately) and populated when
//! their work item is popped. A reference to an object that has not been created yet is
//! recorded and patched once traversal is complete; maps are only assembled after that, so
//! their keys and values are final when inserted.
//!
//! [`ObjectResolver`] materializes registered types; [`MapResolver`] builds untyped objects,
//! arrays and maps. Both drive the same skeleton, the provided methods of [`Resolver`].

mod map;
mod object;

use std::sync::Arc;

use base64::Engine;
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace, warn};
use owo_colors::OwoColorize;

pub use map::MapResolver;
pub use object::ObjectResolver;

use crate::convert::Converter;
use crate::error::{JsonIoError, Result, SyntaxErrorKind};
use crate::graph::{Graph, Instance, ObjId, Value};
use crate::node::{ArrayId, Document, Node, NodeId, ObjectNode, Scalar, meta};
use crate::options::ReadOptions;
use crate::references::IdentityTable;
use crate::types::{ScalarKind, TypeRef};

/// The outcome of a read: the graph and the value the document's root became.
#[derive(Debug, Clone)]
pub struct Resolved {
    /// All instances created while resolving.
    pub graph: Graph,
    /// The root value, usually a handle into `graph`.
    pub root: Value,
}

/// A field that had no counterpart on its target type.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingField {
    /// The object the field was read for.
    pub target: ObjId,
    /// Field name as written.
    pub name: String,
    /// The resolved value.
    pub value: Value,
}

/// What a node resolved to when it was met.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A value, possibly a handle to an instance still being populated.
    Ready(Value),
    /// A reference to an object that has not been created yet.
    Forward(i64),
}

#[derive(Debug, Clone, Default)]
struct NodeState {
    target: Option<Value>,
    finished: bool,
}

/// Where the elements of a sequence come from.
#[derive(Debug, Clone, Copy)]
pub enum ItemSource {
    /// A JSON array.
    Array(ArrayId),
    /// The `@items` of an object node.
    Items(NodeId),
}

#[derive(Debug, Clone, Copy)]
enum Work {
    /// Populate the instance created for an object node.
    Node { node: NodeId, target: ObjId },
    /// Fill an array, list or set instance from a JSON array.
    Items { source: ItemSource, target: ObjId },
}

/// Where a resolved value goes.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Field { target: ObjId, name: String },
    Index { target: ObjId, index: usize },
    SetItem { target: ObjId },
    MapKey { map: usize, index: usize },
    MapValue { map: usize, index: usize },
    Missing { index: usize },
}

#[derive(Debug, Clone)]
struct UnresolvedReference {
    slot: Slot,
    target_id: i64,
}

#[derive(Debug, Clone)]
struct DeferredMap {
    target: ObjId,
    keys: Vec<Value>,
    values: Vec<Value>,
}

/// Per-call resolution state. Nothing in here outlives one top-level read.
pub struct ResolveCore<'a> {
    doc: Arc<Document>,
    refs: IdentityTable,
    options: &'a ReadOptions,
    converter: &'a Converter,
    graph: Graph,
    nodes: Vec<NodeState>,
    arrays: Vec<Option<Value>>,
    stack: Vec<Work>,
    unresolved: Vec<UnresolvedReference>,
    deferred: Vec<DeferredMap>,
    sorted_sets: Vec<ObjId>,
    missing: Vec<MissingField>,
}

impl<'a> ResolveCore<'a> {
    /// Take ownership of a parsed document.
    pub fn new(mut doc: Document, options: &'a ReadOptions, converter: &'a Converter) -> Self {
        let refs = core::mem::take(&mut doc.references);
        let nodes = vec![NodeState::default(); doc.objects.len()];
        let arrays = vec![None; doc.arrays.len()];
        Self {
            doc: Arc::new(doc),
            refs,
            options,
            converter,
            graph: Graph::new(),
            nodes,
            arrays,
            stack: Vec::new(),
            unresolved: Vec::new(),
            deferred: Vec::new(),
            sorted_sets: Vec::new(),
            missing: Vec::new(),
        }
    }

    /// The graph built so far.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Give up the graph.
    pub fn into_graph(self) -> Graph {
        self.graph
    }

    fn push(&mut self, work: Work) -> Result<()> {
        if self.stack.len() >= self.options.max_stack_depth {
            return Err(JsonIoError::LimitExceeded {
                what: "resolver stack depth",
                limit: self.options.max_stack_depth,
            });
        }
        self.stack.push(work);
        Ok(())
    }

    fn defer(&mut self, slot: Slot, target_id: i64) -> Result<()> {
        if self.unresolved.len() >= self.options.max_unresolved_references {
            return Err(JsonIoError::LimitExceeded {
                what: "unresolved references",
                limit: self.options.max_unresolved_references,
            });
        }
        trace!("Deferring @ref {} into {:?}", target_id.bright_red(), slot);
        self.unresolved.push(UnresolvedReference { slot, target_id });
        Ok(())
    }

    fn write(&mut self, slot: &Slot, value: Value) {
        match slot {
            Slot::Field { target, name } => {
                if let Instance::Object { fields, .. } = self.graph.get_mut(*target) {
                    fields.insert(name.clone(), value);
                }
            }
            Slot::Index { target, index } => match self.graph.get_mut(*target) {
                Instance::Array { items, .. } | Instance::List { items, .. } => {
                    match items.get_mut(*index) {
                        Some(slot) => *slot = value,
                        None => items.push(value),
                    }
                }
                _ => {}
            },
            Slot::SetItem { target } => {
                if let Instance::Set { items, .. } = self.graph.get_mut(*target) {
                    items.insert(value);
                }
            }
            Slot::MapKey { map, index } => {
                if let Some(slot) = self.deferred.get_mut(*map).and_then(|m| m.keys.get_mut(*index)) {
                    *slot = value;
                }
            }
            Slot::MapValue { map, index } => {
                if let Some(slot) = self.deferred.get_mut(*map).and_then(|m| m.values.get_mut(*index)) {
                    *slot = value;
                }
            }
            Slot::Missing { index } => {
                if let Some(record) = self.missing.get_mut(*index) {
                    record.value = value;
                }
            }
        }
    }

    fn alloc(&mut self, instance: Instance) -> ObjId {
        let id = self.graph.alloc(instance);
        if let Instance::Set { sorted: true, .. } = self.graph.get(id) {
            self.sorted_sets.push(id);
        }
        id
    }

    /// A scalar coerced for a position of type `hint`.
    ///
    /// `null` becomes the zero value of primitive positions, and `""` in a non-string scalar
    /// position counts as `null`.
    fn scalar_value(&mut self, scalar: &Scalar, hint: &TypeRef) -> Result<Value> {
        let nullable = matches!(hint, TypeRef::Option(_));
        let blank = matches!(scalar, Scalar::String(s) if s.is_empty());
        match hint.strip_option() {
            TypeRef::Any => Ok(Converter::natural(scalar)),
            TypeRef::Scalar(kind) => {
                if scalar == &Scalar::Null || (blank && *kind != ScalarKind::String) {
                    return Ok(if nullable { Value::Null } else { kind.zero() });
                }
                self.converter.convert(scalar, *kind)
            }
            TypeRef::Bytes => match scalar {
                Scalar::Null => Ok(Value::Null),
                Scalar::String(s) if s.is_empty() => Ok(Value::Null),
                Scalar::String(s) => {
                    let bytes = decode_base64(s)?;
                    Ok(Value::Object(self.alloc(Instance::Bytes(bytes))))
                }
                other => Err(JsonIoError::conversion(other.kind_name(), "byte[]", "expected base64 text or an array")),
            },
            TypeRef::Enum(def) => match scalar {
                Scalar::Null => Ok(Value::Null),
                Scalar::String(s) if s.trim().is_empty() => Ok(Value::Null),
                Scalar::String(s) => def
                    .value(s)
                    .map_err(|reason| JsonIoError::conversion(format!("string {scalar}"), def.name(), reason)),
                other => Err(JsonIoError::conversion(
                    format!("{} {other}", other.kind_name()),
                    def.name(),
                    "expected a variant name",
                )),
            },
            _ if scalar == &Scalar::Null || blank => Ok(Value::Null),
            other => Err(JsonIoError::conversion(
                format!("{} {scalar}", scalar.kind_name()),
                other.to_string(),
                "expected an object or array",
            )),
        }
    }

    /// An array, list or set instance sized for `len` elements, or bytes decoded directly.
    fn create_sequence(&mut self, nodes: &[Node], ty: &TypeRef) -> Result<Option<(ObjId, bool)>> {
        let len = nodes.len();
        let instance = match ty {
            TypeRef::Any => Instance::Array {
                component: TypeRef::Any,
                items: vec![Value::Null; len],
            },
            TypeRef::Array(component) => Instance::Array {
                component: (**component).clone(),
                items: vec![component.zero(); len],
            },
            TypeRef::List(element) => Instance::List {
                element: (**element).clone(),
                items: vec![element.zero(); len],
            },
            TypeRef::Set { element, sorted } => Instance::Set {
                element: (**element).clone(),
                sorted: *sorted,
                items: IndexSet::with_capacity(len),
            },
            TypeRef::Bytes => {
                let bytes = bytes_from_numbers(nodes)?;
                return Ok(Some((self.alloc(Instance::Bytes(bytes)), true)));
            }
            _ => return Ok(None),
        };
        Ok(Some((self.alloc(instance), len == 0)))
    }

    /// Instances whose shape follows from the type alone: logical primitives in object form,
    /// containers and untyped objects. `None` for record types.
    fn create_structural(
        &mut self,
        node: &ObjectNode,
        ty: &TypeRef,
        untyped_tag: Option<String>,
    ) -> Result<Option<(Value, bool)>> {
        let created = match ty.strip_option() {
            TypeRef::Scalar(kind) => {
                let value = match node.get("value") {
                    Some(Node::Scalar(s)) => self.scalar_value(s, &TypeRef::Scalar(*kind))?,
                    None if node.entries.is_empty() => kind.zero(),
                    _ => {
                        return Err(JsonIoError::conversion(
                            "object",
                            kind.name(),
                            "expected a scalar 'value' entry",
                        ));
                    }
                };
                (value, true)
            }
            TypeRef::Enum(def) => {
                let value = match node.get("name") {
                    Some(Node::Scalar(s @ Scalar::String(_))) => {
                        self.scalar_value(s, &TypeRef::Enum(Arc::clone(def)))?
                    }
                    _ => {
                        return Err(JsonIoError::conversion(
                            "object",
                            def.name(),
                            "expected a string 'name' entry",
                        ));
                    }
                };
                (value, true)
            }
            TypeRef::Bytes => {
                let bytes = match (node.items.as_deref(), node.get("value")) {
                    (Some(items), _) => bytes_from_numbers(items)?,
                    (None, Some(Node::Scalar(Scalar::String(s)))) => decode_base64(s)?,
                    _ => Vec::new(),
                };
                (Value::Object(self.alloc(Instance::Bytes(bytes))), true)
            }
            seq @ (TypeRef::Array(_) | TypeRef::List(_) | TypeRef::Set { .. }) => {
                let items = node.items.as_deref().unwrap_or(&[]);
                match self.create_sequence(items, seq)? {
                    Some((id, _)) => (Value::Object(id), false),
                    None => return Ok(None),
                }
            }
            TypeRef::Map { key, value, sorted } => {
                let id = self.alloc(Instance::Map {
                    key: (**key).clone(),
                    value: (**value).clone(),
                    sorted: *sorted,
                    entries: IndexMap::new(),
                });
                (Value::Object(id), false)
            }
            TypeRef::Any if node.is_map_shaped() => {
                let id = self.alloc(Instance::Map {
                    key: TypeRef::Any,
                    value: TypeRef::Any,
                    sorted: false,
                    entries: IndexMap::new(),
                });
                (Value::Object(id), false)
            }
            TypeRef::Any if node.is_collection_shaped() => {
                let items = node.items.as_deref().unwrap_or(&[]);
                match self.create_sequence(items, &TypeRef::Any)? {
                    Some((id, _)) => (Value::Object(id), false),
                    None => return Ok(None),
                }
            }
            TypeRef::Any => {
                let id = self.alloc(Instance::Object {
                    ty: untyped_tag,
                    fields: IndexMap::new(),
                });
                (Value::Object(id), false)
            }
            TypeRef::Named(_) | TypeRef::Option(_) => return Ok(None),
        };
        Ok(Some(created))
    }

    fn record_missing(&mut self, target: ObjId, name: &str) -> Result<usize> {
        let limit = self.options.max_missing_fields;
        if self.missing.len() >= limit {
            return Err(JsonIoError::LimitExceeded {
                what: "missing fields",
                limit,
            });
        }
        if limit != usize::MAX && self.missing.len() + 1 == limit - limit / 10 {
            warn!("{} of at most {limit} missing fields recorded", self.missing.len() + 1);
        }
        self.missing.push(MissingField {
            target,
            name: name.to_string(),
            value: Value::Null,
        });
        Ok(self.missing.len() - 1)
    }
}

/// `{"@type":"object","value":x}` stands for `x` itself.
fn collapsed_value(node: &ObjectNode) -> Option<Value> {
    match (node.entries.len(), node.get("value"), &node.keys, &node.items) {
        (1, Some(Node::Scalar(s)), None, None) => Some(Converter::natural(s)),
        _ => None,
    }
}

fn decode_base64(text: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| JsonIoError::conversion("string", "byte[]", e.to_string()))
}

fn bytes_from_numbers(nodes: &[Node]) -> Result<Vec<u8>> {
    nodes
        .iter()
        .map(|n| match n {
            Node::Scalar(s) => match s.as_i64() {
                Some(i @ -128..=255) => Ok(i as u8),
                _ => Err(JsonIoError::conversion(s.kind_name(), "byte", format!("{s} is not a byte"))),
            },
            _ => Err(JsonIoError::conversion("object", "byte", "expected a number")),
        })
        .collect()
}

/// The resolution skeleton.
///
/// Implementors supply instance creation and field traversal for their flavor; everything else
/// (work stack, forward references, map assembly, missing-field notification and cleanup) is
/// shared.
pub trait Resolver<'a> {
    /// Shared state.
    fn core(&mut self) -> &mut ResolveCore<'a>;

    /// Build the instance an object node stands for at a position of type `hint`. The flag
    /// is `true` when the instance needs no further population.
    fn create_instance(&mut self, node: &ObjectNode, hint: &TypeRef) -> Result<(Value, bool)>;

    /// Assign the entries of `node` to the fields of `target`.
    fn traverse_fields(&mut self, node: NodeId, target: ObjId) -> Result<()>;

    /// Called for each map once its entries are final.
    fn finish_map(&mut self, _target: ObjId) {}

    /// Resolve the document root for a position of type `hint`.
    fn resolve(&mut self, hint: &TypeRef) -> Result<Value> {
        let root = self.core().doc.root().clone();
        self.resolve_node(&root, hint)
    }

    /// Resolve `root`, then patch, rehash, notify and clean up. Resolving a node that already
    /// finished returns its existing target untouched.
    fn resolve_node(&mut self, root: &Node, hint: &TypeRef) -> Result<Value> {
        let mut root = root.clone();
        if let Node::Object(nid) = root {
            let core = self.core();
            if let Some(ref_id) = core.doc.object(nid).ref_id {
                let depth = core.options.max_reference_chain_depth;
                root = Node::Object(core.refs.get_or_throw(ref_id, &core.doc, depth)?);
            }
        }
        if let Node::Object(nid) = root {
            let state = &self.core().nodes[nid.index()];
            if state.finished {
                if let Some(target) = &state.target {
                    debug!("Node #{} already resolved", nid.index());
                    return Ok(target.clone());
                }
            }
        }

        let result = self.value_for(&root, hint).and_then(|resolution| {
            let value = match resolution {
                Resolution::Ready(value) => value,
                Resolution::Forward(id) => return Err(JsonIoError::DanglingReference { id }),
            };
            self.patch()?;
            self.rehash()?;
            self.notify();
            Ok(value)
        });
        self.cleanup();
        result
    }

    /// What `node` stands for at a position of type `hint`. New instances are created here
    /// and queued for population.
    fn value_for(&mut self, node: &Node, hint: &TypeRef) -> Result<Resolution> {
        let value = match node {
            Node::Scalar(s) => self.core().scalar_value(s, hint)?,
            Node::EmptyObject => {
                let (value, _) = self.create_instance(&ObjectNode::default(), hint)?;
                value
            }
            Node::EmptyArray => self.sequence_for(&[], None, hint)?,
            Node::Array(aid) => {
                if let Some(existing) = &self.core().arrays[aid.index()] {
                    return Ok(Resolution::Ready(existing.clone()));
                }
                let doc = Arc::clone(&self.core().doc);
                let value = self.sequence_for(doc.array(*aid), Some(*aid), hint)?;
                self.core().arrays[aid.index()] = Some(value.clone());
                value
            }
            Node::Object(nid) => return self.object_value(*nid, hint),
        };
        Ok(Resolution::Ready(value))
    }

    /// A JSON array at a position of type `hint`.
    fn sequence_for(&mut self, nodes: &[Node], source: Option<ArrayId>, hint: &TypeRef) -> Result<Value> {
        let ty = hint.strip_option();
        let core = self.core();
        let Some((target, finished)) = core.create_sequence(nodes, ty)? else {
            return Err(JsonIoError::conversion("array", ty.to_string(), "an array can't fill this type"));
        };
        if let (Some(aid), false) = (source, finished) {
            core.push(Work::Items {
                source: ItemSource::Array(aid),
                target,
            })?;
        }
        Ok(Value::Object(target))
    }

    /// An object node: a reference, an already created instance or a new one.
    fn object_value(&mut self, nid: NodeId, hint: &TypeRef) -> Result<Resolution> {
        let doc = Arc::clone(&self.core().doc);
        let node = doc.object(nid);
        if let Some(ref_id) = node.ref_id {
            let core = self.core();
            let depth = core.options.max_reference_chain_depth;
            let resolved = core
                .refs
                .get(ref_id, &doc, depth)?
                .and_then(|t| core.nodes[t.index()].target.clone());
            return Ok(match resolved {
                Some(value) => Resolution::Ready(value),
                None => Resolution::Forward(ref_id),
            });
        }
        if let Some(existing) = &self.core().nodes[nid.index()].target {
            return Ok(Resolution::Ready(existing.clone()));
        }

        let (value, finished) = self.create_instance(node, hint)?;
        trace!(
            "Created {} for node #{} ({})",
            value.blue(),
            nid.index(),
            hint.yellow()
        );
        let core = self.core();
        core.nodes[nid.index()] = NodeState {
            target: Some(value.clone()),
            finished,
        };
        match value.as_object() {
            Some(target) if !finished => core.push(Work::Node { node: nid, target })?,
            _ => core.nodes[nid.index()].finished = true,
        }
        Ok(Resolution::Ready(value))
    }

    /// Resolve `child` for a field of type `ty` and store it, or defer it.
    fn assign_field(&mut self, target: ObjId, name: &str, ty: &TypeRef, child: &Node) -> Result<()> {
        let slot = Slot::Field {
            target,
            name: name.to_string(),
        };
        match self.value_for(child, ty)? {
            Resolution::Ready(value) => self.core().write(&slot, value),
            Resolution::Forward(id) => {
                let core = self.core();
                core.write(&slot, ty.zero());
                core.defer(slot, id)?;
            }
        }
        Ok(())
    }

    /// Record a field `target`'s type doesn't have. The value is still resolved so the
    /// notification carries it.
    fn missing_field(&mut self, target: ObjId, name: &str, child: &Node) -> Result<()> {
        trace!("No field {} on {}", name.bright_red(), target);
        let index = self.core().record_missing(target, name)?;
        let slot = Slot::Missing { index };
        match self.value_for(child, &TypeRef::Any)? {
            Resolution::Ready(value) => self.core().write(&slot, value),
            Resolution::Forward(id) => self.core().defer(slot, id)?,
        }
        Ok(())
    }

    /// Drain the work stack.
    fn traverse(&mut self) -> Result<()> {
        while let Some(work) = self.core().stack.pop() {
            trace!("Work {:?}", work.bright_green());
            match work {
                Work::Node { node, target } => {
                    match self.core().graph.get(target) {
                        Instance::Object { .. } => self.traverse_fields(node, target)?,
                        Instance::Array { .. } | Instance::List { .. } | Instance::Set { .. } => {
                            self.traverse_items(ItemSource::Items(node), target)?
                        }
                        Instance::Map { .. } => self.traverse_map(node, target)?,
                        Instance::Bytes(_) => {}
                    }
                    self.core().nodes[node.index()].finished = true;
                }
                Work::Items { source, target } => self.traverse_items(source, target)?,
            }
        }
        Ok(())
    }

    /// Fill an array, list or set in document order. Forward references leave the slot at its
    /// placeholder (or, for sets, leave the element out) until patched.
    fn traverse_items(&mut self, source: ItemSource, target: ObjId) -> Result<()> {
        let doc = Arc::clone(&self.core().doc);
        let nodes = match source {
            ItemSource::Array(aid) => doc.array(aid),
            ItemSource::Items(nid) => doc.object(nid).items.as_deref().unwrap_or(&[]),
        };
        let (element, is_set) = match self.core().graph.get(target) {
            Instance::Array { component, .. } => (component.clone(), false),
            Instance::List { element, .. } => (element.clone(), false),
            Instance::Set { element, .. } => (element.clone(), true),
            _ => return Ok(()),
        };
        for (index, child) in nodes.iter().enumerate() {
            let slot = if is_set {
                Slot::SetItem { target }
            } else {
                Slot::Index { target, index }
            };
            match self.value_for(child, &element)? {
                Resolution::Ready(value) => self.core().write(&slot, value),
                Resolution::Forward(id) => self.core().defer(slot, id)?,
            }
        }
        Ok(())
    }

    /// Resolve a map's keys and values into a deferred entry; the map itself is assembled by
    /// [`rehash`](Self::rehash). A plain object stands for a map keyed by its entry names.
    fn traverse_map(&mut self, nid: NodeId, target: ObjId) -> Result<()> {
        let doc = Arc::clone(&self.core().doc);
        let node = doc.object(nid);
        let (key_ty, value_ty) = match self.core().graph.get(target) {
            Instance::Map { key, value, .. } => (key.clone(), value.clone()),
            _ => return Ok(()),
        };

        let synthesized: Vec<Node>;
        let (keys, values): (&[Node], Vec<&Node>) = match &node.keys {
            Some(keys) => {
                let values = node.items.as_deref().unwrap_or(&[]);
                if keys.len() != values.len() {
                    return Err(JsonIoError::syntax(
                        SyntaxErrorKind::InvalidMeta {
                            key: meta::KEYS,
                            reason: format!(
                                "{} keys but {} items",
                                keys.len(),
                                values.len()
                            ),
                        },
                        node.pos,
                        String::new(),
                    ));
                }
                (keys.as_slice(), values.iter().collect())
            }
            None => {
                synthesized = node
                    .entries
                    .keys()
                    .map(|k| Node::Scalar(Scalar::String(k.clone())))
                    .collect();
                (synthesized.as_slice(), node.entries.values().collect())
            }
        };

        let core = self.core();
        if core.deferred.len() >= core.options.max_maps_to_rehash {
            return Err(JsonIoError::LimitExceeded {
                what: "maps to rehash",
                limit: core.options.max_maps_to_rehash,
            });
        }
        let map = core.deferred.len();
        core.deferred.push(DeferredMap {
            target,
            keys: vec![Value::Null; keys.len()],
            values: vec![Value::Null; keys.len()],
        });

        for (index, (key, value)) in keys.iter().zip(values).enumerate() {
            for (child, ty, slot) in [
                (key, &key_ty, Slot::MapKey { map, index }),
                (value, &value_ty, Slot::MapValue { map, index }),
            ] {
                match self.value_for(child, ty)? {
                    Resolution::Ready(v) => self.core().write(&slot, v),
                    Resolution::Forward(id) => self.core().defer(slot, id)?,
                }
            }
        }
        Ok(())
    }

    /// Write every deferred reference into its slot. Targets that were never reached during
    /// traversal are created on demand; doing so can queue more work, so this repeats until
    /// nothing is left.
    fn patch(&mut self) -> Result<()> {
        loop {
            self.traverse()?;
            let pending = core::mem::take(&mut self.core().unresolved);
            if pending.is_empty() {
                return Ok(());
            }
            debug!("Patching {} forward references", pending.len());
            for reference in pending {
                let core = self.core();
                let depth = core.options.max_reference_chain_depth;
                let target_node = core.refs.get_or_throw(reference.target_id, &core.doc, depth)?;
                let value = match core.nodes[target_node.index()].target.clone() {
                    Some(value) => value,
                    None => {
                        trace!("Materializing orphan node #{}", target_node.index());
                        match self.value_for(&Node::Object(target_node), &TypeRef::Any)? {
                            Resolution::Ready(value) => value,
                            Resolution::Forward(id) => return Err(JsonIoError::DanglingReference { id }),
                        }
                    }
                };
                self.core().write(&reference.slot, value);
            }
        }
    }

    /// Assemble deferred maps from their resolved keys and values, and sort sorted sets.
    fn rehash(&mut self) -> Result<()> {
        let deferred = core::mem::take(&mut self.core().deferred);
        debug!("Rehashing {} maps", deferred.len());
        for map in deferred {
            if let Instance::Map { entries, sorted, .. } = self.core().graph.get_mut(map.target) {
                entries.clear();
                entries.extend(map.keys.into_iter().zip(map.values));
                if *sorted {
                    entries.sort_keys();
                }
            }
            self.finish_map(map.target);
        }
        let sorted_sets = core::mem::take(&mut self.core().sorted_sets);
        for set in sorted_sets {
            if let Instance::Set { items, .. } = self.core().graph.get_mut(set) {
                items.sort();
            }
        }
        Ok(())
    }

    /// Report missing fields to the configured handler, in the order they were met.
    fn notify(&mut self) {
        let core = self.core();
        let missing = core::mem::take(&mut core.missing);
        let Some(handler) = core.options.missing_field_handler.clone() else {
            return;
        };
        debug!("Reporting {} missing fields", missing.len());
        for record in &missing {
            handler.field_missing(&core.graph, record.target, &record.name, &record.value);
        }
    }

    /// Drop every piece of per-call state except the graph and node targets.
    fn cleanup(&mut self) {
        let core = self.core();
        core.refs.clear();
        core.stack.clear();
        core.unresolved.clear();
        core.deferred.clear();
        core.sorted_sets.clear();
        core.missing.clear();
    }
}
