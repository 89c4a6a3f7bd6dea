#![warn(missing_docs)]
#![warn(clippy::std_instead_of_core)]
#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

use std::io::Read;

mod constructor;
mod convert;
mod error;
mod graph;
mod lru;
mod node;
mod options;
mod parser;
mod reader;
mod references;
mod reflect;
mod registry;
mod resolver;
mod span;
mod types;
mod writer;

pub use constructor::{Choice, ConstructorCache, match_arguments};
pub use convert::{ConvertFn, Converter};
pub use error::*;
pub use graph::{Graph, Instance, ObjId, Value};
pub use lru::{LruCache, SyncLruCache};
pub use node::{ArrayId, Document, Node, NodeId, ObjectNode, Scalar, meta};
pub use options::{MissingFieldHandler, ReadOptions, TypeInfo, WriteOptions};
pub use parser::{parse_reader, parse_str};
pub use references::IdentityTable;
pub use reflect::extract;
pub use registry::{ClassFactory, DEFAULT_CONSTRUCTOR_CACHE, FactoryContext, TypeRegistry};
pub use resolver::{MapResolver, MissingField, ObjectResolver, ResolveCore, Resolution, Resolved, Resolver};
pub use span::*;
pub use types::{
    Constructor, ConstructorFn, EnumDef, FieldDescriptor, Param, ScalarKind, TypeDef, TypeRef, Visibility,
};
pub use writer::{Writer, write_graph};

/// Read `json` into typed instances. `hint` is the type expected at the root; an `@type` on
/// the root object takes precedence.
pub fn read_graph(
    json: &str,
    registry: &TypeRegistry,
    options: &ReadOptions,
    hint: &TypeRef,
) -> Result<Resolved> {
    let doc = parse_str(json, options)?;
    resolve_typed(doc, registry, options, hint)
}

/// [`read_graph`] over a byte stream.
pub fn read_graph_reader<R: Read>(
    reader: R,
    registry: &TypeRegistry,
    options: &ReadOptions,
    hint: &TypeRef,
) -> Result<Resolved> {
    let doc = parse_reader(reader, options)?;
    resolve_typed(doc, registry, options, hint)
}

/// Read `json` without a schema: objects stay untyped, `@keys`/`@items` become maps and
/// arrays.
pub fn read_maps(json: &str, options: &ReadOptions) -> Result<Resolved> {
    let doc = parse_str(json, options)?;
    resolve_untyped(doc, options)
}

/// [`read_maps`] over a byte stream.
pub fn read_maps_reader<R: Read>(reader: R, options: &ReadOptions) -> Result<Resolved> {
    let doc = parse_reader(reader, options)?;
    resolve_untyped(doc, options)
}

fn resolve_typed(
    doc: Document,
    registry: &TypeRegistry,
    options: &ReadOptions,
    hint: &TypeRef,
) -> Result<Resolved> {
    let mut resolver = ObjectResolver::new(doc, registry, options);
    let root = resolver.resolve(hint)?;
    Ok(Resolved {
        graph: resolver.into_graph(),
        root,
    })
}

fn resolve_untyped(doc: Document, options: &ReadOptions) -> Result<Resolved> {
    let converter = Converter::default();
    let mut resolver = MapResolver::new(doc, options, &converter);
    let root = resolver.resolve(&TypeRef::Any)?;
    Ok(Resolved {
        graph: resolver.into_graph(),
        root,
    })
}
