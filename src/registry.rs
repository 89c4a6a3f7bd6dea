//! Long-lived, shareable knowledge about types.

use std::sync::Arc;

use indexmap::IndexMap;
use log::debug;
use rustc_hash::FxHashMap;

use crate::constructor::{self, ConstructorCache};
use crate::convert::Converter;
use crate::error::{JsonIoError, Result};
use crate::graph::{Graph, Value};
use crate::node::{Document, ObjectNode, Scalar};
use crate::types::{EnumDef, FieldDescriptor, TypeDef, TypeRef};

/// Default number of remembered constructor choices.
pub const DEFAULT_CONSTRUCTOR_CACHE: usize = 1000;

/// What a [`ClassFactory`] can reach while building an instance.
pub struct FactoryContext<'a> {
    /// The graph being built. Factories allocate their instances here.
    pub graph: &'a mut Graph,
    /// The parsed document, for reading nested nodes.
    pub document: &'a Document,
    /// Scalar conversions.
    pub converter: &'a Converter,
}

impl FactoryContext<'_> {
    /// A scalar entry of `node`, if present.
    pub fn scalar<'n>(&self, node: &'n ObjectNode, key: &str) -> Option<&'n Scalar> {
        match node.get(key) {
            Some(crate::node::Node::Scalar(s)) => Some(s),
            _ => None,
        }
    }
}

/// Custom construction for one type.
///
/// The returned flag (or [`ClassFactory::is_object_final`]) tells the resolver the instance is
/// complete and its fields must not be traversed.
pub trait ClassFactory: Send + Sync {
    /// Build an instance of `ty` from `node`.
    fn new_instance(
        &self,
        ty: &TypeRef,
        node: &ObjectNode,
        cx: &mut FactoryContext<'_>,
    ) -> Result<(Value, bool)>;

    /// Every instance this factory returns is complete.
    fn is_object_final(&self) -> bool {
        false
    }
}

/// Type definitions, aliases, factories, conversions and the constructor cache.
///
/// A registry is meant to be built once and shared (`Arc<TypeRegistry>`) between any number of
/// concurrent reads; only the constructor cache mutates, behind a lock.
pub struct TypeRegistry {
    types: FxHashMap<String, Arc<TypeDef>>,
    enums: FxHashMap<String, Arc<EnumDef>>,
    aliases: FxHashMap<String, String>,
    factories: FxHashMap<String, Arc<dyn ClassFactory>>,
    converter: Converter,
    constructors: ConstructorCache,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_cache_capacity(DEFAULT_CONSTRUCTOR_CACHE)
    }
}

impl core::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut types: Vec<_> = self.types.keys().collect();
        types.sort();
        let mut enums: Vec<_> = self.enums.keys().collect();
        enums.sort();
        let mut factories: Vec<_> = self.factories.keys().collect();
        factories.sort();
        f.debug_struct("TypeRegistry")
            .field("types", &types)
            .field("enums", &enums)
            .field("aliases", &self.aliases.len())
            .field("factories", &factories)
            .finish_non_exhaustive()
    }
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry remembering at most `capacity` constructor choices.
    pub fn with_cache_capacity(capacity: usize) -> Self {
        Self {
            types: FxHashMap::default(),
            enums: FxHashMap::default(),
            aliases: FxHashMap::default(),
            factories: FxHashMap::default(),
            converter: Converter::default(),
            constructors: ConstructorCache::new(capacity),
        }
    }

    /// Register a record type, replacing any previous definition with the same name.
    pub fn register(&mut self, def: TypeDef) -> &mut Self {
        let def = def.finish();
        debug!("Registering type {}", def.name());
        self.types.insert(def.name().to_string(), Arc::new(def));
        self
    }

    /// Register an enumeration. Returns the type to use in field declarations.
    pub fn register_enum(&mut self, def: EnumDef) -> TypeRef {
        debug!("Registering enum {}", def.name());
        let def = Arc::new(def);
        self.enums.insert(def.name().to_string(), Arc::clone(&def));
        TypeRef::Enum(def)
    }

    /// Let `alias` stand for `name` in `@type`.
    pub fn alias(&mut self, alias: impl Into<String>, name: impl Into<String>) -> &mut Self {
        self.aliases.insert(alias.into(), name.into());
        self
    }

    /// Use `factory` for every instance of `ty`.
    pub fn factory(&mut self, ty: &TypeRef, factory: impl ClassFactory + 'static) -> &mut Self {
        self.factories.insert(ty.to_string(), Arc::new(factory));
        self
    }

    /// Scalar conversions.
    pub fn converter(&self) -> &Converter {
        &self.converter
    }

    /// Scalar conversions, for overriding entries.
    pub fn converter_mut(&mut self) -> &mut Converter {
        &mut self.converter
    }

    /// The shared constructor cache.
    pub fn constructor_cache(&self) -> &ConstructorCache {
        &self.constructors
    }

    /// A registered record type.
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        let name = self.aliases.get(name).map(String::as_str).unwrap_or(name);
        self.types.get(name).map(Arc::as_ref)
    }

    /// Fields of a record type, in declaration order.
    pub fn fields_of(&self, name: &str) -> Option<&IndexMap<String, FieldDescriptor>> {
        self.get(name).map(TypeDef::fields)
    }

    /// The factory registered for `ty`.
    pub fn factory_for(&self, ty: &TypeRef) -> Option<&Arc<dyn ClassFactory>> {
        if self.factories.is_empty() {
            return None;
        }
        self.factories.get(&ty.to_string())
    }

    /// Turn an `@type` string into a type, applying aliases. Registered record and enum names
    /// win over scalar and container names, so a record called `Date` is still reachable.
    pub fn resolve_type_name(&self, tag: &str) -> TypeRef {
        let tag = tag.trim();
        let tag = self.aliases.get(tag).map(String::as_str).unwrap_or(tag);
        if self.types.contains_key(tag) {
            return TypeRef::Named(tag.to_string());
        }
        if let Some(def) = self.enums.get(tag) {
            return TypeRef::Enum(Arc::clone(def));
        }
        TypeRef::parse(tag)
    }

    /// `ty` names something the resolver can build: anything but an unregistered record
    /// without a factory.
    pub fn is_known(&self, ty: &TypeRef) -> bool {
        match ty.strip_option() {
            TypeRef::Named(name) => self.get(name).is_some() || self.factory_for(ty).is_some(),
            _ => true,
        }
    }

    /// Run constructor selection for `name` with `args`.
    pub fn instantiate(&self, name: &str, args: &[Scalar]) -> Result<Vec<(String, Value)>> {
        let def = self.get(name).ok_or_else(|| JsonIoError::MissingType {
            name: name.to_string(),
        })?;
        constructor::instantiate(def, args, &self.converter, &self.constructors)
    }
}
