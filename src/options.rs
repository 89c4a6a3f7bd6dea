//! Read and write configuration.

use core::fmt;
use std::sync::Arc;

use crate::graph::{Graph, ObjId, Value};
use crate::types::TypeRef;

/// Receives fields that had no counterpart on the target type, once per field, after the whole
/// graph has been resolved.
pub trait MissingFieldHandler: Send + Sync {
    /// `target` is the object the field was read for, `value` the resolved field value.
    fn field_missing(&self, graph: &Graph, target: ObjId, field: &str, value: &Value);
}

impl<F> MissingFieldHandler for F
where
    F: Fn(&Graph, ObjId, &str, &Value) + Send + Sync,
{
    fn field_missing(&self, graph: &Graph, target: ObjId, field: &str, value: &Value) {
        self(graph, target, field, value)
    }
}

/// Options for parsing and resolving.
///
/// Every `max_*` limit is checked while the document is read or resolved and raises
/// [`crate::JsonIoError::LimitExceeded`] (or a depth syntax error) when hit.
#[derive(Clone)]
pub struct ReadOptions {
    /// Maximum nesting of objects and arrays.
    pub max_depth: usize,
    /// Accept bare `NaN`, `Infinity` and `-Infinity`.
    pub allow_nan_and_infinity: bool,
    /// Largest accepted absolute value of `@id` / `@ref`.
    pub max_id_value: i64,
    /// Maximum number of objects carrying an `@id`.
    pub max_object_references: usize,
    /// Maximum length of a chain of references to references.
    pub max_reference_chain_depth: usize,
    /// Maximum number of pending forward references.
    pub max_unresolved_references: usize,
    /// Maximum number of recorded missing fields.
    pub max_missing_fields: usize,
    /// Maximum size of the resolver's work stack.
    pub max_stack_depth: usize,
    /// Maximum number of maps whose entries are held back until references are patched.
    pub max_maps_to_rehash: usize,
    /// Raise an error for unknown `@type` names instead of falling back to [`Self::unknown_type`].
    pub fail_on_unknown_type: bool,
    /// Type used for objects whose `@type` is unknown. `None` means untyped object.
    pub unknown_type: Option<TypeRef>,
    /// When no constructor accepts the input, build the record from field defaults.
    pub allow_default_instantiation: bool,
    /// Sink for fields with no counterpart on the target type.
    pub missing_field_handler: Option<Arc<dyn MissingFieldHandler>>,
    /// Number of trailing characters kept for syntax error snippets.
    pub snippet_len: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            max_depth: 1000,
            allow_nan_and_infinity: false,
            max_id_value: 1_000_000_000,
            max_object_references: 100_000_000,
            max_reference_chain_depth: 100_000,
            max_unresolved_references: usize::MAX,
            max_missing_fields: usize::MAX,
            max_stack_depth: usize::MAX,
            max_maps_to_rehash: usize::MAX,
            fail_on_unknown_type: false,
            unknown_type: None,
            allow_default_instantiation: false,
            missing_field_handler: None,
            snippet_len: 256,
        }
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("max_depth", &self.max_depth)
            .field("allow_nan_and_infinity", &self.allow_nan_and_infinity)
            .field("max_id_value", &self.max_id_value)
            .field("max_object_references", &self.max_object_references)
            .field("max_reference_chain_depth", &self.max_reference_chain_depth)
            .field("max_unresolved_references", &self.max_unresolved_references)
            .field("max_missing_fields", &self.max_missing_fields)
            .field("max_stack_depth", &self.max_stack_depth)
            .field("max_maps_to_rehash", &self.max_maps_to_rehash)
            .field("fail_on_unknown_type", &self.fail_on_unknown_type)
            .field("unknown_type", &self.unknown_type)
            .field("allow_default_instantiation", &self.allow_default_instantiation)
            .field("missing_field_handler", &self.missing_field_handler.is_some())
            .field("snippet_len", &self.snippet_len)
            .finish()
    }
}

impl ReadOptions {
    /// Set [`Self::max_depth`].
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set [`Self::allow_nan_and_infinity`].
    pub fn allow_nan_and_infinity(mut self, allow: bool) -> Self {
        self.allow_nan_and_infinity = allow;
        self
    }

    /// Set [`Self::max_id_value`].
    pub fn max_id_value(mut self, max: i64) -> Self {
        self.max_id_value = max;
        self
    }

    /// Set [`Self::max_object_references`].
    pub fn max_object_references(mut self, max: usize) -> Self {
        self.max_object_references = max;
        self
    }

    /// Set [`Self::max_reference_chain_depth`].
    pub fn max_reference_chain_depth(mut self, max: usize) -> Self {
        self.max_reference_chain_depth = max;
        self
    }

    /// Set [`Self::max_unresolved_references`].
    pub fn max_unresolved_references(mut self, max: usize) -> Self {
        self.max_unresolved_references = max;
        self
    }

    /// Set [`Self::max_missing_fields`].
    pub fn max_missing_fields(mut self, max: usize) -> Self {
        self.max_missing_fields = max;
        self
    }

    /// Set [`Self::max_stack_depth`].
    pub fn max_stack_depth(mut self, max: usize) -> Self {
        self.max_stack_depth = max;
        self
    }

    /// Set [`Self::max_maps_to_rehash`].
    pub fn max_maps_to_rehash(mut self, max: usize) -> Self {
        self.max_maps_to_rehash = max;
        self
    }

    /// Set [`Self::fail_on_unknown_type`].
    pub fn fail_on_unknown_type(mut self, fail: bool) -> Self {
        self.fail_on_unknown_type = fail;
        self
    }

    /// Set [`Self::unknown_type`].
    pub fn unknown_type(mut self, ty: TypeRef) -> Self {
        self.unknown_type = Some(ty);
        self
    }

    /// Set [`Self::allow_default_instantiation`].
    pub fn allow_default_instantiation(mut self, allow: bool) -> Self {
        self.allow_default_instantiation = allow;
        self
    }

    /// Install a [`MissingFieldHandler`].
    pub fn missing_field_handler(mut self, handler: impl MissingFieldHandler + 'static) -> Self {
        self.missing_field_handler = Some(Arc::new(handler));
        self
    }

    /// Set [`Self::snippet_len`].
    pub fn snippet_len(mut self, len: usize) -> Self {
        self.snippet_len = len;
        self
    }
}

/// When the writer emits `@type`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TypeInfo {
    /// On every object.
    Always,
    /// Only where the declared type at that position does not determine the instance type.
    #[default]
    Minimal,
    /// Never. The output can then only be read back with an explicit root type and schema.
    Never,
}

/// Options for writing.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// When to emit `@type`.
    pub type_info: TypeInfo,
    /// Use `@i`, `@r`, `@t`, `@k`, `@e` instead of the long meta keys.
    pub short_meta_keys: bool,
    /// Write non-finite floats bare (`NaN`, `Infinity`) instead of `null`.
    pub allow_nan_and_infinity: bool,
    /// Maximum nesting of emitted objects and arrays.
    pub max_depth: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            type_info: TypeInfo::Minimal,
            short_meta_keys: false,
            allow_nan_and_infinity: false,
            max_depth: 1000,
        }
    }
}

impl WriteOptions {
    /// Set [`Self::type_info`].
    pub fn type_info(mut self, type_info: TypeInfo) -> Self {
        self.type_info = type_info;
        self
    }

    /// Set [`Self::short_meta_keys`].
    pub fn short_meta_keys(mut self, short: bool) -> Self {
        self.short_meta_keys = short;
        self
    }

    /// Set [`Self::allow_nan_and_infinity`].
    pub fn allow_nan_and_infinity(mut self, allow: bool) -> Self {
        self.allow_nan_and_infinity = allow;
        self
    }

    /// Set [`Self::max_depth`].
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }
}
