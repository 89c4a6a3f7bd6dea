//! Untyped document tree produced by the parser.
//!
//! Objects and arrays are stored in flat arenas inside a [`Document`] and addressed by
//! [`NodeId`] / [`ArrayId`], so the identity table and the resolver's work stack can point at
//! them without borrowing the tree.

use core::fmt;

use indexmap::IndexMap;
use num_bigint::BigInt;

use crate::references::IdentityTable;
use crate::span::Position;

/// Canonical meta keys and their one-letter aliases.
pub mod meta {
    /// Object identity.
    pub const ID: &str = "@id";
    /// Back-reference.
    pub const REF: &str = "@ref";
    /// Explicit type name.
    pub const TYPE: &str = "@type";
    /// Map keys, parallel to `@items`.
    pub const KEYS: &str = "@keys";
    /// Array / collection elements, or map values when `@keys` is present.
    pub const ITEMS: &str = "@items";

    /// Short form of [`ID`].
    pub const SHORT_ID: &str = "@i";
    /// Short form of [`REF`].
    pub const SHORT_REF: &str = "@r";
    /// Short form of [`TYPE`].
    pub const SHORT_TYPE: &str = "@t";
    /// Short form of [`KEYS`].
    pub const SHORT_KEYS: &str = "@k";
    /// Short form of [`ITEMS`].
    pub const SHORT_ITEMS: &str = "@e";

    /// Expand a short alias to its canonical key; other keys are returned unchanged.
    pub fn expand(key: &str) -> Option<&'static str> {
        match key {
            SHORT_ID | ID => Some(ID),
            SHORT_REF | REF => Some(REF),
            SHORT_TYPE | TYPE => Some(TYPE),
            SHORT_KEYS | KEYS => Some(KEYS),
            SHORT_ITEMS | ITEMS => Some(ITEMS),
            _ => None,
        }
    }

    /// Keys that can be written as a plain object member without being mistaken for meta
    /// data on the way back in.
    pub fn is_plain_key(key: &str) -> bool {
        !key.starts_with('@')
    }
}

/// A JSON scalar as read from the input, before any type coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Integral number that fits in an `i64`.
    Int(i64),
    /// Integral number too large for an `i64`.
    BigInt(BigInt),
    /// Number written with a fraction or exponent (or NaN/Infinity in relaxed mode).
    Float(f64),
    /// String literal, unescaped.
    String(String),
}

impl Scalar {
    /// Short description used in conversion errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "boolean",
            Scalar::Int(_) => "integer",
            Scalar::BigInt(_) => "big integer",
            Scalar::Float(_) => "float",
            Scalar::String(_) => "string",
        }
    }

    /// The string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    /// The integral payload, if this is a number without fraction that fits an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::BigInt(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x:?}"),
            Scalar::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Index of an [`ObjectNode`] inside its [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Position of the node in the document's object arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of an array inside its [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(pub(crate) u32);

impl ArrayId {
    /// Position of the array in the document's array arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Scalar leaf.
    Scalar(Scalar),
    /// Non-empty array.
    Array(ArrayId),
    /// Non-empty object.
    Object(NodeId),
    /// `[]`, kept as a sentinel so no arena slot is spent on it.
    EmptyArray,
    /// `{}`, kept as a sentinel so no arena slot is spent on it.
    EmptyObject,
}

impl Node {
    /// `true` for `null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Node::Scalar(Scalar::Null))
    }
}

/// A JSON object with its meta keys pulled out of the ordinary entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectNode {
    /// Non-meta entries in document order.
    pub entries: IndexMap<String, Node>,
    /// `@id`, only when positive.
    pub id: Option<i64>,
    /// `@type`, as written (aliases are resolved later).
    pub type_tag: Option<String>,
    /// `@ref`, set on pure back-references.
    pub ref_id: Option<i64>,
    /// `@keys`, parallel to `items`.
    pub keys: Option<Vec<Node>>,
    /// `@items`.
    pub items: Option<Vec<Node>>,
    /// Where the opening brace was.
    pub pos: Position,
}

impl ObjectNode {
    /// A pure back-reference: `{"@ref": n}`.
    pub fn is_reference(&self) -> bool {
        self.ref_id.is_some()
    }

    /// Carries `@keys` (and therefore map-shaped `@items`).
    pub fn is_map_shaped(&self) -> bool {
        self.keys.is_some()
    }

    /// Carries `@items` without `@keys`.
    pub fn is_collection_shaped(&self) -> bool {
        self.items.is_some() && self.keys.is_none()
    }

    /// Look up a non-meta entry.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries.get(key)
    }
}

/// Parsed document: object and array arenas, the root value and the identity table.
#[derive(Debug, Default)]
pub struct Document {
    pub(crate) objects: Vec<ObjectNode>,
    pub(crate) arrays: Vec<Vec<Node>>,
    pub(crate) root: Option<Node>,
    pub(crate) references: IdentityTable,
}

impl Document {
    /// The root value. `null` for a document that has not been filled by the parser.
    pub fn root(&self) -> &Node {
        const NULL: &Node = &Node::Scalar(Scalar::Null);
        self.root.as_ref().unwrap_or(NULL)
    }

    /// An object node by id.
    pub fn object(&self, id: NodeId) -> &ObjectNode {
        &self.objects[id.index()]
    }

    /// Array elements by id.
    pub fn array(&self, id: ArrayId) -> &[Node] {
        &self.arrays[id.index()]
    }

    /// Number of object nodes.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// The identity table built while parsing.
    pub fn references(&self) -> &IdentityTable {
        &self.references
    }

    pub(crate) fn alloc_object(&mut self, node: ObjectNode) -> NodeId {
        let id = NodeId(self.objects.len() as u32);
        self.objects.push(node);
        id
    }

    pub(crate) fn alloc_array(&mut self, items: Vec<Node>) -> ArrayId {
        let id = ArrayId(self.arrays.len() as u32);
        self.arrays.push(items);
        id
    }

    pub(crate) fn object_mut(&mut self, id: NodeId) -> &mut ObjectNode {
        &mut self.objects[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_aliases_expand() {
        assert_eq!(meta::expand("@t"), Some(meta::TYPE));
        assert_eq!(meta::expand("@i"), Some(meta::ID));
        assert_eq!(meta::expand("@r"), Some(meta::REF));
        assert_eq!(meta::expand("@k"), Some(meta::KEYS));
        assert_eq!(meta::expand("@e"), Some(meta::ITEMS));
        assert_eq!(meta::expand("@items"), Some(meta::ITEMS));
        assert_eq!(meta::expand("@x"), None);
        assert_eq!(meta::expand("name"), None);
    }

    #[test]
    fn integral_floats_are_usable_as_ids() {
        assert_eq!(Scalar::Float(3.0).as_i64(), Some(3));
        assert_eq!(Scalar::Float(3.5).as_i64(), None);
        assert_eq!(Scalar::String("3".into()).as_i64(), None);
    }
}
