//! Type descriptions: scalar kinds, type references and record definitions.

use core::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::graph::Value;

/// Logical primitive kinds. Values of these kinds carry no identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScalarKind {
    /// `bool`
    Bool,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `f32`
    F32,
    /// `f64`
    F64,
    /// Arbitrary precision integer.
    BigInt,
    /// Single character.
    Char,
    /// String.
    String,
    /// Calendar date.
    Date,
    /// Date and time with offset.
    DateTime,
    /// RFC 4122 UUID.
    Uuid,
}

impl ScalarKind {
    /// Canonical wire name.
    pub const fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I8 => "i8",
            ScalarKind::I16 => "i16",
            ScalarKind::I32 => "i32",
            ScalarKind::I64 => "i64",
            ScalarKind::U8 => "u8",
            ScalarKind::U16 => "u16",
            ScalarKind::U32 => "u32",
            ScalarKind::U64 => "u64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
            ScalarKind::BigInt => "bigint",
            ScalarKind::Char => "char",
            ScalarKind::String => "string",
            ScalarKind::Date => "date",
            ScalarKind::DateTime => "datetime",
            ScalarKind::Uuid => "uuid",
        }
    }

    /// Look up a kind by canonical name or alias, ignoring ASCII case. Atomic wrapper names
    /// map onto the kind they wrap.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        Some(match lower.as_str() {
            "bool" | "boolean" | "atomicbool" | "atomicboolean" => ScalarKind::Bool,
            "i8" | "byte" | "atomici8" => ScalarKind::I8,
            "i16" | "short" | "atomici16" => ScalarKind::I16,
            "i32" | "int" | "integer" | "atomici32" | "atomicinteger" => ScalarKind::I32,
            "i64" | "long" | "atomici64" | "atomiclong" => ScalarKind::I64,
            "u8" | "atomicu8" => ScalarKind::U8,
            "u16" | "atomicu16" => ScalarKind::U16,
            "u32" | "atomicu32" => ScalarKind::U32,
            "u64" | "atomicu64" => ScalarKind::U64,
            "f32" | "float" => ScalarKind::F32,
            "f64" | "double" | "number" => ScalarKind::F64,
            "bigint" | "biginteger" => ScalarKind::BigInt,
            "char" | "character" => ScalarKind::Char,
            "string" | "str" => ScalarKind::String,
            "date" | "localdate" => ScalarKind::Date,
            "datetime" | "zoneddatetime" | "offsetdatetime" => ScalarKind::DateTime,
            "uuid" => ScalarKind::Uuid,
            _ => return None,
        })
    }

    /// Integral kinds, including big integers.
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarKind::I8
                | ScalarKind::I16
                | ScalarKind::I32
                | ScalarKind::I64
                | ScalarKind::U8
                | ScalarKind::U16
                | ScalarKind::U32
                | ScalarKind::U64
                | ScalarKind::BigInt
        )
    }

    /// Integral or floating point.
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }

    /// The value a `null` turns into: zero for primitives, null otherwise.
    pub fn zero(self) -> Value {
        match self {
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::I8 => Value::I8(0),
            ScalarKind::I16 => Value::I16(0),
            ScalarKind::I32 => Value::I32(0),
            ScalarKind::I64 => Value::I64(0),
            ScalarKind::U8 => Value::U8(0),
            ScalarKind::U16 => Value::U16(0),
            ScalarKind::U32 => Value::U32(0),
            ScalarKind::U64 => Value::U64(0),
            ScalarKind::F32 => Value::F32(0.0),
            ScalarKind::F64 => Value::F64(0.0),
            ScalarKind::Char => Value::Char('\0'),
            ScalarKind::BigInt
            | ScalarKind::String
            | ScalarKind::Date
            | ScalarKind::DateTime
            | ScalarKind::Uuid => Value::Null,
        }
    }

    /// Written as a bare JSON scalar and read back without a type hint as the same kind.
    pub const fn is_json_native(self) -> bool {
        matches!(
            self,
            ScalarKind::Bool | ScalarKind::I64 | ScalarKind::F64 | ScalarKind::String
        )
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared type of a field, element, parameter or root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// Anything. Objects default to untyped, numbers to `i64`/`f64`.
    Any,
    /// A logical primitive.
    Scalar(ScalarKind),
    /// Nullable wrapper. Never null-zeroed.
    Option(Box<TypeRef>),
    /// A registered record type.
    Named(String),
    /// One of a fixed set of names.
    Enum(Arc<EnumDef>),
    /// Fixed-length array.
    Array(Box<TypeRef>),
    /// `byte[]`, read from a number array or a base64 string.
    Bytes,
    /// Indexable collection.
    List(Box<TypeRef>),
    /// Set.
    Set {
        /// Element type.
        element: Box<TypeRef>,
        /// Kept in ascending order.
        sorted: bool,
    },
    /// Map.
    Map {
        /// Key type.
        key: Box<TypeRef>,
        /// Value type.
        value: Box<TypeRef>,
        /// Kept in ascending key order.
        sorted: bool,
    },
}

const MAX_TYPE_NESTING: usize = 32;

impl TypeRef {
    /// Shorthand for `TypeRef::Named`.
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    /// Shorthand for `TypeRef::List`.
    pub fn list(element: TypeRef) -> Self {
        TypeRef::List(Box::new(element))
    }

    /// Shorthand for `TypeRef::Array`.
    pub fn array(component: TypeRef) -> Self {
        TypeRef::Array(Box::new(component))
    }

    /// Shorthand for `TypeRef::Option`.
    pub fn option(inner: TypeRef) -> Self {
        TypeRef::Option(Box::new(inner))
    }

    /// Shorthand for an insertion-ordered `TypeRef::Set`.
    pub fn set(element: TypeRef) -> Self {
        TypeRef::Set {
            element: Box::new(element),
            sorted: false,
        }
    }

    /// Shorthand for an insertion-ordered `TypeRef::Map`.
    pub fn map(key: TypeRef, value: TypeRef) -> Self {
        TypeRef::Map {
            key: Box::new(key),
            value: Box::new(value),
            sorted: false,
        }
    }

    /// Parse a type name as written in `@type`: `T[]`, `byte[]`, `list`, `list<T>`, `set`,
    /// `sorted_set`, `map`, `map<K,V>`, `sorted_map`, `option<T>`, `object`, scalar names and
    /// aliases. Anything else is a [`TypeRef::Named`].
    pub fn parse(text: &str) -> Self {
        Self::parse_nested(text.trim(), 0)
    }

    fn parse_nested(text: &str, depth: usize) -> Self {
        if depth > MAX_TYPE_NESTING {
            return TypeRef::Named(text.to_string());
        }
        if let Some(inner) = text.strip_suffix("[]") {
            return match Self::parse_nested(inner.trim(), depth + 1) {
                TypeRef::Scalar(ScalarKind::I8 | ScalarKind::U8) => TypeRef::Bytes,
                component => TypeRef::Array(Box::new(component)),
            };
        }
        if let Some((head, args)) = split_generic(text) {
            let mut args = split_args(args)
                .into_iter()
                .map(|a| Box::new(Self::parse_nested(a, depth + 1)));
            let mut next = || args.next().unwrap_or_else(|| Box::new(TypeRef::Any));
            return match head {
                "list" => TypeRef::List(next()),
                "set" => TypeRef::Set {
                    element: next(),
                    sorted: false,
                },
                "sorted_set" => TypeRef::Set {
                    element: next(),
                    sorted: true,
                },
                "map" => TypeRef::Map {
                    key: next(),
                    value: next(),
                    sorted: false,
                },
                "sorted_map" => TypeRef::Map {
                    key: next(),
                    value: next(),
                    sorted: true,
                },
                "option" => TypeRef::Option(next()),
                _ => TypeRef::Named(text.to_string()),
            };
        }
        match text {
            "object" | "any" => TypeRef::Any,
            "bytes" => TypeRef::Bytes,
            "list" => TypeRef::List(Box::new(TypeRef::Any)),
            "set" => TypeRef::set(TypeRef::Any),
            "sorted_set" => TypeRef::Set {
                element: Box::new(TypeRef::Any),
                sorted: true,
            },
            "map" => TypeRef::map(TypeRef::Any, TypeRef::Any),
            "sorted_map" => TypeRef::Map {
                key: Box::new(TypeRef::Any),
                value: Box::new(TypeRef::Any),
                sorted: true,
            },
            other => match ScalarKind::from_name(other) {
                Some(kind) => TypeRef::Scalar(kind),
                None => TypeRef::Named(other.to_string()),
            },
        }
    }

    /// Strip any [`TypeRef::Option`] wrappers.
    pub fn strip_option(&self) -> &TypeRef {
        let mut ty = self;
        while let TypeRef::Option(inner) = ty {
            ty = inner;
        }
        ty
    }

    /// The value `null` becomes at a position of this type.
    pub fn zero(&self) -> Value {
        match self {
            TypeRef::Scalar(kind) => kind.zero(),
            _ => Value::Null,
        }
    }

    /// The scalar kind, looking through options.
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self.strip_option() {
            TypeRef::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Positions of this type hold logical primitives only.
    pub fn is_scalar(&self) -> bool {
        self.scalar_kind().is_some()
    }
}

fn split_generic(text: &str) -> Option<(&str, &str)> {
    let open = text.find('<')?;
    let inner = text.strip_suffix('>')?;
    Some((text[..open].trim(), &inner[open + 1..]))
}

fn split_args(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in args.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(args[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = args[start..].trim();
    if !last.is_empty() {
        out.push(last);
    }
    out
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Any => f.write_str("object"),
            TypeRef::Scalar(kind) => f.write_str(kind.name()),
            TypeRef::Option(inner) => write!(f, "option<{inner}>"),
            TypeRef::Named(name) => f.write_str(name),
            TypeRef::Enum(def) => f.write_str(&def.name),
            TypeRef::Array(component) => write!(f, "{component}[]"),
            TypeRef::Bytes => f.write_str("byte[]"),
            TypeRef::List(element) if **element == TypeRef::Any => f.write_str("list"),
            TypeRef::List(element) => write!(f, "list<{element}>"),
            TypeRef::Set { element, sorted } => {
                let head = if *sorted { "sorted_set" } else { "set" };
                if **element == TypeRef::Any {
                    f.write_str(head)
                } else {
                    write!(f, "{head}<{element}>")
                }
            }
            TypeRef::Map { key, value, sorted } => {
                let head = if *sorted { "sorted_map" } else { "map" };
                if **key == TypeRef::Any && **value == TypeRef::Any {
                    f.write_str(head)
                } else {
                    write!(f, "{head}<{key},{value}>")
                }
            }
        }
    }
}

/// An enumeration: a type name and the variant names it accepts.
///
/// On the wire a variant is its bare name, or `{"name": "..."}` where the position doesn't
/// pin the type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumDef {
    name: String,
    variants: Vec<String>,
}

impl EnumDef {
    /// Enumeration `name` with the given variants.
    pub fn new(name: impl Into<String>, variants: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Accepted variant names, in declaration order.
    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    /// The value for variant `text`.
    pub fn value(&self, text: &str) -> Result<Value, String> {
        let text = text.trim();
        if !self.variants.iter().any(|v| v == text) {
            return Err(format!("'{text}' is not a variant of {}", self.name));
        }
        Ok(Value::Enum {
            ty: self.name.clone(),
            variant: text.to_string(),
        })
    }
}

/// A named field of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name as it appears in JSON.
    pub name: String,
    /// Declared type.
    pub ty: TypeRef,
}

/// Constructor visibility, used to rank candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    /// Tried last.
    Private,
    /// Preferred over private.
    Protected,
    /// Preferred over everything else.
    Public,
}

/// A constructor parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name, for diagnostics.
    pub name: String,
    /// Declared type.
    pub ty: TypeRef,
}

impl Param {
    /// New parameter.
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Builds the initial field values of a record from its arguments, or explains why it can't.
pub type ConstructorFn = dyn Fn(&[Value]) -> Result<Vec<(String, Value)>, String> + Send + Sync;

/// One way of building a record.
#[derive(Clone)]
pub struct Constructor {
    /// Visibility, used for ranking.
    pub visibility: Visibility,
    /// Parameters in order.
    pub params: Vec<Param>,
    init: Arc<ConstructorFn>,
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("visibility", &self.visibility)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl Constructor {
    /// Constructor with explicit visibility.
    pub fn new(
        visibility: Visibility,
        params: Vec<Param>,
        init: impl Fn(&[Value]) -> Result<Vec<(String, Value)>, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            visibility,
            params,
            init: Arc::new(init),
        }
    }

    /// Public constructor.
    pub fn public(
        params: Vec<Param>,
        init: impl Fn(&[Value]) -> Result<Vec<(String, Value)>, String> + Send + Sync + 'static,
    ) -> Self {
        Self::new(Visibility::Public, params, init)
    }

    /// Public no-argument constructor setting every field to its zero value.
    pub fn defaults(fields: &IndexMap<String, FieldDescriptor>) -> Self {
        let zeros: Vec<(String, Value)> = fields
            .values()
            .map(|f| (f.name.clone(), f.ty.zero()))
            .collect();
        Self::public(Vec::new(), move |_| Ok(zeros.clone()))
    }

    /// Run the constructor.
    pub fn invoke(&self, args: &[Value]) -> Result<Vec<(String, Value)>, String> {
        (self.init)(args)
    }

    /// Parameter types joined with commas; the last tie-breaker when ranking.
    pub fn signature(&self) -> String {
        let mut out = String::new();
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&p.ty.to_string());
        }
        out
    }
}

/// A record type: ordered fields and the constructors that can build it.
#[derive(Debug, Clone)]
pub struct TypeDef {
    name: String,
    fields: IndexMap<String, FieldDescriptor>,
    constructors: Vec<Constructor>,
    default_constructor: bool,
}

impl TypeDef {
    /// A record with no fields yet and an implicit no-argument constructor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            constructors: Vec::new(),
            default_constructor: true,
        }
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        let name = name.into();
        self.fields.insert(
            name.clone(),
            FieldDescriptor { name, ty },
        );
        self
    }

    /// Add an explicit constructor.
    pub fn constructor(mut self, constructor: Constructor) -> Self {
        self.constructors.push(constructor);
        self
    }

    /// Drop the implicit no-argument constructor.
    pub fn without_default_constructor(mut self) -> Self {
        self.default_constructor = false;
        self
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &IndexMap<String, FieldDescriptor> {
        &self.fields
    }

    /// Candidate constructors, the implicit one last.
    pub fn constructors(&self) -> &[Constructor] {
        &self.constructors
    }

    /// Materialize the implicit constructor. Called once on registration.
    pub(crate) fn finish(mut self) -> Self {
        if self.default_constructor {
            self.constructors.push(Constructor::defaults(&self.fields));
            self.default_constructor = false;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_type_names() {
        assert_eq!(TypeRef::parse("int"), TypeRef::Scalar(ScalarKind::I32));
        assert_eq!(TypeRef::parse("Long"), TypeRef::Scalar(ScalarKind::I64));
        assert_eq!(TypeRef::parse("byte[]"), TypeRef::Bytes);
        assert_eq!(TypeRef::parse("string[][]"), TypeRef::array(TypeRef::array(TypeRef::Scalar(ScalarKind::String))));
        assert_eq!(TypeRef::parse("object"), TypeRef::Any);
        assert_eq!(
            TypeRef::parse("map<string, list<Person>>"),
            TypeRef::map(
                TypeRef::Scalar(ScalarKind::String),
                TypeRef::list(TypeRef::named("Person"))
            )
        );
        assert_eq!(TypeRef::parse("Person"), TypeRef::named("Person"));
    }

    #[test]
    fn display_round_trips() {
        for text in ["object", "i32", "Person[]", "byte[]", "list", "list<i64>", "sorted_set", "map<string,f64>", "option<Person>"] {
            assert_eq!(TypeRef::parse(text).to_string(), text);
        }
    }

    #[test]
    fn atomics_read_as_their_wrapped_kind() {
        assert_eq!(TypeRef::parse("AtomicInteger"), TypeRef::Scalar(ScalarKind::I32));
        assert_eq!(TypeRef::parse("AtomicLong"), TypeRef::Scalar(ScalarKind::I64));
        assert_eq!(TypeRef::parse("AtomicBoolean"), TypeRef::Scalar(ScalarKind::Bool));
        assert_eq!(TypeRef::parse("AtomicU64"), TypeRef::Scalar(ScalarKind::U64));
        assert_eq!(TypeRef::parse("uuid"), TypeRef::Scalar(ScalarKind::Uuid));
    }

    #[test]
    fn enum_variants_are_checked() {
        let color = EnumDef::new("Color", ["RED", "GREEN"]);
        assert_eq!(
            color.value(" GREEN "),
            Ok(Value::Enum {
                ty: "Color".to_string(),
                variant: "GREEN".to_string()
            })
        );
        assert_eq!(
            color.value("BLUE"),
            Err("'BLUE' is not a variant of Color".to_string())
        );
        assert_eq!(TypeRef::Enum(Arc::new(color)).to_string(), "Color");
    }

    #[test]
    fn zero_values() {
        assert_eq!(TypeRef::Scalar(ScalarKind::I32).zero(), Value::I32(0));
        assert_eq!(TypeRef::Scalar(ScalarKind::Bool).zero(), Value::Bool(false));
        assert_eq!(TypeRef::Scalar(ScalarKind::String).zero(), Value::Null);
        assert_eq!(TypeRef::option(TypeRef::Scalar(ScalarKind::I32)).zero(), Value::Null);
    }

    #[test]
    fn implicit_constructor_zeroes_fields() {
        let def = TypeDef::new("Point")
            .field("x", TypeRef::Scalar(ScalarKind::I32))
            .field("label", TypeRef::Scalar(ScalarKind::String))
            .finish();
        assert_eq!(def.constructors().len(), 1);
        let fields = def.constructors()[0].invoke(&[]).unwrap();
        assert_eq!(
            fields,
            vec![("x".to_string(), Value::I32(0)), ("label".to_string(), Value::Null)]
        );
    }
}
