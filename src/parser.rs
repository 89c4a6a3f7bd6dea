//! JSON text → [`Document`].
//!
//! The parser never recurses: open objects and arrays live on an explicit frame stack, and
//! nesting beyond [`ReadOptions::max_depth`] is a syntax error rather than a stack overflow.

use std::io::Read;

use log::trace;
use num_bigint::BigInt;
use owo_colors::OwoColorize;

use crate::error::{JsonIoError, Result, SyntaxErrorKind};
use crate::node::{Document, Node, NodeId, ObjectNode, Scalar, meta};
use crate::options::ReadOptions;
use crate::reader::PushbackReader;
use crate::span::Spanned;

/// Parse a complete document held in memory.
pub fn parse_str(json: &str, options: &ReadOptions) -> Result<Document> {
    Parser::new(PushbackReader::from_str(json, options.snippet_len), options).parse()
}

/// Parse a complete document from a byte stream.
pub fn parse_reader<R: Read>(reader: R, options: &ReadOptions) -> Result<Document> {
    Parser::new(PushbackReader::new(reader, options.snippet_len), options).parse()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectState {
    /// Right after `{`: a key (the object is known to be non-empty).
    FirstKey,
    /// After `,`: a key is mandatory.
    Key,
    /// After a key: `:`.
    Colon,
    /// After `:`: a value.
    Value,
    /// After a value: `,` or `}`.
    CommaOrEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayState {
    Value,
    CommaOrEnd,
}

#[derive(Debug)]
enum Frame {
    Object {
        node: NodeId,
        state: ObjectState,
        key: Option<Spanned<String>>,
    },
    Array {
        items: Vec<Node>,
        state: ArrayState,
    },
}

#[derive(Clone, Copy)]
enum Top {
    Object(ObjectState),
    Array(ArrayState),
}

/// What reading the start of a value produced.
enum Started {
    /// A complete value (scalar or empty container).
    Done(Node),
    /// A container frame was pushed; the value completes when it closes.
    Opened,
}

struct Parser<'o, R> {
    reader: PushbackReader<R>,
    options: &'o ReadOptions,
    doc: Document,
    stack: Vec<Frame>,
}

impl<'o, R: Read> Parser<'o, R> {
    fn new(reader: PushbackReader<R>, options: &'o ReadOptions) -> Self {
        Self {
            reader,
            options,
            doc: Document::default(),
            stack: Vec::new(),
        }
    }

    fn parse(mut self) -> Result<Document> {
        let mut completed = match self.start_value("root value")? {
            Started::Done(node) => Some(node),
            Started::Opened => None,
        };

        loop {
            if let Some(value) = completed.take() {
                match self.stack.last_mut() {
                    None => {
                        self.doc.root = Some(value);
                        break;
                    }
                    Some(Frame::Array { items, state }) => {
                        items.push(value);
                        *state = ArrayState::CommaOrEnd;
                    }
                    Some(Frame::Object { .. }) => self.store_entry(value)?,
                }
                continue;
            }
            completed = self.step()?;
        }

        if let Some(c) = self.skip_whitespace()? {
            trace!("Trailing content starting with {:?}", c.bright_red());
            return Err(self.reader.error(SyntaxErrorKind::TrailingContent));
        }
        Ok(self.doc)
    }

    /// Advance the top frame by one token. Returns a value when a container closes or a
    /// scalar is read.
    fn step(&mut self) -> Result<Option<Node>> {
        let top = match self.stack.last() {
            None => return Ok(None),
            Some(Frame::Object { state, .. }) => Top::Object(*state),
            Some(Frame::Array { state, .. }) => Top::Array(*state),
        };
        match top {
            Top::Object(state) => match state {
                ObjectState::FirstKey | ObjectState::Key => {
                    let c = self.next_non_ws("object key")?;
                    if c != '"' {
                        return Err(self.unexpected(c, "'\"' to start an object key"));
                    }
                    let pos = self.reader.position();
                    let raw = self.read_string_body()?;
                    let key = match meta::expand(&raw) {
                        Some(canonical) => canonical.to_string(),
                        None => raw,
                    };
                    trace!("Key {}", key.blue());
                    if let Some(Frame::Object { state, key: slot, .. }) = self.stack.last_mut() {
                        *slot = Some(Spanned::new(key, pos));
                        *state = ObjectState::Colon;
                    }
                    Ok(None)
                }
                ObjectState::Colon => {
                    let c = self.next_non_ws("':'")?;
                    if c != ':' {
                        return Err(self.unexpected(c, "':'"));
                    }
                    self.set_object_state(ObjectState::Value);
                    Ok(None)
                }
                ObjectState::Value => match self.start_value("object value")? {
                    Started::Done(node) => Ok(Some(node)),
                    Started::Opened => Ok(None),
                },
                ObjectState::CommaOrEnd => match self.next_non_ws("',' or '}'")? {
                    ',' => {
                        self.set_object_state(ObjectState::Key);
                        Ok(None)
                    }
                    '}' => self.close_container(),
                    c => Err(self.unexpected(c, "',' or '}'")),
                },
            },
            Top::Array(state) => match state {
                ArrayState::Value => match self.start_value("array element")? {
                    Started::Done(node) => Ok(Some(node)),
                    Started::Opened => Ok(None),
                },
                ArrayState::CommaOrEnd => match self.next_non_ws("',' or ']'")? {
                    ',' => {
                        if let Some(Frame::Array { state, .. }) = self.stack.last_mut() {
                            *state = ArrayState::Value;
                        }
                        Ok(None)
                    }
                    ']' => self.close_container(),
                    c => Err(self.unexpected(c, "',' or ']'")),
                },
            },
        }
    }

    fn set_object_state(&mut self, next: ObjectState) {
        if let Some(Frame::Object { state, .. }) = self.stack.last_mut() {
            *state = next;
        }
    }

    fn close_container(&mut self) -> Result<Option<Node>> {
        let node = match self.stack.pop() {
            Some(Frame::Object { node, .. }) => {
                trace!("{} object #{}", "Close".bright_yellow(), node.index());
                Node::Object(node)
            }
            Some(Frame::Array { items, .. }) => {
                trace!("{} array of {} items", "Close".bright_yellow(), items.len());
                Node::Array(self.doc.alloc_array(items))
            }
            None => return Ok(None),
        };
        Ok(Some(node))
    }

    /// Read whatever starts the next value: a scalar, an empty container, or the opening of a
    /// non-empty container (which pushes a frame).
    fn start_value(&mut self, what: &'static str) -> Result<Started> {
        let c = self.next_non_ws(what)?;
        match c {
            '{' | '[' => {
                if self.stack.len() >= self.options.max_depth {
                    return Err(self
                        .reader
                        .error(SyntaxErrorKind::DepthExceeded(self.options.max_depth)));
                }
                let pos = self.reader.position();
                let close = if c == '{' { '}' } else { ']' };
                let next = self.next_non_ws(what)?;
                if next == close {
                    return Ok(Started::Done(if c == '{' {
                        Node::EmptyObject
                    } else {
                        Node::EmptyArray
                    }));
                }
                self.reader.unread(next);
                if c == '{' {
                    let node = self.doc.alloc_object(ObjectNode {
                        pos,
                        ..Default::default()
                    });
                    trace!("{} object #{} at {}", "Open".bright_green(), node.index(), pos);
                    self.stack.push(Frame::Object {
                        node,
                        state: ObjectState::FirstKey,
                        key: None,
                    });
                } else {
                    trace!("{} array at {}", "Open".bright_green(), pos);
                    self.stack.push(Frame::Array {
                        items: Vec::new(),
                        state: ArrayState::Value,
                    });
                }
                Ok(Started::Opened)
            }
            '"' => Ok(Started::Done(Node::Scalar(Scalar::String(
                self.read_string_body()?,
            )))),
            '-' | '0'..='9' => {
                let scalar = self.read_number(c)?;
                trace!("Number {}", scalar.cyan());
                Ok(Started::Done(Node::Scalar(scalar)))
            }
            c if c.is_ascii_alphabetic() => Ok(Started::Done(Node::Scalar(self.read_token(c)?))),
            c => Err(self.unexpected(c, "a JSON value")),
        }
    }

    /// Attach a completed value to the open object, under the key read before it.
    fn store_entry(&mut self, value: Node) -> Result<()> {
        let Some(Frame::Object { node, state, key }) = self.stack.last_mut() else {
            return Ok(());
        };
        let node = *node;
        *state = ObjectState::CommaOrEnd;
        let Some(key) = key.take() else {
            return Ok(());
        };

        match key.as_str() {
            meta::ID => {
                let id = self.meta_id(meta::ID, &key, &value)?;
                self.doc.object_mut(node).id = (id > 0).then_some(id);
                // Register right away so references inside this object can find it.
                self.doc
                    .references
                    .insert(id, node, self.options.max_object_references)?;
            }
            meta::REF => {
                let id = self.meta_id(meta::REF, &key, &value)?;
                self.doc.object_mut(node).ref_id = Some(id);
            }
            meta::TYPE => match value {
                Node::Scalar(Scalar::String(name)) => self.doc.object_mut(node).type_tag = Some(name),
                Node::Scalar(Scalar::Null) => {}
                _ => return Err(self.invalid_meta(meta::TYPE, &key, "expected a string")),
            },
            meta::KEYS | meta::ITEMS => {
                let items = match value {
                    Node::Array(array) => core::mem::take(&mut self.doc.arrays[array.index()]),
                    Node::EmptyArray => Vec::new(),
                    _ => {
                        let canonical = if key.as_str() == meta::KEYS { meta::KEYS } else { meta::ITEMS };
                        return Err(self.invalid_meta(canonical, &key, "expected an array"));
                    }
                };
                let object = self.doc.object_mut(node);
                if key.as_str() == meta::KEYS {
                    object.keys = Some(items);
                } else {
                    object.items = Some(items);
                }
            }
            _ => {
                self.doc.object_mut(node).entries.insert(key.into_inner(), value);
            }
        }
        Ok(())
    }

    fn meta_id(&self, which: &'static str, key: &Spanned<String>, value: &Node) -> Result<i64> {
        let id = match value {
            Node::Scalar(scalar) => scalar.as_i64(),
            _ => None,
        };
        let Some(id) = id else {
            return Err(self.invalid_meta(which, key, "expected an integer"));
        };
        if id.unsigned_abs() > self.options.max_id_value.unsigned_abs() {
            return Err(self.invalid_meta(
                which,
                key,
                &format!("{id} exceeds the maximum id value {}", self.options.max_id_value),
            ));
        }
        Ok(id)
    }

    fn invalid_meta(&self, which: &'static str, key: &Spanned<String>, reason: &str) -> JsonIoError {
        JsonIoError::syntax(
            SyntaxErrorKind::InvalidMeta {
                key: which,
                reason: reason.to_string(),
            },
            key.pos,
            self.reader.snippet(),
        )
    }

    fn unexpected(&self, found: char, expected: &'static str) -> JsonIoError {
        self.reader
            .error(SyntaxErrorKind::UnexpectedChar { found, expected })
    }

    fn skip_whitespace(&mut self) -> Result<Option<char>> {
        while let Some(c) = self.reader.read()? {
            if !matches!(c, ' ' | '\t' | '\n' | '\r') {
                return Ok(Some(c));
            }
        }
        Ok(None)
    }

    fn next_non_ws(&mut self, what: &'static str) -> Result<char> {
        match self.skip_whitespace()? {
            Some(c) => Ok(c),
            None => Err(self.reader.error(SyntaxErrorKind::UnexpectedEof(what))),
        }
    }

    /// Read the rest of a string literal; the opening quote has been consumed.
    fn read_string_body(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            let c = self
                .reader
                .read()?
                .ok_or_else(|| self.reader.error(SyntaxErrorKind::UnexpectedEof("string")))?;
            match c {
                '"' => return Ok(out),
                '\\' => out.push(self.read_escape()?),
                c => out.push(c),
            }
        }
    }

    fn read_escape(&mut self) -> Result<char> {
        let c = self
            .reader
            .read()?
            .ok_or_else(|| self.reader.error(SyntaxErrorKind::UnexpectedEof("escape sequence")))?;
        Ok(match c {
            '"' => '"',
            '\\' => '\\',
            '/' => '/',
            '\'' => '\'',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'u' => {
                let high = self.read_hex4()?;
                if !(0xD800..0xDC00).contains(&high) {
                    return char::from_u32(high)
                        .ok_or_else(|| self.bad_escape(format!("\\u{high:04x}")));
                }
                // High surrogate: a low surrogate escape must follow.
                if self.reader.read()? != Some('\\') || self.reader.read()? != Some('u') {
                    return Err(self.bad_escape(format!("unpaired surrogate \\u{high:04x}")));
                }
                let low = self.read_hex4()?;
                if !(0xDC00..0xE000).contains(&low) {
                    return Err(self.bad_escape(format!("\\u{high:04x}\\u{low:04x}")));
                }
                let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                char::from_u32(code).ok_or_else(|| self.bad_escape(format!("\\u{high:04x}\\u{low:04x}")))?
            }
            other => return Err(self.bad_escape(format!("\\{other}"))),
        })
    }

    fn read_hex4(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..4 {
            let c = self
                .reader
                .read()?
                .ok_or_else(|| self.reader.error(SyntaxErrorKind::UnexpectedEof("unicode escape")))?;
            let digit = c
                .to_digit(16)
                .ok_or_else(|| self.bad_escape(format!("\\u with non-hex digit {c:?}")))?;
            value = value * 16 + digit;
        }
        Ok(value)
    }

    fn bad_escape(&self, what: String) -> JsonIoError {
        self.reader.error(SyntaxErrorKind::BadEscape(what))
    }

    /// Read a number greedily. `.`, `e` or `E` make it floating point; integers that overflow
    /// `i64` become big integers.
    fn read_number(&mut self, first: char) -> Result<Scalar> {
        if first == '-' && self.options.allow_nan_and_infinity {
            if let Some(c) = self.reader.read()? {
                if c.is_ascii_alphabetic() {
                    return match self.read_token(c)? {
                        Scalar::Float(f) if f.is_infinite() => Ok(Scalar::Float(-f)),
                        _ => Err(self.reader.error(SyntaxErrorKind::BadToken("Infinity"))),
                    };
                }
                self.reader.unread(c);
            }
        }

        let mut text = String::new();
        text.push(first);
        let mut floating = false;
        while let Some(c) = self.reader.read()? {
            match c {
                '0'..='9' | '-' | '+' => text.push(c),
                '.' | 'e' | 'E' => {
                    floating = true;
                    text.push(c);
                }
                _ => {
                    self.reader.unread(c);
                    break;
                }
            }
        }

        if floating {
            return text
                .parse::<f64>()
                .map(Scalar::Float)
                .map_err(|_| self.reader.error(SyntaxErrorKind::BadNumber(text)));
        }
        match text.parse::<i64>() {
            Ok(i) => Ok(Scalar::Int(i)),
            Err(_) => text
                .parse::<BigInt>()
                .map(Scalar::BigInt)
                .map_err(|_| self.reader.error(SyntaxErrorKind::BadNumber(text))),
        }
    }

    /// Read a bare word: `true`, `false`, `null` (any case), or `NaN` / `Infinity` when relaxed
    /// numbers are allowed.
    fn read_token(&mut self, first: char) -> Result<Scalar> {
        let mut word = String::new();
        word.push(first);
        while let Some(c) = self.reader.read()? {
            if c.is_ascii_alphabetic() {
                word.push(c);
            } else {
                self.reader.unread(c);
                break;
            }
        }
        word.make_ascii_lowercase();
        match word.as_str() {
            "true" => Ok(Scalar::Bool(true)),
            "false" => Ok(Scalar::Bool(false)),
            "null" => Ok(Scalar::Null),
            "nan" if self.options.allow_nan_and_infinity => Ok(Scalar::Float(f64::NAN)),
            "infinity" if self.options.allow_nan_and_infinity => Ok(Scalar::Float(f64::INFINITY)),
            _ => Err(self.reader.error(SyntaxErrorKind::BadToken("true, false or null"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<Document> {
        parse_str(json, &ReadOptions::default())
    }

    fn root_object(doc: &Document) -> &ObjectNode {
        match doc.root() {
            Node::Object(id) => doc.object(*id),
            other => panic!("expected an object root, got {other:?}"),
        }
    }

    #[test]
    fn scalars() {
        let doc = parse(r#"[1, -2.5, 1e3, "a\tb", true, NULL, 123456789012345678901234567890]"#).unwrap();
        let Node::Array(items) = doc.root() else {
            panic!("expected array");
        };
        let items = doc.array(*items);
        assert_eq!(items[0], Node::Scalar(Scalar::Int(1)));
        assert_eq!(items[1], Node::Scalar(Scalar::Float(-2.5)));
        assert_eq!(items[2], Node::Scalar(Scalar::Float(1000.0)));
        assert_eq!(items[3], Node::Scalar(Scalar::String("a\tb".into())));
        assert_eq!(items[4], Node::Scalar(Scalar::Bool(true)));
        assert_eq!(items[5], Node::Scalar(Scalar::Null));
        assert!(matches!(items[6], Node::Scalar(Scalar::BigInt(_))));
    }

    #[test]
    fn escapes_including_single_quote_and_surrogates() {
        let doc = parse(r#""it\'s é 😀 \/""#).unwrap();
        assert_eq!(
            doc.root(),
            &Node::Scalar(Scalar::String("it's \u{e9} \u{1F600} /".into()))
        );
        let err = parse(r#""\x""#).unwrap_err();
        assert!(matches!(err.syntax_kind(), Some(SyntaxErrorKind::BadEscape(_))));
    }

    #[test]
    fn meta_keys_are_expanded_and_extracted() {
        let doc = parse(r#"{"@i": 3, "@t": "Point", "x": 1, "@e": [1, 2]}"#).unwrap();
        let obj = root_object(&doc);
        assert_eq!(obj.id, Some(3));
        assert_eq!(obj.type_tag.as_deref(), Some("Point"));
        assert_eq!(obj.entries.len(), 1);
        assert_eq!(obj.items.as_ref().map(Vec::len), Some(2));
        assert!(doc.references().get_raw(3).is_some());
    }

    #[test]
    fn ids_register_before_children_are_parsed() {
        let doc = parse(r#"{"@id": 1, "self": {"@ref": 1}}"#).unwrap();
        let obj = root_object(&doc);
        let Some(Node::Object(child)) = obj.get("self") else {
            panic!("expected nested object");
        };
        assert_eq!(doc.object(*child).ref_id, Some(1));
        assert_eq!(doc.references().get(1, &doc, 10).unwrap(), Some(NodeId(0)));
    }

    #[test]
    fn empty_containers_are_sentinels() {
        let doc = parse(r#"{"a": {}, "b": [ ]}"#).unwrap();
        let obj = root_object(&doc);
        assert_eq!(obj.get("a"), Some(&Node::EmptyObject));
        assert_eq!(obj.get("b"), Some(&Node::EmptyArray));
        assert_eq!(doc.object_count(), 1);
    }

    #[test]
    fn items_must_be_an_array() {
        let err = parse(r#"{"@items": 5}"#).unwrap_err();
        assert!(matches!(
            err.syntax_kind(),
            Some(SyntaxErrorKind::InvalidMeta { key: "@items", .. })
        ));
    }

    #[test]
    fn ids_out_of_range_are_rejected() {
        let err = parse(r#"{"@id": 10000000000}"#).unwrap_err();
        assert!(matches!(
            err.syntax_kind(),
            Some(SyntaxErrorKind::InvalidMeta { key: "@id", .. })
        ));
    }

    #[test]
    fn depth_is_bounded() {
        let opts = ReadOptions::default().max_depth(8);
        let deep = format!("{}{}", "[".repeat(9), "]".repeat(9));
        let err = parse_str(&deep, &opts).unwrap_err();
        assert_eq!(err.syntax_kind(), Some(&SyntaxErrorKind::DepthExceeded(8)));

        let ok = format!("{}1{}", "[".repeat(8), "]".repeat(8));
        assert!(parse_str(&ok, &opts).is_ok());
    }

    #[test]
    fn very_deep_input_does_not_overflow_the_stack() {
        let deep = "[".repeat(200_000);
        let err = parse(&deep).unwrap_err();
        assert_eq!(err.syntax_kind(), Some(&SyntaxErrorKind::DepthExceeded(1000)));
    }

    #[test]
    fn nan_and_infinity_need_opt_in() {
        assert!(parse("[NaN]").is_err());
        let opts = ReadOptions::default().allow_nan_and_infinity(true);
        let doc = parse_str("[NaN, Infinity, -infinity]", &opts).unwrap();
        let Node::Array(items) = doc.root() else {
            panic!("expected array");
        };
        let items = doc.array(*items);
        assert!(matches!(items[0], Node::Scalar(Scalar::Float(f)) if f.is_nan()));
        assert_eq!(items[1], Node::Scalar(Scalar::Float(f64::INFINITY)));
        assert_eq!(items[2], Node::Scalar(Scalar::Float(f64::NEG_INFINITY)));
    }

    #[test]
    fn structural_errors_carry_position() {
        let err = parse("{\"a\" 1}").unwrap_err();
        assert_eq!(err.to_string(), "unexpected character '1', expected ':' at line 1, col 6");

        let err = parse("[1, 2,]").unwrap_err();
        assert!(matches!(
            err.syntax_kind(),
            Some(SyntaxErrorKind::UnexpectedChar { found: ']', .. })
        ));

        let err = parse("{\"a\": [1, 2").unwrap_err();
        assert!(matches!(err.syntax_kind(), Some(SyntaxErrorKind::UnexpectedEof(_))));

        let err = parse("{} {}").unwrap_err();
        assert_eq!(err.syntax_kind(), Some(&SyntaxErrorKind::TrailingContent));
    }

    #[test]
    fn reads_from_a_stream() {
        let bytes = "{\"name\": \"caf\u{e9}\"}".as_bytes();
        let doc = parse_reader(bytes, &ReadOptions::default()).unwrap();
        let obj = root_object(&doc);
        assert_eq!(
            obj.get("name"),
            Some(&Node::Scalar(Scalar::String("caf\u{e9}".into())))
        );
    }
}
