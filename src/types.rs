//! Result column decoding and the `(oid, format)` parser registry.
use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock, RwLock},
};

use bytes::Bytes;

use crate::protocol::{Format, Oid, oid};

/// A decoded result column value.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Text(String),
    /// Raw column bytes, for binary columns with no registered parser.
    Bytes(Bytes),
}

impl PgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any of the integer widths, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int2(v) => Some(*v as i64),
            Self::Int4(v) => Some(*v as i64),
            Self::Int8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float4(v) => Some(*v as f64),
            Self::Float8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Column decoding failed.
#[derive(Debug, thiserror::Error)]
#[error("cannot decode column of type oid {oid} as {format:?}: {reason}")]
pub struct DecodeError {
    pub oid: Oid,
    pub format: Format,
    pub reason: Cow<'static, str>,
}

impl DecodeError {
    fn new(oid: Oid, format: Format, reason: impl Into<Cow<'static, str>>) -> Self {
        Self { oid, format, reason: reason.into() }
    }
}

/// A caller registered column parser.
pub type TypeParser = Arc<dyn Fn(&[u8]) -> Result<PgValue, DecodeError> + Send + Sync>;

/// Per-session parser overrides, layered over the process wide registry.
///
/// Resolution checks this map first, then the global one, then falls back
/// to the built-in decoders: raw bytes for binary columns, utf8 text for
/// text ones.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    parsers: HashMap<(Oid, Format), TypeParser>,
}

impl TypeRegistry {
    pub fn set(&mut self, oid: Oid, format: Format, parser: TypeParser) {
        self.parsers.insert((oid, format), parser);
    }

    pub fn get(&self, oid: Oid, format: Format) -> Option<TypeParser> {
        self.parsers.get(&(oid, format)).cloned()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("parsers", &self.parsers.len())
            .finish()
    }
}

fn global() -> &'static RwLock<HashMap<(Oid, Format), TypeParser>> {
    static GLOBAL: OnceLock<RwLock<HashMap<(Oid, Format), TypeParser>>> = OnceLock::new();
    GLOBAL.get_or_init(Default::default)
}

/// Register a parser for every future session in this process.
pub fn set_global_type_parser<F>(oid: Oid, format: Format, parser: F)
where
    F: Fn(&[u8]) -> Result<PgValue, DecodeError> + Send + Sync + 'static,
{
    global()
        .write()
        .expect("type parser registry poisoned")
        .insert((oid, format), Arc::new(parser));
}

/// Look up a parser the way column decoding does, minus the built-ins.
pub fn get_global_type_parser(oid: Oid, format: Format) -> Option<TypeParser> {
    global()
        .read()
        .expect("type parser registry poisoned")
        .get(&(oid, format))
        .cloned()
}

/// Decode one column through the registry layers.
pub(crate) fn decode_column(
    registry: &TypeRegistry,
    oid: Oid,
    format: Format,
    raw: Option<&Bytes>,
) -> Result<PgValue, DecodeError> {
    let Some(raw) = raw else {
        return Ok(PgValue::Null);
    };

    if let Some(parser) = registry.get(oid, format).or_else(|| get_global_type_parser(oid, format)) {
        return parser(raw);
    }

    default_decode(oid, format, raw)
}

fn default_decode(oid: Oid, format: Format, raw: &Bytes) -> Result<PgValue, DecodeError> {
    match format {
        Format::Binary => decode_binary(oid, raw),
        Format::Text => decode_text(oid, raw),
    }
}

fn decode_binary(oid: Oid, raw: &Bytes) -> Result<PgValue, DecodeError> {
    fn fixed<const N: usize>(oid: Oid, raw: &Bytes) -> Result<[u8; N], DecodeError> {
        raw.as_ref()
            .try_into()
            .map_err(|_| DecodeError::new(oid, Format::Binary, "unexpected value width"))
    }

    Ok(match oid {
        oid::BOOL => PgValue::Bool(fixed::<1>(oid, raw)?[0] != 0),
        oid::INT2 => PgValue::Int2(i16::from_be_bytes(fixed(oid, raw)?)),
        oid::INT4 => PgValue::Int4(i32::from_be_bytes(fixed(oid, raw)?)),
        oid::INT8 => PgValue::Int8(i64::from_be_bytes(fixed(oid, raw)?)),
        oid::FLOAT4 => PgValue::Float4(f32::from_be_bytes(fixed(oid, raw)?)),
        oid::FLOAT8 => PgValue::Float8(f64::from_be_bytes(fixed(oid, raw)?)),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR | oid::NAME | oid::CHAR | oid::UNKNOWN
        | oid::JSON => utf8(oid, Format::Binary, raw)?,
        // no built-in knowledge of this binary representation
        _ => PgValue::Bytes(raw.clone()),
    })
}

fn decode_text(oid: Oid, raw: &Bytes) -> Result<PgValue, DecodeError> {
    fn parse<T: std::str::FromStr>(oid: Oid, raw: &Bytes) -> Result<T, DecodeError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| DecodeError::new(oid, Format::Text, "not valid utf8"))?;
        text.parse()
            .map_err(|_| DecodeError::new(oid, Format::Text, "malformed text representation"))
    }

    Ok(match oid {
        oid::BOOL => match raw.as_ref() {
            b"t" | b"true" => PgValue::Bool(true),
            b"f" | b"false" => PgValue::Bool(false),
            _ => return Err(DecodeError::new(oid, Format::Text, "malformed boolean")),
        },
        oid::INT2 => PgValue::Int2(parse(oid, raw)?),
        oid::INT4 => PgValue::Int4(parse(oid, raw)?),
        oid::INT8 => PgValue::Int8(parse(oid, raw)?),
        oid::FLOAT4 => PgValue::Float4(parse(oid, raw)?),
        oid::FLOAT8 => PgValue::Float8(parse(oid, raw)?),
        oid::BYTEA => {
            let text = std::str::from_utf8(raw)
                .map_err(|_| DecodeError::new(oid, Format::Text, "not valid utf8"))?;
            let hex_part = text
                .strip_prefix("\\x")
                .ok_or_else(|| DecodeError::new(oid, Format::Text, "missing \\x prefix"))?;
            let decoded = hex::decode(hex_part)
                .map_err(|_| DecodeError::new(oid, Format::Text, "malformed hex"))?;
            PgValue::Bytes(Bytes::from(decoded))
        },
        _ => utf8(oid, Format::Text, raw)?,
    })
}

fn utf8(oid: Oid, format: Format, raw: &Bytes) -> Result<PgValue, DecodeError> {
    match std::str::from_utf8(raw) {
        Ok(text) => Ok(PgValue::Text(text.to_string())),
        Err(_) => Err(DecodeError::new(oid, format, "not valid utf8")),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_int4() {
        let registry = TypeRegistry::default();
        let raw = Bytes::copy_from_slice(&23i32.to_be_bytes());
        let value = decode_column(&registry, oid::INT4, Format::Binary, Some(&raw)).unwrap();
        assert_eq!(value, PgValue::Int4(23));
    }

    #[test]
    fn text_int_and_bool() {
        let registry = TypeRegistry::default();
        let raw = Bytes::from_static(b"-7");
        assert_eq!(
            decode_column(&registry, oid::INT8, Format::Text, Some(&raw)).unwrap(),
            PgValue::Int8(-7),
        );
        let raw = Bytes::from_static(b"t");
        assert_eq!(
            decode_column(&registry, oid::BOOL, Format::Text, Some(&raw)).unwrap(),
            PgValue::Bool(true),
        );
    }

    #[test]
    fn null_never_reaches_a_parser() {
        let mut registry = TypeRegistry::default();
        registry.set(
            oid::INT4,
            Format::Text,
            Arc::new(|_| panic!("parser must not see NULL")),
        );
        let value = decode_column(&registry, oid::INT4, Format::Text, None).unwrap();
        assert_eq!(value, PgValue::Null);
    }

    #[test]
    fn bytea_binary_roundtrip() {
        let registry = TypeRegistry::default();
        let raw = Bytes::from_static(&[0, 1, 254, 255]);
        let value = decode_column(&registry, oid::BYTEA, Format::Binary, Some(&raw)).unwrap();
        assert_eq!(value.as_bytes(), Some(&[0u8, 1, 254, 255][..]));
    }

    #[test]
    fn bytea_text_hex_form() {
        let registry = TypeRegistry::default();
        let raw = Bytes::from_static(b"\\x6869");
        let value = decode_column(&registry, oid::BYTEA, Format::Text, Some(&raw)).unwrap();
        assert_eq!(value.as_bytes(), Some(&b"hi"[..]));
    }

    #[test]
    fn session_override_wins() {
        let mut registry = TypeRegistry::default();
        registry.set(
            oid::INT4,
            Format::Text,
            Arc::new(|raw| Ok(PgValue::Text(format!("seen:{}", raw.len())))),
        );
        let raw = Bytes::from_static(b"123");
        let value = decode_column(&registry, oid::INT4, Format::Text, Some(&raw)).unwrap();
        assert_eq!(value, PgValue::Text("seen:3".into()));
    }

    #[test]
    fn unknown_binary_oid_falls_back_to_raw_bytes() {
        let registry = TypeRegistry::default();
        let raw = Bytes::from_static(b"\x00\x01");
        let value = decode_column(&registry, 600, Format::Binary, Some(&raw)).unwrap();
        assert_eq!(value, PgValue::Bytes(raw));
    }
}
