//! Query parameter values and their wire preparation.
use std::{fmt, sync::Arc};

use bytes::Bytes;
use time::format_description::well_known::Rfc3339;

use crate::protocol::{Format, Oid, oid};

/// A value bound to a query parameter.
#[derive(Clone)]
pub enum PgParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytea(Bytes),
    Timestamp(time::OffsetDateTime),
    Array(Vec<PgParam>),
    Json(serde_json::Value),
    /// A caller supplied conversion; resolved recursively during
    /// preparation.
    Custom(Arc<dyn ToPostgres>),
}

/// Capability to turn a custom type into a bindable [`PgParam`].
///
/// Resolution is recursive: the returned value may itself be `Custom`.
/// Cyclic resolutions are detected and fail with [`PrepareError`].
pub trait ToPostgres: Send + Sync {
    fn to_postgres(&self) -> PgParam;
}

impl fmt::Debug for PgParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Self::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Self::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Self::Text(v) => f.debug_tuple("Text").field(v).finish(),
            Self::Bytea(v) => f.debug_tuple("Bytea").field(&v.len()).finish(),
            Self::Timestamp(v) => f.debug_tuple("Timestamp").field(v).finish(),
            Self::Array(v) => f.debug_tuple("Array").field(v).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

macro_rules! from {
    ($variant:ident: $($ty:ty),*) => {$(
        impl From<$ty> for PgParam {
            fn from(value: $ty) -> Self {
                Self::$variant(value.into())
            }
        }
    )*};
}

from!(Bool: bool);
from!(Int: i8, i16, i32, i64);
from!(Float: f32, f64);
from!(Text: &str, String);
from!(Bytea: Vec<u8>, Bytes);
from!(Timestamp: time::OffsetDateTime);
from!(Json: serde_json::Value);

impl From<&[u8]> for PgParam {
    fn from(value: &[u8]) -> Self {
        Self::Bytea(Bytes::copy_from_slice(value))
    }
}

impl<T: Into<PgParam>> From<Option<T>> for PgParam {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Self::Null,
        }
    }
}

impl From<Vec<PgParam>> for PgParam {
    fn from(value: Vec<PgParam>) -> Self {
        Self::Array(value)
    }
}

impl PgParam {
    /// The type oid declared in `Parse`. Zero leaves the type for the
    /// server to infer.
    pub(crate) fn oid(&self) -> Oid {
        match self {
            Self::Bool(_) => oid::BOOL,
            Self::Int(_) => oid::INT8,
            Self::Float(_) => oid::FLOAT8,
            Self::Bytea(_) => oid::BYTEA,
            _ => 0,
        }
    }
}

/// Parameter preparation failed; nothing was written to the wire.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("circular reference detected while preparing parameter")]
    Circular,
    #[error("cannot format timestamp parameter: {0}")]
    Timestamp(#[from] time::error::Format),
}

/// Produce the text representation a parameter is transmitted as, `None`
/// for NULL.
///
/// Scalars are idempotent under re-preparation: preparing the produced
/// string as a [`PgParam::Text`] yields the same string again.
pub fn prepare_value(param: &PgParam) -> Result<Option<String>, PrepareError> {
    let mut seen = Vec::new();
    prepare_inner(param, &mut seen)
}

fn prepare_inner(
    param: &PgParam,
    seen: &mut Vec<*const ()>,
) -> Result<Option<String>, PrepareError> {
    let text = match param {
        PgParam::Null => return Ok(None),
        PgParam::Bool(b) => b.to_string(),
        PgParam::Int(i) => i.to_string(),
        PgParam::Float(f) => f.to_string(),
        PgParam::Text(s) => s.clone(),
        PgParam::Bytea(b) => format!("\\x{}", hex::encode(b)),
        PgParam::Timestamp(ts) => ts.format(&Rfc3339)?,
        PgParam::Array(items) => array_literal(items, seen)?,
        PgParam::Json(v) => v.to_string(),
        PgParam::Custom(custom) => return prepare_custom(custom, seen, prepare_inner),
    };
    Ok(Some(text))
}

fn prepare_custom<R>(
    custom: &Arc<dyn ToPostgres>,
    seen: &mut Vec<*const ()>,
    prepare: fn(&PgParam, &mut Vec<*const ()>) -> Result<R, PrepareError>,
) -> Result<R, PrepareError> {
    let identity = Arc::as_ptr(custom) as *const ();
    if seen.contains(&identity) {
        return Err(PrepareError::Circular);
    }
    seen.push(identity);
    let out = prepare(&custom.to_postgres(), seen);
    seen.pop();
    out
}

/// Encode a list of values as a postgres array literal.
///
/// `NULL` elements stay unquoted, byte views become `\x` hex, nested
/// arrays recurse, and textual elements are wrapped in double quotes with
/// `\` and `"` backslash-escaped.
fn array_literal(
    items: &[PgParam],
    seen: &mut Vec<*const ()>,
) -> Result<String, PrepareError> {
    let mut out = String::from("{");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        array_element(item, seen, &mut out)?;
    }
    out.push('}');
    Ok(out)
}

fn array_element(
    item: &PgParam,
    seen: &mut Vec<*const ()>,
    out: &mut String,
) -> Result<(), PrepareError> {
    match item {
        PgParam::Null => out.push_str("NULL"),
        PgParam::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        PgParam::Int(i) => out.push_str(&i.to_string()),
        PgParam::Float(f) => out.push_str(&f.to_string()),
        PgParam::Bytea(b) => {
            out.push_str("\\x");
            out.push_str(&hex::encode(b));
        },
        PgParam::Array(inner) => out.push_str(&array_literal(inner, seen)?),
        PgParam::Custom(custom) => {
            return prepare_custom(custom, seen, |resolved, seen| {
                let mut nested = String::new();
                array_element(resolved, seen, &mut nested)?;
                Ok(nested)
            })
            .map(|nested| out.push_str(&nested));
        },
        textual => {
            let text = prepare_inner(textual, seen)?.unwrap_or_default();
            out.push('"');
            for ch in text.chars() {
                if matches!(ch, '\\' | '"') {
                    out.push('\\');
                }
                out.push(ch);
            }
            out.push('"');
        },
    }
    Ok(())
}

/// Encode a parameter for `Bind`: its wire format plus the value bytes,
/// `None` for NULL (transmitted as length -1).
///
/// Byte parameters go binary untouched; everything else uses the text
/// representation from [`prepare_value`].
pub(crate) fn encode_param(param: &PgParam) -> Result<(Format, Option<Bytes>), PrepareError> {
    match param {
        PgParam::Bytea(bytes) => Ok((Format::Binary, Some(bytes.clone()))),
        other => Ok((
            Format::Text,
            prepare_value(other)?.map(|text| Bytes::from(text.into_bytes())),
        )),
    }
}
