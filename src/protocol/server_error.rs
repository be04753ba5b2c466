//! Parsed `ErrorResponse` and `NoticeResponse` field bags.
use std::fmt;

use bytes::Bytes;

use super::error::ProtocolError;
use crate::ext::BytesExt;

/// The identified fields of an `ErrorResponse` or `NoticeResponse` body.
///
/// Each field is introduced by a one byte code; a zero byte terminates the
/// list. Unrecognized codes are silently ignored, since more field types
/// might be added in future.
///
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>
#[derive(Debug, Default, Clone)]
pub struct ErrorFields {
    pub severity: Option<String>,
    /// Nonlocalized severity, present since 9.6.
    pub severity_tag: Option<String>,
    /// The SQLSTATE code.
    pub code: Option<String>,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Cursor position into the original query string, counted in characters.
    pub position: Option<String>,
    pub internal_position: Option<String>,
    pub internal_query: Option<String>,
    pub where_: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
    pub data_type: Option<String>,
    pub constraint: Option<String>,
    pub file: Option<String>,
    pub line: Option<String>,
    pub routine: Option<String>,
}

impl ErrorFields {
    pub(crate) fn parse(mut body: Bytes) -> Result<Self, ProtocolError> {
        use bytes::Buf;

        let mut fields = ErrorFields::default();

        loop {
            if body.is_empty() {
                return Err(ProtocolError::Truncated { msg: "ErrorResponse" });
            }
            let slot = match body.get_u8() {
                0 => break,
                b'S' => &mut fields.severity,
                b'V' => &mut fields.severity_tag,
                b'C' => &mut fields.code,
                b'M' => &mut fields.message,
                b'D' => &mut fields.detail,
                b'H' => &mut fields.hint,
                b'P' => &mut fields.position,
                b'p' => &mut fields.internal_position,
                b'q' => &mut fields.internal_query,
                b'W' => &mut fields.where_,
                b's' => &mut fields.schema,
                b't' => &mut fields.table,
                b'c' => &mut fields.column,
                b'd' => &mut fields.data_type,
                b'n' => &mut fields.constraint,
                b'F' => &mut fields.file,
                b'L' => &mut fields.line,
                b'R' => &mut fields.routine,
                _ => {
                    body.get_nul_bytes()?;
                    continue;
                },
            };
            *slot = Some(body.get_nul_string()?);
        }

        Ok(fields)
    }
}

impl fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = self.severity.as_deref().unwrap_or("ERROR");
        let message = self.message.as_deref().unwrap_or("<no message>");
        write!(f, "{severity}: {message}")?;
        if let Some(code) = self.code.as_deref() {
            write!(f, " ({code})")?;
        }
        Ok(())
    }
}

/// A parsed server `ErrorResponse`.
///
/// Not necessarily fatal: during a query it is scoped to that query and the
/// session keeps accepting work after the next `ReadyForQuery`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{fields}")]
pub struct ServerError {
    pub fields: ErrorFields,
}

impl ServerError {
    /// The SQLSTATE code, e.g. `22012` for a division by zero.
    pub fn code(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.fields.message.as_deref()
    }
}

/// A parsed server `NoticeResponse`. The frontend should display it.
#[derive(Debug, Clone)]
pub struct Notice {
    pub fields: ErrorFields,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.fields, f)
    }
}

/// A `NotificationResponse` produced by `NOTIFY`.
#[derive(Debug, Clone)]
pub struct Notification {
    /// The process id of the notifying backend.
    pub process_id: i32,
    pub channel: String,
    pub payload: String,
}

#[cfg(test)]
mod test {
    use super::*;

    fn body(fields: &[(u8, &str)]) -> Bytes {
        let mut buf = Vec::new();
        for (code, value) in fields {
            buf.push(*code);
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        buf.push(0);
        Bytes::from(buf)
    }

    #[test]
    fn parses_division_by_zero() {
        let fields = ErrorFields::parse(body(&[
            (b'S', "ERROR"),
            (b'C', "22012"),
            (b'M', "division by zero"),
            (b'F', "int.c"),
            (b'L', "841"),
            (b'R', "int4div"),
        ]))
        .unwrap();

        assert_eq!(fields.code.as_deref(), Some("22012"));
        assert_eq!(fields.message.as_deref(), Some("division by zero"));
        assert_eq!(fields.to_string(), "ERROR: division by zero (22012)");
    }

    #[test]
    fn ignores_unknown_field_codes() {
        let fields = ErrorFields::parse(body(&[
            (b'Z', "future"),
            (b'M', "still parsed"),
        ]))
        .unwrap();
        assert_eq!(fields.message.as_deref(), Some("still parsed"));
    }

    #[test]
    fn missing_terminator_is_an_error() {
        let mut raw = Vec::new();
        raw.push(b'M');
        raw.extend_from_slice(b"no terminator\0");
        assert!(ErrorFields::parse(Bytes::from(raw)).is_err());
    }
}
