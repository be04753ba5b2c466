//! Postgres Backend Messages
use bytes::{Buf, Bytes};

use super::{
    error::ProtocolError,
    format::Format,
    oid::Oid,
    server_error::{ErrorFields, Notice, Notification, ServerError},
};
use crate::ext::{BufExt, BytesExt};

/// A type that can be decoded from a postgres backend message.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    CopyData(CopyData),
    CopyDone(CopyDone),
    CopyInResponse(CopyInResponse),
    CopyOutResponse(CopyOutResponse),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ErrorResponse),
    NegotiateProtocolVersion(NegotiateProtocolVersion),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    PortalSuspended(PortalSuspended),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NegotiateProtocolVersion,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    PortalSuspended,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($self:ident,$typ:ident) => {
        if $self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected($self::MSGTYPE, $typ))
        }
    };
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Int32(0) Specifies that the authentication was successful.
    Ok,
    /// Int32(2) Specifies that Kerberos V5 authentication is required.
    KerberosV5,
    /// Int32(3) Specifies that a clear-text password is required.
    CleartextPassword,
    /// Int32(5) Specifies that an MD5-encrypted password is required.
    /// Byte4 The salt to use when encrypting the password.
    Md5Password {
        salt: [u8; 4],
    },
    /// Int32(7) Specifies that GSSAPI authentication is required.
    Gss,
    /// Int32(9) Specifies that SSPI authentication is required.
    Sspi,
    /// Int32(10) Specifies that SASL authentication is required.
    ///
    /// The message body is a list of SASL authentication mechanisms, in the
    /// server's order of preference, each a nul terminated string, with a
    /// final zero byte after the last one.
    Sasl {
        mechanisms: Vec<String>,
    },
    /// Int32(11) Continuation of a SASL exchange; the body is mechanism
    /// specific challenge data.
    SaslContinue {
        data: Bytes,
    },
    /// Int32(12) Final SASL message; the body is mechanism specific outcome
    /// data ("additional data with success" in RFC 5802 terms).
    SaslFinal {
        data: Bytes,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(Authentication, msgtype);
        let auth = match body.try_get_i32_("Authentication")? {
            0 => Authentication::Ok,
            2 => Authentication::KerberosV5,
            3 => Authentication::CleartextPassword,
            5 => {
                if body.remaining() < 4 {
                    return Err(ProtocolError::Truncated { msg: "AuthenticationMD5Password" });
                }
                let mut salt = [0u8; 4];
                body.copy_to_slice(&mut salt);
                Authentication::Md5Password { salt }
            },
            7 => Authentication::Gss,
            9 => Authentication::Sspi,
            10 => {
                let mut mechanisms = Vec::new();
                while body.first().is_some_and(|b| *b != 0) {
                    mechanisms.push(body.get_nul_string()?);
                }
                Authentication::Sasl { mechanisms }
            },
            11 => Authentication::SaslContinue { data: body },
            12 => Authentication::SaslFinal { data: body },
            auth => return Err(ProtocolError::UnknownAuth(auth)),
        };
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue
/// CancelRequest messages later.
#[derive(Debug, Clone, Copy)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(BackendKeyData, msgtype);
        Ok(Self {
            process_id: body.try_get_i32_("BackendKeyData")?,
            secret_key: body.try_get_i32_("BackendKeyData")?,
        })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: String,
    /// The current value of the parameter.
    pub value: String,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ParameterStatus, msgtype);
        Ok(Self {
            name: body.get_nul_string()?,
            value: body.get_nul_string()?,
        })
    }
}

/// A warning message. The frontend should display the message.
#[derive(Debug)]
pub struct NoticeResponse {
    pub notice: Notice,
}

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(NoticeResponse, msgtype);
        Ok(Self { notice: Notice { fields: ErrorFields::parse(body)? } })
    }
}

/// Identifies the message as an error.
#[derive(Debug)]
pub struct ErrorResponse {
    pub error: ServerError,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ErrorResponse, msgtype);
        Ok(Self { error: ServerError { fields: ErrorFields::parse(body)? } })
    }
}

/// An asynchronous notification from `NOTIFY`.
///
/// May arrive at any time between other messages; it never participates in
/// the active query exchange.
#[derive(Debug)]
pub struct NotificationResponse {
    pub notification: Notification,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(NotificationResponse, msgtype);
        Ok(Self {
            notification: Notification {
                process_id: body.try_get_i32_("NotificationResponse")?,
                channel: body.get_nul_string()?,
                payload: body.get_nul_string()?,
            },
        })
    }
}

/// Per column metadata preceding data rows.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// The field name.
    pub name: String,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: u32,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub column_id: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see `pg_type.typlen`). Negative values denote
    /// variable-width types.
    pub type_size: i16,
    /// The type modifier (see `pg_attribute.atttypmod`).
    pub type_modifier: i32,
    /// The format the field values are transmitted in. In a RowDescription
    /// returned from the statement variant of Describe, the format is not
    /// yet known and is always text.
    pub format: Format,
}

impl FieldDescription {
    fn decode(body: &mut Bytes) -> Result<Self, ProtocolError> {
        Ok(Self {
            name: body.get_nul_string()?,
            table_oid: body.try_get_u32_("RowDescription")?,
            column_id: body.try_get_i16_("RowDescription")?,
            type_oid: body.try_get_u32_("RowDescription")?,
            type_size: body.try_get_i16_("RowDescription")?,
            type_modifier: body.try_get_i32_("RowDescription")?,
            format: Format::from_code(body.try_get_i16_("RowDescription")?),
        })
    }
}

/// Identifies the message as a row description.
///
/// The contents describe the column layout of the rows about to be returned;
/// a DataRow message follows for each row.
#[derive(Debug)]
pub struct RowDescription {
    pub fields: Vec<FieldDescription>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(RowDescription, msgtype);
        let field_len = body.try_get_i16_("RowDescription")?;
        let mut fields = Vec::with_capacity(field_len.max(0) as usize);
        for _ in 0..field_len {
            fields.push(FieldDescription::decode(&mut body)?);
        }
        Ok(Self { fields })
    }
}

/// Identifies the message as a data row.
///
/// Each column is length prefixed; -1 marks a NULL with no value bytes.
#[derive(Debug)]
pub struct DataRow {
    pub columns: Vec<Option<Bytes>>,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(DataRow, msgtype);
        let column_len = body.try_get_i16_("DataRow")?;
        let mut columns = Vec::with_capacity(column_len.max(0) as usize);
        for _ in 0..column_len {
            let len = body.try_get_i32_("DataRow")?;
            if len < 0 {
                columns.push(None);
                continue;
            }
            let len = len as usize;
            if body.remaining() < len {
                return Err(ProtocolError::Truncated { msg: "DataRow" });
            }
            columns.push(Some(body.split_to(len)));
        }
        Ok(Self { columns })
    }
}

/// Identifies the message as a command-completed response.
///
/// The tag is usually a single word that identifies which SQL command was
/// completed, followed by the affected row count for commands that have one,
/// e.g. `INSERT 0 1`, `SELECT 3`, `UPDATE 7`.
#[derive(Debug)]
pub struct CommandComplete {
    pub tag: String,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CommandComplete, msgtype);
        // the tag itself is nul terminated
        if body.last() == Some(&0) {
            body.truncate(body.len() - 1);
        }
        Ok(Self {
            tag: String::from_utf8(body.into()).map_err(ProtocolError::non_utf8)?,
        })
    }
}

/// Identifies the message as a protocol version negotiation message.
#[derive(Debug)]
pub struct NegotiateProtocolVersion {
    /// Newest minor protocol version supported by the server for the major
    /// protocol version requested by the client.
    pub minor: i32,
    /// Number of protocol options not recognized by the server.
    pub len: i32,
    pub opt_names: Bytes,
}

impl NegotiateProtocolVersion {
    pub const MSGTYPE: u8 = b'v';
}

impl BackendProtocol for NegotiateProtocolVersion {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(NegotiateProtocolVersion, msgtype);
        Ok(Self {
            minor: body.try_get_i32_("NegotiateProtocolVersion")?,
            len: body.try_get_i32_("NegotiateProtocolVersion")?,
            opt_names: body,
        })
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The object IDs of the statement's parameter data types.
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ParameterDescription, msgtype);
        let param_len = body.try_get_i16_("ParameterDescription")?;
        let mut oids = Vec::with_capacity(param_len.max(0) as usize);
        for _ in 0..param_len {
            oids.push(body.try_get_u32_("ParameterDescription")?);
        }
        Ok(Self { oids })
    }
}

/// ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    pub status: TransactionStatus,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(ReadyForQuery, msgtype);
        Ok(Self {
            status: TransactionStatus::from_code(body.try_get_u8_("ReadyForQuery")?)?,
        })
    }
}

/// Current backend transaction status indicator carried by `ReadyForQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// `I`: idle, not in a transaction block.
    Idle,
    /// `T`: in a transaction block.
    Transaction,
    /// `E`: in a failed transaction block; queries will be rejected until
    /// the block is ended.
    FailedTransaction,
}

impl TransactionStatus {
    fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            b'I' => Ok(Self::Idle),
            b'T' => Ok(Self::Transaction),
            b'E' => Ok(Self::FailedTransaction),
            _ => Err(ProtocolError::UnknownTxStatus(code)),
        }
    }
}

/// Identifies the message as a Start Copy In response.
///
/// The frontend must now send copy-in data, ending with CopyDone or
/// CopyFail.
#[derive(Debug)]
pub struct CopyInResponse {
    /// 0 for textual copy, 1 for binary copy.
    pub format: i8,
    /// Per column format codes.
    pub column_formats: Vec<Format>,
}

impl CopyInResponse {
    pub const MSGTYPE: u8 = b'G';
}

impl BackendProtocol for CopyInResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CopyInResponse, msgtype);
        decode_copy_response(body, "CopyInResponse")
            .map(|(format, column_formats)| Self { format, column_formats })
    }
}

/// Identifies the message as a Start Copy Out response.
#[derive(Debug)]
pub struct CopyOutResponse {
    pub format: i8,
    pub column_formats: Vec<Format>,
}

impl CopyOutResponse {
    pub const MSGTYPE: u8 = b'H';
}

impl BackendProtocol for CopyOutResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CopyOutResponse, msgtype);
        decode_copy_response(body, "CopyOutResponse")
            .map(|(format, column_formats)| Self { format, column_formats })
    }
}

fn decode_copy_response(
    mut body: Bytes,
    msg: &'static str,
) -> Result<(i8, Vec<Format>), ProtocolError> {
    let format = body.try_get_u8_(msg)? as i8;
    let column_len = body.try_get_i16_(msg)?;
    let mut column_formats = Vec::with_capacity(column_len.max(0) as usize);
    for _ in 0..column_len {
        column_formats.push(Format::from_code(body.try_get_i16_(msg)?));
    }
    Ok((format, column_formats))
}

/// Identifies the message as COPY data.
#[derive(Debug)]
pub struct CopyData {
    pub data: Bytes,
}

impl CopyData {
    pub const MSGTYPE: u8 = b'd';
}

impl BackendProtocol for CopyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(CopyData, msgtype);
        Ok(Self { data: body })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self, ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected($name::MSGTYPE, msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';

    /// Identifies the message as a portal-suspended indicator.
    ///
    /// Note this only appears if an Execute message's row-count limit was reached.
    struct PortalSuspended, b's';
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_backend_key_data() {
        let mut body = Vec::new();
        body.extend_from_slice(&1234i32.to_be_bytes());
        body.extend_from_slice(&5678i32.to_be_bytes());
        let BackendMessage::BackendKeyData(key) =
            BackendMessage::decode(b'K', Bytes::from(body)).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(key.process_id, 1234);
        assert_eq!(key.secret_key, 5678);
    }

    #[test]
    fn decodes_data_row_with_null() {
        let mut body = Vec::new();
        body.extend_from_slice(&2i16.to_be_bytes());
        body.extend_from_slice(&1i32.to_be_bytes());
        body.push(b'x');
        body.extend_from_slice(&(-1i32).to_be_bytes());
        let row = DataRow::decode(b'D', Bytes::from(body)).unwrap();
        assert_eq!(row.columns.len(), 2);
        assert_eq!(row.columns[0].as_deref(), Some(&b"x"[..]));
        assert!(row.columns[1].is_none());
    }

    #[test]
    fn data_row_shorter_than_declared_is_truncated() {
        let mut body = Vec::new();
        body.extend_from_slice(&1i16.to_be_bytes());
        body.extend_from_slice(&16i32.to_be_bytes());
        body.extend_from_slice(b"only four");
        let err = DataRow::decode(b'D', Bytes::from(body)).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn decodes_sasl_mechanism_list() {
        let body = Bytes::from_static(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        let Authentication::Sasl { mechanisms } = Authentication::decode(b'R', {
            let mut buf = Vec::new();
            buf.extend_from_slice(&10i32.to_be_bytes());
            buf.extend_from_slice(&body);
            Bytes::from(buf)
        })
        .unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(mechanisms, ["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let err = BackendMessage::decode(b'!', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Unknown { found: b'!' }));
    }

    #[test]
    fn ready_for_query_carries_transaction_status() {
        let rfq = ReadyForQuery::decode(b'Z', Bytes::from_static(b"E")).unwrap();
        assert_eq!(rfq.status, TransactionStatus::FailedTransaction);
        assert!(ReadyForQuery::decode(b'Z', Bytes::from_static(b"?")).is_err());
    }

    #[test]
    fn command_complete_strips_terminator() {
        let tag = CommandComplete::decode(b'C', Bytes::from_static(b"SELECT 1\0")).unwrap();
        assert_eq!(tag.tag, "SELECT 1");
    }
}
