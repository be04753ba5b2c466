//! Postgres Frontend Messages
//!
//! All struct fields here mirror the actual message sent to postgres.
use bytes::{BufMut, Bytes, BytesMut};

use super::{format::Format, oid::Oid};
use crate::ext::{BufMutExt, StrExt, UsizeExt};

/// write a frontend message to `buf`
///
/// messages written back to back into the same buffer are flushed as one
/// batch, which is how the extended query pipeline reaches the server as a
/// single write
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    let body = msg.size_hint();
    buf.reserve(1 + 4 + body as usize);

    // length counts itself but not the type byte
    buf.put_u8(F::MSGTYPE);
    buf.put_i32(4 + body);

    let before = buf.len();
    msg.encode(&mut *buf);
    let written = buf.len() - before;

    // a lying size hint would desynchronize every frame after this one
    assert!(
        written == body as usize,
        "message {:?} encoded {written} bytes but hinted {body}",
        F::MSGTYPE as char,
    );
}

/// A type which can be encoded into a postgres frontend message.
///
/// For historical reasons, the very first message sent by the client (the
/// startup message) has no initial message-type byte; neither do
/// [`SslRequest`] and [`CancelRequest`]. Those three do not implement
/// [`FrontendProtocol`] and write themselves through their own `write`.
pub trait FrontendProtocol {
    /// message type
    const MSGTYPE: u8;

    /// size of the main body
    ///
    /// note that this is *only* the size of the main body as opposed to the
    /// actual postgres message
    fn size_hint(&self) -> i32;

    /// write the main body of the message
    ///
    /// `buf` will receive exactly `size_hint` bytes; writing less or more
    /// results in panic
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message.
///
/// The protocol version number is followed by pairs of parameter name and
/// value strings, then a single terminating zero byte.
#[derive(Debug)]
pub struct Startup<'a> {
    /// Run-time parameters, `user` first. Parameter names beginning with
    /// `_pq_.` are reserved for protocol extensions.
    pub params: &'a [(&'a str, &'a str)],
}

impl Startup<'_> {
    /// Int32(196608): protocol version 3.0. The most significant 16 bits are
    /// the major version, the least significant 16 bits the minor version.
    pub const PROTOCOL_VERSION: i32 = 0x0003_0000;

    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_i32(0);

        buf.put_i32(Self::PROTOCOL_VERSION);

        for (name, value) in self.params {
            buf.put_nul_string(name);
            buf.put_nul_string(value);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length
        let mut written_buf = &mut buf[offset..];
        written_buf.put_i32(written_buf.len().to_i32());
    }
}

/// The SSL pre-handshake request, sent before anything else when an SSL
/// session is wanted.
///
/// Like [`Startup`] it carries no message-type byte; the body is the fixed
/// 8 bytes `00000008 04D2162F`. The server answers with a single byte,
/// `S` or `N`.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    pub const BYTES: [u8; 8] = [0x00, 0x00, 0x00, 0x08, 0x04, 0xd2, 0x16, 0x2f];

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_slice(&Self::BYTES);
    }
}

/// A cancellation request, sent on its *own* connection instead of a startup
/// message, carrying the key data of the session to cancel.
///
/// The server will process this request and then close the connection.
#[derive(Debug)]
pub struct CancelRequest {
    /// The process ID of the target backend.
    pub process_id: i32,
    /// The secret key for the target backend.
    pub secret_key: i32,
}

impl CancelRequest {
    /// Int32(80877102): chosen to not collide with any protocol version.
    pub const CODE: i32 = 80877102;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_i32(16);
        buf.put_i32(Self::CODE);
        buf.put_i32(self.process_id);
        buf.put_i32(self.secret_key);
    }
}

/// Identifies the message as a password response.
///
/// The payload is the password, possibly encrypted depending on the
/// authentication request that prompted it.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as an initial SASL response.
#[derive(Debug)]
pub struct SaslInitialResponse<'a> {
    /// Name of the selected SASL authentication mechanism.
    pub mechanism: &'a str,
    /// Mechanism specific "Initial Client Response".
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslInitialResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.mechanism.nul_string_len() + 4 + self.data.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.mechanism);
        buf.put_i32(self.data.len().to_i32());
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a SASL response to a server challenge.
#[derive(Debug)]
pub struct SaslResponse<'a> {
    /// Mechanism specific message data.
    pub data: &'a [u8],
}

impl FrontendProtocol for SaslResponse<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.data.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a simple query.
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn size_hint(&self) -> i32 {
        self.sql.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a Parse command.
pub struct Parse<'a> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub statement: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// Object IDs of the parameter data types. Placing a zero is equivalent
    /// to leaving the type unspecified.
    ///
    /// Note that this is not an indication of the number of parameters that
    /// might appear in the query string, only the number the frontend wants
    /// to prespecify types for.
    pub param_types: &'a [Oid],
}

impl FrontendProtocol for Parse<'_> {
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> i32 {
        self.statement.nul_string_len()
            + self.sql.nul_string_len()
            + 2
            + self.param_types.len().to_i32() * 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.statement);
        buf.put_nul_string(self.sql);
        buf.put_i16(self.param_types.len().to_i16());
        for oid in self.param_types {
            buf.put_u32(*oid);
        }
    }
}

/// Identifies the message as a Bind command.
///
/// Binds a prepared statement plus parameter values into a portal.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// The name of the source prepared statement (an empty string selects
    /// the unnamed prepared statement).
    pub statement: &'a str,
    /// Per parameter [`Format`]. May be empty (all text) or hold one entry
    /// per parameter.
    pub param_formats: &'a [Format],
    /// The parameter values, already encoded in their declared format.
    /// `None` is a NULL, transmitted as length -1 with no value bytes.
    pub param_values: &'a [Option<Bytes>],
    /// The result-column [`Format`]s. May be empty (all text), a single
    /// entry applied to every column, or one entry per column.
    pub result_formats: &'a [Format],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> i32 {
        self.portal.nul_string_len()
            + self.statement.nul_string_len()
            + 2
            + self.param_formats.len().to_i32() * 2
            + 2
            + self
                .param_values
                .iter()
                .fold(0i32, |acc, v| acc + 4 + v.as_ref().map_or(0, |v| v.len().to_i32()))
            + 2
            + self.result_formats.len().to_i32() * 2
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_nul_string(self.statement);

        buf.put_i16(self.param_formats.len().to_i16());
        for format in self.param_formats {
            buf.put_i16(format.format_code());
        }

        buf.put_i16(self.param_values.len().to_i16());
        for value in self.param_values {
            match value {
                None => buf.put_i32(-1),
                Some(value) => {
                    buf.put_i32(value.len().to_i32());
                    buf.put_slice(value);
                },
            }
        }

        buf.put_i16(self.result_formats.len().to_i16());
        for format in self.result_formats {
            buf.put_i16(format.format_code());
        }
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// `S` to describe a prepared statement; or `P` to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as an Execute command.
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal: &'a str,
    /// Maximum number of rows to return, if the portal contains a query that
    /// returns rows (ignored otherwise). Zero denotes "no limit".
    pub max_rows: i32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> i32 {
        self.portal.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal);
        buf.put_i32(self.max_rows);
    }
}

/// Identifies the message as a Close command.
pub struct Close<'a> {
    /// `S` to close a prepared statement; or `P` to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// COPY data sent from the frontend during copy-in.
pub struct CopyData<'a> {
    pub data: &'a [u8],
}

impl FrontendProtocol for CopyData<'_> {
    const MSGTYPE: u8 = b'd';

    fn size_hint(&self) -> i32 {
        self.data.len().to_i32()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_slice(self.data);
    }
}

/// Identifies the message as a COPY-failure indicator.
pub struct CopyFail<'a> {
    /// An error message to report as the cause of failure.
    pub message: &'a str,
}

impl FrontendProtocol for CopyFail<'_> {
    const MSGTYPE: u8 = b'f';

    fn size_hint(&self) -> i32 {
        self.message.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.message);
    }
}

macro_rules! fixed_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
        $(#[$doc])*
        pub struct $name;

        impl $name {
            /// The full precomputed frame; the body is always empty.
            pub const BYTES: [u8; 5] = [$ty, 0, 0, 0, 4];
        }

        impl FrontendProtocol for $name {
            const MSGTYPE: u8 = $ty;

            fn size_hint(&self) -> i32 { 0 }

            fn encode(self, _: impl BufMut) { }
        }
    )*};
}

fixed_msg! {
    /// Identifies the message as a Sync command.
    ///
    /// Closes the current extended-query pipeline; the server answers with
    /// ReadyForQuery once everything before it has been processed.
    struct Sync, b'S';

    /// Identifies the message as a Flush command.
    struct Flush, b'H';

    /// Identifies the message as a termination notice. No response is
    /// expected; the connection is closed right after.
    struct Terminate, b'X';

    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_frame_layout() {
        let mut buf = BytesMut::new();
        write(Query { sql: "SELECT 1" }, &mut buf);
        assert_eq!(&buf[..], b"Q\x00\x00\x00\x0dSELECT 1\0");
    }

    #[test]
    fn fixed_frames_match_generic_writer() {
        let mut buf = BytesMut::new();
        write(Sync, &mut buf);
        assert_eq!(&buf[..], &Sync::BYTES);

        buf.clear();
        write(Flush, &mut buf);
        assert_eq!(&buf[..], &Flush::BYTES);

        buf.clear();
        write(Terminate, &mut buf);
        assert_eq!(&buf[..], &Terminate::BYTES);
    }

    #[test]
    fn ssl_request_is_the_documented_8_bytes() {
        let mut buf = BytesMut::new();
        SslRequest.write(&mut buf);
        assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x08, 0x04, 0xd2, 0x16, 0x2f]);
    }

    #[test]
    fn cancel_request_layout() {
        let mut buf = BytesMut::new();
        CancelRequest { process_id: 42, secret_key: -7 }.write(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[..8], &[0, 0, 0, 16, 0x04, 0xd2, 0x16, 0x2e]);
        assert_eq!(&buf[8..12], &42i32.to_be_bytes());
        assert_eq!(&buf[12..16], &(-7i32).to_be_bytes());
    }

    #[test]
    fn bind_encodes_null_as_minus_one() {
        let mut buf = BytesMut::new();
        write(
            Bind {
                portal: "",
                statement: "s1",
                param_formats: &[Format::Text, Format::Text],
                param_values: &[Some(Bytes::from_static(b"hello")), None],
                result_formats: &[Format::Text],
            },
            &mut buf,
        );

        // portal "" + statement "s1"
        assert_eq!(&buf[5..7], b"\0s");
        // locate the NULL length right after the "hello" value
        let needle = b"hello";
        let at = buf.windows(needle.len()).position(|w| w == needle).unwrap();
        assert_eq!(&buf[at + 5..at + 9], &(-1i32).to_be_bytes());
    }

    #[test]
    fn startup_writes_version_then_params() {
        let mut buf = BytesMut::new();
        Startup { params: &[("user", "alice"), ("database", "alice")] }.write(&mut buf);

        let len = i32::from_be_bytes(buf[..4].try_into().unwrap());
        assert_eq!(len as usize, buf.len());
        assert_eq!(&buf[4..8], &0x0003_0000i32.to_be_bytes());
        assert_eq!(&buf[8..], b"user\0alice\0database\0alice\0\0");
    }
}
