//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        i32        ┃ [u8] ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ 43 ┃ 00 | 00 | 00 | 32 ┃  ..  ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte; the same goes for the SSL pre-handshake request and
//! the out-of-band cancel request.
//!
//! ## Extended Query Overview
//!
//! In the extended-query protocol, the overall execution cycle consists of a
//! *Parse* step, which creates a prepared statement from a textual query
//! string, a *Bind* step, which creates a portal given a prepared statement
//! and values for any needed parameters, and an *Execute* step that runs a
//! portal's query. A *Sync* closes the pipeline and provokes ReadyForQuery.
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>

mod format;
pub mod oid;

pub mod frontend;
pub mod backend;

mod error;
mod server_error;

pub use oid::Oid;
pub use format::Format;

pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol, FieldDescription, TransactionStatus};

pub use error::ProtocolError;
pub use server_error::{ErrorFields, Notice, Notification, ServerError};
