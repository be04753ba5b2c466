//! Postgres wire protocol engine and query lifecycle.
//!
//! # Examples
//!
//! Connect, query, disconnect:
//!
//! ```no_run
//! use pglink::{Config, Query};
//!
//! # async fn app() -> pglink::Result<()> {
//! let config = Config::new("postgres").password("secret").dbname("app");
//! let mut session = pglink::connect(&config).await?;
//!
//! let res = session
//!     .query(Query::new("SELECT id, name FROM users WHERE id = $1").bind(42i64))
//!     .await?;
//!
//! for row in res.rows() {
//!     println!("{:?} -> {:?}", row.get_named("id"), row.get_named("name"));
//! }
//!
//! session.end().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Listen for notifications while running queries:
//!
//! ```no_run
//! # async fn app() -> pglink::Result<()> {
//! let mut session = pglink::connect(&pglink::Config::from_env()).await?;
//!
//! session.on_notification(|n| println!("{}: {}", n.channel, n.payload));
//! session.query("LISTEN events").await?;
//! # Ok(())
//! # }
//! ```
//!
//! Cancel a slow query from another task:
//!
//! ```no_run
//! # async fn app(session: &mut pglink::Session) -> pglink::Result<()> {
//! let cancel = session.cancel_handle().expect("connected sessions have key data");
//! tokio::spawn(cancel.cancel());
//! # Ok(())
//! # }
//! ```

mod ext;
mod io;
mod net;

// Protocol
pub mod protocol;

// Encoding
mod escape;
mod value;
pub mod types;

// Component
mod queue;
pub mod query;
pub mod row;

// Operation
pub mod transport;
mod stream;
mod scram;

// Connection
pub mod session;
mod cancel;
mod tls;

mod error;

#[doc(inline)]
pub use session::{Config, ConfigError, Password, Session, SessionState, SslMode, connect, connect_tls};
#[doc(inline)]
pub use query::Query;
#[doc(inline)]
pub use queue::QueryId;
#[doc(inline)]
pub use row::{QueryResult, Row};
#[doc(inline)]
pub use types::{DecodeError, PgValue, set_global_type_parser};
#[doc(inline)]
pub use value::{PgParam, PrepareError, ToPostgres, prepare_value};
pub use escape::{escape_identifier, escape_literal};
#[doc(inline)]
pub use protocol::{
    FieldDescription, Format, Notice, Notification, Oid, ProtocolError, ServerError,
    TransactionStatus,
};
#[doc(inline)]
pub use cancel::CancelHandle;
#[doc(inline)]
pub use stream::PgStream;
#[doc(inline)]
pub use net::{MaybeTls, Socket};
#[doc(inline)]
pub use tls::{NoTls, TlsConnect};
#[doc(inline)]
pub use error::{
    AuthError, Cancelled, ClientClosed, ConnectionTerminated, Error, ErrorKind, QueryTimeout,
    Result, SslError,
};
