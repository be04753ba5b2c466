//! Socket types owned by the transport.
mod socket;
mod maybe_tls;

pub use socket::Socket;
pub use maybe_tls::MaybeTls;
