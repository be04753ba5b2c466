//! Out-of-band query cancellation.
use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    Result,
    net::Socket,
    protocol::frontend::CancelRequest,
};

/// Everything needed to cancel this session's in-flight query from
/// anywhere: the server address plus the key data issued at startup.
///
/// Cancellation rides a *new* connection. The target session is untouched;
/// if the cancel lands, the server aborts the running query and the target
/// observes an `ErrorResponse` (SQLSTATE `57014`) on its own connection,
/// then returns to ready as usual. Best effort by design: the server may
/// have finished the query already.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) socket_path: Option<String>,
    pub(crate) process_id: i32,
    pub(crate) secret_key: i32,
}

impl CancelHandle {
    /// The process id of the backend this handle targets.
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Open a fresh connection, fire the cancel request, close.
    pub async fn cancel(self) -> Result<()> {
        let mut socket = match &self.socket_path {
            Some(path) => Socket::connect_socket(path).await?,
            None => Socket::connect_tcp(&self.host, self.port, None).await?,
        };
        send_cancel(&mut socket, self.process_id, self.secret_key).await?;
        Ok(())
    }
}

/// Write the 16 byte cancel request and shut the stream down.
pub(crate) async fn send_cancel<IO>(io: &mut IO, process_id: i32, secret_key: i32) -> Result<()>
where
    IO: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(16);
    CancelRequest { process_id, secret_key }.write(&mut buf);
    io.write_all(&buf).await?;
    io.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn wire_layout() {
        let (mut client, mut server) = tokio::io::duplex(64);

        send_cancel(&mut client, 77, 1234).await.unwrap();

        use tokio::io::AsyncReadExt;
        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();

        assert_eq!(raw.len(), 16);
        assert_eq!(&raw[..4], &16i32.to_be_bytes());
        assert_eq!(&raw[4..8], &80877102i32.to_be_bytes());
        assert_eq!(&raw[8..12], &77i32.to_be_bytes());
        assert_eq!(&raw[12..16], &1234i32.to_be_bytes());
    }
}
