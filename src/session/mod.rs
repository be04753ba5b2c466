//! The protocol session: connection state machine, query engine, events.
mod config;
mod startup;

pub use config::{Config, ConfigError, Password, PasswordProvider, SslMode};

use std::{
    collections::{HashMap, HashSet},
    fmt, io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Error, Result,
    cancel::CancelHandle,
    error::{Cancelled, ClientClosed, ConnectionTerminated, QueryTimeout},
    net::{MaybeTls, Socket},
    protocol::{
        BackendMessage, FieldDescription, Format, Notice, Notification, Oid, ProtocolError,
        TransactionStatus,
        backend::{self, BackendKeyData},
        frontend,
    },
    query::{Query, Submitted},
    queue::{QueryId, QueryQueue},
    row::{QueryResult, Row},
    stream::PgStream,
    tls::{NoTls, TlsConnect},
    transport::PgTransport,
    types::{DecodeError, PgValue, TypeParser, TypeRegistry, decode_column},
};

/// Connect over plain TCP (or a domain socket for `/` hosts).
///
/// Equivalent to [`connect_tls`] with [`NoTls`]; a config demanding
/// [`SslMode::Require`] fails during the upgrade.
pub async fn connect(config: &Config) -> Result<Session<MaybeTls<Socket, Socket>>> {
    connect_tls(config, NoTls).await
}

/// Connect, upgrading to TLS through `tls` when the config requests SSL.
///
/// The SSL pre-handshake happens here: the fixed `SSLRequest` goes out
/// before anything else, and only an `S` verdict hands the raw socket to
/// the connector.
pub async fn connect_tls<T>(
    config: &Config,
    tls: T,
) -> Result<Session<MaybeTls<Socket, T::Stream>>>
where
    T: TlsConnect<Socket>,
{
    let socket = open_socket(config).await?;

    let io = match config.ssl {
        SslMode::Disable => MaybeTls::Raw(socket),
        SslMode::Require => {
            let mut stream = PgStream::new(socket);
            stream.ssl_handshake().await?;
            let socket = stream.into_io();
            MaybeTls::Tls(tls.connect(socket, &config.host).await?)
        },
    };

    Session::connect_raw(io, config).await
}

async fn open_socket(config: &Config) -> Result<Socket> {
    let connect = async {
        match config.socket_path() {
            Some(path) => Socket::connect_socket(&path).await,
            None => Socket::connect_tcp(&config.host, config.port, config.keepalive).await,
        }
    };

    let socket = match config.connect_timeout {
        // the timeout drops the pending connect, which closes the socket
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
        None => connect.await?,
    };
    Ok(socket)
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    SslNegotiating,
    Authenticating,
    /// Idle; the next queued query is submitted from here.
    Ready,
    /// One query in flight. Leaves only on `ReadyForQuery`.
    Busy,
    Ending,
    Ended,
    /// The transport died under us; everything queued was failed.
    Failed,
}

/// One postgres session: a framed stream plus the protocol state machine
/// on top of it.
///
/// Queries are strictly serialized: however many get
/// [`enqueue`][Session::enqueue]d, exactly one submit batch is written
/// between any two `Ready` states. There is no cross-query pipelining; the
/// protocol forbids it.
pub struct Session<IO = MaybeTls<Socket, Socket>> {
    stream: PgStream<IO>,
    state: SessionState,
    key_data: Option<BackendKeyData>,
    parameters: HashMap<String, String>,
    tx_status: TransactionStatus,
    /// Statement names the server knows on this session. Only grows;
    /// dropped wholesale at teardown with the rest of the session.
    parsed_statements: HashSet<String>,
    queue: QueryQueue,
    active: Option<ActiveQuery>,
    handlers: EventHandlers,
    types: TypeRegistry,
    binary_results: bool,
    default_timeout: Option<Duration>,
    host: String,
    port: u16,
    socket_path: Option<String>,
}

struct ActiveQuery {
    id: QueryId,
    /// Statement name to record once `ParseComplete` arrives.
    register: Option<String>,
    timeout: Option<Pin<Box<tokio::time::Sleep>>>,
    /// The caller already got a timeout error; the exchange is drained to
    /// `ReadyForQuery` without them.
    timed_out: bool,
    /// Failure scoped to this query; delivered at `ReadyForQuery`.
    failed: Option<Error>,
    fields: Arc<[FieldDescription]>,
    result: QueryResult,
}

#[derive(Default)]
struct EventHandlers {
    connect: Option<Box<dyn FnMut() + Send>>,
    end: Option<Box<dyn FnMut() + Send>>,
    error: Option<Box<dyn FnMut(&Error) + Send>>,
    notification: Option<Box<dyn FnMut(Notification) + Send>>,
    notice: Option<Box<dyn FnMut(Notice) + Send>>,
    drain: Option<Box<dyn FnMut() + Send>>,
}

impl<IO> Session<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Run startup and authentication over an already established stream.
    ///
    /// Completes on the first `ReadyForQuery`. The first error during the
    /// phase fails the connect; a server that follows up with more errors
    /// has them discarded with the connection.
    pub async fn connect_raw(io: IO, config: &Config) -> Result<Session<IO>> {
        let mut stream = PgStream::with_frame_cap(io, config.frame_cap);
        let bootstrap = startup::handshake(&mut stream, config).await?;

        let mut session = Session {
            stream,
            state: SessionState::Ready,
            key_data: bootstrap.key_data,
            parameters: bootstrap.parameters,
            tx_status: bootstrap.tx_status,
            parsed_statements: HashSet::new(),
            queue: QueryQueue::default(),
            active: None,
            handlers: EventHandlers::default(),
            types: TypeRegistry::default(),
            binary_results: config.binary_results,
            default_timeout: config.query_timeout,
            host: config.host.clone(),
            port: config.port,
            socket_path: config.socket_path(),
        };
        session.emit_connect();
        Ok(session)
    }

    // ===== Introspection =====

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The backend process id, once `BackendKeyData` arrived.
    pub fn process_id(&self) -> Option<i32> {
        self.key_data.map(|k| k.process_id)
    }

    /// Transaction status from the latest `ReadyForQuery`.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.tx_status
    }

    /// A server reported run-time parameter, e.g. `server_version`.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Best-effort cancel of whatever is in flight right now.
    ///
    /// Rides a second connection; this session's state is untouched. When
    /// the cancel lands, the active query fails with SQLSTATE `57014` on
    /// this session and the server then reports ready as usual.
    pub async fn cancel(&self) -> Result<()> {
        match self.cancel_handle() {
            Some(handle) => handle.cancel().await,
            // no key data yet, nothing running that could be cancelled
            None => Ok(()),
        }
    }

    /// Key data for cancelling this session's queries from elsewhere.
    /// `None` until the server issued it.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        let key = self.key_data?;
        Some(CancelHandle {
            host: self.host.clone(),
            port: self.port,
            socket_path: self.socket_path.clone(),
            process_id: key.process_id,
            secret_key: key.secret_key,
        })
    }

    // ===== Events =====

    pub fn on_connect(&mut self, handler: impl FnMut() + Send + 'static) {
        self.handlers.connect = Some(Box::new(handler));
    }

    pub fn on_end(&mut self, handler: impl FnMut() + Send + 'static) {
        self.handlers.end = Some(Box::new(handler));
    }

    /// Session level errors: anything fatal, and server errors that arrive
    /// outside a query.
    pub fn on_error(&mut self, handler: impl FnMut(&Error) + Send + 'static) {
        self.handlers.error = Some(Box::new(handler));
    }

    pub fn on_notification(&mut self, handler: impl FnMut(Notification) + Send + 'static) {
        self.handlers.notification = Some(Box::new(handler));
    }

    pub fn on_notice(&mut self, handler: impl FnMut(Notice) + Send + 'static) {
        self.handlers.notice = Some(Box::new(handler));
    }

    /// Fires when the queue runs dry after a query cycle.
    pub fn on_drain(&mut self, handler: impl FnMut() + Send + 'static) {
        self.handlers.drain = Some(Box::new(handler));
    }

    fn emit_connect(&mut self) {
        if let Some(handler) = &mut self.handlers.connect {
            handler();
        }
    }

    fn emit_end(&mut self) {
        if let Some(handler) = &mut self.handlers.end {
            handler();
        }
    }

    fn emit_error(&mut self, err: &Error) {
        match &mut self.handlers.error {
            Some(handler) => handler(err),
            None => {
                #[cfg(feature = "log")]
                log::error!("{err}");
            },
        }
    }

    fn emit_notification(&mut self, notification: Notification) {
        if let Some(handler) = &mut self.handlers.notification {
            handler(notification);
        }
    }

    fn emit_notice(&mut self, notice: Notice) {
        match &mut self.handlers.notice {
            Some(handler) => handler(notice),
            None => {
                #[cfg(feature = "log")]
                log::warn!("{notice}");
            },
        }
    }

    fn emit_drain(&mut self) {
        if let Some(handler) = &mut self.handlers.drain {
            handler();
        }
    }

    // ===== Type decoding =====

    /// Override column decoding for one `(oid, format)` pair on this
    /// session.
    pub fn set_type_parser<F>(&mut self, oid: Oid, format: Format, parser: F)
    where
        F: Fn(&[u8]) -> std::result::Result<PgValue, DecodeError> + Send + Sync + 'static,
    {
        self.types.set(oid, format, Arc::new(parser));
    }

    /// The parser column decoding would use, minus the built-in defaults.
    pub fn get_type_parser(&self, oid: Oid, format: Format) -> Option<TypeParser> {
        self.types
            .get(oid, format)
            .or_else(|| crate::types::get_global_type_parser(oid, format))
    }

    // ===== Queue =====

    /// Append a query to the queue.
    ///
    /// Fails synchronously once [`end`][Session::end] was called.
    pub fn enqueue(&mut self, query: impl Into<Query>) -> Result<QueryId> {
        match self.state {
            SessionState::Ending | SessionState::Ended => Err(ClientClosed.into()),
            SessionState::Failed => Err(ConnectionTerminated { unexpected: true }.into()),
            _ => Ok(self.queue.push(query.into())),
        }
    }

    /// Remove a query that has not reached the wire yet.
    ///
    /// Returns false when it is too late: the query was already submitted
    /// (cancel it via [`cancel_handle`][Session::cancel_handle]) or
    /// finished.
    pub fn cancel_queued(&mut self, id: QueryId) -> bool {
        let removed = self.queue.remove(id);
        if removed {
            self.queue.store(id, Err(Cancelled.into()));
        }
        removed
    }

    /// Enqueue and drive to completion.
    pub async fn query(&mut self, query: impl Into<Query>) -> Result<QueryResult> {
        let id = self.enqueue(query)?;
        self.run(id).await
    }

    /// Drive the session until the given queued query has its result.
    ///
    /// Earlier queue entries are served first; that is the FIFO contract.
    pub async fn run(&mut self, id: QueryId) -> Result<QueryResult> {
        std::future::poll_fn(|cx| self.poll_run(cx, id)).await
    }

    /// Enqueue and stream rows as they are decoded.
    pub fn fetch(&mut self, query: impl Into<Query>) -> Result<RowStream<'_, IO>> {
        let id = self.enqueue(query)?;
        Ok(RowStream {
            session: self,
            id,
            emitted: 0,
            finished: None,
            done: false,
        })
    }

    fn poll_run(&mut self, cx: &mut Context, id: QueryId) -> Poll<Result<QueryResult>> {
        loop {
            if let Some(result) = self.queue.take(id) {
                return Poll::Ready(result);
            }
            let in_flight = self.active.as_ref().is_some_and(|a| a.id == id);
            if !in_flight && !self.queue.is_queued(id) {
                // unknown handle, or its result was already taken
                return Poll::Ready(Err(Cancelled.into()));
            }
            ready!(self.poll_step(cx))?;
        }
    }

    /// Advance the machine by one step: submit when ready, read one
    /// message when busy.
    fn poll_step(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        match self.state {
            SessionState::Ready => {
                self.pulse();
                Poll::Ready(Ok(()))
            },
            SessionState::Busy => self.poll_busy(cx),
            SessionState::Ending | SessionState::Ended => {
                Poll::Ready(Err(ClientClosed.into()))
            },
            SessionState::Failed => {
                Poll::Ready(Err(ConnectionTerminated { unexpected: true }.into()))
            },
            SessionState::Disconnected
            | SessionState::Connecting
            | SessionState::SslNegotiating
            | SessionState::Authenticating => {
                unreachable!("a constructed session is past the startup states")
            },
        }
    }

    /// Pop and submit the queue head. Runs only from `Ready` with no
    /// active query; a submit failure fails that query and tries the next.
    fn pulse(&mut self) {
        debug_assert!(self.active.is_none(), "pulse with a query in flight");

        while let Some(pending) = self.queue.pop() {
            match pending.query.submit(
                &mut self.stream,
                &self.parsed_statements,
                self.binary_results,
            ) {
                Ok(submitted) => {
                    let register = match submitted {
                        Submitted::Extended { register } => register,
                        Submitted::Simple => None,
                    };
                    let timeout = pending
                        .query
                        .timeout
                        .or(self.default_timeout)
                        .map(|limit| Box::pin(tokio::time::sleep(limit)));
                    self.active = Some(ActiveQuery {
                        id: pending.id,
                        register,
                        timeout,
                        timed_out: false,
                        failed: None,
                        fields: Vec::new().into(),
                        result: QueryResult::default(),
                    });
                    self.state = SessionState::Busy;
                    return;
                },
                Err(err) => {
                    // preparation failed before anything hit the wire
                    self.queue.store(pending.id, Err(err));
                },
            }
        }
    }

    fn poll_busy(&mut self, cx: &mut Context) -> Poll<Result<()>> {
        // the submit batch reaches the wire before we park on the reply
        if let Err(err) = ready!(self.stream.poll_flush(cx)) {
            return Poll::Ready(Err(self.fail(err.into())));
        }

        if let Some(active) = &mut self.active {
            if !active.timed_out
                && let Some(timeout) = active.timeout.as_mut()
                && timeout.as_mut().poll(cx).is_ready()
            {
                active.timed_out = true;
                let id = active.id;
                self.queue.store(id, Err(QueryTimeout.into()));
                // unblock the caller now; the exchange keeps draining
                return Poll::Ready(Ok(()));
            }
        }

        match ready!(self.stream.poll_recv(cx)) {
            Ok(message) => match self.on_message(message) {
                Ok(()) => Poll::Ready(Ok(())),
                Err(err) => Poll::Ready(Err(self.fail(err))),
            },
            Err(err) => Poll::Ready(Err(self.fail(err))),
        }
    }

    /// Route one backend message. `Err` means the session is beyond saving.
    fn on_message(&mut self, message: BackendMessage) -> Result<()> {
        use BackendMessage::*;

        match message {
            // may arrive interleaved with anything; never part of the
            // active query exchange
            ParameterStatus(param) => {
                self.parameters.insert(param.name, param.value);
            },
            NoticeResponse(notice) => self.emit_notice(notice.notice),
            NotificationResponse(n) => self.emit_notification(n.notification),

            ParseComplete(_) => {
                if let Some(active) = &mut self.active
                    && let Some(name) = active.register.take()
                {
                    self.parsed_statements.insert(name);
                }
            },
            BindComplete(_) | CloseComplete(_) | NoData(_) | ParameterDescription(_) => {},

            RowDescription(rd) => {
                if let Some(active) = &mut self.active {
                    active.begin_row_set(rd.fields);
                }
            },
            DataRow(row) => self.on_data_row(row),
            CommandComplete(cmd) => {
                if let Some(active) = &mut self.active {
                    active.result.command_tag = Some(cmd.tag);
                }
            },
            EmptyQueryResponse(_) => {
                // substitutes for CommandComplete: a zero row, tagless result
            },
            PortalSuspended(_) => {
                if let Some(active) = &mut self.active {
                    active.result.suspended = true;
                }
            },

            ErrorResponse(err) => self.on_error_response(err.error),
            ReadyForQuery(ready) => {
                self.tx_status = ready.status;
                self.finalize_active();
                self.state = SessionState::Ready;
                if self.queue.is_empty() {
                    self.emit_drain();
                }
            },

            CopyInResponse(_) => {
                // refuse the transfer; the server follows up with an
                // ErrorResponse that fails the query, then ReadyForQuery
                self.stream
                    .send(frontend::CopyFail { message: "COPY is not supported by this client" });
            },
            CopyOutResponse(_) | CopyData(_) | CopyDone(_) => {
                if let Some(active) = &mut self.active
                    && active.failed.is_none()
                {
                    active.failed = Some(
                        ProtocolError::unexpected_phase(message.msgtype(), "copy-out transfer")
                            .into(),
                    );
                }
            },

            Authentication(_) | BackendKeyData(_) | NegotiateProtocolVersion(_) => {
                return Err(
                    ProtocolError::unexpected_phase(message.msgtype(), "query cycle").into()
                );
            },
        }
        Ok(())
    }

    fn on_data_row(&mut self, row: backend::DataRow) {
        let Some(active) = &mut self.active else { return };
        if active.timed_out || active.failed.is_some() {
            return;
        }

        let fields = active.fields.clone();
        let mut columns = Vec::with_capacity(row.columns.len());
        for (at, raw) in row.columns.iter().enumerate() {
            let Some(field) = fields.get(at) else {
                active.failed = Some(
                    ProtocolError::unexpected_phase(backend::DataRow::MSGTYPE, "row description")
                        .into(),
                );
                return;
            };
            match decode_column(&self.types, field.type_oid, field.format, raw.as_ref()) {
                Ok(value) => columns.push(value),
                Err(err) => {
                    active.failed = Some(err.into());
                    return;
                },
            }
        }

        active.result.rows.push(Row::new(fields, columns));
        active.result.row_count += 1;
    }

    fn on_error_response(&mut self, err: crate::protocol::ServerError) {
        match &mut self.active {
            // scoped to the query; finalized at ReadyForQuery
            Some(active) if !active.timed_out => {
                if active.failed.is_none() {
                    active.failed = Some(err.into());
                } else {
                    // the first error wins; later ones only get logged
                    #[cfg(feature = "log")]
                    log::debug!("discarding follow-up server error: {err}");
                }
            },
            _ => {
                let err: Error = err.into();
                self.emit_error(&err);
            },
        }
    }

    fn finalize_active(&mut self) {
        let Some(active) = self.active.take() else { return };
        if active.timed_out {
            // the caller already holds the timeout error
            return;
        }
        let result = match active.failed {
            Some(err) => Err(err),
            None => Ok(active.result),
        };
        self.queue.store(active.id, result);
    }

    /// Put the session out of service after a transport or protocol fault.
    fn fail(&mut self, err: Error) -> Error {
        self.state = SessionState::Failed;
        if let Some(active) = self.active.take()
            && !active.timed_out
        {
            self.queue
                .store(active.id, Err(ConnectionTerminated { unexpected: true }.into()));
        }
        self.queue
            .fail_all(|| ConnectionTerminated { unexpected: true }.into());
        self.emit_error(&err);
        self.emit_end();
        err
    }

    // ===== Teardown =====

    /// Orderly teardown.
    ///
    /// Idle: write `Terminate` and half-close. Busy: hard-destroy the
    /// socket, so a hung backend cannot block shutdown. Queued queries
    /// fail with a termination error either way.
    pub async fn end(&mut self) -> Result<()> {
        if matches!(self.state, SessionState::Ended) {
            return Ok(());
        }

        let busy = matches!(self.state, SessionState::Busy);
        self.state = SessionState::Ending;
        if let Some(active) = self.active.take()
            && !active.timed_out
        {
            self.queue
                .store(active.id, Err(ConnectionTerminated { unexpected: false }.into()));
        }
        self.queue
            .fail_all(|| ConnectionTerminated { unexpected: false }.into());

        let outcome = match busy {
            true => {
                self.stream.destroy().await;
                Ok(())
            },
            false => self.stream.end().await.map_err(Error::from),
        };

        self.state = SessionState::Ended;
        self.emit_end();
        outcome
    }

    /// Hard close without `Terminate`.
    pub async fn destroy(&mut self) {
        if matches!(self.state, SessionState::Ended) {
            return;
        }
        self.state = SessionState::Ending;
        if let Some(active) = self.active.take()
            && !active.timed_out
        {
            self.queue
                .store(active.id, Err(ConnectionTerminated { unexpected: false }.into()));
        }
        self.queue
            .fail_all(|| ConnectionTerminated { unexpected: false }.into());
        self.stream.destroy().await;
        self.state = SessionState::Ended;
        self.emit_end();
    }
}

impl<IO> fmt::Debug for Session<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("process_id", &self.key_data.map(|k| k.process_id))
            .field("tx_status", &self.tx_status)
            .field("parsed_statements", &self.parsed_statements.len())
            .finish_non_exhaustive()
    }
}

/// Rows of one query, yielded as the session decodes them.
///
/// Must be polled to completion, or the remaining protocol exchange will
/// be drained by the next operation on the session instead.
#[must_use = "streams do nothing unless polled"]
pub struct RowStream<'s, IO> {
    session: &'s mut Session<IO>,
    id: QueryId,
    emitted: usize,
    finished: Option<QueryResult>,
    done: bool,
}

impl<IO> RowStream<'_, IO> {
    /// The queued query this stream feeds from.
    pub fn id(&self) -> QueryId {
        self.id
    }
}

impl<IO> futures_core::Stream for RowStream<'_, IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let me = self.get_mut();

        loop {
            if me.done {
                return Poll::Ready(None);
            }

            if let Some(result) = &me.finished {
                match result.rows.get(me.emitted) {
                    Some(row) => {
                        me.emitted += 1;
                        return Poll::Ready(Some(Ok(row.clone())));
                    },
                    None => {
                        me.done = true;
                        return Poll::Ready(None);
                    },
                }
            }

            if let Some(active) = &me.session.active
                && active.id == me.id
                && let Some(row) = active.result.rows.get(me.emitted)
            {
                let row = row.clone();
                me.emitted += 1;
                return Poll::Ready(Some(Ok(row)));
            }

            if let Some(result) = me.session.queue.take(me.id) {
                match result {
                    Ok(result) => me.finished = Some(result),
                    Err(err) => {
                        me.done = true;
                        return Poll::Ready(Some(Err(err)));
                    },
                }
                continue;
            }

            let in_flight = me.session.active.as_ref().is_some_and(|a| a.id == me.id);
            if !in_flight && !me.session.queue.is_queued(me.id) {
                me.done = true;
                return Poll::Ready(None);
            }

            if let Err(err) = ready!(me.session.poll_step(cx)) {
                me.done = true;
                return Poll::Ready(Some(Err(err)));
            }
        }
    }
}

impl ActiveQuery {
    /// A `RowDescription` opens a (new) row set: the field list resets,
    /// already accumulated rows of earlier statements in a simple multi
    /// statement query stay.
    fn begin_row_set(&mut self, fields: Vec<FieldDescription>) {
        self.result.fields = fields.clone();
        self.fields = fields.into();
    }
}
