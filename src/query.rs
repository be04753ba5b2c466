//! Query descriptors and their submit strategies.
use std::{collections::HashSet, time::Duration};

use crate::{
    Result,
    protocol::{Format, Oid, frontend},
    transport::PgTransport,
    value::{PgParam, encode_param},
};

/// One caller request.
///
/// A query with no parameters and no statement name goes over the simple
/// protocol as a single `Query` message. Anything else uses the extended
/// protocol: `Parse` (unless the name is already known to the server on
/// this session), `Bind`, `Describe`, `Execute`, `Sync`, written as one
/// batch.
#[derive(Debug)]
pub struct Query {
    pub(crate) sql: String,
    pub(crate) params: Vec<PgParam>,
    pub(crate) statement: Option<String>,
    pub(crate) portal: Option<String>,
    pub(crate) binary: Option<bool>,
    pub(crate) max_rows: i32,
    pub(crate) timeout: Option<Duration>,
}

impl Query {
    pub fn new(sql: impl Into<String>) -> Query {
        Query {
            sql: sql.into(),
            params: Vec::new(),
            statement: None,
            portal: None,
            binary: None,
            max_rows: 0,
            timeout: None,
        }
    }

    /// Bind the next positional parameter.
    pub fn bind(mut self, param: impl Into<PgParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// Name the prepared statement so later queries with the same name can
    /// skip the `Parse` step on this session.
    pub fn name(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }

    /// Bind into a named portal instead of the unnamed one.
    pub fn portal(mut self, portal: impl Into<String>) -> Self {
        self.portal = Some(portal.into());
        self
    }

    /// Request binary (or explicitly text) result columns, overriding the
    /// session default.
    pub fn binary(mut self, binary: bool) -> Self {
        self.binary = Some(binary);
        self
    }

    /// Limit each `Execute` to this many rows; the portal suspends when the
    /// limit is hit. Zero means no limit.
    pub fn max_rows(mut self, max_rows: i32) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Client side read timeout for this query alone.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Write this query's submit batch into the transport buffer.
    ///
    /// Parameter preparation happens before anything is buffered, so a
    /// failure here leaves the wire untouched.
    pub(crate) fn submit<T: PgTransport>(
        &self,
        io: &mut T,
        parsed: &HashSet<String>,
        binary_default: bool,
    ) -> Result<Submitted> {
        let binary = self.binary.unwrap_or(binary_default);

        // the simple protocol cannot bind parameters, name statements,
        // limit rows, or request binary columns
        let simple = self.params.is_empty()
            && self.statement.is_none()
            && self.portal.is_none()
            && self.max_rows == 0
            && !binary;
        if simple {
            io.send(frontend::Query { sql: &self.sql });
            return Ok(Submitted::Simple);
        }

        let mut formats = Vec::with_capacity(self.params.len());
        let mut values = Vec::with_capacity(self.params.len());
        let mut oids: Vec<Oid> = Vec::with_capacity(self.params.len());
        for param in &self.params {
            let (format, value) = encode_param(param)?;
            formats.push(format);
            values.push(value);
            oids.push(param.oid());
        }

        let statement = self.statement.as_deref().unwrap_or("");
        let portal = self.portal.as_deref().unwrap_or("");

        let needs_parse = match self.statement.as_deref() {
            Some(name) => !parsed.contains(name),
            None => true,
        };
        if needs_parse {
            io.send(frontend::Parse { statement, sql: &self.sql, param_types: &oids });
        }

        let result_format = match binary {
            true => Format::Binary,
            false => Format::Text,
        };

        io.send(frontend::Bind {
            portal,
            statement,
            param_formats: &formats,
            param_values: &values,
            result_formats: &[result_format],
        });
        io.send(frontend::Describe { kind: b'P', name: portal });
        io.send(frontend::Execute { portal, max_rows: self.max_rows });
        io.send(frontend::Sync);

        Ok(Submitted::Extended {
            register: needs_parse.then(|| self.statement.clone()).flatten(),
        })
    }
}

impl From<&str> for Query {
    fn from(sql: &str) -> Self {
        Query::new(sql)
    }
}

impl From<String> for Query {
    fn from(sql: String) -> Self {
        Query::new(sql)
    }
}

/// What the submit step wrote.
#[derive(Debug)]
pub(crate) enum Submitted {
    Simple,
    Extended {
        /// Statement name to register once `ParseComplete` arrives.
        register: Option<String>,
    },
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::protocol::{BackendMessage, frontend::Startup};
    use std::{
        io,
        task::{Context, Poll},
    };

    /// Transport that records the raw bytes of every buffered message.
    #[derive(Default)]
    struct Recorder {
        wire: bytes::BytesMut,
    }

    impl PgTransport for Recorder {
        fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_recv(&mut self, _: &mut Context) -> Poll<Result<BackendMessage>> {
            unreachable!("submit never reads")
        }

        fn send<F: frontend::FrontendProtocol>(&mut self, message: F) {
            frontend::write(message, &mut self.wire);
        }

        fn send_startup(&mut self, startup: Startup) {
            startup.write(&mut self.wire);
        }
    }

    fn tags(wire: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut rest = wire;
        while !rest.is_empty() {
            out.push(rest[0]);
            let len = i32::from_be_bytes(rest[1..5].try_into().unwrap()) as usize;
            rest = &rest[1 + len..];
        }
        out
    }

    #[test]
    fn plain_query_uses_simple_protocol() {
        let mut io = Recorder::default();
        let submitted = Query::new("SELECT 1")
            .submit(&mut io, &HashSet::new(), false)
            .unwrap();
        assert!(matches!(submitted, Submitted::Simple));
        assert_eq!(tags(&io.wire), b"Q");
    }

    #[test]
    fn parameterized_query_writes_the_full_pipeline() {
        let mut io = Recorder::default();
        let submitted = Query::new("INSERT INTO t(a,b) VALUES ($1,$2)")
            .bind("hello")
            .bind(PgParam::Null)
            .name("s1")
            .submit(&mut io, &HashSet::new(), false)
            .unwrap();

        assert_eq!(tags(&io.wire), b"PBDES");
        let Submitted::Extended { register } = submitted else {
            panic!("expected extended");
        };
        assert_eq!(register.as_deref(), Some("s1"));
    }

    #[test]
    fn known_statement_skips_parse() {
        let mut io = Recorder::default();
        let parsed = HashSet::from(["s1".to_string()]);
        let submitted = Query::new("INSERT INTO t(a,b) VALUES ($1,$2)")
            .bind("hello")
            .bind(PgParam::Null)
            .name("s1")
            .submit(&mut io, &parsed, false)
            .unwrap();

        assert_eq!(tags(&io.wire), b"BDES");
        let Submitted::Extended { register } = submitted else {
            panic!("expected extended");
        };
        assert!(register.is_none());
    }

    #[test]
    fn prepare_failure_writes_nothing() {
        use crate::value::ToPostgres;
        use std::sync::{Arc, Mutex};

        struct Cycle(Mutex<Option<Arc<dyn ToPostgres>>>);
        impl ToPostgres for Cycle {
            fn to_postgres(&self) -> PgParam {
                PgParam::Custom(self.0.lock().unwrap().clone().unwrap())
            }
        }
        let cycle = Arc::new(Cycle(Mutex::new(None)));
        *cycle.0.lock().unwrap() = Some(cycle.clone());

        let mut io = Recorder::default();
        let err = Query::new("SELECT $1")
            .bind(PgParam::Custom(cycle.clone()))
            .submit(&mut io, &HashSet::new(), false)
            .unwrap_err();

        assert!(matches!(err.kind(), crate::ErrorKind::Prepare(_)));
        assert!(io.wire.is_empty());
        *cycle.0.lock().unwrap() = None;
    }

    #[test]
    fn binary_default_is_inherited_and_overridable() {
        fn result_format(wire: &[u8]) -> i16 {
            // Bind is first: tag at 0; walk to the result-format section
            let len = i32::from_be_bytes(wire[1..5].try_into().unwrap()) as usize;
            let bind = &wire[..1 + len];
            i16::from_be_bytes(bind[bind.len() - 2..].try_into().unwrap())
        }

        let mut io = Recorder::default();
        let parsed = HashSet::from(["s".to_string()]);
        Query::new("SELECT $1")
            .bind(1i32)
            .name("s")
            .submit(&mut io, &parsed, true)
            .unwrap();
        assert_eq!(result_format(&io.wire), 1);

        let mut io = Recorder::default();
        Query::new("SELECT $1")
            .bind(1i32)
            .name("s")
            .binary(false)
            .submit(&mut io, &parsed, true)
            .unwrap();
        assert_eq!(result_format(&io.wire), 0);
    }
}
