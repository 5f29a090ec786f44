use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SlotGuardAuthSource;
use crate::engine::{Action, Engine, EngineError, NewBooking};
use crate::model::*;
use crate::notify;
use crate::observability::{
    self, AUTH_FAILURES_TOTAL, ERRORS_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS,
};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct SlotGuardHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SlotGuardQueryParser>,
}

impl SlotGuardHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SlotGuardQueryParser),
        }
    }

    /// The tenant engine (database name) and caller (login user) of a session.
    fn resolve_session<C: ClientInfo>(&self, client: &C) -> PgWireResult<(Arc<Engine>, Ulid)> {
        let metadata = client.metadata();
        let user = metadata.get("user").map(String::as_str).unwrap_or_default();
        let caller = Ulid::from_string(user).map_err(|_| {
            metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
            user_error("28000", format!("login user must be a party ULID, got {user:?}"))
        })?;
        let db = metadata.get("database").map(String::as_str).unwrap_or("default");
        let engine = self
            .tenant_manager
            .get_or_create(db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))?;
        Ok((engine, caller))
    }

    async fn run(&self, engine: &Engine, caller: Ulid, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        caller: Ulid,
        cmd: Command,
    ) -> PgWireResult<Response> {
        match cmd {
            Command::InsertBooking { provider_id, start, end, notes } => {
                let booking = engine
                    .create_booking(caller, NewBooking { provider_id, start, end, notes })
                    .await
                    .map_err(engine_err)?;
                booking_rows(&[booking])
            }
            Command::SelectBooking { id } => {
                let booking = engine.get_booking(id, caller).await.map_err(engine_err)?;
                booking_rows(&[booking])
            }
            Command::SelectBookings { role, status } => {
                booking_rows(&engine.list_bookings(caller, role, status).await)
            }
            Command::UpdateStatus { id, status } => {
                let action = Action::for_target(status).ok_or_else(|| {
                    engine_err(EngineError::Validation(format!("cannot set status to {status}")))
                })?;
                let booking = engine.transition(id, caller, action).await.map_err(engine_err)?;
                booking_rows(&[booking])
            }
            Command::UpdateNotes { id, notes } => {
                let booking = engine.update_notes(id, caller, notes).await.map_err(engine_err)?;
                booking_rows(&[booking])
            }
            Command::HideBooking { id } => {
                engine.hide_booking(id, caller).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReviewCandidates => {
                let candidates = engine.list_review_candidates(caller).await;
                let schema = Arc::new(candidate_schema());
                let rows: Vec<PgWireResult<_>> = candidates
                    .iter()
                    .map(|c| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&c.booking_id.to_string())?;
                        encoder.encode_field(&c.provider_id.to_string())?;
                        encoder.encode_field(&c.ended_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::InsertReview { booking_id, rating, comment } => {
                let review = engine
                    .create_review(booking_id, caller, rating, comment)
                    .await
                    .map_err(engine_err)?;
                review_rows(&[review])
            }
            Command::SelectReviews { provider_id } => review_rows(&engine.list_reviews(provider_id)),
            Command::SelectEarnings => {
                let s = engine.earnings(caller).await;
                let schema = Arc::new(earnings_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&s.provider_id.to_string())?;
                encoder.encode_field(&s.week)?;
                encoder.encode_field(&s.month)?;
                encoder.encode_field(&s.total)?;
                encoder.encode_field(&(s.completed_count as i64))?;
                encoder.encode_field(&s.week_start)?;
                encoder.encode_field(&s.month_start)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::Listen { channel } => {
                let party = notify::parse_channel(&channel).ok_or_else(|| {
                    user_error("42000", format!("invalid channel: {channel} (expected party_{{id}})"))
                })?;
                if party != caller {
                    let own = notify::channel_name(caller);
                    return Err(user_error("42501", format!("can only listen on your own channel {own}")));
                }
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
        }
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn float8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::FLOAT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("requester_id"),
        text("provider_id"),
        int8("start"),
        int8("end"),
        text("status"),
        float8("rate"),
        float8("duration_hours"),
        float8("total_price"),
        text("notes"),
        boolean("hidden_for_requester"),
        boolean("hidden_for_provider"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

fn candidate_schema() -> Vec<FieldInfo> {
    vec![text("booking_id"), text("provider_id"), int8("ended_at")]
}

fn review_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("booking_id"),
        text("requester_id"),
        text("provider_id"),
        int8("rating"),
        text("comment"),
        int8("created_at"),
    ]
}

fn earnings_schema() -> Vec<FieldInfo> {
    vec![
        text("provider_id"),
        float8("week"),
        float8("month"),
        float8("total"),
        int8("completed_count"),
        int8("week_start"),
        int8("month_start"),
    ]
}

fn booking_rows(bookings: &[Booking]) -> PgWireResult<Response> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.requester_id.to_string())?;
            encoder.encode_field(&b.provider_id.to_string())?;
            encoder.encode_field(&b.span.start)?;
            encoder.encode_field(&b.span.end)?;
            encoder.encode_field(&b.status.to_string())?;
            encoder.encode_field(&b.rate_snapshot)?;
            encoder.encode_field(&b.duration_hours)?;
            encoder.encode_field(&b.total_price)?;
            encoder.encode_field(&b.notes)?;
            encoder.encode_field(&b.hidden_for_requester)?;
            encoder.encode_field(&b.hidden_for_provider)?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn review_rows(reviews: &[Review]) -> PgWireResult<Response> {
    let schema = Arc::new(review_schema());
    let rows: Vec<PgWireResult<_>> = reviews
        .iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.booking_id.to_string())?;
            encoder.encode_field(&r.requester_id.to_string())?;
            encoder.encode_field(&r.provider_id.to_string())?;
            encoder.encode_field(&(r.rating as i64))?;
            encoder.encode_field(&r.comment)?;
            encoder.encode_field(&r.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Result columns of a statement, judged from its text alone since
/// parameters are not bound yet at describe time.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("LISTEN") || upper.starts_with("DELETE") {
        vec![]
    } else if upper.contains("REVIEW_CANDIDATES") {
        candidate_schema()
    } else if upper.contains("EARNINGS") {
        earnings_schema()
    } else if upper.contains("REVIEWS") {
        review_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotGuardHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, caller) = self.resolve_session(client)?;
        Ok(vec![self.run(&engine, caller, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotGuardQueryParser;

#[async_trait]
impl QueryParser for SlotGuardQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotGuardHandler {
    type Statement = String;
    type QueryParser = SlotGuardQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, caller) = self.resolve_session(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, caller, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// `$N` placeholders outside quoted literals, as `(byte range, N)`.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // A doubled quote inside a literal toggles twice and stays inside.
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start + 1..end].parse::<usize>() {
                    found.push((start..end, n));
                }
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Replace `$1, $2, ...` with bound text-format values as quoted literals,
/// in a single pass so bound values are never rescanned.
fn substitute_params(sql: &str, params: &[Option<bytes::Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..range.start]);
        match param {
            Some(bytes) => {
                result.push('\'');
                result.push_str(&String::from_utf8_lossy(bytes).replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = range.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SlotGuardFactory {
    handler: Arc<SlotGuardHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<SlotGuardAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl SlotGuardFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(SlotGuardHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                SlotGuardAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotGuardFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(SlotGuardFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    metrics::counter!(ERRORS_TOTAL, "kind" => e.label()).increment(1);
    if matches!(e, EngineError::Storage(_)) {
        tracing::error!("storage failure: {e}");
    }
    user_error(e.sqlstate(), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
