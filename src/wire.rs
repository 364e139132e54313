use std::fmt::Debug;
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

use crate::auth::SharedPasswordSource;
use crate::engine::{BookingEngine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationFilter, UserFilter};

pub struct CaravanShareHandler {
    engine: Arc<BookingEngine>,
    query_parser: Arc<CaravanShareQueryParser>,
}

impl CaravanShareHandler {
    pub fn new(engine: Arc<BookingEngine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(CaravanShareQueryParser),
        }
    }

    async fn run(&self, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertResource {
                id,
                host_id,
                name,
                location,
                capacity,
                daily_rate,
                amenities,
            } => {
                engine
                    .register_resource(Resource {
                        id: id.unwrap_or_else(Ulid::new),
                        host_id,
                        name,
                        location,
                        capacity,
                        daily_rate,
                        amenities,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertUser { id, name, contact, role } => {
                engine
                    .register_user(User {
                        id: id.unwrap_or_else(Ulid::new),
                        name,
                        contact,
                        role,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertReservation {
                guest_id,
                resource_id,
                start,
                end,
            } => {
                let reservation = engine
                    .create_reservation(guest_id, resource_id, start, end)
                    .await
                    .map_err(engine_err)?;
                reservation_response(vec![reservation])
            }
            Command::CancelReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectResources { id } => {
                let caravans = match id {
                    None => engine.list_resources().await.map_err(engine_err)?,
                    Some(id) => match engine.get_resource(id).await {
                        Ok(caravan) => vec![caravan],
                        Err(EngineError::ResourceNotFound(_)) => Vec::new(),
                        Err(e) => return Err(engine_err(e)),
                    },
                };
                caravan_response(caravans)
            }
            Command::SelectUsers { filter } => {
                let users = match filter {
                    UserFilter::All => engine.list_users().await.map_err(engine_err)?,
                    UserFilter::Id(id) => engine.get_user(id).await.map_err(engine_err)?.into_iter().collect(),
                    UserFilter::Contact(contact) => engine
                        .find_user_by_contact(&contact)
                        .await
                        .map_err(engine_err)?
                        .into_iter()
                        .collect(),
                };
                user_response(users)
            }
            Command::SelectReservations { filter } => {
                let reservations = match filter {
                    ReservationFilter::Resource(resource_id) => {
                        engine.list_reservations(resource_id).await.map_err(engine_err)?
                    }
                    ReservationFilter::Id(id) => match engine.get_reservation(id).await {
                        Ok(r) => vec![r],
                        Err(EngineError::ReservationNotFound(_)) => Vec::new(),
                        Err(e) => return Err(engine_err(e)),
                    },
                };
                reservation_response(reservations)
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn caravan_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("host_id"),
        text_field("name"),
        text_field("location"),
        int_field("capacity"),
        text_field("daily_rate"),
        text_field("amenities"),
    ]
}

fn user_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("name"),
        text_field("contact"),
        text_field("role"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("guest_id"),
        text_field("caravan_id"),
        text_field("start_date"),
        text_field("end_date"),
        int_field("nights"),
        text_field("total_price"),
        text_field("status"),
        int_field("created_at"),
    ]
}

fn caravan_response(caravans: Vec<Resource>) -> PgWireResult<Response> {
    let schema = Arc::new(caravan_schema());
    let rows: Vec<PgWireResult<_>> = caravans
        .into_iter()
        .map(|c| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&c.id.to_string())?;
            encoder.encode_field(&c.host_id.to_string())?;
            encoder.encode_field(&c.name)?;
            encoder.encode_field(&c.location)?;
            encoder.encode_field(&i64::from(c.capacity))?;
            encoder.encode_field(&c.daily_rate.to_string())?;
            encoder.encode_field(&c.amenities.join(","))?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn user_response(users: Vec<User>) -> PgWireResult<Response> {
    let schema = Arc::new(user_schema());
    let rows: Vec<PgWireResult<_>> = users
        .into_iter()
        .map(|u| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&u.id.to_string())?;
            encoder.encode_field(&u.name)?;
            encoder.encode_field(&u.contact)?;
            encoder.encode_field(&u.role.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn reservation_response(reservations: Vec<Reservation>) -> PgWireResult<Response> {
    let schema = Arc::new(reservation_schema());
    let rows: Vec<PgWireResult<_>> = reservations
        .into_iter()
        .map(|r| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&r.id.to_string())?;
            encoder.encode_field(&r.guest_id.to_string())?;
            encoder.encode_field(&r.resource_id.to_string())?;
            encoder.encode_field(&r.range.start.to_string())?;
            encoder.encode_field(&r.range.end.to_string())?;
            encoder.encode_field(&r.nights())?;
            encoder.encode_field(&r.total_price.to_string())?;
            encoder.encode_field(&r.status.as_str())?;
            encoder.encode_field(&r.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Row description for a statement that hasn't been executed yet.
/// Placeholders keep it from parsing, so this goes by keywords.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.trim_start().to_uppercase();
    let is_select = upper.starts_with("SELECT");
    if upper.contains("RESERVATIONS") && (is_select || upper.starts_with("INSERT")) {
        reservation_schema()
    } else if is_select && upper.contains("USERS") {
        user_schema()
    } else if is_select && (upper.contains("CARAVANS") || upper.contains("RESOURCES")) {
        caravan_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for CaravanShareHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CaravanShareQueryParser;

#[async_trait]
impl QueryParser for CaravanShareQueryParser {
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
impl ExtendedQueryHandler for CaravanShareHandler {
    type Statement = String;
    type QueryParser = CaravanShareQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
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
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
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

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute `$1`, `$2`, ... with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// One left-to-right pass, so placeholder text inside a bound value is never
/// substituted again. Out-of-range placeholders are left as written.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        if let Some(param) = param {
            out.push_str(&sql[copied..i]);
            match param {
                Some(value) => {
                    out.push('\'');
                    out.push_str(&String::from_utf8_lossy(value.as_ref()).replace('\'', "''"));
                    out.push('\'');
                }
                None => out.push_str("NULL"),
            }
            copied = end;
        }
        i = end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CaravanShareFactory {
    handler: Arc<CaravanShareHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CaravanShareFactory {
    pub fn new(engine: Arc<BookingEngine>, password: String) -> Self {
        let auth_source = SharedPasswordSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CaravanShareHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CaravanShareFactory {
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
    engine: Arc<BookingEngine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CaravanShareFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE code reported to clients for an engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidDateRange { .. } => "22007",
        EngineError::ResourceNotFound(_) | EngineError::GuestNotFound(_) | EngineError::HostNotFound(_) => "23503",
        EngineError::DateConflict { .. } => "23P01",
        EngineError::ReservationNotFound(_) => "P0002",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::InvalidResource(_) | EngineError::InvalidUser(_) => "22023",
        EngineError::Duplicate(_) => "23505",
        EngineError::Storage(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if !e.is_rejection() {
        tracing::error!("query failed: {e}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
