use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::SalonAuthSource;
use crate::engine::{AppointmentRow, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

pub struct SalonHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<SalonQueryParser>,
}

impl SalonHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(SalonQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertServiceType(t) => {
                engine.create_service_type(t).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertProfessional(p) => {
                engine.create_professional(p).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::UpdateProfessional { id, patch } => {
                let mut p = engine
                    .get_professional(&id)
                    .ok_or(EngineError::NotFound(id))
                    .map_err(engine_err)?;
                patch.apply(&mut p);
                engine.update_professional(p).await.map_err(engine_err)?;
                Ok(vec![updated()])
            }
            Command::InsertService(s) => {
                engine.create_service(s).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::UpdateService { id, patch } => {
                if let Some(active) = patch.is_toggle() {
                    engine.set_service_active(id, active).await.map_err(engine_err)?;
                } else {
                    let mut s = engine
                        .get_service(&id)
                        .ok_or(EngineError::NotFound(id))
                        .map_err(engine_err)?;
                    patch.apply(&mut s);
                    engine.update_service(s).await.map_err(engine_err)?;
                }
                Ok(vec![updated()])
            }
            Command::DeleteService { id } => {
                engine.delete_service(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertClient(c) => {
                engine.create_client(c).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertWalkIn(w) => {
                engine.create_walk_in(w).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertAppointment(req) => {
                engine.book_appointment(req).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::UpdateAppointmentStatus { id, status, actor } => {
                engine
                    .transition_appointment(id, status, actor)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![updated()])
            }
            Command::SelectAvailability {
                service_id,
                date,
                professional_id,
            } => {
                let slots = engine
                    .compute_availability(date, service_id, professional_id)
                    .await
                    .map_err(engine_err)?;
                query_response(slot_schema(), slots, encode_slot)
            }
            Command::SelectSlots => query_response(slot_schema(), engine.slots(), encode_slot),
            Command::SelectAppointments(filter) => query_response(
                appointment_schema(),
                engine.list_appointments(&filter),
                encode_appointment,
            ),
            Command::SelectServiceTypes => query_response(
                service_type_schema(),
                engine.list_service_types(),
                encode_service_type,
            ),
            Command::SelectServices { professional_id, active } => query_response(
                service_schema(),
                engine.list_services(professional_id, active),
                encode_service,
            ),
            Command::SelectProfessionals { active } => query_response(
                professional_schema(),
                engine.list_professionals(active),
                encode_professional,
            ),
            Command::SelectClients { search } => {
                query_response(client_schema(), engine.search_clients(&search), encode_client)
            }
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn updated() -> Response {
    Response::Execution(Tag::new("UPDATE").with_rows(1))
}

// ── Result sets ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![text_field("slot", Type::VARCHAR), text_field("minute", Type::INT4)]
}

fn appointment_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("date", Type::VARCHAR),
        text_field("slot", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("service_id", Type::VARCHAR),
        text_field("professional_id", Type::VARCHAR),
        text_field("client_id", Type::VARCHAR),
        text_field("walk_in_client_id", Type::VARCHAR),
        text_field("scheduled_at", Type::INT8),
        text_field("ends_at", Type::INT8),
        text_field("notes", Type::VARCHAR),
    ]
}

fn service_type_schema() -> Vec<FieldInfo> {
    vec![text_field("id", Type::VARCHAR), text_field("name", Type::VARCHAR)]
}

fn service_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("description", Type::VARCHAR),
        text_field("duration_minutes", Type::INT4),
        text_field("price_cents", Type::INT8),
        text_field("active", Type::BOOL),
        text_field("service_type", Type::VARCHAR),
        text_field("blocks_equipment", Type::BOOL),
        text_field("professional_id", Type::VARCHAR),
    ]
}

fn professional_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("bio", Type::VARCHAR),
        text_field("specialties", Type::VARCHAR),
        text_field("active", Type::BOOL),
    ]
}

fn client_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("phone", Type::VARCHAR),
        text_field("walk_in", Type::BOOL),
    ]
}

/// Result columns for a SELECT on `table`; empty for anything else.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::select_target(sql).as_deref() {
        Some("availability") | Some("slots") => slot_schema(),
        Some("appointments") => appointment_schema(),
        Some("service_types") => service_type_schema(),
        Some("services") => service_schema(),
        Some("professionals") => professional_schema(),
        Some("clients") => client_schema(),
        _ => vec![],
    }
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
}

fn opt_id(id: Option<ulid::Ulid>) -> Option<String> {
    id.map(|id| id.to_string())
}

fn encode_slot(e: &mut DataRowEncoder, slot: &Slot) -> PgWireResult<()> {
    e.encode_field(&slot.to_string())?;
    e.encode_field(&(slot.minute() as i32))
}

fn encode_appointment(e: &mut DataRowEncoder, row: &AppointmentRow) -> PgWireResult<()> {
    let a = &row.appointment;
    let (client_id, walk_in_id) = match a.booked_by {
        BookedBy::Client(id) => (Some(id), None),
        BookedBy::WalkIn(id) => (None, Some(id)),
    };
    e.encode_field(&a.id.to_string())?;
    e.encode_field(&row.day.to_string())?;
    e.encode_field(&row.slot.to_string())?;
    e.encode_field(&a.status.as_str())?;
    e.encode_field(&a.service_id.to_string())?;
    e.encode_field(&opt_id(a.professional_id))?;
    e.encode_field(&opt_id(client_id))?;
    e.encode_field(&opt_id(walk_in_id))?;
    e.encode_field(&a.scheduled_at)?;
    e.encode_field(&row.ends_at)?;
    e.encode_field(&a.notes)
}

fn encode_service_type(e: &mut DataRowEncoder, t: &ServiceType) -> PgWireResult<()> {
    e.encode_field(&t.id.to_string())?;
    e.encode_field(&t.name)
}

fn encode_service(e: &mut DataRowEncoder, s: &Service) -> PgWireResult<()> {
    e.encode_field(&s.id.to_string())?;
    e.encode_field(&s.name)?;
    e.encode_field(&s.description)?;
    e.encode_field(&(s.duration_minutes as i32))?;
    e.encode_field(&s.price_cents)?;
    e.encode_field(&s.active)?;
    e.encode_field(&s.service_type)?;
    e.encode_field(&s.blocks_equipment)?;
    e.encode_field(&opt_id(s.professional_id))
}

fn encode_professional(e: &mut DataRowEncoder, p: &Professional) -> PgWireResult<()> {
    e.encode_field(&p.id.to_string())?;
    e.encode_field(&p.name)?;
    e.encode_field(&p.bio)?;
    e.encode_field(&p.specialties.join(","))?;
    e.encode_field(&p.active)
}

fn encode_client(e: &mut DataRowEncoder, c: &ClientMatch) -> PgWireResult<()> {
    e.encode_field(&c.id.to_string())?;
    e.encode_field(&c.name)?;
    e.encode_field(&c.phone)?;
    e.encode_field(&c.walk_in)
}

#[async_trait]
impl SimpleQueryHandler for SalonHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SalonQueryParser;

#[async_trait]
impl QueryParser for SalonQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SalonHandler {
    type Statement = String;
    type QueryParser = SalonQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        debug!(%sql, "extended query");
        self.run(&engine, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

/// A piece of statement text: verbatim SQL or a `$N` placeholder.
#[derive(Debug, PartialEq, Eq)]
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

/// Split `sql` at `$N` placeholders outside quoted literals and identifiers.
fn pieces(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                // A doubled quote inside a literal is an escaped quote.
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if bytes.get(i + 1) == Some(&quote) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'$' => {
                let digits_start = i + 1;
                let mut j = digits_start;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                match sql[digits_start..j].parse::<usize>() {
                    Ok(n) if n > 0 => {
                        if text_start < i {
                            out.push(Piece::Text(&sql[text_start..i]));
                        }
                        out.push(Piece::Param(n));
                        text_start = j;
                        i = j;
                    }
                    _ => i += 1,
                }
            }
            _ => i += 1,
        }
    }
    if text_start < sql.len() {
        out.push(Piece::Text(&sql[text_start.min(sql.len())..]));
    }
    out
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    pieces(sql)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Param(n) => Some(n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Render the statement with each placeholder replaced once by its bound
/// value as a quoted text literal. Bound text is never rescanned.
fn bind_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    for piece in pieces(sql) {
        match piece {
            Piece::Text(text) => result.push_str(text),
            Piece::Param(n) => match params.get(n - 1) {
                Some(Some(bytes)) => {
                    let text = String::from_utf8_lossy(bytes.as_ref());
                    result.push('\'');
                    result.push_str(&text.replace('\'', "''"));
                    result.push('\'');
                }
                Some(None) => result.push_str("NULL"),
                // Unbound placeholders stay as written and fail to parse.
                None => {
                    result.push('$');
                    result.push_str(&n.to_string());
                }
            },
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SalonFactory {
    handler: Arc<SalonHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SalonAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SalonFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = SalonAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SalonHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SalonFactory {
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
) -> std::io::Result<()> {
    let factory = SalonFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for an engine error.
fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict { .. } => "23P01",
        EngineError::InvalidTransition { .. } | EngineError::NotPermitted { .. } => "55000",
        EngineError::NotFound(_) => "02000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::Invalid(_) => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
