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
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SharedPasswordAuth;
use crate::desk::{DeskError, SeriesOutcome, SlotPick};
use crate::engine::{Engine, EngineError, SeriesInfo};
use crate::model::*;
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::schedule::{RejectionKind, SkipReason};
use crate::sql::{self, BookingFilter, Command};
use crate::tenant::{Tenant, TenantManager};

pub struct RoomBookHandler {
    tenant_manager: Arc<TenantManager>,
    admin_user: String,
    query_parser: Arc<RoomBookQueryParser>,
}

impl RoomBookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, admin_user: String) -> Self {
        Self {
            tenant_manager,
            admin_user,
            query_parser: Arc::new(RoomBookQueryParser),
        }
    }

    fn resolve_tenant<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Tenant>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// The acting user for this connection's login name. Looked up on every
    /// statement so role changes apply to open sessions.
    fn resolve_actor<C: ClientInfo>(&self, client: &C, engine: &Engine) -> Actor {
        let login = client.metadata().get("user").map(String::as_str).unwrap_or("");
        let account = engine.find_user_by_name(login);
        let user_id = account.as_ref().map_or_else(|| login_id(login), |u| u.id);
        let role = if login == self.admin_user {
            Role::Admin
        } else {
            account.map_or(Role::Student, |u| u.role)
        };
        Actor::new(user_id, role)
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let tenant = self.resolve_tenant(client)?;
        let actor = self.resolve_actor(client, &tenant.engine);
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "invalid", "status" => "error").increment(1);
                return Err(sql_err(e));
            }
        };

        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(&tenant, actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        tenant: &Tenant,
        actor: Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let engine = &tenant.engine;
        let desk = &tenant.desk;
        match cmd {
            Command::InsertUser { user } => {
                require_admin(&actor, "only administrators may manage users")?;
                engine.save_user(user).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteUser { id } => {
                require_admin(&actor, "only administrators may manage users")?;
                engine.delete_user(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectUsers => Ok(vec![users_response(engine.list_users())]),
            Command::InsertRoom { room } => {
                require_admin(&actor, "only administrators may manage rooms")?;
                engine.save_room(room).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                require_admin(&actor, "only administrators may manage rooms")?;
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRooms => Ok(vec![rooms_response(desk.rooms().await)]),
            Command::SelectBookableRooms => {
                Ok(vec![rooms_response(desk.bookable_rooms(actor.role).await)])
            }
            Command::InsertBookings { mut bookings } => {
                let count = if bookings.len() == 1 {
                    let req = bookings.remove(0);
                    desk.book(actor, req).await.map_err(desk_err)?;
                    1
                } else {
                    desk.book_many(actor, bookings).await.map_err(desk_err)?.len()
                };
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
            }
            Command::DeleteBooking { id } => {
                desk.cancel(actor, id).await.map_err(desk_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::All => engine.list_bookings().await,
                    BookingFilter::Room(room_id) => engine.room_bookings(&room_id).await,
                    BookingFilter::User(user_id) => engine.user_bookings(&user_id, None).await,
                };
                Ok(vec![bookings_response(bookings)])
            }
            Command::InsertSeries { series, returning } => {
                let outcome = desk.create_series(actor, series).await.map_err(desk_err)?;
                if returning {
                    Ok(vec![series_outcome_response(outcome)])
                } else {
                    let count = outcome.schedule.accepted.len();
                    Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(count))])
                }
            }
            Command::DeleteSeries { id } => {
                desk.delete_series(actor, id).await.map_err(desk_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectSeries { room_id } => {
                Ok(vec![series_response(engine.list_series(room_id).await)])
            }
            Command::SelectAvailability {
                room_id,
                date,
                min_duration,
            } => {
                let slots = desk
                    .availability(room_id, date, min_duration)
                    .await
                    .map_err(desk_err)?;
                Ok(vec![availability_response(room_id, slots)])
            }
            Command::PickSlot {
                room_id,
                date,
                offset_minutes,
                duration,
            } => {
                let pick = desk
                    .pick_slot(room_id, date, offset_minutes, duration)
                    .await
                    .map_err(desk_err)?;
                Ok(vec![slot_pick_response(room_id, pick)])
            }
            Command::CheckBooking { booking } => {
                let verdict = match desk.check(actor, &booking).await {
                    Ok(()) => None,
                    Err(DeskError::Rejected(r)) => Some(r),
                    Err(e) => return Err(desk_err(e)),
                };
                Ok(vec![check_response(verdict)])
            }
        }
    }
}

/// Stable id for a login with no directory entry, so its bookings stay its own
/// across reconnects.
fn login_id(login: &str) -> Ulid {
    let digest = Sha256::digest(login.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Ulid::from(u128::from_be_bytes(bytes))
}

fn require_admin(actor: &Actor, msg: &'static str) -> PgWireResult<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(desk_err(DeskError::Forbidden(msg)))
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text(name: &str) -> FieldInfo {
    field(name, Type::VARCHAR)
}

fn fmt_time(t: LocalTime) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn users_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("name"), text("role")]
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("name"),
        text("room_type"),
        field("capacity", Type::INT8),
        field("floor", Type::INT8),
        field("has_whiteboard", Type::BOOL),
        field("has_screen", Type::BOOL),
        field("has_board", Type::BOOL),
        field("is_closed", Type::BOOL),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("room_id"),
        text("user_id"),
        text("start_time"),
        text("end_time"),
        text("title"),
        text("booking_type"),
        text("repeating_id"),
    ]
}

fn series_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("room_id"),
        text("title"),
        text("start_time"),
        text("end_time"),
        text("recurrence_type"),
        text("start_date"),
        text("recurrence_end_date"),
        text("created_by"),
        field("booking_count", Type::INT8),
    ]
}

fn series_outcome_schema() -> Vec<FieldInfo> {
    vec![
        text("series_id"),
        text("date"),
        text("status"),
        text("booking_id"),
        text("conflict_with"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text("room_id"), text("start_time"), text("end_time")]
}

fn slot_pick_schema() -> Vec<FieldInfo> {
    vec![
        text("room_id"),
        text("start_time"),
        text("end_time"),
        field("free", Type::BOOL),
        text("taken_by"),
    ]
}

fn check_schema() -> Vec<FieldInfo> {
    vec![field("ok", Type::BOOL), text("reason"), text("message")]
}

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn users_response(users: Vec<UserAccount>) -> Response {
    rows_response(users_schema(), users, |enc, u| {
        enc.encode_field(&u.id.to_string())?;
        enc.encode_field(&u.name)?;
        enc.encode_field(&u.role.as_str().to_string())
    })
}

fn rooms_response(rooms: Vec<Room>) -> Response {
    rows_response(rooms_schema(), rooms, |enc, r| {
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.name)?;
        enc.encode_field(&r.room_type)?;
        enc.encode_field(&i64::from(r.capacity))?;
        enc.encode_field(&i64::from(r.floor))?;
        enc.encode_field(&r.has_whiteboard)?;
        enc.encode_field(&r.has_screen)?;
        enc.encode_field(&r.has_board)?;
        enc.encode_field(&r.is_closed)
    })
}

fn bookings_response(bookings: Vec<Booking>) -> Response {
    rows_response(bookings_schema(), bookings, |enc, b| {
        enc.encode_field(&b.id.to_string())?;
        enc.encode_field(&b.room_id.to_string())?;
        enc.encode_field(&b.user_id.map(|u| u.to_string()))?;
        enc.encode_field(&fmt_time(b.span.start))?;
        enc.encode_field(&fmt_time(b.span.end))?;
        enc.encode_field(&b.title)?;
        enc.encode_field(&b.kind.as_str().to_string())?;
        enc.encode_field(&b.parent_repeating_id.map(|s| s.to_string()))
    })
}

fn series_response(series: Vec<SeriesInfo>) -> Response {
    rows_response(series_schema(), series, |enc, info| {
        let s = info.series;
        enc.encode_field(&s.id.to_string())?;
        enc.encode_field(&s.room_id.to_string())?;
        enc.encode_field(&s.title)?;
        enc.encode_field(&s.start_time.format("%H:%M").to_string())?;
        enc.encode_field(&s.end_time.format("%H:%M").to_string())?;
        enc.encode_field(&s.recurrence_type.as_str().to_string())?;
        enc.encode_field(&s.start_date.to_string())?;
        enc.encode_field(&s.recurrence_end_date.to_string())?;
        enc.encode_field(&s.created_by.to_string())?;
        enc.encode_field(&(info.booking_count as i64))
    })
}

/// One row per date the recurrence produced, in date order.
fn series_outcome_response(outcome: SeriesOutcome) -> Response {
    let series_id = outcome.series.id.to_string();
    let schedule = outcome.schedule;

    let mut rows: Vec<(chrono::NaiveDate, &'static str, Option<String>, Option<String>)> =
        Vec::with_capacity(
            schedule.accepted.len() + schedule.skipped.len() + schedule.weekend_dates.len(),
        );
    for b in &schedule.accepted {
        rows.push((b.span.start.date(), "booked", Some(b.id.to_string()), None));
    }
    for s in &schedule.skipped {
        match s.reason {
            SkipReason::Past => rows.push((s.date, "past", None, None)),
            SkipReason::Conflict { booking_id, .. } => {
                rows.push((s.date, "conflict", None, Some(booking_id.to_string())))
            }
        }
    }
    for d in &schedule.weekend_dates {
        rows.push((*d, "weekend", None, None));
    }
    rows.sort_by_key(|r| r.0);

    rows_response(series_outcome_schema(), rows, |enc, (date, status, booking, conflict)| {
        enc.encode_field(&series_id)?;
        enc.encode_field(&date.to_string())?;
        enc.encode_field(&status.to_string())?;
        enc.encode_field(&booking)?;
        enc.encode_field(&conflict)
    })
}

fn availability_response(room_id: Ulid, slots: Vec<Span>) -> Response {
    let rid_str = room_id.to_string();
    rows_response(availability_schema(), slots, |enc, slot| {
        enc.encode_field(&rid_str)?;
        enc.encode_field(&fmt_time(slot.start))?;
        enc.encode_field(&fmt_time(slot.end))
    })
}

fn slot_pick_response(room_id: Ulid, pick: Option<SlotPick>) -> Response {
    let rid_str = room_id.to_string();
    rows_response(slot_pick_schema(), pick.into_iter().collect(), |enc, pick| {
        enc.encode_field(&rid_str)?;
        enc.encode_field(&fmt_time(pick.span.start))?;
        enc.encode_field(&fmt_time(pick.span.end))?;
        enc.encode_field(&pick.taken_by.is_none())?;
        enc.encode_field(&pick.taken_by.map(|id| id.to_string()))
    })
}

fn check_response(rejection: Option<crate::schedule::Rejection>) -> Response {
    rows_response(check_schema(), vec![rejection], |enc, rejection| match rejection {
        None => {
            enc.encode_field(&true)?;
            enc.encode_field(&None::<String>)?;
            enc.encode_field(&"ok".to_string())
        }
        Some(r) => {
            enc.encode_field(&false)?;
            enc.encode_field(&Some(r.kind.label().to_string()))?;
            enc.encode_field(&r.message)
        }
    })
}

/// Result columns of a statement, judged from its text before parameters
/// are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == ';' || c == ',')
        .filter(|w| !w.is_empty())
        .collect();

    match words.first() {
        Some(&"select") => {
            let table = words
                .iter()
                .position(|w| *w == "from")
                .and_then(|i| words.get(i + 1));
            match table {
                Some(&"users") => users_schema(),
                Some(&"rooms") | Some(&"bookable_rooms") => rooms_schema(),
                Some(&"bookings") => bookings_schema(),
                Some(&"repeating_bookings") => series_schema(),
                Some(&"availability") => availability_schema(),
                Some(&"booking_check") => check_schema(),
                Some(&"slot_pick") => slot_pick_schema(),
                _ => vec![],
            }
        }
        Some(&"insert") if words.contains(&"repeating_bookings") && words.contains(&"returning") => {
            series_outcome_schema()
        }
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for RoomBookHandler {
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
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomBookQueryParser;

#[async_trait]
impl QueryParser for RoomBookQueryParser {
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
impl ExtendedQueryHandler for RoomBookHandler {
    type Statement = String;
    type QueryParser = RoomBookQueryParser;

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
        let sql = substitute_params(portal);
        self.run(client, &sql)
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
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

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` does not clobber `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomBookFactory {
    handler: Arc<RoomBookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SharedPasswordAuth, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl RoomBookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String, admin_user: String) -> Self {
        let auth_source = SharedPasswordAuth::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomBookHandler::new(tenant_manager, admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomBookFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    admin_user: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(RoomBookFactory::new(tenant_manager, password, admin_user));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for a refused or failed request.
fn desk_sqlstate(e: &DeskError) -> &'static str {
    match e {
        DeskError::Rejected(r) => match r.kind {
            RejectionKind::SlotConflict { .. } => "23P01",
            RejectionKind::AccessDenied => "42501",
            _ => "23514",
        },
        DeskError::Forbidden(_) => "42501",
        DeskError::NotFound(_) => "P0002",
        DeskError::Store(e) => engine_sqlstate(e),
    }
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Conflict { .. } => "23P01",
        _ => "P0001",
    }
}

fn desk_err(e: DeskError) -> PgWireError {
    user_error(desk_sqlstate(&e), e.to_string())
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
