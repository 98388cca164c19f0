use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use sqlparser::ast::{
    self, Expr, FromTable, Ident, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::desk::{BookingRequest, SeriesRequest};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        user: UserAccount,
    },
    DeleteUser {
        id: Ulid,
    },
    SelectUsers,
    /// Creates the room, or replaces its attributes if the id exists.
    InsertRoom {
        room: Room,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms,
    SelectBookableRooms,
    /// One or more rows; several rows commit all-or-nothing.
    InsertBookings {
        bookings: Vec<BookingRequest>,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    InsertSeries {
        series: SeriesRequest,
        returning: bool,
    },
    DeleteSeries {
        id: Ulid,
    },
    SelectSeries {
        room_id: Option<Ulid>,
    },
    SelectAvailability {
        room_id: Ulid,
        date: NaiveDate,
        min_duration: Option<TimeDelta>,
    },
    CheckBooking {
        booking: BookingRequest,
    },
    /// Snap a pointer position to a slot of `duration` on the quarter-hour grid.
    PickSlot {
        room_id: Ulid,
        date: NaiveDate,
        offset_minutes: u32,
        duration: TimeDelta,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    All,
    Room(Ulid),
    User(Ulid),
}

const USER_COLUMNS: &[&str] = &["id", "name", "role"];
const ROOM_COLUMNS: &[&str] = &[
    "id",
    "name",
    "room_type",
    "capacity",
    "floor",
    "has_whiteboard",
    "has_screen",
    "has_board",
    "is_closed",
];
const BOOKING_COLUMNS: &[&str] = &["id", "room_id", "start_time", "end_time", "title", "booking_type"];
const SERIES_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "title",
    "start_time",
    "end_time",
    "recurrence_type",
    "start_date",
    "recurrence_end_date",
];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row addressed by column name.
struct Row<'a> {
    table: &'static str,
    columns: Vec<String>,
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    /// Without an explicit column list, values map onto a prefix of `known`.
    fn new(table: &'static str, known: &[&str], named: &[Ident], values: &'a [Expr]) -> Result<Self, SqlError> {
        let columns: Vec<String> = if named.is_empty() {
            if values.len() > known.len() {
                return Err(SqlError::WrongArity(table, known.len(), values.len()));
            }
            known[..values.len()].iter().map(|c| c.to_string()).collect()
        } else {
            let columns: Vec<String> = named.iter().map(|i| i.value.to_lowercase()).collect();
            if let Some(unknown) = columns.iter().find(|c| !known.contains(&c.as_str())) {
                return Err(SqlError::UnknownColumn(table, unknown.clone()));
            }
            if columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, columns.len(), values.len()));
            }
            columns
        };
        Ok(Self { table, columns, values })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }

    /// Absent and NULL both read as `None`.
    fn optional(&self, column: &str) -> Option<&'a Expr> {
        self.get(column).filter(|e| !is_null(e))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "users" => {
            let row = Row::new("users", USER_COLUMNS, &insert.columns, single_row(&rows)?)?;
            Ok(Command::InsertUser {
                user: UserAccount {
                    id: parse_ulid(row.require("id")?)?,
                    name: parse_text(row.require("name")?)?,
                    role: match row.optional("role") {
                        Some(e) => Role::parse(&parse_text(e)?),
                        None => Role::Student,
                    },
                },
            })
        }
        "rooms" => {
            let row = Row::new("rooms", ROOM_COLUMNS, &insert.columns, single_row(&rows)?)?;
            Ok(Command::InsertRoom { room: parse_room(&row)? })
        }
        "bookings" => {
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, values) in rows.iter().enumerate() {
                let row = Row::new("bookings", BOOKING_COLUMNS, &insert.columns, values)?;
                bookings.push(
                    parse_booking(&row).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                );
            }
            Ok(Command::InsertBookings { bookings })
        }
        "repeating_bookings" => {
            let row = Row::new("repeating_bookings", SERIES_COLUMNS, &insert.columns, single_row(&rows)?)?;
            let recurrence_raw = parse_text(row.require("recurrence_type")?)?;
            let recurrence = RecurrenceType::parse(&recurrence_raw)
                .ok_or_else(|| SqlError::Parse(format!("unknown recurrence type: {recurrence_raw}")))?;
            Ok(Command::InsertSeries {
                series: SeriesRequest {
                    id: optional_id(&row)?,
                    room_id: parse_ulid(row.require("room_id")?)?,
                    title: parse_text(row.require("title")?)?,
                    start_time: parse_time(row.require("start_time")?)?,
                    end_time: parse_time(row.require("end_time")?)?,
                    recurrence,
                    start_date: parse_date(row.require("start_date")?)?,
                    end_date: parse_date(row.require("recurrence_end_date")?)?,
                },
                returning,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn single_row(rows: &[Vec<Expr>]) -> Result<&[Expr], SqlError> {
    match rows {
        [one] => Ok(one),
        _ => Err(SqlError::Unsupported("multi-row INSERT for this table".into())),
    }
}

/// A missing id column means "assign one".
fn optional_id(row: &Row) -> Result<Ulid, SqlError> {
    match row.optional("id") {
        Some(e) => parse_ulid(e),
        None => Ok(Ulid::new()),
    }
}

fn parse_room(row: &Row) -> Result<Room, SqlError> {
    let room_type = row.optional("room_type").map(parse_text).transpose()?;
    let mut room = Room::new(
        parse_ulid(row.require("id")?)?,
        parse_text(row.require("name")?)?,
        room_type.as_deref(),
    );
    if let Some(e) = row.optional("capacity") {
        room.capacity = parse_u32(e)?;
    }
    if let Some(e) = row.optional("floor") {
        room.floor = parse_i32(e)?;
    }
    if let Some(e) = row.optional("has_whiteboard") {
        room.has_whiteboard = parse_bool(e)?;
    }
    if let Some(e) = row.optional("has_screen") {
        room.has_screen = parse_bool(e)?;
    }
    if let Some(e) = row.optional("has_board") {
        room.has_board = parse_bool(e)?;
    }
    if let Some(e) = row.optional("is_closed") {
        room.is_closed = parse_bool(e)?;
    }
    Ok(room)
}

fn parse_booking(row: &Row) -> Result<BookingRequest, SqlError> {
    Ok(BookingRequest {
        id: optional_id(row)?,
        room_id: parse_ulid(row.require("room_id")?)?,
        start: parse_timestamp(row.require("start_time")?)?,
        end: parse_timestamp(row.require("end_time")?)?,
        title: row.optional("title").map(parse_text).transpose()?,
        kind: parse_kind(row.optional("booking_type"))?,
    })
}

fn parse_kind(expr: Option<&Expr>) -> Result<BookingKind, SqlError> {
    let Some(expr) = expr else {
        return Ok(BookingKind::Normal);
    };
    let raw = parse_text(expr)?;
    BookingKind::parse(&raw).ok_or_else(|| SqlError::Parse(format!("unknown booking type: {raw}")))
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "users" => Ok(Command::DeleteUser { id }),
        "rooms" => Ok(Command::DeleteRoom { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        "repeating_bookings" => Ok(Command::DeleteSeries { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters.0)?;
    }

    match table.as_str() {
        "users" => Ok(Command::SelectUsers),
        "rooms" => Ok(Command::SelectRooms),
        "bookable_rooms" => Ok(Command::SelectBookableRooms),
        "bookings" => {
            let filter = if let Some(e) = filters.get("room_id") {
                BookingFilter::Room(parse_ulid(e)?)
            } else if let Some(e) = filters.get("user_id") {
                BookingFilter::User(parse_ulid(e)?)
            } else {
                BookingFilter::All
            };
            Ok(Command::SelectBookings { filter })
        }
        "repeating_bookings" => Ok(Command::SelectSeries {
            room_id: filters.get("room_id").map(parse_ulid).transpose()?,
        }),
        "availability" => {
            let minutes = filters.get("min_duration").map(parse_i64).transpose()?;
            if minutes.is_some_and(|m| m < 0) {
                return Err(SqlError::Parse("min_duration must not be negative".into()));
            }
            Ok(Command::SelectAvailability {
                room_id: parse_ulid(filters.require("room_id")?)?,
                date: parse_date(filters.require("date")?)?,
                min_duration: minutes.map(TimeDelta::minutes),
            })
        }
        "slot_pick" => Ok(Command::PickSlot {
            room_id: parse_ulid(filters.require("room_id")?)?,
            date: parse_date(filters.require("date")?)?,
            offset_minutes: parse_u32(filters.require("offset_minutes")?)?,
            duration: TimeDelta::minutes(i64::from(parse_u32(filters.require("duration")?)?)),
        }),
        "booking_check" => Ok(Command::CheckBooking {
            booking: BookingRequest {
                id: Ulid::new(),
                room_id: parse_ulid(filters.require("room_id")?)?,
                start: parse_timestamp(filters.require("start_time")?)?,
                end: parse_timestamp(filters.require("end_time")?)?,
                title: None,
                kind: parse_kind(filters.get("booking_type"))?,
            },
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column = value` pairs from a WHERE clause joined by AND.
#[derive(Default)]
struct Filters(Vec<(String, Expr)>);

impl Filters {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingFilter(column))
    }
}

fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported("filter must be `column = value`".into()))?;
                out.push((col, right.as_ref().clone()));
            }
            other => return Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out)?,
        other => return Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_i32(expr: &Expr) -> Result<i32, SqlError> {
    let v = parse_i64(expr)?;
    i32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of i32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// `YYYY-MM-DD HH:MM[:SS]`, with a space or `T` between date and time.
pub fn parse_timestamp_str(s: &str) -> Option<LocalTime> {
    const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"];
    let s = s.trim();
    FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

fn parse_timestamp(expr: &Expr) -> Result<LocalTime, SqlError> {
    let s = parse_text(expr)?;
    parse_timestamp_str(&s).ok_or_else(|| SqlError::Parse(format!("bad timestamp: {s}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| SqlError::Parse(format!("bad date: {s}")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_text(expr)?;
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| SqlError::Parse(format!("bad time of day: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const ROOM: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn room_id() -> Ulid {
        Ulid::from_string(ROOM).unwrap()
    }

    fn ts(s: &str) -> LocalTime {
        parse_timestamp_str(s).unwrap()
    }

    #[test]
    fn insert_user_with_unknown_role_is_student() {
        let sql = format!("INSERT INTO users (id, name, role) VALUES ('{ID}', 'dana', 'janitor')");
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertUser {
                user: UserAccount {
                    id: id(),
                    name: "dana".into(),
                    role: Role::Student,
                }
            }
        );
    }

    #[test]
    fn insert_room_named_columns() {
        let sql = format!(
            "INSERT INTO rooms (id, name, room_type, capacity, floor, has_screen, is_closed) \
             VALUES ('{ID}', 'Aud 1', 'Auditorium', 120, -1, true, false)"
        );
        let Command::InsertRoom { room } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertRoom");
        };
        assert_eq!(room.name, "Aud 1");
        assert_eq!(room.room_type.as_deref(), Some("Auditorium"));
        assert_eq!(room.capacity, 120);
        assert_eq!(room.floor, -1);
        assert!(room.has_screen);
        assert!(!room.has_whiteboard);
        assert!(!room.is_closed);
    }

    #[test]
    fn insert_room_positional_prefix() {
        let sql = format!("INSERT INTO rooms VALUES ('{ID}', 'S1', NULL)");
        let Command::InsertRoom { room } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertRoom");
        };
        assert_eq!(room.room_type, None);
        assert_eq!(room.capacity, 0);
    }

    #[test]
    fn insert_room_unknown_column() {
        let sql = format!("INSERT INTO rooms (id, name, colour) VALUES ('{ID}', 'S1', 'red')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::UnknownColumn("rooms", c)) if c == "colour"
        ));
    }

    #[test]
    fn insert_single_booking() {
        let sql = format!(
            "INSERT INTO bookings (id, room_id, start_time, end_time, title) \
             VALUES ('{ID}', '{ROOM}', '2026-10-19 10:00', '2026-10-19T11:30:00', 'Group work')"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertBookings {
                bookings: vec![BookingRequest {
                    id: id(),
                    room_id: room_id(),
                    start: ts("2026-10-19 10:00"),
                    end: ts("2026-10-19 11:30"),
                    title: Some("Group work".into()),
                    kind: BookingKind::Normal,
                }]
            }
        );
    }

    #[test]
    fn insert_booking_without_id_assigns_one() {
        let sql = format!(
            "INSERT INTO bookings (room_id, start_time, end_time, booking_type) \
             VALUES ('{ROOM}', '2026-10-19 08:00', '2026-10-19 12:00', 'exam')"
        );
        let Command::InsertBookings { bookings } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertBookings");
        };
        assert_eq!(bookings[0].kind, BookingKind::Exam);
        assert_eq!(bookings[0].title, None);
    }

    #[test]
    fn insert_booking_rows() {
        let sql = format!(
            "INSERT INTO bookings (room_id, start_time, end_time) VALUES \
             ('{ROOM}', '2026-10-19 08:00', '2026-10-19 09:00'), \
             ('{ROOM}', '2026-10-19 09:00', '2026-10-19 10:00')"
        );
        let Command::InsertBookings { bookings } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertBookings");
        };
        assert_eq!(bookings.len(), 2);
        assert_ne!(bookings[0].id, bookings[1].id);
        assert_eq!(bookings[1].start, ts("2026-10-19 09:00"));
    }

    #[test]
    fn bad_timestamp_names_the_row() {
        let sql = format!(
            "INSERT INTO bookings (room_id, start_time, end_time) VALUES \
             ('{ROOM}', '2026-10-19 08:00', '2026-10-19 09:00'), \
             ('{ROOM}', 'tomorrow', '2026-10-19 10:00')"
        );
        let err = parse_sql(&sql).unwrap_err();
        assert!(err.to_string().contains("row 1"), "{err}");
    }

    #[test]
    fn unknown_booking_type_errors() {
        let sql = format!(
            "INSERT INTO bookings (room_id, start_time, end_time, booking_type) \
             VALUES ('{ROOM}', '2026-10-19 08:00', '2026-10-19 09:00', 'party')"
        );
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn insert_series_returning() {
        let sql = format!(
            "INSERT INTO repeating_bookings (id, room_id, title, start_time, end_time, recurrence_type, \
             start_date, recurrence_end_date) VALUES ('{ID}', '{ROOM}', 'Algebra', '10:00', '12:00', \
             'weekly', '2026-10-19', '2026-11-16') RETURNING *"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::InsertSeries {
                series: SeriesRequest {
                    id: id(),
                    room_id: room_id(),
                    title: "Algebra".into(),
                    start_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                    end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                    recurrence: RecurrenceType::Weekly,
                    start_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2026, 11, 16).unwrap(),
                },
                returning: true,
            }
        );
    }

    #[test]
    fn series_with_bad_recurrence() {
        let sql = format!(
            "INSERT INTO repeating_bookings (room_id, title, start_time, end_time, recurrence_type, \
             start_date, recurrence_end_date) VALUES ('{ROOM}', 'x', '10:00', '12:00', 'hourly', \
             '2026-10-19', '2026-11-16')"
        );
        let err = parse_sql(&sql).unwrap_err();
        assert!(err.to_string().contains("hourly"));
    }

    #[test]
    fn deletes() {
        for (table, expect) in [
            ("users", Command::DeleteUser { id: id() }),
            ("rooms", Command::DeleteRoom { id: id() }),
            ("bookings", Command::DeleteBooking { id: id() }),
            ("repeating_bookings", Command::DeleteSeries { id: id() }),
        ] {
            let sql = format!("DELETE FROM {table} WHERE id = '{ID}'");
            assert_eq!(parse_sql(&sql).unwrap(), expect);
        }
    }

    #[test]
    fn delete_needs_id() {
        assert!(matches!(
            parse_sql("DELETE FROM bookings"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn select_bookings_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::All
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE room_id = '{ROOM}'")).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Room(room_id())
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE user_id = '{ID}'")).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::User(id())
            }
        );
    }

    #[test]
    fn select_listings() {
        assert_eq!(parse_sql("SELECT * FROM users").unwrap(), Command::SelectUsers);
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms);
        assert_eq!(
            parse_sql("SELECT * FROM bookable_rooms").unwrap(),
            Command::SelectBookableRooms
        );
        assert_eq!(
            parse_sql("SELECT * FROM repeating_bookings").unwrap(),
            Command::SelectSeries { room_id: None }
        );
    }

    #[test]
    fn select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE room_id = '{ROOM}' AND date = '2026-10-19' AND min_duration = 45"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailability {
                room_id: room_id(),
                date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                min_duration: Some(TimeDelta::minutes(45)),
            }
        );
    }

    #[test]
    fn select_availability_requires_date() {
        let sql = format!("SELECT * FROM availability WHERE room_id = '{ROOM}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("date"))));
    }

    #[test]
    fn select_booking_check() {
        let sql = format!(
            "SELECT * FROM booking_check WHERE room_id = '{ROOM}' \
             AND start_time = '2026-10-19 10:00' AND end_time = '2026-10-19 11:00'"
        );
        let Command::CheckBooking { booking } = parse_sql(&sql).unwrap() else {
            panic!("expected CheckBooking");
        };
        assert_eq!(booking.room_id, room_id());
        assert_eq!(booking.start, ts("2026-10-19 10:00"));
        assert_eq!(booking.kind, BookingKind::Normal);
    }

    #[test]
    fn select_slot_pick() {
        let sql = format!(
            "SELECT * FROM slot_pick WHERE room_id = '{ROOM}' AND date = '2026-10-19' \
             AND offset_minutes = 97 AND duration = 60"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::PickSlot {
                room_id: room_id(),
                date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
                offset_minutes: 97,
                duration: TimeDelta::minutes(60),
            }
        );
        let negative = format!(
            "SELECT * FROM slot_pick WHERE room_id = '{ROOM}' AND date = '2026-10-19' \
             AND offset_minutes = -5 AND duration = 60"
        );
        assert!(matches!(parse_sql(&negative), Err(SqlError::Parse(_))));
    }

    #[test]
    fn range_filters_are_unsupported() {
        let sql = format!("SELECT * FROM bookings WHERE room_id = '{ROOM}' AND start_time >= '2026-10-19'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap();
        for s in ["2026-10-19 10:15", "2026-10-19 10:15:00", "2026-10-19T10:15", " 2026-10-19T10:15:00 "] {
            assert_eq!(parse_timestamp_str(s), Some(expected), "{s}");
        }
        assert_eq!(parse_timestamp_str("2026-10-19"), None);
    }
}
