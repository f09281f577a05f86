use std::collections::HashMap;

use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value,
    ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use ulid::Ulid;

use crate::engine::{BookingRequest, ValidationError};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertServiceType(ServiceType),
    InsertProfessional(Professional),
    UpdateProfessional {
        id: Ulid,
        patch: ProfessionalPatch,
    },
    InsertService(Service),
    UpdateService {
        id: Ulid,
        patch: ServicePatch,
    },
    DeleteService {
        id: Ulid,
    },
    InsertClient(Client),
    InsertWalkIn(WalkInClient),
    InsertAppointment(BookingRequest),
    UpdateAppointmentStatus {
        id: Ulid,
        status: AppointmentStatus,
        actor: Actor,
    },
    SelectAvailability {
        service_id: Ulid,
        date: NaiveDate,
        professional_id: Option<Ulid>,
    },
    SelectSlots,
    SelectAppointments(AppointmentFilter),
    SelectServiceTypes,
    SelectServices {
        professional_id: Option<Ulid>,
        active: Option<bool>,
    },
    SelectProfessionals {
        active: Option<bool>,
    },
    SelectClients {
        search: String,
    },
}

/// Columns set by `UPDATE professionals`. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfessionalPatch {
    pub name: Option<String>,
    pub bio: Option<Option<String>>,
    pub specialties: Option<Vec<String>>,
    pub active: Option<bool>,
}

impl ProfessionalPatch {
    pub fn apply(self, p: &mut Professional) {
        if let Some(v) = self.name {
            p.name = v;
        }
        if let Some(v) = self.bio {
            p.bio = v;
        }
        if let Some(v) = self.specialties {
            p.specialties = v;
        }
        if let Some(v) = self.active {
            p.active = v;
        }
    }
}

/// Columns set by `UPDATE services`. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServicePatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub duration_minutes: Option<u32>,
    pub price_cents: Option<i64>,
    pub active: Option<bool>,
    pub service_type: Option<Option<String>>,
    pub blocks_equipment: Option<bool>,
    pub professional_id: Option<Option<Ulid>>,
}

impl ServicePatch {
    /// Only the `active` flag is being set.
    pub fn is_toggle(&self) -> Option<bool> {
        let only_active = ServicePatch {
            active: self.active,
            ..Default::default()
        };
        if *self == only_active { self.active } else { None }
    }

    pub fn apply(self, s: &mut Service) {
        if let Some(v) = self.name {
            s.name = v;
        }
        if let Some(v) = self.description {
            s.description = v;
        }
        if let Some(v) = self.duration_minutes {
            s.duration_minutes = v;
        }
        if let Some(v) = self.price_cents {
            s.price_cents = v;
        }
        if let Some(v) = self.active {
            s.active = v;
        }
        if let Some(v) = self.service_type {
            s.service_type = v;
        }
        if let Some(v) = self.blocks_equipment {
            s.blocks_equipment = v;
        }
        if let Some(v) = self.professional_id {
            s.professional_id = v;
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(parse_err)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        Statement::Update { .. } => parse_update(sql),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, for describing result columns before any
/// parameters are bound. `None` for non-SELECT statements.
pub fn select_target(sql: &str) -> Option<String> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn parse_err(e: ParserError) -> SqlError {
    SqlError::Parse(e.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let row = Row::new(&table, &insert.columns, &values)?;

    match table.as_str() {
        "service_types" => Ok(Command::InsertServiceType(ServiceType {
            id: row.ulid("id")?,
            name: row.string("name")?,
        })),
        "professionals" => Ok(Command::InsertProfessional(Professional {
            id: row.ulid("id")?,
            name: row.string("name")?,
            bio: row.opt_string("bio")?,
            specialties: row.opt_string("specialties")?.map(|s| split_list(&s)).unwrap_or_default(),
            active: row.opt_bool("active")?.unwrap_or(true),
        })),
        "services" => Ok(Command::InsertService(Service {
            id: row.ulid("id")?,
            name: row.string("name")?,
            description: row.opt_string("description")?,
            duration_minutes: row.u32("duration_minutes")?,
            price_cents: row.opt_i64("price_cents")?.unwrap_or(0),
            active: row.opt_bool("active")?.unwrap_or(true),
            service_type: row.opt_string("service_type")?,
            blocks_equipment: row.opt_bool("blocks_equipment")?.unwrap_or(false),
            professional_id: row.opt_ulid("professional_id")?,
        })),
        "clients" => Ok(Command::InsertClient(Client {
            id: row.ulid("id")?,
            name: row.string("name")?,
            phone: row.opt_string("phone")?,
            email: row.opt_string("email")?,
        })),
        "walk_in_clients" => Ok(Command::InsertWalkIn(WalkInClient {
            id: row.ulid("id")?,
            name: row.string("name")?,
            phone: row.opt_string("phone")?.unwrap_or_default(),
            created_by: row.opt_ulid("created_by")?,
        })),
        "appointments" => {
            let booked_by = match (row.opt_ulid("client_id")?, row.opt_ulid("walk_in_client_id")?) {
                (Some(_), Some(_)) => return Err(SqlError::Invalid(ValidationError::AmbiguousBookedBy)),
                (Some(id), None) => Some(BookedBy::Client(id)),
                (None, Some(id)) => Some(BookedBy::WalkIn(id)),
                (None, None) => None,
            };
            let origin = match row.opt_string("origin")? {
                Some(s) => s.parse().map_err(SqlError::Parse)?,
                None => BookingOrigin::SelfService,
            };
            Ok(Command::InsertAppointment(BookingRequest {
                id: row.ulid("id")?,
                professional_id: row.opt_ulid("professional_id")?,
                service_id: row.opt_ulid("service_id")?,
                date: row.opt_date("date")?,
                slot: row.opt_slot("slot")?,
                booked_by,
                origin,
                notes: row.opt_string("notes")?,
            }))
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// One VALUES row keyed by column name.
struct Row<'a> {
    table: String,
    values: HashMap<String, &'a Expr>,
}

impl<'a> Row<'a> {
    fn new(table: &str, columns: &[ast::Ident], values: &'a [Expr]) -> Result<Self, SqlError> {
        if columns.is_empty() {
            return Err(SqlError::Parse(format!("INSERT INTO {table} needs a column list")));
        }
        if columns.len() != values.len() {
            return Err(SqlError::WrongArity(table.to_string(), columns.len(), values.len()));
        }
        let values = columns
            .iter()
            .map(|c| c.value.to_lowercase())
            .zip(values.iter())
            .collect();
        Ok(Self {
            table: table.to_string(),
            values,
        })
    }

    /// The column's expression, `None` when absent or NULL.
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.values.get(col).copied().filter(|e| !is_null(e))
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col)
            .ok_or_else(|| SqlError::MissingColumn(self.table.clone(), col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid_expr(self.require(col)?)
    }

    fn opt_ulid(&self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.get(col).map(parse_ulid_expr).transpose()
    }

    fn string(&self, col: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.require(col)?)
    }

    fn opt_string(&self, col: &str) -> Result<Option<String>, SqlError> {
        self.get(col).map(parse_string_expr).transpose()
    }

    fn u32(&self, col: &'static str) -> Result<u32, SqlError> {
        parse_u32(self.require(col)?)
    }

    fn opt_i64(&self, col: &str) -> Result<Option<i64>, SqlError> {
        self.get(col).map(parse_i64_expr).transpose()
    }

    fn opt_bool(&self, col: &str) -> Result<Option<bool>, SqlError> {
        self.get(col).map(parse_bool).transpose()
    }

    fn opt_date(&self, col: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.get(col).map(parse_date_expr).transpose()
    }

    fn opt_slot(&self, col: &str) -> Result<Option<Slot>, SqlError> {
        self.get(col).map(parse_slot_expr).transpose()
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

// ── UPDATE ────────────────────────────────────────────────────

/// `UPDATE <table> SET col = value [, ...] WHERE id = '<ulid>'`.
fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql).map_err(parse_err)?;
    parser.expect_keyword(Keyword::UPDATE).map_err(parse_err)?;
    let table = object_name_last(&parser.parse_object_name(false).map_err(parse_err)?)
        .ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    parser.expect_keyword(Keyword::SET).map_err(parse_err)?;
    let assignments = parser
        .parse_comma_separated(Parser::parse_assignment)
        .map_err(parse_err)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr().map_err(parse_err)?)
    } else {
        None
    };
    let _ = parser.consume_token(&Token::SemiColon);
    if parser.peek_token().token != Token::EOF {
        return Err(SqlError::Unsupported("trailing input after UPDATE".into()));
    }
    let id = extract_where_id(&selection)?;

    let mut set: Vec<(String, Expr)> = Vec::with_capacity(assignments.len());
    for a in assignments {
        let col = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        set.push((col, a.value));
    }

    match table.as_str() {
        "appointments" => parse_status_update(id, &set),
        "professionals" => {
            let mut patch = ProfessionalPatch::default();
            for (col, value) in &set {
                match col.as_str() {
                    "name" => patch.name = Some(parse_string_expr(value)?),
                    "bio" => patch.bio = Some(parse_opt_string(value)?),
                    "specialties" => {
                        patch.specialties = Some(parse_opt_string(value)?.map(|s| split_list(&s)).unwrap_or_default())
                    }
                    "active" => patch.active = Some(parse_bool(value)?),
                    other => return Err(SqlError::UnknownColumn(table.clone(), other.to_string())),
                }
            }
            Ok(Command::UpdateProfessional { id, patch })
        }
        "services" => {
            let mut patch = ServicePatch::default();
            for (col, value) in &set {
                match col.as_str() {
                    "name" => patch.name = Some(parse_string_expr(value)?),
                    "description" => patch.description = Some(parse_opt_string(value)?),
                    "duration_minutes" => patch.duration_minutes = Some(parse_u32(value)?),
                    "price_cents" => patch.price_cents = Some(parse_i64_expr(value)?),
                    "active" => patch.active = Some(parse_bool(value)?),
                    "service_type" => patch.service_type = Some(parse_opt_string(value)?),
                    "blocks_equipment" => patch.blocks_equipment = Some(parse_bool(value)?),
                    "professional_id" => patch.professional_id = Some(parse_ulid_or_null(value)?),
                    other => return Err(SqlError::UnknownColumn(table.clone(), other.to_string())),
                }
            }
            Ok(Command::UpdateService { id, patch })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_status_update(id: Ulid, set: &[(String, Expr)]) -> Result<Command, SqlError> {
    let mut status = None;
    let mut actor = Actor::Staff;
    for (col, value) in set {
        match col.as_str() {
            "status" => {
                status = Some(
                    parse_string_expr(value)?
                        .parse::<AppointmentStatus>()
                        .map_err(SqlError::Parse)?,
                )
            }
            "actor" => actor = parse_string_expr(value)?.parse().map_err(SqlError::Parse)?,
            other => return Err(SqlError::UnknownColumn("appointments".into(), other.to_string())),
        }
    }
    Ok(Command::UpdateAppointmentStatus {
        id,
        status: status.ok_or(SqlError::MissingColumn("appointments".into(), "status"))?,
        actor,
    })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "services" => Ok(Command::DeleteService { id }),
        _ => Err(SqlError::Unsupported(format!("DELETE FROM {table}"))),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        extract_eq_filters(selection, &mut filters)?;
    }
    let mut filters = Filters { table: &table, pairs: filters };

    let cmd = match table.as_str() {
        "availability" => Command::SelectAvailability {
            service_id: filters.take_ulid("service_id")?.ok_or(SqlError::MissingFilter("service_id"))?,
            date: filters.take_date("date")?.ok_or(SqlError::MissingFilter("date"))?,
            professional_id: filters.take_ulid("professional_id")?,
        },
        "slots" => Command::SelectSlots,
        "appointments" => Command::SelectAppointments(AppointmentFilter {
            client_id: filters.take_ulid("client_id")?,
            walk_in_client_id: filters.take_ulid("walk_in_client_id")?,
            professional_id: filters.take_ulid("professional_id")?,
            status: filters.take_status("status")?,
            day: filters.take_date("date")?,
        }),
        "service_types" => Command::SelectServiceTypes,
        "services" => Command::SelectServices {
            professional_id: filters.take_ulid("professional_id")?,
            active: filters.take_bool("active")?,
        },
        "professionals" => Command::SelectProfessionals {
            active: filters.take_bool("active")?,
        },
        "clients" => Command::SelectClients {
            search: filters.take_string("search")?.ok_or(SqlError::MissingFilter("search"))?,
        },
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filters.finish()?;
    Ok(cmd)
}

/// Collect `column = value` pairs joined by AND.
fn extract_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_eq_filters(left, out)?;
            extract_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref().clone()));
            Ok(())
        }
        Expr::Nested(inner) => extract_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

struct Filters<'t> {
    table: &'t str,
    pairs: Vec<(String, Expr)>,
}

impl Filters<'_> {
    fn take(&mut self, col: &str) -> Option<Expr> {
        let pos = self.pairs.iter().position(|(c, _)| c == col)?;
        Some(self.pairs.remove(pos).1)
    }

    fn take_ulid(&mut self, col: &str) -> Result<Option<Ulid>, SqlError> {
        self.take(col).map(|e| parse_ulid_expr(&e)).transpose()
    }

    fn take_date(&mut self, col: &str) -> Result<Option<NaiveDate>, SqlError> {
        self.take(col).map(|e| parse_date_expr(&e)).transpose()
    }

    fn take_status(&mut self, col: &str) -> Result<Option<AppointmentStatus>, SqlError> {
        self.take(col)
            .map(|e| parse_string_expr(&e)?.parse::<AppointmentStatus>().map_err(SqlError::Parse))
            .transpose()
    }

    fn take_bool(&mut self, col: &str) -> Result<Option<bool>, SqlError> {
        self.take(col).map(|e| parse_bool(&e)).transpose()
    }

    fn take_string(&mut self, col: &str) -> Result<Option<String>, SqlError> {
        self.take(col).map(|e| parse_string_expr(&e)).transpose()
    }

    /// Reject filters nobody consumed.
    fn finish(self) -> Result<(), SqlError> {
        match self.pairs.into_iter().next() {
            Some((col, _)) => Err(SqlError::UnknownColumn(self.table.to_string(), col)),
            None => Ok(()),
        }
    }
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.len() {
            0 => Err(SqlError::Parse("empty VALUES".into())),
            1 => Ok(values.rows[0].clone()),
            n => Err(SqlError::Unsupported(format!("multi-row INSERT ({n} rows)"))),
        },
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
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_ulid_expr(expr).map(Some)
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_opt_string(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        Ok(None)
    } else {
        parse_string_expr(expr).map(Some)
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

fn parse_slot_expr(expr: &Expr) -> Result<Slot, SqlError> {
    parse_string_expr(expr)?
        .parse()
        .map_err(|e: ParseSlotError| SqlError::Parse(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String, String),
    WrongArity(String, usize, usize),
    MissingColumn(String, &'static str),
    MissingFilter(&'static str),
    /// Well-formed SQL describing an invalid booking.
    Invalid(ValidationError),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} on {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::Invalid(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}
