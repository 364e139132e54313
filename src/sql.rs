use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        /// Generated by the server when omitted.
        id: Option<Ulid>,
        host_id: Ulid,
        name: String,
        location: String,
        capacity: u32,
        daily_rate: Decimal,
        amenities: Vec<String>,
    },
    InsertUser {
        id: Option<Ulid>,
        name: String,
        contact: String,
        role: Role,
    },
    InsertReservation {
        guest_id: Ulid,
        resource_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },
    CancelReservation {
        id: Ulid,
    },
    SelectResources {
        id: Option<Ulid>,
    },
    SelectUsers {
        filter: UserFilter,
    },
    SelectReservations {
        filter: ReservationFilter,
    },
}

#[derive(Debug, PartialEq)]
pub enum UserFilter {
    All,
    Id(Ulid),
    Contact(String),
}

#[derive(Debug, PartialEq)]
pub enum ReservationFilter {
    Id(Ulid),
    Resource(Ulid),
}

/// Tables a client can address. `resources` is accepted for `caravans`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Caravans,
    Users,
    Reservations,
}

impl Table {
    fn from_name(name: &str) -> Result<Self, SqlError> {
        match name {
            "caravans" | "resources" => Ok(Table::Caravans),
            "users" => Ok(Table::Users),
            "reservations" => Ok(Table::Reservations),
            other => Err(SqlError::UnknownTable(other.to_string())),
        }
    }

    /// Columns a SELECT may filter on.
    fn filter_columns(self) -> &'static [&'static str] {
        match self {
            Table::Caravans => &["id"],
            Table::Users => &["id", "contact"],
            Table::Reservations => &["id", "caravan_id", "resource_id"],
        }
    }
}

const CARAVAN_COLUMNS: &[&str] = &["id", "host_id", "name", "location", "capacity", "daily_rate", "amenities"];
const USER_COLUMNS: &[&str] = &["id", "name", "contact", "role"];
const RESERVATION_COLUMNS: &[&str] = &["guest_id", "caravan_id", "start_date", "end_date"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = Table::from_name(&insert_table_name(insert)?)?;
    let values = extract_insert_values(insert)?;

    match table {
        Table::Caravans => {
            let row = NamedRow::new(insert, values, CARAVAN_COLUMNS, "caravans")?;
            Ok(Command::InsertResource {
                id: row.optional("id").map(parse_ulid_or_null).transpose()?.flatten(),
                host_id: parse_ulid(row.required("host_id")?)?,
                name: parse_string(row.required("name")?)?,
                location: parse_string(row.required("location")?)?,
                capacity: parse_u32(row.required("capacity")?)?,
                daily_rate: parse_decimal(row.required("daily_rate")?)?,
                amenities: match row.optional("amenities") {
                    Some(expr) => parse_list(expr)?,
                    None => Vec::new(),
                },
            })
        }
        Table::Users => {
            let row = NamedRow::new(insert, values, USER_COLUMNS, "users")?;
            let role = parse_string(row.required("role")?)?;
            Ok(Command::InsertUser {
                id: row.optional("id").map(parse_ulid_or_null).transpose()?.flatten(),
                name: parse_string(row.required("name")?)?,
                contact: parse_string(row.required("contact")?)?,
                role: Role::parse(&role).ok_or_else(|| SqlError::Parse(format!("unknown role: {role}")))?,
            })
        }
        Table::Reservations => {
            let row = NamedRow::new(insert, values, RESERVATION_COLUMNS, "reservations")?;
            Ok(Command::InsertReservation {
                guest_id: parse_ulid(row.required("guest_id")?)?,
                resource_id: parse_ulid(row.required("caravan_id")?)?,
                start: parse_date(row.required("start_date")?)?,
                end: parse_date(row.required("end_date")?)?,
            })
        }
    }
}

/// `UPDATE reservations SET status = 'cancelled' WHERE id = '…'`. No other update exists.
fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = Table::from_name(&table_factor_name(relation)?)?;
    if table != Table::Reservations {
        return Err(SqlError::Unsupported(format!("UPDATE on {table:?}")));
    }

    let mut status = None;
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        };
        match column.as_deref() {
            Some("status") => {
                let raw = parse_string(&assignment.value)?;
                status = Some(
                    ReservationStatus::parse(&raw)
                        .ok_or_else(|| SqlError::Parse(format!("unknown status: {raw}")))?,
                );
            }
            Some(other) => return Err(SqlError::Unsupported(format!("cannot update column {other}"))),
            None => return Err(SqlError::Parse("unsupported assignment target".into())),
        }
    }

    match status {
        Some(ReservationStatus::Cancelled) => Ok(Command::CancelReservation {
            id: extract_where_id(selection)?,
        }),
        Some(ReservationStatus::Active) => Err(SqlError::Unsupported(
            "a cancelled reservation cannot be reactivated".into(),
        )),
        None => Err(SqlError::MissingFilter("status")),
    }
}

/// `DELETE FROM reservations WHERE id = '…'` cancels; the record is kept.
fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = Table::from_name(&delete_table_name(delete)?)?;
    if table != Table::Reservations {
        return Err(SqlError::Unsupported(format!("DELETE on {table:?}")));
    }
    Ok(Command::CancelReservation {
        id: extract_where_id(&delete.selection)?,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = Table::from_name(&table_factor_name(&select.from[0].relation)?)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    if let Some((col, _)) = filters.iter().find(|(c, _)| !table.filter_columns().contains(&c.as_str())) {
        return Err(SqlError::Unsupported(format!("filter on {table:?}.{col}")));
    }
    if filters.len() > 1 {
        return Err(SqlError::Unsupported("more than one filter".into()));
    }
    let find = |col: &str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| e);

    match table {
        Table::Caravans => Ok(Command::SelectResources {
            id: find("id").map(parse_ulid).transpose()?,
        }),
        Table::Users => {
            let filter = if let Some(e) = find("id") {
                UserFilter::Id(parse_ulid(e)?)
            } else if let Some(e) = find("contact") {
                UserFilter::Contact(parse_string(e)?)
            } else {
                UserFilter::All
            };
            Ok(Command::SelectUsers { filter })
        }
        Table::Reservations => {
            let filter = if let Some(e) = find("id") {
                ReservationFilter::Id(parse_ulid(e)?)
            } else if let Some(e) = find("caravan_id").or_else(|| find("resource_id")) {
                ReservationFilter::Resource(parse_ulid(e)?)
            } else {
                return Err(SqlError::MissingFilter("caravan_id"));
            };
            Ok(Command::SelectReservations { filter })
        }
    }
}

/// Collect `column = value` pairs joined by AND. Anything else is rejected.
fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
                out.push((col, right.as_ref().clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// One VALUES row addressed by column name. Without an explicit column list
/// the values are taken in the table's default column order.
struct NamedRow {
    fields: Vec<(String, Expr)>,
}

impl NamedRow {
    fn new(
        insert: &ast::Insert,
        values: Vec<Expr>,
        default_columns: &[&str],
        table: &'static str,
    ) -> Result<Self, SqlError> {
        let columns: Vec<String> = if insert.columns.is_empty() {
            default_columns.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() > columns.len() || (!insert.columns.is_empty() && values.len() != columns.len()) {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        let fields = columns
            .into_iter()
            .zip(values)
            .map(|(c, v)| match c.as_str() {
                "resource_id" => ("caravan_id".to_string(), v),
                _ => (c, v),
            })
            .collect();
        Ok(Self { fields })
    }

    fn optional(&self, column: &str) -> Option<&Expr> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.optional(column).ok_or(SqlError::MissingColumn(column))
    }
}

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
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
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
                parse_ulid(right)
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

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let raw = parse_string(expr)?;
    NaiveDate::from_str(raw.trim()).map_err(|e| SqlError::Parse(format!("bad date {raw:?}: {e}")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad decimal {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
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
            .trim()
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

/// Comma-separated text, e.g. `'kitchen, shower'`. NULL is an empty list.
fn parse_list(expr: &Expr) -> Result<Vec<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(Vec::new());
    }
    Ok(parse_string(expr)?
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
