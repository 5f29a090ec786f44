use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input. The caller is never part of the statement;
/// it comes from the session's login user.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        provider_id: Ulid,
        start: Ms,
        end: Ms,
        notes: Option<String>,
    },
    SelectBooking {
        id: Ulid,
    },
    SelectBookings {
        role: Party,
        status: Option<BookingStatus>,
    },
    UpdateStatus {
        id: Ulid,
        status: BookingStatus,
    },
    UpdateNotes {
        id: Ulid,
        notes: Option<String>,
    },
    HideBooking {
        id: Ulid,
    },
    SelectReviewCandidates,
    InsertReview {
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    },
    SelectReviews {
        provider_id: Ulid,
    },
    SelectEarnings,
    Listen {
        channel: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.get(..7).is_some_and(|head| head.eq_ignore_ascii_case("LISTEN ")) {
        let channel = trimmed[7..].trim().trim_matches(';').trim_matches('"').to_string();
        return Ok(Command::Listen { channel });
    }

    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql)
        .map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    match table.as_str() {
        "bookings" => {
            let row = insert_row(insert, &["provider_id", "start", "end", "notes"])?;
            let required = 3;
            if row.iter().take(required).any(Option::is_none) {
                return Err(SqlError::WrongArity("bookings", required, row.iter().flatten().count()));
            }
            let field = |i: usize| row[i].ok_or(SqlError::WrongArity("bookings", required, i));
            Ok(Command::InsertBooking {
                provider_id: parse_ulid(field(0)?)?,
                start: parse_i64(field(1)?)?,
                end: parse_i64(field(2)?)?,
                notes: row[3].map(parse_text_or_null).transpose()?.flatten(),
            })
        }
        "reviews" => {
            let row = insert_row(insert, &["booking_id", "rating", "comment"])?;
            let (Some(booking_id), Some(rating)) = (row[0], row[1]) else {
                return Err(SqlError::WrongArity("reviews", 2, row.iter().flatten().count()));
            };
            let rating = parse_i64(rating)?;
            Ok(Command::InsertReview {
                booking_id: parse_ulid(booking_id)?,
                rating: u8::try_from(rating)
                    .map_err(|_| SqlError::Parse(format!("rating {rating} out of range")))?,
                comment: row[2].map(parse_text_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |name: &str| filters.iter().find(|(col, _)| col == name).map(|(_, e)| *e);

    match table.as_str() {
        "bookings" => {
            if let Some(id) = filter("id") {
                return Ok(Command::SelectBooking { id: parse_ulid(id)? });
            }
            let role = filter("role").ok_or(SqlError::MissingFilter("role"))?;
            let role = Party::parse(&parse_text(role)?)
                .ok_or_else(|| SqlError::Parse("role must be 'requester' or 'provider'".into()))?;
            let status = filter("status").map(parse_status).transpose()?;
            Ok(Command::SelectBookings { role, status })
        }
        "review_candidates" => Ok(Command::SelectReviewCandidates),
        "reviews" => {
            let provider_id = filter("provider_id").ok_or(SqlError::MissingFilter("provider_id"))?;
            Ok(Command::SelectReviews { provider_id: parse_ulid(provider_id)? })
        }
        "earnings" => Ok(Command::SelectEarnings),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;
    let [assignment] = assignments else {
        return Err(SqlError::Unsupported("UPDATE must set exactly one column".into()));
    };
    let column = match &assignment.target {
        AssignmentTarget::ColumnName(name) => object_name_last(name),
        AssignmentTarget::Tuple(_) => None,
    };
    match column.as_deref() {
        Some("status") => Ok(Command::UpdateStatus {
            id,
            status: parse_status(&assignment.value)?,
        }),
        Some("notes") => Ok(Command::UpdateNotes {
            id,
            notes: parse_text_or_null(&assignment.value)?,
        }),
        Some(other) => Err(SqlError::Unsupported(format!("cannot update column {other}"))),
        None => Err(SqlError::Unsupported("UPDATE target".into())),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }
    Ok(Command::HideBooking {
        id: extract_where_id(&delete.selection)?,
    })
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
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables
        .first()
        .ok_or_else(|| SqlError::Parse("DELETE without table".into()))?;
    table_factor_name(&first.relation)
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single VALUES row of an INSERT, laid out in `columns` order. With no
/// column list the values are positional.
fn insert_row<'a>(
    insert: &'a ast::Insert,
    columns: &[&str],
) -> Result<Vec<Option<&'a Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or_else(|| SqlError::Parse("no VALUES".into()))?;
    let values = match body.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let row = match values.as_slice() {
        [row] => row,
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };

    if insert.columns.is_empty() {
        if row.len() > columns.len() {
            return Err(SqlError::Parse(format!(
                "too many values: expected at most {}, got {}",
                columns.len(),
                row.len()
            )));
        }
        return Ok((0..columns.len()).map(|i| row.get(i)).collect());
    }

    if insert.columns.len() != row.len() {
        return Err(SqlError::Parse("column and value counts differ".into()));
    }
    let mut out = vec![None; columns.len()];
    for (ident, expr) in insert.columns.iter().zip(row) {
        let name = ident.value.to_lowercase();
        let slot = columns
            .iter()
            .position(|c| *c == name)
            .ok_or_else(|| SqlError::Parse(format!("unknown column {name}")))?;
        out[slot] = Some(expr);
    }
    Ok(out)
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op: ast::BinaryOperator::And, right } => {
            collect_eq_filters(left, out)?;
            collect_eq_filters(right, out)
        }
        Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((col, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_eq_filters(sel, &mut filters)?;
    match filters.as_slice() {
        [(col, value)] if col == "id" => parse_ulid(value),
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

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp { op: ast::UnaryOperator::Minus, expr } = expr {
        return Ok(-parse_i64(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _) | Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_text(expr)?;
    BookingStatus::parse(&s).ok_or_else(|| SqlError::Parse(format!("unknown status {s}")))
}
