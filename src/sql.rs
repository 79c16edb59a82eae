use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertUser {
        id: Ulid,
        username: String,
        name: String,
        bio: Option<String>,
    },
    UpdateUser {
        id: Ulid,
        name: String,
        bio: Option<String>,
    },
    /// Multi-row interval INSERTs carry the user's *entire* new weekly rule
    /// set — intervals are replaced wholesale, never appended.
    ReplaceIntervals {
        user_id: Ulid,
        intervals: Vec<WeeklyInterval>,
    },
    ClearIntervals {
        user_id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        user_id: Ulid,
        starts_at: Ms,
        contact_name: String,
        contact_email: String,
        notes: Option<String>,
    },
    SelectUsers,
    SelectIntervals {
        username: String,
    },
    SelectBookings {
        username: String,
        from: Option<Ms>,
        to: Option<Ms>,
    },
    SelectAvailability {
        username: String,
        date: NaiveDate,
    },
    SelectBlockedDays {
        username: String,
        year: i32,
        month: u32,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

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
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "users" => {
            let values = extract_insert_values(insert)?;
            if values.len() < 3 {
                return Err(SqlError::WrongArity("users", 3, values.len()));
            }
            let bio = if values.len() >= 4 {
                parse_string_or_null(&values[3])?
            } else {
                None
            };
            Ok(Command::InsertUser {
                id: parse_ulid(&values[0])?,
                username: parse_string(&values[1])?,
                name: parse_string(&values[2])?,
                bio,
            })
        }
        "intervals" => {
            let all_rows = extract_all_insert_rows(insert)?;
            let mut user_id = None;
            let mut intervals = Vec::with_capacity(all_rows.len());
            for (i, row) in all_rows.iter().enumerate() {
                if row.len() < 4 {
                    return Err(SqlError::WrongArity("intervals row", 4, row.len()));
                }
                let row_user =
                    parse_ulid(&row[0]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?;
                match user_id {
                    None => user_id = Some(row_user),
                    Some(uid) if uid != row_user => {
                        return Err(SqlError::Parse(
                            "all interval rows must share one user_id".into(),
                        ));
                    }
                    Some(_) => {}
                }
                intervals.push(WeeklyInterval::new(
                    parse_u8(&row[1]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    parse_u16(&row[2]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                    parse_u16(&row[3]).map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?,
                ));
            }
            let user_id = user_id.ok_or(SqlError::Parse("empty VALUES".into()))?;
            Ok(Command::ReplaceIntervals { user_id, intervals })
        }
        "bookings" => {
            let all_rows = extract_all_insert_rows(insert)?;
            if all_rows.len() != 1 {
                return Err(SqlError::Unsupported(
                    "bookings are created one at a time".into(),
                ));
            }
            let values = &all_rows[0];
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            let notes = if values.len() >= 6 {
                parse_string_or_null(&values[5])?
            } else {
                None
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                user_id: parse_ulid(&values[1])?,
                starts_at: parse_i64(&values[2])?,
                contact_name: parse_string(&values[3])?,
                contact_email: parse_string(&values[4])?,
                notes,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "users" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut name = None;
    let mut bio = None;
    for assignment in assignments {
        let col = assignment_column(&assignment.target)?;
        match col.as_str() {
            "name" => name = Some(parse_string(&assignment.value)?),
            "bio" => bio = parse_string_or_null(&assignment.value)?,
            other => {
                return Err(SqlError::Parse(format!("cannot update column: {other}")));
            }
        }
    }

    let id = extract_where_ulid(selection, "id")?;
    Ok(Command::UpdateUser {
        id,
        name: name.ok_or(SqlError::MissingFilter("name"))?,
        bio,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        // Clearing the rule set is the only destructive verb in the model:
        // users and bookings are never deleted in normal flow.
        "intervals" => {
            let user_id = extract_where_ulid(&delete.selection, "user_id")?;
            Ok(Command::ClearIntervals { user_id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = SelectFilters::default();
    if let Some(selection) = &select.selection {
        extract_select_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "users" => Ok(Command::SelectUsers),
        "intervals" => Ok(Command::SelectIntervals {
            username: filters.username.ok_or(SqlError::MissingFilter("username"))?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            username: filters.username.ok_or(SqlError::MissingFilter("username"))?,
            from: filters.from,
            to: filters.to,
        }),
        "availability" => Ok(Command::SelectAvailability {
            username: filters.username.ok_or(SqlError::MissingFilter("username"))?,
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
        }),
        "blocked_days" => Ok(Command::SelectBlockedDays {
            username: filters.username.ok_or(SqlError::MissingFilter("username"))?,
            year: filters.year.ok_or(SqlError::MissingFilter("year"))?,
            month: filters.month.ok_or(SqlError::MissingFilter("month"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct SelectFilters {
    username: Option<String>,
    date: Option<NaiveDate>,
    year: Option<i32>,
    month: Option<u32>,
    from: Option<Ms>,
    to: Option<Ms>,
}

fn extract_select_filters(expr: &Expr, filters: &mut SelectFilters) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_select_filters(left, filters)?;
                extract_select_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("username") => filters.username = Some(parse_string(right)?),
                Some("date") => filters.date = Some(parse_date(right)?),
                Some("year") => {
                    let year = parse_i64_expr(right)?;
                    filters.year = Some(
                        i32::try_from(year)
                            .map_err(|_| SqlError::Parse(format!("{year} out of year range")))?,
                    );
                }
                Some("month") => {
                    let month = parse_i64_expr(right)?;
                    filters.month = Some(
                        u32::try_from(month)
                            .map_err(|_| SqlError::Parse(format!("{month} out of month range")))?,
                    );
                }
                _ => {}
            },
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("starts_at") {
                    filters.from = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("starts_at") {
                    filters.to = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        }
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

fn assignment_column(target: &ast::AssignmentTarget) -> Result<String, SqlError> {
    match target {
        ast::AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let mut rows = extract_all_insert_rows(insert)?;
    if rows.len() != 1 {
        return Err(SqlError::Parse("expected a single VALUES row".into()));
    }
    Ok(rows.remove(0))
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
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

fn extract_where_ulid(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter(column))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some(column) {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter(column))
            }
        }
        _ => Err(SqlError::MissingFilter(column)),
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_expr(expr)
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_u8(expr: &Expr) -> Result<u8, SqlError> {
    let v = parse_i64_expr(expr)?;
    u8::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u8 range")))
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u16 range")))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Null => Ok(None),
            Value::SingleQuotedString(s) => Ok(Some(s.clone())),
            _ => Err(SqlError::Parse(format!(
                "expected string or NULL, got {value:?}"
            ))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
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
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
