//! Clause trees and parameterized INSERT/UPDATE/DELETE from key-value lists.
//!
//! Identifiers come from resolved configuration only; every value is a bound
//! parameter. A clause tree always renders in the fixed order
//! SELECT, FROM, JOIN, WHERE, ORDER BY, LIMIT, OFFSET and drops empty clauses.

use crate::sql::PgBindValue;

/// Quote identifier for PostgreSQL (safe: only from config).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Quote a possibly dotted reference (`alias.column`) segment by segment.
pub fn ident(s: &str) -> String {
    s.split('.')
        .map(|part| if part == "*" { part.to_string() } else { quoted(part) })
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Default, Clone)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<PgBindValue>,
}

impl QueryBuf {
    pub fn new() -> Self {
        QueryBuf::default()
    }

    /// Bind a value and return its placeholder, with a cast when one is given.
    pub fn push_param(&mut self, v: PgBindValue, cast: Option<&str>) -> String {
        self.params.push(v);
        let n = self.params.len();
        match cast {
            Some(t) => format!("${}::{}", n, t),
            None => format!("${}", n),
        }
    }
}

/// `column = value` pair used for WHERE predicates, SET lists and VALUES lists.
#[derive(Debug, Clone)]
pub struct ColumnValue {
    pub column: String,
    pub value: PgBindValue,
    pub cast: Option<&'static str>,
}

impl ColumnValue {
    pub fn new(column: impl Into<String>, value: PgBindValue) -> Self {
        ColumnValue {
            column: column.into(),
            value,
            cast: None,
        }
    }

    pub fn with_cast(mut self, cast: Option<&'static str>) -> Self {
        self.cast = cast;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Column(String),
    /// Trusted SQL expression with an output alias, e.g. `count(*) AS count_`.
    Expr { sql: String, alias: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderField {
    pub column: String,
    pub descending: bool,
}

impl OrderField {
    /// `"-slug"` orders descending, `"slug"` ascending.
    pub fn parse(s: &str) -> Self {
        match s.strip_prefix('-') {
            Some(column) => OrderField {
                column: column.to_string(),
                descending: true,
            },
            None => OrderField {
                column: s.to_string(),
                descending: false,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Clause {
    Select(Vec<SelectItem>),
    From { table: String, alias: Option<String> },
    /// Raw join text from configuration.
    Join(String),
    Where(Vec<ColumnValue>),
    OrderBy(Vec<OrderField>),
    Limit(u64),
    Offset(u64),
}

impl Clause {
    fn rank(&self) -> u8 {
        match self {
            Clause::Select(_) => 0,
            Clause::From { .. } => 1,
            Clause::Join(_) => 2,
            Clause::Where(_) => 3,
            Clause::OrderBy(_) => 4,
            Clause::Limit(_) => 5,
            Clause::Offset(_) => 6,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Clause::Select(items) => items.is_empty(),
            Clause::From { table, .. } => table.is_empty(),
            Clause::Join(sql) => sql.trim().is_empty(),
            Clause::Where(conds) => conds.is_empty(),
            Clause::OrderBy(fields) => fields.is_empty(),
            Clause::Limit(_) => false,
            Clause::Offset(n) => *n == 0,
        }
    }

    fn render(&self, q: &mut QueryBuf) -> String {
        match self {
            Clause::Select(items) => {
                let cols: Vec<String> = items
                    .iter()
                    .map(|item| match item {
                        SelectItem::Column(c) => ident(c),
                        SelectItem::Expr { sql, alias } => format!("{} AS {}", sql, quoted(alias)),
                    })
                    .collect();
                format!("SELECT {}", cols.join(", "))
            }
            Clause::From { table, alias } => match alias {
                Some(a) => format!("FROM {} AS {}", ident(table), quoted(a)),
                None => format!("FROM {}", ident(table)),
            },
            Clause::Join(sql) => sql.trim().to_string(),
            Clause::Where(conds) => {
                let parts: Vec<String> = conds
                    .iter()
                    .map(|c| {
                        let ph = q.push_param(c.value.clone(), c.cast);
                        format!("{} = {}", ident(&c.column), ph)
                    })
                    .collect();
                format!("WHERE {}", parts.join(" AND "))
            }
            Clause::OrderBy(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|f| {
                        if f.descending {
                            format!("{} DESC", ident(&f.column))
                        } else {
                            ident(&f.column)
                        }
                    })
                    .collect();
                format!("ORDER BY {}", parts.join(", "))
            }
            Clause::Limit(n) => format!("LIMIT {}", n),
            Clause::Offset(n) => format!("OFFSET {}", n),
        }
    }
}

/// Ordered clause tree built per request.
#[derive(Debug, Default, Clone)]
pub struct Clauses(Vec<Clause>);

impl Clauses {
    pub fn new() -> Self {
        Clauses::default()
    }

    /// Add a clause; `None` and clauses with no content are dropped.
    pub fn push(mut self, clause: impl Into<Option<Clause>>) -> Self {
        if let Some(c) = clause.into() {
            if !c.is_empty() {
                self.0.push(c);
            }
        }
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render into an existing buffer so parameters keep numbering across
    /// sub-queries. Returns the SQL text of this tree.
    pub fn render_into(&self, q: &mut QueryBuf) -> String {
        let mut ordered: Vec<&Clause> = self.0.iter().collect();
        ordered.sort_by_key(|c| c.rank());
        ordered
            .into_iter()
            .map(|c| c.render(q))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_query(&self) -> QueryBuf {
        let mut q = QueryBuf::new();
        let sql = self.render_into(&mut q);
        q.sql = sql;
        q
    }
}

/// INSERT the given column values, returning one column.
pub fn insert(table: &str, values: &[ColumnValue], returning: &str) -> QueryBuf {
    let mut q = QueryBuf::new();
    if values.is_empty() {
        q.sql = format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            ident(table),
            ident(returning)
        );
        return q;
    }
    let mut cols = Vec::with_capacity(values.len());
    let mut placeholders = Vec::with_capacity(values.len());
    for v in values {
        cols.push(quoted(&v.column));
        placeholders.push(q.push_param(v.value.clone(), v.cast));
    }
    q.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        ident(table),
        cols.join(", "),
        placeholders.join(", "),
        ident(returning)
    );
    q
}

/// UPDATE by a single predicate. Caller guarantees `set` is not empty.
pub fn update(table: &str, set: &[ColumnValue], filter: &ColumnValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let sets: Vec<String> = set
        .iter()
        .map(|v| {
            let ph = q.push_param(v.value.clone(), v.cast);
            format!("{} = {}", quoted(&v.column), ph)
        })
        .collect();
    let ph = q.push_param(filter.value.clone(), filter.cast);
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        ident(table),
        sets.join(", "),
        ident(&filter.column),
        ph
    );
    q
}

/// DELETE by a single predicate.
pub fn delete(table: &str, filter: &ColumnValue) -> QueryBuf {
    let mut q = QueryBuf::new();
    let ph = q.push_param(filter.value.clone(), filter.cast);
    q.sql = format!("DELETE FROM {} WHERE {} = {}", ident(table), ident(&filter.column), ph);
    q
}
