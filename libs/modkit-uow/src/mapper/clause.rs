//! Validated where / order-by / pagination clauses.
//!
//! Clauses can only be created from a resolved catalog column, so every
//! column name that reaches SQL text was checked against the mapping.

use serde::{Deserialize, Serialize};

use super::catalog::ColumnDef;
use super::error::{MapperError, MapperResult};
use super::sql::{SqlWriter, like_escape};
use super::types::{DbType, DbValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ColumnRef {
    property: &'static str,
    column: &'static str,
    db_type: DbType,
}

impl ColumnRef {
    pub(crate) const fn property(&self) -> &'static str {
        self.property
    }

    pub(crate) const fn column(&self) -> &'static str {
        self.column
    }
}

impl From<&ColumnDef> for ColumnRef {
    fn from(def: &ColumnDef) -> Self {
        Self {
            property: def.property(),
            column: def.column(),
            db_type: def.db_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    const fn sql(self) -> &'static str {
        match self {
            Self::Eq => " = ",
            Self::Ne => " <> ",
            Self::Gt => " > ",
            Self::Ge => " >= ",
            Self::Lt => " < ",
            Self::Le => " <= ",
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Lt => "lt",
            Self::Le => "le",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: DbValue,
    },
    Between {
        column: ColumnRef,
        low: DbValue,
        high: DbValue,
    },
    In {
        column: ColumnRef,
        values: Vec<DbValue>,
    },
    Like {
        column: ColumnRef,
        pattern: String,
    },
    Null {
        column: ColumnRef,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    fn render(&self, w: &mut SqlWriter) {
        match self {
            Self::Compare { column, op, value } => {
                w.push(column.column)
                    .push(op.sql())
                    .push_param(column.property, value.clone());
            }
            Self::Between { column, low, high } => {
                w.push(column.column)
                    .push(" BETWEEN ")
                    .push_param(column.property, low.clone())
                    .push(" AND ")
                    .push_param(column.property, high.clone());
            }
            Self::In { column, values } => {
                w.push(column.column).push(" IN (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push_param(column.property, value.clone());
                }
                w.push(")");
            }
            Self::Like { column, pattern } => {
                w.push(column.column)
                    .push(" LIKE ")
                    .push_param(column.property, DbValue::from(pattern.as_str()));
            }
            Self::Null { column, negated } => {
                w.push(column.column).push(if *negated {
                    " IS NOT NULL"
                } else {
                    " IS NULL"
                });
            }
            Self::And(parts) => render_joined(w, parts, " AND "),
            Self::Or(parts) => render_joined(w, parts, " OR "),
            Self::Not(inner) => {
                w.push("NOT (");
                inner.render(w);
                w.push(")");
            }
        }
    }
}

fn render_joined(w: &mut SqlWriter, parts: &[Predicate], separator: &str) {
    w.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            w.push(separator);
        }
        part.render(w);
    }
    w.push(")");
}

/// A validated `WHERE` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause(Predicate);

impl WhereClause {
    /// Both conditions must hold.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match self.0 {
            Predicate::And(mut parts) => {
                parts.push(other.0);
                Self(Predicate::And(parts))
            }
            first => Self(Predicate::And(vec![first, other.0])),
        }
    }

    /// Either condition holds.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match self.0 {
            Predicate::Or(mut parts) => {
                parts.push(other.0);
                Self(Predicate::Or(parts))
            }
            first => Self(Predicate::Or(vec![first, other.0])),
        }
    }

    #[must_use]
    pub fn not(self) -> Self {
        Self(Predicate::Not(Box::new(self.0)))
    }

    pub(crate) fn render(&self, w: &mut SqlWriter) {
        self.0.render(w);
    }
}

/// A resolved column, ready to build predicates on.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    column: ColumnRef,
}

impl Field {
    pub(crate) fn new(def: &ColumnDef) -> Self {
        Self { column: def.into() }
    }

    fn checked(&self, value: DbValue) -> MapperResult<DbValue> {
        if value.db_type() == self.column.db_type {
            Ok(value)
        } else {
            Err(MapperError::TypeMismatch {
                property: self.column.property.to_owned(),
                expected: self.column.db_type,
                got: value.db_type(),
            })
        }
    }

    fn compare(self, op: CompareOp, value: impl Into<DbValue>) -> MapperResult<WhereClause> {
        let value = self.checked(value.into())?;
        if !matches!(op, CompareOp::Eq | CompareOp::Ne) && !self.column.db_type.is_ordered() {
            return Err(self.invalid_operator(op.name()));
        }
        // `= NULL` never matches; use the null test instead.
        if value.is_null() {
            return match op {
                CompareOp::Eq => Ok(self.is_null()),
                CompareOp::Ne => Ok(self.is_not_null()),
                _ => Err(self.invalid_operator(op.name())),
            };
        }
        Ok(WhereClause(Predicate::Compare {
            column: self.column,
            op,
            value,
        }))
    }

    fn invalid_operator(&self, op: &'static str) -> MapperError {
        MapperError::InvalidOperator {
            property: self.column.property.to_owned(),
            op,
            db_type: self.column.db_type,
        }
    }

    /// # Errors
    /// Returns an error if the value type does not match the column.
    pub fn eq(self, value: impl Into<DbValue>) -> MapperResult<WhereClause> {
        self.compare(CompareOp::Eq, value)
    }

    /// # Errors
    /// Returns an error if the value type does not match the column.
    pub fn ne(self, value: impl Into<DbValue>) -> MapperResult<WhereClause> {
        self.compare(CompareOp::Ne, value)
    }

    /// # Errors
    /// Returns an error on type mismatch or an unordered column type.
    pub fn gt(self, value: impl Into<DbValue>) -> MapperResult<WhereClause> {
        self.compare(CompareOp::Gt, value)
    }

    /// # Errors
    /// Returns an error on type mismatch or an unordered column type.
    pub fn ge(self, value: impl Into<DbValue>) -> MapperResult<WhereClause> {
        self.compare(CompareOp::Ge, value)
    }

    /// # Errors
    /// Returns an error on type mismatch or an unordered column type.
    pub fn lt(self, value: impl Into<DbValue>) -> MapperResult<WhereClause> {
        self.compare(CompareOp::Lt, value)
    }

    /// # Errors
    /// Returns an error on type mismatch or an unordered column type.
    pub fn le(self, value: impl Into<DbValue>) -> MapperResult<WhereClause> {
        self.compare(CompareOp::Le, value)
    }

    /// Inclusive range.
    ///
    /// # Errors
    /// Returns an error on type mismatch or an unordered column type.
    pub fn between(
        self,
        low: impl Into<DbValue>,
        high: impl Into<DbValue>,
    ) -> MapperResult<WhereClause> {
        if !self.column.db_type.is_ordered() {
            return Err(self.invalid_operator("between"));
        }
        Ok(WhereClause(Predicate::Between {
            column: self.column,
            low: self.checked(low.into())?,
            high: self.checked(high.into())?,
        }))
    }

    /// # Errors
    /// Returns an error on type mismatch or an empty list.
    pub fn in_list<V: Into<DbValue>>(
        self,
        values: impl IntoIterator<Item = V>,
    ) -> MapperResult<WhereClause> {
        let values = values
            .into_iter()
            .map(|v| self.checked(v.into()))
            .collect::<MapperResult<Vec<_>>>()?;
        if values.is_empty() {
            return Err(MapperError::EmptyValueList(self.column.property.to_owned()));
        }
        Ok(WhereClause(Predicate::In {
            column: self.column,
            values,
        }))
    }

    /// Substring match; `%`, `_` and `\` in `needle` match literally.
    ///
    /// # Errors
    /// Returns an error unless the column is textual.
    pub fn contains(self, needle: &str) -> MapperResult<WhereClause> {
        self.like(format!("%{}%", like_escape(needle)), "contains")
    }

    /// # Errors
    /// Returns an error unless the column is textual.
    pub fn starts_with(self, prefix: &str) -> MapperResult<WhereClause> {
        self.like(format!("{}%", like_escape(prefix)), "starts_with")
    }

    /// # Errors
    /// Returns an error unless the column is textual.
    pub fn ends_with(self, suffix: &str) -> MapperResult<WhereClause> {
        self.like(format!("%{}", like_escape(suffix)), "ends_with")
    }

    fn like(self, pattern: String, op: &'static str) -> MapperResult<WhereClause> {
        if self.column.db_type != DbType::Varchar {
            return Err(self.invalid_operator(op));
        }
        Ok(WhereClause(Predicate::Like {
            column: self.column,
            pattern,
        }))
    }

    #[must_use]
    pub fn is_null(self) -> WhereClause {
        WhereClause(Predicate::Null {
            column: self.column,
            negated: false,
        })
    }

    #[must_use]
    pub fn is_not_null(self) -> WhereClause {
        WhereClause(Predicate::Null {
            column: self.column,
            negated: true,
        })
    }

    /// Builds the predicate described by a [`FilterInfo`] operator and value.
    ///
    /// # Errors
    /// Returns an error if the value shape does not fit the operator or the
    /// value does not fit the column.
    pub fn apply(self, op: FilterOp, value: FilterValue) -> MapperResult<WhereClause> {
        match (op, value) {
            (FilterOp::Eq, FilterValue::Single(v)) => self.eq(v),
            (FilterOp::Ne, FilterValue::Single(v)) => self.ne(v),
            (FilterOp::Gt, FilterValue::Single(v)) => self.gt(v),
            (FilterOp::Ge, FilterValue::Single(v)) => self.ge(v),
            (FilterOp::Lt, FilterValue::Single(v)) => self.lt(v),
            (FilterOp::Le, FilterValue::Single(v)) => self.le(v),
            (FilterOp::Between, FilterValue::Range(low, high)) => self.between(low, high),
            (FilterOp::In, FilterValue::List(values)) => self.in_list(values),
            (FilterOp::Contains, FilterValue::Single(DbValue::Text(Some(s)))) => self.contains(&s),
            (FilterOp::StartsWith, FilterValue::Single(DbValue::Text(Some(s)))) => {
                self.starts_with(&s)
            }
            (FilterOp::EndsWith, FilterValue::Single(DbValue::Text(Some(s)))) => {
                self.ends_with(&s)
            }
            (FilterOp::IsNull, FilterValue::None) => Ok(self.is_null()),
            (FilterOp::IsNotNull, FilterValue::None) => Ok(self.is_not_null()),
            (op, _) => Err(MapperError::FilterShape {
                property: self.column.property.to_owned(),
                expected: op.expected_shape(),
            }),
        }
    }
}

/// Filter operators accepted in [`FilterInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Between,
    In,
    Contains,
    StartsWith,
    EndsWith,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    const fn expected_shape(self) -> &'static str {
        match self {
            Self::Eq | Self::Ne | Self::Gt | Self::Ge | Self::Lt | Self::Le => "a single value",
            Self::Between => "a low/high range",
            Self::In => "a list of values",
            Self::Contains | Self::StartsWith | Self::EndsWith => "a non-null text value",
            Self::IsNull | Self::IsNotNull => "no value",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    None,
    Single(DbValue),
    Range(DbValue, DbValue),
    List(Vec<DbValue>),
}

/// A filter expressed by property name, typically coming from a query API.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterInfo {
    pub field: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FilterInfo {
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }
}

// Ordering primitives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    #[serde(rename = "asc")]
    Asc,
    #[serde(rename = "desc")]
    Desc,
}

impl SortDir {
    /// Reverse the sort direction (Asc <-> Desc)
    #[must_use]
    pub fn reverse(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }

    const fn sql(self) -> &'static str {
        match self {
            Self::Asc => " ASC",
            Self::Desc => " DESC",
        }
    }
}

/// A sort key expressed by property name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortInfo {
    pub field: String,
    pub dir: SortDir,
}

impl SortInfo {
    #[must_use]
    pub fn new(field: impl Into<String>, dir: SortDir) -> Self {
        Self {
            field: field.into(),
            dir,
        }
    }
}

/// A validated `ORDER BY` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderByClause {
    keys: Vec<(ColumnRef, SortDir)>,
}

impl OrderByClause {
    pub(crate) fn new(def: &ColumnDef, dir: SortDir) -> Self {
        Self {
            keys: vec![(def.into(), dir)],
        }
    }

    /// Appends the keys of `next` as tie-breakers.
    #[must_use]
    pub fn then(mut self, next: Self) -> Self {
        self.keys.extend(next.keys);
        self
    }

    /// Same keys with every direction flipped.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            keys: self
                .keys
                .iter()
                .map(|(column, dir)| (*column, dir.reverse()))
                .collect(),
        }
    }

    pub(crate) fn render(&self, w: &mut SqlWriter) {
        w.push(" ORDER BY ");
        for (i, (column, dir)) in self.keys.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(column.column).push(dir.sql());
        }
    }
}

/// Offset/limit window over an ordered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Pagination {
    #[must_use]
    pub const fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }

    /// Zero-based page of `page_size` rows.
    #[must_use]
    pub const fn page(page: u64, page_size: u64) -> Self {
        Self {
            offset: page.saturating_mul(page_size),
            limit: page_size,
        }
    }

    pub(crate) fn render(self, w: &mut SqlWriter) {
        w.push(" LIMIT ")
            .push(&self.limit.to_string())
            .push(" OFFSET ")
            .push(&self.offset.to_string());
    }
}

/// Caps applied to caller-supplied page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationLimits {
    /// Page size used when the caller gives none (default: 50)
    pub default_limit: u64,
    /// Largest accepted page size (default: 1000)
    pub max_limit: u64,
}

impl Default for PaginationLimits {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 1000,
        }
    }
}

impl PaginationLimits {
    /// Builds a window with the limit clamped to `1..=max_limit`.
    #[must_use]
    pub fn window(&self, offset: Option<u64>, limit: Option<u64>) -> Pagination {
        Pagination {
            offset: offset.unwrap_or(0),
            limit: limit
                .unwrap_or(self.default_limit)
                .clamp(1, self.max_limit.max(1)),
        }
    }
}
