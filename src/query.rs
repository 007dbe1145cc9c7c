//! Query clause model: per-dimension range predicates and scalar conditions
//! on the pyramid level, plus the builder translating them into a WHERE
//! fragment with positional parameters.
//!
//! Identifiers in the generated SQL come exclusively from the schema
//! configuration; all values are bound as parameters.

use crate::error::{Result, TileDocError};
use crate::schema::DatabaseConfiguration;
use crate::types::Dimension;
use rusqlite::ToSql;
use rusqlite::types::ToSqlOutput;
use std::collections::BTreeMap;

/// An inclusive value range for one dimension. `i32::MIN` as start (or
/// `i32::MAX` as end) leaves that side of the range open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeClause {
    pub start: i32,
    pub end: i32,
}

impl RangeClause {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }
}

/// A query clause over the dimension columns.
///
/// Multiple ranges for the same dimension are combined with OR, different
/// dimensions with AND. The clause keeps its dimensions ordered so repeated
/// enumeration yields identical results.
#[derive(Debug, Clone, Default)]
pub struct CoordinateQueryClause {
    ranges: BTreeMap<Dimension, Vec<RangeClause>>,
}

impl CoordinateQueryClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a range clause for the given dimension.
    pub fn add_range(&mut self, dimension: Dimension, clause: RangeClause) -> &mut Self {
        self.ranges.entry(dimension).or_default().push(clause);
        self
    }

    /// The dimensions for which clauses are present, in ascending order.
    pub fn dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        self.ranges.keys().copied()
    }

    /// The ranges recorded for a dimension, in insertion order.
    pub fn ranges_for(&self, dimension: Dimension) -> Option<&[RangeClause]> {
        self.ranges.get(&dimension).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Combines a condition with its predecessor. The operator of the first
/// condition in a clause is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    /// Only legal on the first condition.
    Invalid,
    And,
    Or,
}

/// The comparison applied between the pyramid-level column and the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperation {
    Invalid,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

/// One scalar condition on the pyramid-level column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidLevelCondition {
    pub logical_operator: LogicalOperator,
    pub comparison: ComparisonOperation,
    pub value: i32,
}

/// An ordered list of scalar conditions on the pyramid-level column.
///
/// Conditions are evaluated strictly left-to-right with no precedence
/// elevation: `c₁ OR c₂ AND c₃` is compiled as `((c₁ OR c₂) AND c₃)`.
#[derive(Debug, Clone, Default)]
pub struct TileInfoQueryClause {
    conditions: Vec<PyramidLevelCondition>,
}

impl TileInfoQueryClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pyramid-level condition to the end of the clause.
    pub fn add_pyramid_level_condition(
        &mut self,
        logical_operator: LogicalOperator,
        comparison: ComparisonOperation,
        value: i32,
    ) -> &mut Self {
        self.conditions.push(PyramidLevelCondition {
            logical_operator,
            comparison,
            value,
        });
        self
    }

    pub fn conditions(&self) -> &[PyramidLevelCondition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// A positionally bound statement parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum BindValue {
    Int32(i32),
    Int64(i64),
    Double(f64),
}

impl ToSql for BindValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Int32(value) => ToSqlOutput::from(*value),
            Self::Int64(value) => ToSqlOutput::from(*value),
            Self::Double(value) => ToSqlOutput::from(*value),
        })
    }
}

/// A WHERE fragment together with the parameters it binds, in order.
#[derive(Debug, Clone)]
pub(crate) struct SqlFragment {
    pub sql: String,
    pub params: Vec<BindValue>,
}

impl SqlFragment {
    pub fn match_all() -> Self {
        Self {
            sql: "1=1".to_string(),
            params: Vec::new(),
        }
    }
}

/// Build the WHERE fragment for the combination of a coordinate clause and a
/// tile-info clause (ANDed together). With neither present the fragment
/// matches all rows.
pub(crate) fn clauses_where_fragment(
    coordinate_clause: Option<&CoordinateQueryClause>,
    info_clause: Option<&TileInfoQueryClause>,
    configuration: &DatabaseConfiguration,
) -> Result<SqlFragment> {
    let coordinate = match coordinate_clause {
        Some(clause) if !clause.is_empty() => Some(coordinate_fragment(clause, configuration)?),
        _ => None,
    };
    let info = match info_clause {
        Some(clause) if !clause.is_empty() => Some(tile_info_fragment(clause, configuration)?),
        _ => None,
    };

    Ok(match (coordinate, info) {
        (Some(mut a), Some(b)) => {
            let sql = format!("({} AND {})", a.sql, b.sql);
            a.params.extend(b.params);
            SqlFragment {
                sql,
                params: a.params,
            }
        }
        (Some(fragment), None) | (None, Some(fragment)) => fragment,
        (None, None) => SqlFragment::match_all(),
    })
}

fn coordinate_fragment(
    clause: &CoordinateQueryClause,
    configuration: &DatabaseConfiguration,
) -> Result<SqlFragment> {
    let mut dimension_fragments = Vec::new();
    let mut params = Vec::new();

    for dimension in clause.dimensions() {
        if !configuration.is_dimension_valid(dimension) {
            return Err(TileDocError::InvalidArgument(format!(
                "dimension '{dimension}' is not part of the document"
            )));
        }

        let ranges = clause.ranges_for(dimension).unwrap_or(&[]);
        if ranges.is_empty() {
            continue;
        }

        let column = configuration.dimension_column(dimension);
        let mut range_fragments = Vec::with_capacity(ranges.len());
        for range in ranges {
            let open_start = range.start == i32::MIN;
            let open_end = range.end == i32::MAX;
            range_fragments.push(match (open_start, open_end) {
                (true, true) => "1=1".to_string(),
                (true, false) => {
                    params.push(BindValue::Int32(range.end));
                    format!(r#""{column}" <= ?"#)
                }
                (false, true) => {
                    params.push(BindValue::Int32(range.start));
                    format!(r#""{column}" >= ?"#)
                }
                (false, false) => {
                    params.push(BindValue::Int32(range.start));
                    params.push(BindValue::Int32(range.end));
                    format!(r#"("{column}" >= ? AND "{column}" <= ?)"#)
                }
            });
        }

        dimension_fragments.push(format!("({})", range_fragments.join(" OR ")));
    }

    if dimension_fragments.is_empty() {
        return Ok(SqlFragment::match_all());
    }

    Ok(SqlFragment {
        sql: dimension_fragments.join(" AND "),
        params,
    })
}

fn tile_info_fragment(
    clause: &TileInfoQueryClause,
    configuration: &DatabaseConfiguration,
) -> Result<SqlFragment> {
    let column = configuration.pyramid_level_column();
    let mut params = Vec::with_capacity(clause.conditions().len());
    let mut accumulated = String::new();

    for (index, condition) in clause.conditions().iter().enumerate() {
        let comparison = comparison_sql(condition.comparison)?;
        params.push(BindValue::Int32(condition.value));

        if index == 0 {
            // the logical operator of the first condition is unused
            accumulated = format!(r#"("{column}" {comparison} ?)"#);
            continue;
        }

        let logical = match condition.logical_operator {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
            LogicalOperator::Invalid => {
                return Err(TileDocError::InvalidArgument(
                    "a logical operator is required on all but the first condition".to_string(),
                ));
            }
        };

        accumulated = format!(r#"({accumulated} {logical} "{column}" {comparison} ?)"#);
    }

    Ok(SqlFragment {
        sql: accumulated,
        params,
    })
}

fn comparison_sql(comparison: ComparisonOperation) -> Result<&'static str> {
    Ok(match comparison {
        ComparisonOperation::Equal => "=",
        ComparisonOperation::NotEqual => "<>",
        ComparisonOperation::LessThan => "<",
        ComparisonOperation::LessThanOrEqual => "<=",
        ComparisonOperation::GreaterThan => ">",
        ComparisonOperation::GreaterThanOrEqual => ">=",
        ComparisonOperation::Invalid => {
            return Err(TileDocError::InvalidArgument(
                "a comparison operation is required on every condition".to_string(),
            ));
        }
    })
}
