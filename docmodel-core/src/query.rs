//! Query operators understood by [`Field::prepare_query_value`](crate::field::Field::prepare_query_value).
//!
//! The query builder itself lives outside this crate. It hands each field an operator
//! and a user-supplied value and embeds the returned storage value in its predicate.
//! String-matching operators are turned into regular-expression documents of the form
//! `{"$regex": <pattern>, "$options": "i"}`, with the literal value escaped first.
//!
//! ```ignore
//! use docmodel::query::QueryOp;
//!
//! let op: QueryOp = "istartswith".parse()?;
//! assert!(op.is_case_insensitive());
//! ```

use std::{fmt, str::FromStr};

use bson::{Bson, doc};

use crate::error::ModelError;

/// Comparison, matching and update operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueryOp {
    /// Equal to (exact match). Also used when no operator is given.
    #[default]
    Eq,
    /// Not equal to.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Value is one of the given values.
    In,
    /// Value is none of the given values.
    Nin,
    /// Array contains all of the given values.
    All,
    /// Array has the given length.
    Size,
    /// Field exists.
    Exists,
    /// String contains the value.
    Contains,
    /// String contains the value, ignoring case.
    IContains,
    /// String starts with the value.
    StartsWith,
    /// String starts with the value, ignoring case.
    IStartsWith,
    /// String ends with the value.
    EndsWith,
    /// String ends with the value, ignoring case.
    IEndsWith,
    /// String equals the value.
    Exact,
    /// String equals the value, ignoring case.
    IExact,
    /// Update: set the field.
    Set,
    /// Update: unset the field.
    Unset,
    /// Update: append to an array.
    Push,
    /// Update: remove from an array.
    Pull,
}

impl QueryOp {
    const NAMES: [(&'static str, QueryOp); 23] = [
        ("eq", QueryOp::Eq),
        ("ne", QueryOp::Ne),
        ("lt", QueryOp::Lt),
        ("lte", QueryOp::Lte),
        ("gt", QueryOp::Gt),
        ("gte", QueryOp::Gte),
        ("in", QueryOp::In),
        ("nin", QueryOp::Nin),
        ("all", QueryOp::All),
        ("size", QueryOp::Size),
        ("exists", QueryOp::Exists),
        ("contains", QueryOp::Contains),
        ("icontains", QueryOp::IContains),
        ("startswith", QueryOp::StartsWith),
        ("istartswith", QueryOp::IStartsWith),
        ("endswith", QueryOp::EndsWith),
        ("iendswith", QueryOp::IEndsWith),
        ("exact", QueryOp::Exact),
        ("iexact", QueryOp::IExact),
        ("set", QueryOp::Set),
        ("unset", QueryOp::Unset),
        ("push", QueryOp::Push),
        ("pull", QueryOp::Pull),
    ];

    /// Returns the operator's name as used in query keywords.
    pub fn as_str(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(_, op)| op == self)
            .map(|(name, _)| *name)
            .unwrap_or("eq")
    }

    /// True for the string pattern operators (`contains`, `startswith`, ... and their `i` forms).
    pub fn is_match(&self) -> bool {
        self.pattern_template().is_some()
    }

    pub fn is_case_insensitive(&self) -> bool {
        matches!(
            self,
            QueryOp::IContains | QueryOp::IStartsWith | QueryOp::IEndsWith | QueryOp::IExact
        )
    }

    /// True for operators whose value is a list of candidates.
    pub fn takes_list(&self) -> bool {
        matches!(self, QueryOp::In | QueryOp::Nin | QueryOp::All)
    }

    /// True for update operators that may carry a whole list value.
    pub fn is_update(&self) -> bool {
        matches!(self, QueryOp::Set | QueryOp::Unset)
    }

    fn pattern_template(&self) -> Option<(&'static str, &'static str)> {
        match self {
            QueryOp::Contains | QueryOp::IContains => Some(("", "")),
            QueryOp::StartsWith | QueryOp::IStartsWith => Some(("^", "")),
            QueryOp::EndsWith | QueryOp::IEndsWith => Some(("", "$")),
            QueryOp::Exact | QueryOp::IExact => Some(("^", "$")),
            _ => None,
        }
    }

    /// Builds the regular-expression document for a pattern operator.
    ///
    /// The literal is escaped so that characters such as `.` or `(` match themselves.
    /// Returns `None` for non-pattern operators.
    pub fn pattern(&self, literal: &str) -> Option<Bson> {
        let (prefix, suffix) = self.pattern_template()?;
        let pattern = format!("{prefix}{}{suffix}", regex::escape(literal));

        Some(Bson::Document(if self.is_case_insensitive() {
            doc! { "$regex": pattern, "$options": "i" }
        } else {
            doc! { "$regex": pattern }
        }))
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryOp {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(QueryOp::Eq);
        }
        Self::NAMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, op)| *op)
            .ok_or_else(|| ModelError::Configuration(format!("Unknown query operator: {s}")))
    }
}
