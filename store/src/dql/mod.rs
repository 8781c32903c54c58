//! A small document query language.
//!
//! Supported statements:
//!
//! ```text
//! SELECT * FROM <coll> [WHERE <expr>] [ORDER BY <path> [ASC|DESC], ...] [LIMIT n]
//! INSERT INTO <coll> [INITIAL] DOCUMENTS (<value>) [, (<value>) ...]
//! UPDATE <coll> SET <path> = <value> [, ...] [WHERE <expr>]
//! ```
//!
//! Values are bound by name (`:name`) from an argument map, so user content
//! never becomes part of the statement text.

mod eval;
mod parser;

pub use eval::compare_values;
pub(crate) use eval::sort_documents;
pub use parser::parse;

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Named statement arguments.
pub type Args = Map<String, Value>;

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub collection: String,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderTerm>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub path: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub collection: String,
    /// `INITIAL DOCUMENTS`: skip documents whose id already exists
    pub initial: bool,
    pub documents: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub collection: String,
    pub assignments: Vec<(String, Operand)>,
    pub filter: Option<Expr>,
}

/// Boolean expression over a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    /// A bare operand, true only when it evaluates to `true`
    Truthy(Operand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(String),
    Param(String),
    Literal(Value),
}

impl Statement {
    /// Collection the statement targets.
    pub fn collection(&self) -> &str {
        match self {
            Statement::Select(s) => &s.collection,
            Statement::Insert(s) => &s.collection,
            Statement::Update(s) => &s.collection,
        }
    }

    /// Whether executing the statement may change stored documents.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Statement::Select(_))
    }

    /// Names of all `:param` placeholders in the statement.
    pub fn params(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        match self {
            Statement::Select(s) => {
                if let Some(filter) = &s.filter {
                    filter.collect_params(&mut names);
                }
            }
            Statement::Insert(s) => {
                for doc in &s.documents {
                    doc.collect_params(&mut names);
                }
            }
            Statement::Update(s) => {
                for (_, value) in &s.assignments {
                    value.collect_params(&mut names);
                }
                if let Some(filter) = &s.filter {
                    filter.collect_params(&mut names);
                }
            }
        }
        names
    }
}

impl Expr {
    fn collect_params<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Or(items) | Expr::And(items) => {
                for item in items {
                    item.collect_params(names);
                }
            }
            Expr::Not(inner) => inner.collect_params(names),
            Expr::Compare { left, right, .. } => {
                left.collect_params(names);
                right.collect_params(names);
            }
            Expr::Truthy(operand) => operand.collect_params(names),
        }
    }
}

impl Operand {
    fn collect_params<'a>(&'a self, names: &mut BTreeSet<&'a str>) {
        if let Operand::Param(name) = self {
            names.insert(name);
        }
    }
}
