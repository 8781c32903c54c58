//! Statement parser using nom
//!
//! Grammar:
//! ```text
//! statement  := select | insert | update
//! select     := SELECT '*' FROM name [WHERE expr] [ORDER BY term (',' term)*] [LIMIT n]
//! insert     := INSERT INTO name [INITIAL] DOCUMENTS '(' operand ')' (',' '(' operand ')')*
//! update     := UPDATE name SET path '=' operand (',' path '=' operand)* [WHERE expr]
//! expr       := and_expr (OR and_expr)*
//! and_expr   := not_expr (AND not_expr)*
//! not_expr   := NOT not_expr | '(' expr ')' | comparison
//! comparison := operand [op operand]
//! op         := '=' | '==' | '!=' | '<>' | '<' | '<=' | '>' | '>='
//! operand    := ':' name | 'string' | number | TRUE | FALSE | NULL | path
//! ```
//!
//! Keywords are case-insensitive. Once a keyword commits to a branch, errors
//! are reported at the byte offset where parsing stopped.

use super::{CompareOp, Expr, Insert, OrderTerm, Operand, Select, Statement, Update};
use crate::{error::Result, StoreError};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0, none_of, satisfy},
    combinator::{cut, map, map_opt, not, opt, recognize, value, verify},
    error::{context, ContextError, ErrorKind, ParseError},
    multi::{fold_many0, many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::{Number, Value};
use std::cmp::Ordering;

/// Where parsing stopped and what was expected there.
#[derive(Debug, PartialEq)]
struct SyntaxError<'a> {
    input: &'a str,
    expected: Option<&'static str>,
}

impl<'a> ParseError<&'a str> for SyntaxError<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        Self {
            input,
            expected: None,
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    /// Keep the alternative that got furthest.
    fn or(self, other: Self) -> Self {
        match self.input.len().cmp(&other.input.len()) {
            Ordering::Less => self,
            Ordering::Greater => other,
            // Failed at the same spot; the enclosing context describes both
            Ordering::Equal => Self {
                input: other.input,
                expected: None,
            },
        }
    }
}

impl<'a> ContextError<&'a str> for SyntaxError<'a> {
    fn add_context(_input: &'a str, ctx: &'static str, mut other: Self) -> Self {
        other.expected.get_or_insert(ctx);
        other
    }
}

type PResult<'a, O> = IResult<&'a str, O, SyntaxError<'a>>;

/// Parse a single statement.
pub fn parse(input: &str) -> Result<Statement> {
    let offset_of = |rest: &str| input.len() - rest.len();

    match terminated(statement, multispace0)(input) {
        Ok(("", statement)) => Ok(statement),
        Ok((rest, _)) => Err(StoreError::parse(
            offset_of(rest),
            "unexpected trailing input",
        )),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(StoreError::parse(
            offset_of(e.input),
            format!("expected {}", e.expected.unwrap_or("a statement")),
        )),
        Err(nom::Err::Incomplete(_)) => {
            Err(StoreError::parse(input.len(), "unexpected end of input"))
        }
    }
}

/// Skip whitespace before `inner`.
fn lex<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    preceded(multispace0, inner)
}

/// A case-insensitive keyword that is not the prefix of a longer word.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    context(
        word,
        lex(terminated(tag_no_case(word), not(satisfy(is_word_char)))),
    )
}

fn symbol<'a>(text: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    context(text, lex(tag(text)))
}

fn statement(input: &str) -> PResult<'_, Statement> {
    context(
        "SELECT, INSERT or UPDATE",
        alt((
            map(select, Statement::Select),
            map(insert, Statement::Insert),
            map(update, Statement::Update),
        )),
    )(input)
}

fn select(input: &str) -> PResult<'_, Select> {
    let (input, _) = keyword("SELECT")(input)?;
    let (input, _) = cut(symbol("*"))(input)?;
    let (input, _) = cut(keyword("FROM"))(input)?;
    let (input, collection) = cut(name("collection name"))(input)?;
    let (input, filter) = opt(preceded(keyword("WHERE"), cut(expr)))(input)?;
    let (input, order_by) = opt(preceded(
        pair(keyword("ORDER"), cut(keyword("BY"))),
        cut(separated_list1(symbol(","), order_term)),
    ))(input)?;
    let (input, limit) = opt(preceded(keyword("LIMIT"), cut(limit)))(input)?;

    Ok((
        input,
        Select {
            collection,
            filter,
            order_by: order_by.unwrap_or_default(),
            limit,
        },
    ))
}

fn order_term(input: &str) -> PResult<'_, OrderTerm> {
    let (input, path) = name("field path")(input)?;
    let (input, ascending) = opt(alt((
        value(true, keyword("ASC")),
        value(false, keyword("DESC")),
    )))(input)?;
    Ok((
        input,
        OrderTerm {
            path,
            ascending: ascending.unwrap_or(true),
        },
    ))
}

fn limit(input: &str) -> PResult<'_, usize> {
    context(
        "a non-negative LIMIT",
        lex(map_opt(digit1, |digits: &str| digits.parse::<usize>().ok())),
    )(input)
}

fn insert(input: &str) -> PResult<'_, Insert> {
    let (input, _) = keyword("INSERT")(input)?;
    let (input, _) = cut(keyword("INTO"))(input)?;
    let (input, collection) = cut(name("collection name"))(input)?;
    let (input, initial) = opt(keyword("INITIAL"))(input)?;
    let (input, _) = cut(keyword("DOCUMENTS"))(input)?;
    let (input, documents) = cut(separated_list1(
        symbol(","),
        delimited(symbol("("), cut(operand), cut(symbol(")"))),
    ))(input)?;

    Ok((
        input,
        Insert {
            collection,
            initial: initial.is_some(),
            documents,
        },
    ))
}

fn update(input: &str) -> PResult<'_, Update> {
    let (input, _) = keyword("UPDATE")(input)?;
    let (input, collection) = cut(name("collection name"))(input)?;
    let (input, _) = cut(keyword("SET"))(input)?;
    let (input, assignments) = cut(separated_list1(symbol(","), assignment))(input)?;
    let (input, filter) = opt(preceded(keyword("WHERE"), cut(expr)))(input)?;

    Ok((
        input,
        Update {
            collection,
            assignments,
            filter,
        },
    ))
}

fn assignment(input: &str) -> PResult<'_, (String, Operand)> {
    let (input, path) = name("field path")(input)?;
    let (input, _) = cut(symbol("="))(input)?;
    let (input, value) = cut(operand)(input)?;
    Ok((input, (path, value)))
}

fn expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(keyword("OR"), cut(and_expr)))(input)?;
    Ok((input, combine(first, rest, Expr::Or)))
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(keyword("AND"), cut(not_expr)))(input)?;
    Ok((input, combine(first, rest, Expr::And)))
}

fn combine(first: Expr, rest: Vec<Expr>, join: fn(Vec<Expr>) -> Expr) -> Expr {
    if rest.is_empty() {
        return first;
    }
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(first);
    items.extend(rest);
    join(items)
}

fn not_expr(input: &str) -> PResult<'_, Expr> {
    context(
        "a field, argument or literal",
        alt((
            map(preceded(keyword("NOT"), cut(not_expr)), |inner| {
                Expr::Not(Box::new(inner))
            }),
            delimited(symbol("("), cut(expr), cut(symbol(")"))),
            comparison,
        )),
    )(input)
}

fn comparison(input: &str) -> PResult<'_, Expr> {
    let (input, left) = operand(input)?;
    let (input, right) = opt(pair(compare_op, cut(operand)))(input)?;
    let expr = match right {
        Some((op, right)) => Expr::Compare { left, op, right },
        None => Expr::Truthy(left),
    };
    Ok((input, expr))
}

fn compare_op(input: &str) -> PResult<'_, CompareOp> {
    lex(alt((
        value(CompareOp::Le, tag("<=")),
        value(CompareOp::Ge, tag(">=")),
        value(CompareOp::Ne, tag("!=")),
        value(CompareOp::Ne, tag("<>")),
        value(CompareOp::Eq, tag("==")),
        value(CompareOp::Eq, tag("=")),
        value(CompareOp::Lt, tag("<")),
        value(CompareOp::Gt, tag(">")),
    )))(input)
}

fn operand(input: &str) -> PResult<'_, Operand> {
    context(
        "a field, argument or literal",
        lex(alt((
            map(param, |name: &str| Operand::Param(name.to_string())),
            map(string_literal, |text| Operand::Literal(Value::String(text))),
            map(number, |n| Operand::Literal(Value::Number(n))),
            value(Operand::Literal(Value::Bool(true)), keyword("TRUE")),
            value(Operand::Literal(Value::Bool(false)), keyword("FALSE")),
            value(Operand::Literal(Value::Null), keyword("NULL")),
            map(identifier, |path: &str| Operand::Path(path.to_string())),
        ))),
    )(input)
}

/// `:name` placeholder.
fn param(input: &str) -> PResult<'_, &str> {
    preceded(
        char(':'),
        cut(context(
            "parameter name after ':'",
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '$'),
        )),
    )(input)
}

/// Single-quoted string; `''` is an escaped quote.
fn string_literal(input: &str) -> PResult<'_, String> {
    preceded(
        char('\''),
        cut(terminated(
            fold_many0(
                alt((value('\'', tag("''")), none_of("'"))),
                String::new,
                |mut text: String, c: char| {
                    text.push(c);
                    text
                },
            ),
            context("closing quote", char('\'')),
        )),
    )(input)
}

/// Integer or decimal, optionally negative.
fn number(input: &str) -> PResult<'_, Number> {
    map_opt(
        recognize(tuple((opt(char('-')), digit1, opt(pair(char('.'), digit0))))),
        |text: &str| {
            if text.contains('.') {
                text.parse::<f64>().ok().and_then(Number::from_f64)
            } else {
                text.parse::<i64>().ok().map(Number::from)
            }
        },
    )(input)
}

fn name<'a>(what: &'static str) -> impl FnMut(&'a str) -> PResult<'a, String> {
    context(
        what,
        map(lex(identifier), |word: &str| word.to_string()),
    )
}

/// A word that is not a reserved keyword. Dots separate path segments.
fn identifier(input: &str) -> PResult<'_, &str> {
    verify(
        recognize(pair(satisfy(is_word_start), take_while(is_word_char))),
        |word: &str| !is_reserved(word),
    )(input)
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

const RESERVED: &[&str] = &[
    "SELECT", "FROM", "WHERE", "ORDER", "BY", "ASC", "DESC", "LIMIT", "INSERT", "INTO",
    "INITIAL", "DOCUMENTS", "UPDATE", "SET", "AND", "OR", "NOT", "TRUE", "FALSE", "NULL",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}
