// src/dag/after.rs

//! Parser for AFTER clauses.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! clause := term ((AND | OR) term)*
//! term   := NAME [SUCCEEDS | FAILS | COMPLETES]
//! ```
//!
//! A term without a condition means `COMPLETES`. AND and OR cannot be mixed
//! in one clause.

use crate::dag::task::{Combinator, Condition};

/// A parsed AFTER clause, names still unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterClause {
    pub terms: Vec<(String, Condition)>,
    pub combinator: Combinator,
}

/// Why a clause could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterParseError {
    Empty,
    Malformed(String),
    MixedCombinators,
}

pub fn parse_after(text: &str) -> Result<AfterClause, AfterParseError> {
    let mut tokens = text.split_whitespace().peekable();
    if tokens.peek().is_none() {
        return Err(AfterParseError::Empty);
    }

    let mut terms = Vec::new();
    let mut combinator: Option<Combinator> = None;

    loop {
        let name = match tokens.next() {
            Some(tok) if is_keyword(tok) => {
                return Err(AfterParseError::Malformed(format!(
                    "expected a task name, found keyword '{tok}'"
                )));
            }
            Some(tok) => tok.to_string(),
            None => {
                return Err(AfterParseError::Malformed(
                    "clause ends with a dangling AND/OR".to_string(),
                ));
            }
        };

        let condition = match tokens.peek().map(|t| t.parse::<Condition>()) {
            Some(Ok(cond)) => {
                tokens.next();
                cond
            }
            _ => Condition::Completes,
        };
        terms.push((name, condition));

        let Some(joiner) = tokens.next() else {
            break;
        };
        let next = joiner.parse::<Combinator>().map_err(|_| {
            AfterParseError::Malformed(format!("expected AND or OR, found '{joiner}'"))
        })?;
        match combinator {
            Some(existing) if existing != next => return Err(AfterParseError::MixedCombinators),
            _ => combinator = Some(next),
        }
    }

    Ok(AfterClause {
        terms,
        combinator: combinator.unwrap_or_default(),
    })
}

fn is_keyword(token: &str) -> bool {
    token.parse::<Condition>().is_ok() || token.parse::<Combinator>().is_ok()
}
