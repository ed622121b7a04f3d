use std::fmt::{self, Display, Formatter};

use anyhow::{Result, bail, ensure};
use json::JsonValue;
use strum_macros::{EnumString, VariantNames};

use crate::{ItemId, NamedFlagSets};

pub const CLAUSE_SEPARATOR: char = '|';
pub const TERM_SEPARATOR: char = '&';

/// Requirements resolved from settings rather than from the inventory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, EnumString, VariantNames)]
pub enum ContextRule {
    #[strum(serialize = "nonlinear")]
    OpenWorldMap,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Atom {
    Item(ItemId),
    Flag(String),
    Literal(bool),
    // Also names contextual rules such as `nonlinear`, which are resolved from settings when
    // the game has them.
    Reference(String),
}

/// Terms joined by AND. A `None` term is a placeholder left by an empty term and is always
/// satisfied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Clause {
    pub terms: Vec<Option<Atom>>,
}

/// Clauses joined by OR.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expression {
    pub clauses: Vec<Clause>,
}

/// The value bound to a symbol, or attached to a room or entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Requirement {
    Free,
    Atom(Atom),
    Expression(Expression),
}

impl Clause {
    pub fn new(terms: Vec<Option<Atom>>) -> Result<Clause> {
        ensure!(!terms.is_empty(), "Clause has no terms");
        Ok(Clause { terms })
    }
}

impl Expression {
    pub fn new(clauses: Vec<Clause>) -> Result<Expression> {
        ensure!(!clauses.is_empty(), "Expression has no clauses");
        Ok(Expression { clauses })
    }
}

impl Requirement {
    /// A single clause requiring every one of `names`.
    pub fn all_of<S: AsRef<str>>(names: &[S]) -> Requirement {
        if names.is_empty() {
            return Requirement::Free;
        }
        Requirement::Expression(Expression {
            clauses: vec![Clause {
                terms: names
                    .iter()
                    .map(|n| Some(Atom::Reference(normalize_name(n.as_ref()))))
                    .collect(),
            }],
        })
    }

    pub fn references(&self) -> Vec<&str> {
        let mut out = vec![];
        match self {
            Requirement::Atom(Atom::Reference(name)) => out.push(name.as_str()),
            Requirement::Expression(expr) => {
                for clause in &expr.clauses {
                    for term in clause.terms.iter().flatten() {
                        if let Atom::Reference(name) = term {
                            out.push(name.as_str());
                        }
                    }
                }
            }
            _ => {}
        }
        out
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Atom::Item(id) => write!(f, "{id:#X}"),
            Atom::Flag(name) | Atom::Reference(name) => write!(f, "{name}"),
            Atom::Literal(b) => write!(f, "{b}"),
        }
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, " {TERM_SEPARATOR} ")?;
            }
            match term {
                Some(atom) => write!(f, "{atom}")?,
                None => write!(f, "_")?,
            }
        }
        Ok(())
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                write!(f, " {CLAUSE_SEPARATOR} ")?;
            }
            write!(f, "{clause}")?;
        }
        Ok(())
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Requirement::Free => write!(f, "free"),
            Requirement::Atom(atom) => write!(f, "{atom}"),
            Requirement::Expression(expr) => write!(f, "{expr}"),
        }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

// Trailing empty pieces are dropped, so "a|" is the same as "a".
fn split_pieces(s: &str, sep: char) -> Vec<&str> {
    let mut pieces: Vec<&str> = s.split(sep).collect();
    while pieces.last().is_some_and(|p| p.is_empty()) {
        pieces.pop();
    }
    pieces
}

fn parse_term(term_str: &str, named_flags: &NamedFlagSets) -> Result<Option<Atom>> {
    let name = normalize_name(term_str);
    if name.is_empty() {
        return Ok(None);
    }
    if name.contains(['(', ')', '[', ']', '{', '}']) {
        bail!("Grouping is not supported in requirement term '{}'", term_str.trim());
    }
    if named_flags.contains(&name) {
        Ok(Some(Atom::Flag(name)))
    } else {
        Ok(Some(Atom::Reference(name)))
    }
}

pub fn parse_requirement_text(text: &str, named_flags: &NamedFlagSets) -> Result<Requirement> {
    if text.trim().is_empty() {
        return Ok(Requirement::Free);
    }
    let whole = normalize_name(text);
    if named_flags.contains(&whole) {
        return Ok(Requirement::Atom(Atom::Flag(whole)));
    }

    let mut clauses = vec![];
    for clause_str in split_pieces(text, CLAUSE_SEPARATOR) {
        let mut terms = vec![];
        for term_str in split_pieces(clause_str, TERM_SEPARATOR) {
            terms.push(parse_term(term_str, named_flags)?);
        }
        let clause = Clause::new(terms).map_err(|e| e.context(format!("In requirement '{text}'")))?;
        clauses.push(clause);
    }
    let expr = Expression::new(clauses).map_err(|e| e.context(format!("In requirement '{text}'")))?;
    Ok(Requirement::Expression(expr))
}

pub fn parse_requirement(req_json: &JsonValue, named_flags: &NamedFlagSets) -> Result<Requirement> {
    if req_json.is_null() {
        Ok(Requirement::Free)
    } else if let Some(b) = req_json.as_bool() {
        Ok(Requirement::Atom(Atom::Literal(b)))
    } else if req_json.is_number() {
        let n = req_json.as_f64().unwrap_or(-1.0);
        if n < 0.0 || n.fract() != 0.0 || n > ItemId::MAX as f64 {
            bail!("Item id must be a non-negative integer: {req_json}");
        }
        Ok(Requirement::Atom(Atom::Item(n as ItemId)))
    } else if let Some(text) = req_json.as_str() {
        parse_requirement_text(text, named_flags)
    } else {
        bail!("Unable to parse requirement: {req_json}");
    }
}
