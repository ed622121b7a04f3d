use anyhow::{Result, bail};
use dsvrando_game::{Atom, Clause, DefinitionTable, Expression, Requirement};
use dsvrando_logic::Inventory;
use hashbrown::HashMap;
use log::trace;

use crate::settings::LogicSettings;

/// Everything a requirement is checked against besides the inventory. Read-only during
/// evaluation, so any number of evaluators may share it.
#[derive(Copy, Clone)]
pub struct LogicContext<'a> {
    pub defs: &'a DefinitionTable,
    pub glitch_defs: &'a DefinitionTable,
    pub settings: &'a LogicSettings,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Resolution {
    InProgress,
    Resolved(bool),
}

/// Evaluates requirements for one inventory snapshot. Symbol results are memoized for the
/// lifetime of the evaluator, so a new one must be made whenever the inventory changes.
pub struct Evaluator<'a> {
    cx: LogicContext<'a>,
    inventory: &'a Inventory,
    memo: HashMap<&'a str, Resolution>,
}

impl<'a> Evaluator<'a> {
    pub fn new(cx: LogicContext<'a>, inventory: &'a Inventory) -> Self {
        Evaluator {
            cx,
            inventory,
            memo: HashMap::new(),
        }
    }

    pub fn evaluate(&mut self, req: &'a Requirement) -> Result<bool> {
        match req {
            Requirement::Free => Ok(true),
            Requirement::Atom(atom) => self.evaluate_atom(atom),
            Requirement::Expression(expr) => self.evaluate_expression(expr),
        }
    }

    fn evaluate_expression(&mut self, expr: &'a Expression) -> Result<bool> {
        for clause in &expr.clauses {
            if self.evaluate_clause(clause)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn evaluate_clause(&mut self, clause: &'a Clause) -> Result<bool> {
        for atom in clause.terms.iter().flatten() {
            if !self.evaluate_atom(atom)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn evaluate_atom(&mut self, atom: &'a Atom) -> Result<bool> {
        match atom {
            Atom::Item(item_id) => Ok(self.inventory.has_item(*item_id)),
            Atom::Flag(name) => Ok(self.inventory.has_flag(name)),
            Atom::Literal(b) => Ok(*b),
            Atom::Reference(name) => self.evaluate_symbol(name),
        }
    }

    pub fn evaluate_symbol(&mut self, name: &'a str) -> Result<bool> {
        trace!("Checking requirement: {name}");
        if let Some(rule) = self.cx.settings.context_rule(name) {
            return Ok(self.cx.settings.context_value(rule));
        }

        let Some(req) = self.cx.defs.get(name) else {
            if !self.cx.settings.enable_glitch_requirements && self.cx.glitch_defs.contains(name) {
                return Ok(false);
            }
            bail!("Invalid requirement: {name}");
        };

        if let Requirement::Atom(Atom::Literal(b)) = req {
            return Ok(*b);
        }

        match self.memo.get(name) {
            // Already being checked further up the stack: the cycle can't be what satisfies it.
            Some(Resolution::InProgress) => return Ok(false),
            Some(&Resolution::Resolved(met)) => return Ok(met),
            None => {}
        }
        if let Requirement::Atom(Atom::Item(_) | Atom::Flag(_)) = req {
            let has_token = self.evaluate(req)?;
            self.memo.insert(name, Resolution::Resolved(has_token));
            return Ok(has_token);
        }
        self.memo.insert(name, Resolution::InProgress);
        let met = self.evaluate(req)?;
        trace!("Requirement {name} is {met}");
        self.memo.insert(name, Resolution::Resolved(met));
        Ok(met)
    }
}

/// Checks a requirement with a fresh evaluator.
pub fn evaluate(req: &Requirement, cx: LogicContext, inventory: &Inventory) -> Result<bool> {
    Evaluator::new(cx, inventory).evaluate(req)
}

pub fn evaluate_symbol(name: &str, cx: LogicContext, inventory: &Inventory) -> Result<bool> {
    Evaluator::new(cx, inventory).evaluate_symbol(name)
}
