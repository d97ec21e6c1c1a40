//! Composable instruction patterns.
//!
//! A [`Matcher`] is an expression tree evaluated against one root
//! instruction. Evaluation never mutates the program; on success it yields
//! the root plus every instruction captured by a [`Matcher::Bind`].

use crate::{FuseError, Heuristics, InsId, Predicate, Program};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// At least one input matches; stops at the first.
    Any,
    /// Every input matches.
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Any,
    /// The operation name is one of these.
    Name(Vec<&'static str>),
    Pred(Predicate),
    AllOf(Vec<Matcher>),
    AnyOf(Vec<Matcher>),
    Inputs(Quantifier, Box<Matcher>),
    /// Walks through single-input instructions matching `over`, then tests
    /// `then` on the first instruction that stops the walk.
    Skip {
        over: Box<Matcher>,
        then: Box<Matcher>,
    },
    Bind(&'static str, Box<Matcher>),
}

pub fn name(name: &'static str) -> Matcher {
    Matcher::Name(vec![name])
}

pub fn names(names: &[&'static str]) -> Matcher {
    Matcher::Name(names.to_vec())
}

pub fn pred(predicate: Predicate) -> Matcher {
    Matcher::Pred(predicate)
}

pub fn any_of(matchers: Vec<Matcher>) -> Matcher {
    Matcher::AnyOf(matchers)
}

pub fn any_input(m: Matcher) -> Matcher {
    Matcher::Inputs(Quantifier::Any, Box::new(m))
}

pub fn all_inputs(m: Matcher) -> Matcher {
    Matcher::Inputs(Quantifier::All, Box::new(m))
}

pub fn skip(over: Matcher, then: Matcher) -> Matcher {
    Matcher::Skip {
        over: Box::new(over),
        then: Box::new(then),
    }
}

impl Matcher {
    pub fn bind(self, name: &'static str) -> Matcher {
        Matcher::Bind(name, Box::new(self))
    }

    pub fn and(self, other: Matcher) -> Matcher {
        match self {
            Matcher::AllOf(mut ms) => {
                ms.push(other);
                Matcher::AllOf(ms)
            }
            m => Matcher::AllOf(vec![m, other]),
        }
    }

    pub fn matches(&self, program: &Program, root: InsId, heuristics: &Heuristics) -> Option<Match> {
        let mut bindings = Vec::new();
        self.eval(program, root, heuristics, &mut bindings)
            .then_some(Match { root, bindings })
    }

    fn eval(
        &self,
        program: &Program,
        ins: InsId,
        heuristics: &Heuristics,
        bindings: &mut Vec<(&'static str, InsId)>,
    ) -> bool {
        let Some(inst) = program.get(ins) else {
            return false;
        };
        let mark = bindings.len();
        let matched = match self {
            Matcher::Any => true,
            Matcher::Name(names) => names.contains(&inst.name()),
            Matcher::Pred(p) => p.eval(program, ins, heuristics),
            Matcher::AllOf(ms) => ms.iter().all(|m| m.eval(program, ins, heuristics, bindings)),
            Matcher::AnyOf(ms) => ms.iter().any(|m| m.eval(program, ins, heuristics, bindings)),
            Matcher::Inputs(Quantifier::Any, m) => inst
                .inputs()
                .iter()
                .any(|&i| m.eval(program, i, heuristics, bindings)),
            Matcher::Inputs(Quantifier::All, m) => inst
                .inputs()
                .iter()
                .all(|&i| m.eval(program, i, heuristics, bindings)),
            Matcher::Skip { over, then } => {
                let mut cur = ins;
                loop {
                    let inputs = program[cur].inputs();
                    if inputs.len() != 1 || !over.eval(program, cur, heuristics, &mut Vec::new()) {
                        break;
                    }
                    cur = inputs[0];
                }
                then.eval(program, cur, heuristics, bindings)
            }
            Matcher::Bind(name, m) => {
                let ok = m.eval(program, ins, heuristics, bindings);
                if ok {
                    bindings.push((name, ins));
                }
                ok
            }
        };
        // Bindings made by a failed branch are discarded.
        if !matched {
            bindings.truncate(mark);
        }
        matched
    }
}

/// A successful match: the root and the captured instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub root: InsId,
    bindings: Vec<(&'static str, InsId)>,
}

impl Match {
    /// The latest capture under `name`.
    pub fn try_get(&self, name: &str) -> Option<InsId> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| *n == name)
            .map(|(_, ins)| *ins)
    }

    pub fn get(&self, name: &'static str) -> Result<InsId, FuseError> {
        self.try_get(name).ok_or(FuseError::MissingBinding(name))
    }
}
