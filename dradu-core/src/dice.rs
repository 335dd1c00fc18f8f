//! Dice-expression evaluation, reserved for the `/roll` chat command.

use std::str::FromStr;

use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum DiceError {
    #[error("empty dice expression")]
    Empty,
    #[error("malformed dice term `{0}`")]
    BadTerm(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Term {
    Dice { count: u32, sides: u32 },
    Flat(i64),
}

/// A parsed `NdM ± NdM ± K` expression, e.g. `2d6 + d8 - 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiceExpr {
    terms: Vec<(i64, Term)>,
}

impl FromStr for DiceExpr {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Err(DiceError::Empty);
        }
        let mut terms = Vec::new();
        let mut sign = 1;
        let mut current = String::new();
        for (i, c) in compact.chars().enumerate() {
            if c == '+' || c == '-' {
                if i == 0 {
                    sign = if c == '-' { -1 } else { 1 };
                    continue;
                }
                if current.is_empty() {
                    return Err(DiceError::BadTerm(compact.clone()));
                }
                terms.push((sign, parse_term(&current)?));
                current.clear();
                sign = if c == '-' { -1 } else { 1 };
            } else {
                current.push(c);
            }
        }
        if current.is_empty() {
            return Err(DiceError::BadTerm(compact.clone()));
        }
        terms.push((sign, parse_term(&current)?));
        Ok(Self { terms })
    }
}

fn parse_term(term: &str) -> Result<Term, DiceError> {
    if let Some((count, sides)) = term.split_once(['d', 'D']) {
        let count = if count.is_empty() {
            1
        } else {
            count.parse().map_err(|_| DiceError::BadTerm(term.to_string()))?
        };
        let sides = sides
            .parse()
            .map_err(|_| DiceError::BadTerm(term.to_string()))?;
        if count == 0 || sides == 0 {
            return Err(DiceError::BadTerm(term.to_string()));
        }
        Ok(Term::Dice { count, sides })
    } else {
        term.parse()
            .map(Term::Flat)
            .map_err(|_| DiceError::BadTerm(term.to_string()))
    }
}

impl DiceExpr {
    pub fn roll(&self, rng: &mut impl Rng) -> i64 {
        let mut total = 0;
        for (sign, term) in &self.terms {
            let value = match term {
                Term::Flat(k) => *k,
                Term::Dice { count, sides } => (0..*count)
                    .map(|_| i64::from(rng.gen_range(1..=*sides)))
                    .sum(),
            };
            total += sign * value;
        }
        total
    }
}
