// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Dice notation parser.
//!
//! Grammar (LL(1), single lookahead byte):
//!
//! ```text
//! Roll      := Term (('+'|'-') Term)* Suffix?
//! Term      := Dice | Const
//! Dice      := Count? 'd' Faces Modifier?
//! Count     := [1-9][0-9]*          (default 1, ≤ 100)
//! Faces     := [1-9][0-9]*          (≤ 1000)
//! Modifier  := ('kh'|'kl'|'r') [0-9]* | '!'
//! Suffix    := '@adv' | '@dis'
//! ```
//!
//! `khN`/`klN` keep the highest/lowest N dice (N defaults to 1), `rN`
//! rerolls faces ≤ N once (N defaults to 1), `!` explodes maximum faces.
//! `@adv`/`@dis` roll the leading dice term twice and keep the better/worse
//! set. Counts above 100 or faces above 1000 are rejected.

use serde::{Deserialize, Serialize};

use crate::error::{codes, GameError};

pub const MAX_COUNT: u32 = 100;
pub const MAX_FACES: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Advantage {
    Advantage,
    Disadvantage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiceModifier {
    KeepHighest(u32),
    KeepLowest(u32),
    /// Reroll faces ≤ the threshold, once per die.
    Reroll(i64),
    /// A face equal to the die size draws another die, chained.
    Explode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermKind {
    Dice {
        count: u32,
        faces: u32,
        modifier: Option<DiceModifier>,
    },
    Constant(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    /// +1 or −1, from the joining operator.
    pub sign: i64,
    pub kind: TermKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notation {
    pub terms: Vec<Term>,
    pub advantage: Option<Advantage>,
}

impl Notation {
    /// Sum of the signed constant terms — the notation's flat modifier.
    pub fn flat_modifier(&self) -> i64 {
        self.terms
            .iter()
            .filter_map(|t| match t.kind {
                TermKind::Constant(c) => Some(t.sign * c),
                TermKind::Dice { .. } => None,
            })
            .sum()
    }

    /// Whether any term drops, rerolls or adds faces after the draw.
    /// Plain notations satisfy `total = Σfaces + flat_modifier`.
    pub fn collapses(&self) -> bool {
        self.advantage.is_some()
            || self.terms.iter().any(|t| {
                matches!(
                    t.kind,
                    TermKind::Dice {
                        modifier: Some(_),
                        ..
                    }
                )
            })
    }
}

impl std::str::FromStr for Notation {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Parser::new(s).parse()
    }
}

fn bad(input: &str, reason: impl std::fmt::Display) -> GameError {
    GameError::validation(codes::BAD_NOTATION, format!("{input:?}: {reason}"))
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn eat(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume a run of ASCII digits. Empty run returns `None`.
    fn digits(&mut self) -> Option<&'a str> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.input[start..self.pos])
    }

    fn integer(&mut self) -> Result<i64, GameError> {
        let digits = self
            .digits()
            .ok_or_else(|| bad(self.input, "expected a number"))?;
        digits
            .parse::<i64>()
            .map_err(|_| bad(self.input, "number out of range"))
    }

    fn parse(mut self) -> Result<Notation, GameError> {
        if self.input.is_empty() {
            return Err(bad(self.input, "empty notation"));
        }

        let mut terms = Vec::new();
        terms.push(self.term(1)?);

        loop {
            match self.peek() {
                Some(b'+') => {
                    self.bump();
                    terms.push(self.term(1)?);
                }
                Some(b'-') => {
                    self.bump();
                    terms.push(self.term(-1)?);
                }
                _ => break,
            }
        }

        let advantage = self.suffix()?;

        if self.pos != self.bytes.len() {
            return Err(bad(
                self.input,
                format!("unexpected trailing input at byte {}", self.pos),
            ));
        }
        if !terms
            .iter()
            .any(|t| matches!(t.kind, TermKind::Dice { .. }))
        {
            return Err(bad(self.input, "notation contains no dice"));
        }

        Ok(Notation { terms, advantage })
    }

    fn term(&mut self, sign: i64) -> Result<Term, GameError> {
        // Lookahead: a leading 'd' means count defaults to 1.
        if self.eat(b'd') {
            return self.dice_tail(sign, 1);
        }

        let number = self.integer()?;
        if self.eat(b'd') {
            let count = u32::try_from(number).map_err(|_| bad(self.input, "negative count"))?;
            if count == 0 || count > MAX_COUNT {
                return Err(bad(
                    self.input,
                    format!("dice count must be in 1..={MAX_COUNT}"),
                ));
            }
            self.dice_tail(sign, count)
        } else {
            Ok(Term {
                sign,
                kind: TermKind::Constant(number),
            })
        }
    }

    fn dice_tail(&mut self, sign: i64, count: u32) -> Result<Term, GameError> {
        let faces = self.integer()?;
        let faces = u32::try_from(faces).map_err(|_| bad(self.input, "negative face count"))?;
        if faces == 0 || faces > MAX_FACES {
            return Err(bad(
                self.input,
                format!("die faces must be in 1..={MAX_FACES}"),
            ));
        }

        let modifier = self.dice_modifier(count, faces)?;
        Ok(Term {
            sign,
            kind: TermKind::Dice {
                count,
                faces,
                modifier,
            },
        })
    }

    fn dice_modifier(
        &mut self,
        count: u32,
        faces: u32,
    ) -> Result<Option<DiceModifier>, GameError> {
        match self.peek() {
            Some(b'!') => {
                self.bump();
                Ok(Some(DiceModifier::Explode))
            }
            Some(b'k') => {
                self.bump();
                let keep_high = match self.bump() {
                    Some(b'h') => true,
                    Some(b'l') => false,
                    _ => return Err(bad(self.input, "expected 'kh' or 'kl'")),
                };
                let n = match self.digits() {
                    Some(d) => d
                        .parse::<u32>()
                        .map_err(|_| bad(self.input, "keep count out of range"))?,
                    None => 1,
                };
                if n == 0 || n > count {
                    return Err(bad(
                        self.input,
                        format!("keep count must be in 1..={count}"),
                    ));
                }
                Ok(Some(if keep_high {
                    DiceModifier::KeepHighest(n)
                } else {
                    DiceModifier::KeepLowest(n)
                }))
            }
            Some(b'r') => {
                self.bump();
                let n = match self.digits() {
                    Some(d) => d
                        .parse::<i64>()
                        .map_err(|_| bad(self.input, "reroll threshold out of range"))?,
                    None => 1,
                };
                if n < 1 || n >= i64::from(faces) {
                    return Err(bad(
                        self.input,
                        format!("reroll threshold must be in 1..{faces}"),
                    ));
                }
                Ok(Some(DiceModifier::Reroll(n)))
            }
            _ => Ok(None),
        }
    }

    fn suffix(&mut self) -> Result<Option<Advantage>, GameError> {
        if !self.eat(b'@') {
            return Ok(None);
        }
        let rest = &self.input[self.pos..];
        if rest.starts_with("adv") {
            self.pos += 3;
            Ok(Some(Advantage::Advantage))
        } else if rest.starts_with("dis") {
            self.pos += 3;
            Ok(Some(Advantage::Disadvantage))
        } else {
            Err(bad(self.input, "expected '@adv' or '@dis'"))
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────
