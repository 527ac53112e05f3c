// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{codes, GameError};

use super::notation::{Advantage, DiceModifier, Notation, Term, TermKind};

/// Hard cap on chained explosions per die. A d2 with `!` would otherwise
/// run arbitrarily long on a hot streak.
const MAX_EXPLOSION_CHAIN: usize = 100;

/// The resolved outcome of one roll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollOutcome {
    /// Every face drawn, in draw order, before any collapse.
    pub faces: Vec<i64>,
    /// Signed sum of the dice terms after keep/reroll/explode collapse.
    pub dice_total: i64,
    /// Signed sum of the constant terms in the notation.
    pub flat_modifier: i64,
}

impl RollOutcome {
    pub fn total(&self) -> i64 {
        self.dice_total + self.flat_modifier
    }
}

/// Draws faces for [`resolve`]. Implemented by the RNG (live rolls), by a
/// recorded sequence (audit replay) and by scripted vectors (tests).
trait FaceSource {
    fn draw(&mut self, faces: u32) -> Result<i64, GameError>;
}

struct RngSource<'a>(&'a mut StdRng);

impl FaceSource for RngSource<'_> {
    fn draw(&mut self, faces: u32) -> Result<i64, GameError> {
        Ok(self.0.gen_range(1..=i64::from(faces)))
    }
}

struct RecordedSource<'a> {
    faces: &'a [i64],
    pos: usize,
}

impl FaceSource for RecordedSource<'_> {
    fn draw(&mut self, faces: u32) -> Result<i64, GameError> {
        let v = *self.faces.get(self.pos).ok_or_else(|| {
            GameError::validation(codes::BAD_NOTATION, "recorded roll is shorter than notation")
        })?;
        self.pos += 1;
        if v < 1 || v > i64::from(faces) {
            return Err(GameError::validation(
                codes::BAD_NOTATION,
                format!("recorded face {v} outside 1..={faces}"),
            ));
        }
        Ok(v)
    }
}

/// Seeded roller. One instance per roll: the seed is persisted alongside the
/// results so the roll can be reprinted exactly.
pub struct Roller {
    rng: StdRng,
    seed: u64,
}

impl Roller {
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn roll(&mut self, notation: &Notation) -> Result<RollOutcome, GameError> {
        resolve(notation, &mut RngSource(&mut self.rng))
    }

    /// Roll a single plain die — initiative, concentration checks.
    pub fn roll_die(&mut self, faces: u32) -> i64 {
        self.rng.gen_range(1..=i64::from(faces))
    }
}

/// Recompute a roll's totals from its recorded face sequence.
///
/// Fails when the sequence does not match the notation (too short, too long,
/// or a face outside its die's range) — which is exactly what an audit wants
/// to detect.
pub fn replay(notation: &Notation, faces: &[i64]) -> Result<RollOutcome, GameError> {
    let mut source = RecordedSource { faces, pos: 0 };
    let outcome = resolve(notation, &mut source)?;
    if source.pos != faces.len() {
        return Err(GameError::validation(
            codes::BAD_NOTATION,
            "recorded roll is longer than notation",
        ));
    }
    Ok(outcome)
}

fn resolve(notation: &Notation, source: &mut dyn FaceSource) -> Result<RollOutcome, GameError> {
    let mut faces = Vec::new();
    let mut dice_total = 0i64;
    let mut flat = 0i64;
    // Advantage applies to the leading dice term only; the rest of the
    // notation resolves normally.
    let mut advantage = notation.advantage;

    for term in &notation.terms {
        match term.kind {
            TermKind::Constant(c) => flat += term.sign * c,
            TermKind::Dice { .. } => {
                let value = match advantage.take() {
                    Some(adv) => {
                        let first = resolve_dice(term, source, &mut faces)?;
                        let second = resolve_dice(term, source, &mut faces)?;
                        match adv {
                            Advantage::Advantage => first.max(second),
                            Advantage::Disadvantage => first.min(second),
                        }
                    }
                    None => resolve_dice(term, source, &mut faces)?,
                };
                dice_total += term.sign * value;
            }
        }
    }

    Ok(RollOutcome {
        faces,
        dice_total,
        flat_modifier: flat,
    })
}

/// Resolve one dice term, appending every drawn face to `record`, and
/// return the collapsed (unsigned) value of the term.
fn resolve_dice(
    term: &Term,
    source: &mut dyn FaceSource,
    record: &mut Vec<i64>,
) -> Result<i64, GameError> {
    let TermKind::Dice {
        count,
        faces,
        modifier,
    } = term.kind
    else {
        unreachable!("resolve_dice called on a constant term");
    };

    match modifier {
        None => {
            let mut sum = 0;
            for _ in 0..count {
                let v = source.draw(faces)?;
                record.push(v);
                sum += v;
            }
            Ok(sum)
        }
        Some(DiceModifier::KeepHighest(n)) | Some(DiceModifier::KeepLowest(n)) => {
            let mut drawn = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let v = source.draw(faces)?;
                record.push(v);
                drawn.push(v);
            }
            drawn.sort_unstable();
            let kept: i64 = if matches!(modifier, Some(DiceModifier::KeepHighest(_))) {
                drawn.iter().rev().take(n as usize).sum()
            } else {
                drawn.iter().take(n as usize).sum()
            };
            Ok(kept)
        }
        Some(DiceModifier::Reroll(threshold)) => {
            let mut sum = 0;
            for _ in 0..count {
                let v = source.draw(faces)?;
                record.push(v);
                if v <= threshold {
                    let again = source.draw(faces)?;
                    record.push(again);
                    sum += again;
                } else {
                    sum += v;
                }
            }
            Ok(sum)
        }
        Some(DiceModifier::Explode) => {
            let mut sum = 0;
            for _ in 0..count {
                let mut chain = 0;
                loop {
                    let v = source.draw(faces)?;
                    record.push(v);
                    sum += v;
                    chain += 1;
                    if v < i64::from(faces) || chain >= MAX_EXPLOSION_CHAIN {
                        break;
                    }
                }
            }
            Ok(sum)
        }
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn notation(s: &str) -> Notation {
        s.parse().unwrap()
    }

    /// Scripted face source for deterministic tests.
    struct Script(Vec<i64>, usize);

    impl FaceSource for Script {
        fn draw(&mut self, _faces: u32) -> Result<i64, GameError> {
            let v = self.0[self.1];
            self.1 += 1;
            Ok(v)
        }
    }

    fn run(s: &str, script: &[i64]) -> RollOutcome {
        resolve(&notation(s), &mut Script(script.to_vec(), 0)).unwrap()
    }

    #[test]
    fn plain_sum_with_flat_modifier() {
        // Scenario: 2d6+3 drawing [4,5] totals 12.
        let out = run("2d6+3", &[4, 5]);
        assert_eq!(out.faces, vec![4, 5]);
        assert_eq!(out.total(), 12);
    }

    #[test]
    fn advantage_keeps_highest_set() {
        // Scenario: 1d20@adv drawing [9,17] totals 17.
        let out = run("1d20@adv", &[9, 17]);
        assert_eq!(out.faces, vec![9, 17]);
        assert_eq!(out.total(), 17);
    }

    #[test]
    fn disadvantage_keeps_lowest_set() {
        let out = run("1d20@dis", &[9, 17]);
        assert_eq!(out.faces, vec![9, 17]);
        assert_eq!(out.total(), 9);
    }

    #[test]
    fn keep_highest_drops_low_faces() {
        let out = run("4d6kh3", &[1, 4, 6, 3]);
        assert_eq!(out.faces, vec![1, 4, 6, 3]);
        assert_eq!(out.total(), 13); // 6 + 4 + 3
    }

    #[test]
    fn keep_lowest_drops_high_faces() {
        let out = run("2d20kl1", &[15, 7]);
        assert_eq!(out.total(), 7);
    }

    #[test]
    fn reroll_replaces_low_faces_once() {
        // First die rolls 2 (≤ threshold) and rerolls into 5; second stays.
        let out = run("2d6r2", &[2, 5, 6]);
        assert_eq!(out.faces, vec![2, 5, 6]);
        assert_eq!(out.total(), 11); // 5 + 6
    }

    #[test]
    fn reroll_keeps_replacement_even_when_worse() {
        let out = run("1d6r2", &[1, 1]);
        assert_eq!(out.total(), 1);
        assert_eq!(out.faces, vec![1, 1]);
    }

    #[test]
    fn explode_chains_on_max_face() {
        let out = run("1d6!", &[6, 6, 2]);
        assert_eq!(out.faces, vec![6, 6, 2]);
        assert_eq!(out.total(), 14);
    }

    #[test]
    fn negative_dice_term_subtracts() {
        let out = run("1d20-1d4", &[11, 3]);
        assert_eq!(out.total(), 8);
    }

    #[test]
    fn seeded_roller_is_reproducible() {
        let n = notation("2d6+3");
        let a = Roller::from_seed(42).roll(&n).unwrap();
        let b = Roller::from_seed(42).roll(&n).unwrap();
        assert_eq!(a, b);
        for f in &a.faces {
            assert!((1..=6).contains(f));
        }
        assert_eq!(a.total(), a.faces.iter().sum::<i64>() + 3);
    }

    #[test]
    fn replay_reconstructs_live_roll() {
        let n = notation("4d6kh3+2");
        let mut roller = Roller::from_seed(99);
        let live = roller.roll(&n).unwrap();
        let replayed = replay(&n, &live.faces).unwrap();
        assert_eq!(replayed, live);
    }

    #[test]
    fn replay_rejects_truncated_record() {
        let n = notation("2d6");
        assert!(replay(&n, &[4]).is_err());
    }

    #[test]
    fn replay_rejects_excess_record() {
        let n = notation("2d6");
        assert!(replay(&n, &[4, 5, 6]).is_err());
    }

    #[test]
    fn replay_rejects_out_of_range_face() {
        let n = notation("2d6");
        assert!(replay(&n, &[4, 7]).is_err());
    }

    #[test]
    fn explosion_chain_is_bounded() {
        // A script that always returns the maximum face must terminate.
        struct AlwaysMax;
        impl FaceSource for AlwaysMax {
            fn draw(&mut self, faces: u32) -> Result<i64, GameError> {
                Ok(i64::from(faces))
            }
        }
        let out = resolve(&notation("1d2!"), &mut AlwaysMax).unwrap();
        assert_eq!(out.faces.len(), MAX_EXPLOSION_CHAIN);
    }
}
