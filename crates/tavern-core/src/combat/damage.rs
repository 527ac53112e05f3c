// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Acid,
    Bludgeoning,
    Cold,
    Fire,
    Force,
    Lightning,
    Necrotic,
    Piercing,
    Poison,
    Psychic,
    Radiant,
    Slashing,
    Thunder,
}

/// How a damage instance was adjusted by the target's defenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageResponse {
    Normal,
    Resisted,
    Vulnerable,
    Immune,
}

/// A combatant's static defenses by damage type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defenses {
    pub resistances: BTreeSet<DamageType>,
    pub vulnerabilities: BTreeSet<DamageType>,
    pub immunities: BTreeSet<DamageType>,
}

/// Apply the defense algebra to a raw damage amount.
///
/// Immunity zeroes the instance. Otherwise resistance halves (round down)
/// XOR vulnerability doubles — they are exclusive, and when a target
/// somehow has both, resistance takes precedence.
pub fn mitigate(amount: i32, dtype: DamageType, defenses: &Defenses) -> (i32, DamageResponse) {
    let amount = amount.max(0);
    if defenses.immunities.contains(&dtype) {
        (0, DamageResponse::Immune)
    } else if defenses.resistances.contains(&dtype) {
        (amount / 2, DamageResponse::Resisted)
    } else if defenses.vulnerabilities.contains(&dtype) {
        (amount * 2, DamageResponse::Vulnerable)
    } else {
        (amount, DamageResponse::Normal)
    }
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn with(
        res: &[DamageType],
        vul: &[DamageType],
        imm: &[DamageType],
    ) -> Defenses {
        Defenses {
            resistances: res.iter().copied().collect(),
            vulnerabilities: vul.iter().copied().collect(),
            immunities: imm.iter().copied().collect(),
        }
    }

    #[test]
    fn resistance_halves_rounding_down() {
        // Scenario: 9 fire vs fire resistance → 4.
        let (taken, response) = mitigate(9, DamageType::Fire, &with(&[DamageType::Fire], &[], &[]));
        assert_eq!(taken, 4);
        assert_eq!(response, DamageResponse::Resisted);
    }

    #[test]
    fn vulnerability_doubles() {
        let (taken, response) =
            mitigate(7, DamageType::Cold, &with(&[], &[DamageType::Cold], &[]));
        assert_eq!(taken, 14);
        assert_eq!(response, DamageResponse::Vulnerable);
    }

    #[test]
    fn immunity_zeroes() {
        let (taken, response) =
            mitigate(50, DamageType::Poison, &with(&[], &[], &[DamageType::Poison]));
        assert_eq!(taken, 0);
        assert_eq!(response, DamageResponse::Immune);
    }

    #[test]
    fn resistance_takes_precedence_over_vulnerability() {
        let d = with(&[DamageType::Fire], &[DamageType::Fire], &[]);
        let (taken, response) = mitigate(10, DamageType::Fire, &d);
        assert_eq!(taken, 5);
        assert_eq!(response, DamageResponse::Resisted);
    }

    #[test]
    fn immunity_beats_both() {
        let d = with(&[DamageType::Fire], &[DamageType::Fire], &[DamageType::Fire]);
        assert_eq!(mitigate(10, DamageType::Fire, &d).0, 0);
    }

    #[test]
    fn unrelated_type_passes_through() {
        let d = with(&[DamageType::Fire], &[], &[]);
        let (taken, response) = mitigate(9, DamageType::Slashing, &d);
        assert_eq!(taken, 9);
        assert_eq!(response, DamageResponse::Normal);
    }

    #[test]
    fn negative_amount_clamped_to_zero() {
        let (taken, _) = mitigate(-4, DamageType::Fire, &Defenses::default());
        assert_eq!(taken, 0);
    }
}
