// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persisted entities produced by the indexer.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::Balance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StakerRole {
    #[default]
    None,
    Collator,
    Delegator,
}

impl StakerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StakerRole::None => "none",
            StakerRole::Collator => "collator",
            StakerRole::Delegator => "delegator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(StakerRole::None),
            "collator" => Some(StakerRole::Collator),
            "delegator" => Some(StakerRole::Delegator),
            _ => None,
        }
    }
}

impl fmt::Display for StakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Staker {
    pub id: String,
    pub stash_id: String,
    pub role: StakerRole,
    /// May go negative when a decrease is indexed before the bond it draws from.
    pub active_bond: i128,
    pub total_reward: Balance,
    /// Smoothed annualized return over the last four reward payouts, collators only.
    pub apr24h: Option<f64>,
}

impl Staker {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            stash_id: id.clone(),
            id,
            role: StakerRole::None,
            active_bond: 0,
            total_reward: 0,
            apr24h: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Round {
    pub index: u32,
    pub timestamp: DateTime<Utc>,
    /// Block at which the round started.
    pub started_at: u64,
    pub collators_count: u32,
    pub total: Balance,
    /// Parts per billion. `None` on runtimes that do not expose the commission.
    pub collator_commission: Option<u32>,
}

impl Round {
    pub fn id(&self) -> String {
        self.index.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundCollator {
    pub id: String,
    pub round_index: u32,
    pub staker_id: String,
    pub own_bond: Balance,
    pub total_bond: Balance,
    pub nominators_count: u32,
    pub reward_amount: Option<Balance>,
    pub apr: Option<f64>,
    pub apr_techn_numerator: Option<f64>,
    pub apr_techn_denominator: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundNominator {
    pub id: String,
    pub round_index: u32,
    pub staker_id: String,
    /// Total the delegator had staked across all collators.
    pub bond: Balance,
    pub collators_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundNomination {
    pub id: String,
    pub round_index: u32,
    /// Id of the [`RoundCollator`] being backed.
    pub collator_id: String,
    /// Id of the [`RoundNominator`] doing the backing.
    pub nominator_id: String,
    pub amount: Balance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reward {
    /// Id of the event that paid the reward.
    pub id: String,
    pub account_id: String,
    pub staker_id: String,
    pub amount: Balance,
    /// Round the reward was earned in, not the round it was paid in.
    pub round: u32,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    Stake,
    Unstake,
    Reward,
    Compound,
}

impl HistoryKind {
    pub fn code(&self) -> i64 {
        match self {
            HistoryKind::Stake => 0,
            HistoryKind::Unstake => 1,
            HistoryKind::Reward => 2,
            HistoryKind::Compound => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(HistoryKind::Stake),
            1 => Some(HistoryKind::Unstake),
            2 => Some(HistoryKind::Reward),
            3 => Some(HistoryKind::Compound),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryElement {
    pub id: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: HistoryKind,
    pub round_index: u32,
    pub staker_id: String,
    pub amount: Balance,
    pub delegator_id: Option<String>,
    pub collator_id: Option<String>,
}

/// Marks an account that has been backed by at least one delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collator {
    pub id: String,
}

/// Marks an account that has delegated at least once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegator {
    pub id: String,
}

pub fn round_collator_id(round: u32, collator: &str) -> String {
    format!("{round}-{collator}")
}

pub fn round_nominator_id(round: u32, nominator: &str) -> String {
    format!("{round}-{nominator}")
}

pub fn round_nomination_id(round: u32, collator: &str, nominator: &str) -> String {
    format!("{round}-{collator}-{nominator}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staker_defaults() {
        let staker = Staker::new("0xaa");
        assert_eq!(staker.stash_id, "0xaa");
        assert_eq!(staker.role, StakerRole::None);
        assert_eq!(staker.active_bond, 0);
        assert_eq!(staker.total_reward, 0);
        assert_eq!(staker.apr24h, None);
    }

    #[test]
    fn codes_round_trip() {
        for kind in
            [HistoryKind::Stake, HistoryKind::Unstake, HistoryKind::Reward, HistoryKind::Compound]
        {
            assert_eq!(HistoryKind::from_code(kind.code()), Some(kind));
        }
        for role in [StakerRole::None, StakerRole::Collator, StakerRole::Delegator] {
            assert_eq!(StakerRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(HistoryKind::from_code(9), None);
    }

    #[test]
    fn ids_are_deterministic() {
        assert_eq!(round_collator_id(7, "0xc"), "7-0xc");
        assert_eq!(round_nomination_id(7, "0xc", "0xd"), "7-0xc-0xd");
    }
}
