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

//! Chain-facing value types shared by the decoders, the storage reader and the ledger.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer};

use crate::runtime::RuntimeContext;

/// 20-byte account identifier used by the staking pallet.
pub type AccountId = alloy_primitives::Address;

/// Token amount in the chain's smallest unit.
pub type Balance = u128;

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    /// Runtime that produced this block. Shared by every block of the same runtime version.
    pub runtime: Arc<RuntimeContext>,
}

/// An undecoded event as reported by the archive.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Globally unique event id assigned by the archive.
    pub id: String,
    /// Position of the event within its block.
    pub index: u32,
    /// Wire name, `Pallet.Event`.
    pub name: String,
    /// Payload, either a positional array or a named record depending on the runtime version.
    pub args: serde_json::Value,
}

impl RawEvent {
    /// Builds an event whose id follows the archive's `{height}-{index}` layout.
    pub fn new(height: u64, index: u32, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self { id: format!("{height:010}-{index:06}"), index, name: name.into(), args }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub events: Vec<RawEvent>,
}

/// A single bond from a delegator to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delegation {
    /// The counterparty: the delegator in a candidate's list, the candidate in a delegator's list.
    pub owner: AccountId,
    pub amount: Balance,
}

/// Canonical view of a collator candidate, independent of the storage layout it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateState {
    pub bond: Balance,
    pub top_delegations: Vec<Delegation>,
    pub bottom_delegations: Vec<Delegation>,
}

impl CandidateState {
    /// All backing delegations, top tier first.
    pub fn delegations(&self) -> impl Iterator<Item = &Delegation> {
        self.top_delegations.iter().chain(self.bottom_delegations.iter())
    }

    /// Self bond plus every backing delegation.
    pub fn total_backing(&self) -> Balance {
        self.delegations().fold(self.bond, |acc, d| acc.saturating_add(d.amount))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegatorState {
    pub total: Balance,
    pub delegations: Vec<Delegation>,
}

/// Contents of the pallet's `Round` storage value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RoundInfo {
    pub current: u32,
    pub first: u64,
    pub length: u32,
}

/// Balance as it appears on the wire: a JSON number for small values, a decimal or `0x` hex
/// string otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WireBalance(pub Balance);

impl<'de> Deserialize<'de> for WireBalance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BalanceVisitor;

        impl de::Visitor<'_> for BalanceVisitor {
            type Value = WireBalance;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an unsigned integer or an integer string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(WireBalance(v.into()))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
                Ok(WireBalance(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u128::try_from(v).map(WireBalance).map_err(|_| E::custom("negative balance"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                let parsed = match v.strip_prefix("0x") {
                    Some(hex) => u128::from_str_radix(hex, 16),
                    None => v.parse::<u128>(),
                };
                parsed.map(WireBalance).map_err(|e| E::custom(format!("bad balance {v}: {e}")))
            }
        }

        deserializer.deserialize_any(BalanceVisitor)
    }
}

/// `{ owner, amount }` entry of a delegation list in any storage layout.
#[derive(Debug, Deserialize)]
pub(crate) struct WireBond {
    pub owner: AccountId,
    pub amount: WireBalance,
}

impl From<WireBond> for Delegation {
    fn from(bond: WireBond) -> Self {
        Delegation { owner: bond.owner, amount: bond.amount.0 }
    }
}
