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

use alloy_primitives::B256;
use thiserror::Error;

use crate::runtime::{ItemKind, VersionTag};

#[derive(Error, Debug)]
pub enum StakingError {
    /// The runtime exposes a shape for this item that no known version matches.
    #[error("Unknown {kind} version for {name} (type hash {hash:?})")]
    UnknownVersion { kind: ItemKind, name: String, hash: Option<B256> },

    #[error("Event {0} is not a staking event")]
    UnsupportedEvent(String),

    #[error("Missing {item} state for {account} at block {block}")]
    MissingState { item: &'static str, account: String, block: u64 },

    #[error("Storage item {item} is absent from the runtime at block {block}")]
    ItemAbsent { item: &'static str, block: u64 },

    #[error("No round started at or before block {height} (earliest known round starts at {earliest:?})")]
    RoundLookupFailure { height: u64, earliest: Option<u64> },

    #[error("Malformed payload for {name} {version}: {source}")]
    Payload {
        name: String,
        version: VersionTag,
        #[source]
        source: serde_json::Error,
    },

    /// Applying an amount would take a staker's balance out of the representable range.
    #[error("Balance overflow for {account} at block {block}")]
    BalanceOverflow { account: String, block: u64 },

    #[error("Invalid account id: {0}")]
    InvalidAddress(String),

    #[error("Storage backend error {0:?}")]
    Storage(#[from] anyhow::Error),
}
