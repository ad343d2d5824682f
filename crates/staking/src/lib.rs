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

//! Runtime-version aware decoding of parachain-staking events and storage, round snapshots and
//! the staking ledger fold.

pub mod codec;
pub mod entities;
pub mod error;
pub mod events;
pub mod ledger;
pub mod names;
pub mod round;
pub mod runtime;
pub mod storage;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::{AddressCodec, HexAddressCodec};

pub use entities::{
    round_collator_id, round_nomination_id, round_nominator_id, Collator, Delegator,
    HistoryElement, HistoryKind, Reward, Round, RoundCollator, RoundNomination, RoundNominator,
    Staker, StakerRole,
};

pub use error::StakingError;

pub use events::{CanonicalEvent, CanonicalEventDecoder, CanonicalKind, EventPayload};

pub use ledger::{LedgerChanges, LedgerKeys, LedgerState, RoundLocator, StakingLedger, APR_SAMPLES};

pub use round::{BuilderState, RoundEntities, RoundSnapshot, RoundSnapshotBuilder};

pub use runtime::{ItemKind, RuntimeConstant, RuntimeContext, SchemaVersionOracle, VersionTag};

pub use storage::{CanonicalStorageReader, ChainStorage, MapItem, StorageValue, ValueItem};

pub use types::{
    AccountId, Balance, Block, BlockHeader, CandidateState, Delegation, DelegatorState, RawEvent,
    RoundInfo,
};

/// Reward-earning rounds per year.
pub const PERIODS_PER_YEAR: f64 = 1460.0;

/// Reward payment delay used by runtimes that do not expose the constant.
pub const DEFAULT_REWARD_PAYMENT_DELAY: u32 = 2;
