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

//! Fully qualified names of the parachain-staking pallet items.

pub mod event {
    pub const NEW_ROUND: &str = "ParachainStaking.NewRound";

    pub const JOINED_COLLATOR_CANDIDATES: &str = "ParachainStaking.JoinedCollatorCandidates";
    pub const COLLATOR_BONDED_MORE: &str = "ParachainStaking.CollatorBondedMore";
    pub const COLLATOR_BONDED_LESS: &str = "ParachainStaking.CollatorBondedLess";
    pub const CANDIDATE_BONDED_MORE: &str = "ParachainStaking.CandidateBondedMore";
    pub const CANDIDATE_BONDED_LESS: &str = "ParachainStaking.CandidateBondedLess";

    pub const NOMINATION: &str = "ParachainStaking.Nomination";
    pub const NOMINATION_INCREASED: &str = "ParachainStaking.NominationIncreased";
    pub const NOMINATION_DECREASED: &str = "ParachainStaking.NominationDecreased";
    pub const DELEGATION: &str = "ParachainStaking.Delegation";
    pub const DELEGATION_INCREASED: &str = "ParachainStaking.DelegationIncreased";
    pub const DELEGATION_DECREASED: &str = "ParachainStaking.DelegationDecreased";
    pub const DELEGATION_REVOKED: &str = "ParachainStaking.DelegationRevoked";

    pub const REWARDED: &str = "ParachainStaking.Rewarded";
    pub const COMPOUNDED: &str = "ParachainStaking.Compounded";
}

pub mod storage {
    pub const CANDIDATE_INFO: &str = "ParachainStaking.CandidateInfo";
    pub const TOP_DELEGATIONS: &str = "ParachainStaking.TopDelegations";
    pub const BOTTOM_DELEGATIONS: &str = "ParachainStaking.BottomDelegations";
    pub const CANDIDATE_STATE: &str = "ParachainStaking.CandidateState";
    pub const COLLATOR_STATE2: &str = "ParachainStaking.CollatorState2";
    pub const COLLATOR_STATE: &str = "ParachainStaking.CollatorState";

    pub const DELEGATOR_STATE: &str = "ParachainStaking.DelegatorState";
    pub const NOMINATOR_STATE2: &str = "ParachainStaking.NominatorState2";
    pub const NOMINATOR_STATE: &str = "ParachainStaking.NominatorState";

    pub const SELECTED_CANDIDATES: &str = "ParachainStaking.SelectedCandidates";
    pub const ROUND: &str = "ParachainStaking.Round";
    pub const COLLATOR_COMMISSION: &str = "ParachainStaking.CollatorCommission";
}

pub mod constant {
    pub const REWARD_PAYMENT_DELAY: &str = "ParachainStaking.RewardPaymentDelay";
}
