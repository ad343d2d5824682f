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

use dpos_staking::{names::event, HistoryKind, StakerRole, StakingError};
use dpos_staking_indexer::{
    archive::{Archive, JsonArchive},
    db::DbError,
};
use serde_json::json;
use tracing_test::traced_test;

use super::common::{self, archive, id, runtime, BlockFixture, Candidate};

const COLLATOR: u8 = 0xc1;
const DELEGATOR: u8 = 0xd1;

fn round_block(round: u32) -> BlockFixture {
    BlockFixture::new(round as u64 * 10, round)
        .new_round(round, &[Candidate::new(COLLATOR, 400).top(DELEGATOR, 600)])
}

fn rewarded(height: u64, round: u32, account: u8, amount: u128) -> BlockFixture {
    BlockFixture::new(height, round)
        .event(event::REWARDED, json!({ "account": id(account), "rewards": amount.to_string() }))
}

fn assert_close(actual: Option<f64>, expected: f64) {
    let actual = actual.expect("value is set");
    assert!((actual - expected).abs() < 1e-6, "expected {expected}, got {actual}");
}

/// Round 60 starts at block 600 and a plain account is rewarded at block 605.
fn reward_archive() -> JsonArchive {
    archive(&[runtime()], vec![round_block(60), rewarded(605, 60, 0xaa, 1000)])
}

#[tokio::test]
#[traced_test]
async fn test_reward_attributed_to_earned_round() {
    let test_db = common::setup_test_db().await;
    common::service(reward_archive(), &test_db, common::config(600, 605, 100))
        .run()
        .await
        .unwrap();
    let db = &test_db.db;

    let reward_id = "0000000605-000000".to_string();
    let rewards = db.find_rewards(&[reward_id.clone()]).await.unwrap();
    let reward = &rewards[&reward_id];
    assert_eq!(reward.round, 56);
    assert_eq!(reward.amount, 1000);
    assert_eq!(reward.staker_id, id(0xaa));
    assert_eq!(reward.block_number, 605);

    let stakers = db.find_stakers(&[id(0xaa)]).await.unwrap();
    let staker = &stakers[&id(0xaa)];
    assert_eq!(staker.stash_id, id(0xaa));
    assert_eq!(staker.active_bond, 1000);
    assert_eq!(staker.total_reward, 1000);
    assert_eq!(staker.role, StakerRole::None);
    assert_eq!(staker.apr24h, None);

    let history = db.find_history_elements(&[reward_id.clone()]).await.unwrap();
    assert_eq!(history[&reward_id].kind, HistoryKind::Reward);
    assert_eq!(history[&reward_id].round_index, 60);
}

#[tokio::test]
#[traced_test]
async fn test_collator_apr_across_batches() {
    let test_db = common::setup_test_db().await;
    let mut blocks: Vec<BlockFixture> = (56..=60).map(round_block).collect();
    blocks.push(BlockFixture::new(601, 60).event(
        event::CANDIDATE_BONDED_MORE,
        json!({ "candidate": id(COLLATOR), "amount": "100", "newTotalBond": "400" }),
    ));
    blocks.push(rewarded(605, 60, COLLATOR, 1000));

    // The first batch holds rounds 56 to 59, the second round 60 and the staking events.
    common::service(archive(&[runtime()], blocks), &test_db, common::config(560, 605, 40))
        .run()
        .await
        .unwrap();
    let db = &test_db.db;

    let earned_id = format!("56-{}", id(COLLATOR));
    let collators = db.find_round_collators(&[earned_id.clone()]).await.unwrap();
    let collator = &collators[&earned_id];
    assert_eq!(collator.own_bond, 400);
    assert_eq!(collator.total_bond, 1000);
    assert_eq!(collator.reward_amount, Some(1000));
    assert_close(collator.apr, 3650.0);
    assert_close(collator.apr_techn_numerator, 1_460_000.0);
    assert_close(collator.apr_techn_denominator, 400.0);

    let stakers = db.find_stakers(&[id(COLLATOR)]).await.unwrap();
    let staker = &stakers[&id(COLLATOR)];
    assert_eq!(staker.role, StakerRole::Collator);
    assert_eq!(staker.active_bond, 1400);
    assert_eq!(staker.total_reward, 1000);
    assert_close(staker.apr24h, 912.5);

    let bond_id = "0000000601-000000".to_string();
    let history = db.find_history_elements(&[bond_id.clone()]).await.unwrap();
    assert_eq!(history[&bond_id].kind, HistoryKind::Stake);
    assert_eq!(history[&bond_id].amount, 100);

    let later_id = format!("57-{}", id(COLLATOR));
    let later = db.find_round_collators(&[later_id.clone()]).await.unwrap();
    assert_eq!(later[&later_id].apr, None);
    assert_eq!(db.get_last_processed_block().await.unwrap(), Some(605));
}

#[tokio::test]
#[traced_test]
async fn test_delegation_flow() {
    let test_db = common::setup_test_db().await;
    let delegator = 0xd2;
    let blocks = vec![
        round_block(60),
        BlockFixture::new(601, 60).event(
            event::DELEGATION,
            json!({
                "delegator": id(delegator),
                "lockedAmount": "500",
                "candidate": id(COLLATOR),
                "delegatorPosition": { "Top": { "newTotal": "1500" } },
            }),
        ),
        BlockFixture::new(602, 60).event(
            event::DELEGATION_DECREASED,
            json!({
                "delegator": id(delegator),
                "candidate": id(COLLATOR),
                "amount": "200",
                "inTop": true,
            }),
        ),
        BlockFixture::new(603, 60).event(
            event::COMPOUNDED,
            json!({ "candidate": id(COLLATOR), "delegator": id(delegator), "amount": "50" }),
        ),
    ];
    common::service(archive(&[runtime()], blocks), &test_db, common::config(600, 603, 100))
        .run()
        .await
        .unwrap();
    let db = &test_db.db;

    let stakers = db.find_stakers(&[id(delegator)]).await.unwrap();
    let staker = &stakers[&id(delegator)];
    assert_eq!(staker.role, StakerRole::Delegator);
    assert_eq!(staker.active_bond, 350);
    assert_eq!(staker.total_reward, 0);

    assert!(db.find_collators(&[id(COLLATOR)]).await.unwrap().contains_key(&id(COLLATOR)));
    assert!(db.find_delegators(&[id(delegator)]).await.unwrap().contains_key(&id(delegator)));

    let ids = vec![
        "0000000601-000000".to_string(),
        "0000000602-000000".to_string(),
        "0000000603-000000".to_string(),
    ];
    let history = db.find_history_elements(&ids).await.unwrap();
    assert_eq!(history[&ids[0]].kind, HistoryKind::Stake);
    assert_eq!(history[&ids[0]].delegator_id, Some(id(delegator)));
    assert_eq!(history[&ids[0]].collator_id, Some(id(COLLATOR)));
    assert_eq!(history[&ids[1]].kind, HistoryKind::Unstake);
    assert_eq!(history[&ids[1]].amount, 200);
    assert_eq!(history[&ids[2]].kind, HistoryKind::Compound);
    assert_eq!(history[&ids[2]].collator_id, None);
}

#[tokio::test]
#[traced_test]
async fn test_rerun_batch_conflicts() {
    let test_db = common::setup_test_db().await;
    let service = common::service(reward_archive(), &test_db, common::config(600, 605, 100));
    service.run().await.unwrap();

    // Already indexed, nothing left to do.
    service.run().await.unwrap();

    let blocks = reward_archive().blocks(600, 605).await.unwrap();
    let err = service.process_batch(&blocks, 605).await.unwrap_err();
    match err.downcast_ref::<DbError>() {
        Some(DbError::Conflict(table)) => assert_eq!(table, "rounds"),
        other => panic!("unexpected error: {other:?}"),
    }

    let stakers = test_db.db.find_stakers(&[id(0xaa)]).await.unwrap();
    assert_eq!(stakers[&id(0xaa)].active_bond, 1000);
    assert_eq!(stakers[&id(0xaa)].total_reward, 1000);
}

#[tokio::test]
#[traced_test]
async fn test_reward_before_first_round_fails() {
    let test_db = common::setup_test_db().await;
    let archive = archive(&[runtime()], vec![rewarded(5, 0, 0xaa, 1000)]);
    let err = common::service(archive, &test_db, common::config(0, 5, 100))
        .run()
        .await
        .unwrap_err();

    match err.downcast_ref::<StakingError>() {
        Some(StakingError::RoundLookupFailure { height, earliest }) => {
            assert_eq!(*height, 5);
            assert_eq!(*earliest, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(test_db.db.get_last_processed_block().await.unwrap(), None);
}
