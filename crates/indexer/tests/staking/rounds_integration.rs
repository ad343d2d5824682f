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

use dpos_staking::{
    names::{event, storage},
    StakerRole, StakingError,
};
use serde_json::json;
use tracing_test::traced_test;

use super::common::{
    self, archive, id, legacy_runtime, runtime, BlockFixture, Candidate, COLLATOR_COMMISSION,
    LEGACY_SPEC_VERSION,
};

#[tokio::test]
#[traced_test]
async fn test_new_round_snapshot() {
    let test_db = common::setup_test_db().await;
    let archive = archive(
        &[runtime()],
        vec![BlockFixture::new(1000, 50)
            .new_round(50, &[Candidate::new(0xc1, 100).top(0xd1, 30).top(0xd2, 20)])],
    );
    common::service(archive, &test_db, common::config(1000, 1000, 100)).run().await.unwrap();
    let db = &test_db.db;

    let rounds = db.find_rounds_from(0).await.unwrap();
    assert_eq!(rounds.len(), 1);
    assert_eq!(rounds[0].index, 50);
    assert_eq!(rounds[0].started_at, 1000);
    assert_eq!(rounds[0].collators_count, 1);
    assert_eq!(rounds[0].total, 150);
    assert_eq!(rounds[0].collator_commission, Some(COLLATOR_COMMISSION));

    let collator_id = format!("50-{}", id(0xc1));
    let collators = db.find_round_collators(&[collator_id.clone()]).await.unwrap();
    let collator = &collators[&collator_id];
    assert_eq!(collator.own_bond, 100);
    assert_eq!(collator.total_bond, 150);
    assert_eq!(collator.nominators_count, 2);
    assert_eq!(collator.reward_amount, None);
    assert_eq!(collator.apr, None);

    let nominator_ids = vec![format!("50-{}", id(0xd1)), format!("50-{}", id(0xd2))];
    let nominators = db.find_round_nominators(&nominator_ids).await.unwrap();
    assert_eq!(nominators.len(), 2);
    assert_eq!(nominators[&nominator_ids[0]].bond, 30);
    assert_eq!(nominators[&nominator_ids[1]].bond, 20);
    assert!(nominators.values().all(|n| n.collators_count == 1));

    let nomination_ids = vec![
        format!("50-{}-{}", id(0xc1), id(0xd1)),
        format!("50-{}-{}", id(0xc1), id(0xd2)),
    ];
    let nominations = db.find_round_nominations(&nomination_ids).await.unwrap();
    assert_eq!(nominations.len(), 2);
    assert_eq!(nominations.values().map(|n| n.amount).sum::<u128>(), 50);
    assert!(nominations.values().all(|n| n.collator_id == collator_id));

    let stakers = db.find_stakers(&[id(0xc1), id(0xd1), id(0xd2)]).await.unwrap();
    assert_eq!(stakers.len(), 3);
    assert!(stakers.values().all(|s| s.role == StakerRole::None && s.active_bond == 0));

    assert_eq!(db.get_last_processed_block().await.unwrap(), Some(1000));
}

#[tokio::test]
#[traced_test]
async fn test_shared_delegator_counts_each_collator_once() {
    let test_db = common::setup_test_db().await;
    let archive = archive(
        &[runtime()],
        vec![BlockFixture::new(1000, 50).new_round(
            50,
            &[
                Candidate::new(0xc1, 100).top(0xd1, 30),
                Candidate::new(0xc2, 200).top(0xd1, 70).bottom(0xd2, 5),
            ],
        )],
    );
    common::service(archive, &test_db, common::config(1000, 1000, 100)).run().await.unwrap();
    let db = &test_db.db;

    let shared = format!("50-{}", id(0xd1));
    let nominators = db.find_round_nominators(&[shared.clone()]).await.unwrap();
    assert_eq!(nominators[&shared].collators_count, 2);
    assert_eq!(nominators[&shared].bond, 100);

    let second = format!("50-{}", id(0xc2));
    let collators = db.find_round_collators(&[second.clone()]).await.unwrap();
    assert_eq!(collators[&second].total_bond, 275);
    assert_eq!(collators[&second].nominators_count, 2);

    let rounds = db.find_rounds_from(50).await.unwrap();
    assert_eq!(rounds[0].collators_count, 2);
    assert_eq!(rounds[0].total, 405);

    let stakers = db.find_stakers(&[id(0xc1), id(0xc2), id(0xd1), id(0xd2)]).await.unwrap();
    assert_eq!(stakers.len(), 4);
}

#[tokio::test]
#[traced_test]
async fn test_legacy_candidate_state_layout() {
    let test_db = common::setup_test_db().await;
    let block = BlockFixture::new(1000, 50)
        .spec_version(LEGACY_SPEC_VERSION)
        .event(event::NEW_ROUND, json!([1000, 50, 1, "150"]))
        .value(storage::SELECTED_CANDIDATES, json!([id(0xc1)]))
        .value(storage::COLLATOR_COMMISSION, json!(COLLATOR_COMMISSION))
        .entry(
            storage::CANDIDATE_STATE,
            0xc1,
            json!({
                "id": id(0xc1),
                "bond": "100",
                "topDelegations": [
                    { "owner": id(0xd1), "amount": "30" },
                    { "owner": id(0xd2), "amount": "20" }
                ],
                "bottomDelegations": [],
            }),
        )
        .entry(
            storage::DELEGATOR_STATE,
            0xd1,
            json!({ "delegations": [{ "owner": id(0xc1), "amount": "30" }], "total": "30" }),
        )
        .entry(
            storage::DELEGATOR_STATE,
            0xd2,
            json!({ "delegations": [{ "owner": id(0xc1), "amount": "20" }], "total": "20" }),
        );

    let archive = archive(&[legacy_runtime()], vec![block]);
    common::service(archive, &test_db, common::config(1000, 1000, 100)).run().await.unwrap();
    let db = &test_db.db;

    let collator_id = format!("50-{}", id(0xc1));
    let collators = db.find_round_collators(&[collator_id.clone()]).await.unwrap();
    assert_eq!(collators[&collator_id].own_bond, 100);
    assert_eq!(collators[&collator_id].total_bond, 150);
    assert_eq!(collators[&collator_id].nominators_count, 2);

    let nominators = db
        .find_round_nominators(&[format!("50-{}", id(0xd1)), format!("50-{}", id(0xd2))])
        .await
        .unwrap();
    assert_eq!(nominators.len(), 2);
}

#[tokio::test]
#[traced_test]
async fn test_missing_candidate_state_aborts_batch() {
    let test_db = common::setup_test_db().await;
    let block = BlockFixture::new(1000, 50)
        .new_round(50, &[Candidate::new(0xc1, 100)])
        .value(storage::SELECTED_CANDIDATES, json!([id(0xc1), id(0xc2)]));

    let archive = archive(&[runtime()], vec![block]);
    let err = common::service(archive, &test_db, common::config(1000, 1000, 100))
        .run()
        .await
        .unwrap_err();

    match err.downcast_ref::<StakingError>() {
        Some(StakingError::MissingState { block, .. }) => assert_eq!(*block, 1000),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(test_db.db.find_rounds_from(0).await.unwrap().is_empty());
    assert_eq!(test_db.db.get_last_processed_block().await.unwrap(), None);
}
