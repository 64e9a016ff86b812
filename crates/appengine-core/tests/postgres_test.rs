// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL persistence tests.
//!
//! Run with:
//! ```bash
//! TEST_DATABASE_URL=postgres://... cargo test -p appengine-core --test postgres_test
//! ```

mod common;

use common::*;
use serde_json::json;

use appengine_core::provisioning::{ProvisionRequest, provision_many};
use appengine_core::reconciliation::reconcile_outputs;
use appengine_core::run_handlers::retrieve_run_outputs;
use appengine_core::state_machine::TaskRunState;

#[tokio::test]
async fn test_postgres_sum_run() {
    skip_if_no_db!();
    let ctx = TestContext::postgres()
        .await
        .expect("Failed to connect to TEST_DATABASE_URL");

    let run = ctx.run_of(SUM_DESCRIPTOR).await;
    ctx.provision(&run.run_id, "a", json!(250)).await;
    ctx.provision(&run.run_id, "b", json!(250)).await;
    assert_eq!(ctx.run_state(&run.run_id).await, TaskRunState::Provisioned);

    assert_eq!(ctx.start(&run.run_id).await, TaskRunState::Queuing);
    assert_eq!(ctx.run_state(&run.run_id).await, TaskRunState::Queued);

    reconcile_outputs(ctx.state(), &run.run_id, &run.secret, &zip(&[("sum", "500")]))
        .await
        .unwrap();
    assert_eq!(ctx.run_state(&run.run_id).await, TaskRunState::Finished);

    let outputs = retrieve_run_outputs(ctx.state(), &run.run_id).await.unwrap();
    assert_eq!(outputs[0].value, json!(500));
}

#[tokio::test]
async fn test_postgres_batch_atomicity() {
    skip_if_no_db!();
    let ctx = TestContext::postgres()
        .await
        .expect("Failed to connect to TEST_DATABASE_URL");

    let run = ctx.run_of(SUM_DESCRIPTOR).await;
    let err = provision_many(
        ctx.state(),
        &run.run_id,
        &[
            ProvisionRequest::new("a", json!(1)),
            ProvisionRequest::new("b", json!("not a number")),
        ],
    )
    .await
    .unwrap_err();
    assert_eq!(err.error_code(), "BATCH_ERROR");
    assert_eq!(ctx.run_state(&run.run_id).await, TaskRunState::Created);
}

#[tokio::test]
async fn test_postgres_unknown_output_fails_run() {
    skip_if_no_db!();
    let ctx = TestContext::postgres()
        .await
        .expect("Failed to connect to TEST_DATABASE_URL");

    let run = ctx.run_of(SUM_DESCRIPTOR).await;
    ctx.provision(&run.run_id, "a", json!(1)).await;
    ctx.provision(&run.run_id, "b", json!(2)).await;
    ctx.start(&run.run_id).await;

    let err = reconcile_outputs(ctx.state(), &run.run_id, &run.secret, &zip(&[("total", "3")]))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "UNKNOWN_OUTPUT");
    assert_eq!(ctx.run_state(&run.run_id).await, TaskRunState::Failed);
}
