mod common;

use common::{days, draft, t0, TestApp, MONTHLY_PRODUCT_ID, TEST_USER_ID, WEEKLY_PRODUCT_ID};
use chrono::Duration;
use entitlement_service::models::TransactionStatus;
use entitlement_service::services::{PaymentConfirmation, TransactionRepository};
use entitlement_service::EntitlementError;

fn paid() -> PaymentConfirmation {
    PaymentConfirmation {
        payment_status: "paid".to_string(),
        amount_total: Some(4900),
        currency: Some("usd".to_string()),
        customer_email: Some("trader@example.com".to_string()),
    }
}

#[tokio::test]
async fn paid_transition_derives_end_date() {
    let app = TestApp::spawn().await;

    let created = app
        .state
        .transactions
        .create_transaction(draft("cs_a", MONTHLY_PRODUCT_ID), t0())
        .await
        .expect("Failed to create transaction");
    assert_eq!(created.status, TransactionStatus::Pending);
    assert_eq!(created.access_period_days, 30);
    assert_eq!(created.access_end_date, None);

    let outcome = app
        .state
        .transactions
        .confirm_payment("cs_a", paid(), t0())
        .await
        .expect("Failed to confirm payment");

    let stored = app
        .store
        .find_transaction_by_id(&created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Paid);
    assert_eq!(stored.access_start_date, Some(t0()));
    assert_eq!(stored.access_end_date, Some(t0() + days(30)));
    assert_eq!(outcome.transaction, stored);
}

#[tokio::test]
async fn lapsed_access_is_expired_in_store() {
    let app = TestApp::spawn().await;
    let created = app
        .state
        .transactions
        .create_transaction(draft("cs_b", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    app.state
        .transactions
        .confirm_payment("cs_b", paid(), t0())
        .await
        .unwrap();

    let now = t0() + days(31);
    let transaction = app
        .store
        .find_transaction_by_id(&created.id)
        .await
        .unwrap()
        .unwrap();

    let decision = app
        .state
        .evaluator
        .check_access(transaction, now, true)
        .await
        .unwrap();

    assert!(!decision.has_access);
    assert_eq!(decision.transaction.status, TransactionStatus::Expired);
    let stored = app
        .store
        .find_transaction_by_id(&created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Expired);
}

#[tokio::test]
async fn check_without_persist_leaves_store_untouched() {
    let app = TestApp::spawn().await;
    let created = app
        .state
        .transactions
        .create_transaction(draft("cs_np", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    let paid_tx = app
        .state
        .transactions
        .confirm_payment("cs_np", paid(), t0())
        .await
        .unwrap()
        .transaction;

    let end = paid_tx.access_end_date.unwrap();
    let decision = app
        .state
        .evaluator
        .check_access(paid_tx, end + Duration::seconds(1), false)
        .await
        .unwrap();

    assert!(!decision.has_access);
    assert_eq!(decision.transaction.status, TransactionStatus::Expired);
    let stored = app
        .store
        .find_transaction_by_id(&created.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Paid);
}

#[tokio::test]
async fn access_one_second_before_end_keeps_paid_status() {
    let app = TestApp::spawn().await;
    app.state
        .transactions
        .create_transaction(draft("cs_live", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    let tx = app
        .state
        .transactions
        .confirm_payment("cs_live", paid(), t0())
        .await
        .unwrap()
        .transaction;

    let now = tx.access_end_date.unwrap() - Duration::seconds(1);
    let decision = app
        .state
        .evaluator
        .check_access(tx.clone(), now, true)
        .await
        .unwrap();

    assert!(decision.has_access);
    assert_eq!(decision.transaction.status, TransactionStatus::Paid);
    let stored = app.store.find_transaction_by_id(&tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Paid);
}

#[tokio::test]
async fn concurrent_checks_converge_on_expired() {
    let app = TestApp::spawn().await;
    app.state
        .transactions
        .create_transaction(draft("cs_c", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    let tx = app
        .state
        .transactions
        .confirm_payment("cs_c", paid(), t0())
        .await
        .unwrap()
        .transaction;

    let now = t0() + days(45);
    let evaluator = app.state.evaluator.clone();
    let first = tokio::spawn({
        let evaluator = evaluator.clone();
        let tx = tx.clone();
        async move { evaluator.check_access(tx, now, true).await }
    });
    let second = tokio::spawn({
        let tx = tx.clone();
        async move { evaluator.check_access(tx, now, true).await }
    });

    let first = first.await.unwrap().expect("first check failed");
    let second = second.await.unwrap().expect("second check failed");

    assert!(!first.has_access);
    assert!(!second.has_access);
    let stored = app.store.find_transaction_by_id(&tx.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Expired);
}

#[tokio::test]
async fn expiring_a_vanished_transaction_is_not_found() {
    let app = TestApp::spawn().await;
    let mut tx = draft("cs_ghost", MONTHLY_PRODUCT_ID).into_transaction(
        None,
        app.state.transactions.defaults(),
        t0(),
    );
    tx.mark_paid(t0()).unwrap();

    let err = app
        .state
        .evaluator
        .check_access(tx, t0() + days(60), true)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn store_failure_during_lazy_expiry_propagates() {
    let app = TestApp::spawn().await;
    app.state
        .transactions
        .create_transaction(draft("cs_down", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    let tx = app
        .state
        .transactions
        .confirm_payment("cs_down", paid(), t0())
        .await
        .unwrap()
        .transaction;

    app.store.set_unavailable(true);
    let err = app
        .state
        .evaluator
        .check_access(tx, t0() + days(31), true)
        .await
        .unwrap_err();
    assert!(matches!(err, EntitlementError::Store(_)));
}

#[tokio::test]
async fn sweep_is_idempotent() {
    let app = TestApp::spawn().await;
    for session in ["cs_s1", "cs_s2", "cs_s3"] {
        app.state
            .transactions
            .create_transaction(draft(session, WEEKLY_PRODUCT_ID), t0())
            .await
            .unwrap();
        app.state
            .transactions
            .confirm_payment(session, paid(), t0())
            .await
            .unwrap();
    }
    // Still inside its window at the sweep instant
    app.state
        .transactions
        .create_transaction(draft("cs_fresh", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    app.state
        .transactions
        .confirm_payment("cs_fresh", paid(), t0())
        .await
        .unwrap();

    let now = t0() + days(8);
    assert_eq!(
        app.state.evaluator.expire_overdue_transactions(now).await.unwrap(),
        3
    );
    assert_eq!(
        app.state.evaluator.expire_overdue_transactions(now).await.unwrap(),
        0
    );

    let fresh = app
        .store
        .find_transaction_by_session_id("cs_fresh")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.status, TransactionStatus::Paid);
}

#[tokio::test]
async fn sweep_and_lazy_check_race_is_safe() {
    let app = TestApp::spawn().await;
    app.state
        .transactions
        .create_transaction(draft("cs_race", WEEKLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    let tx = app
        .state
        .transactions
        .confirm_payment("cs_race", paid(), t0())
        .await
        .unwrap()
        .transaction;

    let now = t0() + days(10);
    let swept = app.state.evaluator.expire_overdue_transactions(now).await.unwrap();
    assert_eq!(swept, 1);

    // The caller still holds the stale paid copy
    let decision = app
        .state
        .evaluator
        .check_access(tx.clone(), now, true)
        .await
        .unwrap();
    assert!(!decision.has_access);
    assert_eq!(decision.transaction.status, TransactionStatus::Expired);
}

#[tokio::test]
async fn lazy_check_after_sweep_leaves_expired_record_untouched() {
    let app = TestApp::spawn().await;
    app.state
        .transactions
        .create_transaction(draft("cs_swept", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    let stale = app
        .state
        .transactions
        .confirm_payment("cs_swept", paid(), t0())
        .await
        .unwrap()
        .transaction;

    let swept_at = t0() + days(31);
    assert_eq!(
        app.state
            .evaluator
            .expire_overdue_transactions(swept_at)
            .await
            .unwrap(),
        1
    );
    let after_sweep = app
        .store
        .find_transaction_by_id(&stale.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after_sweep.updated_at, swept_at);

    let decision = app
        .state
        .evaluator
        .check_access(stale.clone(), t0() + days(36), true)
        .await
        .unwrap();

    assert!(!decision.has_access);
    assert!(decision.lapsed);
    assert_eq!(decision.transaction, after_sweep);
    let stored = app
        .store
        .find_transaction_by_id(&stale.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, after_sweep);
}

#[tokio::test]
async fn repeated_lazy_checks_write_once() {
    let app = TestApp::spawn().await;
    app.state
        .transactions
        .create_transaction(draft("cs_twice_lazy", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();
    let stale = app
        .state
        .transactions
        .confirm_payment("cs_twice_lazy", paid(), t0())
        .await
        .unwrap()
        .transaction;

    let first_at = t0() + days(31);
    let first = app
        .state
        .evaluator
        .check_access(stale.clone(), first_at, true)
        .await
        .unwrap();
    assert_eq!(first.transaction.updated_at, first_at);

    let second = app
        .state
        .evaluator
        .check_access(stale, first_at + days(2), true)
        .await
        .unwrap();
    assert_eq!(second.transaction.updated_at, first_at);
    assert_eq!(second.transaction.status, TransactionStatus::Expired);
}

#[tokio::test]
async fn user_summary_reports_latest_active_window() {
    let app = TestApp::spawn().await;
    for (session, product) in [("cs_w", WEEKLY_PRODUCT_ID), ("cs_m", MONTHLY_PRODUCT_ID)] {
        app.state
            .transactions
            .create_transaction(draft(session, product), t0())
            .await
            .unwrap();
        app.state
            .transactions
            .confirm_payment(session, paid(), t0())
            .await
            .unwrap();
    }

    let summary = app
        .state
        .evaluator
        .check_user_access(TEST_USER_ID, t0() + days(10), true)
        .await
        .unwrap();

    assert!(summary.has_access);
    assert_eq!(summary.product_id.as_deref(), Some(MONTHLY_PRODUCT_ID));
    assert_eq!(summary.product_name.as_deref(), Some("Signals Monthly"));
    assert_eq!(summary.access_end_date, Some(t0() + days(30)));
    assert_eq!(summary.remaining_days, 20);
    assert_eq!(summary.expired_transactions, 1);

    let weekly = app
        .store
        .find_transaction_by_session_id("cs_w")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(weekly.status, TransactionStatus::Expired);
}

#[tokio::test]
async fn user_without_paid_transactions_has_no_access() {
    let app = TestApp::spawn().await;
    app.state
        .transactions
        .create_transaction(draft("cs_pending", MONTHLY_PRODUCT_ID), t0())
        .await
        .unwrap();

    let summary = app
        .state
        .evaluator
        .check_user_access(TEST_USER_ID, t0(), true)
        .await
        .unwrap();

    assert!(!summary.has_access);
    assert_eq!(summary.remaining_days, 0);
    assert_eq!(summary.transaction_id, None);
}

#[tokio::test]
async fn user_access_check_fails_closed_when_store_is_down() {
    let app = TestApp::spawn().await;
    app.store.set_unavailable(true);

    let result = app
        .state
        .evaluator
        .check_user_access(TEST_USER_ID, t0(), true)
        .await;
    assert!(matches!(result, Err(EntitlementError::Store(_))));
}
