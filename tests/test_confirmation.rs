use std::time::Duration;

use did_registry_mock::REGISTRY_ADDRESS;
use did_registry_mock::controller::{CallOverride, CallResponse};
use did_registry_sdk::{CancellationToken, ClientConfig, Error, PollState, PollerConfig};
use did_registry_test_utils::{
    REGISTRY_ABI, TEST_DID, TEST_HASH, TEST_URI, client_for, create_test_registry, fast_poller,
    init_logger, other_key, test_gas, test_key,
};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_timeout_leaves_outcome_unknown() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let impatient = client_for(
        &server,
        Some(ClientConfig {
            poller: PollerConfig {
                timeout: Duration::from_millis(600),
                ..fast_poller()
            },
            ..Default::default()
        }),
    )?
    .registry(REGISTRY_ADDRESS, REGISTRY_ABI)?;
    server.hold_transactions_for(Duration::from_secs(60)).await;

    let submission = impatient
        .create_did(&test_key(), &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await?;
    let err = impatient
        .wait_for_confirmation(&submission, None)
        .await
        .unwrap_err();
    match &err {
        Error::Timeout { tx_hash, elapsed } => {
            assert_eq!(*tx_hash, submission.tx_hash);
            assert!(Duration::from(*elapsed) >= Duration::from_millis(500), "{elapsed}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());

    // The transaction was never lost: waiting again once blocks resume succeeds.
    server.hold_transactions_for(Duration::ZERO).await;
    let receipt = registry.wait_for_confirmation(&submission, None).await?;
    assert!(receipt.success);
    assert_eq!(registry.get_uri(TEST_DID).await?, TEST_URI);

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_attempt_limit_ends_the_wait_before_timeout() -> anyhow::Result<()> {
    init_logger(false);
    let (server, _) = create_test_registry().await?;
    let limited = client_for(
        &server,
        Some(ClientConfig {
            poller: PollerConfig {
                max_attempts: 2,
                timeout: Duration::from_secs(30),
                ..fast_poller()
            },
            ..Default::default()
        }),
    )?
    .registry(REGISTRY_ADDRESS, REGISTRY_ABI)?;
    server.hold_transactions_for(Duration::from_secs(60)).await;

    let submission = limited
        .create_did(&test_key(), &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await?;
    match limited.watch(&submission, &CancellationToken::new()).await? {
        PollState::TimedOut { attempts, elapsed } => {
            assert_eq!(attempts, 2);
            assert!(elapsed < Duration::from_secs(30), "{elapsed:?}");
        }
        other => panic!("unexpected state: {other:?}"),
    }

    let err = limited
        .wait_for_confirmation(&submission, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { tx_hash, .. } if tx_hash == submission.tx_hash));

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_cancelled_wait() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    server.hold_transactions_for(Duration::from_secs(60)).await;

    let submission = registry
        .create_did(&test_key(), &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await?;

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            log::info!("Cancelling confirmation wait");
            cancel.cancel();
        })
    };
    let err = registry
        .wait_for_confirmation(&submission, Some(&cancel))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled(hash) if hash == submission.tx_hash));
    canceller.await?;

    // An already cancelled token ends the wait right away.
    assert_eq!(registry.watch(&submission, &cancel).await?, PollState::Cancelled);

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_indexing_in_progress_is_retried() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let mut callback = server.controller().override_rpc(
        "eth_getTransactionReceipt",
        CallOverride::NTimes {
            response: CallResponse::Error("transaction indexing is in progress".to_string()),
            n: 3,
        },
    );

    let submission = registry
        .create_did(&test_key(), &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await?;
    let receipt = registry.wait_for_confirmation(&submission, None).await?;
    assert!(receipt.success);
    callback.triggered(Duration::from_secs(1)).await?;

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_receipt_lookup_failure_ends_the_wait() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let submission = registry
        .create_did(&test_key(), &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await?;

    let _callback = server.controller().override_rpc(
        "eth_getTransactionReceipt",
        CallOverride::Always(CallResponse::Error("receipt storage corrupted".to_string())),
    );
    let err = registry
        .wait_for_confirmation(&submission, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Rpc { ref message, .. } if message.contains("corrupted")));

    server.controller().clear();
    registry.wait_for_confirmation(&submission, None).await?;

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_reverted_transaction_is_reported() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let submission = registry
        .create_did(&test_key(), &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await?;
    registry.wait_for_confirmation(&submission, None).await?;

    // Without pre-flight checks the doomed call reaches the chain.
    let unchecked = client_for(
        &server,
        Some(ClientConfig {
            poller: fast_poller(),
            preflight_checks: false,
            simulate_calls: false,
            ..Default::default()
        }),
    )?
    .registry(REGISTRY_ADDRESS, REGISTRY_ABI)?;
    let submission = unchecked
        .update_uri(&other_key(), &test_gas(), TEST_DID, "stolen")
        .await?;

    match unchecked.watch(&submission, &CancellationToken::new()).await? {
        PollState::Reverted(receipt) => {
            assert!(!receipt.success);
            assert!(receipt.block_number.is_some());
            assert!(receipt.events.is_empty());
        }
        other => panic!("unexpected state: {other:?}"),
    }
    let err = unchecked
        .wait_for_confirmation(&submission, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Reverted(_)));
    assert_eq!(registry.get_uri(TEST_DID).await?, TEST_URI);

    server.stop().await
}
