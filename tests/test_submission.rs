use std::time::Duration;

use alloy::primitives::U256;
use did_registry_mock::REGISTRY_ADDRESS;
use did_registry_sdk::{
    ConnectionError, DidRegistryClient, Endpoint, Error, GasSettings, Nonce, PrivateKey,
    SubmissionError,
};
use did_registry_test_utils::{
    REGISTRY_ABI, TEST_DID, TEST_HASH, TEST_URI, create_test_registry, init_logger, test_gas,
    test_key,
};
use serial_test::serial;
use url::Url;

/// A valid key that is never funded on the mock chain
const UNFUNDED_PRIVATE_KEY: &str =
    "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

#[tokio::test]
#[serial]
async fn test_resubmitting_the_same_envelope() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let client = did_registry_test_utils::client_for(&server, None)?;
    let submitter = client.submitter();
    let key = test_key();
    server.hold_transactions_for(Duration::from_secs(60)).await;

    let input = registry
        .descriptor()
        .encode_str("createDID", &[TEST_DID, TEST_HASH, TEST_URI])?;
    let envelope = submitter
        .prepare(key.address(), REGISTRY_ADDRESS, input, &test_gas())
        .await?
        .sign(&key.credential()?)
        .await?;

    let first = submitter.submit(&envelope).await?;
    assert_eq!(first.tx_hash, envelope.hash);
    assert_eq!(first.nonce, 0);

    // The node already holds the transaction: same submission, no error.
    let second = submitter.submit(&envelope).await?;
    assert_eq!(second, first);

    server.hold_transactions_for(Duration::ZERO).await;
    registry.wait_for_confirmation(&first, None).await?;

    // Once included, the nonce of the envelope is spent.
    let err = submitter.submit(&envelope).await.unwrap_err();
    assert!(matches!(err, Error::Submission(SubmissionError::NonceTooLow(_))));
    assert!(err.is_retryable());

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_explicit_nonces_and_replacement() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let key = test_key();
    server.hold_transactions_for(Duration::from_secs(60)).await;

    let pending = registry
        .create_did(&key, &test_gas(), TEST_DID, TEST_HASH, "first")
        .await?;
    assert_eq!(pending.nonce, 0);

    // Reusing a pending nonce must be explicit.
    let err = registry
        .create_did(
            &key,
            &test_gas().with_nonce(Nonce::Explicit(0)),
            TEST_DID,
            TEST_HASH,
            "second",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Submission(SubmissionError::NonceConflict(_))));

    let err = registry
        .create_did(
            &key,
            &test_gas().with_nonce(Nonce::Explicit(5)),
            TEST_DID,
            TEST_HASH,
            "gap",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Submission(SubmissionError::NonceTooHigh(_))));

    // A replacement at the same price is refused by the node.
    let err = registry
        .create_did(
            &key,
            &test_gas().with_nonce(Nonce::Replace(0)),
            TEST_DID,
            TEST_HASH,
            "cheap",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Submission(SubmissionError::NonceConflict(_))));

    let gas = test_gas();
    let replacement = registry
        .create_did(
            &key,
            &GasSettings::new(gas.gas_price * 2, gas.gas_limit).with_nonce(Nonce::Replace(0)),
            TEST_DID,
            TEST_HASH,
            "replaced",
        )
        .await?;
    assert_eq!(replacement.nonce, 0);
    assert_ne!(replacement.tx_hash, pending.tx_hash);

    server.hold_transactions_for(Duration::ZERO).await;
    registry.wait_for_confirmation(&replacement, None).await?;
    assert_eq!(registry.get_uri(TEST_DID).await?, "replaced");
    assert!(
        registry
            .query()
            .connector()
            .transaction_receipt(pending.tx_hash)
            .await?
            .is_none()
    );

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_concurrent_calls_from_one_signer() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let key = test_key();
    let gas = test_gas();
    server.hold_transactions_for(Duration::from_secs(60)).await;

    // Different prices, so a shared nonce would turn into a silent replacement.
    let submissions = futures::future::try_join_all((0..4u128).map(|i| {
        let (registry, key) = (&registry, &key);
        let gas = GasSettings::new(gas.gas_price * (i + 1), gas.gas_limit);
        async move {
            let did = format!("did:io:0xC{i}");
            registry
                .create_did(key, &gas, &did, TEST_HASH, &format!("uri-{i}"))
                .await
        }
    }))
    .await?;
    let mut nonces: Vec<_> = submissions.iter().map(|s| s.nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1, 2, 3]);

    server.hold_transactions_for(Duration::ZERO).await;
    for submission in &submissions {
        assert!(registry.wait_for_confirmation(submission, None).await?.success);
    }
    for i in 0..4 {
        assert_eq!(registry.get_uri(&format!("did:io:0xC{i}")).await?, format!("uri-{i}"));
    }

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_unfunded_signer() -> anyhow::Result<()> {
    init_logger(false);
    let (server, registry) = create_test_registry().await?;
    let key = PrivateKey::parse(UNFUNDED_PRIVATE_KEY)?;

    let err = registry
        .create_did(&key, &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Submission(SubmissionError::InsufficientFunds(_))));
    assert!(!err.is_retryable());

    // Enough for the gas of exactly one call.
    let gas = test_gas();
    server
        .fund(key.address(), U256::from(gas.gas_price * u128::from(gas.gas_limit)))
        .await;
    let submission = registry
        .create_did(&key, &gas, TEST_DID, TEST_HASH, TEST_URI)
        .await?;
    registry.wait_for_confirmation(&submission, None).await?;
    assert_eq!(registry.get_uri(TEST_DID).await?, TEST_URI);

    server.stop().await
}

#[tokio::test]
#[serial]
async fn test_invalid_gas_and_keys() -> anyhow::Result<()> {
    init_logger(false);

    assert!(matches!(
        GasSettings::parse("lots", 1_000_000),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        GasSettings::parse("1000000000000", 0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(PrivateKey::parse("0x1234"), Err(Error::Key(_))));
    assert!(matches!(PrivateKey::parse("not a key"), Err(Error::Key(_))));

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_unreachable_endpoint() -> anyhow::Result<()> {
    init_logger(false);
    let client = DidRegistryClient::builder()
        .endpoint(Endpoint::insecure(Url::parse("http://127.0.0.1:1")?))
        .build()?;
    // Binding a registry needs no network access.
    let registry = client.registry(REGISTRY_ADDRESS, REGISTRY_ABI)?;

    let err = registry.get_hash(TEST_DID).await.unwrap_err();
    assert!(matches!(err, Error::Connection(ConnectionError::Unreachable(_))), "{err}");
    assert!(err.is_retryable());

    let err = registry
        .create_did(&test_key(), &test_gas(), TEST_DID, TEST_HASH, TEST_URI)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "{err}");

    Ok(())
}

#[tokio::test]
#[serial]
async fn test_insecure_endpoint_is_refused() -> anyhow::Result<()> {
    init_logger(false);

    assert!(matches!(
        Endpoint::parse("http://127.0.0.1:8545"),
        Err(Error::InvalidArgument(_))
    ));
    let endpoint = Endpoint::parse("https://babel-api.testnet.iotex.io")?;
    assert!(endpoint.is_secure());

    Ok(())
}
