//! BDD step definitions for provisioning and removal.

use incus_machine::incus::client::ClientError;
use incus_machine::test_support::FakeCall;
use incus_machine::{IMAGE_SERVER, IncusDriver, MachineDriver};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::{Builder, Runtime};

use super::test_helpers::{
    FailureKind, KEY_PATH, MACHINE, ProvisionContext, ProvisionResult, ProvisionTestError,
    booting, running_at,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Setup(#[from] ProvisionTestError),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn paused_runtime() -> Result<Runtime, StepError> {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .map_err(|err| StepError::Assertion(format!("runtime: {err}")))
}

#[given("a server offering image \"{alias}\"")]
fn server_offering_image(mut provision_context: ProvisionContext, alias: String) -> ProvisionContext {
    provision_context.cloud = provision_context.cloud.clone().with_local_alias(&alias);
    provision_context
}

#[given("a server without local images")]
fn server_without_images(provision_context: ProvisionContext) -> ProvisionContext {
    provision_context
}

#[given("the public image server offers \"{alias}\"")]
fn public_server_offers(mut provision_context: ProvisionContext, alias: String) -> ProvisionContext {
    provision_context.cloud = provision_context.cloud.clone().with_remote_alias(&alias);
    provision_context
}

#[given("the machine uses network \"{name}\" of type \"{network_type}\"")]
fn machine_uses_network(
    mut provision_context: ProvisionContext,
    name: String,
    network_type: String,
) -> ProvisionContext {
    provision_context.cloud = provision_context
        .cloud
        .clone()
        .with_network(&name, &network_type);
    provision_context.settings.network_name = name;
    provision_context
}

#[given("the instance reports address \"{address}\"")]
fn instance_reports_address(provision_context: ProvisionContext, address: String) -> ProvisionContext {
    provision_context.cloud.push_state(booting());
    provision_context.cloud.push_state(running_at(&address));
    provision_context
}

#[given("the instance never reports an address")]
fn instance_never_reports(provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.cloud.set_fallback_state(booting());
    provision_context
}

#[given("address polling is limited to \"{attempts}\" attempts")]
fn polling_limited(mut provision_context: ProvisionContext, attempts: u32) -> ProvisionContext {
    provision_context.settings.ip_poll.attempts = attempts;
    provision_context
}

#[given("forcing the instance off fails")]
fn forced_stop_fails(mut provision_context: ProvisionContext) -> ProvisionContext {
    provision_context.cloud = provision_context.cloud.clone().failing(
        FakeCall::UpdateState {
            action: String::from("stop"),
            force: true,
        },
        ClientError::Api {
            code: 400,
            message: String::from("instance is not running"),
        },
    );
    provision_context
}

#[when("I provision the machine")]
fn provision_machine(provision_context: ProvisionContext) -> Result<ProvisionContext, StepError> {
    let runtime = paused_runtime()?;
    let mut driver = IncusDriver::with_parts(
        provision_context.cloud.connector(),
        provision_context.keys.clone(),
        MACHINE,
        KEY_PATH,
        provision_context.settings.clone(),
    );

    let result = runtime.block_on(async {
        driver.pre_create_check().await?;
        driver.create().await
    });
    let outcome = match result {
        Ok(address) => ProvisionResult::Created(address),
        Err(err) => ProvisionResult::Failure(err.into()),
    };

    Ok(ProvisionContext {
        outcome: Some(outcome),
        ..provision_context
    })
}

#[when("I remove the machine")]
fn remove_machine(provision_context: ProvisionContext) -> Result<ProvisionContext, StepError> {
    let runtime = paused_runtime()?;
    let mut driver = IncusDriver::with_parts(
        provision_context.cloud.connector(),
        provision_context.keys.clone(),
        MACHINE,
        KEY_PATH,
        provision_context.settings.clone(),
    );

    let outcome = match runtime.block_on(driver.remove()) {
        Ok(()) => ProvisionResult::Removed,
        Err(err) => ProvisionResult::Failure(err.into()),
    };

    Ok(ProvisionContext {
        outcome: Some(outcome),
        ..provision_context
    })
}

#[then("provisioning succeeds with address \"{address}\"")]
fn provisioning_succeeds(
    provision_context: &ProvisionContext,
    address: String,
) -> Result<(), StepError> {
    match provision_context.outcome {
        Some(ProvisionResult::Created(actual)) if actual.to_string() == address => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected address {address}, got {other:?}"
        ))),
    }
}

#[then("removal succeeds")]
fn removal_succeeds(provision_context: &ProvisionContext) -> Result<(), StepError> {
    match provision_context.outcome {
        Some(ProvisionResult::Removed) => Ok(()),
        ref other => Err(StepError::Assertion(format!(
            "expected removal, got {other:?}"
        ))),
    }
}

#[then("the provisioning error kind is \"{kind}\"")]
fn provisioning_error_kind(
    provision_context: &ProvisionContext,
    kind: String,
) -> Result<(), StepError> {
    let expected = parse_failure_kind(&kind)?;
    let Some(ProvisionResult::Failure(failure)) = &provision_context.outcome else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    if failure.kind == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure kind {expected:?}, got {:?}: {}",
            failure.kind, failure.message
        )))
    }
}

#[then("the image server is not consulted")]
fn image_server_not_consulted(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let calls = provision_context.cloud.calls();
    if calls.iter().any(|call| call.starts_with("index_connect")) {
        Err(StepError::Assertion(format!(
            "image server should not be consulted: {calls:?}"
        )))
    } else {
        Ok(())
    }
}

#[then("the image is fetched from the public image server")]
fn image_fetched_remotely(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let created = provision_context.cloud.created();
    let request = created
        .first()
        .ok_or_else(|| StepError::Assertion(String::from("no instance was created")))?;
    if request.source.server.as_deref() == Some(IMAGE_SERVER) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected image from {IMAGE_SERVER}, got {:?}",
            request.source
        )))
    }
}

#[then("no instance is created")]
fn no_instance_created(provision_context: &ProvisionContext) -> Result<(), StepError> {
    if provision_context.cloud.created().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(String::from(
            "instance should not be created",
        )))
    }
}

#[then("the instance state was queried \"{count}\" times")]
fn state_queried(provision_context: &ProvisionContext, count: u32) -> Result<(), StepError> {
    let queries = provision_context.cloud.state_queries();
    if queries == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} state queries, got {queries}"
        )))
    }
}

#[then("the instance is deleted")]
fn instance_deleted(provision_context: &ProvisionContext) -> Result<(), StepError> {
    let calls = provision_context.cloud.calls();
    if calls.iter().any(|call| call == &format!("delete_instance {MACHINE}")) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "instance should be deleted: {calls:?}"
        )))
    }
}

fn parse_failure_kind(kind: &str) -> Result<FailureKind, StepError> {
    match kind {
        "network" => Ok(FailureKind::Network),
        "timeout" => Ok(FailureKind::Timeout),
        "other" => Ok(FailureKind::Other),
        other => Err(StepError::Assertion(format!(
            "unknown failure kind: {other}"
        ))),
    }
}
