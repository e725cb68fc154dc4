//! BDD scenarios for provisioning and removal.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisionContextResult, provision_context_result};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Provision a machine from an image on the server"
)]
fn scenario_local_image(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Fall back to the public image server"
)]
fn scenario_remote_image(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reject an unsupported network type"
)]
fn scenario_unsupported_network(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Give up when the guest never reports an address"
)]
fn scenario_address_timeout(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Remove a machine whose forced stop fails"
)]
fn scenario_remove_after_failed_kill(provision_context_result: ProvisionContextResult) {
    drop(provision_context_result);
}
