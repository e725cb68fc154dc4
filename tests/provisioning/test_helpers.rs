//! Shared fixtures for provisioning BDD scenarios.

use std::net::IpAddr;

use incus_machine::incus::api::{InstanceState, StatusCode};
use incus_machine::test_support::{FakeCloud, FakeKeys};
use incus_machine::{DriverSettings, IncusDriverError, PollSettings};
use rstest::fixture;
use thiserror::Error;

use crate::test_constants::{TEST_CERT_PEM, TEST_ENDPOINT, TEST_IMAGE, TEST_KEY_PEM};

pub const MACHINE: &str = "bdd-vm";
pub const KEY_PATH: &str = "/store/machines/bdd-vm/id_rsa";
pub const PUBLIC_KEY: &str = "ssh-rsa AAAAB3NzaBDD bdd-vm";

#[derive(Clone, Debug)]
pub struct ProvisionContext {
    pub cloud: FakeCloud,
    pub keys: FakeKeys,
    pub settings: DriverSettings,
    pub outcome: Option<ProvisionResult>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FailureKind {
    Network,
    Timeout,
    Other,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<IncusDriverError> for ProvisionFailure {
    fn from(err: IncusDriverError) -> Self {
        let kind = match err {
            IncusDriverError::UnsupportedNetworkType { .. } => FailureKind::Network,
            IncusDriverError::AddressTimeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Other,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum ProvisionResult {
    Created(IpAddr),
    Removed,
    Failure(ProvisionFailure),
}

#[derive(Clone, Debug, Error)]
pub enum ProvisionTestError {
    #[error("invalid provisioning fixture: {0}")]
    Fixture(String),
}

pub type ProvisionContextResult = Result<ProvisionContext, ProvisionTestError>;

#[fixture]
pub fn provision_context_result() -> ProvisionContextResult {
    build_provision_context()
}

#[fixture]
pub fn provision_context(provision_context_result: ProvisionContextResult) -> ProvisionContext {
    provision_context_result
        .unwrap_or_else(|err| panic!("provision context fixture should initialise: {err}"))
}

pub fn running_at(address: &str) -> InstanceState {
    InstanceState::new(StatusCode::Running).with_address("enp5s0", "inet", address, "global")
}

pub fn booting() -> InstanceState {
    InstanceState::new(StatusCode::Running).with_address("lo", "inet", "127.0.0.1", "local")
}

fn build_provision_context() -> ProvisionContextResult {
    let settings = DriverSettings {
        url: TEST_ENDPOINT.to_owned(),
        tls_client_cert: TEST_CERT_PEM.to_owned(),
        tls_client_key: TEST_KEY_PEM.to_owned(),
        image_name: TEST_IMAGE.to_owned(),
        ip_poll: PollSettings {
            interval_secs: 5,
            attempts: 10,
        },
        ..DriverSettings::default()
    };
    settings
        .validate()
        .map_err(|err| ProvisionTestError::Fixture(err.to_string()))?;

    Ok(ProvisionContext {
        cloud: FakeCloud::new(),
        keys: FakeKeys::new(PUBLIC_KEY),
        settings,
        outcome: None,
    })
}
