//! Pre-create resolution.

use rstest::rstest;

use super::{ENDPOINT, driver, driver_with, settings};
use crate::config::ConfigError;
use crate::driver::MachineDriver;
use crate::incus::client::ClientError;
use crate::incus::types::{Device, InstanceSource, ResourceLimits};
use crate::incus::{IMAGE_SERVER, IncusDriverError};
use crate::test_support::{FakeCall, FakeCloud};

#[tokio::test]
async fn resolves_local_image_bridge_and_pool() {
    let cloud = FakeCloud::new().with_local_alias("debian/12");
    let mut machine = driver(&cloud);

    machine
        .pre_create_check()
        .await
        .unwrap_or_else(|err| panic!("pre-create check: {err}"));

    let resolved = machine
        .resolved()
        .unwrap_or_else(|| panic!("resources should be resolved"));
    assert_eq!(resolved.source(), &InstanceSource::local("debian/12"));
    assert_eq!(
        resolved.nic(),
        &Device::BridgedNic {
            network: String::from("incusbr0")
        }
    );
    assert_eq!(
        resolved.disk(),
        &Device::Disk {
            pool: String::from("local"),
            size_mib: 10240
        }
    );
    assert_eq!(
        resolved.limits(),
        ResourceLimits {
            cpu: 1,
            memory_mib: 1024
        }
    );
    assert!(
        !cloud
            .calls()
            .iter()
            .any(|call| call.starts_with("index_connect")),
        "local alias should not consult the image server: {:?}",
        cloud.calls()
    );
}

#[tokio::test]
async fn server_alias_wins_over_public_index() {
    let cloud = FakeCloud::new()
        .with_local_alias("debian/12")
        .with_remote_alias("debian/12");
    let mut machine = driver(&cloud);

    machine
        .pre_create_check()
        .await
        .unwrap_or_else(|err| panic!("pre-create check: {err}"));

    let resolved = machine
        .resolved()
        .unwrap_or_else(|| panic!("resources should be resolved"));
    assert_eq!(resolved.source(), &InstanceSource::local("debian/12"));
    assert!(
        !cloud
            .calls()
            .iter()
            .any(|call| call.starts_with("index_")),
        "public index should not be consulted: {:?}",
        cloud.calls()
    );
}

#[tokio::test]
async fn checks_run_in_order_after_selecting_the_project() {
    let cloud = FakeCloud::new().with_local_alias("debian/12");
    let mut machine = driver(&cloud);

    machine
        .pre_create_check()
        .await
        .unwrap_or_else(|err| panic!("pre-create check: {err}"));

    assert_eq!(
        cloud.calls(),
        vec![
            format!("connect {ENDPOINT}"),
            String::from("get_project default"),
            String::from("use_project default"),
            String::from("get_profile default"),
            String::from("get_image_alias debian/12"),
            String::from("get_network incusbr0"),
            String::from("get_storage_pool local"),
        ]
    );
}

#[tokio::test]
async fn falls_back_to_the_public_image_server() {
    let cloud = FakeCloud::new().with_remote_alias("debian/12");
    let mut machine = driver(&cloud);

    machine
        .pre_create_check()
        .await
        .unwrap_or_else(|err| panic!("pre-create check: {err}"));

    let source = machine
        .resolved()
        .map(|resolved| resolved.source().clone())
        .unwrap_or_else(|| panic!("resources should be resolved"));
    assert_eq!(
        source,
        InstanceSource::remote("debian/12", IMAGE_SERVER, "simplestreams")
    );
    assert!(source.is_remote());
    assert!(
        cloud
            .calls()
            .contains(&format!("index_connect {IMAGE_SERVER}"))
    );
}

#[tokio::test]
async fn unknown_image_alias_is_reported_as_not_found() {
    let cloud = FakeCloud::new();
    let mut machine = driver(&cloud);

    let err = machine
        .pre_create_check()
        .await
        .expect_err("unknown alias should fail");

    assert!(
        matches!(err, IncusDriverError::NotFound { resource: "image", ref name, .. } if name == "debian/12"),
        "unexpected error: {err}"
    );
    assert!(machine.resolved().is_none());
}

#[tokio::test]
async fn unreachable_image_server_is_a_connection_error() {
    let cloud = FakeCloud::new().failing(
        FakeCall::IndexConnect,
        ClientError::Transport {
            message: String::from("dns failure"),
        },
    );
    let mut machine = driver(&cloud);

    let err = machine
        .pre_create_check()
        .await
        .expect_err("index connection failure should fail");

    assert!(
        matches!(err, IncusDriverError::Connect { ref endpoint, .. } if endpoint == IMAGE_SERVER),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn overlay_network_attaches_a_guest_named_nic() {
    let cloud = FakeCloud::new()
        .with_local_alias("debian/12")
        .with_network("ovn0", "ovn");
    let mut machine = driver_with(
        &cloud,
        crate::incus::DriverSettings {
            network_name: String::from("ovn0"),
            ..settings()
        },
    );

    machine
        .pre_create_check()
        .await
        .unwrap_or_else(|err| panic!("pre-create check: {err}"));

    let resolved = machine
        .resolved()
        .unwrap_or_else(|| panic!("resources should be resolved"));
    assert!(resolved.overlay_network());
    let wire = resolved.nic().to_wire();
    assert_eq!(wire.get("name").map(String::as_str), Some("eth0"));
    assert_eq!(wire.get("network").map(String::as_str), Some("ovn0"));
}

#[rstest]
#[case("macvlan")]
#[case("physical")]
#[tokio::test]
async fn rejects_unsupported_network_types(#[case] network_type: &str) {
    let cloud = FakeCloud::new()
        .with_local_alias("debian/12")
        .with_network("uplink", network_type);
    let mut machine = driver_with(
        &cloud,
        crate::incus::DriverSettings {
            network_name: String::from("uplink"),
            ..settings()
        },
    );

    let err = machine
        .pre_create_check()
        .await
        .expect_err("unsupported network should fail");

    assert_eq!(
        err,
        IncusDriverError::UnsupportedNetworkType {
            name: String::from("uplink"),
            network_type: network_type.to_owned(),
        }
    );
}

#[tokio::test]
async fn missing_project_stops_before_any_other_lookup() {
    let cloud = FakeCloud::default()
        .with_profile("default")
        .with_local_alias("debian/12");
    let mut machine = driver(&cloud);

    let err = machine
        .pre_create_check()
        .await
        .expect_err("missing project should fail");

    assert!(
        matches!(err, IncusDriverError::NotFound { resource: "project", .. }),
        "unexpected error: {err}"
    );
    assert_eq!(cloud.calls().last().map(String::as_str), Some("get_project default"));
}

#[tokio::test]
async fn missing_profile_is_reported() {
    let cloud = FakeCloud::new().with_local_alias("debian/12");
    let mut machine = driver_with(
        &cloud,
        crate::incus::DriverSettings {
            profile: String::from("gpu"),
            ..settings()
        },
    );

    let err = machine
        .pre_create_check()
        .await
        .expect_err("missing profile should fail");

    assert!(
        matches!(err, IncusDriverError::NotFound { resource: "profile", ref name, .. } if name == "gpu"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn missing_storage_pool_is_reported() {
    let cloud = FakeCloud::new().with_local_alias("debian/12");
    let mut machine = driver_with(
        &cloud,
        crate::incus::DriverSettings {
            storage_name: String::from("zfs"),
            ..settings()
        },
    );

    let err = machine
        .pre_create_check()
        .await
        .expect_err("missing pool should fail");

    assert!(
        matches!(err, IncusDriverError::NotFound { resource: "storage pool", .. }),
        "unexpected error: {err}"
    );
}

#[rstest]
#[case::image(crate::incus::DriverSettings { image_name: String::new(), ..settings() }, "image name")]
#[case::network(crate::incus::DriverSettings { network_name: String::new(), ..settings() }, "network name")]
#[case::storage(crate::incus::DriverSettings { storage_name: String::new(), ..settings() }, "storage name")]
#[tokio::test]
async fn empty_resource_names_are_missing_fields(
    #[case] settings: crate::incus::DriverSettings,
    #[case] field: &str,
) {
    let cloud = FakeCloud::new().with_local_alias("debian/12");
    let mut machine = driver_with(&cloud, settings);

    let err = machine
        .pre_create_check()
        .await
        .expect_err("empty name should fail");

    assert_eq!(err.to_string(), format!("{field} must be set"));
    assert_eq!(cloud.connects(), 0);
    assert!(cloud.calls().is_empty(), "unexpected calls: {:?}", cloud.calls());
}

#[tokio::test]
async fn invalid_settings_fail_before_connecting() {
    let cloud = FakeCloud::new().with_local_alias("debian/12");
    let mut machine = driver_with(
        &cloud,
        crate::incus::DriverSettings {
            url: String::new(),
            ..settings()
        },
    );

    let err = machine
        .pre_create_check()
        .await
        .expect_err("missing url should fail");

    assert!(
        matches!(err, IncusDriverError::Config(ConfigError::MissingField(_))),
        "unexpected error: {err}"
    );
    assert_eq!(cloud.connects(), 0);
}

#[tokio::test]
async fn connection_failure_names_the_endpoint() {
    let cloud = FakeCloud::new().failing(
        FakeCall::Connect,
        ClientError::Credentials {
            message: String::from("bad key"),
        },
    );
    let mut machine = driver(&cloud);

    let err = machine
        .pre_create_check()
        .await
        .expect_err("connect failure should fail");

    assert!(
        matches!(err, IncusDriverError::Connect { ref endpoint, ref message } if endpoint == ENDPOINT && message.contains("bad key")),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn repeated_checks_reuse_the_first_result() {
    let cloud = FakeCloud::new().with_local_alias("debian/12");
    let mut machine = driver(&cloud);

    machine
        .pre_create_check()
        .await
        .unwrap_or_else(|err| panic!("first check: {err}"));
    let calls = cloud.calls().len();
    machine
        .pre_create_check()
        .await
        .unwrap_or_else(|err| panic!("second check: {err}"));

    assert_eq!(cloud.calls().len(), calls);
    assert_eq!(cloud.connects(), 1);
}
