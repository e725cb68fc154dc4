//! Instance creation.

use std::collections::BTreeMap;
use std::net::IpAddr;

use tracing::{info, instrument, warn};

use super::wait::wait_for_address;
use crate::cloud_init::{
    self, NETWORK_CONFIG_KEY, OVERLAY_NETWORK_CONFIG, USER_DATA_KEY, VENDOR_DATA_KEY,
};
use crate::incus::api::{INSTANCE_TYPE_VM, InstancesPost};
use crate::incus::client::{Connector, InstanceServer};
use crate::incus::types::{GUEST_NIC_NAME, ROOT_DISK_NAME, ResolvedResources};
use crate::incus::{DriverSettings, IncusDriver, IncusDriverError, connected};
use crate::ssh_key::KeyProvider;

const INSTANCE_DESCRIPTION: &str = "Created by incus-machine";

impl<C: Connector, K: KeyProvider> IncusDriver<C, K> {
    #[instrument(skip(self), fields(instance = %self.machine_name))]
    pub(in crate::incus) async fn create_instance(&mut self) -> Result<IpAddr, IncusDriverError> {
        let resolved = self
            .resolved
            .as_ref()
            .ok_or(IncusDriverError::NotResolved)?;
        info!("creating Incus instance");

        self.keys.generate_key_pair(&self.ssh_key_path)?;
        let public_key = self.keys.read_public_key(&self.ssh_key_path)?;

        let request = build_request(&self.machine_name, &self.settings, resolved, &public_key);
        self.ssh_public_key = Some(public_key);

        let server = connected(&self.connector, &mut self.server, &self.settings).await?;
        let operation = server.create_instance(&request).await?;
        info!(operation = %operation.path, "create operation submitted");
        server
            .wait(&operation)
            .await
            .map_err(|err| IncusDriverError::operation("create", &self.machine_name, &err))?;

        let address = wait_for_address(server, &self.machine_name, self.settings.ip_poll).await?;
        info!(%address, "instance address recorded");
        self.ip_address = Some(address);
        Ok(address)
    }
}

fn build_config(
    settings: &DriverSettings,
    resolved: &ResolvedResources,
    public_key: &str,
) -> BTreeMap<String, String> {
    let mut config = resolved.limits().to_wire();
    config.insert(
        VENDOR_DATA_KEY.to_owned(),
        cloud_init::render_vendor_data(public_key),
    );
    match cloud_init::load_user_data(&settings.cloud_init_user_data) {
        Ok(Some(user_data)) => {
            config.insert(USER_DATA_KEY.to_owned(), user_data);
        }
        Ok(None) => {}
        Err(err) => warn!(error = %err, "omitting cloud-init user-data"),
    }
    if resolved.overlay_network() {
        config.insert(
            NETWORK_CONFIG_KEY.to_owned(),
            OVERLAY_NETWORK_CONFIG.to_owned(),
        );
    }
    config
}

fn build_request(
    machine_name: &str,
    settings: &DriverSettings,
    resolved: &ResolvedResources,
    public_key: &str,
) -> InstancesPost {
    InstancesPost {
        name: machine_name.to_owned(),
        instance_type: INSTANCE_TYPE_VM.to_owned(),
        start: true,
        source: resolved.source().clone(),
        profiles: vec![settings.profile.clone()],
        description: INSTANCE_DESCRIPTION.to_owned(),
        config: build_config(settings, resolved, public_key),
        devices: BTreeMap::from([
            (ROOT_DISK_NAME.to_owned(), resolved.disk().to_wire()),
            (GUEST_NIC_NAME.to_owned(), resolved.nic().to_wire()),
        ]),
    }
}
