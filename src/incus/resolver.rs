//! Pre-create resolution of server resources into request fragments.

use tracing::{debug, info, instrument};

use super::client::{Connector, ImageIndex, InstanceServer};
use super::types::{Device, InstanceSource, ResolvedResources, ResourceLimits};
use super::{DriverSettings, IMAGE_SERVER, IncusDriver, IncusDriverError, connected};
use crate::incus::client::SimpleStreamsIndex;
use crate::ssh_key::KeyProvider;

const NETWORK_TYPE_BRIDGE: &str = "bridge";
const NETWORK_TYPE_OVN: &str = "ovn";

impl<C: Connector, K: KeyProvider> IncusDriver<C, K> {
    /// Runs every resolution and stores the result. Once resources are
    /// resolved further calls return immediately.
    #[instrument(skip(self), fields(instance = %self.machine_name))]
    pub(super) async fn resolve(&mut self) -> Result<(), IncusDriverError> {
        if self.resolved.is_some() {
            return Ok(());
        }
        info!("running pre-create checks");
        self.settings.validate()?;
        require_resource_names(&self.settings)?;

        let settings = &self.settings;
        let server = connected(&self.connector, &mut self.server, settings).await?;
        validate_profile(server, &settings.profile).await?;
        let source = resolve_image(&self.connector, server, &settings.image_name).await?;
        let nic = resolve_network(server, &settings.network_name).await?;
        let disk = resolve_storage(server, &settings.storage_name, settings.disk_mib).await?;
        let limits = resolve_limits(settings.cpu_count, settings.memory_mib);

        self.resolved = Some(ResolvedResources {
            source,
            nic,
            disk,
            limits,
        });
        Ok(())
    }
}

/// Rejects blank image, network and storage names before the server is
/// contacted.
fn require_resource_names(settings: &DriverSettings) -> Result<(), IncusDriverError> {
    for (value, field) in [
        (&settings.image_name, "image name"),
        (&settings.network_name, "network name"),
        (&settings.storage_name, "storage name"),
    ] {
        if value.trim().is_empty() {
            return Err(IncusDriverError::MissingField(field));
        }
    }
    Ok(())
}

/// Prefers an alias on the server itself and falls back to the public image
/// server.
pub(super) async fn resolve_image<C: Connector>(
    connector: &C,
    server: &C::Server,
    alias: &str,
) -> Result<InstanceSource, IncusDriverError> {
    match server.get_image_alias(alias).await {
        Ok(_) => {
            debug!(alias, "image alias found on server");
            return Ok(InstanceSource::local(alias));
        }
        Err(err) => debug!(alias, error = %err, "image alias not on server"),
    }

    let index = connector
        .connect_image_index(IMAGE_SERVER)
        .await
        .map_err(|err| IncusDriverError::Connect {
            endpoint: IMAGE_SERVER.to_owned(),
            message: err.to_string(),
        })?;
    index
        .get_image_alias(alias)
        .await
        .map_err(|err| IncusDriverError::NotFound {
            resource: "image",
            name: alias.to_owned(),
            message: format!("not on the server nor on {IMAGE_SERVER}: {err}"),
        })?;
    debug!(alias, server = IMAGE_SERVER, "image alias found on public image server");
    Ok(InstanceSource::remote(
        alias,
        IMAGE_SERVER,
        SimpleStreamsIndex::PROTOCOL,
    ))
}

/// Builds the NIC for network `name`. Only bridge and overlay networks are
/// supported.
pub(super) async fn resolve_network<S: InstanceServer>(
    server: &S,
    name: &str,
) -> Result<Device, IncusDriverError> {
    let network = server
        .get_network(name)
        .await
        .map_err(|err| IncusDriverError::lookup("network", name, err))?;

    match network.network_type.as_str() {
        NETWORK_TYPE_BRIDGE => Ok(Device::BridgedNic {
            network: name.to_owned(),
        }),
        NETWORK_TYPE_OVN => Ok(Device::OverlayNic {
            network: name.to_owned(),
        }),
        other => Err(IncusDriverError::UnsupportedNetworkType {
            name: name.to_owned(),
            network_type: other.to_owned(),
        }),
    }
}

pub(super) async fn resolve_storage<S: InstanceServer>(
    server: &S,
    pool: &str,
    size_mib: u64,
) -> Result<Device, IncusDriverError> {
    server
        .get_storage_pool(pool)
        .await
        .map_err(|err| IncusDriverError::lookup("storage pool", pool, err))?;
    Ok(Device::Disk {
        pool: pool.to_owned(),
        size_mib,
    })
}

pub(super) const fn resolve_limits(cpu: u32, memory_mib: u64) -> ResourceLimits {
    ResourceLimits { cpu, memory_mib }
}

pub(super) async fn validate_profile<S: InstanceServer>(
    server: &S,
    name: &str,
) -> Result<(), IncusDriverError> {
    server
        .get_profile(name)
        .await
        .map_err(|err| IncusDriverError::lookup("profile", name, err))
}
