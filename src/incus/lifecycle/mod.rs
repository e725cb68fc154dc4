//! Instance lifecycle operations for the Incus driver.

mod create;
mod wait;

use tracing::{info, instrument, warn};

use super::api::{InstanceStatePut, StateAction, StatusCode};
use super::client::{Connector, InstanceServer};
use super::{IncusDriver, IncusDriverError, connected};
use crate::driver::MachineState;
use crate::ssh_key::KeyProvider;

/// State change requested through `PUT /instances/{name}/state`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Transition {
    Start,
    Stop,
    Kill,
    Restart,
}

impl Transition {
    const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Kill => "kill",
            Self::Restart => "restart",
        }
    }

    const fn request(self) -> InstanceStatePut {
        match self {
            Self::Start => InstanceStatePut::new(StateAction::Start, false),
            Self::Stop => InstanceStatePut::new(StateAction::Stop, false),
            Self::Kill => InstanceStatePut::new(StateAction::Stop, true),
            Self::Restart => InstanceStatePut::new(StateAction::Restart, false),
        }
    }
}

/// Maps an instance status onto the host tool's machine states.
const fn machine_state_for(status: StatusCode) -> MachineState {
    match status {
        StatusCode::Starting | StatusCode::Stopping => MachineState::Starting,
        StatusCode::Running => MachineState::Running,
        StatusCode::Stopped => MachineState::Stopped,
        StatusCode::Frozen => MachineState::Paused,
        _ => MachineState::None,
    }
}

impl<C: Connector, K: KeyProvider> IncusDriver<C, K> {
    #[instrument(skip(self), fields(instance = %self.machine_name))]
    pub(super) async fn change_state(
        &mut self,
        transition: Transition,
    ) -> Result<(), IncusDriverError> {
        let server = connected(&self.connector, &mut self.server, &self.settings).await?;
        let operation = server
            .update_instance_state(&self.machine_name, transition.request())
            .await?;
        server.wait(&operation).await.map_err(|err| {
            IncusDriverError::operation(transition.name(), &self.machine_name, &err)
        })?;
        info!(action = transition.name(), "instance state changed");
        Ok(())
    }

    /// Forces the instance off, then deletes it. A failed kill is logged and
    /// deletion goes ahead regardless.
    #[instrument(skip(self), fields(instance = %self.machine_name))]
    pub(super) async fn remove_instance(&mut self) -> Result<(), IncusDriverError> {
        if let Err(err) = self.change_state(Transition::Kill).await {
            warn!(error = %err, "kill before removal failed; deleting anyway");
        }

        let server = connected(&self.connector, &mut self.server, &self.settings).await?;
        let operation = server.delete_instance(&self.machine_name).await?;
        server
            .wait(&operation)
            .await
            .map_err(|err| IncusDriverError::operation("delete", &self.machine_name, &err))?;
        info!("instance removed");
        Ok(())
    }

    pub(super) async fn machine_state(&mut self) -> Result<MachineState, IncusDriverError> {
        let server = connected(&self.connector, &mut self.server, &self.settings).await?;
        let state = server.get_instance_state(&self.machine_name).await?;
        Ok(machine_state_for(state.status_code))
    }
}
