//! Address polling after instance creation.

use std::net::IpAddr;

use tokio::time::sleep;
use tracing::debug;

use crate::incus::client::InstanceServer;
use crate::incus::{IncusDriverError, PollSettings};

/// Queries the instance state until a routable IPv4 address appears.
///
/// At most `poll.attempts` queries are made with `poll.interval()` between
/// consecutive queries and no sleep after the last one. Statuses the
/// instance cannot recover from end the wait immediately.
pub(super) async fn wait_for_address<S: InstanceServer>(
    server: &S,
    instance: &str,
    poll: PollSettings,
) -> Result<IpAddr, IncusDriverError> {
    for attempt in 1..=poll.attempts {
        if attempt > 1 {
            sleep(poll.interval()).await;
        }

        let state = server.get_instance_state(instance).await?;
        if state.status_code.is_terminal_failure() {
            return Err(IncusDriverError::InstanceStatus(state.status_code));
        }
        if let Some(address) = state.routable_ipv4() {
            return Ok(address);
        }
        debug!(attempt, status = %state.status_code, "no routable address yet");
    }

    Err(IncusDriverError::AddressTimeout {
        instance: instance.to_owned(),
        attempts: poll.attempts,
    })
}
