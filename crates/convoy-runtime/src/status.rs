//! Read-only view of manifest containers on the host.

use convoy_common::error::Result;
use convoy_common::types::ContainerState;

use crate::backend::ContainerBackend;

/// State of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Container name.
    pub name: String,
    /// Observed state.
    pub state: ContainerState,
}

/// State of every container, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    /// One entry per container.
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    /// Returns `true` if every container is running.
    #[must_use]
    pub fn all_running(&self) -> bool {
        self.entries.iter().all(|e| e.state == ContainerState::Running)
    }

    /// Process exit code: 0 if everything runs, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.all_running())
    }
}

/// Queries the state of each named container.
///
/// # Errors
///
/// Returns the first backend query failure.
pub fn check_status(backend: &dyn ContainerBackend, names: &[String]) -> Result<StatusReport> {
    let entries = names
        .iter()
        .map(|name| {
            let exists = backend.container_exists(name)?;
            let running = exists && backend.container_running(name)?;
            let state = ContainerState::from_flags(exists, running);
            tracing::debug!(container = %name, %state, "status");
            Ok(StatusEntry {
                name: name.clone(),
                state,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(StatusReport { entries })
}
