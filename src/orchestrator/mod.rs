/*
* Clone Orchestration Engine
* --------------------------
* @project: vm-clone-manager
*
* The bit that actually does the work. Two entry points:
*
*   clone_vm(name)        resolve -> fetch descriptor -> build spec -> submit -> poll
*   cleanup_clones(name)  resolve all -> (submit delete -> poll) per match
*
* Both borrow a ManagementApi for the duration of one call and keep nothing
* afterwards. Whoever calls us owns the session and the cancellation token.
*/

pub mod cleanup;
pub mod clone;

use tokio_util::sync::CancellationToken;

use crate::config::{MatchPolicy, Settings};
use crate::core::{IdentityResolver, ManagementApi, PollSettings, TaskPoller};
use crate::errors::{CloneError, CloneResult};

pub use cleanup::{CleanupReport, FailedDeletion};

pub struct Orchestrator<'a> {
    api: &'a dyn ManagementApi,
    settings: &'a Settings,
}

impl<'a> Orchestrator<'a> {
    pub fn new(api: &'a dyn ManagementApi, settings: &'a Settings) -> Self {
        Self { api, settings }
    }

    fn resolver(&self, policy: MatchPolicy) -> IdentityResolver<'a> {
        IdentityResolver::new(self.api, policy)
    }

    fn poller(&self) -> TaskPoller<'a> {
        TaskPoller::new(self.api, PollSettings::from(&self.settings.polling))
    }
}

// Checked before every submit so a cancelled run doesn't start new server work.
fn ensure_not_cancelled(cancel: &CancellationToken, what: &str) -> CloneResult<()> {
    if cancel.is_cancelled() {
        return Err(CloneError::Cancelled {
            what: what.to_string(),
        });
    }
    Ok(())
}
