//! Tool collaborators.
//!
//! Each external system sits behind a narrow async trait returning plain
//! `serde_json::Value` results; the control loop squashes them to text before
//! they reach the planner, so nothing downstream depends on their shape.
//! Every failure is a uniform [`ToolError`].

pub mod deploys;
pub mod forge;
pub mod mailing;
pub mod tracker;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use deploys::{DeployClient, HttpDeployClient};
pub use forge::{ForgeClient, HttpForgeClient};
pub use mailing::{HttpMailingListClient, MailingListClient};
pub use tracker::{HttpTrackerClient, TrackerClient};

use crate::error::ToolError;

/// A not-yet-started tool operation. Side effects happen only when polled,
/// which is what lets the cache skip execution on a hit.
pub type ToolFuture<'a> =
    Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + 'a>>;

/// The collaborators the control loop can reach.
#[derive(Clone)]
pub struct Toolbox {
    pub tracker: Arc<dyn TrackerClient>,
    pub deploys: Arc<dyn DeployClient>,
    pub forge: Arc<dyn ForgeClient>,
    /// Mailing-list operations are optional; unset turns them into
    /// `NotConfigured` errors the planner can react to.
    pub mailing: Option<Arc<dyn MailingListClient>>,
}

impl Toolbox {
    /// The mailing-list client, or a `NotConfigured` error in tool form.
    pub fn mailing(&self) -> Result<&dyn MailingListClient, ToolError> {
        self.mailing
            .as_deref()
            .ok_or(ToolError::NotConfigured { provider: "mailing" })
    }
}
