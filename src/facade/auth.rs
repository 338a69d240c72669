//! Caller identities and the capability checks applied at the service
//! boundary.

use std::sync::Arc;

use crate::core::{OverlayError, Result};
use crate::interface::UserRegistry;

pub const ROOT_UID: i32 = 0;
pub const SYSTEM_UID: i32 = 1000;
pub const SHELL_UID: i32 = 2000;

const UIDS_PER_USER: i32 = 100_000;

/// Restriction key that bars shell callers from touching other users.
pub const RESTRICTION_NO_DEBUGGING_FEATURES: &str = "no_debugging_features";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Read and write overlay state of users other than the caller's own.
    InteractAcrossUsersFull,
    /// Mutate overlay state at all.
    ChangeConfiguration,
}

/// Identity of the caller of a facade operation, as established by the
/// transport.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    uid: i32,
    capabilities: Vec<Capability>,
}

impl CallerIdentity {
    pub fn new(uid: i32, capabilities: Vec<Capability>) -> Self {
        Self { uid, capabilities }
    }

    pub fn root() -> Self {
        Self::new(ROOT_UID, Vec::new())
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_UID, Vec::new())
    }

    pub fn uid(&self) -> i32 {
        self.uid
    }

    /// The user the calling uid belongs to.
    pub fn user_id(&self) -> i32 {
        self.uid / UIDS_PER_USER
    }

    /// System and root bypass capability checks.
    pub fn is_privileged(&self) -> bool {
        self.uid == ROOT_UID || self.uid == SYSTEM_UID
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Enforce that the caller may mutate overlay state.
pub(crate) fn enforce_change_configuration(caller: &CallerIdentity, op: &str) -> Result<()> {
    if caller.is_privileged() || caller.has_capability(Capability::ChangeConfiguration) {
        return Ok(());
    }
    Err(OverlayError::PermissionDenied(format!(
        "{} requires the change-configuration capability",
        op
    )))
}

/// Enforce that the caller may interact with the given user. Callers own
/// their own user; everything else needs the cross-user capability.
pub(crate) fn enforce_cross_user(
    users: &Arc<dyn UserRegistry>,
    caller: &CallerIdentity,
    user_id: i32,
    op: &str,
) -> Result<()> {
    if user_id < 0 {
        return Err(OverlayError::BadArgument(format!(
            "invalid user id {}",
            user_id
        )));
    }
    if user_id == caller.user_id() {
        return Ok(());
    }
    if caller.uid() == SHELL_UID
        && users.has_restriction(user_id, RESTRICTION_NO_DEBUGGING_FEATURES)
    {
        return Err(OverlayError::PermissionDenied(format!(
            "shell is not allowed to access user {}",
            user_id
        )));
    }
    if caller.is_privileged() || caller.has_capability(Capability::InteractAcrossUsersFull) {
        return Ok(());
    }
    Err(OverlayError::PermissionDenied(format!(
        "{} on user {} requires the interact-across-users capability",
        op, user_id
    )))
}
