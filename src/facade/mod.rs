//! The public operation surface of the overlay service.
//!
//! Each operation authorizes the caller, validates arguments, translates
//! the request into registry calls and returns copies of the affected
//! records. Mutations commit in memory and return immediately; persistence
//! is queued by the service's change listener and never blocks an
//! operation.

mod auth;

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{OverlayError, OverlayInfo, Result};
use crate::interface::UserRegistry;
use crate::rules::Rules;
use crate::store::Registry;

pub use auth::{
    CallerIdentity, Capability, RESTRICTION_NO_DEBUGGING_FEATURES, ROOT_UID, SHELL_UID, SYSTEM_UID,
};

pub struct ServiceFacade {
    registry: Arc<Registry>,
    rules: Arc<Rules>,
    users: Arc<dyn UserRegistry>,
}

impl ServiceFacade {
    pub fn new(registry: Arc<Registry>, rules: Arc<Rules>, users: Arc<dyn UserRegistry>) -> Self {
        Self {
            registry,
            rules,
            users,
        }
    }

    /// All overlays known for the user, keyed by target package.
    pub fn get_all_overlays(
        &self,
        caller: &CallerIdentity,
        user_id: i32,
    ) -> Result<HashMap<String, Vec<OverlayInfo>>> {
        auth::enforce_cross_user(&self.users, caller, user_id, "get_all_overlays")?;
        Ok(self.registry.get_all_overlays(user_id))
    }

    /// Overlays for one target, sorted on priority.
    pub fn get_overlays_for_target(
        &self,
        caller: &CallerIdentity,
        target_package: &str,
        user_id: i32,
    ) -> Result<Vec<OverlayInfo>> {
        auth::enforce_cross_user(&self.users, caller, user_id, "get_overlays_for_target")?;
        Ok(self
            .registry
            .get_overlays_for_target(target_package, false, user_id))
    }

    /// The record for one overlay package, or `None` when unknown.
    pub fn get_overlay_info(
        &self,
        caller: &CallerIdentity,
        package: &str,
        user_id: i32,
    ) -> Result<Option<OverlayInfo>> {
        auth::enforce_cross_user(&self.users, caller, user_id, "get_overlay_info")?;
        Ok(self.registry.get(package, user_id))
    }

    /// Enable or disable an overlay. Returns true iff the resulting enabled
    /// bit matches the request; an overlay that is not approved never
    /// changes state.
    pub fn set_enabled(
        &self,
        caller: &CallerIdentity,
        package: &str,
        enable: bool,
        user_id: i32,
    ) -> Result<bool> {
        auth::enforce_change_configuration(caller, "set_enabled")?;
        Self::check_user_id(user_id)?;

        let Some(overlay) = self.registry.get(package, user_id) else {
            return Ok(false);
        };
        let state = self.rules.updated_state_for_enable(&overlay, enable);
        if state == overlay.state {
            return Ok(overlay.is_enabled() == enable);
        }
        self.registry.insert(overlay.with_state(state));
        Ok(true)
    }

    /// Move an overlay directly after the named parent overlay. Returns
    /// false when the parent is unknown or the resulting order would be
    /// illegal.
    pub fn set_priority(
        &self,
        caller: &CallerIdentity,
        overlay: &OverlayInfo,
        parent_package: &str,
    ) -> Result<bool> {
        auth::enforce_change_configuration(caller, "set_priority")?;
        Self::check_user_id(overlay.user_id)?;

        let Some(parent) = self.registry.get(parent_package, overlay.user_id) else {
            return Ok(false);
        };
        Ok(self.registry.change_priority(overlay, Some(&parent)))
    }

    /// Give the overlay the highest effective priority for its target.
    pub fn set_highest_priority(
        &self,
        caller: &CallerIdentity,
        overlay: &OverlayInfo,
    ) -> Result<bool> {
        auth::enforce_change_configuration(caller, "set_highest_priority")?;
        Self::check_user_id(overlay.user_id)?;
        Ok(self.registry.set_highest_priority(overlay))
    }

    /// Give the overlay the lowest effective priority for its target.
    pub fn set_lowest_priority(
        &self,
        caller: &CallerIdentity,
        overlay: &OverlayInfo,
    ) -> Result<bool> {
        auth::enforce_change_configuration(caller, "set_lowest_priority")?;
        Self::check_user_id(overlay.user_id)?;
        Ok(self.registry.set_lowest_priority(overlay))
    }

    fn check_user_id(user_id: i32) -> Result<()> {
        if user_id < 0 {
            return Err(OverlayError::BadArgument(format!(
                "invalid user id {}",
                user_id
            )));
        }
        Ok(())
    }
}
