//! Rules that keep the registry out of illegal states.
//!
//! Everything here is stateless; the struct only carries handles to the
//! package database and the idmap manager so it can consult current package
//! facts while deriving states and validating list order.

use std::sync::Arc;

use tracing::warn;

use crate::core::{
    ApprovalState, OverlayError, OverlayInfo, PackageFacts, Result, SignatureResult,
};
use crate::idmap::IdmapManager;
use crate::interface::PackageDatabase;

pub struct Rules {
    pm: Arc<dyn PackageDatabase>,
    idmap: Arc<IdmapManager>,
}

impl Rules {
    pub fn new(pm: Arc<dyn PackageDatabase>, idmap: Arc<IdmapManager>) -> Self {
        Self { pm, idmap }
    }

    /// State for a newly observed overlay package.
    pub fn initial_state(&self, pkg: &PackageFacts, user_id: i32) -> Result<ApprovalState> {
        self.updated_state(None, pkg, user_id)
    }

    /// Re-derive the state of an overlay from current package facts.
    ///
    /// When `prev` exists and both its state and the freshly derived state
    /// are user-controlled approvals, the previous state wins, so an enabled
    /// overlay stays enabled across re-derivation.
    ///
    /// Fails with [`OverlayError::ArgumentMismatch`] when `prev` does not
    /// describe the same package and user as the request.
    pub fn updated_state(
        &self,
        prev: Option<&OverlayInfo>,
        pkg: &PackageFacts,
        user_id: i32,
    ) -> Result<ApprovalState> {
        if let Some(prev) = prev {
            if prev.package_name != pkg.package_name {
                return Err(OverlayError::ArgumentMismatch(format!(
                    "overlay {} is not matching package {}",
                    prev.package_name, pkg.package_name
                )));
            }
            if prev.user_id != user_id {
                return Err(OverlayError::ArgumentMismatch(format!(
                    "user {} of overlay {} is not matching request user {}",
                    prev.user_id, prev.package_name, user_id
                )));
            }
        }

        let state = self.derive_state(pkg, user_id);
        if let Some(prev) = prev {
            if is_user_controlled(prev.state) && is_user_controlled(state) {
                return Ok(prev.state);
            }
        }
        Ok(state)
    }

    fn derive_state(&self, pkg: &PackageFacts, user_id: i32) -> ApprovalState {
        // The overlay is disabled by the package manager
        if !pkg.component_enabled {
            return ApprovalState::NotApprovedComponentDisabled;
        }

        // The target package is not installed
        let target_installed = pkg
            .overlay_target
            .as_deref()
            .map(|target| self.pm.get_package_info(target, user_id).is_some())
            .unwrap_or(false);
        if !target_installed {
            return ApprovalState::NotApprovedMissingTarget;
        }

        // No idmap has been created. Perhaps there were no matching
        // resources between the two packages?
        if !self.idmap.idmap_exists(pkg) {
            return ApprovalState::NotApprovedNoIdmap;
        }

        if pkg.is_system {
            return ApprovalState::ApprovedAlwaysEnabled;
        }

        // If the target and overlay have the same author, we approve it.
        if self.is_signature_matching(pkg) {
            return ApprovalState::ApprovedDisabled;
        }

        // If the overlay only modifies resources explicitly granted by the
        // target, we approve it.
        if !self.idmap.is_dangerous(pkg) {
            return ApprovalState::ApprovedDisabled;
        }

        // Technically the overlay could be used, but the target has not
        // granted every resource it touches.
        ApprovalState::NotApprovedDangerousOverlay
    }

    /// State after enabling or disabling an overlay. An overlay that is not
    /// user-controlled keeps its current state; the caller observes "no
    /// change".
    pub fn updated_state_for_enable(&self, overlay: &OverlayInfo, enable: bool) -> ApprovalState {
        match overlay.state {
            ApprovalState::ApprovedEnabled | ApprovalState::ApprovedDisabled => {
                if enable {
                    ApprovalState::ApprovedEnabled
                } else {
                    ApprovalState::ApprovedDisabled
                }
            }
            other => other,
        }
    }

    /// Index at which a newly added overlay belongs in a target's list.
    ///
    /// A list is partitioned in two slices: system overlays first, ordered
    /// by requested priority, then user-installed overlays in operation
    /// order. Non-system overlays are appended at the tail.
    pub fn insert_index(&self, overlay: &OverlayInfo, list: &[OverlayInfo]) -> usize {
        self.assert_overlays_consistent(list);
        let user_id = overlay.user_id;
        let inserted = match self.pm.get_package_info(&overlay.package_name, user_id) {
            Some(facts) if facts.is_system => facts,
            _ => return list.len(),
        };

        for (index, entry) in list.iter().enumerate() {
            let keeps_walking = self
                .pm
                .get_package_info(&entry.package_name, user_id)
                .map(|facts| {
                    facts.is_system
                        && facts.requested_overlay_priority
                            <= inserted.requested_overlay_priority
                })
                .unwrap_or(false);
            if !keeps_walking {
                return index;
            }
        }
        list.len()
    }

    /// Whether the proposed order of a target's overlays is allowed: no
    /// system overlay after a non-system overlay, and system overlays in
    /// ascending requested priority.
    pub fn verify_overlay_order(&self, list: &[OverlayInfo], user_id: i32) -> bool {
        if list.len() < 2 {
            return true;
        }
        self.assert_overlays_consistent(list);
        let mut previous_prio = i32::MIN;
        let mut previous_system = true;
        for entry in list {
            let (system, prio) = match self.pm.get_package_info(&entry.package_name, user_id) {
                Some(facts) => (facts.is_system, facts.requested_overlay_priority),
                // an uninstalled package can only belong to the non-system
                // partition
                None => (false, 0),
            };
            if system && !previous_system {
                return false;
            }
            if system && prio < previous_prio {
                return false;
            }
            previous_prio = prio;
            previous_system = system;
        }
        true
    }

    /// Panics when the list mixes targets or users; such a list is a
    /// programmer error, never a recoverable condition.
    pub fn assert_overlays_consistent(&self, list: &[OverlayInfo]) {
        if list.len() < 2 {
            return;
        }
        let target = &list[0].target_package_name;
        let user_id = list[0].user_id;
        for entry in list {
            if entry.target_package_name != *target {
                panic!(
                    "overlay list is inconsistent: different target packages: {} vs {}",
                    entry.target_package_name, target
                );
            }
            if entry.user_id != user_id {
                panic!(
                    "overlay list is inconsistent: different user ids: {} vs {}",
                    entry.user_id, user_id
                );
            }
        }
    }

    fn is_signature_matching(&self, overlay: &PackageFacts) -> bool {
        let Some(target) = overlay.overlay_target.as_deref() else {
            return false;
        };
        match self.pm.check_signatures(target, &overlay.package_name) {
            Some(result) => result == SignatureResult::Match,
            None => {
                warn!(
                    overlay = %overlay.package_name,
                    target,
                    "signature query failed, assuming a match until the next reconciliation"
                );
                true
            }
        }
    }
}

fn is_user_controlled(state: ApprovalState) -> bool {
    matches!(
        state,
        ApprovalState::ApprovedEnabled | ApprovalState::ApprovedDisabled
    )
}
