//! Reconciliation of the registry against the host package database.
//!
//! The driver consumes package lifecycle events and rewrites registry
//! records from fresh package facts. It holds no state of its own beyond
//! the pending-upgrade map that carries an overlay's enabled bit across a
//! package replacement; a full [`PackageDriver::reconcile_all`] pass
//! converges the registry from any starting point, so missed events are
//! never fatal.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::core::{OverlayInfo, PackageEvent, PackageFacts};
use crate::idmap::IdmapManager;
use crate::interface::{PackageDatabase, UserRegistry};
use crate::rules::Rules;
use crate::store::Registry;

pub struct PackageDriver {
    pm: Arc<dyn PackageDatabase>,
    users: Arc<dyn UserRegistry>,
    idmap: Arc<IdmapManager>,
    rules: Arc<Rules>,
    registry: Arc<Registry>,
    /// Overlay records removed by the first half of a package upgrade,
    /// waiting for the replacement to be observed.
    pending_upgrades: Mutex<HashMap<String, OverlayInfo>>,
}

impl PackageDriver {
    pub fn new(
        pm: Arc<dyn PackageDatabase>,
        users: Arc<dyn UserRegistry>,
        idmap: Arc<IdmapManager>,
        rules: Arc<Rules>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            pm,
            users,
            idmap,
            rules,
            registry,
            pending_upgrades: Mutex::new(HashMap::new()),
        }
    }

    pub fn handle_package_event(&self, event: &PackageEvent) {
        match event {
            PackageEvent::Added { package }
            | PackageEvent::Changed { package }
            | PackageEvent::Replaced { package } => {
                // The host may address an event at one user when it means
                // all of them; reconciling every user is always safe.
                for user_id in self.users.user_ids() {
                    self.package_updated(package, user_id);
                }
            }
            PackageEvent::Removed {
                package,
                all_users,
                user_id,
                replacing,
            } => {
                let user_ids = if *all_users {
                    self.users.user_ids()
                } else {
                    vec![*user_id]
                };
                for user_id in user_ids {
                    self.package_removed(package, user_id, *replacing);
                }
            }
        }
    }

    fn package_updated(&self, package: &str, user_id: i32) {
        match self.pm.get_package_info(package, user_id) {
            Some(facts) if facts.is_overlay_package() => {
                self.ensure_idmap(&facts, user_id);
                self.reconcile_overlay(&facts, user_id);
            }
            // Not an overlay (or not installed for this user): it may be a
            // target whose facts changed.
            _ => self.reconcile_overlays_for_target(package, user_id),
        }
    }

    fn package_removed(&self, package: &str, user_id: i32, replacing: bool) {
        match self.registry.get(package, user_id) {
            Some(overlay) => {
                if replacing {
                    if let Some(old) = self.registry.remove_for_replacement(package, user_id) {
                        self.pending_upgrades
                            .lock()
                            .expect("pending upgrades poisoned")
                            .insert(package.to_string(), old);
                    }
                } else {
                    self.registry.remove(package, user_id);
                }
                if self.removed_for_all_users(package) {
                    self.idmap.remove_idmap(&overlay.base_code_path);
                }
            }
            // No record for the package: some overlay may just have lost
            // its target.
            None => self.reconcile_overlays_for_target(package, user_id),
        }
    }

    /// Generate the idmap for an overlay whose target is installed.
    fn ensure_idmap(&self, overlay: &PackageFacts, user_id: i32) {
        let Some(target_name) = overlay.overlay_target.as_deref() else {
            return;
        };
        if let Some(target) = self.pm.get_package_info(target_name, user_id) {
            self.idmap.create_idmap(&target, overlay);
        }
    }

    /// Rewrite the registry record for one overlay from fresh facts.
    fn reconcile_overlay(&self, facts: &PackageFacts, user_id: i32) {
        let pending = self
            .pending_upgrades
            .lock()
            .expect("pending upgrades poisoned")
            .remove(&facts.package_name);
        let prev = pending
            .clone()
            .or_else(|| self.registry.get(&facts.package_name, user_id));

        let state = match self.rules.updated_state(prev.as_ref(), facts, user_id) {
            Ok(state) => state,
            Err(err) => {
                warn!(package = %facts.package_name, user_id, %err, "skipping reconcile");
                return;
            }
        };
        let Some(target) = facts.overlay_target.clone() else {
            return;
        };
        let overlay = OverlayInfo::new(
            facts.package_name.clone(),
            target,
            facts.base_code_path.clone(),
            state,
            user_id,
        );
        match pending {
            Some(old) => self.registry.insert_replacing(overlay, old),
            None => self.registry.insert(overlay),
        }
    }

    /// Reconcile every overlay currently known for one target package.
    fn reconcile_overlays_for_target(&self, target_package: &str, user_id: i32) {
        let overlays = self
            .registry
            .get_overlays_for_target(target_package, false, user_id);
        if overlays.is_empty() {
            return;
        }
        let target = self.pm.get_package_info(target_package, user_id);
        for record in overlays {
            let Some(facts) = self.pm.get_package_info(&record.package_name, user_id) else {
                continue;
            };
            if let Some(target_facts) = &target {
                self.idmap.create_idmap(target_facts, &facts);
            }
            self.reconcile_overlay(&facts, user_id);
        }
    }

    /// Full reconciliation for one user, for boot and user switch where
    /// package events may have been missed.
    pub fn reconcile_all(&self, user_id: i32) {
        debug!(user_id, "reconciling overlay state");
        let installed = self.pm.list_overlay_packages(user_id);
        let mut installed_names = HashSet::with_capacity(installed.len());
        for facts in &installed {
            installed_names.insert(facts.package_name.clone());
            self.ensure_idmap(facts, user_id);
            self.reconcile_overlay(facts, user_id);
        }

        // Drop records whose overlay package is no longer installed.
        for overlays in self.registry.get_all_overlays(user_id).into_values() {
            for record in overlays {
                if installed_names.contains(&record.package_name) {
                    continue;
                }
                self.registry.remove(&record.package_name, user_id);
                if self.removed_for_all_users(&record.package_name) {
                    self.idmap.remove_idmap(&record.base_code_path);
                }
            }
        }
    }

    fn removed_for_all_users(&self, package: &str) -> bool {
        self.users
            .user_ids()
            .iter()
            .all(|&user_id| self.registry.get(package, user_id).is_none())
    }
}
