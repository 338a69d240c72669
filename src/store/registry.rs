//! Thread-safe store of overlay records.
//!
//! The registry maps `user id -> target package -> priority-ordered list of
//! records`; the last element of a list has the highest effective priority.
//! A single exclusive lock protects the map. Reads clone the requested
//! slice; writes mutate under the lock and dispatch change notifications
//! strictly after releasing it, so listeners can never observe the lock
//! held. Listeners must not call back into the mutators synchronously.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::core::OverlayInfo;
use crate::rules::Rules;

/// Gets callbacks for every committed change to the registry.
pub trait RegistryListener: Send + Sync {
    fn on_overlay_added(&self, overlay: &OverlayInfo);
    fn on_overlay_removed(&self, overlay: &OverlayInfo);
    fn on_overlay_changed(&self, overlay: &OverlayInfo, old: &OverlayInfo);
    fn on_overlays_reordered(&self, target_package: &str, user_id: i32);
}

/// Overlay lists for one user, keyed by target package.
pub type TargetMap = HashMap<String, Vec<OverlayInfo>>;
/// The whole registry content, keyed by user id.
pub type OverlayMap = HashMap<i32, TargetMap>;

#[cfg(debug_assertions)]
thread_local! {
    static HOLDS_REGISTRY_LOCK: std::cell::Cell<bool> = std::cell::Cell::new(false);
}

struct MapGuard<'a> {
    guard: MutexGuard<'a, OverlayMap>,
}

impl<'a> MapGuard<'a> {
    fn new(guard: MutexGuard<'a, OverlayMap>) -> Self {
        #[cfg(debug_assertions)]
        HOLDS_REGISTRY_LOCK.with(|flag| flag.set(true));
        Self { guard }
    }
}

impl Deref for MapGuard<'_> {
    type Target = OverlayMap;

    fn deref(&self) -> &OverlayMap {
        &self.guard
    }
}

impl DerefMut for MapGuard<'_> {
    fn deref_mut(&mut self) -> &mut OverlayMap {
        &mut self.guard
    }
}

impl Drop for MapGuard<'_> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HOLDS_REGISTRY_LOCK.with(|flag| flag.set(false));
    }
}

enum ReorderOutcome {
    /// The requested move is not possible or not allowed.
    Invalid,
    /// The move is a no-op; the list already has the requested order.
    Unchanged,
    Reordered,
}

pub struct Registry {
    overlays: Mutex<OverlayMap>,
    listeners: RwLock<Vec<Arc<dyn RegistryListener>>>,
    rules: Arc<Rules>,
}

impl Registry {
    pub fn new(rules: Arc<Rules>) -> Self {
        Self {
            overlays: Mutex::new(OverlayMap::new()),
            listeners: RwLock::new(Vec::new()),
            rules,
        }
    }

    /// Register a listener for all future changes. Intended to be called
    /// once per listener at startup.
    pub fn add_change_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners
            .write()
            .expect("registry listeners poisoned")
            .push(listener);
    }

    fn lock(&self) -> MapGuard<'_> {
        MapGuard::new(self.overlays.lock().expect("registry lock poisoned"))
    }

    /// Insert an overlay record. An existing record with the same package
    /// name is replaced in place and `on_overlay_changed` fires; a new
    /// record is positioned by the insertion rule and `on_overlay_added`
    /// fires.
    pub fn insert(&self, overlay: OverlayInfo) {
        let mut old = None;
        {
            let mut map = self.lock();
            let list = map
                .entry(overlay.user_id)
                .or_default()
                .entry(overlay.target_package_name.clone())
                .or_default();
            match list
                .iter()
                .position(|entry| entry.package_name == overlay.package_name)
            {
                Some(index) => {
                    old = Some(std::mem::replace(&mut list[index], overlay.clone()));
                }
                None => {
                    let index = self.rules.insert_index(&overlay, list);
                    list.insert(index, overlay.clone());
                }
            }
        }
        match old {
            Some(old) => self.notify_changed(&overlay, &old),
            None => self.notify_added(&overlay),
        }
    }

    /// Insert the successor of a record previously taken out with
    /// [`Registry::remove_for_replacement`]. The removal and this insert
    /// together read as one change: exactly one `on_overlay_changed` fires,
    /// carrying `old`.
    pub fn insert_replacing(&self, overlay: OverlayInfo, old: OverlayInfo) {
        {
            let mut map = self.lock();
            let list = map
                .entry(overlay.user_id)
                .or_default()
                .entry(overlay.target_package_name.clone())
                .or_default();
            match list
                .iter()
                .position(|entry| entry.package_name == overlay.package_name)
            {
                Some(index) => list[index] = overlay.clone(),
                None => {
                    let index = self.rules.insert_index(&overlay, list);
                    list.insert(index, overlay.clone());
                }
            }
        }
        self.notify_changed(&overlay, &old);
    }

    /// Remove the record for the overlay package, collapsing empty
    /// sub-maps. Returns false iff no record was found.
    pub fn remove(&self, package: &str, user_id: i32) -> bool {
        match self.take_overlay(package, user_id) {
            Some(overlay) => {
                self.notify_removed(&overlay);
                true
            }
            None => false,
        }
    }

    /// Remove a record as the first half of a package replacement. No
    /// `on_overlay_removed` fires; the caller is expected to feed the
    /// returned record back through [`Registry::insert_replacing`].
    pub fn remove_for_replacement(&self, package: &str, user_id: i32) -> Option<OverlayInfo> {
        self.take_overlay(package, user_id)
    }

    fn take_overlay(&self, package: &str, user_id: i32) -> Option<OverlayInfo> {
        let mut map = self.lock();
        let targets = map.get_mut(&user_id)?;
        let target = targets
            .iter()
            .find(|(_, list)| list.iter().any(|entry| entry.package_name == package))
            .map(|(target, _)| target.clone())?;
        let list = targets.get_mut(&target)?;
        let index = list.iter().position(|entry| entry.package_name == package)?;
        let overlay = list.remove(index);
        if list.is_empty() {
            targets.remove(&target);
        }
        if targets.is_empty() {
            map.remove(&user_id);
        }
        Some(overlay)
    }

    /// Drop all overlay information for one user. No per-record events.
    pub fn remove_user(&self, user_id: i32) {
        self.lock().remove(&user_id);
    }

    /// Reposition `overlay` directly after `parent`, or at the front of its
    /// list when `parent` is `None`. The change commits only when the
    /// resulting order is allowed; a proposal equal to the current order
    /// succeeds without firing an event.
    pub fn change_priority(&self, overlay: &OverlayInfo, parent: Option<&OverlayInfo>) -> bool {
        let outcome = {
            let mut map = self.lock();
            self.reorder_locked(&mut map, overlay, parent)
        };
        self.finish_reorder(overlay, outcome)
    }

    /// Move the overlay to the tail of its list (highest effective
    /// priority). Succeeds without firing an event when it is already
    /// there.
    pub fn set_highest_priority(&self, overlay: &OverlayInfo) -> bool {
        let outcome = {
            let mut map = self.lock();
            let tail = match map
                .get(&overlay.user_id)
                .and_then(|targets| targets.get(&overlay.target_package_name))
                .and_then(|list| list.last())
            {
                Some(tail) => tail.clone(),
                None => return false,
            };
            if tail == *overlay {
                return true;
            }
            self.reorder_locked(&mut map, overlay, Some(&tail))
        };
        self.finish_reorder(overlay, outcome)
    }

    /// Move the overlay to the front of its list (lowest effective
    /// priority).
    pub fn set_lowest_priority(&self, overlay: &OverlayInfo) -> bool {
        let outcome = {
            let mut map = self.lock();
            self.reorder_locked(&mut map, overlay, None)
        };
        self.finish_reorder(overlay, outcome)
    }

    fn reorder_locked(
        &self,
        map: &mut OverlayMap,
        overlay: &OverlayInfo,
        parent: Option<&OverlayInfo>,
    ) -> ReorderOutcome {
        if parent == Some(overlay) {
            return ReorderOutcome::Invalid;
        }
        let user_id = overlay.user_id;
        let Some(list) = map
            .get_mut(&user_id)
            .and_then(|targets| targets.get_mut(&overlay.target_package_name))
        else {
            return ReorderOutcome::Invalid;
        };
        if !list.contains(overlay) {
            return ReorderOutcome::Invalid;
        }
        if let Some(parent) = parent {
            if !list.contains(parent) {
                return ReorderOutcome::Invalid;
            }
        }

        // Build a candidate list so the rules can judge the order before any
        // actual change commits.
        let mut candidate: Vec<OverlayInfo> =
            list.iter().filter(|entry| *entry != overlay).cloned().collect();
        let index = match parent {
            Some(parent) => {
                match candidate.iter().position(|entry| entry == parent) {
                    Some(position) => position + 1,
                    None => return ReorderOutcome::Invalid,
                }
            }
            None => 0,
        };
        candidate.insert(index, overlay.clone());

        if candidate == *list {
            return ReorderOutcome::Unchanged;
        }
        if !self.rules.verify_overlay_order(&candidate, user_id) {
            return ReorderOutcome::Invalid;
        }
        *list = candidate;
        ReorderOutcome::Reordered
    }

    fn finish_reorder(&self, overlay: &OverlayInfo, outcome: ReorderOutcome) -> bool {
        match outcome {
            ReorderOutcome::Invalid => false,
            ReorderOutcome::Unchanged => true,
            ReorderOutcome::Reordered => {
                self.notify_reordered(&overlay.target_package_name, overlay.user_id);
                true
            }
        }
    }

    /// Record for the overlay package, or `None` when unknown.
    pub fn get(&self, package: &str, user_id: i32) -> Option<OverlayInfo> {
        let map = self.lock();
        let targets = map.get(&user_id)?;
        for list in targets.values() {
            if let Some(overlay) = list.iter().find(|entry| entry.package_name == package) {
                return Some(overlay.clone());
            }
        }
        None
    }

    /// Overlays for one target, sorted on priority. With `enabled_only`,
    /// only overlays currently participating in resource lookup.
    pub fn get_overlays_for_target(
        &self,
        target_package: &str,
        enabled_only: bool,
        user_id: i32,
    ) -> Vec<OverlayInfo> {
        let map = self.lock();
        let Some(list) = map
            .get(&user_id)
            .and_then(|targets| targets.get(target_package))
        else {
            return Vec::new();
        };
        if enabled_only {
            list.iter()
                .filter(|entry| entry.is_enabled())
                .cloned()
                .collect()
        } else {
            list.clone()
        }
    }

    /// All overlays for one user, keyed by target package. A copy.
    pub fn get_all_overlays(&self, user_id: i32) -> HashMap<String, Vec<OverlayInfo>> {
        self.lock().get(&user_id).cloned().unwrap_or_default()
    }

    /// Target packages with at least one overlay for the user.
    pub fn all_targets(&self, user_id: i32) -> Vec<String> {
        self.lock()
            .get(&user_id)
            .map(|targets| targets.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Users with at least one overlay record.
    pub fn users(&self) -> Vec<i32> {
        self.lock().keys().copied().collect()
    }

    /// Copy of the whole registry, for persistence.
    pub fn snapshot(&self) -> OverlayMap {
        self.lock().clone()
    }

    /// Install previously persisted overlays for one user. No events.
    pub fn restore(&self, user_id: i32, overlays: TargetMap) {
        if overlays.is_empty() {
            return;
        }
        self.lock().insert(user_id, overlays);
    }

    fn assert_not_locked() {
        #[cfg(debug_assertions)]
        HOLDS_REGISTRY_LOCK.with(|flag| {
            assert!(
                !flag.get(),
                "registry listeners notified while holding the registry lock"
            );
        });
    }

    fn notify_added(&self, overlay: &OverlayInfo) {
        Self::assert_not_locked();
        for listener in self
            .listeners
            .read()
            .expect("registry listeners poisoned")
            .iter()
        {
            listener.on_overlay_added(overlay);
        }
    }

    fn notify_removed(&self, overlay: &OverlayInfo) {
        Self::assert_not_locked();
        for listener in self
            .listeners
            .read()
            .expect("registry listeners poisoned")
            .iter()
        {
            listener.on_overlay_removed(overlay);
        }
    }

    fn notify_changed(&self, overlay: &OverlayInfo, old: &OverlayInfo) {
        Self::assert_not_locked();
        for listener in self
            .listeners
            .read()
            .expect("registry listeners poisoned")
            .iter()
        {
            listener.on_overlay_changed(overlay, old);
        }
    }

    fn notify_reordered(&self, target_package: &str, user_id: i32) {
        Self::assert_not_locked();
        for listener in self
            .listeners
            .read()
            .expect("registry listeners poisoned")
            .iter()
        {
            listener.on_overlays_reordered(target_package, user_id);
        }
    }
}
