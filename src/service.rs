//! Service orchestration: wiring, boot sequence, change propagation.
//!
//! The service tracks which installed overlays may be used and in what
//! order, and lets clients change this. It does not itself decide when an
//! overlay should be active; that policy lives in external clients of the
//! facade.
//!
//! Input reaches the service from two sides: package lifecycle events
//! forwarded by the host into [`OverlayService::handle_package_event`], and
//! client requests through the [`ServiceFacade`]. Every committed registry
//! change is persisted in the background, republished to running
//! applications when the enabled set changed, and announced on the
//! broadcast bus.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, error};

use crate::config::ServiceConfig;
use crate::core::{BroadcastKind, OverlayInfo, PackageEvent, Result};
use crate::driver::PackageDriver;
use crate::facade::ServiceFacade;
use crate::idmap::{ExecIdmapTool, IdmapManager};
use crate::interface::{
    AssetPathPublisher, BroadcastBus, IdmapTool, PackageDatabase, UserRegistry,
};
use crate::rules::Rules;
use crate::store::{PersistWorker, Registry, RegistryListener, StateCodec};

/// The user that is active at boot.
pub const OWNER_USER: i32 = 0;

pub struct OverlayService {
    config: ServiceConfig,
    pm: Arc<dyn PackageDatabase>,
    users: Arc<dyn UserRegistry>,
    publisher: Arc<dyn AssetPathPublisher>,
    bus: Arc<dyn BroadcastBus>,
    registry: Arc<Registry>,
    driver: Arc<PackageDriver>,
    facade: ServiceFacade,
    codec: StateCodec,
    worker: Arc<PersistWorker>,
}

impl OverlayService {
    pub fn new(
        config: ServiceConfig,
        pm: Arc<dyn PackageDatabase>,
        users: Arc<dyn UserRegistry>,
        idmap_tool: Arc<dyn IdmapTool>,
        publisher: Arc<dyn AssetPathPublisher>,
        bus: Arc<dyn BroadcastBus>,
    ) -> Result<Self> {
        config.validate()?;

        let idmap = Arc::new(IdmapManager::new(idmap_tool, config.idmap_cache_dir.clone()));
        let rules = Arc::new(Rules::new(pm.clone(), idmap.clone()));
        let registry = Arc::new(Registry::new(rules.clone()));
        let driver = Arc::new(PackageDriver::new(
            pm.clone(),
            users.clone(),
            idmap,
            rules.clone(),
            registry.clone(),
        ));
        let facade = ServiceFacade::new(registry.clone(), rules, users.clone());
        let codec = StateCodec::new(config.state_file.clone());
        let worker = Arc::new(PersistWorker::spawn(StateCodec::new(config.state_file.clone())));

        Ok(Self {
            config,
            pm,
            users,
            publisher,
            bus,
            registry,
            driver,
            facade,
            codec,
            worker,
        })
    }

    /// Like [`OverlayService::new`], invoking the idmap binary named in the
    /// configuration.
    pub fn with_exec_idmap_tool(
        config: ServiceConfig,
        pm: Arc<dyn PackageDatabase>,
        users: Arc<dyn UserRegistry>,
        publisher: Arc<dyn AssetPathPublisher>,
        bus: Arc<dyn BroadcastBus>,
    ) -> Result<Self> {
        let tool = Arc::new(ExecIdmapTool::new(config.idmap_binary.clone()));
        Self::new(config, pm, users, tool, publisher, bus)
    }

    /// Bring the service to its steady state, strictly in order: restore
    /// persisted state for live users, reconcile the owner user against the
    /// package database, publish asset paths, persist whatever the
    /// reconciliation changed, then register the change listener that keeps
    /// everything in sync from here on.
    ///
    /// Package events may be forwarded from the moment the service exists;
    /// anything that slips in before this call is covered by the
    /// reconciliation pass.
    pub fn start(&self) {
        self.restore_state();
        self.driver.reconcile_all(OWNER_USER);
        self.publish_assets(OWNER_USER);
        self.persist_now();
        self.registry.add_change_listener(Arc::new(ChangeListener {
            registry: self.registry.clone(),
            worker: self.worker.clone(),
            publisher: self.publisher.clone(),
            bus: self.bus.clone(),
            pm: self.pm.clone(),
        }));
    }

    /// Reconcile and republish for a user that just became active.
    pub fn on_user_switch(&self, user_id: i32) {
        self.driver.reconcile_all(user_id);
        self.publish_assets(user_id);
    }

    /// Forward a package lifecycle event from the host.
    pub fn handle_package_event(&self, event: &PackageEvent) {
        self.driver.handle_package_event(event);
    }

    /// Flush the persistence worker and stop it.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    pub fn facade(&self) -> &ServiceFacade {
        &self.facade
    }

    /// Ordered asset search paths for the framework package and the given
    /// package.
    pub fn all_asset_paths(&self, package: &str, user_id: i32) -> Vec<Vec<String>> {
        [self.config.framework_package.as_str(), package]
            .iter()
            .map(|target| asset_paths(&self.pm, &self.registry, target, user_id))
            .collect()
    }

    fn restore_state(&self) {
        let snapshot = match self.codec.load() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                // proceed with an empty registry; the reconciliation pass
                // rebuilds it
                error!(%err, "failed to restore overlay state");
                return;
            }
        };
        let live: HashSet<i32> = self.users.live_user_ids().into_iter().collect();
        for (user_id, overlays) in snapshot {
            if !live.contains(&user_id) {
                debug!(user_id, "dropping persisted overlays of removed user");
                continue;
            }
            self.registry.restore(user_id, overlays);
        }
    }

    fn persist_now(&self) {
        self.worker.request(self.registry.snapshot());
    }

    fn publish_assets(&self, user_id: i32) {
        let targets = self.registry.all_targets(user_id);
        let mut paths = HashMap::with_capacity(targets.len());
        for target in targets {
            let list = asset_paths(&self.pm, &self.registry, &target, user_id);
            paths.insert(target, list);
        }
        self.publisher.publish(user_id, paths);
    }
}

/// Ordered search paths for one target: the target's own code path followed
/// by the enabled overlays in priority order.
fn asset_paths(
    pm: &Arc<dyn PackageDatabase>,
    registry: &Arc<Registry>,
    target_package: &str,
    user_id: i32,
) -> Vec<String> {
    let mut paths = Vec::new();
    if let Some(facts) = pm.get_package_info(target_package, user_id) {
        paths.push(facts.base_code_path);
    }
    for overlay in registry.get_overlays_for_target(target_package, true, user_id) {
        paths.push(overlay.base_code_path);
    }
    paths
}

/// Keeps persisted state, published asset paths and the broadcast bus in
/// step with the registry. Runs on the mutating thread after the registry
/// lock is released; everything it does is queue work or call out, never
/// call back into a registry mutator.
struct ChangeListener {
    registry: Arc<Registry>,
    worker: Arc<PersistWorker>,
    publisher: Arc<dyn AssetPathPublisher>,
    bus: Arc<dyn BroadcastBus>,
    pm: Arc<dyn PackageDatabase>,
}

impl ChangeListener {
    fn persist(&self) {
        self.worker.request(self.registry.snapshot());
    }

    fn republish(&self, target_package: &str, user_id: i32) {
        let mut paths = HashMap::with_capacity(1);
        paths.insert(
            target_package.to_string(),
            asset_paths(&self.pm, &self.registry, target_package, user_id),
        );
        self.publisher.publish(user_id, paths);
    }
}

impl RegistryListener for ChangeListener {
    fn on_overlay_added(&self, overlay: &OverlayInfo) {
        if overlay.is_enabled() {
            self.republish(&overlay.target_package_name, overlay.user_id);
        }
        self.persist();
        self.bus
            .send(BroadcastKind::OverlayAdded, &overlay.package_name, overlay.user_id);
    }

    fn on_overlay_removed(&self, overlay: &OverlayInfo) {
        if overlay.is_enabled() {
            self.republish(&overlay.target_package_name, overlay.user_id);
        }
        self.persist();
        self.bus
            .send(BroadcastKind::OverlayRemoved, &overlay.package_name, overlay.user_id);
    }

    fn on_overlay_changed(&self, overlay: &OverlayInfo, old: &OverlayInfo) {
        if overlay.is_enabled() != old.is_enabled() {
            self.republish(&overlay.target_package_name, overlay.user_id);
        }
        self.persist();
        self.bus
            .send(BroadcastKind::OverlayChanged, &overlay.package_name, overlay.user_id);
    }

    fn on_overlays_reordered(&self, target_package: &str, user_id: i32) {
        self.republish(target_package, user_id);
        self.persist();
        self.bus
            .send(BroadcastKind::OverlaysReordered, target_package, user_id);
    }
}
