#![allow(dead_code)]

//! Shared fakes for the integration tests: an in-memory package database,
//! user registry, an idmap tool that writes real idmap files into a temp
//! cache, and recorders for the publisher and broadcast collaborators.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use overlayd::idmap::idmap_path;
use overlayd::{
    AssetPathPublisher, BroadcastBus, BroadcastKind, IdmapTool, OverlayService, PackageDatabase,
    PackageFacts, ServiceConfig, SignatureResult, UserRegistry,
};

pub struct FakePackageDatabase {
    packages: Mutex<HashMap<(i32, String), PackageFacts>>,
    matches: Mutex<HashSet<(String, String)>>,
    fail_signature_queries: Mutex<bool>,
}

impl FakePackageDatabase {
    pub fn new() -> Self {
        Self {
            packages: Mutex::new(HashMap::new()),
            matches: Mutex::new(HashSet::new()),
            fail_signature_queries: Mutex::new(false),
        }
    }

    pub fn install(&self, user_id: i32, facts: PackageFacts) {
        self.packages
            .lock()
            .unwrap()
            .insert((user_id, facts.package_name.clone()), facts);
    }

    pub fn uninstall(&self, user_id: i32, package: &str) {
        self.packages
            .lock()
            .unwrap()
            .remove(&(user_id, package.to_string()));
    }

    pub fn set_signature_match(&self, a: &str, b: &str, matched: bool) {
        let pair = signature_pair(a, b);
        let mut matches = self.matches.lock().unwrap();
        if matched {
            matches.insert(pair);
        } else {
            matches.remove(&pair);
        }
    }

    pub fn set_fail_signature_queries(&self, fail: bool) {
        *self.fail_signature_queries.lock().unwrap() = fail;
    }
}

fn signature_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl PackageDatabase for FakePackageDatabase {
    fn get_package_info(&self, package: &str, user_id: i32) -> Option<PackageFacts> {
        self.packages
            .lock()
            .unwrap()
            .get(&(user_id, package.to_string()))
            .cloned()
    }

    fn check_signatures(&self, a: &str, b: &str) -> Option<SignatureResult> {
        if *self.fail_signature_queries.lock().unwrap() {
            return None;
        }
        let matched = self.matches.lock().unwrap().contains(&signature_pair(a, b));
        Some(if matched {
            SignatureResult::Match
        } else {
            SignatureResult::NoMatch
        })
    }

    fn list_overlay_packages(&self, user_id: i32) -> Vec<PackageFacts> {
        let mut out: Vec<PackageFacts> = self
            .packages
            .lock()
            .unwrap()
            .iter()
            .filter(|((user, _), facts)| *user == user_id && facts.is_overlay_package())
            .map(|(_, facts)| facts.clone())
            .collect();
        out.sort_by(|a, b| a.package_name.cmp(&b.package_name));
        out
    }
}

pub struct FakeUserRegistry {
    users: Mutex<Vec<i32>>,
    restrictions: Mutex<HashSet<(i32, String)>>,
}

impl FakeUserRegistry {
    pub fn new(users: Vec<i32>) -> Self {
        Self {
            users: Mutex::new(users),
            restrictions: Mutex::new(HashSet::new()),
        }
    }

    pub fn add_user(&self, user_id: i32) {
        self.users.lock().unwrap().push(user_id);
    }

    pub fn remove_user(&self, user_id: i32) {
        self.users.lock().unwrap().retain(|&user| user != user_id);
    }

    pub fn set_restriction(&self, user_id: i32, key: &str) {
        self.restrictions
            .lock()
            .unwrap()
            .insert((user_id, key.to_string()));
    }
}

impl UserRegistry for FakeUserRegistry {
    fn live_user_ids(&self) -> Vec<i32> {
        self.users.lock().unwrap().clone()
    }

    fn user_ids(&self) -> Vec<i32> {
        self.users.lock().unwrap().clone()
    }

    fn has_restriction(&self, user_id: i32, key: &str) -> bool {
        self.restrictions
            .lock()
            .unwrap()
            .contains(&(user_id, key.to_string()))
    }
}

/// Writes real idmap files into the cache directory, the way the platform
/// binary would.
pub struct FakeIdmapTool {
    cache_dir: PathBuf,
    dangerous: Mutex<HashSet<String>>,
    fail: Mutex<bool>,
}

impl FakeIdmapTool {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            dangerous: Mutex::new(HashSet::new()),
            fail: Mutex::new(false),
        }
    }

    /// Mark an overlay code path so the next generated idmap carries the
    /// dangerous flag.
    pub fn set_dangerous(&self, overlay_path: &str) {
        self.dangerous.lock().unwrap().insert(overlay_path.to_string());
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl IdmapTool for FakeIdmapTool {
    fn idmap(&self, _target_path: &str, overlay_path: &str, _shared_gid: i32) -> i32 {
        if *self.fail.lock().unwrap() {
            return 1;
        }
        let dangerous: u32 = if self.dangerous.lock().unwrap().contains(overlay_path) {
            1
        } else {
            0
        };
        let path = idmap_path(&self.cache_dir, overlay_path);
        let mut file = match File::create(path) {
            Ok(file) => file,
            Err(_) => return 1,
        };
        let written = file
            .write_all(&0x504d4449u32.to_be_bytes())
            .and_then(|_| file.write_all(&1u32.to_be_bytes()))
            .and_then(|_| file.write_all(&dangerous.to_be_bytes()));
        match written {
            Ok(()) => 0,
            Err(_) => 1,
        }
    }

    fn remove_idmap(&self, base_code_path: &str) -> i32 {
        let path = idmap_path(&self.cache_dir, base_code_path);
        match fs::remove_file(path) {
            Ok(()) => 0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(_) => 1,
        }
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(i32, HashMap<String, Vec<String>>)>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<(i32, HashMap<String, Vec<String>>)> {
        self.published.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl AssetPathPublisher for RecordingPublisher {
    fn publish(&self, user_id: i32, paths: HashMap<String, Vec<String>>) {
        self.published.lock().unwrap().push((user_id, paths));
    }
}

#[derive(Default)]
pub struct RecordingBus {
    events: Mutex<Vec<(BroadcastKind, String, i32)>>,
}

impl RecordingBus {
    pub fn events(&self) -> Vec<(BroadcastKind, String, i32)> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn count(&self, kind: BroadcastKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _, _)| *event == kind)
            .count()
    }
}

impl BroadcastBus for RecordingBus {
    fn send(&self, kind: BroadcastKind, package: &str, user_id: i32) {
        self.events
            .lock()
            .unwrap()
            .push((kind, package.to_string(), user_id));
    }
}

pub fn target_facts(name: &str) -> PackageFacts {
    PackageFacts {
        package_name: name.to_string(),
        overlay_target: None,
        base_code_path: format!("/system/app/{}.apk", name),
        component_enabled: true,
        is_system: true,
        requested_overlay_priority: 0,
        uid: 10_001,
    }
}

pub fn overlay_facts(name: &str, target: &str) -> PackageFacts {
    PackageFacts {
        package_name: name.to_string(),
        overlay_target: Some(target.to_string()),
        base_code_path: format!("/data/app/{}.apk", name),
        component_enabled: true,
        is_system: false,
        requested_overlay_priority: 0,
        uid: 10_050,
    }
}

pub fn system_overlay_facts(name: &str, target: &str, priority: i32) -> PackageFacts {
    PackageFacts {
        package_name: name.to_string(),
        overlay_target: Some(target.to_string()),
        base_code_path: format!("/vendor/overlay/{}.apk", name),
        component_enabled: true,
        is_system: true,
        requested_overlay_priority: priority,
        uid: 10_010,
    }
}

/// A fully wired service over fakes, rooted in one temp directory.
pub struct TestHarness {
    pub service: OverlayService,
    pub pm: Arc<FakePackageDatabase>,
    pub users: Arc<FakeUserRegistry>,
    pub idmap_tool: Arc<FakeIdmapTool>,
    pub publisher: Arc<RecordingPublisher>,
    pub bus: Arc<RecordingBus>,
    pub dir: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let pm = Arc::new(FakePackageDatabase::new());
        let users = Arc::new(FakeUserRegistry::new(vec![0]));
        let publisher = Arc::new(RecordingPublisher::default());
        let bus = Arc::new(RecordingBus::default());
        Self::build(dir, pm, users, publisher, bus)
    }

    /// Shut the service down and bring up a fresh instance over the same
    /// directory and collaborators, as a reboot would.
    pub fn restart(self) -> Self {
        self.service.shutdown();
        let TestHarness {
            service,
            pm,
            users,
            publisher,
            bus,
            dir,
            ..
        } = self;
        drop(service);
        Self::build(dir, pm, users, publisher, bus)
    }

    fn build(
        dir: TempDir,
        pm: Arc<FakePackageDatabase>,
        users: Arc<FakeUserRegistry>,
        publisher: Arc<RecordingPublisher>,
        bus: Arc<RecordingBus>,
    ) -> Self {
        let cache_dir = dir.path().join("resource-cache");
        fs::create_dir_all(&cache_dir).unwrap();
        let config = ServiceConfig::new()
            .state_file(dir.path().join("overlays.json"))
            .idmap_cache_dir(&cache_dir)
            .idmap_binary("/nonexistent/idmap");
        let idmap_tool = Arc::new(FakeIdmapTool::new(&cache_dir));
        let service = OverlayService::new(
            config,
            pm.clone(),
            users.clone(),
            idmap_tool.clone(),
            publisher.clone(),
            bus.clone(),
        )
        .unwrap();
        Self {
            service,
            pm,
            users,
            idmap_tool,
            publisher,
            bus,
            dir,
        }
    }

    pub fn idmap_exists(&self, base_code_path: &str) -> bool {
        idmap_path(&self.dir.path().join("resource-cache"), base_code_path).is_file()
    }
}
