//! Lifecycle of the per-overlay idmap files.
//!
//! An idmap is generated by an external tool whenever an overlay and its
//! target are both present. Its mere existence means the two packages share
//! at least one resource; a word in its header flags overlays that touch
//! resources the target never granted.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::PackageFacts;
use crate::interface::IdmapTool;

const APP_UID_START: i32 = 10_000;
const SHARED_GID_START: i32 = 50_000;
const UIDS_PER_USER: i32 = 100_000;

/// Gid shared by every user's install of the application owning `uid`, or
/// -1 when the uid is outside the application range.
fn shared_app_gid(uid: i32) -> i32 {
    let app_id = uid % UIDS_PER_USER;
    if (APP_UID_START..SHARED_GID_START).contains(&app_id) {
        app_id - APP_UID_START + SHARED_GID_START
    } else {
        -1
    }
}

/// Path of the idmap file for an overlay with the given code path.
///
/// The leading separator of the code path is dropped, the remaining
/// separators become `@`, and `@idmap` is appended inside the cache
/// directory.
pub fn idmap_path(cache_dir: &Path, base_code_path: &str) -> PathBuf {
    let trimmed = base_code_path.strip_prefix('/').unwrap_or(base_code_path);
    let mut name = trimmed.replace('/', "@");
    name.push_str("@idmap");
    cache_dir.join(name)
}

fn read_dangerous_word(path: &Path) -> std::io::Result<u32> {
    let mut file = File::open(path)?;
    // magic, version, dangerous flag
    let mut header = [0u8; 12];
    file.read_exact(&mut header)?;
    Ok(u32::from_be_bytes([
        header[8], header[9], header[10], header[11],
    ]))
}

/// Creates, removes and inspects idmap files through the external tool.
///
/// Every failure here is non-fatal: the only observable effect is the value
/// of [`IdmapManager::idmap_exists`] and [`IdmapManager::is_dangerous`],
/// which feed the rules engine.
pub struct IdmapManager {
    tool: Arc<dyn IdmapTool>,
    cache_dir: PathBuf,
}

impl IdmapManager {
    pub fn new(tool: Arc<dyn IdmapTool>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            cache_dir: cache_dir.into(),
        }
    }

    /// Generate (or refresh) the idmap for a target/overlay pair. Returns
    /// false when the tool exits non-zero.
    pub fn create_idmap(&self, target: &PackageFacts, overlay: &PackageFacts) -> bool {
        debug!(
            target_package = %target.package_name,
            overlay = %overlay.package_name,
            "create idmap"
        );
        let shared_gid = shared_app_gid(target.uid);
        let code = self
            .tool
            .idmap(&target.base_code_path, &overlay.base_code_path, shared_gid);
        if code != 0 {
            warn!(
                target_path = %target.base_code_path,
                overlay_path = %overlay.base_code_path,
                code,
                "failed to generate idmap"
            );
            return false;
        }
        true
    }

    /// Best-effort removal of the idmap for the given overlay code path.
    pub fn remove_idmap(&self, base_code_path: &str) {
        debug!(path = %base_code_path, "remove idmap");
        let code = self.tool.remove_idmap(base_code_path);
        if code != 0 {
            warn!(path = %base_code_path, code, "failed to remove idmap");
        }
    }

    pub fn idmap_exists(&self, overlay: &PackageFacts) -> bool {
        idmap_path(&self.cache_dir, &overlay.base_code_path).is_file()
    }

    /// Whether the overlay touches resources outside the target's
    /// overlayable set. Any read failure counts as dangerous.
    pub fn is_dangerous(&self, overlay: &PackageFacts) -> bool {
        let path = idmap_path(&self.cache_dir, &overlay.base_code_path);
        match read_dangerous_word(&path) {
            Ok(word) => word != 0,
            Err(_) => true,
        }
    }
}

/// [`IdmapTool`] backed by the platform's idmap binary.
pub struct ExecIdmapTool {
    binary: PathBuf,
}

impl ExecIdmapTool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, args: &[&str]) -> i32 {
        match Command::new(&self.binary).args(args).status() {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                warn!(binary = %self.binary.display(), %err, "failed to spawn idmap tool");
                -1
            }
        }
    }
}

impl IdmapTool for ExecIdmapTool {
    fn idmap(&self, target_path: &str, overlay_path: &str, shared_gid: i32) -> i32 {
        self.run(&[target_path, overlay_path, &shared_gid.to_string()])
    }

    fn remove_idmap(&self, base_code_path: &str) -> i32 {
        self.run(&["--remove", base_code_path])
    }
}
