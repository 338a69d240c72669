//! Serialization of the registry to its on-disk document.
//!
//! The whole registry is one indented UTF-8 JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "users": [
//!     { "id": 0, "targets": [
//!       { "name": "com.example.target", "overlays": [
//!         { "name": "com.example.overlay",
//!           "path": "/vendor/overlay/example.apk",
//!           "state": 3 }
//!       ] }
//!     ] }
//!   ]
//! }
//! ```
//!
//! `state` carries the stable wire tag of [`ApprovalState`]. Users and
//! targets are written in sorted order; the per-list overlay order is the
//! priority order and is preserved verbatim.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::{ApprovalState, OverlayError, OverlayInfo, Result};
use crate::store::registry::{OverlayMap, TargetMap};

pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    users: Vec<UserNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserNode {
    id: i32,
    targets: Vec<TargetNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TargetNode {
    name: String,
    overlays: Vec<OverlayNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OverlayNode {
    name: String,
    path: String,
    state: u32,
}

/// Reads and writes the registry's state document.
///
/// Writes are atomic: the document goes to a sibling temp file, is flushed
/// and synced, then renamed over the canonical file in one step.
pub struct StateCodec {
    path: PathBuf,
}

impl StateCodec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encode(snapshot: &OverlayMap) -> Result<String> {
        let mut user_ids: Vec<i32> = snapshot.keys().copied().collect();
        user_ids.sort_unstable();

        let mut users = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let target_map = &snapshot[&user_id];
            let mut target_names: Vec<&String> = target_map.keys().collect();
            target_names.sort();

            let mut targets = Vec::with_capacity(target_names.len());
            for name in target_names {
                let overlays = target_map[name]
                    .iter()
                    .map(|overlay| OverlayNode {
                        name: overlay.package_name.clone(),
                        path: overlay.base_code_path.clone(),
                        state: overlay.state.to_wire(),
                    })
                    .collect();
                targets.push(TargetNode {
                    name: name.clone(),
                    overlays,
                });
            }
            users.push(UserNode {
                id: user_id,
                targets,
            });
        }

        let document = StateDocument {
            version: CURRENT_VERSION,
            users,
        };
        serde_json::to_string_pretty(&document)
            .map_err(|err| OverlayError::PersistenceFailed(err.to_string()))
    }

    pub fn decode(text: &str) -> Result<OverlayMap> {
        let document: StateDocument = serde_json::from_str(text)
            .map_err(|err| OverlayError::ReadFailed(format!("malformed state document: {}", err)))?;
        if document.version != CURRENT_VERSION {
            return Err(OverlayError::ReadFailed(format!(
                "unrecognized version {}",
                document.version
            )));
        }

        let mut snapshot = OverlayMap::new();
        for user in document.users {
            let mut targets = TargetMap::new();
            for target in user.targets {
                let mut overlays = Vec::with_capacity(target.overlays.len());
                for node in target.overlays {
                    let state = ApprovalState::from_wire(node.state).ok_or_else(|| {
                        OverlayError::ReadFailed(format!("unknown overlay state tag {}", node.state))
                    })?;
                    overlays.push(OverlayInfo::new(
                        node.name,
                        target.name.clone(),
                        node.path,
                        state,
                        user.id,
                    ));
                }
                targets.insert(target.name, overlays);
            }
            snapshot.insert(user.id, targets);
        }
        Ok(snapshot)
    }

    /// Write the snapshot to the canonical path, atomically.
    pub fn save(&self, snapshot: &OverlayMap) -> Result<()> {
        let text = Self::encode(snapshot)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Read the snapshot back. A missing file is an empty registry; a
    /// malformed or unrecognized document fails and discards any partial
    /// result.
    pub fn load(&self) -> Result<OverlayMap> {
        if !self.path.exists() {
            return Ok(OverlayMap::new());
        }
        let text =
            fs::read_to_string(&self.path).map_err(|err| OverlayError::ReadFailed(err.to_string()))?;
        Self::decode(&text)
    }
}
