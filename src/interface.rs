//! Interfaces to the host-platform collaborators.
//!
//! The core never talks to the package database, user accounts, the idmap
//! binary, running applications or the broadcast bus directly; it goes
//! through the traits below. Production wires in platform-backed
//! implementations, tests substitute fakes.
//!
//! Collaborator unavailability is expressed in the return types (`None`,
//! empty collections) and is absorbed by the callers: reconciliation
//! degrades to a consistent "not installed" view and the next pass
//! converges.

use std::collections::HashMap;

use crate::core::{BroadcastKind, PackageFacts, SignatureResult};

/// Read-only view of the host package database.
pub trait PackageDatabase: Send + Sync {
    /// Facts for one installed package, or `None` when the package is not
    /// installed for the user (or the database cannot be reached).
    fn get_package_info(&self, package: &str, user_id: i32) -> Option<PackageFacts>;

    /// Compare the signing certificates of two packages. `None` when the
    /// database cannot be reached.
    fn check_signatures(&self, a: &str, b: &str) -> Option<SignatureResult>;

    /// All overlay packages installed for the user.
    fn list_overlay_packages(&self, user_id: i32) -> Vec<PackageFacts>;
}

/// View of the host user-account registry.
pub trait UserRegistry: Send + Sync {
    /// Users that will exist after the current boot completes.
    fn live_user_ids(&self) -> Vec<i32>;

    /// All known users.
    fn user_ids(&self) -> Vec<i32>;

    /// Whether the given restriction key is set for the user.
    fn has_restriction(&self, user_id: i32, key: &str) -> bool;
}

/// The external idmap generator.
///
/// Both operations return the tool's exit code; zero means success.
pub trait IdmapTool: Send + Sync {
    fn idmap(&self, target_path: &str, overlay_path: &str, shared_gid: i32) -> i32;

    fn remove_idmap(&self, base_code_path: &str) -> i32;
}

/// Pushes computed asset search paths into running applications.
pub trait AssetPathPublisher: Send + Sync {
    /// Publish the ordered search paths for each target package of one user.
    fn publish(&self, user_id: i32, paths: HashMap<String, Vec<String>>);
}

/// Announces committed registry changes to the rest of the system.
///
/// Implementations address the broadcast with a `package:<name>` URI.
pub trait BroadcastBus: Send + Sync {
    fn send(&self, kind: BroadcastKind, package: &str, user_id: i32);
}
