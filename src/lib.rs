// ============================================================================
// overlayd - runtime resource overlay registry
// ============================================================================
//
// Tracks which installed overlay packages may decorate which target
// packages, per user; decides whether each overlay is approved; keeps a
// strict priority order over every target's overlays; persists the whole
// registry across reboots; and exposes the query/enable/reorder surface
// clients use to drive it.

pub mod config;
pub mod core;
pub mod driver;
pub mod facade;
pub mod idmap;
pub mod interface;
pub mod rules;
pub mod service;
pub mod store;

// Re-export main types for convenience
pub use config::ServiceConfig;
pub use core::{
    ApprovalState, BroadcastKind, OverlayError, OverlayInfo, PackageEvent, PackageFacts, Result,
    SignatureResult,
};
pub use driver::PackageDriver;
pub use facade::{CallerIdentity, Capability, ServiceFacade};
pub use idmap::{ExecIdmapTool, IdmapManager};
pub use interface::{AssetPathPublisher, BroadcastBus, IdmapTool, PackageDatabase, UserRegistry};
pub use rules::Rules;
pub use service::{OverlayService, OWNER_USER};
pub use store::{OverlayMap, PersistWorker, Registry, RegistryListener, StateCodec, TargetMap};
