pub mod error;
pub mod types;

pub use error::{OverlayError, Result};
pub use types::{
    ApprovalState, BroadcastKind, OverlayInfo, PackageEvent, PackageFacts, SignatureResult,
};
