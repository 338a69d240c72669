use std::fmt;

/// State of an overlay package as tracked by the registry.
///
/// An overlay is *approved* when every technical and security precondition
/// for using it holds; it is *enabled* when it is approved and currently
/// participating in resource lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalState {
    /// The target package is not installed for this user.
    NotApprovedMissingTarget,
    /// No idmap file exists; the packages may share no resources.
    NotApprovedNoIdmap,
    /// User-controlled overlay, currently inactive.
    ApprovedDisabled,
    /// User-controlled overlay, currently active.
    ApprovedEnabled,
    /// The overlay touches resources the target did not grant and the
    /// signatures do not match.
    NotApprovedDangerousOverlay,
    /// The overlay package is disabled at the package level.
    NotApprovedComponentDisabled,
    /// System-supplied overlay; always active, cannot be disabled.
    ApprovedAlwaysEnabled,
}

impl ApprovalState {
    /// Stable numeric tag used in the persisted state document.
    ///
    /// Frozen at document version 1; never renumber.
    pub fn to_wire(self) -> u32 {
        match self {
            ApprovalState::NotApprovedMissingTarget => 0,
            ApprovalState::NotApprovedNoIdmap => 1,
            ApprovalState::ApprovedDisabled => 2,
            ApprovalState::ApprovedEnabled => 3,
            ApprovalState::NotApprovedDangerousOverlay => 4,
            ApprovalState::NotApprovedComponentDisabled => 5,
            ApprovalState::ApprovedAlwaysEnabled => 6,
        }
    }

    pub fn from_wire(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ApprovalState::NotApprovedMissingTarget),
            1 => Some(ApprovalState::NotApprovedNoIdmap),
            2 => Some(ApprovalState::ApprovedDisabled),
            3 => Some(ApprovalState::ApprovedEnabled),
            4 => Some(ApprovalState::NotApprovedDangerousOverlay),
            5 => Some(ApprovalState::NotApprovedComponentDisabled),
            6 => Some(ApprovalState::ApprovedAlwaysEnabled),
            _ => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(
            self,
            ApprovalState::ApprovedEnabled | ApprovalState::ApprovedAlwaysEnabled
        )
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApprovalState::NotApprovedMissingTarget => "not-approved:missing-target",
            ApprovalState::NotApprovedNoIdmap => "not-approved:no-idmap",
            ApprovalState::ApprovedDisabled => "approved:disabled",
            ApprovalState::ApprovedEnabled => "approved:enabled",
            ApprovalState::NotApprovedDangerousOverlay => "not-approved:dangerous",
            ApprovalState::NotApprovedComponentDisabled => "not-approved:component-disabled",
            ApprovalState::ApprovedAlwaysEnabled => "approved:always-enabled",
        };
        write!(f, "{}", name)
    }
}

/// Immutable record tracking one overlay package for one user.
///
/// Records are replaced, never mutated; every state transition produces a
/// fresh value via [`OverlayInfo::with_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayInfo {
    /// Package name of the overlay package.
    pub package_name: String,
    /// Package name of the target package the overlay decorates.
    pub target_package_name: String,
    /// Absolute path to the overlay's code artifact.
    pub base_code_path: String,
    pub state: ApprovalState,
    pub user_id: i32,
}

impl OverlayInfo {
    pub fn new(
        package_name: impl Into<String>,
        target_package_name: impl Into<String>,
        base_code_path: impl Into<String>,
        state: ApprovalState,
        user_id: i32,
    ) -> Self {
        Self {
            package_name: package_name.into(),
            target_package_name: target_package_name.into(),
            base_code_path: base_code_path.into(),
            state,
            user_id,
        }
    }

    /// Copy of this record with a different state.
    pub fn with_state(&self, state: ApprovalState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }
}

/// Read-only view of one installed package, fetched from the host package
/// database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFacts {
    pub package_name: String,
    /// Target declared in the package manifest; `Some` iff this package is
    /// an overlay.
    pub overlay_target: Option<String>,
    pub base_code_path: String,
    /// False when the package is disabled at the package level.
    pub component_enabled: bool,
    /// True for system-partition packages.
    pub is_system: bool,
    /// Priority declared in the manifest; orders system overlays.
    pub requested_overlay_priority: i32,
    pub uid: i32,
}

impl PackageFacts {
    pub fn is_overlay_package(&self) -> bool {
        self.overlay_target.is_some()
    }
}

/// Outcome of comparing two packages' signing certificates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureResult {
    Match,
    NoMatch,
    UnknownPackage,
}

/// Package lifecycle event delivered by the host package database.
#[derive(Debug, Clone)]
pub enum PackageEvent {
    Added {
        package: String,
    },
    Changed {
        package: String,
    },
    Replaced {
        package: String,
    },
    Removed {
        package: String,
        /// True when the package was removed for every user at once.
        all_users: bool,
        user_id: i32,
        /// True when the removal is the first half of a package upgrade.
        replacing: bool,
    },
}

/// Host broadcast emitted after a committed registry change.
///
/// Implementations address the broadcast with a `package:<name>` URI;
/// `OverlaysReordered` carries the target package, the others the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    OverlayAdded,
    OverlayRemoved,
    OverlayChanged,
    OverlaysReordered,
}

impl BroadcastKind {
    pub fn action(self) -> &'static str {
        match self {
            BroadcastKind::OverlayAdded => "OVERLAY_ADDED",
            BroadcastKind::OverlayRemoved => "OVERLAY_REMOVED",
            BroadcastKind::OverlayChanged => "OVERLAY_CHANGED",
            BroadcastKind::OverlaysReordered => "OVERLAYS_REORDERED",
        }
    }
}
