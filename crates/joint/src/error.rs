use crate::description::JointKind;

/// Fatal errors raised while loading or assembling a joint.
///
/// These abort construction and are surfaced to the mechanism loader.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("joint [{joint}]: model '{model}' not found in world")]
    UnresolvedModel { joint: String, model: String },
    #[error("joint [{joint}]: link '{link}' not found in model '{model}'")]
    UnresolvedLink {
        joint: String,
        model: String,
        link: String,
    },
    #[error("joint [{joint}]: malformed description: {reason}")]
    Malformed { joint: String, reason: String },
    #[error("joint [{joint}]: {kind:?} joint takes {expected} axes, description has {found}")]
    AxisCount {
        joint: String,
        kind: JointKind,
        expected: usize,
        found: usize,
    },
    #[error("invalid joint document: {0}")]
    Document(#[from] serde_json::Error),
    #[error("joint [{joint}]: {op} is not valid in state {state:?}")]
    State {
        joint: String,
        op: &'static str,
        state: crate::core::JointState,
    },
    #[error("joint [{joint}]: {backend} back-end rejected assembly: {reason}")]
    Backend {
        joint: String,
        backend: &'static str,
        reason: String,
    },
}

/// Per-call errors during active simulation.
///
/// Never fatal: the joint logs them, records a notice and returns a neutral
/// default instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JointError {
    #[error("{op}: index {index} out of range (angle count {count})")]
    Index {
        op: &'static str,
        index: usize,
        count: usize,
    },
    #[error("{op}: not supported by the {backend} back-end")]
    Unsupported {
        op: &'static str,
        backend: &'static str,
    },
    #[error("{op}: joint is detached")]
    Detached { op: &'static str },
    #[error("{op}: joint is not initialized")]
    NotInitialized { op: &'static str },
    #[error("{op}: link no longer exists")]
    StaleLink { op: &'static str },
    #[error("{op}: rejected argument: {reason}")]
    InvalidArgument {
        op: &'static str,
        reason: &'static str,
    },
}

impl JointError {
    pub fn op(&self) -> &'static str {
        match self {
            Self::Index { op, .. }
            | Self::Unsupported { op, .. }
            | Self::Detached { op }
            | Self::NotInitialized { op }
            | Self::StaleLink { op }
            | Self::InvalidArgument { op, .. } => op,
        }
    }
}

/// A recorded fail-soft diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct JointNotice {
    pub joint: String,
    pub op: &'static str,
    pub error: JointError,
}
