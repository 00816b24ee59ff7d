//! Domain-specific error types for isolation operations.
//!
//! Typed errors let callers tell input problems apart from policy
//! violations without parsing message strings.

/// Errors returned by the isolation, resource and network managers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IsolationError {
    /// An argument was missing, empty or malformed.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input.
        message: String,
    },

    /// A well-formed value violates a configured invariant.
    #[error("policy violation: {message}")]
    PolicyViolation {
        /// Which invariant was violated.
        message: String,
    },

    /// A host port is on the blocked-port list.
    #[error("port {port} is blocked by isolation policy")]
    BlockedPort {
        /// The offending host port.
        port: u16,
    },

    /// The subnet derived for a workspace is already held by another one.
    #[error("subnet {subnet} for workspace {workspace_id} is already allocated to workspace {holder}")]
    SubnetConflict {
        /// The contested /24.
        subnet: String,
        /// Workspace that asked for the subnet.
        workspace_id: String,
        /// Workspace already holding it.
        holder: String,
    },

    /// A lookup found nothing.
    #[error("{what} not found")]
    NotFound {
        /// Description of the missing thing.
        what: String,
    },

    /// Background work was requested outside a tokio runtime.
    #[error("cannot {action}: no async runtime is running")]
    NoRuntime {
        /// What the caller tried to start.
        action: String,
    },
}

impl IsolationError {
    /// Creates an `InvalidInput` error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a `PolicyViolation` error.
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation {
            message: message.into(),
        }
    }

    /// Creates a `BlockedPort` error.
    pub fn blocked_port(port: u16) -> Self {
        Self::BlockedPort { port }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a `NoRuntime` error.
    pub fn no_runtime(action: impl Into<String>) -> Self {
        Self::NoRuntime {
            action: action.into(),
        }
    }

    /// The error every operation returns for a blank workspace ID.
    pub fn empty_workspace_id() -> Self {
        Self::invalid_input("workspace ID cannot be empty")
    }

    /// Returns true if this is an input-validation error.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput { .. })
    }

    /// Returns true if a configured policy rejected the value.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation { .. } | Self::BlockedPort { .. } | Self::SubnetConflict { .. }
        )
    }

    /// Returns true if this is a lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
