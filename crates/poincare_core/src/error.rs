use thiserror::Error;

/// Configuration errors raised by the shooting core.
///
/// These are returned through `anyhow::Result`; callers that need to react to a
/// specific case can `downcast_ref::<ShootingError>()`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShootingError {
    /// `delta == 0` selects the analytical Jacobian, which is sequential only.
    #[error("analytical Jacobian requires sequential mode; use a positive finite-difference step")]
    ParallelAnalyticalJacobian,

    /// Branch switching needs the deferred flow configuration to rebuild the flow.
    #[error("branch switching needs a deferred flow configuration")]
    FlowFinalized,

    #[error("section count mismatch: expected {expected}, got {found}")]
    SectionCount { expected: usize, found: usize },

    #[error("{what} dimension mismatch: expected {expected}, got {found}")]
    Dimension {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}
