//! Per-collection lifecycle: the state a collection occupies is always
//! *derived* from [`crate::validator::validate`], never tracked as
//! in-memory orchestrator state. The validator is the source of truth.

/// One point in a collection's forward progress, plus the two error
/// side-states the orchestrator can land a collection in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CollectionState {
    Unseen,
    Downloaded,
    Converted,
    Sorted,
    Indexed,
    MetaBuilt,
    Complete,
    /// A shard's whole-file decode failed and it's marked `.quarantined`;
    /// excluded from further phases until its source `.gz` is replaced
    /// (mtime newer than the marker), at which point the next `ingest` run
    /// clears the marker and retries it.
    QuarantinedShard,
    /// A phase failed with a retryable [`cc_index_core::error::PipelineError`]
    /// and attempts remain; the orchestrator will retry on the next pass.
    RetryableFailure,
}

impl std::fmt::Display for CollectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unseen => "UNSEEN",
            Self::Downloaded => "DOWNLOADED",
            Self::Converted => "CONVERTED",
            Self::Sorted => "SORTED",
            Self::Indexed => "INDEXED",
            Self::MetaBuilt => "META_BUILT",
            Self::Complete => "COMPLETE",
            Self::QuarantinedShard => "QUARANTINED_SHARD",
            Self::RetryableFailure => "RETRYABLE_FAILURE",
        };
        f.write_str(s)
    }
}

impl CollectionState {
    /// True only for the terminal forward-progress state. Used by the
    /// driver to decide which phase to attempt next.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Whether this state represents an error side-state rather than
    /// ordinary forward progress.
    pub fn is_error(self) -> bool {
        matches!(self, Self::QuarantinedShard | Self::RetryableFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_state_names() {
        assert_eq!(CollectionState::Unseen.to_string(), "UNSEEN");
        assert_eq!(CollectionState::MetaBuilt.to_string(), "META_BUILT");
        assert_eq!(CollectionState::QuarantinedShard.to_string(), "QUARANTINED_SHARD");
    }

    #[test]
    fn only_complete_is_terminal() {
        assert!(CollectionState::Complete.is_terminal());
        assert!(!CollectionState::Indexed.is_terminal());
    }

    #[test]
    fn error_states_flagged() {
        assert!(CollectionState::QuarantinedShard.is_error());
        assert!(CollectionState::RetryableFailure.is_error());
        assert!(!CollectionState::Sorted.is_error());
    }

    #[test]
    fn ordering_follows_progress() {
        assert!(CollectionState::Unseen < CollectionState::Downloaded);
        assert!(CollectionState::Sorted < CollectionState::Indexed);
        assert!(CollectionState::Indexed < CollectionState::Complete);
    }
}
