use crate::types::AttachmentState;

/// Rejected attachment transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: AttachmentState,
    pub to: AttachmentState,
}

/// Validates an attachment transition.
///
/// With the `strict-debug` feature an illegal transition panics instead of
/// returning an error.
pub fn validate_transition(
    from: AttachmentState,
    to: AttachmentState,
) -> Result<(), IllegalTransition> {
    if allowed(from, to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal attachment transition attempted: {from:?} -> {to:?}");

        Err(IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(from: AttachmentState) -> Vec<AttachmentState> {
    use AttachmentState::*;
    match from {
        Attached => vec![Detached, Removed],
        Detached => vec![Reattached, Removed],
        Reattached => vec![],
        Removed => vec![],
    }
}

fn allowed(from: AttachmentState, to: AttachmentState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
