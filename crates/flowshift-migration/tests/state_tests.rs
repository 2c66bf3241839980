use flowshift_migration::state_machine::{allowed_transitions, validate_transition};
use flowshift_migration::types::AttachmentState;
use proptest::prelude::*;

#[test]
fn test_attached_transitions() {
    assert!(validate_transition(AttachmentState::Attached, AttachmentState::Detached).is_ok());
    assert!(validate_transition(AttachmentState::Attached, AttachmentState::Removed).is_ok());

    // Attaching requires a prior detach
    assert!(validate_transition(AttachmentState::Attached, AttachmentState::Reattached).is_err());
}

#[test]
fn test_detached_transitions() {
    assert!(validate_transition(AttachmentState::Detached, AttachmentState::Reattached).is_ok());
    assert!(validate_transition(AttachmentState::Detached, AttachmentState::Removed).is_ok());
    assert!(validate_transition(AttachmentState::Detached, AttachmentState::Detached).is_err());
}

#[test]
fn test_final_states_are_terminal() {
    assert!(allowed_transitions(AttachmentState::Reattached).is_empty());
    assert!(allowed_transitions(AttachmentState::Removed).is_empty());
    assert!(validate_transition(AttachmentState::Reattached, AttachmentState::Detached).is_err());
    assert!(validate_transition(AttachmentState::Removed, AttachmentState::Reattached).is_err());
}

fn any_state() -> impl Strategy<Value = AttachmentState> {
    prop_oneof![
        Just(AttachmentState::Attached),
        Just(AttachmentState::Detached),
        Just(AttachmentState::Reattached),
        Just(AttachmentState::Removed),
    ]
}

proptest! {
    #[test]
    fn prop_validation_matches_allowed_table(from in any_state(), to in any_state()) {
        let allowed = allowed_transitions(from);
        prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
    }

    #[test]
    fn prop_at_most_one_cycle(path in proptest::collection::vec(any_state(), 0..8)) {
        // Walk any sequence, applying only accepted steps.
        let mut state = AttachmentState::Attached;
        let mut reattached = 0;
        for to in path {
            if validate_transition(state, to).is_ok() {
                state = to;
                if to == AttachmentState::Reattached {
                    reattached += 1;
                }
            }
        }
        prop_assert!(reattached <= 1);
    }
}
