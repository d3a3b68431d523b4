//! Order State Machine Service
//!
//! Pure transition table over [`OrderState`] driven by [`OrderEventKind`].

use crate::domain::order_execution::value_objects::{OrderEventKind, OrderState};

/// Outcome of applying an event to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The event moved the order to a new state.
    Applied {
        /// State before the event.
        from: OrderState,
        /// State after the event.
        to: OrderState,
    },
    /// The event is not valid in this state; the state is unchanged.
    Ignored {
        /// Unchanged state.
        state: OrderState,
        /// Event that was absorbed.
        kind: OrderEventKind,
    },
}

impl Transition {
    /// Resulting state.
    #[must_use]
    pub const fn state(&self) -> OrderState {
        match self {
            Self::Applied { to, .. } => *to,
            Self::Ignored { state, .. } => *state,
        }
    }

    /// Returns true if the state changed.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Order State Machine for validating transitions.
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Check if a state transition is valid.
    #[must_use]
    pub const fn is_valid_transition(from: OrderState, to: OrderState) -> bool {
        matches!(
            (from, to),
            (OrderState::Pending, OrderState::Acknowledged)
                | (OrderState::Acknowledged, OrderState::PartiallyFilled)
                | (OrderState::PartiallyFilled, OrderState::Filled)
                | (
                    OrderState::Pending | OrderState::Acknowledged | OrderState::PartiallyFilled,
                    OrderState::Cancelled | OrderState::Rejected | OrderState::Expired,
                )
        )
    }

    /// State reached by applying `kind` in `current`.
    ///
    /// Combinations outside the table return `current` unchanged.
    #[must_use]
    pub const fn next_state(current: OrderState, kind: OrderEventKind) -> OrderState {
        match (current, kind) {
            (OrderState::Pending, OrderEventKind::Ack) => OrderState::Acknowledged,
            (OrderState::Acknowledged, OrderEventKind::Fill) => OrderState::PartiallyFilled,
            (OrderState::PartiallyFilled, OrderEventKind::Fill) => OrderState::Filled,
            (
                OrderState::Pending | OrderState::Acknowledged | OrderState::PartiallyFilled,
                OrderEventKind::Reject,
            ) => OrderState::Rejected,
            (OrderState::Acknowledged | OrderState::PartiallyFilled, OrderEventKind::Cancel) => {
                OrderState::Cancelled
            }
            _ => current,
        }
    }

    /// Apply `kind` in `current`, reporting whether anything changed.
    #[must_use]
    pub const fn apply(current: OrderState, kind: OrderEventKind) -> Transition {
        let next = Self::next_state(current, kind);
        if Self::is_valid_transition(current, next) {
            Transition::Applied {
                from: current,
                to: next,
            }
        } else {
            Transition::Ignored {
                state: current,
                kind,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    use OrderEventKind::{Ack, Cancel, Fill, Reject};
    use OrderState::{
        Acknowledged, Cancelled, Expired, Filled, PartiallyFilled, Pending, Rejected,
    };

    const VALID: [(OrderState, OrderState); 12] = [
        (Pending, Acknowledged),
        (Acknowledged, PartiallyFilled),
        (PartiallyFilled, Filled),
        (Pending, Cancelled),
        (Pending, Rejected),
        (Pending, Expired),
        (Acknowledged, Cancelled),
        (Acknowledged, Rejected),
        (Acknowledged, Expired),
        (PartiallyFilled, Cancelled),
        (PartiallyFilled, Rejected),
        (PartiallyFilled, Expired),
    ];

    #[test]
    fn transition_table_is_exhaustive() {
        for from in OrderState::ALL {
            for to in OrderState::ALL {
                let expected = VALID.contains(&(from, to));
                assert_eq!(
                    OrderStateMachine::is_valid_transition(from, to),
                    expected,
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn self_transitions_are_invalid() {
        for state in OrderState::ALL {
            assert!(!OrderStateMachine::is_valid_transition(state, state));
        }
    }

    #[test]
    fn no_transitions_from_terminal_states() {
        for terminal in [Filled, Cancelled, Rejected, Expired] {
            for to in OrderState::ALL {
                assert!(!OrderStateMachine::is_valid_transition(terminal, to));
            }
        }
    }

    #[test_case(Pending, Ack, Acknowledged)]
    #[test_case(Pending, Reject, Rejected)]
    #[test_case(Acknowledged, Fill, PartiallyFilled)]
    #[test_case(Acknowledged, Cancel, Cancelled)]
    #[test_case(Acknowledged, Reject, Rejected)]
    #[test_case(PartiallyFilled, Fill, Filled)]
    #[test_case(PartiallyFilled, Cancel, Cancelled)]
    #[test_case(PartiallyFilled, Reject, Rejected)]
    fn next_state_follows_table(current: OrderState, kind: OrderEventKind, expected: OrderState) {
        assert_eq!(OrderStateMachine::next_state(current, kind), expected);
        assert!(OrderStateMachine::apply(current, kind).is_applied());
    }

    #[test_case(Pending, Fill)]
    #[test_case(Pending, Cancel)]
    #[test_case(Acknowledged, Ack)]
    #[test_case(PartiallyFilled, Ack)]
    #[test_case(Filled, Fill)]
    #[test_case(Filled, Cancel)]
    #[test_case(Cancelled, Ack)]
    #[test_case(Rejected, Fill)]
    #[test_case(Expired, Reject)]
    fn undefined_combinations_leave_state_unchanged(current: OrderState, kind: OrderEventKind) {
        assert_eq!(OrderStateMachine::next_state(current, kind), current);
        assert_eq!(
            OrderStateMachine::apply(current, kind),
            Transition::Ignored {
                state: current,
                kind
            }
        );
    }
}
