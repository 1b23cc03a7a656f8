//! Invite state machine
//!
//! ```text
//! pending --accept--> accepted
//!    |
//!    +--expire--> expired
//!    +--cancel--> canceled
//! ```
//!
//! Every state other than `pending` is absorbing.

use serde::{Deserialize, Serialize};
use tenantry_common::StateError;

/// Stored invite state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "invite_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InviteState {
    Pending,
    Accepted,
    Expired,
    Canceled,
}

impl InviteState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn valid_transitions(&self) -> &'static [InviteState] {
        match self {
            Self::Pending => &[Self::Accepted, Self::Expired, Self::Canceled],
            Self::Accepted | Self::Expired | Self::Canceled => &[],
        }
    }
}

impl std::fmt::Display for InviteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Expired => write!(f, "expired"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Events that trigger invite state transitions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InviteEvent {
    Accept,
    /// `expires_at` reached or uses exhausted
    Expire,
    /// Explicit revoke, or the inviting member left
    Cancel,
}

impl std::fmt::Display for InviteEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Expire => write!(f, "expire"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

/// Guard context for invite transitions
#[derive(Debug, Clone, Default)]
pub struct InviteGuardContext {
    pub is_expired: bool,
    pub uses_exhausted: bool,
}

pub struct InviteStateMachine;

impl InviteStateMachine {
    /// Attempt a state transition with guard conditions
    pub fn transition(
        current: InviteState,
        event: InviteEvent,
        context: Option<&InviteGuardContext>,
    ) -> Result<InviteState, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        let next = match event {
            InviteEvent::Accept => {
                if let Some(ctx) = context {
                    if ctx.is_expired {
                        return Err(StateError::GuardFailed(
                            "Cannot accept expired invite".to_string(),
                        ));
                    }
                    if ctx.uses_exhausted {
                        return Err(StateError::GuardFailed(
                            "Invite has no uses left".to_string(),
                        ));
                    }
                }
                InviteState::Accepted
            }
            InviteEvent::Expire => InviteState::Expired,
            InviteEvent::Cancel => InviteState::Canceled,
        };

        Ok(next)
    }

    pub fn can_transition(
        current: InviteState,
        event: InviteEvent,
        context: Option<&InviteGuardContext>,
    ) -> bool {
        Self::transition(current, event, context).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_transitions() {
        let cases = [
            (InviteEvent::Accept, InviteState::Accepted),
            (InviteEvent::Expire, InviteState::Expired),
            (InviteEvent::Cancel, InviteState::Canceled),
        ];
        for (event, expected) in cases {
            assert_eq!(
                InviteStateMachine::transition(InviteState::Pending, event, None),
                Ok(expected),
                "pending via {}",
                event
            );
            assert!(InviteState::Pending.valid_transitions().contains(&expected));
        }
    }

    #[test]
    fn test_terminal_states_absorb_every_event() {
        for state in [
            InviteState::Accepted,
            InviteState::Expired,
            InviteState::Canceled,
        ] {
            assert!(state.is_terminal());
            assert!(state.valid_transitions().is_empty());
            for event in [InviteEvent::Accept, InviteEvent::Expire, InviteEvent::Cancel] {
                assert_eq!(
                    InviteStateMachine::transition(state, event, None),
                    Err(StateError::TerminalState(state.to_string()))
                );
            }
        }
    }

    #[test]
    fn test_accept_guards() {
        let expired = InviteGuardContext {
            is_expired: true,
            uses_exhausted: false,
        };
        assert!(matches!(
            InviteStateMachine::transition(InviteState::Pending, InviteEvent::Accept, Some(&expired)),
            Err(StateError::GuardFailed(_))
        ));

        let exhausted = InviteGuardContext {
            is_expired: false,
            uses_exhausted: true,
        };
        assert!(!InviteStateMachine::can_transition(
            InviteState::Pending,
            InviteEvent::Accept,
            Some(&exhausted)
        ));

        // Guards only apply to acceptance
        assert!(InviteStateMachine::can_transition(
            InviteState::Pending,
            InviteEvent::Cancel,
            Some(&expired)
        ));
    }
}
