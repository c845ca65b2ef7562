//! States of a single turn.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[default]
    Idle,
    /// Assembling the prompt and tool definitions
    Building,
    /// Request sent, nothing received yet
    Calling,
    Streaming,
    ToolDispatch,
    /// Previous response was cut off by length
    Continuation,
    Cancelled,
}

impl TurnState {
    /// Whether `self -> next` is a legal edge.
    pub fn can_transition(self, next: TurnState) -> bool {
        use TurnState::*;
        match (self, next) {
            (Idle, Building) => true,
            (Building, Calling) => true,
            (Calling, Streaming) => true,
            // non-streaming responses skip Streaming
            (Calling | Streaming, ToolDispatch | Continuation | Idle) => true,
            (ToolDispatch | Continuation, Calling) => true,
            (Cancelled, Idle) => true,
            // errors end the turn from anywhere
            (s, Idle) if s != Idle => true,
            (s, Cancelled) => s != Idle && s != Cancelled,
            _ => false,
        }
    }

    pub fn is_active(self) -> bool {
        !matches!(self, TurnState::Idle)
    }

    /// Short status text shown to the operator.
    pub fn label(self) -> &'static str {
        match self {
            TurnState::Idle => "ready",
            TurnState::Building => "preparing context",
            TurnState::Calling => "thinking",
            TurnState::Streaming => "responding",
            TurnState::ToolDispatch => "running tools",
            TurnState::Continuation => "continuing",
            TurnState::Cancelled => "stopped",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::TurnState::*;

    #[test]
    fn happy_path_edges() {
        assert!(Idle.can_transition(Building));
        assert!(Building.can_transition(Calling));
        assert!(Calling.can_transition(Streaming));
        assert!(Streaming.can_transition(ToolDispatch));
        assert!(ToolDispatch.can_transition(Calling));
        assert!(Streaming.can_transition(Continuation));
        assert!(Continuation.can_transition(Calling));
        assert!(Streaming.can_transition(Idle));
    }

    #[test]
    fn cancelled_is_reachable_from_any_active_state() {
        for s in [Building, Calling, Streaming, ToolDispatch, Continuation] {
            assert!(s.can_transition(Cancelled), "{s:?}");
        }
        assert!(!Idle.can_transition(Cancelled));
        assert!(Cancelled.can_transition(Idle));
    }

    #[test]
    fn illegal_edges() {
        assert!(!Idle.can_transition(Calling));
        assert!(!Building.can_transition(ToolDispatch));
        assert!(!ToolDispatch.can_transition(Streaming));
    }
}
