use crate::state::Participant;

/// Fire-and-forget commands dispatched into the engine actor.
#[derive(Debug, Clone)]
pub enum EngineAction {
    /// Screen entry: ensure the summary row, mark history read for the
    /// viewer, run one reconciliation pass, attach the live subscription.
    OpenConversation {
        conversation_id: String,
        participant_a: Participant,
        participant_b: Participant,
    },
    /// Screen exit: tear down the live subscription. Safe when nothing is
    /// open.
    CloseConversation {
        conversation_id: String,
    },
    /// Best-effort bulk pull-then-merge across every remote conversation the
    /// participant appears in. Never raises; skipped if one is running.
    Reconcile {
        participant_id: String,
    },
}

impl EngineAction {
    /// Log-safe action tag (never includes message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            EngineAction::OpenConversation { .. } => "OpenConversation",
            EngineAction::CloseConversation { .. } => "CloseConversation",
            EngineAction::Reconcile { .. } => "Reconcile",
        }
    }
}
