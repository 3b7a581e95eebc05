//! Conversation identity: a stable, order-independent key for a pair of
//! participants, plus canonical-identifier resolution.

use crate::error::EngineError;

/// Derive the conversation key for a pair of canonical participant
/// identifiers: the lexicographically sorted pair joined by `_`.
///
/// Case-sensitive by contract, and no numeric/string coercion happens here:
/// callers resolve each participant to one canonical identifier first (see
/// [`IdentityResolver`]). `conversation_id(a, b) == conversation_id(b, a)`
/// for all non-empty `a`, `b`.
pub fn conversation_id(a: &str, b: &str) -> Result<String, EngineError> {
    if a.is_empty() || b.is_empty() {
        return Err(EngineError::validation(
            "participant identifiers must be non-empty",
        ));
    }
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    Ok(format!("{first}_{second}"))
}

/// The two identifiers a user may be known by: the local numeric row id and
/// the remote auth id. Either can be missing depending on where the caller
/// got the reference from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParticipantRef {
    pub local_id: Option<String>,
    pub auth_id: Option<String>,
}

impl ParticipantRef {
    pub fn local(id: impl Into<String>) -> Self {
        Self {
            local_id: Some(id.into()),
            auth_id: None,
        }
    }

    pub fn auth(id: impl Into<String>) -> Self {
        Self {
            local_id: None,
            auth_id: Some(id.into()),
        }
    }

    pub fn both(local_id: impl Into<String>, auth_id: impl Into<String>) -> Self {
        Self {
            local_id: Some(local_id.into()),
            auth_id: Some(auth_id.into()),
        }
    }
}

/// Picks the single canonical identifier for a participant.
///
/// Every call site that derives a conversation key resolves through this
/// first; without one canonical form, the same two humans can end up split
/// across two conversation ids.
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve_canonical(&self, participant: &ParticipantRef) -> Result<String, EngineError>;
}

/// Default resolver: the remote auth id is the canonical form whenever it is
/// known, since it is the only identifier that exists in both stores; the
/// local id is accepted only when no auth id is available.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthFirstResolver;

impl IdentityResolver for AuthFirstResolver {
    fn resolve_canonical(&self, participant: &ParticipantRef) -> Result<String, EngineError> {
        let auth = participant.auth_id.as_deref().filter(|s| !s.is_empty());
        let local = participant.local_id.as_deref().filter(|s| !s.is_empty());
        auth.or(local)
            .map(str::to_string)
            .ok_or_else(|| EngineError::validation("participant reference carries no identifier"))
    }
}
