//! Error taxonomy for scope lookups and bulk restore.
//!
//! `ScopeNotFound` and `ParentScopeNotFound` are routine during reconciliation
//! (out-of-order and duplicate event delivery) and are caught and logged at
//! the engine boundary. `MultipleScopesFound` signals an index-maintenance or
//! data bug and is deliberately not caught anywhere in the core.

use crate::kind::ScopeKind;

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("scope {kind} {pk} not found")]
    ScopeNotFound { kind: ScopeKind, pk: i64 },

    #[error("no scope matches {criteria}")]
    NoMatch { criteria: String },

    #[error("can't find scope {parent_kind} {parent_pk}, parent of {kind} {pk}")]
    ParentScopeNotFound {
        parent_kind: ScopeKind,
        parent_pk: i64,
        kind: ScopeKind,
        pk: i64,
    },

    #[error("multiple scopes found for {criteria}")]
    MultipleScopesFound { criteria: String },

    #[error("restored only {loaded} of {reported} {kind} scopes")]
    ScopesNotLoaded {
        kind: ScopeKind,
        loaded: usize,
        reported: usize,
    },

    #[error("scope `{kind}` does not have attribute `{attr}`")]
    UnknownAttribute { kind: ScopeKind, attr: String },
}

impl ScopeError {
    /// True for the "expected and routinely caught" lookup failures, covering
    /// the parent-not-found subtype as well.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ScopeNotFound { .. } | Self::NoMatch { .. } | Self::ParentScopeNotFound { .. }
        )
    }
}

pub type ScopeResult<T> = Result<T, ScopeError>;
