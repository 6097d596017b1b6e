//! Caller tagging for errors that leave the engine.
//!
//! Handler failures are republished on the failing caller's private error
//! channel by the transport layer. The transport only sees an opaque error,
//! so the engine tags each one with the caller it happened for before it
//! crosses that boundary.

use simscope_model::TopicRouter;

/// An operation failure plus the identity it should be routed back to.
/// `authid` is `None` for failures with no acting user, such as background
/// reconciliation; those stay in the logs instead of going to a channel.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TaggedError {
    authid: Option<String>,
    #[source]
    source: anyhow::Error,
}

impl TaggedError {
    pub fn untagged(source: anyhow::Error) -> Self {
        Self {
            authid: None,
            source,
        }
    }

    pub fn for_caller(authid: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            authid: Some(authid.into()),
            source,
        }
    }

    pub fn authid(&self) -> Option<&str> {
        self.authid.as_deref()
    }

    /// The error channel this should be republished on, when a caller is
    /// attached.
    pub fn topic(&self, router: &TopicRouter) -> Option<String> {
        self.authid.as_deref().map(|a| router.error_topic(a))
    }

    pub fn into_inner(self) -> anyhow::Error {
        self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn tagged_errors_route_to_the_caller_channel() {
        let router = TopicRouter::new("world.simscope");
        let err = TaggedError::for_caller("s1@x.io", anyhow!("phase step failed"));
        assert_eq!(
            err.topic(&router).as_deref(),
            Some("world.simscope.error.s1@x.io")
        );
        assert_eq!(err.to_string(), "phase step failed");
    }

    #[test]
    fn untagged_errors_have_no_channel() {
        let router = TopicRouter::new("world.simscope");
        let err = TaggedError::untagged(anyhow!("restore failed"));
        assert!(err.topic(&router).is_none());
    }
}
