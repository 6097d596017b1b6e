//! Bus address derivation and parsing.
//!
//! Every entity publishes and answers calls under
//! `<root>.model.<kind>.<pk>.<name>`; the game root drops the pk segment.
//! A handful of fixed addresses sit outside the model namespace: the
//! per-user error channel, the initial-scopes procedure, and the chat
//! namespace.

use std::sync::OnceLock;

use regex::Regex;

use crate::kind::ScopeKind;
use crate::scope::Scope;

fn model_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^model\.(?P<kind>[a-z]+)(?:\.(?P<pk>\d+))?\.(?P<name>[a-z_0-9.]+)$")
            .unwrap()
    })
}

/// Builds and parses addresses under one root namespace.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    root: String,
}

/// A parsed bus address, most specific namespaces first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicAddress {
    /// The fixed procedure handing a connecting user its visible scopes.
    InitUserScopes,
    /// A user's private error channel; the segment is the caller identity.
    Error { authid: String },
    /// Anything under the chat namespace, with the remainder preserved.
    Chat { rest: String },
    /// An entity address. `pk` is absent for game-level operations.
    Model {
        kind: ScopeKind,
        pk: Option<i64>,
        name: String,
    },
    /// In the namespace but matching no known shape.
    Unknown,
    /// Outside this root namespace entirely.
    Foreign,
}

impl TopicRouter {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `<root>.model.<kind>.<pk>.<name>`, pk omitted when absent.
    pub fn model_topic(&self, kind: ScopeKind, pk: Option<i64>, name: &str) -> String {
        match pk {
            Some(pk) => format!("{}.model.{}.{}.{}", self.root, kind, pk, name),
            None => format!("{}.model.{}.{}", self.root, kind, name),
        }
    }

    pub fn scope_topic(&self, scope: &Scope, name: &str) -> String {
        self.model_topic(scope.kind(), Some(scope.pk()), name)
    }

    /// Game-level address; the root entity never carries a pk segment.
    pub fn game_topic(&self, name: &str) -> String {
        self.model_topic(ScopeKind::Game, None, name)
    }

    pub fn error_topic(&self, authid: &str) -> String {
        format!("{}.error.{}", self.root, authid)
    }

    pub fn init_user_scopes_topic(&self) -> String {
        format!("{}.init_user_scopes", self.root)
    }

    pub fn chat_topic(&self, name: &str) -> String {
        format!("{}.chat.{}", self.root, name)
    }

    pub fn parse(&self, uri: &str) -> TopicAddress {
        let prefix = format!("{}.", self.root);
        let Some(rest) = uri.strip_prefix(&prefix) else {
            return TopicAddress::Foreign;
        };

        // First segment decides the namespace; compare it whole so names
        // like `init_user_scopes_v2` fall through to Unknown.
        let (head, tail) = match rest.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (rest, None),
        };
        match (head, tail) {
            ("init_user_scopes", None) => return TopicAddress::InitUserScopes,
            ("error", Some(authid)) if !authid.is_empty() => {
                return TopicAddress::Error {
                    authid: authid.to_string(),
                };
            }
            ("chat", Some(chat)) if !chat.is_empty() => {
                return TopicAddress::Chat {
                    rest: chat.to_string(),
                };
            }
            _ => {}
        }

        let Some(caps) = model_re().captures(rest) else {
            return TopicAddress::Unknown;
        };
        let Ok(kind) = caps["kind"].parse::<ScopeKind>() else {
            return TopicAddress::Unknown;
        };
        let pk = caps.name("pk").and_then(|m| m.as_str().parse::<i64>().ok());
        TopicAddress::Model {
            kind,
            pk,
            name: caps["name"].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> TopicRouter {
        TopicRouter::new("world.simscope")
    }

    #[test]
    fn scope_topics_carry_the_pk() {
        let scope = Scope::new(ScopeKind::World, json!({"id": 2, "run": 1})).unwrap();
        assert_eq!(
            router().scope_topic(&scope, "update_child"),
            "world.simscope.model.world.2.update_child"
        );
    }

    #[test]
    fn game_topics_drop_the_pk() {
        assert_eq!(
            router().game_topic("get_phases"),
            "world.simscope.model.game.get_phases"
        );
    }

    #[test]
    fn parse_model_uri_with_pk() {
        let addr = router().parse("world.simscope.model.runuser.5.get_scope_tree");
        assert_eq!(
            addr,
            TopicAddress::Model {
                kind: ScopeKind::RunUser,
                pk: Some(5),
                name: "get_scope_tree".to_string(),
            }
        );
    }

    #[test]
    fn parse_game_uri_without_pk() {
        let addr = router().parse("world.simscope.model.game.get_roles");
        assert_eq!(
            addr,
            TopicAddress::Model {
                kind: ScopeKind::Game,
                pk: None,
                name: "get_roles".to_string(),
            }
        );
    }

    #[test]
    fn parse_fixed_addresses() {
        let r = router();
        assert_eq!(
            r.parse("world.simscope.init_user_scopes"),
            TopicAddress::InitUserScopes
        );
        assert_eq!(
            r.parse("world.simscope.error.alice@example.com"),
            TopicAddress::Error {
                authid: "alice@example.com".to_string()
            }
        );
        assert_eq!(
            r.parse("world.simscope.chat.rooms.lobby"),
            TopicAddress::Chat {
                rest: "rooms.lobby".to_string()
            }
        );
    }

    #[test]
    fn foreign_and_malformed_uris() {
        let r = router();
        assert_eq!(r.parse("other.root.model.run.1.x"), TopicAddress::Foreign);
        assert_eq!(
            r.parse("world.simscope.model.dragon.1.get_scope"),
            TopicAddress::Unknown
        );
        assert_eq!(r.parse("world.simscope.bogus"), TopicAddress::Unknown);
    }

    #[test]
    fn fixed_addresses_match_whole_segments_only() {
        let r = router();
        assert_eq!(
            r.parse("world.simscope.init_user_scopes_v2"),
            TopicAddress::Unknown
        );
        assert_eq!(
            r.parse("world.simscope.init_user_scopes.extra"),
            TopicAddress::Unknown
        );
        assert_eq!(r.parse("world.simscope.errors.alice"), TopicAddress::Unknown);
        assert_eq!(r.parse("world.simscope.error."), TopicAddress::Unknown);
        assert_eq!(r.parse("world.simscope.chatter.lobby"), TopicAddress::Unknown);
    }
}
