//! Discord forum routing.
//!
//! Picks the forum a session's thread is created in, from the trusted
//! directory table and whether a human or an AI started the session.

use std::path::Path;

use teleclaude_core::config::{DiscordConfig, ForumRouteConfig};
use teleclaude_core::types::Session;

/// Who started a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Started from a chat by a person.
    Human,
    /// Started by another agent.
    Ai,
}

impl SessionRole {
    /// Role of a session.
    #[must_use]
    pub const fn of(session: &Session) -> Self {
        if session.initiated_by_ai { Self::Ai } else { Self::Human }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "human" => Some(Self::Human),
            "ai" | "agent" => Some(Self::Ai),
            _ => None,
        }
    }
}

/// Routing rule.
#[derive(Debug, Clone)]
pub struct ForumRule {
    /// Target forum channel.
    pub forum_id: String,
    /// Working-directory prefix; `None` matches any directory.
    pub path_prefix: Option<String>,
    /// Role; `None` matches both.
    pub role: Option<SessionRole>,
    /// Priority (higher = first).
    pub priority: i32,
}

impl From<&ForumRouteConfig> for ForumRule {
    fn from(config: &ForumRouteConfig) -> Self {
        Self {
            forum_id: config.forum_id.clone(),
            path_prefix: config.path_prefix.clone(),
            role: config.role.as_deref().and_then(SessionRole::parse),
            priority: config.priority,
        }
    }
}

/// Route sessions to forum channels.
#[derive(Debug, Clone)]
pub struct ForumRouter {
    rules: Vec<ForumRule>,
    default_forum: Option<String>,
}

impl ForumRouter {
    /// Create a router with an optional fallback forum.
    #[must_use]
    pub const fn new(default_forum: Option<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_forum,
        }
    }

    /// Build from Discord configuration.
    #[must_use]
    pub fn from_config(config: &DiscordConfig) -> Self {
        let mut router = Self::new(config.default_forum_id.clone());
        for rule in &config.forums {
            router.add_rule(rule.into());
        }
        router
    }

    /// Add a routing rule.
    pub fn add_rule(&mut self, rule: ForumRule) {
        self.rules.push(rule);
        // Stable sort keeps config order among equal priorities
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Forum for a working directory and role.
    #[must_use]
    pub fn route(&self, working_directory: &str, role: SessionRole) -> Option<&str> {
        let dir = Path::new(working_directory);

        for rule in &self.rules {
            if let Some(prefix) = &rule.path_prefix {
                if !dir.starts_with(prefix) {
                    continue;
                }
            }

            if let Some(r) = rule.role {
                if r != role {
                    continue;
                }
            }

            return Some(&rule.forum_id);
        }

        self.default_forum.as_deref()
    }

    /// Forum for a session.
    #[must_use]
    pub fn route_session(&self, session: &Session) -> Option<&str> {
        self.route(&session.working_directory, SessionRole::of(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(forum: &str, prefix: Option<&str>, role: Option<SessionRole>, priority: i32) -> ForumRule {
        ForumRule {
            forum_id: forum.to_string(),
            path_prefix: prefix.map(str::to_string),
            role,
            priority,
        }
    }

    #[test]
    fn test_default_routing() {
        let router = ForumRouter::new(Some("general".to_string()));
        assert_eq!(router.route("/anywhere", SessionRole::Human), Some("general"));

        let empty = ForumRouter::new(None);
        assert_eq!(empty.route("/anywhere", SessionRole::Human), None);
    }

    #[test]
    fn test_prefix_and_priority() {
        let mut router = ForumRouter::new(Some("general".to_string()));
        router.add_rule(rule("work", Some("/home/me/work"), None, 10));
        router.add_rule(rule("client", Some("/home/me/work/client"), None, 20));

        assert_eq!(router.route("/home/me/work/client/app", SessionRole::Human), Some("client"));
        assert_eq!(router.route("/home/me/work/other", SessionRole::Human), Some("work"));
        // Component-wise prefix, not string prefix
        assert_eq!(router.route("/home/me/workshop", SessionRole::Human), Some("general"));
    }

    #[test]
    fn test_role_routing() {
        let mut router = ForumRouter::new(Some("general".to_string()));
        router.add_rule(rule("ai-sessions", None, Some(SessionRole::Ai), 5));

        assert_eq!(router.route("/tmp", SessionRole::Ai), Some("ai-sessions"));
        assert_eq!(router.route("/tmp", SessionRole::Human), Some("general"));
    }

    #[test]
    fn test_from_config() {
        let config = DiscordConfig {
            default_forum_id: Some("1".to_string()),
            forums: vec![ForumRouteConfig {
                forum_id: "2".to_string(),
                path_prefix: Some("/srv".to_string()),
                role: Some("human".to_string()),
                priority: 1,
            }],
            ..Default::default()
        };

        let router = ForumRouter::from_config(&config);
        assert_eq!(router.route("/srv/api", SessionRole::Human), Some("2"));
        assert_eq!(router.route("/srv/api", SessionRole::Ai), Some("1"));
    }
}
