//! Route access rules.
//!
//! An `AccessPolicy` is an ordered list of rules mapping a method and path
//! pattern to the access a route requires. The first matching rule wins;
//! the fallback applies when nothing matches.
//!
//! # Invariants
//! - Rules are evaluated in insertion order.
//! - Resolution is pure: it depends only on the method and path.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use axum::http::Method;

static NO_SCOPES: LazyLock<BTreeSet<String>> = LazyLock::new(BTreeSet::new);

/// What a route requires from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    /// No token is needed. A token that is presented is still validated.
    Anonymous,
    /// Any admitted token.
    Authenticated,
    /// An admitted token holding every listed scope.
    Scopes(BTreeSet<String>),
}

impl Access {
    /// Shorthand for `Access::Scopes` from string slices.
    #[must_use]
    pub fn scopes<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Scopes(scopes.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// Scopes a token must hold; empty unless this is `Access::Scopes`.
    #[must_use]
    pub fn required_scopes(&self) -> &BTreeSet<String> {
        match self {
            Self::Scopes(scopes) => scopes,
            Self::Anonymous | Self::Authenticated => &NO_SCOPES,
        }
    }
}

/// A path pattern: an exact path, or a prefix ending in `/**`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPattern {
    Exact(String),
    /// Matches the prefix itself and everything below it.
    Prefix(String),
}

impl PathPattern {
    /// Parse `pattern`. A trailing `/**` makes it a prefix pattern.
    #[must_use]
    pub fn parse(pattern: &str) -> Self {
        pattern.strip_suffix("/**").map_or_else(
            || Self::Exact(pattern.to_string()),
            |prefix| Self::Prefix(prefix.to_string()),
        )
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Prefix(prefix) => path
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/')),
        }
    }
}

/// One access rule. `method: None` matches every method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub method: Option<Method>,
    pub pattern: PathPattern,
    pub access: Access,
}

impl RouteRule {
    #[must_use]
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.method.as_ref().is_none_or(|m| m == method) && self.pattern.matches(path)
    }
}

/// Ordered route rules plus a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPolicy {
    rules: Vec<RouteRule>,
    fallback: Access,
}

impl AccessPolicy {
    #[must_use]
    pub const fn new(fallback: Access) -> Self {
        Self {
            rules: Vec::new(),
            fallback,
        }
    }

    /// Append a rule. Earlier rules take precedence.
    #[must_use]
    pub fn rule(mut self, method: Option<Method>, pattern: &str, access: Access) -> Self {
        self.rules.push(RouteRule {
            method,
            pattern: PathPattern::parse(pattern),
            access,
        });
        self
    }

    /// Access required for `method` on `path`.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> &Access {
        self.rules
            .iter()
            .find(|rule| rule.matches(method, path))
            .map_or(&self.fallback, |rule| &rule.access)
    }

    /// The rules of the course service: API docs and actuator endpoints are
    /// open, `GET /api/secure/ping` needs `course.read`, and everything else
    /// gets `fallback`.
    #[must_use]
    pub fn course_service(fallback: Access) -> Self {
        Self::new(fallback)
            .rule(None, "/v3/api-docs/**", Access::Anonymous)
            .rule(None, "/swagger-ui/**", Access::Anonymous)
            .rule(None, "/swagger-ui.html", Access::Anonymous)
            .rule(None, "/actuator/health", Access::Anonymous)
            .rule(None, "/actuator/info", Access::Anonymous)
            .rule(
                Some(Method::GET),
                "/api/secure/ping",
                Access::scopes(["course.read"]),
            )
    }
}
