//! Multi-route path matching.
//!
//! All registered endpoint patterns are compiled into one radix tree at
//! build time; resolving a request path is a single tree walk that yields
//! the winning endpoint index plus its raw parameter captures. Pattern
//! conflicts are construction errors, never request-time failures.

use thiserror::Error;
use tracing::trace;

type InnerRouter = matchit::Router<usize>;

/// Maps request paths to endpoint indices.
pub struct PathRouter {
    inner: InnerRouter,
    patterns: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RouterBuildError {
    #[error("cannot register route pattern '{pattern}': {source}")]
    Insert {
        pattern: String,
        source: matchit::InsertError,
    },
}

impl PathRouter {
    /// Builds the router from every endpoint's pattern, in registration
    /// order. The position in `patterns` becomes the endpoint index
    /// reported by [`PathRouter::lookup`].
    pub fn new<I>(patterns: I) -> Result<Self, RouterBuildError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut inner = InnerRouter::new();
        let mut stored = Vec::new();
        for (index, pattern) in patterns.into_iter().enumerate() {
            let pattern = pattern.into();
            inner
                .insert(pattern.clone(), index)
                .map_err(|source| RouterBuildError::Insert { pattern: pattern.clone(), source })?;
            stored.push(pattern);
        }
        Ok(Self { inner, patterns: stored })
    }

    /// Resolves a normalized path to the matching endpoint, or `None` when
    /// no registered pattern matches.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch> {
        match self.inner.at(path) {
            Ok(matched) => Some(RouteMatch {
                index: *matched.value,
                params: RawPathParams::collect(&matched.params),
            }),
            Err(e) => {
                trace!("no route for '{}': {}", path, e);
                None
            }
        }
    }

    pub fn pattern(&self, index: usize) -> &str {
        &self.patterns[index]
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl std::fmt::Debug for PathRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRouter").field("patterns", &self.patterns).finish()
    }
}

/// A resolved route: which endpoint won and what its pattern captured.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub index: usize,
    pub params: RawPathParams,
}

/// Raw path parameter captures, owned so they outlive the matched path.
#[derive(Debug, Clone, Default)]
pub struct RawPathParams(Vec<(String, String)>);

impl RawPathParams {
    pub fn empty() -> Self {
        Self::default()
    }

    fn collect(params: &matchit::Params<'_, '_>) -> Self {
        Self(params.iter().map(|(name, value)| (name.to_owned(), value.to_owned())).collect())
    }

    /// The raw captured value for a parameter name, if that name exists in
    /// the matched pattern.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
