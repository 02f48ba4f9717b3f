//! Route templates and the ordered table that resolves paths against them.
//!
//! A template such as `users/:username/books/:book-id` is compiled into a
//! [`PathMatcher`]: every `:name` placeholder becomes a capture group that
//! matches one or more of `[A-Za-z0-9_-]` and never crosses a `/`. Matching
//! is a substring search, so a template matches any path that *contains*
//! its skeleton.

use std::fmt;

use regex::Regex;

use crate::error::{HandlerError, RouteError};
use crate::http::{Request, Response};

/// Placeholder values extracted from a path, in template declaration order.
pub type Params = Vec<String>;

/// A placeholder token in a template.
const PLACEHOLDER: &str = r":[A-Za-z0-9_-]+";

/// What a placeholder compiles to.
const SEGMENT: &str = r"([A-Za-z0-9_-]+)";

/// Application logic bound to a route.
///
/// `handle` receives the parsed request, a fresh response buffer and the
/// parameter values captured by the route's template. Returning an error
/// (or panicking) turns the response into a `500`.
pub trait Handler: Send + Sync + 'static {
    fn handle(
        &self,
        request: &Request,
        response: &mut Response,
        params: Params,
    ) -> Result<(), HandlerError>;
}

/// A [`Handler`] backed by a closure. Built with [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wraps a closure as a [`Handler`].
///
/// ```
/// use lineserve::{handler_fn, RouteTable};
///
/// let mut routes = RouteTable::new();
/// routes.register("hello/:name", handler_fn(|_req, res, params| {
///     res.write(format!("<h1>Hello {}</h1>", params[0]));
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Request, &mut Response, Params) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    FnHandler(f)
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request, &mut Response, Params) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    fn handle(
        &self,
        request: &Request,
        response: &mut Response,
        params: Params,
    ) -> Result<(), HandlerError> {
        (self.0)(request, response, params)
    }
}

/// A compiled route template.
#[derive(Clone)]
pub struct PathMatcher {
    template: String,
    regex: Regex,
    placeholders: Vec<String>,
}

impl PathMatcher {
    /// Compiles a template, escaping regex metacharacters in its literal parts.
    pub fn compile(template: &str) -> Result<Self, RouteError> {
        Self::build(template, true)
    }

    /// Compiles a template, passing literal parts through as raw pattern syntax.
    ///
    /// Literals are not allowed to add capture groups, so the captured
    /// values still line up with the placeholders.
    pub fn compile_raw(template: &str) -> Result<Self, RouteError> {
        Self::build(template, false)
    }

    fn build(template: &str, escape: bool) -> Result<Self, RouteError> {
        let invalid = |source| RouteError::InvalidPattern {
            template: template.to_string(),
            source,
        };
        let token = Regex::new(PLACEHOLDER).map_err(invalid)?;

        let mut pattern = String::with_capacity(template.len() * 2);
        let mut placeholders = Vec::new();
        let mut last = 0;

        for found in token.find_iter(template) {
            push_literal(&mut pattern, &template[last..found.start()], escape);
            pattern.push_str(SEGMENT);
            placeholders.push(found.as_str()[1..].to_string());
            last = found.end();
        }
        push_literal(&mut pattern, &template[last..], escape);

        let regex = Regex::new(&pattern).map_err(invalid)?;

        // group 0 is the whole match
        let groups = regex.captures_len() - 1;
        if groups != placeholders.len() {
            return Err(RouteError::CaptureMismatch {
                template: template.to_string(),
                placeholders: placeholders.len(),
                groups,
            });
        }

        Ok(Self {
            template: template.to_string(),
            regex,
            placeholders,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Placeholder names, without the leading `:`, in declaration order.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Returns true if the template's skeleton occurs anywhere in `path`.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Matches `path` and returns the placeholder values in declaration order.
    pub fn captures(&self, path: &str) -> Option<Params> {
        let captures = self.regex.captures(path)?;
        Some(
            captures
                .iter()
                .skip(1)
                .map(|group| group.map_or_else(String::new, |m| m.as_str().to_string()))
                .collect(),
        )
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathMatcher")
            .field("template", &self.template)
            .field("pattern", &self.regex.as_str())
            .finish()
    }
}

fn push_literal(pattern: &mut String, literal: &str, escape: bool) {
    if escape {
        pattern.push_str(&regex::escape(literal));
    } else {
        pattern.push_str(literal);
    }
}

struct RouteEntry {
    matcher: PathMatcher,
    handler: Box<dyn Handler>,
}

/// The result of a successful lookup.
pub struct RouteMatch<'a> {
    /// Handler bound to the matching route
    pub handler: &'a dyn Handler,
    /// Template the route was registered with
    pub template: &'a str,
    /// Captured placeholder values in declaration order
    pub params: Params,
}

/// Ordered collection of routes. The first registered route that matches wins.
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    escape_literals: bool,
}

impl RouteTable {
    /// Creates an empty table that escapes literal template characters.
    pub fn new() -> Self {
        Self::with_escaping(true)
    }

    /// Creates an empty table with the given literal mode.
    ///
    /// With `escape_literals` off, templates are compiled with
    /// [`PathMatcher::compile_raw`].
    pub fn with_escaping(escape_literals: bool) -> Self {
        Self {
            entries: Vec::new(),
            escape_literals,
        }
    }

    /// Compiles `template` and appends a route for it.
    ///
    /// # Errors
    /// Returns [`RouteError::MissingTemplate`] for an absent template, or a
    /// compile error. The table is left unchanged on error.
    pub fn try_register<'t, H: Handler>(
        &mut self,
        template: impl Into<Option<&'t str>>,
        handler: H,
    ) -> Result<(), RouteError> {
        let template = template.into().ok_or(RouteError::MissingTemplate)?;
        let matcher = if self.escape_literals {
            PathMatcher::compile(template)?
        } else {
            PathMatcher::compile_raw(template)?
        };

        self.entries.push(RouteEntry {
            matcher,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// Like [`try_register`](Self::try_register), returning whether the route was added.
    pub fn register<'t, H: Handler>(
        &mut self,
        template: impl Into<Option<&'t str>>,
        handler: H,
    ) -> bool {
        match self.try_register(template, handler) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("route rejected: {}", e);
                false
            }
        }
    }

    /// Finds the first route whose template matches `path`.
    pub fn resolve(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.entries.iter().find_map(|entry| {
            entry.matcher.captures(path).map(|params| RouteMatch {
                handler: entry.handler.as_ref(),
                template: entry.matcher.template(),
                params,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered templates in resolution order.
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.matcher.template())
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTable")
            .field("templates", &self.templates().collect::<Vec<_>>())
            .field("escape_literals", &self.escape_literals)
            .finish()
    }
}
