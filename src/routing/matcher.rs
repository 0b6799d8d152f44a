//! Request predicates for the [routing table](crate::RoutingTable).
//!
//! A [`Matcher`] looks at a request and may record captures (path
//! parameters) in a [`MatchInfo`]. Matchers compose with `&`, `|` and `!`:
//!
//! ```
//! use strand_web::routing::{method_is, path_match, url, starts_with};
//! use strand_web::Method;
//!
//! let upload = path_match("/files/*path") & method_is(Method::Post);
//! let read_only = !(method_is(Method::Post) | method_is(Method::Put));
//! let api = url(starts_with("/api/"));
//! ```
//!
//! Both operands of a combinator see the same `MatchInfo`, left side first.
//! Captures written by a failed rule are discarded by the table before the
//! next rule runs.

use crate::http::{
    request::Request,
    types::{Method, Version},
};
use std::{
    collections::HashMap,
    fmt,
    ops::{BitAnd, BitOr, Not},
    sync::Arc,
};

/// Route parameters captured while matching, by name.
pub type MatchInfo = HashMap<String, String>;

/// A cloneable request predicate.
#[derive(Clone)]
pub struct Matcher(Arc<dyn Fn(&Request, &mut MatchInfo) -> bool + Send + Sync>);

impl Matcher {
    /// Wraps a closure.
    ///
    /// ```
    /// use strand_web::{routing::Matcher, Request};
    ///
    /// let has_body = Matcher::new(|req: &Request, _| req.content_length() > 0);
    /// ```
    #[inline]
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Request, &mut MatchInfo) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    /// Evaluates the predicate.
    #[inline]
    pub fn matches(&self, req: &Request, info: &mut MatchInfo) -> bool {
        (self.0)(req, info)
    }

    /// Both must match; `other` runs only if `self` matched.
    #[inline]
    pub fn and(self, other: Matcher) -> Matcher {
        Matcher::new(move |req, info| self.matches(req, info) && other.matches(req, info))
    }

    /// Either must match; `other` runs only if `self` did not.
    #[inline]
    pub fn or(self, other: Matcher) -> Matcher {
        Matcher::new(move |req, info| self.matches(req, info) || other.matches(req, info))
    }

    /// Inverts the result. Captures of the inner matcher are kept.
    #[allow(clippy::should_implement_trait)]
    #[inline]
    pub fn not(self) -> Matcher {
        Matcher::new(move |req, info| !self.matches(req, info))
    }
}

impl BitAnd for Matcher {
    type Output = Matcher;

    #[inline]
    fn bitand(self, rhs: Matcher) -> Matcher {
        self.and(rhs)
    }
}

impl BitOr for Matcher {
    type Output = Matcher;

    #[inline]
    fn bitor(self, rhs: Matcher) -> Matcher {
        self.or(rhs)
    }
}

impl Not for Matcher {
    type Output = Matcher;

    #[inline]
    fn not(self) -> Matcher {
        Matcher::not(self)
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Matcher")
    }
}

// Built-in matchers

/// Matches every request.
#[inline]
pub fn any() -> Matcher {
    Matcher::new(|_, _| true)
}

#[inline]
pub fn method_is(method: Method) -> Matcher {
    Matcher::new(move |req, _| req.method() == method)
}

#[inline]
pub fn version_is(version: Version) -> Matcher {
    Matcher::new(move |req, _| req.version() == version)
}

/// Applies a string matcher to the raw request target.
///
/// ```
/// use strand_web::routing::{url, ends_with};
///
/// let images = url(ends_with(".png"));
/// ```
pub fn url<F>(matcher: F) -> Matcher
where
    F: Fn(&str, &mut MatchInfo) -> bool + Send + Sync + 'static,
{
    Matcher::new(move |req, info| matcher(req.url(), info))
}

/// Applies a string matcher to header `name`; fails if the header is absent.
pub fn header<F>(name: &str, matcher: F) -> Matcher
where
    F: Fn(&str, &mut MatchInfo) -> bool + Send + Sync + 'static,
{
    let name = name.to_owned();
    Matcher::new(move |req, info| req.header(&name).is_some_and(|value| matcher(value, info)))
}

// String matchers

/// String matchers, for [`url`] and [`header`].
pub fn equals(
    expected: impl Into<String>,
) -> impl Fn(&str, &mut MatchInfo) -> bool + Clone + Send + Sync + 'static {
    let expected = expected.into();
    move |value: &str, _: &mut MatchInfo| value == expected
}

pub fn starts_with(
    prefix: impl Into<String>,
) -> impl Fn(&str, &mut MatchInfo) -> bool + Clone + Send + Sync + 'static {
    let prefix = prefix.into();
    move |value: &str, _: &mut MatchInfo| value.starts_with(prefix.as_str())
}

pub fn ends_with(
    suffix: impl Into<String>,
) -> impl Fn(&str, &mut MatchInfo) -> bool + Clone + Send + Sync + 'static {
    let suffix = suffix.into();
    move |value: &str, _: &mut MatchInfo| value.ends_with(suffix.as_str())
}

pub fn contains(
    needle: impl Into<String>,
) -> impl Fn(&str, &mut MatchInfo) -> bool + Clone + Send + Sync + 'static {
    let needle = needle.into();
    move |value: &str, _: &mut MatchInfo| value.contains(needle.as_str())
}

// Path templates

/// Matches the request path against a template.
///
/// The template is split on `/`:
///
/// | Component | Matches                                                        |
/// |-----------|----------------------------------------------------------------|
/// | `name`    | exactly `name`                                                 |
/// | `:name`   | any one component, captured as `name`                          |
/// | `*name`   | every remaining component, captured as `name` joined with `/`  |
/// | `*`       | everything from here on, nothing captured                      |
///
/// Empty components are ignored on both sides, so `/a//b/` behaves like
/// `/a/b`. The query string is not part of the path. A request with fewer
/// components than the template matches only if the next template
/// component is a wildcard.
///
/// ```
/// use strand_web::routing::path_match;
///
/// let matcher = path_match("/users/:id/files/*path");
/// // "/users/7/files/a/b.txt" captures id = "7", path = "a/b.txt"
/// ```
pub fn path_match(template: &str) -> Matcher {
    let pattern: Vec<String> = template
        .split('/')
        .filter(|component| !component.is_empty())
        .map(str::to_owned)
        .collect();

    Matcher::new(move |req, info| {
        match_components(&pattern, &req.parsed_url().path_components, info)
    })
}

fn match_components(pattern: &[String], path: &[String], info: &mut MatchInfo) -> bool {
    let mut current = 0;

    for component in path.iter().filter(|component| !component.is_empty()) {
        let Some(expected) = pattern.get(current) else {
            return false;
        };

        if expected == "*" {
            return true;
        }

        if let Some(name) = expected.strip_prefix(':') {
            info.insert(name.to_owned(), component.clone());
            current += 1;
        } else if let Some(name) = expected.strip_prefix('*') {
            // Greedy: the wildcard stays current for the rest of the path
            info.entry(name.to_owned())
                .and_modify(|captured| {
                    captured.push('/');
                    captured.push_str(component);
                })
                .or_insert_with(|| component.clone());
        } else if expected == component {
            current += 1;
        } else {
            return false;
        }
    }

    pattern
        .get(current)
        .map_or(true, |expected| expected.starts_with('*'))
}

/// Matches the requests of a REST resource rooted at `path`:
///
/// - `GET`, `PUT`, `POST` or `DELETE` on `path` (the collection)
/// - `GET`, `PUT` or `DELETE` on `path/:id` (one item, captured as `id`)
pub fn rest_resources(path: &str) -> Matcher {
    let path = path.trim_end_matches('/');

    let collection = (method_is(Method::Get)
        | method_is(Method::Put)
        | method_is(Method::Post)
        | method_is(Method::Delete))
        & path_match(path);

    let item = (method_is(Method::Get) | method_is(Method::Put) | method_is(Method::Delete))
        & path_match(&format!("{path}/:id"));

    collection | item
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(matcher: &Matcher, method: Method, url: &str) -> Option<MatchInfo> {
        let req = Request::for_test(method, url);
        let mut info = MatchInfo::new();

        matcher.matches(&req, &mut info).then_some(info)
    }

    fn captures(pairs: &[(&str, &str)]) -> MatchInfo {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn path_templates() {
        #[rustfmt::skip]
        let cases = [
            ("/test1/:id/test2", "/test1/123/test2",    Some(vec![("id", "123")])),
            ("/test1/:id/test2", "/test1/123",          None),
            ("/test1/:id/test2", "/test1/123/test2/x",  None),
            ("/test2/*p",        "/test2/123/abc/xyz",  Some(vec![("p", "123/abc/xyz")])),
            ("/test2/*p",        "/test2",              Some(vec![])),
            ("/test3/*",         "/test3/a/b",          Some(vec![])),
            ("/test3/*",         "/test4/a",            None),
            ("/",                "/",                   Some(vec![])),
            ("/",                "/a",                  None),
            ("/a/b",             "//a///b/?q=1",        Some(vec![])),
            ("/a/:x/:y",         "/a/1/2",              Some(vec![("x", "1"), ("y", "2")])),
            ("/A",               "/a",                  None),
        ];

        for (template, path, expected) in cases {
            let got = check(&path_match(template), Method::Get, path);
            let expected = expected.map(|pairs| captures(&pairs));

            assert_eq!(got, expected, "template {template:?}, path {path:?}");
        }
    }

    #[test]
    fn path_match_is_deterministic() {
        let matcher = path_match("/x/:id");
        let req = Request::for_test(Method::Get, "/x/42");

        for _ in 0..3 {
            let mut info = MatchInfo::new();
            assert!(matcher.matches(&req, &mut info));
            assert_eq!(info, captures(&[("id", "42")]));
        }
    }

    #[test]
    fn combinators() {
        let post_upload = path_match("/test2/*p") & method_is(Method::Post);

        assert_eq!(
            check(&post_upload, Method::Post, "/test2/123/abc/xyz"),
            Some(captures(&[("p", "123/abc/xyz")]))
        );
        assert_eq!(check(&post_upload, Method::Get, "/test2/123/abc/xyz"), None);

        let not_get = !method_is(Method::Get);
        assert!(check(&not_get, Method::Put, "/").is_some());
        assert!(check(&not_get, Method::Get, "/").is_none());

        let either = method_is(Method::Head).or(url(equals("/ping")));
        assert!(check(&either, Method::Head, "/x").is_some());
        assert!(check(&either, Method::Get, "/ping").is_some());
        assert!(check(&either, Method::Get, "/pong").is_none());

        assert!(check(&any().and(any().not()), Method::Get, "/").is_none());
    }

    #[test]
    fn short_circuit() {
        let record = |name: &'static str, result: bool| {
            Matcher::new(move |_, info: &mut MatchInfo| {
                info.insert(name.to_string(), String::new());
                result
            })
        };

        let info = check(&(record("a", true) | record("b", true)), Method::Get, "/").unwrap();
        assert!(info.contains_key("a") && !info.contains_key("b"));

        let mut info = MatchInfo::new();
        let req = Request::for_test(Method::Get, "/");
        assert!(!(record("c", false) & record("d", true)).matches(&req, &mut info));
        assert!(info.contains_key("c") && !info.contains_key("d"));
    }

    #[test]
    fn rest_resource_methods() {
        let items = rest_resources("/items");

        for method in [Method::Get, Method::Put, Method::Post, Method::Delete] {
            assert_eq!(check(&items, method, "/items"), Some(MatchInfo::new()), "{method}");
        }
        for method in [Method::Get, Method::Put, Method::Delete] {
            assert_eq!(
                check(&items, method, "/items/9"),
                Some(captures(&[("id", "9")])),
                "{method}"
            );
        }

        assert!(check(&items, Method::Post, "/items/9").is_none());
        assert!(check(&items, Method::Patch, "/items").is_none());
        assert!(check(&items, Method::Get, "/items/9/parts").is_none());
    }

    #[test]
    fn string_and_header_matchers() {
        let mut req = Request::for_test(Method::Get, "/static/logo.png");
        req.headers.insert("X-Api-Key", "secret-token");

        #[rustfmt::skip]
        let cases = [
            (url(starts_with("/static/")),            true),
            (url(ends_with(".png")),                  true),
            (url(contains("logo")),                   true),
            (url(equals("/static")),                  false),
            (header("x-api-key", starts_with("sec")), true),
            (header("x-missing", |_: &str, _: &mut MatchInfo| true), false),
            (version_is(Version::Http11),             true),
            (version_is(Version::Http10),             false),
        ];

        for (i, (matcher, expected)) in cases.into_iter().enumerate() {
            assert_eq!(matcher.matches(&req, &mut MatchInfo::new()), expected, "case {i}");
        }
    }
}
