//! Response header rewriting
//! Handles Location redirects and Set-Cookie domain/path/security edits

use crate::config::RewriteContext;
use hyper::header::{HeaderMap, HeaderValue, LOCATION, SET_COOKIE};

/// Rewrite a Location header so the redirect resolves from the client's
/// point of view
///
/// An absolute same-origin location gets its origin replaced with the
/// public origin plus prefix (single, leftmost replacement); a
/// root-relative location gets the prefix prepended; anything else is
/// relative to the current path and needs no rewrite. The header is only
/// written back when the value actually changed.
///
/// Returns the (old, new) pair when a rewrite happened.
pub fn rewrite_location(headers: &mut HeaderMap, ctx: &RewriteContext) -> Option<(String, String)> {
    let location = headers.get(LOCATION)?.to_str().ok()?.to_string();

    let rewritten = if let Some(rest) = location.strip_prefix(&ctx.upstream_origin) {
        format!("{}{}{}", ctx.public_origin, ctx.path_prefix, rest)
    } else if location.starts_with('/') {
        format!("{}{}", ctx.path_prefix, location)
    } else {
        return None;
    };

    if rewritten == location {
        return None;
    }

    let value = HeaderValue::from_str(&rewritten).ok()?;
    headers.insert(LOCATION, value);
    Some((location, rewritten))
}

/// Rewrite every Set-Cookie header in place
///
/// Set-Cookie repeats the header name, so all values are collected, the
/// header is cleared, and each rewritten cookie is re-added; appending
/// without clearing would accumulate duplicates. A value that is not
/// valid UTF-8 is re-added unchanged.
pub fn rewrite_cookies(headers: &mut HeaderMap, ctx: &RewriteContext) {
    let cookies: Vec<HeaderValue> = headers.get_all(SET_COOKIE).iter().cloned().collect();
    if cookies.is_empty() {
        return;
    }

    headers.remove(SET_COOKIE);
    for cookie in cookies {
        let rewritten = cookie
            .to_str()
            .ok()
            .map(|c| rewrite_cookie(c, ctx))
            .and_then(|c| HeaderValue::from_str(&c).ok())
            .unwrap_or(cookie);
        headers.append(SET_COOKIE, rewritten);
    }
}

/// Rewrite a single Set-Cookie value
///
/// Three independent, attribute-wise edits: a Domain equal to the
/// upstream host (or its dot-prefixed form) becomes the public host; a
/// missing Path is appended as `prefix + "/"` and a bare `Path=/` is
/// rewritten to the same; a Secure attribute is appended when the public
/// scheme is HTTPS. Applying the function twice yields the same cookie.
pub fn rewrite_cookie(cookie: &str, ctx: &RewriteContext) -> String {
    if cookie.trim().is_empty() {
        return cookie.to_string();
    }

    let mut parts: Vec<String> = cookie.split(';').map(|p| p.trim().to_string()).collect();
    let dotted_domain = format!(".{}", ctx.upstream_domain);
    let mut has_path = false;
    let mut has_secure = false;

    // skip the leading name=value pair; attributes follow it
    for part in parts.iter_mut().skip(1) {
        if let Some((name, value)) = part.split_once('=') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("domain") {
                if value == ctx.upstream_domain || value == dotted_domain {
                    *part = format!("Domain={}", ctx.public_host);
                }
            } else if name.eq_ignore_ascii_case("path") {
                has_path = true;
                if value == "/" {
                    *part = format!("Path={}/", ctx.path_prefix);
                }
            }
        } else if part.eq_ignore_ascii_case("secure") {
            has_secure = true;
        }
    }

    if !has_path {
        parts.push(format!("Path={}/", ctx.path_prefix));
    }
    if ctx.secure_cookies && !has_secure {
        parts.push("Secure".to_string());
    }

    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(prefix: &str) -> RewriteContext {
        RewriteContext {
            upstream_host: "vritjobs.com".to_string(),
            upstream_domain: "vritjobs.com".to_string(),
            upstream_origin: "https://vritjobs.com".to_string(),
            public_host: "www.mydomain.com".to_string(),
            public_origin: "https://www.mydomain.com".to_string(),
            path_prefix: prefix.to_string(),
            secure_cookies: true,
        }
    }

    fn http_ctx(prefix: &str) -> RewriteContext {
        RewriteContext {
            secure_cookies: false,
            public_origin: "http://www.mydomain.com".to_string(),
            ..ctx(prefix)
        }
    }

    #[test]
    fn test_location_absolute_origin_rewritten() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://vritjobs.com/jobs/42"));

        let changed = rewrite_location(&mut headers, &ctx("/hemanta/proxy"));

        assert!(changed.is_some());
        assert_eq!(
            headers.get(LOCATION).unwrap(),
            "https://www.mydomain.com/hemanta/proxy/jobs/42"
        );
    }

    #[test]
    fn test_location_root_relative_prefixed() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/login"));

        rewrite_location(&mut headers, &ctx("/hemanta/proxy"));

        assert_eq!(headers.get(LOCATION).unwrap(), "/hemanta/proxy/login");
    }

    #[test]
    fn test_location_relative_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("details.html"));

        let changed = rewrite_location(&mut headers, &ctx("/hemanta/proxy"));

        assert!(changed.is_none());
        assert_eq!(headers.get(LOCATION).unwrap(), "details.html");
    }

    #[test]
    fn test_location_foreign_origin_untouched() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("https://other.example.com/x"));

        assert!(rewrite_location(&mut headers, &ctx("/app")).is_none());
        assert_eq!(headers.get(LOCATION).unwrap(), "https://other.example.com/x");
    }

    #[test]
    fn test_location_no_change_reports_none() {
        // empty prefix and a root-relative location: the rewrite is a no-op
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/login"));

        assert!(rewrite_location(&mut headers, &ctx("")).is_none());
    }

    #[test]
    fn test_location_absent() {
        let mut headers = HeaderMap::new();
        assert!(rewrite_location(&mut headers, &ctx("/app")).is_none());
    }

    #[test]
    fn test_cookie_full_example() {
        let out = rewrite_cookie(
            "session=abc; Domain=vritjobs.com; Path=/",
            &ctx("/hemanta/proxy"),
        );
        assert_eq!(
            out,
            "session=abc; Domain=www.mydomain.com; Path=/hemanta/proxy/; Secure"
        );
    }

    #[test]
    fn test_cookie_dotted_domain_rewritten() {
        let out = rewrite_cookie("id=1; Domain=.vritjobs.com", &ctx("/app"));
        assert_eq!(out, "id=1; Domain=www.mydomain.com; Path=/app/; Secure");
    }

    #[test]
    fn test_cookie_foreign_domain_untouched() {
        let out = rewrite_cookie("id=1; Domain=other.example.com; Path=/x", &ctx("/app"));
        assert_eq!(out, "id=1; Domain=other.example.com; Path=/x; Secure");
    }

    #[test]
    fn test_cookie_missing_path_appended() {
        let out = rewrite_cookie("id=1", &ctx("/app"));
        assert_eq!(out, "id=1; Path=/app/; Secure");
    }

    #[test]
    fn test_cookie_deep_path_untouched() {
        let out = rewrite_cookie("id=1; Path=/account", &ctx("/app"));
        assert_eq!(out, "id=1; Path=/account; Secure");
    }

    #[test]
    fn test_cookie_secure_not_duplicated() {
        let out = rewrite_cookie("id=1; Path=/; Secure", &ctx("/app"));
        assert_eq!(out, "id=1; Path=/app/; Secure");
    }

    #[test]
    fn test_cookie_no_secure_on_http_public() {
        let out = rewrite_cookie("id=1; Path=/", &http_ctx("/app"));
        assert_eq!(out, "id=1; Path=/app/");
    }

    #[test]
    fn test_cookie_rewrite_is_idempotent() {
        let c = ctx("/hemanta/proxy");
        let once = rewrite_cookie("session=abc; Domain=vritjobs.com; Path=/", &c);
        let twice = rewrite_cookie(&once, &c);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_cookie_name_never_treated_as_attribute() {
        // a cookie literally named "domain" is the cookie pair, not the attribute
        let out = rewrite_cookie("domain=vritjobs.com; Path=/x", &ctx("/app"));
        assert_eq!(out, "domain=vritjobs.com; Path=/x; Secure");
    }

    #[test]
    fn test_all_cookies_rewritten_in_place() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; Domain=vritjobs.com"));

        rewrite_cookies(&mut headers, &ctx("/app"));

        let values: Vec<_> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            values,
            vec![
                "a=1; Path=/app/; Secure",
                "b=2; Domain=www.mydomain.com; Path=/app/; Secure",
            ]
        );
    }
}
