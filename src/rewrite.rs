//! URL rewrite rules, content classification and body rewriting
//!
//! The rules are literal substring substitutions, not URL parsing: a
//! non-URL string that happens to contain a matching pattern is
//! rewritten too. That trade-off is inherited deliberately; tokenizing
//! attribute contexts would be the precise alternative.

use crate::config::RewriteContext;

/// Attribute and markup introducers that precede root-relative
/// references in HTML and CSS
const REFERENCE_INTRODUCERS: &[&str] = &[
    "href=\"",
    "src=\"",
    "action=\"",
    "data-url=\"",
    "url(",
    "url(\"",
    "url('",
];

/// Build the ordered substitution list for one response
///
/// The order is fixed: the absolute form must be replaced before the
/// protocol-relative rule, which would otherwise re-match inside
/// not-yet-rewritten absolute URLs. Root-relative introducer rules only
/// exist when a path prefix is configured.
pub fn substitutions(ctx: &RewriteContext) -> Vec<(String, String)> {
    let mut subs = Vec::with_capacity(2 + REFERENCE_INTRODUCERS.len());

    subs.push((
        format!("{}/", ctx.upstream_origin),
        format!("{}{}/", ctx.public_origin, ctx.path_prefix),
    ));
    subs.push((
        format!("//{}/", ctx.upstream_host),
        format!("//{}{}/", ctx.public_host, ctx.path_prefix),
    ));

    if !ctx.path_prefix.is_empty() {
        for introducer in REFERENCE_INTRODUCERS {
            subs.push((
                format!("{}/", introducer),
                format!("{}{}/", introducer, ctx.path_prefix),
            ));
        }
    }

    subs
}

/// Apply the substitution list to a whole text, in order
pub fn rewrite_text(ctx: &RewriteContext, text: &str) -> String {
    let mut result = text.to_string();
    for (from, to) in substitutions(ctx) {
        result = result.replace(&from, &to);
    }
    result
}

/// Rewrite a full response body, returning the text and its byte length
///
/// The caller must re-frame the response with the returned length;
/// stale length framing corrupts the client's read.
pub fn rewrite_body(ctx: &RewriteContext, body: &str) -> (String, usize) {
    let rewritten = rewrite_text(ctx, body);
    let len = rewritten.len();
    (rewritten, len)
}

/// Whether a Content-Type is eligible for body rewriting
///
/// Substring check, so parameters like charset do not affect the
/// decision. Absent or unrecognized types pass through untouched.
pub fn is_rewritable(content_type: Option<&str>) -> bool {
    match content_type {
        Some(ct) => {
            ct.contains("text/html")
                || ct.contains("text/css")
                || ct.contains("javascript")
                || ct.contains("application/json")
        }
        None => false,
    }
}
