use anyhow::{Context, Result, bail};
use regex::Regex;

/// Builds the matching expression for one (domain, storage path) pair.
///
/// The expression finds `href="…"` and `src="…"` attribute values, plus a
/// bare value spanning the whole field, when the value is either a storage
/// path reference (optionally preceded by the domain) or any other URL on
/// the domain. Three capture groups: leading marker, URL value, trailing
/// marker.
pub fn build_link_pattern(domain: &str, path: &str) -> Result<Regex> {
    let domain = normalize_domain(domain);
    let path = path.trim().trim_matches('/');
    if domain.is_empty() {
        bail!("consolidation requires a non-empty domain");
    }
    if path.is_empty() {
        bail!("consolidation requires a non-empty storage path");
    }

    // Literal dots in the domain must not act as wildcards.
    let domain = regex::escape(&domain);
    let path = regex::escape(path);
    let expression = format!(
        r#"(href="|src="|^)((?:https?://{domain})?/{path}/[^"]*|https?://{domain}/[^"]*)("|$)"#
    );
    Regex::new(&expression).with_context(|| format!("failed to compile link pattern {expression}"))
}

/// Strips a scheme prefix and trailing slashes so `https://example.com/`
/// and `example.com` configure the same pattern.
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim();
    let trimmed = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    trimmed.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::{build_link_pattern, normalize_domain};

    #[test]
    fn pattern_matches_attribute_values() {
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");
        let value = r#"<img src="https://example.com/fileadmin/a/b.jpg"> and <a href="/fileadmin/c.pdf">doc</a>"#;
        let captures = pattern.captures_iter(value).collect::<Vec<_>>();

        assert_eq!(captures.len(), 2);
        assert_eq!(&captures[0][1], "src=\"");
        assert_eq!(&captures[0][2], "https://example.com/fileadmin/a/b.jpg");
        assert_eq!(&captures[0][3], "\"");
        assert_eq!(&captures[1][1], "href=\"");
        assert_eq!(&captures[1][2], "/fileadmin/c.pdf");
    }

    #[test]
    fn pattern_matches_domain_urls_outside_storage_path() {
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");
        let value = r#"<a href="https://example.com/en/products/">Link</a>"#;
        let captures = pattern.captures(value).expect("match");
        assert_eq!(&captures[2], "https://example.com/en/products/");
    }

    #[test]
    fn pattern_matches_bare_value_fields() {
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");
        let captures = pattern
            .captures("http://example.com/contact")
            .expect("match");
        assert_eq!(&captures[1], "");
        assert_eq!(&captures[2], "http://example.com/contact");
        assert_eq!(&captures[3], "");
    }

    #[test]
    fn escaped_domain_dots_do_not_overmatch() {
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");
        assert!(
            pattern
                .captures(r#"<a href="https://exampleXcom/page">x</a>"#)
                .is_none()
        );
    }

    #[test]
    fn foreign_domains_are_ignored() {
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");
        assert!(
            pattern
                .captures(r#"<a href="https://other.org/fileadmin-unrelated">x</a>"#)
                .is_none()
        );
    }

    #[test]
    fn rewritten_scheme_is_not_matched_again() {
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");
        assert!(
            pattern
                .captures(r#"<img src="t3://file?uid=42">"#)
                .is_none()
        );
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(build_link_pattern("", "fileadmin").is_err());
        assert!(build_link_pattern("example.com", "  /  ").is_err());
    }

    #[test]
    fn normalize_domain_strips_scheme_and_slash() {
        assert_eq!(normalize_domain("https://example.com/"), "example.com");
        assert_eq!(normalize_domain("http://example.com"), "example.com");
        assert_eq!(normalize_domain(" example.com "), "example.com");
    }
}
