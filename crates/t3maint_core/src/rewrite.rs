use anyhow::Result;
use regex::Regex;

use crate::resolve::ReferenceResolver;
use crate::urls::{ReferenceKind, classify_url};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    pub matches: usize,
    pub replaced: usize,
    pub value: String,
    /// Raw URLs that matched but did not resolve; surfaced at debug
    /// verbosity only.
    pub unresolved: Vec<String>,
}

/// Rewrites every resolvable link candidate in one field value.
///
/// Candidates are processed in order of appearance. A resolved candidate is
/// substituted by replacing the first exact occurrence of prefix + raw URL
/// in the (possibly already partially rewritten) value; an unresolved one
/// is left verbatim. No partial or speculative rewriting.
pub fn rewrite_field(
    value: &str,
    pattern: &Regex,
    domain: &str,
    path: &str,
    resolver: &ReferenceResolver,
) -> Result<RewriteOutcome> {
    let mut matches = 0usize;
    let mut replaced = 0usize;
    let mut unresolved = Vec::new();
    let mut output = value.to_string();

    for captures in pattern.captures_iter(value) {
        matches += 1;
        let prefix = captures.get(1).map(|group| group.as_str()).unwrap_or("");
        let raw_url = captures.get(2).map(|group| group.as_str()).unwrap_or("");

        let reference = classify_url(raw_url, domain, path);
        match resolver.resolve(&reference)? {
            Some(target) => {
                let scheme = match target.kind {
                    ReferenceKind::File => "t3://file?uid=",
                    ReferenceKind::Page => "t3://page?uid=",
                };
                let replacement =
                    format!("{scheme}{}{}", target.canonical_uid, reference.anchor);
                let needle = format!("{prefix}{raw_url}");
                let with = format!("{prefix}{replacement}");
                output = output.replacen(&needle, &with, 1);
                replaced += 1;
            }
            None => unresolved.push(raw_url.to_string()),
        }
    }

    Ok(RewriteOutcome {
        matches,
        replaced,
        value: output,
        unresolved,
    })
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::rewrite_field;
    use crate::config::SiteLanguage;
    use crate::pattern::build_link_pattern;
    use crate::resolve::ReferenceResolver;

    fn fixture_connection() -> Connection {
        let connection = Connection::open_in_memory().expect("open in-memory db");
        connection
            .execute_batch(
                "CREATE TABLE sys_file (
                    uid INTEGER PRIMARY KEY,
                    identifier TEXT NOT NULL,
                    name TEXT NOT NULL,
                    missing INTEGER NOT NULL DEFAULT 0
                );
                CREATE TABLE pages (
                    uid INTEGER PRIMARY KEY,
                    pid INTEGER NOT NULL DEFAULT 0,
                    slug TEXT NOT NULL,
                    sys_language_uid INTEGER NOT NULL DEFAULT 0,
                    l10n_parent INTEGER NOT NULL DEFAULT 0
                );
                INSERT INTO sys_file (uid, identifier, name) VALUES (42, '/a/b.jpg', 'b.jpg');
                INSERT INTO pages (uid, slug) VALUES (7, '/products');
                INSERT INTO pages (uid, slug, sys_language_uid, l10n_parent)
                    VALUES (8, '/products', 1, 7);",
            )
            .expect("create fixtures");
        connection
    }

    fn languages() -> Vec<SiteLanguage> {
        vec![
            SiteLanguage {
                language_id: 0,
                base_path: "/".to_string(),
            },
            SiteLanguage {
                language_id: 1,
                base_path: "/en/".to_string(),
            },
        ]
    }

    #[test]
    fn file_url_is_rewritten_to_file_reference() {
        let connection = fixture_connection();
        let languages = languages();
        let resolver = ReferenceResolver::new(&connection, &languages);
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");

        let outcome = rewrite_field(
            r#"<img src="https://example.com/fileadmin/a/b.jpg">"#,
            &pattern,
            "example.com",
            "fileadmin",
            &resolver,
        )
        .expect("rewrite");

        assert_eq!(outcome.value, r#"<img src="t3://file?uid=42">"#);
        assert_eq!(outcome.matches, 1);
        assert_eq!(outcome.replaced, 1);
        assert!(outcome.unresolved.is_empty());
    }

    #[test]
    fn localized_page_url_uses_source_language_uid() {
        let connection = fixture_connection();
        let languages = languages();
        let resolver = ReferenceResolver::new(&connection, &languages);
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");

        let outcome = rewrite_field(
            r#"<a href="https://example.com/en/products/">Link</a>"#,
            &pattern,
            "example.com",
            "fileadmin",
            &resolver,
        )
        .expect("rewrite");

        assert_eq!(outcome.value, r#"<a href="t3://page?uid=7">Link</a>"#);
        assert_eq!(outcome.replaced, 1);
    }

    #[test]
    fn page_anchor_survives_with_marker_dropped() {
        let connection = fixture_connection();
        let languages = languages();
        let resolver = ReferenceResolver::new(&connection, &languages);
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");

        let outcome = rewrite_field(
            r#"<a href="https://example.com/products#c13">Jump</a>"#,
            &pattern,
            "example.com",
            "fileadmin",
            &resolver,
        )
        .expect("rewrite");

        assert_eq!(outcome.value, r#"<a href="t3://page?uid=7#13">Jump</a>"#);
    }

    #[test]
    fn unresolved_candidates_are_left_verbatim() {
        let connection = fixture_connection();
        let languages = languages();
        let resolver = ReferenceResolver::new(&connection, &languages);
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");

        let value = r#"<a href="https://example.com/no/such/page">x</a>"#;
        let outcome = rewrite_field(value, &pattern, "example.com", "fileadmin", &resolver)
            .expect("rewrite");

        assert_eq!(outcome.value, value);
        assert_eq!(outcome.matches, 1);
        assert_eq!(outcome.replaced, 0);
        assert_eq!(outcome.unresolved, vec!["https://example.com/no/such/page"]);
    }

    #[test]
    fn values_without_candidates_are_returned_unchanged() {
        let connection = fixture_connection();
        let languages = languages();
        let resolver = ReferenceResolver::new(&connection, &languages);
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");

        let value = "<p>Nothing to see</p>";
        let outcome = rewrite_field(value, &pattern, "example.com", "fileadmin", &resolver)
            .expect("rewrite");

        assert_eq!(outcome.matches, 0);
        assert_eq!(outcome.value, value);
    }

    #[test]
    fn mixed_resolvable_and_unresolvable_candidates() {
        let connection = fixture_connection();
        let languages = languages();
        let resolver = ReferenceResolver::new(&connection, &languages);
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");

        let outcome = rewrite_field(
            r#"<img src="/fileadmin/a/b.jpg"><a href="/fileadmin/nope.pdf">x</a>"#,
            &pattern,
            "example.com",
            "fileadmin",
            &resolver,
        )
        .expect("rewrite");

        assert_eq!(
            outcome.value,
            r#"<img src="t3://file?uid=42"><a href="/fileadmin/nope.pdf">x</a>"#
        );
        assert_eq!(outcome.matches, 2);
        assert_eq!(outcome.replaced, 1);
    }

    #[test]
    fn rerunning_on_consolidated_content_finds_no_matches() {
        let connection = fixture_connection();
        let languages = languages();
        let resolver = ReferenceResolver::new(&connection, &languages);
        let pattern = build_link_pattern("example.com", "fileadmin").expect("pattern");

        let consolidated = r#"<img src="t3://file?uid=42">"#;
        let outcome = rewrite_field(consolidated, &pattern, "example.com", "fileadmin", &resolver)
            .expect("rewrite");

        assert_eq!(outcome.matches, 0);
        assert_eq!(outcome.value, consolidated);
    }
}
