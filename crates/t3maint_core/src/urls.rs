/// Classification of one matched URL value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    File,
    Page,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub kind: ReferenceKind,
    pub identifier: String,
    /// Includes its own leading `#`; empty when the URL has no fragment.
    pub anchor: String,
}

/// Classifies one matched URL value as a file or page reference.
///
/// A value containing `/<path>/` is a file reference; its identifier is the
/// remainder after the last `/<path>` occurrence (relevant when the path
/// token also appears in a deeper directory name) and its fragment is kept
/// verbatim. Anything else is a page reference; the domain prefix is
/// stripped and the first fragment character is dropped; it encodes a
/// content-element marker, not part of the page anchor.
pub fn classify_url(raw_url: &str, domain: &str, path: &str) -> ParsedReference {
    let path = path.trim().trim_matches('/');
    let needle = format!("/{path}/");

    if raw_url.contains(&needle) {
        let marker = format!("/{path}");
        let position = raw_url.rfind(&marker).unwrap_or(0);
        let remainder = &raw_url[position + marker.len()..];
        let (identifier, anchor) = split_fragment(remainder, false);
        return ParsedReference {
            kind: ReferenceKind::File,
            identifier: identifier.trim().to_string(),
            anchor,
        };
    }

    let domain = domain.trim().trim_end_matches('/');
    let without_domain = raw_url
        .strip_prefix(&format!("https://{domain}"))
        .or_else(|| raw_url.strip_prefix(&format!("http://{domain}")))
        .unwrap_or(raw_url);
    let (identifier, anchor) = split_fragment(without_domain, true);
    ParsedReference {
        kind: ReferenceKind::Page,
        identifier: identifier.trim().to_string(),
        anchor,
    }
}

fn split_fragment(value: &str, drop_first_fragment_char: bool) -> (&str, String) {
    match value.split_once('#') {
        Some((identifier, fragment)) => {
            let anchor = if drop_first_fragment_char {
                format!("#{}", fragment.chars().skip(1).collect::<String>())
            } else {
                format!("#{fragment}")
            };
            (identifier, anchor)
        }
        None => (value, String::new()),
    }
}
