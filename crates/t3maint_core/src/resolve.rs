use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::config::SiteLanguage;
use crate::urls::{ParsedReference, ReferenceKind};

/// Outcome of a successful registry lookup. Localized page records resolve
/// to their source-language record's uid, never their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub kind: ReferenceKind,
    pub canonical_uid: i64,
}

pub struct ReferenceResolver<'a> {
    connection: &'a Connection,
    languages: &'a [SiteLanguage],
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(connection: &'a Connection, languages: &'a [SiteLanguage]) -> Self {
        Self {
            connection,
            languages,
        }
    }

    /// Maps a parsed reference to its canonical uid. `Ok(None)` is the
    /// normal outcome for links unrelated to CMS-managed content.
    pub fn resolve(&self, reference: &ParsedReference) -> Result<Option<ResolvedTarget>> {
        let canonical_uid = match reference.kind {
            ReferenceKind::File => self.resolve_file(&reference.identifier)?,
            ReferenceKind::Page => self.resolve_page(&reference.identifier)?,
        };
        Ok(canonical_uid.map(|canonical_uid| ResolvedTarget {
            kind: reference.kind,
            canonical_uid,
        }))
    }

    fn resolve_file(&self, identifier: &str) -> Result<Option<i64>> {
        self.connection
            .query_row(
                "SELECT uid FROM sys_file WHERE identifier = ?1 AND missing = 0 LIMIT 1",
                [identifier],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to look up file identifier {identifier}"))
    }

    fn resolve_page(&self, identifier: &str) -> Result<Option<i64>> {
        let trimmed = identifier.trim_end_matches('/');
        let mut language_id = 0i64;
        let mut slug = trimmed.to_string();
        for language in self.languages {
            if language.language_id == 0 || language.base_path.len() <= 1 {
                continue;
            }
            if trimmed.starts_with(&language.base_path) {
                language_id = language.language_id;
                slug = format!("/{}", &trimmed[language.base_path.len()..]);
                break;
            }
        }

        let row = self
            .connection
            .query_row(
                "SELECT uid, l10n_parent FROM pages
                 WHERE slug = ?1 AND sys_language_uid = ?2
                 LIMIT 1",
                params![slug, language_id],
                |row| {
                    let uid: i64 = row.get(0)?;
                    let l10n_parent: i64 = row.get(1)?;
                    Ok((uid, l10n_parent))
                },
            )
            .optional()
            .with_context(|| format!("failed to look up page slug {slug}"))?;

        Ok(row.map(|(uid, l10n_parent)| if l10n_parent != 0 { l10n_parent } else { uid }))
    }
}
