use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, params};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};

use crate::config::SiteLanguage;
use crate::pattern::{build_link_pattern, normalize_domain};
use crate::resolve::ReferenceResolver;
use crate::rewrite::rewrite_field;

// The one table+field combination hosting mixed content types: records
// flagged as raw HTML markup are not attribute-structured and must not be
// rewritten.
const RAW_HTML_TABLE: &str = "tt_content";
const RAW_HTML_FIELD: &str = "bodytext";
const RAW_HTML_TYPE_COLUMN: &str = "CType";
const RAW_HTML_TYPE_VALUE: &str = "html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn from_count(count: u8) -> Self {
        match count {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidateOptions {
    pub table: String,
    pub field: String,
    pub domain: String,
    pub path: String,
    pub dry_run: bool,
    pub verbosity: Verbosity,
}

/// Accumulated per (table, field) invocation; reported, never persisted.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RunStatistics {
    pub records_processed: usize,
    pub total_matches: usize,
    pub total_replaced: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidateReport {
    pub table: String,
    pub field: String,
    pub dry_run: bool,
    pub stats: RunStatistics,
    /// Records whose value changed; in dry-run mode, would-be updates.
    pub records_updated: usize,
    pub update_failures: usize,
    pub skipped_raw_html: usize,
}

struct CandidateRecord {
    uid: i64,
    pid: i64,
    value: Option<String>,
    content_type: Option<String>,
}

/// Processes one (table, field) target: selects candidate records via a
/// cheap substring prefilter, rewrites each field value in uid order, and
/// persists changed values unless dry-run. Per-record update failures are
/// warnings; processing continues.
pub fn consolidate_target(
    connection: &Connection,
    languages: &[SiteLanguage],
    options: &ConsolidateOptions,
) -> Result<ConsolidateReport> {
    validate_identifier(&options.table)?;
    validate_identifier(&options.field)?;

    let domain = normalize_domain(&options.domain);
    let path = options.path.trim().trim_matches('/').to_string();
    let pattern = build_link_pattern(&domain, &path)?;
    let resolver = ReferenceResolver::new(connection, languages);

    let has_type_column =
        options.table == RAW_HTML_TABLE && options.field == RAW_HTML_FIELD;
    let records = select_candidates(connection, options, has_type_column, &domain, &path)?;

    let mut stats = RunStatistics::default();
    let mut records_updated = 0usize;
    let mut update_failures = 0usize;
    let mut skipped_raw_html = 0usize;

    let update_sql = format!(
        "UPDATE \"{table}\" SET \"{field}\" = ?1 WHERE uid = ?2",
        table = options.table,
        field = options.field,
    );

    for record in records {
        if has_type_column && record.content_type.as_deref() == Some(RAW_HTML_TYPE_VALUE) {
            skipped_raw_html += 1;
            if options.verbosity >= Verbosity::Verbose {
                println!(
                    "[{}:{}] skipped: raw HTML content type",
                    options.table, record.uid
                );
            }
            continue;
        }
        let Some(value) = record.value else {
            continue;
        };

        stats.records_processed += 1;
        let outcome = rewrite_field(&value, &pattern, &domain, &path, &resolver)?;
        stats.total_matches += outcome.matches;
        stats.total_replaced += outcome.replaced;

        if options.verbosity >= Verbosity::Debug {
            if outcome.matches == 0 {
                println!(
                    "[{}:{}] prefilter hit but no pattern matches, consider checking the record manually",
                    options.table, record.uid
                );
            }
            for raw_url in &outcome.unresolved {
                println!("[{}:{}] unresolved: {raw_url}", options.table, record.uid);
            }
        }

        if outcome.value == value {
            continue;
        }

        if options.verbosity >= Verbosity::Verbose {
            println!(
                "[{}:{}] (pid {}) matches: {} replaced: {}",
                options.table, record.uid, record.pid, outcome.matches, outcome.replaced
            );
            print_value_diff(&value, &outcome.value);
        }

        if options.dry_run {
            records_updated += 1;
            continue;
        }

        let affected = connection
            .execute(&update_sql, params![outcome.value, record.uid])
            .with_context(|| {
                format!(
                    "failed to update {}.{} for uid {}",
                    options.table, options.field, record.uid
                )
            })?;
        if affected == 0 {
            eprintln!(
                "warning: update affected no rows for {} uid {}",
                options.table, record.uid
            );
            update_failures += 1;
        } else {
            records_updated += 1;
        }
    }

    Ok(ConsolidateReport {
        table: options.table.clone(),
        field: options.field.clone(),
        dry_run: options.dry_run,
        stats,
        records_updated,
        update_failures,
        skipped_raw_html,
    })
}

/// Opens the installation database with the shared connection settings.
pub fn open_cms_connection(db_path: &Path) -> Result<Connection> {
    if !db_path.exists() {
        bail!("installation database not found: {}", db_path.display());
    }
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    Ok(connection)
}

fn select_candidates(
    connection: &Connection,
    options: &ConsolidateOptions,
    has_type_column: bool,
    domain: &str,
    path: &str,
) -> Result<Vec<CandidateRecord>> {
    let type_column = if has_type_column {
        format!(", \"{RAW_HTML_TYPE_COLUMN}\"")
    } else {
        String::new()
    };
    let sql = format!(
        "SELECT uid, pid, \"{field}\"{type_column} FROM \"{table}\"
         WHERE \"{field}\" LIKE ?1 OR \"{field}\" LIKE ?2 OR \"{field}\" LIKE ?3
         ORDER BY uid ASC",
        field = options.field,
        table = options.table,
    );

    let mut statement = connection
        .prepare(&sql)
        .with_context(|| format!("failed to prepare candidate query for {}", options.table))?;
    let rows = statement
        .query_map(
            params![
                format!("%/{path}/%"),
                format!("%http://{domain}/%"),
                format!("%https://{domain}/%"),
            ],
            |row| {
                Ok(CandidateRecord {
                    uid: row.get(0)?,
                    pid: row.get(1)?,
                    value: row.get(2)?,
                    content_type: if has_type_column { row.get(3)? } else { None },
                })
            },
        )
        .with_context(|| format!("failed to run candidate query for {}", options.table))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("failed to decode candidate row")?);
    }
    Ok(out)
}

fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty()
        || !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        bail!("invalid table or field name: {name:?}");
    }
    Ok(())
}

fn print_value_diff(old: &str, new: &str) {
    let diff = TextDiff::from_lines(old, new);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        let line = change.to_string();
        println!("    {sign} {}", line.trim_end_matches('\n'));
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{ConsolidateOptions, Verbosity, consolidate_target};
    use crate::config::SiteLanguage;

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
                CREATE TABLE tt_content (
                    uid INTEGER PRIMARY KEY,
                    pid INTEGER NOT NULL DEFAULT 0,
                    CType TEXT NOT NULL DEFAULT 'text',
                    bodytext TEXT
                );
                INSERT INTO sys_file (uid, identifier, name) VALUES (42, '/a/b.jpg', 'b.jpg');
                INSERT INTO pages (uid, slug) VALUES (7, '/products');",
            )
            .expect("create fixtures");
        connection
    }

    fn languages() -> Vec<SiteLanguage> {
        vec![SiteLanguage {
            language_id: 0,
            base_path: "/".to_string(),
        }]
    }

    fn options(dry_run: bool) -> ConsolidateOptions {
        ConsolidateOptions {
            table: "tt_content".to_string(),
            field: "bodytext".to_string(),
            domain: "example.com".to_string(),
            path: "fileadmin".to_string(),
            dry_run,
            verbosity: Verbosity::Normal,
        }
    }

    fn bodytext(connection: &Connection, uid: i64) -> String {
        connection
            .query_row("SELECT bodytext FROM tt_content WHERE uid = ?1", [uid], |row| {
                row.get(0)
            })
            .expect("read bodytext")
    }

    #[test]
    fn dry_run_reports_changes_without_persisting() {
        let connection = fixture_connection();
        let languages = languages();
        let original = r#"<img src="https://example.com/fileadmin/a/b.jpg">"#;
        connection
            .execute(
                "INSERT INTO tt_content (uid, pid, bodytext) VALUES (1, 3, ?1)",
                [original],
            )
            .expect("insert record");

        let dry = consolidate_target(&connection, &languages, &options(true)).expect("dry run");
        assert_eq!(dry.stats.records_processed, 1);
        assert_eq!(dry.stats.total_matches, 1);
        assert_eq!(dry.stats.total_replaced, 1);
        assert_eq!(dry.records_updated, 1);
        assert_eq!(bodytext(&connection, 1), original);

        let live = consolidate_target(&connection, &languages, &options(false)).expect("live run");
        assert_eq!(live.stats, dry.stats);
        assert_eq!(live.records_updated, 1);
        assert_eq!(bodytext(&connection, 1), r#"<img src="t3://file?uid=42">"#);
    }

    #[test]
    fn rerun_after_consolidation_selects_nothing() {
        let connection = fixture_connection();
        let languages = languages();
        connection
            .execute(
                "INSERT INTO tt_content (uid, bodytext) VALUES (1, ?1)",
                [r#"<img src="https://example.com/fileadmin/a/b.jpg">"#],
            )
            .expect("insert record");

        consolidate_target(&connection, &languages, &options(false)).expect("first run");
        let second = consolidate_target(&connection, &languages, &options(false)).expect("rerun");
        assert_eq!(second.stats.records_processed, 0);
        assert_eq!(second.stats.total_matches, 0);
    }

    #[test]
    fn raw_html_records_are_skipped_entirely() {
        let connection = fixture_connection();
        let languages = languages();
        let raw = r#"<script>var x = "https://example.com/fileadmin/a/b.jpg";</script>"#;
        connection
            .execute(
                "INSERT INTO tt_content (uid, CType, bodytext) VALUES (1, 'html', ?1)",
                [raw],
            )
            .expect("insert record");

        let report = consolidate_target(&connection, &languages, &options(false)).expect("run");
        assert_eq!(report.skipped_raw_html, 1);
        assert_eq!(report.stats.records_processed, 0);
        assert_eq!(report.stats.total_matches, 0);
        assert_eq!(bodytext(&connection, 1), raw);
    }

    #[test]
    fn unresolved_matches_leave_value_untouched() {
        let connection = fixture_connection();
        let languages = languages();
        let original = r#"<a href="https://example.com/nowhere">x</a>"#;
        connection
            .execute(
                "INSERT INTO tt_content (uid, bodytext) VALUES (1, ?1)",
                [original],
            )
            .expect("insert record");

        let report = consolidate_target(&connection, &languages, &options(false)).expect("run");
        assert_eq!(report.stats.total_matches, 1);
        assert_eq!(report.stats.total_replaced, 0);
        assert_eq!(report.records_updated, 0);
        assert_eq!(bodytext(&connection, 1), original);
    }

    #[test]
    fn records_are_processed_in_uid_order() {
        let connection = fixture_connection();
        let languages = languages();
        connection
            .execute_batch(
                r#"INSERT INTO tt_content (uid, bodytext) VALUES
                    (9, '<img src="/fileadmin/a/b.jpg">'),
                    (2, '<img src="/fileadmin/a/b.jpg">');"#,
            )
            .expect("insert records");

        let report = consolidate_target(&connection, &languages, &options(false)).expect("run");
        assert_eq!(report.stats.records_processed, 2);
        assert_eq!(report.records_updated, 2);
        assert_eq!(bodytext(&connection, 2), r#"<img src="t3://file?uid=42">"#);
        assert_eq!(bodytext(&connection, 9), r#"<img src="t3://file?uid=42">"#);
    }

    #[test]
    fn hostile_identifiers_are_rejected() {
        let connection = fixture_connection();
        let languages = languages();
        let mut bad = options(false);
        bad.table = "tt_content\"; DROP TABLE pages; --".to_string();
        assert!(consolidate_target(&connection, &languages, &bad).is_err());
    }
}
