use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct MoveOptions {
    pub source: String,
    pub target: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MoveReport {
    pub uid: i64,
    pub source: String,
    pub target: String,
    pub moved_disk_file: bool,
    pub dry_run: bool,
}

/// Renames a stored file: moves it under the storage root and updates the
/// registry row (identifier, name, identifier hash) to match.
pub fn move_stored_file(
    connection: &Connection,
    storage_dir: &Path,
    options: &MoveOptions,
) -> Result<MoveReport> {
    let source = normalize_identifier(&options.source)?;
    let target = normalize_identifier(&options.target)?;
    if source == target {
        bail!("source and target identifiers are identical: {source}");
    }

    let uid: i64 = connection
        .query_row(
            "SELECT uid FROM sys_file WHERE identifier = ?1 LIMIT 1",
            [&source],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to look up file identifier {source}"))?
        .ok_or_else(|| anyhow::anyhow!("no registered file with identifier {source}"))?;

    let target_registered: i64 = connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sys_file WHERE identifier = ?1)",
            [&target],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to check target identifier {target}"))?;
    if target_registered == 1 {
        bail!("target identifier is already registered: {target}");
    }

    let source_path = absolute_storage_path(storage_dir, &source);
    let target_path = absolute_storage_path(storage_dir, &target);
    if !source_path.exists() {
        bail!("stored file missing on disk: {}", source_path.display());
    }
    if target_path.exists() {
        bail!("target file already exists on disk: {}", target_path.display());
    }

    if options.dry_run {
        return Ok(MoveReport {
            uid,
            source,
            target,
            moved_disk_file: false,
            dry_run: true,
        });
    }

    if let Some(parent) = target_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::rename(&source_path, &target_path).with_context(|| {
        format!(
            "failed to move {} to {}",
            source_path.display(),
            target_path.display()
        )
    })?;

    let name = target.rsplit('/').next().unwrap_or(&target).to_string();
    connection
        .execute(
            "UPDATE sys_file SET identifier = ?1, name = ?2, identifier_hash = ?3 WHERE uid = ?4",
            params![target, name, identifier_hash(&target), uid],
        )
        .with_context(|| format!("failed to update registry row for uid {uid}"))?;

    Ok(MoveReport {
        uid,
        source,
        target,
        moved_disk_file: true,
        dry_run: false,
    })
}

#[derive(Debug, Clone, Default)]
pub struct DeleteFilesOptions {
    pub pattern: Option<String>,
    pub missing: bool,
    pub keep_disk: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteFilesReport {
    pub matched_rows: usize,
    pub deleted_rows: usize,
    pub removed_disk_files: usize,
    pub dry_run: bool,
}

/// Deletes registry rows matching an SQL LIKE pattern and/or rows flagged
/// missing. Disk files of non-missing rows are removed too unless
/// `keep_disk` is set.
pub fn delete_stored_files(
    connection: &Connection,
    storage_dir: &Path,
    options: &DeleteFilesOptions,
) -> Result<DeleteFilesReport> {
    let mut clauses = Vec::new();
    if options.pattern.is_some() {
        clauses.push("identifier LIKE ?1");
    }
    if options.missing {
        clauses.push("missing = 1");
    }
    if clauses.is_empty() {
        bail!("file delete requires --pattern and/or --missing");
    }

    let sql = format!(
        "SELECT uid, identifier, missing FROM sys_file WHERE {} ORDER BY uid ASC",
        clauses.join(" OR ")
    );
    let mut statement = connection
        .prepare(&sql)
        .context("failed to prepare file delete query")?;
    let map_row = |row: &rusqlite::Row<'_>| {
        let uid: i64 = row.get(0)?;
        let identifier: String = row.get(1)?;
        let missing: i64 = row.get(2)?;
        Ok((uid, identifier, missing == 1))
    };
    let rows = match &options.pattern {
        Some(pattern) => statement
            .query_map([pattern], map_row)
            .context("failed to run file delete query")?,
        None => statement
            .query_map([], map_row)
            .context("failed to run file delete query")?,
    };

    let mut matched = Vec::new();
    for row in rows {
        matched.push(row.context("failed to decode file delete row")?);
    }

    if options.dry_run {
        return Ok(DeleteFilesReport {
            matched_rows: matched.len(),
            deleted_rows: 0,
            removed_disk_files: 0,
            dry_run: true,
        });
    }

    let mut deleted_rows = 0usize;
    let mut removed_disk_files = 0usize;
    for (uid, identifier, is_missing) in matched.iter() {
        deleted_rows += connection
            .execute("DELETE FROM sys_file WHERE uid = ?1", [uid])
            .with_context(|| format!("failed to delete registry row uid {uid}"))?;

        if options.keep_disk || *is_missing {
            continue;
        }
        let path = absolute_storage_path(storage_dir, identifier);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed to remove {}", path.display()))?;
            removed_disk_files += 1;
        }
    }

    Ok(DeleteFilesReport {
        matched_rows: matched.len(),
        deleted_rows,
        removed_disk_files,
        dry_run: false,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkMissingReport {
    pub disk_files: usize,
    pub flagged: usize,
    pub cleared: usize,
    pub dry_run: bool,
}

/// Walks the storage directory and reconciles the registry's missing flag:
/// rows without a disk file are flagged, flagged rows whose file reappeared
/// are cleared.
pub fn mark_missing_files(
    connection: &Connection,
    storage_dir: &Path,
    dry_run: bool,
) -> Result<MarkMissingReport> {
    if !storage_dir.is_dir() {
        bail!("storage directory not found: {}", storage_dir.display());
    }

    let mut on_disk = HashSet::new();
    for entry in WalkDir::new(storage_dir) {
        let entry = entry
            .with_context(|| format!("failed to scan {}", storage_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(storage_dir)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?;
        on_disk.insert(identifier_for_relative(relative));
    }

    let mut statement = connection
        .prepare("SELECT uid, identifier, missing FROM sys_file ORDER BY uid ASC")
        .context("failed to prepare registry scan query")?;
    let rows = statement
        .query_map([], |row| {
            let uid: i64 = row.get(0)?;
            let identifier: String = row.get(1)?;
            let missing: i64 = row.get(2)?;
            Ok((uid, identifier, missing == 1))
        })
        .context("failed to run registry scan query")?;

    let mut flagged = 0usize;
    let mut cleared = 0usize;
    for row in rows {
        let (uid, identifier, is_missing) = row.context("failed to decode registry row")?;
        let exists = on_disk.contains(&identifier);
        let new_flag = match (exists, is_missing) {
            (false, false) => Some(1i64),
            (true, true) => Some(0i64),
            _ => None,
        };
        let Some(new_flag) = new_flag else { continue };
        if new_flag == 1 {
            flagged += 1;
        } else {
            cleared += 1;
        }
        if !dry_run {
            connection
                .execute(
                    "UPDATE sys_file SET missing = ?1 WHERE uid = ?2",
                    params![new_flag, uid],
                )
                .with_context(|| format!("failed to update missing flag for uid {uid}"))?;
        }
    }

    Ok(MarkMissingReport {
        disk_files: on_disk.len(),
        flagged,
        cleared,
        dry_run,
    })
}

/// Computes the registry hash of an identifier (hex sha256).
pub fn identifier_hash(identifier: &str) -> String {
    let digest = Sha256::digest(identifier.as_bytes());
    let mut output = String::with_capacity(64);
    for byte in digest.iter() {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn normalize_identifier(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("file identifier must not be empty");
    }
    if trimmed.split('/').any(|segment| segment == "..") {
        bail!("file identifier must not contain parent-directory segments: {trimmed}");
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("/{trimmed}"))
    }
}

fn absolute_storage_path(storage_dir: &Path, identifier: &str) -> PathBuf {
    let mut out = storage_dir.to_path_buf();
    for segment in identifier.split('/') {
        if !segment.is_empty() {
            out.push(segment);
        }
    }
    out
}

fn identifier_for_relative(relative: &Path) -> String {
    let mut out = String::new();
    for component in relative.components() {
        out.push('/');
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    out
}
