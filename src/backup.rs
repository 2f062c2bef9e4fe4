//! JSON backups and plain-text group export/import.
//!
//! Imports always allocate fresh ids; timestamps and relative order come
//! from the document. Every import is validated up front and loaded in a
//! single transaction, so a bad document never leaves a partial state.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classify::classify_text;
use crate::errors::{ClipError, Result};
use crate::hash::{fingerprint, normalize_text, text_fingerprint};
use crate::storage::models::{
    ClipEntry, ContentType, EntryFilter, GroupFilter, ImportMode, ImportOutcome, ImportRecord,
    NewEntry, Scope, SmartGroup, is_reserved_group_name,
};
use crate::storage::sqlite::SqliteStorage;
use crate::storage::{ClipStorage, GroupStorage};

pub const BACKUP_VERSION: u32 = 1;

/// Separator line between entries in text exports.
pub const TEXT_SEPARATOR: &str = "---";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    /// Absent in documents written before versioning: reads as 0.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub exported_at: Option<String>,
    #[serde(default)]
    pub history: Vec<BackupEntry>,
    #[serde(default)]
    pub groups: Vec<BackupGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Informational only; imports never reuse it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub content_type: ContentType,
    pub raw_content: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub is_permanent: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupGroup {
    pub name: String,
}

impl From<ClipEntry> for BackupEntry {
    fn from(entry: ClipEntry) -> Self {
        Self {
            id: Some(entry.id),
            content_type: entry.content_type,
            raw_content: entry.raw_content,
            category: entry.category,
            groups: entry.groups,
            is_permanent: entry.is_permanent,
            created_at: entry.created_at,
        }
    }
}

/// RFC 3339 out; RFC 3339 or SQLite's `YYYY-MM-DD HH:MM:SS[.f][+zz:zz]` in.
mod timestamp {
    use super::*;
    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("unrecognised timestamp '{}'", raw)))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

fn stored_fingerprint(content_type: &ContentType, raw_content: &str) -> String {
    match content_type {
        // Image rows hold a file path; the pixels are not re-read on import.
        ContentType::Image => fingerprint("image-path", raw_content.as_bytes()),
        _ => text_fingerprint(raw_content),
    }
}

/// Stored spelling for each name, `NotFound` for the first unknown one.
fn resolve_persisted(store: &SqliteStorage, names: &[String]) -> Result<Vec<String>> {
    let mut resolved: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let stored = store
            .find_group(name)?
            .ok_or_else(|| ClipError::NotFound(format!("Group '{}' not found", name.trim())))?;
        if !resolved.iter().any(|r| r.eq_ignore_ascii_case(&stored)) {
            resolved.push(stored);
        }
    }
    Ok(resolved)
}

/// Everything when `groups` is empty; otherwise only entries in at least
/// one of `groups`, with memberships and registry narrowed to them.
pub fn export_full(store: &SqliteStorage, groups: &[String]) -> Result<BackupDocument> {
    let (entries, registry) = if groups.is_empty() {
        (store.list_all()?, store.list_groups()?)
    } else {
        let selected = resolve_persisted(store, groups)?;
        let mut entries = store.entries_in_groups(&selected)?;
        for entry in &mut entries {
            entry
                .groups
                .retain(|g| selected.iter().any(|s| s.eq_ignore_ascii_case(g)));
            if entry
                .category
                .as_deref()
                .is_some_and(|c| !selected.iter().any(|s| s.eq_ignore_ascii_case(c)))
            {
                entry.category = None;
            }
        }
        (entries, selected)
    };

    Ok(BackupDocument {
        version: BACKUP_VERSION,
        exported_at: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        history: entries.into_iter().map(BackupEntry::from).collect(),
        groups: registry.into_iter().map(|name| BackupGroup { name }).collect(),
    })
}

pub fn write_backup(store: &SqliteStorage, path: &Path, groups: &[String]) -> Result<usize> {
    let doc = export_full(store, groups)?;
    let json = serde_json::to_string_pretty(&doc)?;
    fs::write(path, json)?;
    info!(path = %path.display(), entries = doc.history.len(), "backup written");
    Ok(doc.history.len())
}

pub fn parse_backup(json: &str) -> Result<BackupDocument> {
    let doc: BackupDocument = serde_json::from_str(json)?;
    if doc.version > BACKUP_VERSION {
        return Err(ClipError::Parse(format!(
            "backup version {} is newer than supported version {}",
            doc.version, BACKUP_VERSION
        )));
    }
    Ok(doc)
}

pub fn import_full(
    store: &SqliteStorage,
    doc: BackupDocument,
    mode: ImportMode,
) -> Result<ImportOutcome> {
    if let Some(pos) = doc.history.iter().position(|e| e.raw_content.is_empty()) {
        return Err(ClipError::Parse(format!(
            "history entry {} has empty raw_content",
            pos
        )));
    }

    let mut indexed: Vec<(usize, BackupEntry)> = doc.history.into_iter().enumerate().collect();
    // Oldest first; among equal timestamps the later document position is
    // the older entry, since documents list newest first.
    indexed.sort_by(|(ia, a), (ib, b)| a.created_at.cmp(&b.created_at).then(ib.cmp(ia)));

    let records: Vec<ImportRecord> = indexed
        .into_iter()
        .map(|(_, e)| ImportRecord {
            entry: NewEntry {
                fingerprint: stored_fingerprint(&e.content_type, &e.raw_content),
                content_type: e.content_type,
                raw_content: e.raw_content,
                category: e.category,
                is_permanent: e.is_permanent,
                created_at: Some(e.created_at),
            },
            groups: e.groups,
        })
        .collect();
    let names: Vec<String> = doc.groups.into_iter().map(|g| g.name).collect();

    store.import_records(&records, &names, mode)
}

pub fn restore_file(store: &SqliteStorage, path: &Path, mode: ImportMode) -> Result<ImportOutcome> {
    let json = fs::read_to_string(path)?;
    let doc = parse_backup(&json)?;
    let outcome = import_full(store, doc, mode)?;
    info!(path = %path.display(), count = outcome.imported, ?mode, "backup restored");
    Ok(outcome)
}

fn join_blocks(entries: &[ClipEntry]) -> String {
    let separator = format!("\n{}\n", TEXT_SEPARATOR);
    entries
        .iter()
        .map(|e| e.raw_content.as_str())
        .collect::<Vec<_>>()
        .join(&separator)
}

/// Entries of a persisted or smart group as text blocks, newest first.
pub fn export_group_as_text(store: &SqliteStorage, name: &str) -> Result<String> {
    let entries = if let Some(stored) = store.find_group(name)? {
        store.entries_in_groups(&[stored])?
    } else if let Some(smart) = SmartGroup::from_name(name) {
        store.find(&EntryFilter {
            scope: Scope::Group(GroupFilter::Smart(smart)),
            text: String::new(),
        })?
    } else {
        return Err(ClipError::NotFound(format!("Group '{}' not found", name.trim())));
    };
    Ok(join_blocks(&entries))
}

pub fn export_all_as_text(store: &SqliteStorage) -> Result<String> {
    Ok(join_blocks(&store.list_all()?))
}

/// Blocks separated by `---` lines if any are present, else one per
/// non-empty line. Surrounding blank lines are dropped from each block.
pub fn split_text_blocks(content: &str) -> Vec<String> {
    let content = normalize_text(content);
    let has_separator = content.lines().any(|l| l.trim() == TEXT_SEPARATOR);

    if !has_separator {
        return content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
    }

    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in content.lines().chain(std::iter::once(TEXT_SEPARATOR)) {
        if line.trim() == TEXT_SEPARATOR {
            let block = current.join("\n");
            let block = block.trim_matches('\n');
            if !block.trim().is_empty() {
                blocks.push(block.to_string());
            }
            current.clear();
        } else {
            current.push(line);
        }
    }
    blocks
}

/// Imports each block as a new classified entry tagged into `name`.
/// The first block ends up newest, so an exported group round-trips in
/// display order.
pub fn import_legacy_text(store: &SqliteStorage, name: &str, content: &str) -> Result<usize> {
    let name = name.trim();
    if name.is_empty() || is_reserved_group_name(name) {
        return Err(ClipError::Invalid(format!(
            "'{}' cannot be used as an import group",
            name
        )));
    }

    let records: Vec<ImportRecord> = split_text_blocks(content)
        .into_iter()
        .rev()
        .map(|block| ImportRecord {
            entry: NewEntry::captured(classify_text(&block), block.clone(), text_fingerprint(&block)),
            groups: vec![name.to_string()],
        })
        .collect();

    Ok(store
        .import_records(&records, &[name.to_string()], ImportMode::Merge)?
        .imported)
}

pub fn import_legacy_file(store: &SqliteStorage, name: &str, path: &Path) -> Result<usize> {
    let content = fs::read_to_string(path)?;
    let count = import_legacy_text(store, name, &content)?;
    info!(path = %path.display(), group = name, count, "text import committed");
    Ok(count)
}
