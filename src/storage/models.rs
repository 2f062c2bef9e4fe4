use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classifier label. Open-ended: unknown labels round-trip through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ContentType {
    Text,
    Url,
    Image,
    Dev,
    Other(String),
}

impl ContentType {
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Text => "text",
            ContentType::Url => "url",
            ContentType::Image => "image",
            ContentType::Dev => "dev",
            ContentType::Other(label) => label,
        }
    }

    pub fn parse(s: &str) -> ContentType {
        match s {
            "text" => ContentType::Text,
            "url" => ContentType::Url,
            "image" => ContentType::Image,
            "dev" | "code" => ContentType::Dev,
            other => ContentType::Other(other.to_string()),
        }
    }
}

impl From<ContentType> for String {
    fn from(ct: ContentType) -> Self {
        ct.as_str().to_string()
    }
}

impl From<String> for ContentType {
    fn from(s: String) -> Self {
        ContentType::parse(&s)
    }
}

/// Built-in virtual groups computed from `content_type`, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmartGroup {
    Url,
    Images,
    Text,
    Dev,
}

impl SmartGroup {
    pub const RESERVED: [(&'static str, SmartGroup); 5] = [
        ("url", SmartGroup::Url),
        ("images", SmartGroup::Images),
        ("text", SmartGroup::Text),
        ("dev", SmartGroup::Dev),
        ("code", SmartGroup::Dev),
    ];

    /// Case-insensitive lookup of a reserved name.
    pub fn from_name(name: &str) -> Option<SmartGroup> {
        let lower = name.trim().to_lowercase();
        Self::RESERVED
            .iter()
            .find(|(reserved, _)| *reserved == lower)
            .map(|(_, group)| *group)
    }

    pub fn content_type(&self) -> ContentType {
        match self {
            SmartGroup::Url => ContentType::Url,
            SmartGroup::Images => ContentType::Image,
            SmartGroup::Text => ContentType::Text,
            SmartGroup::Dev => ContentType::Dev,
        }
    }
}

pub fn is_reserved_group_name(name: &str) -> bool {
    SmartGroup::from_name(name).is_some()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipEntry {
    pub id: i64,
    pub content_type: ContentType,
    pub raw_content: String,
    pub category: Option<String>,
    pub groups: Vec<String>,
    pub is_permanent: bool,
    pub created_at: DateTime<Utc>,
}

impl ClipEntry {
    pub fn in_group(&self, name: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub content_type: ContentType,
    pub raw_content: String,
    pub fingerprint: String,
    pub category: Option<String>,
    pub is_permanent: bool,
    /// `None` means stamp with the store's next capture time.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewEntry {
    pub fn captured(content_type: ContentType, raw_content: String, fingerprint: String) -> Self {
        Self {
            content_type,
            raw_content,
            fingerprint,
            category: None,
            is_permanent: false,
            created_at: None,
        }
    }
}

/// What the dedup-aware insert actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureResult {
    Inserted(i64),
    Bumped(i64),
}

impl CaptureResult {
    pub fn id(&self) -> i64 {
        match self {
            CaptureResult::Inserted(id) | CaptureResult::Bumped(id) => *id,
        }
    }
}

/// A group reference after resolution: virtual or a registry row.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupFilter {
    Smart(SmartGroup),
    Persisted(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scope {
    #[default]
    All,
    Group(GroupFilter),
    /// Legacy label match, widened to a content type for reserved names.
    Category {
        label: String,
        smart: Option<SmartGroup>,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntryFilter {
    pub scope: Scope,
    /// Case-insensitive substring of `raw_content`; empty matches all.
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    Replace,
    Merge,
}

impl ImportMode {
    pub fn parse(s: &str) -> Option<ImportMode> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Some(ImportMode::Replace),
            "merge" => Some(ImportMode::Merge),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub entry: NewEntry,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub imported: usize,
    /// Image entries removed by a replace whose files no surviving row
    /// references. The caller deletes the files.
    pub displaced_images: Vec<ClipEntry>,
}

#[derive(Debug, Serialize)]
pub struct StorageStats {
    pub total: i64,
    pub permanent: i64,
    pub text: i64,
    pub url: i64,
    pub image: i64,
    pub dev: i64,
    pub groups: i64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_open_labels_round_trip() {
        assert_eq!(ContentType::parse("url"), ContentType::Url);
        assert_eq!(ContentType::parse("code"), ContentType::Dev);
        let other = ContentType::parse("pdf");
        assert_eq!(other, ContentType::Other("pdf".into()));
        assert_eq!(other.as_str(), "pdf");
    }

    #[test]
    fn test_content_type_serializes_as_string() {
        let json = serde_json::to_string(&ContentType::Image).unwrap();
        assert_eq!(json, "\"image\"");
        let back: ContentType = serde_json::from_str("\"dev\"").unwrap();
        assert_eq!(back, ContentType::Dev);
    }

    #[test]
    fn test_smart_group_lookup_is_case_insensitive() {
        assert_eq!(SmartGroup::from_name("URL"), Some(SmartGroup::Url));
        assert_eq!(SmartGroup::from_name("images"), Some(SmartGroup::Images));
        assert_eq!(SmartGroup::from_name("Code"), Some(SmartGroup::Dev));
        assert_eq!(SmartGroup::from_name("Work"), None);
    }
}
