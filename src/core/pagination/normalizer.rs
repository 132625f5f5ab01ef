//! Normalization of raw media items into [`MediaItemRecord`]s.
//!
//! Upstream payload shapes vary between API versions, so every field is read
//! from an ordered list of candidate paths; the first non-empty match wins.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A dotted path into a JSON object, e.g. `mediaFile.baseUrl`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn parse(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_string).collect())
    }

    /// Follow the path through nested objects
    pub fn lookup<'a>(&self, item: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(item, |node, key| node.as_object()?.get(key))
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Normalized fields tracked for completeness
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Id,
    Filename,
    MimeType,
    ContentUrl,
    CreatedAt,
    Width,
    Height,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::Id,
        Field::Filename,
        Field::MimeType,
        Field::ContentUrl,
        Field::CreatedAt,
        Field::Width,
        Field::Height,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Filename => "filename",
            Field::MimeType => "mimeType",
            Field::ContentUrl => "contentUrl",
            Field::CreatedAt => "createdAt",
            Field::Width => "width",
            Field::Height => "height",
        }
    }
}

/// Ordered candidate paths for each normalized field
#[derive(Debug, Clone)]
pub struct FieldPaths {
    pub id: Vec<FieldPath>,
    pub filename: Vec<FieldPath>,
    pub mime_type: Vec<FieldPath>,
    pub content_url: Vec<FieldPath>,
    pub created_at: Vec<FieldPath>,
    pub width: Vec<FieldPath>,
    pub height: Vec<FieldPath>,
}

fn paths(dotted: &[&str]) -> Vec<FieldPath> {
    dotted.iter().map(|p| FieldPath::parse(p)).collect()
}

impl Default for FieldPaths {
    fn default() -> Self {
        Self {
            id: paths(&["id", "mediaFile.id"]),
            filename: paths(&["mediaFile.filename", "filename"]),
            mime_type: paths(&["mediaFile.mimeType", "mimeType"]),
            content_url: paths(&["mediaFile.baseUrl", "baseUrl"]),
            created_at: paths(&[
                "createTime",
                "mediaFile.createTime",
                "mediaMetadata.creationTime",
            ]),
            width: paths(&[
                "mediaFile.mediaFileMetadata.width",
                "mediaFile.width",
                "mediaMetadata.width",
            ]),
            height: paths(&[
                "mediaFile.mediaFileMetadata.height",
                "mediaFile.height",
                "mediaMetadata.height",
            ]),
        }
    }
}

impl FieldPaths {
    /// First candidate whose value is present and not null or `""`
    pub fn first_present<'a>(candidates: &[FieldPath], item: &'a Value) -> Option<&'a Value> {
        candidates
            .iter()
            .filter_map(|path| path.lookup(item))
            .find(|value| has_value(value))
    }

    pub fn normalize(&self, item: &Value) -> NormalizedItem {
        let text = |candidates: &[FieldPath]| Self::first_present(candidates, item).and_then(as_text);
        let number = |candidates: &[FieldPath]| Self::first_present(candidates, item).and_then(as_dimension);

        NormalizedItem {
            id: text(&self.id),
            filename: text(&self.filename),
            mime_type: text(&self.mime_type),
            content_url: text(&self.content_url),
            created_at: text(&self.created_at),
            width: number(&self.width),
            height: number(&self.height),
        }
    }
}

fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Dimensions arrive as numbers or numeric strings (`"4032"`)
fn as_dimension(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// All fields extracted from one raw item; any may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedItem {
    pub id: Option<String>,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub content_url: Option<String>,
    pub created_at: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl NormalizedItem {
    pub fn has(&self, field: Field) -> bool {
        match field {
            Field::Id => self.id.is_some(),
            Field::Filename => self.filename.is_some(),
            Field::MimeType => self.mime_type.is_some(),
            Field::ContentUrl => self.content_url.is_some(),
            Field::CreatedAt => self.created_at.is_some(),
            Field::Width => self.width.is_some(),
            Field::Height => self.height.is_some(),
        }
    }

    pub fn missing(&self) -> Vec<Field> {
        Field::ALL.into_iter().filter(|f| !self.has(*f)).collect()
    }

    /// Items without an id cannot be tracked and are not emitted
    pub fn into_record(self) -> Option<MediaItemRecord> {
        Some(MediaItemRecord {
            id: self.id?,
            filename: self.filename,
            mime_type: self.mime_type,
            content_url: self.content_url,
            created_at: self.created_at,
            width: self.width,
            height: self.height,
        })
    }
}

/// One normalized media item, as written to the items stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItemRecord {
    pub id: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub content_url: Option<String>,
    pub created_at: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl MediaItemRecord {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|mime| mime.starts_with("image/"))
            .unwrap_or(false)
    }
}
