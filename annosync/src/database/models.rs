//! Data models
//!
//! Rust structs for annotations and queued operations.
//! Field names match the remote record layout, so the same types are
//! used for the gateway payloads and for the persisted queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highlight color palette offered by the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Orange,
    Purple,
}

impl HighlightColor {
    pub const ALL: [HighlightColor; 6] = [
        HighlightColor::Yellow,
        HighlightColor::Green,
        HighlightColor::Blue,
        HighlightColor::Pink,
        HighlightColor::Orange,
        HighlightColor::Purple,
    ];

    pub fn hex(self) -> &'static str {
        match self {
            HighlightColor::Yellow => "#FFEB3B",
            HighlightColor::Green => "#4CAF50",
            HighlightColor::Blue => "#2196F3",
            HighlightColor::Pink => "#E91E63",
            HighlightColor::Orange => "#FF9800",
            HighlightColor::Purple => "#9C27B0",
        }
    }
}

impl fmt::Display for HighlightColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.hex())
    }
}

impl FromStr for HighlightColor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        HighlightColor::ALL
            .into_iter()
            .find(|c| c.hex().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown highlight color: {}", s))
    }
}

impl TryFrom<String> for HighlightColor {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HighlightColor> for String {
    fn from(color: HighlightColor) -> Self {
        color.hex().to_string()
    }
}

/// Closed set of annotation categories.
///
/// Serialized with the labels stored remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Importante")]
    Important,
    #[serde(rename = "Dúvida")]
    Question,
    #[serde(rename = "Revisão")]
    Review,
    #[serde(rename = "Inspiração")]
    Inspiration,
    #[serde(rename = "Vocabulário")]
    Vocabulary,
    #[serde(rename = "Personagem")]
    Character,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Important,
        Category::Question,
        Category::Review,
        Category::Inspiration,
        Category::Vocabulary,
        Category::Character,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Important => "Importante",
            Category::Question => "Dúvida",
            Category::Review => "Revisão",
            Category::Inspiration => "Inspiração",
            Category::Vocabulary => "Vocabulário",
            Category::Character => "Personagem",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.label() == s)
            .ok_or_else(|| format!("Unknown category: {}", s))
    }
}

/// A user note anchored to a position within a chapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Client-generated UUID, assigned before any network round-trip
    pub id: String,
    pub book_id: String,
    pub chapter_id: String,
    pub content: String,
    /// Abstract offset into the chapter content
    pub position: u32,
    #[serde(default)]
    pub color: HighlightColor,
    #[serde(default)]
    pub category: Option<Category>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Annotation {
    /// Payload carried by queued add/update operations
    pub fn draft(&self) -> AnnotationDraft {
        AnnotationDraft {
            book_id: self.book_id.clone(),
            chapter_id: self.chapter_id.clone(),
            content: self.content.clone(),
            position: self.position,
            color: self.color,
            category: self.category,
        }
    }
}

/// Annotation fields without identity and timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationDraft {
    pub book_id: String,
    pub chapter_id: String,
    pub content: String,
    pub position: u32,
    #[serde(default)]
    pub color: HighlightColor,
    #[serde(default)]
    pub category: Option<Category>,
}

/// Kind of queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Add,
    Update,
    Delete,
}

/// A queued mutation awaiting remote confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Id of the target annotation
    pub id: String,
    pub action: PendingAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<AnnotationDraft>,
    /// Creation time in epoch milliseconds
    pub timestamp: i64,
}

impl PendingOperation {
    pub fn add(id: impl Into<String>, data: AnnotationDraft) -> Self {
        Self::new(id, PendingAction::Add, Some(data))
    }

    pub fn update(id: impl Into<String>, data: AnnotationDraft) -> Self {
        Self::new(id, PendingAction::Update, Some(data))
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self::new(id, PendingAction::Delete, None)
    }

    fn new(id: impl Into<String>, action: PendingAction, data: Option<AnnotationDraft>) -> Self {
        Self {
            id: id.into(),
            action,
            data,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Stamp the operation with the time the change was made locally
    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = at.timestamp_millis();
        self
    }

    /// Creation time as a UTC timestamp
    pub fn queued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now)
    }
}

/// Full record sent on insert; the remote row also carries the owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub chapter_id: String,
    pub content: String,
    pub position: u32,
    pub color: HighlightColor,
    pub category: Option<Category>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnnotationRecord {
    pub fn new(annotation: &Annotation, user_id: impl Into<String>) -> Self {
        Self {
            id: annotation.id.clone(),
            user_id: user_id.into(),
            book_id: annotation.book_id.clone(),
            chapter_id: annotation.chapter_id.clone(),
            content: annotation.content.clone(),
            position: annotation.position,
            color: annotation.color,
            category: annotation.category,
            created_at: annotation.created_at,
            updated_at: annotation.updated_at,
        }
    }

    /// Rebuild an insert record from a queued add
    pub fn from_draft(
        id: impl Into<String>,
        user_id: impl Into<String>,
        draft: &AnnotationDraft,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            book_id: draft.book_id.clone(),
            chapter_id: draft.chapter_id.clone(),
            content: draft.content.clone(),
            position: draft.position,
            color: draft.color,
            category: draft.category,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn into_annotation(self) -> Annotation {
        Annotation {
            id: self.id,
            book_id: self.book_id,
            chapter_id: self.chapter_id,
            content: self.content,
            position: self.position,
            color: self.color,
            category: self.category,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Fields changed by an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPatch {
    pub content: String,
    pub color: HighlightColor,
    /// Serialized as null when cleared
    pub category: Option<Category>,
    pub updated_at: DateTime<Utc>,
}

impl AnnotationPatch {
    pub fn from_draft(draft: &AnnotationDraft, updated_at: DateTime<Utc>) -> Self {
        Self {
            content: draft.content.clone(),
            color: draft.color,
            category: draft.category,
            updated_at,
        }
    }
}

/// Group annotations by category, uncategorized last
pub fn group_by_category(annotations: &[Annotation]) -> Vec<(Option<Category>, Vec<Annotation>)> {
    let mut groups: Vec<(Option<Category>, Vec<Annotation>)> = Vec::new();

    for annotation in annotations {
        match groups.iter_mut().find(|(c, _)| *c == annotation.category) {
            Some((_, items)) => items.push(annotation.clone()),
            None => groups.push((annotation.category, vec![annotation.clone()])),
        }
    }

    // None sorts first under Option's Ord; flip it to the end
    groups.sort_by(|(a, _), (b, _)| match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (Some(_), None) => std::cmp::Ordering::Less,
        (Some(a), Some(b)) => a.cmp(b),
    });

    groups
}
