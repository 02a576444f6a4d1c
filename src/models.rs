//! Core data models used throughout the uploader.
//!
//! These types represent the search hits, selections, tokens and upload
//! requests that flow between the search, token and upload components.

use std::borrow::Cow;
use std::fmt;
use std::hash::Hash;

use crate::media::ImageFormat;

/// Anything that can be searched for, selected, and shown in a merged list.
///
/// `Id` is the identity used by the selection store; `display_name` is the
/// key used for ordering and for de-duplicating selected items against the
/// current search hits.
pub trait Selectable: Clone + fmt::Debug + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync;

    fn id(&self) -> Self::Id;

    fn display_name(&self) -> Cow<'_, str>;
}

/// A category on the media repository. Identity is the (case-sensitive) name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryRef {
    name: String,
}

impl CategoryRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Selectable for CategoryRef {
    type Id = String;

    fn id(&self) -> String {
        self.name.clone()
    }

    fn display_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

/// A linked-data entity found by full-text search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub id: u64,
    /// Page title, e.g. `"Q1027"`. May be empty.
    pub name: String,
    /// Search snippet describing the entity.
    pub description: String,
}

impl EntityRef {
    pub fn new(id: u64, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
        }
    }
}

impl Selectable for EntityRef {
    type Id = u64;

    fn id(&self) -> u64 {
        self.id
    }

    fn display_name(&self) -> Cow<'_, str> {
        if self.name.is_empty() {
            Cow::Owned(self.id.to_string())
        } else {
            Cow::Borrowed(&self.name)
        }
    }
}

/// One row of a merged display list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEntry<T> {
    /// `true` when the item came from the latest search response, `false`
    /// when it is only shown because it is selected.
    pub from_search: bool,
    pub item: T,
}

/// The two kinds of token the handshake needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    Login,
    Csrf,
}

impl TokenKind {
    /// Value of the `type` parameter for `meta=tokens`.
    pub fn api_type(self) -> &'static str {
        match self {
            TokenKind::Login => "login",
            TokenKind::Csrf => "csrf",
        }
    }

    /// Login tokens are consumed by a single login attempt.
    pub fn is_single_use(self) -> bool {
        matches!(self, TokenKind::Login)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_type())
    }
}

/// A token value together with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
}

/// Everything needed to publish one file. Built once, consumed once.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Encoded image bytes; `None` when nothing was picked.
    pub payload: Option<Vec<u8>>,
    /// Target file name without extension.
    pub file_base_name: String,
    pub format: ImageFormat,
    pub categories: Vec<CategoryRef>,
    pub entities: Vec<EntityRef>,
    /// Free-text description placed in the file page's information block.
    pub description: String,
}

impl UploadRequest {
    pub fn new(payload: Vec<u8>, file_base_name: impl Into<String>, format: ImageFormat) -> Self {
        Self {
            payload: Some(payload),
            file_base_name: file_base_name.into(),
            format,
            categories: Vec::new(),
            entities: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_categories(mut self, categories: Vec<CategoryRef>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_entities(mut self, entities: Vec<EntityRef>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Full target file name, e.g. `"Sunset.jpg"`, or `None` when the base
    /// name is empty or the format is not a known image format.
    pub fn target_filename(&self) -> Option<String> {
        crate::media::upload_filename(&self.file_base_name, self.format)
    }
}
