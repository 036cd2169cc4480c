//! Knowledge-base identity: display names, server ids and the target a batch
//! uploads into.

use std::fmt;

/// Separates a knowledge base's display name from the suffix the server
/// appends when it creates the knowledge base.
pub const KB_ID_DELIMITER: char = '_';

/// Human label for a server id: everything before the last delimiter.
///
/// `manuals_17` → `manuals`, `team_a_9f3c` → `team_a`. An id without a
/// delimiter is its own display name.
pub fn display_name_of(server_id: &str) -> &str {
    match server_id.rsplit_once(KB_ID_DELIMITER) {
        Some((prefix, _)) => prefix,
        None => server_id,
    }
}

/// A knowledge base as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KnowledgeBaseRef {
    pub display_name: String,
    pub server_id: String,
}

impl KnowledgeBaseRef {
    pub fn from_server_id(server_id: impl Into<String>) -> Self {
        let server_id = server_id.into();
        Self {
            display_name: display_name_of(&server_id).to_string(),
            server_id,
        }
    }
}

impl fmt::Display for KnowledgeBaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, self.server_id)
    }
}

/// Whether the user picks an existing knowledge base or names a new one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KbMode {
    #[default]
    SelectExisting,
    CreateNew,
}

impl KbMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SelectExisting => "select",
            Self::CreateNew => "create",
        }
    }
}

/// Where a batch of uploads lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KbTarget {
    /// An existing knowledge base, by server id.
    Select { server_id: String },
    /// A name with no listed counterpart; the server creates it on first upload.
    CreateNew { name: String },
    /// A typed name that matched an existing knowledge base.
    CreateNewMatched { name: String, matched_id: String },
}

impl KbTarget {
    pub fn mode(&self) -> KbMode {
        match self {
            Self::Select { .. } => KbMode::SelectExisting,
            Self::CreateNew { .. } | Self::CreateNewMatched { .. } => KbMode::CreateNew,
        }
    }

    /// The name sent as `kb_name` on upload. Existing knowledge bases are sent
    /// by display name; the server maps it back to the same folder.
    pub fn upload_name(&self) -> &str {
        match self {
            Self::Select { server_id } => display_name_of(server_id),
            Self::CreateNew { name } | Self::CreateNewMatched { name, .. } => name,
        }
    }

    /// Server id whose document listing reflects this target, if one is known
    /// before any upload.
    pub fn listing_id(&self) -> Option<&str> {
        match self {
            Self::Select { server_id } => Some(server_id),
            Self::CreateNewMatched { matched_id, .. } => Some(matched_id),
            Self::CreateNew { .. } => None,
        }
    }
}

impl fmt::Display for KbTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Select { server_id } => write!(f, "{server_id}"),
            Self::CreateNew { name } => write!(f, "{name} (new)"),
            Self::CreateNewMatched { name, matched_id } => {
                write!(f, "{name} (existing {matched_id})")
            }
        }
    }
}
