//! DocumentKey: identifies one logical document (a main note or one of its
//! branch panels).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Composite of `noteId` + `panelId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentKey {
    note_id: String,
    panel_id: String,
}

impl DocumentKey {
    pub fn new(note_id: impl Into<String>, panel_id: impl Into<String>) -> Self {
        Self {
            note_id: note_id.into(),
            panel_id: panel_id.into(),
        }
    }

    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn panel_id(&self) -> &str {
        &self.panel_id
    }

    /// Key used by local persistence (`noteId:panelId`).
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.note_id, self.panel_id)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.note_id, self.panel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_format() {
        let key = DocumentKey::new("note-1", "main");
        assert_eq!(key.storage_key(), "note-1:main");
        assert_eq!(key.to_string(), "note-1:main");
    }

    #[test]
    fn test_serializes_camel_case() {
        let key = DocumentKey::new("n", "p");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"{"noteId":"n","panelId":"p"}"#);
    }
}
