use serde::{Deserialize, Serialize};

/// A schema description stored in the search collection.
/// `metadata.table` names the table the text describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaDocument {
    pub document: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SchemaDocument {
    pub fn table(&self) -> Option<&str> {
        self.metadata.get("table").and_then(|v| v.as_str())
    }
}

/// Ranked retrieval result for one question
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaContext {
    /// Matched document texts, most relevant first
    pub chunks: Vec<String>,
    pub tables: std::collections::BTreeSet<String>,
}
