use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::models::SchemaDocument;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Schema JSON not found: {0}")]
    NotFound(String),

    #[error("Failed to read schema JSON: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid schema JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Top-level JSON must be a list of {{document, metadata}} objects.")]
    NotAList,

    #[error("Item {0} missing 'document' or 'metadata' keys.")]
    MissingKeys(usize),

    #[error("Item {0} 'document' must be a string.")]
    DocumentNotString(usize),

    #[error("Item {0} 'metadata' must be an object.")]
    MetadataNotObject(usize),
}

/// Read schema documents from a JSON file
pub fn load_documents(path: impl AsRef<Path>) -> Result<Vec<SchemaDocument>, LoadError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(LoadError::NotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    parse_documents(&text)
}

/// Validate every item before converting, so errors name the offending index
pub fn parse_documents(text: &str) -> Result<Vec<SchemaDocument>, LoadError> {
    let data: Value = serde_json::from_str(text)?;
    let Value::Array(items) = data else {
        return Err(LoadError::NotAList);
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let Value::Object(mut fields) = item else {
                return Err(LoadError::MissingKeys(i));
            };
            let (Some(document), Some(metadata)) =
                (fields.remove("document"), fields.remove("metadata"))
            else {
                return Err(LoadError::MissingKeys(i));
            };
            let Value::String(document) = document else {
                return Err(LoadError::DocumentNotString(i));
            };
            let Value::Object(metadata) = metadata else {
                return Err(LoadError::MetadataNotObject(i));
            };
            Ok(SchemaDocument { document, metadata })
        })
        .collect()
}
