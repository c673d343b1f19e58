//! Helpers for constructing page payloads and point identifiers.

use crate::hashing::ContentHash;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Namespace for deterministic page point identifiers.
const POINT_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_3c2e_9b4d_4e0a_8f51_7d2c_90ab_e314);

/// Metadata describing one embedded page.
#[derive(Debug, Clone)]
pub struct PagePayload<'a> {
    /// Owning file record.
    pub file_id: &'a str,
    /// Display name of the file.
    pub file_name: &'a str,
    /// Lowercase extension including the dot.
    pub file_type: &'a str,
    /// Content fingerprint of the file.
    pub content_hash: &'a ContentHash,
    /// 1-based page number.
    pub page_number: u32,
    /// Page count of the file.
    pub total_pages: u32,
    /// Tokens reported by the embedding service.
    pub token_count: u32,
    /// Vector length.
    pub dimension: u32,
}

/// Build the payload object stored alongside each page vector.
pub fn build_payload(page: &PagePayload<'_>, indexed_at: &str) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("file_id".into(), Value::String(page.file_id.to_string()));
    payload.insert("file_name".into(), Value::String(page.file_name.to_string()));
    payload.insert("file_type".into(), Value::String(page.file_type.to_string()));
    payload.insert(
        "content_hash".into(),
        Value::String(page.content_hash.to_string()),
    );
    payload.insert("page_number".into(), Value::from(page.page_number));
    payload.insert("total_pages".into(), Value::from(page.total_pages));
    payload.insert("token_count".into(), Value::from(page.token_count));
    payload.insert("dimension".into(), Value::from(page.dimension));
    payload.insert("indexed_at".into(), Value::String(indexed_at.to_string()));
    payload
}

/// Stable point identifier for a page of a file.
///
/// Retrying a file overwrites its earlier points instead of adding new ones.
pub fn vector_reference(file_id: &str, page_number: u32) -> String {
    Uuid::new_v5(&POINT_NAMESPACE, format!("{file_id}:{page_number}").as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::fingerprint_bytes;

    #[test]
    fn vector_reference_is_stable_per_page() {
        let a = vector_reference("file-1", 1);
        assert_eq!(a, vector_reference("file-1", 1));
        assert_ne!(a, vector_reference("file-1", 2));
        assert_ne!(a, vector_reference("file-2", 1));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn payload_carries_page_metadata() {
        let hash = fingerprint_bytes(b"doc");
        let payload = build_payload(
            &PagePayload {
                file_id: "file-1",
                file_name: "report.pdf",
                file_type: ".pdf",
                content_hash: &hash,
                page_number: 2,
                total_pages: 5,
                token_count: 1030,
                dimension: 128,
            },
            "2025-01-01T00:00:00Z",
        );
        assert_eq!(payload["file_id"], "file-1");
        assert_eq!(payload["file_name"], "report.pdf");
        assert_eq!(payload["file_type"], ".pdf");
        assert_eq!(payload["content_hash"], hash.as_str());
        assert_eq!(payload["page_number"], 2);
        assert_eq!(payload["total_pages"], 5);
        assert_eq!(payload["token_count"], 1030);
        assert_eq!(payload["dimension"], 128);
        assert_eq!(payload["indexed_at"], "2025-01-01T00:00:00Z");
    }
}
