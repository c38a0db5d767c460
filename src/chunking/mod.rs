//! Text chunking for ingesting the Labor Code into the vector store.

pub mod splitter;

use serde_json::json;

use crate::models::Passage;

pub use splitter::{split_text, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

/// Marker identifying court decisions mixed into the source text.
const CASE_MARKER: &str = "Hotărâre nr.";

/// Source metadata for a chunk: `case` for court decisions, `codul_muncii` otherwise.
pub fn tag_source(text: &str) -> serde_json::Value {
    if text.contains(CASE_MARKER) {
        json!({ "source": "case" })
    } else {
        json!({ "source": "codul_muncii" })
    }
}

/// Split a document into tagged passages ready for embedding.
pub fn chunk_document(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<Passage> {
    split_text(text, chunk_size, chunk_overlap)
        .into_iter()
        .map(|chunk| Passage {
            metadata: tag_source(&chunk),
            text: chunk,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_source_case() {
        assert_eq!(tag_source("Hotărâre nr. 1234/2019 a Curții")["source"], "case");
    }

    #[test]
    fn test_tag_source_code() {
        assert_eq!(tag_source("Art. 145 (1) Durata minimă")["source"], "codul_muncii");
    }

    #[test]
    fn test_chunk_document_empty() {
        assert!(chunk_document("", 1000, 200).is_empty());
        assert!(chunk_document("  \n\n  ", 1000, 200).is_empty());
    }

    #[test]
    fn test_chunk_document_tags_each_chunk() {
        let text = "Art. 1 Codul muncii reglementează raporturile de muncă.\n\nHotărâre nr. 5/2020 privind concediul.";
        let passages = chunk_document(text, 70, 0);
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].metadata["source"], "codul_muncii");
        assert_eq!(passages[1].metadata["source"], "case");
    }
}
