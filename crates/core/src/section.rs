//! Reconstructed sections

use serde::Serialize;

/// Structural shape of a multi-part section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    Table,
    List,
    Hierarchy,
    Sequence,
}

/// Metadata carried by a virtual candidate built from sibling chunks.
///
/// The virtual candidate absorbs the identity of its constituents: the
/// listed chunk ids are marked consumed and must not reappear downstream.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructedInfo {
    pub section_path: String,
    pub structure_type: StructureType,
    pub original_chunk_ids: Vec<String>,
    /// retrieved parts / expected parts, in `[0, 1]`.
    pub completeness: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structure_type_serializes_snake_case() {
        let json = serde_json::to_string(&StructureType::Hierarchy).unwrap();
        assert_eq!(json, "\"hierarchy\"");
    }
}
