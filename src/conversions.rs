//! Mappings between the crate's enums and the integer / string codes that
//! are persisted in the database.

use crate::types::{DataType, DocumentType, StorageType};

pub(crate) fn data_type_to_code(data_type: DataType) -> i32 {
    match data_type {
        DataType::Zero => 0,
        DataType::UncompressedBitmap => 1,
        DataType::JpgXrCompressed => 2,
        DataType::UncompressedBrick => 32,
        DataType::Custom => 255,
    }
}

pub(crate) fn data_type_from_code(code: i32) -> Option<DataType> {
    match code {
        0 => Some(DataType::Zero),
        1 => Some(DataType::UncompressedBitmap),
        2 => Some(DataType::JpgXrCompressed),
        32 => Some(DataType::UncompressedBrick),
        255 => Some(DataType::Custom),
        _ => None,
    }
}

pub(crate) fn storage_type_to_code(storage_type: StorageType) -> i32 {
    match storage_type {
        StorageType::Invalid => 0,
        StorageType::BlobInDatabase => 1,
        StorageType::BlobExternal => 2,
    }
}

pub(crate) fn storage_type_from_code(code: i32) -> Option<StorageType> {
    match code {
        0 => Some(StorageType::Invalid),
        1 => Some(StorageType::BlobInDatabase),
        2 => Some(StorageType::BlobExternal),
        _ => None,
    }
}

pub(crate) fn document_type_to_str(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::Image2d => "Tiles2D",
        DocumentType::Image3d => "Bricks3D",
    }
}

pub(crate) fn document_type_from_str(value: &str) -> Option<DocumentType> {
    match value {
        "Tiles2D" => Some(DocumentType::Image2d),
        "Bricks3D" => Some(DocumentType::Image3d),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_codes_roundtrip() {
        for data_type in [
            DataType::Zero,
            DataType::UncompressedBitmap,
            DataType::JpgXrCompressed,
            DataType::UncompressedBrick,
            DataType::Custom,
        ] {
            assert_eq!(
                data_type_from_code(data_type_to_code(data_type)),
                Some(data_type)
            );
        }
        assert_eq!(data_type_from_code(77), None);
    }

    #[test]
    fn storage_type_codes_roundtrip() {
        for storage_type in [
            StorageType::Invalid,
            StorageType::BlobInDatabase,
            StorageType::BlobExternal,
        ] {
            assert_eq!(
                storage_type_from_code(storage_type_to_code(storage_type)),
                Some(storage_type)
            );
        }
        assert_eq!(storage_type_from_code(9), None);
    }

    #[test]
    fn document_type_strings_roundtrip() {
        assert_eq!(
            document_type_from_str(document_type_to_str(DocumentType::Image2d)),
            Some(DocumentType::Image2d)
        );
        assert_eq!(
            document_type_from_str(document_type_to_str(DocumentType::Image3d)),
            Some(DocumentType::Image3d)
        );
        // programmatic identifiers are case-sensitive
        assert_eq!(document_type_from_str("tiles2d"), None);
    }
}
