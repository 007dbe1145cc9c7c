//! Schema configuration: the names of all tables and columns, the declared
//! dimensions and the feature flags of a document. Built once at create or
//! open time and immutable afterwards; every piece of SQL in the crate takes
//! its identifiers from here.

use crate::error::{Result, TileDocError};
use crate::types::{Dimension, DocumentType};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub(crate) struct DatabaseConfiguration {
    document_type: DocumentType,
    dimensions: BTreeSet<Dimension>,
    indexed_dimensions: BTreeSet<Dimension>,
    use_spatial_index: bool,
    use_blob_table: bool,
}

impl DatabaseConfiguration {
    // table names
    pub const TABLE_TILES_INFO: &'static str = "TILESINFO";
    pub const TABLE_TILES_DATA: &'static str = "TILESDATA";
    pub const TABLE_BLOBS: &'static str = "BLOBS";
    pub const TABLE_SPATIAL_INDEX: &'static str = "TILESSPATIALINDEX";
    pub const TABLE_METADATA: &'static str = "METADATA";
    pub const TABLE_DOCINFO: &'static str = "DOCINFO";
    pub const TABLE_DIMENSIONS: &'static str = "DIMENSIONS";

    // tiles-info columns
    pub const COL_INFO_PK: &'static str = "Pk";
    pub const COL_INFO_TILE_X: &'static str = "TileX";
    pub const COL_INFO_TILE_Y: &'static str = "TileY";
    pub const COL_INFO_TILE_Z: &'static str = "TileZ";
    pub const COL_INFO_TILE_W: &'static str = "TileW";
    pub const COL_INFO_TILE_H: &'static str = "TileH";
    pub const COL_INFO_TILE_D: &'static str = "TileD";
    pub const COL_INFO_PYRAMID_LEVEL: &'static str = "PyramidLevel";
    pub const COL_INFO_TILE_DATA_ID: &'static str = "TileDataId";

    // tiles-data columns
    pub const COL_DATA_PK: &'static str = "Pk";
    pub const COL_DATA_PIXEL_WIDTH: &'static str = "PixelWidth";
    pub const COL_DATA_PIXEL_HEIGHT: &'static str = "PixelHeight";
    pub const COL_DATA_PIXEL_DEPTH: &'static str = "PixelDepth";
    pub const COL_DATA_PIXEL_TYPE: &'static str = "PixelType";
    pub const COL_DATA_TILE_DATA_TYPE: &'static str = "TileDataType";
    pub const COL_DATA_STORAGE_TYPE: &'static str = "BinDataStorageType";
    pub const COL_DATA_BIN_DATA_ID: &'static str = "BinDataId";

    // blob columns
    pub const COL_BLOB_PK: &'static str = "Pk";
    pub const COL_BLOB_DATA: &'static str = "Data";

    // spatial-index columns
    pub const COL_SPATIAL_PK: &'static str = "Pk";
    pub const COL_SPATIAL_MIN_X: &'static str = "MinX";
    pub const COL_SPATIAL_MAX_X: &'static str = "MaxX";
    pub const COL_SPATIAL_MIN_Y: &'static str = "MinY";
    pub const COL_SPATIAL_MAX_Y: &'static str = "MaxY";
    pub const COL_SPATIAL_MIN_Z: &'static str = "MinZ";
    pub const COL_SPATIAL_MAX_Z: &'static str = "MaxZ";

    // metadata columns
    pub const COL_META_PK: &'static str = "Pk";
    pub const COL_META_PARENT_PK: &'static str = "ParentPk";
    pub const COL_META_NAME: &'static str = "Name";
    pub const COL_META_TYPE_CODE: &'static str = "TypeCode";
    pub const COL_META_VALUE_INT: &'static str = "ValueInt";
    pub const COL_META_VALUE_DOUBLE: &'static str = "ValueDouble";
    pub const COL_META_VALUE_TEXT: &'static str = "ValueText";

    // descriptor columns
    pub const COL_DOCINFO_KEY: &'static str = "Key";
    pub const COL_DOCINFO_VALUE: &'static str = "ValueString";
    pub const COL_DIMENSIONS_DIMENSION: &'static str = "Dimension";

    pub const DIMENSION_COLUMN_PREFIX: &'static str = "Dim_";

    pub fn new(
        document_type: DocumentType,
        dimensions: impl IntoIterator<Item = Dimension>,
        indexed_dimensions: impl IntoIterator<Item = Dimension>,
        use_spatial_index: bool,
        use_blob_table: bool,
    ) -> Self {
        Self {
            document_type,
            dimensions: dimensions.into_iter().collect(),
            indexed_dimensions: indexed_dimensions.into_iter().collect(),
            use_spatial_index,
            use_blob_table,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn is_3d(&self) -> bool {
        self.document_type == DocumentType::Image3d
    }

    /// The declared dimensions in ascending order.
    pub fn dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        self.dimensions.iter().copied()
    }

    pub fn dimension_count(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_dimension_valid(&self, dimension: Dimension) -> bool {
        self.dimensions.contains(&dimension)
    }

    pub fn indexed_dimensions(&self) -> impl Iterator<Item = Dimension> + '_ {
        self.indexed_dimensions.iter().copied()
    }

    pub fn uses_spatial_index(&self) -> bool {
        self.use_spatial_index
    }

    pub fn uses_blob_table(&self) -> bool {
        self.use_blob_table
    }

    pub fn tiles_info_table(&self) -> &'static str {
        Self::TABLE_TILES_INFO
    }

    pub fn tiles_data_table(&self) -> &'static str {
        Self::TABLE_TILES_DATA
    }

    /// The blob table name; an error when the document was created without
    /// a blob table.
    pub fn blob_table(&self) -> Result<&'static str> {
        if self.use_blob_table {
            Ok(Self::TABLE_BLOBS)
        } else {
            Err(TileDocError::LogicError(
                "the document has no blob table".to_string(),
            ))
        }
    }

    /// The spatial-index table name; an error when the document was created
    /// without a spatial index.
    pub fn spatial_index_table(&self) -> Result<&'static str> {
        if self.use_spatial_index {
            Ok(Self::TABLE_SPATIAL_INDEX)
        } else {
            Err(TileDocError::LogicError(
                "the document has no spatial index".to_string(),
            ))
        }
    }

    pub fn metadata_table(&self) -> &'static str {
        Self::TABLE_METADATA
    }

    /// The column storing the coordinate value for a dimension.
    pub fn dimension_column(&self, dimension: Dimension) -> String {
        format!("{}{}", Self::DIMENSION_COLUMN_PREFIX, dimension)
    }

    /// The name of the single-column index on a dimension column.
    pub fn dimension_index_name(&self, dimension: Dimension) -> String {
        format!(
            "IDX_{}_{}{}",
            Self::TABLE_TILES_INFO,
            Self::DIMENSION_COLUMN_PREFIX,
            dimension
        )
    }

    pub fn pyramid_level_column(&self) -> &'static str {
        Self::COL_INFO_PYRAMID_LEVEL
    }

    /// The z-position column; an error for 2D documents.
    pub fn tile_z_column(&self) -> Result<&'static str> {
        self.require_3d(Self::COL_INFO_TILE_Z)
    }

    /// The depth column; an error for 2D documents.
    pub fn tile_d_column(&self) -> Result<&'static str> {
        self.require_3d(Self::COL_INFO_TILE_D)
    }

    /// The pixel-depth column; an error for 2D documents.
    pub fn pixel_depth_column(&self) -> Result<&'static str> {
        self.require_3d(Self::COL_DATA_PIXEL_DEPTH)
    }

    fn require_3d(&self, column: &'static str) -> Result<&'static str> {
        if self.is_3d() {
            Ok(column)
        } else {
            Err(TileDocError::LogicError(format!(
                "column '{column}' only exists in 3D documents"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimension(identifier: char) -> Dimension {
        Dimension::new(identifier).unwrap()
    }

    #[test]
    fn dimension_columns_carry_the_prefix() {
        let configuration = DatabaseConfiguration::new(
            DocumentType::Image2d,
            [dimension('C'), dimension('T')],
            [dimension('C')],
            true,
            true,
        );
        assert_eq!(configuration.dimension_column(dimension('C')), "Dim_C");
        assert_eq!(
            configuration.dimension_index_name(dimension('T')),
            "IDX_TILESINFO_Dim_T"
        );
    }

    #[test]
    fn unconfigured_roles_error() {
        let configuration = DatabaseConfiguration::new(
            DocumentType::Image2d,
            [dimension('C')],
            [],
            false,
            false,
        );
        assert!(matches!(
            configuration.blob_table(),
            Err(TileDocError::LogicError(_))
        ));
        assert!(matches!(
            configuration.spatial_index_table(),
            Err(TileDocError::LogicError(_))
        ));
        assert!(matches!(
            configuration.tile_z_column(),
            Err(TileDocError::LogicError(_))
        ));
    }

    #[test]
    fn three_dimensional_columns_resolve_for_3d_documents() {
        let configuration = DatabaseConfiguration::new(
            DocumentType::Image3d,
            [dimension('C')],
            [],
            true,
            true,
        );
        assert_eq!(configuration.tile_z_column().unwrap(), "TileZ");
        assert_eq!(configuration.tile_d_column().unwrap(), "TileD");
        assert_eq!(configuration.pixel_depth_column().unwrap(), "PixelDepth");
        assert!(configuration.is_3d());
    }
}
