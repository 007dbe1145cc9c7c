//! DDL text and WHERE-fragment builders. Everything here takes its
//! identifiers from [`DatabaseConfiguration`] and binds values positionally;
//! no caller-provided string ever reaches an identifier position.

use crate::error::Result;
use crate::geometry::{CuboidD, LineThroughTwoPointsD, PlaneNormalAndDistanceD, RectangleD};
use crate::query::{BindValue, SqlFragment};
use crate::schema::DatabaseConfiguration;
use crate::sql_functions::{FN_RTREE_LINE_SEGMENT_2D, FN_RTREE_PLANE_AABB_3D, FN_SCALAR_INTERSECTS_WITH_LINE};
use crate::types::Dimension;

type Config = DatabaseConfiguration;

pub(crate) fn sql_create_tiles_info(configuration: &Config) -> String {
    let mut column_defs = Vec::with_capacity(configuration.dimension_count() + 8);
    column_defs.push(format!(
        r#""{}" INTEGER PRIMARY KEY AUTOINCREMENT"#,
        Config::COL_INFO_PK
    ));
    for dimension in configuration.dimensions() {
        column_defs.push(format!(
            r#""{}" INTEGER NOT NULL"#,
            configuration.dimension_column(dimension)
        ));
    }
    column_defs.push(format!(r#""{}" REAL NOT NULL"#, Config::COL_INFO_TILE_X));
    column_defs.push(format!(r#""{}" REAL NOT NULL"#, Config::COL_INFO_TILE_Y));
    if configuration.is_3d() {
        column_defs.push(format!(r#""{}" REAL NOT NULL"#, Config::COL_INFO_TILE_Z));
    }
    column_defs.push(format!(r#""{}" REAL NOT NULL"#, Config::COL_INFO_TILE_W));
    column_defs.push(format!(r#""{}" REAL NOT NULL"#, Config::COL_INFO_TILE_H));
    if configuration.is_3d() {
        column_defs.push(format!(r#""{}" REAL NOT NULL"#, Config::COL_INFO_TILE_D));
    }
    column_defs.push(format!(
        r#""{}" INTEGER NOT NULL"#,
        Config::COL_INFO_PYRAMID_LEVEL
    ));
    column_defs.push(format!(
        r#""{}" INTEGER NOT NULL"#,
        Config::COL_INFO_TILE_DATA_ID
    ));

    format!(
        r#"CREATE TABLE "{}" ({})"#,
        configuration.tiles_info_table(),
        column_defs.join(", ")
    )
}

pub(crate) fn sql_create_tiles_data(configuration: &Config) -> String {
    let mut column_defs = vec![format!(
        r#""{}" INTEGER PRIMARY KEY AUTOINCREMENT"#,
        Config::COL_DATA_PK
    )];
    column_defs.push(format!(
        r#""{}" INTEGER NOT NULL"#,
        Config::COL_DATA_PIXEL_WIDTH
    ));
    column_defs.push(format!(
        r#""{}" INTEGER NOT NULL"#,
        Config::COL_DATA_PIXEL_HEIGHT
    ));
    if configuration.is_3d() {
        column_defs.push(format!(
            r#""{}" INTEGER NOT NULL"#,
            Config::COL_DATA_PIXEL_DEPTH
        ));
    }
    column_defs.push(format!(
        r#""{}" INTEGER NOT NULL"#,
        Config::COL_DATA_PIXEL_TYPE
    ));
    column_defs.push(format!(
        r#""{}" INTEGER NOT NULL"#,
        Config::COL_DATA_TILE_DATA_TYPE
    ));
    column_defs.push(format!(
        r#""{}" INTEGER NOT NULL"#,
        Config::COL_DATA_STORAGE_TYPE
    ));
    column_defs.push(format!(r#""{}" INTEGER"#, Config::COL_DATA_BIN_DATA_ID));

    format!(
        r#"CREATE TABLE "{}" ({})"#,
        configuration.tiles_data_table(),
        column_defs.join(", ")
    )
}

pub(crate) fn sql_create_blobs(configuration: &Config) -> Result<String> {
    Ok(format!(
        r#"CREATE TABLE "{}" ("{}" INTEGER PRIMARY KEY AUTOINCREMENT, "{}" BLOB)"#,
        configuration.blob_table()?,
        Config::COL_BLOB_PK,
        Config::COL_BLOB_DATA
    ))
}

pub(crate) fn sql_create_spatial_index(configuration: &Config) -> Result<String> {
    let mut columns = vec![
        Config::COL_SPATIAL_PK,
        Config::COL_SPATIAL_MIN_X,
        Config::COL_SPATIAL_MAX_X,
        Config::COL_SPATIAL_MIN_Y,
        Config::COL_SPATIAL_MAX_Y,
    ];
    if configuration.is_3d() {
        columns.push(Config::COL_SPATIAL_MIN_Z);
        columns.push(Config::COL_SPATIAL_MAX_Z);
    }

    // module arguments reach the rtree module verbatim, so the column
    // names stay unquoted here
    Ok(format!(
        r#"CREATE VIRTUAL TABLE "{}" USING rtree({})"#,
        configuration.spatial_index_table()?,
        columns.join(", ")
    ))
}

pub(crate) fn sql_create_metadata(configuration: &Config) -> String {
    format!(
        r#"CREATE TABLE "{}" ("{}" INTEGER PRIMARY KEY AUTOINCREMENT, "{}" INTEGER, "{}" TEXT NOT NULL, "{}" INTEGER NOT NULL, "{}" INTEGER, "{}" REAL, "{}" TEXT)"#,
        configuration.metadata_table(),
        Config::COL_META_PK,
        Config::COL_META_PARENT_PK,
        Config::COL_META_NAME,
        Config::COL_META_TYPE_CODE,
        Config::COL_META_VALUE_INT,
        Config::COL_META_VALUE_DOUBLE,
        Config::COL_META_VALUE_TEXT
    )
}

pub(crate) fn sql_create_docinfo() -> String {
    format!(
        r#"CREATE TABLE "{}" ("{}" TEXT NOT NULL UNIQUE, "{}" TEXT)"#,
        Config::TABLE_DOCINFO,
        Config::COL_DOCINFO_KEY,
        Config::COL_DOCINFO_VALUE
    )
}

pub(crate) fn sql_create_dimensions_table() -> String {
    format!(
        r#"CREATE TABLE "{}" ("{}" TEXT NOT NULL UNIQUE)"#,
        Config::TABLE_DIMENSIONS,
        Config::COL_DIMENSIONS_DIMENSION
    )
}

pub(crate) fn sql_create_dimension_index(
    configuration: &Config,
    dimension: Dimension,
) -> String {
    format!(
        r#"CREATE INDEX "{}" ON "{}" ("{}")"#,
        configuration.dimension_index_name(dimension),
        configuration.tiles_info_table(),
        configuration.dimension_column(dimension)
    )
}

/// Overlap of tile rectangles with a query rectangle, evaluated directly on
/// the logical-position columns (closed intervals on every axis).
pub(crate) fn rect_overlap_fragment(rect: &RectangleD, _configuration: &Config) -> SqlFragment {
    SqlFragment {
        sql: format!(
            r#"("{x}"+"{w}">=? AND "{x}"<=? AND "{y}"+"{h}">=? AND "{y}"<=?)"#,
            x = Config::COL_INFO_TILE_X,
            w = Config::COL_INFO_TILE_W,
            y = Config::COL_INFO_TILE_Y,
            h = Config::COL_INFO_TILE_H
        ),
        params: vec![
            BindValue::Double(rect.x),
            BindValue::Double(rect.x + rect.w),
            BindValue::Double(rect.y),
            BindValue::Double(rect.y + rect.h),
        ],
    }
}

/// Overlap of brick cuboids with a query cuboid on the logical-position
/// columns.
pub(crate) fn cuboid_overlap_fragment(
    cuboid: &CuboidD,
    configuration: &Config,
) -> Result<SqlFragment> {
    Ok(SqlFragment {
        sql: format!(
            r#"("{x}"+"{w}">=? AND "{x}"<=? AND "{y}"+"{h}">=? AND "{y}"<=? AND "{z}"+"{d}">=? AND "{z}"<=?)"#,
            x = Config::COL_INFO_TILE_X,
            w = Config::COL_INFO_TILE_W,
            y = Config::COL_INFO_TILE_Y,
            h = Config::COL_INFO_TILE_H,
            z = configuration.tile_z_column()?,
            d = configuration.tile_d_column()?
        ),
        params: vec![
            BindValue::Double(cuboid.x),
            BindValue::Double(cuboid.x + cuboid.w),
            BindValue::Double(cuboid.y),
            BindValue::Double(cuboid.y + cuboid.h),
            BindValue::Double(cuboid.z),
            BindValue::Double(cuboid.z + cuboid.d),
        ],
    })
}

/// The closed-form plane/cuboid intersection on the logical-position
/// columns: twice the distance of the cuboid center from the plane compared
/// against the cuboid extent projected onto the plane normal.
pub(crate) fn plane_overlap_fragment(
    plane: &PlaneNormalAndDistanceD,
    configuration: &Config,
) -> Result<SqlFragment> {
    let z = configuration.tile_z_column()?;
    let d = configuration.tile_d_column()?;
    Ok(SqlFragment {
        sql: format!(
            r#"(2*abs(("{w}"/2+"{x}")*?+("{h}"/2+"{y}")*?+("{d}"/2+"{z}")*?-?)<=abs(?)*"{w}"+abs(?)*"{h}"+abs(?)*"{d}")"#,
            x = Config::COL_INFO_TILE_X,
            y = Config::COL_INFO_TILE_Y,
            w = Config::COL_INFO_TILE_W,
            h = Config::COL_INFO_TILE_H,
            z = z,
            d = d
        ),
        params: vec![
            BindValue::Double(plane.normal.x),
            BindValue::Double(plane.normal.y),
            BindValue::Double(plane.normal.z),
            BindValue::Double(plane.distance),
            BindValue::Double(plane.normal.x),
            BindValue::Double(plane.normal.y),
            BindValue::Double(plane.normal.z),
        ],
    })
}

/// Bounding-box overlap on the 2D spatial-index columns.
pub(crate) fn spatial_bbox_fragment_2d(
    rect: &RectangleD,
    _configuration: &Config,
) -> SqlFragment {
    SqlFragment {
        sql: format!(
            r#"("{max_x}">=? AND "{min_x}"<=? AND "{max_y}">=? AND "{min_y}"<=?)"#,
            max_x = Config::COL_SPATIAL_MAX_X,
            min_x = Config::COL_SPATIAL_MIN_X,
            max_y = Config::COL_SPATIAL_MAX_Y,
            min_y = Config::COL_SPATIAL_MIN_Y
        ),
        params: vec![
            BindValue::Double(rect.x),
            BindValue::Double(rect.x + rect.w),
            BindValue::Double(rect.y),
            BindValue::Double(rect.y + rect.h),
        ],
    }
}

/// Bounding-box overlap on the 3D spatial-index columns.
pub(crate) fn spatial_bbox_fragment_3d(
    cuboid: &CuboidD,
    _configuration: &Config,
) -> SqlFragment {
    SqlFragment {
        sql: format!(
            r#"("{max_x}">=? AND "{min_x}"<=? AND "{max_y}">=? AND "{min_y}"<=? AND "{max_z}">=? AND "{min_z}"<=?)"#,
            max_x = Config::COL_SPATIAL_MAX_X,
            min_x = Config::COL_SPATIAL_MIN_X,
            max_y = Config::COL_SPATIAL_MAX_Y,
            min_y = Config::COL_SPATIAL_MIN_Y,
            max_z = Config::COL_SPATIAL_MAX_Z,
            min_z = Config::COL_SPATIAL_MIN_Z
        ),
        params: vec![
            BindValue::Double(cuboid.x),
            BindValue::Double(cuboid.x + cuboid.w),
            BindValue::Double(cuboid.y),
            BindValue::Double(cuboid.y + cuboid.h),
            BindValue::Double(cuboid.z),
            BindValue::Double(cuboid.z + cuboid.d),
        ],
    }
}

/// R-tree MATCH against the 2D line-segment query function. The fragment
/// qualifies the key column with the alias the spatial queries bind to the
/// spatial-index table, so it stays unambiguous in the joined form.
pub(crate) fn spatial_line_match_fragment(line: &LineThroughTwoPointsD) -> SqlFragment {
    SqlFragment {
        sql: format!(
            r#"(spatialindex."{}" MATCH {}(?,?,?,?))"#,
            Config::COL_SPATIAL_PK,
            FN_RTREE_LINE_SEGMENT_2D
        ),
        params: vec![
            BindValue::Double(line.a.x),
            BindValue::Double(line.a.y),
            BindValue::Double(line.b.x),
            BindValue::Double(line.b.y),
        ],
    }
}

/// R-tree MATCH against the 3D plane query function; see
/// [`spatial_line_match_fragment`] for the alias convention.
pub(crate) fn spatial_plane_match_fragment(plane: &PlaneNormalAndDistanceD) -> SqlFragment {
    SqlFragment {
        sql: format!(
            r#"(spatialindex."{}" MATCH {}(?,?,?,?))"#,
            Config::COL_SPATIAL_PK,
            FN_RTREE_PLANE_AABB_3D
        ),
        params: vec![
            BindValue::Double(plane.normal.x),
            BindValue::Double(plane.normal.y),
            BindValue::Double(plane.normal.z),
            BindValue::Double(plane.distance),
        ],
    }
}

/// Scalar segment/rectangle intersection on the logical-position columns,
/// used when no spatial index is present.
pub(crate) fn line_scalar_fragment(line: &LineThroughTwoPointsD) -> SqlFragment {
    SqlFragment {
        sql: format!(
            r#"({}("{x}","{y}","{w}","{h}",?,?,?,?)<>0)"#,
            FN_SCALAR_INTERSECTS_WITH_LINE,
            x = Config::COL_INFO_TILE_X,
            y = Config::COL_INFO_TILE_Y,
            w = Config::COL_INFO_TILE_W,
            h = Config::COL_INFO_TILE_H
        ),
        params: vec![
            BindValue::Double(line.a.x),
            BindValue::Double(line.a.y),
            BindValue::Double(line.b.x),
            BindValue::Double(line.b.y),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentType;

    fn dimension(identifier: char) -> Dimension {
        Dimension::new(identifier).unwrap()
    }

    fn configuration_3d() -> DatabaseConfiguration {
        DatabaseConfiguration::new(
            DocumentType::Image3d,
            [dimension('C')],
            [],
            true,
            true,
        )
    }

    #[test]
    fn tiles_info_ddl_lists_dimension_columns() {
        let configuration = DatabaseConfiguration::new(
            DocumentType::Image2d,
            [dimension('C'), dimension('M')],
            [],
            true,
            true,
        );
        let sql = sql_create_tiles_info(&configuration);
        assert!(sql.contains(r#""Dim_C" INTEGER NOT NULL"#));
        assert!(sql.contains(r#""Dim_M" INTEGER NOT NULL"#));
        assert!(!sql.contains("TileZ"));
        assert!(sql.contains(r#""TileDataId" INTEGER NOT NULL"#));
    }

    #[test]
    fn three_dimensional_ddl_adds_z_and_depth() {
        let sql = sql_create_tiles_info(&configuration_3d());
        assert!(sql.contains(r#""TileZ" REAL NOT NULL"#));
        assert!(sql.contains(r#""TileD" REAL NOT NULL"#));

        let spatial = sql_create_spatial_index(&configuration_3d()).unwrap();
        assert_eq!(
            spatial,
            r#"CREATE VIRTUAL TABLE "TILESSPATIALINDEX" USING rtree(Pk, MinX, MaxX, MinY, MaxY, MinZ, MaxZ)"#
        );
    }

    #[test]
    fn rect_fragment_binds_corner_values() {
        let configuration = DatabaseConfiguration::new(
            DocumentType::Image2d,
            [dimension('C')],
            [],
            false,
            true,
        );
        let fragment =
            rect_overlap_fragment(&RectangleD::new(5.0, 6.0, 30.0, 40.0), &configuration);
        assert_eq!(
            fragment.sql,
            r#"("TileX"+"TileW">=? AND "TileX"<=? AND "TileY"+"TileH">=? AND "TileY"<=?)"#
        );
        assert_eq!(
            fragment.params,
            vec![
                BindValue::Double(5.0),
                BindValue::Double(35.0),
                BindValue::Double(6.0),
                BindValue::Double(46.0)
            ]
        );
    }

    #[test]
    fn plane_fragment_repeats_normal_components() {
        use crate::geometry::Vector3dD;
        let plane =
            PlaneNormalAndDistanceD::new(Vector3dD::new(0.0, 0.0, 1.0), 25.0);
        let fragment = plane_overlap_fragment(&plane, &configuration_3d()).unwrap();
        assert_eq!(fragment.params.len(), 7);
        assert!(fragment.sql.contains(r#"abs(?)*"TileW""#));
    }

    #[test]
    fn match_fragments_name_the_query_functions() {
        let line = LineThroughTwoPointsD::new(
            crate::geometry::PointD::new(0.0, 0.0),
            crate::geometry::PointD::new(1.0, 1.0),
        );
        let fragment = spatial_line_match_fragment(&line);
        assert_eq!(
            fragment.sql,
            r#"(spatialindex."Pk" MATCH LineThroughPoints2d(?,?,?,?))"#
        );
        assert_eq!(fragment.params.len(), 4);
    }
}
