use crate::blob::BlobSink;
use crate::conversions::data_type_from_code;
use crate::error::{Result, TileDocError};
use crate::geometry::{CuboidD, PlaneNormalAndDistanceD};
use crate::query::{CoordinateQueryClause, TileInfoQueryClause};
use crate::schema::DatabaseConfiguration;
use crate::schema_sql::{
    cuboid_overlap_fragment, plane_overlap_fragment, spatial_bbox_fragment_3d,
    spatial_plane_match_fragment,
};
use crate::types::{
    BrickBaseInfo, BrickBlobInfo, Dimension, DoubleInterval, Int32Interval, LogicalPosition3d,
    TileCoordinate,
};
use std::collections::BTreeMap;

use super::document::Document;
use super::support;

type Config = DatabaseConfiguration;

/// The pieces of information [`Reader3d::read_brick_info`] was asked for.
#[derive(Debug, Clone, Default)]
pub struct BrickInfo3d {
    pub coordinate: Option<TileCoordinate>,
    pub position: Option<LogicalPosition3d>,
    pub blob_info: Option<BrickBlobInfo>,
}

/// The read capability of a 3D document: brick info lookup, coordinate,
/// cuboid and plane queries, payload retrieval and aggregate information.
pub struct Reader3d<'a> {
    document: &'a Document,
}

impl<'a> Reader3d<'a> {
    pub(super) fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Read the requested groups of information for one brick. With all
    /// flags false only the existence of the brick is probed.
    pub fn read_brick_info(
        &self,
        pk: i64,
        with_coordinate: bool,
        with_position: bool,
        with_blob_info: bool,
    ) -> Result<BrickInfo3d> {
        let configuration = self.document.configuration();
        let connection = self.document.connection();
        let info_table = configuration.tiles_info_table();
        let data_table = configuration.tiles_data_table();

        let mut projections: Vec<String> = Vec::new();
        if with_coordinate {
            for dimension in configuration.dimensions() {
                projections.push(format!(
                    r#""{info_table}"."{}""#,
                    configuration.dimension_column(dimension)
                ));
            }
        }
        if with_position {
            for column in [
                Config::COL_INFO_TILE_X,
                Config::COL_INFO_TILE_Y,
                configuration.tile_z_column()?,
                Config::COL_INFO_TILE_W,
                Config::COL_INFO_TILE_H,
                configuration.tile_d_column()?,
                Config::COL_INFO_PYRAMID_LEVEL,
            ] {
                projections.push(format!(r#""{info_table}"."{column}""#));
            }
        }
        if with_blob_info {
            for column in [
                Config::COL_DATA_PIXEL_WIDTH,
                Config::COL_DATA_PIXEL_HEIGHT,
                configuration.pixel_depth_column()?,
                Config::COL_DATA_PIXEL_TYPE,
                Config::COL_DATA_TILE_DATA_TYPE,
            ] {
                projections.push(format!(r#""{data_table}"."{column}""#));
            }
        }

        let projection = if projections.is_empty() {
            "1".to_string()
        } else {
            projections.join(",")
        };

        let join = if with_blob_info {
            format!(
                r#" LEFT JOIN "{data_table}" ON "{info_table}"."{}" = "{data_table}"."{}""#,
                Config::COL_INFO_TILE_DATA_ID,
                Config::COL_DATA_PK
            )
        } else {
            String::new()
        };

        let sql = format!(
            r#"SELECT {projection} FROM "{info_table}"{join} WHERE "{info_table}"."{}" = ?1"#,
            Config::COL_INFO_PK
        );

        let mut statement = connection.prepare(&sql)?;
        statement.raw_bind_parameter(1, pk)?;
        connection.log_statement(&statement);

        let mut rows = statement.raw_query();
        let Some(row) = rows.next()? else {
            return Err(TileDocError::NonExistingTile { pk });
        };

        let mut result = BrickInfo3d::default();
        let mut index = 0;

        if with_coordinate {
            let mut coordinate = TileCoordinate::new();
            for dimension in configuration.dimensions() {
                coordinate.set(dimension, row.get(index)?);
                index += 1;
            }
            result.coordinate = Some(coordinate);
        }

        if with_position {
            result.position = Some(LogicalPosition3d {
                pos_x: row.get(index)?,
                pos_y: row.get(index + 1)?,
                pos_z: row.get(index + 2)?,
                width: row.get(index + 3)?,
                height: row.get(index + 4)?,
                depth: row.get(index + 5)?,
                pyramid_level: row.get(index + 6)?,
            });
            index += 7;
        }

        if with_blob_info {
            let base_info = BrickBaseInfo {
                pixel_width: row.get(index)?,
                pixel_height: row.get(index + 1)?,
                pixel_depth: row.get(index + 2)?,
                pixel_type: row.get(index + 3)?,
            };
            let data_type_code: i32 = row.get(index + 4)?;
            let data_type = data_type_from_code(data_type_code).ok_or_else(|| {
                TileDocError::InvariantViolation(format!(
                    "unknown data-type code {data_type_code} for pk {pk}"
                ))
            })?;
            result.blob_info = Some(BrickBlobInfo {
                base_info,
                data_type,
            });
        }

        Ok(result)
    }

    /// Enumerate the bricks matching the coordinate and tile-info clauses,
    /// in primary-key order.
    pub fn query(
        &self,
        coordinate_clause: Option<&CoordinateQueryClause>,
        info_clause: Option<&TileInfoQueryClause>,
        mut visit: impl FnMut(i64) -> bool,
    ) -> Result<()> {
        support::query_tiles(self.document, coordinate_clause, info_clause, &mut visit)
    }

    /// Enumerate the bricks whose logical position intersects the cuboid
    /// (closed intervals on every axis) and which satisfy the clauses.
    pub fn bricks_intersecting_cuboid(
        &self,
        cuboid: &CuboidD,
        coordinate_clause: Option<&CoordinateQueryClause>,
        info_clause: Option<&TileInfoQueryClause>,
        mut visit: impl FnMut(i64) -> bool,
    ) -> Result<()> {
        let configuration = self.document.configuration();
        let (sql, params) = if configuration.uses_spatial_index() {
            let spatial = spatial_bbox_fragment_3d(cuboid, configuration);
            support::spatial_query_sql(self.document, &spatial, coordinate_clause, info_clause)?
        } else {
            let geometry = cuboid_overlap_fragment(cuboid, configuration)?;
            support::fallback_query_sql(self.document, &geometry, coordinate_clause, info_clause)?
        };
        support::run_pk_visitor(self.document, &sql, &params, &mut visit)
    }

    /// Enumerate the bricks intersected by the plane. With a spatial index
    /// the R-tree plane query function drives the traversal; without one
    /// the closed-form inequality is evaluated on the logical-position
    /// columns. Both paths yield the same set.
    pub fn bricks_intersecting_plane(
        &self,
        plane: &PlaneNormalAndDistanceD,
        coordinate_clause: Option<&CoordinateQueryClause>,
        info_clause: Option<&TileInfoQueryClause>,
        mut visit: impl FnMut(i64) -> bool,
    ) -> Result<()> {
        let configuration = self.document.configuration();
        let (sql, params) = if configuration.uses_spatial_index() {
            let spatial = spatial_plane_match_fragment(plane);
            support::spatial_query_sql(self.document, &spatial, coordinate_clause, info_clause)?
        } else {
            let geometry = plane_overlap_fragment(plane, configuration)?;
            support::fallback_query_sql(self.document, &geometry, coordinate_clause, info_clause)?
        };
        support::run_pk_visitor(self.document, &sql, &params, &mut visit)
    }

    /// Deliver the payload of a brick to the sink.
    pub fn read_brick_data(&self, pk: i64, sink: &mut dyn BlobSink) -> Result<()> {
        support::read_blob(self.document, pk, sink)
    }

    /// The dimensions declared by the document.
    pub fn tile_dimensions(&self) -> Vec<Dimension> {
        self.document.configuration().dimensions().collect()
    }

    pub fn min_max_for_dimensions(
        &self,
        dimensions: &[Dimension],
    ) -> Result<BTreeMap<Dimension, Int32Interval>> {
        support::min_max_for_dimensions(self.document, dimensions)
    }

    pub fn total_tile_count(&self) -> Result<u64> {
        support::total_tile_count(self.document)
    }

    pub fn tile_count_per_layer(&self) -> Result<BTreeMap<i32, u64>> {
        support::tile_count_per_layer(self.document)
    }

    /// The axis-aligned bounding cuboid of all bricks as (x, y, z)
    /// intervals; all invalid when the document holds no bricks.
    pub fn bricks_bounding_box(
        &self,
    ) -> Result<(DoubleInterval, DoubleInterval, DoubleInterval)> {
        support::bounding_box_3d(self.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobBuffer;
    use crate::doc::document::CreateOptions;
    use crate::geometry::Vector3dD;
    use crate::query::RangeClause;
    use crate::types::{DataType, DocumentType, StorageType, pixel_type};

    fn dimension(identifier: char) -> Dimension {
        Dimension::new(identifier).unwrap()
    }

    fn brick_info() -> BrickBaseInfo {
        BrickBaseInfo {
            pixel_width: 16,
            pixel_height: 16,
            pixel_depth: 16,
            pixel_type: pixel_type::GRAY16,
        }
    }

    fn collect_pks(
        run: impl FnOnce(&mut dyn FnMut(i64) -> bool) -> Result<()>,
    ) -> Vec<i64> {
        let mut pks = Vec::new();
        run(&mut |pk| {
            pks.push(pk);
            true
        })
        .unwrap();
        pks
    }

    /// A 4x4x4 grid of 10x10x10 bricks, single dimension C; pk of the
    /// brick at indices (x, y, z) is z*16 + y*4 + x + 1.
    fn grid_document(use_spatial_index: bool) -> Document {
        let options = CreateOptions::new(DocumentType::Image3d)
            .with_dimension(dimension('C'))
            .with_spatial_index(use_spatial_index);
        let document = Document::create_in_memory(&options).unwrap();
        {
            let writer = document.writer3d().unwrap();
            writer.begin_transaction().unwrap();
            for z in 0..4 {
                for y in 0..4 {
                    for x in 0..4 {
                        let coordinate: TileCoordinate =
                            [(dimension('C'), z * 16 + y * 4 + x)].into_iter().collect();
                        writer
                            .add_brick(
                                &coordinate,
                                &LogicalPosition3d::new(
                                    f64::from(x) * 10.0,
                                    f64::from(y) * 10.0,
                                    f64::from(z) * 10.0,
                                    10.0,
                                    10.0,
                                    10.0,
                                    0,
                                ),
                                &brick_info(),
                                DataType::Zero,
                                StorageType::Invalid,
                                &[0u8; 0],
                            )
                            .unwrap();
                    }
                }
            }
            writer.commit_transaction().unwrap();
        }
        document
    }

    #[test]
    fn read_brick_info_roundtrips_inserted_values() {
        let options = CreateOptions::new(DocumentType::Image3d)
            .with_dimension(dimension('C'));
        let document = Document::create_in_memory(&options).unwrap();
        let writer = document.writer3d().unwrap();
        let coordinate: TileCoordinate = [(dimension('C'), 11)].into_iter().collect();
        let position = LogicalPosition3d::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 1);
        let pk = writer
            .add_brick(
                &coordinate,
                &position,
                &brick_info(),
                DataType::UncompressedBrick,
                StorageType::BlobInDatabase,
                &vec![3u8; 16],
            )
            .unwrap();

        let reader = document.reader3d().unwrap();
        let info = reader.read_brick_info(pk, true, true, true).unwrap();
        assert_eq!(info.coordinate.unwrap(), coordinate);
        assert!(info.position.unwrap().approx_eq(&position));
        let blob_info = info.blob_info.unwrap();
        assert_eq!(blob_info.base_info, brick_info());
        assert_eq!(blob_info.data_type, DataType::UncompressedBrick);

        let mut sink = BlobBuffer::new();
        reader.read_brick_data(pk, &mut sink).unwrap();
        assert_eq!(sink.data(), vec![3u8; 16].as_slice());
    }

    #[test]
    fn plane_cut_selects_the_slab() {
        for use_spatial_index in [true, false] {
            let document = grid_document(use_spatial_index);
            let reader = document.reader3d().unwrap();

            let plane =
                PlaneNormalAndDistanceD::new(Vector3dD::new(0.0, 0.0, 1.0), 25.0);
            let mut pks = collect_pks(|visit| {
                reader.bricks_intersecting_plane(&plane, None, None, visit)
            });
            pks.sort_unstable();

            // the 16 bricks of the z in [20, 30] slab (z index 2)
            let expected: Vec<i64> = (0..16).map(|i| 2 * 16 + i + 1).collect();
            assert_eq!(pks, expected, "spatial_index={use_spatial_index}");
        }
    }

    #[test]
    fn plane_query_agrees_with_brute_force() {
        let spatial = grid_document(true);
        let plain = grid_document(false);

        let normal = {
            let length = (1.0f64 + 1.0 + 1.0).sqrt();
            Vector3dD::new(1.0 / length, 1.0 / length, 1.0 / length)
        };
        let plane = PlaneNormalAndDistanceD::new(normal, 20.0);

        // brute force over all bricks
        let mut expected = Vec::new();
        for z in 0..4i64 {
            for y in 0..4i64 {
                for x in 0..4i64 {
                    let cuboid = CuboidD::new(
                        x as f64 * 10.0,
                        y as f64 * 10.0,
                        z as f64 * 10.0,
                        10.0,
                        10.0,
                        10.0,
                    );
                    if cuboid.intersects_plane(&plane) {
                        expected.push(z * 16 + y * 4 + x + 1);
                    }
                }
            }
        }
        assert!(!expected.is_empty());

        for document in [&spatial, &plain] {
            let mut pks = collect_pks(|visit| {
                document
                    .reader3d()
                    .unwrap()
                    .bricks_intersecting_plane(&plane, None, None, visit)
            });
            pks.sort_unstable();
            assert_eq!(pks, expected);
        }
    }

    #[test]
    fn cuboid_query_agrees_with_and_without_spatial_index() {
        let spatial = grid_document(true);
        let plain = grid_document(false);

        for cuboid in [
            CuboidD::new(0.0, 0.0, 0.0, 40.0, 40.0, 40.0),
            CuboidD::new(5.0, 5.0, 5.0, 10.0, 10.0, 10.0),
            CuboidD::new(30.0, 30.0, 30.0, 50.0, 50.0, 50.0),
            CuboidD::new(-10.0, -10.0, -10.0, 5.0, 5.0, 5.0),
            CuboidD::new(10.0, 10.0, 10.0, 0.0, 0.0, 0.0),
        ] {
            let mut from_spatial = collect_pks(|visit| {
                spatial
                    .reader3d()
                    .unwrap()
                    .bricks_intersecting_cuboid(&cuboid, None, None, visit)
            });
            from_spatial.sort_unstable();
            let from_plain = collect_pks(|visit| {
                plain
                    .reader3d()
                    .unwrap()
                    .bricks_intersecting_cuboid(&cuboid, None, None, visit)
            });
            assert_eq!(from_spatial, from_plain, "cuboid {cuboid:?}");
        }
    }

    #[test]
    fn plane_query_composes_with_coordinate_clause() {
        for use_spatial_index in [true, false] {
            let document = grid_document(use_spatial_index);
            let reader = document.reader3d().unwrap();

            let plane =
                PlaneNormalAndDistanceD::new(Vector3dD::new(0.0, 0.0, 1.0), 25.0);
            // restrict to the first half of the C range within the slab
            let mut clause = CoordinateQueryClause::new();
            clause.add_range(dimension('C'), RangeClause::new(32, 39));

            let mut pks = collect_pks(|visit| {
                reader.bricks_intersecting_plane(&plane, Some(&clause), None, visit)
            });
            pks.sort_unstable();
            let expected: Vec<i64> = (0..8).map(|i| 2 * 16 + i + 1).collect();
            assert_eq!(pks, expected, "spatial_index={use_spatial_index}");
        }
    }

    #[test]
    fn bricks_bounding_box_spans_the_grid() {
        let document = grid_document(false);
        let reader = document.reader3d().unwrap();
        let (x, y, z) = reader.bricks_bounding_box().unwrap();
        assert_eq!(x, DoubleInterval::new(0.0, 40.0));
        assert_eq!(y, DoubleInterval::new(0.0, 40.0));
        assert_eq!(z, DoubleInterval::new(0.0, 40.0));

        assert_eq!(reader.total_tile_count().unwrap(), 64);
        let min_max = reader
            .min_max_for_dimensions(&[dimension('C')])
            .unwrap();
        assert_eq!(min_max[&dimension('C')], Int32Interval::new(0, 63));
    }
}
