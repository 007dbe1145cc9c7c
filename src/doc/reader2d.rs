use crate::blob::BlobSink;
use crate::conversions::data_type_from_code;
use crate::error::{Result, TileDocError};
use crate::geometry::{LineThroughTwoPointsD, RectangleD};
use crate::query::{CoordinateQueryClause, TileInfoQueryClause};
use crate::schema::DatabaseConfiguration;
use crate::schema_sql::{
    line_scalar_fragment, rect_overlap_fragment, spatial_bbox_fragment_2d,
    spatial_line_match_fragment,
};
use crate::types::{
    Dimension, DoubleInterval, Int32Interval, LogicalPosition, TileBaseInfo, TileBlobInfo,
    TileCoordinate,
};
use std::collections::BTreeMap;

use super::document::Document;
use super::support;

type Config = DatabaseConfiguration;

/// The pieces of information [`Reader2d::read_tile_info`] was asked for.
#[derive(Debug, Clone, Default)]
pub struct TileInfo2d {
    pub coordinate: Option<TileCoordinate>,
    pub position: Option<LogicalPosition>,
    pub blob_info: Option<TileBlobInfo>,
}

/// The read capability of a 2D document: info lookup, coordinate and
/// spatial queries, payload retrieval and aggregate information.
///
/// Example:
/// ```no_run
/// use tiledoc::{CoordinateQueryClause, Dimension, Document, RangeClause};
///
/// let document = Document::open_read_only("scan.tiledoc")?;
/// let reader = document.reader2d()?;
///
/// let mut clause = CoordinateQueryClause::new();
/// clause.add_range(Dimension::new('C')?, RangeClause::new(0, 2));
/// reader.query(Some(&clause), None, |pk| {
///     println!("matching tile: {pk}");
///     true
/// })?;
/// # Ok::<(), tiledoc::TileDocError>(())
/// ```
pub struct Reader2d<'a> {
    document: &'a Document,
}

impl<'a> Reader2d<'a> {
    pub(super) fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Read the requested groups of information for one tile. With all
    /// flags false only the existence of the tile is probed. A missing pk
    /// fails with [`TileDocError::NonExistingTile`].
    pub fn read_tile_info(
        &self,
        pk: i64,
        with_coordinate: bool,
        with_position: bool,
        with_blob_info: bool,
    ) -> Result<TileInfo2d> {
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
                Config::COL_INFO_TILE_W,
                Config::COL_INFO_TILE_H,
                Config::COL_INFO_PYRAMID_LEVEL,
            ] {
                projections.push(format!(r#""{info_table}"."{column}""#));
            }
        }
        if with_blob_info {
            for column in [
                Config::COL_DATA_PIXEL_WIDTH,
                Config::COL_DATA_PIXEL_HEIGHT,
                Config::COL_DATA_PIXEL_TYPE,
                Config::COL_DATA_TILE_DATA_TYPE,
            ] {
                projections.push(format!(r#""{data_table}"."{column}""#));
            }
        }

        // with nothing requested, probe for existence only
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

        let mut result = TileInfo2d::default();
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
            result.position = Some(LogicalPosition {
                pos_x: row.get(index)?,
                pos_y: row.get(index + 1)?,
                width: row.get(index + 2)?,
                height: row.get(index + 3)?,
                pyramid_level: row.get(index + 4)?,
            });
            index += 5;
        }

        if with_blob_info {
            let base_info = TileBaseInfo {
                pixel_width: row.get(index)?,
                pixel_height: row.get(index + 1)?,
                pixel_type: row.get(index + 2)?,
            };
            let data_type_code: i32 = row.get(index + 3)?;
            let data_type = data_type_from_code(data_type_code).ok_or_else(|| {
                TileDocError::InvariantViolation(format!(
                    "unknown data-type code {data_type_code} for pk {pk}"
                ))
            })?;
            result.blob_info = Some(TileBlobInfo {
                base_info,
                data_type,
            });
        }

        Ok(result)
    }

    /// Enumerate the tiles matching the coordinate and tile-info clauses,
    /// in primary-key order. Returning `false` from the visitor ends the
    /// enumeration.
    pub fn query(
        &self,
        coordinate_clause: Option<&CoordinateQueryClause>,
        info_clause: Option<&TileInfoQueryClause>,
        mut visit: impl FnMut(i64) -> bool,
    ) -> Result<()> {
        support::query_tiles(self.document, coordinate_clause, info_clause, &mut visit)
    }

    /// Enumerate the tiles whose logical position intersects the rectangle
    /// (closed intervals on both axes) and which satisfy the clauses. Uses
    /// the spatial index when present, a direct inequality scan otherwise;
    /// both paths yield the same set.
    pub fn tiles_intersecting_rect(
        &self,
        rect: &RectangleD,
        coordinate_clause: Option<&CoordinateQueryClause>,
        info_clause: Option<&TileInfoQueryClause>,
        mut visit: impl FnMut(i64) -> bool,
    ) -> Result<()> {
        let configuration = self.document.configuration();
        let (sql, params) = if configuration.uses_spatial_index() {
            let spatial = spatial_bbox_fragment_2d(rect, configuration);
            support::spatial_query_sql(self.document, &spatial, coordinate_clause, info_clause)?
        } else {
            let geometry = rect_overlap_fragment(rect, configuration);
            support::fallback_query_sql(self.document, &geometry, coordinate_clause, info_clause)?
        };
        support::run_pk_visitor(self.document, &sql, &params, &mut visit)
    }

    /// Enumerate the tiles intersected by the line segment. With a spatial
    /// index the R-tree line-segment query function drives the traversal;
    /// without one the scalar predicate is evaluated per row.
    pub fn tiles_intersecting_line(
        &self,
        line: &LineThroughTwoPointsD,
        coordinate_clause: Option<&CoordinateQueryClause>,
        info_clause: Option<&TileInfoQueryClause>,
        mut visit: impl FnMut(i64) -> bool,
    ) -> Result<()> {
        let configuration = self.document.configuration();
        let (sql, params) = if configuration.uses_spatial_index() {
            let spatial = spatial_line_match_fragment(line);
            support::spatial_query_sql(self.document, &spatial, coordinate_clause, info_clause)?
        } else {
            let geometry = line_scalar_fragment(line);
            support::fallback_query_sql(self.document, &geometry, coordinate_clause, info_clause)?
        };
        support::run_pk_visitor(self.document, &sql, &params, &mut visit)
    }

    /// Deliver the payload of a tile to the sink. A tile without payload
    /// (data type Zero) reserves zero bytes.
    pub fn read_tile_data(&self, pk: i64, sink: &mut dyn BlobSink) -> Result<()> {
        support::read_blob(self.document, pk, sink)
    }

    /// The dimensions declared by the document.
    pub fn tile_dimensions(&self) -> Vec<Dimension> {
        self.document.configuration().dimensions().collect()
    }

    /// Minimum and maximum coordinate value per requested dimension; the
    /// interval is invalid when the document holds no tiles.
    pub fn min_max_for_dimensions(
        &self,
        dimensions: &[Dimension],
    ) -> Result<BTreeMap<Dimension, Int32Interval>> {
        support::min_max_for_dimensions(self.document, dimensions)
    }

    pub fn total_tile_count(&self) -> Result<u64> {
        support::total_tile_count(self.document)
    }

    /// Tile count per pyramid layer.
    pub fn tile_count_per_layer(&self) -> Result<BTreeMap<i32, u64>> {
        support::tile_count_per_layer(self.document)
    }

    /// The axis-aligned bounding box of all tiles as (x, y) intervals;
    /// both are invalid when the document holds no tiles.
    pub fn tiles_bounding_box(&self) -> Result<(DoubleInterval, DoubleInterval)> {
        support::bounding_box_2d(self.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobBuffer;
    use crate::doc::document::CreateOptions;
    use crate::geometry::PointD;
    use crate::query::{ComparisonOperation, LogicalOperator, RangeClause};
    use crate::types::{DataType, DocumentType, StorageType, pixel_type};

    fn dimension(identifier: char) -> Dimension {
        Dimension::new(identifier).unwrap()
    }

    fn document_cz() -> Document {
        let options = CreateOptions::new(DocumentType::Image2d)
            .with_indexed_dimension(dimension('C'))
            .with_dimension(dimension('Z'));
        Document::create_in_memory(&options).unwrap()
    }

    fn coordinate_cz(c: i32, z: i32) -> TileCoordinate {
        [(dimension('C'), c), (dimension('Z'), z)]
            .into_iter()
            .collect()
    }

    fn base_info() -> TileBaseInfo {
        TileBaseInfo {
            pixel_width: 32,
            pixel_height: 24,
            pixel_type: pixel_type::GRAY8,
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

    /// A 10x10 grid of 10x10 tiles at (col*10, row*10), single dimension M.
    fn grid_document(use_spatial_index: bool) -> Document {
        let options = CreateOptions::new(DocumentType::Image2d)
            .with_dimension(dimension('M'))
            .with_spatial_index(use_spatial_index);
        let document = Document::create_in_memory(&options).unwrap();
        {
            let writer = document.writer2d().unwrap();
            writer.begin_transaction().unwrap();
            for row in 0..10 {
                for col in 0..10 {
                    let coordinate: TileCoordinate =
                        [(dimension('M'), row * 10 + col)].into_iter().collect();
                    writer
                        .add_tile(
                            &coordinate,
                            &LogicalPosition::new(
                                f64::from(col) * 10.0,
                                f64::from(row) * 10.0,
                                10.0,
                                10.0,
                                0,
                            ),
                            &base_info(),
                            DataType::Zero,
                            StorageType::Invalid,
                            &[0u8; 0],
                        )
                        .unwrap();
                }
            }
            writer.commit_transaction().unwrap();
        }
        document
    }

    #[test]
    fn query_by_dimension_range_yields_insertion_order() {
        let document = document_cz();
        let writer = document.writer2d().unwrap();
        let mut inserted = Vec::new();
        for c in [1234, 1235, 1236] {
            inserted.push(
                writer
                    .add_tile(
                        &coordinate_cz(c, 4321),
                        &LogicalPosition::new(1.0, 2.0, 3.0, 4.0, 0),
                        &base_info(),
                        DataType::UncompressedBitmap,
                        StorageType::BlobInDatabase,
                        &vec![1u8; 8],
                    )
                    .unwrap(),
            );
        }

        let reader = document.reader2d().unwrap();
        let mut clause = CoordinateQueryClause::new();
        clause.add_range(dimension('C'), RangeClause::new(1233, 1238));

        let pks = collect_pks(|visit| reader.query(Some(&clause), None, visit));
        assert_eq!(pks, inserted);

        // repeated enumeration is stable
        let again = collect_pks(|visit| reader.query(Some(&clause), None, visit));
        assert_eq!(again, inserted);

        // a narrower range excludes accordingly
        let mut narrow = CoordinateQueryClause::new();
        narrow.add_range(dimension('C'), RangeClause::new(1235, 1235));
        let pks = collect_pks(|visit| reader.query(Some(&narrow), None, visit));
        assert_eq!(pks, vec![inserted[1]]);
    }

    #[test]
    fn read_tile_info_roundtrips_inserted_values() {
        let document = document_cz();
        let writer = document.writer2d().unwrap();
        let position = LogicalPosition::new(10.5, -3.25, 640.0, 480.0, 2);
        let pk = writer
            .add_tile(
                &coordinate_cz(7, -9),
                &position,
                &base_info(),
                DataType::JpgXrCompressed,
                StorageType::BlobInDatabase,
                &vec![2u8; 32],
            )
            .unwrap();

        let reader = document.reader2d().unwrap();
        let info = reader.read_tile_info(pk, true, true, true).unwrap();

        assert_eq!(info.coordinate.unwrap(), coordinate_cz(7, -9));
        assert!(info.position.unwrap().approx_eq(&position));
        let blob_info = info.blob_info.unwrap();
        assert_eq!(blob_info.base_info, base_info());
        assert_eq!(blob_info.data_type, DataType::JpgXrCompressed);

        // partial projections only fill what was asked for
        let partial = reader.read_tile_info(pk, false, true, false).unwrap();
        assert!(partial.coordinate.is_none());
        assert!(partial.position.is_some());
        assert!(partial.blob_info.is_none());
    }

    #[test]
    fn read_tile_info_probes_existence_with_no_flags() {
        let document = document_cz();
        let writer = document.writer2d().unwrap();
        let pk = writer
            .add_tile(
                &coordinate_cz(0, 0),
                &LogicalPosition::new(0.0, 0.0, 1.0, 1.0, 0),
                &base_info(),
                DataType::Zero,
                StorageType::Invalid,
                &[0u8; 0],
            )
            .unwrap();

        let reader = document.reader2d().unwrap();
        assert!(reader.read_tile_info(pk, false, false, false).is_ok());

        let missing = reader.read_tile_info(1_000_000_000_000, false, false, false);
        match missing {
            Err(TileDocError::NonExistingTile { pk }) => assert_eq!(pk, 1_000_000_000_000),
            other => panic!("expected NonExistingTile, got {other:?}"),
        }
    }

    #[test]
    fn pyramid_level_clause_filters_layers() {
        let document = document_cz();
        let writer = document.writer2d().unwrap();
        let mut by_level = Vec::new();
        for level in 0..3 {
            by_level.push(
                writer
                    .add_tile(
                        &coordinate_cz(level, 0),
                        &LogicalPosition::new(0.0, 0.0, 10.0, 10.0, level),
                        &base_info(),
                        DataType::Zero,
                        StorageType::Invalid,
                        &[0u8; 0],
                    )
                    .unwrap(),
            );
        }

        let reader = document.reader2d().unwrap();
        let mut clause = TileInfoQueryClause::new();
        clause
            .add_pyramid_level_condition(
                LogicalOperator::Invalid,
                ComparisonOperation::Equal,
                0,
            )
            .add_pyramid_level_condition(LogicalOperator::Or, ComparisonOperation::Equal, 2);

        let pks = collect_pks(|visit| reader.query(None, Some(&clause), visit));
        assert_eq!(pks, vec![by_level[0], by_level[2]]);
    }

    #[test]
    fn visitor_returning_false_stops_the_enumeration() {
        let document = grid_document(false);
        let reader = document.reader2d().unwrap();

        let mut seen = 0;
        reader
            .query(None, None, |_| {
                seen += 1;
                false
            })
            .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn rect_query_on_grid_returns_touched_cells() {
        for use_spatial_index in [true, false] {
            let document = grid_document(use_spatial_index);
            let reader = document.reader2d().unwrap();

            let mut pks = collect_pks(|visit| {
                reader.tiles_intersecting_rect(
                    &RectangleD::new(5.0, 5.0, 30.0, 30.0),
                    None,
                    None,
                    visit,
                )
            });
            pks.sort_unstable();

            // the 16 cells with col and row in 0..=3 (closed intervals, the
            // rect's far edge at 35 still touches column 3)
            assert_eq!(pks.len(), 16, "spatial_index={use_spatial_index}");

            let mut expected = Vec::new();
            for row in 0..4 {
                for col in 0..4 {
                    expected.push(i64::from(row) * 10 + i64::from(col) + 1);
                }
            }
            assert_eq!(pks, expected);
        }
    }

    #[test]
    fn rect_query_agrees_with_and_without_spatial_index() {
        let spatial = grid_document(true);
        let plain = grid_document(false);

        for rect in [
            RectangleD::new(0.0, 0.0, 100.0, 100.0),
            RectangleD::new(10.0, 10.0, 0.0, 0.0),
            RectangleD::new(-20.0, -20.0, 10.0, 10.0),
            RectangleD::new(33.0, 47.0, 12.0, 3.0),
            RectangleD::new(99.9, 0.0, 50.0, 100.0),
        ] {
            let mut from_spatial = collect_pks(|visit| {
                spatial
                    .reader2d()
                    .unwrap()
                    .tiles_intersecting_rect(&rect, None, None, visit)
            });
            from_spatial.sort_unstable();
            let from_plain = collect_pks(|visit| {
                plain
                    .reader2d()
                    .unwrap()
                    .tiles_intersecting_rect(&rect, None, None, visit)
            });
            assert_eq!(from_spatial, from_plain, "rect {rect:?}");
        }
    }

    #[test]
    fn rect_query_composes_with_coordinate_clause() {
        for use_spatial_index in [true, false] {
            let document = grid_document(use_spatial_index);
            let reader = document.reader2d().unwrap();

            // restrict to the first grid row via the M dimension
            let mut clause = CoordinateQueryClause::new();
            clause.add_range(dimension('M'), RangeClause::new(0, 9));

            let mut pks = collect_pks(|visit| {
                reader.tiles_intersecting_rect(
                    &RectangleD::new(5.0, 5.0, 30.0, 30.0),
                    Some(&clause),
                    None,
                    visit,
                )
            });
            pks.sort_unstable();
            assert_eq!(pks, vec![1, 2, 3, 4], "spatial_index={use_spatial_index}");
        }
    }

    #[test]
    fn zero_area_tile_is_found_by_touching_rect() {
        let options = CreateOptions::new(DocumentType::Image2d).with_dimension(dimension('M'));
        let document = Document::create_in_memory(&options).unwrap();
        let writer = document.writer2d().unwrap();
        let coordinate: TileCoordinate = [(dimension('M'), 0)].into_iter().collect();
        let pk = writer
            .add_tile(
                &coordinate,
                &LogicalPosition::new(10.0, 10.0, 0.0, 5.0, 0),
                &base_info(),
                DataType::Zero,
                StorageType::Invalid,
                &[0u8; 0],
            )
            .unwrap();

        let reader = document.reader2d().unwrap();
        // touching at the rect's right edge
        let touching = collect_pks(|visit| {
            reader.tiles_intersecting_rect(
                &RectangleD::new(0.0, 0.0, 10.0, 10.0),
                None,
                None,
                visit,
            )
        });
        assert_eq!(touching, vec![pk]);

        // strictly beyond the tile
        let apart = collect_pks(|visit| {
            reader.tiles_intersecting_rect(
                &RectangleD::new(20.0, 20.0, 5.0, 5.0),
                None,
                None,
                visit,
            )
        });
        assert!(apart.is_empty());
    }

    #[test]
    fn line_query_agrees_with_and_without_spatial_index() {
        let spatial = grid_document(true);
        let plain = grid_document(false);

        // a diagonal cutting across the grid, endpoints outside
        let line = LineThroughTwoPointsD::new(
            PointD::new(-5.0, -5.0),
            PointD::new(105.0, 105.0),
        );

        let mut from_spatial = collect_pks(|visit| {
            spatial
                .reader2d()
                .unwrap()
                .tiles_intersecting_line(&line, None, None, visit)
        });
        from_spatial.sort_unstable();
        let from_plain = collect_pks(|visit| {
            plain
                .reader2d()
                .unwrap()
                .tiles_intersecting_line(&line, None, None, visit)
        });

        assert_eq!(from_spatial, from_plain);
        // the main diagonal touches every diagonal cell
        for cell in 0..10 {
            assert!(from_plain.contains(&(cell * 10 + cell + 1)));
        }
    }

    #[test]
    fn read_tile_data_roundtrips_payload() {
        let document = document_cz();
        let writer = document.writer2d().unwrap();
        let payload: Vec<u8> = (0..=255).collect();
        let pk = writer
            .add_tile(
                &coordinate_cz(0, 0),
                &LogicalPosition::new(0.0, 0.0, 1.0, 1.0, 0),
                &base_info(),
                DataType::UncompressedBitmap,
                StorageType::BlobInDatabase,
                &payload,
            )
            .unwrap();

        let reader = document.reader2d().unwrap();
        let mut sink = BlobBuffer::new();
        reader.read_tile_data(pk, &mut sink).unwrap();
        assert_eq!(sink.data(), payload.as_slice());
    }

    #[test]
    fn read_tile_data_for_zero_tile_reserves_nothing() {
        let document = document_cz();
        let writer = document.writer2d().unwrap();
        let pk = writer
            .add_tile(
                &coordinate_cz(0, 0),
                &LogicalPosition::new(0.0, 0.0, 1.0, 1.0, 0),
                &base_info(),
                DataType::Zero,
                StorageType::Invalid,
                &[0u8; 0],
            )
            .unwrap();

        let reader = document.reader2d().unwrap();
        let mut sink = BlobBuffer::new();
        reader.read_tile_data(pk, &mut sink).unwrap();
        assert!(sink.has_data());
        assert!(sink.data().is_empty());
    }

    #[test]
    fn read_tile_data_for_missing_tile_fails() {
        let document = document_cz();
        let reader = document.reader2d().unwrap();
        let mut sink = BlobBuffer::new();
        assert!(matches!(
            reader.read_tile_data(42, &mut sink),
            Err(TileDocError::NonExistingTile { pk: 42 })
        ));
    }

    #[test]
    fn aggregates_on_empty_document_signal_no_data() {
        let document = document_cz();
        let reader = document.reader2d().unwrap();

        assert_eq!(reader.total_tile_count().unwrap(), 0);
        assert!(reader.tile_count_per_layer().unwrap().is_empty());

        let min_max = reader
            .min_max_for_dimensions(&[dimension('C')])
            .unwrap();
        assert!(!min_max[&dimension('C')].is_valid());

        let (x, y) = reader.tiles_bounding_box().unwrap();
        assert!(!x.is_valid());
        assert!(!y.is_valid());
    }

    #[test]
    fn aggregates_summarize_the_grid() {
        let document = grid_document(false);
        let reader = document.reader2d().unwrap();

        assert_eq!(reader.tile_dimensions(), vec![dimension('M')]);
        assert_eq!(reader.total_tile_count().unwrap(), 100);

        let per_layer = reader.tile_count_per_layer().unwrap();
        assert_eq!(per_layer.len(), 1);
        assert_eq!(per_layer[&0], 100);

        let min_max = reader
            .min_max_for_dimensions(&[dimension('M')])
            .unwrap();
        assert_eq!(min_max[&dimension('M')], Int32Interval::new(0, 99));

        let (x, y) = reader.tiles_bounding_box().unwrap();
        assert_eq!(x, DoubleInterval::new(0.0, 100.0));
        assert_eq!(y, DoubleInterval::new(0.0, 100.0));

        // querying an undeclared dimension is an error
        assert!(matches!(
            reader.min_max_for_dimensions(&[dimension('Q')]),
            Err(TileDocError::InvalidArgument(_))
        ));
    }
}
