//! Tiled image document storage built on top of rusqlite.
//!
//! ## Overview
//!
//! A document is a single SQLite file holding a collection of 2D tiles or
//! 3D bricks: small bitmaps carrying a coordinate in an application-defined
//! dimension space (channel, time, scene, ...), a logical position in a
//! continuous pixel plane or volume, a pyramid level, and an opaque binary
//! payload. The crate persists and indexes all of this and exposes a small
//! typed surface:
//!
//! - [`Document`] represents the file and hands out capabilities.
//! - [`Writer2d`] / [`Writer3d`] insert tiles and bricks.
//! - [`Reader2d`] / [`Reader3d`] run coordinate, rectangle, line, cuboid
//!   and plane queries and retrieve payloads.
//! - [`Metadata`] is a hierarchical typed key/value store in the same file.
//!
//! ## Document
//!
//! Documents are created with a fixed dimension set and optional features
//! (per-dimension indexes, an R-tree spatial index, the blob table), or
//! opened from an existing file, read-only if desired.
//!
//! ```no_run
//! use tiledoc::{CreateOptions, Dimension, Document, DocumentType};
//!
//! let options = CreateOptions::new(DocumentType::Image2d)
//!     .with_indexed_dimension(Dimension::new('C')?)
//!     .with_dimension(Dimension::new('T')?)
//!     .with_spatial_index(true);
//! let document = Document::create_new("scan.tiledoc", &options)?;
//! # Ok::<(), tiledoc::TileDocError>(())
//! ```
//!
//! ## Writing
//!
//! [`Writer2d::add_tile`] validates the coordinate against the declared
//! dimensions and writes the blob, tile-data, tile-info and spatial-index
//! rows atomically. Batches can be bracketed with a single transaction:
//!
//! ```no_run
//! # use tiledoc::{CreateOptions, DataType, Dimension, Document, DocumentType,
//! #     LogicalPosition, StorageType, TileBaseInfo, TileCoordinate};
//! # let document = Document::create_in_memory(
//! #     &CreateOptions::new(DocumentType::Image2d).with_dimension(Dimension::new('C')?))?;
//! let writer = document.writer2d()?;
//! writer.begin_transaction()?;
//! for c in 0..4 {
//!     let coordinate: TileCoordinate = [(Dimension::new('C')?, c)].into_iter().collect();
//!     writer.add_tile(
//!         &coordinate,
//!         &LogicalPosition::new(0.0, 0.0, 512.0, 512.0, 0),
//!         &TileBaseInfo { pixel_width: 512, pixel_height: 512, pixel_type: tiledoc::pixel_type::GRAY8 },
//!         DataType::UncompressedBitmap,
//!         StorageType::BlobInDatabase,
//!         &vec![0u8; 512 * 512],
//!     )?;
//! }
//! writer.commit_transaction()?;
//! # Ok::<(), tiledoc::TileDocError>(())
//! ```
//!
//! ## Querying
//!
//! Queries combine a [`CoordinateQueryClause`] (per-dimension ranges, OR
//! within a dimension, AND across dimensions) with a
//! [`TileInfoQueryClause`] (pyramid-level conditions, combined strictly
//! left to right), and feed matching primary keys to a visitor that can
//! stop the enumeration at any time. The geometric queries use the R-tree
//! spatial index when the document has one and fall back to direct
//! inequalities on the position columns otherwise; both paths return the
//! same set.
//!
//! ```no_run
//! use tiledoc::{Document, RectangleD};
//!
//! let document = Document::open_read_only("scan.tiledoc")?;
//! let reader = document.reader2d()?;
//! let mut hits = Vec::new();
//! reader.tiles_intersecting_rect(
//!     &RectangleD::new(0.0, 0.0, 1024.0, 1024.0),
//!     None,
//!     None,
//!     |pk| {
//!         hits.push(pk);
//!         true
//!     },
//! )?;
//! # Ok::<(), tiledoc::TileDocError>(())
//! ```
//!
//! ## Payloads
//!
//! Payload bytes flow out through the two-phase [`BlobSink`] contract
//! (`reserve`, then in-range `write_chunk` calls); [`BlobBuffer`] is the
//! ready-made heap-backed sink. Payloads flow in through [`DataSource`],
//! implemented for byte slices and vectors.
//!
//! ## Logging
//!
//! With the `log` crate's trace level enabled for the `tiledoc::sql`
//! target, every statement is logged with its expanded parameters.

mod blob;
mod connection;
mod conversions;
mod doc;
mod error;
mod geometry;
mod query;
mod schema;
mod schema_sql;
mod sql_functions;
mod types;

pub use blob::{BlobBuffer, BlobSink, DataSource};
pub use doc::{
    BrickInfo3d, CreateOptions, Document, Metadata, MetadataItem, MetadataItemFlags,
    MetadataValue, Reader2d, Reader3d, TileInfo2d, Writer2d, Writer3d,
};
pub use error::{Result, TileDocError};
pub use geometry::{
    CuboidD, LineThroughTwoPointsD, PlaneNormalAndDistanceD, Point3dD, PointD, RectangleD,
    RegionOverlap, Vector3dD, approximately_equal, classify_segment_in_rect,
    definitely_greater_than, definitely_less_than, do_lines_intersect, essentially_equal,
    segment_intersects_rect,
};
pub use query::{
    ComparisonOperation, CoordinateQueryClause, LogicalOperator, PyramidLevelCondition,
    RangeClause, TileInfoQueryClause,
};
pub use sql_functions::{
    FN_RTREE_LINE_SEGMENT_2D, FN_RTREE_PLANE_AABB_3D, FN_SCALAR_INTERSECTS_WITH_LINE,
    register_geometry_functions,
};
pub use types::{
    BrickBaseInfo, BrickBlobInfo, DataType, Dimension, DocumentType, DoubleInterval,
    Int32Interval, LogicalPosition, LogicalPosition3d, StorageType, TileBaseInfo, TileBlobInfo,
    TileCoordinate, pixel_type,
};
