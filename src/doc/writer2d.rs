use crate::blob::DataSource;
use crate::error::{Result, TileDocError};
use crate::query::BindValue;
use crate::schema::DatabaseConfiguration;
use crate::types::{DataType, LogicalPosition, StorageType, TileBaseInfo, TileCoordinate};
use rusqlite::params;
use rusqlite::params_from_iter;

use super::document::Document;
use super::support::{insert_payload, validate_coordinate, with_implicit_transaction};

type Config = DatabaseConfiguration;

/// The write capability of a 2D document.
///
/// Example:
/// ```no_run
/// use tiledoc::{
///     CreateOptions, DataType, Dimension, Document, DocumentType, LogicalPosition,
///     StorageType, TileBaseInfo, TileCoordinate,
/// };
///
/// let options = CreateOptions::new(DocumentType::Image2d)
///     .with_dimension(Dimension::new('C')?);
/// let document = Document::create_in_memory(&options)?;
/// let writer = document.writer2d()?;
///
/// let coordinate: TileCoordinate = [(Dimension::new('C')?, 0)].into_iter().collect();
/// let payload: Vec<u8> = vec![0u8; 16];
/// writer.add_tile(
///     &coordinate,
///     &LogicalPosition::new(0.0, 0.0, 4.0, 4.0, 0),
///     &TileBaseInfo { pixel_width: 4, pixel_height: 4, pixel_type: tiledoc::pixel_type::GRAY8 },
///     DataType::UncompressedBitmap,
///     StorageType::BlobInDatabase,
///     &payload,
/// )?;
/// # Ok::<(), tiledoc::TileDocError>(())
/// ```
pub struct Writer2d<'a> {
    document: &'a Document,
}

impl<'a> Writer2d<'a> {
    pub(super) fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Add a tile to the document and return its primary key.
    ///
    /// The coordinate must cover exactly the declared dimensions, and the
    /// position must be finite with non-negative extents. The blob,
    /// tile-data, tile-info and spatial-index rows are written atomically:
    /// inside the caller's transaction when one is open, otherwise inside
    /// an implicit per-call transaction.
    pub fn add_tile(
        &self,
        coordinate: &TileCoordinate,
        position: &LogicalPosition,
        tile_info: &TileBaseInfo,
        data_type: DataType,
        storage_type: StorageType,
        data: &dyn DataSource,
    ) -> Result<i64> {
        validate_coordinate(self.document.configuration(), coordinate)?;
        validate_position(position)?;

        with_implicit_transaction(self.document, || {
            self.insert_tile(coordinate, position, tile_info, data_type, storage_type, data)
        })
    }

    fn insert_tile(
        &self,
        coordinate: &TileCoordinate,
        position: &LogicalPosition,
        tile_info: &TileBaseInfo,
        data_type: DataType,
        storage_type: StorageType,
        data: &dyn DataSource,
    ) -> Result<i64> {
        let configuration = self.document.configuration();
        let connection = self.document.connection();

        let bin_data_id = insert_payload(self.document, data_type, storage_type, data)?;

        let data_sql = format!(
            r#"INSERT INTO "{table}" ("{width}", "{height}", "{pixel_type}", "{data_type}", "{storage}", "{bin_id}") VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            table = configuration.tiles_data_table(),
            width = Config::COL_DATA_PIXEL_WIDTH,
            height = Config::COL_DATA_PIXEL_HEIGHT,
            pixel_type = Config::COL_DATA_PIXEL_TYPE,
            data_type = Config::COL_DATA_TILE_DATA_TYPE,
            storage = Config::COL_DATA_STORAGE_TYPE,
            bin_id = Config::COL_DATA_BIN_DATA_ID
        );
        let mut statement = connection.prepare_cached(&data_sql)?;
        statement.execute(params![
            tile_info.pixel_width,
            tile_info.pixel_height,
            tile_info.pixel_type,
            crate::conversions::data_type_to_code(data_type),
            crate::conversions::storage_type_to_code(storage_type),
            bin_data_id,
        ])?;
        connection.log_statement(&statement);
        drop(statement);
        let tile_data_pk = connection.last_insert_rowid();

        let mut columns: Vec<String> = coordinate
            .dimensions()
            .map(|dimension| format!(r#""{}""#, configuration.dimension_column(dimension)))
            .collect();
        for column in [
            Config::COL_INFO_TILE_X,
            Config::COL_INFO_TILE_Y,
            Config::COL_INFO_TILE_W,
            Config::COL_INFO_TILE_H,
            Config::COL_INFO_PYRAMID_LEVEL,
            Config::COL_INFO_TILE_DATA_ID,
        ] {
            columns.push(format!(r#""{column}""#));
        }
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<String>>()
            .join(",");
        let info_sql = format!(
            r#"INSERT INTO "{}" ({}) VALUES ({})"#,
            configuration.tiles_info_table(),
            columns.join(","),
            placeholders
        );

        let mut info_params: Vec<BindValue> = coordinate
            .iter()
            .map(|(_, value)| BindValue::Int32(value))
            .collect();
        info_params.push(BindValue::Double(position.pos_x));
        info_params.push(BindValue::Double(position.pos_y));
        info_params.push(BindValue::Double(position.width));
        info_params.push(BindValue::Double(position.height));
        info_params.push(BindValue::Int32(position.pyramid_level));
        info_params.push(BindValue::Int64(tile_data_pk));

        let mut statement = connection.prepare_cached(&info_sql)?;
        statement.execute(params_from_iter(info_params))?;
        connection.log_statement(&statement);
        drop(statement);
        let tile_pk = connection.last_insert_rowid();

        if configuration.uses_spatial_index() {
            let spatial_sql = format!(
                r#"INSERT INTO "{}" VALUES (?1, ?2, ?3, ?4, ?5)"#,
                configuration.spatial_index_table()?
            );
            let mut statement = connection.prepare_cached(&spatial_sql)?;
            statement.execute(params![
                tile_pk,
                position.pos_x,
                position.pos_x + position.width,
                position.pos_y,
                position.pos_y + position.height,
            ])?;
            connection.log_statement(&statement);
        }

        Ok(tile_pk)
    }

    /// Begin a transaction bracketing a batch of inserts. Nested
    /// transactions are rejected.
    pub fn begin_transaction(&self) -> Result<()> {
        self.document.connection().begin_transaction()
    }

    pub fn commit_transaction(&self) -> Result<()> {
        self.document.connection().end_transaction(true)
    }

    pub fn rollback_transaction(&self) -> Result<()> {
        self.document.connection().end_transaction(false)
    }
}

fn validate_position(position: &LogicalPosition) -> Result<()> {
    for (name, value) in [
        ("posX", position.pos_x),
        ("posY", position.pos_y),
        ("width", position.width),
        ("height", position.height),
    ] {
        if !value.is_finite() {
            return Err(TileDocError::InvalidArgument(format!(
                "position field '{name}' is not finite"
            )));
        }
    }
    if position.width < 0.0 || position.height < 0.0 {
        return Err(TileDocError::InvalidArgument(
            "width and height must be non-negative".to_string(),
        ));
    }
    Ok(())
}
