use crate::connection::DbConnection;
use crate::conversions::{document_type_from_str, document_type_to_str};
use crate::error::{Result, TileDocError};
use crate::schema::DatabaseConfiguration;
use crate::schema_sql::{
    sql_create_blobs, sql_create_dimension_index, sql_create_dimensions_table,
    sql_create_docinfo, sql_create_metadata, sql_create_spatial_index, sql_create_tiles_data,
    sql_create_tiles_info,
};
use crate::types::{Dimension, DocumentType};
use std::collections::BTreeSet;
use std::path::Path;

use super::metadata::Metadata;
use super::reader2d::Reader2d;
use super::reader3d::Reader3d;
use super::writer2d::Writer2d;
use super::writer3d::Writer3d;

const DOCINFO_KEY_DOC_TYPE: &str = "DocType";

/// Options describing the document to be created: its dimensionality, the
/// declared dimension set, which dimensions get a plain index, and whether
/// the spatial index and the blob table are present.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    document_type: DocumentType,
    dimensions: BTreeSet<Dimension>,
    indexed_dimensions: BTreeSet<Dimension>,
    use_spatial_index: bool,
    use_blob_table: bool,
}

impl CreateOptions {
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            document_type,
            dimensions: BTreeSet::new(),
            indexed_dimensions: BTreeSet::new(),
            use_spatial_index: false,
            use_blob_table: true,
        }
    }

    /// Declare a dimension for the document.
    pub fn with_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.insert(dimension);
        self
    }

    /// Declare a dimension and request a plain index on its column.
    pub fn with_indexed_dimension(mut self, dimension: Dimension) -> Self {
        self.dimensions.insert(dimension);
        self.indexed_dimensions.insert(dimension);
        self
    }

    pub fn with_spatial_index(mut self, use_spatial_index: bool) -> Self {
        self.use_spatial_index = use_spatial_index;
        self
    }

    pub fn with_blob_table(mut self, use_blob_table: bool) -> Self {
        self.use_blob_table = use_blob_table;
        self
    }
}

/// A tiled-image document: one SQLite file holding tiles (or bricks), their
/// payloads, the optional spatial index and the metadata tree.
///
/// The document hands out borrowed capability values for reading and
/// writing; which of them are available depends on the document type and on
/// whether the file was opened read-only.
pub struct Document {
    connection: DbConnection,
    configuration: DatabaseConfiguration,
}

impl Document {
    /// Create a new document file. Fails if the file already exists.
    pub fn create_new<P: AsRef<Path>>(path: P, options: &CreateOptions) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(TileDocError::InvalidArgument(format!(
                "document file already exists: {}",
                path.display()
            )));
        }

        Self::initialize(DbConnection::create_new(path)?, options)
    }

    /// Create a new document in memory; mainly useful for tests and
    /// scratch work.
    pub fn create_in_memory(options: &CreateOptions) -> Result<Self> {
        Self::initialize(DbConnection::open_in_memory()?, options)
    }

    /// Open an existing document file for read-write access.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Open an existing document file for read-only access.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, true)
    }

    fn open_with<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TileDocError::InvalidArgument(format!(
                "document file does not exist: {}",
                path.display()
            )));
        }

        let connection = DbConnection::open_existing(path, read_only)?;
        let configuration = Self::introspect(&connection)?;
        Ok(Self {
            connection,
            configuration,
        })
    }

    fn initialize(connection: DbConnection, options: &CreateOptions) -> Result<Self> {
        for dimension in &options.indexed_dimensions {
            if !options.dimensions.contains(dimension) {
                return Err(TileDocError::InvalidArgument(format!(
                    "indexed dimension '{dimension}' is not among the declared dimensions"
                )));
            }
        }

        let configuration = DatabaseConfiguration::new(
            options.document_type,
            options.dimensions.iter().copied(),
            options.indexed_dimensions.iter().copied(),
            options.use_spatial_index,
            options.use_blob_table,
        );

        connection.execute(&sql_create_tiles_info(&configuration))?;
        for dimension in configuration.indexed_dimensions() {
            connection.execute(&sql_create_dimension_index(&configuration, dimension))?;
        }
        connection.execute(&sql_create_tiles_data(&configuration))?;
        if configuration.uses_blob_table() {
            connection.execute(&sql_create_blobs(&configuration)?)?;
        }
        if configuration.uses_spatial_index() {
            connection.execute(&sql_create_spatial_index(&configuration)?)?;
        }
        connection.execute(&sql_create_metadata(&configuration))?;
        connection.execute(&sql_create_docinfo())?;
        connection.execute(&sql_create_dimensions_table())?;

        let insert_docinfo = format!(
            r#"INSERT INTO "{}" ("{}", "{}") VALUES (?1, ?2)"#,
            DatabaseConfiguration::TABLE_DOCINFO,
            DatabaseConfiguration::COL_DOCINFO_KEY,
            DatabaseConfiguration::COL_DOCINFO_VALUE
        );
        connection.connection().execute(
            &insert_docinfo,
            rusqlite::params![
                DOCINFO_KEY_DOC_TYPE,
                document_type_to_str(configuration.document_type())
            ],
        )?;

        let insert_dimension = format!(
            r#"INSERT INTO "{}" ("{}") VALUES (?1)"#,
            DatabaseConfiguration::TABLE_DIMENSIONS,
            DatabaseConfiguration::COL_DIMENSIONS_DIMENSION
        );
        for dimension in configuration.dimensions() {
            connection
                .connection()
                .execute(&insert_dimension, [dimension.to_string()])?;
        }

        Ok(Self {
            connection,
            configuration,
        })
    }

    /// Reconstruct the schema configuration of an existing file, rejecting
    /// layouts this crate does not understand.
    fn introspect(connection: &DbConnection) -> Result<DatabaseConfiguration> {
        let document_type_str: String = connection
            .connection()
            .query_row(
                &format!(
                    r#"SELECT "{}" FROM "{}" WHERE "{}" = ?1"#,
                    DatabaseConfiguration::COL_DOCINFO_VALUE,
                    DatabaseConfiguration::TABLE_DOCINFO,
                    DatabaseConfiguration::COL_DOCINFO_KEY
                ),
                [DOCINFO_KEY_DOC_TYPE],
                |row| row.get(0),
            )
            .map_err(|_| {
                TileDocError::InvariantViolation(
                    "the file carries no document-type descriptor".to_string(),
                )
            })?;
        let document_type = document_type_from_str(&document_type_str).ok_or_else(|| {
            TileDocError::InvariantViolation(format!(
                "unknown document type '{document_type_str}'"
            ))
        })?;

        let mut statement = connection.prepare(&format!(
            r#"SELECT "{}" FROM "{}""#,
            DatabaseConfiguration::COL_DIMENSIONS_DIMENSION,
            DatabaseConfiguration::TABLE_DIMENSIONS
        ))?;
        let declared = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        drop(statement);

        let mut dimensions = BTreeSet::new();
        for text in declared {
            let mut chars = text.chars();
            let dimension = match (chars.next(), chars.next()) {
                (Some(identifier), None) => Dimension::new(identifier).map_err(|_| {
                    TileDocError::InvariantViolation(format!(
                        "invalid dimension descriptor '{text}'"
                    ))
                })?,
                _ => {
                    return Err(TileDocError::InvariantViolation(format!(
                        "invalid dimension descriptor '{text}'"
                    )));
                }
            };
            dimensions.insert(dimension);
        }

        // the declared set must coincide with the dimension columns
        let columns = connection.table_columns(DatabaseConfiguration::TABLE_TILES_INFO)?;
        if columns.is_empty() {
            return Err(TileDocError::InvariantViolation(
                "the tiles-info table is missing".to_string(),
            ));
        }
        let prefix = DatabaseConfiguration::DIMENSION_COLUMN_PREFIX;
        let mut column_dimensions = BTreeSet::new();
        let mut has_tile_z = false;
        for (name, _) in &columns {
            if let Some(rest) = name.strip_prefix(prefix) {
                let mut chars = rest.chars();
                if let (Some(identifier), None) = (chars.next(), chars.next())
                    && let Ok(dimension) = Dimension::new(identifier)
                {
                    column_dimensions.insert(dimension);
                    continue;
                }
                return Err(TileDocError::InvariantViolation(format!(
                    "unexpected dimension column '{name}'"
                )));
            }
            if name == DatabaseConfiguration::COL_INFO_TILE_Z {
                has_tile_z = true;
            }
        }
        if column_dimensions != dimensions {
            return Err(TileDocError::InvariantViolation(
                "declared dimensions do not match the tiles-info columns".to_string(),
            ));
        }
        if has_tile_z != (document_type == DocumentType::Image3d) {
            return Err(TileDocError::InvariantViolation(
                "document type contradicts the tiles-info columns".to_string(),
            ));
        }

        if !connection.table_exists(DatabaseConfiguration::TABLE_TILES_DATA)? {
            return Err(TileDocError::InvariantViolation(
                "the tiles-data table is missing".to_string(),
            ));
        }

        let use_blob_table = connection.table_exists(DatabaseConfiguration::TABLE_BLOBS)?;
        let use_spatial_index =
            connection.table_exists(DatabaseConfiguration::TABLE_SPATIAL_INDEX)?;

        // recover which dimension columns carry an index
        let index_names = connection.index_names(DatabaseConfiguration::TABLE_TILES_INFO)?;
        let probe = DatabaseConfiguration::new(
            document_type,
            dimensions.iter().copied(),
            [],
            use_spatial_index,
            use_blob_table,
        );
        let indexed_dimensions: BTreeSet<Dimension> = dimensions
            .iter()
            .copied()
            .filter(|dimension| index_names.contains(&probe.dimension_index_name(*dimension)))
            .collect();

        Ok(DatabaseConfiguration::new(
            document_type,
            dimensions,
            indexed_dimensions,
            use_spatial_index,
            use_blob_table,
        ))
    }

    pub fn document_type(&self) -> DocumentType {
        self.configuration.document_type()
    }

    pub fn is_read_only(&self) -> bool {
        self.connection.is_read_only()
    }

    /// The read capability of a 2D document.
    pub fn reader2d(&self) -> Result<Reader2d<'_>> {
        self.require_type(DocumentType::Image2d)?;
        Ok(Reader2d::new(self))
    }

    /// The write capability of a 2D document.
    pub fn writer2d(&self) -> Result<Writer2d<'_>> {
        self.require_type(DocumentType::Image2d)?;
        self.require_writable()?;
        Ok(Writer2d::new(self))
    }

    /// The read capability of a 3D document.
    pub fn reader3d(&self) -> Result<Reader3d<'_>> {
        self.require_type(DocumentType::Image3d)?;
        Ok(Reader3d::new(self))
    }

    /// The write capability of a 3D document.
    pub fn writer3d(&self) -> Result<Writer3d<'_>> {
        self.require_type(DocumentType::Image3d)?;
        self.require_writable()?;
        Ok(Writer3d::new(self))
    }

    /// The metadata tree of the document.
    pub fn metadata(&self) -> Metadata<'_> {
        Metadata::new(self)
    }

    fn require_type(&self, expected: DocumentType) -> Result<()> {
        if self.configuration.document_type() == expected {
            Ok(())
        } else {
            Err(TileDocError::InvalidArgument(format!(
                "the document is of type {:?}",
                self.configuration.document_type()
            )))
        }
    }

    fn require_writable(&self) -> Result<()> {
        if self.connection.is_read_only() {
            Err(TileDocError::ReadOnly)
        } else {
            Ok(())
        }
    }

    pub(crate) fn connection(&self) -> &DbConnection {
        &self.connection
    }

    pub(crate) fn configuration(&self) -> &DatabaseConfiguration {
        &self.configuration
    }
}
