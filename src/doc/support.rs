//! Shared plumbing for the 2D and 3D readers: visitor-driven statement
//! execution, the blob retrieval path and the aggregate queries that do not
//! depend on the dimensionality.

use crate::blob::BlobSink;
use crate::error::{Result, TileDocError};
use crate::query::{
    BindValue, CoordinateQueryClause, SqlFragment, TileInfoQueryClause, clauses_where_fragment,
};
use crate::schema::DatabaseConfiguration;
use crate::types::{Dimension, DoubleInterval, Int32Interval};
use std::collections::BTreeMap;

use super::document::Document;

type Config = DatabaseConfiguration;

/// Run a statement yielding primary keys in its first column, feeding each
/// one to the visitor. A `false` from the visitor ends the enumeration; the
/// statement is finalized on every exit path when it drops.
pub(super) fn run_pk_visitor(
    document: &Document,
    sql: &str,
    params: &[BindValue],
    visit: &mut dyn FnMut(i64) -> bool,
) -> Result<()> {
    let connection = document.connection();
    let mut statement = connection.prepare(sql)?;
    for (index, param) in params.iter().enumerate() {
        statement.raw_bind_parameter(index + 1, param)?;
    }
    connection.log_statement(&statement);

    let mut rows = statement.raw_query();
    while let Some(row) = rows.next()? {
        let pk: i64 = row.get(0)?;
        if !visit(pk) {
            break;
        }
    }

    Ok(())
}

/// The plain coordinate/tile-info query over the tiles-info table,
/// enumerating primary keys in ascending order.
pub(super) fn query_tiles(
    document: &Document,
    coordinate_clause: Option<&CoordinateQueryClause>,
    info_clause: Option<&TileInfoQueryClause>,
    visit: &mut dyn FnMut(i64) -> bool,
) -> Result<()> {
    let configuration = document.configuration();
    let fragment = clauses_where_fragment(coordinate_clause, info_clause, configuration)?;
    let sql = format!(
        r#"SELECT "{pk}" FROM "{table}" WHERE {fragment} ORDER BY "{pk}""#,
        pk = Config::COL_INFO_PK,
        table = configuration.tiles_info_table(),
        fragment = fragment.sql
    );
    run_pk_visitor(document, &sql, &fragment.params, visit)
}

/// Assemble a spatial-index query: the plain form when no extra clauses are
/// present, otherwise an INNER JOIN with the tiles-info table so the clause
/// fragment can see the dimension and pyramid-level columns.
pub(super) fn spatial_query_sql(
    document: &Document,
    spatial_fragment: &SqlFragment,
    coordinate_clause: Option<&CoordinateQueryClause>,
    info_clause: Option<&TileInfoQueryClause>,
) -> Result<(String, Vec<BindValue>)> {
    let configuration = document.configuration();
    let spatial_table = configuration.spatial_index_table()?;

    let no_clauses = coordinate_clause.is_none_or(CoordinateQueryClause::is_empty)
        && info_clause.is_none_or(TileInfoQueryClause::is_empty);
    if no_clauses {
        let sql = format!(
            r#"SELECT spatialindex."{pk}" FROM "{spatial_table}" spatialindex WHERE {spatial}"#,
            pk = Config::COL_SPATIAL_PK,
            spatial = spatial_fragment.sql
        );
        return Ok((sql, spatial_fragment.params.clone()));
    }

    let clause_fragment = clauses_where_fragment(coordinate_clause, info_clause, configuration)?;
    let sql = format!(
        r#"SELECT spatialindex."{spk}" FROM "{spatial_table}" spatialindex INNER JOIN "{info_table}" info ON spatialindex."{spk}" = info."{ipk}" WHERE {spatial} AND {clauses}"#,
        spk = Config::COL_SPATIAL_PK,
        ipk = Config::COL_INFO_PK,
        info_table = configuration.tiles_info_table(),
        spatial = spatial_fragment.sql,
        clauses = clause_fragment.sql
    );
    let mut params = spatial_fragment.params.clone();
    params.extend(clause_fragment.params);
    Ok((sql, params))
}

/// The fallback form of a geometric query on the tiles-info table itself.
pub(super) fn fallback_query_sql(
    document: &Document,
    geometry_fragment: &SqlFragment,
    coordinate_clause: Option<&CoordinateQueryClause>,
    info_clause: Option<&TileInfoQueryClause>,
) -> Result<(String, Vec<BindValue>)> {
    let configuration = document.configuration();
    let clause_fragment = clauses_where_fragment(coordinate_clause, info_clause, configuration)?;
    let sql = format!(
        r#"SELECT "{pk}" FROM "{table}" WHERE {geometry} AND {clauses} ORDER BY "{pk}""#,
        pk = Config::COL_INFO_PK,
        table = configuration.tiles_info_table(),
        geometry = geometry_fragment.sql,
        clauses = clause_fragment.sql
    );
    let mut params = geometry_fragment.params.clone();
    params.extend(clause_fragment.params);
    Ok((sql, params))
}

/// Deliver a payload to the sink. Distinguishes "no such tile" (no row)
/// from "tile without payload" (row with a NULL blob); more than one row is
/// an invariant violation.
pub(super) fn read_blob(document: &Document, pk: i64, sink: &mut dyn BlobSink) -> Result<()> {
    let configuration = document.configuration();
    let connection = document.connection();

    let sql = if configuration.uses_blob_table() {
        format!(
            r#"SELECT "{blob_table}"."{data}" FROM "{info_table}" INNER JOIN "{data_table}" ON "{info_table}"."{data_id}" = "{data_table}"."{data_pk}" LEFT JOIN "{blob_table}" ON "{data_table}"."{bin_id}" = "{blob_table}"."{blob_pk}" WHERE "{info_table}"."{info_pk}" = ?1"#,
            blob_table = configuration.blob_table()?,
            data = Config::COL_BLOB_DATA,
            info_table = configuration.tiles_info_table(),
            data_table = configuration.tiles_data_table(),
            data_id = Config::COL_INFO_TILE_DATA_ID,
            data_pk = Config::COL_DATA_PK,
            bin_id = Config::COL_DATA_BIN_DATA_ID,
            blob_pk = Config::COL_BLOB_PK,
            info_pk = Config::COL_INFO_PK
        )
    } else {
        // without a blob table every tile reads back as payload-free
        format!(
            r#"SELECT NULL FROM "{info_table}" WHERE "{info_table}"."{info_pk}" = ?1"#,
            info_table = configuration.tiles_info_table(),
            info_pk = Config::COL_INFO_PK
        )
    };

    let mut statement = connection.prepare(&sql)?;
    statement.raw_bind_parameter(1, pk)?;
    connection.log_statement(&statement);

    let mut rows = statement.raw_query();
    let Some(row) = rows.next()? else {
        return Err(TileDocError::NonExistingTile { pk });
    };

    match row.get_ref(0)? {
        rusqlite::types::ValueRef::Null => {
            sink.reserve(0)?;
        }
        rusqlite::types::ValueRef::Blob(bytes) => {
            if sink.reserve(bytes.len())? {
                sink.write_chunk(0, bytes)?;
            }
        }
        other => {
            return Err(TileDocError::InvariantViolation(format!(
                "unexpected payload column type {:?}",
                other.data_type()
            )));
        }
    }

    if rows.next()?.is_some() {
        return Err(TileDocError::InvariantViolation(format!(
            "multiple payload rows for pk {pk}"
        )));
    }

    Ok(())
}

/// Check that the coordinate covers exactly the declared dimension set.
pub(super) fn validate_coordinate(
    configuration: &DatabaseConfiguration,
    coordinate: &crate::types::TileCoordinate,
) -> Result<()> {
    if coordinate.len() != configuration.dimension_count() {
        return Err(TileDocError::InvalidArgument(format!(
            "the coordinate has {} dimensions, the document declares {}",
            coordinate.len(),
            configuration.dimension_count()
        )));
    }

    for dimension in coordinate.dimensions() {
        if !configuration.is_dimension_valid(dimension) {
            return Err(TileDocError::InvalidArgument(format!(
                "dimension '{dimension}' is not part of the document"
            )));
        }
    }

    Ok(())
}

/// Insert the payload into the blob table, returning the new row's pk. The
/// bytes are copied into the statement, so the source only has to stay
/// valid for this call.
pub(super) fn insert_blob(document: &Document, data: &dyn crate::blob::DataSource) -> Result<i64> {
    let configuration = document.configuration();
    let connection = document.connection();
    let sql = format!(
        r#"INSERT INTO "{}" ("{}") VALUES (?1)"#,
        configuration.blob_table()?,
        Config::COL_BLOB_DATA
    );
    let mut statement = connection.prepare_cached(&sql)?;
    statement.execute([data.bytes()])?;
    connection.log_statement(&statement);
    Ok(connection.last_insert_rowid())
}

/// Resolve the blob row for an insert: payload-free tiles store NULL, and
/// only in-database storage is supported for payload-carrying tiles.
pub(super) fn insert_payload(
    document: &Document,
    data_type: crate::types::DataType,
    storage_type: crate::types::StorageType,
    data: &dyn crate::blob::DataSource,
) -> Result<Option<i64>> {
    if data_type == crate::types::DataType::Zero {
        return Ok(None);
    }

    match storage_type {
        crate::types::StorageType::BlobInDatabase => Ok(Some(insert_blob(document, data)?)),
        crate::types::StorageType::Invalid | crate::types::StorageType::BlobExternal => {
            Err(TileDocError::InvalidArgument(
                "only in-database blob storage is supported".to_string(),
            ))
        }
    }
}

/// Run `operation` inside the caller's transaction if one is pending,
/// otherwise inside an implicit per-call transaction (rolled back when the
/// operation fails).
pub(super) fn with_implicit_transaction<T>(
    document: &Document,
    operation: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let connection = document.connection();
    if connection.is_transaction_pending() {
        return operation();
    }

    connection.begin_transaction()?;
    match operation() {
        Ok(value) => {
            connection.end_transaction(true)?;
            Ok(value)
        }
        Err(err) => {
            let _ = connection.end_transaction(false);
            Err(err)
        }
    }
}

/// Minimum and maximum coordinate value per requested dimension; an invalid
/// interval means the document holds no tiles.
pub(super) fn min_max_for_dimensions(
    document: &Document,
    dimensions: &[Dimension],
) -> Result<BTreeMap<Dimension, Int32Interval>> {
    let configuration = document.configuration();
    if dimensions.is_empty() {
        return Ok(BTreeMap::new());
    }

    let mut projections = Vec::with_capacity(dimensions.len() * 2);
    for dimension in dimensions {
        if !configuration.is_dimension_valid(*dimension) {
            return Err(TileDocError::InvalidArgument(format!(
                "dimension '{dimension}' is not part of the document"
            )));
        }
        let column = configuration.dimension_column(*dimension);
        projections.push(format!(r#"MIN("{column}")"#));
        projections.push(format!(r#"MAX("{column}")"#));
    }

    let sql = format!(
        r#"SELECT {} FROM "{}""#,
        projections.join(", "),
        configuration.tiles_info_table()
    );
    let connection = document.connection();
    let mut statement = connection.prepare(&sql)?;
    connection.log_statement(&statement);

    let mut result = BTreeMap::new();
    let mut rows = statement.raw_query();
    if let Some(row) = rows.next()? {
        for (index, dimension) in dimensions.iter().enumerate() {
            let minimum: Option<i32> = row.get(index * 2)?;
            let maximum: Option<i32> = row.get(index * 2 + 1)?;
            let interval = match (minimum, maximum) {
                (Some(minimum), Some(maximum)) => Int32Interval::new(minimum, maximum),
                _ => Int32Interval::default(),
            };
            result.insert(*dimension, interval);
        }
    }

    Ok(result)
}

pub(super) fn total_tile_count(document: &Document) -> Result<u64> {
    let configuration = document.configuration();
    let count: i64 = document.connection().connection().query_row(
        &format!(
            r#"SELECT COUNT(*) FROM "{}""#,
            configuration.tiles_info_table()
        ),
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub(super) fn tile_count_per_layer(document: &Document) -> Result<BTreeMap<i32, u64>> {
    let configuration = document.configuration();
    let sql = format!(
        r#"SELECT "{level}", COUNT(*) FROM "{table}" GROUP BY "{level}""#,
        level = configuration.pyramid_level_column(),
        table = configuration.tiles_info_table()
    );
    let mut statement = document.connection().prepare(&sql)?;
    let counts = statement
        .query_map([], |row| {
            Ok((row.get::<_, i32>(0)?, row.get::<_, i64>(1)? as u64))
        })?
        .collect::<std::result::Result<BTreeMap<i32, u64>, _>>()?;
    Ok(counts)
}

/// The extent of all tiles along one position/extent column pair.
fn axis_interval(
    document: &Document,
    position_column: &str,
    extent_column: &str,
) -> Result<DoubleInterval> {
    let configuration = document.configuration();
    let sql = format!(
        r#"SELECT MIN("{position}"), MAX("{position}"+"{extent}") FROM "{table}""#,
        position = position_column,
        extent = extent_column,
        table = configuration.tiles_info_table()
    );
    let (minimum, maximum): (Option<f64>, Option<f64>) = document
        .connection()
        .connection()
        .query_row(&sql, [], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(match (minimum, maximum) {
        (Some(minimum), Some(maximum)) => DoubleInterval::new(minimum, maximum),
        _ => DoubleInterval::default(),
    })
}

pub(super) fn bounding_box_2d(document: &Document) -> Result<(DoubleInterval, DoubleInterval)> {
    Ok((
        axis_interval(document, Config::COL_INFO_TILE_X, Config::COL_INFO_TILE_W)?,
        axis_interval(document, Config::COL_INFO_TILE_Y, Config::COL_INFO_TILE_H)?,
    ))
}

pub(super) fn bounding_box_3d(
    document: &Document,
) -> Result<(DoubleInterval, DoubleInterval, DoubleInterval)> {
    let configuration = document.configuration();
    Ok((
        axis_interval(document, Config::COL_INFO_TILE_X, Config::COL_INFO_TILE_W)?,
        axis_interval(document, Config::COL_INFO_TILE_Y, Config::COL_INFO_TILE_H)?,
        axis_interval(
            document,
            configuration.tile_z_column()?,
            configuration.tile_d_column()?,
        )?,
    ))
}
