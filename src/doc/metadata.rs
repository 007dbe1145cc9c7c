use crate::error::{Result, TileDocError};
use crate::schema::DatabaseConfiguration;
use rusqlite::params;

use super::document::Document;
use super::support::with_implicit_transaction;

type Config = DatabaseConfiguration;

/// A typed metadata value. The variant is persisted as an integer type
/// code next to the value columns.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    Null,
    Int32(i32),
    Double(f64),
    Text(String),
    /// JSON text; stored like [`MetadataValue::Text`] but tagged so readers
    /// can parse it.
    Json(String),
}

impl MetadataValue {
    fn type_code(&self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Int32(_) => 1,
            Self::Double(_) => 2,
            Self::Text(_) => 3,
            Self::Json(_) => 4,
        }
    }

    fn columns(&self) -> (Option<i64>, Option<f64>, Option<&str>) {
        match self {
            Self::Null => (None, None, None),
            Self::Int32(value) => (Some(i64::from(*value)), None, None),
            Self::Double(value) => (None, Some(*value), None),
            Self::Text(value) | Self::Json(value) => (None, None, Some(value.as_str())),
        }
    }

    fn from_columns(
        type_code: i32,
        value_int: Option<i64>,
        value_double: Option<f64>,
        value_text: Option<String>,
    ) -> Result<Self> {
        let mismatch = || {
            TileDocError::InvariantViolation(format!(
                "metadata value does not match its type code {type_code}"
            ))
        };
        Ok(match type_code {
            0 => Self::Null,
            1 => Self::Int32(value_int.ok_or_else(mismatch)? as i32),
            2 => Self::Double(value_double.ok_or_else(mismatch)?),
            3 => Self::Text(value_text.ok_or_else(mismatch)?),
            4 => Self::Json(value_text.ok_or_else(mismatch)?),
            _ => {
                return Err(TileDocError::InvariantViolation(format!(
                    "unknown metadata type code {type_code}"
                )));
            }
        })
    }
}

/// Selects which fields a metadata read returns.
#[derive(Debug, Clone, Copy)]
pub struct MetadataItemFlags {
    pub with_pk: bool,
    pub with_name: bool,
    pub with_value: bool,
}

impl Default for MetadataItemFlags {
    fn default() -> Self {
        Self {
            with_pk: true,
            with_name: true,
            with_value: true,
        }
    }
}

/// A metadata node as returned by the read operations; fields not selected
/// by the flags stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataItem {
    pub pk: Option<i64>,
    pub name: Option<String>,
    pub value: Option<MetadataValue>,
}

/// The metadata tree of a document: a hierarchy of named, typed values
/// addressed by `/`-separated paths. Nodes are upserted, never removed;
/// sibling names are unique and the empty name is reserved for the root.
pub struct Metadata<'a> {
    document: &'a Document,
}

impl<'a> Metadata<'a> {
    pub(super) fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Update the child `name` of `parent_pk` (`None` = root), creating it
    /// when missing and `create_if_missing` is set. Returns the node's pk.
    pub fn update_or_create_item(
        &self,
        parent_pk: Option<i64>,
        create_if_missing: bool,
        name: &str,
        value: &MetadataValue,
    ) -> Result<i64> {
        self.require_writable()?;
        validate_name(name)?;
        if let Some(parent) = parent_pk
            && !self.item_exists(parent)?
        {
            return Err(TileDocError::InvalidArgument(format!(
                "parent item {parent} does not exist"
            )));
        }

        match self.find_child(parent_pk, name)? {
            Some(pk) => {
                self.update_item(pk, value)?;
                Ok(pk)
            }
            None if create_if_missing => self.insert_item(parent_pk, name, value),
            None => Err(TileDocError::NonExistingMetadataItem {
                path: name.to_string(),
            }),
        }
    }

    /// Resolve `path` and set its value. Missing ancestors are created with
    /// Null values when `create_missing` is set; an existing final node is
    /// only replaced when `overwrite` is set (its pk is returned either
    /// way).
    pub fn update_or_create_item_for_path(
        &self,
        create_missing: bool,
        overwrite: bool,
        path: &str,
        value: &MetadataValue,
    ) -> Result<i64> {
        self.require_writable()?;
        let segments = split_path(path)?;

        with_implicit_transaction(self.document, || {
            let mut parent_pk: Option<i64> = None;
            for segment in &segments[..segments.len() - 1] {
                parent_pk = Some(match self.find_child(parent_pk, segment)? {
                    Some(pk) => pk,
                    None if create_missing => {
                        self.insert_item(parent_pk, segment, &MetadataValue::Null)?
                    }
                    None => {
                        return Err(TileDocError::NonExistingMetadataItem {
                            path: path.to_string(),
                        });
                    }
                });
            }

            let name = segments[segments.len() - 1];
            match self.find_child(parent_pk, name)? {
                Some(pk) => {
                    if overwrite {
                        self.update_item(pk, value)?;
                    }
                    Ok(pk)
                }
                None if create_missing => self.insert_item(parent_pk, name, value),
                None => Err(TileDocError::NonExistingMetadataItem {
                    path: path.to_string(),
                }),
            }
        })
    }

    /// Read one node by pk, honoring the retrieval flags.
    pub fn get_item(&self, pk: i64, flags: &MetadataItemFlags) -> Result<MetadataItem> {
        let sql = format!(
            r#"SELECT "{name}", "{type_code}", "{value_int}", "{value_double}", "{value_text}" FROM "{table}" WHERE "{pk_col}" = ?1"#,
            name = Config::COL_META_NAME,
            type_code = Config::COL_META_TYPE_CODE,
            value_int = Config::COL_META_VALUE_INT,
            value_double = Config::COL_META_VALUE_DOUBLE,
            value_text = Config::COL_META_VALUE_TEXT,
            table = self.document.configuration().metadata_table(),
            pk_col = Config::COL_META_PK
        );

        let row = self
            .document
            .connection()
            .connection()
            .query_row(&sql, [pk], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            });
        let (name, type_code, value_int, value_double, value_text) = match row {
            Ok(columns) => columns,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(TileDocError::NonExistingMetadataItem {
                    path: pk.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        Ok(MetadataItem {
            pk: flags.with_pk.then_some(pk),
            name: flags.with_name.then_some(name),
            value: if flags.with_value {
                Some(MetadataValue::from_columns(
                    type_code,
                    value_int,
                    value_double,
                    value_text,
                )?)
            } else {
                None
            },
        })
    }

    /// Resolve `path` and read the node it names.
    pub fn get_item_for_path(&self, path: &str, flags: &MetadataItemFlags) -> Result<MetadataItem> {
        let pk = self.resolve_path(path)?;
        self.get_item(pk, flags)
    }

    /// Enumerate the direct children of `parent_pk` (`None` = root) in
    /// primary-key order. Returning `false` ends the enumeration.
    pub fn enumerate_children(
        &self,
        parent_pk: Option<i64>,
        mut visit: impl FnMut(i64, &str) -> bool,
    ) -> Result<()> {
        let sql = format!(
            r#"SELECT "{pk}", "{name}" FROM "{table}" WHERE "{parent}" IS ?1 ORDER BY "{pk}""#,
            pk = Config::COL_META_PK,
            name = Config::COL_META_NAME,
            table = self.document.configuration().metadata_table(),
            parent = Config::COL_META_PARENT_PK
        );

        let connection = self.document.connection();
        let mut statement = connection.prepare(&sql)?;
        statement.raw_bind_parameter(1, parent_pk)?;
        connection.log_statement(&statement);

        let mut rows = statement.raw_query();
        while let Some(row) = rows.next()? {
            let pk: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            if !visit(pk, &name) {
                break;
            }
        }

        Ok(())
    }

    fn resolve_path(&self, path: &str) -> Result<i64> {
        let segments = split_path(path)?;
        let mut parent_pk: Option<i64> = None;
        for segment in segments {
            parent_pk = Some(self.find_child(parent_pk, segment)?.ok_or_else(|| {
                TileDocError::NonExistingMetadataItem {
                    path: path.to_string(),
                }
            })?);
        }
        // split_path guarantees at least one segment
        Ok(parent_pk.unwrap_or_default())
    }

    fn find_child(&self, parent_pk: Option<i64>, name: &str) -> Result<Option<i64>> {
        let sql = format!(
            r#"SELECT "{pk}" FROM "{table}" WHERE "{parent}" IS ?1 AND "{name_col}" = ?2"#,
            pk = Config::COL_META_PK,
            table = self.document.configuration().metadata_table(),
            parent = Config::COL_META_PARENT_PK,
            name_col = Config::COL_META_NAME
        );
        let result = self
            .document
            .connection()
            .connection()
            .query_row(&sql, params![parent_pk, name], |row| row.get(0));
        match result {
            Ok(pk) => Ok(Some(pk)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn insert_item(
        &self,
        parent_pk: Option<i64>,
        name: &str,
        value: &MetadataValue,
    ) -> Result<i64> {
        let (value_int, value_double, value_text) = value.columns();
        let sql = format!(
            r#"INSERT INTO "{table}" ("{parent}", "{name_col}", "{type_code}", "{value_int}", "{value_double}", "{value_text}") VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            table = self.document.configuration().metadata_table(),
            parent = Config::COL_META_PARENT_PK,
            name_col = Config::COL_META_NAME,
            type_code = Config::COL_META_TYPE_CODE,
            value_int = Config::COL_META_VALUE_INT,
            value_double = Config::COL_META_VALUE_DOUBLE,
            value_text = Config::COL_META_VALUE_TEXT
        );
        let connection = self.document.connection();
        let mut statement = connection.prepare_cached(&sql)?;
        statement.execute(params![
            parent_pk,
            name,
            value.type_code(),
            value_int,
            value_double,
            value_text,
        ])?;
        connection.log_statement(&statement);
        drop(statement);
        Ok(connection.last_insert_rowid())
    }

    fn update_item(&self, pk: i64, value: &MetadataValue) -> Result<()> {
        let (value_int, value_double, value_text) = value.columns();
        let sql = format!(
            r#"UPDATE "{table}" SET "{type_code}" = ?1, "{value_int}" = ?2, "{value_double}" = ?3, "{value_text}" = ?4 WHERE "{pk_col}" = ?5"#,
            table = self.document.configuration().metadata_table(),
            type_code = Config::COL_META_TYPE_CODE,
            value_int = Config::COL_META_VALUE_INT,
            value_double = Config::COL_META_VALUE_DOUBLE,
            value_text = Config::COL_META_VALUE_TEXT,
            pk_col = Config::COL_META_PK
        );
        let connection = self.document.connection();
        let mut statement = connection.prepare_cached(&sql)?;
        statement.execute(params![
            value.type_code(),
            value_int,
            value_double,
            value_text,
            pk,
        ])?;
        connection.log_statement(&statement);
        Ok(())
    }

    fn item_exists(&self, pk: i64) -> Result<bool> {
        let sql = format!(
            r#"SELECT COUNT(*) FROM "{}" WHERE "{}" = ?1"#,
            self.document.configuration().metadata_table(),
            Config::COL_META_PK
        );
        let count: i64 = self
            .document
            .connection()
            .connection()
            .query_row(&sql, [pk], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn require_writable(&self) -> Result<()> {
        if self.document.is_read_only() {
            Err(TileDocError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

/// Split a `/`-separated path; the empty path and empty segments (the
/// empty name is reserved for the root) are rejected.
fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(TileDocError::InvalidArgument(
            "the empty path names the root and cannot be addressed".to_string(),
        ));
    }

    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(TileDocError::InvalidArgument(format!(
            "path '{path}' contains an empty segment"
        )));
    }

    Ok(segments)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TileDocError::InvalidArgument(
            "the empty name is reserved for the root".to_string(),
        ));
    }
    if name.contains('/') {
        return Err(TileDocError::InvalidArgument(format!(
            "item name '{name}' must not contain '/'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::document::CreateOptions;
    use crate::types::{Dimension, DocumentType};

    fn document() -> Document {
        let options = CreateOptions::new(DocumentType::Image2d)
            .with_dimension(Dimension::new('C').unwrap());
        Document::create_in_memory(&options).unwrap()
    }

    #[test]
    fn builds_and_reads_a_small_tree() {
        let document = document();
        let metadata = document.metadata();

        metadata
            .update_or_create_item_for_path(
                true,
                true,
                "Node1",
                &MetadataValue::Double(33.443),
            )
            .unwrap();
        metadata
            .update_or_create_item_for_path(
                true,
                true,
                "Node1/Node1_1",
                &MetadataValue::Text("A".to_string()),
            )
            .unwrap();
        metadata
            .update_or_create_item_for_path(
                true,
                true,
                "Node1/Node1_2",
                &MetadataValue::Text("B".to_string()),
            )
            .unwrap();
        metadata
            .update_or_create_item_for_path(
                true,
                true,
                "Node1/Node1_1",
                &MetadataValue::Text("C".to_string()),
            )
            .unwrap();

        let item = metadata
            .get_item_for_path("Node1/Node1_1", &MetadataItemFlags::default())
            .unwrap();
        assert_eq!(item.name.as_deref(), Some("Node1_1"));
        assert_eq!(item.value, Some(MetadataValue::Text("C".to_string())));

        let root = metadata
            .get_item_for_path("Node1", &MetadataItemFlags::default())
            .unwrap();
        assert_eq!(root.value, Some(MetadataValue::Double(33.443)));

        let mut children = Vec::new();
        metadata
            .enumerate_children(root.pk, |_, name| {
                children.push(name.to_string());
                true
            })
            .unwrap();
        assert_eq!(children, vec!["Node1_1".to_string(), "Node1_2".to_string()]);
    }

    #[test]
    fn overwrite_false_keeps_the_existing_value() {
        let document = document();
        let metadata = document.metadata();

        let pk = metadata
            .update_or_create_item_for_path(true, true, "A/B", &MetadataValue::Int32(1))
            .unwrap();
        let same = metadata
            .update_or_create_item_for_path(true, false, "A/B", &MetadataValue::Int32(2))
            .unwrap();
        assert_eq!(pk, same);

        let item = metadata
            .get_item_for_path("A/B", &MetadataItemFlags::default())
            .unwrap();
        assert_eq!(item.value, Some(MetadataValue::Int32(1)));
    }

    #[test]
    fn create_path_creates_null_typed_ancestors() {
        let document = document();
        let metadata = document.metadata();

        metadata
            .update_or_create_item_for_path(
                true,
                true,
                "A/B/C",
                &MetadataValue::Json("{\"k\":1}".to_string()),
            )
            .unwrap();

        let ancestor = metadata
            .get_item_for_path("A/B", &MetadataItemFlags::default())
            .unwrap();
        assert_eq!(ancestor.value, Some(MetadataValue::Null));

        let leaf = metadata
            .get_item_for_path("A/B/C", &MetadataItemFlags::default())
            .unwrap();
        assert_eq!(
            leaf.value,
            Some(MetadataValue::Json("{\"k\":1}".to_string()))
        );
    }

    #[test]
    fn missing_path_without_create_fails() {
        let document = document();
        let metadata = document.metadata();

        let result = metadata.update_or_create_item_for_path(
            false,
            true,
            "A/B",
            &MetadataValue::Int32(1),
        );
        assert!(matches!(
            result,
            Err(TileDocError::NonExistingMetadataItem { .. })
        ));

        assert!(matches!(
            metadata.get_item_for_path("A", &MetadataItemFlags::default()),
            Err(TileDocError::NonExistingMetadataItem { .. })
        ));
    }

    #[test]
    fn empty_path_segments_are_rejected() {
        let document = document();
        let metadata = document.metadata();

        for path in ["", "A//B", "/A", "A/"] {
            let result = metadata.update_or_create_item_for_path(
                true,
                true,
                path,
                &MetadataValue::Null,
            );
            assert!(
                matches!(result, Err(TileDocError::InvalidArgument(_))),
                "path '{path}'"
            );
        }
    }

    #[test]
    fn item_level_upsert_respects_parent() {
        let document = document();
        let metadata = document.metadata();

        let parent = metadata
            .update_or_create_item(None, true, "Root1", &MetadataValue::Null)
            .unwrap();
        let child = metadata
            .update_or_create_item(Some(parent), true, "Leaf", &MetadataValue::Int32(7))
            .unwrap();

        // same name under the root is a different node
        let other = metadata
            .update_or_create_item(None, true, "Leaf", &MetadataValue::Int32(9))
            .unwrap();
        assert_ne!(child, other);

        // upserting the child again updates in place
        let again = metadata
            .update_or_create_item(Some(parent), true, "Leaf", &MetadataValue::Int32(8))
            .unwrap();
        assert_eq!(child, again);

        let item = metadata
            .get_item(child, &MetadataItemFlags::default())
            .unwrap();
        assert_eq!(item.value, Some(MetadataValue::Int32(8)));

        // a bogus parent is rejected
        assert!(matches!(
            metadata.update_or_create_item(Some(12345), true, "X", &MetadataValue::Null),
            Err(TileDocError::InvalidArgument(_))
        ));
        // names with separators are rejected
        assert!(matches!(
            metadata.update_or_create_item(None, true, "A/B", &MetadataValue::Null),
            Err(TileDocError::InvalidArgument(_))
        ));
    }

    #[test]
    fn flags_select_the_returned_fields() {
        let document = document();
        let metadata = document.metadata();
        let pk = metadata
            .update_or_create_item_for_path(true, true, "N", &MetadataValue::Int32(5))
            .unwrap();

        let flags = MetadataItemFlags {
            with_pk: true,
            with_name: false,
            with_value: false,
        };
        let item = metadata.get_item(pk, &flags).unwrap();
        assert_eq!(item.pk, Some(pk));
        assert!(item.name.is_none());
        assert!(item.value.is_none());
    }

    #[test]
    fn read_only_document_rejects_metadata_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.tiledoc");
        let options = CreateOptions::new(DocumentType::Image2d)
            .with_dimension(Dimension::new('C').unwrap());
        {
            let document = Document::create_new(&path, &options).unwrap();
            document
                .metadata()
                .update_or_create_item_for_path(true, true, "N", &MetadataValue::Int32(1))
                .unwrap();
        }

        let read_only = Document::open_read_only(&path).unwrap();
        let metadata = read_only.metadata();
        assert!(matches!(
            metadata.update_or_create_item_for_path(true, true, "M", &MetadataValue::Null),
            Err(TileDocError::ReadOnly)
        ));
        // reads still work
        assert!(metadata.get_item_for_path("N", &MetadataItemFlags::default()).is_ok());
    }
}
