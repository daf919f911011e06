//! The documented column set of an export.
//!
//! Every data file has exactly these columns, in this order, followed by the
//! [GEOMETRY_COLUMN]. The collection's `table:columns` is built from the same
//! list, so the two can't drift apart.

use arrow_schema::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The name of the geometry column.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// The number of documented columns.
pub const COLUMN_COUNT: usize = 14;

/// The type of a documented column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// A single string.
    String,

    /// A list of strings.
    #[serde(rename = "array")]
    StringArray,
}

/// A documented column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// The column name.
    pub name: &'static str,

    /// What the column holds.
    pub description: &'static str,

    /// The column type.
    pub r#type: ColumnType,
}

/// The documented columns, in file order.
pub const COLUMNS: [Column; COLUMN_COUNT] = [
    Column::string(
        "sample_identifier",
        "URI that identifies the physical sample described by this record",
    ),
    Column::string(
        "label",
        "a human intelligible string used to identify a thing, i.e. the name to use for the thing; should be unique in the scope of a sample collection or dataset.",
    ),
    Column::string(
        "description",
        "Free text description of the subject of a triple.",
    ),
    Column::array(
        "alternate_identifiers",
        "one or more identifiers used to identify the sample in other contexts. In this context, the identifier property and scheme_name should be required.",
    ),
    Column::string(
        "produced_by",
        "object that documents the sampling event--who, where, when the specimen was obtained",
    ),
    Column::string(
        "sampling_purpose",
        "term to specify why a sample was collection.",
    ),
    Column::array(
        "has_context_category",
        "Top level context, based on the kind of feature sampled. Specific identification of the sampled feature of interest is done through the SamplingEvent/Feature of Interest property. At least one value is an instance of skos:Concept from the iSamples sampledfeaturevocabulary.",
    ),
    Column::array(
        "has_material_category",
        "The kind of material that constitutes the sample.  At least one value is an instance of skos:Concept from the iSamples MaterialTypeVocabulary; extension vocabularies can be used for more precise categorization.",
    ),
    Column::array(
        "has_specimen_category",
        "The kind of object the specimen is. At least one value is an instance of skos:Concept from the iSamples SpecimenTypeVocabulary; extension vocabularies can be used for more precise categorization.",
    ),
    Column::array(
        "keywords",
        "free text terms or formal categories associate with sample to support discovery. As in DataCite metadata, each keyword is a separate element. Multiple keywords should NOT be included as a comma-delimited list.",
    ),
    Column::array(
        "related_resource",
        "link to related resource with relationship property to indicate nature of connection. Target should be identifier for a resource.",
    ),
    Column::array(
        "complies_with",
        "a list of policies, recommendations, best practices (etc.) that have been followed in the collection and curation of the sample.",
    ),
    Column::string(
        "dc_rights",
        "a statement about various property rights associated with the resource, including intellectual property rights. Recommended practice is to refer to a rights statement with a URI. If this is not possible or feasible, a literal value (name, label, or short text) may be provided.",
    ),
    Column::string(
        "curation",
        "Information about the current storage of sample, access to sample, and events in curation history. Curation as used here starts when the sample is removed from its original context, and might include various processing steps for preservation.  Processing related to analysis preparation such as crushing, dissolution, evaporation, filtering are considered part of the sampling method for the derived child sample.",
    ),
];

impl Column {
    const fn string(name: &'static str, description: &'static str) -> Column {
        Column {
            name,
            description,
            r#type: ColumnType::String,
        }
    }

    const fn array(name: &'static str, description: &'static str) -> Column {
        Column {
            name,
            description,
            r#type: ColumnType::StringArray,
        }
    }

    /// Returns the arrow field for this column.
    pub fn field(&self) -> Field {
        Field::new(self.name, self.r#type.data_type(), false)
    }
}

impl ColumnType {
    /// Returns the name used in `table:columns`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::StringArray => "array",
        }
    }

    /// Returns the arrow data type for this column type.
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnType::String => DataType::Utf8,
            ColumnType::StringArray => {
                DataType::List(Arc::new(Field::new("item", DataType::Utf8, true)))
            }
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the position of a column by name.
///
/// # Examples
///
/// ```
/// assert_eq!(isamples_export::column::position("label"), Some(1));
/// assert_eq!(isamples_export::column::position("registrant"), None);
/// ```
pub fn position(name: &str) -> Option<usize> {
    COLUMNS.iter().position(|column| column.name == name)
}

/// Returns the arrow schema of a data file.
pub fn schema() -> SchemaRef {
    let mut fields: Vec<Field> = COLUMNS.iter().map(Column::field).collect();
    fields.push(Field::new(GEOMETRY_COLUMN, DataType::Binary, true));
    Arc::new(Schema::new(fields))
}

#[cfg(test)]
mod tests {
    use super::{COLUMNS, ColumnType, GEOMETRY_COLUMN};
    use std::collections::HashSet;

    #[test]
    fn unique_names() {
        let names: HashSet<_> = COLUMNS.iter().map(|column| column.name).collect();
        assert_eq!(names.len(), COLUMNS.len());
        assert!(!names.contains(GEOMETRY_COLUMN));
    }

    #[test]
    fn schema_order() {
        let schema = super::schema();
        let names: Vec<_> = schema.fields().iter().map(|field| field.name()).collect();
        assert_eq!(names.len(), COLUMNS.len() + 1);
        assert_eq!(names[0], "sample_identifier");
        assert_eq!(names[COLUMNS.len()], GEOMETRY_COLUMN);
    }

    #[test]
    fn serde_names() {
        assert_eq!(
            serde_json::to_value(ColumnType::StringArray).unwrap(),
            "array"
        );
        assert_eq!(serde_json::to_value(ColumnType::String).unwrap(), "string");
    }
}
