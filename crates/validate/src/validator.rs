use crate::{Error, Result, checks};
use jsonschema::Validator as JsonschemaValidator;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, hash_map::Entry};

/// The table extension schema used by exported collections.
pub const TABLE_EXTENSION: &str = "https://stac-extensions.github.io/table/v1.2.0/schema.json";

/// The alternate assets extension schema used by exported collections.
pub const ALTERNATE_ASSETS_EXTENSION: &str =
    "https://stac-extensions.github.io/alternate-assets/v1.1.0/schema.json";

/// A structure for validating exported STAC collections.
///
/// Extension schemas named in `stac_extensions` are enforced too. The
/// extensions exported collections use are bundled; any other is fetched
/// once and cached.
#[allow(missing_debug_implementations)]
pub struct Validator {
    schema: JsonschemaValidator,
    extensions: HashMap<String, JsonschemaValidator>,
    client: Client,
}

/// The outcome of a validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    /// True if there were no errors.
    pub valid: bool,

    /// Diagnostics: core schema errors, then extension schema errors, then
    /// consistency checks.
    pub errors: Vec<String>,
}

impl Validator {
    /// Creates a new validator, compiling the embedded schemas.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export_validate::Validator;
    ///
    /// let validator = Validator::new().unwrap();
    /// ```
    pub fn new() -> Result<Validator> {
        let mut extensions = HashMap::new();
        for (uri, schema) in [
            (
                TABLE_EXTENSION,
                include_str!("schemas/table/v1.2.0/schema.json"),
            ),
            (
                ALTERNATE_ASSETS_EXTENSION,
                include_str!("schemas/alternate-assets/v1.1.0/schema.json"),
            ),
        ] {
            let _ = extensions.insert(uri.to_string(), compile(serde_json::from_str(schema)?)?);
        }
        Ok(Validator {
            schema: compile(serde_json::from_str(include_str!("schemas/collection.json"))?)?,
            extensions,
            client: Client::builder().user_agent(crate::user_agent()).build()?,
        })
    }

    /// Validates a single value.
    ///
    /// Returns an error only if the value can't be serialized to a JSON
    /// object or one of its extension schemas can't be fetched.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export_validate::Validator;
    /// use serde_json::json;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let mut validator = Validator::new().unwrap();
    /// let result = validator.validate(&json!({"type": "Collection"})).await.unwrap();
    /// assert!(!result.valid);
    /// # }
    /// ```
    pub async fn validate<T>(&mut self, value: &T) -> Result<ValidationResult>
    where
        T: Serialize,
    {
        let value = serde_json::to_value(value)?;
        self.validate_value(&value).await
    }

    /// If you have a [serde_json::Value], you can skip a serialization step by using this method.
    pub async fn validate_value(&mut self, value: &Value) -> Result<ValidationResult> {
        if !value.is_object() {
            return Err(Error::ScalarJson(value.clone()));
        }
        let mut errors: Vec<String> = self
            .schema
            .iter_errors(value)
            .map(|error| error.to_string())
            .collect();
        errors.extend(self.validate_extensions(value).await?);
        errors.extend(checks::spatial_extent(value));
        errors.extend(checks::temporal_extent(value));
        errors.extend(checks::table_columns(value));
        errors.extend(checks::assets(value));
        Ok(ValidationResult::from(errors))
    }

    async fn validate_extensions(&mut self, value: &Value) -> Result<Vec<String>> {
        let uris: Vec<String> = value
            .get("stac_extensions")
            .and_then(Value::as_array)
            .map(|uris| {
                uris.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let mut errors = Vec::new();
        for uri in uris {
            let validator = self.extension(&uri).await?;
            errors.extend(
                validator
                    .iter_errors(value)
                    .map(|error| format!("{uri}: {error}")),
            );
        }
        Ok(errors)
    }

    async fn extension(&mut self, uri: &str) -> Result<&JsonschemaValidator> {
        match self.extensions.entry(uri.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                tracing::debug!("fetching extension schema {uri}");
                let response = self.client.get(uri).send().await?.error_for_status()?;
                let schema: Value = response.json().await?;
                Ok(entry.insert(compile(schema)?))
            }
        }
    }
}

fn compile(schema: Value) -> Result<JsonschemaValidator> {
    let validator = jsonschema::validator_for(&schema).map_err(Box::new)?;
    Ok(validator)
}

impl ValidationResult {
    /// Returns true if the document passed validation.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl From<Vec<String>> for ValidationResult {
    fn from(errors: Vec<String>) -> ValidationResult {
        ValidationResult {
            valid: errors.is_empty(),
            errors,
        }
    }
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.valid {
            write!(f, "valid")
        } else {
            write!(f, "{} validation error(s)", self.errors.len())
        }
    }
}
