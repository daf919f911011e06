use thiserror::Error;

/// Crate-specific error enum.
///
/// These are failures to *run* validation. A document that fails validation
/// is reported through [ValidationResult](crate::ValidationResult).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A schema could not be compiled.
    #[error(transparent)]
    JsonschemaValidation(#[from] Box<jsonschema::ValidationError<'static>>),

    #[error(transparent)]
    /// [reqwest::Error]
    Reqwest(#[from] reqwest::Error),

    /// JSON is a scalar when an object was expected
    #[error("json value is not an object")]
    ScalarJson(serde_json::Value),

    #[error(transparent)]
    /// [serde_json::Error]
    SerdeJson(#[from] serde_json::Error),
}
