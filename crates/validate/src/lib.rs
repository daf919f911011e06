//! Validate exported STAC collections with [json-schema](https://json-schema.org/)
//! and a handful of consistency checks the schema can't express.
//!
//! # Examples
//!
//! Validation is provided via the [Validate] trait:
//!
//! ```
//! use isamples_export_validate::Validate;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let collection = json!({"type": "Collection"});
//! let result = collection.validate().await.unwrap();
//! assert!(!result.is_valid());
//! # }
//! ```
//!
//! Schemas are compiled once per [Validator], and extension schemas that
//! aren't bundled are fetched once, so if you're validating several documents
//! you should re-use the same one:
//!
//! ```
//! use isamples_export_validate::Validator;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut validator = Validator::new().unwrap();
//! for id in ["a", "b"] {
//!     let result = validator.validate(&json!({"id": id})).await.unwrap();
//!     assert!(!result.errors.is_empty());
//! }
//! # }
//! ```
//!
//! A failed validation is a value, not an error: the document is never
//! modified, and the caller decides what to do with an invalid result.

use serde::Serialize;

mod checks;
mod error;
mod validator;

pub use {
    error::Error,
    validator::{ALTERNATE_ASSETS_EXTENSION, TABLE_EXTENSION, ValidationResult, Validator},
};

/// Public result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Validate any serializable object as a STAC collection.
pub trait Validate: Serialize + Sized {
    /// Validates this object.
    ///
    /// Builds a fresh [Validator]; if you're doing multiple validations, use
    /// [Validator::validate] instead.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export_validate::Validate;
    /// use serde_json::json;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let result = json!({}).validate().await.unwrap();
    /// assert!(!result.is_valid());
    /// # }
    /// ```
    #[allow(async_fn_in_trait)]
    async fn validate(&self) -> Result<ValidationResult> {
        let mut validator = Validator::new()?;
        validator.validate(self).await
    }
}

impl<T: Serialize> Validate for T {}

/// Returns a string suitable for use as a HTTP user agent.
pub fn user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}
