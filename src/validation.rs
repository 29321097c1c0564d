use rocket::serde::json::Json;
use std::collections::BTreeSet;
use tracing::instrument;
use validator::{Validate, ValidationErrors};

use crate::error::AppError;

/// Flattens field errors into one message, ordered by field name so the
/// client sees the same text for the same input.
#[instrument(skip(errors))]
pub fn validation_message(errors: &ValidationErrors) -> String {
    let mut field_errors: Vec<_> = errors.field_errors().into_iter().collect();
    field_errors.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut messages = BTreeSet::new();
    let mut ordered = Vec::new();
    for (field, errors) in field_errors {
        for error in errors {
            let message = error
                .message
                .clone()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{} is invalid", field));

            if messages.insert(message.clone()) {
                ordered.push(message);
            }
        }
    }

    ordered.join("; ")
}

pub trait JsonValidateExt<T> {
    /// Unwraps the body after running its `validator` rules.
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner
            .validate()
            .map_err(|errors| AppError::Validation(validation_message(&errors)))?;
        Ok(inner)
    }
}
