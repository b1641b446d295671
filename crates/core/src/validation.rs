//! Validation of series job submissions and uploaded file identifiers.

use std::collections::HashSet;

use crate::error::CoreError;

/// Validate a single identifier that ends up in a filesystem path or a
/// remote job name.
///
/// Rejects empty values, path separators, and the `.`/`..` path segments.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    if trimmed != value {
        return Err(CoreError::Validation(format!(
            "{field} must not have leading or trailing whitespace"
        )));
    }
    if value.contains('/') || value.contains('\\') {
        return Err(CoreError::Validation(format!(
            "{field} must not contain path separators, got: '{value}'"
        )));
    }
    if value == "." || value == ".." {
        return Err(CoreError::Validation(format!(
            "{field} must not be a relative path segment, got: '{value}'"
        )));
    }
    Ok(())
}

/// Validate the fields of a series job submission.
///
/// `sop_instance_uids` must be non-empty and free of duplicates; every
/// identifier must pass [`validate_identifier`].
pub fn validate_submission(
    study_instance_uid: &str,
    series_instance_uid: &str,
    sop_instance_uids: &[String],
    pipeline_id: &str,
) -> Result<(), CoreError> {
    validate_identifier("studyInstanceUid", study_instance_uid)?;
    validate_identifier("seriesInstanceUid", series_instance_uid)?;
    validate_identifier("pipelineId", pipeline_id)?;

    if sop_instance_uids.is_empty() {
        return Err(CoreError::Validation(
            "sopInstanceUids must contain at least one id".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(sop_instance_uids.len());
    for uid in sop_instance_uids {
        validate_identifier("sopInstanceUid", uid)?;
        if !seen.insert(uid.as_str()) {
            return Err(CoreError::Validation(format!(
                "sopInstanceUids contains duplicate id '{uid}'"
            )));
        }
    }
    Ok(())
}
