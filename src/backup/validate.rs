//! Validation functions for configuration values.
//!
//! Provides custom validation functions for job names, endpoints and
//! staging directories.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

use std::path::Path;

pub fn validate_job_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.is_empty() {
        return Err(ValidationError::new("InvalidJobName")
            .with_message("Job name must not be empty".into()));
    }

    // Job names become staging file name prefixes.
    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidJobName").with_message(
            format!("Invalid job name, try sanitizing like {:?}", sanitize(name)).into(),
        ));
    }

    Ok(())
}

pub fn validate_endpoint<S: AsRef<str>>(endpoint: S) -> Result<(), ValidationError> {
    if endpoint.as_ref().is_empty() {
        return Err(ValidationError::new("InvalidEndpoint")
            .with_message("Endpoint must not be empty".into()));
    }

    Ok(())
}

pub fn validate_writable_dir<P: AsRef<Path>>(dir: P) -> Result<(), ValidationError> {
    let dir = dir.as_ref();
    if dir.exists() {
        if !dir.is_dir() {
            return Err(ValidationError::new("InvalidDirectory")
                .with_message(format!("{:?} is not a directory", dir).into()));
        }
    } else {
        std::fs::create_dir_all(dir).map_err(|e| {
            ValidationError::new("InvalidDirectory").with_message(
                format!("cannot create or access staging dir path {:?}: {}", dir, e).into(),
            )
        })?;
    }
    let md = std::fs::metadata(dir).map_err(|e| {
        ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot access metadata for {:?}: {}", dir, e).into())
    })?;
    if md.permissions().readonly() {
        Err(ValidationError::new("InvalidDirectory")
            .with_message(format!("cannot write to dir {:?}", dir).into()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_job_name_accepts_plain_names() {
        assert!(validate_job_name("photos").is_ok());
        assert!(validate_job_name("nightly-docs_2").is_ok());
    }

    #[test]
    fn test_validate_job_name_rejects_empty() {
        assert!(validate_job_name("").is_err());
    }

    #[test]
    fn test_validate_job_name_rejects_path_separators() {
        assert!(validate_job_name("a/b").is_err());
    }

    #[test]
    fn test_validate_endpoint_rejects_empty() {
        assert!(validate_endpoint("").is_err());
        assert!(validate_endpoint("host:/srv/backup").is_ok());
    }

    #[test]
    fn test_validate_writable_dir_creates_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("staging");
        assert!(validate_writable_dir(&target).is_ok());
        assert!(target.is_dir());
    }
}
