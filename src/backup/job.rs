use crate::backup::validate::{validate_endpoint, validate_job_name};
use bon::Builder;
use derive_more::{Deref, Display};
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::sync::Arc;
use validator::{Validate, ValidationError};

/// An opaque local-or-remote location string, used verbatim by the
/// transfer stage.
///
/// Remote-shell (`host:/path`), daemon (`rsync://host/module`) and plain
/// path syntaxes all pass through unparsed, so whatever addressing the
/// transfer tool understands works here.
#[derive(Clone, Debug, Display, Deref, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(Arc<str>);

impl Endpoint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Endpoint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Endpoint(value.into())
    }
}

impl From<String> for Endpoint {
    fn from(value: String) -> Self {
        Endpoint(value.into())
    }
}

impl From<Arc<str>> for Endpoint {
    fn from(value: Arc<str>) -> Self {
        Endpoint(value)
    }
}

/// Which side of the transfer the pipeline executes on.
///
/// Push runs where the data originates (process locally, then transfer);
/// pull runs where the data lands (transfer, then process locally).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Push,
    Pull,
}

/// One named backup job.
///
/// `src` and `dest` are never interpreted by this crate beyond handing
/// them to the external tools. The three processing flags toggle
/// independent pipeline stages; `compress`/`encrypt` without `bundle`
/// apply to the raw artifact stream rather than erroring.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
#[validate(schema(function = validate_job_schema))]
pub struct JobSpec {
    #[validate(custom(function = validate_job_name))]
    #[builder(into)]
    name: Arc<str>,
    #[validate(custom(function = validate_endpoint))]
    #[builder(into)]
    src: Endpoint,
    #[validate(custom(function = validate_endpoint))]
    #[builder(into)]
    dest: Endpoint,
    direction: Direction,
    #[serde(default)]
    #[builder(default)]
    bundle: bool,
    #[serde(default)]
    #[builder(default)]
    compress: bool,
    #[serde(default)]
    #[builder(default)]
    encrypt: bool,
    #[builder(into)]
    recipient: Option<Arc<str>>,
    #[serde(default)]
    #[builder(default)]
    exclude: Vec<String>,
}

fn validate_job_schema(job: &JobSpec) -> Result<(), ValidationError> {
    if job.encrypt && job.recipient.is_none() {
        return Err(ValidationError::new("MissingRecipient")
            .with_message("encrypt requires a recipient key reference".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_from_yaml_defaults() {
        let yaml = "
name: photos
src: /home/me/photos
dest: nas:/srv/backup/
direction: push
";
        let job: JobSpec = serde_yml::from_str(yaml).unwrap();
        assert_eq!(job.name().as_ref(), "photos");
        assert_eq!(job.src().as_str(), "/home/me/photos");
        assert!(!*job.bundle());
        assert!(!*job.compress());
        assert!(!*job.encrypt());
        assert!(job.recipient().is_none());
        assert!(job.exclude().is_empty());
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_job_spec_missing_direction_fails_deserialization() {
        let yaml = "
name: photos
src: /home/me/photos
dest: nas:/srv/backup/
";
        assert!(serde_yml::from_str::<JobSpec>(yaml).is_err());
    }

    #[test]
    fn test_job_spec_unknown_field_rejected() {
        let yaml = "
name: photos
src: a
dest: b
direction: push
archive: yes
";
        assert!(serde_yml::from_str::<JobSpec>(yaml).is_err());
    }

    #[test]
    fn test_encrypt_without_recipient_fails_validation() {
        let job = JobSpec::builder()
            .name("secrets")
            .src("/etc")
            .dest("nas:/srv/backup/")
            .direction(Direction::Push)
            .encrypt(true)
            .build();
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_encrypt_with_recipient_validates() {
        let job = JobSpec::builder()
            .name("secrets")
            .src("/etc")
            .dest("nas:/srv/backup/")
            .direction(Direction::Push)
            .encrypt(true)
            .recipient("backup@example.org")
            .build();
        assert!(job.validate().is_ok());
    }

    #[test]
    fn test_empty_endpoint_fails_validation() {
        let job = JobSpec::builder()
            .name("photos")
            .src("")
            .dest("nas:/srv/backup/")
            .direction(Direction::Push)
            .build();
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_endpoint_is_not_parsed() {
        let remote = Endpoint::from("rsync://host:873/module/path with spaces");
        assert_eq!(remote.as_str(), "rsync://host:873/module/path with spaces");
    }
}
