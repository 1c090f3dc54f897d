use crate::backup::job::JobSpec;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::validate::validate_writable_dir;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use validator::{Validate, ValidationError};

/// Program names for the external tools, overridable per role.
///
/// The argv shape is fixed per role (rsync-class flags for transfer,
/// tar-class for bundling, and so on); only the binary is configurable,
/// which also lets tests substitute stand-ins.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolsConfig {
    #[serde(default = "default_transfer")]
    pub transfer: Arc<str>,
    #[serde(default = "default_archiver")]
    pub archiver: Arc<str>,
    #[serde(default = "default_compressor")]
    pub compressor: Arc<str>,
    #[serde(default = "default_encryptor")]
    pub encryptor: Arc<str>,
    /// GPG home directory to use when encrypting/decrypting. None uses
    /// the machine default (typically ~/.gnupg).
    pub gpg_home: Option<Arc<Path>>,
}

fn default_transfer() -> Arc<str> {
    "rsync".into()
}

fn default_archiver() -> Arc<str> {
    "tar".into()
}

fn default_compressor() -> Arc<str> {
    "xz".into()
}

fn default_encryptor() -> Arc<str> {
    "gpg".into()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            transfer: default_transfer(),
            archiver: default_archiver(),
            compressor: default_compressor(),
            encryptor: default_encryptor(),
            gpg_home: None,
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackupConfig {
    #[validate(
        nested,
        custom(function = validate_unique_job_names),
        length(min = 1, message = "at least one job is required")
    )]
    pub jobs: Vec<JobSpec>,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Maximum number of jobs running at once. 1 means fully sequential.
    #[serde(default = "default_concurrency")]
    #[validate(range(min = 1))]
    pub concurrency: usize,
    /// Where staged intermediate artifacts live. Defaults to a run-scoped
    /// directory under the system temp location.
    #[validate(custom(function = validate_writable_dir))]
    pub staging_dir: Option<Arc<Path>>,
}

fn default_concurrency() -> usize {
    1
}

fn validate_unique_job_names(jobs: &Vec<JobSpec>) -> std::result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    let duplicates = jobs
        .iter()
        .map(|j| j.name().as_ref())
        .filter(|name| !seen.insert(*name))
        .unique()
        .collect_vec();
    if !duplicates.is_empty() {
        return Err(ValidationError::new("DuplicateJobName")
            .with_message(format!("Duplicate job names: {duplicates:?}").into()));
    }

    Ok(())
}

impl BackupConfig {
    /// Selects the jobs to run, in input order. An unknown name in the
    /// filter is a configuration error rather than a silent no-op.
    pub fn select_jobs(&self, filter: &[String]) -> Result<Vec<&JobSpec>> {
        if filter.is_empty() {
            return Ok(self.jobs.iter().collect());
        }
        for name in filter {
            if !self.jobs.iter().any(|j| j.name().as_ref() == name) {
                return Err(Error::config(format!("no job named {name:?} in config")));
            }
        }
        Ok(self
            .jobs
            .iter()
            .filter(|j| filter.iter().any(|name| j.name().as_ref() == name))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::job::Direction;

    fn config_yaml() -> &'static str {
        "
jobs:
  - name: photos
    src: /home/me/photos
    dest: nas:/srv/backup/
    direction: push
    bundle: true
    compress: true
  - name: docs
    src: nas:/srv/backup/docs.tar
    dest: /home/me/docs
    direction: pull
    bundle: true
"
    }

    #[test]
    fn test_config_from_yaml() {
        let config: BackupConfig = serde_yml::from_str(config_yaml()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.tools.transfer.as_ref(), "rsync");
        assert_eq!(config.tools.encryptor.as_ref(), "gpg");
        assert!(config.staging_dir.is_none());
    }

    #[test]
    fn test_duplicate_job_names_fail_validation() {
        let yaml = "
jobs:
  - name: same
    src: /a
    dest: /b
    direction: push
  - name: same
    src: /c
    dest: /d
    direction: push
";
        let config: BackupConfig = serde_yml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_job_list_fails_validation() {
        let config: BackupConfig = serde_yml::from_str("jobs: []").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tool_overrides() {
        let yaml = "
jobs:
  - name: j
    src: /a
    dest: /b
    direction: push
tools:
  transfer: rclone
  gpg_home: /var/lib/backup/gnupg
";
        let config: BackupConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.tools.transfer.as_ref(), "rclone");
        assert_eq!(config.tools.archiver.as_ref(), "tar");
        assert_eq!(
            config.tools.gpg_home.as_deref(),
            Some(Path::new("/var/lib/backup/gnupg"))
        );
    }

    #[test]
    fn test_select_jobs_keeps_input_order() {
        let config: BackupConfig = serde_yml::from_str(config_yaml()).unwrap();
        let all = config.select_jobs(&[]).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name().as_ref(), "photos");

        let filtered = config.select_jobs(&["docs".to_string()]).unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name().as_ref(), "docs");
        assert_eq!(*filtered[0].direction(), Direction::Pull);
    }

    #[test]
    fn test_select_jobs_unknown_name_errors() {
        let config: BackupConfig = serde_yml::from_str(config_yaml()).unwrap();
        assert!(matches!(
            config.select_jobs(&["nope".to_string()]),
            Err(Error::Configuration(_))
        ));
    }
}
