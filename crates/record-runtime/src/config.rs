use crate::{CreationFlags, InitHardwareFlags, RECORD_DESCRIPTION_LENGTH};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Runtime options, normally read from a YAML file.
///
/// ```yaml
/// allow_record_replacement: false
/// delete_broken_records: true
/// abort_on_fault: false
/// default_precision: 4
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct RuntimeConfig {
    #[serde(default)]
    pub allow_record_replacement: bool,
    #[serde(default)]
    pub delete_broken_records: bool,
    #[serde(default)]
    pub trace_opens: bool,
    #[serde(default)]
    pub abort_on_fault: bool,
    #[serde(default = "default_precision")]
    pub default_precision: i64,
    #[serde(default = "default_max_description_length")]
    pub max_description_length: usize,
}

fn default_precision() -> i64 {
    4
}

fn default_max_description_length() -> usize {
    RECORD_DESCRIPTION_LENGTH
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            allow_record_replacement: false,
            delete_broken_records: false,
            trace_opens: false,
            abort_on_fault: false,
            default_precision: default_precision(),
            max_description_length: default_max_description_length(),
        }
    }
}

impl RuntimeConfig {
    pub fn creation_flags(&self) -> CreationFlags {
        let mut flags = CreationFlags::empty();
        if self.allow_record_replacement {
            flags |= CreationFlags::ALLOW_RECORD_REPLACEMENT;
        }
        if self.delete_broken_records {
            flags |= CreationFlags::DELETE_BROKEN_RECORDS;
        }
        flags
    }

    pub fn init_hardware_flags(&self) -> InitHardwareFlags {
        let mut flags = InitHardwareFlags::empty();
        if self.trace_opens {
            flags |= InitHardwareFlags::TRACE_OPENS;
        }
        if self.abort_on_fault {
            flags |= InitHardwareFlags::ABORT_ON_FAULT;
        }
        flags
    }

    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let config: RuntimeConfig =
            serde_yaml::from_str(raw).context("decoding runtime config")?;
        Ok(config)
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<RuntimeConfig> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading runtime config: {}", path.display()))?;
    let config: RuntimeConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing yaml: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_mapping() {
        let config = RuntimeConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.max_description_length, RECORD_DESCRIPTION_LENGTH);
        assert!(config.creation_flags().is_empty());
    }

    #[test]
    fn test_flags_from_yaml() {
        let config = RuntimeConfig::from_yaml_str(
            "allow_record_replacement: true\ndelete_broken_records: true\nabort_on_fault: true\ndefault_precision: 6\n",
        )
        .unwrap();
        assert_eq!(
            config.creation_flags(),
            CreationFlags::ALLOW_RECORD_REPLACEMENT | CreationFlags::DELETE_BROKEN_RECORDS
        );
        assert_eq!(config.init_hardware_flags(), InitHardwareFlags::ABORT_ON_FAULT);
        assert_eq!(config.default_precision, 6);
    }

    #[test]
    fn test_load_file_reports_path() {
        let dir = std::env::temp_dir().join(format!("record-runtime-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime.yaml");
        fs::write(&path, "trace_opens: true\n").unwrap();
        let config = load_config_file(&path).unwrap();
        assert!(config.trace_opens);

        let missing = dir.join("missing.yaml");
        let err = load_config_file(&missing).unwrap_err();
        assert!(format!("{err}").contains("missing.yaml"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rejects_bad_types() {
        assert!(RuntimeConfig::from_yaml_str("default_precision: lots\n").is_err());
    }
}
