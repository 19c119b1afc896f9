use std::{collections::HashMap, fs::File, path::PathBuf};

use anyhow::{Context, Result, bail};
use lineage_core::config::SectionConfig;

const DEFAULT_CONFIG_FILE: &str = "/var/lib/lineage/lineage.ini";

/// Lineage configuration, one [`SectionConfig`] per section.
///
/// It is backed by an `INI` file from which parses the data on its creation.
#[derive(Debug, Clone)]
pub struct LineageConfig {
    config_file: PathBuf,
    sections: HashMap<String, SectionConfig>,
}

impl LineageConfig {
    /// Load the custom file if given, the default one otherwise.
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        match config_file {
            Some(config_file) => Self::with_custom_file(config_file),
            None => Self::new(),
        }
    }

    /// Construct a new [`LineageConfig`] using the default file, created
    /// empty if missing.
    pub fn new() -> Result<Self> {
        let config_file = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            if let Some(prefix) = config_file.parent() {
                std::fs::create_dir_all(prefix)
                    .with_context(|| format!("Error creating {}", prefix.display()))?;
            }
            File::create(&config_file)
                .with_context(|| format!("Error creating {}", config_file.display()))?;
        }
        Self::from_config_file(config_file)
    }

    /// Construct a new [`LineageConfig`] using a custom file.
    pub fn with_custom_file(config_file: &str) -> Result<Self> {
        let config_file = PathBuf::from(config_file);
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: PathBuf) -> Result<Self> {
        let mut sections: HashMap<String, SectionConfig> = HashMap::new();

        let conf = ini::Ini::load_from_file(&config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;

        for (section, prop) in &conf {
            if let Some(section) = section {
                let section_config = sections.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    section_config.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Self {
            config_file,
            sections,
        })
    }

    pub fn config_file(&self) -> &PathBuf {
        &self.config_file
    }

    /// Get a section. A missing section is empty, so every field takes its
    /// default value.
    pub fn get_section(&self, section: &str) -> SectionConfig {
        self.sections.get(section).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use lineage_core::{file::FileCacheConfig, process_tree::ProcessTreeConfig};

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), content).unwrap();
        file
    }

    #[test]
    fn load_sections() {
        let file = write_config(
            "[file_cache]\ncount_limit=100\nttl_secs=60\n\n[process_tree]\nclients=notify\n",
        );
        let config = LineageConfig::with_custom_file(file.path().to_str().unwrap()).unwrap();

        let file_cache = FileCacheConfig::try_from(&config.get_section("file_cache")).unwrap();
        assert_eq!(file_cache.count_limit, 100);
        assert_eq!(file_cache.ttl.as_secs(), 60);

        let tree = config.get_section("process_tree");
        assert_eq!(tree.get_raw("clients"), Some("notify"));
        assert_eq!(config.config_file(), file.path());
    }

    #[test]
    fn missing_section_uses_defaults() {
        let file = write_config("");
        let config = LineageConfig::load(file.path().to_str()).unwrap();
        let tree = ProcessTreeConfig::try_from(&config.get_section("process_tree")).unwrap();
        assert_eq!(tree, ProcessTreeConfig::default());
    }

    #[test]
    fn missing_custom_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.ini");
        let err = LineageConfig::with_custom_file(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
