use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::job::{CollectionJob, Priority};
use crate::ConfigError;

/// One line of the static priority catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub make: String,
    #[serde(default)]
    pub model: Option<String>,
    pub tier: u8,
    #[serde(default)]
    pub year_from: Option<u16>,
    #[serde(default)]
    pub year_to: Option<u16>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CatalogEntry {
    /// Converts the entry into a job at its catalog tier. A missing
    /// `year_to` falls back to `default_year_to`, then to next model year.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the entry does not describe a
    /// valid job.
    pub fn to_job(&self, default_year_to: Option<u16>) -> Result<CollectionJob, ConfigError> {
        CollectionJob::with_default_years(
            &self.make,
            self.model.as_deref(),
            self.year_from,
            self.year_to.or(default_year_to),
            Priority(self.tier),
        )
        .map_err(|e| ConfigError::Validation(format!("catalog entry '{}': {e}", self.make)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    /// Upper model year for entries without their own `year_to`. Pinning it
    /// keeps job ids, and the checkpoints they own, stable across New Year.
    #[serde(default)]
    pub default_year_to: Option<u16>,
    pub makes: Vec<CatalogEntry>,
}

impl Catalog {
    /// Parses and validates catalog YAML.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the YAML cannot be parsed or fails validation.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let catalog: Catalog = serde_yaml::from_str(content)?;
        validate_catalog(&catalog)?;
        Ok(catalog)
    }

    /// All catalog entries as jobs, in file order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any entry is invalid.
    pub fn jobs(&self) -> Result<Vec<CollectionJob>, ConfigError> {
        self.makes
            .iter()
            .map(|entry| entry.to_job(self.default_year_to))
            .collect()
    }
}

/// Load and validate the priority catalog from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_catalog(path: &Path) -> Result<Catalog, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::CatalogFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    Catalog::from_yaml_str(&content)
}

fn validate_catalog(catalog: &Catalog) -> Result<(), ConfigError> {
    let mut seen_ids = HashSet::new();

    for entry in &catalog.makes {
        if entry.make.trim().is_empty() {
            return Err(ConfigError::Validation(
                "catalog make must be non-empty".to_string(),
            ));
        }

        if ![1, 2, 3].contains(&entry.tier) {
            return Err(ConfigError::Validation(format!(
                "catalog entry '{}' has invalid tier {}; must be 1, 2, or 3",
                entry.make, entry.tier
            )));
        }

        let job = entry.to_job(catalog.default_year_to)?;
        if !seen_ids.insert(job.id.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate catalog entry: '{}'",
                job.id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
makes:
  - make: Porsche
    tier: 1
  - make: Toyota
    model: Camry
    tier: 2
    year_from: 2010
    year_to: 2024
  - make: Saab
    tier: 3
    notes: long tail
";

    #[test]
    fn parses_sample_catalog() {
        let catalog = Catalog::from_yaml_str(SAMPLE).expect("valid catalog");
        assert_eq!(catalog.makes.len(), 3);

        let jobs = catalog.jobs().unwrap();
        assert_eq!(jobs[0].priority, Priority::LUXURY);
        assert_eq!(jobs[1].id.as_str(), "toyota:camry:2010-2024");
        assert_eq!(jobs[2].priority, Priority::CATALOG);
    }

    #[test]
    fn pinned_default_year_to_applies_to_open_entries() {
        let yaml = "default_year_to: 2026\nmakes:\n  - make: Porsche\n    tier: 1\n  - make: Kia\n    tier: 3\n    year_to: 2011\n";
        let jobs = Catalog::from_yaml_str(yaml).unwrap().jobs().unwrap();
        assert_eq!(jobs[0].id.as_str(), "porsche:*:1990-2026");
        assert_eq!(jobs[1].id.as_str(), "kia:*:1990-2011");
    }

    #[test]
    fn rejects_invalid_tier() {
        let yaml = "makes:\n  - make: Ford\n    tier: 0\n";
        let err = Catalog::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("invalid tier 0"));
    }

    #[test]
    fn rejects_empty_make() {
        let yaml = "makes:\n  - make: '  '\n    tier: 2\n";
        let err = Catalog::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("non-empty"));
    }

    #[test]
    fn rejects_duplicate_entries_case_insensitively() {
        let yaml = "makes:\n  - make: BMW\n    tier: 1\n  - make: bmw\n    tier: 2\n";
        let err = Catalog::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate catalog entry"));
    }

    #[test]
    fn same_make_with_different_models_is_allowed() {
        let yaml = "makes:\n  - make: Ford\n    model: F-150\n    tier: 2\n  - make: Ford\n    model: Mustang\n    tier: 2\n";
        let catalog = Catalog::from_yaml_str(yaml).unwrap();
        assert_eq!(catalog.jobs().unwrap().len(), 2);
    }

    #[test]
    fn rejects_inverted_years() {
        let yaml = "makes:\n  - make: Kia\n    tier: 3\n    year_from: 2020\n    year_to: 2010\n";
        let err = Catalog::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("after year_to"));
    }

    #[test]
    fn load_catalog_reports_missing_file() {
        let err = load_catalog(Path::new("/nonexistent/catalog.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::CatalogFileIo { .. }));
    }
}
