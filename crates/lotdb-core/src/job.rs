//! Collection job descriptors and the identifiers derived from them.

use std::fmt;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Earliest model year collected when a job does not specify one.
pub const DEFAULT_YEAR_FROM: u16 = 1990;

const MIN_YEAR: u16 = 1900;
const MAX_YEAR: u16 = 2100;

/// Queue priority tier. Lower values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Virtual tier above every catalog tier, reserved for operator triggers.
    pub const URGENT: Priority = Priority(0);
    pub const LUXURY: Priority = Priority(1);
    pub const MAINSTREAM: Priority = Priority(2);
    pub const CATALOG: Priority = Priority(3);

    #[must_use]
    pub fn is_urgent(self) -> bool {
        self == Self::URGENT
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable job identifier: `{make}:{model|*}:{year_from}-{year_to}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checkpoint key: `{make}:{model|*}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// Builds the key for a make and optional model.
    #[must_use]
    pub fn new(make: &str, model: Option<&str>) -> Self {
        let model = model.map_or_else(|| "*".to_string(), slugify);
        Self(format!("{}:{model}", slugify(make)))
    }

    /// Wraps a key that was previously produced by [`ScopeKey::new`], e.g.
    /// one read back from the checkpoint table.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The make portion of the key.
    #[must_use]
    pub fn make_slug(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of backlog work: collect sales for a make (optionally a single
/// model) within an inclusive model-year range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionJob {
    pub id: JobId,
    pub make: String,
    pub model: Option<String>,
    pub year_from: u16,
    pub year_to: u16,
    pub priority: Priority,
}

impl CollectionJob {
    /// Builds a validated job.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidJob`] if the make is blank, the model is
    /// present but blank, or the year range is inverted or out of bounds.
    pub fn new(
        make: &str,
        model: Option<&str>,
        year_from: u16,
        year_to: u16,
        priority: Priority,
    ) -> Result<Self, CoreError> {
        let make = make.trim();
        if make.is_empty() || slugify(make).is_empty() {
            return Err(CoreError::InvalidJob("make must be non-empty".to_string()));
        }

        let model = match model.map(str::trim) {
            Some(m) if m.is_empty() || slugify(m).is_empty() => {
                return Err(CoreError::InvalidJob(format!(
                    "model for make '{make}' must be non-empty when given"
                )));
            }
            other => other,
        };

        if !(MIN_YEAR..=MAX_YEAR).contains(&year_from) || !(MIN_YEAR..=MAX_YEAR).contains(&year_to)
        {
            return Err(CoreError::InvalidJob(format!(
                "years must be within {MIN_YEAR}..={MAX_YEAR}, got {year_from}-{year_to}"
            )));
        }
        if year_from > year_to {
            return Err(CoreError::InvalidJob(format!(
                "year_from {year_from} is after year_to {year_to}"
            )));
        }

        let model_part = model.map_or_else(|| "*".to_string(), slugify);
        let id = JobId(format!(
            "{}:{model_part}:{year_from}-{year_to}",
            slugify(make)
        ));

        Ok(Self {
            id,
            make: make.to_string(),
            model: model.map(ToOwned::to_owned),
            year_from,
            year_to,
            priority,
        })
    }

    /// Builds a job from optional year bounds, filling in the defaults
    /// ([`DEFAULT_YEAR_FROM`] through next model year).
    ///
    /// # Errors
    ///
    /// See [`CollectionJob::new`].
    pub fn with_default_years(
        make: &str,
        model: Option<&str>,
        year_from: Option<u16>,
        year_to: Option<u16>,
        priority: Priority,
    ) -> Result<Self, CoreError> {
        Self::new(
            make,
            model,
            year_from.unwrap_or(DEFAULT_YEAR_FROM),
            year_to.unwrap_or_else(default_year_to),
            priority,
        )
    }

    #[must_use]
    pub fn scope_key(&self) -> ScopeKey {
        ScopeKey::new(&self.make, self.model.as_deref())
    }

    /// True when both jobs cover the same model years, so a cursor written by
    /// one is valid for the other.
    #[must_use]
    pub fn same_years(&self, other: &CollectionJob) -> bool {
        self.year_from == other.year_from && self.year_to == other.year_to
    }

    /// Returns the same job in another priority tier. The id is unchanged.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Human-readable label, e.g. `Toyota Camry 2010-2024`.
    #[must_use]
    pub fn label(&self) -> String {
        match &self.model {
            Some(model) => format!(
                "{} {model} {}-{}",
                self.make, self.year_from, self.year_to
            ),
            None => format!("{} {}-{}", self.make, self.year_from, self.year_to),
        }
    }
}

/// Next model year, the default upper bound for a job.
#[must_use]
pub fn default_year_to() -> u16 {
    let next = Utc::now().year() + 1;
    u16::try_from(next).unwrap_or(MAX_YEAR).min(MAX_YEAR)
}

/// Lowercases and reduces a name to `[a-z0-9-]`, collapsing separators.
#[must_use]
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else if c == ' ' || c == '_' || c == '/' {
                '-'
            } else {
                '\0'
            }
        })
        .filter(|&c| c != '\0')
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_includes_make_model_and_years() {
        let job = CollectionJob::new("Toyota", Some("Camry"), 2010, 2024, Priority::MAINSTREAM)
            .expect("valid job");
        assert_eq!(job.id.as_str(), "toyota:camry:2010-2024");
        assert_eq!(job.scope_key().as_str(), "toyota:camry");
    }

    #[test]
    fn job_without_model_uses_wildcard_scope() {
        let job = CollectionJob::new("Land Rover", None, 2000, 2020, Priority::LUXURY)
            .expect("valid job");
        assert_eq!(job.id.as_str(), "land-rover:*:2000-2020");
        assert_eq!(job.scope_key().as_str(), "land-rover:*");
        assert_eq!(job.scope_key().make_slug(), "land-rover");
    }

    #[test]
    fn same_make_different_case_yields_same_id() {
        let a = CollectionJob::new("BMW", None, 2000, 2020, Priority::LUXURY).unwrap();
        let b = CollectionJob::new("  bmw ", None, 2000, 2020, Priority::URGENT).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.make, "bmw");
    }

    #[test]
    fn rejects_blank_make() {
        let err = CollectionJob::new("   ", None, 2000, 2020, Priority::LUXURY).unwrap_err();
        assert!(err.to_string().contains("make must be non-empty"));
    }

    #[test]
    fn rejects_blank_model() {
        let err = CollectionJob::new("Ford", Some(" "), 2000, 2020, Priority::LUXURY).unwrap_err();
        assert!(err.to_string().contains("model"));
    }

    #[test]
    fn rejects_inverted_year_range() {
        let err = CollectionJob::new("Ford", None, 2020, 2010, Priority::LUXURY).unwrap_err();
        assert!(err.to_string().contains("after year_to"));
    }

    #[test]
    fn default_years_span_to_next_model_year() {
        let job =
            CollectionJob::with_default_years("Honda", None, None, None, Priority::MAINSTREAM)
                .unwrap();
        assert_eq!(job.year_from, DEFAULT_YEAR_FROM);
        assert_eq!(job.year_to, default_year_to());
    }

    #[test]
    fn with_priority_keeps_id() {
        let job = CollectionJob::new("Audi", None, 2000, 2020, Priority::LUXURY).unwrap();
        let urgent = job.clone().with_priority(Priority::URGENT);
        assert_eq!(job.id, urgent.id);
        assert!(urgent.priority.is_urgent());
    }

    #[test]
    fn same_scope_with_other_years_is_not_interchangeable() {
        let narrow = CollectionJob::new("Toyota", None, 2010, 2024, Priority::LUXURY).unwrap();
        let wide = CollectionJob::new("Toyota", None, 1990, 2027, Priority::URGENT).unwrap();
        assert_eq!(narrow.scope_key(), wide.scope_key());
        assert!(!narrow.same_years(&wide));
        assert!(narrow.same_years(&narrow.clone().with_priority(Priority::URGENT)));
    }

    #[test]
    fn slugify_handles_punctuation() {
        assert_eq!(slugify("Mercedes-Benz"), "mercedes-benz");
        assert_eq!(slugify("Rolls  Royce"), "rolls-royce");
        assert_eq!(slugify("Citroën"), "citron");
        assert_eq!(slugify("F-150/Raptor"), "f-150-raptor");
    }

    #[test]
    fn label_reads_naturally() {
        let job = CollectionJob::new("Toyota", Some("Camry"), 2010, 2024, Priority::MAINSTREAM)
            .unwrap();
        assert_eq!(job.label(), "Toyota Camry 2010-2024");
    }
}
