//! Run configuration, validated once at startup.

use crate::CLIENT_REQUEST_TIMEOUT_SECS;
use crate::sampler::SampleOptions;
use itertools::Itertools;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Settings that must be supplied before anything can run.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequiredField {
    ApiUrl,
    ApiKey,
    CourseId,
    AssignmentNames,
    OutputDir,
}

impl RequiredField {
    /// The command line flag that sets this field.
    #[must_use]
    pub fn flag(self) -> &'static str {
        match self {
            RequiredField::ApiUrl => "--api-url",
            RequiredField::ApiKey => "--api-key",
            RequiredField::CourseId => "--course-id",
            RequiredField::AssignmentNames => "--assignment",
            RequiredField::OutputDir => "--output-dir",
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            RequiredField::ApiUrl => "API URL",
            RequiredField::ApiKey => "API key",
            RequiredField::CourseId => "course ID",
            RequiredField::AssignmentNames => "assignment names",
            RequiredField::OutputDir => "output directory",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required settings: {}", .0.iter().join(", "))]
    MissingFields(Vec<RequiredField>),

    #[error("percentile `{0}` is not in LABEL=VALUE form")]
    MalformedPercentile(String),

    #[error("percentile `{label}` has a non-numeric value `{value}`")]
    PercentileNotANumber { label: String, value: String },

    #[error("percentile `{label}` must be between 0 and 1, got {value}")]
    PercentileOutOfRange { label: String, value: f64 },

    #[error("percentile label `{0}` is used more than once")]
    DuplicateLabel(String),

    #[error("percentile label `{0}` cannot be used as a folder name")]
    InvalidLabel(String),

    #[error("at least one percentile is required")]
    EmptyPercentiles,
}

/// One `LABEL=VALUE` pair as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileEntry {
    pub label: String,
    pub value: f64,
}

impl FromStr for PercentileEntry {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, value) = s
            .split_once('=')
            .ok_or_else(|| ConfigError::MalformedPercentile(s.to_string()))?;
        let label = label.trim().to_string();
        let value = value.trim();
        let value = value
            .parse::<f64>()
            .map_err(|_| ConfigError::PercentileNotANumber {
                label: label.clone(),
                value: value.to_string(),
            })?;
        Ok(PercentileEntry { label, value })
    }
}

/// Ordered label → percentile map. Labels double as output folder names.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileMap(Vec<PercentileEntry>);

impl PercentileMap {
    /// Validate and wrap a list of entries, keeping their order.
    ///
    /// # Errors
    /// Returns an error for an empty list, duplicate or unusable labels,
    /// or values outside `[0, 1]`.
    pub fn new(entries: Vec<PercentileEntry>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::EmptyPercentiles);
        }
        for entry in &entries {
            let label = entry.label.as_str();
            if label.is_empty()
                || label == "."
                || label == ".."
                || label.contains(['/', '\\'])
            {
                return Err(ConfigError::InvalidLabel(entry.label.clone()));
            }
            if !entry.value.is_finite() || !(0.0..=1.0).contains(&entry.value) {
                return Err(ConfigError::PercentileOutOfRange {
                    label: entry.label.clone(),
                    value: entry.value,
                });
            }
        }
        if let Some(dup) = entries.iter().map(|e| e.label.as_str()).duplicates().next() {
            return Err(ConfigError::DuplicateLabel(dup.to_string()));
        }
        Ok(PercentileMap(entries))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(label, value)` in configured order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|e| (e.label.as_str(), e.value))
    }
}

impl Default for PercentileMap {
    fn default() -> Self {
        PercentileMap(vec![
            PercentileEntry {
                label: "Poor".to_string(),
                value: 0.25,
            },
            PercentileEntry {
                label: "Average".to_string(),
                value: 0.50,
            },
            PercentileEntry {
                label: "Good".to_string(),
                value: 0.95,
            },
        ])
    }
}

impl fmt::Display for PercentileMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            self.iter().map(|(label, value)| format!("{label}={value}")).join(", ")
        )
    }
}

/// Settings as collected from the command line and environment, before validation.
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub course_id: Option<u64>,
    pub assignment_names: Vec<String>,
    pub output_root: Option<PathBuf>,
    pub percentiles: Vec<PercentileEntry>,
    pub download_comment_attachments: bool,
    pub timeout_secs: u64,
    pub threads: usize,
}

impl Default for RawConfig {
    fn default() -> Self {
        RawConfig {
            api_url: None,
            api_key: None,
            course_id: None,
            assignment_names: Vec::new(),
            output_root: None,
            percentiles: Vec::new(),
            download_comment_attachments: true,
            timeout_secs: CLIENT_REQUEST_TIMEOUT_SECS,
            threads: 1,
        }
    }
}

/// A complete, validated run configuration.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub api_url: String,
    pub api_key: String,
    pub course_id: u64,
    pub assignment_names: Vec<String>,
    pub output_root: PathBuf,
    pub percentiles: PercentileMap,
    pub download_comment_attachments: bool,
    pub timeout: Duration,
    pub threads: usize,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RawConfig {
    /// Check every required field at once and build the run configuration.
    /// No percentiles means the default `Poor`/`Average`/`Good` map.
    /// Assignment names are trimmed of surrounding whitespace.
    ///
    /// # Errors
    /// Returns `MissingFields` listing every absent setting, or the first
    /// problem found in the percentile map.
    pub fn validate(self) -> Result<SamplerConfig, ConfigError> {
        let api_url = non_blank(self.api_url);
        let api_key = non_blank(self.api_key);
        let course_id = self.course_id.filter(|id| *id != 0);
        let assignment_names: Vec<String> = self
            .assignment_names
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        let output_root = self.output_root.filter(|p| !p.as_os_str().is_empty());

        let mut missing = Vec::new();
        if api_url.is_none() {
            missing.push(RequiredField::ApiUrl);
        }
        if api_key.is_none() {
            missing.push(RequiredField::ApiKey);
        }
        if course_id.is_none() {
            missing.push(RequiredField::CourseId);
        }
        if assignment_names.is_empty() {
            missing.push(RequiredField::AssignmentNames);
        }
        if output_root.is_none() {
            missing.push(RequiredField::OutputDir);
        }

        match (api_url, api_key, course_id, output_root) {
            (Some(api_url), Some(api_key), Some(course_id), Some(output_root))
                if missing.is_empty() =>
            {
                let percentiles = if self.percentiles.is_empty() {
                    PercentileMap::default()
                } else {
                    PercentileMap::new(self.percentiles)?
                };
                Ok(SamplerConfig {
                    api_url,
                    api_key,
                    course_id,
                    assignment_names,
                    output_root,
                    percentiles,
                    download_comment_attachments: self.download_comment_attachments,
                    timeout: Duration::from_secs(self.timeout_secs.max(1)),
                    threads: self.threads.max(1),
                })
            }
            _ => Err(ConfigError::MissingFields(missing)),
        }
    }
}

impl SamplerConfig {
    /// The per-run switches the sampler reads.
    #[must_use]
    pub fn options(&self) -> SampleOptions {
        SampleOptions {
            download_comment_attachments: self.download_comment_attachments,
            threads: self.threads,
        }
    }
}
