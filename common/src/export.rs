//! Output file naming and score arithmetic.

use crate::DEFAULT_POINTS_POSSIBLE;
use std::path::Path;

/// Keep alphanumerics, spaces, periods and underscores; drop trailing whitespace.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_'))
        .collect();
    kept.trim_end().to_string()
}

/// Points possible, or 100 when the assignment has none (or zero).
#[must_use]
pub fn effective_points(points_possible: Option<f64>) -> f64 {
    match points_possible {
        Some(points) if points != 0.0 && points.is_finite() => points,
        _ => DEFAULT_POINTS_POSSIBLE,
    }
}

/// Score as a percentage of the points possible, rounded to one decimal place
/// with ties going to the even digit (`87.25` → `87.2`).
#[must_use]
pub fn percent_score(score: f64, points_possible: Option<f64>) -> f64 {
    let percent = score / effective_points(points_possible) * 100.0;
    (percent * 10.0).round_ties_even() / 10.0
}

/// Whole numbers keep one decimal (`80.0`); anything else prints as-is (`33.3`).
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// The final extension of `filename` with its dot, or an empty string.
/// Dotfiles such as `.bashrc` have no extension.
#[must_use]
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// File names for everything exported from one selected submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNames {
    base: String,
}

impl ExportNames {
    #[must_use]
    pub fn new(assignment_name: &str, percent: f64) -> Self {
        ExportNames {
            base: format!(
                "{}_{}",
                sanitize_filename(assignment_name),
                format_number(percent)
            ),
        }
    }

    /// `{assignment}_{percent}{ext}`
    #[must_use]
    pub fn primary(&self, original_filename: &str) -> String {
        format!("{}{}", self.base, extension_of(original_filename))
    }

    /// `{assignment}_{percent}.txt`
    #[must_use]
    pub fn comments(&self) -> String {
        format!("{}.txt", self.base)
    }

    /// `{assignment}_{percent}_comment{index}{ext}`, with `index` counted from 1.
    #[must_use]
    pub fn comment_attachment(&self, index: usize, original_filename: &str) -> String {
        format!(
            "{}_comment{index}{}",
            self.base,
            extension_of(original_filename)
        )
    }
}
