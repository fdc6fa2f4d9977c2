//! Choose representative submissions by score percentile.

use crate::Submission;
use crate::config::PercentileMap;

/// A submission counts toward sampling only with a score and a file.
#[must_use]
pub fn is_gradable(submission: &Submission) -> bool {
    submission.score.is_some() && !submission.attachments.is_empty()
}

/// Gradable submissions, ascending by score. Ties keep retrieval order.
#[must_use]
pub fn gradable_sorted(submissions: &[Submission]) -> Vec<&Submission> {
    let mut gradable: Vec<&Submission> = submissions.iter().filter(|s| is_gradable(s)).collect();
    gradable.sort_by(|a, b| {
        a.score
            .unwrap_or_default()
            .total_cmp(&b.score.unwrap_or_default())
    });
    gradable
}

/// Rank of the submission representing percentile `p` among `count` sorted ones:
/// `clamp(floor(count * p) - 1, 0, count - 1)`. `None` when there is nothing to pick.
#[must_use]
pub fn percentile_index(count: usize, percentile: f64) -> Option<usize> {
    if count == 0 {
        return None;
    }
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let raw = (count as f64 * percentile).floor() as i64 - 1;
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    let index = raw.clamp(0, count as i64 - 1) as usize;
    Some(index)
}

/// One submission chosen for one label.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick<'a> {
    pub label: &'a str,
    pub rank: usize,
    pub submission: &'a Submission,
}

/// The outcome of selecting from an assignment's submissions.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection<'a> {
    /// Fewer gradable submissions than labels; nothing is exported.
    Insufficient { found: usize, required: usize },
    /// One pick per label, in label order. Labels may share a submission.
    Picked(Vec<Pick<'a>>),
}

/// Pick one gradable submission per configured percentile.
#[must_use]
pub fn select<'a>(submissions: &'a [Submission], percentiles: &'a PercentileMap) -> Selection<'a> {
    let sorted = gradable_sorted(submissions);
    if sorted.len() < percentiles.len() {
        return Selection::Insufficient {
            found: sorted.len(),
            required: percentiles.len(),
        };
    }
    let picks = percentiles
        .iter()
        .filter_map(|(label, p)| {
            percentile_index(sorted.len(), p).map(|rank| Pick {
                label,
                rank,
                submission: sorted[rank],
            })
        })
        .collect();
    Selection::Picked(picks)
}
