//! Grading comments: one lookup sequence, one text rendering.

use crate::canvas_api::CourseApi;
use crate::export::format_number;
use crate::{Comment, Submission};
use chrono::SecondsFormat;
use log::debug;
use std::fmt::{self, Write};

const HEADER_RULE_WIDTH: usize = 50;
const COMMENT_RULE_WIDTH: usize = 30;

/// What we learned about a submission's comments.
#[derive(Debug, Clone, PartialEq)]
pub enum CommentLookup {
    Found(Vec<Comment>),
    Empty,
    RetrievalFailed(String),
}

impl CommentLookup {
    /// Use the comments that came with the submission listing, and only if
    /// there are none ask the server for the submission again with comments.
    pub fn resolve<A: CourseApi + ?Sized>(
        api: &A,
        course_id: u64,
        assignment_id: u64,
        submission: &Submission,
    ) -> Self {
        if !submission.submission_comments.is_empty() {
            return CommentLookup::Found(submission.submission_comments.clone());
        }
        debug!(
            "No inline comments on submission {}, fetching it again",
            submission.id
        );
        match api.submission_with_comments(course_id, assignment_id, submission.user_id) {
            Ok(fetched) if fetched.submission_comments.is_empty() => CommentLookup::Empty,
            Ok(fetched) => CommentLookup::Found(fetched.submission_comments),
            Err(e) => CommentLookup::RetrievalFailed(e.to_string()),
        }
    }

    /// The comments found, or an empty slice.
    #[must_use]
    pub fn comments(&self) -> &[Comment] {
        match self {
            CommentLookup::Found(comments) => comments,
            CommentLookup::Empty | CommentLookup::RetrievalFailed(_) => &[],
        }
    }
}

/// Identifying lines at the top of every comment file.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentHeader<'a> {
    pub assignment_name: &'a str,
    pub score: f64,
    pub points_possible: f64,
    pub percent: f64,
    pub submission_id: u64,
}

/// Write the comment file for one exported submission.
///
/// # Errors
/// Only fails if the underlying writer does.
pub fn write_comment_file<W: Write>(
    out: &mut W,
    header: &CommentHeader,
    lookup: &CommentLookup,
) -> fmt::Result {
    writeln!(out, "Assignment: {}", header.assignment_name)?;
    writeln!(
        out,
        "Student Score: {}/{} ({}%)",
        format_number(header.score),
        format_number(header.points_possible),
        format_number(header.percent)
    )?;
    writeln!(out, "Submission ID: {}", header.submission_id)?;
    writeln!(out, "{}\n", "=".repeat(HEADER_RULE_WIDTH))?;

    match lookup {
        CommentLookup::Found(comments) => {
            for (i, comment) in comments.iter().enumerate() {
                let date = comment.created_at.map_or_else(
                    || "Unknown".to_string(),
                    |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
                );
                writeln!(out, "Comment {}:", i + 1)?;
                writeln!(
                    out,
                    "Author: {}",
                    comment.author_name.as_deref().unwrap_or("Unknown")
                )?;
                writeln!(out, "Date: {date}")?;
                writeln!(
                    out,
                    "Comment: {}",
                    comment.comment.as_deref().unwrap_or("No comment text")
                )?;
                writeln!(out, "{}\n", "-".repeat(COMMENT_RULE_WIDTH))?;
            }
            Ok(())
        }
        CommentLookup::Empty => writeln!(out, "No comments found for this submission."),
        CommentLookup::RetrievalFailed(reason) => {
            writeln!(out, "Error retrieving comments: {reason}")
        }
    }
}

/// Render the comment file for one exported submission as a string.
#[must_use]
pub fn render_comment_file(header: &CommentHeader, lookup: &CommentLookup) -> String {
    let mut out = String::new();
    // a String sink never errors
    let _ = write_comment_file(&mut out, header, lookup);
    out
}
