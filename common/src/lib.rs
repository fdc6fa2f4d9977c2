//! A library for sampling representative course submissions by score percentile
//! and exporting them, with their grading comments, to disk.

pub mod canvas_api;
pub mod comments;
pub mod config;
pub mod export;
pub mod sampler;
pub mod sampling;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CLIENT_REQUEST_TIMEOUT_SECS: u64 = 60;
/// Page size requested from list endpoints.
pub const PAGE_SIZE: u32 = 100;
/// Denominator used when an assignment has no usable points possible.
pub const DEFAULT_POINTS_POSSIBLE: f64 = 100.0;

/// The account the access token belongs to.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// A course as returned by the server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Course {
    pub id: u64,
    #[serde(default)]
    pub name: String,
}

/// An assignment within a course. Names are not unique.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Assignment {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub points_possible: Option<f64>,
}

/// A file attached to a submission or a comment.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Attachment {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub display_name: String,
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default, rename = "content-type")]
    pub content_type: Option<String>,
}

/// A grading comment left on a submission.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Comment {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// One student's submission for an assignment.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Submission {
    pub id: u64,
    pub user_id: u64,
    #[serde(default)]
    pub assignment_id: u64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub submission_comments: Vec<Comment>,
    #[serde(default)]
    pub user: Option<User>,
}

impl Submission {
    /// The first attached file. Attachments beyond the first are never exported.
    #[must_use]
    pub fn primary_attachment(&self) -> Option<&Attachment> {
        self.attachments.first()
    }

    /// Name of the student, if the server included it.
    #[must_use]
    pub fn student_name(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.name.as_str())
    }
}

impl Comment {
    /// The first file attached to the comment, if any.
    #[must_use]
    pub fn first_attachment(&self) -> Option<&Attachment> {
        self.attachments.first()
    }
}
