//! Download representative submissions for a list of assignments.
//!
//! Failures are contained at the narrowest scope: a bad selection does not
//! stop its assignment, and a bad assignment does not stop the run. Only
//! problems reaching the course itself are returned as errors.

use crate::canvas_api::{ApiError, CourseApi};
use crate::comments::{CommentHeader, CommentLookup, render_comment_file};
use crate::config::PercentileMap;
use crate::export::{ExportNames, effective_points, percent_score, sanitize_filename};
use crate::sampling::{Selection, select};
use crate::{Assignment, Course, Submission, User};
use itertools::Itertools;
use log::{error, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Per-run switches.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SampleOptions {
    pub download_comment_attachments: bool,
    /// Assignments processed at once. 1 keeps the run fully sequential.
    pub threads: usize,
}

impl Default for SampleOptions {
    fn default() -> Self {
        SampleOptions {
            download_comment_attachments: true,
            threads: 1,
        }
    }
}

/// Problems that end the run before anything is exported.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("the API key is invalid or has expired")]
    InvalidCredential(#[source] ApiError),

    #[error("failed to connect to the server: {0}")]
    Connection(#[source] ApiError),

    #[error("unauthorized to access course {course_id}, check the API key")]
    CourseUnauthorized {
        course_id: u64,
        #[source]
        source: ApiError,
    },

    #[error("course {course_id} was not found, check the course ID")]
    CourseNotFound {
        course_id: u64,
        #[source]
        source: ApiError,
    },

    #[error("unexpected error while accessing course {course_id}: {source}")]
    Course {
        course_id: u64,
        #[source]
        source: ApiError,
    },

    #[error("failed to list assignments for course {course_id}: {source}")]
    Assignments {
        course_id: u64,
        #[source]
        source: ApiError,
    },

    #[error("failed to create output directory {}: {source}", path.display())]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Check the credential before doing any real work.
///
/// # Errors
/// Returns `InvalidCredential` for a rejected token and `Connection` for anything else.
pub fn verify_credentials<A: CourseApi + ?Sized>(api: &A) -> Result<User, SetupError> {
    api.current_user().map_err(|e| {
        if e.is_unauthorized() {
            SetupError::InvalidCredential(e)
        } else {
            SetupError::Connection(e)
        }
    })
}

/// Files written and selections lost while exporting one assignment.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ExportTally {
    pub files_written: usize,
    pub failures: usize,
    /// Comment attachments that could not be downloaded. These never cost the selection.
    pub attachment_failures: usize,
}

/// What happened to one requested assignment name.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentOutcome {
    /// Selections were exported; some may have failed individually.
    Exported { picks: usize, tally: ExportTally },
    /// No assignment in the course has this name.
    NotFound,
    /// Too few gradable submissions to sample.
    Skipped { found: usize, required: usize },
    /// Submissions could not be listed.
    Failed(String),
}

/// Summary of a run, in the order the assignment names were given.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SampleReport {
    pub course: Option<Course>,
    pub assignments: Vec<(String, AssignmentOutcome)>,
}

impl SampleReport {
    /// The outcome for the first assignment requested under `name`.
    #[must_use]
    pub fn outcome(&self, name: &str) -> Option<&AssignmentOutcome> {
        self.assignments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, outcome)| outcome)
    }

    /// Files written across all assignments.
    #[must_use]
    pub fn files_written(&self) -> usize {
        self.tallies().map(|t| t.files_written).sum()
    }

    /// Selections that failed across all assignments.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.tallies().map(|t| t.failures).sum()
    }

    /// Comment attachments that failed to download across all assignments.
    #[must_use]
    pub fn attachment_failures(&self) -> usize {
        self.tallies().map(|t| t.attachment_failures).sum()
    }

    fn tallies(&self) -> impl Iterator<Item = &ExportTally> {
        self.assignments.iter().filter_map(|(_, outcome)| match outcome {
            AssignmentOutcome::Exported { tally, .. } => Some(tally),
            _ => None,
        })
    }
}

/// Errors that lose one selected submission.
#[derive(Debug, Error)]
enum SelectionError {
    #[error("failed to create folder {}: {source}", path.display())]
    Folder {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("submission {0} reported attachments but none were found")]
    NoAttachment(u64),

    #[error("submission {0} has no score")]
    Ungraded(u64),

    #[error("could not download file for submission {submission_id}: {source}")]
    Download {
        submission_id: u64,
        #[source]
        source: ApiError,
    },

    #[error("failed to write comments to {}: {source}", path.display())]
    CommentFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Shared, read-only inputs for every assignment in a run.
struct RunContext<'a, A: ?Sized> {
    api: &'a A,
    course_id: u64,
    percentiles: &'a PercentileMap,
    output_root: &'a Path,
    options: SampleOptions,
}

/// Sample each named assignment and export the chosen submissions under
/// `output_root/<label>/`.
///
/// # Errors
/// Returns an error only if the course cannot be reached, its assignments
/// cannot be listed, or the output directory cannot be created. Everything
/// after that is logged and recorded in the report instead.
pub fn sample_and_export<A: CourseApi + ?Sized>(
    api: &A,
    course_id: u64,
    assignment_names: &[String],
    percentiles: &PercentileMap,
    output_root: &Path,
    options: SampleOptions,
) -> Result<SampleReport, SetupError> {
    info!("Starting submission download process for Course ID: {course_id}");

    let course = api.course(course_id).map_err(|source| {
        if source.is_unauthorized() {
            SetupError::CourseUnauthorized { course_id, source }
        } else if source.is_not_found() {
            SetupError::CourseNotFound { course_id, source }
        } else {
            SetupError::Course { course_id, source }
        }
    })?;
    info!("Successfully connected to course: '{}'", course.name);

    if !output_root.exists() {
        fs::create_dir_all(output_root).map_err(|source| SetupError::OutputRoot {
            path: output_root.to_path_buf(),
            source,
        })?;
        info!(
            "Created base download directory: '{}'",
            output_root.display()
        );
    }

    let all_assignments = api
        .assignments(course_id)
        .map_err(|source| SetupError::Assignments { course_id, source })?;
    info!(
        "Found {} total assignments in the course",
        all_assignments.len()
    );

    // repeated names run once; first match wins for duplicate assignments
    let targets: Vec<(&String, Option<&Assignment>)> = assignment_names
        .iter()
        .unique()
        .map(|name| {
            let found = all_assignments.iter().find(|a| &a.name == name);
            if found.is_none() {
                warn!("Assignment '{name}' not found in course");
            }
            (name, found)
        })
        .collect();

    let matched = targets.iter().filter(|(_, a)| a.is_some()).count();
    if matched == 0 {
        error!("No matching assignments found. Please check your assignment names.");
    } else {
        info!("Found {matched} assignments to process");
    }

    let ctx = RunContext {
        api,
        course_id,
        percentiles,
        output_root,
        options,
    };

    // Assignments whose names sanitize alike write the same files, so they
    // share a group and run one after another in input order.
    let mut groups: Vec<Vec<(usize, &Assignment)>> = Vec::new();
    let mut group_of: HashMap<String, usize> = HashMap::new();
    for (i, (_, assignment)) in targets.iter().enumerate() {
        if let Some(assignment) = assignment {
            let slot = *group_of
                .entry(sanitize_filename(&assignment.name))
                .or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                });
            groups[slot].push((i, *assignment));
        }
    }
    let process_group = |group: &Vec<(usize, &Assignment)>| -> Vec<(usize, AssignmentOutcome)> {
        group
            .iter()
            .map(|(i, assignment)| (*i, process_assignment(&ctx, assignment)))
            .collect()
    };

    let finished: Vec<Vec<(usize, AssignmentOutcome)>> = if options.threads > 1 && groups.len() > 1
    {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads)
            .build()
        {
            Ok(pool) => pool.install(|| groups.par_iter().map(process_group).collect()),
            Err(e) => {
                warn!(
                    "Failed to start {} worker threads ({e}), running sequentially",
                    options.threads
                );
                groups.iter().map(process_group).collect()
            }
        }
    } else {
        groups.iter().map(process_group).collect()
    };

    let mut outcomes: Vec<Option<AssignmentOutcome>> = vec![None; targets.len()];
    for (i, outcome) in finished.into_iter().flatten() {
        outcomes[i] = Some(outcome);
    }
    let assignments = targets
        .iter()
        .zip(outcomes)
        .map(|((name, _), outcome)| {
            ((*name).clone(), outcome.unwrap_or(AssignmentOutcome::NotFound))
        })
        .collect();

    Ok(SampleReport {
        course: Some(course),
        assignments,
    })
}

/// List, select and export one assignment.
fn process_assignment<A: CourseApi + ?Sized>(
    ctx: &RunContext<'_, A>,
    assignment: &Assignment,
) -> AssignmentOutcome {
    info!("{}", "=".repeat(50));
    info!("Processing Assignment: {}", assignment.name);

    let submissions = match ctx.api.submissions(ctx.course_id, assignment.id) {
        Ok(submissions) => submissions,
        Err(e) => {
            warn!(
                "An API error occurred while processing assignment '{}': {e}",
                assignment.name
            );
            return AssignmentOutcome::Failed(e.to_string());
        }
    };

    let picks = match select(&submissions, ctx.percentiles) {
        Selection::Insufficient { found, required } => {
            warn!(
                "Found only {found} graded submissions with files. At least {required} are required to select percentiles."
            );
            warn!("Skipping download for assignment '{}'.", assignment.name);
            return AssignmentOutcome::Skipped { found, required };
        }
        Selection::Picked(picks) => picks,
    };
    info!(
        "Identified {} submission examples to download.",
        picks.len()
    );

    let mut tally = ExportTally::default();
    for pick in &picks {
        if let Err(e) = export_selection(ctx, assignment, pick.label, pick.submission, &mut tally) {
            error!("  {e}");
            tally.failures += 1;
        }
    }

    AssignmentOutcome::Exported {
        picks: picks.len(),
        tally,
    }
}

/// Export one selected submission: its primary file, a comment file and,
/// if enabled, the first attachment of each comment.
fn export_selection<A: CourseApi + ?Sized>(
    ctx: &RunContext<'_, A>,
    assignment: &Assignment,
    label: &str,
    submission: &Submission,
    tally: &mut ExportTally,
) -> Result<(), SelectionError> {
    let label_dir = ctx.output_root.join(label);
    fs::create_dir_all(&label_dir).map_err(|source| SelectionError::Folder {
        path: label_dir.clone(),
        source,
    })?;

    let attachment = submission
        .primary_attachment()
        .ok_or(SelectionError::NoAttachment(submission.id))?;
    let score = submission
        .score
        .ok_or(SelectionError::Ungraded(submission.id))?;
    let percent = percent_score(score, assignment.points_possible);
    let names = ExportNames::new(&assignment.name, percent);

    let file_name = names.primary(&attachment.filename);
    let file_path = label_dir.join(&file_name);
    info!("  -> Downloading '{file_name}' to {label} folder...");
    ctx.api
        .download(attachment, &file_path)
        .map_err(|source| SelectionError::Download {
            submission_id: submission.id,
            source,
        })?;
    tally.files_written += 1;
    info!("     Success! Saved to '{}'", file_path.display());

    let lookup = CommentLookup::resolve(ctx.api, ctx.course_id, assignment.id, submission);
    let header = CommentHeader {
        assignment_name: &assignment.name,
        score,
        points_possible: effective_points(assignment.points_possible),
        percent,
        submission_id: submission.id,
    };
    let comment_path = label_dir.join(names.comments());
    fs::write(&comment_path, render_comment_file(&header, &lookup)).map_err(|source| {
        SelectionError::CommentFile {
            path: comment_path.clone(),
            source,
        }
    })?;
    tally.files_written += 1;
    match &lookup {
        CommentLookup::Found(_) => {
            info!("     Comments saved to '{}'", comment_path.display());
        }
        CommentLookup::Empty => info!(
            "     No comments found, empty comment file saved to '{}'",
            comment_path.display()
        ),
        CommentLookup::RetrievalFailed(reason) => {
            warn!(
                "     Could not retrieve comments for submission {}: {reason}",
                submission.id
            );
            warn!(
                "     Created placeholder comment file at '{}'",
                comment_path.display()
            );
        }
    }

    if ctx.options.download_comment_attachments {
        for (i, comment) in lookup.comments().iter().enumerate() {
            let Some(comment_file) = comment.first_attachment() else {
                continue;
            };
            let name = names.comment_attachment(i + 1, &comment_file.filename);
            let path = label_dir.join(&name);
            info!("  -> Downloading '{name}' to {label} folder...");
            match ctx.api.download(comment_file, &path) {
                Ok(_) => {
                    tally.files_written += 1;
                    info!("     Success! Saved to '{}'", path.display());
                }
                Err(e) => {
                    tally.attachment_failures += 1;
                    error!(
                        "     Could not download comment attachment for submission {}: {e}",
                        submission.id
                    );
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PercentileEntry;
    use crate::{Attachment, Comment};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    /// An in-memory course. Attachment URLs map to file contents; URLs
    /// missing from `files` fail to download.
    #[derive(Default)]
    struct FakeCourse {
        course: Option<Course>,
        assignments: Vec<Assignment>,
        submissions: HashMap<u64, Vec<Submission>>,
        refetched: HashMap<u64, Result<Vec<Comment>, String>>,
        files: HashMap<String, Vec<u8>>,
        failing_listings: HashSet<u64>,
        rejects_credential: bool,
        downloads: Mutex<Vec<String>>,
    }

    impl CourseApi for FakeCourse {
        fn current_user(&self) -> Result<User, ApiError> {
            if self.rejects_credential {
                return Err(ApiError::Unauthorized {
                    url: "/api/v1/users/self".to_string(),
                    status: reqwest::StatusCode::UNAUTHORIZED,
                });
            }
            Ok(User {
                id: 1,
                name: "Instructor".to_string(),
            })
        }

        fn course(&self, course_id: u64) -> Result<Course, ApiError> {
            self.course
                .clone()
                .filter(|c| c.id == course_id)
                .ok_or_else(|| ApiError::NotFound {
                    url: format!("/api/v1/courses/{course_id}"),
                })
        }

        fn assignments(&self, _: u64) -> Result<Vec<Assignment>, ApiError> {
            Ok(self.assignments.clone())
        }

        fn submissions(&self, _: u64, assignment_id: u64) -> Result<Vec<Submission>, ApiError> {
            if self.failing_listings.contains(&assignment_id) {
                return Err(ApiError::Api {
                    url: format!("/assignments/{assignment_id}/submissions"),
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    message: "listing exploded".to_string(),
                });
            }
            Ok(self
                .submissions
                .get(&assignment_id)
                .cloned()
                .unwrap_or_default())
        }

        fn submission_with_comments(
            &self,
            _: u64,
            _: u64,
            user_id: u64,
        ) -> Result<Submission, ApiError> {
            match self.refetched.get(&user_id) {
                Some(Ok(comments)) => Ok(Submission {
                    id: user_id,
                    user_id,
                    assignment_id: 0,
                    score: None,
                    attachments: vec![],
                    submission_comments: comments.clone(),
                    user: None,
                }),
                Some(Err(message)) => Err(ApiError::Api {
                    url: format!("/submissions/{user_id}"),
                    status: reqwest::StatusCode::BAD_GATEWAY,
                    message: message.clone(),
                }),
                None => Err(ApiError::NotFound {
                    url: format!("/submissions/{user_id}"),
                }),
            }
        }

        fn download(&self, attachment: &Attachment, dest: &Path) -> Result<u64, ApiError> {
            self.downloads.lock().unwrap().push(attachment.url.clone());
            let bytes = self
                .files
                .get(&attachment.url)
                .ok_or_else(|| ApiError::NotFound {
                    url: attachment.url.clone(),
                })?;
            fs::write(dest, bytes).map_err(|source| ApiError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
            Ok(bytes.len() as u64)
        }
    }

    fn attachment(url: &str, filename: &str) -> Attachment {
        Attachment {
            id: 0,
            display_name: filename.to_string(),
            filename: filename.to_string(),
            url: url.to_string(),
            size: None,
            content_type: None,
        }
    }

    fn submission(id: u64, score: f64, url: &str) -> Submission {
        Submission {
            id,
            user_id: id + 1000,
            assignment_id: 3,
            score: Some(score),
            attachments: vec![attachment(url, "work.pdf")],
            submission_comments: vec![],
            user: None,
        }
    }

    fn comment(text: &str, attachments: Vec<Attachment>) -> Comment {
        Comment {
            id: 0,
            author_name: Some("TA".to_string()),
            created_at: None,
            comment: Some(text.to_string()),
            attachments,
        }
    }

    fn low_high() -> PercentileMap {
        PercentileMap::new(vec![
            PercentileEntry {
                label: "Low".to_string(),
                value: 0.25,
            },
            PercentileEntry {
                label: "High".to_string(),
                value: 0.90,
            },
        ])
        .unwrap()
    }

    /// "Lab 3" out of 100 points with four graded submissions scoring 60..90.
    fn lab_course() -> FakeCourse {
        let mut fake = FakeCourse {
            course: Some(Course {
                id: 1,
                name: "Systems".to_string(),
            }),
            assignments: vec![Assignment {
                id: 3,
                name: "Lab 3".to_string(),
                points_possible: Some(100.0),
            }],
            ..FakeCourse::default()
        };
        let mut subs = Vec::new();
        for (id, score) in [(1, 90.0), (2, 60.0), (3, 80.0), (4, 70.0)] {
            let url = format!("https://files.test/{id}");
            fake.files.insert(url.clone(), format!("work of {id}").into_bytes());
            subs.push(submission(id, score, &url));
        }
        fake.submissions.insert(3, subs);
        fake
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn run(fake: &FakeCourse, out: &Path, assignment_names: &[&str]) -> SampleReport {
        sample_and_export(
            fake,
            1,
            &names(assignment_names),
            &low_high(),
            out,
            SampleOptions::default(),
        )
        .unwrap()
    }

    /// Every file below `root`, as sorted paths relative to `root`.
    fn files_under(root: &Path) -> Vec<String> {
        fn walk(root: &Path, dir: &Path, found: &mut Vec<String>) {
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        walk(root, &path, found);
                    } else {
                        found.push(path.strip_prefix(root).unwrap().display().to_string());
                    }
                }
            }
        }
        let mut found = Vec::new();
        walk(root, root, &mut found);
        found.sort();
        found
    }

    #[test_log::test]
    fn test_exports_low_and_high() {
        let mut fake = lab_course();
        fake.refetched.insert(1002, Ok(vec![]));
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("samples");

        let report = run(&fake, &out, &["Lab 3"]);

        assert_eq!(
            fs::read(out.join("Low").join("Lab 3_60.0.pdf")).unwrap(),
            b"work of 2"
        );
        assert_eq!(
            fs::read(out.join("High").join("Lab 3_80.0.pdf")).unwrap(),
            b"work of 3"
        );
        let comments = fs::read_to_string(out.join("High").join("Lab 3_80.0.txt")).unwrap();
        assert!(comments.contains("Student Score: 80.0/100.0 (80.0%)"));
        assert!(comments.contains("Submission ID: 3"));
        assert!(comments.ends_with("No comments found for this submission.\n"));
        assert_eq!(
            report.outcome("Lab 3"),
            Some(&AssignmentOutcome::Exported {
                picks: 2,
                tally: ExportTally {
                    files_written: 4,
                    failures: 0,
                    attachment_failures: 0,
                }
            })
        );
        assert_eq!(report.course.unwrap().name, "Systems");
    }

    #[test_log::test]
    fn test_missing_assignment_is_not_fatal() {
        let fake = lab_course();
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fake, dir.path(), &["Lab 9", "Lab 3"]);

        assert_eq!(report.outcome("Lab 9"), Some(&AssignmentOutcome::NotFound));
        assert!(matches!(
            report.outcome("Lab 3"),
            Some(AssignmentOutcome::Exported { .. })
        ));
        assert_eq!(report.assignments[0].0, "Lab 9");
    }

    #[test_log::test]
    fn test_too_few_gradable_submissions_writes_nothing() {
        let mut fake = lab_course();
        let subs = fake.submissions.get_mut(&3).unwrap();
        subs[0].score = None;
        subs[1].attachments.clear();
        subs[2].score = None;
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fake, dir.path(), &["Lab 3"]);

        assert_eq!(
            report.outcome("Lab 3"),
            Some(&AssignmentOutcome::Skipped {
                found: 1,
                required: 2
            })
        );
        assert!(files_under(dir.path()).is_empty());
        assert!(fake.downloads.lock().unwrap().is_empty());
    }

    #[test_log::test]
    fn test_comment_failure_writes_placeholder_and_continues() {
        let mut fake = lab_course();
        fake.refetched
            .insert(1002, Err("comments unavailable".to_string()));
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fake, dir.path(), &["Lab 3"]);

        let placeholder = fs::read_to_string(dir.path().join("Low").join("Lab 3_60.0.txt")).unwrap();
        assert!(placeholder.starts_with("Assignment: Lab 3\n"));
        assert!(placeholder.contains("Error retrieving comments: "));
        assert!(placeholder.contains("comments unavailable"));
        assert!(dir.path().join("High").join("Lab 3_80.0.pdf").exists());
        assert_eq!(report.failures(), 0);
        assert_eq!(report.files_written(), 4);
    }

    #[test_log::test]
    fn test_failed_download_skips_only_that_selection() {
        let mut fake = lab_course();
        fake.files.remove("https://files.test/2");
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fake, dir.path(), &["Lab 3"]);

        assert_eq!(files_under(&dir.path().join("Low")), Vec::<String>::new());
        assert_eq!(
            files_under(&dir.path().join("High")),
            vec!["Lab 3_80.0.pdf", "Lab 3_80.0.txt"]
        );
        assert_eq!(report.failures(), 1);
    }

    #[test_log::test]
    fn test_comment_attachments_are_numbered_by_comment() {
        let mut fake = lab_course();
        fake.files
            .insert("https://files.test/markup".to_string(), b"markup".to_vec());
        {
            let subs = fake.submissions.get_mut(&3).unwrap();
            // submission 2 (score 60) is the Low pick
            subs[1].submission_comments = vec![
                comment("see margin", vec![]),
                comment(
                    "annotated",
                    vec![attachment("https://files.test/markup", "markup.png")],
                ),
            ];
        }
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();

        run(&fake, dir.path(), &["Lab 3"]);

        assert_eq!(
            files_under(&dir.path().join("Low")),
            vec!["Lab 3_60.0.pdf", "Lab 3_60.0.txt", "Lab 3_60.0_comment2.png"]
        );
        let text = fs::read_to_string(dir.path().join("Low").join("Lab 3_60.0.txt")).unwrap();
        assert!(text.contains("Comment 1:\nAuthor: TA\nDate: Unknown\nComment: see margin\n"));
        assert!(text.contains("Comment 2:"));
    }

    #[test_log::test]
    fn test_comment_attachments_can_be_disabled() {
        let mut fake = lab_course();
        fake.submissions.get_mut(&3).unwrap()[1].submission_comments = vec![comment(
            "annotated",
            vec![attachment("https://files.test/markup", "markup.png")],
        )];
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();

        sample_and_export(
            &fake,
            1,
            &names(&["Lab 3"]),
            &low_high(),
            dir.path(),
            SampleOptions {
                download_comment_attachments: false,
                threads: 1,
            },
        )
        .unwrap();

        assert!(
            !fake
                .downloads
                .lock()
                .unwrap()
                .contains(&"https://files.test/markup".to_string())
        );
    }

    #[test_log::test]
    fn test_rerun_is_identical() {
        let mut fake = lab_course();
        fake.refetched.insert(1002, Err("flaky".to_string()));
        fake.refetched
            .insert(1003, Ok(vec![comment("good job", vec![])]));
        let dir = tempfile::tempdir().unwrap();

        run(&fake, dir.path(), &["Lab 3"]);
        let first: Vec<(String, Vec<u8>)> = files_under(dir.path())
            .into_iter()
            .map(|f| {
                let bytes = fs::read(dir.path().join(&f)).unwrap();
                (f, bytes)
            })
            .collect();
        run(&fake, dir.path(), &["Lab 3"]);
        let second: Vec<(String, Vec<u8>)> = files_under(dir.path())
            .into_iter()
            .map(|f| {
                let bytes = fs::read(dir.path().join(&f)).unwrap();
                (f, bytes)
            })
            .collect();

        let listed: Vec<&str> = first.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(
            listed,
            vec![
                Path::new("High").join("Lab 3_80.0.pdf").display().to_string(),
                Path::new("High").join("Lab 3_80.0.txt").display().to_string(),
                Path::new("Low").join("Lab 3_60.0.pdf").display().to_string(),
                Path::new("Low").join("Lab 3_60.0.txt").display().to_string(),
            ]
        );
        assert_eq!(first, second);
    }

    #[test_log::test]
    fn test_listing_failure_does_not_stop_other_assignments() {
        let mut fake = lab_course();
        fake.assignments.insert(
            0,
            Assignment {
                id: 8,
                name: "Broken".to_string(),
                points_possible: None,
            },
        );
        fake.failing_listings.insert(8);
        fake.refetched.insert(1002, Ok(vec![]));
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fake, dir.path(), &["Broken", "Lab 3"]);

        assert!(matches!(
            report.outcome("Broken"),
            Some(AssignmentOutcome::Failed(msg)) if msg.contains("listing exploded")
        ));
        assert_eq!(report.files_written(), 4);
    }

    #[test_log::test]
    fn test_first_assignment_with_a_name_wins() {
        let mut fake = lab_course();
        fake.assignments.push(Assignment {
            id: 99,
            name: "Lab 3".to_string(),
            points_possible: Some(10.0),
        });
        fake.failing_listings.insert(99);
        fake.refetched.insert(1002, Ok(vec![]));
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fake, dir.path(), &["Lab 3"]);

        assert!(matches!(
            report.outcome("Lab 3"),
            Some(AssignmentOutcome::Exported { .. })
        ));
    }

    #[test_log::test]
    fn test_unknown_course_writes_nothing() {
        let fake = lab_course();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("samples");

        let err = sample_and_export(
            &fake,
            404,
            &names(&["Lab 3"]),
            &low_high(),
            &out,
            SampleOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, SetupError::CourseNotFound { course_id: 404, .. }));
        assert!(!out.exists());
    }

    #[test_log::test]
    fn test_parallel_matches_sequential() {
        let mut fake = lab_course();
        let mut second = fake.assignments[0].clone();
        second.id = 4;
        second.name = "Lab 4".to_string();
        fake.assignments.push(second);
        let subs = fake.submissions[&3].clone();
        fake.submissions.insert(4, subs);
        for user in [1002, 1003] {
            fake.refetched.insert(user, Ok(vec![]));
        }
        let dir = tempfile::tempdir().unwrap();

        let report = sample_and_export(
            &fake,
            1,
            &names(&["Lab 3", "Lab 4"]),
            &low_high(),
            dir.path(),
            SampleOptions {
                download_comment_attachments: true,
                threads: 2,
            },
        )
        .unwrap();

        let labels: Vec<&str> = report.assignments.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(labels, vec!["Lab 3", "Lab 4"]);
        assert_eq!(report.files_written(), 8);
        assert_eq!(files_under(dir.path()).len(), 8);
    }

    #[test]
    fn test_verify_credentials() {
        let fake = FakeCourse::default();
        assert_eq!(verify_credentials(&fake).unwrap().name, "Instructor");
    }

    #[test]
    fn test_rejected_credential_is_setup_error() {
        let fake = FakeCourse {
            rejects_credential: true,
            ..FakeCourse::default()
        };
        let err = verify_credentials(&fake).unwrap_err();
        assert!(matches!(err, SetupError::InvalidCredential(ref e) if e.is_unauthorized()));
        assert_eq!(err.to_string(), "the API key is invalid or has expired");
    }

    #[test_log::test]
    fn test_failed_comment_attachment_is_counted() {
        let mut fake = lab_course();
        // the Low pick's comment points at a file the server never serves
        fake.submissions.get_mut(&3).unwrap()[1].submission_comments = vec![comment(
            "annotated",
            vec![attachment("https://files.test/gone", "markup.png")],
        )];
        fake.refetched.insert(1003, Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();

        let report = run(&fake, dir.path(), &["Lab 3"]);

        assert_eq!(report.attachment_failures(), 1);
        assert_eq!(report.failures(), 0);
        assert_eq!(
            files_under(&dir.path().join("Low")),
            vec!["Lab 3_60.0.pdf", "Lab 3_60.0.txt"]
        );
        let text = fs::read_to_string(dir.path().join("Low").join("Lab 3_60.0.txt")).unwrap();
        assert!(text.contains("Comment: annotated\n"));
    }

    #[test_log::test]
    fn test_colliding_names_run_once_each_in_order() {
        let mut fake = lab_course();
        fake.assignments.push(Assignment {
            id: 5,
            name: "Lab: 3".to_string(),
            points_possible: Some(100.0),
        });
        let mut subs = Vec::new();
        for (id, score) in [(11, 90.0), (12, 60.0), (13, 80.0), (14, 70.0)] {
            let url = format!("https://files.test/{id}");
            fake.files.insert(url.clone(), format!("work of {id}").into_bytes());
            subs.push(submission(id, score, &url));
        }
        fake.submissions.insert(5, subs);
        let dir = tempfile::tempdir().unwrap();

        let report = sample_and_export(
            &fake,
            1,
            &names(&["Lab: 3", "Lab 3", "Lab: 3"]),
            &low_high(),
            dir.path(),
            SampleOptions {
                download_comment_attachments: true,
                threads: 4,
            },
        )
        .unwrap();

        let requested: Vec<&str> = report.assignments.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(requested, vec!["Lab: 3", "Lab 3"]);
        // both export to "Lab 3_60.0.pdf"; the later request wrote last
        assert_eq!(
            fs::read(dir.path().join("Low").join("Lab 3_60.0.pdf")).unwrap(),
            b"work of 2"
        );
        assert_eq!(fake.downloads.lock().unwrap().len(), 4);
    }
}
