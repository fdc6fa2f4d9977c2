//! Blocking client for the course platform's REST API, with typed errors.

use crate::{Assignment, Attachment, Course, PAGE_SIZE, Submission, User};
use itertools::Itertools;
use log::debug;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, LINK};
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong talking to the server.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {url}")]
    NotFound { url: String },

    #[error("unauthorized ({status}) for {url}")]
    Unauthorized { url: String, status: StatusCode },

    #[error("server returned an error ({status}) for {url}: {message}")]
    Api {
        url: String,
        status: StatusCode,
        message: String,
    },

    #[error("network error ({kind}) for {url}: {source}")]
    Transport {
        url: String,
        kind: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to deserialize response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ApiError {
    /// True for 404 responses.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    /// True for 401 and 403 responses.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// The remote operations the sampler needs.
///
/// `CanvasClient` talks to a real server; tests supply an in-memory fake.
pub trait CourseApi: Sync {
    /// The account behind the configured credential.
    ///
    /// # Errors
    /// Returns an error if the credential is rejected or the server is unreachable.
    fn current_user(&self) -> Result<User, ApiError>;

    /// Look up a course by id.
    ///
    /// # Errors
    /// Returns `NotFound` or `Unauthorized` for inaccessible courses.
    fn course(&self, course_id: u64) -> Result<Course, ApiError>;

    /// Every assignment in the course, across all pages.
    ///
    /// # Errors
    /// Returns an error if any page fails.
    fn assignments(&self, course_id: u64) -> Result<Vec<Assignment>, ApiError>;

    /// Every submission for an assignment, with student records and inline comments.
    ///
    /// # Errors
    /// Returns an error if any page fails.
    fn submissions(&self, course_id: u64, assignment_id: u64)
    -> Result<Vec<Submission>, ApiError>;

    /// A single student's submission with its comments.
    ///
    /// # Errors
    /// Returns an error if the submission cannot be fetched.
    fn submission_with_comments(
        &self,
        course_id: u64,
        assignment_id: u64,
        user_id: u64,
    ) -> Result<Submission, ApiError>;

    /// Download an attachment to `dest`, overwriting it. Returns the number of bytes written.
    ///
    /// # Errors
    /// Returns an error if the download fails or the file cannot be written.
    fn download(&self, attachment: &Attachment, dest: &Path) -> Result<u64, ApiError>;
}

/// Helper function to classify reqwest error types
fn error_type_str(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection"
    } else if e.is_request() {
        "request/DNS"
    } else if e.is_body() {
        "body"
    } else if e.is_decode() {
        "decode"
    } else {
        "unknown"
    }
}

fn transport_error(url: &str, source: reqwest::Error) -> ApiError {
    ApiError::Transport {
        url: url.to_string(),
        kind: error_type_str(&source),
        source,
    }
}

/// Pull the human-readable part out of an error body.
/// The server usually answers `{"errors": [{"message": "..."}]}`.
fn error_message(body: &str) -> String {
    let messages = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value.get("errors").and_then(|errors| errors.as_array()).map(|errors| {
                errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(|m| m.as_str()))
                    .join("; ")
            })
        })
        .filter(|m| !m.is_empty());
    messages.unwrap_or_else(|| body.trim().to_string())
}

/// Map a non-success status onto the error taxonomy.
fn check_status(url: &str, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => ApiError::NotFound {
            url: url.to_string(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
            url: url.to_string(),
            status,
        },
        _ => ApiError::Api {
            url: url.to_string(),
            status,
            message: error_message(&body),
        },
    })
}

/// Find the `rel="next"` target in a `Link` header, if there is one.
#[must_use]
pub fn next_page_url(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|param| {
                let param = param.trim();
                param == "rel=\"next\"" || param == "rel=next"
            });
            if is_next {
                target
                    .strip_prefix('<')
                    .and_then(|t| t.strip_suffix('>'))
                    .map(str::to_string)
            } else {
                None
            }
        })
}

/// A connection to one server using one static access token.
#[derive(Debug, Clone)]
pub struct CanvasClient {
    http: Client,
    api_base: String,
    api_key: String,
}

impl CanvasClient {
    /// Build a client for `api_url`, e.g. `https://school.instructure.com`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(format!("studentwork/{}", crate::CLIENT_VERSION))
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self {
            http,
            api_base: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, tail: &str) -> String {
        format!("{}/api/v1/{tail}", self.api_base)
    }

    fn send(&self, url: &str, request: RequestBuilder) -> Result<Response, ApiError> {
        debug!("GET {url}");
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| transport_error(url, e))?;
        check_status(url, response)
    }

    fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, ApiError> {
        let body = response.text().map_err(|e| transport_error(url, e))?;
        serde_json::from_str(&body).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let response = self.send(url, self.http.get(url).query(query))?;
        Self::decode(url, response)
    }

    /// Fetch every page of a list endpoint. Later pages are requested
    /// verbatim from the `Link` header, which already carries the query.
    fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, ApiError> {
        let per_page = PAGE_SIZE.to_string();
        let mut first_query = query.to_vec();
        first_query.push(("per_page", per_page.as_str()));

        let mut items = Vec::new();
        let mut request = self.http.get(url).query(&first_query);
        let mut current = url.to_string();
        loop {
            let response = self.send(&current, request)?;
            let next = next_page_url(response.headers());
            let mut page: Vec<T> = Self::decode(&current, response)?;
            items.append(&mut page);
            match next {
                Some(next_url) => {
                    request = self.http.get(&next_url);
                    current = next_url;
                }
                None => return Ok(items),
            }
        }
    }
}

impl CourseApi for CanvasClient {
    fn current_user(&self) -> Result<User, ApiError> {
        self.get_json(&self.endpoint("users/self"), &[])
    }

    fn course(&self, course_id: u64) -> Result<Course, ApiError> {
        self.get_json(&self.endpoint(&format!("courses/{course_id}")), &[])
    }

    fn assignments(&self, course_id: u64) -> Result<Vec<Assignment>, ApiError> {
        self.get_paginated(
            &self.endpoint(&format!("courses/{course_id}/assignments")),
            &[],
        )
    }

    fn submissions(
        &self,
        course_id: u64,
        assignment_id: u64,
    ) -> Result<Vec<Submission>, ApiError> {
        self.get_paginated(
            &self.endpoint(&format!(
                "courses/{course_id}/assignments/{assignment_id}/submissions"
            )),
            &[("include[]", "user"), ("include[]", "submission_comments")],
        )
    }

    fn submission_with_comments(
        &self,
        course_id: u64,
        assignment_id: u64,
        user_id: u64,
    ) -> Result<Submission, ApiError> {
        self.get_json(
            &self.endpoint(&format!(
                "courses/{course_id}/assignments/{assignment_id}/submissions/{user_id}"
            )),
            &[("include[]", "submission_comments")],
        )
    }

    fn download(&self, attachment: &Attachment, dest: &Path) -> Result<u64, ApiError> {
        let url = attachment.url.as_str();
        let response = self.send(url, self.http.get(url))?;
        // read the whole body first so a dropped connection leaves no partial file
        let bytes = response.bytes().map_err(|e| transport_error(url, e))?;
        fs::write(dest, &bytes).map_err(|source| ApiError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
        Ok(bytes.len() as u64)
    }
}
