//! A CLI that downloads representative student submissions by score percentile.

#![warn(clippy::all, clippy::pedantic)]

extern crate studentwork_common;
use studentwork_common::CLIENT_REQUEST_TIMEOUT_SECS;
use studentwork_common::CLIENT_VERSION;
use studentwork_common::canvas_api::CanvasClient;
use studentwork_common::config::{ConfigError, PercentileEntry, RawConfig, RequiredField};
use studentwork_common::sampler::{AssignmentOutcome, sample_and_export, verify_credentials};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, info};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Base URL of the course platform, e.g. https://yourschool.instructure.com
    #[arg(long, env = "CANVAS_API_URL")]
    api_url: Option<String>,

    /// API access token, generated from your account settings
    #[arg(long, env = "CANVAS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Numeric ID of the course containing the assignments
    #[arg(short, long, env = "STUDENTWORK_COURSE_ID")]
    course_id: Option<u64>,

    /// Directory the labeled sample folders are written to
    #[arg(short, long, env = "STUDENTWORK_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Assignment name to process, matched exactly (repeat for more;
    /// separate with ';' in the environment)
    #[arg(
        short,
        long = "assignment",
        env = "STUDENTWORK_ASSIGNMENTS",
        value_delimiter = ';'
    )]
    assignments: Vec<String>,

    /// Percentile to sample as LABEL=VALUE, with VALUE between 0 and 1
    /// [default: Poor=0.25, Average=0.5, Good=0.95]
    #[arg(
        short,
        long = "percentile",
        value_name = "LABEL=VALUE",
        env = "STUDENTWORK_PERCENTILES",
        value_delimiter = ','
    )]
    percentiles: Vec<PercentileEntry>,

    /// Skip files attached to grading comments
    #[arg(long, env = "STUDENTWORK_NO_COMMENT_ATTACHMENTS")]
    no_comment_attachments: bool,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = CLIENT_REQUEST_TIMEOUT_SECS, env = "STUDENTWORK_TIMEOUT")]
    timeout: u64,

    /// Process this many assignments at once
    #[arg(short, long, default_value_t = 1, env = "STUDENTWORK_THREADS")]
    threads: usize,

    /// Only show warnings and errors
    #[arg(short, long, env = "STUDENTWORK_QUIET")]
    quiet: bool,

    /// Show additional output
    #[arg(short, long, env = "STUDENTWORK_VERBOSE")]
    verbose: bool,
}

impl Cli {
    fn into_raw_config(self) -> RawConfig {
        RawConfig {
            api_url: self.api_url,
            api_key: self.api_key,
            course_id: self.course_id,
            assignment_names: self.assignments,
            output_root: self.output_dir,
            percentiles: self.percentiles,
            download_comment_attachments: !self.no_comment_attachments,
            timeout_secs: self.timeout,
            threads: self.threads,
        }
    }

    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Warn
        } else if self.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }
}

/// Shown instead of running when required settings are absent.
fn print_setup_banner(missing: &[RequiredField]) {
    let rule = "!".repeat(63);
    println!("{rule}");
    println!("!!! {:<55} !!!", "PLEASE CONFIGURE studentwork BEFORE RUNNING");
    for field in missing {
        println!("!!! {:<55} !!!", format!("Set {field} with {}", field.flag()));
    }
    println!("!!! {:<55} !!!", "Run with --help to see the environment variables");
    println!("{rule}");
}

fn main() -> Result<()> {
    // A .env file is optional
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let cli = Cli::parse();

    // Set up logger, RUST_LOG still wins
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();

    let quiet = cli.quiet;
    let config = match cli.into_raw_config().validate() {
        Ok(config) => config,
        Err(ConfigError::MissingFields(missing)) => {
            print_setup_banner(&missing);
            return Ok(());
        }
        Err(e) => return Err(e).context("Invalid configuration"),
    };

    if !quiet {
        println!(
            "studentwork v{CLIENT_VERSION} started for course {}, sampling {}.",
            config.course_id, config.percentiles
        );
    }

    let api = CanvasClient::new(&config.api_url, &config.api_key, config.timeout)
        .context("Failed to set up the HTTP client")?;
    let user = verify_credentials(&api)
        .with_context(|| format!("Could not sign in to {}", config.api_url))?;
    info!("Signed in as {}", user.name);

    let report = sample_and_export(
        &api,
        config.course_id,
        &config.assignment_names,
        &config.percentiles,
        &config.output_root,
        config.options(),
    )?;

    let skipped = report
        .assignments
        .iter()
        .filter(|(_, outcome)| !matches!(outcome, AssignmentOutcome::Exported { .. }))
        .count();
    println!("\n{}", "=".repeat(50));
    println!(
        "Script finished. {} files written to '{}', {} assignments not exported, {} selections failed.",
        report.files_written(),
        config.output_root.display(),
        skipped,
        report.failures()
    );
    if report.attachment_failures() > 0 {
        println!(
            "{} comment attachments could not be downloaded.",
            report.attachment_failures()
        );
    }
    Ok(())
}
