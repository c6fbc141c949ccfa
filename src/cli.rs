//! Demo CLI (spec §6.1): a thin `clap` front end over `ToolFacade`.
//! Subcommands mirror the seven tool operations one-for-one rather than
//! the teacher's single-download-per-invocation shape, since this binary
//! is a driver for the tool-server core, not a downloader in its own
//! right.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(name = "downloader-tool", author, version, about = "Segmented resumable HTTP/HTTPS downloader core", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start a download
    Get {
        url: String,
        #[arg(short, long, value_name = "path")]
        output: PathBuf,
        #[arg(short = 'c', long = "concurrency", value_name = "int")]
        concurrency: Option<usize>,
        #[arg(long = "no-resume", action = ArgAction::SetTrue)]
        no_resume: bool,
        #[arg(long = "sha256", value_name = "hex")]
        sha256: Option<String>,
        /// Wait for completion before printing a result
        #[arg(long = "blocking", action = ArgAction::SetTrue)]
        blocking: bool,
    },
    /// Show the status of one task
    Status { task_id: String },
    /// Pause a running download
    Pause { task_id: String },
    /// Resume a paused (or failed) download
    Resume { task_id: String },
    /// Cancel a download
    Cancel { task_id: String },
    /// List tasks known to the registry
    List {
        #[arg(long, value_name = "status")]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Verify a downloaded file's checksum
    Verify {
        file_path: PathBuf,
        #[arg(long, default_value = "sha256")]
        algorithm: String,
        #[arg(long = "expected", value_name = "hex")]
        expected: Option<String>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_requires_an_output_path() {
        let result = Cli::try_parse_from(["downloader-tool", "get", "https://example.com/f"]);
        assert!(result.is_err());
    }

    #[test]
    fn get_parses_with_output() {
        let cli = Cli::try_parse_from(["downloader-tool", "get", "https://example.com/f", "-o", "/tmp/f"])
            .expect("cli parse");
        match cli.command {
            Command::Get { url, output, .. } => {
                assert_eq!(url, "https://example.com/f");
                assert_eq!(output, PathBuf::from("/tmp/f"));
            }
            other => panic!("expected Get, got {other:?}"),
        }
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        let result = Cli::try_parse_from([
            "downloader-tool",
            "--quiet",
            "--verbose",
            "status",
            "some-id",
        ]);
        assert!(result.is_err());
    }
}
