//! Command-line arguments.
//!
//! Parsed with clap and checked by [`Args::validate`] before anything runs.
//! Most options are `Option`s so that an unset flag leaves the config file
//! value alone.

use crate::config::Provider;
use clap::Parser;
use std::path::PathBuf;

/// RepoBots - chat with bots that know a code repository
///
/// List the files of a repository, read one of them by describing it, or
/// let an autonomous inspector agent research the codebase for you.
///
/// Examples:
///   repobots --bot ListRepoTool
///   repobots --bot ReadFileBot "show me the setup script"
///   repobots --repo-dir ../mergedbots "How are bots registered?"
///   repobots --human-feedback
///   repobots --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Message to send. Starts an interactive session when omitted.
    #[arg(value_name = "MESSAGE")]
    pub message: Option<String>,

    /// Handle of the bot to talk to
    ///
    /// Use --list-bots to see the available handles.
    #[arg(short, long, value_name = "HANDLE", env = "REPOBOTS_BOT")]
    pub bot: Option<String>,

    /// Repository root the bots may read from
    #[arg(short, long, value_name = "DIR", env = "REPOBOTS_REPO_DIR")]
    pub repo_dir: Option<PathBuf>,

    /// Chat-completion API flavour
    #[arg(long, value_name = "PROVIDER")]
    pub provider: Option<Provider>,

    /// Base URL of the model API
    #[arg(long, value_name = "URL", env = "REPOBOTS_BASE_URL")]
    pub base_url: Option<String>,

    /// Model used for file-path extraction
    #[arg(long, value_name = "MODEL", env = "REPOBOTS_FAST_MODEL")]
    pub fast_model: Option<String>,

    /// Model used by the inspector agent
    #[arg(long, value_name = "MODEL", env = "REPOBOTS_SLOW_MODEL")]
    pub slow_model: Option<String>,

    /// Temperature for agent responses (0.0 - 2.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Model request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Ask for feedback after every inspector step
    ///
    /// Reply "q" or "stop" to end the run.
    #[arg(long)]
    pub human_feedback: bool,

    /// Stop the inspector after this many steps
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<usize>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .repobots.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the registered bots and exit
    #[arg(long)]
    pub list_bots: bool,

    /// Generate a default .repobots.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config || self.list_bots {
            return Ok(());
        }

        if let Some(ref url) = self.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Base URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(max) = self.max_iterations {
            if max == 0 {
                return Err("Max iterations must be at least 1".to_string());
            }
        }

        if let Some(ref dir) = self.repo_dir {
            if !dir.is_dir() {
                return Err(format!(
                    "Repository directory does not exist: {}",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            message: None,
            bot: None,
            repo_dir: None,
            provider: None,
            base_url: None,
            fast_model: None,
            slow_model: None,
            temperature: None,
            timeout: None,
            human_feedback: false,
            max_iterations: None,
            config: None,
            verbose: false,
            quiet: false,
            list_bots: false,
            init_config: false,
        }
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "repobots",
            "--bot",
            "ReadFileBot",
            "--provider",
            "openai",
            "--human-feedback",
            "show me a.py",
        ])
        .unwrap();
        assert_eq!(args.bot.as_deref(), Some("ReadFileBot"));
        assert_eq!(args.provider, Some(Provider::Openai));
        assert!(args.human_feedback);
        assert_eq!(args.message.as_deref(), Some("show me a.py"));
    }

    #[test]
    fn test_validation_invalid_url() {
        let mut args = make_args();
        args.base_url = Some("localhost:11434".to_string());
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_ranges() {
        let mut args = make_args();
        args.temperature = Some(3.0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.max_iterations = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.repo_dir = Some(PathBuf::from("/definitely/not/here"));
        assert!(args.validate().is_err());

        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
