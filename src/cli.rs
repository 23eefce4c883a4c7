use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Verbosity levels for log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum VerbosityLevel {
    /// Only show errors
    Quiet,
    /// Show standard information
    #[default]
    Normal,
    /// Show detailed information
    Verbose,
}

impl VerbosityLevel {
    /// Default `tracing` filter directive when `RUST_LOG` is unset
    pub fn filter_directive(self) -> &'static str {
        match self {
            VerbosityLevel::Quiet => "error",
            VerbosityLevel::Normal => "warn,xml_fetch=info",
            VerbosityLevel::Verbose => "info,xml_fetch=debug",
        }
    }
}

/// Fetch a remote XML document and validate, stream, or analyze it
#[derive(Parser, Debug, Clone)]
#[command(name = "xml-fetch")]
#[command(about = "Download remote XML documents and validate, stream, or analyze them")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Timeout in seconds for the whole fetch (overrides every profile)
    #[arg(long = "timeout", global = true)]
    pub timeout: Option<u64>,

    /// Maximum document size in MiB
    #[arg(long = "max-size-mb", global = true)]
    pub max_size_mb: Option<u64>,

    /// User-Agent header sent with every request
    #[arg(long = "user-agent", global = true)]
    pub user_agent: Option<String>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(
        short = 'q',
        long = "quiet",
        help = "Quiet mode",
        conflicts_with = "verbose",
        global = true
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Download the whole document, check it is well-formed and print it
    Download { url: String },

    /// Relay the document bytes as they arrive
    Stream {
        url: String,

        /// Write the bytes to this file instead of stdout
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },

    /// Extract root tag, namespaces, element count and depth without buffering
    Analyze { url: String },
}

impl Command {
    pub fn url(&self) -> &str {
        match self {
            Command::Download { url } | Command::Analyze { url } => url,
            Command::Stream { url, .. } => url,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        if self.quiet {
            VerbosityLevel::Quiet
        } else if self.verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cli_parsing() {
        let cli = Cli::try_parse_from(["xml-fetch", "analyze", "http://example.com/a.xml"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Analyze {
                url: "http://example.com/a.xml".to_string()
            }
        );
        assert_eq!(cli.verbosity(), VerbosityLevel::Normal);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "xml-fetch",
            "stream",
            "https://example.com/big.xml",
            "--output",
            "/tmp/big.xml",
            "--timeout",
            "5",
            "-v",
        ])
        .unwrap();

        assert_eq!(cli.timeout, Some(5));
        assert_eq!(cli.verbosity(), VerbosityLevel::Verbose);
        assert_eq!(cli.command.url(), "https://example.com/big.xml");
        match cli.command {
            Command::Stream { output, .. } => assert_eq!(output, Some(PathBuf::from("/tmp/big.xml"))),
            other => panic!("Expected stream command, got {:?}", other),
        }
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        let result = Cli::try_parse_from(["xml-fetch", "download", "http://x/a.xml", "-v", "-q"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_url_is_rejected() {
        assert!(Cli::try_parse_from(["xml-fetch", "download"]).is_err());
    }
}
