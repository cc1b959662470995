use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "dossier-export")]
#[command(about = "Bills validated investigation cases and exports them as fixed-width files")]
pub struct Cli {
    #[arg(long, short, default_value = "export-config.toml")]
    pub config: PathBuf,

    #[arg(long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Export every validated, pending case of a tenant as one batch
    Export {
        #[arg(long)]
        tenant: String,

        /// Tariff evaluation date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,

        #[arg(long)]
        operator: Option<String>,
    },

    /// List committed export batches
    Batches {
        #[arg(long)]
        tenant: Option<String>,

        #[arg(long, help = "Print the batch records as JSON")]
        json: bool,
    },

    /// Verify a batch artifact, regenerating it if the file is missing
    Restore {
        #[arg(long)]
        batch: i64,
    },

    /// Return exported cases to pending (audited)
    Reset {
        #[arg(long = "case", required = true, value_delimiter = ',')]
        cases: Vec<i64>,

        #[arg(long)]
        reason: String,

        #[arg(long)]
        operator: Option<String>,
    },

    /// Show the request codes detected in a request description
    Detect {
        #[arg(long)]
        tenant: String,

        text: String,
    },

    /// Load cases, tariff rules or request keywords from CSV files
    Import {
        #[arg(long)]
        cases: Option<PathBuf>,

        #[arg(long)]
        tariffs: Option<PathBuf>,

        #[arg(long)]
        keywords: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export() {
        let cli = Cli::parse_from([
            "dossier-export",
            "--config",
            "prod.toml",
            "export",
            "--tenant",
            "ACME",
            "--as-of",
            "2024-03-31",
        ]);

        assert_eq!(cli.config, PathBuf::from("prod.toml"));
        match cli.command {
            Command::Export { tenant, as_of, .. } => {
                assert_eq!(tenant, "ACME");
                assert_eq!(as_of, Some("2024-03-31".parse().unwrap()));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_reset_case_list() {
        let cli = Cli::parse_from([
            "dossier-export",
            "reset",
            "--case",
            "3,4",
            "--case",
            "9",
            "--reason",
            "client rejected file",
        ]);

        match cli.command {
            Command::Reset { cases, .. } => assert_eq!(cases, vec![3, 4, 9]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_reset_requires_reason() {
        assert!(Cli::try_parse_from(["dossier-export", "reset", "--case", "3"]).is_err());
    }
}
