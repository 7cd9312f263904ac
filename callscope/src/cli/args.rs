//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "callscope",
    about = "Attribute scheduling and eval calls to their call sites",
    after_help = "\
EXAMPLES:
    callscope demo --rounds 5                    Run the scripted workload
    callscope demo --headless --export out.json  Print the final snapshot, save the session
    callscope diff before.json after.json        Delta between two snapshots
    callscope facts                              Decode table for record fact masks"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a scripted workload on the virtual host and replay it remotely
    Demo(DemoArgs),

    /// Print the delta that turns one snapshot file into another
    Diff {
        #[arg(value_name = "PREV")]
        prev: PathBuf,
        #[arg(value_name = "NEXT")]
        next: PathBuf,
    },

    /// Apply a delta file to a snapshot file and print the result
    Apply {
        #[arg(value_name = "PREV")]
        prev: PathBuf,
        #[arg(value_name = "DELTA")]
        delta: PathBuf,
    },

    /// Print every capability's fact table
    Facts,
}

#[derive(clap::Args)]
pub struct DemoArgs {
    /// Monitor configuration (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Export the final snapshot and delta stream to a file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Workload rounds; one snapshot is taken per round
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u32).range(1..))]
    pub rounds: u32,

    /// Print the final snapshot as JSON instead of a summary
    #[arg(long)]
    pub headless: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_demo() {
        let args = Args::try_parse_from(["callscope", "demo", "--rounds", "5", "--headless"]).unwrap();
        match args.command {
            Command::Demo(demo) => {
                assert_eq!(demo.rounds, 5);
                assert!(demo.headless);
                assert!(demo.export.is_none());
            }
            _ => panic!("expected demo"),
        }
    }

    #[test]
    fn test_zero_rounds_rejected() {
        assert!(Args::try_parse_from(["callscope", "demo", "--rounds", "0"]).is_err());
    }

    #[test]
    fn test_diff_needs_two_files() {
        assert!(Args::try_parse_from(["callscope", "diff", "a.json"]).is_err());
        assert!(Args::try_parse_from(["callscope", "diff", "a.json", "b.json"]).is_ok());
    }
}
