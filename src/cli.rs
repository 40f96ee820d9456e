use clap::Parser;

#[derive(clap::Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable detailed debug logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub debug: bool,

    /// Enable verbose logging (global)
    #[arg(long, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScanArgs {
    /// Targets: domains, IPs, CIDR ranges, URLs, or files with one target per line
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// In-scope entries (defaults to the targets)
    #[arg(short = 'w', long, num_args = 1..)]
    pub whitelist: Vec<String>,

    /// Entries that must never be reported or touched
    #[arg(short = 'b', long, num_args = 1..)]
    pub blacklist: Vec<String>,

    /// Scan modules to enable
    #[arg(short = 'm', long, num_args = 1.., default_values_t = vec!["speculate".to_string()])]
    pub modules: Vec<String>,

    /// Output modules to enable
    #[arg(long = "output-modules", visible_alias = "om", num_args = 1.., default_values_t = vec!["human".to_string()])]
    pub output_modules: Vec<String>,

    /// Output directory
    #[arg(short = 'o', long)]
    pub out: Option<String>,

    /// JSON config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Skip DNS resolution of targets (blacklist still triggers lookups)
    #[arg(long, default_value_t = false)]
    pub no_dns: bool,

    /// Max hops from the targets at which modules still receive events
    #[arg(long)]
    pub search_distance: Option<i32>,

    /// Max hops from the targets at which events are reported
    #[arg(long)]
    pub report_distance: Option<i32>,

    /// Max hops from the targets at which DNS records are followed
    #[arg(long)]
    pub dns_distance: Option<i32>,

    /// Scan name (defaults to a timestamp)
    #[arg(short = 'n', long)]
    pub name: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Recursively discover assets around the given targets
    Scan(ScanArgs),

    /// List available modules
    Modules,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_flags_parse() {
        let cli = Cli::try_parse_from([
            "asset_hunter",
            "--debug",
            "scan",
            "example.com",
            "10.0.0.0/30",
            "-b",
            "bad.example.com",
            "-m",
            "speculate",
            "crtsh",
            "--om",
            "jsonl",
            "--report-distance",
            "2",
        ])
        .unwrap();
        assert!(cli.debug);
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.targets, vec!["example.com", "10.0.0.0/30"]);
        assert_eq!(args.blacklist, vec!["bad.example.com"]);
        assert_eq!(args.modules, vec!["speculate", "crtsh"]);
        assert_eq!(args.output_modules, vec!["jsonl"]);
        assert_eq!(args.report_distance, Some(2));
        assert!(!args.no_dns);
    }

    #[test]
    fn output_defaults_to_human() {
        let cli = Cli::try_parse_from(["asset_hunter", "scan", "example.com"]).unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.output_modules, vec!["human"]);
        assert_eq!(args.modules, vec!["speculate"]);
    }
}
