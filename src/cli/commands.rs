use clap::{Args, Parser, Subcommand, ValueEnum};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIMESTAMP"),
    ")"
);

#[derive(Parser)]
#[command(name = "warden", version = VERSION, about = "Progressive, policy-gated security test orchestration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Emit diagnostic logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an assessment against a target
    Run(RunArgs),
    /// Validate a configuration file
    Validate(ValidateArgs),
    /// List the tools in the registry
    Tools(ToolsArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ApprovalMode {
    /// Ask on the terminal
    Prompt,
    /// Never answer; requests expire and are denied
    None,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Target domain or URL (overrides run.target)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Free-form intent handed to the planner
    #[arg(short, long)]
    pub intent: Option<String>,

    /// Output directory for run artifacts
    #[arg(short, long)]
    pub output: Option<String>,

    /// Run identifier (auto-generated if omitted)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Scripted plan file
    #[arg(long, conflicts_with = "planner_url")]
    pub plan: Option<String>,

    /// Planner HTTP endpoint
    #[arg(long, env = "WARDEN_PLANNER_URL")]
    pub planner_url: Option<String>,

    /// How approval requests are answered
    #[arg(long, value_enum, default_value = "prompt")]
    pub approvals: ApprovalMode,

    /// Identity recorded on approval decisions
    #[arg(long, env = "USER", default_value = "operator")]
    pub actor: String,

    /// Directory of tool registry YAML files
    #[arg(long)]
    pub tools_dir: Option<String>,
}

#[derive(Args, Clone)]
pub struct ValidateArgs {
    /// Configuration file to validate
    pub config: String,
}

#[derive(Args, Clone)]
pub struct ToolsArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Directory of tool registry YAML files
    #[arg(long)]
    pub tools_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from([
            "warden", "-vv", "run", "--target", "example.com", "--plan", "plans/example.yaml",
            "--approvals", "none", "--actor", "alice",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.target.as_deref(), Some("example.com"));
        assert_eq!(args.plan.as_deref(), Some("plans/example.yaml"));
        assert_eq!(args.approvals, ApprovalMode::None);
        assert_eq!(args.actor, "alice");
    }

    #[test]
    fn test_plan_and_planner_url_conflict() {
        let parsed = Cli::try_parse_from([
            "warden", "run", "--plan", "p.yaml", "--planner-url", "http://localhost:9000",
        ]);
        assert!(parsed.is_err());
    }
}
