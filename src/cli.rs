use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tierstack")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and converge a three-tier cloud topology", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Stack file (default: <config dir>/stack.toml)
    #[arg(short, long, global = true, env = "TIERSTACK_STACK")]
    pub stack: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change
    Plan(PlanArgs),

    /// Converge the cloud towards the stack
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy(DestroyArgs),

    /// Inspect or edit recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Show stack outputs
    Outputs,

    /// Show the component tree and dependency edges
    Graph(GraphArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Only plan a resource kind or a path prefix (e.g. `web` or `vpc/vpc`)
    #[arg(short, long)]
    pub target: Option<String>,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Provider calls in flight (overrides [engine] parallelism)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Give up after this many seconds (overrides [engine] timeout_secs)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Only apply a resource kind or a path prefix, plus its dependencies
    #[arg(short, long)]
    pub target: Option<String>,

    /// Walk the plan without calling the provider
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Provider calls in flight (overrides [engine] parallelism)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

// ============================================================================
// State
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show one recorded resource
    Show {
        /// Node path, e.g. `vpc/vpc`
        path: String,

        /// Read the live resource and report drift
        #[arg(short, long)]
        refresh: bool,
    },

    /// Forget a resource without deleting it
    Rm {
        /// Node path, e.g. `vpc/vpc`
        path: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Parser)]
pub struct GraphArgs {
    /// Print Graphviz DOT instead of the tree
    #[arg(long)]
    pub dot: bool,
}
