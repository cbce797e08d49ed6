use std::path::PathBuf;

use azfw_policy::sync::Resolution;
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "azfw-policy")]
#[command(about = "Manage Azure Firewall policies as YAML, CSV and Bicep")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub struct GlobalArgs {
    /// Working directory holding arm_import, _policies, _csv and friends.
    #[arg(long, global = true, default_value = ".")]
    pub base_dir: PathBuf,
    /// Tool configuration; defaults to azfw.toml in the working directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// Never prompt; questions are answered "no" unless --yes is given.
    #[arg(short = 'n', long, global = true)]
    pub non_interactive: bool,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Convert exported ARM templates into YAML and CSV policies.
    Import(ImportArgs),
    /// Reconcile the YAML policies with the CSV files.
    Sync(SyncArgs),
    /// Render the policies to Bicep for every firewall of an environment.
    Export(ExportArgs),
    /// Score imported templates against the ones built from the export.
    Compare(CompareArgs),
    /// List configured environments and their firewalls.
    Environments,
}

#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// ARM templates to import; defaults to every *.json under arm_import.
    pub files: Vec<PathBuf>,
    /// Delete policies that are no longer in the import without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Debug)]
pub struct SyncArgs {
    #[arg(long, value_enum, default_value_t = ResolutionArg::Cancel)]
    pub resolution: ResolutionArg,
    /// Synchronize even when nothing changed since the last sync.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    /// Environment key, 1-based index, or firewall name.
    #[arg(short, long)]
    pub environment: String,
    /// Only export for this firewall of the environment.
    #[arg(long)]
    pub firewall: Option<String>,
    /// Date suffix appended to every policy name, e.g. 20250613.
    #[arg(long)]
    pub version: Option<String>,
    /// Overrides [export] api_version.
    #[arg(long)]
    pub api_version: Option<String>,
    /// Empty the output directory before writing.
    #[arg(long)]
    pub clean_export: bool,
    /// Overwrite existing output without asking.
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// Left template; with RIGHT, compares a single pair.
    #[arg(requires = "right")]
    pub left: Option<PathBuf>,
    pub right: Option<PathBuf>,
    /// Print the structured diff and changed lines.
    #[arg(long)]
    pub include_diff: bool,
    /// Write one JSON result per pair under the comparison directory.
    #[arg(long)]
    pub save_results: bool,
    /// Overrides [compare] threshold.
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Exit non-zero when any pair fails or is unpaired.
    #[arg(long)]
    pub strict: bool,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ResolutionArg {
    /// Keep the YAML policies.
    Policies,
    /// Keep the CSV files.
    Csv,
    /// Report conflicts and change nothing.
    Cancel,
    /// Keep whichever side was modified last.
    Newest,
}

impl From<ResolutionArg> for Resolution {
    fn from(arg: ResolutionArg) -> Self {
        match arg {
            ResolutionArg::Policies => Resolution::Policies,
            ResolutionArg::Csv => Resolution::Csv,
            ResolutionArg::Cancel => Resolution::Cancel,
            ResolutionArg::Newest => Resolution::Newest,
        }
    }
}
