use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::monitor::JobPhase;
use crate::monitor::adapters::ProbeKind;

#[derive(Parser)]
pub struct CommonOpts {
    /// Path to a TOML configuration file
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        global = true,
        env = "FARLAUNCH_CONFIG",
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: Option<PathBuf>,

    /// Enables more detailed log output
    #[arg(
        long,
        action = clap::ArgAction::SetTrue,
        global = true,
        env = "FARLAUNCH_DEBUG",
        help_heading("GLOBAL OPTIONS")
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::FARLAUNCH_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Resolve the parameters of a job from a submission file
    Resolve(ResolveOpts),
    /// Monitor jobs until they end
    Monitor(MonitorOpts),
}

#[derive(Parser)]
pub struct ResolveOpts {
    /// Submission file with the system, application and request layers (TOML or JSON)
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub file: PathBuf,

    /// Pretty-print the resolved parameters
    #[arg(long)]
    pub pretty: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    /// The job is waiting in a queue
    Queued,
    /// The job is already running
    Running,
}

impl From<StartPhase> for JobPhase {
    fn from(phase: StartPhase) -> Self {
        match phase {
            StartPhase::Queued => JobPhase::Queued,
            StartPhase::Running => JobPhase::Running,
        }
    }
}

#[derive(Parser)]
pub struct MonitorOpts {
    /// Execution technology of the jobs
    #[arg(long, value_enum, default_value_t = ProbeKind::Process)]
    pub kind: ProbeKind,

    /// Working directory of the jobs, used to find their exit code files
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub workdir: Option<PathBuf>,

    /// Phase in which the jobs are when monitoring starts
    #[arg(long, value_enum, default_value_t = StartPhase::Running)]
    pub phase: StartPhase,

    /// Archive outputs of failed jobs
    #[arg(long)]
    pub archive_on_error: bool,

    /// Identifiers of the jobs on the remote system (PID, Slurm job ID or container name)
    #[arg(required = true)]
    pub targets: Vec<String>,
}
