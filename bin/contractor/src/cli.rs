use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use contractor_deploy::Chain;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "contractor")]
#[command(author, version, about = "Deploy and manage community contracts")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "CONTRACTOR_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Deploy a community's contracts.
    Deploy(DeployArgs),
    /// Deactivate a previously deployed community.
    Teardown(TeardownArgs),
}

#[derive(Args)]
pub struct ConnectionArgs {
    /// Deployment configuration file (TOML).
    #[arg(short, long, env = "CONTRACTOR_CONFIG")]
    pub config: PathBuf,

    /// Name of the community being deployed.
    #[arg(long, env = "CONTRACTOR_COMMUNITY")]
    pub community: String,

    /// Network section of the config to deploy to.
    #[arg(short, long, env = "CONTRACTOR_NETWORK")]
    pub network: String,

    /// Which chain of the community this network is (home or side).
    #[arg(long, env = "CONTRACTOR_CHAIN")]
    pub chain: Chain,

    /// V3 keystore file holding the deployment account.
    #[arg(short, long, env = "CONTRACTOR_KEYFILE")]
    pub keyfile: Option<PathBuf>,

    /// Password for the keystore file.
    #[arg(short, long, env = "PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Derivation path of a Ledger account (e.g. m/44'/60'/0'/0/0). Tried
    /// before the keyfile; a missing device falls back to the keyfile.
    #[arg(long, env = "CONTRACTOR_HARDWARE_WALLET")]
    pub hardware_wallet: Option<String>,

    /// Skip the chain preflight checks.
    #[arg(long, env = "CONTRACTOR_SKIP_PREFLIGHT")]
    pub skip_preflight: bool,
}

#[derive(Args)]
pub struct DeployArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Append deployment records to this JSON-lines ledger file.
    #[arg(long, env = "CONTRACTOR_LEDGER")]
    pub ledger: Option<PathBuf>,

    /// Do not record git provenance in the ledger.
    #[arg(long, env = "CONTRACTOR_NO_GIT")]
    pub no_git: bool,

    /// Directory holding the compiled contract artifacts.
    #[arg(short, long, env = "CONTRACTOR_ARTIFACTDIR", default_value = "build")]
    pub artifactdir: PathBuf,

    /// Results file to write. Defaults to <chain>chain.json.
    #[arg(short, long, env = "CONTRACTOR_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Deploy only these steps. Repeatable; the selection must include
    /// every dependency of a selected step.
    #[arg(long = "step", env = "CONTRACTOR_STEPS", value_delimiter = ',')]
    pub steps: Vec<String>,
}

#[derive(Args)]
pub struct TeardownArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Directory holding the compiled contract artifacts.
    #[arg(short, long, env = "CONTRACTOR_ARTIFACTDIR", default_value = "build")]
    pub artifactdir: PathBuf,

    /// Results file from the deployment being torn down. Defaults to
    /// <chain>chain.json.
    #[arg(short, long, env = "CONTRACTOR_RESULTS")]
    pub results: Option<PathBuf>,

    /// Tear down only these steps. Repeatable.
    #[arg(long = "step", env = "CONTRACTOR_STEPS", value_delimiter = ',')]
    pub steps: Vec<String>,
}
