//! contractor is a CLI tool for deploying a community's contracts to its
//! home and side chains.

mod cli;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::Table;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};

use cli::{Cli, Command, ConnectionArgs, DeployArgs, TeardownArgs};
use contractor_deploy::{Config, Deployer, Error, JsonLedger, Ledger, Network, StepRegistry};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let result = match cli.command {
        Command::Deploy(args) => deploy(args).await,
        Command::Teardown(args) => teardown(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "contractor failed");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Map classified engine errors to their exit codes; anything else is 1.
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<Error>()
        .map(Error::exit_code)
        .unwrap_or(1)
}

/// Load the config file with `CONTRACTOR_*` environment overrides layered
/// on top (nested keys split on `__`).
fn load_config(path: &Path) -> Result<Config> {
    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("CONTRACTOR_").split("__"))
        .extract()
        .with_context(|| format!("could not load config {}", path.display()))
}

async fn connect(args: &ConnectionArgs) -> Result<Network> {
    let config = load_config(&args.config)?;
    let definition = config.network(&args.network)?;
    let mut network = definition.create(&args.network, args.chain)?;

    let mut unlocked = false;
    if let Some(derivation) = &args.hardware_wallet {
        unlocked = network.unlock_hardware_wallet(derivation).await;
    }
    if !unlocked && let Some(keyfile) = &args.keyfile {
        let password = args.password.as_deref().unwrap_or_default();
        network.unlock_keyfile(keyfile, password)?;
        unlocked = true;
    }
    if !unlocked {
        tracing::warn!("no account unlocked, authenticated transactions will fail");
    }

    network.connect(args.skip_preflight).await?;
    Ok(network)
}

async fn deploy(args: DeployArgs) -> Result<()> {
    let mut network = connect(&args.connection).await?;

    let ledger: Option<Box<dyn Ledger>> = match &args.ledger {
        Some(path) => Some(Box::new(JsonLedger::open(path)?)),
        None => None,
    };
    let mut deployer = Deployer::new(
        &args.connection.community,
        &network,
        &args.artifactdir,
        !args.no_git,
        ledger,
    )?;

    let registry = StepRegistry::builtin()?;
    let selection = (!args.steps.is_empty()).then_some(args.steps.as_slice());
    let report = registry.run(selection, &mut network, &mut deployer).await?;

    // Dump whatever was bound, even after a failed run; partial results
    // are what an operator needs to triage or resume.
    let output = args
        .output
        .unwrap_or_else(|| default_results_path(&args.connection));
    let file = File::create(&output)
        .with_context(|| format!("could not create results file {}", output.display()))?;
    deployer.dump_results(&network, file)?;
    tracing::info!(output = %output.display(), "wrote results");

    if report.succeeded() {
        deployer.mark_success();
        print_results(&deployer);
    }
    report.into_result()?;
    Ok(())
}

async fn teardown(args: TeardownArgs) -> Result<()> {
    let mut network = connect(&args.connection).await?;
    let mut deployer = Deployer::new(
        &args.connection.community,
        &network,
        &args.artifactdir,
        false,
        None,
    )?;

    let results = args
        .results
        .unwrap_or_else(|| default_results_path(&args.connection));
    let file = File::open(&results)
        .with_context(|| format!("could not open results file {}", results.display()))?;
    deployer.load_results(file)?;

    let registry = StepRegistry::builtin()?;
    let selection = (!args.steps.is_empty()).then_some(args.steps.as_slice());
    let report = registry
        .run_teardown(selection, &mut network, &mut deployer)
        .await?;
    report.into_result()?;
    Ok(())
}

fn default_results_path(args: &ConnectionArgs) -> PathBuf {
    PathBuf::from(format!("{}chain.json", args.chain))
}

fn print_results(deployer: &Deployer) {
    let mut table = Table::new();
    table.set_header(["Contract", "Address", "Deployed"]);
    for contract in deployer.bindings().values() {
        table.add_row([
            contract.name.clone(),
            contract.address.to_checksum(None),
            contract.deployed.to_string(),
        ]);
    }
    println!("{table}");
}
