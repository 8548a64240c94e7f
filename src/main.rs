//! Proof-of-work chain simulator - Main Application
//!
//! Runs honest miners and one faulty miner against a single validator until
//! the chain passes its height bound or the process is interrupted.

use pow_chain_simulator::{
    logging::init_logging,
    utils::{format_duration, format_hash, format_hash_rate, percentage},
    BlockHeader, Chain, Config, Crc32Checksum, Outcome, Result, Simulation, SimulationReport,
    APP_NAME, APP_VERSION,
};

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load and validate configuration
    let config = Config::load().await?;

    // Handle special commands
    if config.info {
        print_info();
        return Ok(());
    }

    if config.long_info {
        print_long_info();
        return Ok(());
    }

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    let _log_guard = init_logging(config.log_level, config.log_format, config.log_file.as_deref())?;

    info!("Starting {} v{}", APP_NAME, APP_VERSION);

    let mut simulation = Simulation::new(config.simulation_config()?, Arc::new(Crc32Checksum));
    if let Some(hook) = config.validator_hook()? {
        simulation = simulation.with_validator_hook(hook);
    }
    watch_ctrl_c(simulation.shutdown_token());

    let report = match simulation.run().await {
        Ok(report) => report,
        Err(e) => {
            error!(
                category = e.category(),
                startup = e.is_startup(),
                error = %e,
                "Simulation failed"
            );
            return Err(e);
        }
    };

    log_report(&report);

    if config.print_chain {
        print_chain(&report.chain)?;
    }

    Ok(())
}

/// Cancel `shutdown` on Ctrl-C
fn watch_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    warn!("Interrupted, stopping miners and validator");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
            },
            _ = shutdown.cancelled() => {}
        }
    });
}

/// Summarize a finished run
fn log_report(report: &SimulationReport) {
    match report.outcome {
        Outcome::Halted { height } => info!(height, "Chain reached its height bound"),
        Outcome::Interrupted => info!(height = report.chain.height(), "Run interrupted"),
    }

    let examined = report.validator.examined;
    info!(
        elapsed = %format_duration(report.elapsed.as_secs()),
        head = %format_hash(report.chain.head().hash),
        examined,
        accepted = report.validator.accepted,
        rejected = report.validator.total_rejected(),
        acceptance = %format!("{:.1}%", percentage(report.validator.accepted as f64, examined as f64)),
        total_hashes = report.total_hashes(),
        "Validator summary"
    );

    for (field, count) in &report.validator.rejected {
        info!(field = *field, count = *count, "Rejections by field");
    }

    for worker in &report.workers {
        let won = report
            .chain
            .iter()
            .filter(|block| block.miner_id == worker.miner_id)
            .count();
        info!(
            miner_id = %worker.miner_id,
            worker_type = worker.worker_type,
            hashes = worker.hashes,
            submitted = worker.submitted,
            superseded = worker.superseded,
            blocks = won,
            hash_rate = %format_hash_rate(worker.hash_rate()),
            "Worker summary"
        );
    }
}

/// Print basic program information
fn print_info() {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("Concurrent proof-of-work chain simulator");
}

/// Print detailed program information
fn print_long_info() {
    print_info();
    println!();
    println!("Features:");
    println!("  • Honest miners searching nonces on dedicated threads");
    println!("  • A faulty miner submitting forged candidates");
    println!("  • A single validator that alone extends the chain");
    println!("  • CRC-32 checksums with a leading-zero-bit difficulty target");
    println!("  • Plain or JSON structured logging");
}

/// Print current configuration
fn print_configuration(config: &Config) -> Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}

/// Print the chain as JSON, newest block first
fn print_chain(chain: &Chain) -> Result<()> {
    let blocks: Vec<&BlockHeader> = chain.iter().collect();
    println!("{}", serde_json::to_string_pretty(&blocks)?);
    Ok(())
}
