//! Run one query against a computational-storage subsystem and print the result.
//!
//! Logs go to stderr (`RUST_LOG` overrides the `info` default); stdout
//! carries only the result.

use std::path::PathBuf;
use std::process::ExitCode;

use bytes::Bytes;
use clap::{ArgAction, CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use csq_client::config::{Overrides, RunnerConfig};
use csq_client::output::print_outcome;
use csq_client::transport::{LoopbackSubsystem, LoopbackTransport, LOOPBACK_TRTYPE};
use csq_client::{CsqError, QueryClientBuilder, Result};

#[derive(Parser, Debug)]
#[command(
    name = "csq-runner",
    about = "Offload a query to a computational-storage subsystem",
    disable_help_flag = true
)]
struct Args {
    /// Target transport type (e.g. tcp, rdma, loopback)
    #[arg(short = 't', long)]
    trtype: Option<String>,

    /// Address family (e.g. ipv4)
    #[arg(short = 'f', long)]
    adrfam: Option<String>,

    /// Target address (e.g. 127.0.0.1)
    #[arg(short = 'a', long)]
    traddr: Option<String>,

    /// Service port (e.g. 4420)
    #[arg(short = 's', long)]
    trsvcid: Option<String>,

    /// Name of subsystem
    #[arg(short = 'n', long)]
    subnqn: Option<String>,

    /// Query text
    #[arg(short = 'q', long)]
    query: Option<String>,

    /// Object the query runs against
    #[arg(short = 'o', long)]
    object_id: Option<u32>,

    /// Give up after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Contents of the loopback target's object (loopback only)
    #[arg(long)]
    loopback_object: Option<PathBuf>,

    /// Print a JSON summary line instead of the raw result
    #[arg(long)]
    json: bool,

    /// Print usage
    #[arg(short = 'h', long, action = ArgAction::SetTrue)]
    help: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            trtype: self.trtype.clone(),
            adrfam: self.adrfam.clone(),
            traddr: self.traddr.clone(),
            trsvcid: self.trsvcid.clone(),
            subnqn: self.subnqn.clone(),
            object_id: self.object_id,
            query: self.query.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

fn usage() -> ExitCode {
    eprint!("{}", Args::command().render_help());
    ExitCode::FAILURE
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e.render());
            return usage();
        }
    };
    if args.help {
        return usage();
    }

    let config = match RunnerConfig::resolve(args.config.as_deref(), args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling query");
            ctrl_c.cancel();
        }
    });

    let json = args.json;
    let loopback_object = args.loopback_object;
    let task = tokio::task::spawn_blocking(move || {
        run(&config, cancel, loopback_object.as_deref(), json)
    });

    match task.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("query task failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Attach, run the configured query and print the outcome.
fn run(
    config: &RunnerConfig,
    cancel: CancellationToken,
    loopback_object: Option<&std::path::Path>,
    json: bool,
) -> Result<()> {
    if config.trtype != LOOPBACK_TRTYPE {
        return Err(CsqError::Discovery(format!(
            "no fabric driver linked for transport type '{}' (use '{}')",
            config.trtype, LOOPBACK_TRTYPE
        )));
    }

    let object = match loopback_object {
        Some(path) => Bytes::from(std::fs::read(path)?),
        None => Bytes::new(),
    };
    info!(
        subnqn = %config.subnqn,
        object_id = config.object_id,
        object_len = object.len(),
        "starting loopback target"
    );
    let transport = LoopbackTransport::new()
        .listening_on(&config.traddr, &config.trsvcid)
        .with_subsystem(
            LoopbackSubsystem::new(&config.subnqn).with_object(config.object_id, object),
        );

    let client = QueryClientBuilder::new()
        .endpoint(config.endpoint())
        .options(config.session_options(cancel))
        .build(&transport)?;

    let outcome = client.run(&config.request())?;
    if let Some(mismatch) = outcome.size_mismatch {
        warn!(
            declared = mismatch.declared,
            observed = mismatch.observed,
            "result size mismatch reported"
        );
    }
    print_outcome(&outcome, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_help_sets_flag() {
        let args = Args::try_parse_from(["csq-runner", "-h"]).unwrap();
        assert!(args.help);
        let args = Args::try_parse_from(["csq-runner", "--help"]).unwrap();
        assert!(args.help);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Args::try_parse_from(["csq-runner", "-x"]).is_err());
        assert!(Args::try_parse_from(["csq-runner", "-o", "not-a-number"]).is_err());
    }

    #[test]
    fn test_flags_map_to_overrides() {
        let args = Args::try_parse_from([
            "csq-runner",
            "-t",
            "loopback",
            "-f",
            "ipv6",
            "-a",
            "10.0.0.9",
            "-s",
            "4421",
            "-n",
            "nqn.cli",
            "-q",
            "SELECT 1",
            "-o",
            "12",
            "--timeout-ms",
            "300",
            "--json",
        ])
        .unwrap();
        assert!(args.json);
        assert!(!args.help);

        let config = RunnerConfig::resolve(None, args.overrides()).unwrap();
        assert_eq!(config.trtype, "loopback");
        assert_eq!(config.adrfam, "ipv6");
        assert_eq!(config.traddr, "10.0.0.9");
        assert_eq!(config.trsvcid, "4421");
        assert_eq!(config.subnqn, "nqn.cli");
        assert_eq!(config.query, "SELECT 1");
        assert_eq!(config.object_id, 12);
        assert_eq!(config.timeout_ms, Some(300));
    }

    #[test]
    fn test_no_flags_keeps_defaults() {
        let args = Args::try_parse_from(["csq-runner"]).unwrap();
        assert!(!args.help);
        let config = RunnerConfig::resolve(None, args.overrides()).unwrap();
        assert_eq!(config, RunnerConfig::default());
    }
}
