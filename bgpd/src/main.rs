// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Context, Result};
use bgp::config::{SessionParameters, SessionSettings};
use bgp::connection_tcp::TcpConnector;
use bgp::session::{Session, StopHandle};
use clap::{Args, Parser, Subcommand};
use mg_common::log::{init_file_logger, init_term_logger};
use slog::{info, warn, Logger};
use std::fs::File;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a single BGP peer session until interrupted.
    Run(Run),
}

#[derive(Args, Debug)]
struct Run {
    /// Session parameters as
    /// "<local-asn> <local-addr> <remote-asn> <remote-addr> <active|passive>".
    parameters: String,

    /// JSON file with session settings. Command line flags take precedence.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// TCP port to dial or listen on.
    #[arg(short, long)]
    port: Option<u16>,

    /// Hold time in seconds to propose to the peer.
    #[arg(long)]
    hold_time: Option<u16>,

    /// BGP identifier to send, defaults to the local address.
    #[arg(long)]
    router_id: Option<Ipv4Addr>,

    /// Upper bound on an outbound connection attempt, e.g. "5s".
    #[arg(long, value_parser = humantime::parse_duration)]
    connect_timeout: Option<Duration>,

    /// Number of times to retry establishing the connection before giving
    /// up.
    #[arg(long, default_value_t = 0)]
    connect_retries: u32,

    /// Delay between connection attempts, e.g. "5s".
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    retry_delay: Duration,

    /// Log to this file instead of the terminal.
    #[arg(long)]
    log_file: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    match args.command {
        Commands::Run(r) => run(r),
    }
}

fn run(run: Run) -> Result<()> {
    let log = match &run.log_file {
        Some(path) => init_file_logger(path),
        None => init_term_logger(),
    };

    let params: SessionParameters = run
        .parameters
        .parse()
        .map_err(|e| anyhow!("session parameters: {e}"))?;
    let settings = load_settings(&run)?;

    info!(log, "starting session";
        "parameters" => params.to_string(),
        "port" => settings.port,
        "hold_time" => settings.hold_time
    );

    let mut session = Session::new(
        params,
        settings,
        TcpConnector::new(log.clone()),
        log.clone(),
    );
    let stop = session.stop_handle();
    termination_handler(stop.clone(), log.clone())?;

    let mut attempt = 0;
    loop {
        session.start();
        match session.run() {
            Ok(()) => break,
            Err(e) if attempt < run.connect_retries && !stop.is_stopped() => {
                attempt += 1;
                warn!(log, "connection failed, retrying: {e}";
                    "attempt" => attempt,
                    "delay" => humantime::format_duration(run.retry_delay)
                        .to_string()
                );
                sleep(run.retry_delay);
            }
            Err(e) => {
                return Err(e).context("could not establish the connection")
            }
        }
    }

    info!(log, "session finished"; "state" => session.state().to_string());
    Ok(())
}

fn load_settings(run: &Run) -> Result<SessionSettings> {
    let mut settings = match &run.settings {
        Some(path) => {
            let f = File::open(path)
                .with_context(|| format!("open {}", path.display()))?;
            serde_json::from_reader(f)
                .with_context(|| format!("parse {}", path.display()))?
        }
        None => SessionSettings::default(),
    };
    if let Some(port) = run.port {
        settings.port = port;
    }
    if let Some(hold_time) = run.hold_time {
        settings.hold_time = hold_time;
    }
    if let Some(id) = run.router_id {
        settings.router_id = Some(id);
    }
    if let Some(timeout) = run.connect_timeout {
        settings.connect_timeout = timeout;
    }
    Ok(settings)
}

fn termination_handler(stop: StopHandle, log: Logger) -> Result<()> {
    ctrlc::set_handler(move || {
        info!(log, "termination requested, stopping session");
        stop.stop();
    })
    .context("error setting termination handler")
}
