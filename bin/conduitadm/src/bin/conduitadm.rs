// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::ValueEnum;
use slog::Drain;
use tabwriter::TabWriter;

use conduit::ddi::time::Moment;
use conduit::engine::sock_lb::ConnectOutcome;
use conduit::engine::sock_lb::ConnectRequest;
use conduit::print::print_conn_table;
use conduit::print::print_policy;
use conduit::print::print_services;
use conduit::print::print_stats;
use conduit::print::write_hrb;
use conduit_api::API_VERSION;
use conduit_api::ConduitCfg;
use conduit_api::Direction;
use conduit_api::Endpoint;
use conduit_api::IpCidr;
use conduit_api::Protocol;
use conduitadm::CollectSink;
use conduitadm::DirSource;
use conduitadm::Host;
use conduitadm::Replayed;

/// Inspect and exercise the Conduit dataplane in userland.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Increase log verbosity. May be repeated.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Validate a configuration file and summarize it.
    Check {
        #[command(flatten)]
        cfg: CfgArg,
    },

    /// Print the tables described by a configuration file.
    Dump {
        #[command(flatten)]
        cfg: CfgArg,

        #[arg(long, value_enum, default_value_t = Table::All)]
        table: Table,

        /// Emit JSON instead of tables.
        #[arg(long)]
        json: bool,
    },

    /// Run a packet capture through a fresh dataplane.
    Replay {
        #[command(flatten)]
        cfg: CfgArg,

        /// A legacy pcap file with Ethernet framing.
        pcap: PathBuf,

        /// Direction of every frame.
        #[arg(long = "dir", default_value = "out", conflicts_with = "local")]
        direction: Direction,

        /// Treat frames sourced from these networks as egress and
        /// everything else as ingress.
        #[arg(long, value_delimiter = ',')]
        local: Vec<IpCidr>,

        /// Emit one JSON verdict event per line.
        #[arg(long)]
        json: bool,

        /// Also dump the connection table afterwards.
        #[arg(long)]
        conns: bool,
    },

    /// Ask the connect-time balancer where a connection would go.
    Connect {
        #[command(flatten)]
        cfg: CfgArg,

        #[arg(long, default_value = "tcp")]
        proto: Protocol,

        #[arg(long)]
        src: Endpoint,

        #[arg(long)]
        dst: Endpoint,
    },
}

#[derive(Args, Clone, Debug)]
struct CfgArg {
    /// Path to the TOML configuration.
    #[arg(short, long = "config")]
    config: PathBuf,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Table {
    Policy,
    Services,
    All,
}

fn logger(verbose: u8) -> slog::Logger {
    let level = match verbose {
        0 => slog::Level::Warning,
        1 => slog::Level::Info,
        2 => slog::Level::Debug,
        _ => slog::Level::Trace,
    };

    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog::LevelFilter::new(drain, level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("api_version" => API_VERSION))
}

fn host(
    cfg: &ConduitCfg,
    log: &slog::Logger,
    sink: Arc<CollectSink>,
) -> anyhow::Result<Host> {
    Ok(Host::new(cfg, log.clone(), Box::new(sink))?)
}

fn print_replayed(replayed: &[Replayed]) -> std::io::Result<()> {
    let mut t = TabWriter::new(std::io::stdout());
    writeln!(t, "FRAME\tDIR\tRESULT")?;
    write_hrb(&mut t)?;
    for r in replayed {
        let res = match &r.res {
            conduit::engine::ProcessResult::Forward => "FORWARD".to_string(),
            conduit::engine::ProcessResult::Drop { reason } => {
                format!("DROP ({reason})")
            }
            conduit::engine::ProcessResult::Redirect { to } => {
                format!("REDIRECT {to}")
            }
            conduit::engine::ProcessResult::PassThrough => "PASS".to_string(),
        };
        writeln!(t, "{}\t{}\t{res}", r.index, r.dir)?;
    }
    t.flush()
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log = logger(cli.verbose);

    match cli.cmd {
        Command::Check { cfg } => {
            let conf = conduitadm::load_config(&cfg.config)?;
            let h = host(&conf, &log, Arc::default())?;
            let snap = h.tables.load();
            println!(
                "{}: ok ({} tiers, {} services, {} redirects, {} connections max)",
                cfg.config.display(),
                snap.policy.tiers().len(),
                snap.services.len(),
                snap.redirects.rules().len(),
                h.ct.capacity(),
            );
        }

        Command::Dump { cfg, table, json } => {
            let conf = conduitadm::load_config(&cfg.config)?;
            // Build the snapshots so that only valid tables are shown.
            let h = host(&conf, &log, Arc::default())?;
            let snap = h.tables.load();

            if json {
                let out = match table {
                    Table::Policy => serde_json::to_string_pretty(&conf.tables.policy)?,
                    Table::Services => serde_json::to_string_pretty(&(
                        &conf.tables.services,
                        &conf.tables.redirects,
                    ))?,
                    Table::All => serde_json::to_string_pretty(&conf.tables)?,
                };
                println!("{out}");
                return Ok(());
            }

            if matches!(table, Table::Policy | Table::All) {
                print_policy(&snap.policy)?;
            }
            if matches!(table, Table::Services | Table::All) {
                print_services(&snap.services, &snap.redirects)?;
            }
        }

        Command::Replay { cfg, pcap, direction, local, json, conns } => {
            let conf = conduitadm::load_config(&cfg.config)?;
            let sink = Arc::new(CollectSink::default());
            let h = host(&conf, &log, sink.clone())?;
            let frames = conduitadm::read_pcap(&pcap)?;
            slog::info!(log, "replaying {} frames", frames.len(); "pcap" => %pcap.display());

            let dirs = if local.is_empty() {
                DirSource::Fixed(direction)
            } else {
                DirSource::Local(local)
            };
            let replayed = conduitadm::replay(&h, &frames, &dirs);

            if json {
                for ev in sink.take() {
                    println!("{}", serde_json::to_string(&ev)?);
                }
            } else {
                print_replayed(&replayed)?;
                println!();
                print_stats(&h.dp.stats().snapshot())?;
            }

            if conns {
                println!();
                if json {
                    println!("{}", serde_json::to_string_pretty(&h.ct.dump())?);
                } else {
                    print_conn_table(&h.ct.dump())?;
                }
            }
        }

        Command::Connect { cfg, proto, src, dst } => {
            let conf = conduitadm::load_config(&cfg.config)?;
            let h = host(&conf, &log, Arc::default())?;
            let req = ConnectRequest { proto, src, dst };
            match h.lb.connect_at(req, Moment::from_raw_millis(0))? {
                ConnectOutcome::NotService => {
                    println!("{dst} is not a service; connecting directly");
                }
                ConnectOutcome::Translated { backend } => {
                    println!("{src} -> {dst} served by {backend}");
                }
            }
        }
    }

    Ok(())
}
