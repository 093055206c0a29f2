use anyhow::{Context, Result};
use clap::Parser;
use pcap::Device;
use regex::Regex;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::SystemTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eaptrace::capture::{FrameSource, LiveOptions};
use eaptrace::capture::pcap_writer::PcapWriter;
use eaptrace::dissect::methods::BuiltinDecoders;
use eaptrace::dissect::{FrameInput, FrameReport, dissect_frame};
use eaptrace::output::Formatter;
use eaptrace::protocol::{CarriageConfig, CarriedEap, parse_frame};
use eaptrace::session::CaptureSession;
use eaptrace::tui::browser::{BrowsedFrame, FrameBrowser};

#[derive(Parser)]
#[command(
    name = "eaptrace",
    version,
    about = "Follow EAP authentications through fragments, retransmissions and tunnels"
)]
struct Cli {
    /// Regex matched against the EAP identity of each frame's conversation
    pattern: Option<String>,

    /// BPF filter expression (same syntax as tcpdump)
    #[arg(short = 'F', long)]
    bpf: Option<String>,

    /// Network interface to capture on
    #[arg(short = 'd', long)]
    interface: Option<String>,

    /// Read from pcap/pcapng file instead of live capture
    #[arg(short = 'I', long)]
    input: Option<PathBuf>,

    /// Case-insensitive matching
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Invert match (show frames whose identity does not match)
    #[arg(short = 'v', long)]
    invert: bool,

    /// Output as JSON lines
    #[arg(long)]
    json: bool,

    /// Show hex dump of reassembled messages
    #[arg(short = 'x', long, conflicts_with = "json")]
    hex: bool,

    /// Stop after printing N frames
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    count: Option<u64>,

    /// Don't use promiscuous mode
    #[arg(short = 'p', long)]
    no_promisc: bool,

    /// Quiet mode (trees only, no frame headlines)
    #[arg(short = 'q', long)]
    quiet: bool,

    /// List available interfaces and exit
    #[arg(short = 'L', long)]
    list_interfaces: bool,

    /// Snap length (bytes to capture per packet)
    #[arg(short = 's', long, default_value_t = 65535)]
    snaplen: i32,

    /// Write printed frames to a new pcap file
    #[arg(short = 'O', long)]
    output_file: Option<PathBuf>,

    /// UDP port carrying RADIUS (repeatable)
    #[arg(long = "radius-port", default_values_t = [1812u16, 1645])]
    radius_port: Vec<u16>,

    /// Print conversations and incomplete reassemblies at the end
    #[arg(long)]
    summary: bool,

    /// Browse the capture interactively
    #[arg(long, requires = "input")]
    tui: bool,

    /// Log filter, overridden by EAPTRACE_LOG
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    if cli.list_interfaces {
        list_interfaces()?;
        return Ok(());
    }

    let pattern = match &cli.pattern {
        Some(p) => {
            let pat = if cli.ignore_case {
                format!("(?i){}", p)
            } else {
                p.clone()
            };
            Some(Regex::new(&pat).context(format!("Invalid pattern: {}", p))?)
        }
        None => None,
    };

    if cli.invert && cli.pattern.is_none() {
        warn!("invert with no pattern: every frame is filtered out");
    }

    let config = CarriageConfig {
        radius_ports: cli.radius_port.clone(),
    };

    match &cli.input {
        Some(path) => {
            let mut source = FrameSource::from_file(path, cli.bpf.as_deref())?;
            let link_type = source.link_type();
            let frames: Vec<(u32, Vec<u8>, SystemTime, CarriedEap)> = source
                .collect_frames()?
                .into_iter()
                .filter_map(|f| {
                    let carried = parse_frame(&f.data, link_type, &config)?;
                    Some((f.frame, f.data, f.timestamp, carried))
                })
                .collect();
            info!("{} EAP frames in {}", frames.len(), path.display());

            if cli.tui {
                let browsed = frames
                    .into_iter()
                    .map(|(frame, _, _, carried)| BrowsedFrame { frame, carried })
                    .collect();
                return eaptrace::tui::run_tui(FrameBrowser::new(browsed));
            }

            let mut printer = Printer::new(&cli, pattern, link_type.pcap_link_type())?;
            let mut session = CaptureSession::new();
            let mut decoders = BuiltinDecoders::new();

            // First pass builds conversation state; the output pass replays
            // it, so every frame sees identities learned later in the file.
            for (frame, _, _, carried) in &frames {
                dissect(&mut session, &mut decoders, *frame, carried, false);
            }
            for (frame, data, timestamp, carried) in &frames {
                let report = dissect(&mut session, &mut decoders, *frame, carried, true);
                if !printer.emit(&session, carried, &report, data, *timestamp)? {
                    break;
                }
            }

            if cli.summary {
                printer.formatter.print_summary(&session.summary());
            }
        }
        None => {
            let options = LiveOptions {
                interface: cli.interface.as_deref(),
                snaplen: cli.snaplen,
                promisc: !cli.no_promisc,
            };
            let mut source = FrameSource::live(&options, cli.bpf.as_deref())?;
            let link_type = source.link_type();
            let mut printer = Printer::new(&cli, pattern, link_type.pcap_link_type())?;
            // Live frames are never replayed.
            let mut session = CaptureSession::single_pass();
            let mut decoders = BuiltinDecoders::single_pass();
            let mut failure = None;

            source.for_each_frame(|captured| {
                let Some(carried) = parse_frame(captured.data, link_type, &config) else {
                    return true;
                };
                let report = dissect(&mut session, &mut decoders, captured.frame, &carried, false);
                match printer.emit(&session, &carried, &report, captured.data, captured.timestamp) {
                    Ok(more) => more,
                    Err(e) => {
                        failure = Some(e);
                        false
                    }
                }
            })?;
            if let Some(e) = failure {
                return Err(e);
            }

            if cli.summary {
                printer.formatter.print_summary(&session.summary());
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_env("EAPTRACE_LOG") {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).context(format!("Invalid log level: {}", level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    Ok(())
}

fn dissect(
    session: &mut CaptureSession,
    decoders: &mut BuiltinDecoders,
    frame: u32,
    carried: &CarriedEap,
    visited: bool,
) -> FrameReport {
    dissect_frame(
        session,
        decoders,
        &FrameInput {
            frame,
            key: carried.key,
            visited,
            depth: 0,
            eap: &carried.eap,
        },
    )
}

/// Filters, prints and exports dissected frames.
struct Printer {
    formatter: Formatter,
    pattern: Option<Regex>,
    invert: bool,
    writer: Option<PcapWriter<BufWriter<std::fs::File>>>,
    count: Option<u64>,
    printed: u64,
}

impl Printer {
    fn new(cli: &Cli, pattern: Option<Regex>, link_type: u32) -> Result<Self> {
        let writer = match &cli.output_file {
            Some(path) => Some(PcapWriter::create(path, link_type)?),
            None => None,
        };
        Ok(Printer {
            formatter: Formatter::new(cli.json, cli.hex, cli.quiet),
            pattern,
            invert: cli.invert,
            writer,
            count: cli.count,
            printed: 0,
        })
    }

    /// Returns false once the requested number of frames has been printed.
    fn emit(
        &mut self,
        session: &CaptureSession,
        carried: &CarriedEap,
        report: &FrameReport,
        raw: &[u8],
        timestamp: SystemTime,
    ) -> Result<bool> {
        let identity = report
            .conversation
            .and_then(|id| session.conversations.get(id))
            .and_then(|c| c.identity.as_deref());

        let matched = match &self.pattern {
            Some(re) => identity.is_some_and(|id| re.is_match(id)) != self.invert,
            None => !self.invert,
        };
        if !matched {
            return Ok(true);
        }

        self.formatter.print_frame(carried, report, identity, &self.pattern);
        if let Some(writer) = &mut self.writer {
            writer
                .write_packet(raw, timestamp)
                .context("Failed to write pcap output")?;
        }
        self.printed += 1;

        Ok(match self.count {
            Some(n) => self.printed < n,
            None => true,
        })
    }
}

impl Drop for Printer {
    fn drop(&mut self) {
        if let Some(writer) = &self.writer
            && writer.frames_written() == 0
        {
            warn!("no frames matched; pcap output holds only the file header");
        }
    }
}

fn list_interfaces() -> Result<()> {
    let devices = Device::list()?;
    for dev in devices {
        let desc = dev.desc.as_deref().unwrap_or("");
        let addrs: Vec<String> = dev.addresses.iter().map(|a| a.addr.to_string()).collect();
        println!("{:<16} {}  [{}]", dev.name, desc, addrs.join(", "));
    }
    Ok(())
}
