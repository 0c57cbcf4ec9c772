use clap::{Parser, Subcommand};
use pfcap::capture::{Backend, CaptureHandle, Facility};
use pfcap::config::{self, ConfigLock};
use pfcap::telemetry::init_logging;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "pfcap")]
#[command(about = "Link-layer packet capture over BPF devices and packet sockets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Capture packets on the configured interface
    Run {
        /// Path to capture.lock file
        #[arg(short, long, default_value = "capture.lock")]
        config: PathBuf,

        /// Stop after this many packets
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Generate capture.lock from capture.toml
    Generate {
        /// Path to capture.toml
        #[arg(short, long, default_value = "capture.toml")]
        config: PathBuf,

        /// Output path for capture.lock
        #[arg(short, long, default_value = "capture.lock")]
        output: PathBuf,
    },
    /// Validate capture.toml without generating lock file
    Validate {
        /// Path to capture.toml
        #[arg(short, long, default_value = "capture.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config { action } => {
            // RUST_LOG env var takes priority
            init_logging(None);
            match action {
                ConfigAction::Generate { config, output } => cmd_config_generate(&config, &output),
                ConfigAction::Validate { config } => cmd_config_validate(&config),
            }
        }
        Commands::Run { config, count } => cmd_run(&config, count),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(lock_path: &PathBuf, count: Option<usize>) -> Result<(), String> {
    let lock = config::load_lock(lock_path)
        .map_err(|e| format!("Failed to load {}: {}", lock_path.display(), e))?;

    init_logging(Some(&lock.log));
    info!(
        "Loaded {} (generated {})",
        lock_path.display(),
        lock.generated_at
    );

    match lock.capture.backend {
        #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
        Backend::Bpf => {
            let layout = lock
                .capture
                .layout()
                .unwrap_or_else(pfcap::demux::HeaderLayout::native);
            capture(&pfcap::capture::BpfFacility::with_layout(layout), &lock, count)
        }
        #[cfg(target_os = "linux")]
        Backend::PacketSocket => capture(&pfcap::capture::PacketSocketFacility, &lock, count),
        #[allow(unreachable_patterns)]
        other => Err(format!("Backend '{}' is not available on this host", other)),
    }
}

fn capture<F: Facility>(facility: &F, lock: &ConfigLock, count: Option<usize>) -> Result<(), String> {
    let mut handle: CaptureHandle<F::Resource> = lock.open_options().open(facility).map_err(|e| {
        format!(
            "Failed to open {} on {}: {}. Run with root privileges.",
            facility.name(),
            lock.capture.interface,
            e
        )
    })?;

    info!(
        backend = facility.name(),
        interface = handle.interface(),
        buffer_size = handle.buffer_size(),
        "Capturing..."
    );

    let mut buf = vec![0u8; handle.buffer_size() as usize];
    let mut seen = 0usize;

    let outcome = loop {
        let max = match count {
            Some(limit) if seen >= limit => break Ok(()),
            Some(limit) => lock.capture.max_packets.min(limit - seen),
            None => lock.capture.max_packets,
        };

        let batch = match handle.read_batch(&mut buf, max) {
            Ok(batch) => batch,
            // Already counted and logged by the handle
            Err(e) if e.is_framing() => continue,
            Err(e) => break Err(format!("Capture failed: {}", e)),
        };

        debug!(bytes = batch.bytes_read(), packets = batch.len(), "read batch");
        for (packet, payload) in batch.iter() {
            println!(
                "{} {} len={} wire_len={} offset={}{}",
                packet.timestamp,
                handle.interface(),
                payload.len(),
                packet.wire_len,
                packet.offset,
                ethertype(payload)
                    .map(|t| format!(" ethertype=0x{:04x}", t))
                    .unwrap_or_default()
            );
        }
        seen += batch.len();
    };

    for (name, value) in handle.stats().export() {
        info!(counter = %name, value, "capture stats");
    }

    if let Err(e) = handle.close() {
        warn!("Failed to close capture handle: {}", e);
    }

    outcome
}

/// EtherType of an Ethernet II frame.
fn ethertype(frame: &[u8]) -> Option<u16> {
    frame.get(12..14).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn cmd_config_generate(config_path: &PathBuf, output_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Loading {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        return Err("Validation failed with errors".to_string());
    }

    let lock = config::generate_lock(&cfg);

    let lock_toml =
        toml::to_string_pretty(&lock).map_err(|e| format!("Failed to serialize lock: {}", e))?;

    // Add header comment
    let output = format!(
        "# Generated by pfcap - DO NOT EDIT\n# Source: {}\n\n{}",
        config_path.display(),
        lock_toml
    );

    std::fs::write(output_path, output).map_err(|e| format!("Failed to write lock file: {}", e))?;

    println!("[INFO] Generated {}", output_path.display());
    Ok(())
}

fn cmd_config_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
