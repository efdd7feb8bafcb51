use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use postmortem_core::config::ReportConfig;
use postmortem_core::exception::FaultCode;
use postmortem_utils::init_logging;
#[cfg(target_os = "linux")]
use tracing::info;

/// Crash reports for the running process: fault, stacks, threads and modules.
#[derive(Parser, Debug)]
#[command(name = "postmortem")]
#[command(version)]
#[command(about = "Crash reports for the running process", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Write a report of this process without crashing
    Trace
    {
        /// Number of parked helper threads to show in the "Threads:" section
        #[arg(short, long, default_value_t = 2)]
        threads: usize,
        /// Write the report to FILE instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Install the fault handler, then crash on purpose
    Crash
    {
        /// Kind of fault to raise
        #[arg(value_enum)]
        kind: CrashKind,
        /// Write the report to FILE instead of stderr
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Describe a raw fault code (hex `0xC0000005` or decimal)
    Classify
    {
        code: String,
    },
    /// List the modules loaded into this process
    Modules,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CrashKind
{
    /// Invalid memory access
    Segv,
    /// `abort()`
    Abort,
    /// Arithmetic fault
    Fpe,
    /// Illegal instruction
    Ill,
}

fn main()
{
    // Logs go to stderr; reports go to stdout or the --output file
    let _guard = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    let config = ReportConfig::from_env();
    match cli.command {
        Commands::Trace { threads, output } => trace(config, threads, output.as_deref()),
        Commands::Crash { kind, output } => crash(config, kind, output),
        Commands::Classify { code } => {
            let raw = parse_code(&code)?;
            println!("{}", FaultCode::from_raw(raw).describe());
            Ok(())
        }
        Commands::Modules => modules(config),
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
fn parse_code(text: &str) -> Result<u32, std::num::ParseIntError>
{
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn open_output(path: Option<&Path>) -> io::Result<Box<dyn Write>>
{
    Ok(match path {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    })
}

#[cfg(target_os = "linux")]
fn trace(config: ReportConfig, helpers: usize, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>>
{
    use std::sync::mpsc;
    use std::thread;

    use postmortem_core::platform::linux::LinuxProcess;
    use postmortem_core::reporter::CrashReporter;

    // Each helper blocks on its own channel until the sender is dropped.
    let mut stops = Vec::with_capacity(helpers);
    let mut workers = Vec::with_capacity(helpers);
    for index in 0..helpers {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        stops.push(stop_tx);
        workers.push(
            thread::Builder::new()
                .name(format!("helper-{index}"))
                .spawn(move || {
                    let _ = stop_rx.recv();
                })?,
        );
    }
    info!(helpers, "helper threads parked");

    let mut reporter = CrashReporter::new(LinuxProcess::new(&config)?, config);
    let mut sink = open_output(output)?;
    let written = reporter.write_report(&mut sink, None);

    drop(stops);
    for worker in workers {
        let _ = worker.join();
    }
    written?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn crash(config: ReportConfig, kind: CrashKind, output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>>
{
    use postmortem_core::platform::linux::{install_fault_handler, raise_fault, LinuxProcess, SelfTestFault};
    use postmortem_core::reporter::CrashReporter;

    let config = match output {
        Some(path) => config.with_report_path(path),
        None => config,
    };
    let mut reporter = CrashReporter::new(LinuxProcess::new(&config)?, config);
    // Load symbols now rather than inside the signal handler.
    reporter.initialize_symbols();
    install_fault_handler(reporter)?;

    let fault = match kind {
        CrashKind::Segv => SelfTestFault::Segv,
        CrashKind::Abort => SelfTestFault::Abort,
        CrashKind::Fpe => SelfTestFault::Fpe,
        CrashKind::Ill => SelfTestFault::Ill,
    };
    info!(?fault, "raising fault");
    raise_fault(fault)
}

#[cfg(target_os = "linux")]
fn modules(config: ReportConfig) -> Result<(), Box<dyn std::error::Error>>
{
    use postmortem_core::platform::linux::LinuxProcess;
    use postmortem_core::reporter::CrashReporter;

    let mut reporter = CrashReporter::new(LinuxProcess::new(&config)?, config);
    let mut stdout = io::stdout().lock();
    reporter.write_modules(&mut stdout)?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn trace(_config: ReportConfig, _helpers: usize, _output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>>
{
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
fn crash(_config: ReportConfig, _kind: CrashKind, _output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>>
{
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
fn modules(_config: ReportConfig) -> Result<(), Box<dyn std::error::Error>>
{
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> Box<dyn std::error::Error>
{
    Box::new(postmortem_core::error::PostmortemError::Unsupported(
        "live reports need the Linux backend".into(),
    ))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_code_accepts_hex_and_decimal()
    {
        assert_eq!(parse_code("0xC0000005").unwrap(), 0xC000_0005);
        assert_eq!(parse_code("0Xc0000094").unwrap(), 0xC000_0094);
        assert_eq!(parse_code("2147483651").unwrap(), 0x8000_0003);
        assert!(parse_code("0x1_0000_0000").is_err());
        assert!(parse_code("segv").is_err());
    }

    #[test]
    fn test_cli_parses_subcommands()
    {
        let cli = Cli::try_parse_from(["postmortem", "trace", "--threads", "4", "-o", "report.txt"]).unwrap();
        match cli.command {
            Commands::Trace { threads, output } => {
                assert_eq!(threads, 4);
                assert_eq!(output, Some(PathBuf::from("report.txt")));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["postmortem", "crash", "fpe"]).unwrap();
        assert!(matches!(cli.command, Commands::Crash { kind: CrashKind::Fpe, output: None }));

        assert!(Cli::try_parse_from(["postmortem", "crash", "nothing"]).is_err());
    }
}
