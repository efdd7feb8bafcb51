//! # Crash reporter
//!
//! [`CrashReporter`] ties a platform backend, the symbol engine and the
//! report configuration together. It is the entry point both for voluntary
//! traces and for the installed fault handler.
//!
//! ```rust,ignore
//! let mut reporter = CrashReporter::new(LinuxProcess::new(&config)?, config);
//! reporter.write_report(&mut std::io::stdout(), None)?;
//! ```

use std::io::{self, Write};

use tracing::debug;

use crate::config::ReportConfig;
use crate::exception::FaultInfo;
use crate::platform::Platform;
use crate::report::{write_fault_summary, ReportRenderer};
use crate::symbols::SymbolEngine;
use crate::unwind::CfiUnwinder;

/// Owns everything needed to produce crash reports for one process.
pub struct CrashReporter<P>
{
    platform: P,
    symbols: SymbolEngine,
    config: ReportConfig,
}

impl<P: Platform> CrashReporter<P>
{
    pub fn new(platform: P, config: ReportConfig) -> Self
    {
        let symbols = SymbolEngine::new().with_debug_file_name(config.debug_file_name.clone());
        Self {
            platform,
            symbols,
            config,
        }
    }

    pub fn platform(&self) -> &P
    {
        &self.platform
    }

    pub fn config(&self) -> &ReportConfig
    {
        &self.config
    }

    pub fn symbols(&self) -> &SymbolEngine
    {
        &self.symbols
    }

    /// Initialize the symbol engine. Only the first call does any work.
    pub fn initialize_symbols(&mut self)
    {
        if !self.symbols.is_initialized() {
            debug!("initializing symbol engine");
            self.symbols.initialize(&self.platform);
        }
    }

    /// Write a full report for `fault`, or a voluntary trace of the calling
    /// thread when `fault` is `None`.
    ///
    /// # Errors
    ///
    /// Only I/O errors from `sink`.
    pub fn write_report(&mut self, sink: &mut dyn Write, fault: Option<&FaultInfo>) -> io::Result<()>
    {
        self.initialize_symbols();

        let unwinder = CfiUnwinder::new(&self.symbols, self.platform.memory());
        ReportRenderer::new(&self.platform, &self.platform, &self.symbols, &unwinder, &self.config).render(sink, fault)
    }

    /// Write only the "Loaded Modules" section.
    ///
    /// # Errors
    ///
    /// Only I/O errors from `sink`.
    pub fn write_modules(&mut self, sink: &mut dyn Write) -> io::Result<()>
    {
        self.initialize_symbols();

        let unwinder = CfiUnwinder::new(&self.symbols, self.platform.memory());
        ReportRenderer::new(&self.platform, &self.platform, &self.symbols, &unwinder, &self.config).render_modules(sink)
    }

    /// Write the terse fault summary. Does not touch the symbol engine.
    ///
    /// # Errors
    ///
    /// Only I/O errors from `sink`.
    pub fn write_summary(&self, sink: &mut dyn Write, fault: &FaultInfo) -> io::Result<()>
    {
        write_fault_summary(sink, fault, &self.platform)
    }
}
