//! RAW conversion phases
//!
//! Thermo RAW inputs are converted before anything else reads them:
//! samples to `DIA/<stem>.mzML`, DDA library runs (peak-picked) to
//! `DDA/<stem>.mzXML` or `DDA/<stem>.mzML`.
//!
//! Two converters are supported. ProteoWizard's msconvert under wine is
//! preferred when its wine prefix exists; otherwise ThermoRawFileParser
//! under mono. When neither is installed, ThermoRawFileParser is
//! downloaded once per execution.

use super::{path_string, PipelineOrchestrator, RunContext};
use crate::error::PipelineError;
use crate::models::{file_stem, ProgressSink};
use crate::services::checkpoint_scanner::{DDA_DIR, DIA_DIR};
use crate::services::stage_runner::Invocation;
use std::path::Path;

const INSTALLER_PHASE: &str = "Installing ThermoRawFileParser";

/// Tool converting Thermo RAW files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawConverter {
    /// ProteoWizard under wine
    Msconvert,
    /// ThermoRawFileParser under mono
    ThermoRawFileParser,
}

impl PipelineOrchestrator {
    /// Convert RAW samples to `DIA/<stem>.mzML`
    pub(super) async fn phase_convert_samples(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let converter = self.resolve_converter(ctx).await?;
        let out_dir = ctx.job_dir().join(DIA_DIR);
        std::fs::create_dir_all(&out_dir)?;

        let samples = ctx.config().files.samples.clone();
        tracing::info!(job = %ctx.job.name, files = samples.len(), converter = ?converter, "Converting DIA samples");

        for (i, sample) in samples.iter().enumerate() {
            let invocation = match converter {
                RawConverter::Msconvert => self
                    .wine(ctx, "wine64")
                    .args(["msconvert.exe", sample.as_str(), "--mzML", "-o", DIA_DIR]),
                RawConverter::ThermoRawFileParser => {
                    let output = out_dir.join(format!("{}.mzML", file_stem(sample)));
                    self.thermo_raw_parser(ctx, sample, &output, false)
                }
            };
            ctx.runner.run(&invocation, sink).await?;
            sink.update_n_of_m(i + 1, samples.len());
        }
        Ok(())
    }

    /// Convert and peak-pick RAW library runs into `DDA/`
    pub(super) async fn phase_convert_library(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let converter = self.resolve_converter(ctx).await?;
        let out_dir = ctx.job_dir().join(DDA_DIR);
        std::fs::create_dir_all(&out_dir)?;

        let library = ctx.config().files.library.clone();
        tracing::info!(job = %ctx.job.name, files = library.len(), converter = ?converter, "Converting DDA library runs");

        for (i, file) in library.iter().enumerate() {
            let stem = file_stem(file);
            let invocation = match converter {
                RawConverter::Msconvert => {
                    let output = path_string(&out_dir.join(format!("{}.mzXML", stem)));
                    self.wine(ctx, "wine").args([
                        "qtofpeakpicker.exe",
                        "--resolution=2000",
                        "--area=1",
                        "--threshold=1",
                        "--smoothwidth=1.1",
                        "--in",
                        file.as_str(),
                        "--out",
                        output.as_str(),
                    ])
                }
                RawConverter::ThermoRawFileParser => {
                    let output = out_dir.join(format!("{}.mzML", stem));
                    self.thermo_raw_parser(ctx, file, &output, true)
                }
            };
            ctx.runner.run(&invocation, sink).await?;
            sink.update_n_of_m(i + 1, library.len());
        }
        Ok(())
    }

    /// Pick the RAW converter, installing ThermoRawFileParser when needed
    pub(super) async fn resolve_converter(
        &self,
        ctx: &mut RunContext<'_>,
    ) -> Result<RawConverter, PipelineError> {
        if let Some(converter) = ctx.converter {
            return Ok(converter);
        }
        if let Some(converter) = self.installed_converter() {
            ctx.converter = Some(converter);
            return Ok(converter);
        }
        if ctx.installer_tried {
            return Err(PipelineError::NoConverterAvailable);
        }

        ctx.installer_tried = true;
        self.install_thermo_raw_parser(ctx).await?;
        match self.installed_converter() {
            Some(converter) => {
                ctx.converter = Some(converter);
                Ok(converter)
            }
            None => Err(PipelineError::NoConverterAvailable),
        }
    }

    fn installed_converter(&self) -> Option<RawConverter> {
        if self.tools.wine_prefix.is_dir() {
            Some(RawConverter::Msconvert)
        } else if self.tools.thermo_raw_parser_exe().is_file() {
            Some(RawConverter::ThermoRawFileParser)
        } else {
            None
        }
    }

    /// Download and unpack ThermoRawFileParser, tracked as its own phase
    async fn install_thermo_raw_parser(&self, ctx: &mut RunContext<'_>) -> Result<(), PipelineError> {
        let sink = ctx.job.progress.create_phase(INSTALLER_PHASE);
        sink.start();
        tracing::info!(job = %ctx.job.name, url = %self.tools.thermo_raw_parser_url, "Installing ThermoRawFileParser");

        let archive = self.tools.thermo_raw_parser_archive();
        std::fs::create_dir_all(&self.tools.download_dir)?;
        let download = Invocation::new("wget", &self.tools.download_dir)
            .arg("-O")
            .arg(&archive)
            .arg(&self.tools.thermo_raw_parser_url);
        ctx.runner.run(&download, &sink).await?;
        sink.update_n_of_m(1, 3);

        if !archive.is_file() {
            let err = PipelineError::ExternalToolUnavailable(format!(
                "ThermoRawFileParser download missing: {}",
                archive.display()
            ));
            sink.fail(download.command_line(), -1);
            return Err(err);
        }
        std::fs::create_dir_all(&self.tools.thermo_raw_parser_dir)?;
        sink.update_n_of_m(2, 3);

        let unpack = Invocation::new("unzip", &self.tools.thermo_raw_parser_dir).arg(&archive);
        ctx.runner.run(&unpack, &sink).await?;
        sink.update_n_of_m(3, 3);
        sink.ready();
        Ok(())
    }

    fn wine(&self, ctx: &RunContext<'_>, program: &str) -> Invocation {
        ctx.command(program)
            .env("WINEPREFIX", self.tools.wine_prefix.to_string_lossy())
            .env("WINEDEBUG", "-all,err+all")
            .env("WINEPATH", "C:\\pwiz")
    }

    fn thermo_raw_parser(
        &self,
        ctx: &RunContext<'_>,
        input: &str,
        output: &Path,
        peak_picking: bool,
    ) -> Invocation {
        let invocation = ctx
            .command("mono")
            .arg(self.tools.thermo_raw_parser_exe())
            .args(["-f=1", "-m=0", "--noZlibCompression"])
            .arg(format!("-i={}", input))
            .arg(format!("-b={}", output.display()));
        if peak_picking {
            invocation
        } else {
            // -p disables the built-in peak picking
            invocation.arg("-p")
        }
    }
}

