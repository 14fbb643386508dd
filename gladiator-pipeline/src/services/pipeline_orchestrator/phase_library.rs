//! LIBRARY phase
//!
//! Builds the assay library `SpecLib_cons_decoy.TraML` from the merged
//! search results:
//!
//! 1. Per method (`lib`, `libfree`): combine engines with InterProphetParser,
//!    estimate the FDR cutoff with Mayu, import with SpectraST
//! 2. Merge the method libraries, build the consensus library
//! 3. Export transitions, convert to TraML, append shuffled decoys

use super::{PipelineOrchestrator, RunContext};
use crate::error::PipelineError;
use crate::models::ProgressSink;
use crate::services::checkpoint_scanner::{DECOY_DATABASE_FILE, SPECTRAL_LIBRARY_FILE};
use crate::services::swath_windows::{format_float, SWATH_WINDOWS_FILE};
use crate::services::stage_runner::Invocation;
use std::collections::BTreeSet;
use std::path::Path;

const DECOY_PREFIX: &str = "DECOY_";
/// Mayu column holding the PSM probability cutoff
const MAYU_CUTOFF_COLUMN: usize = 4;

impl PipelineOrchestrator {
    pub(super) async fn phase_library(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let methods = [("lib", ctx.lib_peps.clone()), ("libfree", ctx.libfree_peps.clone())];
        let total = methods.len() + 1;
        let mut speclibs = Vec::new();

        for (i, (method, peps)) in methods.iter().enumerate() {
            if !peps.is_empty() {
                speclibs.push(self.build_method_library(ctx, sink, method, peps).await?);
            }
            sink.update_n_of_m(i + 1, total);
        }

        let speclib = match speclibs.as_slice() {
            [] => {
                return Err(PipelineError::MalformedInput(
                    "no spectral libraries; enable a DDA library or pseudo-spectra with a search engine"
                        .to_string(),
                ))
            }
            [single] => single.clone(),
            [lib, libfree] => {
                let merge = self
                    .spectrast(ctx)
                    .args(["-cNSpecLib_merged", "-cJA", lib.as_str(), libfree.as_str()]);
                ctx.runner.run(&merge, sink).await?;
                "SpecLib_merged.splib".to_string()
            }
            more => {
                return Err(PipelineError::MalformedInput(format!(
                    "unexpected spectral libraries: {}",
                    more.join(",")
                )))
            }
        };

        let consensus = self
            .spectrast(ctx)
            .arg("-cNSpecLib_cons")
            .arg(format!("-cD{}", DECOY_DATABASE_FILE))
            .args(["-cIHCD", "-cAC"])
            .arg(&speclib);
        ctx.runner.run(&consensus, sink).await?;

        let (min, max) = ctx
            .swaths
            .as_ref()
            .map(|s| (s.min(), s.max()))
            .ok_or_else(|| PipelineError::MalformedInput("swath windows not computed".to_string()))?;
        let transitions = ctx
            .command("spectrast2tsv.py")
            .arg("-l")
            .arg(format!("{},{}", format_float(min), format_float(max)))
            .args(["-s", "y,b", "-d", "-e", "-o", "6", "-n", "6", "-w", SWATH_WINDOWS_FILE])
            .args(["-k", "openswath", "-a", "SpecLib_cons_openswath.tsv", "SpecLib_cons.sptxt"]);
        ctx.runner.run(&transitions, sink).await?;

        let traml = ctx.command("TargetedFileConverter").args([
            "-in",
            "SpecLib_cons_openswath.tsv",
            "-out",
            "SpecLib_cons.TraML",
        ]);
        ctx.runner.run(&traml, sink).await?;

        let decoys = ctx.command("OpenSwathDecoyGenerator").args([
            "-in",
            "SpecLib_cons.TraML",
            "-out",
            SPECTRAL_LIBRARY_FILE,
            "-method",
            "shuffle",
        ]);
        ctx.runner.run(&decoys, sink).await?;

        sink.update_n_of_m(total, total);
        tracing::info!(job = %ctx.job.name, speclib = %speclib, "Assay library built");
        Ok(())
    }

    /// Spectral library of one method; returns its `.splib` file name
    async fn build_method_library(
        &self,
        ctx: &RunContext<'_>,
        sink: &ProgressSink,
        method: &str,
        peps: &[String],
    ) -> Result<String, PipelineError> {
        let pep_xml = if let [single] = peps {
            single.clone()
        } else {
            let combined = format!("{}_iprofet.peps.xml", method);
            let combine = ctx
                .command(self.tools.tpp("InterProphetParser"))
                .arg(format!("DECOY={}", DECOY_PREFIX))
                .arg(format!("THREADS={}", ctx.threads))
                .args(peps)
                .arg(&combined);
            ctx.runner.run(&combine, sink).await?;
            combined
        };

        let mayu_dir = ctx.job_dir().join(format!("{}_mayu", method));
        std::fs::create_dir_all(&mayu_dir)?;
        let fdr = format_float(ctx.config().pvalue);
        let mayu = Invocation::new(self.tools.tpp("Mayu.pl"), &mayu_dir)
            .arg("-A")
            .arg(format!("../{}", pep_xml))
            .arg("-C")
            .arg(format!("../{}", DECOY_DATABASE_FILE))
            .args(["-E", DECOY_PREFIX, "-G", fdr.as_str(), "-H", "51", "-I", "2", "-P"])
            .arg(format!("protFDR={}:t", fdr));
        ctx.runner.run(&mayu, sink).await?;

        let cutoff = read_mayu_cutoff(&mayu_dir)?;
        ctx.runner
            .log()
            .line(&format!("Mayu PSM probability cutoff for {}: {}", method, cutoff));

        let import = self
            .spectrast(ctx)
            .arg(format!("-cNSpecLib_{}", method))
            .args(["-cIHCD", "-cf"])
            .arg(format!("Protein! ~ {}", DECOY_PREFIX))
            .arg(format!("-cP{}", cutoff))
            .arg(format!("-c_IRT{}", self.tools.share("iRT.txt").display()))
            .arg("-c_IRR")
            .arg(&pep_xml);
        ctx.runner.run(&import, sink).await?;
        Ok(format!("SpecLib_{}.splib", method))
    }

    fn spectrast(&self, ctx: &RunContext<'_>) -> Invocation {
        ctx.command(self.tools.tpp("spectrast"))
    }
}

/// Smallest PSM probability cutoff reported by Mayu in `mayu_dir`
///
/// Reads every `*_psm_protFDR0*.csv` in name order, skipping each header,
/// and returns the lexically first distinct value of the cutoff column.
pub fn read_mayu_cutoff(mayu_dir: &Path) -> Result<String, PipelineError> {
    let mut reports: Vec<_> = std::fs::read_dir(mayu_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains("_psm_protFDR0") && n.ends_with(".csv"))
        })
        .collect();
    reports.sort();

    let mut values = BTreeSet::new();
    for report in &reports {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(report)?;
        for record in reader.records() {
            if let Some(value) = record?.get(MAYU_CUTOFF_COLUMN).map(str::trim) {
                if !value.is_empty() {
                    values.insert(value.to_string());
                }
            }
        }
    }

    values.into_iter().next().ok_or_else(|| {
        PipelineError::MalformedInput(format!(
            "no Mayu PSM cutoff found in {}",
            mayu_dir.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const HEADER: &str = "target_PSM,decoy_PSM,FP_PSM,TP_PSM,IP/PPs,mFDR\n";

    #[test]
    fn test_mayu_cutoff_takes_first_sorted_value() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("lib_psm_protFDR0.01_t_1.07.csv"),
            format!("{}10,1,1,9,0.9912,0.01\n12,1,1,11,0.9871,0.01\n", HEADER),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("lib_psm_protFDR0.02_t_1.07.csv"),
            format!("{}10,1,1,9,0.9912,0.02\n", HEADER),
        )
        .unwrap();
        std::fs::write(dir.path().join("lib_main_1.07.csv"), "a,b,c,d,0.1\n").unwrap();

        assert_eq!(read_mayu_cutoff(dir.path()).unwrap(), "0.9871");
    }

    #[test]
    fn test_mayu_cutoff_missing_reports() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_mayu_cutoff(dir.path()),
            Err(PipelineError::MalformedInput(_))
        ));

        std::fs::write(dir.path().join("x_psm_protFDR0.01_t.csv"), HEADER).unwrap();
        assert!(matches!(
            read_mayu_cutoff(dir.path()),
            Err(PipelineError::MalformedInput(_))
        ));
    }
}
