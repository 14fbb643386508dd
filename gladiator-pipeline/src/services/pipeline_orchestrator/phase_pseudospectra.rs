//! PSEUDOSPECTRA phase
//!
//! Library-free mode: DIA-Umpire extracts pseudo-spectra from each sample.
//!
//! 1. msconvert sample → `libfree/<stem>.mzXML` (no peak picking)
//! 2. DIA-Umpire → `libfree/<stem>_Q1.mgf`, `_Q2.mgf`, `_Q3.mgf`
//! 3. msconvert every mgf → `libfree-pseudospectra/<stem>_Qn.mzXML`
//!
//! Every step is skipped per file when its output already exists.

use super::{PipelineOrchestrator, RunContext};
use crate::error::PipelineError;
use crate::models::{file_stem, ProgressSink};
use crate::services::checkpoint_scanner::{LIBFREE_DIR, PSEUDOSPECTRA_DIR, PSEUDO_TIERS};
use std::path::Path;

const PARAMS_TEMPLATE: &str = "diaumpire-params-template.txt";
const PARAMS_FILE: &str = "diaumpire-params.txt";

impl PipelineOrchestrator {
    pub(super) async fn phase_pseudospectra(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let job_dir = ctx.job_dir().to_path_buf();
        let libfree = job_dir.join(LIBFREE_DIR);
        let pseudo_dir = job_dir.join(PSEUDOSPECTRA_DIR);
        std::fs::create_dir_all(&libfree)?;
        std::fs::create_dir_all(&pseudo_dir)?;

        let template = std::fs::read_to_string(self.tools.share(PARAMS_TEMPLATE))?;
        let params = job_dir.join(PARAMS_FILE);
        std::fs::write(&params, template.replace("THREADS", &ctx.threads.to_string()))?;

        let samples = ctx.samples.clone();
        let total = samples.len() * (2 + PSEUDO_TIERS.len());
        let mut steps = 0;
        tracing::info!(job = %ctx.job.name, samples = samples.len(), "Building pseudo-spectra");

        for sample in &samples {
            let mzxml = libfree.join(format!("{}.mzXML", file_stem(sample)));
            if !mzxml.is_file() {
                let convert = ctx
                    .command(self.tools.tpp("msconvert"))
                    .arg(ctx.resolve(sample))
                    .args(["--32", "--zlib", "--filter", "peakPicking false 1-", "--mzXML", "-o"])
                    .arg(&libfree);
                ctx.runner.run(&convert, sink).await?;
            } else {
                tracing::debug!(job = %ctx.job.name, file = %mzxml.display(), "Already converted, skipping msconvert");
            }
            steps += 1;
            sink.update_n_of_m(steps, total);
        }

        let memory = format!("{}g", available_memory_gib());
        for sample in &samples {
            let stem = file_stem(sample);
            let complete = PSEUDO_TIERS
                .iter()
                .all(|tier| libfree.join(format!("{}_{}.mgf", stem, tier)).is_file());
            if !complete {
                let umpire = ctx
                    .command("java")
                    .arg(format!("-Xms{}", memory))
                    .arg(format!("-Xmx{}", memory))
                    .arg("-jar")
                    .arg(&self.tools.dia_umpire_jar)
                    .arg(libfree.join(format!("{}.mzXML", stem)))
                    .arg(&params);
                ctx.runner.run(&umpire, sink).await?;
            }
            steps += 1;
            sink.update_n_of_m(steps, total);
        }

        for sample in &samples {
            let stem = file_stem(sample);
            for tier in PSEUDO_TIERS {
                let mgf = format!("{}_{}", stem, tier);
                if !libfree.join(format!("{}.mgf", mgf)).is_file() {
                    tracing::warn!(job = %ctx.job.name, file = %mgf, "DIA-Umpire produced no pseudo-spectra tier");
                } else if !pseudo_dir.join(format!("{}.mzXML", mgf)).is_file() {
                    let convert = ctx
                        .command(self.tools.tpp("msconvert"))
                        .arg(format!("{}/{}.mgf", LIBFREE_DIR, mgf))
                        .args(["--mzXML", "-o"])
                        .arg(&pseudo_dir);
                    ctx.runner.run(&convert, sink).await?;
                }
                steps += 1;
                sink.update_n_of_m(steps, total);
            }
        }
        Ok(())
    }
}

/// Pseudo-spectra files present after the phase, relative to the job directory
pub(super) fn present_pseudospectra(job_dir: &Path, sample_stems: &[String]) -> Vec<String> {
    sample_stems
        .iter()
        .flat_map(|stem| PSEUDO_TIERS.iter().map(move |tier| format!("{}_{}", stem, tier)))
        .map(|name| format!("{}/{}.mzXML", PSEUDOSPECTRA_DIR, name))
        .filter(|rel| job_dir.join(rel).is_file())
        .collect()
}

/// Available memory in whole GiB handed to the DIA-Umpire JVM, at least 1
fn available_memory_gib() -> u64 {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|meminfo| parse_mem_available_gib(&meminfo))
        .unwrap_or(1)
        .max(1)
}

fn parse_mem_available_gib(meminfo: &str) -> Option<u64> {
    meminfo
        .lines()
        .find_map(|line| line.strip_prefix("MemAvailable:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kib| kib.parse::<u64>().ok())
        .map(|kib| kib / (1024 * 1024))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_mem_available() {
        let meminfo = "MemTotal:       32781564 kB\nMemFree:         1234567 kB\nMemAvailable:   17825792 kB\n";
        assert_eq!(parse_mem_available_gib(meminfo), Some(17));
        assert_eq!(parse_mem_available_gib("MemTotal: 1 kB\n"), None);
        assert_eq!(parse_mem_available_gib("MemAvailable: 512000 kB\n"), Some(0));
    }

    #[test]
    fn test_present_pseudospectra_lists_existing_tiers() {
        let dir = TempDir::new().unwrap();
        let pseudo = dir.path().join(PSEUDOSPECTRA_DIR);
        std::fs::create_dir_all(&pseudo).unwrap();
        std::fs::write(pseudo.join("s1_Q1.mzXML"), "").unwrap();
        std::fs::write(pseudo.join("s1_Q3.mzXML"), "").unwrap();

        let files = present_pseudospectra(dir.path(), &["s1".to_string(), "s2".to_string()]);
        assert_eq!(
            files,
            vec![
                "libfree-pseudospectra/s1_Q1.mzXML".to_string(),
                "libfree-pseudospectra/s1_Q3.mzXML".to_string()
            ]
        );
    }
}
