//! MATRICES phase
//!
//! Extracts peptides from every DIA sample with OpenSwathWorkflow, scores
//! them with pyprophet, aligns the runs with TRIC and summarizes the result
//! into peptide and protein matrices. A sample failing extraction or
//! scoring is dropped; the phase fails only when no sample survives.

use super::{file_name, PipelineOrchestrator, RunContext};
use crate::error::PipelineError;
use crate::models::ProgressSink;
use crate::services::checkpoint_scanner::{ANALYSIS_RESULT_FILE, SPECTRAL_LIBRARY_FILE};
use crate::services::swath_windows::{format_float, TRUNCATED_SWATH_WINDOWS_FILE};

impl PipelineOrchestrator {
    pub(super) async fn phase_matrices(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let samples = ctx.samples.clone();
        let total = samples.len() * 2 + 1;
        let mut steps = 0;

        let mut extracted = Vec::with_capacity(samples.len());
        for sample in &samples {
            let base = file_name(sample);
            let workflow = ctx
                .command("OpenSwathWorkflow")
                .arg("-in")
                .arg(ctx.resolve(sample))
                .args(["-tr", SPECTRAL_LIBRARY_FILE, "-tr_irt"])
                .arg(self.tools.share("iRTAssayLibrary.TraML"))
                .arg("-out_tsv")
                .arg(format!("{}-DIA.tsv", base))
                .args(["-min_upper_edge_dist", "1", "-sort_swath_maps"])
                .args(["-swath_windows_file", TRUNCATED_SWATH_WINDOWS_FILE, "-force", "-threads"])
                .arg(ctx.threads.to_string());
            if ctx.runner.run_tolerant(&workflow).await? {
                extracted.push(base);
            } else {
                skip_sample(ctx, sample);
            }
            steps += 1;
            sink.update_n_of_m(steps, total);
        }

        let mut scored = Vec::with_capacity(extracted.len());
        for base in &extracted {
            let pyprophet = ctx
                .command("pyprophet")
                .args(["--delim=tab", "--export.mayu"])
                .arg(format!("{}-DIA.tsv", base))
                .arg("--ignore.invalid_score_columns")
                .env_remove("PYTHONPATH");
            if ctx.runner.run_tolerant(&pyprophet).await? {
                scored.push(base.clone());
            } else {
                skip_sample(ctx, base);
            }
            steps += 1;
            sink.update_n_of_m(steps, total);
        }

        if scored.is_empty() {
            return Err(PipelineError::MalformedInput(
                "no DIA sample survived peptide extraction and scoring".to_string(),
            ));
        }
        tracing::info!(job = %ctx.job.name, samples = samples.len(), scored = scored.len(), "DIA samples scored");

        let alignment = ctx
            .command("feature_alignment.py")
            .args(["--method", "best_overall", "--realign_method", "diRT", "--max_rt_diff", "90"])
            .arg("--target_fdr")
            .arg(format_float(ctx.config().trig_target_pvalue))
            .arg("--max_fdr_quality")
            .arg(format_float(ctx.config().trig_max_pvalue))
            .args(["--out", ANALYSIS_RESULT_FILE, "--in"])
            .args(scored.iter().map(|base| format!("{}-DIA_with_dscore.csv", base)));
        ctx.runner.run(&alignment, sink).await?;

        let mut summary = ctx
            .command(self.tools.share("swaths2stats.R"))
            .args(["--input", ANALYSIS_RESULT_FILE]);
        if let Some(design) = ctx.config().design_file.as_deref().filter(|d| !d.is_empty()) {
            summary = summary.arg("--design-file").arg(ctx.resolve(design));
        }
        ctx.runner.run(&summary, sink).await?;

        sink.update_n_of_m(total, total);
        Ok(())
    }
}

fn skip_sample(ctx: &RunContext<'_>, sample: &str) {
    tracing::warn!(job = %ctx.job.name, sample = %sample, "DIA sample failed, skipping");
    ctx.runner
        .log()
        .line(&format!("DIA sample {} failed. Skipping the sample.", sample));
}
