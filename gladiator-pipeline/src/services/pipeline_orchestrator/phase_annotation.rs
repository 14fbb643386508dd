//! ANNOTATION and FIGURES phases

use super::{PipelineOrchestrator, RunContext};
use crate::error::PipelineError;
use crate::models::ProgressSink;
use crate::services::annotation::{self, AnnotationSettings};
use crate::services::checkpoint_scanner::{FIGURES_DIR, FIGURE_CONFIG_FILE};
use serde_json::{Map, Value};

impl PipelineOrchestrator {
    /// Label the peptide matrix from the configured annotation table
    pub(super) async fn phase_annotation(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let config = ctx.config();
        let table = config.annotation_path(&self.result_root).ok_or_else(|| {
            PipelineError::MalformedInput("no annotation file configured".to_string())
        })?;
        let settings = AnnotationSettings {
            id_column: config.annotation_id_column.clone().filter(|c| !c.is_empty()),
            ambiguous_threshold: config.ambiguous_threshold(),
            merge_unimods: config.annotation_merge_unimods,
            contaminants: config.annotation_contaminants.clone(),
        };
        tracing::info!(job = %ctx.job.name, table = %table.display(), "Annotating peptides");

        let job_dir = ctx.job_dir().to_path_buf();
        let token = ctx.runner.token().clone();
        let sink = sink.clone();
        let summary = tokio::task::spawn_blocking(move || {
            annotation::annotate_matrix(&job_dir, &[table], &settings, &token, &sink)
        })
        .await
        .map_err(|e| PipelineError::Io(std::io::Error::other(e)))??;

        ctx.runner.log().line(&format!(
            "Annotated {} of {} peptides ({} contaminants dropped)",
            summary.written, summary.peptides, summary.contaminants_dropped
        ));
        Ok(())
    }

    /// Write the figure configuration listing the annotation columns
    ///
    /// Plot rendering happens outside the pipeline; every column starts
    /// without a selected value.
    pub(super) async fn phase_figures(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let figures = ctx.job_dir().join(FIGURES_DIR);
        std::fs::create_dir_all(&figures)?;

        let columns = annotation::annotation_columns(ctx.job_dir())?;
        let config: Map<String, Value> = columns
            .into_iter()
            .map(|column| (column, Value::Null))
            .collect();
        std::fs::write(
            figures.join(FIGURE_CONFIG_FILE),
            serde_json::to_string(&config)?,
        )?;
        sink.update_n_of_m(1, 1);
        Ok(())
    }
}
