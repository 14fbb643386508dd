//! DATABASE phase
//!
//! Merges the FASTA inputs into `DB.fasta` (first occurrence of a sequence
//! ID wins) and builds `DB_with_decoys.fasta` with OpenMS DecoyDatabase.

use super::{PipelineOrchestrator, RunContext};
use crate::error::PipelineError;
use crate::models::ProgressSink;
use crate::services::checkpoint_scanner::{DATABASE_FILE, DECOY_DATABASE_FILE};
use bio::io::fasta;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Result of [`merge_fasta`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FastaMerge {
    pub written: usize,
    /// (sequence ID, file) of every record dropped as a duplicate
    pub duplicates: Vec<(String, String)>,
}

/// Concatenate FASTA files into `output`, dropping repeated sequence IDs
pub fn merge_fasta(inputs: &[PathBuf], output: &Path) -> Result<FastaMerge, PipelineError> {
    let mut writer = fasta::Writer::to_file(output)?;
    let mut seen = HashSet::new();
    let mut merge = FastaMerge::default();

    for input in inputs {
        let reader = fasta::Reader::new(File::open(input)?);
        for record in reader.records() {
            let record = record.map_err(|e| {
                PipelineError::MalformedInput(format!("{}: {}", input.display(), e))
            })?;
            if seen.insert(record.id().to_string()) {
                writer.write_record(&record)?;
                merge.written += 1;
            } else {
                merge
                    .duplicates
                    .push((record.id().to_string(), input.display().to_string()));
            }
        }
    }
    writer.flush()?;
    Ok(merge)
}

impl PipelineOrchestrator {
    pub(super) async fn phase_database(
        &self,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let inputs: Vec<PathBuf> = ctx
            .config()
            .files
            .database
            .iter()
            .map(|f| ctx.resolve(f))
            .collect();
        let total = inputs.len() + 2;
        let output = ctx.job_dir().join(DATABASE_FILE);

        let merge = {
            let inputs = inputs.clone();
            tokio::task::spawn_blocking(move || merge_fasta(&inputs, &output))
                .await
                .map_err(|e| PipelineError::Io(std::io::Error::other(e)))??
        };
        for (id, file) in &merge.duplicates {
            tracing::warn!(job = %ctx.job.name, id = %id, file = %file, "Duplicated sequence ID skipped");
            ctx.runner.log().line(&format!(
                "Found duplicated sequence ID {}, skipping this sequence from file {}",
                id, file
            ));
        }
        tracing::info!(job = %ctx.job.name, sequences = merge.written, files = inputs.len(), "Merged sequence database");
        sink.update_n_of_m(inputs.len() + 1, total);

        ctx.runner.check_cancelled()?;
        let decoys = ctx
            .command("DecoyDatabase")
            .args(["-in", DATABASE_FILE, "-out", DECOY_DATABASE_FILE]);
        ctx.runner.run(&decoys, sink).await?;
        sink.update_n_of_m(total, total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_merge_drops_repeated_ids() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.fasta", ">P1 first\nMKV\n>P2\nAAA\n");
        let b = write(&dir, "b.fasta", ">P2 again\nCCC\n>P3\nGGG\n");
        let out = dir.path().join("DB.fasta");

        let merge = merge_fasta(&[a, b.clone()], &out).unwrap();
        assert_eq!(merge.written, 3);
        assert_eq!(
            merge.duplicates,
            vec![("P2".to_string(), b.display().to_string())]
        );

        let ids: Vec<String> = fasta::Reader::from_file(&out)
            .unwrap()
            .records()
            .map(|r| r.unwrap().id().to_string())
            .collect();
        assert_eq!(ids, vec!["P1", "P2", "P3"]);

        let content = std::fs::read_to_string(&out).unwrap();
        assert!(content.contains("AAA"));
        assert!(!content.contains("CCC"));
    }

    #[test]
    fn test_merge_missing_input_fails() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("DB.fasta");
        assert!(merge_fasta(&[dir.path().join("missing.fasta")], &out).is_err());
    }
}
