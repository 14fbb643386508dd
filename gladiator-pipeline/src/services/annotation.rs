//! Annotation of the swaths2stats peptide matrix
//!
//! Reads `DIA-peptide-matrix.tsv`, derives the protein identifiers of each
//! peptide from its `ProteinName_FullPeptideName` key, labels it through
//! [`consensus::aggregate`] and writes `annotations.tsv` and `matrix.tsv`.

use crate::error::PipelineError;
use crate::models::ProgressSink;
use crate::services::checkpoint_scanner::{ANNOTATED_MATRIX_FILE, ANNOTATIONS_FILE, PEPTIDE_MATRIX_FILE};
use crate::services::consensus::{self, AnnotationDictionaries};
use crate::services::swath_windows::format_float;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Key column of the swaths2stats peptide table
pub const KEY_COLUMN: &str = "ProteinName_FullPeptideName";

#[derive(Debug, Clone, Default)]
pub struct AnnotationSettings {
    /// Identifier column of the annotation tables; first column when unset
    pub id_column: Option<String>,
    pub ambiguous_threshold: Option<usize>,
    /// Collapse peptides that differ only by UniMod modifications
    pub merge_unimods: bool,
    pub contaminants: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationSummary {
    pub categories: usize,
    pub peptides: usize,
    pub written: usize,
    pub contaminants_dropped: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeptideRow {
    pub key: String,
    pub peptide: String,
    pub proteins: BTreeSet<String>,
    pub values: Vec<String>,
}

impl PeptideRow {
    pub fn proteins_joined(&self) -> String {
        self.proteins.iter().cloned().collect::<Vec<_>>().join(";")
    }
}

/// Peptide intensities per sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeptideMatrix {
    pub samples: Vec<String>,
    pub rows: Vec<PeptideRow>,
}

/// Split `"2/P1/P2_PEPTIDEK"` into the peptide and its protein identifiers
///
/// The leading element of the protein part is the protein count and is
/// dropped.
pub fn split_key(key: &str) -> (String, BTreeSet<String>) {
    let (prefix, peptide) = key.rsplit_once('_').unwrap_or(("", key));
    let proteins = prefix
        .split('/')
        .skip(1)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    (peptide.trim().to_string(), proteins)
}

fn unimod_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\(UniMod:\d+\)").expect("static pattern"))
}

/// Peptide sequence without `(UniMod:N)` modification tags
pub fn strip_unimods(peptide: &str) -> String {
    unimod_pattern().replace_all(peptide, "").into_owned()
}

impl PeptideMatrix {
    pub fn read(path: &Path) -> Result<Self, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)
            .map_err(|e| PipelineError::MalformedInput(format!("{}: {}", path.display(), e)))?;

        let headers = reader.headers()?.clone();
        let key_index = headers.iter().position(|h| h == KEY_COLUMN).ok_or_else(|| {
            PipelineError::MalformedInput(format!("{}: no {} column", path.display(), KEY_COLUMN))
        })?;
        let sample_indices: Vec<usize> = (0..headers.len()).filter(|&i| i != key_index).collect();

        let mut matrix = PeptideMatrix {
            samples: sample_indices.iter().map(|&i| headers[i].to_string()).collect(),
            rows: Vec::new(),
        };
        for record in reader.records() {
            let record = record?;
            let key = record.get(key_index).unwrap_or_default().to_string();
            let (peptide, proteins) = split_key(&key);
            matrix.rows.push(PeptideRow {
                key,
                peptide,
                proteins,
                values: sample_indices
                    .iter()
                    .map(|&i| record.get(i).unwrap_or_default().to_string())
                    .collect(),
            });
        }
        Ok(matrix)
    }

    /// Sum rows whose peptides are equal once modifications are removed
    ///
    /// The merged row is keyed by the bare sequence and carries the union
    /// of the proteins. Non-numeric cells count as zero.
    pub fn merge_unimods(self) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (BTreeSet<String>, Vec<f64>)> = HashMap::new();
        let width = self.samples.len();

        for row in self.rows {
            let sequence = strip_unimods(&row.peptide);
            let entry = groups.entry(sequence.clone()).or_insert_with(|| {
                order.push(sequence);
                (BTreeSet::new(), vec![0.0; width])
            });
            entry.0.extend(row.proteins);
            for (sum, value) in entry.1.iter_mut().zip(&row.values) {
                *sum += value.trim().parse::<f64>().unwrap_or(0.0);
            }
        }

        let rows = order
            .into_iter()
            .filter_map(|sequence| {
                let (proteins, sums) = groups.remove(&sequence)?;
                Some(PeptideRow {
                    key: sequence.clone(),
                    peptide: sequence,
                    proteins,
                    values: sums.into_iter().map(format_float).collect(),
                })
            })
            .collect();

        PeptideMatrix {
            samples: self.samples,
            rows,
        }
    }
}

/// Merge every annotation table into one set of dictionaries
pub fn load_dictionaries(
    files: &[PathBuf],
    id_column: Option<&str>,
) -> Result<AnnotationDictionaries, PipelineError> {
    let mut dictionaries = AnnotationDictionaries::new();
    for file in files {
        let rows = dictionaries.load_tsv(file, id_column)?;
        debug!(file = %file.display(), rows, "Loaded annotation table");
    }
    Ok(dictionaries)
}

/// Annotate `<job_dir>/DIA-peptide-matrix.tsv`
///
/// Writes `annotations.tsv` and `matrix.tsv` into `job_dir`. The token is
/// checked once per peptide; a cancelled run leaves no output files.
pub fn annotate_matrix(
    job_dir: &Path,
    annotation_files: &[PathBuf],
    settings: &AnnotationSettings,
    token: &CancellationToken,
    sink: &ProgressSink,
) -> Result<AnnotationSummary, PipelineError> {
    let dictionaries = load_dictionaries(annotation_files, settings.id_column.as_deref())?;
    let mut matrix = PeptideMatrix::read(&job_dir.join(PEPTIDE_MATRIX_FILE))?;
    if settings.merge_unimods {
        matrix = matrix.merge_unimods();
    }

    let total = matrix.rows.len();
    let mut summary = AnnotationSummary {
        categories: dictionaries.categories().len(),
        peptides: total,
        ..Default::default()
    };

    let mut labelled: Vec<(&PeptideRow, Vec<String>)> = Vec::with_capacity(total);
    for (n, row) in matrix.rows.iter().enumerate() {
        if token.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let ids: Vec<&str> = row.proteins.iter().map(String::as_str).collect();
        let labels = consensus::aggregate(&ids, &dictionaries, settings.ambiguous_threshold);

        if consensus::is_contaminant(&row.proteins_joined(), &settings.contaminants) {
            summary.contaminants_dropped += 1;
        } else {
            labelled.push((row, labels));
        }
        sink.update_n_of_m(n + 1, total);
    }
    summary.written = labelled.len();

    let mut annotations = tsv_writer(&job_dir.join(ANNOTATIONS_FILE))?;
    let mut header = vec![KEY_COLUMN.to_string(), "Peptide".into(), "Proteins".into()];
    header.extend(dictionaries.categories().iter().cloned());
    annotations.write_record(&header)?;
    for (row, labels) in &labelled {
        let mut record = vec![row.key.clone(), row.peptide.clone(), row.proteins_joined()];
        record.extend(labels.iter().cloned());
        annotations.write_record(&record)?;
    }
    annotations.flush()?;

    let mut values = tsv_writer(&job_dir.join(ANNOTATED_MATRIX_FILE))?;
    let mut header = vec![KEY_COLUMN.to_string()];
    header.extend(matrix.samples.iter().cloned());
    values.write_record(&header)?;
    for (row, _) in &labelled {
        let mut record = vec![row.key.clone()];
        record.extend(row.values.iter().cloned());
        values.write_record(&record)?;
    }
    values.flush()?;

    info!(
        dir = %job_dir.display(),
        peptides = summary.peptides,
        written = summary.written,
        contaminants = summary.contaminants_dropped,
        "Peptide matrix annotated"
    );
    Ok(summary)
}

fn tsv_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, PipelineError> {
    csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(PipelineError::from)
}

/// Column names of `annotations.tsv` after the key column
pub fn annotation_columns(job_dir: &Path) -> Result<Vec<String>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(job_dir.join(ANNOTATIONS_FILE))?;
    Ok(reader.headers()?.iter().skip(1).map(str::to_string).collect())
}
