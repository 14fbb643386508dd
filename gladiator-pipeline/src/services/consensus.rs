//! Consensus labelling of peptides from protein annotation tables
//!
//! An annotation table maps protein identifiers to one label per category
//! (organism, function, ...). A peptide usually maps to several proteins;
//! [`aggregate`] folds their labels into one value per category.

use crate::error::PipelineError;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Label used when no identifier matched
pub const UNKNOWN: &str = "unknown";
/// Label used when too many distinct labels matched
pub const AMBIGUOUS: &str = "ambiguous";

/// category → identifier → label, categories kept in table column order
#[derive(Debug, Clone, Default)]
pub struct AnnotationDictionaries {
    categories: Vec<String>,
    labels: HashMap<String, HashMap<String, String>>,
}

impl AnnotationDictionaries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `label` for `id`; later tables override earlier ones
    pub fn insert(&mut self, category: &str, id: &str, label: &str) {
        if !self.labels.contains_key(category) {
            self.categories.push(category.to_string());
        }
        self.labels
            .entry(category.to_string())
            .or_default()
            .insert(id.to_string(), label.to_string());
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn lookup(&self, category: &str, id: &str) -> Option<&str> {
        self.labels
            .get(category)
            .and_then(|m| m.get(id))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    /// Merge a tab-separated annotation table into the dictionaries
    ///
    /// Every column except `id_column` becomes a category. Labels are
    /// trimmed; empty cells are not recorded. Without `id_column` the first
    /// column holds the identifiers.
    pub fn load_tsv(&mut self, path: &Path, id_column: Option<&str>) -> Result<usize, PipelineError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path)
            .map_err(|e| PipelineError::MalformedInput(format!("{}: {}", path.display(), e)))?;

        let headers = reader.headers()?.clone();
        let id_index = match id_column {
            Some(column) => headers.iter().position(|h| h == column).ok_or_else(|| {
                PipelineError::MalformedInput(format!(
                    "{}: no identifier column {:?}",
                    path.display(),
                    column
                ))
            })?,
            None if !headers.is_empty() => 0,
            None => {
                return Err(PipelineError::MalformedInput(format!(
                    "{}: empty header",
                    path.display()
                )))
            }
        };

        let mut rows = 0;
        for record in reader.records() {
            let record = record?;
            let Some(id) = record.get(id_index).map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            for (index, category) in headers.iter().enumerate() {
                if index == id_index {
                    continue;
                }
                if let Some(label) = record.get(index).map(str::trim).filter(|s| !s.is_empty()) {
                    self.insert(category, id, label);
                }
            }
            rows += 1;
        }
        Ok(rows)
    }
}

/// Fold a set of distinct labels into one consensus value
///
/// `unknown` is dropped when something more specific matched. With more
/// than one label left, the sorted labels are `;`-joined unless their count
/// reaches `ambiguous_threshold`. An unset or zero threshold always joins.
pub fn resolve(labels: &BTreeSet<&str>, ambiguous_threshold: Option<usize>) -> String {
    let mut labels = labels.clone();
    if labels.len() > 1 {
        labels.remove(UNKNOWN);
    }
    match labels.len() {
        0 => UNKNOWN.to_string(),
        1 => labels.iter().next().map(|l| l.to_string()).unwrap_or_default(),
        n => match ambiguous_threshold {
            Some(threshold) if threshold > 0 && n >= threshold => AMBIGUOUS.to_string(),
            _ => labels.into_iter().collect::<Vec<_>>().join(";"),
        },
    }
}

/// Consensus label per category for one entity, in category order
pub fn aggregate<S: AsRef<str>>(
    identifiers: &[S],
    dictionaries: &AnnotationDictionaries,
    ambiguous_threshold: Option<usize>,
) -> Vec<String> {
    dictionaries
        .categories()
        .iter()
        .map(|category| {
            let labels: BTreeSet<&str> = identifiers
                .iter()
                .filter_map(|id| dictionaries.lookup(category, id.as_ref()))
                .collect();
            resolve(&labels, ambiguous_threshold)
        })
        .collect()
}

/// True when `proteins` mentions any of the contaminant markers
pub fn is_contaminant(proteins: &str, contaminants: &[String]) -> bool {
    contaminants
        .iter()
        .filter(|c| !c.is_empty())
        .any(|c| proteins.contains(c.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn organisms(entries: &[(&str, &str)]) -> AnnotationDictionaries {
        let mut dicts = AnnotationDictionaries::new();
        for (id, label) in entries {
            dicts.insert("Organism", id, label);
        }
        dicts
    }

    #[test]
    fn test_two_organisms_with_threshold() {
        let dicts = organisms(&[("A", "human"), ("B", "mouse")]);
        assert_eq!(aggregate(&["A", "B"], &dicts, Some(2)), vec!["ambiguous"]);
        assert_eq!(aggregate(&["A", "B"], &dicts, Some(3)), vec!["human;mouse"]);
    }

    #[test]
    fn test_unset_threshold_joins_everything() {
        let dicts = organisms(&[("A", "human"), ("B", "mouse"), ("C", "rat")]);
        assert_eq!(
            aggregate(&["C", "A", "B"], &dicts, None),
            vec!["human;mouse;rat"]
        );
        assert_eq!(
            aggregate(&["C", "A", "B"], &dicts, Some(0)),
            vec!["human;mouse;rat"]
        );
    }

    #[test]
    fn test_unknown_gives_way_to_known_label() {
        let dicts = organisms(&[("A", "unknown"), ("B", "yeast")]);
        for threshold in [None, Some(2), Some(3)] {
            assert_eq!(aggregate(&["A", "B"], &dicts, threshold), vec!["yeast"]);
        }
    }

    #[test]
    fn test_no_match_is_unknown() {
        let dicts = organisms(&[("A", "human")]);
        assert_eq!(aggregate(&["X", "Y"], &dicts, Some(2)), vec!["unknown"]);
        let none: [&str; 0] = [];
        assert_eq!(aggregate(&none, &dicts, Some(2)), vec!["unknown"]);
    }

    #[test]
    fn test_duplicate_labels_count_once() {
        let dicts = organisms(&[("A", "human"), ("B", "human")]);
        assert_eq!(aggregate(&["A", "B"], &dicts, Some(2)), vec!["human"]);
    }

    #[test]
    fn test_categories_are_independent() {
        let mut dicts = organisms(&[("A", "human"), ("B", "mouse")]);
        dicts.insert("Function", "A", "kinase");
        dicts.insert("Function", "B", "kinase");
        assert_eq!(
            aggregate(&["A", "B"], &dicts, Some(2)),
            vec!["ambiguous", "kinase"]
        );
    }

    #[test]
    fn test_contaminant_filter() {
        let markers = vec!["CONTAM_".to_string(), String::new()];
        assert!(is_contaminant("P1;CONTAM_P2", &markers));
        assert!(!is_contaminant("P1;P2", &markers));
        assert!(!is_contaminant("P1", &[]));
    }

    #[test]
    fn test_load_tsv_trims_and_skips_empty_cells() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Entry\tOrganism\tFunction").unwrap();
        writeln!(file, "P1\t Homo sapiens \tkinase").unwrap();
        writeln!(file, "P2\tMus musculus\t").unwrap();
        file.flush().unwrap();

        let mut dicts = AnnotationDictionaries::new();
        let rows = dicts.load_tsv(file.path(), Some("Entry")).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(dicts.categories(), &["Organism".to_string(), "Function".to_string()]);
        assert_eq!(dicts.lookup("Organism", "P1"), Some("Homo sapiens"));
        assert_eq!(dicts.lookup("Function", "P2"), None);
    }

    #[test]
    fn test_load_tsv_missing_id_column() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "Entry\tOrganism").unwrap();
        file.flush().unwrap();

        let mut dicts = AnnotationDictionaries::new();
        assert!(matches!(
            dicts.load_tsv(file.path(), Some("Accession")),
            Err(PipelineError::MalformedInput(_))
        ));
    }
}
