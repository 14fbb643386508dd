//! Persisted job configuration (`config.txt`)
//!
//! The file is JSON and is read back verbatim on rerun, so a rerun is a
//! function of the original configuration plus the current filesystem.
//! Unknown keys and unknown option flags are carried through untouched.

use crate::error::PipelineError;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// File name of the persisted configuration inside a job directory
pub const CONFIG_FILE: &str = "config.txt";

/// Recognised entries of the `options` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobOption {
    UseComet,
    UseXTandem,
    UsePseudospectra,
    DdaLibrary,
    AnnotatePeptides,
    ForceThreads,
}

impl JobOption {
    /// Spelling used in config.txt
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOption::UseComet => "use_comet_flag",
            JobOption::UseXTandem => "use_xtandem_flag",
            // sic, the on-disk spelling
            JobOption::UsePseudospectra => "use_speudospectra_flag",
            JobOption::DdaLibrary => "dda_library",
            JobOption::AnnotatePeptides => "annotate_peptides",
            JobOption::ForceThreads => "force_threads",
        }
    }
}

/// Input file lists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFiles {
    #[serde(default)]
    pub samples: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub library: Vec<String>,
    #[serde(default)]
    pub database: Vec<String>,
}

/// Job configuration as stored in `config.txt`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub analysis_name: String,

    pub files: InputFiles,

    /// FDR used for the spectral library build
    #[serde(default = "default_fdr", deserialize_with = "number_or_string")]
    pub pvalue: f64,

    /// Target FDR of the TRIC feature alignment
    #[serde(default = "default_fdr", deserialize_with = "number_or_string")]
    pub trig_target_pvalue: f64,

    /// Max FDR quality of the TRIC feature alignment
    #[serde(default = "default_max_fdr", deserialize_with = "number_or_string")]
    pub trig_max_pvalue: f64,

    #[serde(default)]
    pub options: Vec<String>,

    /// Honoured only with the `force_threads` option
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,

    #[serde(
        default = "default_precursor_tolerance",
        deserialize_with = "number_or_string"
    )]
    pub precursor_tolerance: f64,

    #[serde(
        default = "default_fragment_tolerance",
        deserialize_with = "number_or_string"
    )]
    pub fragment_tolerance: f64,

    /// Annotation TSV, relative to the result root unless absolute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_filename: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_id_column: Option<String>,

    #[serde(default)]
    pub annotation_assign_ambiguous: bool,

    #[serde(default)]
    pub annotation_merge_unimods: bool,

    /// Peptides whose protein list contains any of these are dropped
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotation_contaminants: Vec<String>,

    /// Sample design handed to swaths2stats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design_file: Option<String>,

    /// Keep X!Tandem input files after the search
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retain_tmp_files: bool,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_fdr() -> f64 {
    0.01
}

fn default_max_fdr() -> f64 {
    0.05
}

fn default_precursor_tolerance() -> f64 {
    20.0
}

fn default_fragment_tolerance() -> f64 {
    0.02
}

/// Accept `0.01` as well as `"0.01"`
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid number {:?}: {}", s, e))),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl JobConfig {
    /// Minimal configuration for the given inputs, all other fields at defaults
    pub fn new(analysis_name: impl Into<String>, files: InputFiles) -> Self {
        Self {
            analysis_name: analysis_name.into(),
            files,
            pvalue: default_fdr(),
            trig_target_pvalue: default_fdr(),
            trig_max_pvalue: default_max_fdr(),
            options: Vec::new(),
            threads: None,
            precursor_tolerance: default_precursor_tolerance(),
            fragment_tolerance: default_fragment_tolerance(),
            annotation_filename: None,
            annotation_id_column: None,
            annotation_assign_ambiguous: false,
            annotation_merge_unimods: false,
            annotation_contaminants: Vec::new(),
            design_file: None,
            retain_tmp_files: false,
            extra: serde_json::Map::new(),
        }
    }

    /// Load `config.txt` from a job directory
    pub fn load(job_dir: &Path) -> Result<Self, PipelineError> {
        let path = job_dir.join(CONFIG_FILE);
        if !path.is_file() {
            return Err(PipelineError::ConfigurationMissing(path));
        }
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::MalformedInput(format!("{}: {}", path.display(), e)))
    }

    /// Write `config.txt` into a job directory
    pub fn save(&self, job_dir: &Path) -> Result<(), PipelineError> {
        let content = serde_json::to_string(self)?;
        std::fs::write(job_dir.join(CONFIG_FILE), content)?;
        Ok(())
    }

    pub fn has(&self, option: JobOption) -> bool {
        self.options.iter().any(|o| o == option.as_str())
    }

    /// Add an option unless already present
    pub fn enable(&mut self, option: JobOption) {
        if !self.has(option) {
            self.options.push(option.as_str().to_string());
        }
    }

    /// Spectral library built from DDA runs
    pub fn uses_dda_library(&self) -> bool {
        !self.files.library.is_empty() && self.has(JobOption::DdaLibrary)
    }

    /// Library built from DIA-Umpire pseudo-spectra
    pub fn uses_pseudospectra(&self) -> bool {
        self.has(JobOption::UsePseudospectra) || !self.uses_dda_library()
    }

    pub fn annotation_configured(&self) -> bool {
        self.has(JobOption::AnnotatePeptides)
            && self
                .annotation_filename
                .as_deref()
                .is_some_and(|f| !f.trim().is_empty())
    }

    /// Distinct-label count at which a peptide becomes `ambiguous`
    pub fn ambiguous_threshold(&self) -> Option<usize> {
        self.annotation_assign_ambiguous.then_some(2)
    }

    /// Thread count handed to external tools
    pub fn effective_threads(&self) -> usize {
        match (self.has(JobOption::ForceThreads), self.threads) {
            (true, Some(n)) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    pub fn sample_stems(&self) -> Vec<String> {
        self.files.samples.iter().map(|f| file_stem(f)).collect()
    }

    pub fn library_stems(&self) -> Vec<String> {
        self.files.library.iter().map(|f| file_stem(f)).collect()
    }

    /// Lower-cased extensions of the sample files
    pub fn sample_extensions(&self) -> BTreeSet<String> {
        extensions(&self.files.samples)
    }

    pub fn library_extensions(&self) -> BTreeSet<String> {
        extensions(&self.files.library)
    }

    /// Annotation file resolved against the result root
    pub fn annotation_path(&self, result_root: &Path) -> Option<PathBuf> {
        self.annotation_filename
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .map(|f| result_root.join(f))
    }
}

/// File name without folders and without the last extension
pub fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lower-cased last extension including the dot (".raw")
pub fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

fn extensions(files: &[String]) -> BTreeSet<String> {
    files.iter().map(|f| extension(f)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UI_CONFIG: &str = r#"{
        "analysis_name": "PD92",
        "files": {
            "samples": ["/data/a.mzML", "/data/b.mzML"],
            "library": [],
            "database": ["/data/human.fasta"]
        },
        "pvalue": "0.01",
        "trig_target_pvalue": 0.01,
        "trig_max_pvalue": "0.05",
        "options": ["use_comet_flag", "use_speudospectra_flag", "annotate_peptides", "shiny_new_flag"],
        "precursor_tolerance": "25",
        "fragment_tolerance": 0.02,
        "annotation_filename": "annot/uniprot.tsv",
        "annotation_id_column": "Entry",
        "annotation_assign_ambiguous": true,
        "sample_rename_map_file": null
    }"#;

    #[test]
    fn test_parses_strings_and_numbers() {
        let cfg: JobConfig = serde_json::from_str(UI_CONFIG).unwrap();
        assert_eq!(cfg.pvalue, 0.01);
        assert_eq!(cfg.trig_max_pvalue, 0.05);
        assert_eq!(cfg.precursor_tolerance, 25.0);
        assert!(cfg.has(JobOption::UseComet));
        assert!(cfg.has(JobOption::UsePseudospectra));
        assert!(!cfg.has(JobOption::UseXTandem));
        assert_eq!(cfg.ambiguous_threshold(), Some(2));
        assert!(cfg.annotation_configured());
    }

    #[test]
    fn test_unknown_keys_and_flags_survive_save_and_load() {
        let dir = TempDir::new().unwrap();
        let cfg: JobConfig = serde_json::from_str(UI_CONFIG).unwrap();
        cfg.save(dir.path()).unwrap();

        let loaded = JobConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, cfg);
        assert!(loaded.options.iter().any(|o| o == "shiny_new_flag"));
        assert!(loaded.extra.contains_key("sample_rename_map_file"));
    }

    #[test]
    fn test_missing_config_is_reported() {
        let dir = TempDir::new().unwrap();
        match JobConfig::load(dir.path()) {
            Err(PipelineError::ConfigurationMissing(path)) => {
                assert!(path.ends_with(CONFIG_FILE))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_library_mode_selection() {
        let mut cfg = JobConfig::new(
            "x",
            InputFiles {
                samples: vec!["a.raw".into()],
                library: vec!["lib.raw".into()],
                database: vec!["db.fasta".into()],
            },
        );
        // Library files without the dda_library option are ignored
        assert!(!cfg.uses_dda_library());
        assert!(cfg.uses_pseudospectra());

        cfg.enable(JobOption::DdaLibrary);
        assert!(cfg.uses_dda_library());
        assert!(!cfg.uses_pseudospectra());

        cfg.enable(JobOption::UsePseudospectra);
        assert!(cfg.uses_dda_library());
        assert!(cfg.uses_pseudospectra());
    }

    #[test]
    fn test_forced_threads() {
        let mut cfg = JobConfig::new("x", InputFiles::default());
        cfg.threads = Some(3);
        assert!(cfg.effective_threads() >= 1);
        cfg.enable(JobOption::ForceThreads);
        assert_eq!(cfg.effective_threads(), 3);
    }

    #[test]
    fn test_stems_and_extensions() {
        assert_eq!(file_stem("/data/run 01.RAW"), "run 01");
        assert_eq!(extension("/data/run 01.RAW"), ".raw");
        assert_eq!(extension("noext"), "");
    }
}
