//! Filesystem checkpoint detection
//!
//! A stage is satisfied when its final artifacts exist in the job
//! directory. Existence is the only signal: no hashes, no timestamps.
//! Removing an artifact forces the stage (and only that stage) to rerun.

use crate::models::{JobConfig, JobOption, CONFIG_FILE};
use serde::Serialize;
use std::path::Path;

pub const DIA_DIR: &str = "DIA";
pub const DDA_DIR: &str = "DDA";
pub const LIBFREE_DIR: &str = "libfree";
pub const PSEUDOSPECTRA_DIR: &str = "libfree-pseudospectra";
pub const DATABASE_FILE: &str = "DB.fasta";
pub const DECOY_DATABASE_FILE: &str = "DB_with_decoys.fasta";
pub const SPECTRAL_LIBRARY_FILE: &str = "SpecLib_cons_decoy.TraML";
pub const ANALYSIS_RESULT_FILE: &str = "DIA-analysis-result.csv";
pub const PEPTIDE_MATRIX_FILE: &str = "DIA-peptide-matrix.tsv";
pub const PROTEIN_MATRIX_FILE: &str = "DIA-protein-matrix.tsv";
pub const ANNOTATED_MATRIX_FILE: &str = "matrix.tsv";
pub const ANNOTATIONS_FILE: &str = "annotations.tsv";
pub const FIGURES_DIR: &str = "figures";
pub const FIGURE_CONFIG_FILE: &str = "figcfg.tsv";

/// DIA-Umpire quality tiers, one pseudo-spectra file each
pub const PSEUDO_TIERS: [&str; 3] = ["Q1", "Q2", "Q3"];

/// Sequence search engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Comet,
    XTandem,
}

impl SearchEngine {
    pub fn name(&self) -> &'static str {
        match self {
            SearchEngine::Comet => "comet",
            SearchEngine::XTandem => "xtandem",
        }
    }

    pub fn option(&self) -> JobOption {
        match self {
            SearchEngine::Comet => JobOption::UseComet,
            SearchEngine::XTandem => JobOption::UseXTandem,
        }
    }

    /// Per-input search result written next to the symlinked input
    pub fn pep_xml(&self, stem: &str) -> String {
        match self {
            SearchEngine::Comet => format!("{}.pep.xml", stem),
            SearchEngine::XTandem => format!("{}.tandem.pep.xml", stem),
        }
    }

    /// Stem of the input a per-input search result belongs to
    pub fn stem_of_pep_xml<'a>(&self, pep_xml: &'a str) -> &'a str {
        let suffix = match self {
            SearchEngine::Comet => ".pep.xml",
            SearchEngine::XTandem => ".tandem.pep.xml",
        };
        pep_xml.strip_suffix(suffix).unwrap_or(pep_xml)
    }

    /// Merged xinteract output
    pub fn interact_file(&self, pseudo: bool) -> String {
        if pseudo {
            format!("interact_{}_pseudo_pep.xml", self.name())
        } else {
            format!("interact_{}_pep.xml", self.name())
        }
    }
}

/// Search results of one engine over one input kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchScan {
    /// Merged xinteract output exists
    pub merged: bool,
    /// Per-input results present
    pub generated: Vec<String>,
    /// Per-input results still missing
    pub missing: Vec<String>,
}

impl SearchScan {
    pub fn has_result_for(&self, engine: SearchEngine, stem: &str) -> bool {
        self.generated
            .iter()
            .any(|f| engine.stem_of_pep_xml(f) == stem)
    }
}

/// Search results of one engine
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineScan {
    pub library: SearchScan,
    pub pseudo: SearchScan,
}

/// Point-in-time view of which stages' artifacts exist
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseScan {
    pub conv_dia: bool,
    pub conv_dda: bool,
    pub pseudospectra: bool,
    /// Present pseudo-spectra files, relative to the job directory
    pub pseudospectra_files: Vec<String>,
    pub database: bool,
    pub comet: Option<EngineScan>,
    pub xtandem: Option<EngineScan>,
    pub speclib: bool,
    pub matrices: bool,
    pub annotations: bool,
    pub figures: bool,
}

impl PhaseScan {
    pub fn engine(&self, engine: SearchEngine) -> Option<&EngineScan> {
        match engine {
            SearchEngine::Comet => self.comet.as_ref(),
            SearchEngine::XTandem => self.xtandem.as_ref(),
        }
    }

    pub fn search(&self, engine: SearchEngine, pseudo: bool) -> Option<&SearchScan> {
        self.engine(engine)
            .map(|e| if pseudo { &e.pseudo } else { &e.library })
    }
}

/// Scan result for a job folder that may not have a configuration yet
#[derive(Debug, Clone, Serialize)]
pub struct JobScan {
    pub projectname: String,
    pub folder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<JobConfig>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub phases: Option<PhaseScan>,
}

/// Inspect `job_dir` for the artifacts of every stage
pub fn scan(job_dir: &Path, config: &JobConfig) -> PhaseScan {
    let sample_stems = config.sample_stems();
    let library_stems = config.library_stems();
    let pseudo_stems: Vec<String> = if config.uses_pseudospectra() {
        sample_stems
            .iter()
            .flat_map(|stem| PSEUDO_TIERS.iter().map(move |tier| format!("{}_{}", stem, tier)))
            .collect()
    } else {
        Vec::new()
    };

    let dia_dir = job_dir.join(DIA_DIR);
    let conv_dia = dia_dir.is_dir()
        && sample_stems
            .iter()
            .all(|stem| dia_dir.join(format!("{}.mzML", stem)).is_file());

    // ThermoRawFileParser writes mzML, qtofpeakpicker writes mzXML
    let dda_dir = job_dir.join(DDA_DIR);
    let conv_dda = dda_dir.is_dir()
        && library_stems.iter().all(|stem| {
            dda_dir.join(format!("{}.mzXML", stem)).is_file()
                || dda_dir.join(format!("{}.mzML", stem)).is_file()
        });

    let mut pseudospectra_files = Vec::new();
    let mut pseudospectra = config.uses_pseudospectra() && job_dir.join(PSEUDOSPECTRA_DIR).is_dir();
    if config.uses_pseudospectra() {
        for stem in &pseudo_stems {
            let rel = format!("{}/{}.mzXML", PSEUDOSPECTRA_DIR, stem);
            if job_dir.join(&rel).is_file() {
                pseudospectra_files.push(rel);
            } else {
                pseudospectra = false;
            }
        }
    }

    let engine_scan = |engine: SearchEngine| -> Option<EngineScan> {
        if !config.has(engine.option()) {
            return None;
        }
        Some(EngineScan {
            library: search_scan(job_dir, engine, &library_stems, false),
            pseudo: search_scan(job_dir, engine, &pseudo_stems, true),
        })
    };

    let annotation_configured = config.annotation_configured();

    PhaseScan {
        conv_dia,
        conv_dda,
        pseudospectra,
        pseudospectra_files,
        database: job_dir.join(DECOY_DATABASE_FILE).is_file(),
        comet: engine_scan(SearchEngine::Comet),
        xtandem: engine_scan(SearchEngine::XTandem),
        speclib: job_dir.join(SPECTRAL_LIBRARY_FILE).is_file(),
        matrices: [ANALYSIS_RESULT_FILE, PEPTIDE_MATRIX_FILE, PROTEIN_MATRIX_FILE]
            .iter()
            .all(|f| job_dir.join(f).is_file()),
        annotations: annotation_configured
            && job_dir.join(ANNOTATED_MATRIX_FILE).is_file()
            && job_dir.join(ANNOTATIONS_FILE).is_file(),
        // The folder alone may be left over from an interrupted figures stage
        figures: annotation_configured
            && job_dir.join(FIGURES_DIR).join(FIGURE_CONFIG_FILE).is_file(),
    }
}

fn search_scan(job_dir: &Path, engine: SearchEngine, stems: &[String], pseudo: bool) -> SearchScan {
    let mut result = SearchScan {
        merged: job_dir.join(engine.interact_file(pseudo)).is_file(),
        ..Default::default()
    };
    for stem in stems {
        let pep_xml = engine.pep_xml(stem);
        if job_dir.join(&pep_xml).is_file() {
            result.generated.push(pep_xml);
        } else {
            result.missing.push(pep_xml);
        }
    }
    result
}

/// Scan `<result_root>/<name>`, loading its configuration if present
///
/// A malformed `config.txt` is reported as no configuration.
pub fn scan_job(result_root: &Path, name: &str) -> JobScan {
    let job_dir = result_root.join(name);
    let mut result = JobScan {
        projectname: name.to_string(),
        folder: result_root.is_dir() && job_dir.is_dir(),
        config: None,
        phases: None,
    };
    if !result.folder || !job_dir.join(CONFIG_FILE).is_file() {
        return result;
    }
    if let Ok(config) = JobConfig::load(&job_dir) {
        result.phases = Some(scan(&job_dir, &config));
        result.config = Some(config);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputFiles;
    use tempfile::TempDir;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    fn raw_config() -> JobConfig {
        let mut cfg = JobConfig::new(
            "job",
            InputFiles {
                samples: vec!["/data/s1.raw".into(), "/data/s2.raw".into(), "/data/s3.raw".into()],
                library: vec!["/data/l1.raw".into()],
                database: vec!["/data/db.fasta".into()],
            },
        );
        cfg.enable(JobOption::UseComet);
        cfg.enable(JobOption::UseXTandem);
        cfg
    }

    #[test]
    fn test_conversion_satisfied_only_with_all_outputs() {
        let dir = TempDir::new().unwrap();
        let cfg = raw_config();

        assert!(!scan(dir.path(), &cfg).conv_dia);

        touch(dir.path(), "DIA/s1.mzML");
        touch(dir.path(), "DIA/s2.mzML");
        assert!(!scan(dir.path(), &cfg).conv_dia);

        touch(dir.path(), "DIA/s3.mzML");
        assert!(scan(dir.path(), &cfg).conv_dia);

        std::fs::remove_file(dir.path().join("DIA/s2.mzML")).unwrap();
        assert!(!scan(dir.path(), &cfg).conv_dia);
    }

    #[test]
    fn test_dda_conversion_accepts_either_format() {
        let dir = TempDir::new().unwrap();
        let cfg = raw_config();
        touch(dir.path(), "DDA/l1.mzML");
        assert!(scan(dir.path(), &cfg).conv_dda);
    }

    #[test]
    fn test_pseudospectra_lists_present_files() {
        let dir = TempDir::new().unwrap();
        let cfg = raw_config();
        assert!(cfg.uses_pseudospectra());

        for stem in ["s1", "s2", "s3"] {
            for tier in PSEUDO_TIERS {
                touch(dir.path(), &format!("libfree-pseudospectra/{}_{}.mzXML", stem, tier));
            }
        }
        std::fs::remove_file(dir.path().join("libfree-pseudospectra/s2_Q3.mzXML")).unwrap();

        let result = scan(dir.path(), &cfg);
        assert!(!result.pseudospectra);
        assert_eq!(result.pseudospectra_files.len(), 8);
        assert!(result
            .pseudospectra_files
            .contains(&"libfree-pseudospectra/s1_Q1.mzXML".to_string()));
    }

    #[test]
    fn test_search_results_split_into_generated_and_missing() {
        let dir = TempDir::new().unwrap();
        let mut cfg = raw_config();
        cfg.enable(JobOption::DdaLibrary);
        touch(dir.path(), "l1.pep.xml");
        touch(dir.path(), "s1_Q1.tandem.pep.xml");
        touch(dir.path(), "interact_comet_pep.xml");

        let result = scan(dir.path(), &cfg);
        let comet = result.search(SearchEngine::Comet, false).unwrap();
        assert!(comet.merged);
        assert_eq!(comet.generated, vec!["l1.pep.xml".to_string()]);
        assert!(comet.has_result_for(SearchEngine::Comet, "l1"));

        // dda_library set, so pseudo-spectra are not expected
        let tandem_pseudo = result.search(SearchEngine::XTandem, true).unwrap();
        assert!(tandem_pseudo.generated.is_empty());
        assert!(tandem_pseudo.missing.is_empty());
        assert!(!tandem_pseudo.merged);
    }

    #[test]
    fn test_disabled_engine_is_absent() {
        let dir = TempDir::new().unwrap();
        let mut cfg = raw_config();
        cfg.options.retain(|o| o != "use_xtandem_flag");
        let result = scan(dir.path(), &cfg);
        assert!(result.comet.is_some());
        assert!(result.xtandem.is_none());
    }

    #[test]
    fn test_downstream_checks_run_without_xtandem() {
        let dir = TempDir::new().unwrap();
        let mut cfg = raw_config();
        cfg.options.clear();
        touch(dir.path(), SPECTRAL_LIBRARY_FILE);
        touch(dir.path(), ANALYSIS_RESULT_FILE);
        touch(dir.path(), PEPTIDE_MATRIX_FILE);
        touch(dir.path(), PROTEIN_MATRIX_FILE);

        let result = scan(dir.path(), &cfg);
        assert!(result.speclib);
        assert!(result.matrices);
    }

    #[test]
    fn test_annotation_requires_configuration() {
        let dir = TempDir::new().unwrap();
        let mut cfg = raw_config();
        touch(dir.path(), ANNOTATED_MATRIX_FILE);
        touch(dir.path(), ANNOTATIONS_FILE);
        touch(dir.path(), "figures/figcfg.tsv");
        assert!(!scan(dir.path(), &cfg).annotations);

        cfg.enable(JobOption::AnnotatePeptides);
        cfg.annotation_filename = Some("annot.tsv".into());
        let result = scan(dir.path(), &cfg);
        assert!(result.annotations);
        assert!(result.figures);
    }

    #[test]
    fn test_empty_figures_folder_is_not_satisfied() {
        let dir = TempDir::new().unwrap();
        let mut cfg = raw_config();
        cfg.enable(JobOption::AnnotatePeptides);
        cfg.annotation_filename = Some("annot.tsv".into());
        std::fs::create_dir(dir.path().join(FIGURES_DIR)).unwrap();
        assert!(!scan(dir.path(), &cfg).figures);

        touch(dir.path(), "figures/figcfg.tsv");
        assert!(scan(dir.path(), &cfg).figures);
    }

    #[test]
    fn test_scan_job_without_folder_or_config() {
        let root = TempDir::new().unwrap();
        let missing = scan_job(root.path(), "nope");
        assert!(!missing.folder);
        assert!(missing.config.is_none());

        std::fs::create_dir(root.path().join("empty")).unwrap();
        let empty = scan_job(root.path(), "empty");
        assert!(empty.folder);
        assert!(empty.phases.is_none());

        std::fs::create_dir(root.path().join("full")).unwrap();
        raw_config().save(&root.path().join("full")).unwrap();
        let full = scan_job(root.path(), "full");
        assert!(full.config.is_some());
        assert!(full.phases.is_some());
    }
}
