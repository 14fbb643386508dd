//! SEARCH phases (Comet and X!Tandem, over DDA runs or pseudo-spectra)
//!
//! Inputs are linked into the job directory by file name, searched one by
//! one, and merged by `xinteract` into `interact_<engine>[_pseudo]_pep.xml`.
//! Inputs whose per-input pep.xml already exists are not searched again.

use super::{file_name, path_string, PipelineOrchestrator, RunContext};
use crate::error::PipelineError;
use crate::models::{file_stem, ProgressSink};
use crate::services::checkpoint_scanner::{SearchEngine, DECOY_DATABASE_FILE};
use crate::services::swath_windows::format_float;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub(super) const COMET_SETTINGS: &str = "comet_settings.xml";
pub(super) const XTANDEM_SETTINGS: &str = "xtandem_settings.xml";

impl PipelineOrchestrator {
    pub(super) async fn phase_search(
        &self,
        engine: SearchEngine,
        pseudo: bool,
        ctx: &mut RunContext<'_>,
        sink: &ProgressSink,
    ) -> Result<(), PipelineError> {
        let inputs = if pseudo {
            ctx.pseudospectra_files.clone()
        } else {
            ctx.library.clone()
        };
        if inputs.is_empty() {
            return Err(PipelineError::MalformedInput(format!(
                "no {} inputs for {}",
                if pseudo { "pseudo-spectra" } else { "library" },
                engine.name()
            )));
        }
        tracing::info!(job = %ctx.job.name, engine = engine.name(), pseudo, inputs = inputs.len(), "Searching spectra");

        let settings = self.render_search_settings(engine, ctx)?;
        let pep_xmls = match engine {
            SearchEngine::Comet => self.run_comet(ctx, sink, &settings, &inputs, pseudo).await?,
            SearchEngine::XTandem => self.run_xtandem(ctx, sink, &settings, &inputs, pseudo).await?,
        };

        let merge = ctx
            .command(self.tools.tpp("xinteract"))
            .args(["-OARPd", "-dDECOY_"])
            .arg(format!("-N{}", engine.interact_file(pseudo)))
            .args(&pep_xmls);
        ctx.runner.run(&merge, sink).await?;
        sink.update_n_of_m(inputs.len() + 1, inputs.len() + 1);
        Ok(())
    }

    /// Write the engine's settings file from its template
    fn render_search_settings(
        &self,
        engine: SearchEngine,
        ctx: &RunContext<'_>,
    ) -> Result<PathBuf, PipelineError> {
        let (template, output) = match engine {
            SearchEngine::Comet => ("comet_settings_template.xml", COMET_SETTINGS),
            SearchEngine::XTandem => ("xtandem_settings_template.xml", XTANDEM_SETTINGS),
        };
        let text = std::fs::read_to_string(self.tools.share(template))?;
        let mut text = render_tolerances(
            &text,
            ctx.config().precursor_tolerance,
            ctx.config().fragment_tolerance,
        );
        if engine == SearchEngine::Comet {
            text = text.replace("DATABASE_FASTA_FILE", DECOY_DATABASE_FILE);
        }
        let path = ctx.job_dir().join(output);
        std::fs::write(&path, text)?;
        Ok(path)
    }

    async fn run_comet(
        &self,
        ctx: &RunContext<'_>,
        sink: &ProgressSink,
        settings: &Path,
        inputs: &[String],
        pseudo: bool,
    ) -> Result<Vec<String>, PipelineError> {
        let engine = SearchEngine::Comet;
        let mut pep_xmls = Vec::with_capacity(inputs.len());

        for (i, input) in inputs.iter().enumerate() {
            let basename = link_into_job_dir(ctx.job_dir(), &ctx.resolve(input))?;
            let stem = file_stem(&basename);
            if !ctx.scan.search(engine, pseudo).is_some_and(|s| s.has_result_for(engine, &stem)) {
                let search = ctx
                    .command(&self.tools.comet)
                    .arg(format!("-P{}", settings.display()))
                    .arg(&basename);
                ctx.runner.run(&search, sink).await?;
            } else {
                tracing::debug!(job = %ctx.job.name, input = %basename, "Comet result present, skipping");
            }
            pep_xmls.push(engine.pep_xml(&stem));
            sink.update_n_of_m(i + 1, inputs.len() + 1);
        }
        Ok(pep_xmls)
    }

    async fn run_xtandem(
        &self,
        ctx: &RunContext<'_>,
        sink: &ProgressSink,
        settings: &Path,
        inputs: &[String],
        pseudo: bool,
    ) -> Result<Vec<String>, PipelineError> {
        let engine = SearchEngine::XTandem;
        let retain = ctx.config().retain_tmp_files;
        let taxonomy = temp_xml(ctx.job_dir(), &taxonomy_xml(DECOY_DATABASE_FILE))?;
        let mut pep_xmls = Vec::with_capacity(inputs.len());

        for (i, input) in inputs.iter().enumerate() {
            let stem = file_stem(input);
            let pep_xml = engine.pep_xml(&stem);
            if !ctx.scan.search(engine, pseudo).is_some_and(|s| s.has_result_for(engine, &stem)) {
                let output = format!("{}.TANDEM.OUTPUT.xml", stem);
                let spectra = path_string(&ctx.resolve(input));
                let input_file = temp_xml(
                    ctx.job_dir(),
                    &tandem_input_xml(settings, taxonomy.path(), &spectra, &output),
                )?;

                let search = ctx
                    .command(&self.tools.tandem)
                    .arg(input_file.path())
                    .arg(&output);
                ctx.runner.run(&search, sink).await?;

                let convert = ctx
                    .command(self.tools.tpp("Tandem2XML"))
                    .arg(&output)
                    .arg(&pep_xml);
                ctx.runner.run(&convert, sink).await?;
                release_temp(input_file, retain)?;
            } else {
                tracing::debug!(job = %ctx.job.name, input = %file_name(input), "X!Tandem result present, skipping");
            }
            pep_xmls.push(pep_xml);
            sink.update_n_of_m(i + 1, inputs.len() + 1);
        }
        release_temp(taxonomy, retain)?;
        Ok(pep_xmls)
    }
}

/// Replace the tolerance placeholders of a search settings template
pub(super) fn render_tolerances(template: &str, precursor: f64, fragment: f64) -> String {
    template
        .replace("PRECURSOR_MASS_TOLERANCE", &format!("{:.2}", precursor))
        .replace("FRAGMENT_MASS_TOLERANCE", &format_float(fragment))
}

/// Symlink `target` into `job_dir` under its file name
///
/// An existing link is reused; an existing regular file is only accepted
/// when it is the input itself.
fn link_into_job_dir(job_dir: &Path, target: &Path) -> Result<String, PipelineError> {
    let basename = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::MalformedInput(format!("not a file: {}", target.display())))?;
    let link = job_dir.join(&basename);

    match std::fs::symlink_metadata(&link) {
        Ok(meta) if meta.file_type().is_symlink() => {}
        Ok(_) => {
            if link.canonicalize()? != target.canonicalize()? {
                return Err(PipelineError::MalformedInput(format!(
                    "link {} {}: file exists",
                    target.display(),
                    link.display()
                )));
            }
        }
        Err(_) => create_link(target, &link)?,
    }
    Ok(basename)
}

#[cfg(unix)]
fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_link(target: &Path, link: &Path) -> std::io::Result<()> {
    std::fs::copy(target, link).map(|_| ())
}

fn taxonomy_xml(database: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n\
         <bioml label=\"x! taxon-to-file matching list\">\n\
         <taxon label=\"DB\">\n\
         <file format=\"peptide\" URL=\"{}\" />\n\
         </taxon>\n\
         </bioml>\n",
        database
    )
}

fn tandem_input_xml(defaults: &Path, taxonomy: &Path, spectra: &str, output: &str) -> String {
    let notes = [
        ("list path, default parameters", path_string(defaults)),
        ("list path, taxonomy information", path_string(taxonomy)),
        ("protein, taxon", "DB".to_string()),
        ("spectrum, path", spectra.to_string()),
        ("output, path", output.to_string()),
    ];
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<bioml>\n");
    for (label, value) in notes {
        xml.push_str(&format!(
            "<note type=\"input\" label=\"{}\">{}</note>\n",
            label, value
        ));
    }
    xml.push_str("</bioml>");
    xml
}

fn temp_xml(dir: &Path, content: &str) -> Result<NamedTempFile, PipelineError> {
    let mut file = tempfile::Builder::new()
        .prefix("xtandem-")
        .suffix(".xml")
        .tempfile_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(file)
}

/// Delete a temporary input, or keep it on disk when `retain` is set
fn release_temp(file: NamedTempFile, retain: bool) -> Result<(), PipelineError> {
    if retain {
        file.keep().map_err(|e| PipelineError::Io(e.error))?;
    } else {
        file.close()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_tolerances() {
        let rendered = render_tolerances(
            "<p>PRECURSOR_MASS_TOLERANCE</p><f>FRAGMENT_MASS_TOLERANCE</f>",
            20.0,
            0.02,
        );
        assert_eq!(rendered, "<p>20.00</p><f>0.02</f>");
        assert!(render_tolerances("FRAGMENT_MASS_TOLERANCE", 10.0, 1.0).contains("1.0"));
    }

    #[test]
    fn test_tandem_input_notes() {
        let xml = tandem_input_xml(
            Path::new("/job/xtandem_settings.xml"),
            Path::new("/job/xtandem-tax.xml"),
            "/job/DDA/l1.mzXML",
            "l1.TANDEM.OUTPUT.xml",
        );
        assert!(xml.starts_with("<?xml version=\"1.0\"?>\n<bioml>\n"));
        assert!(xml.contains(
            "<note type=\"input\" label=\"list path, default parameters\">/job/xtandem_settings.xml</note>"
        ));
        assert!(xml.contains("<note type=\"input\" label=\"protein, taxon\">DB</note>"));
        assert!(xml.contains("<note type=\"input\" label=\"output, path\">l1.TANDEM.OUTPUT.xml</note>"));
        assert!(xml.ends_with("</bioml>"));
    }

    #[test]
    fn test_taxonomy_points_at_decoy_database() {
        let xml = taxonomy_xml(DECOY_DATABASE_FILE);
        assert!(xml.contains("<file format=\"peptide\" URL=\"DB_with_decoys.fasta\" />"));
        assert!(xml.contains("<taxon label=\"DB\">"));
    }

    #[cfg(unix)]
    #[test]
    fn test_link_into_job_dir() {
        let data = TempDir::new().unwrap();
        let job = TempDir::new().unwrap();
        let input = data.path().join("l1.mzXML");
        std::fs::write(&input, "spectra").unwrap();

        assert_eq!(link_into_job_dir(job.path(), &input).unwrap(), "l1.mzXML");
        // Reusing the existing link
        assert_eq!(link_into_job_dir(job.path(), &input).unwrap(), "l1.mzXML");
        assert_eq!(
            std::fs::read_to_string(job.path().join("l1.mzXML")).unwrap(),
            "spectra"
        );

        // A different file already occupying the name
        let other = data.path().join("other").join("l2.mzXML");
        std::fs::create_dir_all(other.parent().unwrap()).unwrap();
        std::fs::write(&other, "x").unwrap();
        std::fs::write(job.path().join("l2.mzXML"), "y").unwrap();
        assert!(link_into_job_dir(job.path(), &other).is_err());
    }

    #[test]
    fn test_release_temp_retains_on_request() {
        let dir = TempDir::new().unwrap();
        let kept = temp_xml(dir.path(), "<bioml/>").unwrap();
        let kept_path = kept.path().to_path_buf();
        release_temp(kept, true).unwrap();
        assert!(kept_path.exists());

        let dropped = temp_xml(dir.path(), "<bioml/>").unwrap();
        let dropped_path = dropped.path().to_path_buf();
        release_temp(dropped, false).unwrap();
        assert!(!dropped_path.exists());
    }
}
