//! SWATH isolation windows of a DIA run
//!
//! The precursor isolation windows of one acquisition cycle are read from
//! the first DIA sample (the cycle ends at the first repeated target m/z)
//! and written as `swath-windows.txt` for spectrast2tsv and
//! `truncated-swath-windows.txt` for OpenSwathWorkflow, where overlapping
//! neighbours are cut so that each window starts at its predecessor's end.

use crate::error::PipelineError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

pub const SWATH_WINDOWS_FILE: &str = "swath-windows.txt";
pub const TRUNCATED_SWATH_WINDOWS_FILE: &str = "truncated-swath-windows.txt";

/// Precursor isolation window as stored in mzML
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationWindow {
    /// Target m/z exactly as written in the file
    pub target: String,
    pub lower_offset: f64,
    pub upper_offset: f64,
}

impl IsolationWindow {
    fn bounds(&self) -> Result<(f64, f64), PipelineError> {
        let target: f64 = self.target.trim().parse().map_err(|_| {
            PipelineError::MalformedInput(format!("isolation window target {:?}", self.target))
        })?;
        if self.lower_offset <= 0.0 || self.upper_offset <= 0.0 {
            return Err(PipelineError::MalformedInput(format!(
                "isolation window around {} has non-positive offsets",
                self.target
            )));
        }
        Ok((target - self.lower_offset, target + self.upper_offset))
    }
}

/// Windows of one cycle sorted by lower bound, plus the truncated copy
#[derive(Debug, Clone, PartialEq)]
pub struct SwathWindows {
    pub windows: Vec<(f64, f64)>,
    pub truncated: Vec<(f64, f64)>,
}

impl SwathWindows {
    pub fn from_isolation_windows(isolation: &[IsolationWindow]) -> Result<Self, PipelineError> {
        let mut windows = isolation
            .iter()
            .map(IsolationWindow::bounds)
            .collect::<Result<Vec<_>, _>>()?;
        if windows.is_empty() {
            return Err(PipelineError::MalformedInput(
                "no precursor isolation windows found".to_string(),
            ));
        }
        windows.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut truncated = Vec::with_capacity(windows.len());
        truncated.push(windows[0]);
        for pair in windows.windows(2) {
            let (prev, cur) = (pair[0], pair[1]);
            if prev.1 > cur.0 {
                if prev.1 >= cur.1 {
                    return Err(PipelineError::MalformedInput(format!(
                        "isolation window {}-{} is contained in {}-{}",
                        cur.0, cur.1, prev.0, prev.1
                    )));
                }
                truncated.push((prev.1, cur.1));
            } else {
                truncated.push(cur);
            }
        }

        Ok(Self { windows, truncated })
    }

    /// Lower bound of the first window
    pub fn min(&self) -> f64 {
        self.windows.first().map(|w| w.0).unwrap_or_default()
    }

    /// Upper bound of the last window
    pub fn max(&self) -> f64 {
        self.windows.last().map(|w| w.1).unwrap_or_default()
    }

    pub fn write(&self, job_dir: &Path) -> Result<(), PipelineError> {
        let mut plain = String::new();
        let mut truncated = String::from("LowerOffset\tHigherOffset\n");
        for (w, t) in self.windows.iter().zip(&self.truncated) {
            let _ = writeln!(plain, "{}\t{}", format_float(w.0), format_float(w.1));
            let _ = writeln!(truncated, "{}\t{}", format_float(t.0), format_float(t.1));
        }
        std::fs::write(job_dir.join(SWATH_WINDOWS_FILE), plain)?;
        std::fs::write(job_dir.join(TRUNCATED_SWATH_WINDOWS_FILE), truncated)?;
        Ok(())
    }
}

/// Render a float the way the downstream Python tools print them
///
/// Integral values keep one decimal ("400.0"); others use the shortest
/// representation that round-trips.
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    IsolationWindow,
    SelectedIon,
}

#[derive(Debug, Default)]
struct PrecursorState {
    target: Option<String>,
    ion_mz: Option<String>,
    lower: Option<String>,
    upper: Option<String>,
}

fn cv_param(e: &BytesStart<'_>) -> Result<(String, String), PipelineError> {
    let mut name = String::new();
    let mut value = String::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        match attr.key.local_name().as_ref() {
            b"name" => name = attr.unescape_value()?.into_owned(),
            b"value" => value = attr.unescape_value()?.into_owned(),
            _ => {}
        }
    }
    Ok((name, value))
}

fn parse_offset(value: Option<String>, what: &str, target: &str) -> Result<f64, PipelineError> {
    value
        .as_deref()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .ok_or_else(|| {
            PipelineError::MalformedInput(format!("missing {} for isolation window {}", what, target))
        })
}

/// Window of a closed `<precursor>`; `None` when it names no target
fn finish_precursor(state: PrecursorState) -> Result<Option<IsolationWindow>, PipelineError> {
    let Some(target) = state.target.or(state.ion_mz) else {
        return Ok(None);
    };
    Ok(Some(IsolationWindow {
        lower_offset: parse_offset(state.lower, "lower offset", &target)?,
        upper_offset: parse_offset(state.upper, "upper offset", &target)?,
        target,
    }))
}

/// Isolation windows of the first acquisition cycle of an mzML file
pub fn read_isolation_windows(mzml: &Path) -> Result<Vec<IsolationWindow>, PipelineError> {
    let mut reader = Reader::from_file(mzml)
        .map_err(|e| PipelineError::MalformedInput(format!("{}: {}", mzml.display(), e)))?;
    let mut buf = Vec::new();

    let mut windows: Vec<IsolationWindow> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut precursor: Option<PrecursorState> = None;
    let mut section = Section::Other;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let is_start = matches!(event, Event::Start(_));
                match e.local_name().as_ref() {
                    b"precursor" if is_start => precursor = Some(PrecursorState::default()),
                    b"isolationWindow" if is_start => section = Section::IsolationWindow,
                    b"selectedIon" if is_start => section = Section::SelectedIon,
                    b"cvParam" => {
                        if let Some(state) = precursor.as_mut() {
                            let (name, value) = cv_param(e)?;
                            match (section, name.as_str()) {
                                (Section::IsolationWindow, "isolation window target m/z") => {
                                    state.target = Some(value)
                                }
                                (Section::IsolationWindow, "isolation window lower offset") => {
                                    state.lower = Some(value)
                                }
                                (Section::IsolationWindow, "isolation window upper offset") => {
                                    state.upper = Some(value)
                                }
                                (Section::SelectedIon, "selected ion m/z") => {
                                    state.ion_mz = Some(value)
                                }
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"isolationWindow" | b"selectedIon" => section = Section::Other,
                b"precursor" => {
                    if let Some(window) = precursor.take().map(finish_precursor).transpose()?.flatten() {
                        if !seen.insert(window.target.clone()) {
                            let first = windows.iter().find(|w| w.target == window.target);
                            if first.is_some_and(|f| {
                                f.lower_offset != window.lower_offset
                                    || f.upper_offset != window.upper_offset
                            }) {
                                return Err(PipelineError::MalformedInput(format!(
                                    "isolation window {} changes offsets between cycles",
                                    window.target
                                )));
                            }
                            break;
                        }
                        windows.push(window);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(windows)
}

/// Read the windows of `mzml` and write both window files into `job_dir`
pub fn create_swath_window_files(job_dir: &Path, mzml: &Path) -> Result<SwathWindows, PipelineError> {
    let isolation = read_isolation_windows(mzml)?;
    let swaths = SwathWindows::from_isolation_windows(&isolation)?;
    swaths.write(job_dir)?;
    info!(
        sample = %mzml.display(),
        windows = swaths.windows.len(),
        min = swaths.min(),
        max = swaths.max(),
        "Swath windows written"
    );
    Ok(swaths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spectrum(target: &str, lower: &str, upper: &str) -> String {
        format!(
            r#"<spectrum><precursorList count="1"><precursor>
              <isolationWindow>
                <cvParam cvRef="MS" accession="MS:1000827" name="isolation window target m/z" value="{target}"/>
                <cvParam cvRef="MS" accession="MS:1000828" name="isolation window lower offset" value="{lower}"/>
                <cvParam cvRef="MS" accession="MS:1000829" name="isolation window upper offset" value="{upper}"/>
              </isolationWindow>
              <selectedIonList count="1"><selectedIon>
                <cvParam cvRef="MS" accession="MS:1000744" name="selected ion m/z" value="999"/>
              </selectedIon></selectedIonList>
            </precursor></precursorList></spectrum>"#
        )
    }

    fn mzml(dir: &TempDir, spectra: &[String]) -> std::path::PathBuf {
        let path = dir.path().join("sample.mzML");
        let body = format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
            <mzML xmlns="http://psi.hupo.org/ms/mzml"><run><spectrumList>{}</spectrumList></run></mzML>"#,
            spectra.concat()
        );
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_first_cycle_only() {
        let dir = TempDir::new().unwrap();
        let path = mzml(
            &dir,
            &[
                spectrum("425", "25", "25"),
                spectrum("475", "25", "25"),
                spectrum("425", "25", "25"),
                spectrum("900", "25", "25"),
            ],
        );
        let windows = read_isolation_windows(&path).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].target, "425");
    }

    #[test]
    fn test_truncates_overlaps_and_writes_files() {
        let dir = TempDir::new().unwrap();
        let path = mzml(
            &dir,
            &[
                spectrum("475.5", "26", "26"),
                spectrum("425.5", "26", "26"),
                spectrum("525.5", "25", "25"),
            ],
        );
        let swaths = create_swath_window_files(dir.path(), &path).unwrap();
        assert_eq!(swaths.windows, vec![(399.5, 451.5), (449.5, 501.5), (500.5, 550.5)]);
        assert_eq!(swaths.truncated, vec![(399.5, 451.5), (451.5, 501.5), (501.5, 550.5)]);
        assert_eq!(swaths.min(), 399.5);
        assert_eq!(swaths.max(), 550.5);

        let plain = std::fs::read_to_string(dir.path().join(SWATH_WINDOWS_FILE)).unwrap();
        assert_eq!(plain, "399.5\t451.5\n449.5\t501.5\n500.5\t550.5\n");
        let truncated =
            std::fs::read_to_string(dir.path().join(TRUNCATED_SWATH_WINDOWS_FILE)).unwrap();
        assert!(truncated.starts_with("LowerOffset\tHigherOffset\n399.5\t451.5\n451.5\t501.5\n"));
    }

    #[test]
    fn test_selected_ion_is_fallback_target() {
        let dir = TempDir::new().unwrap();
        let spectrum = r#"<spectrum><precursorList><precursor>
            <isolationWindow>
              <cvParam name="isolation window lower offset" value="10"></cvParam>
              <cvParam name="isolation window upper offset" value="10"></cvParam>
            </isolationWindow>
            <selectedIonList><selectedIon>
              <cvParam name="selected ion m/z" value="410"/>
            </selectedIon></selectedIonList>
          </precursor></precursorList></spectrum>"#
            .to_string();
        let path = mzml(&dir, &[spectrum]);
        let windows = read_isolation_windows(&path).unwrap();
        assert_eq!(windows[0].target, "410");
        let swaths = SwathWindows::from_isolation_windows(&windows).unwrap();
        assert_eq!(swaths.windows, vec![(400.0, 420.0)]);
    }

    #[test]
    fn test_non_positive_offset_is_rejected() {
        let windows = vec![IsolationWindow {
            target: "500".into(),
            lower_offset: 0.0,
            upper_offset: 10.0,
        }];
        assert!(matches!(
            SwathWindows::from_isolation_windows(&windows),
            Err(PipelineError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_no_windows_is_malformed() {
        let dir = TempDir::new().unwrap();
        let path = mzml(&dir, &[]);
        let windows = read_isolation_windows(&path).unwrap();
        assert!(SwathWindows::from_isolation_windows(&windows).is_err());
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(400.0), "400.0");
        assert_eq!(format_float(399.5), "399.5");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
    }
}
