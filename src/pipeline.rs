//! Runs one filer end to end: locate the returns, extract, merge, compute and
//! write the artifact.

use crate::aggregator::merge_period_set;
use crate::artifact::{write_artifact, write_report_json, MERGED_FILE_NAME, RESULT_POINTS_FILE_NAME};
use crate::config::ReconcilerConfig;
use crate::error::{ReconcileError, Result};
use crate::extractor::extract_document;
use crate::locator::{GridLocator, PdfGridLocator};
use crate::metrics::{MetricsEngine, ReconciliationReport};
use crate::schema::{FilerPeriodSet, FilingDocument, MergedReturn};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A return whose file could not be turned into grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnreadableDocument {
    pub source: String,
    pub reason: String,
}

/// What one run produced.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub merged: MergedReturn,
    pub report: ReconciliationReport,
    pub artifact: PathBuf,
    pub result_points_file: Option<PathBuf>,
    pub unreadable: Vec<UnreadableDocument>,
}

pub struct Reconciler<L: GridLocator = PdfGridLocator> {
    config: ReconcilerConfig,
    locator: L,
    filer_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Reconciler<PdfGridLocator> {
    pub fn new(config: ReconcilerConfig) -> Result<Self> {
        let locator = PdfGridLocator::new(config.grid_tolerance);
        Self::with_locator(config, locator)
    }
}

impl<L: GridLocator> Reconciler<L> {
    pub fn with_locator(config: ReconcilerConfig, locator: L) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            locator,
            filer_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Folder holding the filer's monthly returns.
    pub fn return_dir(&self, filer: &str) -> PathBuf {
        self.config.input_root.join(filer).join(&self.config.return_folder)
    }

    pub fn output_dir(&self, filer: &str) -> PathBuf {
        self.config.output_root.join(filer)
    }

    /// The filer's return PDFs, sorted by file name.
    pub fn discover(&self, filer: &str) -> Result<Vec<PathBuf>> {
        check_filer_id(filer)?;
        let dir = self.return_dir(filer);
        if !dir.is_dir() {
            return Err(ReconcileError::NotFound {
                filer: filer.to_string(),
                details: format!("{} is not a directory", dir.display()),
            });
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let is_pdf = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false);
            if is_pdf && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        if paths.is_empty() {
            return Err(ReconcileError::NotFound {
                filer: filer.to_string(),
                details: format!("no PDF returns in {}", dir.display()),
            });
        }
        debug!("Found {} returns for {} in {}", paths.len(), filer, dir.display());
        Ok(paths)
    }

    /// Locates and extracts every return of the filer. Files the locator
    /// cannot read are logged and left out.
    pub fn load_documents(&self, filer: &str) -> Result<(Vec<FilingDocument>, Vec<UnreadableDocument>)> {
        let mut documents = Vec::new();
        let mut unreadable = Vec::new();

        for path in self.discover(filer)? {
            let source = source_label(&path);
            match self.locator.locate(&path) {
                Ok(grids) => documents.push(extract_document(source, &grids)),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    unreadable.push(UnreadableDocument {
                        source,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if documents.is_empty() {
            return Err(ReconcileError::NotFound {
                filer: filer.to_string(),
                details: format!("none of the {} returns could be read", unreadable.len()),
            });
        }
        Ok((documents, unreadable))
    }

    pub fn run_filer(&self, filer: &str) -> Result<ReconcileOutcome> {
        info!("Reconciling {}", filer);
        let (documents, unreadable) = self.load_documents(filer)?;
        let mut outcome = self.run_documents(filer, documents)?;
        outcome.unreadable = unreadable;
        Ok(outcome)
    }

    /// Runs already-extracted returns and writes the filer's artifacts.
    pub fn run_documents(&self, filer: &str, documents: Vec<FilingDocument>) -> Result<ReconcileOutcome> {
        check_filer_id(filer)?;
        let mut set = FilerPeriodSet::new(filer);
        for document in documents {
            set.push(document);
        }

        let (merged, report) = self.reconcile_set(&set)?;

        let out_dir = self.output_dir(filer);
        let artifact = out_dir.join(MERGED_FILE_NAME);
        let result_points_file = self.config.write_result_points.then(|| out_dir.join(RESULT_POINTS_FILE_NAME));

        let lock = self.filer_lock(filer);
        {
            let _guard = lock.lock();
            write_artifact(&artifact, &merged, &report)?;
            if let Some(path) = &result_points_file {
                write_report_json(path, &report)?;
            }
        }

        Ok(ReconcileOutcome {
            merged,
            report,
            artifact,
            result_points_file,
            unreadable: Vec::new(),
        })
    }

    /// Merges the set and computes its report without touching the disk.
    pub fn reconcile_set(&self, set: &FilerPeriodSet) -> Result<(MergedReturn, ReconciliationReport)> {
        let merged = merge_period_set(set)?;
        let matrices = set.interest_matrices();
        let report = MetricsEngine::new(&self.config).compute(&set.filer, &merged, &matrices);
        Ok((merged, report))
    }

    fn filer_lock(&self, filer: &str) -> Arc<Mutex<()>> {
        self.filer_locks
            .lock()
            .entry(filer.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn source_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Filer ids become directory names; they must stay one path component.
fn check_filer_id(filer: &str) -> Result<()> {
    let plain = !filer.trim().is_empty()
        && filer != "."
        && filer != ".."
        && !filer.contains(['/', '\\']);
    if plain {
        Ok(())
    } else {
        Err(ReconcileError::NotFound {
            filer: filer.to_string(),
            details: "filer id must be a single directory name".to_string(),
        })
    }
}
