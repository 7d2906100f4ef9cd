//! Core [`DeclarationLoader`] struct: filesystem-backed loading with optional hot-reload.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::expander::expand;
use crate::schema::{parse_document, ParsedEntry};
use crate::spec::EntitySpec;

use super::error::{LoadResult, LoadStatus, Result};
use super::watcher::{handle_fs_event, WatchScope};

/// Everything one load pass produced.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Specs from every declaration that expanded, in file then declaration order.
    pub specs: Vec<EntitySpec>,
    /// One result per declaration, plus one per skipped or unreadable file.
    pub results: Vec<LoadResult>,
}

impl LoadReport {
    /// Number of declarations that expanded.
    pub fn loaded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, LoadStatus::Loaded { .. }))
            .count()
    }

    /// Number of declarations or files that failed.
    pub fn failed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.status, LoadStatus::Failed { .. }))
            .count()
    }
}

/// Filesystem-backed declaration loader with optional hot-reload.
///
/// The configured path is either one YAML file or a directory scanned
/// recursively for `*.yml` / `*.yaml` files. All declarations found are
/// expanded together so slugs stay unique across files.
pub struct DeclarationLoader {
    /// Declaration file or directory.
    path: PathBuf,
    /// Active filesystem watcher (held to keep it alive).
    _watcher: Option<RecommendedWatcher>,
}

impl DeclarationLoader {
    /// Create a loader for a file or directory path.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _watcher: None,
        }
    }

    /// Load, parse and expand every declaration under the configured path.
    ///
    /// Per-file and per-declaration problems are reported in the returned
    /// [`LoadReport`] and never abort the pass. A missing path is an error.
    pub fn load_all(&self) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let files = self.collect_files(&mut report.results)?;

        let mut declarations = Vec::new();
        let mut origins = Vec::new();

        for path in files {
            match self.load_file(&path) {
                Ok(entries) => {
                    for entry in entries {
                        match entry.declaration {
                            Ok(decl) => {
                                declarations.push(decl);
                                origins.push(path.clone());
                            }
                            Err(e) => {
                                warn!(path = %path.display(), slug = ?entry.slug, error = %e, "invalid declaration");
                                report.results.push(LoadResult {
                                    path: path.clone(),
                                    status: LoadStatus::Failed {
                                        slug: entry.slug,
                                        error: e.to_string(),
                                    },
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load declaration file");
                    report.results.push(LoadResult {
                        path,
                        status: LoadStatus::Failed {
                            slug: None,
                            error: e.to_string(),
                        },
                    });
                }
            }
        }

        let expansion = expand(&declarations);
        let failures: HashMap<usize, _> = expansion
            .errors
            .iter()
            .map(|err| (err.index, err))
            .collect();

        for (index, (decl, path)) in declarations.iter().zip(origins).enumerate() {
            let status = match failures.get(&index) {
                Some(err) => LoadStatus::Failed {
                    slug: Some(err.slug.clone()),
                    error: err.error.to_string(),
                },
                None => {
                    let entities = expansion
                        .specs
                        .iter()
                        .filter(|spec| spec.slug == decl.slug())
                        .count();
                    info!(slug = %decl.slug(), kind = decl.kind(), entities, path = %path.display(), "loaded declaration");
                    LoadStatus::Loaded {
                        slug: decl.slug().to_string(),
                        entities,
                    }
                }
            };
            report.results.push(LoadResult { path, status });
        }

        report.specs = expansion.specs;
        Ok(report)
    }

    /// Parse a single YAML file into its declaration entries.
    pub fn load_file(&self, path: &Path) -> Result<Vec<ParsedEntry>> {
        let contents = fs::read_to_string(path)?;
        Ok(parse_document(&contents)?)
    }

    /// Resolve the configured path into the YAML files to load, sorted.
    fn collect_files(&self, results: &mut Vec<LoadResult>) -> Result<Vec<PathBuf>> {
        if self.path.is_file() {
            return Ok(vec![self.path.clone()]);
        }
        if !self.path.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("declarations path not found: {}", self.path.display()),
            )
            .into());
        }

        let mut files = Vec::new();
        scan_dir_recursive(&self.path, &mut files, results)?;
        files.sort();
        Ok(files)
    }

    /// Start a filesystem watcher that fires `signal` when declarations change.
    ///
    /// Bursts of events collapse into one pending notification, so the
    /// receiver reloads once per burst. Single-file paths are watched through
    /// their parent directory so editors that replace the file are seen.
    pub fn watch(&mut self, signal: Arc<tokio::sync::Notify>) -> Result<()> {
        let (watch_path, mode, scope) = if self.path.is_dir() {
            (self.path.clone(), RecursiveMode::Recursive, WatchScope::Directory)
        } else {
            let parent = self
                .path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            (
                parent,
                RecursiveMode::NonRecursive,
                WatchScope::File(self.path.clone()),
            )
        };

        let mut watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => handle_fs_event(&event, &scope, &signal),
                Err(e) => warn!(error = %e, "filesystem watcher error"),
            },
        )?;

        watcher.watch(&watch_path, mode)?;

        let _ = watcher
            .configure(notify::Config::default().with_poll_interval(Duration::from_millis(500)));

        info!(path = %self.path.display(), "watching declarations for changes");
        self._watcher = Some(watcher);
        Ok(())
    }

    /// Get the configured declarations path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Recursively scan a directory for YAML declaration files.
fn scan_dir_recursive(dir: &Path, files: &mut Vec<PathBuf>, results: &mut Vec<LoadResult>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();

        // Skip dotfiles/dotdirs
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') {
                if path.is_file() {
                    results.push(LoadResult {
                        path,
                        status: LoadStatus::Skipped {
                            reason: "dotfile".to_string(),
                        },
                    });
                }
                continue;
            }
        }

        if path.is_dir() {
            scan_dir_recursive(&path, files, results)?;
            continue;
        }

        if !is_yaml(&path) {
            results.push(LoadResult {
                path,
                status: LoadStatus::Skipped {
                    reason: "not a YAML file".to_string(),
                },
            });
            continue;
        }

        files.push(path);
    }

    Ok(())
}

pub(super) fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "yml" || e == "yaml")
        .unwrap_or(false)
}
