//! Scratch working tree and the archive collaborators around it.
//!
//! Nothing in the working tree is the archive of record: it lives in a
//! temporary directory that disappears on drop, and only a successful
//! repackage produces output.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::classify::list_tree;
use crate::{ConverterError, Result};

/// Scratch copy of the input SET with its entry listing.
pub struct WorkingTree {
    dir: TempDir,
    entries: Vec<String>,
    warnings: Vec<String>,
}

impl WorkingTree {
    /// Extract a `.zip` SET, or copy an already extracted directory, into a
    /// fresh scratch directory.
    ///
    /// An unreadable input leaves the tree empty and records a warning.
    pub fn prepare(input: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("setconv-")
            .tempdir()
            .map_err(|e| ConverterError::Extract(format!("cannot create scratch directory: {e}")))?;

        let mut tree = WorkingTree {
            dir,
            entries: Vec::new(),
            warnings: Vec::new(),
        };

        if input.is_dir() {
            tree.copy_from_dir(input);
        } else {
            tree.extract_zip(input);
        }

        info!(
            "working tree ready at {} ({} entries)",
            tree.root().display(),
            tree.entries.len()
        );
        Ok(tree)
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// File entries in archive order, `/`-separated and relative to the root.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }

    fn copy_from_dir(&mut self, input: &Path) {
        for entry in list_tree(input) {
            let dest = self.root().join(&entry);
            let copied = dest
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| fs::copy(input.join(&entry), &dest));
            match copied {
                Ok(_) => self.entries.push(entry),
                Err(e) => self.warn(format!("cannot copy '{entry}': {e}")),
            }
        }
    }

    fn extract_zip(&mut self, input: &Path) {
        let mut archive = match File::open(input)
            .map_err(zip::result::ZipError::from)
            .and_then(ZipArchive::new)
        {
            Ok(archive) => archive,
            Err(e) => {
                self.warn(format!(
                    "input archive {} unreadable, no resources found: {}",
                    input.display(),
                    e
                ));
                return;
            }
        };

        for index in 0..archive.len() {
            let mut file = match archive.by_index(index) {
                Ok(file) => file,
                Err(e) => {
                    self.warn(format!("archive entry #{index} unreadable: {e}"));
                    continue;
                }
            };
            if file.is_dir() {
                continue;
            }

            let raw_name = file.name().to_string();
            let Some(rel) = file.enclosed_name().map(Path::to_path_buf) else {
                self.warn(format!("archive entry '{raw_name}' has an unsafe path, skipped"));
                continue;
            };
            let entry = entry_name(&rel);
            let dest = self.root().join(&rel);

            let written = dest
                .parent()
                .map_or(Ok(()), fs::create_dir_all)
                .and_then(|_| File::create(&dest))
                .and_then(|mut out| io::copy(&mut file, &mut out));
            match written {
                Ok(_) => {
                    debug!("extracted {entry}");
                    self.entries.push(entry);
                }
                Err(e) => {
                    let _ = fs::remove_file(&dest);
                    self.warn(format!("archive entry '{raw_name}' could not be extracted: {e}"));
                }
            }
        }
    }
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Turn a mapped resource name into a file stem.
pub fn file_stem_for(name: &str) -> String {
    let stem: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}

/// Hands out entry names inside the working tree, never two alike.
///
/// Collisions get `_2`, `_3`, … suffixes in request order.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new(existing: &[String]) -> Self {
        NameAllocator {
            taken: existing.iter().cloned().collect(),
        }
    }

    /// Reserve a name for the entry currently called `own`, in the same
    /// directory, built from `stem` and `ext`.
    ///
    /// `own` stays taken until [`release`](Self::release) is called for it,
    /// which the caller does only once the entry has actually moved.
    pub fn reserve(&mut self, own: &str, stem: &str, ext: Option<&str>) -> String {
        let dir = own.rsplit_once('/').map(|(dir, _)| dir);
        let compose = |suffix: Option<usize>| {
            let mut name = String::new();
            if let Some(dir) = dir {
                name.push_str(dir);
                name.push('/');
            }
            name.push_str(stem);
            if let Some(n) = suffix {
                name.push_str(&format!("_{n}"));
            }
            if let Some(ext) = ext {
                name.push('.');
                name.push_str(ext);
            }
            name
        };

        let mut candidate = compose(None);
        let mut n = 2;
        while candidate != own && self.taken.contains(&candidate) {
            candidate = compose(Some(n));
            n += 1;
        }

        self.taken.insert(candidate.clone());
        candidate
    }

    pub fn release(&mut self, name: &str) {
        self.taken.remove(name);
    }
}

/// The archive-creation collaborator: take a directory, produce exactly one
/// archive file at a path.
pub trait ArchiveWriter: Sync {
    fn write_archive(&self, source_dir: &Path, output: &Path) -> io::Result<()>;
}

/// Deflate zip writer. The archive is built next to `output` and renamed
/// into place, so a failure leaves nothing at `output`.
#[derive(Copy, Clone, Debug, Default)]
pub struct ZipArchiveWriter;

impl ZipArchiveWriter {
    fn write_to(&self, source_dir: &Path, partial: &Path) -> io::Result<()> {
        let mut zip = ZipWriter::new(File::create(partial)?);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in WalkDir::new(source_dir).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let Ok(rel) = entry.path().strip_prefix(source_dir) else {
                continue;
            };
            let name = entry_name(rel);
            if name.is_empty() {
                continue;
            }
            if entry.file_type().is_dir() {
                zip.add_directory(name, options)?;
            } else if entry.file_type().is_file() {
                zip.start_file(name, options)?;
                let mut file = File::open(entry.path())?;
                io::copy(&mut file, &mut zip)?;
            }
        }

        zip.finish()?;
        Ok(())
    }
}

impl ArchiveWriter for ZipArchiveWriter {
    fn write_archive(&self, source_dir: &Path, output: &Path) -> io::Result<()> {
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut partial = output.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let result = self
            .write_to(source_dir, &partial)
            .and_then(|_| fs::rename(&partial, output));
        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}
