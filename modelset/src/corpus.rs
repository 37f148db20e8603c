// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! The corpus of model files on disk: discovery, the persisted processing
//! order, routed-model lists and file-level hygiene.

use std::{
    collections::{BTreeMap, HashSet},
    ffi::OsStr,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use rand::{seq::SliceRandom, Rng};
use thiserror::Error;
use walkdir::WalkDir;

/// Extension of Alloy model files.
pub const MODEL_EXTENSION: &str = "als";

/// The utility models shipped with Alloy, which are not interesting on
/// their own.
pub const UTIL_MODELS: [&str; 11] = [
    "boolean.als",
    "graph.als",
    "integer.als",
    "natural.als",
    "ordering.als",
    "relation.als",
    "seqrel.als",
    "sequence.als",
    "sequniv.als",
    "ternary.als",
    "time.als",
];

/// A filesystem failure while handling the corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// An operation on a file or directory failed
    #[error("{}: {source}", path.display())]
    Io {
        /// The file or directory
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },
    /// A directory could not be walked
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CorpusError + '_ {
    move |source| CorpusError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_str().map_or(false, |s| s.starts_with('.'))
}

fn is_model(path: &Path) -> bool {
    path.extension() == Some(OsStr::new(MODEL_EXTENSION))
}

/// All model files under `root`, as paths relative to `root`, in sorted
/// order. Hidden files and directories are not visited.
pub fn find_models(root: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let mut models = vec![];
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
    {
        let entry = entry?;
        if entry.file_type().is_file() && is_model(entry.path()) {
            if let Ok(rel) = entry.path().strip_prefix(root) {
                models.push(rel.to_path_buf());
            }
        }
    }
    Ok(models)
}

/// Shuffle the processing order.
pub fn shuffle<R: Rng + ?Sized>(files: &mut [PathBuf], rng: &mut R) {
    files.shuffle(rng);
}

/// Persist the processing order, one path per line.
pub fn write_file_list(path: &Path, files: &[PathBuf]) -> Result<(), CorpusError> {
    let mut out = String::new();
    for f in files {
        out.push_str(&f.to_string_lossy());
        out.push('\n');
    }
    fs::write(path, out).map_err(io_err(path))
}

/// Load a processing order written by [`write_file_list`].
pub fn read_file_list(path: &Path) -> Result<Vec<PathBuf>, CorpusError> {
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    Ok(text
        .lines()
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Load a list of routed models (`sat_models.txt` or `unsat_models.txt`).
///
/// Only complete, newline-terminated lines count. A trailing partial line
/// left by an interrupted write is cut from the file, so the next append
/// starts on a fresh line. A missing file is an empty list.
pub fn read_routed(path: &Path) -> Result<Vec<String>, CorpusError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(path)(err)),
    };
    let complete = match text.rfind('\n') {
        Some(i) => &text[..=i],
        None => "",
    };
    if complete.len() < text.len() {
        warn!(
            "{}: dropping partial line {:?}",
            path.display(),
            &text[complete.len()..]
        );
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(io_err(path))?;
        file.set_len(complete.len() as u64).map_err(io_err(path))?;
    }
    Ok(complete
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect())
}

/// An append-only list of model paths, one per line.
#[derive(Debug)]
pub struct RoutedList {
    path: PathBuf,
    file: File,
}

impl RoutedList {
    /// Open `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> Result<Self, CorpusError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Create `path`, truncating any previous content.
    pub fn create(path: &Path) -> Result<Self, CorpusError> {
        File::create(path).map_err(io_err(path))?;
        Self::open(path)
    }

    /// Append one entry as a single write, and flush it.
    pub fn append(&mut self, entry: &str) -> Result<(), CorpusError> {
        self.file
            .write_all(format!("{entry}\n").as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(io_err(&self.path))
    }
}

/// The running notes of a model set directory.
#[derive(Debug, Clone)]
pub struct Readme {
    path: PathBuf,
}

impl Readme {
    /// The README.md of `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join("README.md"),
        }
    }

    /// Append a line.
    pub fn note(&self, line: &str) -> Result<(), CorpusError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err(&self.path))?;
        writeln!(file, "{line}").map_err(io_err(&self.path))
    }
}

/// What to remove in [`clean`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CleanOptions {
    /// Remove hidden files, and files other than models below the top level
    pub non_models: bool,
    /// Remove Alloy's utility models
    pub util_models: bool,
    /// Keep one of each group of models with the same name and size
    pub duplicates: bool,
    /// Keep only the last of models in a directory whose names agree up to
    /// their first digit (see [`version_prefix`])
    pub multiple_versions: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            non_models: true,
            util_models: true,
            duplicates: true,
            multiple_versions: true,
        }
    }
}

/// How many files [`clean`] removed.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Hidden files and files other than models
    pub non_models: usize,
    /// Utility models
    pub util_models: usize,
    /// Duplicate models
    pub duplicates: usize,
    /// Models that look like an earlier version of another model
    pub old_versions: usize,
    /// Empty directories
    pub empty_dirs: usize,
}

fn remove_file(path: &Path) -> Result<(), CorpusError> {
    debug!("removing {}", path.display());
    fs::remove_file(path).map_err(io_err(path))
}

/// Files under `root`, deepest first.
fn files_under(root: &Path) -> Result<Vec<walkdir::DirEntry>, CorpusError> {
    let mut files = vec![];
    for entry in WalkDir::new(root).sort_by_file_name().contents_first(true) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            files.push(entry);
        }
    }
    Ok(files)
}

/// Prune the corpus under `root`.
///
/// Files directly in `root` are the model set's own outputs (README.md, file
/// lists, ledgers) and only hidden ones are removed. Directories left empty
/// are removed at the end.
pub fn clean<R: Rng + ?Sized>(
    root: &Path,
    options: CleanOptions,
    rng: &mut R,
) -> Result<CleanReport, CorpusError> {
    let mut report = CleanReport::default();

    if options.non_models {
        for entry in files_under(root)? {
            let hidden = is_hidden(entry.file_name());
            if hidden || (entry.depth() >= 2 && !is_model(entry.path())) {
                remove_file(entry.path())?;
                report.non_models += 1;
            }
        }
    }

    if options.util_models {
        for entry in files_under(root)? {
            let name = entry.file_name().to_string_lossy();
            if entry.depth() >= 1 && UTIL_MODELS.contains(&&*name) {
                info!("removing util model {}", entry.path().display());
                remove_file(entry.path())?;
                report.util_models += 1;
            }
        }
    }

    if options.duplicates {
        let mut groups: BTreeMap<(String, u64), Vec<PathBuf>> = BTreeMap::new();
        for entry in files_under(root)? {
            if entry.depth() < 2 || !is_model(entry.path()) {
                continue;
            }
            let len = entry.metadata()?.len();
            let name = entry.file_name().to_string_lossy().into_owned();
            groups.entry((name, len)).or_default().push(entry.into_path());
        }
        for files in groups.values().filter(|fs| fs.len() > 1) {
            let keep = rng.gen_range(0..files.len());
            for (i, f) in files.iter().enumerate() {
                if i != keep {
                    info!("duplicate: {}", f.display());
                    remove_file(f)?;
                    report.duplicates += 1;
                }
            }
        }
    }

    if options.multiple_versions {
        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                report.old_versions += remove_old_versions(entry.path())?;
            }
        }
    }

    report.empty_dirs = remove_empty_dirs(root)?;
    Ok(report)
}

/// The part of a model's file name shared by its versions: the name up to
/// its first digit, without the extension. A name starting with a digit is
/// its own prefix, so it never matches another.
pub fn version_prefix(name: &str) -> &str {
    let digit = name
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(name.len());
    if digit == 0 {
        return name;
    }
    let stem = name.find(".als").unwrap_or(name.len());
    &name[..digit.min(stem)]
}

/// Remove the models of `dir` followed, in name order, by a model with the
/// same [`version_prefix`].
fn remove_old_versions(dir: &Path) -> Result<usize, CorpusError> {
    let mut names = vec![];
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if path.is_file() && is_model(&path) {
            if let Some(name) = path.file_name() {
                names.push(name.to_string_lossy().into_owned());
            }
        }
    }
    names.sort();
    let mut removed = 0;
    for pair in names.windows(2) {
        if version_prefix(&pair[0]) == version_prefix(&pair[1]) {
            let old = dir.join(&pair[0]);
            info!("{} removed as an earlier version of {}", old.display(), pair[1]);
            remove_file(&old)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove empty directories under `root` (but not `root` itself), including
/// those that only become empty as their children are removed.
pub fn remove_empty_dirs(root: &Path) -> Result<usize, CorpusError> {
    let mut removed = 0;
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let empty = fs::read_dir(entry.path())
            .map_err(io_err(entry.path()))?
            .next()
            .is_none();
        if empty {
            fs::remove_dir(entry.path()).map_err(io_err(entry.path()))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn copy_tree(from: &Path, to: &Path) -> Result<usize, CorpusError> {
    let mut models = 0;
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry = entry?;
        let Ok(rel) = entry.path().strip_prefix(from) else {
            continue;
        };
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(io_err(&dest))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &dest).map_err(io_err(&dest))?;
            if is_model(entry.path()) {
                models += 1;
            }
        }
    }
    Ok(models)
}

/// Copy existing model set directories into `into`, each under its own
/// directory name, and note the sources in the README. Returns the number
/// of models copied from each source.
pub fn gather(sources: &[PathBuf], into: &Path) -> Result<Vec<usize>, CorpusError> {
    fs::create_dir_all(into).map_err(io_err(into))?;
    let readme = Readme::in_dir(into);
    let mut taken = HashSet::new();
    let mut counts = vec![];
    for source in sources {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "models".to_string());
        // two sources with the same directory name go to separate places
        let mut dest_name = name.clone();
        let mut n = 1;
        while !taken.insert(dest_name.clone()) {
            n += 1;
            dest_name = format!("{name}-{n}");
        }
        let count = copy_tree(source, &into.join(&dest_name))?;
        info!("copied {count} models from {}", source.display());
        readme.note(&format!(
            "Copied {count} .als files from {} into {dest_name}.",
            source.display()
        ))?;
        counts.push(count);
    }
    let total: usize = counts.iter().sum();
    readme.note(&format!(
        "Total {total} .als files drawn from {} existing model set directories.",
        sources.len()
    ))?;
    Ok(counts)
}
