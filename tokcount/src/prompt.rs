//! Assemble text files from a project into a single prompt, and work out how many tokens that
//! prompt will cost.
//!
//! Files are gathered from directories recursively, skipping build output, VCS metadata, binaries
//! and other things that never belong in a prompt.  The rendered prompt is the task description
//! followed by each file's contents under a `=== FILE: <path> ===` header.
use crate::counter::{normalize_newlines, TokenCounter};
use crate::error::{FileIoSnafu, WalkSnafu};
use crate::Result;
use futures::{Stream, StreamExt, TryStreamExt};
use snafu::ResultExt;
use std::collections::HashSet;
use std::ffi::OsStr;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::*;
use walkdir::WalkDir;

/// How many files are read at the same time by [`load_files`]
const MAX_CONCURRENT_READS: usize = 4;

pub const DEFAULT_IGNORE_SUFFIXES: &[&str] = &[
    ".log", ".obj", ".o", ".exe", ".dll", ".so", ".dylib", ".class", ".pyc", ".pyo", ".pyd", ".db",
    ".sqlite", ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".ico", ".zip", ".tar", ".gz", ".rar",
    ".7z", ".pdf",
];

pub const DEFAULT_IGNORE_FOLDERS: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    ".idea",
    ".vscode",
    "node_modules",
    "build",
    "dist",
    "__pycache__",
    ".DS_Store",
];

/// Extensions of the files considered to be text, and thus eligible for inclusion in a prompt
pub const TEXT_SUFFIXES: &[&str] = &[
    ".txt", ".cpp", ".h", ".hpp", ".py", ".java", ".js", ".html", ".css", ".json", ".md", ".xml",
    ".yaml", ".yml", ".ini", ".cfg", ".c", ".cs", ".php", ".rb", ".swift", ".go", ".rs", ".kt",
    ".sh", ".bat", ".tsx", ".ts",
];

/// Split a comma-separated list, trimming and lowercasing each element and dropping empty ones.
pub fn parse_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(|part| part.trim().to_lowercase())
        .filter(|part| !part.is_empty())
        .collect()
}

/// File suffixes and folder names to leave out when collecting files.
///
/// Suffixes include the leading dot (`.log`, not `log`).  Both lists are matched
/// case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IgnoreRules {
    pub suffixes: Vec<String>,
    pub folders: Vec<String>,
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self {
            suffixes: DEFAULT_IGNORE_SUFFIXES.iter().map(|s| s.to_lowercase()).collect(),
            folders: DEFAULT_IGNORE_FOLDERS.iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

impl IgnoreRules {
    /// Build the rules from two comma-separated lists, such as `".log, .png"` and `"target, .git"`
    pub fn from_lists(suffixes: &str, folders: &str) -> Self {
        Self {
            suffixes: parse_list(suffixes),
            folders: parse_list(folders),
        }
    }

    /// Is this a text file that isn't excluded by the ignored suffixes?
    pub fn is_text_file(&self, path: &Path) -> bool {
        let suffix = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) => format!(".{}", ext.to_lowercase()),
            None => return false,
        };

        if self.suffixes.contains(&suffix) {
            return false;
        }

        TEXT_SUFFIXES.contains(&suffix.as_str())
    }

    pub fn is_ignored_folder(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.folders.iter().any(|folder| *folder == name)
    }
}

/// Find all of the text files under `roots`.
///
/// Each root can be a file or a directory.  Directories are walked recursively, in
/// case-insensitive file name order, skipping hidden files and folders as well as any folder whose
/// name is ignored (a root directory itself is never skipped).
/// Roots that don't exist are logged and skipped.  Each file appears once in the result, at the
/// position it was first found.
pub fn collect_files<I, P>(roots: I, rules: &IgnoreRules) -> Result<Vec<PathBuf>>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for root in roots {
        let root = root.into();

        if root.is_file() {
            if rules.is_text_file(&root) && seen.insert(root.clone()) {
                files.push(root);
            }
            continue;
        }

        if !root.is_dir() {
            warn!(path = %root.display(), "Input path does not exist; skipping it");
            continue;
        }

        // Hidden entries are never included, except for a root the caller asked for explicitly
        let walker = WalkDir::new(&root)
            .sort_by(|a, b| sort_key(a.file_name()).cmp(&sort_key(b.file_name())))
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }

                let name = entry.file_name().to_string_lossy();
                !name.starts_with('.')
                    && (!entry.file_type().is_dir() || !rules.is_ignored_folder(&name))
            });

        for entry in walker {
            let entry = entry.with_context(|_| WalkSnafu { path: root.clone() })?;

            if !entry.file_type().is_file() || !rules.is_text_file(entry.path()) {
                trace!(path = %entry.path().display(), "Skipping");
                continue;
            }

            let path = entry.into_path();
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    debug!(files = files.len(), "Collected input files");

    Ok(files)
}

/// Directory entries are visited in case-insensitive name order
fn sort_key(name: &OsStr) -> String {
    name.to_string_lossy().to_lowercase()
}

/// A file whose contents are included in a prompt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptFile {
    pub path: PathBuf,
    pub contents: String,
}

/// Read a single file to be included in a prompt.
///
/// Bytes which aren't valid UTF-8 are replaced with the Unicode replacement character rather than
/// failing the whole prompt.  Line endings are translated to `\n`, as for [`crate::read_text`].
pub async fn load_file(path: impl Into<PathBuf>) -> Result<PromptFile> {
    let path = path.into();

    let mut file = tokio::fs::File::open(&path)
        .await
        .with_context(|_| FileIoSnafu { path: path.clone() })?;
    let metadata = file
        .metadata()
        .await
        .with_context(|_| FileIoSnafu { path: path.clone() })?;
    let mut contents = Vec::with_capacity(metadata.len() as usize);
    file.read_to_end(&mut contents)
        .await
        .with_context(|_| FileIoSnafu { path: path.clone() })?;

    let contents = match String::from_utf8(contents) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(),
                "Input file did not decode as clean UTF-8.   \
                Invalid bytes have been replaced with a UTF-8 placeholder sequence.   \
                The token count will not precisely match this file");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };

    Ok(PromptFile {
        path,
        contents: normalize_newlines(contents),
    })
}

/// Read files for a prompt, several at a time.
///
/// The resulting stream yields the files in the same order as `paths`.
pub fn load_files_streaming<I, P>(paths: I) -> impl Stream<Item = Result<PromptFile>>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let load_futs = paths.into_iter().map(|path| load_file(path));

    futures::stream::iter(load_futs).buffered(MAX_CONCURRENT_READS)
}

/// Read files for a prompt.
///
/// Wraps [`load_files_streaming`], failing on the first file that can't be read.
pub async fn load_files<I, P>(paths: I) -> Result<Vec<PromptFile>>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    load_files_streaming(paths).try_collect().await
}

/// A task description plus the files that go with it
#[derive(Clone, Debug, Default)]
pub struct Prompt {
    pub task: String,
    pub files: Vec<PromptFile>,
}

impl Prompt {
    pub fn new(task: impl Into<String>, files: Vec<PromptFile>) -> Self {
        Self {
            task: task.into(),
            files,
        }
    }

    /// Render the prompt as the text that will be sent to a model
    pub fn render(&self) -> String {
        let mut output = String::new();

        if !self.task.is_empty() {
            output.push_str(&self.task);
            output.push_str("\n\n");
        }

        for file in &self.files {
            // Writing to a String can't fail
            let _ = write!(
                output,
                "=== FILE: {} ===\n{}\n\n",
                file.path.display(),
                file.contents
            );
        }

        output
    }
}

/// A token count which may or may not have come from the real tokenizer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenEstimate {
    pub tokens: usize,

    /// `true` if this is the tokenizer's count, `false` if it's a rough guess based on length
    pub exact: bool,
}

/// Count the tokens in `text` if possible, otherwise guess.
///
/// The guess is one token per four characters, which is what's used when there's no counter or
/// the counter refuses the text.
pub fn estimate_tokens(counter: Option<&TokenCounter>, text: &str) -> TokenEstimate {
    if let Some(counter) = counter {
        match counter.count(text) {
            Ok(tokens) => return TokenEstimate { tokens, exact: true },
            Err(e) => {
                warn!(err = %e, "Token counting failed; falling back to a length-based estimate");
            }
        }
    }

    TokenEstimate {
        tokens: text.chars().count() / 4,
        exact: false,
    }
}
