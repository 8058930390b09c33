//! Document discovery and selection.
//!
//! Lists supported files in the documents directory, resolves names given on
//! the command line, and runs the numbered picker when the user did not name
//! any file.

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::RagError;

/// Case-insensitive suffix matcher over the configured extensions.
#[derive(Debug, Clone)]
pub struct ExtensionMatcher {
    set: GlobSet,
}

impl ExtensionMatcher {
    pub fn new(extensions: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for ext in extensions {
            let glob = GlobBuilder::new(&format!("*{}", ext))
                .case_insensitive(true)
                .literal_separator(true)
                .build()?;
            builder.add(glob);
        }
        Ok(Self {
            set: builder.build()?,
        })
    }

    /// True if the file name of `path` ends with a supported extension.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.set.is_match(Path::new(name)))
            .unwrap_or(false)
    }
}

/// The documents directory plus the rules for what counts as a document.
#[derive(Debug, Clone)]
pub struct DocumentDirectory {
    root: PathBuf,
    matcher: ExtensionMatcher,
}

impl DocumentDirectory {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Result<Self> {
        Ok(Self {
            root: root.into(),
            matcher: ExtensionMatcher::new(extensions)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn matcher(&self) -> &ExtensionMatcher {
        &self.matcher
    }

    /// Absolute paths of the supported files directly inside the directory,
    /// sorted by name. A missing directory has no documents.
    pub fn list_supported(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        if self.root.is_dir() {
            for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if self.matcher.matches(entry.path()) {
                    paths.push(std::path::absolute(entry.path())?);
                }
            }
        }
        paths.sort();

        if paths.is_empty() {
            println!(
                "No supported files found in the '{}' directory.",
                self.root.display()
            );
        }
        Ok(paths)
    }

    /// Basenames of [`list_supported`](Self::list_supported), sorted.
    pub fn list_names(&self) -> Result<Vec<String>> {
        Ok(self
            .list_supported()?
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .collect())
    }

    /// Find `name` in the working directory first, then in the documents
    /// directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, RagError> {
        self.resolve_in(Path::new(""), name)
    }

    fn resolve_in(&self, working_dir: &Path, name: &str) -> Result<PathBuf, RagError> {
        let local = working_dir.join(name);
        if local.is_file() {
            return absolute(&local);
        }

        let in_docs = self.root.join(name);
        if in_docs.is_file() {
            return absolute(&in_docs);
        }

        Err(RagError::FileNotFound {
            name: name.to_string(),
            searched: format!(
                "current directory, '{}' directory",
                self.root.display()
            ),
        })
    }

    /// Resolve every name or none: the first unresolved name fails the call.
    pub fn resolve_many<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<PathBuf>, RagError> {
        names.iter().map(|n| self.resolve(n.as_ref())).collect()
    }
}

fn absolute(path: &Path) -> Result<PathBuf, RagError> {
    std::path::absolute(path).map_err(|_| RagError::FileNotFound {
        name: path.display().to_string(),
        searched: "current directory".to_string(),
    })
}

/// Ask the user to pick one or more of `candidates`.
///
/// A single candidate is returned without prompting. Invalid entries print
/// a correction and prompt again; end of input is [`RagError::Interrupted`].
pub fn select_interactive<R, W>(
    candidates: &[PathBuf],
    input: &mut R,
    output: &mut W,
) -> Result<Vec<PathBuf>>
where
    R: BufRead,
    W: Write,
{
    let mut sorted = candidates.to_vec();
    sorted.sort();

    if sorted.len() <= 1 {
        return Ok(sorted);
    }

    writeln!(output, "Multiple documents found. Please select one or more:")?;
    for (i, path) in sorted.iter().enumerate() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        writeln!(output, "  {}. {}", i + 1, name)?;
    }

    loop {
        write!(
            output,
            "Enter the number(s) of the document(s), separated by commas: "
        )?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(RagError::Interrupted.into());
        }

        match parse_selection(&line, sorted.len()) {
            Ok(indices) => return Ok(indices.into_iter().map(|i| sorted[i].clone()).collect()),
            Err(message) => writeln!(output, "{}", message)?,
        }
    }
}

/// Parse `"1, 3"` into zero-based indices below `count`.
fn parse_selection(line: &str, count: usize) -> Result<Vec<usize>, String> {
    let mut seen = BTreeSet::new();
    let mut indices = Vec::new();

    for part in line.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let n: usize = part
            .parse()
            .map_err(|_| "Invalid input. Please enter numbers only.".to_string())?;
        if n == 0 || n > count {
            return Err(format!(
                "Invalid selection {}. Please enter numbers between 1 and {}.",
                n, count
            ));
        }
        if seen.insert(n) {
            indices.push(n - 1);
        }
    }

    if indices.is_empty() {
        return Err("Please select at least one document.".to_string());
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec![".txt".into(), ".pdf".into(), ".md".into(), ".docx".into()]
    }

    fn docs_dir() -> (TempDir, DocumentDirectory) {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        let dir = DocumentDirectory::new(&docs, &exts()).unwrap();
        (tmp, dir)
    }

    fn touch(dir: &DocumentDirectory, name: &str) {
        std::fs::write(dir.root().join(name), b"x").unwrap();
    }

    #[test]
    fn empty_directory_lists_nothing() {
        let (_tmp, dir) = docs_dir();
        assert!(dir.list_supported().unwrap().is_empty());
    }

    #[test]
    fn lists_only_supported_files() {
        let (_tmp, dir) = docs_dir();
        touch(&dir, "test1.txt");
        touch(&dir, "test2.pdf");
        touch(&dir, "unsupported.zip");
        touch(&dir, "another.exe");

        let names = dir.list_names().unwrap();
        assert_eq!(names, vec!["test1.txt", "test2.pdf"]);
    }

    #[test]
    fn listed_paths_are_absolute() {
        let (_tmp, dir) = docs_dir();
        touch(&dir, "test1.md");
        let paths = dir.list_supported().unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].is_absolute());
    }

    #[test]
    fn subdirectories_are_not_scanned() {
        let (_tmp, dir) = docs_dir();
        std::fs::create_dir_all(dir.root().join("nested.txt")).unwrap();
        std::fs::write(dir.root().join("nested.txt").join("inner.txt"), b"x").unwrap();
        assert!(dir.list_supported().unwrap().is_empty());
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let (_tmp, dir) = docs_dir();
        touch(&dir, "REPORT.PDF");
        assert_eq!(dir.list_names().unwrap(), vec!["REPORT.PDF"]);
    }

    #[test]
    fn resolve_finds_file_in_docs_directory() {
        let (_tmp, dir) = docs_dir();
        touch(&dir, "a.txt");
        let path = dir.resolve("a.txt").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("docs/a.txt"));
    }

    #[test]
    fn resolve_prefers_working_directory_copy() {
        let (tmp, dir) = docs_dir();
        touch(&dir, "a.txt");
        let work = tmp.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("a.txt"), b"local").unwrap();

        let path = dir.resolve_in(&work, "a.txt").unwrap();
        assert!(path.ends_with("work/a.txt"));

        std::fs::remove_file(work.join("a.txt")).unwrap();
        let path = dir.resolve_in(&work, "a.txt").unwrap();
        assert!(path.ends_with("docs/a.txt"));
    }

    #[test]
    fn resolve_many_is_all_or_nothing() {
        let (_tmp, dir) = docs_dir();
        touch(&dir, "a.txt");

        let err = dir.resolve_many(&["a.txt", "missing.txt"]).unwrap_err();
        match err {
            RagError::FileNotFound { name, .. } => assert_eq!(name, "missing.txt"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn selection_reprompts_on_bad_input() {
        let candidates = vec![PathBuf::from("/d/b.txt"), PathBuf::from("/d/a.txt")];
        let mut input = Cursor::new("abc\n7\n2, 1, 2\n");
        let mut output = Vec::new();

        let picked = select_interactive(&candidates, &mut input, &mut output).unwrap();
        assert_eq!(
            picked,
            vec![PathBuf::from("/d/b.txt"), PathBuf::from("/d/a.txt")]
        );

        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("1. a.txt"));
        assert!(shown.contains("2. b.txt"));
        assert!(shown.contains("numbers only"));
        assert!(shown.contains("between 1 and 2"));
    }

    #[test]
    fn single_candidate_is_selected_without_prompt() {
        let candidates = vec![PathBuf::from("/d/only.txt")];
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        let picked = select_interactive(&candidates, &mut input, &mut output).unwrap();
        assert_eq!(picked, candidates);
        assert!(output.is_empty());
    }

    #[test]
    fn selection_eof_is_interrupted() {
        let candidates = vec![PathBuf::from("/d/a.txt"), PathBuf::from("/d/b.txt")];
        let mut input = Cursor::new("");
        let mut output = Vec::new();
        let err = select_interactive(&candidates, &mut input, &mut output).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Interrupted)
        ));
    }
}
