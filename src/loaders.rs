//! Document loaders keyed by file extension.
//!
//! A [`LoaderRegistry`] maps an extension (`.pdf`) to a [`DocumentLoader`]
//! that turns a file into ordered text fragments. Plain text and Markdown
//! are read as UTF-8; PDF goes through `pdf-extract` (one fragment per
//! page); DOCX is unzipped and its `w:t` runs collected per paragraph with
//! `quick-xml`.
//!
//! Looking up an extension with no registered loader yields
//! [`LoadError::NoLoader`] so callers can skip the file.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Page separator emitted by `pdf-extract`.
const PDF_PAGE_BREAK: char = '\u{c}';

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no loader registered for extension '{0}'")]
    NoLoader(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Turns one file into ordered text fragments.
pub trait DocumentLoader {
    fn load(&self, path: &Path) -> Result<Vec<String>, LoadError>;
}

/// Lower-cased extension of `path` with a leading dot (`"a/B.PDF"` → `".pdf"`).
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// `.txt`: the whole file as one fragment. Invalid UTF-8 is replaced.
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<Vec<String>, LoadError> {
        let bytes = read_bytes(path)?;
        Ok(vec![String::from_utf8_lossy(&bytes).into_owned()])
    }
}

/// `.md`: Markdown source is already readable prose, so it is indexed as
/// text with front matter removed.
pub struct MarkdownLoader;

impl DocumentLoader for MarkdownLoader {
    fn load(&self, path: &Path) -> Result<Vec<String>, LoadError> {
        let bytes = read_bytes(path)?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(vec![strip_front_matter(&text).to_string()])
    }
}

fn strip_front_matter(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("---\n") else {
        return text;
    };
    match rest.find("\n---") {
        Some(end) => {
            let after = &rest[end + 4..];
            after.strip_prefix('\n').unwrap_or(after)
        }
        None => text,
    }
}

/// `.pdf`: one fragment per non-empty page.
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<Vec<String>, LoadError> {
        let bytes = read_bytes(path)?;
        let text =
            pdf_extract::extract_text_from_mem(&bytes).map_err(|e| LoadError::Pdf(e.to_string()))?;
        Ok(text
            .split(PDF_PAGE_BREAK)
            .map(str::trim)
            .filter(|page| !page.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// `.docx`: paragraphs of `word/document.xml`, joined with blank lines.
pub struct DocxLoader;

impl DocumentLoader for DocxLoader {
    fn load(&self, path: &Path) -> Result<Vec<String>, LoadError> {
        let bytes = read_bytes(path)?;
        let text = extract_docx(&bytes)?;
        Ok(vec![text])
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| LoadError::Docx("word/document.xml not found".to_string()))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    collect_paragraphs(&doc_xml)
}

fn collect_paragraphs(xml: &[u8]) -> Result<String, LoadError> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    let para = current.trim();
                    if !para.is_empty() {
                        paragraphs.push(para.to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => current.push('\t'),
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let tail = current.trim();
    if !tail.is_empty() {
        paragraphs.push(tail.to_string());
    }
    Ok(paragraphs.join("\n\n"))
}

/// Extension → loader table.
pub struct LoaderRegistry {
    loaders: HashMap<String, Box<dyn DocumentLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Registry with the built-in text, Markdown, PDF, and Word loaders.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(".txt", Box::new(TextLoader));
        registry.register(".md", Box::new(MarkdownLoader));
        registry.register(".pdf", Box::new(PdfLoader));
        registry.register(".docx", Box::new(DocxLoader));
        registry
    }

    /// Register (or replace) the loader for `extension`.
    pub fn register(&mut self, extension: &str, loader: Box<dyn DocumentLoader>) {
        self.loaders
            .insert(extension.to_lowercase(), loader);
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.loaders.contains_key(&extension.to_lowercase())
    }

    /// Load `path` with the loader for its extension.
    pub fn load(&self, path: &Path) -> Result<Vec<String>, LoadError> {
        let ext = extension_of(path).unwrap_or_default();
        match self.loaders.get(&ext) {
            Some(loader) => loader.load(path),
            None => Err(LoadError::NoLoader(ext)),
        }
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn docx_with_paragraphs(paragraphs: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file(
                "word/document.xml",
                zip::write::SimpleFileOptions::default(),
            )
            .unwrap();
            let body: String = paragraphs
                .iter()
                .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
                .collect();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
                body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn text_loader_reads_whole_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "hello\nworld").unwrap();
        let fragments = LoaderRegistry::with_defaults().load(&path).unwrap();
        assert_eq!(fragments, vec!["hello\nworld"]);
    }

    #[test]
    fn markdown_front_matter_is_dropped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("post.MD");
        std::fs::write(&path, "---\ntitle: x\n---\n# Heading\n\nBody").unwrap();
        let fragments = LoaderRegistry::with_defaults().load(&path).unwrap();
        assert_eq!(fragments, vec!["# Heading\n\nBody"]);
    }

    #[test]
    fn docx_paragraphs_are_separated() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("memo.docx");
        std::fs::write(&path, docx_with_paragraphs(&["First line", "Second &amp; last"])).unwrap();
        let fragments = LoaderRegistry::with_defaults().load(&path).unwrap();
        assert_eq!(fragments, vec!["First line\n\nSecond & last"]);
    }

    #[test]
    fn invalid_docx_returns_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.docx");
        std::fs::write(&path, b"not a zip").unwrap();
        let err = LoaderRegistry::with_defaults().load(&path).unwrap_err();
        assert!(matches!(err, LoadError::Docx(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();
        let err = LoaderRegistry::with_defaults().load(&path).unwrap_err();
        assert!(matches!(err, LoadError::Pdf(_)));
    }

    #[test]
    fn unknown_extension_has_no_loader() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("slides.rst");
        std::fs::write(&path, "x").unwrap();
        let registry = LoaderRegistry::with_defaults();
        assert!(!registry.supports(".rst"));
        match registry.load(&path).unwrap_err() {
            LoadError::NoLoader(ext) => assert_eq!(ext, ".rst"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn custom_loader_can_be_registered() {
        struct Upper;
        impl DocumentLoader for Upper {
            fn load(&self, path: &Path) -> Result<Vec<String>, LoadError> {
                Ok(vec![std::fs::read_to_string(path).unwrap().to_uppercase()])
            }
        }

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.rst");
        std::fs::write(&path, "shout").unwrap();
        let mut registry = LoaderRegistry::with_defaults();
        registry.register(".RST", Box::new(Upper));
        assert_eq!(registry.load(&path).unwrap(), vec!["SHOUT"]);
    }
}
