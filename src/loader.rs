//! Document loader registry.
//!
//! Maps a lowercase file extension to a [`DocumentLoader`] that reads the
//! file and returns one or more [`LoadedUnit`]s of text. Most formats produce
//! a single unit; spreadsheets produce one per worksheet.
//!
//! [`LoaderRegistry::default`] maps:
//!
//! | Extension | Loader |
//! |-----------|--------|
//! | `.pdf` | [`PdfLoader`] |
//! | `.doc` | [`DocLoader`] |
//! | `.docx` | [`DocxLoader`] |
//! | `.xlsx` | [`XlsxLoader`] |
//! | `.html` | [`HtmlLoader`] |
//! | `.eml` | [`EmlLoader`] |
//! | `.txt` | [`TextLoader`] |

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::LoadError;
use crate::extract::{self, ExtractError};

/// A piece of extracted text plus loader-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadedUnit {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl LoadedUnit {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Reads one file format. Implementations are blocking; callers run them on
/// the blocking thread pool.
pub trait DocumentLoader: Send + Sync {
    /// Short format tag recorded as `format` in chunk metadata.
    fn format(&self) -> &'static str;

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError>;
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn corrupt(path: &Path, err: ExtractError) -> LoadError {
    match err {
        ExtractError::Encoding => LoadError::Encoding {
            path: path.to_path_buf(),
        },
        other => LoadError::Corrupt {
            path: path.to_path_buf(),
            message: other.to_string(),
        },
    }
}

fn single(format: &'static str, text: String) -> Vec<LoadedUnit> {
    vec![LoadedUnit::text(text).with("format", format)]
}

pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn format(&self) -> &'static str {
        "pdf"
    }

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError> {
        let bytes = read_bytes(path)?;
        let text = extract::extract_pdf(&bytes).map_err(|e| corrupt(path, e))?;
        Ok(single(self.format(), text))
    }
}

pub struct DocLoader;

impl DocumentLoader for DocLoader {
    fn format(&self) -> &'static str {
        "doc"
    }

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError> {
        let bytes = read_bytes(path)?;
        let text = extract::extract_doc(&bytes).map_err(|e| corrupt(path, e))?;
        Ok(single(self.format(), text))
    }
}

pub struct DocxLoader;

impl DocumentLoader for DocxLoader {
    fn format(&self) -> &'static str {
        "docx"
    }

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError> {
        let bytes = read_bytes(path)?;
        let text = extract::extract_docx(&bytes).map_err(|e| corrupt(path, e))?;
        Ok(single(self.format(), text))
    }
}

pub struct XlsxLoader;

impl DocumentLoader for XlsxLoader {
    fn format(&self) -> &'static str {
        "xlsx"
    }

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError> {
        let bytes = read_bytes(path)?;
        let sheets = extract::extract_xlsx(&bytes).map_err(|e| corrupt(path, e))?;
        Ok(sheets
            .into_iter()
            .map(|sheet| {
                LoadedUnit::text(sheet.text)
                    .with("format", self.format())
                    .with("sheet", sheet.name)
            })
            .collect())
    }
}

pub struct HtmlLoader;

impl DocumentLoader for HtmlLoader {
    fn format(&self) -> &'static str {
        "html"
    }

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError> {
        let bytes = read_bytes(path)?;
        Ok(single(self.format(), extract::extract_html(&bytes)))
    }
}

pub struct EmlLoader;

impl DocumentLoader for EmlLoader {
    fn format(&self) -> &'static str {
        "eml"
    }

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError> {
        let bytes = read_bytes(path)?;
        let email = extract::extract_eml(&bytes).map_err(|e| corrupt(path, e))?;
        let mut unit = LoadedUnit::text(email.text).with("format", self.format());
        if let Some(subject) = email.subject {
            unit = unit.with("subject", subject);
        }
        Ok(vec![unit])
    }
}

pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn format(&self) -> &'static str {
        "txt"
    }

    fn load(&self, path: &Path) -> Result<Vec<LoadedUnit>, LoadError> {
        let bytes = read_bytes(path)?;
        let text = extract::extract_txt(&bytes).map_err(|e| corrupt(path, e))?;
        Ok(single(self.format(), text))
    }
}

/// Extension-keyed lookup of loaders.
pub struct LoaderRegistry {
    loaders: BTreeMap<&'static str, Box<dyn DocumentLoader>>,
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut loaders: BTreeMap<&'static str, Box<dyn DocumentLoader>> = BTreeMap::new();
        loaders.insert("pdf", Box::new(PdfLoader));
        loaders.insert("doc", Box::new(DocLoader));
        loaders.insert("docx", Box::new(DocxLoader));
        loaders.insert("xlsx", Box::new(XlsxLoader));
        loaders.insert("html", Box::new(HtmlLoader));
        loaders.insert("eml", Box::new(EmlLoader));
        loaders.insert("txt", Box::new(TextLoader));
        Self { loaders }
    }
}

impl LoaderRegistry {
    /// Register `loader` for `extension`, replacing any existing entry.
    pub fn with_loader(mut self, extension: &'static str, loader: Box<dyn DocumentLoader>) -> Self {
        self.loaders.insert(extension, loader);
        self
    }

    /// Loader for an extension, with or without the leading dot, any case.
    pub fn loader_for(&self, extension: &str) -> Option<&dyn DocumentLoader> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.loaders.get(ext.as_str()).map(|l| l.as_ref())
    }

    pub fn loader_for_path(&self, path: &Path) -> Option<&dyn DocumentLoader> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| self.loader_for(e))
    }

    /// Supported extensions with their leading dot, sorted.
    pub fn supported_extensions(&self) -> Vec<String> {
        self.loaders.keys().map(|k| format!(".{}", k)).collect()
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        self.loader_for_path(path).is_some()
    }
}
