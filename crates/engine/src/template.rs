//! Email template lookup.
//!
//! Templates are stored as `<name>.html` files under a single directory and
//! are returned verbatim; no placeholder substitution is performed.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{Error, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// HTML body of the named template.
    async fn load(&self, name: &str) -> Result<String>;

    /// Names of all available templates, sorted.
    async fn list(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct FileTemplateLoader {
    dir: PathBuf,
}

impl FileTemplateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let name = name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(Error::Template(format!("invalid template name '{}'", name)));
        }
        let file = if name.ends_with(".html") {
            name.to_string()
        } else {
            format!("{}.html", name)
        };
        Ok(self.dir.join(file))
    }
}

#[async_trait]
impl TemplateLoader for FileTemplateLoader {
    async fn load(&self, name: &str) -> Result<String> {
        let path = self.path_for(name)?;
        debug!("Loading template from {}", path.display());

        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::Template(format!("template '{}' not found", name)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
