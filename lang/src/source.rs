use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use derive_more::derive::{From, Into};
use typed_index_collections::TiVec;

#[derive(From, Into, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FileIndex(usize);

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} loaded twice", path.display())]
    DuplicatePath { path: PathBuf },
}

#[derive(Default, Debug)]
pub struct Sources {
    pub files: TiVec<FileIndex, File>,
}

impl Sources {
    pub fn load(&mut self, path: &Path) -> Result<FileIndex, LoadError> {
        if self.files.iter().any(|f| f.path == path) {
            return Err(LoadError::DuplicatePath {
                path: path.to_owned(),
            });
        }
        let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(self.add(path, contents))
    }

    pub fn add(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) -> FileIndex {
        self.files.push_and_get_key(File {
            path: path.into(),
            source: source.into(),
        })
    }
}

#[derive(Default, Debug)]
pub struct File {
    pub path: PathBuf,
    pub source: String,
}

impl File {
    /// Hand-written mlog that skips the generator and optimizer.
    pub fn is_precompiled(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "mlog")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileSpan {
    pub file_idx: FileIndex,
    pub start: usize,
    pub end: usize,
}

impl FileSpan {
    pub fn from_ast(file_idx: FileIndex, span: pest::Span) -> Self {
        Self {
            file_idx,
            start: span.start(),
            end: span.end(),
        }
    }

    pub fn as_str(self, sources: &Sources) -> &str {
        sources.files[self.file_idx]
            .source
            .get(self.start..self.end)
            .unwrap_or_default()
    }

    pub fn location(self, sources: &Sources) -> Location {
        let file = &sources.files[self.file_idx];
        let (line, col, text) = match pest::Position::new(&file.source, self.start) {
            Some(pos) => {
                let (line, col) = pos.line_col();
                (line, col, pos.line_of().trim_end().to_owned())
            }
            None => (0, 0, String::new()),
        };
        Location {
            file: file.path.clone(),
            line,
            col,
            text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Location {
    pub file: PathBuf,
    pub line: usize,
    pub col: usize,
    /// The full source line containing the location.
    pub text: String,
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}:{}:{}",
            self.file.display(),
            self.line,
            self.col
        ))
    }
}
