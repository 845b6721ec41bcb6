use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A build failure, annotated with the stack of package names the cooker
/// was inside of when it occurred — pushed one frame at a time as the
/// error unwinds past each `cook()` call, so the user sees the full chain
/// from the requested root down to the step that actually failed.
#[derive(Debug)]
pub struct BuildError {
    pub frames: Vec<String>,
    pub source: EngineError,
}

impl BuildError {
    pub fn new(source: EngineError) -> Self {
        Self {
            frames: Vec::new(),
            source,
        }
    }

    pub fn push_frame(mut self, package_name: impl Into<String>) -> Self {
        self.frames.push(package_name.into());
        self
    }
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)?;
        if !self.frames.is_empty() {
            write!(f, " (while building ")?;
            for (i, frame) in self.frames.iter().rev().enumerate() {
                if i > 0 {
                    write!(f, " -> ")?;
                }
                write!(f, "{frame}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl From<EngineError> for BuildError {
    fn from(source: EngineError) -> Self {
        BuildError::new(source)
    }
}

impl From<kiln_state::StateError> for BuildError {
    fn from(source: kiln_state::StateError) -> Self {
        BuildError::new(EngineError::State(source))
    }
}

impl From<kiln_archive::ArchiveError> for BuildError {
    fn from(source: kiln_archive::ArchiveError) -> Self {
        BuildError::new(EngineError::Archive(source))
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("user aborted while running {package}")]
    Aborted { package: String },

    #[error("build step '{package}' exited with status {status}")]
    StepFailed { package: String, status: i32 },

    #[error("a NameDirectory entry '{path}' does not end in /workspace")]
    MalformedWorkspacePath { path: PathBuf },

    #[error("cannot build to a single --destination with more than one requested package")]
    MultipleDestinations,

    #[error("archive error: {0}")]
    Archive(#[from] kiln_archive::ArchiveError),

    #[error("state store error: {0}")]
    State(#[from] kiln_state::StateError),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BuildError>;

pub(crate) trait IoContext<T> {
    fn io_context(self, path: &std::path::Path) -> std::result::Result<T, EngineError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context(self, path: &std::path::Path) -> std::result::Result<T, EngineError> {
        self.map_err(|source| EngineError::Io {
            path: path.to_owned(),
            source,
        })
    }
}
