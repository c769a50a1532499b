use std::path::{Path, PathBuf};

use reqwest::{StatusCode, Url};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{message}")]
    Precondition { message: String },

    #[error("request to {url} failed{}: {detail}", status_suffix(.status))]
    Transport {
        url: String,
        status: Option<StatusCode>,
        detail: String,
    },

    #[error("server sent content encoding '{encoding}' which cannot be decoded")]
    UnsupportedEncoding { encoding: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
}

/// An error's message followed by each distinct cause, `: ` separated.
fn with_causes(err: &(dyn std::error::Error + 'static)) -> String {
    let mut detail = err.to_string();
    for cause in std::iter::successors(err.source(), |cause| cause.source()) {
        let cause = cause.to_string();
        if !detail.ends_with(&cause) {
            detail.push_str(": ");
            detail.push_str(&cause);
        }
    }
    detail
}

fn status_suffix(status: &Option<StatusCode>) -> String {
    match status {
        Some(status) => format!(" with status {status}"),
        None => String::new(),
    }
}

impl DownloadError {
    pub(crate) fn unbound() -> Self {
        Self::Precondition {
            message: "this blob is not associated with a commit; retrieve it through a commit lookup first"
                .to_string(),
        }
    }

    pub(crate) fn commit_dropped() -> Self {
        Self::Precondition {
            message: "the commit this blob was bound to no longer exists; retrieve it through a commit lookup again"
                .to_string(),
        }
    }

    pub(crate) fn transport(url: &Url, err: reqwest::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            status: err.status(),
            detail: with_causes(&err.without_url()),
        }
    }

    pub(crate) fn stream(url: &Url, err: std::io::Error) -> Self {
        Self::Transport {
            url: url.to_string(),
            status: None,
            detail: with_causes(&err),
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::UnsupportedEncoding { .. }
        )
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// HTTP status of a failed request, when the server answered at all.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}
