//! Versioned dataset snapshots and their binding to a commit.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::{commit::Commit, types::ComponentDescriptor};

/// Anything that can list the components of a dataset version.
///
/// The default lists nothing, so a blob without a producer is still usable.
pub trait ComponentSource {
    /// A fresh iterator on every call.
    fn components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        std::iter::empty()
    }
}

/// A source that has not been populated.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoComponents;

impl ComponentSource for NoComponents {}

impl ComponentSource for Vec<ComponentDescriptor> {
    fn components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.iter()
    }
}

/// Components listed by path, as the backend returns them for a path or S3 dataset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathComponents {
    #[serde(default)]
    pub components: Vec<ComponentDescriptor>,
}

impl ComponentSource for PathComponents {
    fn components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.components.iter()
    }
}

/// Where a blob lives: the commit it was retrieved from and its location in
/// that commit's tree. The commit is not owned.
#[derive(Clone)]
pub struct Binding {
    commit: Weak<dyn Commit>,
    blob_path: String,
}

impl Binding {
    pub fn new<C: Commit + 'static>(commit: &Arc<C>, blob_path: impl Into<String>) -> Self {
        let commit: Weak<C> = Arc::downgrade(commit);
        Self {
            commit,
            blob_path: blob_path.into(),
        }
    }

    /// `None` once every owner has dropped the commit.
    pub fn commit(&self) -> Option<Arc<dyn Commit>> {
        self.commit.upgrade()
    }

    pub fn blob_path(&self) -> &str {
        &self.blob_path
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("blob_path", &self.blob_path)
            .field("commit_alive", &(self.commit.strong_count() > 0))
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct DatasetBlob<S = NoComponents> {
    source: S,
    binding: Option<Binding>,
}

impl<S: ComponentSource> DatasetBlob<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            binding: None,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn components(&self) -> impl Iterator<Item = &ComponentDescriptor> {
        self.source.components()
    }

    pub fn component(&self, path: &str) -> Option<&ComponentDescriptor> {
        self.components().find(|component| component.path() == path)
    }

    /// Associate this blob with the commit it was retrieved from. Replaces
    /// any earlier binding as a whole.
    pub fn bind<C: Commit + 'static>(&mut self, commit: &Arc<C>, blob_path: impl Into<String>) {
        self.binding = Some(Binding::new(commit, blob_path));
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn commit(&self) -> Option<Arc<dyn Commit>> {
        self.binding.as_ref().and_then(Binding::commit)
    }

    pub fn blob_path(&self) -> Option<&str> {
        self.binding.as_ref().map(Binding::blob_path)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }
}

/// Human-readable lines for one component: the path, then whichever of size,
/// modification time, MD5 and SHA-256 are recorded, always in that order.
pub fn describe(component: &ComponentDescriptor) -> Vec<String> {
    let mut lines = vec![component.path().to_string()];

    if let Some(size) = component.size() {
        lines.push(format!("    {size} bytes"));
    }
    if let Some(at) = component.last_modified_at_source() {
        lines.push(format!("    last modified {}", at.format("%Y-%m-%d %H:%M:%S")));
    }
    if let Some(md5) = component.md5() {
        lines.push(format!("    MD5 checksum: {md5}"));
    }
    if let Some(sha256) = component.sha256() {
        lines.push(format!("    SHA-256 checksum: {sha256}"));
    }

    lines
}

impl<S: ComponentSource> fmt::Display for DatasetBlob<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in self.components() {
            for line in describe(component) {
                if !first {
                    writeln!(f)?;
                }
                write!(f, "{line}")?;
                first = false;
            }
        }
        Ok(())
    }
}
