// Source resolution: bundled resources by name, then filesystem paths
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, SoundError};

/// Where a handle's audio comes from. Resolved once at `prepare`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    /// Sound shipped with the app, found by normalised name
    Bundled { name: String, path: PathBuf },
    /// Any other existing file
    File(PathBuf),
}

impl ResolvedSource {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedSource::Bundled { path, .. } => path,
            ResolvedSource::File(path) => path,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceResolver {
    bundle_dir: Option<PathBuf>,
}

impl SourceResolver {
    pub fn new(bundle_dir: Option<PathBuf>) -> Self {
        Self { bundle_dir }
    }

    /// Resolve a source string to something a native player can open.
    ///
    /// Bare relative names (`"Ding.MP3"`) are looked up in the bundle
    /// directory first, using the lower-cased name with its extension
    /// stripped. Anything else, or a name with no bundled match, must be an
    /// existing file.
    pub fn resolve(&self, source: &str) -> Result<ResolvedSource> {
        if let Some(found) = self.find_bundled(source) {
            return Ok(found);
        }

        let path = PathBuf::from(source);
        if path.is_file() {
            return Ok(ResolvedSource::File(path));
        }

        Err(SoundError::ResourceNotFound(source.to_string()))
    }

    fn find_bundled(&self, source: &str) -> Option<ResolvedSource> {
        let dir = self.bundle_dir.as_ref()?;
        let name = bundle_name(source)?;

        let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|e| tracing::warn!("Cannot read bundle directory {:?}: {}", dir, e))
            .ok()?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(|stem| stem.to_lowercase() == name)
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();

        candidates
            .into_iter()
            .next()
            .map(|path| ResolvedSource::Bundled { name, path })
    }
}

/// Normalised bundle name for a bare relative source, `None` for paths.
pub fn bundle_name(source: &str) -> Option<String> {
    let mut components = Path::new(source).components();
    let only = match (components.next(), components.next()) {
        (Some(Component::Normal(only)), None) => only,
        _ => return None,
    };

    let lowered = only.to_str()?.to_lowercase();
    let name = match lowered.rfind('.') {
        Some(dot) if dot > 0 => lowered[..dot].to_string(),
        _ => lowered,
    };

    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
