use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, Context, Result};

use super::{CapabilityRegistry, DccHandler, ExtractContext, Extractor};

#[derive(Debug, Default)]
struct SceneState {
    current: Option<PathBuf>,
    source: Option<PathBuf>,
}

/// File based handler used outside of any host application.
///
/// Saving copies an optional source file into place, or writes a small
/// placeholder when no source is set.
#[derive(Debug)]
pub struct StandaloneDcc {
    formats: Vec<String>,
    version: String,
    scene: Mutex<SceneState>,
}

impl Default for StandaloneDcc {
    fn default() -> Self {
        Self::new()
    }
}

impl StandaloneDcc {
    #[must_use]
    pub fn new() -> Self {
        Self {
            formats: vec![".txt".to_string()],
            version: String::new(),
            scene: Mutex::new(SceneState::default()),
        }
    }

    #[must_use]
    pub fn with_formats<I, S>(mut self, formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.formats = formats.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// File copied by the next [`DccHandler::save_as`].
    pub fn set_source(&self, source: Option<PathBuf>) {
        self.state().source = source;
    }

    /// Pretends the host opened `path`.
    pub fn open(&self, path: &Path) {
        self.state().current = Some(path.to_path_buf());
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SceneState> {
        self.scene.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DccHandler for StandaloneDcc {
    fn name(&self) -> &str {
        "standalone"
    }

    fn formats(&self) -> Vec<String> {
        self.formats.clone()
    }

    fn save_as(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let source = self.state().source.clone();
        match source {
            Some(source) => {
                fs::copy(&source, path).with_context(|| {
                    format!("failed to copy {} to {}", source.display(), path.display())
                })?;
            }
            None => {
                tracing::debug!(path = %path.display(), "no source set, writing placeholder scene");
                fs::write(path, b"standalone scene\n")
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
        }
        self.state().current = Some(path.to_path_buf());
        Ok(())
    }

    fn scene_file(&self) -> Option<PathBuf> {
        self.state().current.clone()
    }

    fn dcc_version(&self) -> String {
        self.version.clone()
    }

    fn capabilities(&self) -> CapabilityRegistry {
        CapabilityRegistry::new().with_extractor("source", || Box::new(SourceExtractor::default()))
    }
}

/// Publishes the work scene itself.
#[derive(Debug, Default)]
pub struct SourceExtractor {
    extension: String,
}

impl Extractor for SourceExtractor {
    fn name(&self) -> &str {
        "source"
    }

    fn nice_name(&self) -> &str {
        "Source Scene"
    }

    fn extension(&self) -> &str {
        &self.extension
    }

    fn extract(&mut self, context: &ExtractContext) -> Result<PathBuf> {
        let scene = context
            .scene_file
            .as_deref()
            .ok_or_else(|| anyhow!("no scene file to extract for {}", context.extract_name))?;
        self.extension = scene
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let output = context.resolve_output(&self.extension, false);
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(scene, &output).with_context(|| {
            format!("failed to copy {} to {}", scene.display(), output.display())
        })?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn save_as_tracks_the_current_scene() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("incoming.ma");
        fs::write(&source, b"maya ascii").expect("write");

        let dcc = StandaloneDcc::new().with_formats([".ma", ".mb"]);
        assert_eq!(dcc.default_format().as_deref(), Some(".ma"));
        dcc.set_source(Some(source));
        let target = dir.path().join("work").join("test_v001.ma");
        dcc.save_as(&target).expect("save");
        assert_eq!(fs::read(&target).expect("read"), b"maya ascii");
        assert_eq!(dcc.scene_file(), Some(target));
    }

    #[test]
    fn source_extractor_copies_the_scene() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scene = dir.path().join("test_v003.ma");
        fs::write(&scene, b"scene").expect("write");
        let context = ExtractContext {
            category: "Model".into(),
            output_dir: dir.path().join("publish").join("test").join("source"),
            extract_name: "test".into(),
            version_string: "v001".into(),
            scene_file: Some(scene),
            settings: IndexMap::new(),
        };
        let dcc = StandaloneDcc::new();
        let mut extractor = dcc.capabilities().extractor("source").expect("source");
        let output = extractor.extract(&context).expect("extract");
        assert_eq!(output, context.output_dir.join("test_v001.ma"));
        assert_eq!(extractor.extension(), ".ma");
        assert!(output.exists());
    }
}
