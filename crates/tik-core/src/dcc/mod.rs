//! Interfaces consumed from host applications (DCCs).
//!
//! Handlers advertise their extractors and validators through an explicit
//! [`CapabilityRegistry`]; nothing is discovered at runtime.

mod standalone;

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use indexmap::IndexMap;
use serde_json::Value;
use tik_domain::ValidationState;

pub use standalone::{SourceExtractor, StandaloneDcc};

/// Everything an extractor needs to know about where its output goes.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractContext {
    pub category: String,
    /// Absolute folder the extractor owns for this publish.
    pub output_dir: PathBuf,
    pub extract_name: String,
    pub version_string: String,
    /// The scene being published, when the host knows it.
    pub scene_file: Option<PathBuf>,
    pub settings: IndexMap<String, Value>,
}

impl ExtractContext {
    /// `<output_dir>/<name>_<version><extension>`, or a folder of the same
    /// stem for bundled output.
    #[must_use]
    pub fn resolve_output(&self, extension: &str, bundled: bool) -> PathBuf {
        let stem = format!("{}_{}", self.extract_name, self.version_string);
        if bundled {
            self.output_dir.join(stem)
        } else {
            self.output_dir.join(format!("{stem}{extension}"))
        }
    }
}

pub trait Extractor {
    fn name(&self) -> &str;

    fn nice_name(&self) -> &str {
        self.name()
    }

    /// Suffix of the produced file, including the leading dot.
    fn extension(&self) -> &str;

    /// A bundled extractor produces a folder rather than a single file.
    fn bundled(&self) -> bool {
        false
    }

    fn sequential(&self) -> bool {
        false
    }

    /// Writes the element and returns the absolute path of what was written.
    fn extract(&mut self, context: &ExtractContext) -> Result<PathBuf>;
}

pub trait Validator {
    fn name(&self) -> &str;

    /// Inspects the scene. Problems are reported through the returned state,
    /// never as an error.
    fn validate(&mut self) -> ValidationState;

    fn messages(&self) -> Vec<String> {
        Vec::new()
    }

    fn fixable(&self) -> bool {
        false
    }

    fn fix(&mut self) -> Result<()> {
        Ok(())
    }

    fn selectable(&self) -> bool {
        false
    }

    fn select(&mut self) -> Result<()> {
        Ok(())
    }
}

type ExtractorFactory = Box<dyn Fn() -> Box<dyn Extractor> + Send + Sync>;
type ValidatorFactory = Box<dyn Fn() -> Box<dyn Validator> + Send + Sync>;

/// Named constructors for the extractors and validators a handler supports.
#[derive(Default)]
pub struct CapabilityRegistry {
    extractors: IndexMap<String, ExtractorFactory>,
    validators: IndexMap<String, ValidatorFactory>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extractor<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Extractor> + Send + Sync + 'static,
    {
        self.extractors.insert(name.into(), Box::new(factory));
    }

    pub fn register_validator<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Validator> + Send + Sync + 'static,
    {
        self.validators.insert(name.into(), Box::new(factory));
    }

    #[must_use]
    pub fn with_extractor<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Extractor> + Send + Sync + 'static,
    {
        self.register_extractor(name, factory);
        self
    }

    #[must_use]
    pub fn with_validator<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Validator> + Send + Sync + 'static,
    {
        self.register_validator(name, factory);
        self
    }

    #[must_use]
    pub fn extractor(&self, name: &str) -> Option<Box<dyn Extractor>> {
        self.extractors.get(name).map(|factory| factory())
    }

    #[must_use]
    pub fn validator(&self, name: &str) -> Option<Box<dyn Validator>> {
        self.validators.get(name).map(|factory| factory())
    }

    pub fn extractor_names(&self) -> impl Iterator<Item = &str> {
        self.extractors.keys().map(String::as_str)
    }

    pub fn validator_names(&self) -> impl Iterator<Item = &str> {
        self.validators.keys().map(String::as_str)
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .field("validators", &self.validators.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The host application the library runs inside.
pub trait DccHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Scene formats the host can save, with leading dots. The first entry
    /// is the default.
    fn formats(&self) -> Vec<String>;

    fn save_as(&self, path: &Path) -> Result<()>;

    /// The scene currently open in the host, if any.
    fn scene_file(&self) -> Option<PathBuf>;

    fn dcc_version(&self) -> String;

    fn current_frame(&self) -> Option<i64> {
        None
    }

    fn capabilities(&self) -> CapabilityRegistry;

    fn default_format(&self) -> Option<String> {
        self.formats().into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(ValidationState);

    impl Validator for Always {
        fn name(&self) -> &str {
            "always"
        }

        fn validate(&mut self) -> ValidationState {
            self.0
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry = CapabilityRegistry::new()
            .with_validator("zeta", || Box::new(Always(ValidationState::Passed)))
            .with_validator("alpha", || Box::new(Always(ValidationState::Failed)));
        assert_eq!(
            registry.validator_names().collect::<Vec<_>>(),
            vec!["zeta", "alpha"]
        );
        let mut alpha = registry.validator("alpha").expect("alpha");
        assert_eq!(alpha.validate(), ValidationState::Failed);
        assert!(registry.validator("missing").is_none());
        assert!(registry.extractor("source").is_none());
    }

    #[test]
    fn outputs_resolve_under_the_context_folder() {
        let context = ExtractContext {
            category: "Model".into(),
            output_dir: PathBuf::from("/p/Assets/hero/Model/publish/test/source"),
            extract_name: "test".into(),
            version_string: "v002".into(),
            scene_file: None,
            settings: IndexMap::new(),
        };
        assert_eq!(
            context.resolve_output(".ma", false),
            PathBuf::from("/p/Assets/hero/Model/publish/test/source/test_v002.ma")
        );
        assert_eq!(
            context.resolve_output(".abc", true),
            PathBuf::from("/p/Assets/hero/Model/publish/test/source/test_v002")
        );
    }
}
