use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bloom::{is_valid_probability, DEFAULT_PROBABILITY};
use crate::cli::Cli;
use crate::facade::UrlLoader;
use crate::host::HostRuntime;
use crate::pool::DEFAULT_MAX_OPEN_HANDLES;
use crate::resource::AccessControl;

/// Archive name prefixes that get access-control metadata attached when
/// `auto_flag_sensitive_roots` is on (signed provider jars).
pub const SENSITIVE_ARCHIVE_PREFIXES: &[&str] = &["bcprov-", "bcpkix-"];

pub const DEFAULT_LAZY_INDEX_THRESHOLD: u32 = 1000;

/// Build-time configuration of a loader. Deserializable so the CLI can take
/// it from a JSON file; unknown fields are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderOptions {
    pub urls: Vec<PathBuf>,
    pub retain_handles: bool,
    pub use_index: bool,
    pub use_persisted_directory_index: bool,
    pub allow_bootstrap_fallback: bool,
    pub lazy_indexing: bool,
    pub auto_flag_sensitive_roots: bool,
    pub roots_with_access_control: Vec<PathBuf>,
    pub lazy_index_threshold: u32,
    pub max_open_handles: usize,
    pub log_missing_archive_as_error: bool,
    pub filter_probability: f64,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            retain_handles: true,
            use_index: true,
            use_persisted_directory_index: false,
            allow_bootstrap_fallback: false,
            lazy_indexing: false,
            auto_flag_sensitive_roots: false,
            roots_with_access_control: Vec::new(),
            lazy_index_threshold: DEFAULT_LAZY_INDEX_THRESHOLD,
            max_open_handles: DEFAULT_MAX_OPEN_HANDLES,
            log_missing_archive_as_error: false,
            filter_probability: DEFAULT_PROBABILITY,
        }
    }
}

impl LoaderOptions {
    /// Whether lookups go through the root index. Lazy indexing leaves
    /// indexing to the individual loaders.
    pub fn indexed(&self) -> bool {
        self.use_index && !self.lazy_indexing
    }

    pub fn access_control_for(&self, root: &Path) -> Option<Arc<AccessControl>> {
        let listed = self.roots_with_access_control.iter().any(|r| r == root);
        let flagged = self.auto_flag_sensitive_roots && is_sensitive_archive(root);
        (listed || flagged).then(|| {
            Arc::new(AccessControl {
                code_source: root.to_path_buf(),
            })
        })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut options: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        options.urls = options.urls.iter().map(|u| normalize_root(u)).collect();
        options
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(options)
    }

    /// Rejects values that cannot drive a loader. Loaders built from
    /// unvalidated options still fall back to defaults for these.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_probability(self.filter_probability) {
            anyhow::bail!(
                "filter_probability must be between 0 and 1 (exclusive), got {}",
                self.filter_probability
            );
        }
        Ok(())
    }
}

pub fn is_sensitive_archive(root: &Path) -> bool {
    root.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| SENSITIVE_ARCHIVE_PREFIXES.iter().any(|p| n.starts_with(p)))
}

/// Accepts plain paths and `file:` URLs.
pub fn normalize_root(root: &Path) -> PathBuf {
    let Some(raw) = root.to_str() else {
        return root.to_path_buf();
    };
    let stripped = raw
        .strip_prefix("file://")
        .or_else(|| raw.strip_prefix("file:"))
        .unwrap_or(raw);
    PathBuf::from(stripped.replace("%20", " "))
}

pub struct UrlLoaderBuilder {
    options: LoaderOptions,
    parent: Option<Arc<UrlLoader>>,
    host: Option<Arc<dyn HostRuntime>>,
}

impl Default for UrlLoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlLoaderBuilder {
    pub fn new() -> Self {
        Self::from_options(LoaderOptions::default())
    }

    pub fn from_options(options: LoaderOptions) -> Self {
        Self {
            options,
            parent: None,
            host: None,
        }
    }

    pub fn urls<I, P>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.options.urls = urls.into_iter().map(|p| normalize_root(p.as_ref())).collect();
        self
    }

    pub fn add_url(mut self, url: impl AsRef<Path>) -> Self {
        self.options.urls.push(normalize_root(url.as_ref()));
        self
    }

    pub fn parent(mut self, parent: Arc<UrlLoader>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn host(mut self, host: Arc<dyn HostRuntime>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn retain_handles(mut self, value: bool) -> Self {
        self.options.retain_handles = value;
        self
    }

    pub fn use_index(mut self, value: bool) -> Self {
        self.options.use_index = value;
        self
    }

    pub fn use_persisted_directory_index(mut self, value: bool) -> Self {
        self.options.use_persisted_directory_index = value;
        self
    }

    pub fn allow_bootstrap_fallback(mut self, value: bool) -> Self {
        self.options.allow_bootstrap_fallback = value;
        self
    }

    pub fn lazy_indexing(mut self, value: bool) -> Self {
        self.options.lazy_indexing = value;
        self
    }

    pub fn auto_flag_sensitive_roots(mut self, value: bool) -> Self {
        self.options.auto_flag_sensitive_roots = value;
        self
    }

    pub fn roots_with_access_control<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.options.roots_with_access_control =
            roots.into_iter().map(|p| normalize_root(p.as_ref())).collect();
        self
    }

    pub fn lazy_index_threshold(mut self, value: u32) -> Self {
        self.options.lazy_index_threshold = value;
        self
    }

    pub fn max_open_handles(mut self, value: usize) -> Self {
        self.options.max_open_handles = value;
        self
    }

    /// False-positive target of the name filters. Values outside (0, 1)
    /// fall back to the default when filters are built.
    pub fn filter_probability(mut self, value: f64) -> Self {
        self.options.filter_probability = value;
        self
    }

    pub fn log_missing_archive_as_error(mut self, value: bool) -> Self {
        self.options.log_missing_archive_as_error = value;
        self
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn build(self) -> UrlLoader {
        UrlLoader::from_parts(self.options, self.parent, self.host)
    }
}

/// Options for a CLI invocation: the `--config` file if given, then the
/// command-line roots and flags on top.
pub fn resolve_options(cli: &Cli) -> Result<LoaderOptions> {
    let mut options = match cli.config.as_deref() {
        Some(path) => LoaderOptions::from_json_file(path)?,
        None => LoaderOptions::default(),
    };

    options
        .urls
        .extend(cli.roots.iter().map(|r| normalize_root(r)));
    if cli.no_index {
        options.use_index = false;
    }
    if cli.lazy {
        options.lazy_indexing = true;
    }
    if cli.persist_index {
        options.use_persisted_directory_index = true;
    }

    options.validate()?;
    if options.urls.is_empty() {
        anyhow::bail!("No classpath roots given. Use --root or a config file with \"urls\"");
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_urls_become_paths() {
        assert_eq!(
            normalize_root(Path::new("file:/opt/lib/a.jar")),
            PathBuf::from("/opt/lib/a.jar")
        );
        assert_eq!(
            normalize_root(Path::new("file:///opt/my%20lib")),
            PathBuf::from("/opt/my lib")
        );
        assert_eq!(normalize_root(Path::new("out/classes")), PathBuf::from("out/classes"));
    }

    #[test]
    fn sensitive_archives_get_access_control_only_when_enabled() {
        let bc = Path::new("/lib/bcprov-jdk18on-1.78.jar");
        let plain = Path::new("/lib/guava.jar");

        let off = LoaderOptions::default();
        assert!(off.access_control_for(bc).is_none());

        let on = LoaderOptions {
            auto_flag_sensitive_roots: true,
            roots_with_access_control: vec![PathBuf::from("/lib/signed.jar")],
            ..LoaderOptions::default()
        };
        assert_eq!(
            on.access_control_for(bc).map(|a| a.code_source.clone()),
            Some(bc.to_path_buf())
        );
        assert!(on.access_control_for(plain).is_none());
        assert!(on.access_control_for(Path::new("/lib/signed.jar")).is_some());
    }

    #[test]
    fn json_config_fills_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("loader.json");
        std::fs::write(
            &path,
            r#"{ "urls": ["file:/tmp/a.jar", "/tmp/out"], "lazy_indexing": true }"#,
        )?;

        let options = LoaderOptions::from_json_file(&path)?;
        assert_eq!(options.urls, vec![PathBuf::from("/tmp/a.jar"), PathBuf::from("/tmp/out")]);
        assert!(options.lazy_indexing);
        assert!(!options.indexed());
        assert!(options.retain_handles);
        assert_eq!(options.lazy_index_threshold, DEFAULT_LAZY_INDEX_THRESHOLD);
        Ok(())
    }

    #[test]
    fn json_config_rejects_unusable_filter_probability() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("loader.json");
        for bad in ["0", "0.0", "1", "1.5", "-0.1"] {
            std::fs::write(&path, format!(r#"{{ "filter_probability": {bad} }}"#))?;
            let err = LoaderOptions::from_json_file(&path).unwrap_err();
            assert!(format!("{err:#}").contains("filter_probability"), "{bad}: {err:#}");
        }

        std::fs::write(&path, r#"{ "filter_probability": 0.001 }"#)?;
        assert_eq!(LoaderOptions::from_json_file(&path)?.filter_probability, 0.001);
        Ok(())
    }

    #[test]
    fn unvalidated_filter_probability_still_builds_bounded_filters() -> Result<()> {
        use crate::directory::DirectoryLoader;
        use crate::loader::Loader;

        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("a"))?;
        std::fs::write(dir.path().join("a/Foo.class"), b"x")?;

        let options = UrlLoaderBuilder::new().filter_probability(0.0).options().clone();
        assert!(options.validate().is_err());

        let loader = DirectoryLoader::new(dir.path().to_path_buf(), &options, None);
        let data = loader.build_index()?;
        assert!(data.name_filter.bit_count() < 1_000);
        assert!(loader.contains_name("a/Foo.class"));
        assert!((0..100).any(|i| !loader.contains_name(&format!("a/Absent{i}.class"))));
        Ok(())
    }

    #[test]
    fn json_config_rejects_unknown_options() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("loader.json");
        std::fs::write(&path, r#"{ "use_cache": true }"#)?;
        assert!(LoaderOptions::from_json_file(&path).is_err());
        Ok(())
    }
}
