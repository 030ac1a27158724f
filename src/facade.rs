//! `UrlLoader`: the public face of a class path.
//!
//! Delegation is parent first. A class is looked up in the parent loader
//! (if any) before this loader's own roots; resources likewise. Classes
//! defined here are cached by name, and each name is resolved under its own
//! lock so unrelated names never wait on each other.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::classpath::ClassPath;
use crate::config::{LoaderOptions, UrlLoaderBuilder};
use crate::error::{LoaderError, Result};
use crate::host::{AcceptAll, HostRuntime};
use crate::locks::NameLocks;
use crate::manifest::Attributes;
use crate::names::{class_name_to_class_path, normalize_resource_path, package_of_class};
use crate::pool::HandlePool;
use crate::resource::{AccessControl, Resource, ResourceUrl};

/// Package metadata taken from the origin attributes of the first class
/// defined in it.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct Package {
    pub name: String,
    pub spec_title: Option<String>,
    pub spec_version: Option<String>,
    pub spec_vendor: Option<String>,
    pub impl_title: Option<String>,
    pub impl_version: Option<String>,
    pub impl_vendor: Option<String>,
    pub sealed: bool,
}

impl Package {
    pub fn new(name: &str, attributes: Option<&Attributes>) -> Self {
        let get = |key: &str| attributes.and_then(|a| a.get(key)).map(str::to_string);
        Self {
            name: name.to_string(),
            spec_title: get("Specification-Title"),
            spec_version: get("Specification-Version"),
            spec_vendor: get("Specification-Vendor"),
            impl_title: get("Implementation-Title"),
            impl_version: get("Implementation-Version"),
            impl_vendor: get("Implementation-Vendor"),
            sealed: get("Sealed").is_some_and(|v| v.eq_ignore_ascii_case("true")),
        }
    }
}

/// A class handed to the host runtime.
#[derive(Debug, Clone)]
pub struct LoadedClass {
    pub name: String,
    pub bytes: Vec<u8>,
    pub url: ResourceUrl,
    pub access: Option<AccessControl>,
    pub package: Option<Arc<Package>>,
}

pub struct UrlLoader {
    class_path: ClassPath,
    parent: Option<Arc<UrlLoader>>,
    host: Arc<dyn HostRuntime>,
    locks: NameLocks,
    classes: DashMap<String, Arc<LoadedClass>>,
    packages: DashMap<String, Arc<Package>>,
}

impl std::fmt::Debug for UrlLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlLoader")
            .field("class_path", &self.class_path)
            .field("has_parent", &self.parent.is_some())
            .field("classes", &self.classes.len())
            .finish()
    }
}

impl UrlLoader {
    pub fn builder() -> UrlLoaderBuilder {
        UrlLoaderBuilder::new()
    }

    pub fn from_parts(
        options: LoaderOptions,
        parent: Option<Arc<UrlLoader>>,
        host: Option<Arc<dyn HostRuntime>>,
    ) -> Self {
        let pool = Arc::new(HandlePool::new(options.max_open_handles));
        Self {
            class_path: ClassPath::new(options, pool),
            parent,
            host: host.unwrap_or_else(|| Arc::new(AcceptAll)),
            locks: NameLocks::new(),
            classes: DashMap::new(),
            packages: DashMap::new(),
        }
    }

    pub fn class_path(&self) -> &ClassPath {
        &self.class_path
    }

    pub fn parent(&self) -> Option<&Arc<UrlLoader>> {
        self.parent.as_ref()
    }

    pub fn urls(&self) -> &[PathBuf] {
        &self.class_path.options().urls
    }

    /// Resolves a dotted class name. `Ok(None)` means no consulted loader
    /// has it.
    pub fn resolve_class(&self, name: &str) -> Result<Option<Arc<LoadedClass>>> {
        if let Some(found) = self.find_loaded_class(name) {
            return Ok(Some(found));
        }

        self.locks.with_lock(name, || {
            if let Some(found) = self.find_loaded_class(name) {
                return Ok(Some(found));
            }
            if let Some(parent) = &self.parent
                && let Some(found) = parent.resolve_class(name)?
            {
                return Ok(Some(found));
            }
            self.define_from_roots(name)
        })
    }

    pub fn find_loaded_class(&self, name: &str) -> Option<Arc<LoadedClass>> {
        self.classes.get(name).map(|c| Arc::clone(c.value()))
    }

    /// Package defined by this loader or, failing that, by its parents.
    pub fn get_package(&self, name: &str) -> Option<Arc<Package>> {
        self.packages
            .get(name)
            .map(|p| Arc::clone(p.value()))
            .or_else(|| self.parent.as_ref().and_then(|p| p.get_package(name)))
    }

    pub fn resolve_resource(&self, path: &str) -> Option<Resource> {
        let path = normalize_resource_path(path);
        if let Some(parent) = &self.parent
            && let Some(found) = parent.resolve_resource(path)
        {
            return Some(found);
        }
        self.class_path.get_resource(path)
    }

    /// Opens the first resource named `path`. With bootstrap fallback
    /// allowed, the host's own resources are tried before any root.
    pub fn open_resource_stream(&self, path: &str) -> Result<Option<Box<dyn Read + Send>>> {
        let path = normalize_resource_path(path);
        if self.class_path.options().allow_bootstrap_fallback
            && let Some(found) = self.host.bootstrap_resource(path)
        {
            return found.open_stream().map(Some);
        }
        if let Some(parent) = &self.parent
            && let Some(stream) = parent.open_resource_stream(path)?
        {
            return Ok(Some(stream));
        }
        self.class_path
            .get_resource(path)
            .map(|r| r.open_stream())
            .transpose()
    }

    /// URLs of every resource named `path`: the parent chain's first (the
    /// host's bootstrap resource at the top of the chain, when allowed),
    /// then this loader's roots in search order.
    pub fn enumerate_resources(&self, path: &str) -> Box<dyn Iterator<Item = ResourceUrl> + '_> {
        let path = normalize_resource_path(path);
        let inherited: Box<dyn Iterator<Item = ResourceUrl> + '_> = match &self.parent {
            Some(parent) => parent.enumerate_resources(path),
            None => Box::new(
                self.class_path
                    .options()
                    .allow_bootstrap_fallback
                    .then(|| self.host.bootstrap_resource(path))
                    .flatten()
                    .map(|r| r.url().clone())
                    .into_iter(),
            ),
        };
        let own = self.class_path.get_resources(path).map(|r| r.url().clone());
        Box::new(inherited.chain(own))
    }

    /// Closes every retained archive handle. Later lookups reopen them.
    pub fn close(&self) {
        self.class_path.pool().close_all();
    }

    fn define_from_roots(&self, name: &str) -> Result<Option<Arc<LoadedClass>>> {
        let path = class_name_to_class_path(name);
        let Some(resource) = self.class_path.get_resource(&path) else {
            return Ok(None);
        };

        let bytes = resource.bytes()?;
        let package = package_of_class(name).map(|pkg| self.define_package(pkg, resource.attributes()));
        self.host
            .define_class(name, &bytes, resource.access_control())
            .map_err(|source| LoaderError::Rejected {
                name: name.to_string(),
                source,
            })?;

        let class = Arc::new(LoadedClass {
            name: name.to_string(),
            bytes,
            url: resource.url().clone(),
            access: resource.access_control().cloned(),
            package,
        });
        self.classes.insert(name.to_string(), Arc::clone(&class));
        debug!(class = name, url = %class.url, "defined class");
        Ok(Some(class))
    }

    fn define_package(&self, name: &str, attributes: Option<&Attributes>) -> Arc<Package> {
        if let Some(existing) = self.packages.get(name) {
            return Arc::clone(existing.value());
        }
        let package = match self.packages.entry(name.to_string()) {
            Entry::Occupied(e) => return Arc::clone(e.get()),
            Entry::Vacant(e) => Arc::clone(e.insert(Arc::new(Package::new(name, attributes))).value()),
        };
        self.host.define_package(&package);
        package
    }
}
