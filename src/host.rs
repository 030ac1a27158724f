//! The host runtime this loader feeds.
//!
//! Turning bytes into an executable unit and serving bootstrap resources
//! are the host's business. The loader only hands over what it found and
//! propagates whatever the host reports.

use crate::facade::Package;
use crate::resource::{AccessControl, Resource};

pub trait HostRuntime: Send + Sync {
    /// Loads the bytes of `name`. An error means the payload was rejected.
    fn define_class(
        &self,
        name: &str,
        bytes: &[u8],
        access: Option<&AccessControl>,
    ) -> anyhow::Result<()>;

    /// Called once per package before its first class is defined.
    fn define_package(&self, _package: &Package) {}

    /// System-provided resource lookup, consulted before the roots when
    /// bootstrap fallback is allowed.
    fn bootstrap_resource(&self, _path: &str) -> Option<Resource> {
        None
    }
}

/// Host that accepts every payload and provides no bootstrap resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl HostRuntime for AcceptAll {
    fn define_class(
        &self,
        _name: &str,
        _bytes: &[u8],
        _access: Option<&AccessControl>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
