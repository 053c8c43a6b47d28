//! Static capability descriptor for this crate.
//!
//! Hosts that report which playback modules are linked in query
//! [`modules`] explicitly; nothing is registered as a side effect of using
//! the crate.

/// Name and version of a linked playback module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl ModuleInfo {
    /// `name/version`, suitable for a `User-Agent` header.
    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// This crate's descriptor.
pub const MODULE: ModuleInfo = ModuleInfo {
    name: "rtsp-source",
    version: env!("CARGO_PKG_VERSION"),
};

/// All modules provided by this crate.
pub fn modules() -> &'static [ModuleInfo] {
    &[MODULE]
}
