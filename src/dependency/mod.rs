pub mod bootstrap;

use std::fmt;


pub use bootstrap::{BootstrapError, DependencyBootstrap};

/// External runtimes that catalog items are launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Runtime {
    /// Node.js, for `npx` servers.
    Node,
    /// uv, for `uvx` servers.
    Uv,
}

impl Runtime {
    pub fn label(self) -> &'static str {
        match self {
            Runtime::Node => "node",
            Runtime::Uv => "uv",
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Anything the bootstrap page tracks readiness for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    Runtime(Runtime),
    Resources,
}

impl Dependency {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "node" | "nodejs" | "npm" => Some(Dependency::Runtime(Runtime::Node)),
            "uv" | "uvx" => Some(Dependency::Runtime(Runtime::Uv)),
            "servers" | "resources" => Some(Dependency::Resources),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Dependency::Runtime(runtime) => runtime.label(),
            Dependency::Resources => "servers",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
