use std::fmt;

/// Build metadata for the `-v` banner. The version comes from the crate;
/// the remaining fields are injected at build time via `RADISH_BUILD_*`
/// environment variables and default to `<NOT SET>` in plain builds.
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub date: &'static str,
    pub os: &'static str,
    pub host: &'static str,
    pub arch: &'static str,
}

const NOT_SET: &str = "<NOT SET>";

pub fn info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        date: option_env!("RADISH_BUILD_DATE").unwrap_or(NOT_SET),
        os: option_env!("RADISH_BUILD_OS").unwrap_or(NOT_SET),
        host: option_env!("RADISH_BUILD_HOST").unwrap_or(NOT_SET),
        arch: option_env!("RADISH_BUILD_ARCH").unwrap_or(NOT_SET),
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Build Info:")?;
        writeln!(f, "  Date: {}", self.date)?;
        writeln!(f, "  OS: {}", self.os)?;
        writeln!(f, "  Host: {}", self.host)?;
        writeln!(f, "  Arch: {}", self.arch)
    }
}
