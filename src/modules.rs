use std::env;
use std::io;
use std::path::{Path, PathBuf};

/// A script on disk. Relative paths resolve against the current working
/// directory and the `.rds` extension is appended when absent, so both
/// `radish examples/fib` and `radish examples/fib.rds` load the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScriptModule {
    path: PathBuf,
    name: String,
}

pub const SCRIPT_EXTENSION: &str = "rds";

impl ScriptModule {
    pub fn resolve(path: &str) -> Self {
        let mut path = PathBuf::from(path);
        if !path.is_absolute() {
            if let Ok(cwd) = env::current_dir() {
                path = cwd.join(path);
            }
        }

        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        if path.extension().and_then(|ext| ext.to_str()) != Some(SCRIPT_EXTENSION) {
            let mut with_ext = path.into_os_string();
            with_ext.push(".");
            with_ext.push(SCRIPT_EXTENSION);
            path = PathBuf::from(with_ext);
        }

        Self { path, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_path(&self) -> String {
        self.path.display().to_string()
    }

    pub fn data(&self) -> io::Result<String> {
        std::fs::read_to_string(&self.path)
    }
}
