use std::error::Error;
use std::fmt;

/// The error taxonomy for planning and running migrations.
///
/// Mirrors the shape the rest of the crate already uses for ad hoc errors
/// (`String`-backed, converted with `.into()` at call boundaries) but gives
/// the handful of cases callers branch on a name instead of a string match.
#[derive(Debug)]
pub enum MigrateError {
    /// Malformed `from`/`to`/`packageAndVersion` input. Surfaced verbatim.
    InputError(String),
    /// The registry returned no version for `(pkg, ver)` while planning.
    NoMatchingVersion { package: String, requested: String },
    /// A migrations file was declared but could not be read from the tarball.
    MigrationsFileMissing { package: String, version: String, path: String },
    /// Any other registry/tarball failure; the fetcher falls back to install.
    RegistryTransient(String),
    /// A non-`nx` migration failed inside the external adapter.
    AdapterError { package: String, name: String, source: String },
    /// `git commit` failed; logged, does not abort the run.
    CommitFailure(String),
    /// Catch-all for I/O and parse failures that don't fit the above.
    Other(String),
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateError::InputError(msg) => write!(f, "{msg}"),
            MigrateError::NoMatchingVersion { package, requested } => write!(
                f,
                "No matching version found for {package}@{requested}. Try specifying an explicit version with --to=\"{package}@<version>\"."
            ),
            MigrateError::MigrationsFileMissing { package, version, path } => write!(
                f,
                "Failed to find migrations file {path} in {package}@{version}"
            ),
            MigrateError::RegistryTransient(msg) => write!(f, "{msg}"),
            MigrateError::AdapterError { package, name, source } => write!(
                f,
                "Migration '{name}' for package '{package}' failed: {source}"
            ),
            MigrateError::CommitFailure(msg) => write!(f, "commit failed: {msg}"),
            MigrateError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for MigrateError {}

impl From<&str> for MigrateError {
    fn from(s: &str) -> Self {
        MigrateError::Other(s.to_string())
    }
}

impl From<String> for MigrateError {
    fn from(s: String) -> Self {
        MigrateError::Other(s)
    }
}

pub type MigrateResult<T> = Result<T, Box<dyn Error + Send + Sync>>;
