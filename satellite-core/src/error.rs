use std::path::PathBuf;

/// Contradictory or missing configuration. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no config file found in any of: {0:?}")]
    NotFound(Vec<PathBuf>),

    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("not_found.redirect and not_found.render are mutually exclusive")]
    ConflictingNotFound,
}

/// Manifest YAML, regex, or glob compile failure encountered during a reload.
/// The previous `RouteTable` snapshot is retained when this occurs.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read manifest {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse manifest {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("route {pattern:?} is invalid: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid glob pattern {pattern:?}: {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to read global conditions directory {path:?}: {source}")]
    GlobalConditions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Subprocess or GeoIP lookup failure during condition evaluation. The
/// caller (`ConditionSet::evaluate`) converts every `EvalError` into a
/// `false` verdict -- evaluation fails closed, never best-effort serve.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("exec predicate failed to spawn {script:?}: {source}")]
    ExecSpawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("geoip lookup failed: {0}")]
    GeoLookup(String),

    #[error("hit counter store error: {0}")]
    Store(String),
}

/// Artifact I/O or proxy failure while serving a route. Logged; whatever
/// the HTTP layer has already sent to the client stands.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to read file {path:?}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open credential sink {path:?}: {source}")]
    SinkOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid proxy URL {url:?}: {source}")]
    InvalidProxyUrl {
        url: String,
        #[source]
        source: http::uri::InvalidUri,
    },

    #[error("upstream proxy request failed: {0}")]
    ProxyRequest(String),
}
