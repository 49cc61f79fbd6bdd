pub(crate) mod logging;

pub use self::logging::{init_logging, tracing_err, LoggingTask};

const GLOBAL_LABELS: &[(&str, &str)] = &[
    ("app_version", env!("CARGO_PKG_VERSION")),
    ("app_git_commit", env!("VERGEN_GIT_SHA")),
];
