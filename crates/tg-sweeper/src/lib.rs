mod config;
mod error;
mod observability;
mod tg;

pub mod ledger;
pub mod util;

pub use crate::error::*;
pub use config::*;
pub use observability::*;

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}

use crate::prelude::*;

/// Run a single sweep over the ledger, deleting the messages that expired
pub async fn run(config: Config) -> Result {
    let store = ledger::LedgerStore::new(config.ledger.path.clone());
    let policy = config.ledger.sweep_policy();
    let deleter = tg::TgDeleter::new(config.tg);

    info!(
        path = %store.path().display(),
        max_age = %policy.max_age,
        max_retained = ?policy.max_retained,
        "Starting the sweep",
    );

    let report = store
        .sweep(chrono::Utc::now(), &deleter, &policy)
        .with_duration_log("Sweep finished")
        .await?;

    info!(
        deleted = report.deleted,
        already_gone = report.already_gone,
        errored = report.errored,
        evicted = report.evicted,
        retained = report.retained,
        "Sweep report",
    );

    Ok(())
}
