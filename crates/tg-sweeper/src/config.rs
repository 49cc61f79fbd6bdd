use crate::prelude::*;
use crate::{ledger, tg, Result};
use serde::de::DeserializeOwned;

pub struct Config {
    pub(crate) tg: tg::Config,
    pub(crate) ledger: ledger::Config,
}

impl Config {
    /// Loads the config from the environment variables. Fails if any of the
    /// required variables is missing, because no progress is possible without
    /// the bot credentials.
    pub fn load() -> Result<Config> {
        Ok(Self {
            tg: from_env("TG_")?,
            ledger: from_env::<ledger::Config>("LEDGER_")?.validated()?,
        })
    }
}

pub(crate) fn from_env<T: DeserializeOwned>(prefix: &str) -> Result<T> {
    envy::prefixed(prefix).from_env().fatal_ctx(|| {
        format!(
            "Couldn't load config from environment for {} (prefix: {prefix})",
            std::any::type_name::<T>(),
        )
    })
}

pub(crate) fn from_env_or_panic<T: DeserializeOwned>(prefix: &str) -> T {
    envy::prefixed(prefix).from_env().unwrap_or_else(|err| {
        panic!(
            "BUG: Couldn't load config from environment for {}: {:#?}",
            std::any::type_name::<T>(),
            err
        );
    })
}
