//! Runtime settings for the command line runner.
//!
//! Settings are layered: defaults, then an optional `schemata.toml` (or
//! the file given explicitly), then `SCHEMATA_*` environment variables,
//! e.g. `SCHEMATA_LOG_LEVEL=debug` or `SCHEMATA_SCRIPTS=a.edn,b.edn`.
use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default tracing filter, used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Transaction scripts to run in order.
    pub scripts: Vec<String>,
    /// Print one JSON report per committed transaction.
    pub print_reports: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: String::from("info"),
            scripts: Vec::new(),
            print_reports: true,
        }
    }
}

impl Settings {
    /// Loads settings, reading `path` if given (it must then exist) or
    /// `schemata.toml` from the working directory if present.
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("schemata").required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("SCHEMATA")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scripts"),
            )
            .build()?
            .try_deserialize::<Settings>()?;
        Ok(settings)
    }
}
