use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "SQLITE_DB_PATH", default = "./data/app.db")]
    pub sqlite_db_path: String,

    #[envconfig(from = "PDF_STORAGE_PATH", default = "./data/pdfs")]
    pub pdf_storage_path: String,

    #[envconfig(from = "WORKER_POLL_INTERVAL_SECONDS", default = "2")]
    pub poll_interval: EnvSecondsDuration,

    #[envconfig(from = "WORKER_ID", default = "worker-1")]
    pub worker_id: NonEmptyString,
}

impl Config {
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.sqlite_db_path)
    }
}

/// A duration parsed from whole seconds given on the environment.
/// This crate's config variables are all `_SECONDS` suffixed, unlike
/// sibling crates that read milliseconds.
#[derive(Debug, Clone, Copy)]
pub struct EnvSecondsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvSecondsDurationError;

impl FromStr for EnvSecondsDuration {
    type Err = ParseEnvSecondsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secs = s
            .parse::<u64>()
            .map_err(|_| ParseEnvSecondsDurationError)?;

        Ok(EnvSecondsDuration(time::Duration::from_secs(secs)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
