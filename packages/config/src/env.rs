// ABOUTME: Typed environment variable parsing helpers
// ABOUTME: Unset variables are absent; unparsable values are errors naming the variable

use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
#[error("Invalid value for {name}: {value:?}")]
pub struct EnvError {
    pub name: String,
    pub value: String,
}

/// Parse `name` if set. Unset yields `Ok(None)`, an unparsable value an error.
pub fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, EnvError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| EnvError {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}
