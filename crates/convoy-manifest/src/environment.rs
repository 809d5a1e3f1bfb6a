//! Resolution of environment directives to literal strings.
//!
//! A directive is a single-key object `{function: argument}`. The only
//! function is [`FETCH_FUNCTION`], which substitutes the exact body read
//! from a URL. Reads go through the [`Fetch`] trait so the network can be
//! replaced in tests.

use std::collections::BTreeMap;
use std::time::Duration;

use convoy_common::constants::FETCH_FUNCTION;
use convoy_common::error::{ConvoyError, Result};

use crate::model::{EnvValue, Environment};

/// Environment with every directive replaced by its value.
pub type ResolvedEnvironment = BTreeMap<String, String>;

/// Reads the body stored at a location.
pub trait Fetch {
    /// Returns the exact body at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::EnvironmentFetch`] if the read fails.
    fn fetch(&self, location: &str) -> Result<String>;
}

/// [`Fetch`] implementation over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Per-request timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a fetcher with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConvoyError::Config`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .map_err(|e| ConvoyError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, location: &str) -> Result<String> {
        tracing::debug!(location, "fetching environment value");
        let fetch_error = |message: String| ConvoyError::EnvironmentFetch {
            location: location.to_string(),
            message,
        };

        let response = self
            .client
            .get(location)
            .send()
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }
        response.text().map_err(|e| fetch_error(e.to_string()))
    }
}

/// Resolves one value.
///
/// `owner` and `variable` only label errors.
///
/// # Errors
///
/// Returns [`ConvoyError::UnknownEnvironmentFunction`] for unknown functions
/// and propagates fetch failures.
pub fn resolve_value(
    owner: &str,
    variable: &str,
    value: &EnvValue,
    fetcher: &dyn Fetch,
) -> Result<String> {
    match value {
        EnvValue::Literal(s) => Ok(s.clone()),
        EnvValue::Directive { function, argument } if function == FETCH_FUNCTION => {
            fetcher.fetch(argument)
        }
        EnvValue::Directive { function, .. } => Err(ConvoyError::UnknownEnvironmentFunction {
            container: owner.to_string(),
            variable: variable.to_string(),
            function: function.clone(),
        }),
    }
}

/// Resolves every value of an environment.
///
/// # Errors
///
/// Returns the first resolution failure.
pub fn resolve_environment(
    owner: &str,
    environment: &Environment,
    fetcher: &dyn Fetch,
) -> Result<ResolvedEnvironment> {
    environment
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(owner, key, value, fetcher)?)))
        .collect()
}

/// Builds a hook's effective environment.
///
/// The hook overlay is resolved on its own (nothing is reused from the
/// owner's pass) and wins over the owner's resolved values on collision.
///
/// # Errors
///
/// Returns the first resolution failure in the overlay.
pub fn hook_environment(
    owner: &str,
    owner_resolved: &ResolvedEnvironment,
    overlay: &Environment,
    fetcher: &dyn Fetch,
) -> Result<ResolvedEnvironment> {
    let mut merged = owner_resolved.clone();
    merged.extend(resolve_environment(owner, overlay, fetcher)?);
    Ok(merged)
}

/// Checks that every directive names a known function, without fetching.
///
/// # Errors
///
/// Returns [`ConvoyError::UnknownEnvironmentFunction`] for the first unknown one.
pub fn check_functions(owner: &str, environment: &Environment) -> Result<()> {
    for (variable, value) in environment {
        if let EnvValue::Directive { function, .. } = value {
            if function != FETCH_FUNCTION {
                return Err(ConvoyError::UnknownEnvironmentFunction {
                    container: owner.to_string(),
                    variable: variable.clone(),
                    function: function.clone(),
                });
            }
        }
    }
    Ok(())
}
