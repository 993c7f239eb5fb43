//! Layered configuration loading and querying.
#![deny(missing_docs)]

use std::{borrow::Cow, collections::BTreeSet, path::Path, sync::Arc};

use basenji_error::GenericError;
use figment::{
    error::Kind,
    providers::{Env, Serialized},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

pub mod deser;
mod provider;

use self::provider::FileProvider;

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigurationError {
    /// The environment variable prefix was empty.
    #[snafu(display("Environment variable prefix must not be empty."))]
    EmptyPrefix,

    /// A required field was not present in any source.
    #[snafu(display("Missing field '{}' in configuration. {}", field, help_text))]
    MissingField {
        /// Text telling the user which keys or environment variables would set the field.
        help_text: String,

        /// Name of the missing field.
        field: Cow<'static, str>,
    },

    /// A field was present but held a value of the wrong type.
    #[snafu(display(
        "Expected value for field '{}' to be '{}', got '{}' instead.",
        field,
        expected_ty,
        actual_ty
    ))]
    InvalidFieldType {
        /// Period-separated path to the field.
        field: String,

        /// Expected data type.
        expected_ty: String,

        /// Actual data type.
        actual_ty: String,
    },

    /// A configuration source could not be loaded, or a value could not be extracted.
    #[snafu(display("Failed to load or query configuration."))]
    Generic {
        /// Error source.
        source: GenericError,
    },
}

impl From<figment::Error> for ConfigurationError {
    fn from(e: figment::Error) -> Self {
        from_figment_error(&BTreeSet::new(), e)
    }
}

/// Loads configuration from files and the environment.
///
/// Sources take precedence in the order they are added: a value from a source added later overrides the same value
/// from a source added earlier. The combined configuration is either deserialized directly
/// ([`into_typed`][Self::into_typed]) or kept around for keyed lookups ([`into_generic`][Self::into_generic]).
pub struct ConfigurationLoader {
    env_prefixes: BTreeSet<String>,
    figment: Figment,
}

impl Default for ConfigurationLoader {
    fn default() -> Self {
        Self {
            env_prefixes: BTreeSet::new(),
            figment: Figment::new(),
        }
    }
}

impl ConfigurationLoader {
    /// Loads the given YAML configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or is not valid YAML, an error is returned.
    pub fn from_yaml<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigurationError> {
        let provider = FileProvider::from_yaml(&path).map_err(GenericError::from).context(Generic)?;
        Ok(self.merge(provider))
    }

    /// Loads the given YAML configuration file, skipping it if it can't be read or parsed.
    pub fn try_from_yaml<P: AsRef<Path>>(self, path: P) -> Self {
        match FileProvider::from_yaml(&path) {
            Ok(provider) => self.merge(provider),
            Err(e) => {
                debug!(error = %e, file_path = %path.as_ref().display(), "Skipping unreadable YAML configuration file.");
                self
            }
        }
    }

    /// Loads the given JSON configuration file.
    ///
    /// # Errors
    ///
    /// If the file could not be read, or is not valid JSON, an error is returned.
    pub fn from_json<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigurationError> {
        let provider = FileProvider::from_json(&path).map_err(GenericError::from).context(Generic)?;
        Ok(self.merge(provider))
    }

    /// Loads configuration from environment variables starting with `prefix`.
    ///
    /// An underscore is appended to the prefix if it doesn't already end with one, so a prefix of `basenji` matches
    /// `BASENJI_DOGSTATSD_PORT` and exposes it as `dogstatsd_port`. Matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// If the prefix is empty, an error is returned.
    pub fn from_environment(mut self, prefix: &str) -> Result<Self, ConfigurationError> {
        if prefix.is_empty() {
            return Err(ConfigurationError::EmptyPrefix);
        }

        let prefix = if prefix.ends_with('_') {
            prefix.to_uppercase()
        } else {
            format!("{}_", prefix.to_uppercase())
        };

        // The environment is snapshotted here so later changes to the process environment are not observed.
        let env = Env::prefixed(&prefix);
        let values = env.data().map_err(GenericError::from).context(Generic)?;
        if let Some(dict) = values.get(&figment::Profile::Default) {
            self = self.merge(Serialized::defaults(dict.clone()));
            self.env_prefixes.insert(prefix);
        }
        Ok(self)
    }

    /// Adds a set of values from anything serializable, such as defaults computed at runtime.
    pub fn with_values<T: Serialize>(self, values: T) -> Self {
        self.merge(Serialized::defaults(values))
    }

    fn merge<P: Provider>(mut self, provider: P) -> Self {
        self.figment = self.figment.admerge(provider);
        self
    }

    /// Consumes the loader, deserializing the combined configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error is returned.
    pub fn into_typed<'a, T: Deserialize<'a>>(self) -> Result<T, ConfigurationError> {
        self.figment
            .extract()
            .map_err(|e| from_figment_error(&self.env_prefixes, e))
    }

    /// Consumes the loader, returning a [`GenericConfiguration`] for keyed lookups.
    pub fn into_generic(self) -> GenericConfiguration {
        GenericConfiguration {
            inner: Arc::new(Inner {
                figment: self.figment,
                env_prefixes: self.env_prefixes,
            }),
        }
    }
}

#[derive(Debug)]
struct Inner {
    figment: Figment,
    env_prefixes: BTreeSet<String>,
}

/// Combined configuration from a [`ConfigurationLoader`], queryable by key.
///
/// Keys use `a.b.c` notation for nested values. Since environment variables have no nesting, a nested key that
/// isn't found is retried with periods replaced by underscores, so `dogstatsd.port` also finds
/// `BASENJI_DOGSTATSD_PORT`.
#[derive(Clone, Debug)]
pub struct GenericConfiguration {
    inner: Arc<Inner>,
}

impl GenericConfiguration {
    fn get<'a, T: Deserialize<'a>>(&self, key: &str) -> Result<T, ConfigurationError> {
        match self.inner.figment.extract_inner(key) {
            Ok(value) => Ok(value),
            Err(e) if matches!(e.kind, Kind::MissingField(_)) && key.contains('.') => self
                .inner
                .figment
                .extract_inner(&key.replace('.', "_"))
                .map_err(|e| from_figment_error(&self.inner.env_prefixes, e)),
            Err(e) => Err(from_figment_error(&self.inner.env_prefixes, e)),
        }
    }

    /// Gets a value by key.
    ///
    /// # Errors
    ///
    /// If the key doesn't exist, or the value could not be deserialized into `T`, an error is returned.
    pub fn get_typed<'a, T: Deserialize<'a>>(&self, key: &str) -> Result<T, ConfigurationError> {
        self.get(key)
    }

    /// Gets a value by key, falling back to `T::default()` if it is missing or invalid.
    ///
    /// Deserialization errors are swallowed, so prefer [`try_get_typed`][Self::try_get_typed] where a bad value
    /// should be reported.
    pub fn get_typed_or_default<'a, T: Default + Deserialize<'a>>(&self, key: &str) -> T {
        self.get(key).unwrap_or_default()
    }

    /// Gets a value by key, returning `Ok(None)` if it doesn't exist.
    ///
    /// # Errors
    ///
    /// If the value exists but could not be deserialized into `T`, an error is returned.
    pub fn try_get_typed<'a, T: Deserialize<'a>>(&self, key: &str) -> Result<Option<T>, ConfigurationError> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigurationError::MissingField { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Deserializes the entire configuration as `T`.
    ///
    /// # Errors
    ///
    /// If the configuration could not be deserialized into `T`, an error is returned.
    pub fn as_typed<'a, T: Deserialize<'a>>(&self) -> Result<T, ConfigurationError> {
        self.inner
            .figment
            .extract()
            .map_err(|e| from_figment_error(&self.inner.env_prefixes, e))
    }
}

fn from_figment_error(env_prefixes: &BTreeSet<String>, e: figment::Error) -> ConfigurationError {
    match e.kind {
        Kind::MissingField(field) => {
            let mut valid_keys = vec![field.to_string()];
            valid_keys.extend(
                env_prefixes
                    .iter()
                    .map(|prefix| format!("{}{}", prefix, field.replace('.', "_").to_uppercase())),
            );
            let help_text = format!("Try setting `{}`.", valid_keys.join("` or `"));

            ConfigurationError::MissingField { help_text, field }
        }
        Kind::InvalidType(actual_ty, expected_ty) => ConfigurationError::InvalidFieldType {
            field: e.path.join("."),
            expected_ty,
            actual_ty: actual_ty.to_string(),
        },
        _ => ConfigurationError::Generic { source: e.into() },
    }
}
