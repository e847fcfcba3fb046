use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub const FEATURE_URL: &str = "featureUrl";
pub const FEATURE_KEY: &str = "featureKey";
pub const ENABLED_KEY: &str = "enabledKey";
pub const SHOULD_MEMOIZE: &str = "shouldMemoize";
pub const DEFAULT_VALUE: &str = "defaultValue";

/// Names under which configuration options are exposed through resolution.
pub const OPTION_NAMES: [&str; 5] = [
    FEATURE_URL,
    FEATURE_KEY,
    ENABLED_KEY,
    SHOULD_MEMOIZE,
    DEFAULT_VALUE,
];

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration must be an object")]
    NotAnObject,
    #[error("invalid option: {0}")]
    Invalid(#[from] serde_json::Error),
    #[error("invalid feature url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct FlagConfig {
    /// Endpoint the feature payload is fetched from.
    pub feature_url: Option<String>,
    /// Raw-record field holding the flag identifier.
    pub feature_key: String,
    /// Raw-record field copied into the projection.
    pub enabled_key: String,
    pub should_memoize: bool,
    /// Fallback embedded in every descriptor.
    pub default_value: Value,
}

impl Default for FlagConfig {
    fn default() -> Self {
        FlagConfig {
            feature_url: None,
            feature_key: "key".into(),
            enabled_key: "enabled".into(),
            should_memoize: true,
            default_value: Value::Bool(false),
        }
    }
}

impl FlagConfig {
    /// Value of the option called `name`, or `None` if `name` is not an option.
    pub fn option(&self, name: &str) -> Option<Value> {
        let value = match name {
            FEATURE_URL => self
                .feature_url
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
            FEATURE_KEY => Value::String(self.feature_key.clone()),
            ENABLED_KEY => Value::String(self.enabled_key.clone()),
            SHOULD_MEMOIZE => Value::Bool(self.should_memoize),
            DEFAULT_VALUE => self.default_value.clone(),
            _ => return None,
        };
        Some(value)
    }

    /// Applies the options present in `patch`, leaving the others untouched.
    pub fn apply(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(url) = &patch.feature_url {
            validate_url(url)?;
        }

        if let Some(url) = patch.feature_url {
            self.feature_url = Some(url);
        }
        if let Some(feature_key) = patch.feature_key {
            self.feature_key = feature_key;
        }
        if let Some(enabled_key) = patch.enabled_key {
            self.enabled_key = enabled_key;
        }
        if let Some(should_memoize) = patch.should_memoize {
            self.should_memoize = should_memoize;
        }
        if let Some(default_value) = patch.default_value {
            self.default_value = default_value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.feature_url {
            Some(url) => validate_url(url),
            None => Ok(()),
        }
    }
}

fn validate_url(url: &str) -> Result<(), ConfigError> {
    Url::parse(url)
        .map(|_| ())
        .map_err(|source| ConfigError::InvalidUrl {
            url: url.to_string(),
            source,
        })
}

/// A partial update to [`FlagConfig`]. Unknown options are ignored.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub feature_url: Option<String>,
    pub feature_key: Option<String>,
    pub enabled_key: Option<String>,
    pub should_memoize: Option<bool>,
    pub default_value: Option<Value>,
}

impl ConfigPatch {
    pub fn from_value(options: &Value) -> Result<Self, ConfigError> {
        if !options.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        Ok(serde_json::from_value(options.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = FlagConfig::default();
        assert_eq!(config.option(FEATURE_URL), Some(Value::Null));
        assert_eq!(config.option(FEATURE_KEY), Some(json!("key")));
        assert_eq!(config.option(ENABLED_KEY), Some(json!("enabled")));
        assert_eq!(config.option(SHOULD_MEMOIZE), Some(json!(true)));
        assert_eq!(config.option(DEFAULT_VALUE), Some(json!(false)));
        assert_eq!(config.option("darkMode"), None);
        assert_eq!(config.option("feature_key"), None);
    }

    #[test]
    fn test_patch_ignores_unknown_options() {
        let patch = ConfigPatch::from_value(&json!({
            "featureKey": "name",
            "defaultValue": "off",
            "pollInterval": 30,
        }))
        .unwrap();

        let mut config = FlagConfig::default();
        config.apply(patch).unwrap();

        assert_eq!(config.feature_key, "name");
        assert_eq!(config.default_value, json!("off"));
        assert_eq!(config.enabled_key, "enabled");
        assert!(config.should_memoize);
    }

    #[test]
    fn test_patch_rejects_bad_input() {
        assert!(matches!(
            ConfigPatch::from_value(&json!(["featureKey"])),
            Err(ConfigError::NotAnObject)
        ));
        assert!(matches!(
            ConfigPatch::from_value(&json!({"shouldMemoize": "yes"})),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_url_leaves_config_untouched() {
        let mut config = FlagConfig::default();
        let patch = ConfigPatch {
            feature_url: Some("not a url".into()),
            feature_key: Some("name".into()),
            ..Default::default()
        };

        assert!(matches!(
            config.apply(patch),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert_eq!(config, FlagConfig::default());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: FlagConfig = serde_json::from_value(json!({
            "featureUrl": "https://flags.example.com/features.json",
            "shouldMemoize": false,
        }))
        .unwrap();

        assert_eq!(
            config.feature_url.as_deref(),
            Some("https://flags.example.com/features.json")
        );
        assert!(!config.should_memoize);
        assert_eq!(config.feature_key, "key");
        config.validate().unwrap();
    }
}
