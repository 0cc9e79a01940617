use crate::error::ConfigError;
use crate::structures::{DEFAULT_MAX_RETIRED, MAX_INITIAL_CAPACITY, MIN_CAPACITY};
use serde::Deserialize;

/// Settings applied to every collection a [`Registry`](crate::Registry) creates.
///
/// Every field is optional when loading from TOML:
/// ```
/// use concurrent_collections::RegistryConfig;
/// let config = RegistryConfig::from_toml_str("default_queue_capacity = 64").unwrap();
/// assert_eq!(config.default_queue_capacity, Some(64));
/// assert_eq!(config.max_retired, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// How many unlinked records a thread holds before scanning the hazard pointers.
    pub max_retired: usize,
    /// The bound given to queues created without one. None leaves them unbounded.
    pub default_queue_capacity: Option<usize>,
    /// The number of slots a new hash map starts with, rounded up to a power of two. At most
    /// [`MAX_INITIAL_CAPACITY`].
    pub initial_map_capacity: usize
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            max_retired: DEFAULT_MAX_RETIRED,
            default_queue_capacity: None,
            initial_map_capacity: MIN_CAPACITY
        }
    }
}

impl RegistryConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retired == 0 {
            return Err(ConfigError::ZeroMaxRetired);
        }
        if self.default_queue_capacity == Some(0) {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.initial_map_capacity > MAX_INITIAL_CAPACITY {
            return Err(ConfigError::MapCapacityTooLarge(self.initial_map_capacity));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RegistryConfig;
    use crate::structures::MAX_INITIAL_CAPACITY;
    use crate::error::ConfigError;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(RegistryConfig::from_toml_str("").unwrap(), RegistryConfig::default());
    }

    #[test]
    fn test_full_config() {
        let config = RegistryConfig::from_toml_str(
            "max_retired = 8\ndefault_queue_capacity = 32\ninitial_map_capacity = 256\n"
        ).unwrap();
        assert_eq!(config.max_retired, 8);
        assert_eq!(config.default_queue_capacity, Some(32));
        assert_eq!(config.initial_map_capacity, 256);
    }

    #[test]
    fn test_largest_map_capacity_is_accepted() {
        let input = format!("initial_map_capacity = {}", MAX_INITIAL_CAPACITY);
        assert_eq!(RegistryConfig::from_toml_str(&input).unwrap().initial_map_capacity, MAX_INITIAL_CAPACITY);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(RegistryConfig::from_toml_str("max_retired = 0"), Err(ConfigError::ZeroMaxRetired)));
        assert!(matches!(RegistryConfig::from_toml_str("default_queue_capacity = 0"),
                         Err(ConfigError::ZeroQueueCapacity)));
        assert!(matches!(RegistryConfig::from_toml_str("initial_map_capacity = 9223372036854775807"),
                         Err(ConfigError::MapCapacityTooLarge(_))));
        assert!(matches!(RegistryConfig::from_toml_str("unknown = 1"), Err(ConfigError::Parse(_))));
        assert!(matches!(RegistryConfig::from_toml_str("max_retired = \"lots\""), Err(ConfigError::Parse(_))));
    }
}
