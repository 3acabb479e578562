//! JSON persistence for configuration documents

use alloc::string::String;
use alloc::vec::Vec;

use envnode_hal::FileStore;
use serde_json::{Map, Value};

use crate::config::{ConfigDocument, ConfigError, EthernetConfig, MqttConfig, SensorConfig};

/// Largest configuration document accepted from storage
const MAX_DOCUMENT_LEN: usize = 4096;

/// Loads, merges and resets configuration documents on a file store
pub struct ConfigManager<'a, S> {
    store: &'a S,
}

impl<'a, S: FileStore> ConfigManager<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Load a document, falling back to defaults.
    ///
    /// A missing file is created from defaults. A corrupt or invalid file is
    /// left in place and defaults are returned with a warning.
    pub fn load<T: ConfigDocument>(&self) -> T {
        match self.store.exists(T::FILE_NAME) {
            Ok(false) => {
                let defaults = T::default();
                if let Err(e) = self.write_document(T::FILE_NAME, &defaults) {
                    warn!("Could not create {}: {}", T::FILE_NAME, e);
                }
                return defaults;
            }
            Ok(true) => {}
            Err(e) => {
                warn!("Load config {} failed: {:?}; using defaults", T::FILE_NAME, dbg_fmt!(e));
                return T::default();
            }
        }

        let parsed = self
            .read_document(T::FILE_NAME)
            .and_then(|raw| serde_json::from_slice::<T>(&raw).map_err(|_| ConfigError::Parse))
            .and_then(|config| config.validate().map(|_| config));

        match parsed {
            Ok(config) => config,
            Err(e) => {
                warn!("Load config {} failed: {}; using defaults", T::FILE_NAME, e);
                T::default()
            }
        }
    }

    /// Shallow-merge `partial` into the stored document and persist it.
    ///
    /// Returns the merged configuration. Nothing is written when the merged
    /// document does not validate.
    pub fn save<T: ConfigDocument>(&self, partial: &Value) -> Result<T, ConfigError> {
        let updates = partial.as_object().ok_or(ConfigError::NotAnObject)?;

        let mut document = self.current_object::<T>()?;
        for (key, value) in updates {
            document.insert(key.clone(), value.clone());
        }
        let merged = Value::Object(document);

        let config: T = serde_json::from_value(merged.clone()).map_err(|_| ConfigError::Parse)?;
        config.validate()?;

        self.write_value(T::FILE_NAME, &merged)?;
        info!("Saved config {}", T::FILE_NAME);
        Ok(config)
    }

    /// Restore `keys` from defaults, or the whole document when `keys` is
    /// `None`. Keys unknown to the defaults are removed.
    pub fn reset<T: ConfigDocument>(&self, keys: Option<&[&str]>) -> Result<(), ConfigError> {
        let Some(keys) = keys else {
            self.write_document(T::FILE_NAME, &T::default())?;
            info!("Reset all of {}", T::FILE_NAME);
            return Ok(());
        };

        let defaults = default_object::<T>()?;
        let mut document = self.current_object::<T>()?;
        for &key in keys {
            match defaults.get(key) {
                Some(value) => {
                    document.insert(key.into(), value.clone());
                    info!("Reset '{}' in {}", key, T::FILE_NAME);
                }
                None => {
                    if document.remove(key).is_some() {
                        warn!("Key '{}' not in defaults; deleted", key);
                    } else {
                        warn!("Key '{}' not found in {}", key, T::FILE_NAME);
                    }
                }
            }
        }
        self.write_value(T::FILE_NAME, &Value::Object(document))
    }

    /// Restore network settings, broker credentials and alarm thresholds.
    ///
    /// Sampling layout and time settings are kept.
    pub fn factory_reset(&self) -> Result<(), ConfigError> {
        self.reset::<EthernetConfig>(None)?;
        self.reset::<MqttConfig>(Some(&["broker", "port", "user", "password"]))?;
        self.reset::<SensorConfig>(Some(&["temperature", "humidity"]))
    }

    fn current_object<T: ConfigDocument>(&self) -> Result<Map<String, Value>, ConfigError> {
        let stored = match self.store.exists(T::FILE_NAME) {
            Ok(true) => self
                .read_document(T::FILE_NAME)
                .ok()
                .and_then(|raw| serde_json::from_slice::<Value>(&raw).ok()),
            Ok(false) => None,
            Err(_) => return Err(ConfigError::Storage),
        };

        match stored {
            Some(Value::Object(map)) => Ok(map),
            _ => default_object::<T>(),
        }
    }

    fn read_document(&self, name: &str) -> Result<Vec<u8>, ConfigError> {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = self
                .store
                .read_at(name, raw.len() as u32, &mut chunk)
                .map_err(|_| ConfigError::Storage)?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            if raw.len() > MAX_DOCUMENT_LEN {
                return Err(ConfigError::Parse);
            }
        }
        Ok(raw)
    }

    fn write_document<T: ConfigDocument>(&self, name: &str, config: &T) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(config).map_err(|_| ConfigError::Parse)?;
        self.store
            .write(name, &bytes)
            .map_err(|_| ConfigError::Storage)
    }

    fn write_value(&self, name: &str, value: &Value) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|_| ConfigError::Parse)?;
        self.store
            .write(name, &bytes)
            .map_err(|_| ConfigError::Storage)
    }
}

fn default_object<T: ConfigDocument>() -> Result<Map<String, Value>, ConfigError> {
    match serde_json::to_value(T::default()) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ConfigError::Parse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemStore;
    use serde_json::json;

    #[test]
    fn test_load_creates_missing_file() {
        let store = MemStore::default();
        let manager = ConfigManager::new(&store);

        let config: MqttConfig = manager.load();
        assert_eq!(config, MqttConfig::default());
        assert!(store.contents(MqttConfig::FILE_NAME).is_some());
    }

    #[test]
    fn test_load_corrupt_file_falls_back() {
        let store = MemStore::default();
        store.put(EthernetConfig::FILE_NAME, b"{ not json");
        let manager = ConfigManager::new(&store);

        let config: EthernetConfig = manager.load();
        assert_eq!(config, EthernetConfig::default());
        // The corrupt file is not overwritten by a load.
        assert_eq!(
            store.contents(EthernetConfig::FILE_NAME).unwrap(),
            b"{ not json".to_vec()
        );
    }

    #[test]
    fn test_load_invalid_document_falls_back() {
        let store = MemStore::default();
        store.put(SensorConfig::FILE_NAME, br#"{"read_delay_ms": 500}"#);
        let manager = ConfigManager::new(&store);

        let config: SensorConfig = manager.load();
        assert_eq!(config.read_delay_ms, 2_000);
    }

    #[test]
    fn test_save_merges_and_returns_config() {
        let store = MemStore::default();
        let manager = ConfigManager::new(&store);

        let merged: MqttConfig = manager
            .save(&json!({"broker": "10.0.0.5", "port": 8883}))
            .unwrap();
        assert_eq!(merged.broker, "10.0.0.5");
        assert_eq!(merged.port, 8883);
        assert_eq!(merged.keepalive_secs, 120);

        let reloaded: MqttConfig = manager.load();
        assert_eq!(reloaded, merged);
    }

    #[test]
    fn test_save_rejects_invalid_update() {
        let store = MemStore::default();
        let manager = ConfigManager::new(&store);

        let result = manager.save::<EthernetConfig>(&json!({"ip": "not-an-ip"}));
        assert_eq!(result, Err(ConfigError::Invalid("ip")));
        assert!(store.contents(EthernetConfig::FILE_NAME).is_none());

        let result = manager.save::<EthernetConfig>(&json!(["ip"]));
        assert_eq!(result, Err(ConfigError::NotAnObject));
    }

    #[test]
    fn test_reset_keys() {
        let store = MemStore::default();
        let manager = ConfigManager::new(&store);
        manager
            .save::<MqttConfig>(&json!({"broker": "10.0.0.5", "legacy": 1}))
            .unwrap();

        manager
            .reset::<MqttConfig>(Some(&["broker", "legacy", "missing"]))
            .unwrap();

        let raw: Value =
            serde_json::from_slice(&store.contents(MqttConfig::FILE_NAME).unwrap()).unwrap();
        assert_eq!(raw["broker"], json!("192.168.1.1"));
        assert!(raw.get("legacy").is_none());
    }

    #[test]
    fn test_factory_reset() {
        let store = MemStore::default();
        let manager = ConfigManager::new(&store);
        manager
            .save::<EthernetConfig>(&json!({"ip": "10.1.1.2"}))
            .unwrap();
        manager
            .save::<MqttConfig>(&json!({"broker": "10.0.0.5", "heartbeat_interval_ms": 30000}))
            .unwrap();
        manager
            .save::<SensorConfig>(&json!({"sample_count": 3}))
            .unwrap();

        manager.factory_reset().unwrap();

        let ethernet: EthernetConfig = manager.load();
        assert_eq!(ethernet.ip, "192.168.1.191");
        let mqtt: MqttConfig = manager.load();
        assert_eq!(mqtt.broker, "192.168.1.1");
        assert_eq!(mqtt.heartbeat_interval_ms, 30_000);
        let sensors: SensorConfig = manager.load();
        assert_eq!(sensors.sample_count, 3);
    }
}
