//! Known-device history: persistence, merging and the owned discovery state

pub mod merge;
pub mod state;

use crate::error::DiscoveryError;
use crate::model::{Device, KnownDeviceStore};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub use merge::{build_view, merge_device, merge_interface, merge_records, network_key_for};
pub use state::{DiscoveryState, StoreRole};

/// Load/save capability for the known-device document
pub trait DeviceStore: Send + Sync {
    fn load(&self) -> crate::Result<KnownDeviceStore>;

    fn save(&self, devices: &KnownDeviceStore) -> crate::Result<()>;

    /// Forget everything persisted
    fn clear(&self) -> crate::Result<()>;

    fn describe(&self) -> String;
}

impl<S: DeviceStore + ?Sized> DeviceStore for Arc<S> {
    fn load(&self) -> crate::Result<KnownDeviceStore> {
        (**self).load()
    }

    fn save(&self, devices: &KnownDeviceStore) -> crate::Result<()> {
        (**self).save(devices)
    }

    fn clear(&self) -> crate::Result<()> {
        (**self).clear()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Pretty JSON file, `~/.wol_caster/known_devices.json` by default
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store under the user's home directory
    pub fn in_home() -> crate::Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| DiscoveryError::StorageError("Home directory not found".to_string()))?;
        Ok(Self::new(home.join(".wol_caster").join("known_devices.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceStore for JsonFileStore {
    fn load(&self) -> crate::Result<KnownDeviceStore> {
        if !self.path.exists() {
            return Ok(KnownDeviceStore::new());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(KnownDeviceStore::new());
        }
        parse_document(&content)
    }

    fn save(&self, devices: &KnownDeviceStore) -> crate::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let json = serde_json::to_string_pretty(devices)?;
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> crate::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Parse the known-device document
///
/// Each interface holds a list of devices. Older documents may instead hold
/// an object of devices keyed by MAC, or a single imported device under an
/// `ip_mac` key; both are read as lists.
pub fn parse_document(content: &str) -> crate::Result<KnownDeviceStore> {
    let Value::Object(entries) = serde_json::from_str::<Value>(content)? else {
        return Err(DiscoveryError::StorageError(
            "known-device document is not an object".to_string(),
        ));
    };

    let mut store = KnownDeviceStore::new();
    for (interface, value) in entries {
        let devices = match value {
            Value::Array(_) => serde_json::from_value::<Vec<Device>>(value)?,
            Value::Object(fields) if fields.contains_key("ip") => {
                vec![serde_json::from_value::<Device>(Value::Object(fields))?]
            }
            Value::Object(fields) => fields
                .into_iter()
                .map(|(_, device)| serde_json::from_value::<Device>(device))
                .collect::<Result<Vec<_>, _>>()?,
            other => {
                return Err(DiscoveryError::StorageError(format!(
                    "entry '{}' is neither a device list nor a device: {}",
                    interface, other
                )))
            }
        };
        store.insert(interface, devices);
    }
    Ok(store)
}

/// Process-local store
#[derive(Default)]
pub struct MemoryStore {
    devices: Mutex<KnownDeviceStore>,
}

impl MemoryStore {
    pub fn with_devices(devices: KnownDeviceStore) -> Self {
        Self {
            devices: Mutex::new(devices),
        }
    }

    fn lock(&self) -> crate::Result<std::sync::MutexGuard<'_, KnownDeviceStore>> {
        self.devices
            .lock()
            .map_err(|_| DiscoveryError::StorageError("memory store poisoned".to_string()))
    }
}

impl DeviceStore for MemoryStore {
    fn load(&self) -> crate::Result<KnownDeviceStore> {
        Ok(self.lock()?.clone())
    }

    fn save(&self, devices: &KnownDeviceStore) -> crate::Result<()> {
        *self.lock()? = devices.clone();
        Ok(())
    }

    fn clear(&self) -> crate::Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
