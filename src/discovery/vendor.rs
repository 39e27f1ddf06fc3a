//! OUI prefix to vendor name lookup

use super::mac::pad_mac_address;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Virtualization and test vendors checked after the database
const COMMON_VENDORS: &[(&str, &str)] = &[
    ("005056", "VMware"),
    ("000C29", "VMware"),
    ("001A11", "Google"),
    ("00163E", "Xen"),
    ("525400", "QEMU"),
    ("080027", "VirtualBox"),
    ("0EC663", "ASIX ELECTRONICS CORP."),
];

/// In-memory OUI table
#[derive(Debug, Clone, Default)]
pub struct VendorLookup {
    entries: HashMap<String, String>,
}

impl VendorLookup {
    /// Load a tab-separated `PREFIX<TAB>VENDOR` file
    ///
    /// An unreadable file leaves only the built-in table.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                let lookup = Self::parse(&content);
                log::debug!("Loaded {} OUI entries from {}", lookup.len(), path.display());
                lookup
            }
            Err(e) => {
                log::warn!("OUI database {} unavailable: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut entries = HashMap::new();
        for line in content.lines() {
            let mut parts = line.trim().split('\t');
            let (Some(prefix), Some(vendor)) = (parts.next(), parts.next()) else {
                continue;
            };
            let vendor = vendor.trim();
            let key = normalize_prefix(prefix);
            if key.len() == 6 && !vendor.is_empty() {
                entries.entry(key).or_insert_with(|| vendor.to_string());
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vendor for a MAC in any accepted textual form
    pub fn lookup(&self, mac: &str) -> Option<String> {
        if mac.trim().is_empty() {
            return None;
        }
        let oui: String = pad_mac_address(mac).replace(':', "").chars().take(6).collect();

        if let Some(vendor) = self.entries.get(&oui) {
            return Some(vendor.clone());
        }

        COMMON_VENDORS
            .iter()
            .find(|(prefix, _)| *prefix == oui)
            .map(|(_, vendor)| vendor.to_string())
    }
}

/// Uppercase hex digits of the first six nibbles
fn normalize_prefix(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_uppercase())
        .take(6)
        .collect()
}
