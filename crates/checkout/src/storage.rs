//! Persistence gateway for client-side checkout state.
//!
//! Everything the browser app kept in local storage (guest cart, drafts,
//! wishlist, recent addresses) goes through [`PersistenceGateway`]. Values
//! are JSON wrapped in a versioned envelope `{"v": 1, "data": ...}`; bare
//! JSON written before the envelope existed is still read.
//!
//! Backends implement [`Storage`]: [`MemoryStorage`] for tests and embedded
//! hosts, [`FileStorage`] for the CLI (one file per key).

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use gapa_core::GuestCart;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Current envelope version.
const SCHEMA_VERSION: u64 = 1;

/// Number of recent address strings kept.
pub const RECENT_ADDRESS_LIMIT: usize = 5;

/// Errors raised by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem operation failed.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value could not be encoded.
    #[error("Storage encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// A writer panicked while holding the lock.
    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Keys of persisted checkout state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    GuestCart,
    DraftAddress,
    DraftPaymentMethod,
    DraftDeliveryMethod,
    Wishlist,
    RecentAddresses,
}

impl StorageKey {
    pub const ALL: [Self; 6] = [
        Self::GuestCart,
        Self::DraftAddress,
        Self::DraftPaymentMethod,
        Self::DraftDeliveryMethod,
        Self::Wishlist,
        Self::RecentAddresses,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GuestCart => "guest_cart",
            Self::DraftAddress => "checkout_address",
            Self::DraftPaymentMethod => "checkout_payment_method",
            Self::DraftDeliveryMethod => "checkout_delivery_method",
            Self::Wishlist => "wishlist",
            Self::RecentAddresses => "recent_addresses",
        }
    }

    /// Whether the value is kept when the user logs out.
    #[must_use]
    pub const fn survives_logout(self) -> bool {
        matches!(
            self,
            Self::GuestCart | Self::Wishlist | Self::RecentAddresses | Self::DraftDeliveryMethod
        )
    }
}

/// A string key-value store.
pub trait Storage: Send + Sync {
    /// Read a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a raw value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Storage backed by one JSON file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Use `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // Write then rename so readers never see a half-written file.
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.path(key))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    v: u64,
    data: &'a T,
}

/// Typed, versioned access to persisted checkout state.
#[derive(Clone)]
pub struct PersistenceGateway {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway").finish_non_exhaustive()
    }
}

impl PersistenceGateway {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Gateway over a fresh [`MemoryStorage`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Read a value.
    ///
    /// Unreadable or outdated payloads are logged and treated as absent, so
    /// a corrupt draft never blocks checkout.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend itself fails.
    pub fn load<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.storage.get(key.as_str())? else {
            return Ok(None);
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = key.as_str(), error = %e, "Discarding unreadable stored value");
                return Ok(None);
            }
        };

        let data = match value {
            Value::Object(mut map)
                if map.get("v").and_then(Value::as_u64).is_some() && map.contains_key("data") =>
            {
                let version = map.get("v").and_then(Value::as_u64).unwrap_or_default();
                if version > SCHEMA_VERSION {
                    tracing::warn!(key = key.as_str(), version, "Stored value is from a newer schema");
                    return Ok(None);
                }
                map.remove("data").unwrap_or(Value::Null)
            }
            // Written before values were versioned.
            legacy => legacy,
        };

        match serde_json::from_value(data) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                tracing::warn!(key = key.as_str(), error = %e, "Discarding malformed stored value");
                Ok(None)
            }
        }
    }

    /// Write a value inside the current envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend write fails.
    pub fn save<T: Serialize>(&self, key: StorageKey, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&EnvelopeRef {
            v: SCHEMA_VERSION,
            data: value,
        })?;
        self.storage.set(key.as_str(), &raw)
    }

    /// Delete a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        self.storage.remove(key.as_str())
    }

    /// Read-modify-write: load the latest value (or default), apply `f`,
    /// write the result back.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    pub fn update<T, R>(&self, key: StorageKey, f: impl FnOnce(&mut T) -> R) -> Result<R, StorageError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut value = self.load::<T>(key)?.unwrap_or_default();
        let result = f(&mut value);
        self.save(key, &value)?;
        Ok(result)
    }

    /// Drop everything except the keys that survive logout.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend delete fails.
    pub fn clear_on_logout(&self) -> Result<(), StorageError> {
        for key in StorageKey::ALL.into_iter().filter(|k| !k.survives_logout()) {
            self.remove(key)?;
        }
        Ok(())
    }

    // =========================================================================
    // Typed helpers
    // =========================================================================

    /// The guest cart, empty when nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub fn guest_cart(&self) -> Result<GuestCart, StorageError> {
        Ok(self.load(StorageKey::GuestCart)?.unwrap_or_default())
    }

    /// Replace the guest cart with `{"items": []}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend write fails.
    pub fn clear_guest_cart(&self) -> Result<(), StorageError> {
        self.save(StorageKey::GuestCart, &GuestCart::default())
    }

    /// Remember an address string, most recent first, without duplicates.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    pub fn push_recent_address(&self, address: &str) -> Result<(), StorageError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(());
        }
        self.update(StorageKey::RecentAddresses, |recent: &mut Vec<String>| {
            recent.retain(|a| !a.eq_ignore_ascii_case(address));
            recent.insert(0, address.to_owned());
            recent.truncate(RECENT_ADDRESS_LIMIT);
        })
    }

    /// Remembered address strings, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend read fails.
    pub fn recent_addresses(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.load(StorageKey::RecentAddresses)?.unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gapa_core::{Address, DeliveryMethod, PaymentMethod, ProductId, Quantity};

    use super::*;

    #[test]
    fn test_round_trip_uses_envelope() {
        let storage = Arc::new(MemoryStorage::new());
        let gateway = PersistenceGateway::new(storage.clone());
        gateway
            .save(StorageKey::DraftPaymentMethod, &PaymentMethod::Flutterwave)
            .unwrap();

        let raw = storage.get("checkout_payment_method").unwrap().unwrap();
        assert_eq!(raw, r#"{"v":1,"data":"flutterwave"}"#);
        assert_eq!(
            gateway
                .load::<PaymentMethod>(StorageKey::DraftPaymentMethod)
                .unwrap(),
            Some(PaymentMethod::Flutterwave)
        );
    }

    #[test]
    fn test_reads_legacy_unversioned_value() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set("guest_cart", r#"{"items":[{"product_id":"P1","quantity":2}]}"#)
            .unwrap();
        let gateway = PersistenceGateway::new(storage);
        let cart = gateway.guest_cart().unwrap();
        assert_eq!(cart.items.len(), 1);
    }

    #[test]
    fn test_corrupt_value_reads_as_absent() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("checkout_address", "{not json").unwrap();
        let gateway = PersistenceGateway::new(storage);
        assert!(gateway.load::<Address>(StorageKey::DraftAddress).unwrap().is_none());
    }

    #[test]
    fn test_newer_schema_is_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set("wishlist", r#"{"v":9,"data":["1"]}"#).unwrap();
        let gateway = PersistenceGateway::new(storage);
        assert!(gateway.load::<Vec<String>>(StorageKey::Wishlist).unwrap().is_none());
    }

    #[test]
    fn test_update_reads_latest_value() {
        let gateway = PersistenceGateway::in_memory();
        gateway
            .update(StorageKey::GuestCart, |cart: &mut GuestCart| {
                cart.add(ProductId::new("A"), Quantity::new(1));
            })
            .unwrap();
        gateway
            .update(StorageKey::GuestCart, |cart: &mut GuestCart| {
                cart.add(ProductId::new("B"), Quantity::new(1));
            })
            .unwrap();
        assert_eq!(gateway.guest_cart().unwrap().items.len(), 2);
    }

    #[test]
    fn test_clear_guest_cart_writes_empty_items() {
        let storage = Arc::new(MemoryStorage::new());
        let gateway = PersistenceGateway::new(storage.clone());
        gateway.clear_guest_cart().unwrap();
        let raw: Value = serde_json::from_str(&storage.get("guest_cart").unwrap().unwrap()).unwrap();
        assert_eq!(raw["data"], serde_json::json!({ "items": [] }));
    }

    #[test]
    fn test_logout_keeps_whitelisted_keys() {
        let gateway = PersistenceGateway::in_memory();
        gateway.save(StorageKey::DraftAddress, &Address::default()).unwrap();
        gateway.save(StorageKey::DraftDeliveryMethod, &DeliveryMethod::Gig).unwrap();
        gateway.push_recent_address("12 Allen Avenue").unwrap();

        gateway.clear_on_logout().unwrap();

        assert!(gateway.load::<Address>(StorageKey::DraftAddress).unwrap().is_none());
        assert_eq!(
            gateway.load::<DeliveryMethod>(StorageKey::DraftDeliveryMethod).unwrap(),
            Some(DeliveryMethod::Gig)
        );
        assert_eq!(gateway.recent_addresses().unwrap().len(), 1);
    }

    #[test]
    fn test_recent_addresses_dedupe_and_cap() {
        let gateway = PersistenceGateway::in_memory();
        for i in 0..7 {
            gateway.push_recent_address(&format!("{i} Road")).unwrap();
        }
        gateway.push_recent_address("5 road").unwrap();
        let recent = gateway.recent_addresses().unwrap();
        assert_eq!(recent.len(), RECENT_ADDRESS_LIMIT);
        assert_eq!(recent[0], "5 road");
        assert_eq!(recent.iter().filter(|a| a.eq_ignore_ascii_case("5 road")).count(), 1);
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = std::env::temp_dir().join(format!("gapa-storage-{}", std::process::id()));
        let gateway = PersistenceGateway::new(Arc::new(FileStorage::open(&dir).unwrap()));
        gateway.save(StorageKey::Wishlist, &vec!["P1".to_owned()]).unwrap();
        assert_eq!(
            gateway.load::<Vec<String>>(StorageKey::Wishlist).unwrap(),
            Some(vec!["P1".to_owned()])
        );
        gateway.remove(StorageKey::Wishlist).unwrap();
        gateway.remove(StorageKey::Wishlist).unwrap();
        assert!(gateway.load::<Vec<String>>(StorageKey::Wishlist).unwrap().is_none());
        let _ = fs::remove_dir_all(dir);
    }
}
