//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements [`ConfigPort`], [`CalibrationStore`] and [`StoragePort`].
//!
//! # Layout
//!
//! - `hr20::cfg`: one layout byte ([`LAYOUT_VERSION`]) followed by the
//!   postcard-encoded [`ThermostatConfig`].  A missing blob loads the
//!   defaults; a foreign layout byte is reported as
//!   [`ConfigError::LayoutMismatch`] and never overwritten silently.
//! - `hr20::motcal`: the motor calibration hint as a little-endian `i16`
//!   (-1 auto, 0 measure, n stored travel).
//!
//! Loaded configs are sanitized field by field rather than rejected.
//! ESP-IDF NVS commits are atomic per `nvs_commit()`; the host backend is
//! an in-memory map.

use crate::app::ports::{CalibrationStore, ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::{LAYOUT_VERSION, ThermostatConfig};
use crate::motor::ManualCalibration;
use log::{info, warn};

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

const NAMESPACE: &str = "hr20";
const CONFIG_KEY: &str = "cfg";
const CALIBRATION_KEY: &str = "motcal";

/// Upper bound for the encoded config blob.
const MAX_BLOB_SIZE: usize = 256;

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Initialise NVS flash.
    ///
    /// On a full partition or a newer NVS format the partition is erased
    /// and re-initialised; anything else is `ConfigError::IoError`.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS | erasing and re-initialising flash partition");
                if unsafe { nvs_flash_erase() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                if unsafe { nvs_flash_init() } != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NVS | flash initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NVS | simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn composite_key(namespace: &str, key: &str) -> String {
        format!("{}::{}", namespace, key)
    }

    /// NUL-terminated copy of an NVS name (15 chars max).
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Open a namespace, run `f` with the handle, close it again.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(namespace: &str, write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = Self::c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        // SAFETY: `ns` is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        // SAFETY: handle opened above.
        unsafe {
            nvs_close(handle);
        }
        result
    }

    /// Layout byte + postcard body.
    fn encode_config(config: &ThermostatConfig) -> Result<Vec<u8>, ConfigError> {
        let mut blob = Vec::with_capacity(MAX_BLOB_SIZE);
        blob.push(LAYOUT_VERSION);
        let body = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;
        blob.extend_from_slice(&body);
        if blob.len() > MAX_BLOB_SIZE {
            return Err(ConfigError::StorageFull);
        }
        Ok(blob)
    }

    fn decode_config(blob: &[u8]) -> Result<ThermostatConfig, ConfigError> {
        let (&stored, body) = blob.split_first().ok_or(ConfigError::Corrupted)?;
        if stored != LAYOUT_VERSION {
            return Err(ConfigError::LayoutMismatch {
                stored,
                expected: LAYOUT_VERSION,
            });
        }
        let mut cfg: ThermostatConfig = postcard::from_bytes(body).map_err(|_| ConfigError::Corrupted)?;
        let fixed = cfg.sanitize();
        if fixed > 0 {
            warn!("NVS | {} config field(s) out of range, defaults restored", fixed);
        }
        Ok(cfg)
    }
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<ThermostatConfig, ConfigError> {
        let mut buf = [0u8; MAX_BLOB_SIZE];
        match self.read(NAMESPACE, CONFIG_KEY, &mut buf) {
            Ok(len) => {
                let cfg = Self::decode_config(&buf[..len])?;
                info!("NVS | loaded config ({} bytes)", len);
                Ok(cfg)
            }
            Err(StorageError::NotFound) => {
                info!("NVS | no stored config, using defaults");
                Ok(ThermostatConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, config: &ThermostatConfig) -> Result<(), ConfigError> {
        let blob = Self::encode_config(config)?;

        #[cfg(not(target_os = "espidf"))]
        {
            self.store
                .borrow_mut()
                .insert(Self::composite_key(NAMESPACE, CONFIG_KEY), blob.clone());
        }

        #[cfg(target_os = "espidf")]
        {
            let key = Self::c_name(CONFIG_KEY);
            Self::with_nvs_handle(NAMESPACE, true, |handle| {
                // SAFETY: key and blob outlive the calls.
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key.as_ptr() as *const _,
                        blob.as_ptr() as *const _,
                        blob.len(),
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            })
            .map_err(|e| {
                warn!("NVS | config write error {}", e);
                ConfigError::IoError
            })?;
        }

        info!("NVS | config saved ({} bytes)", blob.len());
        Ok(())
    }
}

impl CalibrationStore for NvsAdapter {
    fn load_calibration(&self) -> ManualCalibration {
        let mut buf = [0u8; 2];
        match self.read(NAMESPACE, CALIBRATION_KEY, &mut buf) {
            Ok(2) => ManualCalibration::from_raw(i16::from_le_bytes(buf)),
            _ => ManualCalibration::default(),
        }
    }

    fn save_calibration(&mut self, cal: ManualCalibration) -> Result<(), StorageError> {
        self.write(NAMESPACE, CALIBRATION_KEY, &cal.as_raw().to_le_bytes())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            match self.store.borrow().get(&composite) {
                Some(data) if data.len() > buf.len() => Err(StorageError::BufferTooSmall),
                Some(data) => {
                    buf[..data.len()].copy_from_slice(data);
                    Ok(data.len())
                }
                None => Err(StorageError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let key_buf = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                let mut size = buf.len();
                // SAFETY: `size` is the capacity of `buf`.
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key_buf.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(size)
            });
            match result {
                Ok(size) => Ok(size),
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(StorageError::NotFound),
                Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH => Err(StorageError::BufferTooSmall),
                Err(_) => Err(StorageError::IoError),
            }
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().insert(composite, data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key_buf = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                // SAFETY: key and data outlive the calls.
                let ret = unsafe {
                    nvs_set_blob(
                        handle,
                        key_buf.as_ptr() as *const _,
                        data.as_ptr() as *const _,
                        data.len(),
                    )
                };
                if ret == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    return Err(ret);
                }
                if ret != ESP_OK {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow_mut().remove(&composite);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let key_buf = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, true, |handle| {
                // SAFETY: key outlives the call.
                let ret = unsafe { nvs_erase_key(handle, key_buf.as_ptr() as *const _) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                let ret = unsafe { nvs_commit(handle) };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(())
            });
            result.map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            let composite = Self::composite_key(namespace, key);
            self.store.borrow().contains_key(&composite)
        }

        #[cfg(target_os = "espidf")]
        {
            let key_buf = Self::c_name(key);
            let result = Self::with_nvs_handle(namespace, false, |handle| {
                // SAFETY: key outlives the call.
                let ret = unsafe { nvs_find_key(handle, key_buf.as_ptr() as *const _, core::ptr::null_mut()) };
                Ok(ret == ESP_OK)
            });
            result.unwrap_or(false)
        }
    }
}
