//! Frame authenticator: HMAC-SHA256 truncated to four bytes.
//!
//! Keyed by the configured 8-byte security key.  Not wire compatible
//! with the XTEA-CMAC masters; both ends of a link must run this adapter.

use crate::app::ports::FrameAuthenticator;
use crate::config::ThermostatConfig;

#[derive(Clone)]
pub struct HmacFrameMac {
    key: [u8; 8],
}

impl HmacFrameMac {
    pub fn new(key: [u8; 8]) -> Self {
        Self { key }
    }
}

impl From<&ThermostatConfig> for HmacFrameMac {
    fn from(cfg: &ThermostatConfig) -> Self {
        Self::new(cfg.security_key)
    }
}

// Key material stays out of logs.
impl core::fmt::Debug for HmacFrameMac {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HmacFrameMac").finish_non_exhaustive()
    }
}

impl FrameAuthenticator for HmacFrameMac {
    fn tag(&self, data: &[u8]) -> [u8; 4] {
        let full = hmac_sha256::HMAC::mac(data, self.key);
        [full[0], full[1], full[2], full[3]]
    }
}
