use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use reelid_core::domain::UserId;

/// App build the client impersonates. Not persisted: a restored session always picks up the
/// values compiled into this crate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConstants {
    pub app_version: String,
    pub app_version_code: String,
    pub bloks_version_id: String,
    pub app_id: String,
}

impl Default for AppConstants {
    fn default() -> Self {
        Self {
            app_version: "222.0.0.13.114".to_string(),
            app_version_code: "350696709".to_string(),
            bloks_version_id: "8ca96ca267e30c02cf90888d91eeff09627f0e3fd2bd9df472278c9a6c022cbb"
                .to_string(),
            app_id: "567067343352427".to_string(),
        }
    }
}

/// Stable per-account device fingerprint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub device_string: String,
    pub device_id: String,
    pub uuid: String,
    pub phone_id: String,
    pub adid: String,
}

const DEVICES: &[&str] = &[
    "26/8.0.0; 480dpi; 1080x1920; samsung; SM-G930F; herolte; samsungexynos8890",
    "28/9; 420dpi; 1080x2131; samsung; SM-G960F; starlte; samsungexynos9810",
    "29/10; 440dpi; 1080x2134; OnePlus; GM1913; OnePlus7Pro; qcom",
    "29/10; 420dpi; 1080x2220; Google/google; Pixel 4; flame; flame",
];

impl DeviceIdentity {
    /// Same seed, same device: the platform flags accounts whose device changes every login.
    pub fn from_seed(seed: &str) -> Self {
        let digest = |salt: &str| -> [u8; 32] {
            let mut h = Sha256::new();
            h.update(salt.as_bytes());
            h.update(seed.as_bytes());
            let mut out = [0u8; 32];
            out.copy_from_slice(&h.finalize());
            out
        };

        let device = digest("device");
        Self {
            device_string: DEVICES[device[0] as usize % DEVICES.len()].to_string(),
            device_id: format!("android-{}", &hex(&device)[..16]),
            uuid: uuid_from(&digest("uuid")),
            phone_id: uuid_from(&digest("phone")),
            adid: uuid_from(&digest("adid")),
        }
    }
}

/// Everything needed to resume a logged-in session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default)]
    pub device: DeviceIdentity,
    /// `Bearer IGT:2:...` value handed out in the `ig-set-authorization` header.
    #[serde(default)]
    pub authorization: Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Machine id (`x-mid`).
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub constants: AppConstants,
}

impl ClientState {
    pub fn user_agent(&self) -> String {
        format!(
            "Instagram {} Android ({}; en_US; {})",
            self.constants.app_version, self.device.device_string, self.constants.app_version_code
        )
    }

    pub fn is_logged_in(&self) -> bool {
        self.authorization.is_some() && self.user_id.is_some()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn uuid_from(bytes: &[u8; 32]) -> String {
    let h = hex(&bytes[..16]);
    format!(
        "{}-{}-{}-{}-{}",
        &h[0..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_is_deterministic_per_seed() {
        let a = DeviceIdentity::from_seed("moviebot");
        let b = DeviceIdentity::from_seed("moviebot");
        let c = DeviceIdentity::from_seed("otherbot");
        assert_eq!(a, b);
        assert_ne!(a.device_id, c.device_id);
        assert!(a.device_id.starts_with("android-"));
        assert_eq!(a.device_id.len(), "android-".len() + 16);
        assert_eq!(a.uuid.len(), 36);
        assert_eq!(a.uuid.matches('-').count(), 4);
        assert_ne!(a.uuid, a.phone_id);
    }

    #[test]
    fn state_without_constants_uses_builtin_values() {
        let v = json!({
            "device": DeviceIdentity::from_seed("x"),
            "authorization": "Bearer IGT:2:abc",
            "user_id": 123
        });
        let state: ClientState = serde_json::from_value(v).unwrap();
        assert_eq!(state.constants, AppConstants::default());
        assert_eq!(state.user_id, Some(UserId(123)));
        assert!(state.is_logged_in());
    }

    #[test]
    fn user_agent_mentions_version_and_device() {
        let state = ClientState {
            device: DeviceIdentity::from_seed("x"),
            ..ClientState::default()
        };
        let ua = state.user_agent();
        assert!(ua.starts_with("Instagram 222.0.0.13.114 Android ("));
        assert!(ua.contains(&state.device.device_string));
    }
}
