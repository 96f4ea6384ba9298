use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(format!("Unknown platform: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushEnvironment {
    Sandbox,
    #[default]
    Production,
}

impl std::str::FromStr for PushEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sandbox" | "development" => Ok(PushEnvironment::Sandbox),
            "production" => Ok(PushEnvironment::Production),
            other => Err(format!("Unknown push environment: {}", other)),
        }
    }
}

/// A registered push target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub owner_id: String,
    pub device_id: String,
    pub token: String,
    pub token_hash: String,
    pub platform: Platform,
    #[serde(default)]
    pub environment: PushEnvironment,
    pub bundle_id: Option<String>,
    pub app_version: Option<String>,
    pub build_number: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration request as received from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub owner_id: String,
    pub device_id: String,
    pub token: String,
    pub platform: Platform,
    #[serde(default)]
    pub environment: PushEnvironment,
    pub bundle_id: Option<String>,
    pub app_version: Option<String>,
    pub build_number: Option<String>,
}

/// Secondary index entry: token hash -> owning device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRef {
    pub owner_id: String,
    pub device_id: String,
}
