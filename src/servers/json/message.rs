use serde_derive::{Deserialize, Serialize};

use crate::accessory::{
    AccessoryStatus, CharacteristicKind, CharacteristicUpdate, ServiceKind, Value,
};

/// Incoming request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase", tag = "command")]
pub enum ControlMessage {
    /// Names of the running accessories
    List,
    Get {
        accessory: String,
        service: ServiceKind,
        characteristic: CharacteristicKind,
    },
    Set {
        accessory: String,
        service: ServiceKind,
        characteristic: CharacteristicKind,
        value: Value,
    },
    /// Status of one accessory, or all of them
    Status {
        #[serde(default)]
        accessory: Option<String>,
    },
    /// Receive value-changed notifications on this connection
    Subscribe,
}

/// Outgoing line
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlResponse {
    SuccessResponse {
        success: bool,
    },
    ErrorResponse {
        success: bool,
        error: String,
    },
    ListResponse {
        success: bool,
        accessories: Vec<String>,
    },
    ValueResponse {
        success: bool,
        value: Value,
    },
    StatusResponse {
        success: bool,
        accessories: Vec<AccessoryStatus>,
    },
    Update {
        update: CharacteristicUpdate,
    },
}

impl ControlResponse {
    pub fn success() -> Self {
        Self::SuccessResponse { success: true }
    }

    pub fn error(error: &impl std::fmt::Display) -> Self {
        Self::ErrorResponse {
            success: false,
            error: error.to_string(),
        }
    }

    pub fn list(accessories: Vec<String>) -> Self {
        Self::ListResponse {
            success: true,
            accessories,
        }
    }

    pub fn value(value: Value) -> Self {
        Self::ValueResponse {
            success: true,
            value,
        }
    }

    pub fn status(accessories: Vec<AccessoryStatus>) -> Self {
        Self::StatusResponse {
            success: true,
            accessories,
        }
    }
}
