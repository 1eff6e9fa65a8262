use codec::{DisconnectProperties, DisconnectReasonCode, EncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("take over")]
    SessionTakenOver,

    #[error("server disconnect: {reason_code:?}")]
    ServerDisconnect {
        reason_code: DisconnectReasonCode,
        properties: DisconnectProperties,
    },

    #[error("client disconnect: {reason_code:?}")]
    ClientDisconnect {
        reason_code: DisconnectReasonCode,
        properties: DisconnectProperties,
    },

    #[error("encode packet: {0}")]
    EncodePacket(#[from] EncodeError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn server_disconnect(reason_code: DisconnectReasonCode) -> Self {
        Self::ServerDisconnect {
            reason_code,
            properties: DisconnectProperties::default(),
        }
    }

    pub fn server_disconnect_with_properties(
        reason_code: DisconnectReasonCode,
        properties: DisconnectProperties,
    ) -> Self {
        Self::ServerDisconnect {
            reason_code,
            properties,
        }
    }

    pub fn client_disconnect(
        reason_code: DisconnectReasonCode,
        properties: DisconnectProperties,
    ) -> Self {
        Self::ClientDisconnect {
            reason_code,
            properties,
        }
    }
}
