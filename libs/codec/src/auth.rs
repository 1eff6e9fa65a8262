use std::convert::TryInto;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use bytestring::ByteString;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

use crate::packet::AUTH;
use crate::reader::PacketReader;
use crate::writer::bytes_remaining_length;
use crate::writer::PacketWriter;
use crate::{property, DecodeError, EncodeError, Level};

#[derive(
    Debug, Clone, Copy, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum AuthReasonCode {
    Success = 0x00,
    ContinueAuthentication = 0x18,
    ReAuthenticate = 0x19,
}

/// AUTH Properties
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthProperties {
    pub authentication_method: Option<ByteString>,
    pub authentication_data: Option<Bytes>,
    pub reason_string: Option<ByteString>,
    #[serde(default)]
    pub user_properties: Vec<(ByteString, ByteString)>,
}

impl AuthProperties {
    fn bytes_length(&self) -> Result<usize, EncodeError> {
        let mut len = 0;

        len += prop_data_len!(self.authentication_method);
        len += prop_data_len!(self.authentication_data);
        len += prop_data_len!(self.reason_string);
        len += self
            .user_properties
            .iter()
            .map(|(key, value)| prop_kv_len!(key, value))
            .sum::<usize>();

        Ok(len)
    }

    fn encode(&self, data: &mut BytesMut) -> Result<(), EncodeError> {
        if let Some(value) = &self.authentication_method {
            data.put_u8(property::AUTHENTICATION_METHOD);
            data.write_string(value)?;
        }

        if let Some(value) = &self.authentication_data {
            data.put_u8(property::AUTHENTICATION_DATA);
            data.write_binary(value)?;
        }

        if let Some(value) = &self.reason_string {
            data.put_u8(property::REASON_STRING);
            data.write_string(value)?;
        }

        for (key, value) in &self.user_properties {
            data.put_u8(property::USER_PROPERTY);
            data.write_string(key)?;
            data.write_string(value)?;
        }

        Ok(())
    }

    fn decode(mut data: Bytes) -> Result<Self, DecodeError> {
        let mut properties = AuthProperties::default();

        while data.has_remaining() {
            let flag = data.read_u8()?;

            match flag {
                property::AUTHENTICATION_METHOD => {
                    properties.authentication_method = Some(data.read_string()?)
                }
                property::AUTHENTICATION_DATA => {
                    properties.authentication_data = Some(data.read_binary()?)
                }
                property::REASON_STRING => properties.reason_string = Some(data.read_string()?),
                property::USER_PROPERTY => {
                    let key = data.read_string()?;
                    let value = data.read_string()?;
                    properties.user_properties.push((key, value));
                }
                _ => return Err(DecodeError::InvalidAuthProperty(flag)),
            }
        }

        Ok(properties)
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.authentication_method.is_none()
            && self.authentication_data.is_none()
            && self.reason_string.is_none()
            && self.user_properties.is_empty()
    }
}

/// Authentication exchange, v5 enhanced authentication only.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Auth {
    pub reason_code: AuthReasonCode,

    #[serde(default)]
    pub properties: AuthProperties,
}

impl Auth {
    #[inline]
    fn variable_header_length(&self) -> Result<usize, EncodeError> {
        if !self.properties.is_empty() {
            let properties_len = self.properties.bytes_length()?;
            return Ok(1 + bytes_remaining_length(properties_len)? + properties_len);
        }

        if self.reason_code != AuthReasonCode::Success {
            return Ok(1);
        }

        Ok(0)
    }

    pub(crate) fn decode(mut data: Bytes, level: Level) -> Result<Self, DecodeError> {
        ensure!(level == Level::V5, DecodeError::MalformedPacket);

        if !data.has_remaining() {
            return Ok(Self {
                reason_code: AuthReasonCode::Success,
                properties: AuthProperties::default(),
            });
        }

        let reason_code = {
            let code = data.read_u8()?;
            code.try_into()
                .map_err(|_| DecodeError::InvalidAuthReasonCode(code))?
        };

        let properties = if data.has_remaining() {
            let properties_len = data.read_remaining_length()?;
            ensure!(
                data.remaining() >= properties_len,
                DecodeError::MalformedPacket
            );
            AuthProperties::decode(data.split_to(properties_len))?
        } else {
            AuthProperties::default()
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }

    pub(crate) fn encode(
        &self,
        data: &mut BytesMut,
        level: Level,
        max_size: usize,
    ) -> Result<(), EncodeError> {
        ensure!(level == Level::V5, EncodeError::RequireV5);
        data.put_u8(AUTH << 4);

        let size = self.variable_header_length()?;
        ensure!(size < max_size, EncodeError::PacketTooLarge);
        data.write_remaining_length(size)?;

        if !self.properties.is_empty() {
            data.put_u8(self.reason_code.into());
            data.write_remaining_length(self.properties.bytes_length()?)?;
            self.properties.encode(data)?;
        } else if self.reason_code != AuthReasonCode::Success {
            data.put_u8(self.reason_code.into());
        }

        Ok(())
    }
}
