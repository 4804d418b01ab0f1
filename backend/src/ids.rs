//! Identifiers for users and credentials.
//!
//! An identifier is a Base-62 encoded random UUID behind a short type prefix, eg. a user:
//! ```
//! "u_8iCDGZ8pK9fAGxySBWh79A"
//! ```
//!
//! and a refresh token:
//! ```
//! "r_QCar3LwOwBPIeKonywpCpB"
//! ```
//!
//! Credential identifiers (sessions, refresh tokens, authorization codes) double as bearer
//! secrets, so they must only ever come from `Id::new`, which draws 122 random bits from a v4
//! UUID. The prefix makes it obvious in logs which kind of value leaked.

use std::collections::HashMap;
use std::convert::TryInto;

use base_62::base62;
use enum_iterator::IntoEnumIterator;
use lazy_static::lazy_static;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, IntoEnumIterator, PartialEq, Eq, Hash)]
pub enum IdType {
    AuthCode,
    Refresh,
    Session,
    User,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Id {
    pub id_type: IdType,
    id_str: String,
}

impl Id {
    pub fn new(id_type: IdType) -> Self {
        let encoded = encode_uuid(&Uuid::new_v4());
        let id_str = format!("{}_{}", id_type.as_str(), encoded);
        Self { id_type, id_str }
    }

    /// Parse the id, if we can.
    pub fn parse(id_str: &str) -> Option<Self> {
        let idx = id_str.find('_')?;
        let (prefix, suffix) = id_str.split_at(idx);
        let suffix = &suffix[1..];

        let id_type = IdType::from_prefix(prefix)?;
        decode_uuid(suffix)?;

        Some(Self {
            id_type,
            id_str: String::from(id_str),
        })
    }

    /// Parse the id and require a particular type.
    pub fn parse_as(id_str: &str, id_type: IdType) -> Option<Self> {
        Self::parse(id_str).filter(|id| id.id_type == id_type)
    }

    pub fn as_str(&self) -> &str {
        &self.id_str
    }

    pub fn into_string(self) -> String {
        self.id_str
    }
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match *self {
            IdType::AuthCode => "c",
            IdType::Refresh => "r",
            IdType::Session => "s",
            IdType::User => "u",
        }
    }

    pub fn from_prefix(prefix: &str) -> Option<IdType> {
        ID_PREFIX_TO_TYPE.get(prefix).copied()
    }
}

lazy_static! {
    static ref ID_PREFIX_TO_TYPE: HashMap<&'static str, IdType> = IdType::into_enum_iter()
        .map(|id_type| (id_type.as_str(), id_type))
        .collect();
}

/// Encode the UUID in Base-62 encoding.
pub fn encode_uuid(uuid: &Uuid) -> String {
    base62::encode(uuid.as_bytes())
}

/// Decode a UUID from a Base-62 encoded string, if we can.
pub fn decode_uuid(encoded: &str) -> Option<Uuid> {
    let decoded = base62::decode(encoded).ok()?;
    let bytes: [u8; 16] = decoded.try_into().ok()?;
    Some(Uuid::from_bytes(bytes))
}
