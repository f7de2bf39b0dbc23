//! Identifiers for processes, connections and rooms

use std::borrow::Borrow;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

const HEX_CHARS: &[u8] = b"0123456789abcdef";
const SERVER_ID_LEN: usize = 32;
const CONNECTION_ID_LEN: usize = 16;
const CONNECTION_ID_PREFIX: &str = "conn_";

/// Application-supplied number identifying a client inside its room.
pub type ClientTag = i64;

fn random_hex(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| HEX_CHARS[rng.random_range(0..HEX_CHARS.len())] as char)
        .collect()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Server identity: 32 random hex chars, fixed for the life of the process.
    ///
    /// Used as the broker routing key of this process and stamped as the
    /// owner on every connection snapshot it writes.
    ServerId
);

string_id!(
    /// Connection ID ("conn_" + 16 hex), assigned by the transport on accept
    ConnectionId
);

string_id!(
    /// Room code chosen by the clients
    RoomId
);

impl ServerId {
    pub fn generate() -> Self {
        Self(random_hex(SERVER_ID_LEN))
    }
}

impl ConnectionId {
    pub fn generate() -> Self {
        Self(format!("{}{}", CONNECTION_ID_PREFIX, random_hex(CONNECTION_ID_LEN)))
    }

    /// Whether `s` lies in the connection id namespace. Room codes never do,
    /// so a bus destination is unambiguous.
    pub fn is_connection_id(s: &str) -> bool {
        s.starts_with(CONNECTION_ID_PREFIX)
    }
}
