use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JausBridgeError;

/// A JAUS component identity: subsystem, node and component number.
///
/// The string form is dotted decimal, eg `127.255.255` for the subsystem
/// broadcast address. The all-zero address is reserved for connection
/// management traffic and never names an application component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JausAddress {
    pub subsystem: u8,
    pub node: u8,
    pub component: u8,
}

impl JausAddress {
    pub fn new(subsystem: u8, node: u8, component: u8) -> Self {
        Self {
            subsystem,
            node,
            component,
        }
    }

    /// Parse a `subsystem.node.component` string.
    pub fn from_string(value: &str) -> Result<Self, JausBridgeError> {
        value.parse()
    }

    /// True for the reserved all-zero address
    pub fn is_zero(&self) -> bool {
        self.subsystem == 0 && self.node == 0 && self.component == 0
    }

    /// The 32 bit on-wire form, subsystem in the third byte, node in the
    /// second, component in the first.
    pub fn as_raw(&self) -> u32 {
        (self.subsystem as u32) << 16 | (self.node as u32) << 8 | self.component as u32
    }

    pub fn from_raw(raw: u32) -> Self {
        Self {
            subsystem: ((raw >> 16) & 0xff) as u8,
            node: ((raw >> 8) & 0xff) as u8,
            component: (raw & 0xff) as u8,
        }
    }
}

impl FromStr for JausAddress {
    type Err = JausBridgeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = value.split('.').collect();
        if fields.len() != 3 {
            return Err(JausBridgeError::MalformedAddress(value.to_string()));
        }
        let mut parsed: [u8; 3] = [0; 3];
        for (index, field) in fields.iter().enumerate() {
            parsed[index] = field
                .parse::<u8>()
                .map_err(|_| JausBridgeError::MalformedAddress(value.to_string()))?;
        }
        Ok(Self {
            subsystem: parsed[0],
            node: parsed[1],
            component: parsed[2],
        })
    }
}

impl Display for JausAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.subsystem, self.node, self.component)
    }
}
