use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Thrift wire protocol spoken over the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Binary,
    Compact,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Binary => "binary",
            Protocol::Compact => "compact",
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binary" => Ok(Protocol::Binary),
            "compact" => Ok(Protocol::Compact),
            other => Err(Error::Configuration(format!(
                "invalid protocol {:?}, expected one of: binary, compact",
                other
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HBase Thrift gateway compatibility mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Compat {
    #[serde(rename = "0.90")]
    V0_90,
    #[serde(rename = "0.92")]
    V0_92,
    #[serde(rename = "0.94")]
    V0_94,
    #[serde(rename = "0.96")]
    V0_96,
    #[serde(rename = "0.98")]
    V0_98,
}

impl Compat {
    pub const ALL: [Compat; 5] = [
        Compat::V0_90,
        Compat::V0_92,
        Compat::V0_94,
        Compat::V0_96,
        Compat::V0_98,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Compat::V0_90 => "0.90",
            Compat::V0_92 => "0.92",
            Compat::V0_94 => "0.94",
            Compat::V0_96 => "0.96",
            Compat::V0_98 => "0.98",
        }
    }
}

impl FromStr for Compat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Compat::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Compat::ALL.iter().map(Compat::as_str).collect();
                Error::Configuration(format!(
                    "invalid compat {:?}, expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

impl fmt::Display for Compat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
