//! Wire messages of the gateway's `NativeCall` method.
//!
//! Hand-written `prost` messages so the crate needs no protobuf toolchain at
//! build time. Field tags match the gateway's `blockchain.proto`.

use std::fmt;
use std::str::FromStr;

/// Chain reference carried in the request envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Chain {
    Unspecified = 0,
    Bitcoin = 1,
    Ethereum = 100,
    EthereumClassic = 101,
    Polygon = 1002,
    TestnetBitcoin = 10003,
    Goerli = 10005,
    Sepolia = 10008,
}

impl Chain {
    pub const ALL: [Chain; 8] = [
        Chain::Unspecified,
        Chain::Bitcoin,
        Chain::Ethereum,
        Chain::EthereumClassic,
        Chain::Polygon,
        Chain::TestnetBitcoin,
        Chain::Goerli,
        Chain::Sepolia,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            Chain::Unspecified => "unspecified",
            Chain::Bitcoin => "bitcoin",
            Chain::Ethereum => "ethereum",
            Chain::EthereumClassic => "ethereum-classic",
            Chain::Polygon => "polygon",
            Chain::TestnetBitcoin => "testnet-bitcoin",
            Chain::Goerli => "goerli",
            Chain::Sepolia => "sepolia",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chain {
    type Err = String;

    /// Accepts the kebab-case name (`ethereum-classic`), the same name with
    /// underscores, or the numeric code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        if let Ok(code) = normalized.parse::<i32>() {
            return Chain::try_from(code).map_err(|_| format!("unknown chain code `{code}`"));
        }
        Chain::ALL
            .into_iter()
            .find(|chain| chain.name() == normalized)
            .ok_or_else(|| format!("unknown chain `{s}`"))
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NativeCallRequest {
    #[prost(enumeration = "Chain", tag = "1")]
    pub chain: i32,
    #[prost(message, repeated, tag = "2")]
    pub items: Vec<NativeCallItem>,
    #[prost(message, optional, tag = "3")]
    pub selector: Option<SelectorMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NativeCallItem {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(string, tag = "3")]
    pub method: String,
    /// JSON encoding of the positional params array.
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NativeCallReplyItem {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(bool, tag = "2")]
    pub succeed: bool,
    /// Raw JSON result when `succeed` is set.
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
    #[prost(string, tag = "4")]
    pub error_message: String,
}

// ==============================================================================
// Selector messages
// ==============================================================================

#[derive(Clone, PartialEq, prost::Message)]
pub struct SelectorMessage {
    #[prost(oneof = "selector_message::Kind", tags = "1, 2, 3, 4, 5")]
    pub kind: Option<selector_message::Kind>,
}

pub mod selector_message {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Label(super::LabelSelector),
        #[prost(message, tag = "2")]
        And(super::AndSelector),
        #[prost(message, tag = "3")]
        Or(super::OrSelector),
        #[prost(message, tag = "4")]
        Not(super::NotSelector),
        #[prost(message, tag = "5")]
        Exists(super::ExistsSelector),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LabelSelector {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub values: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AndSelector {
    #[prost(message, repeated, tag = "1")]
    pub selectors: Vec<SelectorMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct OrSelector {
    #[prost(message, repeated, tag = "1")]
    pub selectors: Vec<SelectorMessage>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NotSelector {
    #[prost(message, optional, boxed, tag = "1")]
    pub selector: Option<Box<SelectorMessage>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ExistsSelector {
    #[prost(string, tag = "1")]
    pub name: String,
}
