use std::{
    borrow::Cow,
    fmt,
};

use serde::{
    Deserialize,
    Serialize,
};

/// Logical partition of upstream full nodes, used for tiering and resource
/// isolation.
///
/// Groups are opaque names. The well known groups below are registered by the
/// per-space providers, any other group is registered lazily on first use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Group(Cow<'static, str>);

impl Group {
    /// Core space HTTP nodes.
    pub const CFX_HTTP: Group = Group::from_static("cfxhttp");
    /// Core space websocket nodes.
    pub const CFX_WS: Group = Group::from_static("cfxws");
    /// Core space nodes dedicated to log queries.
    pub const CFX_LOGS: Group = Group::from_static("cfxlogs");
    /// Core space archive nodes.
    pub const CFX_ARCHIVES: Group = Group::from_static("cfxarchives");
    /// EVM space HTTP nodes.
    pub const ETH_HTTP: Group = Group::from_static("ethhttp");
    /// EVM space websocket nodes.
    pub const ETH_WS: Group = Group::from_static("ethws");
    /// EVM space nodes dedicated to log queries.
    pub const ETH_LOGS: Group = Group::from_static("ethlogs");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Group {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

static NATIVE_GROUPS: [Group; 4] = [
    Group::CFX_HTTP,
    Group::CFX_WS,
    Group::CFX_LOGS,
    Group::CFX_ARCHIVES,
];

static EVM_GROUPS: [Group; 3] = [Group::ETH_HTTP, Group::ETH_WS, Group::ETH_LOGS];

/// One of the blockchain protocol surfaces served by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Space {
    /// Native (core) chain space.
    Native,
    /// EVM compatible space.
    Evm,
}

impl Space {
    pub fn as_str(&self) -> &'static str {
        match self {
            Space::Native => "cfx",
            Space::Evm => "eth",
        }
    }

    /// Groups registered eagerly by the provider of this space.
    pub fn groups(&self) -> &'static [Group] {
        match self {
            Space::Native => &NATIVE_GROUPS,
            Space::Evm => &EVM_GROUPS,
        }
    }

    /// Group serving plain HTTP traffic for this space.
    pub fn default_group(&self) -> Group {
        match self {
            Space::Native => Group::CFX_HTTP,
            Space::Evm => Group::ETH_HTTP,
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
