//! Server capability descriptor
//!
//! Reported in response to `GetServerCapabilities` so a client can warn
//! about version skew. This is a value query, not a negotiation.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use super::wire::{byte_enum, WireReader, WireRecord, WireWriter};
use crate::error::Result;

byte_enum! {
    /// Features a server may advertise
    pub enum ServerCapability ("server capability") {
        /// Framing, pings and the original command catalog
        Base = 0,
        /// Responses may arrive wrapped in a compressed envelope
        CompressedResponses = 1,
        /// Timeouts and cancellations kill and report the whole process tree
        ProcessTreeTermination = 2,
        /// Zero-length frames are answered with a zero-length frame
        Ping = 3,
    }
}

byte_enum! {
    /// Host operating system family
    pub enum ServerPlatform ("server platform") {
        Windows = 0,
        Linux = 1,
    }
}

impl ServerPlatform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        if cfg!(windows) {
            ServerPlatform::Windows
        } else {
            ServerPlatform::Linux
        }
    }
}

/// Version, platform and feature set of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityInfo {
    pub version: String,
    pub platform: ServerPlatform,
    pub capabilities: BTreeSet<ServerCapability>,
}

impl CapabilityInfo {
    /// The capability set a current server advertises
    pub fn latest_capabilities() -> BTreeSet<ServerCapability> {
        [
            ServerCapability::Base,
            ServerCapability::CompressedResponses,
            ServerCapability::ProcessTreeTermination,
            ServerCapability::Ping,
        ]
        .into_iter()
        .collect()
    }

    pub fn new(
        version: impl Into<String>,
        platform: ServerPlatform,
        capabilities: BTreeSet<ServerCapability>,
    ) -> Self {
        Self {
            version: version.into(),
            platform,
            capabilities,
        }
    }

    /// Descriptor for this build, computed once at server startup
    pub fn current() -> Self {
        Self::new(
            crate::VERSION,
            ServerPlatform::current(),
            Self::latest_capabilities(),
        )
    }

    /// True when the set matches the latest capability set exactly
    pub fn is_up_to_date(&self) -> bool {
        self.capabilities == Self::latest_capabilities()
    }
}

impl fmt::Display for CapabilityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let caps: Vec<String> = self.capabilities.iter().map(|c| format!("{:?}", c)).collect();
        writeln!(f, "Version = {}", self.version)?;
        writeln!(f, "Platform = {:?}", self.platform)?;
        write!(f, "Capabilities = {}", caps.join(", "))
    }
}

impl WireRecord for CapabilityInfo {
    fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.write_string(&self.version)?;
        writer.write_u8(self.platform.as_byte());
        writer.write_len(self.capabilities.len())?;
        for capability in &self.capabilities {
            writer.write_u8(capability.as_byte());
        }
        Ok(())
    }

    fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
        let version = reader.read_string()?;
        let platform = ServerPlatform::from_byte(reader.read_u8()?)?;
        let count = reader.read_varint()?;
        let mut capabilities = BTreeSet::new();
        for _ in 0..count {
            capabilities.insert(ServerCapability::from_byte(reader.read_u8()?)?);
        }
        Ok(Self {
            version,
            platform,
            capabilities,
        })
    }
}
