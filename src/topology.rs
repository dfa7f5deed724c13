//! Cluster topology view.
//!
//! The session's host metadata is mapped host by host into an application
//! representation. The default representation is [`RingMember`].

use crate::error::BoxError;
use crate::session::HostDescriptor;
use serde::Serialize;
use std::net::SocketAddr;

/// One node of the token ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RingMember {
    /// Native transport address
    pub address: SocketAddr,
    /// Host name, or the IP address if no name is known
    pub host_name: String,
    /// Data center
    pub datacenter: String,
    /// Rack
    pub rack: String,
    /// Tokens owned by the node
    pub tokens: Vec<String>,
}

impl From<&HostDescriptor> for RingMember {
    fn from(host: &HostDescriptor) -> Self {
        Self {
            address: host.address,
            host_name: host
                .host_name
                .clone()
                .unwrap_or_else(|| host.address.ip().to_string()),
            datacenter: host.datacenter.clone(),
            rack: host.rack.clone(),
            tokens: host.tokens.clone(),
        }
    }
}

/// Maps a host descriptor to an application value.
pub trait HostMapper<T>: Send + Sync {
    fn map_host(&self, host: &HostDescriptor) -> Result<T, BoxError>;
}

impl<T, F> HostMapper<T> for F
where
    F: Fn(&HostDescriptor) -> Result<T, BoxError> + Send + Sync,
{
    fn map_host(&self, host: &HostDescriptor) -> Result<T, BoxError> {
        self(host)
    }
}

/// Default mapper producing [`RingMember`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingMemberHostMapper;

impl HostMapper<RingMember> for RingMemberHostMapper {
    fn map_host(&self, host: &HostDescriptor) -> Result<RingMember, BoxError> {
        Ok(RingMember::from(host))
    }
}
