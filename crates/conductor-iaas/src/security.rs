//! Security groups and IP mappings

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IaasError, IaasResult};

/// Transport protocol of a rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    /// Get the string representation of the protocol.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }

    /// Parse protocol from string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            _ => None,
        }
    }
}

/// Ingress rule of a security group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityGroupRule {
    /// Protocol
    pub protocol: Protocol,

    /// First port of the range
    pub from_port: u16,

    /// Last port of the range
    pub to_port: u16,

    /// Network address
    pub ip_range: Ipv4Addr,

    /// Prefix length
    pub netmask: u8,
}

impl SecurityGroupRule {
    /// Creates a validated rule.
    ///
    /// # Errors
    ///
    /// `Validation` when a port is 0, the range is reversed or the netmask
    /// is greater than 32
    pub fn new(
        protocol: Protocol,
        from_port: u16,
        to_port: u16,
        ip_range: Ipv4Addr,
        netmask: u8,
    ) -> IaasResult<Self> {
        if from_port == 0 || to_port == 0 {
            return Err(IaasError::Validation(
                "Ensure this value is greater than or equal to 1.".to_string(),
            ));
        }
        if from_port > to_port {
            return Err(IaasError::Validation(
                "from_port has to be less than or equal to to_port".to_string(),
            ));
        }
        Ipv4Network::new(ip_range, netmask)
            .map_err(|e| IaasError::Validation(format!("Invalid netmask: {}", e)))?;
        Ok(Self {
            protocol,
            from_port,
            to_port,
            ip_range,
            netmask,
        })
    }

    /// Rule for a CIDR string such as `10.0.0.0/8`.
    pub fn from_cidr(protocol: Protocol, from_port: u16, to_port: u16, cidr: &str) -> IaasResult<Self> {
        let network: Ipv4Network = cidr
            .parse()
            .map_err(|_| IaasError::Validation(format!("Enter a valid IPv4 network: {}", cidr)))?;
        Self::new(protocol, from_port, to_port, network.ip(), network.prefix())
    }

    /// The covered network, `None` for an out-of-range netmask.
    pub fn network(&self) -> Option<Ipv4Network> {
        Ipv4Network::new(self.ip_range, self.netmask).ok()
    }

    /// Whether traffic from `source` to `port` is let through.
    pub fn allows(&self, protocol: Protocol, port: u16, source: Ipv4Addr) -> bool {
        self.protocol == protocol
            && (self.from_port..=self.to_port).contains(&port)
            && self.network().is_some_and(|n| n.contains(source))
    }
}

impl fmt::Display for SecurityGroupRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} ({} -> {})",
            self.protocol.as_str(),
            self.ip_range,
            self.netmask,
            self.from_port,
            self.to_port
        )
    }
}

/// Security group of a cloud-project membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// Unique group ID
    #[serde(rename = "uuid")]
    pub id: Uuid,

    /// Owning membership
    pub membership_id: Uuid,

    /// Name
    pub name: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Ingress rules
    #[serde(default)]
    pub rules: Vec<SecurityGroupRule>,
}

impl SecurityGroup {
    /// Creates an empty group.
    pub fn new(membership_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            membership_id,
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a rule.
    pub fn with_rule(mut self, rule: SecurityGroupRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The group every new membership gets: HTTP from anywhere.
    pub fn http(membership_id: Uuid) -> Self {
        Self::new(membership_id, "http")
            .with_description("Security group for web servers")
            .with_rule(SecurityGroupRule {
                protocol: Protocol::Tcp,
                from_port: 80,
                to_port: 80,
                ip_range: Ipv4Addr::UNSPECIFIED,
                netmask: 0,
            })
    }

    /// Whether any rule lets the traffic through.
    pub fn allows(&self, protocol: Protocol, port: u16, source: Ipv4Addr) -> bool {
        self.rules.iter().any(|r| r.allows(protocol, port, source))
    }
}

/// Public to private address mapping of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpMapping {
    /// Unique mapping ID
    #[serde(rename = "uuid")]
    pub id: Uuid,

    /// Owning project
    pub project_id: Uuid,

    /// Public address
    pub public_ip: IpAddr,

    /// Private address
    pub private_ip: IpAddr,
}

impl IpMapping {
    /// Creates a mapping.
    pub fn new(project_id: Uuid, public_ip: IpAddr, private_ip: IpAddr) -> Self {
        Self {
            id: Uuid::now_v7(),
            project_id,
            public_ip,
            private_ip,
        }
    }
}
