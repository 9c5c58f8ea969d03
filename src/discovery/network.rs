//! Subnet and network classification
//!
//! Routing is the only signal that decides what a subnet is. Stacks in
//! the wild tag isolated subnets "private" or "intra", so names are
//! never consulted: a subnet with a NAT default route is private
//! routable, one with an internet gateway default route is public, and
//! everything else is isolated no matter what it is called.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::provider::types::{RawRouteTable, RouteTarget, VpcNetwork};

/// A classified subnet. The two route flags are stored; the kind is
/// always derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetDescriptor {
    pub subnet_id: String,
    pub availability_zone: String,
    pub cidr_block: String,
    pub has_default_route_to_nat: bool,
    pub has_default_route_to_internet_gateway: bool,
}

impl SubnetDescriptor {
    /// Classification: an internet gateway route dominates a NAT route,
    /// and a subnet with neither is isolated.
    pub fn kind(&self) -> SubnetKind {
        if self.has_default_route_to_internet_gateway {
            SubnetKind::Public
        } else if self.has_default_route_to_nat {
            SubnetKind::PrivateRoutable
        } else {
            SubnetKind::Isolated
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetKind {
    Public,
    PrivateRoutable,
    Isolated,
}

impl fmt::Display for SubnetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetKind::Public => write!(f, "public"),
            SubnetKind::PrivateRoutable => write!(f, "private routable"),
            SubnetKind::Isolated => write!(f, "isolated"),
        }
    }
}

/// Why a subnet was not usable for deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRejection {
    pub subnet_id: String,
    pub reason: String,
}

/// A VPC with its classified subnets and the usability verdict.
/// An invalid network is a normal discovery outcome, not an error; the
/// merge step treats it like no network at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub vpc_id: String,
    pub cidr_block: Option<String>,
    pub subnets: Vec<SubnetDescriptor>,
    pub valid: bool,
    pub rejections: Vec<SubnetRejection>,
}

impl NetworkDescriptor {
    /// Subnets usable for deployment.
    pub fn private_routable(&self) -> Vec<&SubnetDescriptor> {
        self.subnets
            .iter()
            .filter(|s| s.kind() == SubnetKind::PrivateRoutable)
            .collect()
    }
}

/// Classify every subnet of a VPC and decide usability.
///
/// Usability requires at least two private routable subnets spanning at
/// least two availability zones. Every subnet that does not count
/// toward that bar appears in the rejection list with its reason.
pub fn classify(vpc: &VpcNetwork) -> NetworkDescriptor {
    let mut subnets = Vec::with_capacity(vpc.subnets.len());
    for raw in &vpc.subnets {
        let (has_nat, has_igw) = default_route_flags(&raw.subnet_id, &vpc.route_tables);
        subnets.push(SubnetDescriptor {
            subnet_id: raw.subnet_id.clone(),
            availability_zone: raw.availability_zone.clone(),
            cidr_block: raw.cidr_block.clone(),
            has_default_route_to_nat: has_nat,
            has_default_route_to_internet_gateway: has_igw,
        });
    }

    let mut rejections = Vec::new();
    for subnet in &subnets {
        match subnet.kind() {
            SubnetKind::PrivateRoutable => {}
            SubnetKind::Public => rejections.push(SubnetRejection {
                subnet_id: subnet.subnet_id.clone(),
                reason: "default route to internet gateway (public subnet)".to_string(),
            }),
            SubnetKind::Isolated => rejections.push(SubnetRejection {
                subnet_id: subnet.subnet_id.clone(),
                reason: "no NAT default route".to_string(),
            }),
        }
    }

    let private: Vec<&SubnetDescriptor> = subnets
        .iter()
        .filter(|s| s.kind() == SubnetKind::PrivateRoutable)
        .collect();
    let zones: BTreeSet<&str> = private
        .iter()
        .map(|s| s.availability_zone.as_str())
        .collect();

    let valid = if subnets.is_empty() {
        rejections.push(SubnetRejection {
            subnet_id: "(none)".to_string(),
            reason: "no subnets discovered in vpc".to_string(),
        });
        false
    } else if private.len() < 2 {
        for subnet in &private {
            rejections.push(SubnetRejection {
                subnet_id: subnet.subnet_id.clone(),
                reason: "fewer than two private routable subnets available".to_string(),
            });
        }
        false
    } else if zones.len() < 2 {
        for subnet in &private {
            rejections.push(SubnetRejection {
                subnet_id: subnet.subnet_id.clone(),
                reason: "only one availability zone represented".to_string(),
            });
        }
        false
    } else {
        true
    };

    NetworkDescriptor {
        vpc_id: vpc.vpc_id.clone(),
        cidr_block: vpc.cidr_block.clone(),
        subnets,
        valid,
        rejections,
    }
}

/// Union the default-route flags over every route table that applies to
/// a subnet. Explicit associations win; a subnet with none falls back
/// to the VPC main table. Taking the union means the most permissive
/// route decides when tables disagree.
fn default_route_flags(subnet_id: &str, tables: &[RawRouteTable]) -> (bool, bool) {
    let explicit: Vec<&RawRouteTable> = tables
        .iter()
        .filter(|t| t.associated_subnet_ids.iter().any(|id| id == subnet_id))
        .collect();
    let applicable: Vec<&RawRouteTable> = if explicit.is_empty() {
        tables.iter().filter(|t| t.is_main).collect()
    } else {
        explicit
    };

    let mut has_nat = false;
    let mut has_igw = false;
    for table in applicable {
        for route in table.routes.iter().filter(|r| r.is_default()) {
            match &route.target {
                RouteTarget::InternetGateway { .. } => has_igw = true,
                RouteTarget::NatGateway { .. } => has_nat = true,
                _ => {}
            }
        }
    }
    (has_nat, has_igw)
}
