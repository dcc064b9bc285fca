// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::{Error, ValidationError};
use crate::messages::{
    Afi, As4PathSegment, AsPathSegment, AsPathType, Community, MpReachNlri,
    PathAttributeValue, PathOrigin, Prefix, Safi, UpdateMessage, AS_TRANS,
};
use serde::{Deserialize, Serialize};
use speaker_common::net::IpNet;
use std::net::IpAddr;

/// The COMMUNITIES attribute length is a single byte.
pub const MAX_COMMUNITIES: usize = 63;

/// A route the speaker should announce to its peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub prefix: IpNet,

    /// Next hop to announce. The local address of the connection is used
    /// when not set.
    #[serde(default)]
    pub nexthop: Option<IpAddr>,

    /// Only sent to iBGP peers.
    #[serde(default)]
    pub local_pref: u32,

    /// Sent in the order given.
    #[serde(default)]
    pub communities: Vec<Community>,
}

/// Connection specific parameters needed to turn an [`Advertisement`] into an
/// UPDATE.
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext {
    pub local_asn: u32,
    pub ibgp: bool,

    /// Whether the peer announced four-octet AS support.
    pub four_octet_asn: bool,

    /// Next hop for advertisements that do not carry their own.
    pub default_nexthop: IpAddr,
}

impl Advertisement {
    pub fn new(prefix: IpNet) -> Self {
        Self {
            prefix,
            nexthop: None,
            local_pref: 0,
            communities: Vec::new(),
        }
    }

    pub fn with_nexthop(mut self, nexthop: IpAddr) -> Self {
        self.nexthop = Some(nexthop);
        self
    }

    pub fn with_local_pref(mut self, local_pref: u32) -> Self {
        self.local_pref = local_pref;
        self
    }

    pub fn with_communities(
        mut self,
        communities: impl IntoIterator<Item = Community>,
    ) -> Self {
        self.communities = communities.into_iter().collect();
        self
    }

    /// Canonical key for this advertisement's prefix.
    pub fn key(&self) -> String {
        self.prefix.to_string()
    }

    pub fn validate(&self, ipv6_unicast: bool) -> Result<(), ValidationError> {
        if self.prefix.is_ipv6() && !ipv6_unicast {
            return Err(ValidationError::AddressFamily(self.prefix));
        }
        if let Some(nexthop) = self.nexthop {
            if nexthop.to_canonical().is_ipv4() != self.prefix.is_ipv4() {
                return Err(ValidationError::NexthopFamily {
                    prefix: self.prefix,
                    nexthop,
                });
            }
        }
        if self.communities.len() > MAX_COMMUNITIES {
            return Err(ValidationError::TooManyCommunities {
                prefix: self.prefix,
                count: self.communities.len(),
                max: MAX_COMMUNITIES,
            });
        }
        Ok(())
    }

    /// Build the UPDATE announcing this advertisement.
    pub fn update_message(
        &self,
        ctx: &UpdateContext,
    ) -> Result<UpdateMessage, Error> {
        let nexthop = self.nexthop.unwrap_or(ctx.default_nexthop).to_canonical();

        let mut update = UpdateMessage {
            path_attributes: vec![
                PathAttributeValue::Origin(PathOrigin::Incomplete).into(),
                as_path(ctx).into(),
            ],
            ..Default::default()
        };

        match (self.prefix, nexthop) {
            (IpNet::V4(_), IpAddr::V4(nh)) => {
                update
                    .path_attributes
                    .push(PathAttributeValue::NextHop(nh).into());
                update.nlri.push(Prefix::from(&self.prefix));
            }
            (IpNet::V6(_), IpAddr::V6(_)) => {
                update.path_attributes.push(
                    PathAttributeValue::MpReachNlri(MpReachNlri {
                        afi: Afi::Ipv6,
                        safi: Safi::Unicast,
                        nexthop,
                        nlri: vec![Prefix::from(&self.prefix)],
                    })
                    .into(),
                );
            }
            (IpNet::V4(_), IpAddr::V6(_)) => {
                return Err(Error::MissingNexthop("IPv4", self.prefix))
            }
            (IpNet::V6(_), IpAddr::V4(_)) => {
                return Err(Error::MissingNexthop("IPv6", self.prefix))
            }
        }

        if ctx.ibgp {
            update
                .path_attributes
                .push(PathAttributeValue::LocalPref(self.local_pref).into());
        }

        if !self.communities.is_empty() {
            update.path_attributes.push(
                PathAttributeValue::Communities(self.communities.clone())
                    .into(),
            );
        }

        Ok(update)
    }
}

/// iBGP peers get an empty path, eBGP peers a single hop of our own ASN.
fn as_path(ctx: &UpdateContext) -> PathAttributeValue {
    match (ctx.ibgp, ctx.four_octet_asn) {
        (true, true) => PathAttributeValue::As4Path(Vec::new()),
        (true, false) => PathAttributeValue::AsPath(Vec::new()),
        (false, true) => PathAttributeValue::As4Path(vec![As4PathSegment {
            typ: AsPathType::AsSequence,
            value: vec![ctx.local_asn],
        }]),
        (false, false) => PathAttributeValue::AsPath(vec![AsPathSegment {
            typ: AsPathType::AsSequence,
            value: vec![u16::try_from(ctx.local_asn).unwrap_or(AS_TRANS)],
        }]),
    }
}
