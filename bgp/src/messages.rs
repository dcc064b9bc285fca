// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::Error;
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u32, u8 as parse_u8},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use speaker_common::net::{IpNet, Ipv4Net, Ipv6Net};
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub const MAX_MESSAGE_SIZE: usize = 4096;

/// BGP Message types.
///
/// Ref: RFC 4271 §4.1
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum MessageType {
    /// The first message sent by each side once a TCP connection is
    /// established.
    ///
    /// RFC 4271 §4.2
    Open = 1,

    /// Used to transfer routing information between BGP peers.
    ///
    /// RFC 4271 §4.3
    Update = 2,

    /// Sent when an error condition is detected.
    ///
    /// RFC 4271 §4.5
    Notification = 3,

    /// Exchanged between peers often enough not to cause the hold timer to
    /// expire.
    ///
    /// RFC 4271 §4.4
    KeepAlive = 4,
}

impl From<&Message> for MessageType {
    fn from(m: &Message) -> Self {
        match m {
            Message::Open(_) => Self::Open,
            Message::Update(_) => Self::Update,
            Message::Notification(_) => Self::Notification,
            Message::KeepAlive => Self::KeepAlive,
        }
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Message {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    KeepAlive,
}

impl Message {
    /// Serialize the message body, without the header.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Open(m) => m.to_wire(),
            Self::Update(m) => m.to_wire(),
            Self::Notification(m) => m.to_wire(),
            Self::KeepAlive => Ok(Vec::new()),
        }
    }

    /// Serialize the message including its header, ready to be written to a
    /// connection.
    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let body = self.to_wire()?;
        let length = u16::try_from(body.len() + Header::WIRE_SIZE)
            .map_err(|_| Error::TooLarge("message length".into()))?;
        let header = Header::new(length, MessageType::from(self))?;
        let mut buf = header.to_wire();
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a message body previously framed by [`read_frame`]. UPDATE
    /// path attributes carrying AS numbers are interpreted according to
    /// `four_octet_asn`.
    pub fn from_frame(
        header: &Header,
        body: &[u8],
        four_octet_asn: bool,
    ) -> Result<Message, Error> {
        Ok(match header.typ {
            MessageType::Open => OpenMessage::from_wire(body)?.into(),
            MessageType::Update => {
                UpdateMessage::from_wire(body, four_octet_asn)?.into()
            }
            MessageType::Notification => {
                NotificationMessage::from_wire(body)?.into()
            }
            MessageType::KeepAlive => Message::KeepAlive,
        })
    }
}

impl From<OpenMessage> for Message {
    fn from(m: OpenMessage) -> Message {
        Message::Open(m)
    }
}

impl From<UpdateMessage> for Message {
    fn from(m: UpdateMessage) -> Message {
        Message::Update(m)
    }
}

impl From<NotificationMessage> for Message {
    fn from(m: NotificationMessage) -> Message {
        Message::Notification(m)
    }
}

/// Read one complete message from a byte stream. The header is validated and
/// the body is returned undecoded so callers that only care about framing
/// can skip the body entirely.
pub fn read_frame<R: Read>(r: &mut R) -> Result<(Header, Vec<u8>), Error> {
    let mut buf = [0u8; Header::WIRE_SIZE];
    r.read_exact(&mut buf)?;
    let header = Header::from_wire(&buf)?;
    let mut body = vec![0u8; usize::from(header.length) - Header::WIRE_SIZE];
    r.read_exact(&mut body)?;
    Ok((header, body))
}

/// Each BGP message has a fixed sized header.
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                                                               |
///   +                                                               +
///   |                                                               |
///   +                                                               +
///   |                           Marker                              |
///   +                                                               +
///   |                                                               |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |          Length               |      Type     |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// This object contains the length and type fields. The marker is generated
/// by [`Header::to_wire`] and consumed by [`Header::from_wire`].
///
/// Ref: RFC 4271 §4.1
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Header {
    /// Total length of the message, including the header. May be no larger than
    /// 4096.
    pub length: u16,

    /// Indicates the type of message.
    pub typ: MessageType,
}

/// According to RFC 4271 §4.1 the header marker is all ones.
pub const MARKER: [u8; 16] = [0xFFu8; 16];

impl Header {
    pub const WIRE_SIZE: usize = 19;

    /// Create a new BGP message header. Length must be between 19 and 4096 per
    /// RFC 4271 §4.1.
    pub fn new(length: u16, typ: MessageType) -> Result<Header, Error> {
        if usize::from(length) < Header::WIRE_SIZE {
            return Err(Error::TooSmall("message header length".into()));
        }
        if usize::from(length) > MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge("message header length".into()));
        }
        Ok(Header { length, typ })
    }

    /// Serialize the header to wire format.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = MARKER.to_vec();
        buf.extend_from_slice(&self.length.to_be_bytes());
        buf.push(self.typ as u8);
        buf
    }

    /// Deserialize a header from wire format. Any violation here means the
    /// byte stream can no longer be trusted to be aligned on message
    /// boundaries.
    pub fn from_wire(input: &[u8]) -> Result<Header, Error> {
        if !input.starts_with(&MARKER) {
            return Err(Error::NoMarker);
        }
        let input = &input[MARKER.len()..];
        let (input, length) = be_u16(input)?;
        let (_, typ) = parse_u8(input)?;
        let typ = MessageType::try_from(typ)
            .map_err(|e| Error::InvalidMessageType(e.number))?;

        let len = usize::from(length);
        let bad_length = len < Header::WIRE_SIZE
            || len > MAX_MESSAGE_SIZE
            || (typ == MessageType::KeepAlive && len != Header::WIRE_SIZE);
        if bad_length {
            return Err(Error::BadMessageLength { length, typ });
        }
        Ok(Header { length, typ })
    }
}

/// The autonomous system number used in OPEN messages when 4-byte ASNs are in
/// use.
///
/// Ref: RFC 4893 §7
pub const AS_TRANS: u16 = 23456;

/// The version number for BGP-4
pub const BGP4: u8 = 4;

/// The first message sent by each side once a TCP connection is established.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Version    |     My Autonomous System      |   Hold Time   :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :               |                BGP Identifier                 :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :               | Opt Parm Len  |     Optional Parameters       :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                                                               :
/// :             Optional Parameters (cont, variable)              :
/// :                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Ref: RFC 4271 §4.2
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OpenMessage {
    /// BGP protocol version.
    pub version: u8,

    /// Autonomous system number of the sender. ASNs that do not fit in 16
    /// bits are sent as AS_TRANS and carried in full by the four-octet AS
    /// capability.
    ///
    /// Ref: RFC 4893 §7
    pub asn: u16,

    /// Number of seconds the sender proposes for the hold timer.
    pub hold_time: u16,

    /// BGP identifier of the sender
    pub id: u32,

    /// A list of optional parameters.
    pub parameters: Vec<OptionalParameter>,
}

impl OpenMessage {
    /// Create a new open message for a sender with a 2-byte ASN
    pub fn new2(asn: u16, hold_time: u16, id: u32) -> OpenMessage {
        OpenMessage {
            version: BGP4,
            asn,
            hold_time,
            id,
            parameters: Vec::new(),
        }
    }

    /// Create a new open message announcing four-octet AS support. The
    /// 16-bit ASN field carries the real ASN when it fits.
    pub fn new4(asn: u32, hold_time: u16, id: u32) -> OpenMessage {
        OpenMessage {
            version: BGP4,
            asn: u16::try_from(asn).unwrap_or(AS_TRANS),
            hold_time,
            id,
            parameters: vec![OptionalParameter::Capabilities(vec![
                Capability::FourOctetAs { asn },
            ])],
        }
    }

    pub fn add_capabilities(&mut self, capabilities: &[Capability]) {
        if capabilities.is_empty() {
            return;
        }
        if let Some(OptionalParameter::Capabilities(cs)) =
            self.parameters.first_mut()
        {
            cs.extend_from_slice(capabilities);
            return;
        }
        self.parameters
            .push(OptionalParameter::Capabilities(capabilities.into()));
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.parameters.iter().flat_map(|p| match p {
            OptionalParameter::Capabilities(cs) => cs.iter(),
        })
    }

    /// The ASN carried by the four-octet AS capability, if the sender
    /// announced one.
    pub fn four_octet_asn(&self) -> Option<u32> {
        self.capabilities().find_map(|c| match c {
            Capability::FourOctetAs { asn } => Some(*asn),
            _ => None,
        })
    }

    /// The sender's ASN, preferring the four-octet capability over the
    /// 16-bit header field.
    pub fn asn(&self) -> u32 {
        self.four_octet_asn().unwrap_or(u32::from(self.asn))
    }

    /// Serilize an open message to wire format.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        // version
        buf.push(self.version);

        // as
        buf.extend_from_slice(&self.asn.to_be_bytes());

        // hold time
        buf.extend_from_slice(&self.hold_time.to_be_bytes());

        // id
        buf.extend_from_slice(&self.id.to_be_bytes());

        // opt param len
        let opt_buf = self.parameters_to_wire()?;
        if opt_buf.len() > u8::MAX as usize {
            return Err(Error::TooLarge(
                "open message optional parameters".into(),
            ));
        }
        buf.push(opt_buf.len() as u8);
        buf.extend_from_slice(&opt_buf);

        Ok(buf)
    }

    fn parameters_to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        for p in &self.parameters {
            buf.extend_from_slice(&p.to_wire()?);
        }
        Ok(buf)
    }

    /// Deserialize an open message from wire format.
    pub fn from_wire(input: &[u8]) -> Result<OpenMessage, Error> {
        let (input, version) = parse_u8(input)?;
        if version != BGP4 {
            return Err(Error::BadVersion(version));
        }
        let (input, asn) = be_u16(input)?;
        let (input, hold_time) = be_u16(input)?;
        if hold_time != 0 && hold_time < 3 {
            return Err(Error::HoldTimeTooSmall(hold_time));
        }
        let (input, id) = be_u32(input)?;
        let (input, param_len) = parse_u8(input)?;
        let param_len = param_len as usize;

        if input.len() < param_len {
            return Err(Error::TooSmall(
                "open message optional parameters".into(),
            ));
        }

        let parameters = Self::parameters_from_wire(&input[..param_len])?;

        Ok(OpenMessage {
            version,
            asn,
            hold_time,
            id,
            parameters,
        })
    }

    pub fn parameters_from_wire(
        mut buf: &[u8],
    ) -> Result<Vec<OptionalParameter>, Error> {
        let mut result = Vec::new();

        while !buf.is_empty() {
            let (out, param) = OptionalParameter::from_wire(buf)?;
            result.push(param);
            buf = out;
        }

        Ok(result)
    }
}

/// Optional parameters understood in OPEN messages. Only the capabilities
/// parameter is accepted.
///
/// Ref: RFC 5492
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum OptionalParameter {
    /// Code 2
    Capabilities(Vec<Capability>),
}

pub const OPTIONAL_PARAMETER_CAPABILITIES: u8 = 2;

impl OptionalParameter {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Capabilities(cs) => {
                let mut csbuf = Vec::new();
                for c in cs {
                    csbuf.extend_from_slice(&c.to_wire()?);
                }
                if csbuf.len() > u8::MAX as usize {
                    return Err(Error::TooLarge("capabilities".into()));
                }
                let mut buf =
                    vec![OPTIONAL_PARAMETER_CAPABILITIES, csbuf.len() as u8];
                buf.extend_from_slice(&csbuf);
                Ok(buf)
            }
        }
    }

    pub fn from_wire(
        input: &[u8],
    ) -> Result<(&[u8], OptionalParameter), Error> {
        let (input, code) = parse_u8(input)?;
        let (input, len) = parse_u8(input)?;
        let (input, mut cap_input) = take(len)(input)?;

        if code != OPTIONAL_PARAMETER_CAPABILITIES {
            return Err(Error::UnsupportedOptionalParameterCode(code));
        }

        let mut result = Vec::new();
        while !cap_input.is_empty() {
            let (out, cap) = Capability::from_wire(cap_input)?;
            result.push(cap);
            cap_input = out;
        }
        Ok((input, OptionalParameter::Capabilities(result)))
    }
}

/// Address family identifiers.
///
/// Ref: IANA address family numbers
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u16)]
pub enum Afi {
    Ipv4 = 1,
    Ipv6 = 2,
}

/// Subsequent address family identifiers.
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum Safi {
    Unicast = 1,
}

impl Afi {
    fn max_prefix_len(&self) -> u8 {
        match self {
            Self::Ipv4 => Ipv4Net::MAX_LEN,
            Self::Ipv6 => Ipv6Net::MAX_LEN,
        }
    }
}

/// Capabilities this speaker knows how to interpret. Anything else is kept
/// as an opaque value so that peers announcing capabilities we have never
/// heard of can still be talked to.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Capability {
    /// RFC 2858
    MultiprotocolExtensions { afi: u16, safi: u8 },

    /// RFC 2918
    RouteRefresh {},

    /// RFC 6793
    FourOctetAs { asn: u32 },

    /// Any capability not listed above, skipped by length.
    Unknown { code: u8, value: Vec<u8> },
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum CapabilityCode {
    /// RFC 2858
    MultiprotocolExtensions = 1,

    /// RFC 2918
    RouteRefresh = 2,

    /// RFC 6793
    FourOctetAs = 65,
}

impl Capability {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::MultiprotocolExtensions { afi, safi } => {
                let mut buf =
                    vec![CapabilityCode::MultiprotocolExtensions as u8, 4];
                buf.extend_from_slice(&afi.to_be_bytes());
                buf.push(0);
                buf.push(*safi);
                Ok(buf)
            }
            Self::RouteRefresh {} => {
                Ok(vec![CapabilityCode::RouteRefresh as u8, 0])
            }
            Self::FourOctetAs { asn } => {
                let mut buf = vec![CapabilityCode::FourOctetAs as u8, 4];
                buf.extend_from_slice(&asn.to_be_bytes());
                Ok(buf)
            }
            Self::Unknown { code, value } => {
                if value.len() > u8::MAX as usize {
                    return Err(Error::TooLarge("capability value".into()));
                }
                let mut buf = vec![*code, value.len() as u8];
                buf.extend_from_slice(value);
                Ok(buf)
            }
        }
    }

    pub fn from_wire(input: &[u8]) -> Result<(&[u8], Capability), Error> {
        let (input, code) = parse_u8(input)?;
        let (input, len) = parse_u8(input)?;
        let (input, value) = take(len)(input)?;

        let cap = match CapabilityCode::try_from(code) {
            Ok(CapabilityCode::MultiprotocolExtensions) if len == 4 => {
                let (value, afi) = be_u16(value)?;
                let (value, _reserved) = parse_u8(value)?;
                let (_, safi) = parse_u8(value)?;
                Capability::MultiprotocolExtensions { afi, safi }
            }
            Ok(CapabilityCode::RouteRefresh) => Capability::RouteRefresh {},
            Ok(CapabilityCode::FourOctetAs) if len == 4 => {
                let (_, asn) = be_u32(value)?;
                Capability::FourOctetAs { asn }
            }
            _ => Capability::Unknown {
                code,
                value: value.to_owned(),
            },
        };
        Ok((input, cap))
    }
}

/// An update message is used to advertise feasible routes that share common
/// path attributes to a peer, or to withdraw multiple unfeasible routes from
/// service.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        Witdrawn Length        |       Withdrawn Routes        :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                                                               :
/// :                Withdrawn Routes (cont, variable)              :
/// :                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Path Attribute Length      |       Path Attributes         :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                                                               :
/// :                Path Attributes (cont, variable)               :
/// :                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                                                               :
/// :       Network Layer Reachability Information (variable)       :
/// :                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Ref: RFC 4271 §4.3
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct UpdateMessage {
    pub withdrawn: Vec<Prefix>,
    pub path_attributes: Vec<PathAttribute>,
    pub nlri: Vec<Prefix>,
}

/// Bytes left for routes in an UPDATE after the header and the two length
/// fields.
const UPDATE_ROUTE_SPACE: usize = MAX_MESSAGE_SIZE - Header::WIRE_SIZE - 4;

/// Overhead of an MP_UNREACH_NLRI attribute with an extended length field.
const MP_UNREACH_OVERHEAD: usize = 4 + 3;

impl UpdateMessage {
    /// Build the UPDATE messages withdrawing `prefixes`. IPv4 routes travel
    /// in the withdrawn routes field and IPv6 routes in MP_UNREACH_NLRI. A
    /// batch only spills into additional messages when it would exceed the
    /// maximum message size.
    pub fn withdraw<'a, I>(prefixes: I) -> Vec<UpdateMessage>
    where
        I: IntoIterator<Item = &'a IpNet>,
    {
        let mut result = Vec::new();
        let mut v4 = Vec::new();
        let mut v4_size = 0;
        let mut v6 = Vec::new();
        let mut v6_size = 0;

        for p in prefixes {
            let prefix = Prefix::from(p);
            let size = prefix.wire_size();
            if p.is_ipv4() {
                if v4_size + size > UPDATE_ROUTE_SPACE {
                    result.push(UpdateMessage {
                        withdrawn: std::mem::take(&mut v4),
                        ..Default::default()
                    });
                    v4_size = 0;
                }
                v4_size += size;
                v4.push(prefix);
            } else {
                if v6_size + size > UPDATE_ROUTE_SPACE - MP_UNREACH_OVERHEAD {
                    result.push(Self::mp_withdraw(std::mem::take(&mut v6)));
                    v6_size = 0;
                }
                v6_size += size;
                v6.push(prefix);
            }
        }

        if !v4.is_empty() {
            result.push(UpdateMessage {
                withdrawn: v4,
                ..Default::default()
            });
        }
        if !v6.is_empty() {
            result.push(Self::mp_withdraw(v6));
        }
        result
    }

    fn mp_withdraw(withdrawn: Vec<Prefix>) -> UpdateMessage {
        UpdateMessage {
            path_attributes: vec![PathAttributeValue::MpUnreachNlri(
                MpUnreachNlri {
                    afi: Afi::Ipv6,
                    safi: Safi::Unicast,
                    withdrawn,
                },
            )
            .into()],
            ..Default::default()
        }
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        // withdrawn
        let withdrawn = self.withdrawn_to_wire()?;
        if withdrawn.len() > u16::MAX as usize {
            return Err(Error::TooLarge(
                "update: too many withdrawn prefixes".into(),
            ));
        }
        let len = withdrawn.len() as u16;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&withdrawn);

        // path attributes
        let attrs = self.path_attrs_to_wire()?;
        if attrs.len() > u16::MAX as usize {
            return Err(Error::TooLarge(
                "update: too many path attributes".into(),
            ));
        }
        let len = attrs.len() as u16;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&attrs);

        // nlri
        buf.extend_from_slice(&self.nlri_to_wire()?);

        if buf.len() + Header::WIRE_SIZE > MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge(
                "update exceeds max message size".into(),
            ));
        }

        Ok(buf)
    }

    fn withdrawn_to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        for w in &self.withdrawn {
            buf.extend_from_slice(&w.to_wire()?);
        }
        Ok(buf)
    }

    fn path_attrs_to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        for p in &self.path_attributes {
            buf.extend_from_slice(&p.to_wire()?);
        }
        Ok(buf)
    }

    fn nlri_to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        for n in &self.nlri {
            buf.extend_from_slice(&n.to_wire()?);
        }
        Ok(buf)
    }

    pub fn from_wire(
        input: &[u8],
        four_octet_asn: bool,
    ) -> Result<UpdateMessage, Error> {
        let (input, len) = be_u16(input)?;
        let (input, withdrawn_input) = take(len)(input)?;
        let withdrawn = Prefix::list_from_wire(withdrawn_input, Afi::Ipv4)?;

        let (input, len) = be_u16(input)?;
        let (input, attrs_input) = take(len)(input)?;
        let path_attributes =
            Self::path_attrs_from_wire(attrs_input, four_octet_asn)?;

        let nlri = Prefix::list_from_wire(input, Afi::Ipv4)?;

        Ok(UpdateMessage {
            withdrawn,
            path_attributes,
            nlri,
        })
    }

    fn path_attrs_from_wire(
        mut buf: &[u8],
        four_octet_asn: bool,
    ) -> Result<Vec<PathAttribute>, Error> {
        let mut result = Vec::new();
        while !buf.is_empty() {
            let (out, pa) = PathAttribute::from_wire(buf, four_octet_asn)?;
            result.push(pa);
            buf = out;
        }
        Ok(result)
    }

    pub fn nexthop4(&self) -> Option<Ipv4Addr> {
        self.path_attributes.iter().find_map(|a| match a.value {
            PathAttributeValue::NextHop(addr) => Some(addr),
            _ => None,
        })
    }

    pub fn local_pref(&self) -> Option<u32> {
        self.path_attributes.iter().find_map(|a| match a.value {
            PathAttributeValue::LocalPref(v) => Some(v),
            _ => None,
        })
    }

    pub fn communities(&self) -> Option<&[Community]> {
        self.path_attributes.iter().find_map(|a| match &a.value {
            PathAttributeValue::Communities(cs) => Some(cs.as_slice()),
            _ => None,
        })
    }

    pub fn mp_reach(&self) -> Option<&MpReachNlri> {
        self.path_attributes.iter().find_map(|a| match &a.value {
            PathAttributeValue::MpReachNlri(r) => Some(r),
            _ => None,
        })
    }

    pub fn mp_unreach(&self) -> Option<&MpUnreachNlri> {
        self.path_attributes.iter().find_map(|a| match &a.value {
            PathAttributeValue::MpUnreachNlri(r) => Some(r),
            _ => None,
        })
    }

    /// All prefixes announced by this message, across address families.
    pub fn announced(&self) -> Result<Vec<IpNet>, Error> {
        let mut result = Vec::new();
        for p in &self.nlri {
            result.push(p.to_net(Afi::Ipv4)?);
        }
        if let Some(r) = self.mp_reach() {
            for p in &r.nlri {
                result.push(p.to_net(r.afi)?);
            }
        }
        Ok(result)
    }

    /// All prefixes withdrawn by this message, across address families.
    pub fn withdrawn_prefixes(&self) -> Result<Vec<IpNet>, Error> {
        let mut result = Vec::new();
        for p in &self.withdrawn {
            result.push(p.to_net(Afi::Ipv4)?);
        }
        if let Some(r) = self.mp_unreach() {
            for p in &r.withdrawn {
                result.push(p.to_net(r.afi)?);
            }
        }
        Ok(result)
    }
}

/// This data structure captures a network prefix as it's layed out in a BGP
/// message. There is a prefix length followed by a variable number of bytes.
/// Just enough bytes to express the prefix.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Prefix {
    pub length: u8,
    pub value: Vec<u8>,
}

impl Prefix {
    fn wire_size(&self) -> usize {
        1 + (self.length as usize).div_ceil(8)
    }

    fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let n = (self.length as usize).div_ceil(8);
        if self.value.len() < n {
            return Err(Error::TooSmall("prefix value".into()));
        }
        let mut buf = vec![self.length];
        buf.extend_from_slice(&self.value[..n]);
        Ok(buf)
    }

    fn from_wire(input: &[u8], afi: Afi) -> Result<(&[u8], Prefix), Error> {
        let (input, len) = parse_u8(input)?;
        if len > afi.max_prefix_len() {
            return Err(Error::InvalidPrefixLength(len, afi.max_prefix_len()));
        }
        let (input, value) = take(len.div_ceil(8))(input)?;
        Ok((
            input,
            Prefix {
                value: value.to_owned(),
                length: len,
            },
        ))
    }

    fn list_from_wire(mut buf: &[u8], afi: Afi) -> Result<Vec<Prefix>, Error> {
        let mut result = Vec::new();
        while !buf.is_empty() {
            let (out, pfx) = Prefix::from_wire(buf, afi)?;
            result.push(pfx);
            buf = out;
        }
        Ok(result)
    }

    /// The BGP prefix format only contains enough bytes to describe the
    /// prefix so the remaining address bytes are zero filled.
    pub fn to_net(&self, afi: Afi) -> Result<IpNet, Error> {
        let invalid =
            || Error::InvalidPrefixLength(self.length, afi.max_prefix_len());
        match afi {
            Afi::Ipv4 => {
                let mut octets = [0u8; 4];
                let n = self.value.len().min(4);
                octets[..n].copy_from_slice(&self.value[..n]);
                Ok(Ipv4Net::new(Ipv4Addr::from(octets), self.length)
                    .map_err(|_| invalid())?
                    .into())
            }
            Afi::Ipv6 => {
                let mut octets = [0u8; 16];
                let n = self.value.len().min(16);
                octets[..n].copy_from_slice(&self.value[..n]);
                Ok(Ipv6Net::new(Ipv6Addr::from(octets), self.length)
                    .map_err(|_| invalid())?
                    .into())
            }
        }
    }
}

impl From<&IpNet> for Prefix {
    fn from(p: &IpNet) -> Self {
        let value = match p.addr() {
            IpAddr::V4(a) => a.octets().to_vec(),
            IpAddr::V6(a) => a.octets().to_vec(),
        };
        let n = (p.length() as usize).div_ceil(8);
        Self {
            length: p.length(),
            value: value[..n].to_vec(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PathAttribute {
    pub typ: PathAttributeType,
    pub value: PathAttributeValue,
}

impl From<PathAttributeValue> for PathAttribute {
    fn from(v: PathAttributeValue) -> Self {
        let flags = match v {
            PathAttributeValue::Origin(_) => path_attribute_flags::TRANSITIVE,
            PathAttributeValue::AsPath(_) => path_attribute_flags::TRANSITIVE,
            PathAttributeValue::As4Path(_) => path_attribute_flags::TRANSITIVE,
            PathAttributeValue::NextHop(_) => path_attribute_flags::TRANSITIVE,
            PathAttributeValue::LocalPref(_) => {
                path_attribute_flags::TRANSITIVE
            }
            PathAttributeValue::Communities(_) => {
                path_attribute_flags::OPTIONAL
                    | path_attribute_flags::TRANSITIVE
            }
            _ => path_attribute_flags::OPTIONAL,
        };
        Self {
            typ: PathAttributeType {
                flags,
                type_code: PathAttributeTypeCode::from(&v),
            },
            value: v,
        }
    }
}

impl PathAttribute {
    /// Serialize the attribute. The extended length flag is set whenever the
    /// value does not fit in a single length byte.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let val = self.value.to_wire()?;
        let extended_length = self.typ.flags
            & path_attribute_flags::EXTENDED_LENGTH
            != 0
            || val.len() > u8::MAX as usize;

        let mut flags = self.typ.flags;
        if extended_length {
            flags |= path_attribute_flags::EXTENDED_LENGTH;
        }
        let mut buf = vec![flags, self.typ.type_code as u8];
        if extended_length {
            if val.len() > u16::MAX as usize {
                return Err(Error::TooLarge("extended path attribute".into()));
            }
            let len = val.len() as u16;
            buf.extend_from_slice(&len.to_be_bytes())
        } else {
            buf.push(val.len() as u8);
        }
        buf.extend_from_slice(&val);
        Ok(buf)
    }

    fn from_wire(
        input: &[u8],
        four_octet_asn: bool,
    ) -> Result<(&[u8], PathAttribute), Error> {
        let (input, type_input) = take(2usize)(input)?;
        let typ = PathAttributeType::from_wire(type_input)?;

        let (input, len) =
            if typ.flags & path_attribute_flags::EXTENDED_LENGTH != 0 {
                let (input, len) = be_u16(input)?;
                (input, len as usize)
            } else {
                let (input, len) = parse_u8(input)?;
                (input, len as usize)
            };
        let (input, pa_input) = take(len)(input)?;
        let value = PathAttributeValue::from_wire(
            pa_input,
            typ.type_code,
            four_octet_asn,
        )?;
        Ok((input, PathAttribute { typ, value }))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PathAttributeType {
    pub flags: u8,
    pub type_code: PathAttributeTypeCode,
}

impl PathAttributeType {
    pub fn from_wire(input: &[u8]) -> Result<PathAttributeType, Error> {
        let (input, flags) = parse_u8(input)?;
        let (_, type_code) = parse_u8(input)?;
        let type_code = PathAttributeTypeCode::try_from(type_code)?;
        Ok(PathAttributeType { flags, type_code })
    }
}

pub mod path_attribute_flags {
    pub const OPTIONAL: u8 = 0b10000000;
    pub const TRANSITIVE: u8 = 0b01000000;
    pub const PARTIAL: u8 = 0b00100000;
    pub const EXTENDED_LENGTH: u8 = 0b00010000;
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum PathAttributeTypeCode {
    /// RFC 4271
    Origin = 1,
    AsPath = 2,
    NextHop = 3,
    LocalPref = 5,

    /// RFC 1997
    Communities = 8,

    /// RFC 4760
    MpReachNlri = 14,
    MpUnreachNlri = 15,
}

impl From<&PathAttributeValue> for PathAttributeTypeCode {
    fn from(v: &PathAttributeValue) -> Self {
        match v {
            PathAttributeValue::Origin(_) => PathAttributeTypeCode::Origin,
            PathAttributeValue::AsPath(_) => PathAttributeTypeCode::AsPath,
            PathAttributeValue::As4Path(_) => PathAttributeTypeCode::AsPath,
            PathAttributeValue::NextHop(_) => PathAttributeTypeCode::NextHop,
            PathAttributeValue::LocalPref(_) => {
                PathAttributeTypeCode::LocalPref
            }
            PathAttributeValue::Communities(_) => {
                PathAttributeTypeCode::Communities
            }
            PathAttributeValue::MpReachNlri(_) => {
                PathAttributeTypeCode::MpReachNlri
            }
            PathAttributeValue::MpUnreachNlri(_) => {
                PathAttributeTypeCode::MpUnreachNlri
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PathAttributeValue {
    Origin(PathOrigin),
    /// AS_PATH encoded with 2-byte AS numbers, for peers that did not
    /// announce four-octet AS support.
    AsPath(Vec<AsPathSegment>),
    /// AS_PATH encoded with 4-byte AS numbers. RFC 6793 uses the same type
    /// code once four-octet ASNs have been negotiated.
    As4Path(Vec<As4PathSegment>),
    NextHop(Ipv4Addr),
    LocalPref(u32),
    Communities(Vec<Community>),
    MpReachNlri(MpReachNlri),
    MpUnreachNlri(MpUnreachNlri),
}

impl PathAttributeValue {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Origin(x) => Ok(vec![*x as u8]),
            Self::AsPath(segments) => {
                let mut buf = Vec::new();
                for s in segments {
                    buf.extend_from_slice(&s.to_wire()?);
                }
                Ok(buf)
            }
            Self::As4Path(segments) => {
                let mut buf = Vec::new();
                for s in segments {
                    buf.extend_from_slice(&s.to_wire()?);
                }
                Ok(buf)
            }
            Self::NextHop(addr) => Ok(addr.octets().into()),
            Self::LocalPref(v) => Ok(v.to_be_bytes().into()),
            Self::Communities(communities) => {
                let mut buf = Vec::new();
                for community in communities {
                    buf.extend_from_slice(&u32::from(*community).to_be_bytes());
                }
                Ok(buf)
            }
            Self::MpReachNlri(r) => r.to_wire(),
            Self::MpUnreachNlri(r) => r.to_wire(),
        }
    }

    pub fn from_wire(
        mut input: &[u8],
        type_code: PathAttributeTypeCode,
        four_octet_asn: bool,
    ) -> Result<PathAttributeValue, Error> {
        match type_code {
            PathAttributeTypeCode::Origin => {
                let (_input, origin) = parse_u8(input)?;
                Ok(PathAttributeValue::Origin(PathOrigin::try_from(origin)?))
            }
            PathAttributeTypeCode::AsPath if four_octet_asn => {
                let mut segments = Vec::new();
                while !input.is_empty() {
                    let (out, seg) = As4PathSegment::from_wire(input)?;
                    segments.push(seg);
                    input = out;
                }
                Ok(PathAttributeValue::As4Path(segments))
            }
            PathAttributeTypeCode::AsPath => {
                let mut segments = Vec::new();
                while !input.is_empty() {
                    let (out, seg) = AsPathSegment::from_wire(input)?;
                    segments.push(seg);
                    input = out;
                }
                Ok(PathAttributeValue::AsPath(segments))
            }
            PathAttributeTypeCode::NextHop => {
                let (_input, b) = take(4usize)(input)?;
                Ok(PathAttributeValue::NextHop(Ipv4Addr::new(
                    b[0], b[1], b[2], b[3],
                )))
            }
            PathAttributeTypeCode::LocalPref => {
                let (_input, v) = be_u32(input)?;
                Ok(PathAttributeValue::LocalPref(v))
            }
            PathAttributeTypeCode::Communities => {
                let mut communities = Vec::new();
                while !input.is_empty() {
                    let (out, v) = be_u32(input)?;
                    communities.push(Community(v));
                    input = out;
                }
                Ok(PathAttributeValue::Communities(communities))
            }
            PathAttributeTypeCode::MpReachNlri => {
                Ok(PathAttributeValue::MpReachNlri(MpReachNlri::from_wire(
                    input,
                )?))
            }
            PathAttributeTypeCode::MpUnreachNlri => {
                Ok(PathAttributeValue::MpUnreachNlri(
                    MpUnreachNlri::from_wire(input)?,
                ))
            }
        }
    }
}

fn afi_safi_from_wire(input: &[u8]) -> Result<(&[u8], Afi, Safi), Error> {
    let (input, afi) = be_u16(input)?;
    let (input, safi) = parse_u8(input)?;
    match (Afi::try_from(afi), Safi::try_from(safi)) {
        (Ok(afi), Ok(safi)) => Ok((input, afi, safi)),
        _ => Err(Error::UnsupportedAddressFamily(afi, safi)),
    }
}

/// Multiprotocol reachable NLRI.
///
/// Ref: RFC 4760 §3
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MpReachNlri {
    pub afi: Afi,
    pub safi: Safi,
    pub nexthop: IpAddr,
    pub nlri: Vec<Prefix>,
}

impl MpReachNlri {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = u16::from(self.afi).to_be_bytes().to_vec();
        buf.push(self.safi.into());
        match self.nexthop {
            IpAddr::V4(a) => {
                buf.push(4);
                buf.extend_from_slice(&a.octets());
            }
            IpAddr::V6(a) => {
                buf.push(16);
                buf.extend_from_slice(&a.octets());
            }
        }
        // reserved
        buf.push(0);
        for n in &self.nlri {
            buf.extend_from_slice(&n.to_wire()?);
        }
        Ok(buf)
    }

    pub fn from_wire(input: &[u8]) -> Result<MpReachNlri, Error> {
        let (input, afi, safi) = afi_safi_from_wire(input)?;
        let (input, nh_len) = parse_u8(input)?;
        let (input, nh) = take(nh_len)(input)?;
        let nexthop = match nh.len() {
            4 => IpAddr::from([nh[0], nh[1], nh[2], nh[3]]),
            // A global address optionally followed by a link-local one.
            16 | 32 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&nh[..16]);
                IpAddr::from(octets)
            }
            _ => {
                return Err(Error::InvalidAddress(format!(
                    "mp_reach next hop length {nh_len}"
                )))
            }
        };
        let (input, _reserved) = parse_u8(input)?;
        let nlri = Prefix::list_from_wire(input, afi)?;
        Ok(MpReachNlri {
            afi,
            safi,
            nexthop,
            nlri,
        })
    }
}

/// Multiprotocol unreachable NLRI.
///
/// Ref: RFC 4760 §4
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MpUnreachNlri {
    pub afi: Afi,
    pub safi: Safi,
    pub withdrawn: Vec<Prefix>,
}

impl MpUnreachNlri {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = u16::from(self.afi).to_be_bytes().to_vec();
        buf.push(self.safi.into());
        for w in &self.withdrawn {
            buf.extend_from_slice(&w.to_wire()?);
        }
        Ok(buf)
    }

    pub fn from_wire(input: &[u8]) -> Result<MpUnreachNlri, Error> {
        let (input, afi, safi) = afi_safi_from_wire(input)?;
        let withdrawn = Prefix::list_from_wire(input, afi)?;
        Ok(MpUnreachNlri {
            afi,
            safi,
            withdrawn,
        })
    }
}

/// A BGP community value. Communities are opaque to the speaker: they are
/// carried in the order given and never interpreted.
///
/// Ref: RFC 1997
#[derive(
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Clone,
    Copy,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Community(pub u32);

impl Community {
    /// Routes carrying this value must not be advertised outside a BGP
    /// confederation boundary.
    pub const NO_EXPORT: Community = Community(0xFFFFFF01);

    /// Routes carrying this value must not be advertised to other BGP peers.
    pub const NO_ADVERTISE: Community = Community(0xFFFFFF02);

    /// Routes carrying this value must not be advertised to external BGP
    /// peers.
    pub const NO_EXPORT_SUBCONFED: Community = Community(0xFFFFFF03);

    /// RFC 8326
    pub const GRACEFUL_SHUTDOWN: Community = Community(0xFFFF0000);

    pub fn new(high: u16, low: u16) -> Self {
        Self((u32::from(high) << 16) | u32::from(low))
    }
}

impl From<u32> for Community {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<Community> for u32 {
    fn from(c: Community) -> Self {
        c.0
    }
}

impl std::fmt::Display for Community {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.0 >> 16, self.0 & 0xffff)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive)]
#[repr(u8)]
pub enum PathOrigin {
    Igp = 0,
    Egp = 1,
    Incomplete = 2,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsPathSegment {
    pub typ: AsPathType,
    pub value: Vec<u16>,
}

impl AsPathSegment {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        if self.value.len() > u8::MAX as usize {
            return Err(Error::TooLarge("AS path segment".into()));
        }
        let mut buf = vec![self.typ as u8, self.value.len() as u8];
        for v in &self.value {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Ok(buf)
    }

    pub fn from_wire(input: &[u8]) -> Result<(&[u8], AsPathSegment), Error> {
        let (input, typ) = parse_u8(input)?;
        let typ = AsPathType::try_from(typ)?;
        let (input, len) = parse_u8(input)?;
        let (input, mut value_input) = take(usize::from(len) * 2)(input)?;
        let mut value = Vec::new();
        while !value_input.is_empty() {
            let (out, v) = be_u16(value_input)?;
            value.push(v);
            value_input = out;
        }
        Ok((input, AsPathSegment { typ, value }))
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct As4PathSegment {
    pub typ: AsPathType,
    pub value: Vec<u32>,
}

impl As4PathSegment {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        if self.value.len() > u8::MAX as usize {
            return Err(Error::TooLarge("AS4 path segment".into()));
        }
        let mut buf = vec![self.typ as u8, self.value.len() as u8];
        for v in &self.value {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        Ok(buf)
    }

    pub fn from_wire(input: &[u8]) -> Result<(&[u8], As4PathSegment), Error> {
        let (input, typ) = parse_u8(input)?;
        let typ = AsPathType::try_from(typ)?;

        let (input, len) = parse_u8(input)?;
        let len = (len as usize) * 4;
        let mut segment = As4PathSegment {
            typ,
            value: Vec::new(),
        };
        if len == 0 {
            return Ok((input, segment));
        }

        let (input, mut value_input) = take(len)(input)?;
        while !value_input.is_empty() {
            let (out, value) = be_u32(value_input)?;
            segment.value.push(value);
            value_input = out;
        }
        Ok((input, segment))
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum AsPathType {
    AsSet = 1,
    AsSequence = 2,
}

/// Sent when an error condition is detected, after which the connection is
/// closed. Codes are kept raw so that notifications with codes this speaker
/// does not know about still decode.
///
/// Ref: RFC 4271 §4.5
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct NotificationMessage {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub fn new(error_code: ErrorCode, error_subcode: impl Into<u8>) -> Self {
        Self {
            error_code: error_code.into(),
            error_subcode: error_subcode.into(),
            data: Vec::new(),
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::try_from(self.error_code).ok()
    }

    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        let mut buf = vec![self.error_code, self.error_subcode];
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }

    pub fn from_wire(input: &[u8]) -> Result<NotificationMessage, Error> {
        let (input, error_code) = parse_u8(input)?;
        let (input, error_subcode) = parse_u8(input)?;
        Ok(NotificationMessage {
            error_code,
            error_subcode,
            data: input.to_owned(),
        })
    }
}

impl std::fmt::Display for NotificationMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{code:?}")?,
            None => write!(f, "code {}", self.error_code)?,
        }
        write!(f, " subcode {}", self.error_subcode)
    }
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum ErrorCode {
    Header = 1,
    Open,
    Update,
    HoldTimerExpired,
    Fsm,
    Cease,
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum HeaderErrorSubcode {
    Unspecific = 0,
    ConnectionNotSynchronized,
    BadMessageLength,
    BadMessageType,
}

#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum OpenErrorSubcode {
    Unspecific = 0,
    UnsupportedVersionNumber,
    BadPeerAS,
    BadBgpIdentifier,
    UnsupportedOptionalParameter,
    Deprecated,
    UnacceptableHoldTime,
    UnsupportedCapability,
}

/// Ref: RFC 4486
#[derive(
    Debug, PartialEq, Eq, Clone, Copy, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum CeaseErrorSubcode {
    Unspecific = 0,
    MaximumNumberofPrefixesReached,
    AdministrativeShutdown,
    PeerDeconfigured,
    AdministrativeReset,
    ConnectionRejected,
    OtherConfigurationChange,
    ConnectionCollisionResolution,
    OutOfResources,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pretty_hex::*;
    use std::io::Cursor;

    fn net(s: &str) -> IpNet {
        s.parse().expect("parse prefix")
    }

    #[test]
    fn header_round_trip() {
        let h0 = Header {
            length: 0x0701,
            typ: MessageType::Notification,
        };

        let buf = h0.to_wire();
        println!("buf: {}", buf.hex_dump());

        assert_eq!(
            buf,
            vec![
                0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
                0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // marker
                0x07, 0x01, // length
                3,    // type
            ]
        );

        let h1 = Header::from_wire(&buf).expect("header from wire");
        assert_eq!(h0, h1);
    }

    #[test]
    fn header_framing_errors() {
        let mut buf = Header {
            length: 19,
            typ: MessageType::KeepAlive,
        }
        .to_wire();

        let mut bad = buf.clone();
        bad[3] = 0xfe;
        assert!(matches!(Header::from_wire(&bad), Err(Error::NoMarker)));

        let mut bad = buf.clone();
        bad[18] = 7;
        assert!(matches!(
            Header::from_wire(&bad),
            Err(Error::InvalidMessageType(7))
        ));

        let mut bad = buf.clone();
        bad[16..18].copy_from_slice(&18u16.to_be_bytes());
        bad[18] = MessageType::Update as u8;
        assert!(matches!(
            Header::from_wire(&bad),
            Err(Error::BadMessageLength { length: 18, .. })
        ));

        let mut bad = buf.clone();
        bad[16..18].copy_from_slice(&4097u16.to_be_bytes());
        bad[18] = MessageType::Update as u8;
        assert!(matches!(
            Header::from_wire(&bad),
            Err(Error::BadMessageLength { length: 4097, .. })
        ));

        // keepalives are exactly one header long
        buf[16..18].copy_from_slice(&20u16.to_be_bytes());
        assert!(matches!(
            Header::from_wire(&buf),
            Err(Error::BadMessageLength {
                length: 20,
                typ: MessageType::KeepAlive
            })
        ));
    }

    #[test]
    fn keepalive_frame() {
        let buf = Message::KeepAlive.to_frame().expect("keepalive to frame");
        let mut expected = MARKER.to_vec();
        expected.extend_from_slice(&[0, 19, 4]);
        assert_eq!(buf, expected);
    }

    #[test]
    fn open_round_trip() {
        let om0 = OpenMessage::new4(395849, 0x1234, 0xaabbccdd);

        let buf = om0.to_wire().expect("open message to wire");
        println!("buf: {}", buf.hex_dump());

        let om1 = OpenMessage::from_wire(&buf).expect("open message from wire");
        assert_eq!(om0, om1);
        assert_eq!(om1.asn(), 395849);
        assert_eq!(om1.hold_time, 0x1234);
    }

    #[test]
    fn open_large_asn_uses_as_trans() {
        let buf = OpenMessage::new4(4200000000, 90, 0x0a000001)
            .to_wire()
            .expect("open message to wire");
        println!("buf: {}", buf.hex_dump());

        let asn = 4200000000u32.to_be_bytes();
        assert_eq!(
            buf,
            vec![
                4, // version
                0x5b, 0xa0, // AS_TRANS
                0, 90, // hold time
                10, 0, 0, 1, // router id
                8, // optional parameters length
                2, 6, // capabilities parameter
                65, 4, asn[0], asn[1], asn[2], asn[3], // four octet as
            ]
        );
    }

    #[test]
    fn open_small_asn_with_and_without_capability() {
        let with = OpenMessage::new4(64512, 90, 1);
        assert_eq!(with.asn, 64512);
        let without = OpenMessage::new2(64512, 90, 1);

        for om in [with, without] {
            let buf = om.to_wire().expect("open message to wire");
            let decoded =
                OpenMessage::from_wire(&buf).expect("open message from wire");
            assert_eq!(decoded.asn(), 64512);
        }

        let decoded = OpenMessage::from_wire(
            &OpenMessage::new2(64512, 90, 1).to_wire().expect("to wire"),
        )
        .expect("from wire");
        assert_eq!(decoded.four_octet_asn(), None);
    }

    #[test]
    fn open_validation() {
        let mut om = OpenMessage::new4(65001, 2, 1);
        let buf = om.to_wire().expect("to wire");
        assert!(matches!(
            OpenMessage::from_wire(&buf),
            Err(Error::HoldTimeTooSmall(2))
        ));

        om.hold_time = 0;
        om.version = 3;
        let buf = om.to_wire().expect("to wire");
        assert!(matches!(
            OpenMessage::from_wire(&buf),
            Err(Error::BadVersion(3))
        ));

        om.version = BGP4;
        let mut buf = om.to_wire().expect("to wire");
        // rewrite the optional parameter type
        buf[10] = 1;
        assert!(matches!(
            OpenMessage::from_wire(&buf),
            Err(Error::UnsupportedOptionalParameterCode(1))
        ));
    }

    #[test]
    fn open_skips_unknown_capabilities() {
        let buf = vec![
            4, // version
            0xfd, 0xe9, // asn 65001
            0, 180, // hold time
            1, 2, 3, 4,  // router id
            14, // optional parameters length
            2, 12, // capabilities parameter
            73, 2, 0xaa, 0xbb, // fqdn, not understood
            65, 4, 0, 0, 0xfd, 0xe9, // four octet as
            2, 0, // route refresh
        ];
        let om = OpenMessage::from_wire(&buf).expect("open message from wire");
        assert_eq!(om.asn(), 65001);
        assert_eq!(om.hold_time, 180);
        assert_eq!(
            om.capabilities().cloned().collect::<Vec<_>>(),
            vec![
                Capability::Unknown {
                    code: 73,
                    value: vec![0xaa, 0xbb]
                },
                Capability::FourOctetAs { asn: 65001 },
                Capability::RouteRefresh {},
            ]
        );
    }

    #[test]
    fn update_round_trip() {
        let um0 = UpdateMessage {
            withdrawn: vec![Prefix {
                value: vec![0x00, 0x17, 0x01, 0xc],
                length: 32,
            }],
            path_attributes: vec![
                PathAttributeValue::Origin(PathOrigin::Incomplete).into(),
                PathAttributeValue::As4Path(vec![As4PathSegment {
                    typ: AsPathType::AsSequence,
                    value: vec![395849, 123456, 987654, 111111],
                }])
                .into(),
                PathAttributeValue::NextHop(Ipv4Addr::new(10, 0, 0, 1))
                    .into(),
                PathAttributeValue::Communities(vec![
                    Community::new(65000, 100),
                    Community::NO_EXPORT,
                ])
                .into(),
            ],
            nlri: vec![
                Prefix {
                    value: vec![0x00, 0x17, 0x01, 0xd],
                    length: 32,
                },
                Prefix {
                    value: vec![0x00, 0x17, 0x01],
                    length: 24,
                },
            ],
        };

        let buf = um0.to_wire().expect("update message to wire");
        println!("buf: {}", buf.hex_dump());

        let um1 = UpdateMessage::from_wire(&buf, true)
            .expect("update message from wire");
        assert_eq!(um0, um1);
    }

    #[test]
    fn two_octet_as_path() {
        let um0 = UpdateMessage {
            path_attributes: vec![PathAttributeValue::AsPath(vec![
                AsPathSegment {
                    typ: AsPathType::AsSequence,
                    value: vec![65001],
                },
            ])
            .into()],
            ..Default::default()
        };
        let buf = um0.to_wire().expect("update message to wire");
        assert_eq!(buf, vec![0, 0, 0, 7, 0x40, 2, 4, 2, 1, 0xfd, 0xe9]);
        let um1 = UpdateMessage::from_wire(&buf, false)
            .expect("update message from wire");
        assert_eq!(um0, um1);
    }

    #[test]
    fn withdraw_single_batch() {
        let msgs = UpdateMessage::withdraw(&[
            net("198.51.100.0/24"),
            net("10.0.0.0/8"),
            net("192.0.2.7/32"),
        ]);
        assert_eq!(msgs.len(), 1);

        let buf = msgs[0].to_wire().expect("withdraw to wire");
        println!("buf: {}", buf.hex_dump());
        assert_eq!(
            buf,
            vec![
                0, 11, // withdrawn length
                24, 198, 51, 100, // 198.51.100.0/24
                8, 10, // 10.0.0.0/8
                32, 192, 0, 2, 7, // 192.0.2.7/32
                0, 0, // path attributes length
            ]
        );
        assert_eq!(
            msgs[0].withdrawn_prefixes().expect("withdrawn prefixes"),
            vec![
                net("198.51.100.0/24"),
                net("10.0.0.0/8"),
                net("192.0.2.7/32")
            ]
        );
    }

    #[test]
    fn withdraw_splits_oversized_batches() {
        let prefixes: Vec<IpNet> = (0..1000u32)
            .map(|i| {
                Ipv4Net::new(Ipv4Addr::from(0x0a000000 | i), 32)
                    .expect("prefix")
                    .into()
            })
            .collect();
        let msgs = UpdateMessage::withdraw(&prefixes);
        assert_eq!(msgs.len(), 2);

        let mut total = 0;
        for m in &msgs {
            let frame = Message::from(m.clone()).to_frame().expect("frame");
            assert!(frame.len() <= MAX_MESSAGE_SIZE);
            total += m.withdrawn.len();
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn ipv6_withdraw_uses_mp_unreach() {
        let msgs = UpdateMessage::withdraw(&[
            net("2001:db8:1::/48"),
            net("192.0.2.0/24"),
        ]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].withdrawn, vec![Prefix::from(&net("192.0.2.0/24"))]);

        let buf = msgs[1].to_wire().expect("mp withdraw to wire");
        println!("buf: {}", buf.hex_dump());
        assert_eq!(
            buf,
            vec![
                0, 0, // withdrawn length
                0, 13, // path attributes length
                0x80, 15, 10, // mp_unreach_nlri
                0, 2, 1, // ipv6 unicast
                48, 0x20, 0x01, 0x0d, 0xb8, 0, 1, // 2001:db8:1::/48
            ]
        );
        let decoded =
            UpdateMessage::from_wire(&buf, true).expect("from wire");
        assert_eq!(
            decoded.withdrawn_prefixes().expect("withdrawn prefixes"),
            vec![net("2001:db8:1::/48")]
        );
    }

    #[test]
    fn mp_reach_round_trip() {
        let um0 = UpdateMessage {
            path_attributes: vec![
                PathAttributeValue::Origin(PathOrigin::Incomplete).into(),
                PathAttributeValue::MpReachNlri(MpReachNlri {
                    afi: Afi::Ipv6,
                    safi: Safi::Unicast,
                    nexthop: "2001:db8::1".parse().expect("parse address"),
                    nlri: vec![Prefix::from(&net("2001:db8:ff::/64"))],
                })
                .into(),
            ],
            ..Default::default()
        };
        let buf = um0.to_wire().expect("update message to wire");
        let um1 = UpdateMessage::from_wire(&buf, true)
            .expect("update message from wire");
        assert_eq!(um0, um1);
        assert_eq!(
            um1.announced().expect("announced"),
            vec![net("2001:db8:ff::/64")]
        );
    }

    #[test]
    fn prefix_length_checked_on_decode() {
        let buf = vec![0, 2, 33, 10, 0, 0, 0, 0, 0];
        assert!(matches!(
            UpdateMessage::from_wire(&buf, true),
            Err(Error::InvalidPrefixLength(33, 32))
        ));
    }

    #[test]
    fn notification_round_trip() {
        let n0 = NotificationMessage::new(
            ErrorCode::Cease,
            CeaseErrorSubcode::AdministrativeShutdown,
        );
        let frame = Message::from(n0.clone()).to_frame().expect("to frame");
        assert_eq!(&frame[16..], &[0, 21, 3, 6, 2]);

        let (header, body) =
            read_frame(&mut Cursor::new(frame)).expect("read frame");
        let msg =
            Message::from_frame(&header, &body, true).expect("from frame");
        assert_eq!(msg, Message::Notification(n0));

        // unknown codes still decode
        let n = NotificationMessage::from_wire(&[42, 9, 1, 2])
            .expect("notification from wire");
        assert_eq!(n.code(), None);
        assert_eq!(n.data, vec![1, 2]);
    }

    #[test]
    fn read_frame_sequence() {
        let mut stream = Vec::new();
        stream.extend(Message::KeepAlive.to_frame().expect("keepalive"));
        stream.extend(
            Message::from(OpenMessage::new4(65002, 90, 7))
                .to_frame()
                .expect("open"),
        );
        let mut cursor = Cursor::new(stream);

        let (h, body) = read_frame(&mut cursor).expect("first frame");
        assert_eq!(h.typ, MessageType::KeepAlive);
        assert!(body.is_empty());

        let (h, body) = read_frame(&mut cursor).expect("second frame");
        assert_eq!(h.typ, MessageType::Open);
        let open = OpenMessage::from_wire(&body).expect("open from wire");
        assert_eq!(open.asn(), 65002);

        assert!(matches!(read_frame(&mut cursor), Err(Error::Io(_))));
    }
}
