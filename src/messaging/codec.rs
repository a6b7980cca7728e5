//! The wire format. Every message is exactly one datagram, so there is no framing: a datagram
//!  is a version byte, a message kind, the message's fields and a CRC-64 trailer over everything
//!  before it.

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::config::MAX_DATAGRAM_SIZE;
use crate::error::DecodeError;
use crate::messaging::message::{AuthCredentials, ErrorDetail, ErrorKind, Message, Request, RequestBody, Response, ResponseKind};
use crate::messaging::request_id::RequestId;
use crate::model::ticket::Ticket;
use crate::util::buf_ext::{BufExt, BufMutExt};


pub const PROTOCOL_VERSION: u8 = 1;

const HEADER_LEN: usize = 2;
const CHECKSUM_LEN: usize = size_of::<u64>();

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
enum MessageKind {
    Request = 1,
    Response = 2,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
enum BodyKind {
    Args = 1,
    WithTicket = 2,
}

fn checksum(data: &[u8]) -> u64 {
    Crc::<u64>::new(&crc::CRC_64_REDIS).checksum(data)
}

/// Encodes a message, failing if it does not fit into a single datagram
pub fn encode(message: &Message) -> anyhow::Result<Bytes> {
    encode_bounded(message, MAX_DATAGRAM_SIZE)
}

pub fn encode_bounded(message: &Message, max_size: usize) -> anyhow::Result<Bytes> {
    let mut buf = BytesMut::with_capacity(256);
    buf.put_u8(PROTOCOL_VERSION);
    match message {
        Message::Request(request) => {
            buf.put_u8(MessageKind::Request.into());
            ser_request(request, &mut buf);
        }
        Message::Response(response) => {
            buf.put_u8(MessageKind::Response.into());
            ser_response(response, &mut buf);
        }
    }
    let crc = checksum(&buf);
    buf.put_u64(crc);

    if buf.len() > max_size {
        bail!("encoded {} is {} bytes, exceeding the maximum datagram size of {}", message.name(), buf.len(), max_size);
    }
    Ok(buf.freeze())
}

pub fn decode(datagram: &[u8]) -> Result<Message, DecodeError> {
    if datagram.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(DecodeError::Truncated);
    }
    if datagram[0] != PROTOCOL_VERSION {
        return Err(DecodeError::UnsupportedVersion(datagram[0]));
    }

    let (content, mut trailer) = datagram.split_at(datagram.len() - CHECKSUM_LEN);
    let expected = trailer.try_get_u64()?;
    let actual = checksum(content);
    if expected != actual {
        return Err(DecodeError::ChecksumMismatch { expected, actual });
    }

    let mut buf = &content[1..];
    let raw_kind = buf.try_get_u8()?;
    let message = match MessageKind::try_from_primitive(raw_kind) {
        Ok(MessageKind::Request) => Message::Request(try_deser_request(&mut buf)?),
        Ok(MessageKind::Response) => Message::Response(try_deser_response(&mut buf)?),
        Err(_) => return Err(DecodeError::InvalidDiscriminator { what: "message kind", value: raw_kind }),
    };

    if buf.has_remaining() {
        return Err(DecodeError::TrailingBytes(buf.remaining()));
    }
    Ok(message)
}

pub fn decode_request(datagram: &[u8]) -> Result<Request, DecodeError> {
    match decode(datagram)? {
        Message::Request(request) => Ok(request),
        other => Err(DecodeError::UnexpectedMessage { expected: "request", actual: other.name() }),
    }
}

pub fn decode_response(datagram: &[u8]) -> Result<Response, DecodeError> {
    match decode(datagram)? {
        Message::Response(response) => Ok(response),
        other => Err(DecodeError::UnexpectedMessage { expected: "response", actual: other.name() }),
    }
}

fn ser_auth(auth: Option<&AuthCredentials>, buf: &mut impl BufMut) {
    buf.put_option(auth, |buf, a| {
        buf.put_string(&a.username);
        buf.put_string(&a.password);
    });
}

fn try_deser_auth(buf: &mut impl Buf) -> Result<Option<AuthCredentials>, DecodeError> {
    buf.try_get_option(|b| Ok(AuthCredentials {
        username: b.try_get_string()?,
        password: b.try_get_string()?,
    }))
}

fn ser_request(request: &Request, buf: &mut impl BufMut) {
    request.request_id().ser(buf);
    buf.put_string(request.command_name());
    match request.body() {
        RequestBody::Args(args) => {
            buf.put_u8(BodyKind::Args.into());
            buf.put_string_list(args);
        }
        RequestBody::WithTicket { args, ticket } => {
            buf.put_u8(BodyKind::WithTicket.into());
            buf.put_string_list(args);
            ticket.ser(buf);
        }
    }
    ser_auth(request.auth(), buf);
}

fn try_deser_request(buf: &mut impl Buf) -> Result<Request, DecodeError> {
    let request_id = RequestId::try_deser(buf)?;
    let command_name = buf.try_get_string()?;

    let raw_body_kind = buf.try_get_u8()?;
    let body = match BodyKind::try_from_primitive(raw_body_kind) {
        Ok(BodyKind::Args) => RequestBody::Args(buf.try_get_string_list()?),
        Ok(BodyKind::WithTicket) => {
            let args = buf.try_get_string_list()?;
            let ticket = Ticket::try_deser(buf)?;
            RequestBody::WithTicket { args, ticket }
        }
        Err(_) => return Err(DecodeError::InvalidDiscriminator { what: "request body", value: raw_body_kind }),
    };

    let auth = try_deser_auth(buf)?;
    Ok(Request::with_id(request_id, command_name, body, auth))
}

fn ser_response(response: &Response, buf: &mut impl BufMut) {
    buf.put_u8(response.kind().into());
    buf.put_option(response.request_id().as_ref(), |buf, id| id.ser(buf));
    buf.put_string(response.message());
    buf.put_option(response.tickets(), |buf, tickets| Ticket::ser_list(tickets, buf));
    buf.put_option(response.error_detail(), |buf, e| {
        buf.put_u8(e.kind.into());
        buf.put_string(&e.message);
    });
    ser_auth(response.auth(), buf);
}

fn try_deser_response(buf: &mut impl Buf) -> Result<Response, DecodeError> {
    let raw_kind = buf.try_get_u8()?;
    let kind = ResponseKind::try_from_primitive(raw_kind)
        .map_err(|_| DecodeError::InvalidDiscriminator { what: "response kind", value: raw_kind })?;
    let request_id = buf.try_get_option(|b| RequestId::try_deser(b))?;
    let message = buf.try_get_string()?;
    let tickets = buf.try_get_option(|b| Ticket::try_deser_list(b))?;
    let error = buf.try_get_option(|b| {
        let raw_error_kind = b.try_get_u8()?;
        let kind = ErrorKind::try_from_primitive(raw_error_kind)
            .map_err(|_| DecodeError::InvalidDiscriminator { what: "error kind", value: raw_error_kind })?;
        Ok(ErrorDetail { kind, message: b.try_get_string()? })
    })?;
    let auth = try_deser_auth(buf)?;

    Ok(Response::from_parts(kind, message, tickets, request_id, error, auth))
}
