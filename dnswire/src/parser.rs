use std::{
    convert::TryFrom,
    net::{Ipv4Addr, Ipv6Addr},
};

use nom::{
    bytes::complete::take as take_bytes,
    error::{ErrorKind, ParseError},
    multi::{count, many0},
    number::complete::{be_u16, be_u32, be_u8},
    Err as NomErr, IResult,
};

use crate::{
    error::CodecError,
    name::read_name,
    types::{
        Header, Message, Opcode, QueryClass, QueryType, Question, Record, RecordData,
        ResponseCode, Soa,
    },
};

// Every parser below is handed sub-slices of the original message and locates them through
// `offset_in`, so errors can always be reported as positions in the whole message.
#[derive(Debug)]
pub struct WireError<'a> {
    input: &'a [u8],
    kind: WireErrorKind,
}

#[derive(Debug)]
enum WireErrorKind {
    Nom,
    Codec(CodecError),
}

impl<'a> ParseError<&'a [u8]> for WireError<'a> {
    fn from_error_kind(input: &'a [u8], _kind: ErrorKind) -> Self {
        WireError {
            input,
            kind: WireErrorKind::Nom,
        }
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> WireError<'a> {
    fn codec(input: &'a [u8], error: CodecError) -> Self {
        WireError {
            input,
            kind: WireErrorKind::Codec(error),
        }
    }

    // The only way the complete number and take parsers fail is running out of input.
    fn into_codec_error(self, original: &[u8]) -> CodecError {
        match self.kind {
            WireErrorKind::Codec(error) => error,
            WireErrorKind::Nom => CodecError::Truncated {
                offset: offset_in(original, self.input),
            },
        }
    }

    // Running out of record data while its length said it was all there means the data is too
    // short for its type, not that the message was cut off.
    fn within_record_data(self, original: &[u8]) -> Self {
        let offset = offset_in(original, self.input);
        match self.kind {
            WireErrorKind::Nom | WireErrorKind::Codec(CodecError::Truncated { .. }) => {
                WireError::codec(
                    self.input,
                    CodecError::Malformed {
                        offset,
                        reason: "record data is shorter than its type requires",
                    },
                )
            }
            WireErrorKind::Codec(_) => self,
        }
    }
}

type WireResult<'a, O> = IResult<&'a [u8], O, WireError<'a>>;

fn offset_in(original: &[u8], input: &[u8]) -> usize {
    input.as_ptr() as usize - original.as_ptr() as usize
}

fn fail<'a, O>(input: &'a [u8], error: CodecError) -> WireResult<'a, O> {
    Err(NomErr::Failure(WireError::codec(input, error)))
}

fn ipv4<'a>() -> impl FnMut(&'a [u8]) -> WireResult<'a, Ipv4Addr> {
    |rest| {
        let (rest, quad0) = be_u8(rest)?;
        let (rest, quad1) = be_u8(rest)?;
        let (rest, quad2) = be_u8(rest)?;
        let (rest, quad3) = be_u8(rest)?;

        Ok((rest, Ipv4Addr::new(quad0, quad1, quad2, quad3)))
    }
}

#[allow(clippy::many_single_char_names)]
fn ipv6<'a>() -> impl FnMut(&'a [u8]) -> WireResult<'a, Ipv6Addr> {
    |rest| {
        let (rest, a) = be_u16(rest)?;
        let (rest, b) = be_u16(rest)?;
        let (rest, c) = be_u16(rest)?;
        let (rest, d) = be_u16(rest)?;
        let (rest, e) = be_u16(rest)?;
        let (rest, f) = be_u16(rest)?;
        let (rest, g) = be_u16(rest)?;
        let (rest, h) = be_u16(rest)?;

        Ok((rest, Ipv6Addr::new(a, b, c, d, e, f, g, h)))
    }
}

// The name may not run past the end of `input`, which for record data is the end of RDATA.
// Pointers only ever point backwards, so cutting the message there loses nothing they can reach.
fn domain_name<'a>(original: &'a [u8]) -> impl FnMut(&'a [u8]) -> WireResult<'a, String> {
    move |input| {
        let start = offset_in(original, input);
        let end = start + input.len();

        match read_name(&original[..end], start) {
            Ok((name, next)) => Ok((&original[next..end], name)),
            Err(error) => fail(input, error),
        }
    }
}

fn character_string<'a>() -> impl FnMut(&'a [u8]) -> WireResult<'a, Vec<u8>> {
    |input| {
        let (rest, len) = be_u8(input)?;
        let (rest, text) = take_bytes(len)(rest)?;

        Ok((rest, text.to_vec()))
    }
}

fn header<'a>() -> impl FnMut(&'a [u8]) -> WireResult<'a, Header> {
    |input| {
        // network order is big endian
        let (rest, id) = be_u16(input)?;

        let (rest, a) = be_u8(rest)?;
        let (rest, b) = be_u8(rest)?;

        let recursion_desired = (a & (1 << 0)) > 0;
        let truncated_message = (a & (1 << 1)) > 0;
        let authoritative_answer = (a & (1 << 2)) > 0;
        let opcode = Opcode::from_num((a >> 3) & 0x0F);
        let response = (a & (1 << 7)) > 0;
        let rescode = ResponseCode::from_num(b & 0x0F);
        let checking_disabled = (b & (1 << 4)) > 0;
        let authed_data = (b & (1 << 5)) > 0;
        let z = (b & (1 << 6)) > 0;
        let recursion_available = (b & (1 << 7)) > 0;

        let (rest, question_count) = be_u16(rest)?;
        let (rest, answer_count) = be_u16(rest)?;
        let (rest, authority_count) = be_u16(rest)?;
        let (rest, additional_count) = be_u16(rest)?;

        let header = Header {
            id,

            response,
            opcode,
            authoritative_answer,
            truncated_message,
            recursion_desired,

            recursion_available,
            z,
            authed_data,
            checking_disabled,
            rescode,

            question_count,
            answer_count,
            authority_count,
            additional_count,
        };

        Ok((rest, header))
    }
}

fn question<'a>(original: &'a [u8]) -> impl FnMut(&'a [u8]) -> WireResult<'a, Question> {
    move |input| {
        let (rest, name) = domain_name(original)(input)?;
        let (rest, qtype) = be_u16(rest)?;
        let (rest, qclass) = be_u16(rest)?;

        let question = Question {
            name,
            qtype: QueryType::from_num(qtype),
            qclass: QueryClass::from_num(qclass),
        };

        Ok((rest, question))
    }
}

fn record_data<'a>(
    original: &'a [u8],
    qtype: QueryType,
    raw: &'a [u8],
) -> WireResult<'a, RecordData> {
    match qtype {
        QueryType::A => {
            let (rest, addr) = ipv4()(raw)?;
            Ok((rest, RecordData::A(addr)))
        }
        QueryType::NS => {
            let (rest, host) = domain_name(original)(raw)?;
            Ok((rest, RecordData::NS(host)))
        }
        QueryType::CNAME => {
            let (rest, host) = domain_name(original)(raw)?;
            Ok((rest, RecordData::CNAME(host)))
        }
        QueryType::SOA => {
            let (rest, mname) = domain_name(original)(raw)?;
            let (rest, rname) = domain_name(original)(rest)?;
            let (rest, serial) = be_u32(rest)?;
            let (rest, refresh) = be_u32(rest)?;
            let (rest, retry) = be_u32(rest)?;
            let (rest, expire) = be_u32(rest)?;
            let (rest, minimum) = be_u32(rest)?;

            let soa = Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            };
            Ok((rest, RecordData::SOA(soa)))
        }
        QueryType::PTR => {
            let (rest, host) = domain_name(original)(raw)?;
            Ok((rest, RecordData::PTR(host)))
        }
        QueryType::MX => {
            let (rest, preference) = be_u16(raw)?;
            let (rest, exchange) = domain_name(original)(rest)?;
            Ok((
                rest,
                RecordData::MX {
                    preference,
                    exchange,
                },
            ))
        }
        QueryType::TXT => {
            let (rest, strings) = many0(character_string())(raw)?;
            Ok((rest, RecordData::TXT(strings)))
        }
        QueryType::AAAA => {
            let (rest, addr) = ipv6()(raw)?;
            Ok((rest, RecordData::AAAA(addr)))
        }
        _ => Ok((
            &raw[raw.len()..],
            RecordData::UNKNOWN {
                rtype: qtype.to_num(),
                data: raw.to_vec(),
            },
        )),
    }
}

fn record<'a>(original: &'a [u8]) -> impl FnMut(&'a [u8]) -> WireResult<'a, Record> {
    move |input| {
        let (rest, name) = domain_name(original)(input)?;
        let (rest, rtype) = be_u16(rest)?;
        let (rest, class) = be_u16(rest)?;
        let (rest, ttl) = be_u32(rest)?;
        let (rest, data_len) = be_u16(rest)?;
        let (rest, raw) = take_bytes(data_len)(rest)?;

        let data = match record_data(original, QueryType::from_num(rtype), raw) {
            Ok(([], data)) => data,
            Ok((extra, _)) => {
                return fail(
                    extra,
                    CodecError::Malformed {
                        offset: offset_in(original, extra),
                        reason: "record data is longer than its type requires",
                    },
                )
            }
            Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => {
                return Err(NomErr::Failure(e.within_record_data(original)))
            }
            Err(NomErr::Incomplete(_)) => {
                return fail(
                    raw,
                    CodecError::Malformed {
                        offset: offset_in(original, raw),
                        reason: "record data is shorter than its type requires",
                    },
                )
            }
        };

        let record = Record {
            name,
            class: QueryClass::from_num(class),
            ttl,
            data,
        };

        Ok((rest, record))
    }
}

fn message(original: &[u8]) -> WireResult<'_, Message> {
    let (rest, header) = header()(original)?;
    let (rest, questions) = count(question(original), header.question_count as usize)(rest)?;
    let (rest, answers) = count(record(original), header.answer_count as usize)(rest)?;
    let (rest, authorities) = count(record(original), header.authority_count as usize)(rest)?;
    let (rest, additionals) = count(record(original), header.additional_count as usize)(rest)?;

    let message = Message {
        header,
        questions,
        answers,
        authorities,
        additionals,
    };

    Ok((rest, message))
}

impl Message {
    /// Decodes a complete message. Every declared entry must be present and nothing may follow
    /// the last one.
    pub fn decode(buf: &[u8]) -> Result<Message, CodecError> {
        match message(buf) {
            Ok(([], message)) => Ok(message),
            Ok((rest, _)) => Err(CodecError::Malformed {
                offset: offset_in(buf, rest),
                reason: "trailing bytes after the last section",
            }),
            Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => Err(e.into_codec_error(buf)),
            Err(NomErr::Incomplete(_)) => Err(CodecError::Truncated { offset: buf.len() }),
        }
    }
}

impl<'a> TryFrom<&'a [u8]> for Message {
    type Error = CodecError;

    fn try_from(value: &'a [u8]) -> Result<Self, Self::Error> {
        Message::decode(value)
    }
}
