use std::convert::TryFrom;

use crate::{
    error::{CodecError, Section},
    name::{parse_labels, MAX_LABEL_LEN, MAX_NAME_LEN},
    types::{Header, Message, QueryType, Question, Record, RecordData},
    MAX_UDP_MESSAGE_SIZE,
};

struct BytePacketBuffer {
    buf: Vec<u8>,
}

impl BytePacketBuffer {
    fn new() -> BytePacketBuffer {
        BytePacketBuffer {
            buf: Vec::with_capacity(MAX_UDP_MESSAGE_SIZE),
        }
    }

    fn pos(&self) -> usize {
        self.buf.len()
    }

    fn write_u8(&mut self, val: u8) {
        self.buf.push(val);
    }

    fn write_u16(&mut self, val: u16) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    fn write_u32(&mut self, val: u32) {
        self.buf.extend_from_slice(&val.to_be_bytes());
    }

    fn write_bytes(&mut self, val: &[u8]) {
        self.buf.extend_from_slice(val);
    }

    // Names go out uncompressed, written from master file notation (see `name::parse_labels`).
    fn write_qname(&mut self, qname: &str) -> Result<(), CodecError> {
        let labels = parse_labels(qname).map_err(|reason| CodecError::Malformed {
            offset: self.pos(),
            reason,
        })?;

        let mut wire_len = 1;
        for label in &labels {
            let len = label.len();
            if len == 0 {
                return Err(CodecError::Malformed {
                    offset: self.pos() + wire_len - 1,
                    reason: "empty label in name",
                });
            }
            if len > MAX_LABEL_LEN {
                return Err(CodecError::Oversized {
                    what: "label",
                    size: len,
                    limit: MAX_LABEL_LEN,
                });
            }
            wire_len += len + 1;
        }
        if wire_len > MAX_NAME_LEN {
            return Err(CodecError::Oversized {
                what: "name",
                size: wire_len,
                limit: MAX_NAME_LEN,
            });
        }

        for label in &labels {
            self.write_u8(label.len() as u8);
            self.write_bytes(label);
        }
        self.write_u8(0);

        Ok(())
    }

    fn set_u16(&mut self, pos: usize, val: u16) {
        self.buf[pos..pos + 2].copy_from_slice(&val.to_be_bytes());
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

fn write_header(header: &Header, buffer: &mut BytePacketBuffer) {
    buffer.write_u16(header.id);
    buffer.write_u16(header.flags());
    buffer.write_u16(header.question_count);
    buffer.write_u16(header.answer_count);
    buffer.write_u16(header.authority_count);
    buffer.write_u16(header.additional_count);
}

fn write_question(question: &Question, buffer: &mut BytePacketBuffer) -> Result<(), CodecError> {
    buffer.write_qname(&question.name)?;
    buffer.write_u16(question.qtype.to_num());
    buffer.write_u16(question.qclass.to_num());

    Ok(())
}

fn write_record_data(data: &RecordData, buffer: &mut BytePacketBuffer) -> Result<(), CodecError> {
    match data {
        RecordData::A(addr) => buffer.write_bytes(&addr.octets()),
        RecordData::NS(host) | RecordData::CNAME(host) | RecordData::PTR(host) => {
            buffer.write_qname(host)?
        }
        RecordData::SOA(soa) => {
            buffer.write_qname(&soa.mname)?;
            buffer.write_qname(&soa.rname)?;
            buffer.write_u32(soa.serial);
            buffer.write_u32(soa.refresh);
            buffer.write_u32(soa.retry);
            buffer.write_u32(soa.expire);
            buffer.write_u32(soa.minimum);
        }
        RecordData::MX {
            preference,
            exchange,
        } => {
            buffer.write_u16(*preference);
            buffer.write_qname(exchange)?;
        }
        RecordData::TXT(strings) => {
            for text in strings {
                let len = u8::try_from(text.len()).map_err(|_| CodecError::Oversized {
                    what: "character string",
                    size: text.len(),
                    limit: u8::MAX as usize,
                })?;
                buffer.write_u8(len);
                buffer.write_bytes(text);
            }
        }
        RecordData::AAAA(addr) => buffer.write_bytes(&addr.octets()),
        RecordData::UNKNOWN { rtype, data } => {
            // the decoder reads these codes into their own variants
            if has_typed_data(QueryType::from_num(*rtype)) {
                return Err(CodecError::Malformed {
                    offset: buffer.pos(),
                    reason: "raw record data for a type with its own variant",
                });
            }
            buffer.write_bytes(data)
        }
    }

    Ok(())
}

fn has_typed_data(rtype: QueryType) -> bool {
    match rtype {
        QueryType::A
        | QueryType::NS
        | QueryType::CNAME
        | QueryType::SOA
        | QueryType::PTR
        | QueryType::MX
        | QueryType::TXT
        | QueryType::AAAA => true,
        QueryType::OPT | QueryType::ANY | QueryType::UNKNOWN(_) => false,
    }
}

fn write_record(record: &Record, buffer: &mut BytePacketBuffer) -> Result<(), CodecError> {
    buffer.write_qname(&record.name)?;
    buffer.write_u16(record.rtype().to_num());
    buffer.write_u16(record.class.to_num());
    buffer.write_u32(record.ttl);

    let pos = buffer.pos();
    buffer.write_u16(0);

    write_record_data(&record.data, buffer)?;

    let size = buffer.pos() - (pos + 2);
    let size = u16::try_from(size).map_err(|_| CodecError::Oversized {
        what: "record data",
        size,
        limit: u16::MAX as usize,
    })?;
    buffer.set_u16(pos, size);

    Ok(())
}

impl Record {
    /// RDLENGTH of this record as it would be written.
    pub fn data_len(&self) -> Result<usize, CodecError> {
        let mut buffer = BytePacketBuffer::new();
        write_record_data(&self.data, &mut buffer)?;

        Ok(buffer.pos())
    }
}

impl Message {
    /// Encodes the message into at most `max_size` bytes.
    ///
    /// The header counts are written as given and must equal the section lengths; use
    /// [`Message::sync_counts`] to derive them.
    pub fn encode(&self, max_size: usize) -> Result<Vec<u8>, CodecError> {
        self.check_counts()?;

        let mut buffer = BytePacketBuffer::new();

        write_header(&self.header, &mut buffer);

        for question in &self.questions {
            write_question(question, &mut buffer)?;
        }

        for rec in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            write_record(rec, &mut buffer)?;
        }

        let bytes = buffer.into_inner();
        if bytes.len() > max_size {
            return Err(CodecError::Oversized {
                what: "message",
                size: bytes.len(),
                limit: max_size,
            });
        }

        Ok(bytes)
    }

    fn check_counts(&self) -> Result<(), CodecError> {
        let sections = [
            (
                Section::Question,
                self.header.question_count,
                self.questions.len(),
            ),
            (Section::Answer, self.header.answer_count, self.answers.len()),
            (
                Section::Authority,
                self.header.authority_count,
                self.authorities.len(),
            ),
            (
                Section::Additional,
                self.header.additional_count,
                self.additionals.len(),
            ),
        ];

        for &(section, declared, actual) in sections.iter() {
            if usize::from(declared) != actual {
                return Err(CodecError::Inconsistent {
                    section,
                    declared,
                    actual,
                });
            }
        }

        Ok(())
    }
}
