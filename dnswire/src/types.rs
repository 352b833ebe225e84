use std::convert::TryFrom;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use typed_builder::TypedBuilder;

// All communications inside of the domain protocol are carried in a single
// format called a message.  The top level format of message is divided
// into 5 sections (some of which are empty in certain cases) shown below:
//
//     +---------------------+
//     |        Header       |
//     +---------------------+
//     |       Question      | the question for the name server
//     +---------------------+
//     |        Answer       | RRs answering the question
//     +---------------------+
//     |      Authority      | RRs pointing toward an authority
//     +---------------------+
//     |      Additional     | RRs holding additional information
//     +---------------------+
//
// A decoded message owns all of its names and record data, so it can outlive
// the buffer it was read from.
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct Message {
    pub header: Header,

    #[builder(default = vec![])]
    pub questions: Vec<Question>,
    #[builder(default = vec![])]
    pub answers: Vec<Record>,
    #[builder(default = vec![])]
    pub authorities: Vec<Record>,
    #[builder(default = vec![])]
    pub additionals: Vec<Record>,
}

// The header contains the following fields:
//                                  1  1  1  1  1  1
//    0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                      ID                       |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |QR|   Opcode  |AA|TC|RD|RA| Z|AD|CD|   RCODE   |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                    QDCOUNT                    |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                    ANCOUNT                    |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                    NSCOUNT                    |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                    ARCOUNT                    |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct Header {
    // A random identifier is assigned to query packets. Response packets must reply with the same
    // id. This is needed to differentiate responses due to the stateless nature of UDP.
    pub id: u16,

    // 0 for queries, 1 for responses.
    #[builder(default = false)]
    pub response: bool,
    // Set by the originator of a query and copied into the response.
    #[builder(default = Opcode::QUERY)]
    pub opcode: Opcode,
    // Authoritative Answer - this bit is valid in responses, and specifies that the responding
    // name server is an authority for the domain name in question section.
    #[builder(default = false)]
    pub authoritative_answer: bool,
    // TrunCation - specifies that this message was truncated due to length greater than that
    // permitted on the transmission channel.
    #[builder(default = false)]
    pub truncated_message: bool,
    // Recursion Desired - this bit may be set in a query and is copied into the response.
    #[builder(default = false)]
    pub recursion_desired: bool,

    // Recursion Available - set or cleared in a response, and denotes whether recursive query
    // support is available in the name server.
    #[builder(default = false)]
    pub recursion_available: bool,
    // The three bits RFC 1035 reserves as Z. RFC 4035 later assigned the lower two to AD and CD.
    #[builder(default = false)]
    pub z: bool,
    #[builder(default = false)]
    pub authed_data: bool,
    #[builder(default = false)]
    pub checking_disabled: bool,
    #[builder(default = ResponseCode::NOERROR)]
    pub rescode: ResponseCode, // 4 bits

    // The number of entries in the Question Section
    #[builder(default = 0)]
    pub question_count: u16,
    // The number of entries in the Answer Section
    #[builder(default = 0)]
    pub answer_count: u16,
    // The number of entries in the Authority Section
    #[builder(default = 0)]
    pub authority_count: u16,
    // The number of entries in the Additional Section
    #[builder(default = 0)]
    pub additional_count: u16,
}

impl Header {
    pub fn flags(&self) -> u16 {
        u16::from(self.rescode.to_num() & 0x0F)
            | ((self.checking_disabled as u16) << 4)
            | ((self.authed_data as u16) << 5)
            | ((self.z as u16) << 6)
            | ((self.recursion_available as u16) << 7)
            | ((self.recursion_desired as u16) << 8)
            | ((self.truncated_message as u16) << 9)
            | ((self.authoritative_answer as u16) << 10)
            | (u16::from(self.opcode.to_num() & 0x0F) << 11)
            | ((self.response as u16) << 15)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    // a standard query
    QUERY,
    // an inverse query, obsoleted by RFC 3425
    IQUERY,
    // a server status request
    STATUS,
    NOTIFY,
    UPDATE,
    UNKNOWN(u8),
}

impl Opcode {
    pub fn to_num(self) -> u8 {
        match self {
            Opcode::QUERY => 0,
            Opcode::IQUERY => 1,
            Opcode::STATUS => 2,
            Opcode::NOTIFY => 4,
            Opcode::UPDATE => 5,
            Opcode::UNKNOWN(x) => x,
        }
    }

    pub fn from_num(num: u8) -> Opcode {
        match num {
            0 => Opcode::QUERY,
            1 => Opcode::IQUERY,
            2 => Opcode::STATUS,
            4 => Opcode::NOTIFY,
            5 => Opcode::UPDATE,
            _ => Opcode::UNKNOWN(num),
        }
    }
}

//  Response code - this 4 bit field is set as part of responses.  The values have the following
//  interpretation:
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    // No error condition
    NOERROR,
    // Format error - The name server was unable to interpret the query.
    FORMERR,
    // Server failure - The name server was unable to process this query due to a problem with the
    // name server.
    SERVFAIL,
    // Name Error - Meaningful only for responses from an authoritative name server, this code
    // signifies that the domain name referenced in the query does not exist.
    NXDOMAIN,
    // Not Implemented - The name server does not support the requested kind of query.
    NOTIMP,
    // Refused - The name server refuses to perform the specified operation for policy reasons.
    REFUSED,
    // 6-10 come from dynamic update (RFC 2136).
    YXDOMAIN,
    YXRRSET,
    NXRRSET,
    NOTAUTH,
    NOTZONE,
    UNKNOWN(u8),
}

impl ResponseCode {
    pub fn to_num(self) -> u8 {
        match self {
            ResponseCode::NOERROR => 0,
            ResponseCode::FORMERR => 1,
            ResponseCode::SERVFAIL => 2,
            ResponseCode::NXDOMAIN => 3,
            ResponseCode::NOTIMP => 4,
            ResponseCode::REFUSED => 5,
            ResponseCode::YXDOMAIN => 6,
            ResponseCode::YXRRSET => 7,
            ResponseCode::NXRRSET => 8,
            ResponseCode::NOTAUTH => 9,
            ResponseCode::NOTZONE => 10,
            ResponseCode::UNKNOWN(x) => x,
        }
    }

    pub fn from_num(num: u8) -> ResponseCode {
        match num {
            0 => ResponseCode::NOERROR,
            1 => ResponseCode::FORMERR,
            2 => ResponseCode::SERVFAIL,
            3 => ResponseCode::NXDOMAIN,
            4 => ResponseCode::NOTIMP,
            5 => ResponseCode::REFUSED,
            6 => ResponseCode::YXDOMAIN,
            7 => ResponseCode::YXRRSET,
            8 => ResponseCode::NXRRSET,
            9 => ResponseCode::NOTAUTH,
            10 => ResponseCode::NOTZONE,
            _ => ResponseCode::UNKNOWN(num),
        }
    }
}

// The question section is used to carry the "question" in most queries, i.e., the parameters that
// define what is being asked.  The section contains QDCOUNT (usually 1) entries, each of the
// following format:
//                                  1  1  1  1  1  1
//    0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                                               |
//  /                     QNAME                     /
//  /                                               /
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                     QTYPE                     |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//  |                     QCLASS                    |
//  +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    // Labels joined by dots, without the trailing root dot. The root name is "".
    pub name: String,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: QueryType) -> Question {
        Question {
            name: name.into(),
            qtype,
            qclass: QueryClass::IN,
        }
    }
}

// Type codes are kept verbatim; the named variants are only a convenience and any other value
// survives a decode/encode cycle as UNKNOWN.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy)]
pub enum QueryType {
    UNKNOWN(u16),
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    OPT,
    ANY,
}

impl QueryType {
    pub fn to_num(self) -> u16 {
        match self {
            QueryType::UNKNOWN(x) => x,
            QueryType::A => 1,
            QueryType::NS => 2,
            QueryType::CNAME => 5,
            QueryType::SOA => 6,
            QueryType::PTR => 12,
            QueryType::MX => 15,
            QueryType::TXT => 16,
            QueryType::AAAA => 28,
            QueryType::OPT => 41,
            QueryType::ANY => 255,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::NS,
            5 => QueryType::CNAME,
            6 => QueryType::SOA,
            12 => QueryType::PTR,
            15 => QueryType::MX,
            16 => QueryType::TXT,
            28 => QueryType::AAAA,
            41 => QueryType::OPT,
            255 => QueryType::ANY,
            _ => QueryType::UNKNOWN(num),
        }
    }
}

/// Mnemonics (`"AAAA"`, `"mx"`) or plain type codes (`"65"`).
impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let qtype = match s.to_ascii_uppercase().as_str() {
            "A" => QueryType::A,
            "NS" => QueryType::NS,
            "CNAME" => QueryType::CNAME,
            "SOA" => QueryType::SOA,
            "PTR" => QueryType::PTR,
            "MX" => QueryType::MX,
            "TXT" => QueryType::TXT,
            "AAAA" => QueryType::AAAA,
            "OPT" => QueryType::OPT,
            "ANY" | "*" => QueryType::ANY,
            other => other
                .parse()
                .map(QueryType::from_num)
                .map_err(|_| format!("unknown record type {:?}", s))?,
        };
        Ok(qtype)
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy)]
pub enum QueryClass {
    UNKNOWN(u16),
    // the Internet
    IN,
    // the CHAOS class
    CH,
    // Hesiod
    HS,
    ANY,
}

impl QueryClass {
    pub fn to_num(self) -> u16 {
        match self {
            QueryClass::UNKNOWN(x) => x,
            QueryClass::IN => 1,
            QueryClass::CH => 3,
            QueryClass::HS => 4,
            QueryClass::ANY => 255,
        }
    }

    pub fn from_num(num: u16) -> QueryClass {
        match num {
            1 => QueryClass::IN,
            3 => QueryClass::CH,
            4 => QueryClass::HS,
            255 => QueryClass::ANY,
            _ => QueryClass::UNKNOWN(num),
        }
    }
}

// The answer, authority, and additional sections all share the same format: a variable number of
// resource records, where the number of records is specified in the corresponding count field in
// the header.  Each resource record has the following format:
//                                     1  1  1  1  1  1
//       0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
//     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//     |                                               |
//     /                                               /
//     /                      NAME                     /
//     |                                               |
//     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//     |                      TYPE                     |
//     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//     |                     CLASS                     |
//     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//     |                      TTL                      |
//     |                                               |
//     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//     |                   RDLENGTH                    |
//     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--|
//     /                     RDATA                     /
//     /                                               /
//     +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
//
// TYPE comes from the data variant and RDLENGTH is computed when the record is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub name: String,
    pub class: QueryClass,
    pub ttl: u32,
    pub data: RecordData,
}

// | ID | Name  | Encoding                                           |
// |----+-------+----------------------------------------------------|
// | 1  | A     | Four bytes for IPv4 address                        |
// | 2  | NS    | Label Sequence                                     |
// | 5  | CNAME | Label Sequence                                     |
// | 6  | SOA   | Two Label Sequences + five 32-bit integers         |
// | 12 | PTR   | Label Sequence                                     |
// | 15 | MX    | 2-bytes for preference + Label Sequence            |
// | 16 | TXT   | One or more length-prefixed character strings      |
// | 28 | AAAA  | Sixteen bytes for IPv6 address                     |
//
// Everything else, OPT included, is carried as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordData {
    A(Ipv4Addr),
    NS(String),
    CNAME(String),
    SOA(Soa),
    PTR(String),
    MX { preference: u16, exchange: String },
    TXT(Vec<Vec<u8>>),
    AAAA(Ipv6Addr),
    UNKNOWN { rtype: u16, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Soa {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Record {
    pub fn new(name: impl Into<String>, ttl: u32, data: RecordData) -> Record {
        Record {
            name: name.into(),
            class: QueryClass::IN,
            ttl,
            data,
        }
    }

    pub fn rtype(&self) -> QueryType {
        match &self.data {
            RecordData::A(_) => QueryType::A,
            RecordData::NS(_) => QueryType::NS,
            RecordData::CNAME(_) => QueryType::CNAME,
            RecordData::SOA(_) => QueryType::SOA,
            RecordData::PTR(_) => QueryType::PTR,
            RecordData::MX { .. } => QueryType::MX,
            RecordData::TXT(_) => QueryType::TXT,
            RecordData::AAAA(_) => QueryType::AAAA,
            RecordData::UNKNOWN { rtype, .. } => QueryType::from_num(*rtype),
        }
    }
}

impl Message {
    /// Starts a response to `query`: same id and opcode, RD copied, the questions echoed back.
    pub fn response_to(query: &Message) -> Message {
        let mut response = Message::builder()
            .header(
                Header::builder()
                    .id(query.header.id)
                    .response(true)
                    .opcode(query.header.opcode)
                    .recursion_desired(query.header.recursion_desired)
                    .build(),
            )
            .questions(query.questions.clone())
            .build();
        response.sync_counts();
        response
    }

    /// Sets the four header counts from the section lengths.
    ///
    /// A section longer than `u16::MAX` saturates, which `encode` then reports as inconsistent.
    pub fn sync_counts(&mut self) {
        fn count(len: usize) -> u16 {
            u16::try_from(len).unwrap_or(u16::MAX)
        }
        self.header.question_count = count(self.questions.len());
        self.header.answer_count = count(self.answers.len());
        self.header.authority_count = count(self.authorities.len());
        self.header.additional_count = count(self.additionals.len());
    }

    pub fn has_answers(&self) -> bool {
        !self.answers.is_empty()
    }

    pub fn rescode(&self) -> ResponseCode {
        self.header.rescode
    }

    /// The UDP payload size advertised by an EDNS0 OPT record, which carries it in the class field.
    pub fn edns_payload_size(&self) -> Option<u16> {
        self.additionals
            .iter()
            .find(|record| record.rtype() == QueryType::OPT)
            .map(|record| record.class.to_num())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_type_from_str() {
        assert_eq!("aaaa".parse::<QueryType>(), Ok(QueryType::AAAA));
        assert_eq!("MX".parse::<QueryType>(), Ok(QueryType::MX));
        assert_eq!("28".parse::<QueryType>(), Ok(QueryType::AAAA));
        assert_eq!("65".parse::<QueryType>(), Ok(QueryType::UNKNOWN(65)));
        assert!("bogus".parse::<QueryType>().is_err());
    }

    #[test]
    fn flags_pack_every_field() {
        let header = Header::builder()
            .id(1)
            .response(true)
            .opcode(Opcode::UNKNOWN(0x0F))
            .authoritative_answer(true)
            .recursion_desired(true)
            .rescode(ResponseCode::UNKNOWN(0x0F))
            .build();

        assert_eq!(header.flags(), 0b1111_1101_0000_1111);
    }

    #[test]
    fn numeric_codes_are_preserved() {
        for num in 0..=u16::MAX {
            assert_eq!(QueryType::from_num(num).to_num(), num);
            assert_eq!(QueryClass::from_num(num).to_num(), num);
        }
        for num in 0..16 {
            assert_eq!(Opcode::from_num(num).to_num(), num);
            assert_eq!(ResponseCode::from_num(num).to_num(), num);
        }
    }

    #[test]
    fn response_to_echoes_the_query() {
        let query = Message::builder()
            .header(
                Header::builder()
                    .id(0x5643)
                    .recursion_desired(true)
                    .question_count(1)
                    .build(),
            )
            .questions(vec![Question::new("www.google.com", QueryType::A)])
            .build();

        let response = Message::response_to(&query);

        assert_eq!(response.header.id, 0x5643);
        assert!(response.header.response);
        assert!(response.header.recursion_desired);
        assert_eq!(response.header.question_count, 1);
        assert_eq!(response.questions, query.questions);
        assert_eq!(response.rescode(), ResponseCode::NOERROR);
    }

    #[test]
    fn edns_payload_size_reads_the_opt_class() {
        let mut message = Message::builder()
            .header(Header::builder().id(1).build())
            .additionals(vec![Record {
                name: String::new(),
                class: QueryClass::UNKNOWN(1232),
                ttl: 0,
                data: RecordData::UNKNOWN {
                    rtype: 41,
                    data: vec![],
                },
            }])
            .build();
        message.sync_counts();

        assert_eq!(message.edns_payload_size(), Some(1232));
        assert_eq!(message.header.additional_count, 1);
    }
}
