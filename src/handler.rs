use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use anyhow::Context;
use async_trait::async_trait;
use dnswire::{Message, Opcode, QueryClass, QueryType, Record, RecordData, ResponseCode};

/// Application logic behind the server.
///
/// Called once per decoded query, each call on its own task. Returning an error drops the
/// request without a reply.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, query: Message, src: SocketAddr) -> anyhow::Result<Message>;
}

/// `name=address`, as given to `--host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub name: String,
    pub addr: IpAddr,
}

impl FromStr for HostEntry {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, addr) = s
            .split_once('=')
            .with_context(|| format!("expected name=address, got {:?}", s))?;
        let addr = addr
            .trim()
            .parse()
            .with_context(|| format!("invalid address in {:?}", s))?;

        Ok(HostEntry {
            name: name.trim().to_string(),
            addr,
        })
    }
}

/// Answers A/AAAA/ANY queries authoritatively from a fixed table of names.
#[derive(Debug, Clone)]
pub struct StaticHandler {
    hosts: HashMap<String, Vec<IpAddr>>,
    ttl: u32,
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

impl StaticHandler {
    pub fn new(ttl: u32) -> StaticHandler {
        StaticHandler {
            hosts: HashMap::new(),
            ttl,
        }
    }

    pub fn insert(&mut self, name: &str, addr: IpAddr) {
        self.hosts.entry(normalize(name)).or_default().push(addr);
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn answer(&self, query: &Message) -> Message {
        let mut response = Message::response_to(query);
        response.header.authoritative_answer = true;

        response.header.rescode = if query.header.opcode != Opcode::QUERY {
            ResponseCode::NOTIMP
        } else if query.questions.len() != 1 {
            ResponseCode::FORMERR
        } else if !matches!(query.questions[0].qclass, QueryClass::IN | QueryClass::ANY) {
            ResponseCode::REFUSED
        } else {
            let question = &query.questions[0];

            match self.hosts.get(&normalize(&question.name)) {
                None => ResponseCode::NXDOMAIN,
                Some(addrs) => {
                    response.answers = addrs
                        .iter()
                        .filter_map(|addr| match (question.qtype, addr) {
                            (QueryType::A, IpAddr::V4(v4)) | (QueryType::ANY, IpAddr::V4(v4)) => {
                                Some(RecordData::A(*v4))
                            }
                            (QueryType::AAAA, IpAddr::V6(v6))
                            | (QueryType::ANY, IpAddr::V6(v6)) => Some(RecordData::AAAA(*v6)),
                            _ => None,
                        })
                        .map(|data| Record::new(question.name.as_str(), self.ttl, data))
                        .collect();
                    // a known name without records of the asked type is NODATA, not NXDOMAIN
                    ResponseCode::NOERROR
                }
            }
        };

        response.sync_counts();
        response
    }
}

impl Extend<HostEntry> for StaticHandler {
    fn extend<T: IntoIterator<Item = HostEntry>>(&mut self, iter: T) {
        for entry in iter {
            self.insert(&entry.name, entry.addr);
        }
    }
}

#[async_trait]
impl RequestHandler for StaticHandler {
    async fn handle(&self, query: Message, _src: SocketAddr) -> anyhow::Result<Message> {
        Ok(self.answer(&query))
    }
}
