use log::debug;
use std::{net::UdpSocket, time::Duration};
use structopt::StructOpt;

use dnsd::dnswire::{Header, Message, QueryType, Question, MAX_UDP_MESSAGE_SIZE};

fn mk_query(qname: &str, qtype: QueryType) -> Message {
    let header = Header::builder()
        .id(rand::random())
        .recursion_desired(true)
        .build();

    let mut query = Message::builder()
        .header(header)
        .questions(vec![Question::new(qname, qtype)])
        .build();
    query.sync_counts();
    query
}

#[derive(Debug, StructOpt)]
#[structopt(name = "DNS Client", about = "Search DNS records for a given query")]
struct Opt {
    #[structopt(short, long, default_value = "example.com")]
    query: String,

    /// Record type, by name or number
    #[structopt(short = "t", long = "type", default_value = "A")]
    qtype: QueryType,

    #[structopt(short, long, default_value = "127.0.0.1:2053")]
    server: String,

    /// Seconds to wait for the answer
    #[structopt(long, default_value = "5")]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opt = Opt::from_args();
    debug!("args {:?}", opt);

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(Duration::from_secs(opt.timeout)))?;

    let request = mk_query(&opt.query, opt.qtype);
    debug!("Request: {:#?}", request);

    socket.send_to(&request.encode(MAX_UDP_MESSAGE_SIZE)?, opt.server.as_str())?;

    let mut response_buffer = vec![0u8; 4096];
    let (size, src) = socket.recv_from(&mut response_buffer)?;
    debug!("{} bytes from {}", size, src);

    let response = Message::decode(&response_buffer[..size])?;
    anyhow::ensure!(
        response.header.id == request.header.id,
        "response id {} does not match query id {}",
        response.header.id,
        request.header.id
    );

    print_packet(&response);

    Ok(())
}

pub fn print_packet(packet: &Message) {
    println!("{:#?}", packet.header);

    for q in &packet.questions {
        println!("{:#?}", q);
    }
    for rec in &packet.answers {
        println!("{:#?}", rec);
    }
    for rec in &packet.authorities {
        println!("{:#?}", rec);
    }
    for rec in &packet.additionals {
        println!("{:#?}", rec);
    }
}
