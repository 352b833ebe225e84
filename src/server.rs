//! UDP front end.
//!
//! A single task reads datagrams; every datagram is decoded, handled, encoded and answered on a
//! task of its own. Cancelling the token stops the reader, which then gives in-flight requests
//! up to the configured grace period before it lets go of the socket.

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use dnswire::{CodecError, Message};
use log::{log, Level};
use thiserror::Error;
use tokio::{
    net::UdpSocket,
    sync::{watch, Semaphore},
    task::{JoinError, JoinHandle},
    time,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{config::ServerConfig, handler::RequestHandler, logging::Logger};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("unable to bind UDP socket on {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("UDP transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("unable to encode response: {0}")]
    Encode(#[from] CodecError),

    #[error("request took longer than {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening,
    Stopping,
}

pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn RequestHandler>,
    logger: Logger,
    cancel: CancellationToken,
}

/// A started server. Dropping it does not stop anything; cancel the token for that.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: watch::Receiver<ServerState>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Resolves once the read loop has finished shutting down.
    pub async fn stopped(self) -> Result<(), JoinError> {
        self.task.await
    }
}

// Everything a request task needs. The last task to finish closes the socket.
struct Shared {
    socket: UdpSocket,
    handler: Arc<dyn RequestHandler>,
    logger: Logger,
    max_message_size: usize,
    request_timeout: Option<Duration>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        handler: Arc<dyn RequestHandler>,
        logger: Logger,
        cancel: CancellationToken,
    ) -> Server {
        Server {
            config,
            handler,
            logger,
            cancel,
        }
    }

    /// Binds the socket and spawns the read loop. Only a bind failure is returned; everything
    /// that goes wrong afterwards is logged.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let addr = self.config.bind_addr;
        let bind_error = |source: io::Error| ServerError::Bind { addr, source };

        let socket = UdpSocket::bind(addr).await.map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        log!(logger: &*self.logger, Level::Info, addr:% = local_addr; "listening");

        let shared = Arc::new(Shared {
            socket,
            handler: self.handler,
            logger: self.logger,
            max_message_size: self.config.max_message_size,
            request_timeout: self.config.request_timeout,
        });

        let (state_tx, state_rx) = watch::channel(ServerState::Listening);
        let task = tokio::spawn(read_loop(shared, self.config, self.cancel, state_tx));

        Ok(ServerHandle {
            local_addr,
            state: state_rx,
            task,
        })
    }
}

async fn read_loop(
    shared: Arc<Shared>,
    config: ServerConfig,
    cancel: CancellationToken,
    state: watch::Sender<ServerState>,
) {
    let tracker = TaskTracker::new();
    let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
    let mut buf = vec![0u8; config.recv_buffer_size];

    loop {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = shared.socket.recv_from(&mut buf) => match received {
                Ok((len, src)) => {
                    let datagram = buf[..len].to_vec();
                    let shared = Arc::clone(&shared);
                    tracker.spawn(async move {
                        serve(&shared, datagram, src).await;
                        drop(permit);
                    });
                }
                Err(error) => {
                    let error = ServerError::Transport(error);
                    log!(logger: &*shared.logger, Level::Error, error:% = error; "receive failed");
                }
            },
        }
    }

    state.send_replace(ServerState::Stopping);
    log!(
        logger: &*shared.logger,
        Level::Info,
        in_flight = tracker.len();
        "stop listening"
    );

    tracker.close();
    if time::timeout(config.shutdown_grace, tracker.wait())
        .await
        .is_err()
    {
        log!(
            logger: &*shared.logger,
            Level::Warn,
            grace:? = config.shutdown_grace,
            in_flight = tracker.len();
            "shutdown grace period elapsed"
        );
    }

    log!(logger: &*shared.logger, Level::Info, "stopped");
    drop(shared);
    state.send_replace(ServerState::Stopped);
}

async fn serve(shared: &Shared, datagram: Vec<u8>, src: SocketAddr) {
    // Garbage never gets a reply.
    let query = match Message::decode(&datagram) {
        Ok(query) => query,
        Err(error) => {
            log!(
                logger: &*shared.logger,
                Level::Debug,
                client:% = src,
                len = datagram.len(),
                error:% = error;
                "dropping datagram"
            );
            return;
        }
    };

    let id = query.header.id;
    let outcome = match shared.request_timeout {
        Some(limit) => time::timeout(limit, respond(shared, query, src))
            .await
            .unwrap_or(Err(ServerError::Timeout(limit))),
        None => respond(shared, query, src).await,
    };

    if let Err(error) = outcome {
        log!(
            logger: &*shared.logger,
            Level::Error,
            client:% = src,
            id = id,
            error:% = error;
            "request failed"
        );
    }
}

async fn respond(shared: &Shared, query: Message, src: SocketAddr) -> Result<(), ServerError> {
    let response = shared
        .handler
        .handle(query, src)
        .await
        .map_err(ServerError::Handler)?;
    let bytes = response.encode(shared.max_message_size)?;

    shared.socket.send_to(&bytes, src).await?;

    log!(
        logger: &*shared.logger,
        Level::Debug,
        client:% = src,
        id = response.header.id,
        rcode:? = response.rescode(),
        answers = response.answers.len();
        "answered"
    );

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handler::StaticHandler;
    use async_trait::async_trait;
    use dnswire::{Header, QueryType, Question, ResponseCode, MAX_UDP_MESSAGE_SIZE};
    use log::{
        kv::{self, Key, Value, VisitSource},
        LevelFilter, Metadata, Record,
    };
    use pretty_assertions::assert_eq;
    use std::{collections::HashMap, sync::Mutex};

    struct Event {
        level: Level,
        message: String,
        fields: HashMap<String, String>,
    }

    #[derive(Default)]
    struct Capture {
        events: Mutex<Vec<Event>>,
    }

    impl Capture {
        // Fields of every event logged at `level` with exactly this message.
        fn events(&self, level: Level, message: &str) -> Vec<HashMap<String, String>> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|event| event.level == level && event.message == message)
                .map(|event| event.fields.clone())
                .collect()
        }
    }

    struct Fields<'a>(&'a mut HashMap<String, String>);

    impl<'kvs> VisitSource<'kvs> for Fields<'_> {
        fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), kv::Error> {
            self.0.insert(key.to_string(), value.to_string());
            Ok(())
        }
    }

    impl log::Log for Capture {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            let mut fields = HashMap::new();
            record
                .key_values()
                .visit(&mut Fields(&mut fields))
                .unwrap();

            self.events.lock().unwrap().push(Event {
                level: record.level(),
                message: record.args().to_string(),
                fields,
            });
        }

        fn flush(&self) {}
    }

    // Answers everything with an empty NOERROR, optionally after a delay.
    struct Slow(Duration);

    #[async_trait]
    impl RequestHandler for Slow {
        async fn handle(&self, query: Message, _src: SocketAddr) -> anyhow::Result<Message> {
            time::sleep(self.0).await;
            Ok(Message::response_to(&query))
        }
    }

    struct Failing;

    #[async_trait]
    impl RequestHandler for Failing {
        async fn handle(&self, query: Message, _src: SocketAddr) -> anyhow::Result<Message> {
            if query.questions[0].name == "fail.example" {
                anyhow::bail!("no answer for you")
            }
            Ok(Message::response_to(&query))
        }
    }

    fn query(id: u16, name: &str) -> Vec<u8> {
        let mut query = Message::builder()
            .header(Header::builder().id(id).recursion_desired(true).build())
            .questions(vec![Question::new(name, QueryType::A)])
            .build();
        query.sync_counts();
        query.encode(MAX_UDP_MESSAGE_SIZE).unwrap()
    }

    async fn start(
        config: ServerConfig,
        handler: Arc<dyn RequestHandler>,
    ) -> (ServerHandle, Arc<Capture>, CancellationToken) {
        log::set_max_level(LevelFilter::Trace);
        let capture = Arc::new(Capture::default());
        let cancel = CancellationToken::new();
        let server = Server::new(config, handler, capture.clone(), cancel.clone());

        (server.start().await.unwrap(), capture, cancel)
    }

    async fn client() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    async fn recv(socket: &UdpSocket, within: Duration) -> Option<Message> {
        let mut buf = vec![0u8; 2048];
        match time::timeout(within, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(Message::decode(&buf[..len]).unwrap()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn answers_with_the_same_transaction_id() {
        let mut hosts = StaticHandler::new(30);
        hosts.insert("www.example.com", "192.0.2.7".parse().unwrap());
        let (handle, _capture, cancel) = start(ServerConfig::default(), Arc::new(hosts)).await;
        assert_eq!(handle.state(), ServerState::Listening);
        assert!(handle.local_addr().ip().is_loopback());
        assert_ne!(handle.local_addr().port(), 0);

        let client = client().await;
        client
            .send_to(&query(0x5643, "www.example.com"), handle.local_addr())
            .await
            .unwrap();
        let response = recv(&client, Duration::from_secs(5)).await.unwrap();

        assert_eq!(response.header.id, 0x5643);
        assert!(response.header.response);
        assert_eq!(response.rescode(), ResponseCode::NOERROR);
        assert_eq!(response.answers.len(), 1);

        cancel.cancel();
        handle.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn garbage_is_dropped_without_a_reply() {
        let (handle, capture, cancel) =
            start(ServerConfig::default(), Arc::new(Slow(Duration::ZERO))).await;

        let client = client().await;
        client.send_to(&[0xde, 0xad], handle.local_addr()).await.unwrap();

        assert!(recv(&client, Duration::from_millis(300)).await.is_none());
        let client_addr = client.local_addr().unwrap().to_string();
        let dropped = capture.events(Level::Debug, "dropping datagram");
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0]["client"], client_addr);
        assert_eq!(dropped[0]["len"], "2");
        assert_eq!(dropped[0]["error"], "message truncated at offset 2");

        // and the loop keeps going
        client
            .send_to(&query(9, "still.alive"), handle.local_addr())
            .await
            .unwrap();
        assert_eq!(
            recv(&client, Duration::from_secs(5)).await.map(|m| m.header.id),
            Some(9)
        );

        cancel.cancel();
        handle.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn handler_failure_only_affects_its_request() {
        let (handle, capture, cancel) = start(ServerConfig::default(), Arc::new(Failing)).await;

        let client = client().await;
        client
            .send_to(&query(1, "fail.example"), handle.local_addr())
            .await
            .unwrap();
        client
            .send_to(&query(2, "ok.example"), handle.local_addr())
            .await
            .unwrap();

        let response = recv(&client, Duration::from_secs(5)).await.unwrap();
        assert_eq!(response.header.id, 2);
        assert!(recv(&client, Duration::from_millis(200)).await.is_none());
        let failed = capture.events(Level::Error, "request failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["id"], "1");
        assert_eq!(failed[0]["error"], "handler failed: no answer for you");

        cancel.cancel();
        handle.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn slow_requests_hit_the_deadline() {
        let config = ServerConfig::builder()
            .request_timeout(Some(Duration::from_millis(50)))
            .build();
        let (handle, capture, cancel) =
            start(config, Arc::new(Slow(Duration::from_secs(2)))).await;

        let client = client().await;
        client
            .send_to(&query(3, "slow.example"), handle.local_addr())
            .await
            .unwrap();

        assert!(recv(&client, Duration::from_millis(500)).await.is_none());
        let failed = capture.events(Level::Error, "request failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0]["id"], "3");
        assert_eq!(failed[0]["error"], "request took longer than 50ms");

        cancel.cancel();
        handle.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn oversized_responses_are_not_sent() {
        let mut hosts = StaticHandler::new(30);
        for i in 0..40 {
            hosts.insert("big.example", format!("192.0.2.{}", i).parse().unwrap());
        }
        let config = ServerConfig::builder().max_message_size(100).build();
        let (handle, capture, cancel) = start(config, Arc::new(hosts)).await;

        let client = client().await;
        client
            .send_to(&query(4, "big.example"), handle.local_addr())
            .await
            .unwrap();

        assert!(recv(&client, Duration::from_millis(300)).await.is_none());
        let failed = capture.events(Level::Error, "request failed");
        assert_eq!(failed.len(), 1);
        assert!(failed[0]["error"].starts_with("unable to encode response: message is"));

        cancel.cancel();
        handle.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn one_request_at_a_time_still_answers_everything() {
        let config = ServerConfig::builder().max_in_flight(1).build();
        let (handle, _capture, cancel) =
            start(config, Arc::new(Slow(Duration::from_millis(20)))).await;

        let client = client().await;
        for id in 0..5 {
            client
                .send_to(&query(id, "queued.example"), handle.local_addr())
                .await
                .unwrap();
        }

        let mut ids = Vec::new();
        while let Some(response) = recv(&client, Duration::from_secs(2)).await {
            ids.push(response.header.id);
            if ids.len() == 5 {
                break;
            }
        }
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);

        cancel.cancel();
        handle.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_drains_in_flight_requests_and_releases_the_socket() {
        let config = ServerConfig::builder()
            .shutdown_grace(Duration::from_secs(3))
            .build();
        let (handle, capture, cancel) =
            start(config, Arc::new(Slow(Duration::from_millis(300)))).await;
        let addr = handle.local_addr();

        let client = client().await;
        for id in 0..10 {
            client.send_to(&query(id, "inflight.example"), addr).await.unwrap();
        }
        time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .expect("server did not stop in time")
            .unwrap();

        // every request that was already in flight got its answer
        let mut answered = 0;
        while recv(&client, Duration::from_millis(200)).await.is_some() {
            answered += 1;
        }
        assert_eq!(answered, 10);
        let stopping = capture.events(Level::Info, "stop listening");
        assert_eq!(stopping.len(), 1);
        assert_eq!(stopping[0]["in_flight"], "10");
        assert_eq!(capture.events(Level::Info, "stopped").len(), 1);
        assert!(capture.events(Level::Warn, "shutdown grace period elapsed").is_empty());

        // nothing reads from the address any more, and it can be bound again
        client.send_to(&query(99, "late.example"), addr).await.unwrap();
        assert!(recv(&client, Duration::from_millis(200)).await.is_none());
        drop(client);
        UdpSocket::bind(addr).await.unwrap();
    }

    #[tokio::test]
    async fn grace_period_does_not_wait_forever() {
        let config = ServerConfig::builder()
            .shutdown_grace(Duration::from_millis(50))
            .build();
        let (handle, capture, cancel) =
            start(config, Arc::new(Slow(Duration::from_secs(10)))).await;

        let client = client().await;
        client
            .send_to(&query(5, "stuck.example"), handle.local_addr())
            .await
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;

        cancel.cancel();
        time::timeout(Duration::from_secs(2), handle.stopped())
            .await
            .expect("server did not stop in time")
            .unwrap();

        let elapsed = capture.events(Level::Warn, "shutdown grace period elapsed");
        assert_eq!(elapsed.len(), 1);
        assert_eq!(elapsed[0]["grace"], "50ms");
        assert_eq!(elapsed[0]["in_flight"], "1");
    }

    #[tokio::test]
    async fn state_moves_to_stopped() {
        let (handle, _capture, cancel) =
            start(ServerConfig::default(), Arc::new(Slow(Duration::ZERO))).await;
        let mut state = handle.state.clone();

        cancel.cancel();
        while *state.borrow() != ServerState::Stopped {
            state.changed().await.unwrap();
        }

        assert_eq!(handle.state(), ServerState::Stopped);
        handle.stopped().await.unwrap();
    }

    #[tokio::test]
    async fn address_in_use_is_a_bind_error() {
        let taken = client().await;
        let addr = taken.local_addr().unwrap();
        let server = Server::new(
            ServerConfig::builder().bind_addr(addr).build(),
            Arc::new(Slow(Duration::ZERO)),
            Arc::new(Capture::default()),
            CancellationToken::new(),
        );

        match server.start().await {
            Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            other => panic!("expected a bind error, got {:?}", other.map(|h| h.local_addr())),
        }
    }
}
