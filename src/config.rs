use std::{net::SocketAddr, time::Duration};

use dnswire::MAX_UDP_MESSAGE_SIZE;
use typed_builder::TypedBuilder;

// Datagrams longer than this are truncated by the socket and fail to decode.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1024;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Debug, PartialEq, Eq, TypedBuilder)]
pub struct ServerConfig {
    // Port 0 picks an ephemeral port; the bound address is reported by the handle.
    #[builder(default = SocketAddr::from(([127, 0, 0, 1], 0)))]
    pub bind_addr: SocketAddr,

    // Responses that encode to more than this are not sent.
    #[builder(default = MAX_UDP_MESSAGE_SIZE)]
    pub max_message_size: usize,
    #[builder(default = DEFAULT_RECV_BUFFER_SIZE)]
    pub recv_buffer_size: usize,

    // Datagrams being handled at once. The read loop stops reading while this many are pending.
    #[builder(default = DEFAULT_MAX_IN_FLIGHT)]
    pub max_in_flight: usize,

    // How long a cancelled server waits for in-flight requests before letting go of the socket.
    #[builder(default = DEFAULT_SHUTDOWN_GRACE)]
    pub shutdown_grace: Duration,

    // Deadline for handling and answering a single datagram.
    #[builder(default)]
    pub request_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig::builder().build()
    }
}
