use std::time::Duration;

/// Query parameter carrying the user identity on the upgrade request.
pub const USER_QUERY_PARAM: &str = "user";

/// Server read inactivity window.
///
/// Any frame from the client (ping, pong, text) re-arms the deadline. If
/// nothing arrives within this window the connection is considered dead.
pub const SERVER_READ_WAIT: Duration = Duration::from_secs(30);

/// Time allowed to write a single frame, including waiting for the
/// handle's write lock.
pub const WRITE_WAIT: Duration = Duration::from_secs(8);

/// How often the client sends heartbeat pings (must be < server read wait).
pub const CLIENT_HEARTBEAT: Duration = Duration::from_secs(9);

/// Number of heartbeat intervals the client waits for a pong.
pub const CLIENT_PONG_FACTOR: u32 = 3;

/// How often the client emits its outbound text.
pub const CLIENT_SEND_INTERVAL: Duration = Duration::from_secs(6);

/// Capacity of the client's inbound message buffer.
pub const INBOUND_BUFFER_SIZE: usize = 10;

/// Maximum frame and message size in bytes (1 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default server listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8001";

/// Default client target address.
pub const DEFAULT_ADDRESS: &str = "ws://localhost:8001";

/// Default text the client emits on every send tick.
pub const DEFAULT_MESSAGE: &str = "Durandal love me.";

/// Client read deadline derived from the heartbeat interval.
pub fn pong_wait(heartbeat: Duration) -> Duration {
    heartbeat * CLIENT_PONG_FACTOR
}
