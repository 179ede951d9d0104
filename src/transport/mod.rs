pub mod ports;
pub mod zmq;

pub use ports::{BroadcastPort, RequestPort};
pub use zmq::{ZmqBroadcastChannel, ZmqRequestChannel, tcp_endpoint};
