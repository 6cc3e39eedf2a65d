use thiserror::Error;

/// Top-level failure a hub binary can hit before it starts serving
/// connections. The binary exits 0 on clean shutdown, nonzero on any
/// of these.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("invalid bind address {host}:{port}: {source}")]
    InvalidBindAddress {
        host: String,
        port: u16,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}
