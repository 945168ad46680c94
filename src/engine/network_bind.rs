use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use tokio::net::{TcpSocket, TcpStream};

/// Parse the configured source IP, if any.
pub fn resolve_bind_ip(source_ip: Option<&str>) -> Result<Option<IpAddr>> {
    source_ip
        .map(|s| {
            s.parse::<IpAddr>()
                .with_context(|| format!("invalid source IP address '{s}'"))
        })
        .transpose()
}

/// Open a TCP connection to `target`, bound to `bind` when given.
pub async fn connect_from(target: SocketAddr, bind: Option<IpAddr>) -> std::io::Result<TcpStream> {
    let Some(ip) = bind else {
        return TcpStream::connect(target).await;
    };
    let socket = match target {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.bind(SocketAddr::new(ip, 0))?;
    socket.connect(target).await
}
