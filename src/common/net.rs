//! Network utilities

use socket2::SockRef;
use tokio::net::TcpStream;

/// Disable Nagle and turn on keepalive for a proxied socket
#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
}

/// Split `host:port` into its parts.
///
/// Bracketed IPv6 literals (`[::1]:443`) lose their brackets. A bare IPv6
/// literal without brackets is returned whole with no port.
pub fn split_host_port(authority: &str) -> (&str, Option<&str>) {
    if let Some(rest) = authority.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let host = &rest[..end];
            let port = rest[end + 1..].strip_prefix(':');
            return (host, port.filter(|p| !p.is_empty()));
        }
        return (authority, None);
    }

    match authority.rfind(':') {
        // more than one colon and no brackets: an IPv6 literal
        Some(idx) if authority[..idx].contains(':') => (authority, None),
        Some(idx) => {
            let port = &authority[idx + 1..];
            (&authority[..idx], (!port.is_empty()).then_some(port))
        }
        None => (authority, None),
    }
}

/// Strip any trailing `:port` from a host
pub fn strip_port(authority: &str) -> &str {
    split_host_port(authority).0
}

/// Join host and port into a dialable address string
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
