//! UDP syslog sink.

use tokio::net::UdpSocket;

use super::{Output, Satellite};

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Bind an ephemeral UDP port on all interfaces and pass every datagram
/// received there to `output`, trimmed of surrounding whitespace.
pub async fn start_syslog_sink(output: Output) -> std::io::Result<Satellite> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    let port = socket.local_addr()?.port();

    Ok(Satellite::spawn("syslog", port, move |mut shutdown| async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, _peer)) => {
                        let record = String::from_utf8_lossy(&buf[..len]);
                        output(record.trim());
                    }
                    Err(e) => {
                        tracing::warn!("syslog sink receive failed: {}", e);
                    }
                },
            }
        }
    }))
}
