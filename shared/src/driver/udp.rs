//! UDP endpoint driver: a non-blocking bound listener socket plus the
//! one-shot, connectionless sender.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use crate::config::ListenerConfig;
use crate::error::{EndpointError, EndpointResult};
use crate::message::Message;
use crate::traits::EndpointDriver;

struct SocketState {
    socket: Option<UdpSocket>,
    /// Reusable receive buffer, sized to the largest datagram
    recv_buf: Vec<u8>,
}

/// Listener socket bound to a local port
pub struct UdpDriver {
    local_addr: SocketAddr,
    state: Mutex<SocketState>,
}

impl UdpDriver {
    /// Bind a non-blocking socket on `port` (0 picks an ephemeral port)
    pub fn bind(port: u16, config: &ListenerConfig) -> EndpointResult<Self> {
        let addr = SocketAddr::new(config.bind_ip()?, port);
        let bind_err = |source: io::Error| EndpointError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = UdpSocket::bind(addr).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = socket.local_addr().map_err(bind_err)?;

        debug!("UDP socket bound to {}", local_addr);

        Ok(Self {
            local_addr,
            state: Mutex::new(SocketState {
                socket: Some(socket),
                recv_buf: vec![0u8; config.max_datagram_size],
            }),
        })
    }

    /// Address actually bound, including the resolved port
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl EndpointDriver for UdpDriver {
    fn receive_nonblocking(&self) -> EndpointResult<Message> {
        let mut state = self.state.lock();
        let SocketState { socket, recv_buf } = &mut *state;
        let Some(socket) = socket.as_ref() else {
            return Err(EndpointError::TransientIo(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket closed",
            )));
        };

        match socket.recv_from(recv_buf) {
            Ok((len, sender)) => {
                trace!("{}: {} bytes from {}", self.local_addr, len, sender);
                Ok(Message::datagram(sender, recv_buf[..len].to_vec()))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(EndpointError::WouldBlock),
            Err(e) => Err(EndpointError::TransientIo(e)),
        }
    }

    fn close(&self) {
        if self.state.lock().socket.take().is_some() {
            debug!("UDP socket {} closed", self.local_addr);
        }
    }

    fn describe(&self) -> String {
        format!("udp:{}", self.local_addr.port())
    }
}

/// Send one datagram from a fresh ephemeral socket
///
/// No socket outlives the call. A short write counts as a failure.
pub fn send_datagram(ip: &str, port: u16, data: &[u8]) -> EndpointResult<usize> {
    if data.is_empty() {
        warn!("UDP send to {}:{} rejected: empty payload", ip, port);
        return Err(EndpointError::EmptyPayload);
    }

    let target_ip: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| EndpointError::InvalidAddress(ip.to_string()))?;
    let target = SocketAddr::new(target_ip, port);

    let local: SocketAddr = match target_ip {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(local).map_err(|source| EndpointError::Bind {
        addr: local.to_string(),
        source,
    })?;

    let sent = socket.send_to(data, target)?;
    if sent != data.len() {
        return Err(EndpointError::TransientIo(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("sent {sent} of {} bytes", data.len()),
        )));
    }

    debug!("UDP sent {} bytes to {}", sent, target);
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::{Duration, Instant};

    fn receive_within(driver: &UdpDriver, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match driver.receive_nonblocking() {
                Ok(message) => return Some(message),
                Err(EndpointError::WouldBlock) => thread::sleep(Duration::from_millis(5)),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        None
    }

    #[test]
    fn test_empty_socket_would_block() {
        let driver = UdpDriver::bind(0, &ListenerConfig::default()).unwrap();
        assert!(matches!(
            driver.receive_nonblocking(),
            Err(EndpointError::WouldBlock)
        ));
        assert_ne!(driver.local_addr().port(), 0);
    }

    #[test]
    fn test_send_and_receive_loopback() {
        let driver = UdpDriver::bind(0, &ListenerConfig::default()).unwrap();
        let port = driver.local_addr().port();

        assert_eq!(send_datagram("127.0.0.1", port, b"ping").unwrap(), 4);

        let message = receive_within(&driver, Duration::from_secs(2)).expect("datagram");
        assert_eq!(message.payload(), b"ping");
        assert_eq!(
            message.sender().map(|s| s.ip()),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
    }

    #[test]
    fn test_second_bind_on_same_port_fails() {
        let first = UdpDriver::bind(0, &ListenerConfig::default()).unwrap();
        let port = first.local_addr().port();
        let second = UdpDriver::bind(port, &ListenerConfig::default());
        assert!(matches!(second, Err(EndpointError::Bind { .. })));
    }

    #[test]
    fn test_closed_driver_reports_error_and_frees_port() {
        let driver = UdpDriver::bind(0, &ListenerConfig::default()).unwrap();
        let port = driver.local_addr().port();
        driver.close();
        driver.close();
        assert!(matches!(
            driver.receive_nonblocking(),
            Err(EndpointError::TransientIo(_))
        ));
        assert!(UdpDriver::bind(port, &ListenerConfig::default()).is_ok());
    }

    #[test]
    fn test_send_rejects_bad_input() {
        assert!(matches!(
            send_datagram("127.0.0.1", 9, b""),
            Err(EndpointError::EmptyPayload)
        ));
        assert!(matches!(
            send_datagram("999.1.1.1", 9, b"x"),
            Err(EndpointError::InvalidAddress(_))
        ));
    }
}
