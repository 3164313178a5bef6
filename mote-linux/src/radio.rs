//! Emulated radio: each channel is a UDP multicast port on the LAN.
//! Datagram = 4-byte big-endian sender serial, then one frame.

use std::net::{Ipv4Addr, SocketAddr};

use mote_core::wire::MAX_FRAME_LEN;
use mote_core::SenderId;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

const SERIAL_LEN: usize = 4;

pub struct Radio {
    socket: UdpSocket,
    dest: SocketAddr,
    serial: u32,
}

/// One frame heard on the channel.
pub struct Received {
    pub sender: SenderId,
    pub frame: Vec<u8>,
}

impl Radio {
    /// Join `group` on `port`. Frames we transmit loop back and are filtered by serial.
    pub async fn tune(group: &str, port: u16, serial: u32) -> std::io::Result<Self> {
        let multicast: Ipv4Addr = group
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
            })?;
        let std_sock = bind_shared(port)?;
        std_sock.join_multicast_v4(&multicast, &Ipv4Addr::UNSPECIFIED)?;
        std_sock.set_multicast_ttl_v4(1)?;
        std_sock.set_multicast_loop_v4(true)?;
        let socket = UdpSocket::from_std(std_sock)?;
        tracing::debug!(%multicast, port, "radio tuned");
        Ok(Self {
            socket,
            dest: SocketAddr::from((multicast, port)),
            serial,
        })
    }

    pub async fn send(&self, frame: &[u8]) -> std::io::Result<()> {
        let datagram = encode_datagram(self.serial, frame);
        self.socket.send_to(&datagram, self.dest).await?;
        Ok(())
    }

    /// Wait for the next frame from another device.
    pub async fn recv(&self) -> std::io::Result<Received> {
        let mut buf = [0u8; SERIAL_LEN + MAX_FRAME_LEN + 1];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            match decode_datagram(&buf[..n]) {
                Some((sender, _)) if sender == self.serial => continue,
                Some((sender, frame)) => {
                    return Ok(Received {
                        sender,
                        frame: frame.to_vec(),
                    })
                }
                None => tracing::trace!(%from, len = n, "ignoring malformed datagram"),
            }
        }
    }
}

/// Non-blocking socket on `port` that other processes on this host may bind too.
fn bind_shared(port: u16) -> std::io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

fn encode_datagram(serial: u32, frame: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(SERIAL_LEN + frame.len());
    out.extend_from_slice(&serial.to_be_bytes());
    out.extend_from_slice(frame);
    out
}

fn decode_datagram(bytes: &[u8]) -> Option<(SenderId, &[u8])> {
    if bytes.len() <= SERIAL_LEN || bytes.len() > SERIAL_LEN + MAX_FRAME_LEN {
        return None;
    }
    let (serial, frame) = bytes.split_at(SERIAL_LEN);
    let serial: [u8; SERIAL_LEN] = serial.try_into().ok()?;
    Some((u32::from_be_bytes(serial), frame))
}
