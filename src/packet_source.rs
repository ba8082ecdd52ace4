// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Packet sources and the receive loop feeding the processing queues.
//!
//! A [`PacketSource`] yields raw datagrams, from the sensor's UDP ports
//! ([`UdpSource`]) or from memory ([`TestSource`]). [`forward_packets`]
//! drains a source into a bounded `kanal` queue; when the consumer falls
//! behind, packets are dropped and counted rather than blocking the socket.
//!
//! # Example
//!
//! ```ignore
//! use edgefirst_cloudpub::packet_source::{UdpSource, forward_packets};
//!
//! let (tx, rx) = kanal::bounded_async(2048);
//! let source = UdpSource::bind("0.0.0.0:7502").await?;
//! tokio::spawn(forward_packets(source, tx, 65536, "lidar"));
//!
//! while let Ok(packet) = rx.recv().await {
//!     // process packet
//! }
//! ```

use crate::lidar::Error;
use kanal::AsyncSender;
use std::{future::Future, pin::Pin};
use tracing::{debug, warn};

/// Kernel receive buffer requested for sensor sockets.
pub const SOCKET_RECV_BUFFER: usize = 8 * 1024 * 1024;

/// Trait for packet sources.
pub trait PacketSource: Send {
    /// Receive the next packet into the provided buffer.
    ///
    /// # Returns
    /// - `Ok(len)` - Number of bytes received
    /// - `Err` - I/O or source error
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>>;

    /// Whether more packets can be received. Always true for sockets.
    fn has_more(&self) -> bool;
}

/// UDP socket packet source for live sensor operation.
pub struct UdpSource {
    socket: tokio::net::UdpSocket,
}

impl UdpSource {
    pub fn new(socket: tokio::net::UdpSocket) -> Self {
        Self { socket }
    }

    /// Bind to an address, enlarging the kernel receive buffer so a burst
    /// of lidar packets survives a slow consumer.
    pub async fn bind(addr: &str) -> Result<Self, Error> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        if let Err(err) = set_recv_buffer(&socket, SOCKET_RECV_BUFFER) {
            warn!("could not set receive buffer on {}: {}", addr, err);
        }
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(unix)]
fn set_recv_buffer(socket: &tokio::net::UdpSocket, size: usize) -> Result<(), Error> {
    use std::os::fd::AsRawFd;

    let size = size as libc::c_int;
    // SAFETY: the descriptor is owned by `socket` for the duration of the
    // call and the option value points at a live c_int.
    let err = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &size as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if err != 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn set_recv_buffer(_socket: &tokio::net::UdpSocket, _size: usize) -> Result<(), Error> {
    Ok(())
}

impl PacketSource for UdpSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move {
            let len = self.socket.recv(buf).await?;
            Ok(len)
        })
    }

    fn has_more(&self) -> bool {
        true
    }
}

/// In-memory packet source replaying a fixed sequence.
pub struct TestSource {
    packets: Vec<Vec<u8>>,
    index: usize,
}

impl TestSource {
    pub fn new(packets: Vec<Vec<u8>>) -> Self {
        Self { packets, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

impl PacketSource for TestSource {
    fn recv<'a>(
        &'a mut self,
        buf: &'a mut [u8],
    ) -> Pin<Box<dyn Future<Output = Result<usize, Error>> + Send + 'a>> {
        Box::pin(async move {
            let Some(packet) = self.packets.get(self.index) else {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "no more packets",
                )));
            };

            let len = packet.len().min(buf.len());
            buf[..len].copy_from_slice(&packet[..len]);
            self.index += 1;
            Ok(len)
        })
    }

    fn has_more(&self) -> bool {
        self.index < self.packets.len()
    }
}

/// Counters reported by [`forward_packets`] when the source is exhausted
/// or the queue closes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ForwardStats {
    pub received: u64,
    /// Packets dropped because the queue was full.
    pub dropped: u64,
}

/// Move packets from `source` into `tx` until the source is exhausted or
/// the receiving side is gone.
///
/// `max_len` sizes the receive buffer. A full queue never blocks the
/// source: the packet is dropped and counted.
pub async fn forward_packets<S: PacketSource>(
    mut source: S,
    tx: AsyncSender<Vec<u8>>,
    max_len: usize,
    name: &str,
) -> ForwardStats {
    let mut buf = vec![0u8; max_len];
    let mut stats = ForwardStats::default();

    while source.has_more() {
        let len = match source.recv(&mut buf).await {
            Ok(len) => len,
            Err(err) => {
                warn!("{} receive error: {}", name, err);
                continue;
            }
        };
        stats.received += 1;

        match tx.try_send(buf[..len].to_vec()) {
            Ok(true) => {}
            Ok(false) => {
                stats.dropped += 1;
                if stats.dropped == 1 || stats.dropped % 1000 == 0 {
                    warn!(
                        "{} queue full, {} packets dropped so far",
                        name, stats.dropped
                    );
                }
            }
            Err(_) => {
                debug!("{} queue closed", name);
                break;
            }
        }
    }

    stats
}
