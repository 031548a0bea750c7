//! Outbound frame buffer shared by the request pipeline and QoS delivery.

use mqline_core::{encode_packet, Packet, ProtocolVersion};

use crate::error::{ClientError, Result};

/// Encoded packets waiting to be written to the channel, in emit order.
#[derive(Debug)]
pub(crate) struct Outbox {
    buf: Vec<u8>,
    version: ProtocolVersion,
    /// Largest packet the broker accepts.
    max_packet_size: Option<u32>,
}

impl Outbox {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            buf: Vec::with_capacity(8192),
            version,
            max_packet_size: None,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn set_max_packet_size(&mut self, max: Option<u32>) {
        self.max_packet_size = max;
    }

    /// Encode `packet` onto the buffer. Nothing is appended when a field or
    /// the whole packet exceeds a limit.
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        let start = self.buf.len();
        encode_packet(packet, self.version, &mut self.buf)?;
        let len = self.buf.len() - start;
        if let Some(max) = self.max_packet_size {
            if len > max as usize {
                self.buf.truncate(start);
                return Err(ClientError::ValueTooLarge {
                    field: "packet",
                    len,
                    max: max as usize,
                });
            }
        }
        match packet.packet_id() {
            Some(id) => log::trace!(
                "Queued {} (id {}, {} bytes)",
                packet.packet_type().name(),
                id,
                len
            ),
            None => log::trace!("Queued {} ({} bytes)", packet.packet_type().name(), len),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
