//! Reassembles packets out of an arbitrarily chunked byte stream.
//!
//! TCP gives no guarantees about how the bytes of a packet are split across
//! reads: one read may hold half a size prefix, several packets, or the tail
//! of one packet and the start of the next. [Assembler] keeps the partial
//! packet between reads and hands out complete buffers in arrival order.

use crate::error::RconError;
use crate::packet::{peek_size, MAX_PACKET_SIZE, MIN_PACKET_SIZE, SIZE_FIELD_LEN};
use log::trace;

#[derive(Debug, Default)]
pub struct Assembler {
    /// Bytes of the packet in flight, size prefix included.
    buffer: Vec<u8>,
    /// Total size of the packet in flight, known once the prefix is complete.
    target: Option<usize>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one chunk and returns every packet it completed, in order.
    /// Each returned buffer starts with its size prefix and can be passed to
    /// [Packet::unpack](crate::packet::Packet::unpack) as is.
    ///
    /// A size prefix outside the accepted range is an error; the assembler
    /// should be dropped afterwards since the stream cannot be realigned.
    pub fn feed(&mut self, mut chunk: &[u8]) -> Result<Vec<Vec<u8>>, RconError> {
        let mut packets = Vec::new();

        while !chunk.is_empty() {
            let target = match self.target {
                Some(target) => target,
                None => {
                    let missing = SIZE_FIELD_LEN - self.buffer.len();
                    let take = missing.min(chunk.len());
                    self.buffer.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];

                    // not even the size prefix yet, wait for more
                    let Some(size) = peek_size(&self.buffer) else {
                        break;
                    };
                    if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
                        self.reset();
                        return Err(RconError::MalformedPacket("size prefix out of range"));
                    }

                    let target = SIZE_FIELD_LEN + size as usize;
                    self.buffer.reserve_exact(target - self.buffer.len());
                    self.target = Some(target);
                    target
                }
            };

            let take = (target - self.buffer.len()).min(chunk.len());
            self.buffer.extend_from_slice(&chunk[..take]);
            chunk = &chunk[take..];

            if self.buffer.len() == target {
                trace!("assembled packet of {} bytes", target);
                self.target = None;
                packets.push(std::mem::take(&mut self.buffer));
            }
        }

        Ok(packets)
    }

    /// Number of bytes held for a packet that is not complete yet.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.target = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Direction, Packet, PacketType};
    use proptest::prelude::*;

    fn feed_all(assembler: &mut Assembler, chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        chunks
            .iter()
            .flat_map(|chunk| assembler.feed(chunk).unwrap())
            .collect()
    }

    #[test]
    fn waits_for_split_size_prefix() {
        let bytes = Packet::new(5, PacketType::Exec, "status").pack();
        let mut assembler = Assembler::new();

        assert!(assembler.feed(&bytes[..3]).unwrap().is_empty());
        assert_eq!(assembler.pending_len(), 3);

        let packets = assembler.feed(&bytes[3..]).unwrap();
        assert_eq!(packets, vec![bytes.clone()]);
        assert_eq!(assembler.pending_len(), 0);

        let packet = Packet::unpack(&packets[0], Direction::Serverbound).unwrap();
        assert_eq!(packet, Packet::new(5, PacketType::Exec, "status"));
    }

    #[test]
    fn emits_concatenated_packets_in_order() {
        let first = Packet::new(1, PacketType::ResponseValue, "first").pack();
        let second = Packet::new(2, PacketType::ResponseValue, "second").pack();
        let joined = [first.clone(), second.clone()].concat();

        let packets = Assembler::new().feed(&joined).unwrap();
        assert_eq!(packets, vec![first, second]);
    }

    #[test]
    fn carries_leftover_into_next_packet() {
        let first = Packet::new(1, PacketType::ResponseValue, "first").pack();
        let second = Packet::new(2, PacketType::ResponseValue, "second").pack();
        let joined = [first.clone(), second.clone()].concat();
        // split two bytes into the second packet's size prefix
        let split = first.len() + 2;

        let mut assembler = Assembler::new();
        assert_eq!(assembler.feed(&joined[..split]).unwrap(), vec![first]);
        assert_eq!(assembler.feed(&joined[split..]).unwrap(), vec![second]);
    }

    #[test]
    fn rejects_out_of_range_size() {
        let mut assembler = Assembler::new();
        let err = assembler.feed(&(-1i32).to_le_bytes()).unwrap_err();
        assert!(matches!(err, RconError::MalformedPacket(_)));

        let err = assembler.feed(&(MAX_PACKET_SIZE + 1).to_le_bytes()).unwrap_err();
        assert!(matches!(err, RconError::MalformedPacket(_)));
        assert_eq!(assembler.pending_len(), 0);
    }

    #[test]
    fn every_single_split_point() {
        let bytes = Packet::new(42, PacketType::ResponseValue, "hostname: test").pack();
        for split in 0..=bytes.len() {
            let mut assembler = Assembler::new();
            let packets = feed_all(&mut assembler, &[&bytes[..split], &bytes[split..]]);
            assert_eq!(packets, vec![bytes.clone()], "split at {}", split);
        }
    }

    proptest! {
        #[test]
        fn any_chunking_preserves_the_stream(
            bodies in proptest::collection::vec("[a-z ]{0,64}", 1..5),
            chunk_size in 1usize..32,
        ) {
            let encoded: Vec<Vec<u8>> = bodies
                .iter()
                .enumerate()
                .map(|(id, body)| Packet::new(id as i32, PacketType::ResponseValue, body.as_str()).pack())
                .collect();
            let stream = encoded.concat();

            let mut assembler = Assembler::new();
            let packets: Vec<Vec<u8>> = stream
                .chunks(chunk_size)
                .flat_map(|chunk| assembler.feed(chunk).unwrap())
                .collect();

            prop_assert_eq!(packets, encoded);
            prop_assert_eq!(assembler.pending_len(), 0);
        }
    }
}
