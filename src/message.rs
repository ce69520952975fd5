use std::fmt::{Debug, Display, Formatter};

use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crc::Crc;

use crate::endpoint_key::EndpointKey;

/// Per-endpoint sequence number of a message. Numbers are assigned by the sender when a message
///  first leaves its endpoint's pending queue.
///
/// `u32::MAX` is reserved on the wire for 'not yet assigned', so it is never handed out.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SequenceNumber(u32);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    /// the highest sequence number that can be transmitted
    pub const MAX: SequenceNumber = SequenceNumber(Self::UNASSIGNED_ON_WIRE - 1);

    const UNASSIGNED_ON_WIRE: u32 = u32::MAX;

    /// panics for `u32::MAX`, see [SequenceNumber::try_from_raw] for a non-panicking variant
    pub fn from_raw(value: u32) -> SequenceNumber {
        match Self::try_from_raw(value) {
            Some(seq) => seq,
            None => panic!("{:08x} is reserved for unassigned sequence numbers", value),
        }
    }

    /// `None` for the value that is reserved for 'unassigned' on the wire
    pub fn try_from_raw(value: u32) -> Option<SequenceNumber> {
        if value == Self::UNASSIGNED_ON_WIRE {
            None
        }
        else {
            Some(SequenceNumber(value))
        }
    }

    pub fn to_raw(&self) -> u32 {
        self.0
    }

    /// the following sequence number, `None` after [SequenceNumber::MAX]
    pub fn checked_next(&self) -> Option<SequenceNumber> {
        if *self < Self::MAX {
            Some(SequenceNumber(self.0 + 1))
        }
        else {
            None
        }
    }

    /// panics after [SequenceNumber::MAX]
    pub fn next(&self) -> SequenceNumber {
        match self.checked_next() {
            Some(next) => next,
            None => panic!("sequence number space exhausted"),
        }
    }
}

const CHECKSUM: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// A message as it travels through the post office: addressing, sequence number and opaque
///  payload.
///
/// Wire format (all numbers in network byte order):
/// ```ascii
///  0: checksum (u32) - CRC-32 over all following bytes
///  4: source host (u32)
///  8: source port (u16)
/// 10: destination host (u32)
/// 14: destination port (u16)
/// 16: sequence number (u32) - FFFFFFFF if unassigned
/// 20: payload (remainder of the datagram)
/// ```
#[derive(Clone, Eq, PartialEq)]
pub struct Message {
    pub src_host: u32,
    pub src_port: u16,
    pub dest_host: u32,
    pub dest_port: u16,
    pub sequence: Option<SequenceNumber>,
    pub payload: Bytes,
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.sequence {
            Some(seq) => write!(f, "Message{{{} #{} len={}}}", self.key(), seq, self.payload.len()),
            None => write!(f, "Message{{{} #- len={}}}", self.key(), self.payload.len()),
        }
    }
}

impl Message {
    pub const HEADER_LEN: usize = 20;

    /// UDP payload of a full Ethernet frame over IPv4 without optional headers
    pub const MAX_DATAGRAM_LEN: usize = 1472;

    pub const MAX_PAYLOAD_LEN: usize = Self::MAX_DATAGRAM_LEN - Self::HEADER_LEN;

    /// Creates a message with an unassigned sequence number
    pub fn new(src_host: u32, src_port: u16, dest_host: u32, dest_port: u16, payload: impl Into<Bytes>) -> Message {
        Message {
            src_host,
            src_port,
            dest_host,
            dest_port,
            sequence: None,
            payload: payload.into(),
        }
    }

    pub fn on_endpoint(key: EndpointKey, payload: impl Into<Bytes>) -> Message {
        Message::new(key.src_host, key.src_port, key.dest_host, key.dest_port, payload)
    }

    pub fn with_sequence(mut self, sequence: SequenceNumber) -> Message {
        self.sequence = Some(sequence);
        self
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey::for_message(self)
    }

    /// The acknowledgment a receiver sends back for this message: addressed in the opposite
    ///  direction, carrying the same sequence number and no payload.
    pub fn ack(&self) -> Message {
        Message {
            src_host: self.dest_host,
            src_port: self.dest_port,
            dest_host: self.src_host,
            dest_port: self.src_port,
            sequence: self.sequence,
            payload: Bytes::new(),
        }
    }

    pub fn serialized_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        let start = buf.len();
        buf.reserve(self.serialized_len());

        buf.put_u32(0); // patched below
        buf.put_u32(self.src_host);
        buf.put_u16(self.src_port);
        buf.put_u32(self.dest_host);
        buf.put_u16(self.dest_port);
        buf.put_u32(self.sequence
            .map(|s| s.to_raw())
            .unwrap_or(SequenceNumber::UNASSIGNED_ON_WIRE));
        buf.put_slice(&self.payload);

        let checksum = CHECKSUM.checksum(&buf[start + 4..]);
        buf[start..start + 4].copy_from_slice(&checksum.to_be_bytes());
    }

    pub fn try_deser(mut buf: &[u8]) -> anyhow::Result<Message> {
        if buf.len() < Self::HEADER_LEN {
            bail!("message of {} bytes is shorter than the header ({} bytes)", buf.len(), Self::HEADER_LEN);
        }

        let expected_checksum = buf.get_u32();
        let actual_checksum = CHECKSUM.checksum(buf);
        if expected_checksum != actual_checksum {
            bail!("checksum mismatch: expected {:08x}, was {:08x}", expected_checksum, actual_checksum);
        }

        let src_host = buf.get_u32();
        let src_port = buf.get_u16();
        let dest_host = buf.get_u32();
        let dest_port = buf.get_u16();
        let sequence = SequenceNumber::try_from_raw(buf.get_u32());

        Ok(Message {
            src_host,
            src_port,
            dest_host,
            dest_port,
            sequence,
            payload: Bytes::copy_from_slice(buf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_sequence_next() {
        assert_eq!(SequenceNumber::ZERO.next(), SequenceNumber::from_raw(1));
        assert_eq!(SequenceNumber::from_raw(41).next().to_raw(), 42);
    }

    #[test]
    #[should_panic]
    fn test_sequence_next_exhausted() {
        SequenceNumber::MAX.next();
    }

    #[rstest]
    #[case::zero(0, Some(1))]
    #[case::before_max(u32::MAX - 2, Some(u32::MAX - 1))]
    #[case::max(u32::MAX - 1, None)]
    fn test_sequence_checked_next(#[case] raw: u32, #[case] expected: Option<u32>) {
        assert_eq!(SequenceNumber::from_raw(raw).checked_next(), expected.map(SequenceNumber::from_raw));
    }

    #[rstest]
    #[case::zero(0, true)]
    #[case::max(u32::MAX - 1, true)]
    #[case::reserved(u32::MAX, false)]
    fn test_sequence_try_from_raw(#[case] raw: u32, #[case] expected_valid: bool) {
        assert_eq!(SequenceNumber::try_from_raw(raw).map(|s| s.to_raw()), expected_valid.then_some(raw));
    }

    #[test]
    #[should_panic]
    fn test_sequence_from_raw_rejects_reserved() {
        SequenceNumber::from_raw(u32::MAX);
    }

    #[test]
    fn test_ser_highest_sequence() {
        let msg = Message::new(1, 2, 3, 4, &b"last"[..])
            .with_sequence(SequenceNumber::MAX);

        let mut buf = BytesMut::new();
        msg.ser(&mut buf);
        assert_eq!(&buf[16..20], &[0xff, 0xff, 0xff, 0xfe]);

        let decoded = Message::try_deser(&buf).unwrap();
        assert_eq!(decoded.sequence, Some(SequenceNumber::MAX));
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_ack() {
        let msg = Message::new(1, 2, 3, 4, &b"abc"[..])
            .with_sequence(SequenceNumber::from_raw(9));
        let ack = msg.ack();

        assert_eq!(ack.key(), msg.key().reverse());
        assert_eq!(ack.sequence, Some(SequenceNumber::from_raw(9)));
        assert!(ack.payload.is_empty());
        assert_eq!(EndpointKey::for_ack(&ack), msg.key());
    }

    #[rstest]
    #[case::unassigned(None, b"", vec![0,0,0,1, 0,2, 0,0,0,3, 0,4, 255,255,255,255])]
    #[case::assigned(Some(5), b"", vec![0,0,0,1, 0,2, 0,0,0,3, 0,4, 0,0,0,5])]
    #[case::payload(Some(258), b"xyz", vec![0,0,0,1, 0,2, 0,0,0,3, 0,4, 0,0,1,2, b'x',b'y',b'z'])]
    fn test_ser(#[case] sequence: Option<u32>, #[case] payload: &'static [u8], #[case] expected_after_checksum: Vec<u8>) {
        let mut msg = Message::new(1, 2, 3, 4, payload);
        msg.sequence = sequence.map(SequenceNumber::from_raw);

        let mut buf = BytesMut::new();
        msg.ser(&mut buf);

        assert_eq!(buf.len(), msg.serialized_len());
        assert_eq!(&buf[4..], expected_after_checksum.as_slice());
        assert_eq!(&buf[..4], CHECKSUM.checksum(&expected_after_checksum).to_be_bytes().as_slice());

        assert_eq!(Message::try_deser(&buf).unwrap(), msg);
    }

    #[test]
    fn test_ser_appends() {
        let mut buf = BytesMut::from(&b"prefix"[..]);
        let msg = Message::new(1, 2, 3, 4, &b"abc"[..]);
        msg.ser(&mut buf);

        assert_eq!(&buf[..6], b"prefix");
        assert_eq!(Message::try_deser(&buf[6..]).unwrap(), msg);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one_short(Message::HEADER_LEN - 1)]
    fn test_deser_too_short(#[case] len: usize) {
        let mut buf = BytesMut::new();
        Message::new(1, 2, 3, 4, Bytes::new()).ser(&mut buf);
        assert!(Message::try_deser(&buf[..len]).is_err());
    }

    #[rstest]
    #[case::checksum(0)]
    #[case::host(5)]
    #[case::sequence(19)]
    #[case::payload(21)]
    fn test_deser_corrupted(#[case] corrupted_offset: usize) {
        let mut buf = BytesMut::new();
        Message::new(1, 2, 3, 4, &b"abcd"[..])
            .with_sequence(SequenceNumber::from_raw(7))
            .ser(&mut buf);

        buf[corrupted_offset] ^= 0x10;
        assert!(Message::try_deser(&buf).is_err());
    }
}
