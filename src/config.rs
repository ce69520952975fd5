use std::time::Duration;
use anyhow::bail;
use crate::message::Message;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// This is the maximum number of messages per endpoint that are sent but not yet
    ///  acknowledged. Messages beyond that stay in the endpoint's pending queue until the window
    ///  slides.
    pub window_capacity: usize,

    /// Interval at which the built-in resend loop retransmits all unacknowledged messages. Hosts
    ///  driving retransmission from their own timer can ignore this.
    pub resend_interval: Duration,

    /// Messages with a larger payload are discarded by the sender before they get a sequence
    ///  number. Must not exceed what fits into a single datagram ([Message::MAX_PAYLOAD_LEN]).
    pub max_payload_len: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            window_capacity: 16,
            resend_interval: Duration::from_millis(1000),
            max_payload_len: Message::MAX_PAYLOAD_LEN,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_capacity == 0 {
            bail!("window capacity must be at least 1");
        }
        if self.resend_interval.is_zero() {
            bail!("resend interval must be positive");
        }
        if self.max_payload_len > Message::MAX_PAYLOAD_LEN {
            bail!("max payload length {} exceeds the datagram limit of {} bytes", self.max_payload_len, Message::MAX_PAYLOAD_LEN);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default(16, 1000, Message::MAX_PAYLOAD_LEN, true)]
    #[case::single_slot(1, 1, 1, true)]
    #[case::empty_payloads_only(16, 1000, 0, true)]
    #[case::no_window(0, 1000, 100, false)]
    #[case::no_interval(16, 0, 100, false)]
    #[case::payload_exceeds_datagram(16, 1000, Message::MAX_PAYLOAD_LEN + 1, false)]
    fn test_validate(#[case] window_capacity: usize, #[case] resend_millis: u64, #[case] max_payload_len: usize, #[case] expected_ok: bool) {
        let config = SenderConfig {
            window_capacity,
            resend_interval: Duration::from_millis(resend_millis),
            max_payload_len,
        };
        assert_eq!(config.validate().is_ok(), expected_ok);
    }

    #[test]
    fn test_default_is_valid() {
        let config = SenderConfig::default();
        assert_eq!(config.window_capacity, 16);
        assert_eq!(config.max_payload_len, Message::MAX_PAYLOAD_LEN);
        assert!(config.validate().is_ok());
    }
}
