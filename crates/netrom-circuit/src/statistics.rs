//! Per-circuit transfer statistics.

/// Counters for one circuit's information frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitStatistics {
    /// INFORMATION frames sent for the first time
    pub frames_sent: u64,
    /// INFORMATION frames accepted in order (including ones released from reassembly)
    pub frames_received: u64,
    /// Frames resent in answer to a NAK
    pub retransmissions: u64,
    /// Frames that arrived ahead of a gap and were held for reassembly
    pub out_of_order: u64,
    /// Duplicate or out-of-window frames discarded
    pub duplicates: u64,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes delivered to the stream
    pub bytes_received: u64,
}

impl CircuitStatistics {
    /// Fraction of sent frames that needed a retransmission (0.0 to 1.0).
    pub fn retransmission_rate(&self) -> f32 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.retransmissions as f32 / self.frames_sent as f32
    }

    pub(crate) fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub(crate) fn record_delivered(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_initialized_to_zero() {
        let stats = CircuitStatistics::default();
        assert_eq!(stats.frames_sent, 0);
        assert_eq!(stats.retransmissions, 0);
        assert_eq!(stats.retransmission_rate(), 0.0);
    }

    #[test]
    fn test_retransmission_rate() {
        let mut stats = CircuitStatistics::default();
        for _ in 0..20 {
            stats.record_sent(10);
        }
        stats.retransmissions = 5;
        assert!((stats.retransmission_rate() - 0.25).abs() < 0.001);
        assert_eq!(stats.bytes_sent, 200);
    }

    #[test]
    fn test_record_delivered() {
        let mut stats = CircuitStatistics::default();
        stats.record_delivered(3);
        stats.record_delivered(4);
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.bytes_received, 7);
    }
}
