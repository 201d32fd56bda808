use netrom_core::constants::SEQUENCE_MODULUS;

/// Six-bit NetROM sequence number.
pub type Sequence = u8;

/// Returns the sequence number following `seq`.
pub fn next(seq: Sequence) -> Sequence {
    (seq + 1) % SEQUENCE_MODULUS
}

/// Number of steps from `from` forward to `to`, modulo 64.
pub fn distance(from: Sequence, to: Sequence) -> u8 {
    (to % SEQUENCE_MODULUS + SEQUENCE_MODULUS - from % SEQUENCE_MODULUS) % SEQUENCE_MODULUS
}

/// Returns true if `seq` lies in the inclusive range `[low, high]`, walking forward with wrap.
pub fn within(low: Sequence, seq: Sequence, high: Sequence) -> bool {
    distance(low, seq) <= distance(low, high)
}
