// Q8.8 fixed-point codec used by the binary command mode
//
// Wire word: signed 16-bit two's complement, 8 integer bits, 8 fractional bits.
// The firmware expects the exact clamp bounds and truncation below.

/// Lowest encodable value
pub const Q88_MIN: f32 = -128.0;
/// Upper clamp bound (matches the firmware, slightly below 127.99609375)
pub const Q88_MAX: f32 = 127.996;
/// Scale between domain units and raw counts
pub const Q88_SCALE: f32 = 256.0;

/// Encode a float as a Q8.8 word
///
/// The input is clamped to [`Q88_MIN`, `Q88_MAX`], scaled by 256 and truncated
/// toward zero (never rounded).
pub fn encode(value: f32) -> u16 {
    // NaN would otherwise saturate to 0 through the cast, make that explicit
    if value.is_nan() {
        return 0;
    }
    let clamped = value.clamp(Q88_MIN, Q88_MAX);
    let raw = (clamped * Q88_SCALE).trunc() as i32;
    (raw as i16) as u16
}

/// Decode a Q8.8 word back to a float
pub fn decode(word: u16) -> f32 {
    (word as i16) as f32 / Q88_SCALE
}

/// Encode as big-endian bytes, ready for the wire
pub fn encode_be(value: f32) -> [u8; 2] {
    encode(value).to_be_bytes()
}

/// Decode from big-endian bytes
pub fn decode_be(bytes: [u8; 2]) -> f32 {
    decode(u16::from_be_bytes(bytes))
}
