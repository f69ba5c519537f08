/// Identifier width in bytes.
pub const ID_LEN: usize = 20;

/// Identifier width in bits.
pub const ID_LEN_BITS: usize = ID_LEN * 8;
