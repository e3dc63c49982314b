//! Shared protocol constants for Lanbeam discovery and transfer

// Default ports; both are overridable through Settings
pub const TRANSFER_PORT: u16 = 18888;
pub const DISCOVERY_PORT: u16 = 18889;

// Chunk size for streaming file bytes over an established connection
pub const CHUNK_SIZE: usize = 8 * 1024;

// Decode limits - prevent memory exhaustion from a malformed manifest
// A string longer than 64KB or a manifest with more than 65535 entries
// is treated as a decode error, not an allocation request
pub const MAX_STRING_LEN: usize = 64 * 1024;
pub const MAX_MANIFEST_ENTRIES: i32 = 65_535;

// Default capacity of the inbound-transfer admission limiter
pub const DEFAULT_MAX_TRANSFERS: usize = 4;

// Content tags (byte 0 of every connection; keep numeric stable)
pub mod tag {
    pub const FILES: u8 = 0x01;
    pub const TEXT: u8 = 0x02;
    pub const FOLDER: u8 = 0x03;
}

// UDP discovery message prefixes; wire format is `<prefix>|<displayName>`
pub mod discovery {
    pub const PROBE: &str = "DISCOVER";
    pub const RESPONSE: &str = "RESPONSE";
    pub const SEPARATOR: char = '|';

    // Largest datagram we bother reading; discovery messages are tiny
    pub const MAX_DATAGRAM: usize = 512;
}
