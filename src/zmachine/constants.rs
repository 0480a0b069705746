// The header occupies the first 64 bytes of every story file.
pub const HEADER_LEN: usize = 0x40;

// Stack size, in bytes. Frames and the evaluation stack share this array.
pub const STACK_SIZE: usize = 8192;

// A routine may declare at most 15 locals.
pub const MAX_LOCALS: u8 = 15;

// Word entries in the property defaults table.
pub const PROPERTY_DEFAULTS: u16 = 31;

// Bytes per entry in the object tree.
pub const OBJECT_ENTRY_SIZE: u16 = 9;

// Object numbers are a single byte. Zero is the nil object.
pub const MAX_OBJECTS: u16 = 255;

// An abbreviation string may reference another abbreviation only through
// this many levels before decoding fails.
pub const MAX_ABBREV_DEPTH: u8 = 2;

// Nesting limit for table-redirected output.
pub const MAX_STREAM_NESTING: usize = 16;
