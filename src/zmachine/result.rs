use std::fmt;
use std::io;
use std::result;

pub type Result<T> = result::Result<T, ZErr>;

// Everything that can go fatally wrong while loading or running a story.
// Fatal means fatal: the machine never guesses an instruction length or
// patches around a bad pointer, because misdecoding one instruction makes
// every later fetch garbage.
#[derive(Debug)]
pub enum ZErr {
    // Load-time image problems.
    UnknownVersionNumber(u8),
    StoryTooShort(usize),
    HeaderOutOfRange {
        field: &'static str,
        addr: usize,
        len: usize,
    },

    // Runtime memory faults.
    AddressOutOfRange {
        addr: usize,
        len: usize,
    },
    ReadOnlyAddress(usize),

    // Decode faults.
    UndefinedOpcode {
        pc: usize,
        form: &'static str,
        opcode: u8,
    },
    MissingOperand {
        pc: usize,
    },
    DivisionByZero {
        pc: usize,
    },

    // Stack discipline.
    StackOverflow,
    StackUnderflow,
    CallStackUnderflow,
    NoSuchLocal {
        local: u8,
        count: u8,
    },
    TooManyLocals {
        addr: usize,
        count: u8,
    },

    // Object and property faults.
    BadObjectNumber(u16),
    BadAttribute(u16),
    BadPropertyNumber(u8),
    PropertyNotFound {
        object: u16,
        property: u8,
    },
    BadPropertySize {
        object: u16,
        property: u8,
        size: u8,
    },
    ObjectLoop {
        object: u16,
        destination: u16,
    },

    // Text and dictionary faults.
    AbbrevTooDeep {
        addr: usize,
    },
    MalformedDictionary(&'static str),

    // Output redirection.
    StreamNestingTooDeep,

    // Snapshots.
    MalformedSnapshot(&'static str),
    SnapshotMismatch(&'static str),

    // Host boundary.
    InputClosed,
    IO(io::Error),
}

impl ZErr {
    // True when the most likely culprit is the story file rather than the
    // interpreter, so a driver can word its message accordingly.
    pub fn is_image_fault(&self) -> bool {
        use self::ZErr::*;
        match self {
            UnknownVersionNumber(_)
            | StoryTooShort(_)
            | HeaderOutOfRange { .. }
            | AddressOutOfRange { .. }
            | UndefinedOpcode { .. }
            | TooManyLocals { .. }
            | BadObjectNumber(_)
            | BadAttribute(_)
            | BadPropertyNumber(_)
            | PropertyNotFound { .. }
            | BadPropertySize { .. }
            | ObjectLoop { .. }
            | AbbrevTooDeep { .. }
            | MalformedDictionary(_)
            | DivisionByZero { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for ZErr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::ZErr::*;
        match self {
            UnknownVersionNumber(v) => write!(f, "unsupported story version {}", v),
            StoryTooShort(len) => write!(f, "story file too short ({} bytes)", len),
            HeaderOutOfRange { field, addr, len } => write!(
                f,
                "header field {} points at {:#06x}, outside the {}-byte image",
                field, addr, len
            ),
            AddressOutOfRange { addr, len } => write!(
                f,
                "address {:#06x} outside the {}-byte image",
                addr, len
            ),
            ReadOnlyAddress(addr) => write!(f, "write to read-only address {:#06x}", addr),
            UndefinedOpcode { pc, form, opcode } => write!(
                f,
                "undefined {} opcode {:#04x} at pc {:#06x}",
                form, opcode, pc
            ),
            MissingOperand { pc } => write!(f, "missing operand at pc {:#06x}", pc),
            DivisionByZero { pc } => write!(f, "division by zero at pc {:#06x}", pc),
            StackOverflow => write!(f, "evaluation stack overflow"),
            StackUnderflow => write!(f, "evaluation stack underflow"),
            CallStackUnderflow => write!(f, "return with no caller frame"),
            NoSuchLocal { local, count } => write!(
                f,
                "reference to local {} in a frame with {} locals",
                local, count
            ),
            TooManyLocals { addr, count } => write!(
                f,
                "routine at {:#06x} declares {} locals (max 15)",
                addr, count
            ),
            BadObjectNumber(o) => write!(f, "object number {} out of range", o),
            BadAttribute(a) => write!(f, "attribute number {} out of range", a),
            BadPropertyNumber(p) => write!(f, "property number {} out of range", p),
            PropertyNotFound { object, property } => write!(
                f,
                "object {} has no property {}",
                object, property
            ),
            BadPropertySize {
                object,
                property,
                size,
            } => write!(
                f,
                "property {} of object {} has size {}, not 1 or 2",
                property, object, size
            ),
            ObjectLoop {
                object,
                destination,
            } => write!(
                f,
                "inserting object {} under {} would create a cycle",
                object, destination
            ),
            AbbrevTooDeep { addr } => write!(
                f,
                "abbreviation at {:#06x} nests deeper than the format allows",
                addr
            ),
            MalformedDictionary(what) => write!(f, "malformed dictionary: {}", what),
            StreamNestingTooDeep => write!(f, "output stream 3 nested too deeply"),
            MalformedSnapshot(what) => write!(f, "malformed snapshot: {}", what),
            SnapshotMismatch(what) => write!(f, "snapshot is from a different story ({})", what),
            InputClosed => write!(f, "input source closed"),
            IO(e) => write!(f, "i/o error: {}", e),
        }
    }
}

impl From<io::Error> for ZErr {
    fn from(err: io::Error) -> ZErr {
        ZErr::IO(err)
    }
}
