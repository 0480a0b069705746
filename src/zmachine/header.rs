use super::addressing::ByteAddress;
use super::handle::Handle;
use super::memory::ZMemory;
use super::result::{Result, ZErr};
use super::version::ZVersion;

// Offsets for fields in the header.
pub const OS_VERSION: u16 = 0x00;
pub const OS_FLAGS1: u16 = 0x01;
pub const OS_RELEASE: u16 = 0x02;
pub const OS_HIGH_MEM: u16 = 0x04;
pub const OS_START_PC: u16 = 0x06;
pub const OS_DICTIONARY: u16 = 0x08;
pub const OS_OBJECT_TABLE: u16 = 0x0a;
pub const OS_GLOBALS: u16 = 0x0c;
pub const OS_STATIC_MEM: u16 = 0x0e;
pub const OS_FLAGS2: u16 = 0x10;
pub const OS_FLAGS2_LOW: u16 = 0x11;
pub const OS_SERIAL: u16 = 0x12;
pub const OS_ABBREVS: u16 = 0x18;
pub const OS_FILE_LEN: u16 = 0x1a;
pub const OS_CHECKSUM: u16 = 0x1c;

// Read a story's header information.
//
// Fields are read through the memory handle on demand. The version byte is
// cached because it is consulted constantly and is frozen after load.
pub struct ZHeader {
    memory: Handle<ZMemory>,
    z_version: ZVersion,
}

impl ZHeader {
    pub fn new(memory: &Handle<ZMemory>) -> Result<ZHeader> {
        let z_version =
            ZVersion::new(memory.borrow().read_byte(ByteAddress::from_raw(OS_VERSION))?)?;

        let hdr = ZHeader {
            memory: memory.clone(),
            z_version,
        };
        hdr.validate()?;
        Ok(hdr)
    }

    // Every address the header declares must land inside the image before
    // anything dereferences it. Dereferences stay bounds-checked afterward,
    // but a story that fails here is broken and should never start.
    fn validate(&self) -> Result<()> {
        let len = self.memory.borrow().len();
        let check = |field: &'static str, addr: usize| {
            if addr >= len {
                Err(ZErr::HeaderOutOfRange { field, addr, len })
            } else {
                Ok(())
            }
        };

        check("initial pc", self.start_pc()?.value().into())?;
        check("dictionary", self.dictionary_location()?.value().into())?;
        check("object table", self.otable_location()?.value().into())?;
        check("globals", self.global_location()?.value().into())?;
        check("abbreviations", self.abbrev_location()?.value().into())?;
        check("high memory", self.high_mem_base()?.value().into())?;

        let static_base = usize::from(self.static_mem_base()?.value());
        if static_base > len {
            return Err(ZErr::HeaderOutOfRange {
                field: "static memory",
                addr: static_base,
                len,
            });
        }

        let file_length = self.file_length()?;
        if file_length > len {
            return Err(ZErr::HeaderOutOfRange {
                field: "file length",
                addr: file_length,
                len,
            });
        }

        Ok(())
    }

    pub fn version_number(&self) -> ZVersion {
        self.z_version
    }

    fn word_field(&self, offset: u16) -> Result<u16> {
        self.memory.borrow().read_word(ByteAddress::from_raw(offset))
    }

    fn address_field(&self, offset: u16) -> Result<ByteAddress> {
        Ok(ByteAddress::from_raw(self.word_field(offset)?))
    }

    pub fn release(&self) -> Result<u16> {
        self.word_field(OS_RELEASE)
    }

    pub fn high_mem_base(&self) -> Result<ByteAddress> {
        self.address_field(OS_HIGH_MEM)
    }

    pub fn start_pc(&self) -> Result<ByteAddress> {
        self.address_field(OS_START_PC)
    }

    pub fn dictionary_location(&self) -> Result<ByteAddress> {
        self.address_field(OS_DICTIONARY)
    }

    pub fn otable_location(&self) -> Result<ByteAddress> {
        self.address_field(OS_OBJECT_TABLE)
    }

    pub fn global_location(&self) -> Result<ByteAddress> {
        self.address_field(OS_GLOBALS)
    }

    pub fn static_mem_base(&self) -> Result<ByteAddress> {
        self.address_field(OS_STATIC_MEM)
    }

    pub fn abbrev_location(&self) -> Result<ByteAddress> {
        self.address_field(OS_ABBREVS)
    }

    pub fn serial(&self) -> Result<[u8; 6]> {
        let mem = self.memory.borrow();
        let mut serial = [0u8; 6];
        for (i, slot) in serial.iter_mut().enumerate() {
            *slot = mem.read_byte(ByteAddress::from_raw(OS_SERIAL).inc_by(i))?;
        }
        Ok(serial)
    }

    pub fn file_length(&self) -> Result<usize> {
        let raw_file_length = self.word_field(OS_FILE_LEN)?;
        Ok(self.z_version.convert_file_length(raw_file_length))
    }

    pub fn checksum(&self) -> Result<u16> {
        self.word_field(OS_CHECKSUM)
    }
}
