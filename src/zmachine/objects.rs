use log::debug;

use super::addressing::{ByteAddress, ZOffset};
use super::constants::{MAX_OBJECTS, OBJECT_ENTRY_SIZE, PROPERTY_DEFAULTS};
use super::handle::Handle;
use super::header::ZHeader;
use super::memory::ZMemory;
use super::result::{Result, ZErr};
use super::zscii;

// The object table: 31 default-property words, then 9-byte entries, one
// per object:
//
//   4 bytes   attribute flags 0-31
//   1 byte    parent object number
//   1 byte    sibling object number
//   1 byte    child object number
//   1 word    property table address
//
// Each property table: a text-length byte, the encoded short name, then
// property records (size/number byte, data bytes) ending at a zero byte.
const OFFSET_PARENT: usize = 4;
const OFFSET_SIBLING: usize = 5;
const OFFSET_CHILD: usize = 6;
const OFFSET_PROPS: usize = 7;

pub struct ZObjectTable {
    mem_h: Handle<ZMemory>,
    abbrevs: ByteAddress,
    defaults: ByteAddress,
    tree: ZOffset,
    count: u16,
}

struct PropRecord {
    number: u8,
    size: u8,
    data: ZOffset,
    next: ZOffset,
}

impl ZObjectTable {
    pub fn new(mem_h: &Handle<ZMemory>, header: &ZHeader) -> Result<ZObjectTable> {
        let defaults = header.otable_location()?;
        let tree = defaults.inc_by(2 * usize::from(PROPERTY_DEFAULTS));
        let count = ZObjectTable::compute_count(mem_h, tree);
        debug!("object table at {:#06x}, {} objects", defaults.value(), count);

        Ok(ZObjectTable {
            mem_h: mem_h.clone(),
            abbrevs: header.abbrev_location()?,
            defaults,
            tree,
            count,
        })
    }

    // The table has no explicit length; entries run up to the lowest
    // property table, which by convention sits immediately after them.
    fn compute_count(mem_h: &Handle<ZMemory>, tree: ZOffset) -> u16 {
        let mem = mem_h.borrow();
        let mut count = 0u16;
        let mut boundary = usize::MAX;

        while count < MAX_OBJECTS {
            let entry = tree.inc_by(usize::from(OBJECT_ENTRY_SIZE) * usize::from(count));
            if entry.value() + usize::from(OBJECT_ENTRY_SIZE) > boundary {
                break;
            }
            match mem.read_word(entry.inc_by(OFFSET_PROPS)) {
                Ok(prop_addr) => {
                    let prop_addr = usize::from(prop_addr);
                    if prop_addr != 0 && prop_addr < boundary {
                        boundary = prop_addr;
                    }
                }
                Err(_) => break,
            }
            count += 1;
        }
        count
    }

    pub fn object_count(&self) -> u16 {
        self.count
    }

    fn entry(&self, obj: u16) -> Result<ZOffset> {
        if obj == 0 || obj > self.count {
            return Err(ZErr::BadObjectNumber(obj));
        }
        Ok(self
            .tree
            .inc_by(usize::from(OBJECT_ENTRY_SIZE) * usize::from(obj - 1)))
    }

    fn link(&self, obj: u16, offset: usize) -> Result<u16> {
        let entry = self.entry(obj)?;
        Ok(u16::from(self.mem_h.borrow().read_byte(entry.inc_by(offset))?))
    }

    fn set_link(&mut self, obj: u16, offset: usize, target: u16) -> Result<()> {
        let entry = self.entry(obj)?;
        self.mem_h
            .borrow_mut()
            .write_byte(entry.inc_by(offset), target as u8)
    }

    pub fn parent(&self, obj: u16) -> Result<u16> {
        self.link(obj, OFFSET_PARENT)
    }

    pub fn sibling(&self, obj: u16) -> Result<u16> {
        self.link(obj, OFFSET_SIBLING)
    }

    pub fn child(&self, obj: u16) -> Result<u16> {
        self.link(obj, OFFSET_CHILD)
    }

    //
    // Attributes.
    //

    fn attr_location(&self, obj: u16, attr: u16) -> Result<(ZOffset, u8)> {
        if attr > 31 {
            return Err(ZErr::BadAttribute(attr));
        }
        let entry = self.entry(obj)?;
        Ok((entry.inc_by(usize::from(attr / 8)), 7 - (attr % 8) as u8))
    }

    pub fn test_attr(&self, obj: u16, attr: u16) -> Result<bool> {
        let (at, bit) = self.attr_location(obj, attr)?;
        Ok(self.mem_h.borrow().read_byte(at)? & (1 << bit) != 0)
    }

    pub fn set_attr(&mut self, obj: u16, attr: u16) -> Result<()> {
        let (at, bit) = self.attr_location(obj, attr)?;
        let byte = self.mem_h.borrow().read_byte(at)?;
        self.mem_h.borrow_mut().write_byte(at, byte | (1 << bit))
    }

    pub fn clear_attr(&mut self, obj: u16, attr: u16) -> Result<()> {
        let (at, bit) = self.attr_location(obj, attr)?;
        let byte = self.mem_h.borrow().read_byte(at)?;
        self.mem_h.borrow_mut().write_byte(at, byte & !(1 << bit))
    }

    //
    // Tree surgery.
    //

    // Detach obj from its parent's child chain. Afterwards obj has no
    // parent and no sibling; its own children come along with it.
    pub fn remove_obj(&mut self, obj: u16) -> Result<()> {
        let parent = self.parent(obj)?;
        if parent != 0 {
            let next = self.sibling(obj)?;
            if self.child(parent)? == obj {
                self.set_link(parent, OFFSET_CHILD, next)?;
            } else {
                let mut cursor = self.child(parent)?;
                let mut steps = 0;
                while cursor != 0 && steps <= self.count {
                    let after = self.sibling(cursor)?;
                    if after == obj {
                        self.set_link(cursor, OFFSET_SIBLING, next)?;
                        break;
                    }
                    cursor = after;
                    steps += 1;
                }
            }
        }
        self.set_link(obj, OFFSET_PARENT, 0)?;
        self.set_link(obj, OFFSET_SIBLING, 0)
    }

    // Make obj the first child of dest. Inserting an object somewhere in
    // its own subtree would close a cycle, which no amount of later
    // surgery can undo, so that is refused outright.
    pub fn insert_obj(&mut self, obj: u16, dest: u16) -> Result<()> {
        self.entry(obj)?;
        self.entry(dest)?;

        let mut ancestor = dest;
        let mut steps = 0;
        while ancestor != 0 {
            if ancestor == obj {
                return Err(ZErr::ObjectLoop {
                    object: obj,
                    destination: dest,
                });
            }
            ancestor = self.parent(ancestor)?;
            steps += 1;
            if steps > self.count {
                return Err(ZErr::ObjectLoop {
                    object: obj,
                    destination: dest,
                });
            }
        }

        self.remove_obj(obj)?;
        let old_child = self.child(dest)?;
        self.set_link(obj, OFFSET_SIBLING, old_child)?;
        self.set_link(obj, OFFSET_PARENT, dest)?;
        self.set_link(dest, OFFSET_CHILD, obj)
    }

    //
    // Properties.
    //

    fn prop_table(&self, obj: u16) -> Result<ByteAddress> {
        let entry = self.entry(obj)?;
        let addr = self.mem_h.borrow().read_word(entry.inc_by(OFFSET_PROPS))?;
        Ok(ByteAddress::from_raw(addr))
    }

    pub fn name(&self, obj: u16) -> Result<String> {
        let table = self.prop_table(obj)?;
        let text_len = self.mem_h.borrow().read_byte(table)?;
        if text_len == 0 {
            return Ok(String::new());
        }
        zscii::decode_zstr(&self.mem_h, self.abbrevs, table.inc_by(1))
    }

    fn first_prop_offset(&self, obj: u16) -> Result<ZOffset> {
        let table = self.prop_table(obj)?;
        let text_len = self.mem_h.borrow().read_byte(table)?;
        Ok(table.inc_by(1 + 2 * usize::from(text_len)))
    }

    fn prop_at(&self, at: ZOffset) -> Result<Option<PropRecord>> {
        let size_byte = self.mem_h.borrow().read_byte(at)?;
        if size_byte == 0 {
            return Ok(None);
        }
        let size = (size_byte >> 5) + 1;
        Ok(Some(PropRecord {
            number: size_byte & 0x1f,
            size,
            data: at.inc_by(1),
            next: at.inc_by(1 + usize::from(size)),
        }))
    }

    // Property records are stored in descending number order; the walk
    // stops at the zero terminator either way.
    fn find_prop(&self, obj: u16, prop: u8) -> Result<Option<PropRecord>> {
        let mut at = self.first_prop_offset(obj)?;
        while let Some(record) = self.prop_at(at)? {
            if record.number == prop {
                return Ok(Some(record));
            }
            at = record.next;
        }
        Ok(None)
    }

    pub fn default_prop(&self, prop: u8) -> Result<u16> {
        if prop == 0 || u16::from(prop) > PROPERTY_DEFAULTS {
            return Err(ZErr::BadPropertyNumber(prop));
        }
        self.mem_h
            .borrow()
            .read_word(self.defaults.inc_by(2 * usize::from(prop - 1)))
    }

    // A missing property is not an error: the per-class default stands in.
    pub fn get_prop(&self, obj: u16, prop: u8) -> Result<u16> {
        match self.find_prop(obj, prop)? {
            None => self.default_prop(prop),
            Some(record) => match record.size {
                1 => Ok(u16::from(self.mem_h.borrow().read_byte(record.data)?)),
                2 => self.mem_h.borrow().read_word(record.data),
                size => Err(ZErr::BadPropertySize {
                    object: obj,
                    property: prop,
                    size,
                }),
            },
        }
    }

    // Properties cannot be created at runtime; writing one the object
    // does not carry is fatal.
    pub fn put_prop(&mut self, obj: u16, prop: u8, val: u16) -> Result<()> {
        match self.find_prop(obj, prop)? {
            None => Err(ZErr::PropertyNotFound {
                object: obj,
                property: prop,
            }),
            Some(record) => match record.size {
                1 => self
                    .mem_h
                    .borrow_mut()
                    .write_byte(record.data, (val & 0xff) as u8),
                2 => self.mem_h.borrow_mut().write_word(record.data, val),
                size => Err(ZErr::BadPropertySize {
                    object: obj,
                    property: prop,
                    size,
                }),
            },
        }
    }

    pub fn get_prop_addr(&self, obj: u16, prop: u8) -> Result<u16> {
        match self.find_prop(obj, prop)? {
            None => Ok(0),
            Some(record) => Ok(record.data.value() as u16),
        }
    }

    // The address here is one returned by get_prop_addr; zero propagates
    // as zero.
    pub fn get_prop_len(&self, addr: u16) -> Result<u16> {
        if addr == 0 {
            return Ok(0);
        }
        let size_byte = self
            .mem_h
            .borrow()
            .read_byte(ByteAddress::from_raw(addr - 1))?;
        Ok(u16::from(size_byte >> 5) + 1)
    }

    pub fn get_next_prop(&self, obj: u16, prop: u8) -> Result<u16> {
        if prop == 0 {
            let at = self.first_prop_offset(obj)?;
            return Ok(self.prop_at(at)?.map_or(0, |r| u16::from(r.number)));
        }
        match self.find_prop(obj, prop)? {
            None => Err(ZErr::PropertyNotFound {
                object: obj,
                property: prop,
            }),
            Some(record) => Ok(self
                .prop_at(record.next)?
                .map_or(0, |r| u16::from(r.number))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::super::fixtures;
    use super::*;

    // See fixtures::object_story_bytes for the three-object layout used
    // throughout these tests.
    fn object_story() -> ZObjectTable {
        let (mem_h, header) = fixtures::story_from_bytes(&fixtures::object_story_bytes());
        ZObjectTable::new(&mem_h, &header).unwrap()
    }

    fn children(table: &ZObjectTable, parent: u16) -> Vec<u16> {
        let mut result = Vec::new();
        let mut cursor = table.child(parent).unwrap();
        while cursor != 0 {
            result.push(cursor);
            cursor = table.sibling(cursor).unwrap();
        }
        result
    }

    #[test]
    fn test_object_count_and_validation() {
        let table = object_story();
        assert_eq!(3, table.object_count());
        match table.parent(4) {
            Err(ZErr::BadObjectNumber(4)) => (),
            other => panic!("object 4: {:?}", other),
        }
        match table.parent(0) {
            Err(ZErr::BadObjectNumber(0)) => (),
            other => panic!("object 0: {:?}", other),
        }
    }

    #[test]
    fn test_links_and_names() {
        let table = object_story();
        assert_eq!(vec![2, 3], children(&table, 1));
        assert_eq!(1, table.parent(2).unwrap());
        assert_eq!("a", table.name(1).unwrap());
        assert_eq!("c", table.name(3).unwrap());
    }

    #[test]
    fn test_attributes() {
        let mut table = object_story();
        assert!(table.test_attr(1, 0).unwrap());
        assert!(table.test_attr(1, 17).unwrap());
        assert!(!table.test_attr(1, 16).unwrap());
        assert!(!table.test_attr(2, 0).unwrap());

        table.set_attr(2, 31).unwrap();
        assert!(table.test_attr(2, 31).unwrap());
        table.clear_attr(2, 31).unwrap();
        assert!(!table.test_attr(2, 31).unwrap());

        match table.test_attr(1, 32) {
            Err(ZErr::BadAttribute(32)) => (),
            other => panic!("attr 32: {:?}", other),
        }
    }

    #[test]
    fn test_properties() {
        let mut table = object_story();
        assert_eq!(0x1122, table.get_prop(1, 5).unwrap());
        assert_eq!(0x33, table.get_prop(1, 1).unwrap());

        // Missing property falls back to the defaults table.
        assert_eq!(0x0202, table.get_prop(1, 2).unwrap());
        assert_eq!(0x0505, table.get_prop(2, 5).unwrap());

        table.put_prop(1, 5, 0xbeef).unwrap();
        assert_eq!(0xbeef, table.get_prop(1, 5).unwrap());
        table.put_prop(1, 1, 0x1234).unwrap();
        assert_eq!(0x34, table.get_prop(1, 1).unwrap());

        match table.put_prop(1, 2, 0) {
            Err(ZErr::PropertyNotFound {
                object: 1,
                property: 2,
            }) => (),
            other => panic!("put missing prop: {:?}", other),
        }
    }

    #[test]
    fn test_prop_addr_len_next() {
        let table = object_story();
        let addr = table.get_prop_addr(1, 5).unwrap();
        assert_eq!(0x164, usize::from(addr));
        assert_eq!(2, table.get_prop_len(addr).unwrap());
        assert_eq!(0, table.get_prop_addr(1, 9).unwrap());
        assert_eq!(0, table.get_prop_len(0).unwrap());

        assert_eq!(5, table.get_next_prop(1, 0).unwrap());
        assert_eq!(1, table.get_next_prop(1, 5).unwrap());
        assert_eq!(0, table.get_next_prop(1, 1).unwrap());
        assert!(table.get_next_prop(1, 7).is_err());
    }

    #[test]
    fn test_remove_and_insert() {
        let mut table = object_story();

        table.remove_obj(2).unwrap();
        assert_eq!(0, table.parent(2).unwrap());
        assert_eq!(vec![3], children(&table, 1));

        table.insert_obj(2, 3).unwrap();
        assert_eq!(vec![2], children(&table, 3));
        assert_eq!(3, table.parent(2).unwrap());
    }

    #[test]
    fn test_reinsert_moves_to_front() {
        let mut table = object_story();
        // 1 has children [2, 3]; re-inserting 3 puts it first.
        table.insert_obj(3, 1).unwrap();
        assert_eq!(vec![3, 2], children(&table, 1));
        assert_eq!(1, table.parent(3).unwrap());

        // Every child still appears exactly once.
        table.insert_obj(2, 1).unwrap();
        assert_eq!(vec![2, 3], children(&table, 1));
    }

    #[test]
    fn test_insert_into_own_subtree_is_refused() {
        let mut table = object_story();
        match table.insert_obj(1, 2) {
            Err(ZErr::ObjectLoop {
                object: 1,
                destination: 2,
            }) => (),
            other => panic!("cycle insert: {:?}", other),
        }
        // The tree is untouched.
        assert_eq!(vec![2, 3], children(&table, 1));
    }
}
