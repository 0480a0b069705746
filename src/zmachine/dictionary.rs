use std::cmp::Ordering;
use std::fmt;

use itertools::Itertools;
use log::debug;

use super::addressing::{ByteAddress, ZOffset};
use super::handle::Handle;
use super::memory::ZMemory;
use super::result::{Result, ZErr};

// The vocabulary table. Its prologue declares everything lookup needs:
//
//   n (u8), n separator bytes, entry length (u8), entry count (i16)
//
// followed by the entries themselves, each holding a 4-byte encoded word
// plus data bytes. A negative count marks the table as unsorted, in which
// case lookup falls back to a linear scan.
pub struct ZDictionary {
    mem_h: Handle<ZMemory>,
    separators: Vec<u8>,
    entry_length: u8,
    entry_count: i16,
    entries: ZOffset,
}

// One word of player input, with where it started in the line.
#[derive(Debug, PartialEq)]
pub struct ZToken {
    pub text: String,
    pub start: usize,
}

impl ZDictionary {
    pub fn new(mem_h: &Handle<ZMemory>, base: ByteAddress) -> Result<ZDictionary> {
        let (separators, entry_length, entry_count) = {
            let mem = mem_h.borrow();
            let n = mem.read_byte(base)?;
            let mut separators = Vec::with_capacity(usize::from(n));
            for i in 0..usize::from(n) {
                separators.push(mem.read_byte(base.inc_by(1 + i))?);
            }
            let entry_length = mem.read_byte(base.inc_by(1 + usize::from(n)))?;
            let entry_count = mem.read_word(base.inc_by(2 + usize::from(n)))? as i16;
            (separators, entry_length, entry_count)
        };

        if entry_length < 4 {
            return Err(ZErr::MalformedDictionary("entry length below 4"));
        }

        let entries = base.inc_by(4 + separators.len());
        let extent = entries
            .value()
            .saturating_add(usize::from(entry_length) * entry_count.unsigned_abs() as usize);
        if extent > mem_h.borrow().len() {
            return Err(ZErr::MalformedDictionary("entries past end of image"));
        }

        let dict = ZDictionary {
            mem_h: mem_h.clone(),
            separators,
            entry_length,
            entry_count,
            entries,
        };
        debug!("dictionary: {}", dict);
        Ok(dict)
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count.unsigned_abs() as usize
    }

    fn entry_address(&self, index: usize) -> ZOffset {
        self.entries.inc_by(index * usize::from(self.entry_length))
    }

    fn entry_key(&self, index: usize) -> Result<[u8; 4]> {
        let mem = self.mem_h.borrow();
        let at = self.entry_address(index);
        let mut key = [0u8; 4];
        for (i, slot) in key.iter_mut().enumerate() {
            *slot = mem.read_byte(at.inc_by(i))?;
        }
        Ok(key)
    }

    // Exact-match lookup of an encoded word. None is the "not found"
    // sentinel the lookup opcodes turn into 0.
    pub fn lookup(&self, key: &[u8; 4]) -> Result<Option<ByteAddress>> {
        if self.entry_count < 0 {
            return self.linear_lookup(key);
        }

        let mut low = 0usize;
        let mut high = self.entry_count();
        while low < high {
            let mid = (low + high) / 2;
            match self.entry_key(mid)?.cmp(key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid,
                Ordering::Equal => {
                    return Ok(Some(ByteAddress::from_raw(
                        self.entry_address(mid).value() as u16,
                    )));
                }
            }
        }
        Ok(None)
    }

    fn linear_lookup(&self, key: &[u8; 4]) -> Result<Option<ByteAddress>> {
        for index in 0..self.entry_count() {
            if &self.entry_key(index)? == key {
                return Ok(Some(ByteAddress::from_raw(
                    self.entry_address(index).value() as u16,
                )));
            }
        }
        Ok(None)
    }

    // Split an input line into tokens: runs of non-space characters,
    // except that the dictionary's separator characters always stand
    // alone as single-character tokens.
    pub fn tokenize(&self, line: &str) -> Vec<ZToken> {
        let bytes = line.as_bytes();
        let mut tokens = Vec::new();
        let mut word_start: Option<usize> = None;

        let flush = |tokens: &mut Vec<ZToken>, start: &mut Option<usize>, end: usize| {
            if let Some(from) = start.take() {
                tokens.push(ZToken {
                    text: line[from..end].to_string(),
                    start: from,
                });
            }
        };

        for (i, &byte) in bytes.iter().enumerate() {
            if byte == b' ' {
                flush(&mut tokens, &mut word_start, i);
            } else if self.separators.contains(&byte) {
                flush(&mut tokens, &mut word_start, i);
                tokens.push(ZToken {
                    text: line[i..=i].to_string(),
                    start: i,
                });
            } else if word_start.is_none() {
                word_start = Some(i);
            }
        }
        flush(&mut tokens, &mut word_start, bytes.len());

        tokens
    }
}

impl fmt::Display for ZDictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} entries of {} bytes, separators [{}]",
            self.entry_count(),
            self.entry_length,
            self.separators
                .iter()
                .map(|b| format!("'{}'", char::from(*b)))
                .join(", ")
        )
    }
}

#[cfg(test)]
mod test {
    use super::super::fixtures::{self, wword};
    use super::super::zscii::encode_word;
    use super::*;

    // A dictionary with one separator (',') and the sorted entries
    // ["north", "south"].
    fn dict_bytes(count: u16, first: &str, second: &str) -> Vec<u8> {
        let mut bytes = fixtures::basic_story_bytes();
        let base = fixtures::DICT;
        bytes[base] = 1;
        bytes[base + 1] = b',';
        bytes[base + 2] = 7;
        wword(&mut bytes, base + 3, count);
        bytes[base + 5..base + 9].copy_from_slice(&encode_word(first));
        bytes[base + 12..base + 16].copy_from_slice(&encode_word(second));
        bytes
    }

    fn dictionary(bytes: &[u8]) -> ZDictionary {
        let (mem_h, header) = fixtures::story_from_bytes(bytes);
        ZDictionary::new(&mem_h, header.dictionary_location().unwrap()).unwrap()
    }

    #[test]
    fn test_lookup_sorted() {
        let dict = dictionary(&dict_bytes(2, "north", "south"));

        let hit = dict.lookup(&encode_word("north")).unwrap().unwrap();
        assert_eq!(fixtures::DICT + 5, usize::from(hit.value()));
        let hit = dict.lookup(&encode_word("south")).unwrap().unwrap();
        assert_eq!(fixtures::DICT + 12, usize::from(hit.value()));

        assert_eq!(None, dict.lookup(&encode_word("northeast")).unwrap());
    }

    #[test]
    fn test_lookup_unsorted() {
        // Negative count: entries in no particular order.
        let bytes = dict_bytes(0xfffe, "south", "north");
        let dict = dictionary(&bytes);

        assert!(dict.lookup(&encode_word("north")).unwrap().is_some());
        assert!(dict.lookup(&encode_word("south")).unwrap().is_some());
        assert_eq!(None, dict.lookup(&encode_word("east")).unwrap());
    }

    #[test]
    fn test_rejects_bad_prologue() {
        let mut bytes = fixtures::basic_story_bytes();
        bytes[fixtures::DICT + 1] = 3; // entry length below 4
        let (mem_h, header) = fixtures::story_from_bytes(&bytes);
        assert!(ZDictionary::new(&mem_h, header.dictionary_location().unwrap()).is_err());

        // Claimed entries run past the end of the image.
        let mut bytes = fixtures::basic_story_bytes();
        wword(&mut bytes, fixtures::DICT + 2, 0x4000);
        let (mem_h, header) = fixtures::story_from_bytes(&bytes);
        assert!(ZDictionary::new(&mem_h, header.dictionary_location().unwrap()).is_err());
    }

    #[test]
    fn test_tokenize() {
        let dict = dictionary(&dict_bytes(2, "north", "south"));
        let tokens = dict.tokenize("go north, then  south");

        let expect = [
            ("go", 0),
            ("north", 3),
            (",", 8),
            ("then", 10),
            ("south", 16),
        ];
        assert_eq!(expect.len(), tokens.len());
        for (token, (text, start)) in tokens.iter().zip(expect.iter()) {
            assert_eq!(*text, token.text);
            assert_eq!(*start, token.start);
        }
    }

    #[test]
    fn test_tokenize_empty_and_spaces() {
        let dict = dictionary(&dict_bytes(2, "north", "south"));
        assert!(dict.tokenize("").is_empty());
        assert!(dict.tokenize("   ").is_empty());
    }
}
