use std::collections::HashMap;

use itertools::Itertools;
use lazy_static::lazy_static;
use log::warn;

use super::addressing::{ByteAddress, WordAddress, ZOffset};
use super::constants::MAX_ABBREV_DEPTH;
use super::handle::Handle;
use super::memory::ZMemory;
use super::result::{Result, ZErr};
use super::traits::PC;

// Three 5-bit characters to a word; the word's high bit terminates the
// string.
const ALPHABET_A0: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHABET_A1: &[u8; 26] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
// Codes 6 and 7 of A2 are special (10-bit escape, newline); the leading
// two bytes here are placeholders.
const ALPHABET_A2: &[u8; 26] = b"^^0123456789.,!?_#'\"/\\-:()";

// Code 5 is harmless trailing padding.
const PAD_ZCHAR: u8 = 5;

#[derive(Clone, Copy, PartialEq)]
enum Alphabet {
    A0,
    A1,
    A2,
}

enum DecodeState {
    Normal,
    Abbrev(u8),
    Escape1,
    Escape2(u8),
}

// Decode the string the PC currently points at (inline string literals),
// leaving the PC on the byte after the terminator word.
pub fn decode_zstr_from_pc<P>(
    mem: &Handle<ZMemory>,
    abbrevs: ByteAddress,
    pc: &mut P,
) -> Result<String>
where
    P: PC,
{
    let mut zstr = String::new();
    decode_into(mem, abbrevs, &mut || pc.next_word(), 0, &mut zstr)?;
    Ok(zstr)
}

// Decode the string at a fixed location in the story.
pub fn decode_zstr<T>(mem: &Handle<ZMemory>, abbrevs: ByteAddress, at: T) -> Result<String>
where
    T: Into<ZOffset>,
{
    let mut zstr = String::new();
    let mut zoffset = at.into();
    decode_into(
        mem,
        abbrevs,
        &mut || {
            let word = mem.borrow().read_word(zoffset)?;
            zoffset = zoffset.inc_by(2);
            Ok(word)
        },
        0,
        &mut zstr,
    )?;
    Ok(zstr)
}

fn break_apart_word(word: u16) -> (bool, [u8; 3]) {
    let done = (word & 0b1000_0000_0000_0000) != 0;
    let zc1 = (word & 0b0111_1100_0000_0000) >> 10;
    let zc2 = (word & 0b0000_0011_1110_0000) >> 5;
    let zc3 = word & 0b0000_0000_0001_1111;

    (done, [zc1 as u8, zc2 as u8, zc3 as u8])
}

// The shared decoding loop. next_word is dynamic so abbreviation
// expansion can recurse through a differently-shaped word source.
fn decode_into(
    mem: &Handle<ZMemory>,
    abbrevs: ByteAddress,
    next_word: &mut dyn FnMut() -> Result<u16>,
    depth: u8,
    out: &mut String,
) -> Result<()> {
    let mut state = DecodeState::Normal;
    // A shift affects exactly the next alphabet character.
    let mut shift: Option<Alphabet> = None;

    loop {
        let (done, zchars) = break_apart_word(next_word()?);

        for zc in zchars.iter().cloned() {
            match state {
                DecodeState::Abbrev(table) => {
                    expand_abbrev(mem, abbrevs, table, zc, depth, out)?;
                    state = DecodeState::Normal;
                }
                DecodeState::Escape1 => {
                    state = DecodeState::Escape2(zc);
                }
                DecodeState::Escape2(high) => {
                    push_zscii((u16::from(high) << 5) + u16::from(zc), out);
                    state = DecodeState::Normal;
                }
                DecodeState::Normal => match zc {
                    0 => {
                        out.push(' ');
                        shift = None;
                    }
                    1..=3 => {
                        state = DecodeState::Abbrev(zc);
                        shift = None;
                    }
                    4 => shift = Some(Alphabet::A1),
                    5 => shift = Some(Alphabet::A2),
                    _ => {
                        let index = usize::from(zc - 6);
                        match shift.take().unwrap_or(Alphabet::A0) {
                            Alphabet::A0 => out.push(char::from(ALPHABET_A0[index])),
                            Alphabet::A1 => out.push(char::from(ALPHABET_A1[index])),
                            Alphabet::A2 => match zc {
                                6 => state = DecodeState::Escape1,
                                7 => out.push('\n'),
                                _ => out.push(char::from(ALPHABET_A2[index])),
                            },
                        }
                    }
                },
            }
        }

        if done {
            return Ok(());
        }
    }
}

// Splice in abbreviation (table, index). Abbreviation strings may not
// themselves reach this deep again: the format allows one level, and a
// table that chains further is corrupt (or crafted to loop).
fn expand_abbrev(
    mem: &Handle<ZMemory>,
    abbrevs: ByteAddress,
    table: u8,
    index: u8,
    depth: u8,
    out: &mut String,
) -> Result<()> {
    let entry_number = 32 * u16::from(table - 1) + u16::from(index);
    let entry_offset = abbrevs.inc_by(2 * usize::from(entry_number));

    if depth >= MAX_ABBREV_DEPTH {
        return Err(ZErr::AbbrevTooDeep {
            addr: entry_offset.value(),
        });
    }

    let string_addr = WordAddress::from_raw(mem.borrow().read_word(entry_offset)?);
    let mut zoffset = ZOffset::from(string_addr);
    decode_into(
        mem,
        abbrevs,
        &mut || {
            let word = mem.borrow().read_word(zoffset)?;
            zoffset = zoffset.inc_by(2);
            Ok(word)
        },
        depth + 1,
        out,
    )
}

// The printable slice of the character set: newline, and the ascii range.
// Code 0 is "no character".
pub fn zscii_char(code: u16) -> Option<char> {
    match code {
        13 => Some('\n'),
        32..=126 => Some(code as u8 as char),
        _ => None,
    }
}

fn push_zscii(code: u16, out: &mut String) {
    if code == 0 {
        return;
    }
    match zscii_char(code) {
        Some(ch) => out.push(ch),
        None => {
            warn!("unprintable zscii code {}", code);
            out.push('?');
        }
    }
}

lazy_static! {
    // Reverse lookup for encoding: which A2 code produces this character.
    static ref A2_CODES: HashMap<char, u8> = ALPHABET_A2
        .iter()
        .enumerate()
        .skip(2)
        .map(|(index, byte)| (char::from(*byte), (index + 6) as u8))
        .collect();
}

fn push_zchars_for(ch: char, zchars: &mut Vec<u8>) {
    match ch {
        'a'..='z' => zchars.push(6 + (ch as u8 - b'a')),
        ' ' => zchars.push(0),
        '\n' => zchars.extend(&[5, 7]),
        _ => {
            if let Some(code) = A2_CODES.get(&ch) {
                zchars.extend(&[5, *code]);
            } else if (ch as u32) < 0x400 {
                // 10-bit literal escape.
                let code = ch as u16;
                zchars.extend(&[5, 6, (code >> 5) as u8 & 0x1f, code as u8 & 0x1f]);
            }
            // Anything wider cannot be encoded and drops out, which
            // matches how lookups treat untypeable characters.
        }
    }
}

// Encode a single (already lowercased) token the way dictionary keys are
// stored: six z-characters packed into two words, terminator bit on the
// second.
pub fn encode_word(word: &str) -> [u8; 4] {
    let mut zchars = Vec::new();
    for ch in word.chars().flat_map(char::to_lowercase) {
        push_zchars_for(ch, &mut zchars);
    }

    let mut encoded = [0u8; 4];
    for (i, (zc1, zc2, zc3)) in zchars
        .into_iter()
        .take(6)
        .pad_using(6, |_| PAD_ZCHAR)
        .tuples()
        .enumerate()
    {
        let mut word =
            (u16::from(zc1) << 10) + (u16::from(zc2) << 5) + u16::from(zc3);
        if i == 1 {
            word |= 0x8000;
        }
        encoded[2 * i] = (word >> 8) as u8;
        encoded[2 * i + 1] = (word & 0xff) as u8;
    }
    encoded
}

#[cfg(test)]
mod test {
    use super::super::fixtures::{self, wword};
    use super::*;

    fn abbrevs() -> ByteAddress {
        ByteAddress::from_raw(fixtures::ABBREVS as u16)
    }

    // "hello" = z-chars 13,10,17,17,20 plus padding.
    const HELLO: [(usize, u8); 4] = [
        (0x200, 0x35),
        (0x201, 0x51),
        (0x202, 0xc6),
        (0x203, 0x85),
    ];

    #[test]
    fn test_simple_string() {
        let (mem_h, _) = fixtures::test_story(&HELLO);
        assert_eq!(
            "hello",
            decode_zstr(&mem_h, abbrevs(), 0x200usize).unwrap()
        );
    }

    #[test]
    fn test_all_alphabets_and_shifts() {
        // "Hi!" = 4,13 (shift A1, 'H'), 14 ('i'), 5,20 (shift A2, '!'),
        // padded with 5.
        let mut bytes = fixtures::basic_story_bytes();
        wword(&mut bytes, 0x200, (4 << 10) + (13 << 5) + 14);
        wword(&mut bytes, 0x202, 0x8000 + (5 << 10) + (20 << 5) + 5);
        let (mem_h, _) = fixtures::story_from_bytes(&bytes);

        assert_eq!("Hi!", decode_zstr(&mem_h, abbrevs(), 0x200usize).unwrap());
    }

    #[test]
    fn test_zscii_escape() {
        // '@' is zscii 64: 5 (shift A2), 6 (escape), 2, 0.
        let mut bytes = fixtures::basic_story_bytes();
        wword(&mut bytes, 0x200, (5 << 10) + (6 << 5) + 2);
        wword(&mut bytes, 0x202, 0x8000 + (0 << 10) + (5 << 5) + 5);
        let (mem_h, _) = fixtures::story_from_bytes(&bytes);

        assert_eq!("@", decode_zstr(&mem_h, abbrevs(), 0x200usize).unwrap());
    }

    // Install abbreviation 0 of table 1 as "the " (at 0x500) and
    // abbreviation 1 as a string that itself references abbreviation 0.
    fn bytes_with_abbrevs() -> Vec<u8> {
        let mut bytes = fixtures::basic_story_bytes();
        wword(&mut bytes, fixtures::ABBREVS, 0x500 / 2);
        wword(&mut bytes, fixtures::ABBREVS + 2, 0x508 / 2);

        // "the " = 25,13,10 then 0,5,5.
        wword(&mut bytes, 0x500, (25 << 10) + (13 << 5) + 10);
        wword(&mut bytes, 0x502, 0x8000 + (0 << 10) + (5 << 5) + 5);

        // abbrev 1 = [abbrev 0] + "re": 1,0,23 then 10,5,5.
        wword(&mut bytes, 0x508, (1 << 10) + (0 << 5) + 23);
        wword(&mut bytes, 0x50a, 0x8000 + (10 << 10) + (5 << 5) + 5);

        bytes
    }

    #[test]
    fn test_abbreviation_expansion() {
        // "[abbrev 0]cat" = 1,0,8 then 6,25,5.
        let mut bytes = bytes_with_abbrevs();
        wword(&mut bytes, 0x200, (1 << 10) + (0 << 5) + 8);
        wword(&mut bytes, 0x202, 0x8000 + (6 << 10) + (25 << 5) + 5);
        let (mem_h, _) = fixtures::story_from_bytes(&bytes);

        assert_eq!(
            "the cat",
            decode_zstr(&mem_h, abbrevs(), 0x200usize).unwrap()
        );
    }

    #[test]
    fn test_two_level_abbreviation() {
        // "[abbrev 1]d" where abbrev 1 itself uses abbrev 0.
        let mut bytes = bytes_with_abbrevs();
        wword(&mut bytes, 0x200, (1 << 10) + (1 << 5) + 9);
        wword(&mut bytes, 0x202, 0x8000 + (5 << 10) + (5 << 5) + 5);
        let (mem_h, _) = fixtures::story_from_bytes(&bytes);

        assert_eq!(
            "the red",
            decode_zstr(&mem_h, abbrevs(), 0x200usize).unwrap()
        );
    }

    #[test]
    fn test_self_referencing_abbreviation_fails() {
        // Abbreviation 0 refers to a string that invokes abbreviation 0.
        let mut bytes = fixtures::basic_story_bytes();
        wword(&mut bytes, fixtures::ABBREVS, 0x500 / 2);
        wword(&mut bytes, 0x500, 0x8000 + (1 << 10) + (0 << 5) + 5);
        wword(&mut bytes, 0x200, 0x8000 + (1 << 10) + (0 << 5) + 5);
        let (mem_h, _) = fixtures::story_from_bytes(&bytes);

        match decode_zstr(&mem_h, abbrevs(), 0x200usize) {
            Err(ZErr::AbbrevTooDeep { .. }) => (),
            other => panic!("looping abbreviation: {:?}", other),
        }
    }

    #[test]
    fn test_abbreviation_entry_out_of_bounds_fails() {
        // Entry points past the end of the image.
        let mut bytes = fixtures::basic_story_bytes();
        wword(&mut bytes, fixtures::ABBREVS, 0x7fff);
        wword(&mut bytes, 0x200, 0x8000 + (1 << 10) + (0 << 5) + 5);
        let (mem_h, _) = fixtures::story_from_bytes(&bytes);

        match decode_zstr(&mem_h, abbrevs(), 0x200usize) {
            Err(ZErr::AddressOutOfRange { .. }) => (),
            other => panic!("wild abbreviation: {:?}", other),
        }
    }

    #[test]
    fn test_encode_round_trip() {
        let encoded = encode_word("hello");
        assert_eq!([0x35, 0x51, 0xc6, 0x85], encoded);

        let mut bytes = fixtures::basic_story_bytes();
        bytes[0x200..0x204].copy_from_slice(&encode_word("north"));
        let (mem_h, _) = fixtures::story_from_bytes(&bytes);
        assert_eq!(
            "north",
            decode_zstr(&mem_h, abbrevs(), 0x200usize).unwrap()
        );
    }

    #[test]
    fn test_encode_truncates_to_six_zchars() {
        // "northeast" and "northea" encode identically in six z-chars.
        assert_eq!(encode_word("northeast")[..], encode_word("northea")[..]);
        // But differently from "north" (padding differs).
        assert_ne!(encode_word("northeast")[..], encode_word("north")[..]);
    }

    #[test]
    fn test_encode_punctuation_uses_a2() {
        // "," is 5,19 then four pads.
        let encoded = encode_word(",");
        let word0 = (u16::from(encoded[0]) << 8) + u16::from(encoded[1]);
        assert_eq!((5 << 10) + (19 << 5) + 5, word0);
    }
}
