// RouterOS API word/sentence codec
//
// Pure byte transforms, no I/O. A word is a variable-width length prefix
// followed by that many bytes; a sentence is a run of words closed by a
// zero-length word.
//
//   len < 0x80        1 byte   0xxxxxxx
//   len < 0x4000      2 bytes  10xxxxxx ...
//   len < 0x200000    3 bytes  110xxxxx ...
//   len < 0x10000000  4 bytes  1110xxxx ...
//   otherwise         5 bytes  0xF0 + u32 big-endian

use bytes::{Buf, BufMut, BytesMut};

use crate::error::Error;

/// Largest word the decoder accepts; a longer prefix is a protocol error.
pub const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

/// Append the length prefix for a word of `len` bytes.
pub fn encode_length(len: u32, dst: &mut BytesMut) {
    if len < 0x80 {
        dst.put_u8(len.to_be_bytes()[3]);
    } else if len < 0x4000 {
        let [_, _, b2, b3] = (len | 0x8000).to_be_bytes();
        dst.put_slice(&[b2, b3]);
    } else if len < 0x20_0000 {
        let [_, b1, b2, b3] = (len | 0xC0_0000).to_be_bytes();
        dst.put_slice(&[b1, b2, b3]);
    } else if len < 0x1000_0000 {
        dst.put_u32(len | 0xE000_0000);
    } else {
        dst.put_u8(0xF0);
        dst.put_u32(len);
    }
}

/// Decode a length prefix from the front of `src`.
///
/// Returns the length and the number of prefix bytes, or `None` when `src`
/// does not yet hold the whole prefix. Control bytes `0xF8..=0xFF` are
/// reserved and rejected.
pub fn decode_length(src: &[u8]) -> Result<Option<(u32, usize)>, Error> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };

    let width = match first {
        0x00..=0x7F => 1,
        0x80..=0xBF => 2,
        0xC0..=0xDF => 3,
        0xE0..=0xEF => 4,
        0xF0 => 5,
        _ => {
            return Err(Error::Protocol(format!(
                "reserved control byte {first:#04x} in length prefix"
            )));
        }
    };

    let Some(prefix) = src.get(..width) else {
        return Ok(None);
    };

    let len = match prefix {
        [b0] => u32::from(*b0),
        [b0, b1] => u32::from_be_bytes([0, 0, b0 & 0x3F, *b1]),
        [b0, b1, b2] => u32::from_be_bytes([0, b0 & 0x1F, *b1, *b2]),
        [b0, b1, b2, b3] => u32::from_be_bytes([b0 & 0x0F, *b1, *b2, *b3]),
        [_, b1, b2, b3, b4] => u32::from_be_bytes([*b1, *b2, *b3, *b4]),
        _ => unreachable!("prefix width is 1..=5"),
    };

    Ok(Some((len, width)))
}

/// Append one length-prefixed word.
pub fn encode_word(word: &[u8], dst: &mut BytesMut) -> Result<(), Error> {
    let len = u32::try_from(word.len())
        .map_err(|_| Error::Protocol(format!("word of {} bytes is too long", word.len())))?;
    encode_length(len, dst);
    dst.put_slice(word);
    Ok(())
}

/// Encode a full sentence, including the terminating zero-length word.
pub fn encode_sentence<I, W>(words: I) -> Result<BytesMut, Error>
where
    I: IntoIterator<Item = W>,
    W: AsRef<[u8]>,
{
    let mut dst = BytesMut::new();
    for word in words {
        encode_word(word.as_ref(), &mut dst)?;
    }
    encode_length(0, &mut dst);
    Ok(dst)
}

/// Incremental sentence decoder.
///
/// Feed it whatever bytes have arrived; it consumes complete words from the
/// buffer and yields a sentence once the terminating empty word is seen.
/// Partial words are left in the buffer for the next call.
#[derive(Debug, Default)]
pub struct SentenceDecoder {
    words: Vec<String>,
}

impl SentenceDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<String>>, Error> {
        loop {
            let Some((len, width)) = decode_length(src)? else {
                return Ok(None);
            };
            let len = usize::try_from(len)
                .ok()
                .filter(|&len| len <= MAX_WORD_LEN)
                .ok_or_else(|| {
                    Error::Protocol(format!("word length {len} exceeds {MAX_WORD_LEN} bytes"))
                })?;
            if src.len() < width + len {
                return Ok(None);
            }

            src.advance(width);
            if len == 0 {
                return Ok(Some(std::mem::take(&mut self.words)));
            }
            let word = src.split_to(len);
            self.words.push(decode_text(&word));
        }
    }
}

/// Words are UTF-8 on current RouterOS; older builds send the router's
/// Windows codepage. Anything that is not valid UTF-8 is read as Latin-1 so
/// every byte maps to exactly one char.
fn decode_text(word: &[u8]) -> String {
    match std::str::from_utf8(word) {
        Ok(text) => text.to_owned(),
        Err(_) => word.iter().copied().map(char::from).collect(),
    }
}
