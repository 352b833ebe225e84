//! Domain name decompression.
//!
//! A name is a sequence of length-prefixed labels closed by a zero byte. Any label position may
//! instead hold a two byte pointer (top bits `11`) whose remaining 14 bits are the offset of an
//! earlier name in the message, whose labels complete this one.
//!
//! Names are handled as text in master file notation: labels joined by dots, with a dot,
//! backslash or non-printable byte inside a label written as `\DDD` (three decimal digits).

use std::{collections::HashSet, convert::TryFrom};

use log::trace;

use crate::error::CodecError;

pub const MAX_LABEL_LEN: usize = 63;
pub const MAX_NAME_LEN: usize = 255;

const JUMP_REQUIRED_FLAG: u8 = 0xC0;
const NULL_BYTE: u8 = 0x00;

/// Reads the name starting at `start`, following compression pointers.
///
/// Returns the dotted name and the offset just past it. When a pointer was followed, that offset
/// is the one after the first pointer, not after the jump target. Pointers must point strictly
/// backwards and no offset may be jumped to twice, so a crafted message cannot loop.
pub fn read_name(message: &[u8], start: usize) -> Result<(String, usize), CodecError> {
    let mut name = String::new();
    let mut pos = start;
    let mut resume_at = None;
    let mut visited = HashSet::new();
    // the terminating zero byte counts towards the limit
    let mut wire_len = 1;

    loop {
        let len = *message
            .get(pos)
            .ok_or(CodecError::Truncated { offset: pos })?;

        match len & JUMP_REQUIRED_FLAG {
            JUMP_REQUIRED_FLAG => {
                let low = *message
                    .get(pos + 1)
                    .ok_or(CodecError::Truncated { offset: pos + 1 })?;
                let target = usize::from(u16::from_be_bytes([len & !JUMP_REQUIRED_FLAG, low]));

                if target >= message.len() {
                    return Err(CodecError::Malformed {
                        offset: pos,
                        reason: "compression pointer is out of range",
                    });
                }
                if target >= pos {
                    return Err(CodecError::Malformed {
                        offset: pos,
                        reason: "compression pointer does not point backwards",
                    });
                }
                if !visited.insert(target) {
                    return Err(CodecError::Malformed {
                        offset: pos,
                        reason: "compression loop",
                    });
                }

                trace!("following compression pointer at {} to {}", pos, target);
                resume_at.get_or_insert(pos + 2);
                pos = target;
            }
            NULL_BYTE if len == 0 => {
                return Ok((name, resume_at.unwrap_or(pos + 1)));
            }
            NULL_BYTE => {
                let len = usize::from(len);
                let label = message
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(CodecError::Truncated {
                        offset: message.len(),
                    })?;

                wire_len += len + 1;
                if wire_len > MAX_NAME_LEN {
                    return Err(CodecError::Malformed {
                        offset: pos,
                        reason: "name exceeds 255 octets",
                    });
                }

                if !name.is_empty() {
                    name.push('.');
                }
                push_escaped(&mut name, label);
                pos += 1 + len;
            }
            _ => {
                return Err(CodecError::Malformed {
                    offset: pos,
                    reason: "reserved label type",
                });
            }
        }
    }
}

fn push_escaped(name: &mut String, label: &[u8]) {
    for &byte in label {
        match byte {
            0x21..=0x7e if byte != b'.' && byte != b'\\' => name.push(char::from(byte)),
            _ => name.push_str(&format!("\\{:03}", byte)),
        }
    }
}

/// Splits a name in master file notation into raw labels, undoing `\DDD` and `\X` escapes.
///
/// A single trailing dot is dropped, so `"a."` and `"a"` are the same name and `"."` is the
/// root. Empty labels are returned as they are for the caller to reject.
pub fn parse_labels(name: &str) -> Result<Vec<Vec<u8>>, &'static str> {
    let mut labels = Vec::new();
    let mut label = Vec::new();
    let mut bytes = name.bytes();

    while let Some(byte) = bytes.next() {
        match byte {
            b'.' => labels.push(std::mem::take(&mut label)),
            b'\\' => {
                let first = bytes.next().ok_or("name ends inside an escape")?;
                if !first.is_ascii_digit() {
                    label.push(first);
                    continue;
                }

                let mut value = u16::from(first - b'0');
                for _ in 0..2 {
                    match bytes.next() {
                        Some(digit) if digit.is_ascii_digit() => {
                            value = value * 10 + u16::from(digit - b'0')
                        }
                        _ => return Err("escape needs three decimal digits"),
                    }
                }
                label.push(u8::try_from(value).map_err(|_| "escaped byte above 255")?);
            }
            _ => label.push(byte),
        }
    }

    if !label.is_empty() {
        labels.push(label);
    } else if labels.len() == 1 && labels[0].is_empty() {
        labels.clear();
    }

    Ok(labels)
}
