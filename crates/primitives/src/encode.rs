//! Canonical binary encoding helpers for published artifacts.
//!
//! Integers are big-endian and every top-level artifact starts with a
//! version byte.

use anyhow::{anyhow, Result};

/// Version tag for canonical encodings.
pub const ENC_V1: u8 = 1;

pub fn encode_u8(v: u8, out: &mut Vec<u8>) { out.push(v); }
pub fn encode_u32(v: u32, out: &mut Vec<u8>) { out.extend_from_slice(&v.to_be_bytes()); }

fn take<'a>(data: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if data.len() < n { return Err(anyhow!("unexpected EOF: need {n} bytes, have {}", data.len())); }
    let (head, tail) = data.split_at(n);
    *data = tail;
    Ok(head)
}

pub fn read_fixed<const N: usize>(data: &mut &[u8]) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(data, N)?);
    Ok(out)
}

pub fn read_u8(data: &mut &[u8]) -> Result<u8> { Ok(read_fixed::<1>(data)?[0]) }
pub fn read_u32(data: &mut &[u8]) -> Result<u32> { Ok(u32::from_be_bytes(read_fixed(data)?)) }

/// Consume and check the leading version byte.
pub fn read_version(data: &mut &[u8]) -> Result<()> {
    let ver = read_u8(data)?;
    if ver != ENC_V1 { return Err(anyhow!("unsupported encoding version: {}", ver)); }
    Ok(())
}

pub fn expect_end(data: &[u8], what: &str) -> Result<()> {
    if !data.is_empty() { return Err(anyhow!("trailing bytes in {what}")); }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_what_was_written() {
        let mut out = Vec::new();
        encode_u8(ENC_V1, &mut out);
        encode_u32(0xdead_beef, &mut out);
        out.extend_from_slice(&[9u8; 4]);

        let mut data = out.as_slice();
        read_version(&mut data).unwrap();
        assert_eq!(read_u32(&mut data).unwrap(), 0xdead_beef);
        assert_eq!(read_fixed::<4>(&mut data).unwrap(), [9u8; 4]);
        expect_end(data, "test").unwrap();
    }

    #[test]
    fn short_input_is_eof() {
        let mut data: &[u8] = &[0, 1];
        let err = read_u32(&mut data).unwrap_err();
        assert!(err.to_string().contains("need 4 bytes, have 2"));
    }

    #[test]
    fn wrong_version_rejected() {
        let mut data: &[u8] = &[2u8];
        assert!(read_version(&mut data).is_err());
    }
}
