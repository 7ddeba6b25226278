//! The visibility-map container and its byte-exact external format:
//!
//! ```text
//! "VMAP[" "HEAD[" tag* "]" "BODY[" rank{width·height} "]" "]"
//! tag  := "[" name "=" value "]"
//! rank := 4 bytes, big-endian, signed
//! ```
//!
//! Recognised tag names are `width`, `height`, `orientation`, `depth` and
//! `comment`; unknown tags are skipped with a warning, comments are
//! discarded, and a header missing any of the four geometry tags fails to
//! parse.

use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

use crate::error::{try_vec, Error, Result};

/// Per-tag name/value length bound; anything longer is a parse error.
const MAX_TAG_LEN: usize = 1000;

/// The serialisable magic prefix.
pub const VMAP_MAGIC: &[u8] = b"VMAP[";

/// A snapshot of a carver's seam schedule: one signed 32-bit rank per pixel
/// of the `width`×`height` image it was built for, plus the depth of the
/// schedule and the orientation it was taken in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VMap {
    width: usize,
    height: usize,
    depth: usize,
    /// True when the snapshot was taken while the carver was transposed.
    orientation: bool,
    ranks: Vec<i32>,
}

impl VMap {
    pub fn new(
        ranks: Vec<i32>,
        width: usize,
        height: usize,
        depth: usize,
        orientation: bool,
    ) -> Result<VMap> {
        if ranks.len() != width * height {
            return Err(Error::invalid(format!(
                "vmap rank buffer holds {} entries for a {}x{} map",
                ranks.len(),
                width,
                height
            )));
        }
        Ok(VMap {
            width,
            height,
            depth,
            orientation,
            ranks,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn orientation(&self) -> bool {
        self.orientation
    }

    pub fn ranks(&self) -> &[i32] {
        &self.ranks
    }

    /// True when `bytes` starts with the container magic.
    pub fn detect(bytes: &[u8]) -> bool {
        bytes.starts_with(VMAP_MAGIC)
    }

    /// Writes the external representation.
    pub fn write_to<W: Write>(&self, mut sink: W) -> Result<()> {
        sink.write_all(VMAP_MAGIC)?;
        sink.write_all(b"HEAD[")?;
        write!(sink, "[width={}]", self.width)?;
        write!(sink, "[height={}]", self.height)?;
        write!(sink, "[orientation={}]", self.orientation as i32)?;
        write!(sink, "[depth={}]", self.depth)?;
        sink.write_all(b"[comment=()]")?;
        sink.write_all(b"]")?;
        sink.write_all(b"BODY[")?;
        for &rank in &self.ranks {
            sink.write_i32::<BigEndian>(rank)?;
        }
        sink.write_all(b"]]")?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.ranks.len() * 4 + 64);
        self.write_to(&mut out)
            .expect("writing a vmap to a Vec cannot fail");
        out
    }

    /// Parses the external representation.
    pub fn read_from<R: Read>(mut source: R) -> Result<VMap> {
        expect_literal(&mut source, VMAP_MAGIC, "not a VMAP container")?;
        expect_literal(&mut source, b"HEAD[", "missing vmap header")?;

        let mut width = None;
        let mut height = None;
        let mut depth = None;
        let mut orientation = None;

        loop {
            let c = read_byte(&mut source, "corrupted vmap header")?;
            if c == b']' {
                break;
            }
            if c != b'[' {
                return Err(Error::parse("malformed vmap tag".to_string()));
            }
            let name = read_until(&mut source, b'=', "vmap tag name")?;
            let value = read_until(&mut source, b']', "vmap tag value")?;
            match name.as_str() {
                "width" => width = Some(parse_dim(&value, "width")?),
                "height" => height = Some(parse_dim(&value, "height")?),
                "depth" => depth = Some(parse_dim(&value, "depth")?),
                "orientation" => orientation = Some(parse_dim(&value, "orientation")? != 0),
                "comment" => {}
                other => warn!("ignoring unknown vmap tag: {}", other),
            }
        }

        let width = width.ok_or_else(|| Error::parse("vmap header misses width"))?;
        let height = height.ok_or_else(|| Error::parse("vmap header misses height"))?;
        let depth = depth.ok_or_else(|| Error::parse("vmap header misses depth"))?;
        let orientation =
            orientation.ok_or_else(|| Error::parse("vmap header misses orientation"))?;

        expect_literal(&mut source, b"BODY[", "missing vmap body")?;
        let len = width
            .checked_mul(height)
            .ok_or_else(|| Error::parse("vmap dimensions overflow"))?;
        let mut ranks: Vec<i32> = try_vec(len)?;
        for slot in ranks.iter_mut() {
            *slot = source
                .read_i32::<BigEndian>()
                .map_err(|_| Error::parse("vmap body truncated"))?;
        }
        expect_literal(&mut source, b"]", "unterminated vmap body")?;
        expect_literal(&mut source, b"]", "unterminated vmap container")?;

        VMap::new(ranks, width, height, depth, orientation)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<VMap> {
        VMap::read_from(bytes)
    }
}

fn read_byte<R: Read>(source: &mut R, context: &str) -> Result<u8> {
    source
        .read_u8()
        .map_err(|_| Error::parse(context.to_string()))
}

fn expect_literal<R: Read>(source: &mut R, literal: &[u8], context: &str) -> Result<()> {
    for &expected in literal {
        if read_byte(source, context)? != expected {
            return Err(Error::parse(context.to_string()));
        }
    }
    Ok(())
}

fn read_until<R: Read>(source: &mut R, terminator: u8, what: &str) -> Result<String> {
    let mut buf = Vec::new();
    loop {
        let c = read_byte(source, "corrupted vmap header")?;
        if c == terminator {
            break;
        }
        if buf.len() >= MAX_TAG_LEN {
            return Err(Error::parse(format!("{} too long", what)));
        }
        buf.push(c);
    }
    String::from_utf8(buf).map_err(|_| Error::parse(format!("{} is not valid utf-8", what)))
}

fn parse_dim(value: &str, name: &str) -> Result<usize> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| Error::parse(format!("bad vmap {} value: {:?}", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VMap {
        VMap::new(vec![0, 1, 2, -1, 0, 3], 3, 2, 1, false).unwrap()
    }

    #[test]
    fn golden_bytes() {
        let bytes = sample().to_bytes();
        let mut expected: Vec<u8> =
            b"VMAP[HEAD[[width=3][height=2][orientation=0][depth=1][comment=()]]BODY[".to_vec();
        for rank in [0i32, 1, 2, -1, 0, 3].iter() {
            expected.extend_from_slice(&rank.to_be_bytes());
        }
        expected.extend_from_slice(b"]]");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn round_trip() {
        let vmap = sample();
        let parsed = VMap::from_bytes(&vmap.to_bytes()).unwrap();
        assert_eq!(parsed, vmap);
    }

    #[test]
    fn detects_magic() {
        assert!(VMap::detect(&sample().to_bytes()));
        assert!(!VMap::detect(b"PNG..."));
    }

    #[test]
    fn unknown_tags_are_skipped() {
        let mut bytes: Vec<u8> =
            b"VMAP[HEAD[[width=1][height=1][orientation=0][depth=0][flavour=vanilla]]BODY[".to_vec();
        bytes.extend_from_slice(&7i32.to_be_bytes());
        bytes.extend_from_slice(b"]]");
        let parsed = VMap::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.ranks(), &[7]);
    }

    #[test]
    fn missing_geometry_tag_fails() {
        let mut bytes: Vec<u8> = b"VMAP[HEAD[[width=1][height=1][depth=0]]BODY[".to_vec();
        bytes.extend_from_slice(&0i32.to_be_bytes());
        bytes.extend_from_slice(b"]]");
        match VMap::from_bytes(&bytes) {
            Err(Error::Parse(msg)) => assert!(msg.contains("orientation")),
            other => panic!("expected parse error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn truncated_body_fails() {
        let full = sample().to_bytes();
        let err = VMap::from_bytes(&full[..full.len() - 6]).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn oversized_tag_fails() {
        let mut bytes: Vec<u8> = b"VMAP[HEAD[[comment=".to_vec();
        bytes.extend(std::iter::repeat(b'x').take(2000));
        bytes.extend_from_slice(b"]]BODY[]]");
        let err = VMap::from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn bad_magic_fails() {
        let err = VMap::from_bytes(b"WMAP[HEAD[]BODY[]]").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
