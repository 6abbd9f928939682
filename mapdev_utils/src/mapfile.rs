//! Parser for the textual register map format.
//!
//! A map file describes the address-space layout of one device. It is line
//! based: `#` starts a comment, blank lines are skipped, `@<key> <value>`
//! lines carry metadata, and every other line describes one register:
//!
//! ```text
//! NAME  nElements  address  nBytes  [bar  [width  [bitInterp  [signed  [access]]]]]
//! ```
//!
//! Numeric fields auto-detect their base (`0x…` hex, `0…` octal, decimal).
//! After all lines are read, `AREA_MULTIPLEXED_SEQUENCE_*` entries are
//! combined with their `SEQUENCE_*_<i>` siblings into 2-D register
//! descriptors.

use crate::catalogue::{
    Access, ChannelInfo, DataType, MetadataCatalogue, RegisterCatalogue, RegisterInfo,
};
use crate::path::RegisterPath;
use nom::{
    bytes::complete::{
        tag_no_case,
        take_while1,
    },
    character::complete::{
        char,
        space0,
    },
    combinator::{
        all_consuming,
        map_res,
    },
    multi::{
        many1,
        separated_list1,
    },
    sequence::{
        preceded,
        terminated,
    },
    IResult,
};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

/// Name prefix marking the area entry of a 2-D multiplexed register.
pub const MULTIPLEXED_SEQUENCE_PREFIX: &str = "AREA_MULTIPLEXED_SEQUENCE_";
/// Name prefix marking one channel entry of a 2-D multiplexed register.
pub const SEQUENCE_PREFIX: &str = "SEQUENCE_";
/// Name of the flat int32 companion view published next to each 2-D register.
pub const MULTIPLEXED_RAW_NAME: &str = "MULTIPLEXED_RAW";

#[derive(Debug, Error)]
pub enum MapFileError {
    #[error("cannot open map file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error in map file `{file}` on line {line}: {message}")]
    Syntax {
        file: String,
        line: usize,
        message: String,
    },
    #[error("map file `{file}`: {message}")]
    Layout { file: String, message: String },
}

/// One fully interpreted register line.
#[derive(Debug, Clone)]
struct ParsedLine {
    path: RegisterPath,
    n_elements: u32,
    address: u64,
    n_bytes: u32,
    bar: u64,
    width: u32,
    fractional_bits: i32,
    signed: bool,
    access: Access,
    interrupt_id: Vec<u32>,
    data_type: DataType,
}

/// Parses a map file from disk.
///
/// # Errors
/// Fails on I/O errors and on any malformed line.
pub fn parse_file<P: AsRef<Path>>(
    path: P,
) -> Result<(RegisterCatalogue, MetadataCatalogue), MapFileError> {
    let name = path.as_ref().display().to_string();
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|source| MapFileError::Io {
        path: name.clone(),
        source,
    })?;
    parse_str(&name, &contents)
}

/// Parses map-file text.
///
/// # Errors
/// Fails on any malformed line; `file` is only used in error messages.
pub fn parse_str(
    file: &str,
    contents: &str,
) -> Result<(RegisterCatalogue, MetadataCatalogue), MapFileError> {
    let mut parser = Parser {
        file,
        lines: Vec::new(),
        metadata: MetadataCatalogue::default(),
    };

    for (line_nr, raw_line) in contents.lines().enumerate() {
        let line_nr = line_nr + 1;
        // strip comments and surrounding whitespace
        let line = match raw_line.find('#') {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(meta) = line.strip_prefix('@') {
            parser.parse_metadata(line_nr, meta)?;
        } else {
            let parsed = parser.parse_register_line(line_nr, line)?;
            parser.lines.push(parsed);
        }
    }

    parser.build_catalogue()
}

struct Parser<'a> {
    file: &'a str,
    lines: Vec<ParsedLine>,
    metadata: MetadataCatalogue,
}

impl Parser<'_> {
    fn syntax(&self, line: usize, message: impl Into<String>) -> MapFileError {
        MapFileError::Syntax {
            file: self.file.to_string(),
            line,
            message: message.into(),
        }
    }

    fn layout(&self, message: impl Into<String>) -> MapFileError {
        MapFileError::Layout {
            file: self.file.to_string(),
            message: message.into(),
        }
    }

    fn parse_metadata(&mut self, line_nr: usize, rest: &str) -> Result<(), MapFileError> {
        let rest = rest.trim_start();
        let Some(key) = rest.split_whitespace().next() else {
            return Err(self.syntax(line_nr, "metadata line without a name"));
        };
        let value = rest[key.len()..].trim().to_string();
        self.metadata.add(key, value);
        Ok(())
    }

    fn parse_register_line(&self, line_nr: usize, line: &str) -> Result<ParsedLine, MapFileError> {
        let (_, fields) = all_consuming(line_tokens)(line)
            .map_err(|_| self.syntax(line_nr, "malformed register line"))?;
        if fields.len() < 4 {
            return Err(self.syntax(line_nr, "a register line needs at least NAME, nElements, address and nBytes"));
        }
        if fields.len() > 9 {
            return Err(self.syntax(line_nr, "too many fields"));
        }

        let path = RegisterPath::new(fields[0]);
        let n_elements = parse_u64(fields[1])
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| self.syntax(line_nr, "invalid element count"))?;
        let address =
            parse_u64(fields[2]).ok_or_else(|| self.syntax(line_nr, "invalid address"))?;
        let n_bytes = parse_u64(fields[3])
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| self.syntax(line_nr, "invalid byte count"))?;

        let bar = match fields.get(4) {
            Some(f) => parse_u64(f).ok_or_else(|| self.syntax(line_nr, "invalid bar"))?,
            None => 0,
        };
        let width = match fields.get(5) {
            Some(f) => {
                let w = parse_u64(f)
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| self.syntax(line_nr, "invalid register width"))?;
                if w > 32 {
                    return Err(self.syntax(line_nr, "register width too big"));
                }
                w
            }
            None => 32,
        };

        let (mut data_type, fractional_bits) = match fields.get(6) {
            Some(&"IEEE754") => (DataType::Ieee754, 0),
            Some(&"ASCII") => (DataType::Ascii, 0),
            Some(f) => {
                let bits = parse_i64(f)
                    .ok_or_else(|| self.syntax(line_nr, format!("wrong bit interpretation `{f}`")))?;
                if !(-1024..=1023).contains(&bits) {
                    return Err(self.syntax(line_nr, "too many fractional bits"));
                }
                #[allow(clippy::cast_possible_truncation)]
                (DataType::FixedPoint, bits as i32)
            }
            None => (DataType::FixedPoint, 0),
        };
        if width == 0 {
            data_type = DataType::Void;
        }

        let signed_field = match fields.get(7) {
            Some(f) => Some(
                parse_u64(f).ok_or_else(|| self.syntax(line_nr, "invalid signed flag"))? != 0,
            ),
            None => None,
        };

        let (access, interrupt_id) = match fields.get(8) {
            Some(f) => all_consuming(access_field)(f)
                .map_err(|_| self.syntax(line_nr, format!("invalid data access `{f}`")))
                .and_then(|(_, (access, id))| {
                    if access == Access::Interrupt && id.len() < 2 {
                        Err(self.syntax(
                            line_nr,
                            "malformed INTERRUPT description, expected INTERRUPT<ctrl>:<line>",
                        ))
                    } else {
                        Ok((access, id))
                    }
                })?,
            None => (Access::ReadWrite, Vec::new()),
        };

        let signed = if data_type == DataType::Void {
            // all numeric fields of a VOID register must be zero
            if access == Access::ReadOnly {
                return Err(self.syntax(line_nr, "register type is VOID and access mode is read-only"));
            }
            if n_elements != 0
                || address != 0
                || n_bytes != 0
                || bar != 0
                || fractional_bits != 0
                || signed_field == Some(true)
            {
                return Err(self.syntax(
                    line_nr,
                    "register type is VOID (width 0), all other fields must be 0",
                ));
            }
            false
        } else {
            signed_field.unwrap_or(true)
        };

        Ok(ParsedLine {
            path,
            n_elements,
            address,
            n_bytes,
            bar,
            width,
            fractional_bits,
            signed,
            access,
            interrupt_id,
            data_type,
        })
    }

    fn build_catalogue(&self) -> Result<(RegisterCatalogue, MetadataCatalogue), MapFileError> {
        let mut catalogue = RegisterCatalogue::new();
        let by_path: HashMap<&str, &ParsedLine> = self
            .lines
            .iter()
            .map(|pl| (pl.path.as_str(), pl))
            .collect();

        for pl in &self.lines {
            let (_, name) = pl.path.split_last();
            if name.starts_with(MULTIPLEXED_SEQUENCE_PREFIX) {
                self.handle_2d(pl, &by_path, &mut catalogue)?;
            } else if !name.starts_with(SEQUENCE_PREFIX) {
                let info = RegisterInfo::new_1d(
                    pl.path.clone(),
                    pl.n_elements,
                    pl.address,
                    pl.n_bytes,
                    pl.bar,
                    pl.width,
                    pl.fractional_bits,
                    pl.signed,
                    pl.access,
                    pl.data_type,
                    pl.interrupt_id.clone(),
                );
                catalogue
                    .add(info)
                    .map_err(|e| self.layout(e.to_string()))?;
            }
        }
        Ok((catalogue, self.metadata.clone()))
    }

    fn handle_2d(
        &self,
        pl: &ParsedLine,
        by_path: &HashMap<&str, &ParsedLine>,
        catalogue: &mut RegisterCatalogue,
    ) -> Result<(), MapFileError> {
        let (module, area_name) = pl.path.split_last();
        let base_name = &area_name[MULTIPLEXED_SEQUENCE_PREFIX.len()..];

        // gather the SEQUENCE_<name>_<i> siblings, consecutively from 0
        let mut channels = Vec::new();
        let mut bytes_per_block: u32 = 0;
        loop {
            let seq_path =
                module.join(&format!("{SEQUENCE_PREFIX}{base_name}_{}", channels.len()));
            let Some(seq) = by_path.get(seq_path.as_str()) else {
                break;
            };
            if seq.address < pl.address {
                return Err(self.layout(format!(
                    "start address of channel smaller than 2D register start address (`{}`)",
                    pl.path
                )));
            }
            if !matches!(seq.n_bytes, 1 | 2 | 4) {
                return Err(self.layout(format!(
                    "sequence word size must correspond to a primitive type (`{}`)",
                    seq_path
                )));
            }
            #[allow(clippy::cast_possible_truncation)]
            let bit_offset = ((seq.address - pl.address) * 8) as u32;
            channels.push(ChannelInfo {
                bit_offset,
                data_type: seq.data_type,
                width: seq.width,
                fractional_bits: seq.fractional_bits,
                signed: seq.signed,
            });
            bytes_per_block += seq.n_bytes;
        }

        if channels.is_empty() {
            return Err(self.layout(format!("no sequences found for register `{}`", pl.path)));
        }
        if !channels
            .windows(2)
            .all(|w| w[0].bit_offset < w[1].bit_offset)
        {
            return Err(self.layout(format!(
                "channel offsets of `{}` are not strictly increasing",
                pl.path
            )));
        }
        if !matches!(bytes_per_block, 1 | 2) && bytes_per_block % 4 != 0 {
            return Err(self.layout(format!(
                "block size {bytes_per_block} of `{}` is not a primitive word",
                pl.path
            )));
        }
        if pl.n_bytes % 4 != 0 {
            return Err(self.layout(format!(
                "total size of multiplexed area `{}` must be a multiple of 4",
                pl.path
            )));
        }

        // clip channel widths to the bits actually available per block
        let n_channels = channels.len();
        for i in 0..n_channels {
            let available = if i + 1 < n_channels {
                channels[i + 1].bit_offset - channels[i].bit_offset
            } else {
                bytes_per_block * 8 - channels[i].bit_offset
            };
            if channels[i].width > available {
                channels[i].width = available;
            }
        }

        let n_blocks = pl.n_bytes / bytes_per_block;
        let name_2d = module.join(base_name);

        let info_2d = RegisterInfo::new_2d(
            name_2d.clone(),
            pl.address,
            pl.n_bytes,
            pl.bar,
            n_blocks,
            bytes_per_block,
            channels,
            pl.access,
            pl.interrupt_id.clone(),
        );
        catalogue
            .add(info_2d)
            .map_err(|e| self.layout(e.to_string()))?;

        // flat int32 companion view over the same bytes
        let info_raw = RegisterInfo::new_1d(
            name_2d.join(MULTIPLEXED_RAW_NAME),
            pl.n_bytes / 4,
            pl.address,
            pl.n_bytes,
            pl.bar,
            32,
            0,
            true,
            pl.access,
            DataType::FixedPoint,
            pl.interrupt_id.clone(),
        );
        catalogue
            .add(info_raw)
            .map_err(|e| self.layout(e.to_string()))
    }
}

/// Renders a catalogue back into canonical map-file text.
///
/// Parsing the output reproduces an equal catalogue: 2-D registers are
/// re-expanded into their area and sequence lines, and the derived
/// `MULTIPLEXED_RAW` companions are omitted (they are re-synthesized).
#[must_use]
pub fn write_map_file(catalogue: &RegisterCatalogue, metadata: &MetadataCatalogue) -> String {
    let mut out = String::new();
    for (key, value) in metadata.iter() {
        let _ = writeln!(out, "@{key} {value}");
    }
    for info in catalogue.iter() {
        let (module, name) = info.path.split_last();
        if name == MULTIPLEXED_RAW_NAME
            && catalogue.find(&module).is_some_and(RegisterInfo::is_2d)
        {
            continue;
        }
        if info.is_2d() {
            write_2d(&mut out, info);
        } else {
            let ch = &info.channels[0];
            let _ = writeln!(
                out,
                "{} {} {} {} {} {} {} {} {}",
                info.path,
                info.n_elements,
                info.address,
                info.n_bytes,
                info.bar,
                ch.width,
                bit_interp_to_string(ch),
                u8::from(ch.signed),
                access_to_string(info.access, &info.interrupt_id),
            );
        }
    }
    out
}

fn write_2d(out: &mut String, info: &RegisterInfo) {
    let (module, name) = info.path.split_last();
    let area = module.join(&format!("{MULTIPLEXED_SEQUENCE_PREFIX}{name}"));
    let _ = writeln!(
        out,
        "{} {} {} {} {} 32 0 0 {}",
        area,
        info.n_bytes / 4,
        info.address,
        info.n_bytes,
        info.bar,
        access_to_string(info.access, &info.interrupt_id),
    );
    for (i, ch) in info.channels.iter().enumerate() {
        let span_bits = if i + 1 < info.channels.len() {
            info.channels[i + 1].bit_offset - ch.bit_offset
        } else {
            info.bytes_per_block * 8 - ch.bit_offset
        };
        let seq = module.join(&format!("{SEQUENCE_PREFIX}{name}_{i}"));
        let _ = writeln!(
            out,
            "{} 1 {} {} {} {} {} {}",
            seq,
            info.address + u64::from(ch.bit_offset) / 8,
            span_bits / 8,
            info.bar,
            ch.width,
            bit_interp_to_string(ch),
            u8::from(ch.signed),
        );
    }
}

fn bit_interp_to_string(ch: &ChannelInfo) -> String {
    match ch.data_type {
        DataType::Ieee754 => "IEEE754".to_string(),
        DataType::Ascii => "ASCII".to_string(),
        DataType::FixedPoint | DataType::Void => ch.fractional_bits.to_string(),
    }
}

fn access_to_string(access: Access, interrupt_id: &[u32]) -> String {
    match access {
        Access::ReadOnly => "RO".to_string(),
        Access::ReadWrite => "RW".to_string(),
        Access::WriteOnly => "WO".to_string(),
        Access::Interrupt => {
            let id = interrupt_id
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(":");
            format!("INTERRUPT{id}")
        }
    }
}

// parsers

fn line_tokens(input: &str) -> IResult<&str, Vec<&str>> {
    terminated(
        many1(preceded(space0, take_while1(|c: char| !c.is_whitespace()))),
        space0,
    )(input)
}

fn access_field(input: &str) -> IResult<&str, (Access, Vec<u32>)> {
    if let Ok((rest, id)) = preceded(
        tag_no_case::<_, _, nom::error::Error<&str>>("INTERRUPT"),
        separated_list1(char(':'), map_res(take_while1(|c: char| c != ':'), number_u32)),
    )(input)
    {
        return Ok((rest, (Access::Interrupt, id)));
    }
    let (rest, keyword) = nom::branch::alt((
        tag_no_case("RO"),
        tag_no_case("RW"),
        tag_no_case("WO"),
    ))(input)?;
    let access = match keyword.to_ascii_uppercase().as_str() {
        "RO" => Access::ReadOnly,
        "WO" => Access::WriteOnly,
        _ => Access::ReadWrite,
    };
    Ok((rest, (access, Vec::new())))
}

fn number_u32(s: &str) -> Result<u32, String> {
    parse_u64(s)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("invalid number `{s}`"))
}

/// Unsigned number with base auto-detection: `0x…` hex, `0…` octal, decimal.
fn parse_u64(s: &str) -> Option<u64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_i64(s: &str) -> Option<i64> {
    if let Some(rest) = s.strip_prefix('-') {
        parse_u64(rest).and_then(|v| i64::try_from(v).ok()).map(|v| -v)
    } else {
        parse_u64(s).and_then(|v| i64::try_from(v).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> (RegisterCatalogue, MetadataCatalogue) {
        parse_str("test.map", contents).unwrap()
    }

    fn parse_err(contents: &str) -> MapFileError {
        parse_str("test.map", contents).unwrap_err()
    }

    #[test]
    fn test_register_line_full() {
        let (cat, _) = parse("REG  4 0x10 0x10 0 16 3 1 RW\n");
        let info = cat.get(&"REG".into()).unwrap();
        assert_eq!(info.n_elements, 4);
        assert_eq!(info.address, 16);
        assert_eq!(info.n_bytes, 16);
        assert_eq!(info.bar, 0);
        assert_eq!(info.channels[0].width, 16);
        assert_eq!(info.channels[0].fractional_bits, 3);
        assert!(info.channels[0].signed);
        assert_eq!(info.data_type(), DataType::FixedPoint);
        assert_eq!(info.access, Access::ReadWrite);
    }

    #[test]
    fn test_defaults() {
        let (cat, _) = parse("REG 1 0 4\n");
        let info = cat.get(&"REG".into()).unwrap();
        assert_eq!(info.bar, 0);
        assert_eq!(info.channels[0].width, 32);
        assert_eq!(info.channels[0].fractional_bits, 0);
        assert!(info.channels[0].signed);
        assert_eq!(info.access, Access::ReadWrite);
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let (cat, _) = parse("# a comment\n\n  REG 1 0 4 # trailing comment\n");
        assert_eq!(cat.len(), 1);
        assert!(cat.has_register(&"REG".into()));
    }

    #[test]
    fn test_metadata() {
        let (_, meta) = parse("@MAP_FILE_REVISION 1.7\n@NOTE has  spaces\nREG 1 0 4\n");
        assert_eq!(meta.get("MAP_FILE_REVISION"), Some("1.7"));
        assert_eq!(meta.get("NOTE"), Some("has  spaces"));
    }

    #[test]
    fn test_dot_separator() {
        let (cat, _) = parse("APP.MOD.REG 1 0 4\n");
        assert!(cat.has_register(&"APP/MOD/REG".into()));
    }

    #[test]
    fn test_ieee754_and_ascii() {
        let (cat, _) = parse("F 1 0 4 0 32 IEEE754\nS 1 4 8 0 32 ASCII\n");
        assert_eq!(cat.get(&"F".into()).unwrap().data_type(), DataType::Ieee754);
        assert_eq!(cat.get(&"S".into()).unwrap().data_type(), DataType::Ascii);
    }

    #[test]
    fn test_interrupt_access() {
        let (cat, _) = parse("IRQ 1 0 4 0 32 0 1 INTERRUPT2:3\nNESTED 1 4 4 0 32 0 1 INTERRUPT2:3:4\n");
        let info = cat.get(&"IRQ".into()).unwrap();
        assert_eq!(info.access, Access::Interrupt);
        assert_eq!(info.interrupt_id, [2, 3]);
        assert_eq!(cat.get(&"NESTED".into()).unwrap().interrupt_id, [2, 3, 4]);
        assert_eq!(cat.interrupt_ids().len(), 2);
    }

    #[test]
    fn test_void_interrupt() {
        let (cat, _) = parse("TICK 0 0 0 0 0 0 0 INTERRUPT1:2\n");
        let info = cat.get(&"TICK".into()).unwrap();
        assert_eq!(info.data_type(), DataType::Void);
        assert_eq!(info.n_elements, 0);
        assert!(!info.channels[0].signed);
        assert!(info.is_writeable());
    }

    #[test]
    fn test_width_too_big() {
        assert!(matches!(
            parse_err("REG 1 0 4 0 33\n"),
            MapFileError::Syntax { line: 1, .. }
        ));
    }

    #[test]
    fn test_fractional_bits_out_of_range() {
        assert!(parse_str("t", "REG 1 0 4 0 16 1024\n").is_err());
        assert!(parse_str("t", "REG 1 0 4 0 16 -1025\n").is_err());
        assert!(parse_str("t", "REG 1 0 4 0 16 1023\n").is_ok());
        assert!(parse_str("t", "REG 1 0 4 0 16 -1024\n").is_ok());
    }

    #[test]
    fn test_invalid_access() {
        assert!(parse_str("t", "REG 1 0 4 0 16 0 1 XX\n").is_err());
    }

    #[test]
    fn test_malformed_interrupt() {
        assert!(parse_str("t", "REG 1 0 4 0 32 0 1 INTERRUPT5\n").is_err());
        assert!(parse_str("t", "REG 1 0 4 0 32 0 1 INTERRUPT:\n").is_err());
    }

    #[test]
    fn test_void_with_ro() {
        assert!(parse_str("t", "REG 0 0 0 0 0 0 0 RO\n").is_err());
    }

    #[test]
    fn test_void_with_nonzero_field() {
        assert!(parse_str("t", "REG 1 0 0 0 0\n").is_err());
        assert!(parse_str("t", "REG 0 0 4 0 0\n").is_err());
        assert!(parse_str("t", "REG 0 0 0 0 0 0 1\n").is_err());
    }

    #[test]
    fn test_duplicate_register() {
        assert!(parse_str("t", "REG 1 0 4\nREG 1 4 4\n").is_err());
    }

    #[test]
    fn test_2d_synthesis() {
        // two channels, u16 + s16, over a 32 byte area: 8 samples per channel
        let (cat, _) = parse(
            "AREA_MULTIPLEXED_SEQUENCE_X 8 0x20 32 1\n\
             SEQUENCE_X_0 1 0x20 2 1 16 0 0\n\
             SEQUENCE_X_1 1 0x22 2 1 16 0 1\n",
        );
        let info = cat.get(&"X".into()).unwrap();
        assert!(info.is_2d());
        assert_eq!(info.n_blocks, 8);
        assert_eq!(info.bytes_per_block, 4);
        assert_eq!(info.bar, 1);
        assert_eq!(info.channels.len(), 2);
        assert_eq!(info.channels[0].bit_offset, 0);
        assert_eq!(info.channels[1].bit_offset, 16);
        assert!(!info.channels[0].signed);
        assert!(info.channels[1].signed);

        let raw = cat.get(&"X/MULTIPLEXED_RAW".into()).unwrap();
        assert_eq!(raw.n_elements, 8);
        assert_eq!(raw.n_bytes, 32);
        assert_eq!(raw.channels[0].width, 32);
        assert!(raw.channels[0].signed);

        // the AREA/SEQUENCE lines themselves are not published
        assert!(!cat.has_register(&"AREA_MULTIPLEXED_SEQUENCE_X".into()));
        assert!(!cat.has_register(&"SEQUENCE_X_0".into()));
    }

    #[test]
    fn test_2d_width_clipping() {
        let (cat, _) = parse(
            "AREA_MULTIPLEXED_SEQUENCE_X 8 0 32 0\n\
             SEQUENCE_X_0 1 0 2 0 18 0 0\n\
             SEQUENCE_X_1 1 2 2 0 16 0 1\n",
        );
        let info = cat.get(&"X".into()).unwrap();
        assert_eq!(info.channels[0].width, 16);
        assert_eq!(info.channels[1].width, 16);
    }

    #[test]
    fn test_2d_without_sequences() {
        assert!(parse_str("t", "AREA_MULTIPLEXED_SEQUENCE_X 8 0 32 0\n").is_err());
    }

    #[test]
    fn test_2d_bad_word_size() {
        let err = parse_str(
            "t",
            "AREA_MULTIPLEXED_SEQUENCE_X 8 0 32 0\nSEQUENCE_X_0 1 0 3 0 24 0 0\n",
        )
        .unwrap_err();
        assert!(matches!(err, MapFileError::Layout { .. }));
    }

    #[test]
    fn test_2d_three_byte_block() {
        // 1 + 2 bytes per block: not a primitive word
        assert!(parse_str(
            "t",
            "AREA_MULTIPLEXED_SEQUENCE_X 8 0 24 0\n\
             SEQUENCE_X_0 1 0 1 0 8 0 0\n\
             SEQUENCE_X_1 1 1 2 0 16 0 0\n",
        )
        .is_err());
    }

    #[test]
    fn test_2d_in_module() {
        let (cat, _) = parse(
            "APP.AREA_MULTIPLEXED_SEQUENCE_DAQ 4 0 16 0\n\
             APP.SEQUENCE_DAQ_0 1 0 4 0 32 0 1\n",
        );
        assert!(cat.has_register(&"APP/DAQ".into()));
        assert!(cat.has_register(&"APP/DAQ/MULTIPLEXED_RAW".into()));
    }

    #[test]
    fn test_canonical_roundtrip() {
        let source = "@MAP_FILE_REVISION 2\n\
             STATUS 1 0 4 0 32 0 1 RO\n\
             GAIN 4 0x10 0x10 0 16 3 1 RW\n\
             TEMP 1 0x20 4 0 32 IEEE754 1 RO\n\
             NAME 1 0x24 8 0 32 ASCII 0 RW\n\
             TICK 0 0 0 0 0 0 0 INTERRUPT1:2\n\
             DAQ 1 0x40 4 2 18 0 1 INTERRUPT1:3\n\
             AREA_MULTIPLEXED_SEQUENCE_MUX 8 0x60 32 0 32 0 0 INTERRUPT1:4\n\
             SEQUENCE_MUX_0 1 0x60 2 0 14 2 0\n\
             SEQUENCE_MUX_1 1 0x62 2 0 16 0 1\n";
        let (cat, meta) = parse(source);
        let canonical = write_map_file(&cat, &meta);
        let (cat2, meta2) = parse(&canonical);
        assert_eq!(cat, cat2);
        assert_eq!(meta, meta2);
        // and canonicalizing again is a fixed point
        assert_eq!(canonical, write_map_file(&cat2, &meta2));
    }
}
