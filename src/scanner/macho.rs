//! Universal (fat) Mach-O container parsing and re-encoding.
//!
//! A fat file starts with a big-endian header: magic, entry count, then one
//! `fat_arch` (20 bytes) or `fat_arch_64` (32 bytes) record per slice. Each
//! record names the slice's CPU and where its bytes live in the file. Slice
//! contents are ordinary thin Mach-O images and are copied verbatim.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

pub const FAT_MAGIC: u32 = 0xcafe_babe;
pub const FAT_MAGIC_64: u32 = 0xcafe_babf;

/// Java class files share `FAT_MAGIC`; their version field is always >= 45,
/// so a small bound on the entry count tells them apart.
const MAX_FAT_ARCHS: u32 = 32;
const MAX_ALIGN: u32 = 20;

const FAT_HEADER_SIZE: u64 = 8;
const FAT_ARCH_SIZE: u64 = 20;
const FAT_ARCH_64_SIZE: u64 = 32;

const CPU_ARCH_ABI64: i32 = 0x0100_0000;
const CPU_ARCH_ABI64_32: i32 = 0x0200_0000;
const CPU_TYPE_X86: i32 = 7;
const CPU_TYPE_ARM: i32 = 12;
const CPU_TYPE_POWERPC: i32 = 18;
const CPU_SUBTYPE_MASK: i32 = 0xff00_0000_u32 as i32;

/// Why a file that looked like a fat binary was rejected
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed architecture table: {0}")]
    Malformed(String),
}

/// One entry of the fat architecture table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceRange {
    pub cputype: i32,
    pub cpusubtype: i32,
    pub offset: u64,
    pub size: u64,
    /// Alignment as a power of two
    pub align: u32,
}

impl SliceRange {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn arch_name(&self) -> String {
        arch_name(self.cputype, self.cpusubtype)
    }

    /// Same CPU and same bytes
    pub fn same_slice(&self, other: &SliceRange) -> bool {
        self.cputype == other.cputype
            && (self.cpusubtype & !CPU_SUBTYPE_MASK) == (other.cpusubtype & !CPU_SUBTYPE_MASK)
            && self.offset == other.offset
            && self.size == other.size
    }
}

/// Parsed fat header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatHeader {
    pub is_64: bool,
    pub arches: Vec<SliceRange>,
}

impl FatHeader {
    fn entry_size(is_64: bool) -> u64 {
        if is_64 {
            FAT_ARCH_64_SIZE
        } else {
            FAT_ARCH_SIZE
        }
    }

    /// Size of the header including the architecture table
    pub fn encoded_len(is_64: bool, count: usize) -> u64 {
        FAT_HEADER_SIZE + Self::entry_size(is_64) * count as u64
    }
}

/// Mach-O architecture name for a cputype/cpusubtype pair, as `lipo` prints it
pub fn arch_name(cputype: i32, cpusubtype: i32) -> String {
    let sub = cpusubtype & !CPU_SUBTYPE_MASK;
    let name = match cputype {
        CPU_TYPE_X86 => "i386",
        t if t == CPU_TYPE_X86 | CPU_ARCH_ABI64 => {
            if sub == 8 {
                "x86_64h"
            } else {
                "x86_64"
            }
        }
        CPU_TYPE_ARM => match sub {
            5 => "armv4t",
            6 => "armv6",
            7 => "armv5",
            9 => "armv7",
            10 => "armv7f",
            11 => "armv7s",
            12 => "armv7k",
            14 => "armv6m",
            15 => "armv7m",
            16 => "armv7em",
            _ => "arm",
        },
        t if t == CPU_TYPE_ARM | CPU_ARCH_ABI64 => {
            if sub == 2 {
                "arm64e"
            } else {
                "arm64"
            }
        }
        t if t == CPU_TYPE_ARM | CPU_ARCH_ABI64_32 => "arm64_32",
        CPU_TYPE_POWERPC => "ppc",
        t if t == CPU_TYPE_POWERPC | CPU_ARCH_ABI64 => "ppc64",
        _ => return format!("cpu{}_{}", cputype, sub),
    };
    name.to_string()
}

/// Read the fat header of `path`.
///
/// Returns `Ok(None)` for files that are not fat binaries at all.
pub fn read_fat_header(path: &Path) -> Result<Option<FatHeader>, ClassifyError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    parse_fat_header(&mut file, len)
}

/// Parse a fat header from any seekable reader of total length `len`
pub fn parse_fat_header<R: Read + Seek>(
    reader: &mut R,
    len: u64,
) -> Result<Option<FatHeader>, ClassifyError> {
    if len < FAT_HEADER_SIZE {
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(0))?;
    let mut head = [0u8; 8];
    reader.read_exact(&mut head)?;

    let magic = be_u32(&head[0..4]);
    let is_64 = match magic {
        FAT_MAGIC => false,
        FAT_MAGIC_64 => true,
        _ => return Ok(None),
    };
    let count = be_u32(&head[4..8]);
    if count == 0 || count > MAX_FAT_ARCHS {
        return Err(ClassifyError::Malformed(format!(
            "{} architectures in table",
            count
        )));
    }

    let header_len = FatHeader::encoded_len(is_64, count as usize);
    if header_len > len {
        return Err(ClassifyError::Malformed("table runs past end of file".into()));
    }

    let mut table = vec![0u8; (header_len - FAT_HEADER_SIZE) as usize];
    reader.read_exact(&mut table)?;

    let entry_size = FatHeader::entry_size(is_64) as usize;
    let mut arches = Vec::with_capacity(count as usize);
    for raw in table.chunks_exact(entry_size) {
        let slice = if is_64 {
            SliceRange {
                cputype: be_u32(&raw[0..4]) as i32,
                cpusubtype: be_u32(&raw[4..8]) as i32,
                offset: be_u64(&raw[8..16]),
                size: be_u64(&raw[16..24]),
                align: be_u32(&raw[24..28]),
            }
        } else {
            SliceRange {
                cputype: be_u32(&raw[0..4]) as i32,
                cpusubtype: be_u32(&raw[4..8]) as i32,
                offset: be_u32(&raw[8..12]) as u64,
                size: be_u32(&raw[12..16]) as u64,
                align: be_u32(&raw[16..20]),
            }
        };

        if slice.align > MAX_ALIGN {
            return Err(ClassifyError::Malformed(format!(
                "alignment 2^{} for {}",
                slice.align,
                slice.arch_name()
            )));
        }
        if slice.size == 0 || slice.offset < header_len {
            return Err(ClassifyError::Malformed(format!(
                "slice {} overlaps header or is empty",
                slice.arch_name()
            )));
        }
        if slice.offset.checked_add(slice.size).map_or(true, |end| end > len) {
            return Err(ClassifyError::Malformed(format!(
                "slice {} runs past end of file",
                slice.arch_name()
            )));
        }
        arches.push(slice);
    }

    let mut sorted: Vec<&SliceRange> = arches.iter().collect();
    sorted.sort_by_key(|s| s.offset);
    if sorted.windows(2).any(|w| w[0].end() > w[1].offset) {
        return Err(ClassifyError::Malformed("overlapping slices".into()));
    }

    Ok(Some(FatHeader { is_64, arches }))
}

/// Encode a fat header for `arches` (whose offsets must already be final)
pub fn encode_header(is_64: bool, arches: &[SliceRange]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FatHeader::encoded_len(is_64, arches.len()) as usize);
    let magic = if is_64 { FAT_MAGIC_64 } else { FAT_MAGIC };
    out.extend_from_slice(&magic.to_be_bytes());
    out.extend_from_slice(&(arches.len() as u32).to_be_bytes());
    for arch in arches {
        out.extend_from_slice(&(arch.cputype as u32).to_be_bytes());
        out.extend_from_slice(&(arch.cpusubtype as u32).to_be_bytes());
        if is_64 {
            out.extend_from_slice(&arch.offset.to_be_bytes());
            out.extend_from_slice(&arch.size.to_be_bytes());
            out.extend_from_slice(&arch.align.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes());
        } else {
            out.extend_from_slice(&(arch.offset as u32).to_be_bytes());
            out.extend_from_slice(&(arch.size as u32).to_be_bytes());
            out.extend_from_slice(&arch.align.to_be_bytes());
        }
    }
    out
}

/// Compute the new offsets for `keep` when packed into a fresh fat file,
/// honouring each slice's alignment.
pub fn layout(is_64: bool, keep: &[SliceRange]) -> Vec<SliceRange> {
    let mut cursor = FatHeader::encoded_len(is_64, keep.len());
    keep.iter()
        .map(|slice| {
            let align = 1u64 << slice.align;
            let offset = cursor.div_ceil(align) * align;
            cursor = offset + slice.size;
            SliceRange { offset, ..*slice }
        })
        .collect()
}

/// Write a fat file containing only `keep` (slices of `header`) to `out`.
///
/// Slice bytes are copied verbatim from `src`; gaps introduced by alignment
/// are zero-filled. Returns the number of bytes written.
pub fn write_thinned<R: Read + Seek, W: Write + ?Sized>(
    src: &mut R,
    header: &FatHeader,
    keep: &[SliceRange],
    out: &mut W,
) -> io::Result<u64> {
    if keep.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to write a universal binary with no architectures",
        ));
    }
    let placed = layout(header.is_64, keep);
    if !header.is_64 && placed.iter().any(|s| s.end() > u32::MAX as u64) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "thinned layout does not fit a 32-bit fat header",
        ));
    }

    let head = encode_header(header.is_64, &placed);
    out.write_all(&head)?;
    let mut written = head.len() as u64;

    for (original, target) in keep.iter().zip(&placed) {
        let pad = target.offset - written;
        io::copy(&mut io::repeat(0).take(pad), out)?;
        written += pad;

        src.seek(SeekFrom::Start(original.offset))?;
        let copied = io::copy(&mut src.by_ref().take(original.size), out)?;
        if copied != original.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("slice {} is truncated", original.arch_name()),
            ));
        }
        written += copied;
    }

    Ok(written)
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}
