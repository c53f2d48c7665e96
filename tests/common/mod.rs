#![allow(dead_code)]

use std::path::{Path, PathBuf};

use slimmac::scanner::macho::{self, SliceRange};

pub const X86_64: (i32, i32) = (0x0100_0007, 3);
pub const ARM64: (i32, i32) = (0x0100_000c, 0);
pub const I386: (i32, i32) = (7, 3);

/// Create `<dir>/<app>/Contents/Resources/<tag>.lproj/Localizable.strings`
/// holding `bytes` bytes, for each `(tag, bytes)`
pub fn app_with_locales(dir: &Path, app: &str, locales: &[(&str, usize)]) -> PathBuf {
    let app_path = dir.join(app);
    let resources = app_path.join("Contents/Resources");
    std::fs::create_dir_all(&resources).unwrap();
    for (tag, bytes) in locales {
        let lproj = resources.join(format!("{}.lproj", tag));
        std::fs::create_dir_all(&lproj).unwrap();
        std::fs::write(lproj.join("Localizable.strings"), vec![b's'; *bytes]).unwrap();
    }
    app_path
}

/// Write a 32-bit fat binary at `path`: one slice per `(arch, size, fill)`,
/// each slice filled with its fill byte. Returns the slice table.
pub fn fat_binary(path: &Path, slices: &[((i32, i32), u64, u8)]) -> Vec<SliceRange> {
    let table: Vec<SliceRange> = slices
        .iter()
        .map(|((cputype, cpusubtype), size, _)| SliceRange {
            cputype: *cputype,
            cpusubtype: *cpusubtype,
            offset: 0,
            size: *size,
            align: 12,
        })
        .collect();
    let placed = macho::layout(false, &table);

    let mut bytes = macho::encode_header(false, &placed);
    for (slice, (_, size, fill)) in placed.iter().zip(slices) {
        bytes.resize(slice.offset as usize, 0);
        bytes.extend(std::iter::repeat(*fill).take(*size as usize));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, &bytes).unwrap();
    placed
}

/// The bytes of `slice` within the file at `path`
pub fn slice_bytes(path: &Path, slice: &SliceRange) -> Vec<u8> {
    let bytes = std::fs::read(path).unwrap();
    bytes[slice.offset as usize..slice.end() as usize].to_vec()
}

/// Every file and directory under `dir`, relative and sorted
pub fn tree(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    entries.sort();
    entries
}
