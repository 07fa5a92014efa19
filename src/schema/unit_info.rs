//! Packed `UnitInfo`: the value stored in the `unit-info-by-code` sub-database
//! (spec §4.2 table 10). Field layout mirrors
//! `examples/original_source/lib/Database/DatabaseImpl.h`'s `UnitInfoData`.
//!
//! LMDB hands back `&[u8]` slices that may not satisfy the alignment of a
//! `u64`/`i64` read in place. Rather than `unsafe`-transmuting the buffer (the
//! C++ original's approach, safe there because it controls the allocator),
//! this reader copies each fixed-width field into an aligned local via
//! `from_le_bytes` before interpreting it (spec §9, "Alignment in a byte
//! store"), and the writer pads the serialized length up to an 8-byte
//! boundary so future zero-copy slicing of the trailing arrays stays aligned.

use crate::kv::codes::IdCode;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnitFlags: u8 {
        const HAS_MAIN_FILE     = 1 << 0;
        const HAS_SYSROOT       = 1 << 1;
        const IS_SYSTEM         = 1 << 2;
        const HAS_TEST_SYMBOLS  = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProviderKind {
    Clang = 0,
    Swift = 1,
    Other = 255,
}

impl ProviderKind {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ProviderKind::Clang,
            1 => ProviderKind::Swift,
            _ => ProviderKind::Other,
        }
    }
}

/// One `(ProviderCode, FileCode)` pair: a record and the source file it was
/// decoded from, as a unit dependency (spec §3, "Unit. ... ProviderDepends[]").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderDep {
    pub provider: IdCode,
    pub file: IdCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub unit_code: IdCode,
    pub unit_name: String,
    pub main_file: IdCode,
    pub out_file: IdCode,
    pub sysroot: IdCode,
    pub target: IdCode,
    pub modtime_nanos: i64,
    pub flags: UnitFlags,
    pub provider_kind: ProviderKind,
    pub file_depends: Vec<IdCode>,
    pub unit_depends: Vec<IdCode>,
    pub provider_depends: Vec<ProviderDep>,
}

impl UnitInfo {
    pub fn has_main_file(&self) -> bool {
        self.flags.contains(UnitFlags::HAS_MAIN_FILE)
    }

    pub fn has_test_symbols(&self) -> bool {
        self.flags.contains(UnitFlags::HAS_TEST_SYMBOLS)
    }

    /// All file codes a unit is considered to depend on for the purposes of
    /// invariant 4 (spec §3): direct file deps plus every provider dep's file.
    pub fn all_file_depends(&self) -> impl Iterator<Item = IdCode> + '_ {
        self.file_depends
            .iter()
            .copied()
            .chain(self.provider_depends.iter().map(|p| p.file))
    }

    const HEADER_LEN: usize = 8 * 4 // main/out/sysroot/target codes
        + 8  // modtime
        + 1  // flags
        + 1  // provider_kind
        + 4  // file_depends len
        + 4  // unit_depends len
        + 4  // provider_depends len
        + 2; // name len

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            Self::HEADER_LEN
                + self.file_depends.len() * 8
                + self.unit_depends.len() * 8
                + self.provider_depends.len() * 16
                + self.unit_name.len(),
        );
        buf.extend_from_slice(&self.main_file.value().to_le_bytes());
        buf.extend_from_slice(&self.out_file.value().to_le_bytes());
        buf.extend_from_slice(&self.sysroot.value().to_le_bytes());
        buf.extend_from_slice(&self.target.value().to_le_bytes());
        buf.extend_from_slice(&self.modtime_nanos.to_le_bytes());
        buf.push(self.flags.bits());
        buf.push(self.provider_kind as u8);
        buf.extend_from_slice(&(self.file_depends.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.unit_depends.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.provider_depends.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.unit_name.len() as u16).to_le_bytes());

        for f in &self.file_depends {
            buf.extend_from_slice(&f.value().to_le_bytes());
        }
        for u in &self.unit_depends {
            buf.extend_from_slice(&u.value().to_le_bytes());
        }
        for p in &self.provider_depends {
            buf.extend_from_slice(&p.provider.value().to_le_bytes());
            buf.extend_from_slice(&p.file.value().to_le_bytes());
        }
        buf.extend_from_slice(self.unit_name.as_bytes());

        // Pad to an 8-byte boundary so the header + fixed-size arrays land on
        // aligned offsets for any future zero-copy reader.
        while buf.len() % 8 != 0 {
            buf.push(0);
        }
        buf
    }

    pub fn deserialize(unit_code: IdCode, bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::HEADER_LEN {
            return None;
        }
        let mut off = 0usize;
        let read_code = |bytes: &[u8], off: &mut usize| -> IdCode {
            let v = u64::from_le_bytes(bytes[*off..*off + 8].try_into().unwrap());
            *off += 8;
            IdCode::from_value(v)
        };

        let main_file = read_code(bytes, &mut off);
        let out_file = read_code(bytes, &mut off);
        let sysroot = read_code(bytes, &mut off);
        let target = read_code(bytes, &mut off);
        let modtime_nanos = i64::from_le_bytes(bytes[off..off + 8].try_into().unwrap());
        off += 8;
        let flags = UnitFlags::from_bits_truncate(bytes[off]);
        off += 1;
        let provider_kind = ProviderKind::from_u8(bytes[off]);
        off += 1;
        let file_len = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
        let unit_len = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
        let provider_len = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
        let name_len = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap()) as usize;
        off += 2;

        let mut file_depends = Vec::with_capacity(file_len);
        for _ in 0..file_len {
            file_depends.push(read_code(bytes, &mut off));
        }
        let mut unit_depends = Vec::with_capacity(unit_len);
        for _ in 0..unit_len {
            unit_depends.push(read_code(bytes, &mut off));
        }
        let mut provider_depends = Vec::with_capacity(provider_len);
        for _ in 0..provider_len {
            let provider = read_code(bytes, &mut off);
            let file = read_code(bytes, &mut off);
            provider_depends.push(ProviderDep { provider, file });
        }
        let unit_name = std::str::from_utf8(bytes.get(off..off + name_len)?)
            .ok()?
            .to_string();

        Some(UnitInfo {
            unit_code,
            unit_name,
            main_file,
            out_file,
            sysroot,
            target,
            modtime_nanos,
            flags,
            provider_kind,
            file_depends,
            unit_depends,
            provider_depends,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnitInfo {
        UnitInfo {
            unit_code: IdCode::from_str("u1"),
            unit_name: "u1".to_string(),
            main_file: IdCode::from_str("/a.c"),
            out_file: IdCode::from_str("/a.o"),
            sysroot: IdCode::ZERO,
            target: IdCode::from_str("x86_64-apple-macosx"),
            modtime_nanos: 1000,
            flags: UnitFlags::HAS_MAIN_FILE,
            provider_kind: ProviderKind::Clang,
            file_depends: vec![IdCode::from_str("/a.c"), IdCode::from_str("/a.h")],
            unit_depends: vec![],
            provider_depends: vec![ProviderDep {
                provider: IdCode::from_str("r1"),
                file: IdCode::from_str("/a.c"),
            }],
        }
    }

    #[test]
    fn round_trips_through_serialize_deserialize() {
        let info = sample();
        let bytes = info.serialize();
        assert_eq!(bytes.len() % 8, 0);
        let back = UnitInfo::deserialize(info.unit_code, &bytes).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn all_file_depends_includes_provider_dep_files() {
        let info = sample();
        let files: Vec<_> = info.all_file_depends().collect();
        assert!(files.contains(&IdCode::from_str("/a.c")));
        assert!(files.contains(&IdCode::from_str("/a.h")));
    }
}
