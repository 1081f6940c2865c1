// VCDIFF default code table (RFC 3284, Section 5.6).
//
// Same layout as xdelta3's `xd3_build_code_table` with the
// `__rfc3284_code_table_desc` descriptor. Exactly 256 entries.

use std::sync::LazyLock;

/// Instruction types matching xdelta3's `xd3_rtype` constants.
pub const XD3_NOOP: u8 = 0;
pub const XD3_ADD: u8 = 1;
pub const XD3_RUN: u8 = 2;
/// COPY modes are represented as XD3_CPY + mode (0..8 for default table).
pub const XD3_CPY: u8 = 3;

/// Minimum match length for COPY instructions (RFC 3284).
pub const MIN_MATCH: u8 = 4;

/// One entry of the code table.
///
/// Each opcode encodes one or two instructions. `type2 == XD3_NOOP` means
/// a single instruction. A size of 0 means the real size follows as a varint
/// in the instruction section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodeTableEntry {
    pub type1: u8,
    pub size1: u8,
    pub type2: u8,
    pub size2: u8,
}

pub type CodeTable = [CodeTableEntry; 256];

const ADD_SIZES: u8 = 17;
const NEAR_MODES: u8 = 4;
const SAME_MODES: u8 = 3;
const CPY_SIZES: u8 = 15;
const ADDCOPY_ADD_MAX: u8 = 4;
const ADDCOPY_NEAR_CPY_MAX: u8 = 6;
const ADDCOPY_SAME_CPY_MAX: u8 = 4;
const COPYADD_ADD_MAX: u8 = 1;
const COPYADD_NEAR_CPY_MAX: u8 = 4;
const COPYADD_SAME_CPY_MAX: u8 = 4;
const CPY_MODES: u8 = 2 + NEAR_MODES + SAME_MODES;

fn single(type1: u8, size1: u8) -> CodeTableEntry {
    CodeTableEntry {
        type1,
        size1,
        type2: XD3_NOOP,
        size2: 0,
    }
}

/// Build the default RFC 3284 code table.
pub fn build_default_code_table() -> CodeTable {
    let mut tbl = [CodeTableEntry::default(); 256];
    let mut entries = Vec::with_capacity(256);

    entries.push(single(XD3_RUN, 0));
    entries.push(single(XD3_ADD, 0));
    entries.extend((1..=ADD_SIZES).map(|size| single(XD3_ADD, size)));

    for mode in 0..CPY_MODES {
        entries.push(single(XD3_CPY + mode, 0));
        entries.extend((MIN_MATCH..MIN_MATCH + CPY_SIZES).map(|size| single(XD3_CPY + mode, size)));
    }

    let near_limit = 2 + NEAR_MODES;

    for mode in 0..CPY_MODES {
        let cpy_max = if mode < near_limit {
            ADDCOPY_NEAR_CPY_MAX
        } else {
            ADDCOPY_SAME_CPY_MAX
        };
        for add_size in 1..=ADDCOPY_ADD_MAX {
            for cpy_size in MIN_MATCH..=cpy_max {
                entries.push(CodeTableEntry {
                    type1: XD3_ADD,
                    size1: add_size,
                    type2: XD3_CPY + mode,
                    size2: cpy_size,
                });
            }
        }
    }

    for mode in 0..CPY_MODES {
        let cpy_max = if mode < near_limit {
            COPYADD_NEAR_CPY_MAX
        } else {
            COPYADD_SAME_CPY_MAX
        };
        for cpy_size in MIN_MATCH..=cpy_max {
            for add_size in 1..=COPYADD_ADD_MAX {
                entries.push(CodeTableEntry {
                    type1: XD3_CPY + mode,
                    size1: cpy_size,
                    type2: XD3_ADD,
                    size2: add_size,
                });
            }
        }
    }

    debug_assert_eq!(entries.len(), 256, "code table must have exactly 256 entries");
    tbl.copy_from_slice(&entries);
    tbl
}

/// The lazily-built default code table.
pub fn default_code_table() -> &'static CodeTable {
    static TABLE: LazyLock<CodeTable> = LazyLock::new(build_default_code_table);
    &TABLE
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_opcodes() {
        let t = default_code_table();
        assert_eq!(t[0], single(XD3_RUN, 0));
        assert_eq!(t[1], single(XD3_ADD, 0));
        assert_eq!(t[2], single(XD3_ADD, 1));
        assert_eq!(t[18], single(XD3_ADD, 17));
        // First COPY (mode 0, size from varint) and its sized forms.
        assert_eq!(t[19], single(XD3_CPY, 0));
        assert_eq!(t[20], single(XD3_CPY, 4));
        assert_eq!(t[34], single(XD3_CPY, 18));
        // Last single COPY: mode 8, size 18.
        assert_eq!(t[162], single(XD3_CPY + 8, 18));
    }

    #[test]
    fn double_opcodes() {
        let t = default_code_table();
        assert_eq!(
            t[163],
            CodeTableEntry {
                type1: XD3_ADD,
                size1: 1,
                type2: XD3_CPY,
                size2: 4
            }
        );
        assert_eq!(
            t[255],
            CodeTableEntry {
                type1: XD3_CPY + 8,
                size1: 4,
                type2: XD3_ADD,
                size2: 1
            }
        );
    }

    #[test]
    fn every_copy_mode_is_in_range() {
        for entry in default_code_table() {
            for ty in [entry.type1, entry.type2] {
                assert!(ty < XD3_CPY + CPY_MODES);
            }
        }
    }
}
