//! Lazy bytecode access.
//!
//! Function bodies are kept as raw bytes; the interpreter decodes opcodes
//! and LEB128 immediates on the fly with [`CodeReader`]. Because bodies were
//! validated at load time the reader can assume well-formed encodings; it
//! still bounds-checks through slice indexing.
//!
//! Branching needs to know where each structured block ends, so the first
//! call of a function builds a [`SideTable`]: one linear scan that steps
//! over every instruction and records, per `block`/`loop`/`if`/`try_table`
//! opcode offset, the program counter after the matching `end` (and after
//! `else`, where present).

use hashbrown::HashMap;
use smallvec::SmallVec;

/// An opcode's memory immediate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MemArg {
    pub memory: u32,
    pub offset: u64,
    pub align: u32,
}

/// A structured block's declared type, still unresolved.
#[derive(Debug, Clone, Copy)]
pub(crate) enum BlockType {
    Empty,
    /// One result, no params.
    Result,
    /// Params and results from the module's type at this index.
    Func(u32),
}

/// One catch clause of a `try_table`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Catch {
    pub kind: CatchKind,
    /// Tag index; only meaningful for `Catch`/`CatchRef`.
    pub tag: u32,
    /// Branch depth, relative to the context enclosing the try_table.
    pub label: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CatchKind {
    Catch,
    CatchRef,
    CatchAll,
    CatchAllRef,
}

pub(crate) struct CodeReader<'a> {
    bytes: &'a [u8],
    pub pos: usize,
}

impl<'a> CodeReader<'a> {
    pub fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    #[inline]
    pub fn u8(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        b
    }

    #[inline]
    pub fn var_u32(&mut self) -> u32 {
        self.var_u64() as u32
    }

    pub fn var_u64(&mut self) -> u64 {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8();
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return result;
            }
            shift += 7;
        }
    }

    pub fn var_i64(&mut self) -> i64 {
        let mut result = 0i64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8();
            result |= i64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                return result;
            }
        }
    }

    #[inline]
    pub fn var_i32(&mut self) -> i32 {
        self.var_i64() as i32
    }

    /// The 33-bit signed form used by block types and heap types.
    #[inline]
    pub fn var_s33(&mut self) -> i64 {
        self.var_i64()
    }

    pub fn f32_bits(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + 4]);
        self.pos += 4;
        u32::from_le_bytes(buf)
    }

    pub fn f64_bits(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + 8]);
        self.pos += 8;
        u64::from_le_bytes(buf)
    }

    pub fn bytes16(&mut self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + 16]);
        self.pos += 16;
        buf
    }

    pub fn memarg(&mut self) -> MemArg {
        let flags = self.var_u32();
        // Bit 6 of the alignment flags marks an explicit memory index.
        let memory = if flags & 0x40 != 0 { self.var_u32() } else { 0 };
        let offset = self.var_u64();
        MemArg {
            memory,
            offset,
            align: flags & 0x3f,
        }
    }

    pub fn block_type(&mut self) -> BlockType {
        let value = self.var_s33();
        if value == -64 {
            // 0x40 in its signed spelling.
            BlockType::Empty
        } else if value < 0 {
            BlockType::Result
        } else {
            BlockType::Func(value as u32)
        }
    }

    /// A heap type immediate: `Ok(type_index)` for concrete types,
    /// `Err(code)` with the raw negative code for abstract ones.
    pub fn heap_type(&mut self) -> Result<u32, i64> {
        let value = self.var_s33();
        if value >= 0 {
            Ok(value as u32)
        } else {
            Err(value)
        }
    }

    pub fn catch_clause(&mut self) -> Catch {
        let kind = match self.u8() {
            0x00 => CatchKind::Catch,
            0x01 => CatchKind::CatchRef,
            0x02 => CatchKind::CatchAll,
            0x03 => CatchKind::CatchAllRef,
            other => unreachable!("validated catch kind {other:#x}"),
        };
        let tag = match kind {
            CatchKind::Catch | CatchKind::CatchRef => self.var_u32(),
            CatchKind::CatchAll | CatchKind::CatchAllRef => 0,
        };
        let label = self.var_u32();
        Catch { kind, tag, label }
    }

    pub fn catch_clauses(&mut self) -> SmallVec<[Catch; 2]> {
        let count = self.var_u32();
        (0..count).map(|_| self.catch_clause()).collect()
    }

    fn skip_valtype(&mut self) {
        match self.u8() {
            // (ref null ht) / (ref ht)
            0x63 | 0x64 => {
                let _ = self.var_s33();
            }
            _ => {}
        }
    }

    /// Step over one complete instruction, immediates included. `end`,
    /// `else`, and the block starters are reported to the caller, which is
    /// how the side-table builder tracks structure.
    pub fn skip_instr(&mut self) -> SkippedInstr {
        let opcode = self.u8();
        match opcode {
            // Structured control.
            0x02 | 0x03 | 0x04 => {
                let _ = self.block_type();
                return match opcode {
                    0x02 => SkippedInstr::Block,
                    0x03 => SkippedInstr::Loop,
                    _ => SkippedInstr::If,
                };
            }
            0x05 => return SkippedInstr::Else,
            0x0b => return SkippedInstr::End,
            0x1f => {
                let _ = self.block_type();
                let _ = self.catch_clauses();
                return SkippedInstr::TryTable;
            }

            // unreachable, nop, return, drop, select, throw_ref, ref.is_null,
            // ref.eq, ref.as_non_null, and all plain numeric opcodes.
            0x00 | 0x01 | 0x0f | 0x1a | 0x1b | 0x0a | 0xd1 | 0xd3 | 0xd4 => {}
            0x45..=0xc4 => {}

            // One u32 immediate.
            0x0c | 0x0d | 0x10 | 0x12 | 0x14 | 0x15 | 0x20..=0x24 | 0x25 | 0x26 | 0x08
            | 0xd2 | 0xd5 | 0xd6 | 0x3f | 0x40 => {
                let _ = self.var_u32();
            }

            0x0e => {
                // br_table: N+1 labels.
                let count = self.var_u32();
                for _ in 0..=count {
                    let _ = self.var_u32();
                }
            }

            // call_indirect / return_call_indirect: type + table.
            0x11 | 0x13 => {
                let _ = self.var_u32();
                let _ = self.var_u32();
            }

            0x1c => {
                // select with explicit types.
                let count = self.var_u32();
                for _ in 0..count {
                    self.skip_valtype();
                }
            }

            // Loads and stores.
            0x28..=0x3e => {
                let _ = self.memarg();
            }

            0x41 => {
                let _ = self.var_i32();
            }
            0x42 => {
                let _ = self.var_i64();
            }
            0x43 => {
                let _ = self.f32_bits();
            }
            0x44 => {
                let _ = self.f64_bits();
            }

            0xd0 => {
                let _ = self.var_s33();
            }

            0xfb => self.skip_gc_instr(),
            0xfc => self.skip_misc_instr(),
            0xfd => self.skip_simd_instr(),
            0xfe => self.skip_atomic_instr(),

            other => unreachable!("validated opcode {other:#x}"),
        }
        SkippedInstr::Plain
    }

    fn skip_gc_instr(&mut self) {
        let sub = self.var_u32();
        match sub {
            // struct.new/new_default, array.new/new_default, single-index
            // array accessors, array.fill.
            0 | 1 | 6 | 7 | 11 | 12 | 13 | 14 | 16 => {
                let _ = self.var_u32();
            }
            // Two indices: struct field ops, array.new_fixed/new_data/
            // new_elem, array.copy, array.init_data/init_elem.
            2..=5 | 8 | 9 | 10 | 17 | 18 | 19 => {
                let _ = self.var_u32();
                let _ = self.var_u32();
            }
            // ref.test / ref.cast (with and without null).
            20..=23 => {
                let _ = self.var_s33();
            }
            // br_on_cast / br_on_cast_fail.
            24 | 25 => {
                let _ = self.u8();
                let _ = self.var_u32();
                let _ = self.var_s33();
                let _ = self.var_s33();
            }
            // array.len, conversions, i31 ops.
            15 | 26..=30 => {}
            other => unreachable!("validated gc opcode {other}"),
        }
    }

    fn skip_misc_instr(&mut self) {
        let sub = self.var_u32();
        match sub {
            // trunc_sat family.
            0..=7 => {}
            // data.drop / elem.drop / memory.fill / table single-index ops.
            9 | 11 | 13 | 15 | 16 | 17 => {
                let _ = self.var_u32();
            }
            // memory.init/copy, table.init/copy.
            8 | 10 | 12 | 14 => {
                let _ = self.var_u32();
                let _ = self.var_u32();
            }
            other => unreachable!("validated misc opcode {other}"),
        }
    }

    fn skip_simd_instr(&mut self) {
        let sub = self.var_u32();
        match sub {
            // Loads and stores.
            0..=11 | 92 | 93 => {
                let _ = self.memarg();
            }
            // v128.const and i8x16.shuffle.
            12 | 13 => {
                let _ = self.bytes16();
            }
            // Lane extract/replace.
            21..=34 => {
                let _ = self.u8();
            }
            // Lane-wise loads/stores.
            84..=91 => {
                let _ = self.memarg();
                let _ = self.u8();
            }
            _ => {}
        }
    }

    fn skip_atomic_instr(&mut self) {
        let sub = self.var_u32();
        if sub == 3 {
            // atomic.fence's reserved byte.
            let _ = self.u8();
        } else {
            let _ = self.memarg();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SkippedInstr {
    Plain,
    Block,
    Loop,
    If,
    TryTable,
    Else,
    End,
}

/// Branch targets for one structured-control opcode.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BlockTargets {
    /// Program counter just past the matching `end`.
    pub end: u32,
    /// Program counter just past `else`, or `u32::MAX` when there is none.
    pub else_: u32,
}

impl BlockTargets {
    pub fn else_pc(&self) -> Option<u32> {
        (self.else_ != u32::MAX).then_some(self.else_)
    }
}

/// Per-function map from block-opcode offset to its targets. Built on the
/// function's first call and cached on the store's function instance.
#[derive(Debug, Default)]
pub(crate) struct SideTable {
    map: HashMap<u32, BlockTargets>,
}

impl SideTable {
    #[inline]
    pub fn targets(&self, opcode_pc: u32) -> BlockTargets {
        self.map[&opcode_pc]
    }

    /// Scan one function body (`[start, end)` within `code`) and record the
    /// structure of every block.
    pub fn build(code: &[u8], start: usize, end: usize) -> Self {
        let mut reader = CodeReader::new(code, start);
        // (opcode offset, else offset) per open block; the function body
        // itself is not an entry.
        let mut open: Vec<(u32, u32)> = Vec::new();
        let mut map = HashMap::default();

        while reader.pos < end {
            let at = reader.pos as u32;
            match reader.skip_instr() {
                SkippedInstr::Block
                | SkippedInstr::Loop
                | SkippedInstr::If
                | SkippedInstr::TryTable => open.push((at, u32::MAX)),
                SkippedInstr::Else => {
                    let top = open.last_mut().expect("else outside any block");
                    top.1 = reader.pos as u32;
                }
                SkippedInstr::End => {
                    // The outermost `end` closes the function body itself.
                    if let Some((opcode_pc, else_)) = open.pop() {
                        map.insert(
                            opcode_pc,
                            BlockTargets {
                                end: reader.pos as u32,
                                else_,
                            },
                        );
                    }
                }
                SkippedInstr::Plain => {}
            }
        }

        debug_assert!(open.is_empty(), "unbalanced blocks in validated code");
        Self { map }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leb_readers_match_reference_encodings() {
        let bytes = [0xe5, 0x8e, 0x26]; // 624485
        assert_eq!(CodeReader::new(&bytes, 0).var_u32(), 624_485);

        let bytes = [0x7f]; // -1
        assert_eq!(CodeReader::new(&bytes, 0).var_i32(), -1);

        let bytes = [0xc0, 0xbb, 0x78]; // -123456
        assert_eq!(CodeReader::new(&bytes, 0).var_i32(), -123_456);

        let bytes = [0x80, 0x80, 0x80, 0x80, 0x78]; // i32::MIN, 5-byte form
        assert_eq!(CodeReader::new(&bytes, 0).var_i32(), i32::MIN);
    }

    #[test]
    fn side_table_records_block_structure() {
        // block (empty) / i32.const 1 / drop / end / end(function)
        let code = [0x02, 0x40, 0x41, 0x01, 0x1a, 0x0b, 0x0b];
        let table = SideTable::build(&code, 0, code.len());
        let targets = table.targets(0);
        assert_eq!(targets.end, 6);
        assert_eq!(targets.else_pc(), None);
    }

    #[test]
    fn side_table_records_else_arms() {
        // if (empty) / nop / else / nop / end / end(function)
        let code = [0x04, 0x40, 0x01, 0x05, 0x01, 0x0b, 0x0b];
        let table = SideTable::build(&code, 0, code.len());
        let targets = table.targets(0);
        assert_eq!(targets.end, 6);
        assert_eq!(targets.else_pc(), Some(4));
    }

    #[test]
    fn memarg_reads_the_multi_memory_flag() {
        // flags with bit 6, memidx 2, offset 16
        let bytes = [0x42, 0x02, 0x10];
        let arg = CodeReader::new(&bytes, 0).memarg();
        assert_eq!(arg.memory, 2);
        assert_eq!(arg.offset, 16);
        assert_eq!(arg.align, 2);
    }
}
