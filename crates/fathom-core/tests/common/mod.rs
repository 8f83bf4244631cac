//! Shared fixtures: the anonymous-aggregate types, an in-memory target, and
//! a scripted debugger.
//!
//! The types mirror this C program:
//!
//! ```c
//! struct anonymous_nest {
//!     struct { int a; struct { int c; int d; } foo; };
//!     int b;
//! };
//! struct anonymous_child {
//!     struct { struct { int a; int b; } grandchild; struct { int c; int d; } foo; };
//! };
//! struct anonymous_grandparent {
//!     int x;
//!     struct { struct anonymous_nest child; };
//! };
//! typedef struct { int dummy; } type_y;
//! typedef struct { type_y y; } type_z;
//! ```

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use fathom_core::breakpoints::{BreakpointId, BreakpointInfo, BreakpointStore};
use fathom_core::debugger::Debugger;
use fathom_core::error::{FathomError, FathomResult};
use fathom_core::layout::{ScalarEncoding, TypeGraph, TypeGraphBuilder, TypeId};
use fathom_core::memory::MemoryReader;
use fathom_core::symbols::{DebugInfo, FrameBase, FunctionScope, LineEntry, LineTable, VariableInfo, VariableLocation, VariableTable};
use fathom_core::types::{Address, Architecture, ProcessId, Registers, SourceLocation, StopReason, ThreadId};
use gimli::RunTimeEndian;

pub struct Types
{
    pub graph: Arc<TypeGraph>,
    pub int: TypeId,
    pub nest: TypeId,
    pub nest_ptr: TypeId,
    pub child: TypeId,
    pub child_ptr: TypeId,
    pub grandparent: TypeId,
    pub type_y: TypeId,
    pub type_z: TypeId,
    pub type_z_ptr: TypeId,
}

pub fn types() -> Types
{
    let mut b = TypeGraphBuilder::new(8);
    let int = b.scalar("int", 4, ScalarEncoding::Signed);

    let nest_foo = b.structure(None, 8);
    b.field(nest_foo, Some("c"), 0, int).unwrap();
    b.field(nest_foo, Some("d"), 4, int).unwrap();
    let nest_inner = b.structure(None, 12);
    b.field(nest_inner, Some("a"), 0, int).unwrap();
    b.field(nest_inner, Some("foo"), 4, nest_foo).unwrap();
    let nest = b.structure(Some("anonymous_nest"), 16);
    b.field(nest, None, 0, nest_inner).unwrap();
    b.field(nest, Some("b"), 12, int).unwrap();
    let nest_ptr = b.pointer(Some(nest));

    let grandchild = b.structure(None, 8);
    b.field(grandchild, Some("a"), 0, int).unwrap();
    b.field(grandchild, Some("b"), 4, int).unwrap();
    let child_foo = b.structure(None, 8);
    b.field(child_foo, Some("c"), 0, int).unwrap();
    b.field(child_foo, Some("d"), 4, int).unwrap();
    let child_inner = b.structure(None, 16);
    b.field(child_inner, Some("grandchild"), 0, grandchild).unwrap();
    b.field(child_inner, Some("foo"), 8, child_foo).unwrap();
    let child = b.structure(Some("anonymous_child"), 16);
    b.field(child, None, 0, child_inner).unwrap();
    let child_ptr = b.pointer(Some(child));

    let holder = b.structure(None, 16);
    b.field(holder, Some("child"), 0, nest).unwrap();
    let grandparent = b.structure(Some("anonymous_grandparent"), 20);
    b.field(grandparent, Some("x"), 0, int).unwrap();
    b.field(grandparent, None, 4, holder).unwrap();

    let y_struct = b.structure(None, 4);
    b.field(y_struct, Some("dummy"), 0, int).unwrap();
    let type_y = b.typedef("type_y", y_struct);
    let z_struct = b.structure(None, 4);
    b.field(z_struct, Some("y"), 0, type_y).unwrap();
    let type_z = b.typedef("type_z", z_struct);
    let type_z_ptr = b.pointer(Some(type_z));

    Types {
        graph: Arc::new(b.finish().unwrap()),
        int,
        nest,
        nest_ptr,
        child,
        child_ptr,
        grandparent,
        type_y,
        type_z,
        type_z_ptr,
    }
}

/// Sparse little-endian memory
#[derive(Debug, Default, Clone)]
pub struct FakeMemory
{
    regions: BTreeMap<u64, Vec<u8>>,
    reads: std::cell::Cell<usize>,
}

impl FakeMemory
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn map(&mut self, start: u64, len: usize)
    {
        self.regions.insert(start, vec![0; len]);
    }

    pub fn write(&mut self, address: u64, bytes: &[u8])
    {
        let (start, region) = self
            .regions
            .range_mut(..=address)
            .next_back()
            .expect("write outside mapped memory");
        let offset = usize::try_from(address - start).unwrap();
        region[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_i32(&mut self, address: u64, value: i32)
    {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_u64(&mut self, address: u64, value: u64)
    {
        self.write(address, &value.to_le_bytes());
    }

    /// Number of `read_memory` calls so far
    pub fn reads(&self) -> usize
    {
        self.reads.get()
    }
}

impl MemoryReader for FakeMemory
{
    fn read_memory(&self, addr: Address, len: usize) -> FathomResult<Vec<u8>>
    {
        self.reads.set(self.reads.get() + 1);
        let unmapped = || FathomError::MemoryRead {
            address: addr,
            length: len,
            details: "unmapped".to_string(),
        };
        let (start, region) = self.regions.range(..=addr.value()).next_back().ok_or_else(unmapped)?;
        let offset = usize::try_from(addr.value() - start).map_err(|_| unmapped())?;
        region.get(offset..offset + len).map(<[u8]>::to_vec).ok_or_else(unmapped)
    }

    fn pointer_size(&self) -> u8
    {
        8
    }

    fn endian(&self) -> RunTimeEndian
    {
        RunTimeEndian::Little
    }
}

pub const NEST_ADDR: u64 = 0x2000;
pub const CHILD_ADDR: u64 = 0x3000;
pub const G_ADDR: u64 = 0x1000;
pub const Z_ADDR: u64 = 0x1100;
pub const PZ_ADDR: u64 = 0x1200;
pub const FRAME_POINTER: u64 = 0x7fff_0000;
/// `rbp + 16`
pub const CFA: u64 = FRAME_POINTER + 16;
pub const N_SLOT: u64 = CFA - 24;
pub const C_SLOT: u64 = CFA - 32;

/// Memory holding the values `main.c` sets before its breakpoints
pub fn memory() -> FakeMemory
{
    let mut memory = FakeMemory::new();
    memory.map(0x1000, 0x300);
    memory.map(NEST_ADDR, 0x100);
    memory.map(CHILD_ADDR, 0x100);
    memory.map(FRAME_POINTER - 0x100, 0x200);

    // struct anonymous_nest { a = 1, foo = { c = 3, d = 4 }, b = 2 }
    memory.write_i32(NEST_ADDR, 1);
    memory.write_i32(NEST_ADDR + 4, 3);
    memory.write_i32(NEST_ADDR + 8, 4);
    memory.write_i32(NEST_ADDR + 12, 2);

    // struct anonymous_child { grandchild = { a = 1, b = 2 }, foo = { c = 3, d = 4 } }
    memory.write_i32(CHILD_ADDR, 1);
    memory.write_i32(CHILD_ADDR + 4, 2);
    memory.write_i32(CHILD_ADDR + 8, 3);
    memory.write_i32(CHILD_ADDR + 12, 4);

    // struct anonymous_grandparent g = { x = 7, child = { 1, { 3, 4 }, 2 } }
    memory.write_i32(G_ADDR, 7);
    memory.write_i32(G_ADDR + 4, 1);
    memory.write_i32(G_ADDR + 8, 3);
    memory.write_i32(G_ADDR + 12, 4);
    memory.write_i32(G_ADDR + 16, 2);

    // type_z z = { { 2 } }; type_z *pz = 0;
    memory.write_i32(Z_ADDR, 2);
    memory.write_u64(PZ_ADDR, 0);

    memory.write_u64(N_SLOT, NEST_ADDR);
    memory.write_u64(C_SLOT, CHILD_ADDR);
    memory
}

pub const MAIN_LOW: u64 = 0x400;
pub const MAIN_HIGH: u64 = 0x500;
pub const LINE_25: u64 = 0x420;

/// Variables and lines of `main.c`, at link-time addresses
pub fn debug_info(types: &Types) -> Arc<DebugInfo>
{
    let globals = vec![
        VariableInfo {
            name: "g".into(),
            ty: types.grandparent,
            location: VariableLocation::Static(G_ADDR),
        },
        VariableInfo {
            name: "z".into(),
            ty: types.type_z,
            location: VariableLocation::Static(Z_ADDR),
        },
        VariableInfo {
            name: "pz".into(),
            ty: types.type_z_ptr,
            location: VariableLocation::Static(PZ_ADDR),
        },
    ];
    let main = FunctionScope {
        name: "main".into(),
        linkage_name: None,
        low_pc: MAIN_LOW,
        high_pc: MAIN_HIGH,
        frame_base: FrameBase::CallFrameCfa,
        locals: vec![
            VariableInfo {
                name: "n".into(),
                ty: types.nest_ptr,
                location: VariableLocation::FrameOffset(-24),
            },
            VariableInfo {
                name: "c".into(),
                ty: types.child_ptr,
                location: VariableLocation::FrameOffset(-32),
            },
        ],
    };
    let row = |line, address| LineEntry {
        file: "/src/anonymous/main.c".into(),
        line,
        address,
        is_stmt: true,
    };
    let lines = LineTable::from_entries(vec![row(20, MAIN_LOW), row(21, 0x408), row(25, LINE_25), row(27, 0x440)]);

    Arc::new(DebugInfo::from_parts(
        Arc::clone(&types.graph),
        VariableTable::from_parts(globals, vec![main]),
        lines,
    ))
}

/// Debugger that "runs" to whatever breakpoint is set at `stop_at`
#[derive(Debug)]
pub struct FakeDebugger
{
    pub memory: FakeMemory,
    pub registers: Registers,
    pub state: StopReason,
    pub launched: Option<String>,
    pub image_base: Option<u64>,
    /// Threads reported by `threads()`; the first is the process itself
    pub threads: Vec<ThreadId>,
    breakpoints: BreakpointStore,
}

impl FakeDebugger
{
    pub fn new(memory: FakeMemory) -> Self
    {
        Self {
            memory,
            registers: Registers {
                pc: 0,
                sp: FRAME_POINTER - 0x40,
                fp: FRAME_POINTER,
            },
            state: StopReason::Running,
            launched: None,
            image_base: None,
            threads: vec![ThreadId(4242)],
            breakpoints: BreakpointStore::new(),
        }
    }
}

impl MemoryReader for FakeDebugger
{
    fn read_memory(&self, addr: Address, len: usize) -> FathomResult<Vec<u8>>
    {
        if self.launched.is_none() {
            return Err(FathomError::NotAttached);
        }
        self.memory.read_memory(addr, len)
    }

    fn pointer_size(&self) -> u8
    {
        8
    }

    fn endian(&self) -> RunTimeEndian
    {
        RunTimeEndian::Little
    }
}

impl Debugger for FakeDebugger
{
    fn launch(&mut self, program: &str, _args: &[&str]) -> FathomResult<ProcessId>
    {
        self.launched = Some(program.to_string());
        self.state = StopReason::Launched;
        Ok(ProcessId(4242))
    }

    fn pid(&self) -> Option<ProcessId>
    {
        self.launched.as_ref().map(|_| ProcessId(4242))
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn image_base(&self, _image: &Path) -> FathomResult<Option<Address>>
    {
        Ok(self.image_base.map(Address::new))
    }

    fn set_breakpoint(&mut self, address: Address, location: Option<SourceLocation>) -> FathomResult<BreakpointId>
    {
        if self.launched.is_none() {
            return Err(FathomError::NotAttached);
        }
        let id = self.breakpoints.request(address, location);
        self.breakpoints.mark_resolved(id, vec![0x55]);
        Ok(id)
    }

    fn remove_breakpoint(&mut self, id: BreakpointId) -> FathomResult<()>
    {
        self.breakpoints.remove(id).map(|_| ()).ok_or(FathomError::NoBreakpoint(id.raw()))
    }

    fn breakpoints(&self) -> Vec<BreakpointInfo>
    {
        self.breakpoints.list()
    }

    fn resume(&mut self) -> FathomResult<()>
    {
        if self.launched.is_none() {
            return Err(FathomError::NotAttached);
        }
        self.state = StopReason::Running;
        Ok(())
    }

    fn wait_for_stop(&mut self) -> FathomResult<StopReason>
    {
        // Stop at the lowest enabled breakpoint after the current pc
        let next = self
            .breakpoints
            .list()
            .into_iter()
            .filter(|info| info.is_enabled() && info.address.value() > self.registers.pc)
            .map(|info| info.address)
            .min();
        self.state = match next {
            Some(address) => {
                self.registers.pc = address.value();
                self.breakpoints.record_hit(address);
                StopReason::Breakpoint(address.value())
            }
            None => StopReason::Exited(0),
        };
        Ok(self.state)
    }

    fn threads(&self) -> FathomResult<Vec<ThreadId>>
    {
        if self.launched.is_none() {
            return Err(FathomError::NotAttached);
        }
        Ok(self.threads.clone())
    }

    fn stop_reason(&self) -> StopReason
    {
        self.state
    }

    fn read_registers(&self) -> FathomResult<Registers>
    {
        match self.state {
            _ if self.launched.is_none() => Err(FathomError::NotAttached),
            StopReason::Running => Err(FathomError::NotStopped),
            _ => Ok(self.registers),
        }
    }

    fn kill(&mut self) -> FathomResult<()>
    {
        self.state = StopReason::Terminated(9);
        Ok(())
    }
}
