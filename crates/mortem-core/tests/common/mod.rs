//! Scripted in-memory inferior shared by the integration tests.
//!
//! Models the classic crash program:
//!
//! ```c
//! const char *hello_world = "Hello";
//!
//! int main(int argc, char const *argv[])
//! {
//!     int *null_ptr = 0;
//!     printf("%s\n", hello_world);
//!     printf("Now crash %d\n", *null_ptr); // Crash here.
//! }
//! ```
//!
//! Thread 1 stops in `main` at [`CRASH_LINE`]; thread 2 idles in a single
//! frame. Register `rax` holds [`RAX_AT_CRASH`].

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use mortem_core::error::{MortemError, MortemResult};
use mortem_core::target::{EventSender, Inferior, LaunchRequest, Launcher, Symbolizer, TargetEvent};
use mortem_core::types::{
    Address, Architecture, Frame, NativeFault, Platform, ProcessId, RegisterSet, SourceLocation, SymbolName,
    Symbolication, ThreadId, ValueType, VariableInfo, VariableLocation,
};

pub const MAIN_THREAD: ThreadId = ThreadId(1);
pub const IDLE_THREAD: ThreadId = ThreadId(2);

pub const CRASH_PC: u64 = 0x40_1100;
pub const CRASH_LINE: u32 = 22;
pub const RAX_AT_CRASH: u64 = 0xdead_beef;

const MAIN_FP: u64 = 0x7fff_0000;
const LIBC_FP: u64 = 0x7fff_0100;
const LIBC_RETURN: u64 = 0x40_1234;
const START_RETURN: u64 = 0x40_1500;
const IDLE_PC: u64 = 0x40_1800;

const ARGC_OFFSET: i64 = -0x14;
const ARGV_OFFSET: i64 = -0x20;
const NULL_PTR_OFFSET: i64 = -0x28;

const ARGV_ARRAY: u64 = 0x7fff_1000;
const ARGV0_STRING: u64 = 0x7fff_2000;
const HELLO_WORLD_GLOBAL: u64 = 0x40_4000;
const HELLO_WORLD_STRING: u64 = 0x40_2000;

/// A `SIGSEGV` reading address zero.
pub fn sigsegv() -> NativeFault
{
    NativeFault::Signal {
        number: 11,
        address: Some(Address::ZERO),
    }
}

/// Darwin's report of the same crash.
pub fn exc_bad_access() -> NativeFault
{
    NativeFault::MachException {
        exception: 1,
        codes: [1, 0],
    }
}

/// The fault each platform reports for a null dereference.
pub fn null_deref_fault(platform: Platform) -> NativeFault
{
    match platform {
        Platform::Darwin => exc_bad_access(),
        Platform::Windows => NativeFault::Win32Exception {
            code: 0xC000_0005,
            address: Some(Address::ZERO),
        },
        _ => sigsegv(),
    }
}

/// Execution-control call made on the inferior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control
{
    Resume(Option<NativeFault>),
    Step(ThreadId, Option<NativeFault>),
    Detach,
}

/// In-memory inferior. Each resume or step sends the next scripted event.
pub struct ScriptedInferior
{
    platform: Platform,
    threads: Vec<ThreadId>,
    registers: Mutex<HashMap<ThreadId, RegisterSet>>,
    memory: Mutex<BTreeMap<u64, u8>>,
    script: Mutex<VecDeque<TargetEvent>>,
    events: Mutex<Option<EventSender>>,
    controls: Mutex<Vec<Control>>,
}

impl ScriptedInferior
{
    pub fn crash_program(platform: Platform) -> Self
    {
        let inferior = Self {
            platform,
            threads: vec![MAIN_THREAD, IDLE_THREAD],
            registers: Mutex::new(HashMap::new()),
            memory: Mutex::new(BTreeMap::new()),
            script: Mutex::new(VecDeque::new()),
            events: Mutex::new(None),
            controls: Mutex::new(Vec::new()),
        };

        inferior.set_registers(
            MAIN_THREAD,
            RegisterSet::from_values(
                Architecture::X86_64,
                [
                    ("rax", RAX_AT_CRASH),
                    ("rbx", 0),
                    ("rip", CRASH_PC),
                    ("rsp", MAIN_FP - 0x30),
                    ("rbp", MAIN_FP),
                    ("rflags", 0x246),
                ],
            ),
        );
        inferior.set_registers(
            IDLE_THREAD,
            RegisterSet::from_values(Architecture::X86_64, [("rax", 0), ("rip", IDLE_PC), ("rsp", 0x7ffe_0000), ("rbp", 0)]),
        );

        // main's frame record, then __libc_start_main's, which ends the chain.
        inferior.write_word(MAIN_FP, LIBC_FP);
        inferior.write_word(MAIN_FP + 8, LIBC_RETURN);
        inferior.write_word(LIBC_FP, 0);
        inferior.write_word(LIBC_FP + 8, START_RETURN);

        inferior.write_bytes(frame_slot(NULL_PTR_OFFSET), &0u64.to_le_bytes());
        inferior.write_word(frame_slot(ARGV_OFFSET), ARGV_ARRAY);
        inferior.write_word(HELLO_WORLD_GLOBAL, HELLO_WORLD_STRING);
        inferior.write_bytes(HELLO_WORLD_STRING, b"Hello\0");
        inferior.set_args(&["a.out".to_string()]);
        inferior
    }

    /// Lay out `argc` and `argv` the way the loader would.
    pub fn set_args(&self, args: &[String])
    {
        let argc = u32::try_from(args.len()).unwrap();
        self.write_bytes(frame_slot(ARGC_OFFSET), &argc.to_le_bytes());

        let mut string_at = ARGV0_STRING;
        for (i, arg) in args.iter().enumerate() {
            self.write_word(ARGV_ARRAY + 8 * i as u64, string_at);
            let mut bytes = arg.as_bytes().to_vec();
            bytes.push(0);
            self.write_bytes(string_at, &bytes);
            string_at += bytes.len() as u64;
        }
        self.write_word(ARGV_ARRAY + 8 * args.len() as u64, 0);
    }

    pub fn set_registers(&self, thread: ThreadId, registers: RegisterSet)
    {
        self.registers.lock().unwrap().insert(thread, registers);
    }

    pub fn fail_registers(&self, thread: ThreadId)
    {
        self.registers.lock().unwrap().remove(&thread);
    }

    pub fn write_bytes(&self, address: u64, bytes: &[u8])
    {
        let mut memory = self.memory.lock().unwrap();
        for (i, byte) in bytes.iter().enumerate() {
            memory.insert(address + i as u64, *byte);
        }
    }

    pub fn write_word(&self, address: u64, value: u64)
    {
        self.write_bytes(address, &value.to_le_bytes());
    }

    /// Queue events to send on the next resumes or steps, in order.
    pub fn script<I: IntoIterator<Item = TargetEvent>>(&self, events: I)
    {
        self.script.lock().unwrap().extend(events);
    }

    pub fn attach_events(&self, events: EventSender)
    {
        *self.events.lock().unwrap() = Some(events);
    }

    /// A clone of the current launch's sender, as a backend thread keeps one.
    pub fn event_sender(&self) -> Option<EventSender>
    {
        self.events.lock().unwrap().clone()
    }

    /// Send an event right now, as a backend thread would.
    pub fn emit(&self, event: TargetEvent)
    {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            events.send(event).unwrap();
        }
    }

    /// Drop the event sender without reporting an exit.
    pub fn close_events(&self)
    {
        self.events.lock().unwrap().take();
    }

    pub fn controls(&self) -> Vec<Control>
    {
        self.controls.lock().unwrap().clone()
    }

    fn advance(&self, control: Control)
    {
        self.controls.lock().unwrap().push(control);
        let next = self.script.lock().unwrap().pop_front();
        if let Some(event) = next {
            self.emit(event);
        }
    }
}

fn frame_slot(offset: i64) -> u64
{
    MAIN_FP.checked_add_signed(offset).unwrap()
}

impl Inferior for ScriptedInferior
{
    fn pid(&self) -> ProcessId
    {
        ProcessId(4242)
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn platform(&self) -> Platform
    {
        self.platform
    }

    fn threads(&self) -> MortemResult<Vec<ThreadId>>
    {
        Ok(self.threads.clone())
    }

    fn read_registers(&self, thread: ThreadId) -> MortemResult<RegisterSet>
    {
        self.registers
            .lock()
            .unwrap()
            .get(&thread)
            .cloned()
            .ok_or_else(|| MortemError::Target(format!("cannot read registers of thread {thread}")))
    }

    fn read_memory(&self, address: Address, len: usize) -> MortemResult<Vec<u8>>
    {
        let memory = self.memory.lock().unwrap();
        (0..len as u64)
            .map(|i| {
                memory
                    .get(&(address.value() + i))
                    .copied()
                    .ok_or_else(|| MortemError::Target(format!("unmapped memory at {address}")))
            })
            .collect()
    }

    fn resume(&self, pending: Option<&NativeFault>) -> MortemResult<()>
    {
        self.advance(Control::Resume(pending.copied()));
        Ok(())
    }

    fn step(&self, thread: ThreadId, pending: Option<&NativeFault>) -> MortemResult<()>
    {
        self.advance(Control::Step(thread, pending.copied()));
        Ok(())
    }

    fn detach(&self) -> MortemResult<()>
    {
        self.controls.lock().unwrap().push(Control::Detach);
        self.close_events();
        Ok(())
    }
}

/// Launcher handing out one prepared [`ScriptedInferior`].
pub struct ScriptedLauncher
{
    inferior: Arc<ScriptedInferior>,
    on_launch: Vec<TargetEvent>,
    pub requests: Arc<Mutex<Vec<LaunchRequest>>>,
    fail: bool,
}

impl ScriptedLauncher
{
    /// Launch sends `on_launch` right away (usually the crash).
    pub fn new(inferior: Arc<ScriptedInferior>, on_launch: Vec<TargetEvent>) -> Self
    {
        Self {
            inferior,
            on_launch,
            requests: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    pub fn failing(inferior: Arc<ScriptedInferior>) -> Self
    {
        Self {
            fail: true,
            ..Self::new(inferior, Vec::new())
        }
    }
}

impl Launcher for ScriptedLauncher
{
    fn launch(&mut self, request: &LaunchRequest, events: EventSender) -> MortemResult<Arc<dyn Inferior>>
    {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(MortemError::LaunchFailed(format!(
                "{}: no such file",
                request.executable().display()
            )));
        }

        self.inferior.set_args(request.args());
        self.inferior.attach_events(events);
        for event in self.on_launch.drain(..) {
            self.inferior.emit(event);
        }
        Ok(self.inferior.clone())
    }
}

/// Debug info for the crash program.
pub struct CrashProgramSymbols;

impl Symbolizer for CrashProgramSymbols
{
    fn symbolize(&self, pc: Address) -> Option<Symbolication>
    {
        let (name, location) = match pc.value() {
            CRASH_PC => ("main", Some(SourceLocation::new("/work/inferior-crashing/main.c", CRASH_LINE))),
            0x40_1000..=0x40_11ff => ("main", Some(SourceLocation::new("/work/inferior-crashing/main.c", 15))),
            0x40_1200..=0x40_13ff => ("__libc_start_main", None),
            0x40_1400..=0x40_15ff => ("_start", None),
            _ => return None,
        };
        Some(Symbolication {
            function: Some(SymbolName::from_linkage_name(name)),
            location,
        })
    }

    fn variable(&self, frame: &Frame, name: &str) -> Option<VariableInfo>
    {
        if name == "hello_world" {
            return Some(VariableInfo::new(
                VariableLocation::Address(Address::from(HELLO_WORLD_GLOBAL)),
                ValueType::c_string(),
            ));
        }
        if frame.function_name() != Some("main") {
            return None;
        }
        let (offset, ty) = match name {
            "argc" => (ARGC_OFFSET, ValueType::INT),
            "argv" => (ARGV_OFFSET, ValueType::c_string().pointer_to()),
            "null_ptr" => (NULL_PTR_OFFSET, ValueType::INT.pointer_to()),
            _ => return None,
        };
        Some(VariableInfo::new(VariableLocation::FrameOffset(offset), ty))
    }
}
