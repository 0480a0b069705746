use log::debug;

use super::addressing::ByteAddress;
use super::handle::Handle;
use super::memory::ZMemory;
use super::opcodes::ZVariable;
use super::result::Result;
use super::stack::ZStack;
use super::traits::{LocationObserver, Variables};

// Resolves variable numbers to storage: the evaluation stack, the current
// frame's locals, or the global table in dynamic memory.
//
// The first global is the player-location object in this story format, so
// writes to it are where location-change notifications come from.
pub struct ZVariables {
    globals: ByteAddress,
    mem_h: Handle<ZMemory>,
    stack_h: Handle<ZStack>,
    observer: Option<Handle<dyn LocationObserver>>,
}

impl ZVariables {
    pub fn new(
        globals: ByteAddress,
        mem_h: Handle<ZMemory>,
        stack_h: Handle<ZStack>,
    ) -> ZVariables {
        ZVariables {
            globals,
            mem_h,
            stack_h,
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Option<Handle<dyn LocationObserver>>) {
        self.observer = observer;
    }

    fn global_offset(&self, g: u8) -> super::addressing::ZOffset {
        self.globals.inc_by(2 * usize::from(g))
    }

    fn read_global(&self, g: u8) -> Result<u16> {
        self.mem_h.borrow().read_word(self.global_offset(g))
    }

    fn write_global(&mut self, g: u8, val: u16) -> Result<()> {
        if g == 0 {
            let old = self.read_global(0)?;
            if old != val {
                debug!("location change: {} -> {}", old, val);
                if let Some(observer) = &self.observer {
                    observer.borrow_mut().location_changed(old, val);
                }
            }
        }
        self.mem_h.borrow_mut().write_word(self.global_offset(g), val)
    }
}

impl Variables for ZVariables {
    fn read_variable(&self, var: ZVariable) -> Result<u16> {
        match var {
            ZVariable::Stack => self.stack_h.borrow_mut().pop_word(),
            ZVariable::Local(l) => self.stack_h.borrow().read_local(l),
            ZVariable::Global(g) => self.read_global(g),
        }
    }

    fn write_variable(&mut self, var: ZVariable, val: u16) -> Result<()> {
        match var {
            ZVariable::Stack => self.stack_h.borrow_mut().push_word(val),
            ZVariable::Local(l) => self.stack_h.borrow_mut().write_local(l, val),
            ZVariable::Global(g) => self.write_global(g, val),
        }
    }

    // Indirect references (load, store, inc, dec, pull) treat the stack
    // variable as "top of stack in place" instead of push/pop.
    fn read_indirect(&self, var: ZVariable) -> Result<u16> {
        match var {
            ZVariable::Stack => self.stack_h.borrow().peek_word(),
            _ => self.read_variable(var),
        }
    }

    fn write_indirect(&mut self, var: ZVariable, val: u16) -> Result<()> {
        match var {
            ZVariable::Stack => self.stack_h.borrow_mut().poke_word(val),
            _ => self.write_variable(var, val),
        }
    }
}
