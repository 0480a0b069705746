use log::{debug, trace};

use super::addressing::{ByteAddress, PackedAddress, ZOffset, ZPC};
use super::constants::{MAX_LOCALS, MAX_STREAM_NESTING};
use super::dictionary::ZDictionary;
use super::handle::Handle;
use super::header::ZHeader;
use super::memory::ZMemory;
use super::objects::ZObjectTable;
use super::opcodes::{branch_on, BranchResult, ZOperand, ZOperandType, ZVariable};
use super::random::ZRandom;
use super::result::{Result, ZErr};
use super::snapshot::ZSnapshot;
use super::stack::ZStack;
use super::traits::{LocationObserver, Variables, ZInput, ZOutput, PC};
use super::variables::ZVariables;
use super::version::ZVersion;
use super::zscii;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ZState {
    Running,
    Halted,
}

// The machine context: every piece of state one running story needs, in
// one explicitly-passed value. Two stories never share anything, so any
// number can run side by side.
//
// The fetch/decode/execute loop lives here, along with one method per
// opcode. Handler names carry the opcode's number in its count class,
// which is how the instruction set documentation refers to them.
pub struct ZProcessor<I, O>
where
    I: ZInput,
    O: ZOutput,
{
    pub story_h: Handle<ZMemory>,
    pub header: ZHeader,
    pub pc: ZPC,
    stack_h: Handle<ZStack>,
    variables: ZVariables,
    objects: ZObjectTable,
    dictionary: ZDictionary,
    random: ZRandom,
    input: I,
    output: O,

    version: ZVersion,
    abbrevs: ByteAddress,
    // Innermost table-redirection target last; screen output is masked
    // while any are active.
    stream_tables: Vec<usize>,
    screen_output: bool,
    saved: Option<ZSnapshot>,
    state: ZState,
    // Address of the opcode currently executing, for diagnostics.
    op_pc: usize,
}

impl<I, O> ZProcessor<I, O>
where
    I: ZInput,
    O: ZOutput,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        story_h: Handle<ZMemory>,
        header: ZHeader,
        pc: ZPC,
        stack_h: Handle<ZStack>,
        variables: ZVariables,
        objects: ZObjectTable,
        dictionary: ZDictionary,
        input: I,
        output: O,
    ) -> Result<ZProcessor<I, O>> {
        let version = header.version_number();
        let abbrevs = header.abbrev_location()?;
        Ok(ZProcessor {
            story_h,
            header,
            pc,
            stack_h,
            variables,
            objects,
            dictionary,
            random: ZRandom::new(),
            input,
            output,
            version,
            abbrevs,
            stream_tables: Vec::new(),
            screen_output: true,
            saved: None,
            state: ZState::Running,
            op_pc: 0,
        })
    }

    pub fn state(&self) -> ZState {
        self.state
    }

    pub fn set_observer(&mut self, observer: Option<Handle<dyn LocationObserver>>) {
        self.variables.set_observer(observer);
    }

    // Make the whole run reproducible from the outside.
    pub fn seed_random(&mut self, seed: u64) {
        self.random.reseed(seed);
    }

    pub fn run(&mut self) -> Result<()> {
        while self.step()? == ZState::Running {}
        Ok(())
    }

    // Execute at most n instructions. An external driver that cannot
    // leave the machine running indefinitely calls this repeatedly; all
    // resumable state stays inside the processor (or in a snapshot, if it
    // needs to outlive the process).
    pub fn run_batch(&mut self, n: usize) -> Result<ZState> {
        for _ in 0..n {
            if self.step()? == ZState::Halted {
                break;
            }
        }
        Ok(self.state)
    }

    pub fn step(&mut self) -> Result<ZState> {
        if self.state == ZState::Halted {
            return Ok(ZState::Halted);
        }
        self.execute_opcode()?;
        Ok(self.state)
    }

    pub fn save_state(&self) -> Result<ZSnapshot> {
        ZSnapshot::capture(
            &self.header,
            &self.story_h.borrow(),
            &self.stack_h.borrow(),
            self.pc.current_pc(),
        )
    }

    pub fn restore_state(&mut self, snapshot: &ZSnapshot) -> Result<()> {
        snapshot.matches_story(&self.header)?;
        snapshot.apply(
            &mut self.story_h.borrow_mut(),
            &mut self.stack_h.borrow_mut(),
        )?;
        self.pc.set_pc(snapshot.pc());
        self.state = ZState::Running;
        Ok(())
    }

    //
    // Fetch and decode.
    //

    fn execute_opcode(&mut self) -> Result<()> {
        self.op_pc = self.pc.current_pc();
        let byte = self.pc.next_byte()?;
        trace!("{:#06x}: opcode byte {:#04x}", self.op_pc, byte);

        match byte & 0b1100_0000 {
            0b1000_0000 => self.execute_short_opcode(byte),
            0b1100_0000 => self.execute_var_opcode(byte),
            _ => self.execute_long_opcode(byte),
        }
    }

    fn execute_long_opcode(&mut self, byte: u8) -> Result<()> {
        let opcode = byte & 0b1_1111;
        let mut operands = <[ZOperand; 4]>::default();

        operands[0] = ZOperand::read_operand(
            &mut self.pc,
            if byte & 0b0100_0000 == 0 {
                ZOperandType::SmallConstantType
            } else {
                ZOperandType::VariableType
            },
        )?;
        operands[1] = ZOperand::read_operand(
            &mut self.pc,
            if byte & 0b0010_0000 == 0 {
                ZOperandType::SmallConstantType
            } else {
                ZOperandType::VariableType
            },
        )?;

        self.dispatch_twoop(opcode, operands)
    }

    fn execute_short_opcode(&mut self, byte: u8) -> Result<()> {
        let opcode = byte & 0b1111;
        let operand = ZOperand::read_operand(&mut self.pc, ZOperandType::from(byte >> 4))?;

        if operand.is_omitted() {
            self.dispatch_zeroop(opcode)
        } else {
            self.dispatch_oneop(opcode, operand)
        }
    }

    // Variable-form instructions carry their operand types in a trailing
    // byte, two bits each. Bit 5 of the opcode byte distinguishes a 2-op
    // instruction in variable clothing (je with three operands and such)
    // from the true VAR opcodes.
    fn execute_var_opcode(&mut self, byte: u8) -> Result<()> {
        let opcode = byte & 0b1_1111;
        let optypes = self.pc.next_byte()?;

        let mut operands = <[ZOperand; 4]>::default();
        for idx in 0..4 {
            let operand =
                ZOperand::read_operand(&mut self.pc, ZOperandType::from(optypes >> ((3 - idx) * 2)))?;
            match operand {
                ZOperand::Omitted => break,
                o => operands[idx] = o,
            }
        }

        if byte & 0b0010_0000 == 0 {
            self.dispatch_twoop(opcode, operands)
        } else {
            self.dispatch_var(opcode, operands)
        }
    }

    fn dispatch_twoop(&mut self, opcode: u8, operands: [ZOperand; 4]) -> Result<()> {
        match opcode {
            1 => self.twoop_1_je(operands),
            2 => self.twoop_2_jl(operands),
            3 => self.twoop_3_jg(operands),
            4 => self.twoop_4_dec_chk(operands),
            5 => self.twoop_5_inc_chk(operands),
            6 => self.twoop_6_jin(operands),
            7 => self.twoop_7_test(operands),
            8 => self.twoop_8_or(operands),
            9 => self.twoop_9_and(operands),
            10 => self.twoop_10_test_attr(operands),
            11 => self.twoop_11_set_attr(operands),
            12 => self.twoop_12_clear_attr(operands),
            13 => self.twoop_13_store(operands),
            14 => self.twoop_14_insert_obj(operands),
            15 => self.twoop_15_loadw(operands),
            16 => self.twoop_16_loadb(operands),
            17 => self.twoop_17_get_prop(operands),
            18 => self.twoop_18_get_prop_addr(operands),
            19 => self.twoop_19_get_next_prop(operands),
            20 => self.twoop_20_add(operands),
            21 => self.twoop_21_sub(operands),
            22 => self.twoop_22_mul(operands),
            23 => self.twoop_23_div(operands),
            24 => self.twoop_24_mod(operands),
            _ => self.undefined("2op", opcode),
        }
    }

    fn dispatch_oneop(&mut self, opcode: u8, operand: ZOperand) -> Result<()> {
        match opcode {
            0 => self.oneop_128_jz(operand),
            1 => self.oneop_129_get_sibling(operand),
            2 => self.oneop_130_get_child(operand),
            3 => self.oneop_131_get_parent(operand),
            4 => self.oneop_132_get_prop_len(operand),
            5 => self.oneop_133_inc(operand),
            6 => self.oneop_134_dec(operand),
            7 => self.oneop_135_print_addr(operand),
            9 => self.oneop_137_remove_obj(operand),
            10 => self.oneop_138_print_obj(operand),
            11 => self.oneop_139_ret(operand),
            12 => self.oneop_140_jump(operand),
            13 => self.oneop_141_print_paddr(operand),
            14 => self.oneop_142_load(operand),
            15 => self.oneop_143_not(operand),
            _ => self.undefined("1op", opcode),
        }
    }

    fn dispatch_zeroop(&mut self, opcode: u8) -> Result<()> {
        match opcode {
            0 => self.zeroop_176_rtrue(),
            1 => self.zeroop_177_rfalse(),
            2 => self.zeroop_178_print(),
            3 => self.zeroop_179_print_ret(),
            4 => Ok(()), // nop
            5 => self.zeroop_181_save(),
            6 => self.zeroop_182_restore(),
            7 => self.zeroop_183_restart(),
            8 => self.zeroop_184_ret_popped(),
            9 => self.zeroop_185_pop(),
            10 => self.zeroop_186_quit(),
            11 => self.zeroop_187_new_line(),
            12 => self.zeroop_188_show_status(),
            13 => self.zeroop_189_verify(),
            _ => self.undefined("0op", opcode),
        }
    }

    fn dispatch_var(&mut self, opcode: u8, operands: [ZOperand; 4]) -> Result<()> {
        match opcode {
            0 => self.var_224_call(operands),
            1 => self.var_225_storew(operands),
            2 => self.var_226_storeb(operands),
            3 => self.var_227_put_prop(operands),
            4 => self.var_228_sread(operands),
            5 => self.var_229_print_char(operands),
            6 => self.var_230_print_num(operands),
            7 => self.var_231_random(operands),
            8 => self.var_232_push(operands),
            9 => self.var_233_pull(operands),
            10 => self.var_234_split_window(operands),
            11 => self.var_235_set_window(operands),
            19 => self.var_243_output_stream(operands),
            20 => self.var_244_input_stream(operands),
            21 => self.var_245_sound_effect(operands),
            _ => self.undefined("var", opcode),
        }
    }

    //
    // Shared machinery.
    //

    fn undefined(&self, form: &'static str, opcode: u8) -> Result<()> {
        Err(ZErr::UndefinedOpcode {
            pc: self.op_pc,
            form,
            opcode,
        })
    }

    fn value(&self, operand: &ZOperand) -> Result<u16> {
        operand.value(&self.variables, self.op_pc)
    }

    fn signed(&self, operand: &ZOperand) -> Result<i16> {
        operand.signed_value(&self.variables, self.op_pc)
    }

    // Operands that name an object.
    fn object(&self, operand: &ZOperand) -> Result<u16> {
        self.value(operand)
    }

    // Operands that name a variable (for the indirect-reference opcodes).
    fn variable(&self, operand: &ZOperand) -> Result<ZVariable> {
        Ok(ZVariable::from(self.value(operand)? as u8))
    }

    fn store_result(&mut self, val: u16) -> Result<()> {
        let var = ZVariable::from(self.pc.next_byte()?);
        self.variables.write_variable(var, val)
    }

    fn finish_branch(&mut self, cond: bool) -> Result<()> {
        match branch_on(&mut self.pc, cond)? {
            BranchResult::Continue => Ok(()),
            BranchResult::ReturnFalse => self.do_return(0),
            BranchResult::ReturnTrue => self.do_return(1),
        }
    }

    fn do_return(&mut self, val: u16) -> Result<()> {
        let (return_pc, return_var) = self.stack_h.borrow_mut().pop_frame()?;
        self.pc.set_pc(return_pc);
        if let Some(var) = return_var {
            self.variables.write_variable(var, val)?;
        }
        Ok(())
    }

    // All printed text funnels through here, so stream redirection holds
    // for every print-family opcode at once.
    fn print_str(&mut self, text: &str) -> Result<()> {
        if let Some(&table) = self.stream_tables.last() {
            let mut mem = self.story_h.borrow_mut();
            let mut count = usize::from(mem.read_word(ZOffset::from(table))?);
            for ch in text.chars() {
                let byte = match ch {
                    '\n' => 13,
                    c if c.is_ascii() => c as u8,
                    _ => b'?',
                };
                mem.write_byte(ZOffset::from(table + 2 + count), byte)?;
                count += 1;
            }
            mem.write_word(ZOffset::from(table), count as u16)
        } else {
            if self.screen_output {
                self.output.print(text);
            }
            Ok(())
        }
    }

    //
    // 2OP instructions.
    //

    // Branch if the first operand equals any of the others. Unlike the
    // rest of the 2OPs this one takes up to four operands.
    fn twoop_1_je(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        if operands[1].is_omitted() {
            return Err(ZErr::MissingOperand { pc: self.op_pc });
        }
        let a = self.value(&operands[0])?;
        let mut equal = false;
        for operand in operands[1..].iter().filter(|o| !o.is_omitted()) {
            // Resolve every operand: a Var(Stack) operand pops whether or
            // not an earlier one already matched.
            if self.value(operand)? == a {
                equal = true;
            }
        }
        self.finish_branch(equal)
    }

    fn twoop_2_jl(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.signed(&operands[0])?;
        let b = self.signed(&operands[1])?;
        self.finish_branch(a < b)
    }

    fn twoop_3_jg(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.signed(&operands[0])?;
        let b = self.signed(&operands[1])?;
        self.finish_branch(a > b)
    }

    fn twoop_4_dec_chk(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let var = self.variable(&operands[0])?;
        let limit = self.signed(&operands[1])?;
        let val = (self.variables.read_indirect(var)? as i16).wrapping_sub(1);
        self.variables.write_indirect(var, val as u16)?;
        self.finish_branch(val < limit)
    }

    fn twoop_5_inc_chk(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let var = self.variable(&operands[0])?;
        let limit = self.signed(&operands[1])?;
        let val = (self.variables.read_indirect(var)? as i16).wrapping_add(1);
        self.variables.write_indirect(var, val as u16)?;
        self.finish_branch(val > limit)
    }

    fn twoop_6_jin(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.object(&operands[0])?;
        let b = self.value(&operands[1])?;
        let parent = self.objects.parent(a)?;
        self.finish_branch(parent == b)
    }

    fn twoop_7_test(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let bitmap = self.value(&operands[0])?;
        let flags = self.value(&operands[1])?;
        self.finish_branch(bitmap & flags == flags)
    }

    fn twoop_8_or(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let val = self.value(&operands[0])? | self.value(&operands[1])?;
        self.store_result(val)
    }

    fn twoop_9_and(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let val = self.value(&operands[0])? & self.value(&operands[1])?;
        self.store_result(val)
    }

    fn twoop_10_test_attr(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let attr = self.value(&operands[1])?;
        let set = self.objects.test_attr(obj, attr)?;
        self.finish_branch(set)
    }

    fn twoop_11_set_attr(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let attr = self.value(&operands[1])?;
        self.objects.set_attr(obj, attr)
    }

    fn twoop_12_clear_attr(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let attr = self.value(&operands[1])?;
        self.objects.clear_attr(obj, attr)
    }

    fn twoop_13_store(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let var = self.variable(&operands[0])?;
        let val = self.value(&operands[1])?;
        self.variables.write_indirect(var, val)
    }

    fn twoop_14_insert_obj(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let dest = self.object(&operands[1])?;
        trace!("insert_obj {} into {}", obj, dest);
        self.objects.insert_obj(obj, dest)
    }

    // Array accesses wrap at 64K like every other address computation.
    fn twoop_15_loadw(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let base = self.value(&operands[0])?;
        let index = self.value(&operands[1])?;
        let at = base.wrapping_add(index.wrapping_mul(2));
        let val = self.story_h.borrow().read_word(ByteAddress::from_raw(at))?;
        self.store_result(val)
    }

    fn twoop_16_loadb(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let base = self.value(&operands[0])?;
        let index = self.value(&operands[1])?;
        let at = base.wrapping_add(index);
        let val = self.story_h.borrow().read_byte(ByteAddress::from_raw(at))?;
        self.store_result(u16::from(val))
    }

    fn twoop_17_get_prop(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let prop = self.value(&operands[1])? as u8;
        let val = self.objects.get_prop(obj, prop)?;
        self.store_result(val)
    }

    fn twoop_18_get_prop_addr(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let prop = self.value(&operands[1])? as u8;
        let val = self.objects.get_prop_addr(obj, prop)?;
        self.store_result(val)
    }

    fn twoop_19_get_next_prop(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let prop = self.value(&operands[1])? as u8;
        let val = self.objects.get_next_prop(obj, prop)?;
        self.store_result(val)
    }

    fn twoop_20_add(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.signed(&operands[0])?;
        let b = self.signed(&operands[1])?;
        self.store_result(a.wrapping_add(b) as u16)
    }

    fn twoop_21_sub(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.signed(&operands[0])?;
        let b = self.signed(&operands[1])?;
        self.store_result(a.wrapping_sub(b) as u16)
    }

    fn twoop_22_mul(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.signed(&operands[0])?;
        let b = self.signed(&operands[1])?;
        self.store_result(a.wrapping_mul(b) as u16)
    }

    fn twoop_23_div(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.signed(&operands[0])?;
        let b = self.signed(&operands[1])?;
        if b == 0 {
            return Err(ZErr::DivisionByZero { pc: self.op_pc });
        }
        self.store_result(a.wrapping_div(b) as u16)
    }

    fn twoop_24_mod(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let a = self.signed(&operands[0])?;
        let b = self.signed(&operands[1])?;
        if b == 0 {
            return Err(ZErr::DivisionByZero { pc: self.op_pc });
        }
        self.store_result(a.wrapping_rem(b) as u16)
    }

    //
    // 1OP instructions.
    //

    fn oneop_128_jz(&mut self, operand: ZOperand) -> Result<()> {
        let val = self.value(&operand)?;
        self.finish_branch(val == 0)
    }

    // get_sibling and get_child both store their result and then branch
    // on it being non-zero.
    fn oneop_129_get_sibling(&mut self, operand: ZOperand) -> Result<()> {
        let obj = self.object(&operand)?;
        let sibling = self.objects.sibling(obj)?;
        self.store_result(sibling)?;
        self.finish_branch(sibling != 0)
    }

    fn oneop_130_get_child(&mut self, operand: ZOperand) -> Result<()> {
        let obj = self.object(&operand)?;
        let child = self.objects.child(obj)?;
        self.store_result(child)?;
        self.finish_branch(child != 0)
    }

    fn oneop_131_get_parent(&mut self, operand: ZOperand) -> Result<()> {
        let obj = self.object(&operand)?;
        let parent = self.objects.parent(obj)?;
        self.store_result(parent)
    }

    fn oneop_132_get_prop_len(&mut self, operand: ZOperand) -> Result<()> {
        let addr = self.value(&operand)?;
        let len = self.objects.get_prop_len(addr)?;
        self.store_result(len)
    }

    fn oneop_133_inc(&mut self, operand: ZOperand) -> Result<()> {
        let var = self.variable(&operand)?;
        let val = (self.variables.read_indirect(var)? as i16).wrapping_add(1);
        self.variables.write_indirect(var, val as u16)
    }

    fn oneop_134_dec(&mut self, operand: ZOperand) -> Result<()> {
        let var = self.variable(&operand)?;
        let val = (self.variables.read_indirect(var)? as i16).wrapping_sub(1);
        self.variables.write_indirect(var, val as u16)
    }

    fn oneop_135_print_addr(&mut self, operand: ZOperand) -> Result<()> {
        let addr = ByteAddress::from_raw(self.value(&operand)?);
        let text = zscii::decode_zstr(&self.story_h, self.abbrevs, addr)?;
        self.print_str(&text)
    }

    fn oneop_137_remove_obj(&mut self, operand: ZOperand) -> Result<()> {
        let obj = self.object(&operand)?;
        trace!("remove_obj {}", obj);
        self.objects.remove_obj(obj)
    }

    fn oneop_138_print_obj(&mut self, operand: ZOperand) -> Result<()> {
        let obj = self.object(&operand)?;
        let name = self.objects.name(obj)?;
        self.print_str(&name)
    }

    fn oneop_139_ret(&mut self, operand: ZOperand) -> Result<()> {
        let val = self.value(&operand)?;
        self.do_return(val)
    }

    fn oneop_140_jump(&mut self, operand: ZOperand) -> Result<()> {
        let offset = self.signed(&operand)?;
        self.pc.offset_pc(isize::from(offset) - 2);
        Ok(())
    }

    fn oneop_141_print_paddr(&mut self, operand: ZOperand) -> Result<()> {
        let addr = PackedAddress::new(self.value(&operand)?, self.version);
        let text = zscii::decode_zstr(&self.story_h, self.abbrevs, addr)?;
        self.print_str(&text)
    }

    fn oneop_142_load(&mut self, operand: ZOperand) -> Result<()> {
        let var = self.variable(&operand)?;
        let val = self.variables.read_indirect(var)?;
        self.store_result(val)
    }

    fn oneop_143_not(&mut self, operand: ZOperand) -> Result<()> {
        let val = self.value(&operand)?;
        self.store_result(!val)
    }

    //
    // 0OP instructions.
    //

    fn zeroop_176_rtrue(&mut self) -> Result<()> {
        self.do_return(1)
    }

    fn zeroop_177_rfalse(&mut self) -> Result<()> {
        self.do_return(0)
    }

    // The string literal sits inline after the opcode; decoding leaves
    // the pc on the instruction after it.
    fn zeroop_178_print(&mut self) -> Result<()> {
        let text = zscii::decode_zstr_from_pc(&self.story_h, self.abbrevs, &mut self.pc)?;
        self.print_str(&text)
    }

    fn zeroop_179_print_ret(&mut self) -> Result<()> {
        let text = zscii::decode_zstr_from_pc(&self.story_h, self.abbrevs, &mut self.pc)?;
        self.print_str(&text)?;
        self.print_str("\n")?;
        self.do_return(1)
    }

    // The snapshot is taken after the branch resolves as "saved", so
    // applying it later resumes exactly as a successful save would have.
    fn zeroop_181_save(&mut self) -> Result<()> {
        debug!("save at {:#06x}", self.op_pc);
        self.finish_branch(true)?;
        self.saved = Some(self.save_state()?);
        Ok(())
    }

    fn zeroop_182_restore(&mut self) -> Result<()> {
        debug!("restore at {:#06x}", self.op_pc);
        match self.saved.take() {
            None => self.finish_branch(false),
            Some(snapshot) => {
                self.restore_state(&snapshot)?;
                self.saved = Some(snapshot);
                Ok(())
            }
        }
    }

    fn zeroop_183_restart(&mut self) -> Result<()> {
        debug!("restart");
        self.story_h.borrow_mut().reset_dynamic();
        self.stack_h.borrow_mut().clear();
        self.stream_tables.clear();
        self.screen_output = true;
        let start = self.header.start_pc()?;
        self.pc.set_pc(ZOffset::from(start).value());
        Ok(())
    }

    fn zeroop_184_ret_popped(&mut self) -> Result<()> {
        let val = self.variables.read_variable(ZVariable::Stack)?;
        self.do_return(val)
    }

    fn zeroop_185_pop(&mut self) -> Result<()> {
        self.variables.read_variable(ZVariable::Stack)?;
        Ok(())
    }

    fn zeroop_186_quit(&mut self) -> Result<()> {
        debug!("quit at {:#06x}", self.op_pc);
        self.state = ZState::Halted;
        Ok(())
    }

    fn zeroop_187_new_line(&mut self) -> Result<()> {
        self.print_str("\n")
    }

    // No status display in this host.
    fn zeroop_188_show_status(&mut self) -> Result<()> {
        debug!("show_status ignored");
        Ok(())
    }

    fn zeroop_189_verify(&mut self) -> Result<()> {
        let file_length = self.header.file_length()?;
        let computed = self.story_h.borrow().image_checksum(file_length);
        let declared = self.header.checksum()?;
        debug!("verify: computed {:#06x}, declared {:#06x}", computed, declared);
        self.finish_branch(computed == declared)
    }

    //
    // VAR instructions.
    //

    fn var_224_call(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let routine = self.value(&operands[0])?;
        let mut args = Vec::with_capacity(3);
        for operand in operands[1..].iter().filter(|o| !o.is_omitted()) {
            args.push(self.value(operand)?);
        }

        let store = ZVariable::from(self.pc.next_byte()?);
        let packed = PackedAddress::new(routine, self.version);
        if packed.is_null() {
            // A call to address 0 does nothing and yields false.
            return self.variables.write_variable(store, 0);
        }

        let routine_offset = ZOffset::from(packed);
        let mut locals = {
            let mem = self.story_h.borrow();
            let count = mem.read_byte(routine_offset)?;
            if count > MAX_LOCALS {
                return Err(ZErr::TooManyLocals {
                    addr: routine_offset.value(),
                    count,
                });
            }
            // Locals start out holding their declared defaults.
            let mut locals = vec![0u16; usize::from(count)];
            for (i, local) in locals.iter_mut().enumerate() {
                *local = mem.read_word(routine_offset.inc_by(1 + 2 * i))?;
            }
            locals
        };
        // Arguments overlay the leading locals; extras are dropped.
        for (local, arg) in locals.iter_mut().zip(args.iter()) {
            *local = *arg;
        }

        trace!(
            "call {:#06x} with {} args -> {}",
            routine_offset.value(),
            args.len(),
            store
        );
        let return_pc = self.pc.current_pc();
        self.stack_h
            .borrow_mut()
            .push_frame(return_pc, Some(store), &locals)?;
        self.pc
            .set_pc(routine_offset.inc_by(1 + 2 * locals.len()).value());
        Ok(())
    }

    fn var_225_storew(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let base = self.value(&operands[0])?;
        let index = self.value(&operands[1])?;
        let val = self.value(&operands[2])?;
        let at = base.wrapping_add(index.wrapping_mul(2));
        self.story_h
            .borrow_mut()
            .write_word(ByteAddress::from_raw(at), val)
    }

    fn var_226_storeb(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let base = self.value(&operands[0])?;
        let index = self.value(&operands[1])?;
        let val = self.value(&operands[2])?;
        let at = base.wrapping_add(index);
        self.story_h
            .borrow_mut()
            .write_byte(ByteAddress::from_raw(at), (val & 0xff) as u8)
    }

    fn var_227_put_prop(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let obj = self.object(&operands[0])?;
        let prop = self.value(&operands[1])? as u8;
        let val = self.value(&operands[2])?;
        self.objects.put_prop(obj, prop, val)
    }

    // Read one line of input into the text buffer and run lexical
    // analysis into the parse buffer. This is the machine's only
    // suspension point: everything before the read is finished, and
    // execution resumes at the next instruction once a line arrives.
    fn var_228_sread(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let text_addr = ByteAddress::from_raw(self.value(&operands[0])?);
        let parse_addr = ByteAddress::from_raw(self.value(&operands[1])?);

        let raw_line = self.input.read_line()?;
        let line: String = raw_line
            .trim_end_matches(|c| c == '\r' || c == '\n')
            .chars()
            .flat_map(char::to_lowercase)
            .filter(|c| c.is_ascii() && (' '..='~').contains(c))
            .collect();
        trace!("sread: {:?}", line);

        // Text buffer: byte 0 is capacity; the line lands at byte 1,
        // zero-terminated.
        let capacity = usize::from(self.story_h.borrow().read_byte(text_addr)?);
        let keep = line.len().min(capacity.saturating_sub(1));
        {
            let mut mem = self.story_h.borrow_mut();
            for (i, byte) in line.as_bytes()[..keep].iter().enumerate() {
                mem.write_byte(text_addr.inc_by(1 + i), *byte)?;
            }
            mem.write_byte(text_addr.inc_by(1 + keep), 0)?;
        }

        // Parse buffer: byte 0 is capacity in tokens, byte 1 the count,
        // then one 4-byte record per token.
        let tokens = self.dictionary.tokenize(&line[..keep]);
        let max_tokens = usize::from(self.story_h.borrow().read_byte(parse_addr)?);
        let count = tokens.len().min(max_tokens);
        self.story_h
            .borrow_mut()
            .write_byte(parse_addr.inc_by(1), count as u8)?;

        for (i, token) in tokens.iter().take(count).enumerate() {
            let key = zscii::encode_word(&token.text);
            let addr = self.dictionary.lookup(&key)?.map_or(0, ByteAddress::value);
            let record = parse_addr.inc_by(2 + 4 * i);
            let mut mem = self.story_h.borrow_mut();
            mem.write_word(record, addr)?;
            mem.write_byte(record.inc_by(2), token.text.len() as u8)?;
            mem.write_byte(record.inc_by(3), (token.start + 1) as u8)?;
        }
        Ok(())
    }

    fn var_229_print_char(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let code = self.value(&operands[0])?;
        if let Some(ch) = zscii::zscii_char(code) {
            let mut buf = [0u8; 4];
            let text: &str = ch.encode_utf8(&mut buf);
            self.print_str(text)?;
        } else {
            debug!("print_char: unprintable code {}", code);
        }
        Ok(())
    }

    fn var_230_print_num(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let val = self.signed(&operands[0])?;
        self.print_str(&val.to_string())
    }

    // random n: uniform in [1, n] for positive n. Negative n reseeds
    // deterministically, zero reseeds from entropy; both yield 0.
    fn var_231_random(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let n = self.signed(&operands[0])?;
        let val = match n {
            n if n > 0 => self.random.range(n as u16),
            0 => {
                self.random.reseed_entropy();
                0
            }
            n => {
                self.random.reseed(-i32::from(n) as u64);
                0
            }
        };
        self.store_result(val)
    }

    fn var_232_push(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let val = self.value(&operands[0])?;
        self.variables.write_variable(ZVariable::Stack, val)
    }

    fn var_233_pull(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let var = self.variable(&operands[0])?;
        let val = self.variables.read_variable(ZVariable::Stack)?;
        self.variables.write_indirect(var, val)
    }

    // There is no window model here; the screen opcodes are accepted so
    // stories that issue them keep running.
    fn var_234_split_window(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let lines = self.value(&operands[0])?;
        debug!("split_window {} ignored", lines);
        Ok(())
    }

    fn var_235_set_window(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let window = self.value(&operands[0])?;
        debug!("set_window {} ignored", window);
        Ok(())
    }

    fn var_243_output_stream(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let stream = self.signed(&operands[0])?;
        match stream {
            0 => Ok(()),
            1 => {
                self.screen_output = true;
                Ok(())
            }
            -1 => {
                self.screen_output = false;
                Ok(())
            }
            // The transcript is the driver's concern; the game toggles
            // the Flags 2 bit itself.
            2 | -2 => {
                debug!("output_stream {} ignored", stream);
                Ok(())
            }
            3 => {
                if self.stream_tables.len() >= MAX_STREAM_NESTING {
                    return Err(ZErr::StreamNestingTooDeep);
                }
                let table = usize::from(self.value(&operands[1])?);
                self.story_h
                    .borrow_mut()
                    .write_word(ZOffset::from(table), 0)?;
                self.stream_tables.push(table);
                Ok(())
            }
            -3 => {
                if self.stream_tables.pop().is_none() {
                    debug!("output_stream -3 with no active table");
                }
                Ok(())
            }
            _ => {
                debug!("output_stream {} ignored", stream);
                Ok(())
            }
        }
    }

    fn var_244_input_stream(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let stream = self.value(&operands[0])?;
        debug!("input_stream {} ignored", stream);
        Ok(())
    }

    // Sound is not produced, but the opcode must still consume its
    // operands and carry on.
    fn var_245_sound_effect(&mut self, operands: [ZOperand; 4]) -> Result<()> {
        let effect = if operands[0].is_omitted() {
            1
        } else {
            self.value(&operands[0])?
        };
        debug!("sound_effect {} ignored", effect);
        Ok(())
    }
}
