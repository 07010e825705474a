use crate::config::ThreadSlicing;
use crate::environment::Environment;
use crate::fault::{FaultLocation, FaultSeverity};
use crate::hardware::Hardware;
use crate::head::Head;
use crate::inst::{Instruction, NUM_NOPS, Opcode};
use crate::label::{MAX_LABEL_SIZE, MAX_SPACE_LABEL_SIZE};
use crate::memory::SiteFlags;
use crate::mutation::{MutationTrigger, roll};
use crate::stack::{NUM_STACKS, STACK_AX, STACK_BX};
use crate::thread::{HEAD_FLOW, HEAD_IP, HEAD_READ, HEAD_WRITE};

/// Arithmetic shift: non-negative amounts shift right, negative ones left.
/// Amounts of 32 or more in either direction clear the value.
fn shifted(value: i32, shift: i32) -> i32 {
    if (0..32).contains(&shift) {
        value >> shift
    } else if (-31..0).contains(&shift) {
        value << -shift
    } else {
        0
    }
}

impl Hardware {
    /// Run one scheduling tick.
    ///
    /// Under `ThreadSlicing::One` a single instruction of the current thread
    /// runs; under `All` every live thread gets one. Thread selection rotates
    /// after each instruction, never during one.
    pub fn single_process<E: Environment + ?Sized>(&mut self, env: &mut E) {
        self.stats.cycles += 1;
        let slices = match self.config.thread_slicing {
            ThreadSlicing::One => 1,
            ThreadSlicing::All => self.threads.len(),
        };
        for _ in 0..slices {
            self.process_thread(env);
            self.next_thread();
        }
    }

    fn process_thread<E: Environment + ?Sized>(&mut self, env: &mut E) {
        self.thread_mut().advance_ip = true;
        let mut ip = self.ip();
        ip.adjust(&self.spaces);
        self.set_head(HEAD_IP, ip);

        let inst = ip.inst(&self.spaces);
        if !self.pay_costs(inst) {
            return;
        }
        ip.set_flag(&mut self.spaces, SiteFlags::EXECUTED);

        // A failed instruction has no further effect; the IP stays put and it
        // is retried next cycle.
        if roll(env.rng(), self.inst_set.entry(inst).prob_fail) {
            self.stats.failed += 1;
            let name = self.inst_set.opcode(inst).name();
            self.fault(
                env,
                FaultLocation::Instruction,
                FaultSeverity::Warning,
                format!("{name} failed to execute"),
            );
            return;
        }
        self.stats.executed += 1;
        self.execute(env, inst);

        self.trigger_mutations(MutationTrigger::Execute, env.rng());
        if self.thread().advance_ip {
            self.advance_head(HEAD_IP);
        }
    }

    /// Charge the instruction's costs. Returns `false` while a cost is still
    /// being paid off; the instruction stays under the IP and is retried.
    fn pay_costs(&mut self, inst: Instruction) -> bool {
        let op = inst.op() as usize % self.inst_cost.len();
        if self.ft_cost[op] > 0 {
            self.ft_cost[op] -= 1;
            return false;
        }
        let cost = self.inst_set.entry(inst).cost;
        if cost > 1 {
            if self.inst_cost[op] > 1 {
                self.inst_cost[op] -= 1;
                return false;
            }
            self.inst_cost[op] = cost;
        }
        true
    }

    fn execute<E: Environment + ?Sized>(&mut self, env: &mut E, inst: Instruction) {
        match self.inst_set.opcode(inst) {
            Opcode::NopA | Opcode::NopB | Opcode::NopC | Opcode::NopD | Opcode::NopX => {}
            Opcode::ValShiftR => self.val_shift(false),
            Opcode::ValShiftL => self.val_shift(true),
            Opcode::ValNand => self.val_binary(|a, b| !(a & b)),
            Opcode::ValAdd => self.val_binary(i32::wrapping_add),
            Opcode::ValSub => self.val_binary(i32::wrapping_sub),
            Opcode::ValMult => self.val_binary(i32::wrapping_mul),
            Opcode::ValDiv => self.val_div(env),
            Opcode::ValMod => self.val_mod(env),
            Opcode::ValNegate => {
                let dst = self.find_modified_stack(STACK_BX);
                let src = self.find_modified_stack(STACK_BX);
                let value = self.top(src).wrapping_neg();
                self.push(dst, value);
            }
            Opcode::ValInc => self.val_unary(|v| v.wrapping_add(1)),
            Opcode::ValDec => self.val_unary(|v| v.wrapping_sub(1)),
            Opcode::ValCopy => self.val_unary(|v| v),
            Opcode::ValDelete => {
                let stack = self.find_modified_stack(STACK_BX);
                self.pop(stack);
            }
            Opcode::StackDelete => {
                let stack = self.find_modified_stack(STACK_BX);
                self.stack_mut(stack).clear();
            }
            Opcode::PushNext => {
                let src = self.find_modified_stack(STACK_AX);
                let dst = self.find_modified_next_stack(src);
                let value = self.pop(src);
                self.push(dst, value);
            }
            Opcode::PushPrev => {
                let src = self.find_modified_stack(STACK_BX);
                let dst = self.find_modified_prev_stack(src);
                let value = self.pop(src);
                self.push(dst, value);
            }
            Opcode::PushComp => {
                let src = self.find_modified_stack(STACK_BX);
                let dst = self.find_complement_stack(src);
                let value = self.pop(src);
                self.push(dst, value);
            }
            Opcode::MemSet => self.mem_set(),
            Opcode::MemAlloc => {
                let src = self.find_modified_stack(STACK_BX);
                let size = self.top(src);
                if let Some(len) = self.allocate(env, size) {
                    self.push(STACK_AX, len as i32);
                }
            }
            Opcode::Divide => {
                self.divide(env);
            }
            Opcode::Inject => {
                self.inject(env);
            }
            Opcode::InstRead => self.inst_read(env),
            Opcode::InstWrite => self.inst_write(env),
            Opcode::InstCopy => {
                let rate = self.config.mutation.copy_mut_prob;
                self.inst_copy(env, rate);
            }
            Opcode::InstCopyEc => {
                let rate = self.config.mutation.copy_mut_prob / self.config.copy_error_reduction;
                self.inst_copy(env, rate);
            }
            Opcode::IfEqual => self.if_compare(|a, b| a == b),
            Opcode::IfNotEqual => self.if_compare(|a, b| a != b),
            Opcode::IfLess => self.if_compare(|a, b| a < b),
            Opcode::IfGreater => self.if_compare(|a, b| a > b),
            Opcode::IfLabel => {
                self.read_complement_label();
                if self.label() != &self.thread().read_label {
                    self.advance_head(HEAD_IP);
                }
            }
            Opcode::HeadPush => {
                let head_id = self.find_modified_head(HEAD_IP);
                let dst = self.find_modified_stack(STACK_BX);
                let location = self.head(head_id).full_location();
                self.push(dst, location);
            }
            Opcode::HeadPop => {
                let head_id = self.find_modified_head(HEAD_IP);
                let src = self.find_modified_stack(STACK_BX);
                let location = self.pop(src);
                let mut head = self.head(head_id);
                head.set_full_location(location, &self.spaces);
                self.set_head(head_id, head);
            }
            Opcode::HeadMove => self.head_move(),
            Opcode::Search => self.search(env),
            Opcode::SearchF => self.search_direct(env, 1),
            Opcode::SearchB => self.search_direct(env, -1),
            Opcode::Io => {
                let dst = self.find_modified_stack(STACK_BX);
                let src = self.find_modified_stack(dst);
                env.do_output(self.top(src));
                let input = env.get_input();
                self.push(dst, input);
            }
            Opcode::SendMsg => {
                let src = self.find_modified_stack(STACK_BX);
                if !env.send_message(self.top(src)) {
                    self.fault(
                        env,
                        FaultLocation::Default,
                        FaultSeverity::Warning,
                        "message was not delivered",
                    );
                }
            }
            Opcode::Sense => self.sense(env),
            Opcode::ThreadFork => {
                // The child starts after the fork; the parent skips that instruction.
                self.advance_head(HEAD_IP);
                if !self.fork_thread() {
                    self.fault(
                        env,
                        FaultLocation::ThreadFork,
                        FaultSeverity::Warning,
                        "thread limit reached",
                    );
                }
            }
            Opcode::ThreadKill => {
                if self.kill_thread() {
                    self.thread_mut().advance_ip = false;
                } else {
                    self.fault(
                        env,
                        FaultLocation::ThreadKill,
                        FaultSeverity::Warning,
                        "cannot kill the last thread",
                    );
                }
            }
        }
    }

    // --------  Operand selection  --------

    /// A following nop names the stack; otherwise `default`.
    pub(crate) fn find_modified_stack(&mut self, default: usize) -> usize {
        self.consume_nop().unwrap_or(default)
    }

    fn find_modified_next_stack(&mut self, default: usize) -> usize {
        self.consume_nop().unwrap_or((default + 1) % NUM_STACKS)
    }

    fn find_modified_prev_stack(&mut self, default: usize) -> usize {
        self.consume_nop()
            .unwrap_or((default + NUM_STACKS - 1) % NUM_STACKS)
    }

    fn find_complement_stack(&mut self, default: usize) -> usize {
        self.consume_nop().unwrap_or((default + 2) % NUM_STACKS)
    }

    pub(crate) fn find_modified_head(&mut self, default: usize) -> usize {
        self.consume_nop().unwrap_or(default)
    }

    // --------  Value instructions  --------

    fn val_shift(&mut self, left: bool) {
        let dst = self.find_modified_stack(STACK_BX);
        let src = self.find_modified_stack(dst);
        let amount = self.find_modified_next_stack(src);
        let shift = self.top(amount);
        let shift = if left { shift.wrapping_neg() } else { shift };
        let value = shifted(self.top(src), shift);
        self.push(dst, value);
    }

    fn val_binary(&mut self, op: fn(i32, i32) -> i32) {
        let dst = self.find_modified_stack(STACK_BX);
        let op1 = self.find_modified_stack(STACK_BX);
        let op2 = self.find_modified_next_stack(op1);
        let value = op(self.top(op1), self.top(op2));
        self.push(dst, value);
    }

    fn val_unary(&mut self, op: fn(i32) -> i32) {
        let dst = self.find_modified_stack(STACK_BX);
        let src = self.find_modified_stack(dst);
        let value = op(self.top(src));
        self.push(dst, value);
    }

    fn val_div<E: Environment + ?Sized>(&mut self, env: &mut E) {
        let dst = self.find_modified_stack(STACK_BX);
        let op1 = self.find_modified_stack(STACK_BX);
        let op2 = self.find_modified_next_stack(op1);
        let (a, b) = (self.top(op1), self.top(op2));
        if b == 0 {
            self.fault(env, FaultLocation::Math, FaultSeverity::Error, "div: dividing by 0");
            return;
        }
        if a == i32::MIN && b == -1 {
            self.fault(env, FaultLocation::Math, FaultSeverity::Error, "div: overflow");
            return;
        }
        self.push(dst, a / b);
    }

    fn val_mod<E: Environment + ?Sized>(&mut self, env: &mut E) {
        let dst = self.find_modified_stack(STACK_BX);
        let op1 = self.find_modified_stack(STACK_BX);
        let op2 = self.find_modified_next_stack(op1);
        let (a, b) = (self.top(op1), self.top(op2));
        if b == 0 {
            self.fault(env, FaultLocation::Math, FaultSeverity::Error, "mod: modding by 0");
            return;
        }
        self.push(dst, a.wrapping_rem(b));
    }

    fn if_compare(&mut self, test: fn(i32, i32) -> bool) {
        let op1 = self.find_modified_stack(STACK_AX);
        let op2 = self.find_modified_next_stack(op1);
        if !test(self.top(op1), self.top(op2)) {
            self.advance_head(HEAD_IP);
        }
    }

    // --------  Memory and copy instructions  --------

    fn mem_set(&mut self) {
        self.read_label(MAX_SPACE_LABEL_SIZE);
        let label = self.label().clone();
        let space = self.find_space_label(&label);
        let mut flow = self.head(HEAD_FLOW);
        flow.bind(self.id);
        flow.set_in_space(0, space, &self.spaces);
        self.set_head(HEAD_FLOW, flow);
    }

    /// Make room for a write at `head`: a head on the last site grows its
    /// space by one, repeating the last instruction.
    fn grow_for_write(&mut self, head: &Head) {
        let memory = head.memory(&self.spaces);
        let len = memory.len();
        if len == 0 || len >= self.config.max_genome_size || head.pos() + 1 < len {
            return;
        }
        let last = memory.get(len - 1);
        let mut end = *head;
        end.abs_set(len as i32);
        end.insert_inst(&mut self.spaces, last);
    }

    fn write_inst(&mut self, head: &Head, inst: Instruction, flags: SiteFlags) {
        if head.set_inst(&mut self.spaces, inst) {
            head.set_flag(&mut self.spaces, flags);
        }
    }

    fn inst_read<E: Environment + ?Sized>(&mut self, env: &mut E) {
        let head_id = self.find_modified_head(HEAD_READ);
        let dst = self.find_modified_stack(STACK_AX);
        let mut head = self.head(head_id);
        head.adjust(&self.spaces);

        let mut inst = head.inst(&self.spaces);
        if roll(env.rng(), self.config.mutation.copy_mut_prob) {
            inst = self.inst_set.random_inst(env.rng());
            self.stats.mutations.copy += 1;
        }
        self.push(dst, inst.op() as i32);
        self.read_inst(inst);

        head.advance(&self.spaces);
        self.set_head(head_id, head);
    }

    fn inst_write<E: Environment + ?Sized>(&mut self, env: &mut E) {
        let head_id = self.find_modified_head(HEAD_WRITE);
        let src = self.find_modified_stack(STACK_AX);
        let mut head = self.head(head_id);
        head.adjust(&self.spaces);
        self.grow_for_write(&head);

        let value = self.pop(src);
        let inst = if value >= 0 && (value as usize) < self.inst_set.len() {
            Instruction::new(value as u8)
        } else {
            self.fault(
                env,
                FaultLocation::Copy,
                FaultSeverity::Warning,
                format!("value {value} is not an instruction"),
            );
            self.inst_set.default_inst()
        };
        self.write_inst(&head, inst, SiteFlags::COPIED);

        head.advance(&self.spaces);
        self.set_head(head_id, head);
    }

    /// Copy one instruction from the read head to the write head, subject to
    /// copy mutation at `rate` and the copy insertion and deletion rates.
    fn inst_copy<E: Environment + ?Sized>(&mut self, env: &mut E, rate: f64) {
        let mut read = self.head(HEAD_READ);
        let mut write = self.head(HEAD_WRITE);
        read.adjust(&self.spaces);
        write.adjust(&self.spaces);

        let template = read.inst(&self.spaces);
        self.read_inst(template);
        read.advance(&self.spaces);
        self.set_head(HEAD_READ, read);

        let mut inst = template;
        let mut flags = SiteFlags::COPIED;
        if roll(env.rng(), rate) {
            inst = self.inst_set.random_inst(env.rng());
            flags = flags | SiteFlags::MUTATED | SiteFlags::COPY_MUT;
            self.stats.mutations.copy += 1;
        }

        if roll(env.rng(), self.config.mutation.copy_ins_prob) {
            self.grow_for_write(&write);
            let extra = self.inst_set.random_inst(env.rng());
            if write.insert_inst(&mut self.spaces, extra) {
                write.set_flag(
                    &mut self.spaces,
                    SiteFlags::COPIED | SiteFlags::MUTATED | SiteFlags::COPY_MUT,
                );
                self.stats.mutations.copy_ins += 1;
                self.set_head(HEAD_WRITE, write);
                self.adjust_heads();
                write = self.head(HEAD_WRITE);
                write.advance(&self.spaces);
            }
        }

        self.grow_for_write(&write);
        self.write_inst(&write, inst, flags);

        let len = write.memory(&self.spaces).len();
        if len > 1
            && roll(env.rng(), self.config.mutation.copy_del_prob)
            && write.remove_inst(&mut self.spaces)
        {
            self.stats.mutations.copy_del += 1;
            self.set_head(HEAD_WRITE, write);
            self.adjust_heads();
            return;
        }
        write.advance(&self.spaces);
        self.set_head(HEAD_WRITE, write);
    }

    // --------  Flow control  --------

    fn head_move(&mut self) {
        let head_id = self.find_modified_head(HEAD_IP);
        if head_id == HEAD_FLOW {
            self.advance_head(HEAD_FLOW);
            return;
        }
        let flow = self.head(HEAD_FLOW);
        let mut head = self.head(head_id);
        head.set_to(&flow, &self.spaces);
        self.set_head(head_id, head);
        if head_id == HEAD_IP {
            self.thread_mut().advance_ip = false;
        }
    }

    /// Read the label after the IP and turn it into its complement, the
    /// template `Search` and `If-Label` look for.
    fn read_complement_label(&mut self) -> i32 {
        self.read_label(MAX_LABEL_SIZE);
        self.label_mut().rotate(2, NUM_NOPS);
        self.label().len() as i32
    }

    /// Search the IP's space from the start for the complement label. On a
    /// hit the flow head lands on it, BX gets the distance past the label and
    /// AX the label length; on a miss the flow head lands after the IP.
    fn search<E: Environment + ?Sized>(&mut self, env: &mut E) {
        let label_len = self.read_complement_label();
        let found = self.find_label(0);
        let ip = self.ip();
        let mut flow = self.head(HEAD_FLOW);
        if found.position() == ip.position() {
            flow.set_to(&ip, &self.spaces);
            flow.set(ip.position() + 1, &self.spaces);
            self.set_head(HEAD_FLOW, flow);
            self.push(STACK_BX, 0);
            if label_len > 0 {
                let message = format!("search: label {} not found", self.label());
                self.fault(env, FaultLocation::Jump, FaultSeverity::Warning, message);
            }
            return;
        }
        self.push(STACK_BX, found.position() - ip.position() + label_len + 1);
        self.push(STACK_AX, label_len);
        flow.set_to(&found, &self.spaces);
        self.set_head(HEAD_FLOW, flow);
    }

    /// Like `Search`, but scanning away from the IP in `direction`. BX gets
    /// the signed distance from the IP.
    fn search_direct<E: Environment + ?Sized>(&mut self, env: &mut E, direction: i32) {
        let label_len = self.read_complement_label();
        let found = self.find_label(direction);
        let ip = self.ip();
        if found == ip && label_len > 0 {
            let message = format!("search: label {} not found", self.label());
            self.fault(env, FaultLocation::Jump, FaultSeverity::Warning, message);
        }
        self.push(STACK_BX, found.position() - ip.position());
        self.push(STACK_AX, label_len);
        let mut flow = self.head(HEAD_FLOW);
        flow.set_to(&found, &self.spaces);
        self.set_head(HEAD_FLOW, flow);
    }

    /// Push the level of the resource named by the following label.
    fn sense<E: Environment + ?Sized>(&mut self, env: &mut E) {
        self.read_label(MAX_LABEL_SIZE);
        let index = self.label().as_int(NUM_NOPS) as usize;
        match env.resources().get(index).copied() {
            Some(level) => self.push(STACK_BX, level as i32),
            None => {
                self.push(STACK_BX, 0);
                self.fault(
                    env,
                    FaultLocation::Default,
                    FaultSeverity::Warning,
                    format!("sense: no resource {index}"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::environment::BasicEnvironment;
    use crate::hardware::tests::{config, hardware, hardware_with};
    use crate::inst::{InstEntry, InstSet};
    use crate::label::CodeLabel;
    use crate::memory::HardwareId;
    use crate::population::ANCESTOR;
    use crate::stack::{STACK_CX, STACK_DX};

    fn step(hw: &mut Hardware, env: &mut BasicEnvironment, cycles: usize) {
        for _ in 0..cycles {
            hw.single_process(env);
        }
    }

    fn filler(names: &[Opcode]) -> Vec<Opcode> {
        let mut genome = names.to_vec();
        genome.resize(12, Opcode::NopX);
        genome
    }

    #[test]
    fn test_add_uses_default_operands() {
        let mut hw = hardware(&filler(&[Opcode::ValAdd]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_BX, 2);
        hw.push(STACK_CX, 5);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), 7);
        assert_eq!(hw.ip().position(), 1);
        assert_eq!(hw.stats().executed, 1);
    }

    #[test]
    fn test_nops_modify_operands() {
        let mut hw = hardware(&filler(&[
            Opcode::ValAdd,
            Opcode::NopA,
            Opcode::NopC,
            Opcode::NopD,
        ]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_CX, 4);
        hw.push(STACK_DX, 6);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_AX), 10);
        assert_eq!(hw.ip().position(), 4);
        assert!(hw.memory(0).flags(1).contains(SiteFlags::EXECUTED));
    }

    #[test]
    fn test_div_by_zero_faults() {
        let mut hw = hardware(&filler(&[Opcode::ValDiv]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_BX, 9);
        hw.single_process(&mut env);
        assert_eq!(env.faults.len(), 1);
        assert_eq!(env.faults[0].location, FaultLocation::Math);
        assert_eq!(env.faults[0].message, "div: dividing by 0");
        assert_eq!(hw.top(STACK_BX), 9);
        assert_eq!(hw.ip().position(), 1);
    }

    #[test]
    fn test_div_overflow_faults() {
        let mut hw = hardware(&filler(&[Opcode::ValDiv]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_BX, i32::MIN);
        hw.push(STACK_CX, -1);
        hw.single_process(&mut env);
        assert_eq!(env.faults[0].message, "div: overflow");
    }

    #[test]
    fn test_div_and_mod() {
        let mut hw = hardware(&filler(&[Opcode::ValDiv, Opcode::ValMod]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_BX, -17);
        hw.push(STACK_CX, 5);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), -3);
        hw.stack_mut(STACK_BX).clear();
        hw.push(STACK_BX, -17);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), -2);

        let mut hw = hardware(&filler(&[Opcode::ValMod]));
        hw.push(STACK_BX, 3);
        hw.single_process(&mut env);
        assert_eq!(env.faults.last().unwrap().message, "mod: modding by 0");
    }

    #[test]
    fn test_shift() {
        assert_eq!(shifted(64, 3), 8);
        assert_eq!(shifted(64, -3), 512);
        assert_eq!(shifted(-64, 2), -16);
        assert_eq!(shifted(64, 32), 0);
        assert_eq!(shifted(64, -32), 0);

        let mut hw = hardware(&filler(&[Opcode::ValShiftL]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_BX, 3);
        hw.push(STACK_CX, 2);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), 12);
    }

    #[test]
    fn test_negate_and_inc() {
        let mut hw = hardware(&filler(&[Opcode::ValNegate, Opcode::ValInc, Opcode::ValDec]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_BX, 5);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), -5);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), -4);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), -5);
        assert_eq!(hw.stack(STACK_BX).get(1), -4);
    }

    #[test]
    fn test_push_next_moves_value() {
        let mut hw = hardware(&filler(&[Opcode::PushNext, Opcode::PushComp]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_AX, 9);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_AX), 0);
        assert_eq!(hw.top(STACK_BX), 9);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), 0);
        assert_eq!(hw.top(STACK_DX), 9);
    }

    #[test]
    fn test_val_delete_and_stack_delete() {
        let mut hw = hardware(&filler(&[Opcode::ValDelete, Opcode::StackDelete]));
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_BX, 1);
        hw.push(STACK_BX, 2);
        hw.push(STACK_BX, 3);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), 2);
        hw.single_process(&mut env);
        assert_eq!(hw.stack(STACK_BX), &crate::stack::CpuStack::new());
    }

    #[test]
    fn test_if_skips_on_false() {
        let genome = filler(&[Opcode::IfEqual, Opcode::ValInc]);
        let mut hw = hardware(&genome);
        let mut env = BasicEnvironment::new(1);
        hw.push(STACK_AX, 1);
        hw.push(STACK_BX, 2);
        hw.single_process(&mut env);
        assert_eq!(hw.ip().position(), 2);

        let mut hw = hardware(&genome);
        hw.push(STACK_AX, 2);
        hw.push(STACK_BX, 2);
        hw.single_process(&mut env);
        assert_eq!(hw.ip().position(), 1);
    }

    #[test]
    fn test_head_move_jumps_ip_to_flow() {
        let mut hw = hardware(&filler(&[Opcode::HeadMove]));
        let mut env = BasicEnvironment::new(1);
        let mut flow = hw.head(HEAD_FLOW);
        flow.set(7, hw.spaces());
        hw.set_head(HEAD_FLOW, flow);
        hw.single_process(&mut env);
        assert_eq!(hw.ip().position(), 7);
    }

    #[test]
    fn test_head_move_wraps_stale_flow() {
        let mut hw = hardware(&filler(&[Opcode::HeadMove]));
        let mut env = BasicEnvironment::new(1);
        let mut flow = hw.head(HEAD_FLOW);
        flow.abs_set(13);
        hw.set_head(HEAD_FLOW, flow);
        hw.single_process(&mut env);
        assert_eq!(hw.ip().position(), 1);
    }

    #[test]
    fn test_head_move_flow_advances_flow() {
        let mut hw = hardware(&filler(&[Opcode::HeadMove, Opcode::NopD]));
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.head(HEAD_FLOW).position(), 1);
        assert_eq!(hw.ip().position(), 2);
    }

    #[test]
    fn test_head_push_pop_round_trip() {
        let mut hw = hardware(&filler(&[
            Opcode::HeadPush,
            Opcode::NopC,
            Opcode::HeadPop,
            Opcode::NopD,
        ]));
        let mut env = BasicEnvironment::new(1);
        let mut write = hw.head(HEAD_WRITE);
        write.set(9, hw.spaces());
        hw.set_head(HEAD_WRITE, write);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), 9);
        hw.single_process(&mut env);
        assert_eq!(hw.head(HEAD_FLOW).position(), 9);
        assert_eq!(hw.top(STACK_BX), 0);
    }

    #[test]
    fn test_io_outputs_and_reads() {
        let mut hw = hardware(&filler(&[Opcode::Io]));
        let mut env = BasicEnvironment::new(5);
        hw.push(STACK_BX, 77);
        hw.single_process(&mut env);
        assert_eq!(env.outputs, vec![77]);
        assert_eq!(hw.top(STACK_BX), env.inputs[0]);
    }

    #[test]
    fn test_send_msg_and_sense() {
        let mut hw = hardware(&filler(&[Opcode::SendMsg, Opcode::Sense, Opcode::NopB]));
        let mut env = BasicEnvironment::new(5);
        env.resources = vec![1.0, 42.5];
        hw.push(STACK_BX, 3);
        hw.single_process(&mut env);
        assert_eq!(env.messages, vec![3]);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), 42);
        assert!(env.faults.is_empty());
    }

    #[test]
    fn test_thread_fork_and_kill() {
        let mut cfg = config();
        cfg.max_threads = 2;
        let mut hw = hardware_with(
            cfg,
            &filler(&[Opcode::ThreadFork, Opcode::ThreadKill, Opcode::ThreadKill]),
        );
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.num_threads(), 2);
        assert_eq!(hw.threads()[0].ip().position(), 2);
        assert_eq!(hw.threads()[1].ip().position(), 1);
        assert_eq!(hw.cur_thread(), 1);

        // The child runs the instruction after the fork and dies.
        hw.single_process(&mut env);
        assert_eq!(hw.num_threads(), 1);
        assert_eq!(hw.thread().id, 0);

        // The parent cannot kill itself.
        hw.single_process(&mut env);
        assert_eq!(hw.num_threads(), 1);
        assert_eq!(env.faults.len(), 1);
        assert_eq!(env.faults[0].location, FaultLocation::ThreadKill);
    }

    #[test]
    fn test_fork_at_limit_warns() {
        let mut cfg = config();
        cfg.max_threads = 1;
        let mut hw = hardware_with(cfg, &filler(&[Opcode::ThreadFork]));
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.num_threads(), 1);
        assert_eq!(env.faults[0].location, FaultLocation::ThreadFork);
        assert_eq!(hw.ip().position(), 2);
    }

    #[test]
    fn test_kill_last_thread_faults() {
        let mut hw = hardware(&filler(&[Opcode::ThreadKill]));
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.num_threads(), 1);
        assert_eq!(env.faults[0].location, FaultLocation::ThreadKill);
        assert_eq!(hw.ip().position(), 1);
    }

    #[test]
    fn test_slicing_all_runs_every_thread() {
        let mut cfg = config();
        cfg.thread_slicing = ThreadSlicing::All;
        let mut hw = hardware_with(cfg, &filler(&[Opcode::ThreadFork]));
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.num_threads(), 2);
        hw.single_process(&mut env);
        assert_eq!(hw.threads()[0].ip().position(), 3);
        assert_eq!(hw.threads()[1].ip().position(), 2);
        assert_eq!(hw.stats().executed, 3);
        assert_eq!(hw.stats().cycles, 2);
    }

    #[test]
    fn test_costs_throttle_execution() {
        let mut entries: Vec<InstEntry> = Opcode::ALL.iter().map(|&op| InstEntry::new(op)).collect();
        entries[Opcode::ValAdd as usize].cost = 3;
        entries[Opcode::ValSub as usize].first_time_cost = 2;
        let set = InstSet::new(entries).unwrap();
        let add = set.find(Opcode::ValAdd).unwrap();
        let sub = set.find(Opcode::ValSub).unwrap();
        let genome = vec![add, sub, sub, add];
        let mut hw =
            Hardware::with_genome(HardwareId(0), Arc::new(config()), Arc::new(set), &genome)
                .unwrap();
        let mut env = BasicEnvironment::new(1);

        step(&mut hw, &mut env, 2);
        assert_eq!(hw.stats().executed, 0);
        assert_eq!(hw.ip().position(), 0);
        step(&mut hw, &mut env, 1);
        assert_eq!(hw.stats().executed, 1);
        // First-time cost of the sub is paid once.
        step(&mut hw, &mut env, 2);
        assert_eq!(hw.ip().position(), 1);
        step(&mut hw, &mut env, 2);
        assert_eq!(hw.ip().position(), 3);
    }

    #[test]
    fn test_failed_execution_is_a_warning() {
        let mut entries: Vec<InstEntry> = Opcode::ALL.iter().map(|&op| InstEntry::new(op)).collect();
        entries[Opcode::ValInc as usize].prob_fail = 1.0;
        let set = InstSet::new(entries).unwrap();
        let genome = vec![set.find(Opcode::ValInc).unwrap(); 8];
        let mut hw =
            Hardware::with_genome(HardwareId(0), Arc::new(config()), Arc::new(set), &genome)
                .unwrap();
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.top(STACK_BX), 0);
        assert_eq!(hw.stats().failed, 1);
        assert_eq!(env.faults[0].location, FaultLocation::Instruction);
        assert!(!env.faults[0].is_error());
        assert!(hw.memory(0).flags(0).contains(SiteFlags::EXECUTED));
        assert_eq!(hw.ip().position(), 0);

        hw.single_process(&mut env);
        assert_eq!(hw.stats().failed, 2);
        assert_eq!(hw.stats().executed, 0);
        assert_eq!(hw.ip().position(), 0);
    }

    #[test]
    fn test_failed_execution_skips_exec_mutation() {
        let mut entries: Vec<InstEntry> = Opcode::ALL.iter().map(|&op| InstEntry::new(op)).collect();
        entries[Opcode::ValInc as usize].prob_fail = 1.0;
        let set = InstSet::new(entries).unwrap();
        let genome = vec![set.find(Opcode::ValInc).unwrap(); 8];
        let mut cfg = config();
        cfg.mutation.exec_mut_prob = 1.0;
        let mut hw =
            Hardware::with_genome(HardwareId(0), Arc::new(cfg), Arc::new(set), &genome).unwrap();
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.stats().mutations.exec, 0);
        assert_eq!(hw.genome(), genome);
    }

    #[test]
    fn test_mem_set_selects_labelled_space() {
        let mut hw = hardware(&filler(&[Opcode::MemSet, Opcode::NopB, Opcode::NopX]));
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.spaces().len(), 2);
        assert_eq!(hw.head(HEAD_FLOW).space(), 1);
        assert_eq!(hw.head(HEAD_FLOW).position(), 0);
        assert_eq!(hw.space_label(&CodeLabel::from_nops(&[1])), Some(1));
    }

    #[test]
    fn test_mem_alloc_grows_write_space() {
        let mut hw = hardware(&filler(&[Opcode::MemAlloc]));
        let mut env = BasicEnvironment::new(1);
        let space = hw.find_space_label(&CodeLabel::from_nops(&[0]));
        let mut write = hw.head(HEAD_WRITE);
        write.set_in_space(0, space, hw.spaces());
        hw.set_head(HEAD_WRITE, write);
        hw.push(STACK_BX, 11);
        hw.single_process(&mut env);
        assert_eq!(hw.memory(space).len(), 12);
        assert_eq!(hw.top(STACK_AX), 12);
    }

    #[test]
    fn test_read_then_write_copies() {
        let mut hw = hardware(&filler(&[Opcode::InstRead, Opcode::InstWrite]));
        let mut env = BasicEnvironment::new(1);
        let space = hw.find_space_label(&CodeLabel::from_nops(&[0]));
        let mut write = hw.head(HEAD_WRITE);
        write.set_in_space(0, space, hw.spaces());
        hw.set_head(HEAD_WRITE, write);

        hw.single_process(&mut env);
        let read_op = hw.inst_set().find(Opcode::InstRead).unwrap();
        assert_eq!(hw.top(STACK_AX), read_op.op() as i32);
        assert_eq!(hw.head(HEAD_READ).position(), 1);

        hw.single_process(&mut env);
        assert_eq!(hw.memory(space).get(0), read_op);
        assert!(hw.memory(space).flags(0).contains(SiteFlags::COPIED));
        assert_eq!(hw.memory(space).len(), 2);
        assert_eq!(hw.head(HEAD_WRITE).position(), 1);
    }

    #[test]
    fn test_write_out_of_range_value() {
        let mut hw = hardware(&filler(&[Opcode::InstWrite]));
        let mut env = BasicEnvironment::new(1);
        let space = hw.find_space_label(&CodeLabel::from_nops(&[0]));
        let mut write = hw.head(HEAD_WRITE);
        write.set_in_space(0, space, hw.spaces());
        hw.set_head(HEAD_WRITE, write);
        hw.push(STACK_AX, 500);
        hw.single_process(&mut env);
        assert_eq!(env.faults[0].location, FaultLocation::Copy);
        assert_eq!(hw.memory(space).get(0), hw.inst_set().default_inst());
    }

    #[test]
    fn test_search_sets_flow() {
        let mut hw = hardware(&filler(&[
            Opcode::Search,
            Opcode::NopA,
            Opcode::NopB,
            Opcode::NopX,
            Opcode::ValAdd,
            Opcode::NopC,
            Opcode::NopD,
            Opcode::ValAdd,
        ]));
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(hw.head(HEAD_FLOW).position(), 6);
        assert_eq!(hw.top(STACK_AX), 2);
        assert_eq!(hw.top(STACK_BX), 6 - 2 + 2 + 1);
        assert!(env.faults.is_empty());
    }

    #[test]
    fn test_search_miss_warns() {
        let mut hw = hardware(&filler(&[Opcode::Search, Opcode::NopA, Opcode::NopX]));
        let mut env = BasicEnvironment::new(1);
        hw.single_process(&mut env);
        assert_eq!(env.faults[0].location, FaultLocation::Jump);
        assert_eq!(hw.head(HEAD_FLOW).position(), 2);
        assert_eq!(hw.top(STACK_BX), 0);
    }

    #[test]
    fn test_search_backward() {
        let mut hw = hardware(&filler(&[
            Opcode::ValAdd,
            Opcode::NopC,
            Opcode::ValAdd,
            Opcode::ValAdd,
            Opcode::SearchB,
            Opcode::NopA,
            Opcode::NopX,
        ]));
        let mut env = BasicEnvironment::new(1);
        let mut ip = hw.ip();
        ip.set(4, hw.spaces());
        hw.set_head(HEAD_IP, ip);
        hw.single_process(&mut env);
        assert_eq!(hw.head(HEAD_FLOW).position(), 1);
        assert_eq!(hw.top(STACK_BX), 1 - 5);
    }

    #[test]
    fn test_if_label_matches_read_label() {
        let mut hw = hardware(&filler(&[
            Opcode::InstCopy,
            Opcode::IfLabel,
            Opcode::NopC,
            Opcode::ValInc,
        ]));
        let mut env = BasicEnvironment::new(1);
        let mut read = hw.head(HEAD_READ);
        read.set(2, hw.spaces());
        hw.set_head(HEAD_READ, read);
        let space = hw.find_space_label(&CodeLabel::from_nops(&[0]));
        let mut write = hw.head(HEAD_WRITE);
        write.set_in_space(0, space, hw.spaces());
        hw.set_head(HEAD_WRITE, write);

        // Copying the Nop-C makes the read label "C"; If-Label Nop-C asks for "A".
        hw.single_process(&mut env);
        hw.single_process(&mut env);
        assert_eq!(hw.ip().position(), 4);
    }

    #[test]
    fn test_exec_mutation_rewrites_ip_site() {
        let mut cfg = config();
        cfg.mutation.exec_mut_prob = 1.0;
        let mut hw = hardware_with(cfg, &[Opcode::NopX; 12]);
        let mut env = BasicEnvironment::new(3);
        step(&mut hw, &mut env, 12);
        assert_eq!(hw.stats().mutations.exec, 12);
        assert!(hw.memory(0).count_flag(SiteFlags::POINT_MUT) > 0);
    }

    #[test]
    fn test_ancestor_replicates() {
        let set = InstSet::standard();
        let genome: Vec<Instruction> = ANCESTOR.iter().map(|&op| set.find(op).unwrap()).collect();
        let mut hw = hardware(&ANCESTOR);
        let mut env = BasicEnvironment::new(11);
        step(&mut hw, &mut env, 400);
        assert!(env.offspring.len() >= 2, "offspring: {}", env.offspring.len());
        for child in &env.offspring {
            assert_eq!(child.genome, genome);
        }
        assert!(env.faults.is_empty(), "{:?}", env.faults);
        assert_eq!(hw.genome(), genome);
    }
}
