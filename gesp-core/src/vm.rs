//! Stack VM for compiled rules
//!
//! `tick` executes one instruction; `run` ticks until the program ends or
//! reaches a vote. A vote suspends the run and hands back the program state
//! and context as plain data, so it can be persisted and resumed later with
//! the vote's outcome as `(answer)`.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, error};

use crate::error::VmError;
use crate::types::*;

/// Default step budget for a single run.
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// Result of a single VM tick.
#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    /// Program can be ticked again.
    Continue,
    /// Program reached a vote. The counter is already past the instruction.
    Suspended {
        kind: VoteKind,
        eligibility: Eligibility,
    },
}

/// A paused evaluation waiting for a vote. Plain data: it can be persisted
/// and resumed in another process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspension {
    pub kind: VoteKind,
    pub eligibility: Eligibility,
    pub state: ProgramState,
    pub context: Context,
}

/// Result of running a program.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Done(Value),
    Suspended(Suspension),
}

/// The gesp VM. Stateless apart from its step budget.
#[derive(Clone, Debug)]
pub struct Vm {
    max_steps: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

impl Vm {
    pub fn new(max_steps: usize) -> Self {
        Self { max_steps }
    }

    /// Execute a single instruction.
    pub fn tick(&self, state: &mut ProgramState, context: &Context) -> Result<TickOutcome, VmError> {
        let pc = state.pc as usize;
        let len = state.program.len();
        let instr = state.program.get(pc).cloned().ok_or(VmError::BadJump {
            target: state.pc,
            len,
        })?;

        match instr {
            Instr::Push(value) => state.stack.push(value),
            Instr::One => state.stack.push(Value::int(1)),

            Instr::And { skip_to } => {
                let left = pop_bool(state, "and")?;
                if !left {
                    state.stack.push(Value::Bool(false));
                    return jump(state, skip_to);
                }
            }
            Instr::Or { skip_to } => {
                let left = pop_bool(state, "or")?;
                if left {
                    state.stack.push(Value::Bool(true));
                    return jump(state, skip_to);
                }
            }
            Instr::JumpIfFalse { target } => {
                if !pop_bool(state, "jf")? {
                    return jump(state, target);
                }
            }
            Instr::Jump { target } => return jump(state, target),

            Instr::Not => {
                let b = pop_bool(state, "not")?;
                state.stack.push(Value::Bool(!b));
            }
            Instr::Add => arithmetic(state, "add", Decimal::checked_add)?,
            Instr::Sub => arithmetic(state, "sub", Decimal::checked_sub)?,
            Instr::Mul => arithmetic(state, "mul", Decimal::checked_mul)?,
            Instr::Div => {
                let right = pop_num(state, "div")?;
                let left = pop_num(state, "div")?;
                if right.is_zero() {
                    return Err(VmError::DivisionByZero);
                }
                let quotient = left.checked_div(right).ok_or(VmError::Overflow("div"))?;
                state.stack.push(Value::Num(quotient));
            }
            Instr::Floor => {
                let n = pop_num(state, "floor")?;
                state.stack.push(Value::Num(n.floor()));
            }

            Instr::Eq => equality(state, "eq", true)?,
            Instr::Neq => equality(state, "neq", false)?,
            Instr::Lt => compare(state, "lt", |l, r| l < r)?,
            Instr::Gt => compare(state, "gt", |l, r| l > r)?,
            Instr::Lte => compare(state, "lte", |l, r| l <= r)?,
            Instr::Gte => compare(state, "gte", |l, r| l >= r)?,

            Instr::Answer => state
                .stack
                .push(Value::Bool(context.answer.unwrap_or(false))),
            Instr::Initiator => state.stack.push(Value::User(context.initiator)),
            Instr::Candidate => {
                let candidate = context.candidate.ok_or(VmError::NoCandidate)?;
                state.stack.push(Value::User(candidate));
            }
            Instr::Named => {
                let index = pop_num(state, "named")?;
                let user = as_index(index)
                    .and_then(|i| context.named.get(i))
                    .copied()
                    .ok_or_else(|| VmError::NamedIndex {
                        index: index.normalize().to_string(),
                        len: context.named.len(),
                    })?;
                state.stack.push(Value::User(user));
            }
            Instr::Members => state.stack.push(Value::Set(context.members.clone())),
            Instr::SizeOf => {
                let set = pop_set(state, "size-of")?;
                state.stack.push(Value::int(set.len() as i64));
            }
            Instr::In => {
                let set = pop_set(state, "in")?;
                let user = pop_user(state, "in")?;
                state.stack.push(Value::Bool(set.contains(&user)));
            }

            Instr::VoteApproval => {
                let required = pop_num(state, "vote-approval")?;
                let count = as_count(required)
                    .ok_or_else(|| VmError::InvalidRequirement(required.normalize().to_string()))?;
                state.pc += 1;
                return Ok(TickOutcome::Suspended {
                    kind: VoteKind::Approval,
                    eligibility: Eligibility::Count(count),
                });
            }
            Instr::VoteConfirm => {
                let user = pop_user(state, "vote-confirm")?;
                state.pc += 1;
                return Ok(TickOutcome::Suspended {
                    kind: VoteKind::Confirm,
                    eligibility: Eligibility::Voters(BTreeSet::from([user])),
                });
            }
            Instr::VoteConsensus => {
                state.pc += 1;
                return Ok(TickOutcome::Suspended {
                    kind: VoteKind::Consensus,
                    eligibility: Eligibility::Voters(context.members.clone()),
                });
            }
        }

        state.pc += 1;
        Ok(TickOutcome::Continue)
    }

    /// Run until the program ends or suspends.
    pub fn run(&self, mut state: ProgramState, context: Context) -> Result<Outcome, VmError> {
        let mut steps = 0;
        while !state.is_finished() {
            if steps == self.max_steps {
                return Err(VmError::StepBudget(self.max_steps));
            }
            steps += 1;

            match self.tick(&mut state, &context)? {
                TickOutcome::Continue => continue,
                TickOutcome::Suspended { kind, eligibility } => {
                    debug!(
                        ?kind,
                        ?eligibility,
                        pc = state.pc,
                        depth = state.stack.len(),
                        "Program suspended for vote"
                    );
                    return Ok(Outcome::Suspended(Suspension {
                        kind,
                        eligibility,
                        state,
                        context,
                    }));
                }
            }
        }
        finish(state)
    }

    /// Evaluate a fresh program from address 0.
    pub fn evaluate(&self, program: &[Instr], context: Context) -> Result<Outcome, VmError> {
        self.run(ProgramState::new(program.to_vec()), context)
    }

    /// Continue a suspended evaluation once its vote has decided.
    pub fn resume(&self, suspension: Suspension, answer: bool) -> Result<Outcome, VmError> {
        let mut context = suspension.context;
        context.answer = Some(answer);
        self.run(suspension.state, context)
    }
}

fn finish(mut state: ProgramState) -> Result<Outcome, VmError> {
    if state.stack.len() != 1 {
        error!(
            depth = state.stack.len(),
            len = state.program.len(),
            "Program finished with corrupt stack"
        );
        return Err(VmError::StackDepth(state.stack.len()));
    }
    let value = state.stack.pop().ok_or(VmError::StackDepth(0))?;
    Ok(Outcome::Done(value))
}

fn jump(state: &mut ProgramState, target: Addr) -> Result<TickOutcome, VmError> {
    if target as usize > state.program.len() {
        return Err(VmError::BadJump {
            target,
            len: state.program.len(),
        });
    }
    state.pc = target;
    Ok(TickOutcome::Continue)
}

fn pop(state: &mut ProgramState, instr: &'static str) -> Result<Value, VmError> {
    state.stack.pop().ok_or(VmError::StackUnderflow(instr))
}

fn mismatch(instr: &'static str, expected: Type, found: &Value) -> VmError {
    VmError::TypeMismatch {
        instr,
        expected,
        found: found.type_of(),
    }
}

fn pop_bool(state: &mut ProgramState, instr: &'static str) -> Result<bool, VmError> {
    match pop(state, instr)? {
        Value::Bool(b) => Ok(b),
        other => Err(mismatch(instr, Type::Bool, &other)),
    }
}

fn pop_num(state: &mut ProgramState, instr: &'static str) -> Result<Decimal, VmError> {
    match pop(state, instr)? {
        Value::Num(n) => Ok(n),
        other => Err(mismatch(instr, Type::Int, &other)),
    }
}

fn pop_user(state: &mut ProgramState, instr: &'static str) -> Result<UserId, VmError> {
    match pop(state, instr)? {
        Value::User(id) => Ok(id),
        other => Err(mismatch(instr, Type::User, &other)),
    }
}

fn pop_set(state: &mut ProgramState, instr: &'static str) -> Result<BTreeSet<UserId>, VmError> {
    match pop(state, instr)? {
        Value::Set(ids) => Ok(ids),
        other => Err(mismatch(instr, Type::Set, &other)),
    }
}

/// Pops the right operand first so `(sub a b)` is `a - b`.
fn arithmetic(
    state: &mut ProgramState,
    instr: &'static str,
    op: fn(Decimal, Decimal) -> Option<Decimal>,
) -> Result<(), VmError> {
    let right = pop_num(state, instr)?;
    let left = pop_num(state, instr)?;
    let result = op(left, right).ok_or(VmError::Overflow(instr))?;
    state.stack.push(Value::Num(result));
    Ok(())
}

fn equality(state: &mut ProgramState, instr: &'static str, want: bool) -> Result<(), VmError> {
    let right = pop(state, instr)?;
    let left = pop(state, instr)?;
    state.stack.push(Value::Bool((left == right) == want));
    Ok(())
}

fn compare(
    state: &mut ProgramState,
    instr: &'static str,
    op: fn(Decimal, Decimal) -> bool,
) -> Result<(), VmError> {
    let right = pop_num(state, instr)?;
    let left = pop_num(state, instr)?;
    state.stack.push(Value::Bool(op(left, right)));
    Ok(())
}

fn as_index(n: Decimal) -> Option<usize> {
    if n.is_sign_negative() || !n.fract().is_zero() {
        return None;
    }
    n.to_usize()
}

fn as_count(n: Decimal) -> Option<u32> {
    if n.is_sign_negative() || !n.fract().is_zero() {
        return None;
    }
    n.to_u32()
}
