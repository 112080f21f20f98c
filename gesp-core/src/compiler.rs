//! Bytecode compiler
//!
//! Lowers a checked AST to a flat instruction list. Most operators compile
//! post-order: arguments left to right, then the operator. `and`, `or` and
//! `if` must not evaluate every argument, so they compile each sub-program
//! at the absolute address where it will sit and jump over it.
//!
//! ```text
//! (and a b)   a  And{skip_to: end}  b                         end:
//! (or a b)    a  Or{skip_to: end}   b                         end:
//! (if c t f)  c  JumpIfFalse{else}  t  Jump{end}  else: f     end:
//! ```
//!
//! Suspension operators are followed by `Answer`, so once the vote resolves
//! and the program resumes, the value left behind is the vote's outcome.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ast::{Exp, Literal, Node, Op};
use crate::error::{CompileError, TypeError};
use crate::parser::parse_program_with_limit;
use crate::typecheck::{arity, check, check_rule};
use crate::types::{Addr, Instr, Type, Value};

/// A compiled rule program.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledProgram {
    /// SHA-256 of the serialized program, hex encoded.
    pub bytecode_version: String,
    pub result_type: Type,
    pub program: Vec<Instr>,
}

impl CompiledProgram {
    /// Type-check and compile an AST.
    pub fn from_ast(node: &Node) -> Result<Self, CompileError> {
        let result_type = check(node)?;
        let program = compile(node)?;
        Ok(Self {
            bytecode_version: bytecode_version(&program),
            result_type,
            program,
        })
    }

    /// Type-check (root must be bool) and compile a rules AST.
    pub fn rule_from_ast(node: &Node) -> Result<Self, CompileError> {
        check_rule(node)?;
        Self::from_ast(node)
    }
}

/// Parse, check and compile source text.
pub fn compile_source(source: &str, max_len: usize) -> Result<CompiledProgram, CompileError> {
    let node = parse_program_with_limit(source, max_len)?;
    CompiledProgram::from_ast(&node)
}

/// Compile starting at address 0.
pub fn compile(node: &Node) -> Result<Vec<Instr>, TypeError> {
    compile_at(node, 0)
}

/// Compile a node that will be placed at absolute address `base`.
///
/// Only arity is re-checked here; argument types are the checker's job.
pub fn compile_at(node: &Node, base: Addr) -> Result<Vec<Instr>, TypeError> {
    let mut code = Vec::new();
    emit(node, base, &mut code)?;
    Ok(code)
}

/// `base` is the absolute address of `code[0]`.
fn emit(node: &Node, base: Addr, code: &mut Vec<Instr>) -> Result<(), TypeError> {
    match node {
        Node::Literal(lit) => code.push(Instr::Push(literal_value(lit))),
        Node::Exp(exp) => emit_exp(exp, base, code)?,
    }
    Ok(())
}

fn emit_exp(exp: &Exp, base: Addr, code: &mut Vec<Instr>) -> Result<(), TypeError> {
    let expected = arity(exp.op);
    if exp.args.len() != expected {
        return Err(TypeError::Arity {
            op: exp.op,
            expected,
            found: exp.args.len(),
        });
    }
    let here = |code: &Vec<Instr>| base + code.len() as Addr;

    match (exp.op, exp.args.as_slice()) {
        (Op::And, [a, b]) | (Op::Or, [a, b]) => {
            emit(a, base, code)?;
            let right = compile_at(b, here(code) + 1)?;
            let skip_to = here(code) + 1 + right.len() as Addr;
            code.push(if exp.op == Op::And {
                Instr::And { skip_to }
            } else {
                Instr::Or { skip_to }
            });
            code.extend(right);
        }
        (Op::If, [cond, then_branch, else_branch]) => {
            emit(cond, base, code)?;
            let then_code = compile_at(then_branch, here(code) + 1)?;
            let else_start = here(code) + 1 + then_code.len() as Addr + 1;
            let else_code = compile_at(else_branch, else_start)?;
            let end = else_start + else_code.len() as Addr;
            code.push(Instr::JumpIfFalse { target: else_start });
            code.extend(then_code);
            code.push(Instr::Jump { target: end });
            code.extend(else_code);
        }
        (op, args) => {
            for arg in args {
                emit(arg, base, code)?;
            }
            code.extend(post_order_instrs(op));
        }
    }
    Ok(())
}

/// Instructions emitted after a post-order operator's arguments.
///
/// `and`, `or` and `if` never get here: the arity check above sends them
/// to their own arms.
fn post_order_instrs(op: Op) -> Vec<Instr> {
    let instr = match op {
        Op::Not => Instr::Not,
        Op::Add => Instr::Add,
        Op::Sub => Instr::Sub,
        Op::Mul => Instr::Mul,
        Op::Div => Instr::Div,
        Op::Floor => Instr::Floor,
        Op::Eq => Instr::Eq,
        Op::Neq => Instr::Neq,
        Op::Lt => Instr::Lt,
        Op::Gt => Instr::Gt,
        Op::Lte => Instr::Lte,
        Op::Gte => Instr::Gte,
        Op::One => Instr::One,
        Op::Answer => Instr::Answer,
        Op::Initiator => Instr::Initiator,
        Op::Candidate => Instr::Candidate,
        Op::Named => Instr::Named,
        Op::Members => Instr::Members,
        Op::SizeOf => Instr::SizeOf,
        Op::In => Instr::In,
        Op::VoteApproval => return vec![Instr::VoteApproval, Instr::Answer],
        Op::VoteConfirm => return vec![Instr::VoteConfirm, Instr::Answer],
        Op::VoteConsensus => return vec![Instr::VoteConsensus, Instr::Answer],
        Op::And | Op::Or | Op::If => return Vec::new(),
    };
    vec![instr]
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Integer(n) => Value::int(*n),
        Literal::String(s) => Value::Str(s.clone()),
        Literal::Boolean(b) => Value::Bool(*b),
    }
}

/// Hex SHA-256 of a program's canonical JSON form.
pub fn bytecode_version(program: &[Instr]) -> String {
    let bytes = serde_json::to_vec(program).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;
    use pretty_assertions::assert_eq;

    fn compiled(src: &str) -> Vec<Instr> {
        compile(&parse_program(src).unwrap()).unwrap()
    }

    #[test]
    fn test_post_order_arithmetic() {
        assert_eq!(
            compiled("(sub 5 (one))"),
            vec![Instr::Push(Value::int(5)), Instr::One, Instr::Sub]
        );
    }

    #[test]
    fn test_and_skips_right_operand() {
        assert_eq!(
            compiled("(and false (eq 1 2))"),
            vec![
                Instr::Push(Value::Bool(false)),
                Instr::And { skip_to: 5 },
                Instr::Push(Value::int(1)),
                Instr::Push(Value::int(2)),
                Instr::Eq,
            ]
        );
    }

    #[test]
    fn test_or_layout() {
        assert_eq!(
            compiled("(or true false)"),
            vec![
                Instr::Push(Value::Bool(true)),
                Instr::Or { skip_to: 3 },
                Instr::Push(Value::Bool(false)),
            ]
        );
    }

    #[test]
    fn test_if_layout() {
        assert_eq!(
            compiled("(if (eq 1 1) \"a\" \"b\")"),
            vec![
                Instr::Push(Value::int(1)),
                Instr::Push(Value::int(1)),
                Instr::Eq,
                Instr::JumpIfFalse { target: 6 },
                Instr::Push(Value::Str("a".into())),
                Instr::Jump { target: 7 },
                Instr::Push(Value::Str("b".into())),
            ]
        );
    }

    #[test]
    fn test_nested_control_flow_uses_absolute_targets() {
        let code = compiled("(or (and true false) (if false true (not true)))");
        assert_eq!(
            code,
            vec![
                Instr::Push(Value::Bool(true)),
                Instr::And { skip_to: 3 },
                Instr::Push(Value::Bool(false)),
                Instr::Or { skip_to: 10 },
                Instr::Push(Value::Bool(false)),
                Instr::JumpIfFalse { target: 8 },
                Instr::Push(Value::Bool(true)),
                Instr::Jump { target: 10 },
                Instr::Push(Value::Bool(true)),
                Instr::Not,
            ]
        );
    }

    #[test]
    fn test_compile_at_offsets_targets() {
        let node = parse_program("(and true true)").unwrap();
        assert_eq!(compile_at(&node, 10).unwrap()[1], Instr::And { skip_to: 13 });
    }

    #[test]
    fn test_jump_targets_stay_in_range() {
        let sources = [
            "(if (and (lt 1 2) (or false true)) (if true 1 2) (add 3 4))",
            "(and (or (not false) (eq 1 1)) (if (gt 2 1) (eq 1 1) false))",
            "(if true (if false \"a\" \"b\") (if true \"c\" \"d\"))",
        ];
        for src in sources {
            let code = compiled(src);
            for instr in &code {
                if let Some(target) = instr.target() {
                    assert!(target as usize <= code.len(), "{src}: {instr}");
                }
            }
        }
    }

    #[test]
    fn test_control_flow_in_later_argument() {
        assert_eq!(
            compiled("(eq false (and false true))"),
            vec![
                Instr::Push(Value::Bool(false)),
                Instr::Push(Value::Bool(false)),
                Instr::And { skip_to: 4 },
                Instr::Push(Value::Bool(true)),
                Instr::Eq,
            ]
        );
        assert_eq!(
            compiled("(add 1 (if true 2 3))"),
            vec![
                Instr::Push(Value::int(1)),
                Instr::Push(Value::Bool(true)),
                Instr::JumpIfFalse { target: 5 },
                Instr::Push(Value::int(2)),
                Instr::Jump { target: 6 },
                Instr::Push(Value::int(3)),
                Instr::Add,
            ]
        );
    }

    #[test]
    fn test_control_flow_targets_land_inside_their_own_expression() {
        let sources = [
            "(gte (size-of (members)) (if (in (initiator) (members)) 2 3))",
            "(eq (or false true) (and true (not false)))",
            "(add (sub 4 1) (mul 2 (if (lt 1 2) (if false 5 6) 7)))",
        ];
        for src in sources {
            let code = compiled(src);
            for instr in &code {
                if let Some(target) = instr.target() {
                    assert!(target as usize <= code.len(), "{src}: {instr}");
                }
            }
        }
    }

    #[test]
    fn test_wrong_arity_is_rejected_not_emitted() {
        let node = Node::exp(Op::And, vec![Node::boolean(true)]);
        assert_eq!(
            compile(&node),
            Err(TypeError::Arity {
                op: Op::And,
                expected: 2,
                found: 1
            })
        );
        let node = Node::exp(Op::If, vec![]);
        assert!(compile(&node).is_err());
    }

    #[test]
    fn test_vote_approval_reads_answer() {
        assert_eq!(
            compiled("(vote-approval 3)"),
            vec![
                Instr::Push(Value::int(3)),
                Instr::VoteApproval,
                Instr::Answer
            ]
        );
        assert_eq!(
            compiled("(vote-consensus)"),
            vec![Instr::VoteConsensus, Instr::Answer]
        );
    }

    #[test]
    fn test_compile_source_rejects_type_errors() {
        assert!(matches!(
            compile_source("(if true 1 \"x\")", 1024),
            Err(CompileError::Type(_))
        ));
        assert!(matches!(
            compile_source("(if true 1", 1024),
            Err(CompileError::Syntax(_))
        ));
    }

    #[test]
    fn test_bytecode_version_is_stable() {
        let a = compile_source("(eq 1 1)", 1024).unwrap();
        let b = compile_source("(eq   1 1)", 1024).unwrap();
        let c = compile_source("(eq 1 2)", 1024).unwrap();
        assert_eq!(a.bytecode_version, b.bytecode_version);
        assert_ne!(a.bytecode_version, c.bytecode_version);
        assert_eq!(a.bytecode_version.len(), 64);
    }
}
