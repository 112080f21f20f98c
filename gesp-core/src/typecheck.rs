//! Static type checker
//!
//! Argument types are computed bottom-up, then each operator's signature is
//! matched against them. Any mismatch anywhere in the tree rejects the whole
//! program.

use crate::ast::{Exp, Literal, Node, Op};
use crate::error::TypeError;
use crate::types::Type;

/// Compute the result type of an expression.
pub fn check(node: &Node) -> Result<Type, TypeError> {
    match node {
        Node::Literal(Literal::Integer(_)) => Ok(Type::Int),
        Node::Literal(Literal::String(_)) => Ok(Type::Str),
        Node::Literal(Literal::Boolean(_)) => Ok(Type::Bool),
        Node::Exp(exp) => check_exp(exp),
    }
}

/// Check a rules program, which must decide yes or no.
pub fn check_rule(node: &Node) -> Result<Type, TypeError> {
    match check(node)? {
        Type::Bool => Ok(Type::Bool),
        other => Err(TypeError::NotBoolean(other)),
    }
}

fn check_exp(exp: &Exp) -> Result<Type, TypeError> {
    let args = exp
        .args
        .iter()
        .map(check)
        .collect::<Result<Vec<_>, _>>()?;
    signature(exp.op, &args)
}

/// Number of arguments an operator takes.
pub fn arity(op: Op) -> usize {
    match op {
        Op::One
        | Op::Answer
        | Op::Initiator
        | Op::Candidate
        | Op::Members
        | Op::VoteConsensus => 0,
        Op::Not | Op::Floor | Op::Named | Op::SizeOf | Op::VoteApproval | Op::VoteConfirm => 1,
        Op::And
        | Op::Or
        | Op::Add
        | Op::Sub
        | Op::Mul
        | Op::Div
        | Op::Eq
        | Op::Neq
        | Op::Lt
        | Op::Gt
        | Op::Lte
        | Op::Gte
        | Op::In => 2,
        Op::If => 3,
    }
}

fn signature(op: Op, args: &[Type]) -> Result<Type, TypeError> {
    use Type::*;

    let expected = arity(op);
    if args.len() != expected {
        return Err(TypeError::Arity {
            op,
            expected,
            found: args.len(),
        });
    }

    let result = match (op, args) {
        (Op::And | Op::Or, [Bool, Bool]) => Bool,
        (Op::Not, [Bool]) => Bool,
        (Op::Add | Op::Sub | Op::Mul | Op::Div, [Int, Int]) => Int,
        (Op::Floor, [Int]) => Int,
        (Op::Eq, [a, b]) if a == b => Bool,
        (Op::Neq | Op::Lt | Op::Gt | Op::Lte | Op::Gte, [Int, Int]) => Bool,
        (Op::If, [Bool, then_branch, else_branch]) => {
            if then_branch != else_branch {
                return Err(TypeError::BranchMismatch {
                    then_branch: *then_branch,
                    else_branch: *else_branch,
                });
            }
            *then_branch
        }
        (Op::One, []) => Int,
        (Op::Answer, []) => Bool,
        (Op::Initiator | Op::Candidate, []) => User,
        (Op::Named, [Int]) => User,
        (Op::Members, []) => Set,
        (Op::SizeOf, [Set]) => Int,
        (Op::In, [User, Set]) => Bool,
        (Op::VoteApproval, [Int]) => Bool,
        (Op::VoteConfirm, [User]) => Bool,
        (Op::VoteConsensus, []) => Bool,
        _ => {
            return Err(TypeError::Mismatch {
                op,
                found: args.to_vec(),
            })
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn type_of(src: &str) -> Result<Type, TypeError> {
        check(&parse_program(src).unwrap())
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(type_of("1"), Ok(Type::Int));
        assert_eq!(type_of("\"x\""), Ok(Type::Str));
        assert_eq!(type_of("false"), Ok(Type::Bool));
    }

    #[test]
    fn test_short_circuit_program_is_bool() {
        assert_eq!(type_of("(and true (eq 1 2))"), Ok(Type::Bool));
        assert_eq!(type_of("(and false (eq (div 1 0) 0))"), Ok(Type::Bool));
    }

    #[test]
    fn test_if_branches_must_agree() {
        assert_eq!(type_of("(if (eq 1 1) \"a\" \"b\")"), Ok(Type::Str));
        assert_eq!(
            type_of("(if true 1 \"x\")"),
            Err(TypeError::BranchMismatch {
                then_branch: Type::Int,
                else_branch: Type::Str
            })
        );
    }

    #[test]
    fn test_if_condition_must_be_bool() {
        assert_eq!(
            type_of("(if 1 2 3)"),
            Err(TypeError::Mismatch {
                op: Op::If,
                found: vec![Type::Int, Type::Int, Type::Int]
            })
        );
    }

    #[test]
    fn test_eq_accepts_any_matching_pair() {
        assert_eq!(type_of("(eq (initiator) (named 0))"), Ok(Type::Bool));
        assert_eq!(type_of("(eq (members) (members))"), Ok(Type::Bool));
        assert!(type_of("(eq (initiator) 1)").is_err());
    }

    #[test]
    fn test_ordering_is_int_only() {
        assert_eq!(type_of("(lt 1 2)"), Ok(Type::Bool));
        assert!(type_of("(lt \"a\" \"b\")").is_err());
        assert!(type_of("(neq true false)").is_err());
    }

    #[test]
    fn test_majority_rule() {
        assert_eq!(
            type_of("(vote-approval (add (floor (div (size-of (members)) 2)) 1))"),
            Ok(Type::Bool)
        );
    }

    #[test]
    fn test_context_readers() {
        assert_eq!(type_of("(one)"), Ok(Type::Int));
        assert_eq!(type_of("(answer)"), Ok(Type::Bool));
        assert_eq!(type_of("(named (one))"), Ok(Type::User));
        assert_eq!(type_of("(in (candidate) (members))"), Ok(Type::Bool));
        assert_eq!(type_of("(vote-confirm (named 0))"), Ok(Type::Bool));
        assert_eq!(type_of("(vote-consensus)"), Ok(Type::Bool));
    }

    #[test]
    fn test_arity_errors() {
        assert_eq!(
            type_of("(not true false)"),
            Err(TypeError::Arity {
                op: Op::Not,
                expected: 1,
                found: 2
            })
        );
        assert!(type_of("(members 1)").is_err());
        assert!(type_of("(vote-approval)").is_err());
    }

    #[test]
    fn test_error_deep_in_tree_fails_whole_program() {
        assert!(type_of("(or true (and true (not 1)))").is_err());
    }

    #[test]
    fn test_rule_root_must_be_bool() {
        let node = parse_program("(size-of (members))").unwrap();
        assert_eq!(check_rule(&node), Err(TypeError::NotBoolean(Type::Int)));
        let node = parse_program("(gte (size-of (members)) 2)").unwrap();
        assert_eq!(check_rule(&node), Ok(Type::Bool));
    }
}
