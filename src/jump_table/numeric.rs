//! Handlers for arithmetic on arbitrary-precision signed integers.

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::{VmError, VmResult};
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::SIGN, sign);
    table.register(OpCode::ABS, abs);
    table.register(OpCode::NEGATE, negate);
    table.register(OpCode::INC, inc);
    table.register(OpCode::DEC, dec);
    table.register(OpCode::ADD, add);
    table.register(OpCode::SUB, sub);
    table.register(OpCode::MUL, mul);
    table.register(OpCode::DIV, div);
    table.register(OpCode::MOD, modulo);
    table.register(OpCode::POW, pow);
    table.register(OpCode::SQRT, sqrt);
    table.register(OpCode::MODMUL, modmul);
    table.register(OpCode::MODPOW, modpow);
    table.register(OpCode::SHL, shl);
    table.register(OpCode::SHR, shr);
    table.register(OpCode::NOT, not);
    table.register(OpCode::BOOLAND, booland);
    table.register(OpCode::BOOLOR, boolor);
    table.register(OpCode::NZ, nz);
    table.register(OpCode::NUMEQUAL, numequal);
    table.register(OpCode::NUMNOTEQUAL, numnotequal);
    table.register(OpCode::LT, lt);
    table.register(OpCode::LE, le);
    table.register(OpCode::GT, gt);
    table.register(OpCode::GE, ge);
    table.register(OpCode::MIN, min);
    table.register(OpCode::MAX, max);
    table.register(OpCode::WITHIN, within);
}

fn sign(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    let sign = match x.sign() {
        Sign::Minus => -1,
        Sign::NoSign => 0,
        Sign::Plus => 1,
    };
    engine.push_integer(BigInt::from(sign))
}

fn abs(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    engine.push_integer(x.abs())
}

fn negate(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    engine.push_integer(-x)
}

fn inc(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    engine.push_integer(x + 1)
}

fn dec(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    engine.push_integer(x - 1)
}

fn add(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1 + x2)
}

fn sub(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1 - x2)
}

fn mul(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1 * x2)
}

/// DIV: truncated toward zero.
fn div(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    if x2.is_zero() {
        return Err(VmError::division_by_zero("DIV"));
    }
    engine.push_integer(x1 / x2)
}

/// MOD: remainder carrying the dividend's sign.
fn modulo(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    if x2.is_zero() {
        return Err(VmError::division_by_zero("MOD"));
    }
    engine.push_integer(x1 % x2)
}

fn pow(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let exponent = engine.pop_int()?;
    let exponent = exponent
        .to_u32()
        .ok_or_else(|| VmError::out_of_range(format!("exponent {exponent} not in [0, 2^32)")))?;
    let value = engine.pop_int()?;
    engine.push_integer(value.pow(exponent))
}

/// SQRT: truncated integer square root; negative operands fault.
fn sqrt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    if x.sign() == Sign::Minus {
        return Err(VmError::out_of_range("SQRT of a negative value".to_string()));
    }
    engine.push_integer(integer_sqrt(&x))
}

/// Truncated integer square root by Newton's method.
fn integer_sqrt(value: &BigInt) -> BigInt {
    if value.is_zero() {
        return BigInt::zero();
    }
    let mut x = value.clone();
    let mut y: BigInt = (value + 1) / 2;
    while y < x {
        x = y;
        y = (&x + value / &x) / 2;
    }
    x
}

fn modmul(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let modulus = engine.pop_int()?;
    if modulus.is_zero() {
        return Err(VmError::division_by_zero("MODMUL"));
    }
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1 * x2 % modulus)
}

/// MODPOW: modular exponentiation; an exponent of -1 computes the modular
/// inverse instead.
fn modpow(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let modulus = engine.pop_int()?;
    if modulus.is_zero() {
        return Err(VmError::division_by_zero("MODPOW"));
    }
    let exponent = engine.pop_int()?;
    let value = engine.pop_int()?;
    let result = if exponent == BigInt::from(-1) {
        modular_inverse(&value, &modulus).ok_or_else(|| {
            VmError::number_out_of_range("value has no modular inverse".to_string())
        })?
    } else {
        if exponent.sign() == Sign::Minus {
            return Err(VmError::out_of_range(format!(
                "negative exponent {exponent}"
            )));
        }
        value.modpow(&exponent, &modulus)
    };
    engine.push_integer(result)
}

/// Modular inverse by the extended Euclidean algorithm; `None` when the
/// value and modulus are not coprime. The result is normalized into
/// `[0, |modulus|)`.
fn modular_inverse(value: &BigInt, modulus: &BigInt) -> Option<BigInt> {
    let modulus = modulus.abs();
    let mut r = modulus.clone();
    let mut new_r = ((value % &modulus) + &modulus) % &modulus;
    let mut t = BigInt::zero();
    let mut new_t = BigInt::from(1);
    while !new_r.is_zero() {
        let quotient = &r / &new_r;
        let next_t = &t - &quotient * &new_t;
        t = std::mem::replace(&mut new_t, next_t);
        let next_r = &r - &quotient * &new_r;
        r = std::mem::replace(&mut new_r, next_r);
    }
    if r != BigInt::from(1) {
        return None;
    }
    if t.sign() == Sign::Minus {
        t += &modulus;
    }
    Some(t)
}

/// SHL: a zero shift pops the shift amount but leaves the value untouched.
fn shl(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let shift = pop_shift(engine)?;
    if shift == 0 {
        return Ok(());
    }
    let value = engine.pop_int()?;
    engine.push_integer(value << shift)
}

/// SHR: arithmetic shift; a zero shift leaves the value untouched.
fn shr(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let shift = pop_shift(engine)?;
    if shift == 0 {
        return Ok(());
    }
    let value = engine.pop_int()?;
    engine.push_integer(value >> shift)
}

fn pop_shift(engine: &mut ExecutionEngine) -> VmResult<usize> {
    let shift = engine.pop_int()?;
    let shift = shift
        .to_i64()
        .ok_or_else(|| VmError::out_of_range(format!("shift {shift} out of range")))?;
    engine.limits().assert_shift(shift)?;
    Ok(shift as usize)
}

fn not(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_bool()?;
    engine.push_bool(!x)
}

fn booland(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_bool()?;
    let x1 = engine.pop_bool()?;
    engine.push_bool(x1 && x2)
}

fn boolor(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_bool()?;
    let x1 = engine.pop_bool()?;
    engine.push_bool(x1 || x2)
}

fn nz(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    engine.push_bool(!x.is_zero())
}

fn numequal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_bool(x1 == x2)
}

fn numnotequal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_bool(x1 != x2)
}

/// The ordered comparisons push false when either operand is null.
fn compare(
    engine: &mut ExecutionEngine,
    relation: fn(&BigInt, &BigInt) -> bool,
) -> VmResult<()> {
    let x2 = engine.pop()?;
    let x1 = engine.pop()?;
    if x1.is_null() || x2.is_null() {
        return engine.push_bool(false);
    }
    let result = relation(&x1.as_int()?, &x2.as_int()?);
    engine.push_bool(result)
}

fn lt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare(engine, |x1, x2| x1 < x2)
}

fn le(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare(engine, |x1, x2| x1 <= x2)
}

fn gt(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare(engine, |x1, x2| x1 > x2)
}

fn ge(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    compare(engine, |x1, x2| x1 >= x2)
}

fn min(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1.min(x2))
}

fn max(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1.max(x2))
}

/// WITHIN: tests `a <= x < b`.
fn within(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let b = engine.pop_int()?;
    let a = engine.pop_int()?;
    let x = engine.pop_int()?;
    engine.push_bool(a <= x && x < b)
}
