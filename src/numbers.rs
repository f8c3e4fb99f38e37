// clcore Numbers
//
// Construction and the small arithmetic tower the runtime needs: integers
// (fixnum/bignum), exact ratios and double floats. Complex numbers are read
// and printed but not computed with.

use std::cmp::Ordering;
use std::sync::Arc;

use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};

use crate::conditions::Condition;
use crate::types::{Ratio, Value};

/// Demote to a fixnum when it fits.
pub fn integer_from_bigint(n: BigInt) -> Value {
    match n.to_i64() {
        Some(v) => Value::Fixnum(v),
        None => Value::Bignum(Arc::new(n)),
    }
}

fn gcd(a: &BigInt, b: &BigInt) -> BigInt {
    let mut a = a.abs();
    let mut b = b.abs();
    while !b.is_zero() {
        let r = &a % &b;
        a = b;
        b = r;
    }
    a
}

/// Normalised rational `num/den`. `den` must be non-zero.
pub fn make_ratio(mut num: BigInt, mut den: BigInt) -> Value {
    if den.is_negative() {
        num = -num;
        den = -den;
    }
    let g = gcd(&num, &den);
    if !g.is_zero() && !g.is_one() {
        num /= &g;
        den /= &g;
    }
    if den.is_one() {
        integer_from_bigint(num)
    } else {
        Value::Ratio(Arc::new(Ratio {
            numerator: num,
            denominator: den,
        }))
    }
}

pub fn is_real(v: &Value) -> bool {
    matches!(
        v,
        Value::Fixnum(_) | Value::Bignum(_) | Value::Ratio(_) | Value::Float(_)
    )
}

pub fn is_rational(v: &Value) -> bool {
    matches!(v, Value::Fixnum(_) | Value::Bignum(_) | Value::Ratio(_))
}

pub fn is_integer(v: &Value) -> bool {
    matches!(v, Value::Fixnum(_) | Value::Bignum(_))
}

/// Exact zero (used for `#C(r 0)` canonicalisation).
pub fn is_exact_zero(v: &Value) -> bool {
    matches!(v, Value::Fixnum(0))
}

enum Real {
    Exact(BigInt, BigInt),
    Inexact(f64),
}

fn to_real(v: &Value) -> Result<Real, Condition> {
    match v {
        Value::Fixnum(n) => Ok(Real::Exact(BigInt::from(*n), BigInt::one())),
        Value::Bignum(n) => Ok(Real::Exact((**n).clone(), BigInt::one())),
        Value::Ratio(r) => Ok(Real::Exact(r.numerator.clone(), r.denominator.clone())),
        Value::Float(f) => Ok(Real::Inexact(*f)),
        other => Err(Condition::type_error(other.clone(), "REAL")),
    }
}

fn to_f64(num: &BigInt, den: &BigInt) -> f64 {
    let n = num.to_f64().unwrap_or(f64::NAN);
    let d = den.to_f64().unwrap_or(f64::NAN);
    n / d
}

fn real_to_f64(r: &Real) -> f64 {
    match r {
        Real::Exact(n, d) => to_f64(n, d),
        Real::Inexact(f) => *f,
    }
}

#[derive(Clone, Copy)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

fn arith(op: Op, a: &Value, b: &Value) -> Result<Value, Condition> {
    if let (Op::Add | Op::Sub | Op::Mul, Value::Fixnum(x), Value::Fixnum(y)) = (op, a, b) {
        let fast = match op {
            Op::Add => x.checked_add(*y),
            Op::Sub => x.checked_sub(*y),
            _ => x.checked_mul(*y),
        };
        if let Some(v) = fast {
            return Ok(Value::Fixnum(v));
        }
    }
    match (to_real(a)?, to_real(b)?) {
        (Real::Exact(an, ad), Real::Exact(bn, bd)) => match op {
            Op::Add => Ok(make_ratio(&an * &bd + &bn * &ad, &ad * &bd)),
            Op::Sub => Ok(make_ratio(&an * &bd - &bn * &ad, &ad * &bd)),
            Op::Mul => Ok(make_ratio(&an * &bn, &ad * &bd)),
            Op::Div => {
                if bn.is_zero() {
                    return Err(Condition::new(
                        crate::conditions::ErrorKind::SimpleError,
                        "Division by zero",
                    )
                    .with_operands(vec![a.clone(), b.clone()]));
                }
                Ok(make_ratio(&an * &bd, &ad * &bn))
            }
        },
        (x, y) => {
            let (x, y) = (real_to_f64(&x), real_to_f64(&y));
            Ok(Value::Float(match op {
                Op::Add => x + y,
                Op::Sub => x - y,
                Op::Mul => x * y,
                Op::Div => x / y,
            }))
        }
    }
}

pub fn add(a: &Value, b: &Value) -> Result<Value, Condition> {
    arith(Op::Add, a, b)
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, Condition> {
    arith(Op::Sub, a, b)
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, Condition> {
    arith(Op::Mul, a, b)
}

pub fn div(a: &Value, b: &Value) -> Result<Value, Condition> {
    arith(Op::Div, a, b)
}

pub fn compare(a: &Value, b: &Value) -> Result<Ordering, Condition> {
    if let (Value::Fixnum(x), Value::Fixnum(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    match (to_real(a)?, to_real(b)?) {
        (Real::Exact(an, ad), Real::Exact(bn, bd)) => Ok((an * bd).cmp(&(bn * ad))),
        (x, y) => real_to_f64(&x)
            .partial_cmp(&real_to_f64(&y))
            .ok_or_else(|| Condition::type_error(a.clone(), "(NOT NaN)")),
    }
}

pub fn num_eq(a: &Value, b: &Value) -> Result<bool, Condition> {
    Ok(compare(a, b)? == Ordering::Equal)
}

pub fn is_zero(v: &Value) -> Result<bool, Condition> {
    num_eq(v, &Value::Fixnum(0))
}

/// Non-negative fixnum as an index.
pub fn as_index(v: &Value) -> Option<usize> {
    match v {
        Value::Fixnum(n) if *n >= 0 => usize::try_from(*n).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_normalisation() {
        let v = make_ratio(BigInt::from(4), BigInt::from(-6));
        match v {
            Value::Ratio(r) => {
                assert_eq!(r.numerator, BigInt::from(-2));
                assert_eq!(r.denominator, BigInt::from(3));
            }
            other => panic!("expected ratio, got {:?}", other),
        }
        assert!(matches!(make_ratio(BigInt::from(6), BigInt::from(3)), Value::Fixnum(2)));
    }

    #[test]
    fn test_fixnum_overflow_promotes() {
        let v = add(&Value::Fixnum(i64::MAX), &Value::Fixnum(1)).unwrap();
        assert!(matches!(v, Value::Bignum(_)));
        let back = sub(&v, &Value::Fixnum(1)).unwrap();
        assert!(matches!(back, Value::Fixnum(i64::MAX)));
    }

    #[test]
    fn test_mixed_arithmetic() {
        let third = div(&Value::Fixnum(1), &Value::Fixnum(3)).unwrap();
        let sum = add(&third, &third).unwrap();
        let two_thirds = make_ratio(BigInt::from(2), BigInt::from(3));
        assert!(num_eq(&sum, &two_thirds).unwrap());
        assert!(matches!(add(&Value::Float(0.5), &Value::Fixnum(1)).unwrap(), Value::Float(f) if f == 1.5));
        assert!(div(&Value::Fixnum(1), &Value::Fixnum(0)).is_err());
        assert!(add(&Value::Nil, &Value::Fixnum(1)).unwrap_err().is_type_error());
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare(&Value::Fixnum(1), &Value::Float(1.5)).unwrap(), Ordering::Less);
        assert!(is_zero(&Value::Float(0.0)).unwrap());
    }
}
