//! Values of const-expressions and the operations the resolver folds at
//! compile time.

use half::f16;
use thiserror::Error;

use crate::{
    frontend::ast::{BinaryOperatorKind, UnaryOperatorKind},
    middle::ty::ScalarKind,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstEvalError {
    #[error("'{0}' cannot be represented as '{1}'")]
    NotRepresentable(String, ScalarKind),
    #[error("integer division by zero is invalid")]
    DivisionByZero,
    #[error("shift amount {amount} must be less than the bit width of the shifted value ({width})")]
    ShiftTooLarge { amount: u64, width: u32 },
    #[error("mismatched operands in constant expression")]
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    AbstractInt(i64),
    AbstractFloat(f64),
    I32(i32),
    U32(u32),
    F32(f32),
    F16(f16),
}

impl Scalar {
    pub fn kind(self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::AbstractInt(_) => ScalarKind::AbstractInt,
            Self::AbstractFloat(_) => ScalarKind::AbstractFloat,
            Self::I32(_) => ScalarKind::I32,
            Self::U32(_) => ScalarKind::U32,
            Self::F32(_) => ScalarKind::F32,
            Self::F16(_) => ScalarKind::F16,
        }
    }

    pub fn zero(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::Bool => Self::Bool(false),
            ScalarKind::AbstractInt => Self::AbstractInt(0),
            ScalarKind::AbstractFloat => Self::AbstractFloat(0.0),
            ScalarKind::I32 => Self::I32(0),
            ScalarKind::U32 => Self::U32(0),
            ScalarKind::F32 => Self::F32(0.0),
            ScalarKind::F16 => Self::F16(f16::ZERO),
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(value),
            _ => None,
        }
    }

    /// Integer value of an integer scalar
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::AbstractInt(value) => Some(value),
            Self::I32(value) => Some(i64::from(value)),
            Self::U32(value) => Some(i64::from(value)),
            _ => None,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(value) => f64::from(u8::from(value)),
            Self::AbstractInt(value) => value as f64,
            Self::AbstractFloat(value) => value,
            Self::I32(value) => f64::from(value),
            Self::U32(value) => f64::from(value),
            Self::F32(value) => f64::from(value),
            Self::F16(value) => f64::from(value),
        }
    }

    /// Value conversion following the WGSL conversion rules. Floats convert to
    /// integers by truncation and saturation.
    pub fn convert(self, to: ScalarKind) -> Result<Self, ConstEvalError> {
        if self.kind() == to {
            return Ok(self);
        }

        let not_representable = || ConstEvalError::NotRepresentable(self.to_string(), to);

        Ok(match to {
            ScalarKind::Bool => Self::Bool(self.as_f64() != 0.0),
            ScalarKind::AbstractInt => match self {
                Self::AbstractFloat(value) => Self::AbstractInt(value as i64),
                _ => Self::AbstractInt(self.as_i64().ok_or_else(not_representable)?),
            },
            ScalarKind::I32 => Self::I32(match self {
                Self::Bool(value) => i32::from(value),
                Self::AbstractInt(value) => i32::try_from(value).map_err(|_| not_representable())?,
                Self::U32(value) => value as i32,
                Self::AbstractFloat(value) => value as i32,
                Self::F32(value) => value as i32,
                Self::F16(value) => f32::from(value) as i32,
                Self::I32(value) => value,
            }),
            ScalarKind::U32 => Self::U32(match self {
                Self::Bool(value) => u32::from(value),
                Self::AbstractInt(value) => u32::try_from(value).map_err(|_| not_representable())?,
                Self::I32(value) => value as u32,
                Self::AbstractFloat(value) => value as u32,
                Self::F32(value) => value as u32,
                Self::F16(value) => f32::from(value) as u32,
                Self::U32(value) => value,
            }),
            ScalarKind::AbstractFloat => Self::AbstractFloat(self.as_f64()),
            ScalarKind::F32 => {
                let value = self.as_f64() as f32;
                if !value.is_finite() {
                    return Err(not_representable());
                }

                Self::F32(value)
            }
            ScalarKind::F16 => {
                let value = f16::from_f64(self.as_f64());
                if !value.is_finite() {
                    return Err(not_representable());
                }

                Self::F16(value)
            }
        })
    }
}

impl core::fmt::Display for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::AbstractInt(value) => write!(f, "{value}"),
            Self::AbstractFloat(value) => write!(f, "{value:?}"),
            Self::I32(value) => write!(f, "{value}i"),
            Self::U32(value) => write!(f, "{value}u"),
            Self::F32(value) => write!(f, "{value:?}f"),
            Self::F16(value) => write!(f, "{:?}h", f32::from(*value)),
        }
    }
}

/// A compile-time value. Vectors, matrices (as columns), arrays and structs
/// are composites of their elements.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Scalar(Scalar),
    Composite(Vec<ConstValue>),
}

impl ConstValue {
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(scalar) => Some(*scalar),
            Self::Composite(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_scalar()?.as_bool()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_scalar()?.as_i64()
    }

    pub fn elements(&self) -> &[ConstValue] {
        match self {
            Self::Scalar(_) => &[],
            Self::Composite(elements) => elements,
        }
    }

    /// Converts every scalar leaf to `to`
    pub fn convert(&self, to: ScalarKind) -> Result<Self, ConstEvalError> {
        self.map(|scalar| scalar.convert(to))
    }

    pub fn map(&self, f: impl Fn(Scalar) -> Result<Scalar, ConstEvalError> + Copy) -> Result<Self, ConstEvalError> {
        Ok(match self {
            Self::Scalar(scalar) => Self::Scalar(f(*scalar)?),
            Self::Composite(elements) => {
                Self::Composite(elements.iter().map(|e| e.map(f)).collect::<Result<_, _>>()?)
            }
        })
    }

    /// Applies `f` componentwise, splatting scalars against composites
    pub fn zip(
        &self,
        other: &Self,
        f: impl Fn(Scalar, Scalar) -> Result<Scalar, ConstEvalError> + Copy,
    ) -> Result<Self, ConstEvalError> {
        Ok(match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => Self::Scalar(f(*a, *b)?),
            (Self::Composite(a), Self::Composite(b)) => {
                if a.len() != b.len() {
                    return Err(ConstEvalError::Mismatch);
                }

                Self::Composite(a.iter().zip(b).map(|(a, b)| a.zip(b, f)).collect::<Result<_, _>>()?)
            }
            (Self::Composite(a), scalar @ Self::Scalar(_)) => {
                Self::Composite(a.iter().map(|a| a.zip(scalar, f)).collect::<Result<_, _>>()?)
            }
            (scalar @ Self::Scalar(_), Self::Composite(b)) => {
                Self::Composite(b.iter().map(|b| scalar.zip(b, f)).collect::<Result<_, _>>()?)
            }
        })
    }

    pub fn unary(&self, operator: UnaryOperatorKind) -> Result<Self, ConstEvalError> {
        self.map(|scalar| unary_scalar(operator, scalar))
    }

    pub fn binary(&self, operator: BinaryOperatorKind, rhs: &Self) -> Result<Self, ConstEvalError> {
        self.zip(rhs, |a, b| binary_scalar(operator, a, b))
    }
}

impl From<Scalar> for ConstValue {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl core::fmt::Display for ConstValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(scalar) => write!(f, "{scalar}"),
            Self::Composite(elements) => {
                f.write_str("(")?;

                for (i, element) in elements.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }

                    write!(f, "{element}")?;
                }

                f.write_str(")")
            }
        }
    }
}

fn unary_scalar(operator: UnaryOperatorKind, value: Scalar) -> Result<Scalar, ConstEvalError> {
    let not_representable = || ConstEvalError::NotRepresentable(format!("{operator}{value}"), value.kind());

    Ok(match (operator, value) {
        (UnaryOperatorKind::Negate, Scalar::AbstractInt(v)) => {
            Scalar::AbstractInt(v.checked_neg().ok_or_else(not_representable)?)
        }
        (UnaryOperatorKind::Negate, Scalar::I32(v)) => Scalar::I32(v.checked_neg().ok_or_else(not_representable)?),
        (UnaryOperatorKind::Negate, Scalar::AbstractFloat(v)) => Scalar::AbstractFloat(-v),
        (UnaryOperatorKind::Negate, Scalar::F32(v)) => Scalar::F32(-v),
        (UnaryOperatorKind::Negate, Scalar::F16(v)) => Scalar::F16(-v),
        (UnaryOperatorKind::LogicalNot, Scalar::Bool(v)) => Scalar::Bool(!v),
        (UnaryOperatorKind::BitwiseNot, Scalar::AbstractInt(v)) => Scalar::AbstractInt(!v),
        (UnaryOperatorKind::BitwiseNot, Scalar::I32(v)) => Scalar::I32(!v),
        (UnaryOperatorKind::BitwiseNot, Scalar::U32(v)) => Scalar::U32(!v),
        _ => return Err(ConstEvalError::Mismatch),
    })
}

macro_rules! checked_integer_op {
    ($variant:ident, $a:expr, $b:expr, $method:ident, $text:expr) => {
        Scalar::$variant(
            $a.$method($b)
                .ok_or_else(|| ConstEvalError::NotRepresentable($text, ScalarKind::$variant))?,
        )
    };
}

fn binary_scalar(operator: BinaryOperatorKind, lhs: Scalar, rhs: Scalar) -> Result<Scalar, ConstEvalError> {
    use BinaryOperatorKind as Op;

    let text = format!("{lhs} {operator} {rhs}");

    if matches!(operator, Op::ShiftLeft | Op::ShiftRight) {
        return shift(operator, lhs, rhs);
    }

    if lhs.kind() != rhs.kind() {
        return Err(ConstEvalError::Mismatch);
    }

    let is_integer_division = matches!(operator, Op::Divide | Op::Modulus) && lhs.kind().is_integer();
    if is_integer_division && rhs.as_i64() == Some(0) {
        return Err(ConstEvalError::DivisionByZero);
    }

    Ok(match (lhs, rhs) {
        (Scalar::Bool(a), Scalar::Bool(b)) => Scalar::Bool(match operator {
            Op::LogicalAnd | Op::BitwiseAnd => a && b,
            Op::LogicalOr | Op::BitwiseOr => a || b,
            Op::Equals => a == b,
            Op::NotEquals => a != b,
            _ => return Err(ConstEvalError::Mismatch),
        }),
        (Scalar::AbstractInt(a), Scalar::AbstractInt(b)) => match operator {
            Op::Add => checked_integer_op!(AbstractInt, a, b, checked_add, text),
            Op::Subtract => checked_integer_op!(AbstractInt, a, b, checked_sub, text),
            Op::Multiply => checked_integer_op!(AbstractInt, a, b, checked_mul, text),
            Op::Divide => checked_integer_op!(AbstractInt, a, b, checked_div, text),
            Op::Modulus => checked_integer_op!(AbstractInt, a, b, checked_rem, text),
            Op::BitwiseAnd => Scalar::AbstractInt(a & b),
            Op::BitwiseOr => Scalar::AbstractInt(a | b),
            Op::BitwiseXor => Scalar::AbstractInt(a ^ b),
            _ => compare(operator, a, b)?,
        },
        (Scalar::I32(a), Scalar::I32(b)) => match operator {
            Op::Add => checked_integer_op!(I32, a, b, checked_add, text),
            Op::Subtract => checked_integer_op!(I32, a, b, checked_sub, text),
            Op::Multiply => checked_integer_op!(I32, a, b, checked_mul, text),
            Op::Divide => checked_integer_op!(I32, a, b, checked_div, text),
            Op::Modulus => checked_integer_op!(I32, a, b, checked_rem, text),
            Op::BitwiseAnd => Scalar::I32(a & b),
            Op::BitwiseOr => Scalar::I32(a | b),
            Op::BitwiseXor => Scalar::I32(a ^ b),
            _ => compare(operator, a, b)?,
        },
        (Scalar::U32(a), Scalar::U32(b)) => match operator {
            Op::Add => checked_integer_op!(U32, a, b, checked_add, text),
            Op::Subtract => checked_integer_op!(U32, a, b, checked_sub, text),
            Op::Multiply => checked_integer_op!(U32, a, b, checked_mul, text),
            Op::Divide => checked_integer_op!(U32, a, b, checked_div, text),
            Op::Modulus => checked_integer_op!(U32, a, b, checked_rem, text),
            Op::BitwiseAnd => Scalar::U32(a & b),
            Op::BitwiseOr => Scalar::U32(a | b),
            Op::BitwiseXor => Scalar::U32(a ^ b),
            _ => compare(operator, a, b)?,
        },
        (Scalar::AbstractFloat(a), Scalar::AbstractFloat(b)) => {
            float_op(operator, a, b, &text, ScalarKind::AbstractFloat)?.map_or_else(Scalar::Bool, Scalar::AbstractFloat)
        }
        (Scalar::F32(a), Scalar::F32(b)) => {
            float_op(operator, a, b, &text, ScalarKind::F32)?.map_or_else(Scalar::Bool, Scalar::F32)
        }
        (Scalar::F16(a), Scalar::F16(b)) => {
            match float_op(operator, f32::from(a), f32::from(b), &text, ScalarKind::F16)? {
                Ok(value) => {
                    let value = f16::from_f32(value);
                    if !value.is_finite() {
                        return Err(ConstEvalError::NotRepresentable(text, ScalarKind::F16));
                    }

                    Scalar::F16(value)
                }
                Err(value) => Scalar::Bool(value),
            }
        }
        _ => return Err(ConstEvalError::Mismatch),
    })
}

fn compare<T: PartialOrd>(operator: BinaryOperatorKind, a: T, b: T) -> Result<Scalar, ConstEvalError> {
    use BinaryOperatorKind as Op;

    Ok(Scalar::Bool(match operator {
        Op::Equals => a == b,
        Op::NotEquals => a != b,
        Op::LessThan => a < b,
        Op::LessThanOrEqualTo => a <= b,
        Op::GreaterThan => a > b,
        Op::GreaterThanOrEqualTo => a >= b,
        _ => return Err(ConstEvalError::Mismatch),
    }))
}

trait Float:
    Copy
    + PartialOrd
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::Mul<Output = Self>
    + std::ops::Div<Output = Self>
    + std::ops::Rem<Output = Self>
{
    fn is_finite(self) -> bool;
}

impl Float for f32 {
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }
}

impl Float for f64 {
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }
}

/// Arithmetic yields `Ok(value)`, comparisons yield `Err(bool)`
fn float_op<T: Float>(
    operator: BinaryOperatorKind,
    a: T,
    b: T,
    text: &str,
    kind: ScalarKind,
) -> Result<Result<T, bool>, ConstEvalError> {
    use BinaryOperatorKind as Op;

    let value = match operator {
        Op::Add => a + b,
        Op::Subtract => a - b,
        Op::Multiply => a * b,
        Op::Divide => a / b,
        Op::Modulus => a % b,
        _ => {
            let Scalar::Bool(result) = compare(operator, a, b)? else {
                return Err(ConstEvalError::Mismatch);
            };

            return Ok(Err(result));
        }
    };

    if !value.is_finite() {
        return Err(ConstEvalError::NotRepresentable(text.to_string(), kind));
    }

    Ok(Ok(value))
}

fn shift(operator: BinaryOperatorKind, lhs: Scalar, rhs: Scalar) -> Result<Scalar, ConstEvalError> {
    let amount = rhs.as_i64().ok_or(ConstEvalError::Mismatch)?;
    let amount = u64::try_from(amount).map_err(|_| ConstEvalError::Mismatch)?;

    let width = match lhs {
        Scalar::AbstractInt(_) => 64,
        Scalar::I32(_) | Scalar::U32(_) => 32,
        _ => return Err(ConstEvalError::Mismatch),
    };

    if amount >= u64::from(width) {
        return Err(ConstEvalError::ShiftTooLarge { amount, width });
    }

    let amount = amount as u32;
    let left = operator == BinaryOperatorKind::ShiftLeft;

    Ok(match lhs {
        Scalar::AbstractInt(v) if left => Scalar::AbstractInt(v.wrapping_shl(amount)),
        Scalar::AbstractInt(v) => Scalar::AbstractInt(v >> amount),
        Scalar::I32(v) if left => Scalar::I32(v.wrapping_shl(amount)),
        Scalar::I32(v) => Scalar::I32(v >> amount),
        Scalar::U32(v) if left => Scalar::U32(v.wrapping_shl(amount)),
        Scalar::U32(v) => Scalar::U32(v >> amount),
        _ => return Err(ConstEvalError::Mismatch),
    })
}

/// Rebuilds a float scalar of the same kind as `like` from `value`
pub(crate) fn float_like(like: Scalar, value: f64) -> Result<Scalar, ConstEvalError> {
    Scalar::AbstractFloat(value).convert(like.kind())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_overflow_is_an_error() {
        let max = ConstValue::Scalar(Scalar::I32(i32::MAX));
        let one = ConstValue::Scalar(Scalar::I32(1));

        assert_eq!(
            max.binary(BinaryOperatorKind::Add, &one),
            Err(ConstEvalError::NotRepresentable(
                "2147483647i + 1i".to_string(),
                ScalarKind::I32
            ))
        );
        assert_eq!(
            one.binary(BinaryOperatorKind::Divide, &ConstValue::Scalar(Scalar::I32(0))),
            Err(ConstEvalError::DivisionByZero)
        );
    }

    #[test]
    fn abstract_values_materialize_with_range_checks() {
        assert_eq!(Scalar::AbstractInt(7).convert(ScalarKind::U32), Ok(Scalar::U32(7)));
        assert_eq!(Scalar::AbstractInt(3).convert(ScalarKind::F32), Ok(Scalar::F32(3.0)));
        assert!(Scalar::AbstractInt(-1).convert(ScalarKind::U32).is_err());
        assert!(Scalar::AbstractFloat(1e300).convert(ScalarKind::F32).is_err());
        assert!(Scalar::AbstractFloat(70000.0).convert(ScalarKind::F16).is_err());
        assert_eq!(Scalar::I32(-1).convert(ScalarKind::U32), Ok(Scalar::U32(u32::MAX)));
    }

    #[test]
    fn composites_evaluate_componentwise() {
        let vector = ConstValue::Composite(vec![
            Scalar::F32(1.0).into(),
            Scalar::F32(2.0).into(),
            Scalar::F32(3.0).into(),
        ]);
        let two = ConstValue::Scalar(Scalar::F32(2.0));

        assert_eq!(
            vector.binary(BinaryOperatorKind::Multiply, &two),
            Ok(ConstValue::Composite(vec![
                Scalar::F32(2.0).into(),
                Scalar::F32(4.0).into(),
                Scalar::F32(6.0).into(),
            ]))
        );
        assert_eq!(
            vector.binary(BinaryOperatorKind::LessThan, &two),
            Ok(ConstValue::Composite(vec![
                Scalar::Bool(true).into(),
                Scalar::Bool(false).into(),
                Scalar::Bool(false).into(),
            ]))
        );
    }

    #[test]
    fn shifts_reject_oversized_amounts() {
        let value = ConstValue::Scalar(Scalar::U32(1));

        assert_eq!(
            value.binary(BinaryOperatorKind::ShiftLeft, &ConstValue::Scalar(Scalar::U32(4))),
            Ok(ConstValue::Scalar(Scalar::U32(16)))
        );
        assert_eq!(
            value.binary(BinaryOperatorKind::ShiftLeft, &ConstValue::Scalar(Scalar::U32(32))),
            Err(ConstEvalError::ShiftTooLarge { amount: 32, width: 32 })
        );
    }
}
