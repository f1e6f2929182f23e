//! Attribute type checking
//!
//! Turns `BA_DEF_` declarations into typed definitions and checks raw
//! `BA_` / `BA_DEF_DEF_` values against them. Values are never clamped or
//! silently converted: anything outside the declared type or range is
//! rejected and the caller substitutes the definition default.

use super::records::{RawAttributeKind, RawValue};
use crate::model::{AttributeData, AttributeKind};

pub(crate) fn definition_kind(raw: RawAttributeKind) -> AttributeKind {
    match raw {
        RawAttributeKind::Int { min, max } => AttributeKind::Integer { min, max },
        RawAttributeKind::Hex { min, max } => AttributeKind::Hex { min, max },
        RawAttributeKind::Float { min, max } => AttributeKind::Float { min, max },
        RawAttributeKind::String => AttributeKind::String,
        RawAttributeKind::Enum(choices) => AttributeKind::Enumeration { choices },
    }
}

/// Default used when a definition has no valid `BA_DEF_DEF_`
pub(crate) fn implicit_default(kind: &AttributeKind) -> AttributeData {
    match kind {
        AttributeKind::Integer { min, max } | AttributeKind::Hex { min, max } => {
            if min <= max {
                AttributeData::Integer(0i64.clamp(*min, *max))
            } else {
                AttributeData::Integer(0)
            }
        }
        AttributeKind::Float { min, max } => {
            if min <= max {
                AttributeData::Float(0f64.clamp(*min, *max))
            } else {
                AttributeData::Float(0.0)
            }
        }
        AttributeKind::String => AttributeData::String(String::new()),
        AttributeKind::Enumeration { choices } => {
            AttributeData::Enumeration(choices.first().cloned().unwrap_or_default())
        }
    }
}

/// A declared range of `0 0` (or an inverted one) places no bound on values
fn is_bounded<T: PartialOrd + Default>(min: &T, max: &T) -> bool {
    min <= max && !(*min == T::default() && *max == T::default())
}

fn integral(raw: &RawValue) -> Option<i64> {
    match raw {
        RawValue::Integer(v) => Some(*v),
        RawValue::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Some(*v as i64),
        _ => None,
    }
}

/// Checks `raw` against `kind`, returning the typed value or the reason it
/// was rejected
pub(crate) fn coerce(kind: &AttributeKind, raw: &RawValue) -> Result<AttributeData, String> {
    match kind {
        AttributeKind::Integer { min, max } | AttributeKind::Hex { min, max } => {
            let value = integral(raw).ok_or_else(|| "expected an integer".to_string())?;
            if is_bounded(min, max) && (value < *min || value > *max) {
                return Err(format!("outside range {}..{}", min, max));
            }
            Ok(AttributeData::Integer(value))
        }
        AttributeKind::Float { min, max } => {
            let value = match raw {
                RawValue::Integer(v) => *v as f64,
                RawValue::Float(v) => *v,
                RawValue::Str(_) => return Err("expected a number".to_string()),
            };
            if is_bounded(min, max) && (value < *min || value > *max) {
                return Err(format!("outside range {}..{}", min, max));
            }
            Ok(AttributeData::Float(value))
        }
        AttributeKind::String => match raw {
            RawValue::Str(s) => Ok(AttributeData::String(s.clone())),
            _ => Err("expected a quoted string".to_string()),
        },
        AttributeKind::Enumeration { choices } => match raw {
            RawValue::Str(label) => {
                if choices.iter().any(|c| c == label) {
                    Ok(AttributeData::Enumeration(label.clone()))
                } else {
                    Err(format!("not one of {}", choices.join(", ")))
                }
            }
            _ => {
                let index = integral(raw).ok_or_else(|| "expected a choice index".to_string())?;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| choices.get(i))
                    .map(|label| AttributeData::Enumeration(label.clone()))
                    .ok_or_else(|| format!("index outside 0..{}", choices.len()))
            }
        },
    }
}
