//! Method descriptors, e.g. `(I[Ljava/lang/String;)V`.
//!
//! Every parameter occupies a single slot, wide values included, since a slot
//! payload holds 64 bits.
use crate::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(String),
    Array(Box<FieldType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `V`
    pub ret: Option<FieldType>,
}

impl FieldType {
    pub fn is_reference(&self) -> bool {
        matches!(self, FieldType::Object(_) | FieldType::Array(_))
    }
}

impl MethodDescriptor {
    pub fn parse(text: &str) -> EngineResult<Self> {
        let malformed = || EngineError::MalformedDescriptor(text.to_owned());
        let rest = text.strip_prefix('(').ok_or_else(malformed)?;
        let (params_text, ret_text) = rest.split_once(')').ok_or_else(malformed)?;

        let mut params = Vec::new();
        let mut cursor = params_text;
        while !cursor.is_empty() {
            let (ty, tail) = parse_field(cursor).ok_or_else(malformed)?;
            params.push(ty);
            cursor = tail;
        }

        let ret = if ret_text == "V" {
            None
        } else {
            match parse_field(ret_text) {
                Some((ty, "")) => Some(ty),
                _ => return Err(malformed()),
            }
        };

        Ok(Self { params, ret })
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    #[inline]
    pub fn returns_value(&self) -> bool {
        self.ret.is_some()
    }
}

fn parse_field(text: &str) -> Option<(FieldType, &str)> {
    let mut chars = text.chars();
    let ty = match chars.next()? {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        'Z' => FieldType::Boolean,
        'L' => {
            let (name, tail) = text[1..].split_once(';')?;
            if name.is_empty() {
                return None;
            }
            return Some((FieldType::Object(name.to_owned()), tail));
        }
        '[' => {
            let (inner, tail) = parse_field(&text[1..])?;
            return Some((FieldType::Array(Box::new(inner)), tail));
        }
        _ => return None,
    };
    Some((ty, chars.as_str()))
}
