//! Element type tags and their storage mapping
//!
//! Every buffer, endpoint and attribute is bound to exactly one [`ElementType`]
//! for its whole lifetime. The [`Element`] trait ties a Rust storage type to
//! its tag, so containers stay generic over `T: Element` and only the few
//! genuinely type-dependent call sites switch on the tag.
//!
//! Scalar elements are plain `Copy` values (plus `String` and [`Event`]).
//! Vector elements are pooled, shared [`Frame`]s of a numeric scalar type.

use num_complex::{Complex32, Complex64};
use std::fmt;

use super::frame::Frame;

/// Wire/storage type of a stream or attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    Byte,
    Short,
    Long,
    LongLong,
    Single,
    Double,
    ComplexSingle,
    ComplexDouble,
    Stereo,
    String,
    Event,
    VecByte,
    VecShort,
    VecLong,
    VecLongLong,
    VecSingle,
    VecDouble,
    VecComplexSingle,
    VecComplexDouble,
    VecStereo,
}

impl ElementType {
    /// All tags, in code order.
    pub const ALL: [ElementType; 21] = [
        ElementType::Bool,
        ElementType::Byte,
        ElementType::Short,
        ElementType::Long,
        ElementType::LongLong,
        ElementType::Single,
        ElementType::Double,
        ElementType::ComplexSingle,
        ElementType::ComplexDouble,
        ElementType::Stereo,
        ElementType::String,
        ElementType::Event,
        ElementType::VecByte,
        ElementType::VecShort,
        ElementType::VecLong,
        ElementType::VecLongLong,
        ElementType::VecSingle,
        ElementType::VecDouble,
        ElementType::VecComplexSingle,
        ElementType::VecComplexDouble,
        ElementType::VecStereo,
    ];

    /// Whether values of this type are shared, reference-counted frames.
    pub fn is_vector(self) -> bool {
        self.scalar_of().is_some()
    }

    /// Whether this is a numeric scalar with a vector counterpart.
    pub fn is_numeric(self) -> bool {
        self.vector_of().is_some()
    }

    /// Vector variant of a numeric scalar type.
    pub fn vector_of(self) -> Option<ElementType> {
        use ElementType::*;
        match self {
            Byte => Some(VecByte),
            Short => Some(VecShort),
            Long => Some(VecLong),
            LongLong => Some(VecLongLong),
            Single => Some(VecSingle),
            Double => Some(VecDouble),
            ComplexSingle => Some(VecComplexSingle),
            ComplexDouble => Some(VecComplexDouble),
            Stereo => Some(VecStereo),
            _ => None,
        }
    }

    /// Scalar element type of a vector type.
    pub fn scalar_of(self) -> Option<ElementType> {
        use ElementType::*;
        match self {
            VecByte => Some(Byte),
            VecShort => Some(Short),
            VecLong => Some(Long),
            VecLongLong => Some(LongLong),
            VecSingle => Some(Single),
            VecDouble => Some(Double),
            VecComplexSingle => Some(ComplexSingle),
            VecComplexDouble => Some(ComplexDouble),
            VecStereo => Some(Stereo),
            _ => None,
        }
    }

    /// Stable one-byte code, used in block fingerprints.
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<ElementType> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn name(self) -> &'static str {
        use ElementType::*;
        match self {
            Bool => "bool",
            Byte => "byte",
            Short => "short",
            Long => "long",
            LongLong => "longlong",
            Single => "single",
            Double => "double",
            ComplexSingle => "complex",
            ComplexDouble => "complex-double",
            Stereo => "stereo",
            String => "string",
            Event => "event",
            VecByte => "vector<byte>",
            VecShort => "vector<short>",
            VecLong => "vector<long>",
            VecLongLong => "vector<longlong>",
            VecSingle => "vector<single>",
            VecDouble => "vector<double>",
            VecComplexSingle => "vector<complex>",
            VecComplexDouble => "vector<complex-double>",
            VecStereo => "vector<stereo>",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A left/right sample pair carried as one element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Stereo {
    pub left: f32,
    pub right: f32,
}

impl Stereo {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }
}

/// Payload-less element: only its occurrence matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Event;

/// A Rust storage type bound to one [`ElementType`].
pub trait Element: Clone + Send + Sync + 'static {
    const TYPE: ElementType;

    fn into_value(self) -> Value;

    fn from_value(value: &Value) -> Option<Self>;
}

/// Numeric scalar types, the only ones that have a pooled vector variant.
pub trait Numeric: Element + Copy + Default + PartialEq + fmt::Debug {
    const VECTOR_TYPE: ElementType;

    fn frame_into_value(frame: Frame<Self>) -> Value;

    fn frame_from_value(value: &Value) -> Option<Frame<Self>>;
}

impl<T: Numeric> Element for Frame<T> {
    const TYPE: ElementType = T::VECTOR_TYPE;

    fn into_value(self) -> Value {
        T::frame_into_value(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        T::frame_from_value(value)
    }
}

/// A value of any element type, as carried by attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(u8),
    Short(i16),
    Long(i32),
    LongLong(i64),
    Single(f32),
    Double(f64),
    ComplexSingle(Complex32),
    ComplexDouble(Complex64),
    Stereo(Stereo),
    String(String),
    Event,
    VecByte(Frame<u8>),
    VecShort(Frame<i16>),
    VecLong(Frame<i32>),
    VecLongLong(Frame<i64>),
    VecSingle(Frame<f32>),
    VecDouble(Frame<f64>),
    VecComplexSingle(Frame<Complex32>),
    VecComplexDouble(Frame<Complex64>),
    VecStereo(Frame<Stereo>),
}

impl Value {
    pub fn element_type(&self) -> ElementType {
        match self {
            Value::Bool(_) => ElementType::Bool,
            Value::Byte(_) => ElementType::Byte,
            Value::Short(_) => ElementType::Short,
            Value::Long(_) => ElementType::Long,
            Value::LongLong(_) => ElementType::LongLong,
            Value::Single(_) => ElementType::Single,
            Value::Double(_) => ElementType::Double,
            Value::ComplexSingle(_) => ElementType::ComplexSingle,
            Value::ComplexDouble(_) => ElementType::ComplexDouble,
            Value::Stereo(_) => ElementType::Stereo,
            Value::String(_) => ElementType::String,
            Value::Event => ElementType::Event,
            Value::VecByte(_) => ElementType::VecByte,
            Value::VecShort(_) => ElementType::VecShort,
            Value::VecLong(_) => ElementType::VecLong,
            Value::VecLongLong(_) => ElementType::VecLongLong,
            Value::VecSingle(_) => ElementType::VecSingle,
            Value::VecDouble(_) => ElementType::VecDouble,
            Value::VecComplexSingle(_) => ElementType::VecComplexSingle,
            Value::VecComplexDouble(_) => ElementType::VecComplexDouble,
            Value::VecStereo(_) => ElementType::VecStereo,
        }
    }

    /// Zero value of a type. Vector types get an empty, unpooled frame.
    pub fn default_for(element_type: ElementType) -> Value {
        use ElementType as T;
        match element_type {
            T::Bool => Value::Bool(false),
            T::Byte => Value::Byte(0),
            T::Short => Value::Short(0),
            T::Long => Value::Long(0),
            T::LongLong => Value::LongLong(0),
            T::Single => Value::Single(0.0),
            T::Double => Value::Double(0.0),
            T::ComplexSingle => Value::ComplexSingle(Complex32::default()),
            T::ComplexDouble => Value::ComplexDouble(Complex64::default()),
            T::Stereo => Value::Stereo(Stereo::default()),
            T::String => Value::String(String::new()),
            T::Event => Value::Event,
            T::VecByte => Value::VecByte(Frame::from_vec(Vec::new())),
            T::VecShort => Value::VecShort(Frame::from_vec(Vec::new())),
            T::VecLong => Value::VecLong(Frame::from_vec(Vec::new())),
            T::VecLongLong => Value::VecLongLong(Frame::from_vec(Vec::new())),
            T::VecSingle => Value::VecSingle(Frame::from_vec(Vec::new())),
            T::VecDouble => Value::VecDouble(Frame::from_vec(Vec::new())),
            T::VecComplexSingle => Value::VecComplexSingle(Frame::from_vec(Vec::new())),
            T::VecComplexDouble => Value::VecComplexDouble(Frame::from_vec(Vec::new())),
            T::VecStereo => Value::VecStereo(Frame::from_vec(Vec::new())),
        }
    }

    /// Integer view of any integral scalar.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(i64::from(v)),
            Value::Short(v) => Some(i64::from(v)),
            Value::Long(v) => Some(i64::from(v)),
            Value::LongLong(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Single(v) => Some(f64::from(v)),
            Value::Double(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Same-typed value built from an integer, if the type is integral and
    /// the integer fits.
    pub fn integer_of(element_type: ElementType, v: i64) -> Option<Value> {
        match element_type {
            ElementType::Byte => u8::try_from(v).ok().map(Value::Byte),
            ElementType::Short => i16::try_from(v).ok().map(Value::Short),
            ElementType::Long => i32::try_from(v).ok().map(Value::Long),
            ElementType::LongLong => Some(Value::LongLong(v)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Byte(v) => write!(f, "{}", v),
            Value::Short(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::LongLong(v) => write!(f, "{}", v),
            Value::Single(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::ComplexSingle(v) => write!(f, "{}", v),
            Value::ComplexDouble(v) => write!(f, "{}", v),
            Value::Stereo(v) => write!(f, "({}, {})", v.left, v.right),
            Value::String(v) => write!(f, "{:?}", v),
            Value::Event => f.write_str("<event>"),
            other => write!(f, "{}", other.element_type()),
        }
    }
}

macro_rules! scalar_element {
    ($ty:ty, $tag:ident) => {
        impl Element for $ty {
            const TYPE: ElementType = ElementType::$tag;

            fn into_value(self) -> Value {
                Value::$tag(self)
            }

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$tag(v) => Some(*v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$tag(v)
            }
        }
    };
}

macro_rules! numeric_element {
    ($ty:ty, $tag:ident, $vec:ident) => {
        scalar_element!($ty, $tag);

        impl Numeric for $ty {
            const VECTOR_TYPE: ElementType = ElementType::$vec;

            fn frame_into_value(frame: Frame<Self>) -> Value {
                Value::$vec(frame)
            }

            fn frame_from_value(value: &Value) -> Option<Frame<Self>> {
                match value {
                    Value::$vec(frame) => Some(frame.clone()),
                    _ => None,
                }
            }
        }
    };
}

scalar_element!(bool, Bool);
numeric_element!(u8, Byte, VecByte);
numeric_element!(i16, Short, VecShort);
numeric_element!(i32, Long, VecLong);
numeric_element!(i64, LongLong, VecLongLong);
numeric_element!(f32, Single, VecSingle);
numeric_element!(f64, Double, VecDouble);
numeric_element!(Complex32, ComplexSingle, VecComplexSingle);
numeric_element!(Complex64, ComplexDouble, VecComplexDouble);
numeric_element!(Stereo, Stereo, VecStereo);

impl Element for String {
    const TYPE: ElementType = ElementType::String;

    fn into_value(self) -> Value {
        Value::String(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_owned)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl Element for Event {
    const TYPE: ElementType = ElementType::Event;

    fn into_value(self) -> Value {
        Value::Event
    }

    fn from_value(value: &Value) -> Option<Self> {
        matches!(value, Value::Event).then_some(Event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for ty in ElementType::ALL {
            assert_eq!(ElementType::from_code(ty.code()), Some(ty));
        }
        assert_eq!(ElementType::from_code(200), None);
    }

    #[test]
    fn test_vector_mapping_is_symmetric() {
        for ty in ElementType::ALL {
            if let Some(vec) = ty.vector_of() {
                assert!(vec.is_vector());
                assert_eq!(vec.scalar_of(), Some(ty));
            }
        }
        assert!(!ElementType::String.is_vector());
        assert!(!ElementType::Event.is_numeric());
        assert!(!ElementType::Bool.is_numeric());
    }

    #[test]
    fn test_element_tags_match_values() {
        assert_eq!(42i32.into_value().element_type(), <i32 as Element>::TYPE);
        assert_eq!(Stereo::new(1.0, -1.0).into_value().element_type(), ElementType::Stereo);
        assert_eq!(Event.into_value(), Value::Event);
        assert_eq!(<Frame<f32> as Element>::TYPE, ElementType::VecSingle);
        assert_eq!(i16::from_value(&Value::Short(-3)), Some(-3));
        assert_eq!(i16::from_value(&Value::Long(-3)), None);
    }

    #[test]
    fn test_default_values_carry_their_tag() {
        for ty in ElementType::ALL {
            assert_eq!(Value::default_for(ty).element_type(), ty);
        }
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(Value::Short(12).as_i64(), Some(12));
        assert_eq!(Value::integer_of(ElementType::Byte, 300), None);
        assert_eq!(Value::integer_of(ElementType::Long, 300), Some(Value::Long(300)));
        assert_eq!(Value::Single(1.5).as_i64(), None);
    }
}
