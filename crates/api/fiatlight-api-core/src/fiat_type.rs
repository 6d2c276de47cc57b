//! Bridge between Rust types and dynamic pin values.
//!
//! [`FiatType`] gives a Rust type its [`TypeDesc`] and converts it to and from
//! [`Value`]. Structs and fieldless enums declared through [`fiat_record!`] and
//! [`fiat_enum!`] get the implementation generated.

use crate::error::FiatError;
use crate::type_desc::TypeDesc;
use crate::value::Value;

pub trait FiatType: Sized {
    fn type_desc() -> TypeDesc;
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self, FiatError>;
}

pub(crate) fn mismatch(expected: &TypeDesc, value: &Value) -> FiatError {
    FiatError::TypeMismatch(format!(
        "expected {}, got {}",
        expected.type_name(),
        value.kind()
    ))
}

impl FiatType for i64 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Int
    }
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
    fn from_value(value: &Value) -> Result<Self, FiatError> {
        value
            .as_int()
            .ok_or_else(|| mismatch(&TypeDesc::Int, value))
    }
}

macro_rules! narrow_int {
    ($($t:ty),*) => {
        $(
            impl FiatType for $t {
                fn type_desc() -> TypeDesc {
                    TypeDesc::Int
                }
                fn to_value(&self) -> Value {
                    Value::Int(i64::from(*self))
                }
                fn from_value(value: &Value) -> Result<Self, FiatError> {
                    let wide = i64::from_value(value)?;
                    <$t>::try_from(wide).map_err(|_| {
                        FiatError::TypeMismatch(format!(
                            "{wide} does not fit in {}",
                            stringify!($t)
                        ))
                    })
                }
            }
        )*
    };
}

narrow_int!(i32, u32);

impl FiatType for f64 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Float
    }
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
    fn from_value(value: &Value) -> Result<Self, FiatError> {
        value
            .as_float()
            .ok_or_else(|| mismatch(&TypeDesc::Float, value))
    }
}

impl FiatType for f32 {
    fn type_desc() -> TypeDesc {
        TypeDesc::Float
    }
    fn to_value(&self) -> Value {
        Value::Float(f64::from(*self))
    }
    fn from_value(value: &Value) -> Result<Self, FiatError> {
        f64::from_value(value).map(|v| v as f32)
    }
}

impl FiatType for bool {
    fn type_desc() -> TypeDesc {
        TypeDesc::Bool
    }
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
    fn from_value(value: &Value) -> Result<Self, FiatError> {
        value
            .as_bool()
            .ok_or_else(|| mismatch(&TypeDesc::Bool, value))
    }
}

impl FiatType for String {
    fn type_desc() -> TypeDesc {
        TypeDesc::Str
    }
    fn to_value(&self) -> Value {
        Value::Str(self.clone())
    }
    fn from_value(value: &Value) -> Result<Self, FiatError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch(&TypeDesc::Str, value))
    }
}

/// Functions returning `()` have no outputs.
impl FiatType for () {
    fn type_desc() -> TypeDesc {
        TypeDesc::Unit
    }
    fn to_value(&self) -> Value {
        Value::none()
    }
    fn from_value(_value: &Value) -> Result<Self, FiatError> {
        Ok(())
    }
}

impl<T: FiatType> FiatType for Option<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::optional(T::type_desc())
    }
    fn to_value(&self) -> Value {
        match self {
            Some(v) => Value::some(v.to_value()),
            None => Value::none(),
        }
    }
    fn from_value(value: &Value) -> Result<Self, FiatError> {
        match value {
            Value::Optional(None) => Ok(None),
            Value::Optional(Some(inner)) => T::from_value(inner).map(Some),
            other => Err(mismatch(&Self::type_desc(), other)),
        }
    }
}

impl<T: FiatType> FiatType for Vec<T> {
    fn type_desc() -> TypeDesc {
        TypeDesc::list(T::type_desc())
    }
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(FiatType::to_value).collect())
    }
    fn from_value(value: &Value) -> Result<Self, FiatError> {
        let items = value
            .as_list()
            .ok_or_else(|| mismatch(&Self::type_desc(), value))?;
        items.iter().map(T::from_value).collect()
    }
}

macro_rules! fiat_tuple {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: FiatType),+> FiatType for ($($name,)+) {
            fn type_desc() -> TypeDesc {
                TypeDesc::Tuple(vec![$($name::type_desc()),+])
            }
            fn to_value(&self) -> Value {
                Value::Tuple(vec![$(self.$idx.to_value()),+])
            }
            fn from_value(value: &Value) -> Result<Self, FiatError> {
                match value {
                    Value::Tuple(items) if items.len() == $len => {
                        Ok(($($name::from_value(&items[$idx])?,)+))
                    }
                    other => Err(mismatch(&Self::type_desc(), other)),
                }
            }
        }
    };
}

fiat_tuple!(2; A: 0, B: 1);
fiat_tuple!(3; A: 0, B: 1, C: 2);
fiat_tuple!(4; A: 0, B: 1, C: 2, D: 3);

/// Declare a struct and implement [`FiatType`] for it as a Record. Fields may
/// carry a default with `= expr`.
///
/// ```
/// use fiatlight_api_core::{fiat_record, FiatType, TypeDesc};
///
/// fiat_record! {
///     #[derive(Debug, Clone, PartialEq)]
///     pub struct Person {
///         pub name: String,
///         pub age: i64 = 30,
///     }
/// }
///
/// assert_eq!(Person::type_desc().type_name(), "Person");
/// ```
#[macro_export]
macro_rules! fiat_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $fty:ty $(= $default:expr)?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$fmeta])*
                $fvis $field: $fty,
            )*
        }

        impl $crate::FiatType for $name {
            fn type_desc() -> $crate::TypeDesc {
                $crate::TypeDesc::Record {
                    name: stringify!($name).to_string(),
                    fields: vec![
                        $(
                            $crate::FieldDesc::new(
                                stringify!($field),
                                <$fty as $crate::FiatType>::type_desc(),
                            )
                            $(.with_default({
                                let default: $fty = $default;
                                <$fty as $crate::FiatType>::to_value(&default)
                            }))?
                        ),*
                    ],
                }
            }

            fn to_value(&self) -> $crate::Value {
                $crate::Value::record([
                    $(
                        (stringify!($field), <$fty as $crate::FiatType>::to_value(&self.$field))
                    ),*
                ])
            }

            fn from_value(value: &$crate::Value) -> Result<Self, $crate::FiatError> {
                let fields = value.as_record().ok_or_else(|| {
                    $crate::FiatError::TypeMismatch(format!(
                        "expected {}, got {}",
                        stringify!($name),
                        value.kind()
                    ))
                })?;
                Ok($name {
                    $(
                        $field: {
                            let raw = fields.get(stringify!($field)).ok_or_else(|| {
                                $crate::FiatError::TypeMismatch(format!(
                                    "{} is missing field {}",
                                    stringify!($name),
                                    stringify!($field)
                                ))
                            })?;
                            <$fty as $crate::FiatType>::from_value(raw)?
                        },
                    )*
                })
            }
        }
    };
}

/// Declare a fieldless enum and implement [`FiatType`] for it. The first
/// member is the type's default.
#[macro_export]
macro_rules! fiat_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($member:ident),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $($member),+
        }

        impl $crate::FiatType for $name {
            fn type_desc() -> $crate::TypeDesc {
                $crate::TypeDesc::enumeration(stringify!($name), [$(stringify!($member)),+])
            }

            fn to_value(&self) -> $crate::Value {
                let member = match self {
                    $($name::$member => stringify!($member)),+
                };
                $crate::Value::enum_member(stringify!($name), member)
            }

            fn from_value(value: &$crate::Value) -> Result<Self, $crate::FiatError> {
                match value {
                    $crate::Value::Enum { class, member } if class == stringify!($name) => {
                        match member.as_str() {
                            $(stringify!($member) => Ok($name::$member),)+
                            other => Err($crate::FiatError::TypeMismatch(format!(
                                "{other} is not a member of {}",
                                stringify!($name)
                            ))),
                        }
                    }
                    other => Err($crate::FiatError::TypeMismatch(format!(
                        "expected enum {}, got {}",
                        stringify!($name),
                        other.kind()
                    ))),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::fiat_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Mood {
            Calm,
            Angry,
        }
    }

    crate::fiat_record! {
        #[derive(Debug, Clone, PartialEq)]
        struct Note {
            title: Option<String>,
            stars: i32 = 3,
            mood: Mood,
        }
    }

    #[test]
    fn record_macro_builds_type_and_values() {
        let ty = Note::type_desc();
        let TypeDesc::Record { name, fields } = &ty else {
            panic!("expected record, got {ty:?}");
        };
        assert_eq!(name, "Note");
        assert_eq!(fields[1].default, Some(Value::Int(3)));
        assert_eq!(fields[2].ty.type_name(), "Mood");

        let note = Note {
            title: Some("x".into()),
            stars: 5,
            mood: Mood::Angry,
        };
        let value = note.to_value();
        assert!(ty.check(&value).is_ok());
        assert_eq!(Note::from_value(&value).expect("from value"), note);
    }

    #[test]
    fn enum_macro_rejects_foreign_members() {
        assert!(Mood::from_value(&Value::enum_member("Mood", "Sleepy")).is_err());
        assert!(Mood::from_value(&Value::enum_member("Other", "Calm")).is_err());
        assert_eq!(
            Mood::type_desc().default_value(),
            Some(Value::enum_member("Mood", "Calm"))
        );
    }

    #[test]
    fn narrow_ints_check_range() {
        assert_eq!(u32::from_value(&Value::Int(7)).ok(), Some(7));
        assert!(matches!(
            u32::from_value(&Value::Int(-1)),
            Err(FiatError::TypeMismatch(_))
        ));
    }

    #[test]
    fn tuples_and_options_nest() {
        let v = (1_i64, Some(2.5_f64)).to_value();
        assert_eq!(
            <(i64, Option<f64>)>::type_desc().type_name(),
            "Tuple[int, Optional[float]]"
        );
        assert_eq!(<(i64, Option<f64>)>::from_value(&v).ok(), Some((1, Some(2.5))));
        assert!(Vec::<i64>::from_value(&Value::Int(1)).is_err());
    }
}
