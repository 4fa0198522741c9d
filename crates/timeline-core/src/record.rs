use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::TimelineError;

/// Text conversion and equality for one field position.
pub trait FieldValue: Clone + PartialEq + Debug {
    fn to_text(&self) -> String;

    /// # Errors
    /// Returns the parser's message when `text` is not a valid value.
    fn from_text(text: &str) -> Result<Self, String>;
}

impl<T> FieldValue for T
where
    T: Clone + PartialEq + Debug + Display + FromStr,
    T::Err: Display,
{
    fn to_text(&self) -> String {
        self.to_string()
    }

    fn from_text(text: &str) -> Result<Self, String> {
        text.parse::<T>().map_err(|err| err.to_string())
    }
}

/// A fixed-arity, positionally typed record.
///
/// Implementations are generated by [`timeline_record!`](crate::timeline_record); every
/// positional operation is dispatched through the field index so the build algorithms
/// can walk records without knowing their concrete types.
pub trait Record: Clone + PartialEq + Debug {
    const FIELD_NAMES: &'static [&'static str];
    const FIELD_COUNT: usize = Self::FIELD_NAMES.len();

    /// Positional equality; out-of-range positions compare unequal.
    fn field_eq(&self, other: &Self, field: usize) -> bool;

    /// Overwrite position `field` with the value `source` holds there.
    fn copy_field_from(&mut self, source: &Self, field: usize);

    fn field_text(&self, field: usize) -> String;

    /// # Errors
    /// Returns the parser's message when `text` is not valid for the field's type.
    fn parse_field(&mut self, field: usize, text: &str) -> Result<(), String>;

    #[must_use]
    fn field_name(field: usize) -> &'static str {
        Self::FIELD_NAMES.get(field).copied().unwrap_or("?")
    }

    #[must_use]
    fn field_index(name: &str) -> Option<usize> {
        Self::FIELD_NAMES.iter().position(|candidate| *candidate == name)
    }

    /// Render every field as text joined by `delimiter`, in schema order.
    #[must_use]
    fn render(&self, delimiter: char) -> String {
        let mut out = String::new();
        for field in 0..Self::FIELD_COUNT {
            if field > 0 {
                out.push(delimiter);
            }
            out.push_str(&self.field_text(field));
        }
        out
    }

    /// Range-checked text assignment used by update drafts and loaders.
    ///
    /// # Errors
    /// Returns [`TimelineError::FieldOutOfRange`] or [`TimelineError::FieldParse`].
    fn set_field_text(&mut self, field: usize, text: &str) -> Result<(), TimelineError> {
        check_field::<Self>(field)?;
        self.parse_field(field, text).map_err(|reason| TimelineError::FieldParse {
            field,
            field_name: Self::field_name(field),
            text: text.to_string(),
            reason,
        })
    }
}

pub(crate) fn check_field<R: Record>(field: usize) -> Result<(), TimelineError> {
    if field < R::FIELD_COUNT {
        Ok(())
    } else {
        Err(TimelineError::FieldOutOfRange { field, field_count: R::FIELD_COUNT })
    }
}

/// Declare a record schema: a struct with public typed fields, a `usize` index
/// constant per field, and a [`Record`] implementation.
///
/// ```
/// timeline_core::timeline_record! {
///     #[derive(Debug, Clone, PartialEq, Default)]
///     pub struct Quote {
///         TICKER => ticker: String,
///         PRICE => price: u64,
///     }
/// }
///
/// use timeline_core::Record;
/// assert_eq!(Quote::PRICE, 1);
/// assert_eq!(Quote::FIELD_COUNT, 2);
/// ```
#[macro_export]
macro_rules! timeline_record {
    (@indices $name:ident, $index:expr; ) => {};
    (@indices $name:ident, $index:expr; $konst:ident $($rest:ident)*) => {
        impl $name {
            pub const $konst: usize = $index;
        }
        $crate::timeline_record!(@indices $name, $index + 1usize; $($rest)*);
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$field_meta:meta])* $konst:ident => $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$field_meta])* pub $field: $ty, )+
        }

        $crate::timeline_record!(@indices $name, 0usize; $($konst)+);

        impl $crate::Record for $name {
            const FIELD_NAMES: &'static [&'static str] = &[$(stringify!($field)),+];

            #[allow(unused_assignments)]
            fn field_eq(&self, other: &Self, field: usize) -> bool {
                let mut position = 0usize;
                $(
                    if position == field {
                        return self.$field == other.$field;
                    }
                    position += 1;
                )+
                false
            }

            #[allow(unused_assignments)]
            fn copy_field_from(&mut self, source: &Self, field: usize) {
                let mut position = 0usize;
                $(
                    if position == field {
                        self.$field.clone_from(&source.$field);
                        return;
                    }
                    position += 1;
                )+
            }

            #[allow(unused_assignments)]
            fn field_text(&self, field: usize) -> String {
                let mut position = 0usize;
                $(
                    if position == field {
                        return $crate::FieldValue::to_text(&self.$field);
                    }
                    position += 1;
                )+
                String::new()
            }

            #[allow(unused_assignments)]
            fn parse_field(&mut self, field: usize, text: &str) -> Result<(), String> {
                let mut position = 0usize;
                $(
                    if position == field {
                        self.$field = <$ty as $crate::FieldValue>::from_text(text)?;
                        return Ok(());
                    }
                    position += 1;
                )+
                Err(format!("no field at position {field}"))
            }
        }
    };
}
