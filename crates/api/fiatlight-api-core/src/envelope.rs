//! The four-state envelope carried by every pin.

use std::fmt;

use crate::error::FiatError;

/// Discriminant of an [`Envelope`], ordered by severity for [`Envelope::zip`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnvelopeState {
    Concrete,
    Unspecified,
    Invalid,
    Error,
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeState::Concrete => "Concrete",
            EnvelopeState::Unspecified => "Unspecified",
            EnvelopeState::Invalid => "Invalid",
            EnvelopeState::Error => "Error",
        };
        f.write_str(s)
    }
}

/// A typed value plus its lifecycle state.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope<T> {
    /// No value has been supplied yet.
    Unspecified,
    /// A validator rejected the last edit. `last_valid` is `None` when the pin
    /// was Unspecified before the rejected edit.
    Invalid {
        reason: String,
        last_valid: Option<T>,
    },
    /// The producing function failed or returned a value of the wrong type.
    Error,
    Concrete(T),
}

impl<T> Envelope<T> {
    pub fn state(&self) -> EnvelopeState {
        match self {
            Envelope::Unspecified => EnvelopeState::Unspecified,
            Envelope::Invalid { .. } => EnvelopeState::Invalid,
            Envelope::Error => EnvelopeState::Error,
            Envelope::Concrete(_) => EnvelopeState::Concrete,
        }
    }

    pub fn is_concrete(&self) -> bool {
        matches!(self, Envelope::Concrete(_))
    }

    pub fn is_unspecified(&self) -> bool {
        matches!(self, Envelope::Unspecified)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Envelope::Error)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Envelope::Invalid { .. })
    }

    pub fn as_concrete(&self) -> Option<&T> {
        match self {
            Envelope::Concrete(v) => Some(v),
            _ => None,
        }
    }

    /// The concrete value, or `default` in any other state.
    pub fn get_or(self, default: T) -> T {
        match self {
            Envelope::Concrete(v) => v,
            _ => default,
        }
    }

    /// The concrete value; any other state is a `BadState` error.
    pub fn get_strict(&self) -> Result<&T, FiatError> {
        match self {
            Envelope::Concrete(v) => Ok(v),
            other => Err(FiatError::BadState(other.state())),
        }
    }

    /// Lift `f` over the concrete value. Invalid keeps its reason and maps its
    /// last valid value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
        match self {
            Envelope::Unspecified => Envelope::Unspecified,
            Envelope::Error => Envelope::Error,
            Envelope::Invalid { reason, last_valid } => Envelope::Invalid {
                reason,
                last_valid: last_valid.map(f),
            },
            Envelope::Concrete(v) => Envelope::Concrete(f(v)),
        }
    }

    /// Collect several envelopes. Concrete iff every input is; otherwise the
    /// worst state wins (Unspecified < Invalid < Error). An Invalid result
    /// carries the first invalid reason and no last valid value.
    pub fn zip(envelopes: impl IntoIterator<Item = Envelope<T>>) -> Envelope<Vec<T>> {
        let mut values = Vec::new();
        let mut worst = EnvelopeState::Concrete;
        let mut first_reason: Option<String> = None;
        for env in envelopes {
            let state = env.state();
            if state > worst {
                worst = state;
            }
            match env {
                Envelope::Concrete(v) => values.push(v),
                Envelope::Invalid { reason, .. } => {
                    first_reason.get_or_insert(reason);
                }
                _ => {}
            }
        }
        match worst {
            EnvelopeState::Concrete => Envelope::Concrete(values),
            EnvelopeState::Unspecified => Envelope::Unspecified,
            EnvelopeState::Invalid => Envelope::Invalid {
                reason: first_reason.unwrap_or_default(),
                last_valid: None,
            },
            EnvelopeState::Error => Envelope::Error,
        }
    }

    /// Transition after a rejected edit: Concrete keeps its value as
    /// `last_valid`, Invalid keeps its earlier `last_valid`.
    pub fn invalidate(self, reason: impl Into<String>) -> Envelope<T> {
        let last_valid = match self {
            Envelope::Concrete(v) => Some(v),
            Envelope::Invalid { last_valid, .. } => last_valid,
            Envelope::Unspecified | Envelope::Error => None,
        };
        Envelope::Invalid {
            reason: reason.into(),
            last_valid,
        }
    }

    /// Local recovery for a rejected edit: go back to the last valid value.
    pub fn restore_last_valid(self) -> Envelope<T> {
        match self {
            Envelope::Invalid {
                last_valid: Some(v),
                ..
            } => Envelope::Concrete(v),
            Envelope::Invalid {
                last_valid: None, ..
            } => Envelope::Unspecified,
            other => other,
        }
    }
}

impl<T> Default for Envelope<T> {
    fn default() -> Self {
        Envelope::Unspecified
    }
}

impl<T> From<T> for Envelope<T> {
    fn from(v: T) -> Self {
        Envelope::Concrete(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_strict_reports_state() {
        let e: Envelope<i32> = Envelope::Error;
        assert!(matches!(
            e.get_strict(),
            Err(FiatError::BadState(EnvelopeState::Error))
        ));
        assert_eq!(Envelope::Concrete(4).get_strict().ok(), Some(&4));
        assert_eq!(Envelope::<i32>::Unspecified.get_or(7), 7);
    }

    #[test]
    fn map_propagates_non_concrete_states() {
        assert_eq!(Envelope::Concrete(2).map(|x| x * 10), Envelope::Concrete(20));
        assert_eq!(Envelope::<i32>::Error.map(|x| x * 10), Envelope::Error);
        let invalid = Envelope::Concrete(3).invalidate("odd");
        assert_eq!(
            invalid.map(|x| x * 10),
            Envelope::Invalid {
                reason: "odd".into(),
                last_valid: Some(30)
            }
        );
    }

    #[test]
    fn zip_takes_worst_state() {
        let all = Envelope::zip(vec![Envelope::Concrete(1), Envelope::Concrete(2)]);
        assert_eq!(all, Envelope::Concrete(vec![1, 2]));

        let some_missing = Envelope::zip(vec![Envelope::Concrete(1), Envelope::Unspecified]);
        assert_eq!(some_missing, Envelope::Unspecified);

        let invalid = Envelope::zip(vec![
            Envelope::Unspecified,
            Envelope::Concrete(1).invalidate("bad"),
        ]);
        assert!(invalid.is_invalid());

        let error = Envelope::zip(vec![
            Envelope::Error,
            Envelope::Unspecified,
            Envelope::Concrete(1).invalidate("bad"),
        ]);
        assert!(error.is_error());
    }

    #[test]
    fn invalid_chain_keeps_first_last_valid() {
        let env = Envelope::Concrete(2).invalidate("a").invalidate("b");
        assert_eq!(
            env,
            Envelope::Invalid {
                reason: "b".into(),
                last_valid: Some(2)
            }
        );
        assert_eq!(env.restore_last_valid(), Envelope::Concrete(2));
        assert_eq!(
            Envelope::<i32>::Unspecified.invalidate("x").restore_last_valid(),
            Envelope::Unspecified
        );
    }
}
