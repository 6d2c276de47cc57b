//! fiatlight-api-core: pin values, type descriptors and the envelope-dict codec

pub mod envelope;
pub mod error;
pub mod fiat_type;
pub mod json;
pub mod type_desc;
pub mod value;

pub use envelope::{Envelope, EnvelopeState};
pub use error::{ErrorKind, FiatError, FiatResult};
pub use fiat_type::FiatType;
pub use type_desc::{FieldDesc, TypeDesc};
pub use value::{OpaqueValue, Value, ValueKind};
