//! Typed application payloads carried in message bodies.
//!
//! The transport treats call, response and event payloads as opaque bytes.
//! [`Payload`] lets callers move typed values in and out of those bytes with
//! bincode's standard configuration.

use bincode::{
    BorrowDecode,
    Encode,
    borrow_decode_from_slice,
    config,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use bytes::Bytes;

use super::{Call, CorrelationId, Event, Response};

/// Wrapper trait for application payload types.
///
/// Any type deriving [`Encode`] and [`BorrowDecode`] implements this trait
/// via a blanket implementation.
pub trait Payload: Encode + for<'de> BorrowDecode<'de, ()> {
    /// Serialize the value into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    fn to_payload(&self) -> Result<Bytes, EncodeError> {
        encode_to_vec(self, config::standard()).map(Bytes::from)
    }

    /// Deserialize a value from payload bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if deserialization fails or bytes remain
    /// unread.
    fn from_payload(bytes: &[u8]) -> Result<Self, DecodeError>
    where
        Self: Sized,
    {
        let (value, read) = borrow_decode_from_slice(bytes, config::standard())?;
        if read != bytes.len() {
            return Err(DecodeError::OtherString(format!(
                "{} trailing payload bytes",
                bytes.len() - read
            )));
        }
        Ok(value)
    }
}

impl<T> Payload for T where for<'de> T: Encode + BorrowDecode<'de, ()> {}

impl Call {
    /// Build a call whose payload is `args` encoded with bincode.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if `args` cannot be serialized.
    pub fn with_args<A: Payload>(
        id: CorrelationId,
        method: impl Into<String>,
        args: &A,
    ) -> Result<Self, EncodeError> {
        Ok(Self {
            id,
            method: method.into(),
            payload: args.to_payload()?,
        })
    }

    /// Decode the call payload as `A`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the payload does not hold an `A`.
    pub fn args<A: Payload>(&self) -> Result<A, DecodeError> { A::from_payload(&self.payload) }
}

impl Response {
    /// Decode the response payload as `R`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the payload does not hold an `R`.
    pub fn value<R: Payload>(&self) -> Result<R, DecodeError> { R::from_payload(&self.payload) }
}

impl Event {
    /// Build an event whose payload is `value` encoded with bincode.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if `value` cannot be serialized.
    pub fn with_value<V: Payload>(name: impl Into<String>, value: &V) -> Result<Self, EncodeError> {
        Ok(Self {
            name: name.into(),
            payload: value.to_payload()?,
        })
    }
}
