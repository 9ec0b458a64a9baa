use bytes::Buf;

#[derive(thiserror::Error, Debug, Clone)]
pub enum DecodeError {
	/// Not enough data in the buffer yet; read more and try again.
	#[error("short buffer")]
	Short,

	#[error("invalid value")]
	InvalidValue,

	#[error("bounds exceeded")]
	BoundsExceeded,

	#[error("invalid string: {0}")]
	InvalidUtf8(#[from] std::string::FromUtf8Error),
}

pub trait Decode: Sized {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError>;
}

impl Decode for u8 {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		if !r.has_remaining() {
			return Err(DecodeError::Short);
		}
		Ok(r.get_u8())
	}
}

/// A QUIC variable-length integer: the two high bits of the first byte
/// select a 1, 2, 4 or 8 byte encoding.
impl Decode for u64 {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		if !r.has_remaining() {
			return Err(DecodeError::Short);
		}

		let size = 1usize << (r.chunk()[0] >> 6);
		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		let mut buf = [0u8; 8];
		r.copy_to_slice(&mut buf[..size]);
		buf[0] &= 0b0011_1111;

		let mut value = 0u64;
		for byte in &buf[..size] {
			value = (value << 8) | *byte as u64;
		}

		Ok(value)
	}
}

impl Decode for usize {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		u64::decode(r)?.try_into().map_err(|_| DecodeError::BoundsExceeded)
	}
}

impl Decode for bool {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		match u8::decode(r)? {
			0 => Ok(false),
			1 => Ok(true),
			_ => Err(DecodeError::InvalidValue),
		}
	}
}

impl Decode for String {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		let size = usize::decode(r)?;
		if r.remaining() < size {
			return Err(DecodeError::Short);
		}

		let mut buf = vec![0u8; size];
		r.copy_to_slice(&mut buf);
		Ok(String::from_utf8(buf)?)
	}
}

impl<T: Decode> Decode for Vec<T> {
	fn decode<B: Buf>(r: &mut B) -> Result<Self, DecodeError> {
		let count = usize::decode(r)?;

		// Every element takes at least a byte, so this bounds the allocation.
		if r.remaining() < count {
			return Err(DecodeError::Short);
		}

		let mut items = Vec::with_capacity(count);
		for _ in 0..count {
			items.push(T::decode(r)?);
		}
		Ok(items)
	}
}

/// Decode a fixed 8-byte big-endian integer, supporting the full u64 range.
pub fn decode_u64_fixed<B: Buf>(r: &mut B) -> Result<u64, DecodeError> {
	if r.remaining() < 8 {
		return Err(DecodeError::Short);
	}
	Ok(r.get_u64())
}
