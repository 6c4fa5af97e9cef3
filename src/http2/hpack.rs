use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::request::HeaderList;

/// Errors from the literal-without-indexing HPACK subset.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HpackError {
	#[error("unsupported HPACK representation byte {0:#04x}")]
	UnsupportedRepresentation(u8),

	#[error("header block ended mid-field")]
	Truncated,

	#[error("Huffman-coded strings are not supported")]
	HuffmanNotSupported,

	#[error("pseudo-header appears after a regular header")]
	PseudoAfterRegular,

	#[error("header name contains uppercase characters")]
	UppercaseName,

	#[error("missing required pseudo-header {0}")]
	MissingPseudoHeader(&'static str),

	#[error("invalid :status value")]
	InvalidStatus,
}

/// Request pseudo-headers, emitted ahead of the regular header list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pseudo {
	pub method: String,
	pub scheme: String,
	pub authority: String,
	pub path: String,
}

fn put_int(dst: &mut BytesMut, prefix_bits: u8, first_byte: u8, value: usize) {
	let limit = (1usize << prefix_bits) - 1;
	if value < limit {
		dst.put_u8(first_byte | value as u8);
		return;
	}
	dst.put_u8(first_byte | limit as u8);
	let mut rest = value - limit;
	while rest >= 128 {
		dst.put_u8((rest as u8 & 0x7f) | 0x80);
		rest >>= 7;
	}
	dst.put_u8(rest as u8);
}

fn get_int(src: &[u8], pos: &mut usize, prefix_bits: u8) -> Result<usize, HpackError> {
	let limit = (1usize << prefix_bits) - 1;
	let first = *src.get(*pos).ok_or(HpackError::Truncated)?;
	*pos += 1;
	let mut value = (first & limit as u8) as usize;
	if value < limit {
		return Ok(value);
	}
	let mut shift = 0u32;
	loop {
		let byte = *src.get(*pos).ok_or(HpackError::Truncated)?;
		*pos += 1;
		value += ((byte & 0x7f) as usize) << shift;
		if byte & 0x80 == 0 {
			return Ok(value);
		}
		shift += 7;
	}
}

fn put_string(dst: &mut BytesMut, s: &str) {
	// High bit clear: not Huffman coded.
	put_int(dst, 7, 0x00, s.len());
	dst.extend_from_slice(s.as_bytes());
}

fn get_string(src: &[u8], pos: &mut usize) -> Result<String, HpackError> {
	let huffman = src.get(*pos).map(|b| b & 0x80 != 0).ok_or(HpackError::Truncated)?;
	if huffman {
		return Err(HpackError::HuffmanNotSupported);
	}
	let len = get_int(src, pos, 7)?;
	let bytes = src
		.get(*pos..*pos + len)
		.ok_or(HpackError::Truncated)?;
	*pos += len;
	Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn put_field(dst: &mut BytesMut, name: &str, value: &str) {
	// Literal Header Field without Indexing, new name (0x00 prefix).
	dst.put_u8(0x00);
	put_string(dst, name);
	put_string(dst, value);
}

/// Encode a request header block: pseudo-headers first, then the regular
/// list with names lowercased.
pub fn encode_request(pseudo: &Pseudo, headers: &HeaderList) -> Bytes {
	let mut dst = BytesMut::new();
	put_field(&mut dst, ":method", &pseudo.method);
	put_field(&mut dst, ":scheme", &pseudo.scheme);
	put_field(&mut dst, ":authority", &pseudo.authority);
	put_field(&mut dst, ":path", &pseudo.path);
	for (name, value) in headers.iter() {
		put_field(&mut dst, &name.to_ascii_lowercase(), value);
	}
	dst.freeze()
}

/// Encode a response header block (used by the in-process test peer).
pub fn encode_response(status: u16, headers: &HeaderList) -> Bytes {
	let mut dst = BytesMut::new();
	put_field(&mut dst, ":status", &status.to_string());
	for (name, value) in headers.iter() {
		put_field(&mut dst, &name.to_ascii_lowercase(), value);
	}
	dst.freeze()
}

/// Decode a header block into raw fields, enforcing pseudo-header ordering
/// and lowercase names.
pub fn decode_block(block: &[u8]) -> Result<Vec<(String, String)>, HpackError> {
	let mut fields = Vec::new();
	let mut pos = 0;
	let mut seen_regular = false;

	while pos < block.len() {
		let rep = block[pos];
		// Only literal-without-indexing with a new name (0x00) is in scope;
		// indexed fields, indexed names, and incremental indexing are
		// rejected rather than misparsed.
		if rep != 0x00 {
			return Err(HpackError::UnsupportedRepresentation(rep));
		}
		pos += 1;
		let name = get_string(block, &mut pos)?;
		let value = get_string(block, &mut pos)?;

		if name.chars().any(|c| c.is_ascii_uppercase()) {
			return Err(HpackError::UppercaseName);
		}
		if name.starts_with(':') {
			if seen_regular {
				return Err(HpackError::PseudoAfterRegular);
			}
		} else {
			seen_regular = true;
		}
		fields.push((name, value));
	}
	Ok(fields)
}

/// Decode a response block into `(status, headers)`.
pub fn decode_response(block: &[u8]) -> Result<(u16, HeaderList), HpackError> {
	let fields = decode_block(block)?;
	let mut status = None;
	let mut headers = HeaderList::new();
	for (name, value) in fields {
		if name == ":status" {
			status = Some(value.parse::<u16>().map_err(|_| HpackError::InvalidStatus)?);
		} else if !name.starts_with(':') {
			headers.append(name, value);
		}
	}
	let status = status.ok_or(HpackError::MissingPseudoHeader(":status"))?;
	Ok((status, headers))
}

/// Decode a request block into `(pseudo, headers)` (test peer support).
pub fn decode_request(block: &[u8]) -> Result<(Pseudo, HeaderList), HpackError> {
	let fields = decode_block(block)?;
	let mut method = None;
	let mut scheme = None;
	let mut authority = None;
	let mut path = None;
	let mut headers = HeaderList::new();
	for (name, value) in fields {
		match name.as_str() {
			":method" => method = Some(value),
			":scheme" => scheme = Some(value),
			":authority" => authority = Some(value),
			":path" => path = Some(value),
			n if n.starts_with(':') => {}
			_ => headers.append(name, value),
		}
	}
	Ok((
		Pseudo {
			method: method.ok_or(HpackError::MissingPseudoHeader(":method"))?,
			scheme: scheme.ok_or(HpackError::MissingPseudoHeader(":scheme"))?,
			authority: authority.ok_or(HpackError::MissingPseudoHeader(":authority"))?,
			path: path.ok_or(HpackError::MissingPseudoHeader(":path"))?,
		},
		headers,
	))
}
