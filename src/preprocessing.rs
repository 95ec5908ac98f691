/// Decoding of base64 image payloads into the fixed-size RGB grid expected by
/// the disease classifier's feature extractor.
/// Do not use these functions to load images for any other purpose; the
/// output size and interpolation are part of the model's input contract.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::{self, FilterType}, RgbImage};
use log::debug;

use crate::error::DecodeError;

pub const IMAGE_INPUT_SIZE: usize = 128;

// Prefix of a data URL, e.g. "data:image/png;base64,".
const DATA_URL_MARKER: &str = ";base64,";

/// Decodes a base64 payload to raw bytes.
/// ASCII whitespace (line-wrapped encodings) and a leading data URL header are ignored.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, DecodeError>
{
	let payload = payload.trim();
	let payload = match payload.strip_prefix("data:")
	{
		Some(rest) => rest.split_once(DATA_URL_MARKER).map_or(payload, |(_, data)| data),
		None => payload,
	};

	let cleaned: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
	Ok(STANDARD.decode(cleaned)?)
}

/// Decodes a base64 encoded image (any container format the `image` crate supports)
/// into an RGB image of exactly IMAGE_INPUT_SIZE x IMAGE_INPUT_SIZE pixels.
pub fn decode_image(payload: &str) -> Result<RgbImage, DecodeError>
{
	let bytes = decode_base64(payload)?;

	match imghdr::from_bytes(&bytes)
	{
		Some(kind) => debug!("Image container detected as {:?} ({} bytes)", kind, bytes.len()),
		None => debug!("Image container not recognized from header ({} bytes)", bytes.len()),
	}
	if let Ok(size) = imagesize::blob_size(&bytes)
	{
		debug!("Source image is {}x{}", size.width, size.height);
	}

	let img = image::load_from_memory(&bytes)?;

	// Drop alpha / expand grayscale before resampling.
	Ok(resize_to_input(&img.to_rgb8()))
}

pub fn resize_to_input(image: &RgbImage) -> RgbImage
{
	imageops::resize(
		image,
		IMAGE_INPUT_SIZE as u32,
		IMAGE_INPUT_SIZE as u32,
		FilterType::CatmullRom)
}
