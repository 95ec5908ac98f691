/// Hand-engineered image features for the plant-disease classifier.
///
/// The feature vector is the concatenation of three histograms computed on a
/// IMAGE_INPUT_SIZE x IMAGE_INPUT_SIZE RGB image:
/// 1. a histogram of oriented gradients (HOG) over the grayscale image,
/// 2. a uniform local binary pattern (LBP) texture histogram,
/// 3. a joint 8x8x8 RGB color histogram.
///
/// Every constant in this module is part of the model's input contract.
/// The classifier was fit on vectors produced with exactly these parameters,
/// so changing any of them requires retraining.

use std::f64::consts::PI;

use image::{GrayImage, Luma, RgbImage};
use ndarray::{s, Array1, Array2, Array3, ArrayView3};

use crate::error::{Error, FeatureStage};
use crate::preprocessing::IMAGE_INPUT_SIZE;

pub const ORIENTATIONS: usize = 9;
pub const PIXELS_PER_CELL: usize = 16;
pub const CELLS_PER_BLOCK: usize = 2;
// L2-Hys clipping threshold and the epsilon of both normalization passes.
const L2_HYS_CLIP: f64 = 0.2;
const BLOCK_NORM_EPS: f64 = 1e-5;

pub const LBP_POINTS: usize = 8;
pub const LBP_RADIUS: f64 = 1.0;
/// P + 1 uniform codes plus one bin for every non-uniform pattern.
pub const LBP_BINS: usize = LBP_POINTS + 2;
const LBP_HISTOGRAM_EPS: f64 = 1e-6;

pub const COLOR_BINS_PER_CHANNEL: usize = 8;
pub const COLOR_HISTOGRAM_LENGTH: usize =
    COLOR_BINS_PER_CHANNEL * COLOR_BINS_PER_CHANNEL * COLOR_BINS_PER_CHANNEL;

pub const HOG_LENGTH: usize = hog_length(IMAGE_INPUT_SIZE, IMAGE_INPUT_SIZE);
pub const FEATURE_VECTOR_LENGTH: usize = HOG_LENGTH + LBP_BINS + COLOR_HISTOGRAM_LENGTH;

// Fixed-point BT.601 luma weights, scaled by 2^14.
const LUMA_SHIFT: u32 = 14;
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;

/// Length of the HOG descriptor for an image of the given size.
/// Partial cells at the right and bottom edges are ignored.
pub const fn hog_length(width: usize, height: usize) -> usize
{
    let cells_x = width / PIXELS_PER_CELL;
    let cells_y = height / PIXELS_PER_CELL;
    if cells_x < CELLS_PER_BLOCK || cells_y < CELLS_PER_BLOCK
    {
        return 0;
    }
    let blocks_x = cells_x - CELLS_PER_BLOCK + 1;
    let blocks_y = cells_y - CELLS_PER_BLOCK + 1;
    blocks_x * blocks_y * CELLS_PER_BLOCK * CELLS_PER_BLOCK * ORIENTATIONS
}

/// Computes the full feature vector, laid out as [HOG..., LBP..., color...].
pub fn extract_features(image: &RgbImage) -> Result<Array1<f64>, Error>
{
    let (width, height) = image.dimensions();
    if width as usize != IMAGE_INPUT_SIZE || height as usize != IMAGE_INPUT_SIZE
    {
        return Err(Error::feature(
            FeatureStage::Input,
            format!("expected a {0}x{0} image, got {1}x{2}", IMAGE_INPUT_SIZE, width, height)));
    }

    let gray = grayscale(image)?;
    let hog = histogram_of_oriented_gradients(&gray)?;
    let lbp = local_binary_pattern_histogram(&gray)?;
    let color = color_histogram(image)?;

    let mut features = Vec::with_capacity(FEATURE_VECTOR_LENGTH);
    features.extend(hog.iter());
    features.extend(lbp.iter());
    features.extend(color.iter());

    if features.len() != FEATURE_VECTOR_LENGTH
    {
        return Err(Error::feature(
            FeatureStage::Input,
            format!("expected {} features, computed {}", FEATURE_VECTOR_LENGTH, features.len())));
    }

    Ok(Array1::from(features))
}

pub fn grayscale(image: &RgbImage) -> Result<GrayImage, Error>
{
    if image.width() == 0 || image.height() == 0
    {
        return Err(Error::feature(FeatureStage::Grayscale, "image has no pixels"));
    }

    let rounding = 1 << (LUMA_SHIFT - 1);
    Ok(GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = (r as u32 * LUMA_R + g as u32 * LUMA_G + b as u32 * LUMA_B + rounding) >> LUMA_SHIFT;
        Luma([luma as u8])
    }))
}

fn to_array(gray: &GrayImage) -> Array2<f64>
{
    let (width, height) = gray.dimensions();
    Array2::from_shape_fn((height as usize, width as usize), |(y, x)| gray.get_pixel(x as u32, y as u32).0[0] as f64)
}

/// Central-difference gradients along rows and columns. The outermost rows
/// (for the row gradient) and columns (for the column gradient) are zero.
fn gradients(pixels: &Array2<f64>) -> (Array2<f64>, Array2<f64>)
{
    let (height, width) = pixels.dim();
    let mut g_row = Array2::zeros((height, width));
    let mut g_col = Array2::zeros((height, width));

    if height > 2
    {
        let diff = &pixels.slice(s![2.., ..]) - &pixels.slice(s![..height - 2, ..]);
        g_row.slice_mut(s![1..height - 1, ..]).assign(&diff);
    }
    if width > 2
    {
        let diff = &pixels.slice(s![.., 2..]) - &pixels.slice(s![.., ..width - 2]);
        g_col.slice_mut(s![.., 1..width - 1]).assign(&diff);
    }

    (g_row, g_col)
}

/// Index of the orientation bin covering `degrees` in [0, 180), if any.
fn orientation_bin(degrees: f64) -> Option<usize>
{
    let bin_width = 180.0 / ORIENTATIONS as f64;
    (0..ORIENTATIONS).find(|&i| degrees >= bin_width * i as f64 && degrees < bin_width * (i + 1) as f64)
}

/// Magnitude-weighted orientation histogram per cell, averaged over the cell area.
/// Shape is (cell rows, cell columns, ORIENTATIONS).
fn cell_histograms(gray: &GrayImage) -> Array3<f64>
{
    let (width, height) = gray.dimensions();
    let cells_x = width as usize / PIXELS_PER_CELL;
    let cells_y = height as usize / PIXELS_PER_CELL;

    let pixels = to_array(gray);
    let (g_row, g_col) = gradients(&pixels);

    let mut cells = Array3::<f64>::zeros((cells_y, cells_x, ORIENTATIONS));
    let cell_area = (PIXELS_PER_CELL * PIXELS_PER_CELL) as f64;
    for y in 0..cells_y * PIXELS_PER_CELL
    {
        for x in 0..cells_x * PIXELS_PER_CELL
        {
            let (gy, gx) = (g_row[[y, x]], g_col[[y, x]]);
            let magnitude = gx.hypot(gy);
            let orientation = gy.atan2(gx).to_degrees().rem_euclid(180.0);
            if let Some(bin) = orientation_bin(orientation)
            {
                cells[[y / PIXELS_PER_CELL, x / PIXELS_PER_CELL, bin]] += magnitude;
            }
        }
    }
    cells /= cell_area;
    cells
}

pub fn histogram_of_oriented_gradients(gray: &GrayImage) -> Result<Array1<f64>, Error>
{
    let (width, height) = gray.dimensions();
    let cells_x = width as usize / PIXELS_PER_CELL;
    let cells_y = height as usize / PIXELS_PER_CELL;
    if cells_x < CELLS_PER_BLOCK || cells_y < CELLS_PER_BLOCK
    {
        return Err(Error::feature(
            FeatureStage::Gradient,
            format!("a {}x{} image is smaller than one {}x{} cell block", width, height, CELLS_PER_BLOCK, CELLS_PER_BLOCK)));
    }

    let cells = cell_histograms(gray);
    let blocks_x = cells_x - CELLS_PER_BLOCK + 1;
    let blocks_y = cells_y - CELLS_PER_BLOCK + 1;
    let mut descriptor = Vec::with_capacity(hog_length(width as usize, height as usize));
    for by in 0..blocks_y
    {
        for bx in 0..blocks_x
        {
            let block = cells.slice(s![by..by + CELLS_PER_BLOCK, bx..bx + CELLS_PER_BLOCK, ..]);
            descriptor.extend(l2_hys(block));
        }
    }

    Ok(Array1::from(descriptor))
}

/// L2 normalization, clipping at L2_HYS_CLIP, then L2 normalization again.
fn l2_hys(block: ArrayView3<f64>) -> Vec<f64>
{
    let eps_squared = BLOCK_NORM_EPS * BLOCK_NORM_EPS;
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + eps_squared).sqrt();
    let clipped: Vec<f64> = block.iter().map(|v| (v / norm).min(L2_HYS_CLIP)).collect();
    let norm = (clipped.iter().map(|v| v * v).sum::<f64>() + eps_squared).sqrt();
    clipped.into_iter().map(|v| v / norm).collect()
}

/// Sampling offsets (row, column) of the circular neighborhood, rounded to 5 decimals.
fn neighbor_offsets() -> [(f64, f64); LBP_POINTS]
{
    let round5 = |v: f64| (v * 1e5).round() / 1e5;
    std::array::from_fn(|p| {
        let angle = 2.0 * PI * p as f64 / LBP_POINTS as f64;
        (round5(-LBP_RADIUS * angle.sin()), round5(LBP_RADIUS * angle.cos()))
    })
}

/// Bilinear interpolation; samples outside the image read as zero.
fn bilinear(pixels: &Array2<f64>, r: f64, c: f64) -> f64
{
    let (height, width) = pixels.dim();
    let pixel = |row: f64, col: f64| -> f64 {
        if row < 0.0 || col < 0.0 || row >= height as f64 || col >= width as f64
        {
            0.0
        }
        else
        {
            pixels[[row as usize, col as usize]]
        }
    };

    let (min_r, min_c, max_r, max_c) = (r.floor(), c.floor(), r.ceil(), c.ceil());
    let (dr, dc) = (r - min_r, c - min_c);
    let top = (1.0 - dc) * pixel(min_r, min_c) + dc * pixel(min_r, max_c);
    let bottom = (1.0 - dc) * pixel(max_r, min_c) + dc * pixel(max_r, max_c);
    (1.0 - dr) * top + dr * bottom
}

/// Rotation-invariant uniform LBP code of the pixel at (row, col).
/// Codes 0..=LBP_POINTS count the set bits of a uniform pattern;
/// LBP_POINTS + 1 marks a non-uniform pattern.
fn uniform_pattern(pixels: &Array2<f64>, row: usize, col: usize, offsets: &[(f64, f64); LBP_POINTS]) -> usize
{
    let center = pixels[[row, col]];
    let bits: [bool; LBP_POINTS] = std::array::from_fn(|i| {
        let (dr, dc) = offsets[i];
        bilinear(pixels, row as f64 + dr, col as f64 + dc) - center >= 0.0
    });

    let transitions = bits.windows(2).filter(|pair| pair[0] != pair[1]).count();
    if transitions <= 2
    {
        bits.iter().filter(|&&bit| bit).count()
    }
    else
    {
        LBP_POINTS + 1
    }
}

pub fn local_binary_pattern_histogram(gray: &GrayImage) -> Result<Array1<f64>, Error>
{
    let pixels = to_array(gray);
    if pixels.is_empty()
    {
        return Err(Error::feature(FeatureStage::Texture, "image has no pixels"));
    }

    let offsets = neighbor_offsets();
    let mut histogram = Array1::<f64>::zeros(LBP_BINS);
    for ((row, col), _) in pixels.indexed_iter()
    {
        histogram[uniform_pattern(&pixels, row, col, &offsets)] += 1.0;
    }

    let total = histogram.sum();
    Ok(histogram / (total + LBP_HISTOGRAM_EPS))
}

/// Joint RGB histogram, flattened red-major, L2 normalized.
/// Accumulation and scaling happen in single precision, matching how the
/// training features were stored.
pub fn color_histogram(image: &RgbImage) -> Result<Array1<f64>, Error>
{
    let bin = |value: u8| value as usize * COLOR_BINS_PER_CHANNEL / 256;

    let mut histogram = vec![0f32; COLOR_HISTOGRAM_LENGTH];
    for pixel in image.pixels()
    {
        let [r, g, b] = pixel.0;
        let index = (bin(r) * COLOR_BINS_PER_CHANNEL + bin(g)) * COLOR_BINS_PER_CHANNEL + bin(b);
        histogram[index] += 1.0;
    }

    let norm = histogram.iter().map(|&v| (v as f64).powi(2)).sum::<f64>().sqrt();
    if !norm.is_finite()
    {
        return Err(Error::feature(FeatureStage::Color, "histogram norm is not finite"));
    }
    let scale = if norm > f64::EPSILON { 1.0 / norm } else { 0.0 };

    Ok(histogram.into_iter().map(|v| ((v as f64 * scale) as f32) as f64).collect())
}
