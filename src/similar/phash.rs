// DCT perceptual hash.
//
// 64×64 bilinear downscale, luminance, 2-D DCT-II, keep the top-left 8×8
// low-frequency block, threshold at its median. Bit 63 corresponds to the
// first coefficient.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::DynamicImage;

const SIZE: usize = 64;
const BLOCK: usize = 8;

/// Hash an already-decoded image.
pub fn perception_hash(img: &DynamicImage) -> u64 {
    let resized = image::imageops::resize(&img.to_rgba8(), SIZE as u32, SIZE as u32, FilterType::Triangle);

    let mut pixels = vec![0f64; SIZE * SIZE];
    for (x, y, p) in resized.enumerate_pixels() {
        let [r, g, b, _] = p.0;
        pixels[y as usize * SIZE + x as usize] =
            0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    }

    let dct = dct_2d(&pixels);

    let mut block = Vec::with_capacity(BLOCK * BLOCK);
    for y in 0..BLOCK {
        for x in 0..BLOCK {
            block.push(dct[y * SIZE + x]);
        }
    }

    let mut sorted = block.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let median = sorted[block.len() / 2];

    let n = block.len();
    block
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c > median)
        .fold(0u64, |hash, (i, _)| hash | (1u64 << (n - i - 1)))
}

/// Decode an encoded image (JPEG, PNG or WebP) and hash it.
pub fn hash_bytes(bytes: &[u8]) -> Result<u64> {
    let img = image::load_from_memory(bytes).context("Failed to decode image")?;
    Ok(perception_hash(&img))
}

fn cos_table() -> &'static [f64] {
    static TABLE: OnceLock<Vec<f64>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let n = SIZE as f64;
        let mut t = vec![0f64; SIZE * SIZE];
        for k in 0..SIZE {
            for j in 0..SIZE {
                t[k * SIZE + j] =
                    (std::f64::consts::PI * k as f64 * (2.0 * j as f64 + 1.0) / (2.0 * n)).cos();
            }
        }
        t
    })
}

/// Orthonormal DCT-II of one line.
fn dct_1d(input: &[f64], out: &mut [f64]) {
    let table = cos_table();
    let scale = (2.0 / SIZE as f64).sqrt();
    for (k, o) in out.iter_mut().enumerate() {
        let row = &table[k * SIZE..(k + 1) * SIZE];
        let mut z: f64 = input.iter().zip(row).map(|(v, c)| v * c).sum();
        if k == 0 {
            z *= 0.5f64.sqrt();
        }
        *o = z * scale;
    }
}

/// Row transform then column transform.
fn dct_2d(pixels: &[f64]) -> Vec<f64> {
    let mut rows = vec![0f64; SIZE * SIZE];
    for y in 0..SIZE {
        dct_1d(&pixels[y * SIZE..(y + 1) * SIZE], &mut rows[y * SIZE..(y + 1) * SIZE]);
    }

    let mut out = vec![0f64; SIZE * SIZE];
    let mut column = [0f64; SIZE];
    let mut transformed = [0f64; SIZE];
    for x in 0..SIZE {
        for y in 0..SIZE {
            column[y] = rows[y * SIZE + x];
        }
        dct_1d(&column, &mut transformed);
        for y in 0..SIZE {
            out[y * SIZE + x] = transformed[y];
        }
    }
    out
}
