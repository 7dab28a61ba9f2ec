//! 合成的体模 subject. 用于没有真实数据集时的实验.

use ndarray::{Array3, Ix3};
use patch_berry::consts::gray;
use patch_berry::{Fields, Image, Subject};

/// 体模形状 (D, H, W).
pub const SHAPE: (usize, usize, usize) = (40, 96, 96);

/// 第 `k` 个体模: 椭球形 GTV, 以及与之相关的 PET/CT 强度.
pub fn subject(k: usize) -> Subject<Ix3> {
    let (d, h, w) = SHAPE;
    let c = (
        d as f32 / 2.0 + (k % 3) as f32 * 2.0,
        h as f32 / 2.0 - (k % 5) as f32 * 3.0,
        w as f32 / 2.0 + (k % 7) as f32 * 2.0,
    );
    let r = (6.0 + (k % 4) as f32, 12.0 + (k % 3) as f32 * 4.0, 10.0 + (k % 5) as f32 * 2.0);

    let label = Array3::from_shape_fn(SHAPE, |(z, y, x)| {
        let q = ((z as f32 - c.0) / r.0).powi(2)
            + ((y as f32 - c.1) / r.1).powi(2)
            + ((x as f32 - c.2) / r.2).powi(2);
        if q <= 1.0 {
            gray::GTV
        } else {
            gray::BACKGROUND
        }
    });
    let pet = label.mapv(|v| if gray::is_gtv(v) { 8.5 } else { 1.0 });
    let ct = Array3::from_shape_fn(SHAPE, |(z, y, x)| ((z + y + x + k) % 64) as f32 - 32.0);

    Subject::new(
        format!("phantom-{k:03}"),
        Fields::new(Image::Separate { pet, ct }, Some(label)),
    )
    .expect("phantom volumes share one shape")
}
