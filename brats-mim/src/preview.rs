//! 重建结果的可视化存储.
//!
//! 归一化后的体素值位于 `[0, 1]`, 按 `v * 255` 映射为 8-bit 灰度.

use std::path::Path;

use image::{GrayImage, Luma};
use ndarray::{ArrayView2, ArrayViewD, Axis, ErrorKind, ShapeError};

use crate::error::Result;
use crate::preprocess::{modality_region, ConcatMethod, NORM_RANGE};

/// 把 `[0, 1]` 内的值映射为灰度. 超出范围的值被截断.
#[inline]
pub(crate) fn gray(v: f32) -> u8 {
    let (lo, hi) = NORM_RANGE;
    let t = (v.clamp(lo, hi) - lo) / (hi - lo);
    (t * 255.0).round() as u8
}

/// 将若干个同样大小的 2D 切片从左到右拼接后保存到 `path`.
pub fn save_row<P: AsRef<Path>>(panels: &[ArrayView2<'_, f32>], path: P) -> Result<()> {
    let Some(first) = panels.first() else {
        return Ok(());
    };
    let (height, width) = first.dim();
    if panels.iter().any(|p| p.dim() != (height, width)) {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
    }

    let mut buf = GrayImage::new((width * panels.len()) as u32, height as u32);
    for (i, panel) in panels.iter().enumerate() {
        for ((h, w), &v) in panel.indexed_iter() {
            buf.put_pixel((i * width + w) as u32, h as u32, Luma([gray(v)]));
        }
    }
    buf.save(path.as_ref())?;
    Ok(())
}

/// 把一个切片的拼接布局展开成 2D 图像. 平面布局原样返回, 通道布局按象限重新排列.
pub fn unfold_slice(slice: ArrayViewD<'_, f32>, method: ConcatMethod) -> Result<ndarray::Array2<f32>> {
    match method {
        ConcatMethod::Plane => Ok(squeeze_2d(slice)?.to_owned()),
        ConcatMethod::Channels => {
            let regions = (0..4)
                .map(|slot| squeeze_2d(modality_region(slice.view(), method, slot)))
                .collect::<Result<Vec<_>>>()?;
            let top = ndarray::concatenate(Axis(1), &[regions[0], regions[1]])?;
            let bottom = ndarray::concatenate(Axis(1), &[regions[2], regions[3]])?;
            Ok(ndarray::concatenate(Axis(0), &[top.view(), bottom.view()])?)
        }
    }
}

/// 去掉长度为 1 的前导轴, 得到 2D 视图.
fn squeeze_2d(mut view: ArrayViewD<'_, f32>) -> Result<ArrayView2<'_, f32>> {
    while view.ndim() > 2 && view.len_of(Axis(0)) == 1 {
        view = view.index_axis_move(Axis(0), 0);
    }
    Ok(view.into_dimensionality()?)
}

/// 保存一组 (遮蔽输入 | 原始 | 重建) 的对比图. 三者为同一切片, 末尾轴符合拼接布局.
pub fn save_triplet<P: AsRef<Path>>(
    masked: ArrayViewD<'_, f32>,
    original: ArrayViewD<'_, f32>,
    output: ArrayViewD<'_, f32>,
    method: ConcatMethod,
    path: P,
) -> Result<()> {
    let masked = unfold_slice(masked, method)?;
    let original = unfold_slice(original, method)?;
    let output = unfold_slice(output, method)?;
    save_row(&[masked.view(), original.view(), output.view()], path)
}

#[cfg(test)]
mod tests {
    use super::{gray, save_row, save_triplet, unfold_slice};
    use crate::error::PipelineError;
    use crate::preprocess::ConcatMethod;
    use ndarray::{Array2, ArrayD, IxDyn};

    #[test]
    fn test_gray_mapping() {
        assert_eq!(gray(0.0), 0);
        assert_eq!(gray(1.0), 255);
        assert_eq!(gray(2.0), 255);
        assert_eq!(gray(-1.0), 0);
    }

    #[test]
    fn test_unfold_channels_into_quadrants() {
        let slice = ArrayD::from_shape_fn(IxDyn(&[1, 4, 2, 2]), |i| i[1] as f32);
        let plane = unfold_slice(slice.view(), ConcatMethod::Channels).unwrap();
        assert_eq!(plane.dim(), (4, 4));
        assert_eq!(plane[[0, 3]], 1.0);
        assert_eq!(plane[[3, 0]], 2.0);
        assert_eq!(plane[[3, 3]], 3.0);
    }

    #[test]
    fn test_save_triplet_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let slice = ArrayD::<f32>::from_elem(IxDyn(&[1, 8, 8]), 0.5);
        save_triplet(slice.view(), slice.view(), slice.view(), ConcatMethod::Plane, &path).unwrap();
        let img = image::open(&path).unwrap().to_luma8();
        assert_eq!(img.dimensions(), (24, 8));
        assert_eq!(img.get_pixel(10, 3).0, [128]);
    }

    #[test]
    fn test_save_row_rejects_mismatched_panels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("row.png");
        let a = Array2::<f32>::zeros((8, 8));
        let b = Array2::<f32>::zeros((8, 6));
        let err = save_row(&[a.view(), b.view()], &path).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));
        assert!(!path.exists());
    }
}
