//! 3D MRI nii 文件基础数据结构.

use std::path::Path;

use ndarray::{Array3, ArrayView3, Ix3};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};

use crate::error::{PipelineError, Result};
use crate::Idx3d;

mod modality;
mod patient;

pub use modality::Modality;
pub use patient::PatientRecord;

/// `NiftiHeader` 是栈上大对象, 移动该对象的开销很可观.
/// 因此我们将其分配到堆上.
type BoxedHeader = Box<NiftiHeader>;

/// 3D MRI nii 文件 header 的共用属性.
pub trait NiftiHeaderAttr {
    /// 获取 header 部分.
    fn header(&self) -> &NiftiHeader;

    /// 获取单个体素分辨率. 该分辨率以毫米为单位, 分别代表深度 (相邻切片方向),
    /// 高, 宽.
    #[inline]
    fn pix_dim(&self) -> [f64; 3] {
        let [_, w, h, d, ..] = self.header().pixdim;
        [d as f64, h as f64, w as f64]
    }

    /// 体素分辨率在三个维度上是否是各向同的?
    #[inline]
    fn is_isotropic(&self) -> bool {
        let [d, h, w] = self.pix_dim();
        d == h && d == w
    }

    /// 获取体素的实际体积值, 以立方毫米为单位.
    #[inline]
    fn voxel(&self) -> f64 {
        self.pix_dim().iter().product()
    }
}

/// nii 格式 3D MRI 单模态体数据, 包括 header 和体素强度. 强度以 `f32` 保存,
/// 按 `(depth, height, width)` 访问.
#[derive(Debug, Clone)]
pub struct MriVolume {
    header: BoxedHeader,
    data: Array3<f32>,
}

impl NiftiHeaderAttr for MriVolume {
    #[inline]
    fn header(&self) -> &NiftiHeader {
        &self.header
    }
}

impl MriVolume {
    /// 打开 nii (或 nii.gz) 文件格式的 3D MRI 体数据. `path` 为文件的本地路径.
    ///
    /// 文件不存在时返回 [`PipelineError::MissingVolume`], 其中包含期望的路径.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PipelineError::MissingVolume {
                path: path.to_owned(),
            });
        }
        let obj = ReaderOptions::new().read_file(path)?;
        let header = Box::new(obj.header().clone());

        let data = obj.into_volume().into_ndarray::<f32>()?;
        let shape = data.shape().to_vec();
        let data = data
            .into_dimensionality::<Ix3>()
            .map_err(|_| PipelineError::VolumeShape {
                path: path.to_owned(),
                shape,
            })?;

        // [W, H, D] -> [D, H, W].
        // hint: 原第一维向下增长, 原第二维向右增长.
        let data = data.permuted_axes([2, 1, 0]);
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().into_owned()
        };
        debug_assert!(data.is_standard_layout());

        Ok(Self { header, data })
    }

    /// 由 `(depth, height, width)` 格式的裸数据直接创建体数据. 体素分辨率设为 1 毫米.
    pub fn from_array(data: Array3<f32>) -> Self {
        let mut header = Box::<NiftiHeader>::default();
        let (d, h, w) = data.dim();
        header.dim = [3, w as u16, h as u16, d as u16, 1, 1, 1, 1];
        header.pixdim[1..4].copy_from_slice(&[1.0, 1.0, 1.0]);
        Self { header, data }
    }

    /// 按 nifti 惯用的 `[W, H, D]` 顺序写出到 `path`. 扩展名为 `.nii.gz` 时压缩保存.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let whd = self
            .data
            .view()
            .permuted_axes([2, 1, 0])
            .as_standard_layout()
            .into_owned();
        WriterOptions::new(path.as_ref())
            .reference_header(&self.header)
            .write_nifti(&whd)?;
        Ok(())
    }

    /// 获取数据形状 `(depth, height, width)`.
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 获取切片个数.
    #[inline]
    pub fn len_z(&self) -> usize {
        self.shape().0
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 取出底层数据.
    #[inline]
    pub fn into_data(self) -> Array3<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::{MriVolume, NiftiHeaderAttr};
    use crate::error::PipelineError;
    use ndarray::Array3;

    #[test]
    fn test_open_missing_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nowhere-t1c.nii.gz");
        match MriVolume::open(&path) {
            Err(PipelineError::MissingVolume { path: p }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_save_then_open_keeps_axis_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p-t2w.nii");
        let data = Array3::from_shape_fn((3, 4, 5), |(d, h, w)| (d * 100 + h * 10 + w) as f32);
        let vol = MriVolume::from_array(data.clone());
        assert_eq!(vol.voxel(), 1.0);
        assert!(vol.is_isotropic());
        vol.save(&path).unwrap();

        let back = MriVolume::open(&path).unwrap();
        assert_eq!(back.shape(), (3, 4, 5));
        assert_eq!(back.len_z(), 3);
        assert_eq!(back.data(), data.view());
    }
}
