use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// BraTS 病人目录下的一个序列 (模态) 文件.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Modality {
    /// 分割掩码. 核心管线不使用.
    Seg,
    /// T1 增强.
    T1c,
    /// T1 平扫.
    T1n,
    /// T2 加权.
    T2w,
    /// T2 FLAIR.
    T2f,
}

impl Modality {
    /// 拼接顺序. 平面拼接时依次为左上, 右上, 左下, 右下; 通道拼接时依次为通道 0..4.
    ///
    /// 下游的损失和指标按该位置索引模态, 不可改变.
    pub const INPUTS: [Modality; 4] = [Self::T1c, Self::T1n, Self::T2w, Self::T2f];

    /// 文件名中的模态标记.
    #[inline]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Seg => "seg",
            Self::T1c => "t1c",
            Self::T1n => "t1n",
            Self::T2w => "t2w",
            Self::T2f => "t2f",
        }
    }

    /// 在 [`Self::INPUTS`] 中的位置. `Seg` 不参与拼接, 返回 `None`.
    #[inline]
    pub const fn position(self) -> Option<usize> {
        match self {
            Self::Seg => None,
            Self::T1c => Some(0),
            Self::T1n => Some(1),
            Self::T2w => Some(2),
            Self::T2f => Some(3),
        }
    }

    /// 日志与报表中使用的名字.
    #[inline]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Seg => "Seg",
            Self::T1c => "T1c",
            Self::T1n => "T1n",
            Self::T2w => "T2w",
            Self::T2f => "T2f",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Modality {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seg" => Ok(Self::Seg),
            "t1c" => Ok(Self::T1c),
            "t1n" => Ok(Self::T1n),
            "t2w" => Ok(Self::T2w),
            "t2f" => Ok(Self::T2f),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown modality `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Modality;

    #[test]
    fn test_inputs_order_and_position() {
        for (i, m) in Modality::INPUTS.into_iter().enumerate() {
            assert_eq!(m.position(), Some(i));
            assert_eq!(m.tag().parse::<Modality>().unwrap(), m);
        }
        assert_eq!(Modality::Seg.position(), None);
        assert!("flair".parse::<Modality>().is_err());
    }
}
