use crate::error::Error;
use opencv::imgcodecs::{imread, IMREAD_COLOR};
use opencv::prelude::{Mat, MatTraitConst};
use std::path::Path;

pub mod vision;

/// One decoded BGR image, owned by a single protocol turn.
pub struct Frame {
    mat: Mat,
}

impl Frame {
    pub fn open(path: &Path) -> crate::Result<Self> {
        let unreadable = || Error::UnreadableFrame(path.to_path_buf());

        let name = path.to_str().ok_or_else(unreadable)?;
        // imread reports missing and undecodable files alike as an empty Mat.
        let mat = imread(name, IMREAD_COLOR)?;
        if mat.empty() {
            return Err(unreadable());
        }

        Ok(Self { mat })
    }

    pub fn size(&self) -> [u32; 2] {
        [self.mat.cols() as u32, self.mat.rows() as u32]
    }

    pub fn mat(&self) -> &Mat {
        &self.mat
    }
}

impl From<Mat> for Frame {
    fn from(mat: Mat) -> Self {
        Self { mat }
    }
}
