// THEORY:
// The engine keeps its frames, regions and masks as `image` buffers; OpenCV only does the
// two jobs it is best at here (dense flow and morphology). This module copies 8-bit gray
// buffers into single-channel `Mat`s and back. Both directions copy, so no `Mat` ever
// borrows memory owned by an `image` buffer.

use image::GrayImage;
use opencv::{
    core::{self, Mat, Scalar},
    prelude::*,
};

/// Copies an 8-bit gray image into a freshly allocated `CV_8UC1` `Mat`.
pub fn gray_to_mat(image: &GrayImage) -> opencv::Result<Mat> {
    let mut mat = Mat::new_rows_cols_with_default(
        image.height() as i32,
        image.width() as i32,
        core::CV_8UC1,
        Scalar::all(0.0),
    )?;
    mat.data_bytes_mut()?.copy_from_slice(image.as_raw());
    Ok(mat)
}

/// Copies a continuous `CV_8UC1` `Mat` back into a gray image.
pub fn mat_to_gray(mat: &Mat) -> opencv::Result<GrayImage> {
    let bytes = mat.data_bytes()?.to_vec();
    GrayImage::from_raw(mat.cols() as u32, mat.rows() as u32, bytes).ok_or_else(|| {
        opencv::Error::new(core::StsUnmatchedSizes, "Mat data does not match its dimensions")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn gray_buffers_survive_the_trip() {
        let gray = GrayImage::from_fn(7, 3, |x, y| Luma([(x * 30 + y) as u8]));
        let mat = gray_to_mat(&gray).unwrap();
        assert_eq!((mat.cols(), mat.rows()), (7, 3));
        assert_eq!(*mat.at_2d::<u8>(2, 4).unwrap(), 122);
        assert_eq!(mat_to_gray(&mat).unwrap(), gray);
    }
}
