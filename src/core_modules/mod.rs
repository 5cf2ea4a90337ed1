pub mod blob_detector;
pub mod classifier;
pub mod cv_bridge;
pub mod features;
pub mod kymograph;
pub mod mask;
pub mod optical_flow;
pub mod pixel;
pub mod region;
pub mod segmenter;
pub mod stream_blob;
pub mod timeline;
