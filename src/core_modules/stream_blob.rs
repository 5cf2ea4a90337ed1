// THEORY:
// The `StreamBlob` is the output of the spatial grouping step. It represents one connected
// patch of foreground pixels in a single frame, summarized by the geometry the segmenter
// filters and ranks on: bounding box, contour area and horizontal center.
//
// Like the pixel and region containers, it is a "dumb" data container with no memory of
// earlier frames. Only one blob per frame survives selection; the rest are reflections,
// rim highlights and drips.

/// A connected foreground component of one frame, in region-local coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBlob {
    /// Discovery index in raster order of the component's first pixel.
    pub id: usize,
    /// Left edge of the bounding box.
    pub x: u32,
    /// Top edge of the bounding box.
    pub y: u32,
    /// Bounding-box width in pixels.
    pub width: u32,
    /// Bounding-box height in pixels.
    pub height: u32,
    /// Area enclosed by the outer contour polygon (through pixel centers).
    pub area: f64,
    /// Number of foreground pixels in the component.
    pub pixel_count: usize,
}

impl StreamBlob {
    /// Horizontal center of the bounding box.
    pub fn center_x(&self) -> f64 {
        self.x as f64 + self.width as f64 / 2.0
    }

    /// Vertical center of the bounding box.
    pub fn center_y(&self) -> f64 {
        self.y as f64 + self.height as f64 / 2.0
    }

    /// Height over width. Tall, thin streams score high.
    pub fn aspect(&self) -> f64 {
        self.height as f64 / (self.width as f64).max(1.0)
    }
}
