// THEORY (single-pixel conversions):
// The `Pixel` module is the most fundamental unit of the engine. It is a "dumb" data
// container for one RGB pixel plus the two single-pixel transforms the segmenter needs:
// - Grayscale luma (Rec. 601), the input of dense optical flow and of the column
//   intensities that feed the kymograph.
// - 8-bit HSV, in the convention the color gate is written in: hue 0..180 (degrees
//   halved so it fits a byte), saturation and value 0..255.
//
// Anything that needs another pixel (motion, neighbors, masks) belongs in higher modules.

pub type Channel = u8;
pub type Luma = u8;

/// A "dumb" data container representing a single RGB pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
}

/// Hue/saturation/value triple in the 8-bit convention (H: 0..180, S, V: 0..255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Hsv {
    pub hue: u8,
    pub saturation: u8,
    pub value: u8,
}

impl Pixel {
    pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
        Self { red, green, blue }
    }

    /// Luminance estimate (Rec. 601 luma), rounded to the nearest byte.
    pub fn luma(&self) -> Luma {
        let y = 0.299_f32 * self.red as f32
            + 0.587_f32 * self.green as f32
            + 0.114_f32 * self.blue as f32;
        y.round().clamp(0.0, 255.0) as Luma
    }

    /// 8-bit HSV conversion.
    ///
    /// - Value is the maximum channel.
    /// - Saturation is chroma scaled by 255/value (0 for black).
    /// - Hue is the color-wheel angle in degrees, halved and rounded into 0..180.
    pub fn hsv(&self) -> Hsv {
        let r = self.red as f32;
        let g = self.green as f32;
        let b = self.blue as f32;
        let maximum_channel = r.max(g.max(b));
        let minimum_channel = r.min(g.min(b));
        let chroma = maximum_channel - minimum_channel;

        let saturation = if maximum_channel > 0.0 {
            (chroma * 255.0 / maximum_channel).round()
        } else {
            0.0
        };

        let hue = if chroma <= 0.0 {
            0.0
        } else {
            let (base_difference, sector_offset) = if maximum_channel == r {
                (g - b, 0.0)
            } else if maximum_channel == g {
                (b - r, 120.0)
            } else {
                (r - g, 240.0)
            };
            let mut hue_degrees = 60.0 * base_difference / chroma + sector_offset;
            if hue_degrees < 0.0 {
                hue_degrees += 360.0;
            }
            let halved = (hue_degrees / 2.0).round();
            if halved >= 180.0 { halved - 180.0 } else { halved }
        };

        Hsv {
            hue: hue as u8,
            saturation: saturation as u8,
            value: maximum_channel as u8,
        }
    }
}

impl From<image::Rgb<u8>> for Pixel {
    fn from(rgb: image::Rgb<u8>) -> Self {
        let [red, green, blue] = rgb.0;
        Pixel::new(red, green, blue)
    }
}

impl Hsv {
    /// True when every channel lies inside the inclusive bounds.
    pub fn in_range(&self, lower: Hsv, upper: Hsv) -> bool {
        (lower.hue..=upper.hue).contains(&self.hue)
            && (lower.saturation..=upper.saturation).contains(&self.saturation)
            && (lower.value..=upper.value).contains(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_colors_map_to_halved_hue() {
        assert_eq!(Pixel::new(255, 0, 0).hsv(), Hsv { hue: 0, saturation: 255, value: 255 });
        assert_eq!(Pixel::new(0, 255, 0).hsv().hue, 60);
        assert_eq!(Pixel::new(0, 0, 255).hsv().hue, 120);
    }

    #[test]
    fn espresso_brown_falls_in_amber_band() {
        // A typical crema/espresso tone.
        let hsv = Pixel::new(150, 90, 40).hsv();
        assert!((5..=30).contains(&hsv.hue), "hue {}", hsv.hue);
        assert!(hsv.saturation > 40);
        assert_eq!(hsv.value, 150);
    }

    #[test]
    fn gray_pixels_have_no_hue_or_saturation() {
        let hsv = Pixel::new(120, 120, 120).hsv();
        assert_eq!(hsv, Hsv { hue: 0, saturation: 0, value: 120 });
        assert_eq!(Pixel::new(120, 120, 120).luma(), 120);
    }

    #[test]
    fn luma_uses_rec601_weights() {
        assert_eq!(Pixel::new(255, 255, 255).luma(), 255);
        assert_eq!(Pixel::new(0, 0, 0).luma(), 0);
        assert_eq!(Pixel::new(255, 0, 0).luma(), 76);
    }
}
