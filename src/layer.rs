// ============================================================================
// LAYER: owned RGBA8 raster buffer plus per-layer state
// ============================================================================

use image::{Rgba, RgbaImage};

/// Per-layer blend function applied before source-over compositing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    Difference,
    Additive,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::Difference,
            BlendMode::Additive,
        ]
    }

    /// Stable lowercase name stored in project files.
    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::Difference => "difference",
            BlendMode::Additive => "additive",
        }
    }

    /// Reconstruct from a stored name (defaults to Normal for unknown values)
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "multiply" => BlendMode::Multiply,
            "screen" => BlendMode::Screen,
            "overlay" => BlendMode::Overlay,
            "darken" => BlendMode::Darken,
            "lighten" => BlendMode::Lighten,
            "difference" => BlendMode::Difference,
            "additive" => BlendMode::Additive,
            _ => BlendMode::Normal,
        }
    }

    /// Mix a normalized source channel with the destination channel.
    /// The result is what source-over then lays down with the source alpha.
    #[inline]
    pub fn apply(&self, src: f32, dst: f32) -> f32 {
        match self {
            BlendMode::Normal => src,
            BlendMode::Multiply => src * dst,
            BlendMode::Screen => 1.0 - (1.0 - src) * (1.0 - dst),
            BlendMode::Overlay => {
                if dst < 0.5 {
                    2.0 * src * dst
                } else {
                    1.0 - 2.0 * (1.0 - src) * (1.0 - dst)
                }
            }
            BlendMode::Darken => src.min(dst),
            BlendMode::Lighten => src.max(dst),
            BlendMode::Difference => (src - dst).abs(),
            BlendMode::Additive => (src + dst).min(1.0),
        }
    }
}

/// One raster layer. Pixels are tightly packed RGBA8, row-major, top-left origin.
#[derive(Clone, Debug)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    /// Offset of this layer's origin inside the document, in pixels.
    pub position: (i32, i32),
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    /// Bumped whenever `pixels` is replaced by a new allocation. Display
    /// surfaces wrapping the buffer must be rebuilt when it changes.
    storage_generation: u64,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&fill_color.0);
        }

        Self {
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            position: (0, 0),
            width,
            height,
            pixels,
            storage_generation: 0,
        }
    }

    /// Build a layer from interleaved 8-bit samples.
    ///
    /// * 1 channel: gray replicated into RGB, alpha 255
    /// * 3 channels: RGB, alpha forced to 255
    /// * 4 channels: RGBA, copied as-is
    ///
    /// Returns `None` for other channel counts or a length mismatch.
    pub fn from_raw(name: String, width: u32, height: u32, channels: u8, data: &[u8]) -> Option<Self> {
        let count = width as usize * height as usize;
        if data.len() != count * channels as usize {
            return None;
        }
        let pixels = match channels {
            4 => data.to_vec(),
            3 => {
                let mut rgba = Vec::with_capacity(count * 4);
                for px in data.chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                rgba
            }
            1 => {
                let mut rgba = Vec::with_capacity(count * 4);
                for &v in data {
                    rgba.extend_from_slice(&[v, v, v, 255]);
                }
                rgba
            }
            _ => return None,
        };

        Some(Self {
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            position: (0, 0),
            width,
            height,
            pixels,
            storage_generation: 0,
        })
    }

    pub fn from_rgba_image(name: String, img: RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            name,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            position: (0, 0),
            width,
            height,
            pixels: img.into_raw(),
            storage_generation: 0,
        }
    }

    /// Copy the pixels out as an `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        // Length is an invariant of the layer, so this cannot fail.
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(height, width)`, matching the document's shape convention.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    pub fn storage_generation(&self) -> u64 {
        self.storage_generation
    }

    /// Raw RGBA bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Unchecked fast path for drawing tools: writes go straight into the
    /// layer's memory with no masking or bounds clamping.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Swap in a new pixel allocation of the given size.
    pub(crate) fn replace_storage(&mut self, width: u32, height: u32, pixels: Vec<u8>) {
        debug_assert_eq!(pixels.len(), width as usize * height as usize * 4);
        self.width = width;
        self.height = height;
        self.pixels = pixels;
        self.storage_generation = self.storage_generation.wrapping_add(1);
    }

    #[inline]
    pub(crate) fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Option<Rgba<u8>> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.offset(x, y);
        Some(Rgba([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]))
    }

    /// Write one pixel; out-of-bounds writes are ignored.
    pub fn put_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.offset(x, y);
        self.pixels[i..i + 4].copy_from_slice(&color.0);
    }

    pub fn fill(&mut self, color: Rgba<u8>) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color.0);
        }
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn toggle_visibility(&mut self) {
        self.visible = !self.visible;
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_layer_is_filled() {
        let layer = Layer::new("Background".into(), 3, 2, Rgba([10, 20, 30, 40]));
        assert_eq!(layer.pixels().len(), 3 * 2 * 4);
        assert_eq!(layer.dimensions(), (2, 3));
        assert!(layer.pixels().chunks_exact(4).all(|p| p == [10, 20, 30, 40]));
    }

    #[test]
    fn zero_sized_layer_is_empty() {
        let layer = Layer::new("Empty".into(), 0, 0, Rgba([1, 2, 3, 4]));
        assert!(layer.is_empty());
        assert_eq!(layer.get_pixel(0, 0), None);
    }

    #[test]
    fn rgb_source_is_promoted_to_opaque_rgba() {
        let rgb = [1u8, 2, 3, 4, 5, 6];
        let layer = Layer::from_raw("rgb".into(), 2, 1, 3, &rgb).unwrap();
        assert_eq!(layer.pixels(), &[1, 2, 3, 255, 4, 5, 6, 255]);
    }

    #[test]
    fn gray_source_is_replicated() {
        let layer = Layer::from_raw("gray".into(), 1, 1, 1, &[77]).unwrap();
        assert_eq!(layer.get_pixel(0, 0), Some(Rgba([77, 77, 77, 255])));
    }

    #[test]
    fn from_raw_rejects_bad_lengths() {
        assert!(Layer::from_raw("bad".into(), 2, 2, 4, &[0; 15]).is_none());
        assert!(Layer::from_raw("bad".into(), 1, 1, 2, &[0; 2]).is_none());
    }

    #[test]
    fn put_pixel_out_of_bounds_is_ignored() {
        let mut layer = Layer::new("L".into(), 2, 2, Rgba([0, 0, 0, 0]));
        layer.put_pixel(5, 5, Rgba([255, 255, 255, 255]));
        assert!(layer.pixels().iter().all(|&b| b == 0));
        layer.put_pixel(1, 1, Rgba([9, 9, 9, 9]));
        assert_eq!(layer.get_pixel(1, 1), Some(Rgba([9, 9, 9, 9])));
    }

    #[test]
    fn blend_mode_names_round_trip() {
        for mode in BlendMode::all() {
            assert_eq!(BlendMode::from_name(mode.name()), *mode);
        }
        assert_eq!(BlendMode::from_name("no-such-mode"), BlendMode::Normal);
    }

    #[test]
    fn opacity_is_clamped() {
        let mut layer = Layer::new("L".into(), 1, 1, Rgba([0, 0, 0, 0]));
        layer.set_opacity(3.0);
        assert_eq!(layer.opacity, 1.0);
        layer.set_opacity(-1.0);
        assert_eq!(layer.opacity, 0.0);
    }
}
