//! Adapter-owned pixel container.

/// One logical output image: `width * height` pixels of `depth` bytes each,
/// stored row-major, little endian for multi-byte pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    depth: u32,
    pixels: Vec<u8>,
}

impl ImageBuffer {
    /// Zero-filled buffer.
    pub fn new(width: u32, height: u32, depth: u32) -> Self {
        let mut buffer = Self::default();
        buffer.resize(width, height, depth);
        buffer
    }

    /// Change geometry; contents are zeroed.
    pub fn resize(&mut self, width: u32, height: u32, depth: u32) {
        self.width = width;
        self.height = height;
        self.depth = depth;
        self.pixels.clear();
        self.pixels
            .resize(width as usize * height as usize * depth as usize, 0);
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per pixel.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Buffer size in bytes.
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    /// Whether the buffer holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Raw pixel bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixel bytes; the length is fixed by the geometry.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Bytes of row range `[start, end)`.
    pub fn rows(&self, start: u32, end: u32) -> &[u8] {
        let stride = self.width as usize * self.depth as usize;
        let end = end.min(self.height) as usize;
        let start = (start as usize).min(end);
        &self.pixels[start * stride..end * stride]
    }

    /// Mean pixel value; 0.0 for unsupported depths.
    pub fn mean(&self) -> f64 {
        match self.depth {
            1 => {
                if self.pixels.is_empty() {
                    return 0.0;
                }
                let sum: u64 = self.pixels.iter().map(|&v| v as u64).sum();
                sum as f64 / self.pixels.len() as f64
            }
            2 => {
                let count = self.pixels.len() / 2;
                if count == 0 {
                    return 0.0;
                }
                let sum: u64 = self
                    .pixels
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]) as u64)
                    .sum();
                sum as f64 / count as f64
            }
            _ => 0.0,
        }
    }
}
