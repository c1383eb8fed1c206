use serde::{Deserialize, Serialize};

/// Pixel layout of a captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// One 8-bit luminance sample per pixel.
    Gray8,
    /// Three interleaved 8-bit samples per pixel.
    Rgb8,
}

impl PixelLayout {
    pub fn channels(&self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb8 => 3,
        }
    }

    pub fn bits_per_pixel(&self) -> u16 {
        self.channels() as u16 * 8
    }
}

/// One captured frame prior to encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub resolution_dpi: u32,
    pub data: Vec<u8>,
}

impl Page {
    pub fn new(width: u32, height: u32, layout: PixelLayout, resolution_dpi: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            layout,
            resolution_dpi,
            data,
        }
    }

    /// Number of bytes a well-formed buffer for this geometry holds.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.channels()
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    pub fn info(&self) -> PageInfo {
        PageInfo {
            width: self.width,
            height: self.height,
            layout: self.layout,
            resolution_dpi: self.resolution_dpi,
        }
    }
}

// Pixel buffers are large; keep them out of debug output.
impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("resolution_dpi", &self.resolution_dpi)
            .field("data_len", &self.data.len())
            .finish()
    }
}

/// Geometry of a page as recorded in an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub resolution_dpi: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_len_accounts_for_channels() {
        let gray = Page::new(4, 3, PixelLayout::Gray8, 300, vec![0; 12]);
        let rgb = Page::new(4, 3, PixelLayout::Rgb8, 300, vec![0; 36]);
        assert!(gray.is_well_formed());
        assert!(rgb.is_well_formed());
        assert_eq!(rgb.layout.bits_per_pixel(), 24);
    }

    #[test]
    fn short_buffer_is_malformed() {
        let page = Page::new(4, 3, PixelLayout::Rgb8, 300, vec![0; 35]);
        assert!(!page.is_well_formed());
    }

    #[test]
    fn empty_geometry_is_malformed() {
        let page = Page::new(0, 3, PixelLayout::Gray8, 300, Vec::new());
        assert!(!page.is_well_formed());
    }
}
