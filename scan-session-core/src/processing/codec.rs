//! Page encoding and decoding.
//!
//! Single images go through the `image` crate. TIFF output, including
//! multi-page documents, is written directly with the `tiff` crate so every
//! page keeps its own dimensions and resolution tags.
//!
//! Multi-page TIFF layout:
//! ```text
//! [header] [IFD 0 + strips: page 1] → [IFD 1 + strips: page 2] → ... → 0
//! ```
use std::io::{Cursor, Seek, Write};

use image::{DynamicImage, ExtendedColorType, ImageFormat};
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::{ResolutionUnit, Tag};

use crate::models::device::OutputFormat;
use crate::models::error::ScanError;
use crate::models::page::{Page, PixelLayout};
use crate::traits::image_processor::ImageProcessor;

/// Default [`ImageProcessor`] backed by the `image` and `tiff` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec;

impl ImageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Decode an encoded artifact back into its pages, in document order.
    ///
    /// Resolution is only recovered from TIFF input; other formats report 0.
    pub fn decode_pages(bytes: &[u8]) -> Result<Vec<Page>, ScanError> {
        if is_tiff(bytes) {
            decode_tiff(bytes)
        } else {
            decode_single(bytes).map(|page| vec![page])
        }
    }
}

impl ImageProcessor for ImageCodec {
    fn encode_single(&self, page: &Page, format: OutputFormat) -> Result<Vec<u8>, ScanError> {
        check_buffer(page, 0)?;

        let image_format = match format {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Pnm => ImageFormat::Pnm,
            OutputFormat::Tiff => return write_tiff(std::slice::from_ref(page)),
        };
        let color = match page.layout {
            PixelLayout::Gray8 => ExtendedColorType::L8,
            PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
        };

        let mut out = Cursor::new(Vec::new());
        image::write_buffer_with_format(
            &mut out,
            &page.data,
            page.width,
            page.height,
            color,
            image_format,
        )
        .map_err(|e| ScanError::AssemblyError(format!("{format} encoding failed: {e}")))?;
        Ok(out.into_inner())
    }

    fn merge_pages(&self, pages: &[Page], format: OutputFormat) -> Result<Vec<u8>, ScanError> {
        if pages.is_empty() {
            return Err(ScanError::AssemblyError("no pages to merge".into()));
        }
        if !format.supports_multipage() {
            return Err(ScanError::AssemblyError(format!(
                "{format} cannot hold {} pages; request tiff for multi-page scans",
                pages.len()
            )));
        }
        for (index, page) in pages.iter().enumerate() {
            check_buffer(page, index)?;
        }
        write_tiff(pages)
    }
}

fn check_buffer(page: &Page, index: usize) -> Result<(), ScanError> {
    if page.is_well_formed() {
        return Ok(());
    }
    Err(ScanError::AssemblyError(format!(
        "corrupt buffer for page {}: {}x{} {:?} needs {} bytes, got {}",
        index + 1,
        page.width,
        page.height,
        page.layout,
        page.expected_len(),
        page.data.len()
    )))
}

fn tiff_error(error: tiff::TiffError) -> ScanError {
    ScanError::AssemblyError(format!("tiff: {error}"))
}

fn write_tiff(pages: &[Page]) -> Result<Vec<u8>, ScanError> {
    let mut out = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut out).map_err(tiff_error)?;
        for page in pages {
            match page.layout {
                PixelLayout::Gray8 => write_tiff_page::<_, colortype::Gray8>(&mut encoder, page)?,
                PixelLayout::Rgb8 => write_tiff_page::<_, colortype::RGB8>(&mut encoder, page)?,
            }
        }
    }
    Ok(out.into_inner())
}

fn write_tiff_page<W, C>(encoder: &mut TiffEncoder<W>, page: &Page) -> Result<(), ScanError>
where
    W: Write + Seek,
    C: colortype::ColorType<Inner = u8>,
{
    let mut image = encoder
        .new_image::<C>(page.width, page.height)
        .map_err(tiff_error)?;
    image.resolution(
        ResolutionUnit::Inch,
        Rational {
            n: page.resolution_dpi.max(1),
            d: 1,
        },
    );
    image.write_data(&page.data).map_err(tiff_error)
}

fn is_tiff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*")
}

fn decode_tiff(bytes: &[u8]) -> Result<Vec<Page>, ScanError> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(tiff_error)?;
    let mut pages = Vec::new();

    loop {
        let (width, height) = decoder.dimensions().map_err(tiff_error)?;
        let layout = match decoder.colortype().map_err(tiff_error)? {
            tiff::ColorType::Gray(8) => PixelLayout::Gray8,
            tiff::ColorType::RGB(8) => PixelLayout::Rgb8,
            other => {
                return Err(ScanError::AssemblyError(format!(
                    "unsupported tiff color type {other:?}"
                )))
            }
        };
        let resolution_dpi = read_dpi(&mut decoder);
        let data = match decoder.read_image().map_err(tiff_error)? {
            DecodingResult::U8(data) => data,
            _ => {
                return Err(ScanError::AssemblyError(
                    "unsupported tiff sample format".into(),
                ))
            }
        };
        pages.push(Page::new(width, height, layout, resolution_dpi, data));

        if !decoder.more_images() {
            break;
        }
        decoder.next_image().map_err(tiff_error)?;
    }

    Ok(pages)
}

fn read_dpi<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> u32 {
    match decoder.find_tag(Tag::XResolution) {
        Ok(Some(Value::Rational(n, d))) if d != 0 => (f64::from(n) / f64::from(d)).round() as u32,
        Ok(Some(Value::Short(dpi))) => u32::from(dpi),
        Ok(Some(Value::Unsigned(dpi))) => dpi,
        _ => 0,
    }
}

fn decode_single(bytes: &[u8]) -> Result<Page, ScanError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ScanError::AssemblyError(format!("decode failed: {e}")))?;
    let page = match image {
        DynamicImage::ImageLuma8(gray) => {
            Page::new(gray.width(), gray.height(), PixelLayout::Gray8, 0, gray.into_raw())
        }
        other if !other.color().has_color() => {
            let gray = other.to_luma8();
            Page::new(gray.width(), gray.height(), PixelLayout::Gray8, 0, gray.into_raw())
        }
        other => {
            let rgb = other.to_rgb8();
            Page::new(rgb.width(), rgb.height(), PixelLayout::Rgb8, 0, rgb.into_raw())
        }
    };
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, layout: PixelLayout, dpi: u32, seed: u8) -> Page {
        let len = width as usize * height as usize * layout.channels();
        let data = (0..len).map(|i| (i as u8).wrapping_add(seed)).collect();
        Page::new(width, height, layout, dpi, data)
    }

    #[test]
    fn png_single_page_is_lossless() {
        let page = gradient(8, 5, PixelLayout::Rgb8, 300, 3);
        let bytes = ImageCodec.encode_single(&page, OutputFormat::Png).unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));

        let decoded = ImageCodec::decode_pages(&bytes).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].data, page.data);
        assert_eq!(decoded[0].layout, PixelLayout::Rgb8);
    }

    #[test]
    fn pnm_keeps_gray_layout() {
        let page = gradient(6, 4, PixelLayout::Gray8, 150, 0);
        let bytes = ImageCodec.encode_single(&page, OutputFormat::Pnm).unwrap();
        assert_eq!(&bytes[..1], b"P");

        let decoded = ImageCodec::decode_pages(&bytes).unwrap();
        assert_eq!(decoded[0].layout, PixelLayout::Gray8);
        assert_eq!((decoded[0].width, decoded[0].height), (6, 4));
    }

    #[test]
    fn jpeg_preserves_dimensions() {
        let page = gradient(16, 9, PixelLayout::Rgb8, 300, 0);
        let bytes = ImageCodec.encode_single(&page, OutputFormat::Jpeg).unwrap();
        let decoded = ImageCodec::decode_pages(&bytes).unwrap();
        assert_eq!((decoded[0].width, decoded[0].height), (16, 9));
    }

    #[test]
    fn single_tiff_page_carries_resolution() {
        let page = gradient(6, 4, PixelLayout::Gray8, 200, 5);
        let bytes = ImageCodec.encode_single(&page, OutputFormat::Tiff).unwrap();
        assert!(is_tiff(&bytes));
        assert_eq!(ImageCodec::decode_pages(&bytes).unwrap(), vec![page]);
    }

    #[test]
    fn tiff_merge_preserves_order_geometry_and_resolution() {
        let pages = vec![
            gradient(10, 12, PixelLayout::Rgb8, 300, 1),
            gradient(7, 3, PixelLayout::Gray8, 150, 2),
            gradient(4, 9, PixelLayout::Rgb8, 600, 3),
        ];
        let bytes = ImageCodec.merge_pages(&pages, OutputFormat::Tiff).unwrap();
        let decoded = ImageCodec::decode_pages(&bytes).unwrap();

        assert_eq!(decoded.len(), 3);
        for (original, round_tripped) in pages.iter().zip(&decoded) {
            assert_eq!(round_tripped, original);
        }
    }

    #[test]
    fn merge_into_single_image_format_fails() {
        let pages = vec![
            gradient(2, 2, PixelLayout::Gray8, 300, 0),
            gradient(2, 2, PixelLayout::Gray8, 300, 1),
        ];
        let err = ImageCodec.merge_pages(&pages, OutputFormat::Png).unwrap_err();
        assert!(matches!(err, ScanError::AssemblyError(_)));
    }

    #[test]
    fn corrupt_buffer_is_rejected() {
        let mut page = gradient(5, 5, PixelLayout::Rgb8, 300, 0);
        page.data.truncate(10);
        assert!(matches!(
            ImageCodec.encode_single(&page, OutputFormat::Png),
            Err(ScanError::AssemblyError(_))
        ));
        assert!(matches!(
            ImageCodec.merge_pages(&[page.clone(), page], OutputFormat::Tiff),
            Err(ScanError::AssemblyError(_))
        ));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(ImageCodec::decode_pages(b"definitely not an image").is_err());
    }
}
