use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::models::artifact::Artifact;
use crate::models::device::OutputFormat;
use crate::models::error::ScanError;
use crate::models::page::{Page, PageInfo};
use crate::processing::codec::ImageCodec;
use crate::traits::image_processor::ImageProcessor;

/// Turns the frozen page sequence of a session into its artifact.
///
/// Pages are taken by value; they are dropped as soon as the encoder is done
/// with them so a session never holds both raw pages and encoded output.
#[derive(Clone)]
pub struct ArtifactAssembler {
    processor: Arc<dyn ImageProcessor>,
}

impl ArtifactAssembler {
    pub fn new(processor: Arc<dyn ImageProcessor>) -> Self {
        Self { processor }
    }

    pub fn assemble(&self, pages: Vec<Page>, format: OutputFormat) -> Result<Artifact, ScanError> {
        let infos: Vec<PageInfo> = pages.iter().map(Page::info).collect();

        let bytes = match pages.as_slice() {
            [] => return Err(ScanError::AssemblyError("no pages captured".into())),
            [single] => self.processor.encode_single(single, format)?,
            many => self.processor.merge_pages(many, format)?,
        };
        drop(pages);

        if bytes.is_empty() {
            return Err(ScanError::AssemblyError("encoder produced no output".into()));
        }

        let checksum = hex_encode(&Sha256::digest(&bytes));
        Ok(Artifact {
            bytes,
            format,
            pages: infos,
            checksum,
            created_at: Utc::now(),
        })
    }
}

impl Default for ArtifactAssembler {
    fn default() -> Self {
        Self::new(Arc::new(ImageCodec::new()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::page::PixelLayout;

    fn page(width: u32, height: u32, dpi: u32) -> Page {
        let len = (width * height * 3) as usize;
        Page::new(width, height, PixelLayout::Rgb8, dpi, vec![0x7f; len])
    }

    struct EmptyOutput;

    impl ImageProcessor for EmptyOutput {
        fn encode_single(&self, _page: &Page, _format: OutputFormat) -> Result<Vec<u8>, ScanError> {
            Ok(Vec::new())
        }

        fn merge_pages(&self, _pages: &[Page], _format: OutputFormat) -> Result<Vec<u8>, ScanError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn single_page_is_encoded_directly() {
        let artifact = ArtifactAssembler::default()
            .assemble(vec![page(4, 4, 300)], OutputFormat::Png)
            .unwrap();

        assert_eq!(artifact.page_count(), 1);
        assert_eq!(artifact.content_type(), "image/png");
        assert_eq!(artifact.checksum.len(), 64);
        assert_eq!(artifact.checksum, hex_encode(&Sha256::digest(&artifact.bytes)));
    }

    #[test]
    fn multiple_pages_become_one_document() {
        let pages = vec![page(4, 4, 300), page(6, 2, 150), page(3, 3, 75)];
        let artifact = ArtifactAssembler::default()
            .assemble(pages, OutputFormat::Tiff)
            .unwrap();

        assert_eq!(artifact.page_count(), 3);
        assert_eq!(artifact.pages[1].width, 6);
        assert_eq!(artifact.pages[2].resolution_dpi, 75);
        assert_eq!(artifact.content_type(), "image/tiff");
    }

    #[test]
    fn unsupported_merge_fails_without_output() {
        let err = ArtifactAssembler::default()
            .assemble(vec![page(2, 2, 300), page(2, 2, 300)], OutputFormat::Jpeg)
            .unwrap_err();
        assert!(matches!(err, ScanError::AssemblyError(_)));
    }

    #[test]
    fn no_pages_is_an_assembly_error() {
        let err = ArtifactAssembler::default()
            .assemble(Vec::new(), OutputFormat::Png)
            .unwrap_err();
        assert!(matches!(err, ScanError::AssemblyError(_)));
    }

    #[test]
    fn empty_encoder_output_is_rejected() {
        let assembler = ArtifactAssembler::new(Arc::new(EmptyOutput));
        assert!(assembler
            .assemble(vec![page(2, 2, 300)], OutputFormat::Png)
            .is_err());
    }
}
