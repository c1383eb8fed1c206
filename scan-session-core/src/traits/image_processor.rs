use crate::models::device::OutputFormat;
use crate::models::error::ScanError;
use crate::models::page::Page;

/// Encoding backend used by the artifact assembler.
///
/// Default implementation is `ImageCodec` (`image` + `tiff` crates).
/// Calls run on the blocking thread pool and may take a while for large pages.
pub trait ImageProcessor: Send + Sync {
    /// Encode a single page into `format`.
    fn encode_single(&self, page: &Page, format: OutputFormat) -> Result<Vec<u8>, ScanError>;

    /// Merge pages, in order, into one paginated document.
    fn merge_pages(&self, pages: &[Page], format: OutputFormat) -> Result<Vec<u8>, ScanError>;
}
