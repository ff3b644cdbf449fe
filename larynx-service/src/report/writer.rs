//! Multi-page PDF output.
//!
//! Each page carries a single JPEG image XObject drawn into its placement
//! box. Pages are appended in order and serialized once at the end.

use std::io::Write;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageEncoder};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};

use super::layout::{PageBox, PageSpec};
use crate::error::ReportError;

const POINTS_PER_MM: f64 = 72.0 / 25.4;

/// A JPEG-encoded raster with its placement on the page
#[derive(Debug, Clone)]
pub struct EncodedPage {
    pub jpeg: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub placement: PageBox,
}

/// Destination for rendered pages, in page order
pub trait PageSink {
    fn push_page(&mut self, page: EncodedPage) -> Result<(), ReportError>;

    fn page_count(&self) -> usize;
}

/// Encode a raster as baseline JPEG at the given quality (1-100).
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ReportError> {
    let rgb = image.to_rgb8();
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(buffer)
}

/// Builds the output PDF
pub struct ReportWriter {
    document: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
    page: PageSpec,
}

impl ReportWriter {
    pub fn new(page: PageSpec) -> Self {
        let mut document = Document::with_version("1.5");
        let pages_id = document.new_object_id();
        Self {
            document,
            pages_id,
            kids: Vec::new(),
            page,
        }
    }

    /// Serialize the document.
    pub fn finish(self) -> Result<Vec<u8>, ReportError> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    /// Serialize the document into `target`.
    pub fn write_to<W: Write>(mut self, target: &mut W) -> Result<(), ReportError> {
        let count = self.kids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => self.kids,
            "Count" => Object::Integer(count),
        };
        self.document
            .objects
            .insert(self.pages_id, Object::Dictionary(pages));

        let catalog_id = self.document.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.document.trailer.set("Root", catalog_id);

        self.document.save_to(target)?;
        Ok(())
    }

    fn page_points(&self) -> (f32, f32) {
        (
            (self.page.width_mm * POINTS_PER_MM) as f32,
            (self.page.height_mm * POINTS_PER_MM) as f32,
        )
    }
}

impl PageSink for ReportWriter {
    fn push_page(&mut self, page: EncodedPage) -> Result<(), ReportError> {
        let image_id = self.document.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => Object::Integer(page.width_px as i64),
                "Height" => Object::Integer(page.height_px as i64),
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => Object::Integer(8),
                "Filter" => "DCTDecode",
            },
            page.jpeg,
        ));

        // PDF user space starts at the bottom-left corner.
        let placement = page.placement;
        let width = (placement.width * POINTS_PER_MM) as f32;
        let height = (placement.height * POINTS_PER_MM) as f32;
        let left = (placement.x * POINTS_PER_MM) as f32;
        let bottom =
            ((self.page.height_mm - placement.y - placement.height) * POINTS_PER_MM) as f32;

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(width),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(height),
                        Object::Real(left),
                        Object::Real(bottom),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = self
            .document
            .add_object(Stream::new(dictionary! {}, content.encode()?));

        let (page_width, page_height) = self.page_points();
        let page_id = self.document.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_width),
                Object::Real(page_height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        self.kids.push(Object::Reference(page_id));
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.kids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::layout::fit_to_page;
    use image::{Rgb, RgbImage};

    fn encoded_page(width: u32, height: u32) -> EncodedPage {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 30, 30])));
        EncodedPage {
            jpeg: encode_jpeg(&image, 90).unwrap(),
            width_px: width,
            height_px: height,
            placement: fit_to_page(width, height, 96.0, &PageSpec::A4).unwrap(),
        }
    }

    #[test]
    fn test_encode_jpeg_produces_decodable_image() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([0, 128, 255])));
        let jpeg = encode_jpeg(&image, 92).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
    }

    #[test]
    fn test_written_document_has_one_page_per_push() {
        let mut writer = ReportWriter::new(PageSpec::A4);
        writer.push_page(encoded_page(100, 50)).unwrap();
        writer.push_page(encoded_page(30, 90)).unwrap();
        writer.push_page(encoded_page(64, 64)).unwrap();
        assert_eq!(writer.page_count(), 3);

        let bytes = writer.finish().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.5"));
        let parsed = Document::load_mem(&bytes).unwrap();
        assert_eq!(parsed.get_pages().len(), 3);
    }

    #[test]
    fn test_pages_use_a4_media_box() {
        let mut writer = ReportWriter::new(PageSpec::A4);
        writer.push_page(encoded_page(100, 50)).unwrap();
        let parsed = Document::load_mem(&writer.finish().unwrap()).unwrap();

        let (_, page_id) = parsed.get_pages().into_iter().next().unwrap();
        let page = parsed.get_dictionary(page_id).unwrap();
        let media_box = page.get(b"MediaBox").unwrap().as_array().unwrap();
        let width = media_box[2].as_float().unwrap();
        let height = media_box[3].as_float().unwrap();
        assert!((width - 595.28).abs() < 0.01);
        assert!((height - 841.89).abs() < 0.01);
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure_propagates() {
        let mut writer = ReportWriter::new(PageSpec::A4);
        writer.push_page(encoded_page(20, 20)).unwrap();

        let result = writer.write_to(&mut FailingWriter);
        assert!(matches!(result, Err(ReportError::Io(_))));
    }

    #[test]
    fn test_empty_writer_still_serializes() {
        let bytes = ReportWriter::new(PageSpec::A4).finish().unwrap();
        let parsed = Document::load_mem(&bytes).unwrap();
        assert!(parsed.get_pages().is_empty());
    }
}
