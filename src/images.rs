use anyhow::{Context, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use rayon::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::document::write_info;
use crate::layout::{compute_layout, compute_margin_fit, FitMode, LayoutResult, PageSize};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "bmp", "gif"];

/// how each image is placed on its page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Mode(FitMode),
    /// fixed 40pt inset on the constraining side, see [`compute_margin_fit`]
    MarginFit,
}

impl Default for Placement {
    fn default() -> Self {
        Placement::Mode(FitMode::default())
    }
}

impl Placement {
    pub fn layout(
        self,
        image_width: u32,
        image_height: u32,
        page_size: PageSize,
    ) -> crate::Result<LayoutResult> {
        match self {
            Placement::Mode(mode) => {
                compute_layout(image_width as f64, image_height as f64, page_size, mode)
            }
            Placement::MarginFit => {
                let (pw, ph) = page_size.dimensions_pt();
                compute_margin_fit(pw, ph, image_width as f64 / image_height as f64)
            }
        }
    }

    /// drawn rectangle may leave the page and must be clipped
    fn overflows(self) -> bool {
        self == Placement::Mode(FitMode::Fill)
    }
}

/// options collected from the command line for one images-to-PDF run
#[derive(Debug, Clone, Default)]
pub struct ImagesOptions {
    pub page_size: PageSize,
    pub placement: Placement,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// expand dirs and glob patterns in the input list into image files;
/// dir contents and glob matches are sorted, explicit files keep their place
pub fn expand_image_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let is_image = |p: &Path| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    };
    let mut result = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("Cannot read directory: {}", path.display()))?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| is_image(p))
                .collect();
            entries.sort();
            anyhow::ensure!(
                !entries.is_empty(),
                "No image files found in {}",
                path.display()
            );
            result.extend(entries);
        } else if !path.exists() && path.to_str().is_some_and(|s| s.contains(['*', '?', '['])) {
            let pattern = path.to_str().unwrap_or_default();
            let mut matches: Vec<PathBuf> = glob::glob(pattern)
                .with_context(|| format!("Invalid glob pattern: {}", pattern))?
                .filter_map(|e| e.ok())
                .filter(|p| p.is_file() && is_image(p))
                .collect();
            matches.sort();
            anyhow::ensure!(!matches.is_empty(), "No image files match {}", pattern);
            result.extend(matches);
        } else {
            result.push(path.clone());
        }
    }
    Ok(result)
}

/// what the SOF and APP14 markers say about a JPEG
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegInfo {
    pub width: u32,
    pub height: u32,
    pub components: u8,
    /// Adobe APP14 color transform, if the marker is present
    pub adobe_transform: Option<u8>,
}

/// walk JPEG markers up to the first SOF
pub fn parse_jpeg_header(data: &[u8]) -> Result<JpegInfo> {
    anyhow::ensure!(
        data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8,
        "Not a valid JPEG file"
    );
    let mut adobe_transform = None;
    let mut pos = 2;
    while pos + 4 < data.len() {
        if data[pos] != 0xFF {
            anyhow::bail!("Invalid JPEG marker at offset {}", pos);
        }
        let marker = data[pos + 1];
        // fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        // standalone markers carry no length
        if marker == 0x00 || (0xD0..=0xD9).contains(&marker) {
            pos += 2;
            continue;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let segment = data.get(pos + 4..pos + 2 + len).unwrap_or_default();
        if marker == 0xEE && segment.len() >= 12 && segment.starts_with(b"Adobe") {
            adobe_transform = Some(segment[11]);
        }
        // SOF0-3, SOF5-7, SOF9-11, SOF13-15 (C4, C8, CC are not frames)
        if matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF) {
            anyhow::ensure!(pos + 2 + len <= data.len() && len >= 8, "Truncated SOF");
            return Ok(JpegInfo {
                height: u16::from_be_bytes([data[pos + 5], data[pos + 6]]) as u32,
                width: u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as u32,
                components: data[pos + 9],
                adobe_transform,
            });
        }
        pos += 2 + len;
    }
    anyhow::bail!("No SOF marker found in JPEG")
}

/// image data ready to become a PDF image XObject
enum PreparedImage {
    /// embedded as-is with DCTDecode
    Jpeg { info: JpegInfo, data: Vec<u8> },
    /// decoded samples, deflate compressed
    Decoded {
        width: u32,
        height: u32,
        color_channels: u8,
        color: Vec<u8>,
        alpha: Option<Vec<u8>>,
    },
}

impl PreparedImage {
    fn dimensions(&self) -> (u32, u32) {
        match self {
            PreparedImage::Jpeg { info, .. } => (info.width, info.height),
            PreparedImage::Decoded { width, height, .. } => (*width, *height),
        }
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::fast());
    enc.write_all(data)?;
    Ok(enc.finish()?)
}

fn prepare_image(path: &Path) -> Result<PreparedImage> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    anyhow::ensure!(data.len() >= 4, "File too small: {}", path.display());

    if data[0] == 0xFF && data[1] == 0xD8 {
        let info = parse_jpeg_header(&data)
            .with_context(|| format!("Failed to parse JPEG header: {}", path.display()))?;
        anyhow::ensure!(
            matches!(info.components, 1 | 3 | 4),
            "Unsupported JPEG component count {} in {}",
            info.components,
            path.display()
        );
        anyhow::ensure!(
            info.width > 0 && info.height > 0,
            "JPEG has no size: {}",
            path.display()
        );
        debug!(path = %path.display(), width = info.width, height = info.height, "jpeg passthrough");
        return Ok(PreparedImage::Jpeg { info, data });
    }

    use image::GenericImageView;
    let img = image::load_from_memory(&data)
        .with_context(|| format!("Failed to decode image: {}", path.display()))?;
    let (width, height) = img.dimensions();
    debug!(path = %path.display(), width, height, color = ?img.color(), "decoded");

    let prepared = if img.color().has_alpha() {
        let rgba = img.into_rgba8();
        let pixel_count = (width as usize) * (height as usize);
        let mut color = Vec::with_capacity(pixel_count * 3);
        let mut alpha = Vec::with_capacity(pixel_count);
        for px in rgba.as_raw().chunks_exact(4) {
            color.extend_from_slice(&px[..3]);
            alpha.push(px[3]);
        }
        PreparedImage::Decoded {
            width,
            height,
            color_channels: 3,
            color: deflate(&color)?,
            alpha: Some(deflate(&alpha)?),
        }
    } else if img.color().channel_count() == 1 {
        PreparedImage::Decoded {
            width,
            height,
            color_channels: 1,
            color: deflate(img.into_luma8().as_raw())?,
            alpha: None,
        }
    } else {
        PreparedImage::Decoded {
            width,
            height,
            color_channels: 3,
            color: deflate(img.into_rgb8().as_raw())?,
            alpha: None,
        }
    };
    Ok(prepared)
}

fn image_stream(width: u32, height: u32, color_space: &str, filter: &str, data: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => filter,
        },
        data,
    )
}

fn add_image(doc: &mut Document, img: PreparedImage) -> lopdf::ObjectId {
    match img {
        PreparedImage::Jpeg { info, data } => {
            let color_space = match info.components {
                1 => "DeviceGray",
                4 => "DeviceCMYK",
                _ => "DeviceRGB",
            };
            let mut stream = image_stream(info.width, info.height, color_space, "DCTDecode", data);
            // Adobe CMYK JPEGs store inverted values unless transform is 0
            if info.components == 4 && info.adobe_transform != Some(0) {
                stream.dict.set(
                    "Decode",
                    vec![1.into(), 0.into(), 1.into(), 0.into(), 1.into(), 0.into(), 1.into(), 0.into()],
                );
            }
            doc.add_object(stream)
        }
        PreparedImage::Decoded {
            width,
            height,
            color_channels,
            color,
            alpha,
        } => {
            let color_space = if color_channels == 1 { "DeviceGray" } else { "DeviceRGB" };
            let mut stream = image_stream(width, height, color_space, "FlateDecode", color);
            if let Some(alpha) = alpha {
                let smask_id =
                    doc.add_object(image_stream(width, height, "DeviceGray", "FlateDecode", alpha));
                stream.dict.set("SMask", smask_id);
            }
            doc.add_object(stream)
        }
    }
}

/// content stream drawing image XObject `Im0` into `layout`, clipped to the
/// page when the placement can overflow it
fn page_content(layout: &LayoutResult, page_w: f64, page_h: f64, clip: bool) -> Content {
    let mut operations = vec![Operation::new("q", vec![])];
    if clip {
        operations.extend([
            Operation::new(
                "re",
                vec![0.into(), 0.into(), Object::Real(page_w as f32), Object::Real(page_h as f32)],
            ),
            Operation::new("W", vec![]),
            Operation::new("n", vec![]),
        ]);
    }
    operations.extend([
        Operation::new(
            "cm",
            vec![
                Object::Real(layout.draw_width as f32),
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(layout.draw_height as f32),
                Object::Real(layout.x as f32),
                Object::Real(layout.y as f32),
            ],
        ),
        Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
        Operation::new("Q", vec![]),
    ]);
    Content { operations }
}

/// build a PDF with one page per image, pages in `images` order
pub fn images_to_pdf(images: &[PathBuf], options: &ImagesOptions) -> Result<Document> {
    anyhow::ensure!(!images.is_empty(), "No input images provided");
    info!(
        "Placing {} image(s) on {} pages ({:?})",
        images.len(),
        options.page_size,
        options.placement
    );

    // decode in parallel, assemble in order
    let prepared: Vec<Result<PreparedImage>> =
        images.par_iter().map(|path| prepare_image(path)).collect();

    let (page_w, page_h) = options.page_size.dimensions_pt();
    let media_box: Vec<Object> = vec![
        0.into(),
        0.into(),
        Object::Real(page_w as f32),
        Object::Real(page_h as f32),
    ];

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut page_ids: Vec<Object> = Vec::with_capacity(images.len());

    for (i, (result, path)) in prepared.into_iter().zip(images).enumerate() {
        let img = result?;
        let (width, height) = img.dimensions();
        let layout = options
            .placement
            .layout(width, height, options.page_size)
            .with_context(|| format!("Cannot place {}", path.display()))?;
        debug!(?layout, "page {}", i + 1);

        let image_id = add_image(&mut doc, img);
        let content = page_content(&layout, page_w, page_h, options.placement.overflows());
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().context("Failed to encode content stream")?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box.clone(),
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    "Im0" => image_id,
                },
            },
        });
        page_ids.push(page_id.into());
        info!("  [{}/{}] {}", i + 1, images.len(), path.display());
    }

    let count = page_ids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    write_info(&mut doc, options.title.as_deref(), options.author.as_deref());
    Ok(doc)
}
