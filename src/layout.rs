//! Page geometry for placing one image on one page.
//!
//! All arithmetic is done in `f64` so results match existing output
//! coordinate for coordinate.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// share of the limiting page dimension used by [`FitMode::Fit`]
const FIT_SCALE: f64 = 0.8;
/// share of the covering scale used by [`FitMode::Fill`]
const FILL_SCALE: f64 = 0.9;
/// share of each page dimension used by [`FitMode::Stretch`]
const STRETCH_SCALE: f64 = 0.9;
/// per-side inset of [`FitMode::Stretch`], as a share of the page dimension
const STRETCH_INSET: f64 = 0.05;
/// absolute inset, in points, removed from the constraining dimension by margin-fit
pub const MARGIN_PT: f64 = 40.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageSize {
    /// 8.5" x 11"
    #[default]
    Letter,
    /// 8.5" x 14"
    Legal,
    /// 210mm x 297mm
    A4,
}

impl PageSize {
    pub const ALL: [PageSize; 3] = [PageSize::Letter, PageSize::Legal, PageSize::A4];

    pub fn dimensions_pt(self) -> (f64, f64) {
        match self {
            PageSize::Letter => (612.0, 792.0),
            PageSize::Legal => (612.0, 1008.0),
            PageSize::A4 => (595.0, 842.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageSize::Letter => "letter",
            PageSize::Legal => "legal",
            PageSize::A4 => "a4",
        }
    }
}

impl fmt::Display for PageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PageSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "letter" => Ok(PageSize::Letter),
            "legal" => Ok(PageSize::Legal),
            "a4" => Ok(PageSize::A4),
            other => Err(Error::InvalidInput(format!("unknown page size: {other}"))),
        }
    }
}

/// how an image is scaled into the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// keep aspect ratio, whole image visible, 20% margin
    #[default]
    Fit,
    /// keep aspect ratio, cover the page, excess is cropped
    Fill,
    /// ignore aspect ratio, fill 90% of the page
    Stretch,
}

impl FitMode {
    pub const ALL: [FitMode; 3] = [FitMode::Fit, FitMode::Fill, FitMode::Stretch];

    pub fn name(self) -> &'static str {
        match self {
            FitMode::Fit => "fit",
            FitMode::Fill => "fill",
            FitMode::Stretch => "stretch",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fit" => Ok(FitMode::Fit),
            "fill" => Ok(FitMode::Fill),
            "stretch" => Ok(FitMode::Stretch),
            other => Err(Error::InvalidInput(format!("unknown fit mode: {other}"))),
        }
    }
}

/// rectangle the image is drawn into, in page points (origin bottom left)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutResult {
    pub draw_width: f64,
    pub draw_height: f64,
    pub x: f64,
    pub y: f64,
}

impl LayoutResult {
    fn centered(page_w: f64, page_h: f64, draw_width: f64, draw_height: f64) -> Self {
        LayoutResult {
            draw_width,
            draw_height,
            x: (page_w - draw_width) / 2.0,
            y: (page_h - draw_height) / 2.0,
        }
    }

    /// true if the drawn rectangle lies inside `[0,page_w] x [0,page_h]`
    pub fn within(&self, page_w: f64, page_h: f64) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.draw_width <= page_w
            && self.y + self.draw_height <= page_h
    }
}

fn ensure_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

/// place an image of intrinsic size `image_width` x `image_height` on a
/// `page_size` page according to `fit_mode`
///
/// `Fill` may produce negative offsets; the caller clips to the page.
pub fn compute_layout(
    image_width: f64,
    image_height: f64,
    page_size: PageSize,
    fit_mode: FitMode,
) -> Result<LayoutResult> {
    ensure_positive("image width", image_width)?;
    ensure_positive("image height", image_height)?;

    let (pw, ph) = page_size.dimensions_pt();
    let layout = match fit_mode {
        FitMode::Fit => {
            let scale = (pw / image_width).min(ph / image_height) * FIT_SCALE;
            LayoutResult::centered(pw, ph, image_width * scale, image_height * scale)
        }
        FitMode::Fill => {
            let scale = (pw / image_width).max(ph / image_height) * FILL_SCALE;
            LayoutResult::centered(pw, ph, image_width * scale, image_height * scale)
        }
        FitMode::Stretch => LayoutResult {
            draw_width: pw * STRETCH_SCALE,
            draw_height: ph * STRETCH_SCALE,
            x: pw * STRETCH_INSET,
            y: ph * STRETCH_INSET,
        },
    };
    Ok(layout)
}

/// margin-fit: scale to the constraining page dimension minus [`MARGIN_PT`],
/// keeping `image_aspect_ratio` (width / height), centred
pub fn compute_margin_fit(
    page_width: f64,
    page_height: f64,
    image_aspect_ratio: f64,
) -> Result<LayoutResult> {
    ensure_positive("image aspect ratio", image_aspect_ratio)?;
    for (name, value) in [("page width", page_width), ("page height", page_height)] {
        if !(value.is_finite() && value > MARGIN_PT) {
            return Err(Error::InvalidInput(format!(
                "{name} must exceed the {MARGIN_PT}pt margin, got {value}"
            )));
        }
    }

    let page_aspect_ratio = page_width / page_height;
    let (w, h) = if image_aspect_ratio > page_aspect_ratio {
        let w = page_width - MARGIN_PT;
        (w, w / image_aspect_ratio)
    } else {
        let h = page_height - MARGIN_PT;
        (h * image_aspect_ratio, h)
    };
    Ok(LayoutResult::centered(page_width, page_height, w, h))
}
