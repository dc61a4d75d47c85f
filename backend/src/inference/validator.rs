//! Heuristic gate that rejects uploads which are obviously not brain MRI slices.
//!
//! This is a cheap filter, not a classifier. Photos of a bright, textured subject centered on a
//! dark background pass it; some genuine scans with unusual framing are rejected.

use image::{imageops::FilterType, DynamicImage, GrayImage};

use crate::config::ValidatorConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("intensity range too low (near-blank image)")]
    LowContrast,
    #[error("no bright subject centered on a dark background")]
    NotCentered,
    #[error("too little texture (flat or synthetic image)")]
    TooFlat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationReport {
    pub intensity_range: f32,
    pub center_margin: f32,
    pub mean_gradient: f32,
    /// First failing check, in the order contrast, centering, texture.
    pub rejection: Option<Rejection>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.rejection.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct BrainImageValidator {
    config: ValidatorConfig,
}

impl BrainImageValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, image: &DynamicImage) -> bool {
        self.inspect(image).passed()
    }

    pub fn inspect(&self, image: &DynamicImage) -> ValidationReport {
        let gray = self.downsample(image);
        let intensities = Intensities::new(&gray);

        let intensity_range = intensities.range();
        let center_margin = intensities.center_margin();
        let mean_gradient = intensities.mean_gradient();

        let rejection = if intensity_range < self.config.min_intensity_range {
            Some(Rejection::LowContrast)
        } else if center_margin < self.config.min_center_margin {
            Some(Rejection::NotCentered)
        } else if mean_gradient < self.config.min_gradient {
            Some(Rejection::TooFlat)
        } else {
            None
        };

        ValidationReport {
            intensity_range,
            center_margin,
            mean_gradient,
            rejection,
        }
    }

    fn downsample(&self, image: &DynamicImage) -> GrayImage {
        let size = self.config.downsample_size.max(1);
        let gray = image.to_luma8();
        if gray.width() > size || gray.height() > size {
            image::imageops::resize(&gray, size, size, FilterType::Triangle)
        } else {
            gray
        }
    }
}

/// Grayscale pixels scaled to [0, 1], row-major.
struct Intensities {
    values: Vec<f32>,
    width: usize,
    height: usize,
}

impl Intensities {
    fn new(gray: &GrayImage) -> Self {
        Self {
            values: gray.pixels().map(|p| p.0[0] as f32 / 255.0).collect(),
            width: gray.width() as usize,
            height: gray.height() as usize,
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }

    fn range(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let (min, max) = self
            .values
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        max - min
    }

    /// Mean of the middle half minus mean of a frame `side / 8` wide.
    fn center_margin(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        let (w, h) = (self.width, self.height);
        let frame = (w.min(h) / 8).max(1);

        let mut center = (0.0f32, 0usize);
        let mut border = (0.0f32, 0usize);
        for y in 0..h {
            for x in 0..w {
                let v = self.at(x, y);
                if x >= w / 4 && x < w - w / 4 && y >= h / 4 && y < h - h / 4 {
                    center.0 += v;
                    center.1 += 1;
                }
                if x < frame || x >= w.saturating_sub(frame) || y < frame || y >= h.saturating_sub(frame) {
                    border.0 += v;
                    border.1 += 1;
                }
            }
        }

        let mean = |(sum, count): (f32, usize)| if count == 0 { 0.0 } else { sum / count as f32 };
        mean(center) - mean(border)
    }

    fn mean_gradient(&self) -> f32 {
        let (w, h) = (self.width, self.height);

        let mut dx = (0.0f32, 0usize);
        for y in 0..h {
            for x in 1..w {
                dx.0 += (self.at(x, y) - self.at(x - 1, y)).abs();
                dx.1 += 1;
            }
        }

        let mut dy = (0.0f32, 0usize);
        for y in 1..h {
            for x in 0..w {
                dy.0 += (self.at(x, y) - self.at(x, y - 1)).abs();
                dy.1 += 1;
            }
        }

        let mean = |(sum, count): (f32, usize)| if count == 0 { 0.0 } else { sum / count as f32 };
        (mean(dx) + mean(dy)) / 2.0
    }
}
