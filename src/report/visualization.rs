use image::{GrayImage, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{ElaResult, Region, TemplateMatchResult};

/// Renders ELA heatmaps and match outlines for human review.
pub struct Visualizer {
    overlay_opacity: f32,
    border_thickness: u32,
}

impl Visualizer {
    pub fn new() -> Self {
        Self {
            overlay_opacity: 0.5,
            border_thickness: 2,
        }
    }

    pub fn create_heatmap(&self, gray: &GrayImage) -> RgbImage {
        let (width, height) = gray.dimensions();
        let mut heatmap = RgbImage::new(width, height);

        for (x, y, pixel) in gray.enumerate_pixels() {
            let intensity = pixel[0] as f32 / 255.0;
            heatmap.put_pixel(x, y, heat_color(intensity));
        }

        heatmap
    }

    pub fn overlay_heatmap(&self, original: &RgbImage, heatmap: &RgbImage) -> RgbImage {
        let (width, height) = original.dimensions();
        let alpha = self.overlay_opacity.clamp(0.0, 1.0);

        RgbImage::from_fn(width, height, |x, y| {
            let orig = original.get_pixel(x, y);
            let heat = heatmap.get_pixel(
                x.min(heatmap.width().saturating_sub(1)),
                y.min(heatmap.height().saturating_sub(1)),
            );

            Rgb([
                ((1.0 - alpha) * orig[0] as f32 + alpha * heat[0] as f32) as u8,
                ((1.0 - alpha) * orig[1] as f32 + alpha * heat[1] as f32) as u8,
                ((1.0 - alpha) * orig[2] as f32 + alpha * heat[2] as f32) as u8,
            ])
        })
    }

    /// Heatmap blended over the document with suspicious blocks outlined in red.
    pub fn visualize_ela(&self, original: &RgbImage, ela: &ElaResult) -> RgbImage {
        let heatmap = self.create_heatmap(&ela.heatmap);
        let mut vis = self.overlay_heatmap(original, &heatmap);

        for region in &ela.suspicious_regions {
            self.draw_region_border(&mut vis, region, Rgb([255, 0, 0]));
        }

        vis
    }

    /// Outlines the matched template region: green when it agrees with the
    /// reference, orange when it does not.
    pub fn mark_template(&self, image: &mut RgbImage, result: &TemplateMatchResult) {
        let color = if result.similarity >= 0.5 {
            Rgb([0, 200, 0])
        } else {
            Rgb([255, 140, 0])
        };
        self.draw_region_border(image, &result.aligned_region, color);
    }

    fn draw_region_border(&self, image: &mut RgbImage, region: &Region, color: Rgb<u8>) {
        if region.width == 0 || region.height == 0 {
            return;
        }

        for t in 0..self.border_thickness {
            let rect = Rect::at(region.x as i32 - t as i32, region.y as i32 - t as i32)
                .of_size(region.width + 2 * t, region.height + 2 * t);
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Blue to cyan to green to yellow to red ramp over [0, 1].
fn heat_color(intensity: f32) -> Rgb<u8> {
    let intensity = intensity.clamp(0.0, 1.0);

    let (r, g, b) = if intensity < 0.25 {
        let t = intensity / 0.25;
        (0.0, t, 1.0)
    } else if intensity < 0.5 {
        let t = (intensity - 0.25) / 0.25;
        (0.0, 1.0, 1.0 - t)
    } else if intensity < 0.75 {
        let t = (intensity - 0.5) / 0.25;
        (t, 1.0, 0.0)
    } else {
        let t = (intensity - 0.75) / 0.25;
        (1.0, 1.0 - t, 0.0)
    };

    Rgb([(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8])
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn heatmap_keeps_dimensions_and_maps_extremes() {
        let gray = GrayImage::from_fn(4, 2, |x, _| Luma([if x == 0 { 0 } else { 255 }]));
        let heat = Visualizer::new().create_heatmap(&gray);

        assert_eq!(heat.dimensions(), (4, 2));
        assert_eq!(*heat.get_pixel(0, 0), Rgb([0, 0, 255]));
        assert_eq!(*heat.get_pixel(3, 1), Rgb([255, 0, 0]));
    }

    #[test]
    fn template_outline_is_drawn_on_region_edge() {
        let mut image = RgbImage::new(20, 20);
        let result = TemplateMatchResult::new(
            0.9,
            Region {
                x: 5,
                y: 5,
                width: 8,
                height: 8,
            },
            None,
            false,
        );

        Visualizer::new().mark_template(&mut image, &result);

        assert_eq!(*image.get_pixel(5, 5), Rgb([0, 200, 0]));
        assert_eq!(*image.get_pixel(8, 8), Rgb([0, 0, 0]));
    }

    #[test]
    fn ela_view_outlines_suspicious_regions_in_red() {
        let ela = ElaResult {
            heatmap: GrayImage::new(32, 32),
            score: 0.4,
            hot_pixel_ratio: 0.1,
            max_difference: 12.0,
            mean_difference: 1.5,
            suspicious_regions: vec![Region {
                x: 8,
                y: 8,
                width: 16,
                height: 16,
            }],
        };
        let original = RgbImage::from_pixel(32, 32, Rgb([200, 200, 200]));

        let vis = Visualizer::new().visualize_ela(&original, &ela);

        assert_eq!(vis.dimensions(), (32, 32));
        assert_eq!(*vis.get_pixel(8, 8), Rgb([255, 0, 0]));
        assert_eq!(*vis.get_pixel(7, 12), Rgb([255, 0, 0]));
        assert_ne!(*vis.get_pixel(16, 16), Rgb([255, 0, 0]));
    }
}
