//! Background replacement and variant encoding

use crate::{
    config::{BackgroundPolicy, CompositingConfig, OutputVariant},
    error::Result,
    mask,
    services::ImageIOService,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, RgbImage};
use std::collections::BTreeMap;

/// Turns the inpainted canvas into the delivered variants
#[derive(Debug, Clone)]
pub struct Compositor {
    config: CompositingConfig,
}

impl Compositor {
    #[must_use]
    pub fn new(config: CompositingConfig) -> Self {
        Self { config }
    }

    /// Foreground mask derived from the template, `None` for pass-through
    #[must_use]
    pub fn foreground_mask(&self, template: &DynamicImage) -> Option<GrayImage> {
        match self.config.background_policy {
            BackgroundPolicy::PassThrough => None,
            BackgroundPolicy::AlphaMatte if template.color().has_alpha() => {
                Some(mask::binarize(&mask::alpha_channel(&template.to_rgba8())))
            },
            BackgroundPolicy::AlphaMatte => {
                log::debug!("Template has no alpha channel, using corner color key");
                Some(self.color_key(template))
            },
            BackgroundPolicy::ColorKey => Some(self.color_key(template)),
        }
    }

    fn color_key(&self, template: &DynamicImage) -> GrayImage {
        mask::color_key_mask(&template.to_rgb8(), self.config.color_key_threshold)
    }

    /// Resize the inpainted image to the canvas when the collaborator
    /// returned a different size
    #[must_use]
    pub fn fit_to_canvas(inpainted: RgbImage, canvas: (u32, u32)) -> RgbImage {
        if inpainted.dimensions() == canvas {
            return inpainted;
        }
        log::warn!(
            "Inpainted image is {}x{}, resizing to canvas {}x{}",
            inpainted.width(),
            inpainted.height(),
            canvas.0,
            canvas.1
        );
        image::imageops::resize(&inpainted, canvas.0, canvas.1, FilterType::Triangle)
    }

    /// Composite `inpainted` over a solid `background` using the template mask
    pub fn compose(
        &self,
        inpainted: &RgbImage,
        foreground: Option<&GrayImage>,
        background: [u8; 3],
    ) -> Result<RgbImage> {
        match foreground {
            Some(fg) => mask::composite_over_color(inpainted, background, fg),
            None => Ok(inpainted.clone()),
        }
    }

    /// Produce one data URI per variant, keyed by variant name
    pub fn render_variants(
        &self,
        inpainted: RgbImage,
        template: &DynamicImage,
        variants: &[OutputVariant],
    ) -> Result<BTreeMap<String, String>> {
        let canvas = (template.width(), template.height());
        let inpainted = Self::fit_to_canvas(inpainted, canvas);
        let foreground = self.foreground_mask(template);

        let mut results = BTreeMap::new();
        for variant in variants {
            let composed = self.compose(&inpainted, foreground.as_ref(), variant.background)?;
            let bytes = ImageIOService::encode(
                &DynamicImage::ImageRgb8(composed),
                variant.format,
                variant.jpeg_quality,
            )?;
            results.insert(
                variant.name.clone(),
                ImageIOService::to_data_uri(&bytes, variant.format),
            );
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputFormat;
    use image::{GenericImageView, Rgb, Rgba, RgbaImage};

    fn inpainted() -> RgbImage {
        RgbImage::from_pixel(10, 10, Rgb([10, 20, 30]))
    }

    fn rgba_template() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 100])
            }
        }))
    }

    fn rgb_template() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgb([255, 255, 255])
            } else {
                Rgb([40, 40, 40])
            }
        }))
    }

    #[test]
    fn test_alpha_matte_uses_template_alpha() {
        let compositor = Compositor::new(CompositingConfig::default());
        let fg = compositor.foreground_mask(&rgba_template()).unwrap();
        let out = compositor.compose(&inpainted(), Some(&fg), [255, 0, 0]).unwrap();
        assert_eq!(out.get_pixel(2, 2).0, [10, 20, 30]);
        assert_eq!(out.get_pixel(7, 2).0, [255, 0, 0]);
    }

    #[test]
    fn test_alpha_matte_falls_back_to_color_key() {
        let compositor = Compositor::new(CompositingConfig::default());
        let fg = compositor.foreground_mask(&rgb_template()).unwrap();
        assert_eq!(fg.get_pixel(2, 2).0[0], 0);
        assert_eq!(fg.get_pixel(7, 2).0[0], 255);
    }

    #[test]
    fn test_color_key_ignores_alpha() {
        let compositor = Compositor::new(CompositingConfig {
            background_policy: BackgroundPolicy::ColorKey,
            ..CompositingConfig::default()
        });
        // corner of the RGBA template is black; every pixel matches it
        let fg = compositor.foreground_mask(&rgba_template()).unwrap();
        assert_eq!(mask::coverage(&fg), 0);
    }

    #[test]
    fn test_pass_through() {
        let compositor = Compositor::new(CompositingConfig {
            background_policy: BackgroundPolicy::PassThrough,
            ..CompositingConfig::default()
        });
        assert!(compositor.foreground_mask(&rgb_template()).is_none());
        let out = compositor.compose(&inpainted(), None, [0, 0, 0]).unwrap();
        assert_eq!(out, inpainted());
    }

    #[test]
    fn test_render_variants_resizes_and_encodes() {
        let compositor = Compositor::new(CompositingConfig::default());
        let variants = vec![
            OutputVariant::white_background(),
            OutputVariant {
                name: "blue".to_string(),
                background: [67, 142, 219],
                format: OutputFormat::Png,
                jpeg_quality: 90,
            },
        ];
        let small = RgbImage::from_pixel(5, 5, Rgb([10, 20, 30]));

        let results = compositor
            .render_variants(small, &rgb_template(), &variants)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results["id_photo_white_background"].starts_with("data:image/jpeg;base64,"));

        let (_, bytes) = ImageIOService::from_data_uri(&results["blue"]).unwrap();
        let decoded = ImageIOService::load_from_bytes(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (10, 10));
        assert_eq!(decoded.to_rgb8().get_pixel(1, 1).0, [67, 142, 219]);
    }
}
