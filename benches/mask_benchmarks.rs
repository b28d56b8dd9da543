use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use idphoto_composer::{
    backends::test_utils::{canonical_landmarks, MockSegmentationBackend},
    config::{InpaintAssetConfig, MattingConfig},
    mask, AlignmentEstimator, FaceRect, HeadExtractor, InpaintAssetBuilder, SegmentationMask,
};
use image::{GrayImage, Luma, Rgba, RgbaImage};

const SIZES: [(u32, u32); 3] = [(600, 800), (1200, 1600), (2400, 3200)];

fn size_label((w, h): (u32, u32)) -> String {
    format!("{}x{}", w, h)
}

fn neck_mask(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let inside = x > width * 3 / 8 && x < width * 5 / 8 && y > height * 3 / 10;
        Luma([if inside { 255 } else { 0 }])
    })
}

fn bench_mask_arithmetic(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_arithmetic");
    group.sample_size(20);

    for size in SIZES {
        let long_neck = neck_mask(size.0, size.1);
        let head = HeadExtractor::head_mask(&MockSegmentationBackend::labels_for(size.0, size.1));
        let builder = InpaintAssetBuilder::new(InpaintAssetConfig::default());

        group.bench_with_input(BenchmarkId::new("region_mask", size_label(size)), &size, |b, _| {
            b.iter(|| builder.region_mask(black_box(&long_neck), black_box(&head)));
        });
        group.bench_with_input(BenchmarkId::new("dilate_5x4", size_label(size)), &size, |b, _| {
            b.iter(|| mask::dilate_square(black_box(&head), 5, 4));
        });
        group.bench_with_input(BenchmarkId::new("feather", size_label(size)), &size, |b, _| {
            b.iter(|| mask::feather(black_box(&head), 2.6));
        });
    }
    group.finish();
}

fn bench_head_matting(c: &mut Criterion) {
    let mut group = c.benchmark_group("head_matting");
    group.sample_size(10);

    let extractor = HeadExtractor::new(MattingConfig::default());
    for size in SIZES {
        let labels = MockSegmentationBackend::labels_for(size.0, size.1);
        let Ok(segmentation) = SegmentationMask::from_labels(labels) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("soft_alpha", size_label(size)), &size, |b, _| {
            b.iter(|| extractor.alpha(black_box(&segmentation)));
        });
    }
    group.finish();
}

fn bench_warp(c: &mut Criterion) {
    let mut group = c.benchmark_group("alignment_warp");
    group.sample_size(10);

    let estimator = AlignmentEstimator::default();
    for size in SIZES {
        let (w, h) = size;
        let head = RgbaImage::from_pixel(w, h, Rgba([200, 160, 140, 255]));
        let (Ok(source), Ok(target)) = (
            canonical_landmarks(&FaceRect::new((w / 3) as i32, (h / 8) as i32, w / 3, h / 3)),
            canonical_landmarks(&FaceRect::new((w / 4) as i32, (h / 10) as i32, w / 2, h / 2)),
        ) else {
            continue;
        };
        let Ok(transform) = estimator.estimate(&source, &target) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("warp_to_canvas", size_label(size)), &size, |b, _| {
            b.iter(|| estimator.warp_to_canvas(black_box(&head), &transform, size));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_mask_arithmetic, bench_head_matting, bench_warp);
criterion_main!(benches);
