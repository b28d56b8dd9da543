//! Ensemble-of-regression-trees shape predictor
//!
//! Reads dlib's `shape_predictor` serialization, raw (`.dat`) or
//! bzip2-compressed (`.dat.bz2`). Shapes are kept in coordinates normalized
//! to the face box and only mapped to image pixels at the end.

use super::LandmarkPredictor;
use crate::{
    alignment::fit_similarity,
    error::{IdPhotoError, Result},
    types::{FaceRect, LandmarkSet},
};
use bzip2::read::BzDecoder;
use image::GrayImage;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Split {
    idx1: usize,
    idx2: usize,
    thresh: f32,
}

/// Complete binary tree: `splits` in breadth-first order, then `splits + 1` leaves
#[derive(Debug, Clone)]
struct RegressionTree {
    splits: Vec<Split>,
    leaves: Vec<Vec<[f32; 2]>>,
}

impl RegressionTree {
    fn leaf_for(&self, features: &[f32]) -> Option<&[[f32; 2]]> {
        let mut node = 0;
        while let Some(split) = self.splits.get(node) {
            let a = features.get(split.idx1).copied().unwrap_or(0.0);
            let b = features.get(split.idx2).copied().unwrap_or(0.0);
            node = if a - b > split.thresh {
                2 * node + 1
            } else {
                2 * node + 2
            };
        }
        self.leaves
            .get(node - self.splits.len())
            .map(Vec::as_slice)
    }
}

/// One cascade level: a forest plus the pixel features it reads
#[derive(Debug, Clone)]
struct CascadeLevel {
    forest: Vec<RegressionTree>,
    anchor_idx: Vec<usize>,
    deltas: Vec<[f32; 2]>,
}

/// dlib-compatible ERT landmark regressor
#[derive(Debug, Clone)]
pub struct ErtShapePredictor {
    initial_shape: Vec<[f32; 2]>,
    cascade: Vec<CascadeLevel>,
}

impl ErtShapePredictor {
    /// Load a model file, decompressing when the extension is `.bz2`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            IdPhotoError::model_error_with_context(
                "open",
                path,
                &e.to_string(),
                &["check models.landmark_model_path"],
            )
        })?;
        let reader = BufReader::new(file);
        let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");

        let model = if is_bz2 {
            Self::from_reader(BzDecoder::new(reader))
        } else {
            Self::from_reader(reader)
        }
        .map_err(|e| {
            IdPhotoError::model_error_with_context(
                "parse",
                path,
                &e.to_string(),
                &["expected a dlib shape_predictor .dat or .dat.bz2"],
            )
        })?;

        log::info!(
            "Loaded shape predictor from {}: {} landmarks, {} cascade levels",
            path.display(),
            model.num_landmarks(),
            model.cascade.len()
        );
        Ok(model)
    }

    /// Parse a serialized model from any reader
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut r = DlibReader::new(reader);

        let version = r.read_int()?;
        if version != 1 {
            return Err(IdPhotoError::model(format!(
                "Unsupported shape_predictor version: {}",
                version
            )));
        }

        let initial_shape = r.read_shape()?;
        let num_landmarks = initial_shape.len();
        if num_landmarks == 0 {
            return Err(IdPhotoError::model("Empty initial shape"));
        }

        let num_levels = r.read_len()?;
        let mut forests = Vec::with_capacity(prealloc(num_levels));
        for _ in 0..num_levels {
            let num_trees = r.read_len()?;
            let mut forest = Vec::with_capacity(prealloc(num_trees));
            for _ in 0..num_trees {
                forest.push(read_tree(&mut r, num_landmarks)?);
            }
            forests.push(forest);
        }

        let anchor_levels = r.read_len()?;
        let mut anchors = Vec::with_capacity(prealloc(anchor_levels));
        for _ in 0..anchor_levels {
            let count = r.read_len()?;
            let mut level = Vec::with_capacity(prealloc(count));
            for _ in 0..count {
                let idx = r.read_len()?;
                if idx >= num_landmarks {
                    return Err(IdPhotoError::model(format!(
                        "Anchor index {} out of range for {} landmarks",
                        idx, num_landmarks
                    )));
                }
                level.push(idx);
            }
            anchors.push(level);
        }

        let delta_levels = r.read_len()?;
        let mut deltas = Vec::with_capacity(prealloc(delta_levels));
        for _ in 0..delta_levels {
            let count = r.read_len()?;
            let mut level = Vec::with_capacity(prealloc(count));
            for _ in 0..count {
                level.push([r.read_float()?, r.read_float()?]);
            }
            deltas.push(level);
        }

        if anchors.len() != forests.len() || deltas.len() != forests.len() {
            return Err(IdPhotoError::model(format!(
                "Cascade mismatch: {} forests, {} anchor sets, {} delta sets",
                forests.len(),
                anchors.len(),
                deltas.len()
            )));
        }

        let cascade = forests
            .into_iter()
            .zip(anchors)
            .zip(deltas)
            .map(|((forest, anchor_idx), deltas)| {
                if anchor_idx.len() != deltas.len() {
                    return Err(IdPhotoError::model(format!(
                        "Feature count mismatch: {} anchors vs {} deltas",
                        anchor_idx.len(),
                        deltas.len()
                    )));
                }
                let features = anchor_idx.len();
                let in_range = forest.iter().all(|tree| {
                    tree.splits
                        .iter()
                        .all(|s| s.idx1 < features && s.idx2 < features)
                });
                if !in_range {
                    return Err(IdPhotoError::model("Split feature index out of range"));
                }
                Ok(CascadeLevel {
                    forest,
                    anchor_idx,
                    deltas,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            initial_shape,
            cascade,
        })
    }

    #[must_use]
    pub fn num_landmarks(&self) -> usize {
        self.initial_shape.len()
    }

    #[must_use]
    pub fn num_cascade_levels(&self) -> usize {
        self.cascade.len()
    }

    /// Run the cascade and return sub-pixel landmark positions in image space
    #[must_use]
    pub fn predict_points(&self, image: &GrayImage, face: &FaceRect) -> Vec<(f32, f32)> {
        let to_image = BoxMapping::new(face);
        let mut current = self.initial_shape.clone();

        for level in &self.cascade {
            let features = self.feature_pixels(image, &to_image, &current, level);
            for tree in &level.forest {
                if let Some(leaf) = tree.leaf_for(&features) {
                    for (point, delta) in current.iter_mut().zip(leaf) {
                        point[0] += delta[0];
                        point[1] += delta[1];
                    }
                }
            }
        }

        current.iter().map(|&p| to_image.apply(p)).collect()
    }

    fn feature_pixels(
        &self,
        image: &GrayImage,
        to_image: &BoxMapping,
        current: &[[f32; 2]],
        level: &CascadeLevel,
    ) -> Vec<f32> {
        // rotation/scale part of the mean-shape -> current-shape similarity
        let (a, b) = fit_similarity(&to_f64(&self.initial_shape), &to_f64(current))
            .map_or((1.0, 0.0), |t| (t.a as f32, t.b as f32));

        level
            .anchor_idx
            .iter()
            .zip(&level.deltas)
            .map(|(&anchor, delta)| {
                let base = current.get(anchor).copied().unwrap_or([0.0, 0.0]);
                let p = [
                    a * delta[0] - b * delta[1] + base[0],
                    b * delta[0] + a * delta[1] + base[1],
                ];
                let [x, y] = to_image.apply_rounded(p);
                if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
                    f32::from(image.get_pixel(x as u32, y as u32).0[0])
                } else {
                    0.0
                }
            })
            .collect()
    }
}

impl LandmarkPredictor for ErtShapePredictor {
    fn predict(&self, image: &GrayImage, face: &FaceRect) -> Result<LandmarkSet> {
        LandmarkSet::from_subpixel(&self.predict_points(image, face))
    }
}

/// Maps normalized box coordinates to pixels: (0,0) is the top-left pixel,
/// (1,1) the bottom-right pixel of the box
struct BoxMapping {
    left: f32,
    top: f32,
    sx: f32,
    sy: f32,
}

impl BoxMapping {
    fn new(face: &FaceRect) -> Self {
        Self {
            left: face.left as f32,
            top: face.top as f32,
            sx: face.width.saturating_sub(1) as f32,
            sy: face.height.saturating_sub(1) as f32,
        }
    }

    fn apply(&self, p: [f32; 2]) -> (f32, f32) {
        (self.left + p[0] * self.sx, self.top + p[1] * self.sy)
    }

    fn apply_rounded(&self, p: [f32; 2]) -> [i64; 2] {
        let (x, y) = self.apply(p);
        [x.round() as i64, y.round() as i64]
    }
}

fn to_f64(points: &[[f32; 2]]) -> Vec<[f64; 2]> {
    points
        .iter()
        .map(|p| [f64::from(p[0]), f64::from(p[1])])
        .collect()
}

/// Cap on up-front allocation for length prefixes read from the model file
const MAX_PREALLOC: usize = 4096;

fn prealloc(len: usize) -> usize {
    len.min(MAX_PREALLOC)
}

fn read_tree<R: Read>(r: &mut DlibReader<R>, num_landmarks: usize) -> Result<RegressionTree> {
    let num_splits = r.read_len()?;
    let mut splits = Vec::with_capacity(prealloc(num_splits));
    for _ in 0..num_splits {
        splits.push(Split {
            idx1: r.read_len()?,
            idx2: r.read_len()?,
            thresh: r.read_float()?,
        });
    }

    let num_leaves = r.read_len()?;
    if num_leaves != num_splits + 1 {
        return Err(IdPhotoError::model(format!(
            "Tree with {} splits has {} leaves",
            num_splits, num_leaves
        )));
    }
    let mut leaves = Vec::with_capacity(prealloc(num_leaves));
    for _ in 0..num_leaves {
        let leaf = r.read_shape()?;
        if leaf.len() != num_landmarks {
            return Err(IdPhotoError::model(format!(
                "Leaf has {} points, expected {}",
                leaf.len(),
                num_landmarks
            )));
        }
        leaves.push(leaf);
    }

    Ok(RegressionTree { splits, leaves })
}

/// dlib varint/float reader.
///
/// Integers: control byte (bit 7 = sign, low nibble = byte count) followed by
/// little-endian magnitude bytes. Floats: `(mantissa, exponent)` integer pair.
struct DlibReader<R: Read> {
    reader: R,
}

impl<R: Read> DlibReader<R> {
    fn new(reader: R) -> Self {
        Self { reader }
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.reader
            .read_exact(&mut buf)
            .map_err(|e| IdPhotoError::model(format!("Truncated model stream: {}", e)))?;
        Ok(buf[0])
    }

    fn read_int(&mut self) -> Result<i64> {
        let control = self.read_byte()?;
        let negative = control & 0x80 != 0;
        let num_bytes = usize::from(control & 0x0F);
        if num_bytes > 8 {
            return Err(IdPhotoError::model(format!(
                "Integer of {} bytes in model stream",
                num_bytes
            )));
        }

        let mut value: u64 = 0;
        for i in 0..num_bytes {
            value |= u64::from(self.read_byte()?) << (8 * i);
        }
        let value = value as i64;
        Ok(if negative { -value } else { value })
    }

    fn read_len(&mut self) -> Result<usize> {
        let value = self.read_int()?;
        usize::try_from(value)
            .map_err(|_| IdPhotoError::model(format!("Expected unsigned value, got {}", value)))
    }

    fn read_float(&mut self) -> Result<f32> {
        let mantissa = self.read_int()?;
        let exponent = self.read_int()?;
        if mantissa == 0 {
            return Ok(0.0);
        }
        let exponent = i32::try_from(exponent)
            .map_err(|_| IdPhotoError::model(format!("Float exponent {} out of range", exponent)))?;
        Ok((mantissa as f64 * 2.0_f64.powi(exponent)) as f32)
    }

    /// Column matrix `(-rows, -cols, x0, y0, x1, y1, ...)` as points
    fn read_shape(&mut self) -> Result<Vec<[f32; 2]>> {
        let rows = self.read_int()?.unsigned_abs() as usize;
        let cols = self.read_int()?.unsigned_abs() as usize;
        if cols != 1 || rows % 2 != 0 {
            return Err(IdPhotoError::model(format!(
                "Invalid shape matrix {}x{}",
                rows, cols
            )));
        }
        let mut points = Vec::with_capacity(prealloc(rows / 2));
        for _ in 0..rows / 2 {
            points.push([self.read_float()?, self.read_float()?]);
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use std::io::Cursor;

    fn write_int(out: &mut Vec<u8>, value: i64) {
        if value == 0 {
            out.push(0);
            return;
        }
        let magnitude = value.unsigned_abs();
        let bytes: Vec<u8> = magnitude
            .to_le_bytes()
            .iter()
            .copied()
            .take(8 - (magnitude.leading_zeros() as usize / 8))
            .collect();
        let sign = if value < 0 { 0x80 } else { 0 };
        out.push(sign | bytes.len() as u8);
        out.extend(bytes);
    }

    /// Exact for values with at most 16 fractional bits
    fn write_float(out: &mut Vec<u8>, value: f32) {
        let mantissa = (f64::from(value) * 65536.0).round() as i64;
        write_int(out, mantissa);
        write_int(out, if mantissa == 0 { 0 } else { -16 });
    }

    fn write_shape(out: &mut Vec<u8>, points: &[[f32; 2]]) {
        write_int(out, -(points.len() as i64 * 2));
        write_int(out, -1);
        for p in points {
            write_float(out, p[0]);
            write_float(out, p[1]);
        }
    }

    fn mean_shape() -> Vec<[f32; 2]> {
        (0..68)
            .map(|i| [0.25 + (i % 8) as f32 * 0.0625, 0.25 + (i / 8) as f32 * 0.0625])
            .collect()
    }

    /// One level, one stump comparing the pixel under landmark 0 with the
    /// pixel under landmark 67. Left leaf shifts every point by +0.125 in x,
    /// right leaf by -0.125.
    fn stump_model() -> Vec<u8> {
        let shape = mean_shape();
        let mut out = Vec::new();
        write_int(&mut out, 1);
        write_shape(&mut out, &shape);

        write_int(&mut out, 1); // levels
        write_int(&mut out, 1); // trees
        write_int(&mut out, 1); // splits
        write_int(&mut out, 0);
        write_int(&mut out, 1);
        write_float(&mut out, 10.0);
        write_int(&mut out, 2); // leaves
        write_shape(&mut out, &vec![[0.125, 0.0]; 68]);
        write_shape(&mut out, &vec![[-0.125, 0.0]; 68]);

        write_int(&mut out, 1);
        write_int(&mut out, 2);
        write_int(&mut out, 0);
        write_int(&mut out, 67);

        write_int(&mut out, 1);
        write_int(&mut out, 2);
        write_float(&mut out, 0.0);
        write_float(&mut out, 0.0);
        write_float(&mut out, 0.0);
        write_float(&mut out, 0.0);
        out
    }

    #[test]
    fn test_varint_and_float_decoding() {
        let mut data = Vec::new();
        for v in [0, 1, 127, 128, 255, 256, -1, -300, 70_000] {
            write_int(&mut data, v);
        }
        write_float(&mut data, 0.5);
        write_float(&mut data, -2.25);

        let mut r = DlibReader::new(Cursor::new(data));
        for v in [0, 1, 127, 128, 255, 256, -1, -300, 70_000] {
            assert_eq!(r.read_int().unwrap(), v);
        }
        assert!((r.read_float().unwrap() - 0.5).abs() < 1e-6);
        assert!((r.read_float().unwrap() + 2.25).abs() < 1e-6);
        assert!(r.read_int().is_err());
    }

    #[test]
    fn test_parse_stump_model() {
        let model = ErtShapePredictor::from_reader(Cursor::new(stump_model())).unwrap();
        assert_eq!(model.num_landmarks(), 68);
        assert_eq!(model.num_cascade_levels(), 1);
    }

    #[test]
    fn test_rejects_bad_version_and_truncation() {
        let mut data = stump_model();
        data[1] = 2;
        assert!(ErtShapePredictor::from_reader(Cursor::new(data)).is_err());

        let data = stump_model();
        let truncated = &data[..data.len() / 2];
        let err = ErtShapePredictor::from_reader(Cursor::new(truncated)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Model);
    }

    #[test]
    fn test_huge_length_prefixes_are_model_errors() {
        let mut data = Vec::new();
        write_int(&mut data, 1);
        write_int(&mut data, -(1_i64 << 62));
        write_int(&mut data, -1);
        let err = ErtShapePredictor::from_reader(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Model);

        let mut data = Vec::new();
        write_int(&mut data, 1);
        write_shape(&mut data, &mean_shape());
        write_int(&mut data, i64::MAX);
        let err = ErtShapePredictor::from_reader(Cursor::new(data)).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Model);
    }

    #[test]
    fn test_tree_walk_follows_pixel_difference() {
        let model = ErtShapePredictor::from_reader(Cursor::new(stump_model())).unwrap();
        let face = FaceRect::new(0, 0, 101, 101);

        // landmark 0 sits at (25, 25), landmark 67 at (43.75, 75)
        let mut bright_first = GrayImage::new(101, 101);
        bright_first.put_pixel(25, 25, Luma([200]));
        let points = model.predict_points(&bright_first, &face);
        assert!((points[0].0 - 37.5).abs() < 1e-3);
        assert!((points[0].1 - 25.0).abs() < 1e-3);

        let dark = GrayImage::new(101, 101);
        let points = model.predict_points(&dark, &face);
        assert!((points[0].0 - 12.5).abs() < 1e-3);

        let landmarks = model.predict(&dark, &face).unwrap();
        assert_eq!(landmarks.points().len(), 68);
    }

    #[test]
    fn test_from_file_bz2() {
        use bzip2::{write::BzEncoder, Compression};
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sp.dat.bz2");
        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&stump_model()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let model = ErtShapePredictor::from_file(&path).unwrap();
        assert_eq!(model.num_landmarks(), 68);

        let err = ErtShapePredictor::from_file(dir.path().join("missing.dat")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Model);
    }
}
