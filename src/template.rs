//! Template bundles on disk
//!
//! Layout under the templates root:
//!
//! ```text
//! <template_id>/
//!   template.png            target canvas, optional foreground alpha
//!   landmark_template.json  68 [x, y] integer pairs
//!   template_no_head.png    template with the head removed
//!   long_neck_mask.png      generous neck/collar region
//! ```

use crate::{
    error::{IdPhotoError, Result},
    landmarks::LandmarkLocator,
    types::LandmarkSet,
};
use image::{DynamicImage, GrayImage, RgbaImage};
use std::path::{Path, PathBuf};

pub const TEMPLATE_IMAGE: &str = "template.png";
pub const TEMPLATE_LANDMARKS: &str = "landmark_template.json";
pub const HEAD_REMOVED_IMAGE: &str = "template_no_head.png";
pub const LONG_NECK_MASK: &str = "long_neck_mask.png";

/// Every asset of one template, loaded and validated
#[derive(Debug, Clone)]
pub struct TemplateBundle {
    pub id: String,
    pub template: DynamicImage,
    pub landmarks: LandmarkSet,
    pub head_removed: RgbaImage,
    pub long_neck: GrayImage,
}

impl TemplateBundle {
    #[must_use]
    pub fn canvas_size(&self) -> (u32, u32) {
        (self.template.width(), self.template.height())
    }
}

/// Filesystem-backed template repository
#[derive(Debug, Clone)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `template_id`, rejecting identifiers that escape the root
    pub fn template_dir(&self, template_id: &str) -> Result<PathBuf> {
        let valid = !template_id.is_empty()
            && template_id != "."
            && template_id != ".."
            && !template_id.contains(|c| c == '/' || c == '\\')
            && !template_id.contains("..");
        if !valid {
            return Err(IdPhotoError::template_not_found(
                template_id,
                "invalid template identifier",
            ));
        }
        let dir = self.root.join(template_id);
        if !dir.is_dir() {
            return Err(IdPhotoError::template_not_found(
                template_id,
                format!("no directory at {}", dir.display()),
            ));
        }
        Ok(dir)
    }

    /// Load and validate all four assets of `template_id`
    ///
    /// # Errors
    /// `TemplateNotFound` naming the first missing, undecodable or
    /// inconsistent asset
    pub fn load(&self, template_id: &str) -> Result<TemplateBundle> {
        let dir = self.template_dir(template_id)?;

        let template = load_asset(template_id, &dir, TEMPLATE_IMAGE)?;
        let landmarks = read_landmarks(template_id, &dir)?;
        let head_removed = load_asset(template_id, &dir, HEAD_REMOVED_IMAGE)?.to_rgba8();
        let long_neck = load_asset(template_id, &dir, LONG_NECK_MASK)?.to_luma8();

        let canvas = (template.width(), template.height());
        for (name, size) in [
            (HEAD_REMOVED_IMAGE, head_removed.dimensions()),
            (LONG_NECK_MASK, long_neck.dimensions()),
        ] {
            if size != canvas {
                return Err(IdPhotoError::template_not_found(
                    template_id,
                    format!(
                        "{} is {}x{} but the canvas is {}x{}",
                        name, size.0, size.1, canvas.0, canvas.1
                    ),
                ));
            }
        }

        log::debug!(
            "Loaded template '{}' ({}x{}, alpha: {})",
            template_id,
            canvas.0,
            canvas.1,
            template.color().has_alpha()
        );

        Ok(TemplateBundle {
            id: template_id.to_string(),
            template,
            landmarks,
            head_removed,
            long_neck,
        })
    }

    /// Identifiers of every directory under the root, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| IdPhotoError::file_io_error("list templates in", &self.root, &e))?;
        let mut ids: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Persist the landmark file of `template_id`
    pub fn save_landmarks(&self, template_id: &str, landmarks: &LandmarkSet) -> Result<PathBuf> {
        let path = self.template_dir(template_id)?.join(TEMPLATE_LANDMARKS);
        let json = serde_json::to_string(landmarks)?;
        std::fs::write(&path, json)
            .map_err(|e| IdPhotoError::file_io_error("write landmarks", &path, &e))?;
        Ok(path)
    }
}

fn load_asset(template_id: &str, dir: &Path, name: &str) -> Result<DynamicImage> {
    let path = dir.join(name);
    let bytes = std::fs::read(&path)
        .map_err(|e| IdPhotoError::template_not_found(template_id, format!("{}: {}", name, e)))?;
    image::load_from_memory(&bytes)
        .map_err(|e| IdPhotoError::template_not_found(template_id, format!("{}: {}", name, e)))
}

fn read_landmarks(template_id: &str, dir: &Path) -> Result<LandmarkSet> {
    let path = dir.join(TEMPLATE_LANDMARKS);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        IdPhotoError::template_not_found(template_id, format!("{}: {}", TEMPLATE_LANDMARKS, e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        IdPhotoError::template_not_found(template_id, format!("{}: {}", TEMPLATE_LANDMARKS, e))
    })
}

/// Detect the template face and store its landmarks next to the template image
///
/// # Errors
/// - `TemplateNotFound` when the template image is missing
/// - `NoFaceDetected` when the template contains no face
pub fn prepare_template(
    store: &TemplateStore,
    template_id: &str,
    locator: &LandmarkLocator,
) -> Result<LandmarkSet> {
    let dir = store.template_dir(template_id)?;
    let template = load_asset(template_id, &dir, TEMPLATE_IMAGE)?;
    let landmarks = locator.locate(&template)?;
    let path = store.save_landmarks(template_id, &landmarks)?;
    log::info!(
        "Stored {} landmarks for template '{}' at {}",
        landmarks.points().len(),
        template_id,
        path.display()
    );
    Ok(landmarks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{write_template, MockFaceDetector, MockLandmarkPredictor};
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_load_complete_bundle() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), "001", 80, 60).unwrap();

        let bundle = TemplateStore::new(dir.path()).load("001").unwrap();
        assert_eq!(bundle.id, "001");
        assert_eq!(bundle.canvas_size(), (80, 60));
        assert_eq!(bundle.head_removed.dimensions(), (80, 60));
        assert_eq!(bundle.landmarks.points().len(), 68);
    }

    #[test]
    fn test_each_missing_asset_is_template_not_found() {
        for asset in [
            TEMPLATE_IMAGE,
            TEMPLATE_LANDMARKS,
            HEAD_REMOVED_IMAGE,
            LONG_NECK_MASK,
        ] {
            let dir = tempdir().unwrap();
            write_template(dir.path(), "t", 40, 40).unwrap();
            std::fs::remove_file(dir.path().join("t").join(asset)).unwrap();

            let err = TemplateStore::new(dir.path()).load("t").unwrap_err();
            assert_eq!(err.kind(), ErrorKind::TemplateNotFound, "{}", asset);
            assert!(err.to_string().contains(asset));
        }
    }

    #[test]
    fn test_rejects_corrupt_and_mismatched_assets() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), "t", 40, 40).unwrap();
        let store = TemplateStore::new(dir.path());

        std::fs::write(dir.path().join("t").join(LONG_NECK_MASK), b"garbage").unwrap();
        assert_eq!(store.load("t").unwrap_err().kind(), ErrorKind::TemplateNotFound);

        GrayImage::new(20, 40)
            .save(dir.path().join("t").join(LONG_NECK_MASK))
            .unwrap();
        let err = store.load("t").unwrap_err();
        assert!(err.to_string().contains("canvas"));

        std::fs::write(dir.path().join("t").join(TEMPLATE_LANDMARKS), "[[1,2]]").unwrap();
        assert_eq!(store.load("t").unwrap_err().kind(), ErrorKind::TemplateNotFound);
    }

    #[test]
    fn test_rejects_path_escapes() {
        let dir = tempdir().unwrap();
        let store = TemplateStore::new(dir.path());
        for id in ["", "..", "../etc", "a/b", "a\\b", "nonexistent"] {
            assert_eq!(
                store.load(id).unwrap_err().kind(),
                ErrorKind::TemplateNotFound,
                "{:?}",
                id
            );
        }
    }

    #[test]
    fn test_list_templates() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), "b", 10, 10).unwrap();
        write_template(dir.path(), "a", 10, 10).unwrap();
        std::fs::write(dir.path().join("README"), "x").unwrap();
        assert_eq!(TemplateStore::new(dir.path()).list().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_prepare_template_writes_landmarks() {
        let dir = tempdir().unwrap();
        write_template(dir.path(), "t", 64, 64).unwrap();
        std::fs::remove_file(dir.path().join("t").join(TEMPLATE_LANDMARKS)).unwrap();
        let store = TemplateStore::new(dir.path());

        let locator = LandmarkLocator::new(
            Arc::new(MockFaceDetector::with_faces(vec![crate::types::FaceRect::new(
                16, 16, 32, 32,
            )])),
            Arc::new(MockLandmarkPredictor::frontal()),
        );
        let landmarks = prepare_template(&store, "t", &locator).unwrap();
        assert_eq!(store.load("t").unwrap().landmarks, landmarks);

        let no_face = LandmarkLocator::new(
            Arc::new(MockFaceDetector::empty()),
            Arc::new(MockLandmarkPredictor::frontal()),
        );
        assert_eq!(
            prepare_template(&store, "t", &no_face).unwrap_err().kind(),
            ErrorKind::NoFaceDetected
        );
    }
}
