// SPDX-License-Identifier: MIT OR Apache-2.0
//! Construction of export entries and their routing metadata.

use crate::image::ImageConfig;
use crate::request::ExportEntry;
use crate::state::Digest;
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from export crafting.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrafterError {
    /// The crafter was used after its entries were taken.
    #[error("export crafter can no longer be used after take_entries")]
    AlreadyTaken,
    /// The image config could not be serialized.
    #[error("marshal image config: {0}")]
    Config(String),
}

/// Accumulates export entries (image pushes, local artifact dirs) and the
/// metadata the output callbacks route on.
#[derive(Debug, Default)]
pub struct ExportCrafter {
    entries: Vec<ExportEntry>,
    next_image: usize,
    next_dir: usize,
    taken: bool,
}

impl ExportCrafter {
    /// An empty crafter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image export. Returns the ref prefix used for its metadata.
    pub fn add_image_entry(
        &mut self,
        root: Digest,
        image_name: &str,
        should_push: bool,
        insecure_push: bool,
        config: &ImageConfig,
        platform: Option<&str>,
        no_manifest_list: bool,
    ) -> Result<String, CrafterError> {
        self.assert_usable()?;
        let ref_key = format!("image-{}", self.next_image);
        self.next_image += 1;
        let prefix = format!("ref/{ref_key}");

        let config_bytes =
            serde_json::to_vec(config).map_err(|e| CrafterError::Config(e.to_string()))?;

        let mut metadata = BTreeMap::new();
        metadata.insert(format!("{prefix}/export-image"), b"true".to_vec());
        metadata.insert(
            format!("{prefix}/image.name"),
            image_name.as_bytes().to_vec(),
        );
        if should_push {
            metadata.insert(format!("{prefix}/export-image-push"), b"true".to_vec());
            if insecure_push {
                metadata.insert(format!("{prefix}/insecure-push"), b"true".to_vec());
            }
        }
        metadata.insert(format!("{prefix}/image.config"), config_bytes);
        if let Some(platform) = platform {
            metadata.insert(format!("{prefix}/platform"), platform.as_bytes().to_vec());
        }
        if no_manifest_list {
            metadata.insert(format!("{prefix}/no-manifest-list"), b"true".to_vec());
        }

        self.entries.push(ExportEntry {
            ref_key,
            root,
            metadata,
        });
        Ok(prefix)
    }

    /// Add a local artifact-directory export. Returns the directory id the
    /// output callback is keyed on.
    pub fn add_artifact_local_entry(
        &mut self,
        root: Digest,
        artifact: &str,
        src_path: &str,
        dest_path: &str,
        final_artifact: bool,
    ) -> Result<String, CrafterError> {
        self.assert_usable()?;
        let ref_key = format!("dir-{}", self.next_dir);
        self.next_dir += 1;
        let prefix = format!("ref/{ref_key}");

        // Content-derived id: stable across identical builds.
        let dir_id = hex::encode(Sha256::digest(
            format!("{ref_key}\x00{artifact}\x00{dest_path}").as_bytes(),
        ))[..32]
            .to_string();

        let mut metadata = BTreeMap::new();
        metadata.insert(format!("{prefix}/export-dir"), b"true".to_vec());
        metadata.insert(format!("{prefix}/artifact"), artifact.as_bytes().to_vec());
        metadata.insert(format!("{prefix}/src-path"), src_path.as_bytes().to_vec());
        metadata.insert(format!("{prefix}/dest-path"), dest_path.as_bytes().to_vec());
        metadata.insert(format!("{prefix}/dir-id"), dir_id.as_bytes().to_vec());
        if final_artifact {
            metadata.insert(format!("{prefix}/final-artifact"), b"true".to_vec());
        }

        self.entries.push(ExportEntry {
            ref_key,
            root,
            metadata,
        });
        Ok(dir_id)
    }

    /// Take the accumulated entries; the crafter cannot be used afterwards.
    pub fn take_entries(&mut self) -> Result<Vec<ExportEntry>, CrafterError> {
        self.assert_usable()?;
        self.taken = true;
        Ok(std::mem::take(&mut self.entries))
    }

    /// Number of accumulated entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn assert_usable(&self) -> Result<(), CrafterError> {
        if self.taken {
            return Err(CrafterError::AlreadyTaken);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_entries_carry_push_metadata() {
        let mut crafter = ExportCrafter::new();
        let prefix = crafter
            .add_image_entry(
                "sha256:abc".to_string(),
                "registry/app:v1",
                true,
                true,
                &ImageConfig::default(),
                Some("linux/amd64"),
                false,
            )
            .expect("add image");
        assert_eq!(prefix, "ref/image-0");

        let entries = crafter.take_entries().expect("take");
        assert_eq!(entries.len(), 1);
        let md = &entries[0].metadata;
        assert_eq!(md.get("ref/image-0/export-image").map(Vec::as_slice), Some(&b"true"[..]));
        assert_eq!(
            md.get("ref/image-0/image.name").map(Vec::as_slice),
            Some(&b"registry/app:v1"[..])
        );
        assert_eq!(
            md.get("ref/image-0/export-image-push").map(Vec::as_slice),
            Some(&b"true"[..])
        );
        assert_eq!(
            md.get("ref/image-0/insecure-push").map(Vec::as_slice),
            Some(&b"true"[..])
        );
    }

    #[test]
    fn non_push_images_omit_push_metadata() {
        let mut crafter = ExportCrafter::new();
        crafter
            .add_image_entry(
                "sha256:abc".to_string(),
                "app:dev",
                false,
                false,
                &ImageConfig::default(),
                None,
                false,
            )
            .expect("add image");
        let entries = crafter.take_entries().expect("take");
        assert!(!entries[0].metadata.contains_key("ref/image-0/export-image-push"));
    }

    #[test]
    fn artifact_entries_have_stable_dir_ids() {
        let mut a = ExportCrafter::new();
        let id_a = a
            .add_artifact_local_entry("sha256:x".to_string(), "+t/out", "/out", "./local", false)
            .expect("add artifact");
        let mut b = ExportCrafter::new();
        let id_b = b
            .add_artifact_local_entry("sha256:x".to_string(), "+t/out", "/out", "./local", false)
            .expect("add artifact");
        assert_eq!(id_a, id_b);
        assert_eq!(id_a.len(), 32);
    }

    #[test]
    fn ref_keys_count_up_per_kind() {
        let mut crafter = ExportCrafter::new();
        crafter
            .add_image_entry("sha256:a".to_string(), "i1", false, false, &ImageConfig::default(), None, false)
            .expect("image 0");
        crafter
            .add_image_entry("sha256:b".to_string(), "i2", false, false, &ImageConfig::default(), None, false)
            .expect("image 1");
        crafter
            .add_artifact_local_entry("sha256:c".to_string(), "+t/x", "/x", "./x", true)
            .expect("dir 0");
        let entries = crafter.take_entries().expect("take");
        let keys: Vec<&str> = entries.iter().map(|e| e.ref_key.as_str()).collect();
        assert_eq!(keys, vec!["image-0", "image-1", "dir-0"]);
        assert!(entries[2].metadata.contains_key("ref/dir-0/final-artifact"));
    }

    #[test]
    fn use_after_take_errors() {
        let mut crafter = ExportCrafter::new();
        crafter.take_entries().expect("take");
        let err = crafter
            .add_artifact_local_entry("sha256:x".to_string(), "+t/a", "/a", "./a", false)
            .unwrap_err();
        assert_eq!(err, CrafterError::AlreadyTaken);
    }
}
