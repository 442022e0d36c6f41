use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::coco::{xywh_to_xyxy, CocoFile, DONTCARE};
use crate::types::{DatasetError, DatasetResult, RoidbEntry};

pub const BACKGROUND: &str = "__background__";

/// A named image database: class list plus one roidb entry per image.
#[derive(Debug, Clone)]
pub struct Imdb {
    pub name: String,
    /// Index 0 is always background.
    pub classes: Vec<String>,
    pub roidb: Vec<RoidbEntry>,
}

/// Resolve an imdb by name: `<data_root>/annotations/<name>.json`, images under `<data_root>/images`.
pub fn get_imdb(name: &str, data_root: &Path) -> DatasetResult<Imdb> {
    let ann_path = data_root.join("annotations").join(format!("{name}.json"));
    Imdb::from_coco(name, &ann_path, &data_root.join("images"))
}

impl Imdb {
    pub fn from_coco(name: &str, ann_path: &Path, image_dir: &Path) -> DatasetResult<Self> {
        let raw = fs::read(ann_path).map_err(|source| DatasetError::Io {
            path: ann_path.to_path_buf(),
            source,
        })?;
        let coco: CocoFile = serde_json::from_slice(&raw).map_err(|source| DatasetError::Json {
            path: ann_path.to_path_buf(),
            source,
        })?;
        let imdb = Self::from_parts(name, coco, image_dir)?;
        info!(
            imdb = %imdb.name,
            images = imdb.roidb.len(),
            classes = imdb.num_classes(),
            "loaded imdb"
        );
        Ok(imdb)
    }

    pub fn from_parts(name: &str, coco: CocoFile, image_dir: &Path) -> DatasetResult<Self> {
        let mut categories = coco.categories.clone();
        categories.sort_by_key(|c| c.id);

        let mut classes = vec![BACKGROUND.to_string()];
        // category id -> Some(class index), or None for don't-care.
        let mut class_of: BTreeMap<u64, Option<usize>> = BTreeMap::new();
        for cat in &categories {
            if cat.name == DONTCARE {
                class_of.insert(cat.id, None);
            } else {
                classes.push(cat.name.clone());
                class_of.insert(cat.id, Some(classes.len() - 1));
            }
        }

        let mut index_of: BTreeMap<u64, usize> = BTreeMap::new();
        let mut roidb: Vec<RoidbEntry> = coco
            .images
            .iter()
            .enumerate()
            .map(|(idx, img)| {
                index_of.insert(img.id, idx);
                RoidbEntry {
                    image: image_dir.join(&img.file_name),
                    width: img.width,
                    height: img.height,
                    boxes: Vec::new(),
                    gt_classes: Vec::new(),
                    is_hard: Vec::new(),
                    dontcare: Vec::new(),
                    flipped: false,
                }
            })
            .collect();

        for ann in &coco.annotations {
            let idx = *index_of
                .get(&ann.image_id)
                .ok_or(DatasetError::UnknownReference {
                    annotation: ann.id,
                    what: "image",
                    id: ann.image_id,
                })?;
            let class = *class_of
                .get(&ann.category_id)
                .ok_or(DatasetError::UnknownReference {
                    annotation: ann.id,
                    what: "category",
                    id: ann.category_id,
                })?;
            let entry = &mut roidb[idx];
            let Some(bbox) = xywh_to_xyxy(ann.bbox, entry.width, entry.height) else {
                debug!(annotation = ann.id, "dropping degenerate box");
                continue;
            };
            match class {
                Some(class) => {
                    entry.boxes.push(bbox);
                    entry.gt_classes.push(class);
                    entry.is_hard.push(ann.iscrowd != 0);
                }
                None => entry.dontcare.push(bbox),
            }
        }

        Ok(Self {
            name: name.to_string(),
            classes,
            roidb,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    /// Drop images without any ground-truth object; they contribute no foreground.
    pub fn filter_empty(&mut self) -> usize {
        let before = self.roidb.len();
        self.roidb.retain(|e| !e.boxes.is_empty());
        let removed = before - self.roidb.len();
        if removed > 0 {
            info!(imdb = %self.name, removed, "filtered images without ground truth");
        }
        removed
    }

    /// Append horizontally flipped copies of every entry.
    pub fn append_flipped(&mut self) {
        let flipped: Vec<RoidbEntry> = self.roidb.iter().map(RoidbEntry::flipped).collect();
        self.roidb.extend(flipped);
    }

    /// Filter, optionally augment with flips, and fail on an empty result.
    pub fn prepare(mut self, use_flipped: bool) -> DatasetResult<Self> {
        self.filter_empty();
        if self.roidb.is_empty() {
            return Err(DatasetError::Empty(self.name));
        }
        if use_flipped {
            self.append_flipped();
        }
        Ok(self)
    }
}
