use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use roi_data::{get_imdb, DataLayerConfig, DatasetError, RoiDataLayer};

fn write_dataset(root: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(root.join("images"))?;
    fs::create_dir_all(root.join("annotations"))?;
    for name in ["a.png", "b.png", "empty.png"] {
        RgbImage::from_pixel(40, 30, Rgb([200, 100, 50])).save(root.join("images").join(name))?;
    }
    let coco = serde_json::json!({
        "images": [
            {"id": 1, "file_name": "a.png", "width": 40, "height": 30},
            {"id": 2, "file_name": "b.png", "width": 40, "height": 30},
            {"id": 3, "file_name": "empty.png", "width": 40, "height": 30}
        ],
        "annotations": [
            {"id": 1, "image_id": 1, "category_id": 1, "bbox": [4.0, 5.0, 10.0, 8.0]},
            {"id": 2, "image_id": 1, "category_id": 2, "bbox": [20.0, 10.0, 5.0, 5.0]},
            {"id": 3, "image_id": 2, "category_id": 1, "bbox": [0.0, 0.0, 20.0, 20.0], "iscrowd": 1}
        ],
        "categories": [
            {"id": 1, "name": "microaneurysm"},
            {"id": 2, "name": "dontcare"}
        ]
    });
    fs::write(
        root.join("annotations").join("optha_trainval.json"),
        serde_json::to_vec_pretty(&coco)?,
    )?;
    Ok(())
}

#[test]
fn imdb_builds_roidb_with_hard_and_dontcare() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;

    let imdb = get_imdb("optha_trainval", dir.path())?;
    assert_eq!(imdb.classes, vec!["__background__", "microaneurysm"]);
    assert_eq!(imdb.roidb.len(), 3);

    let a = &imdb.roidb[0];
    assert_eq!(a.boxes, vec![[4.0, 5.0, 13.0, 12.0]]);
    assert_eq!(a.gt_classes, vec![1]);
    assert_eq!(a.dontcare, vec![[20.0, 10.0, 24.0, 14.0]]);
    assert_eq!(imdb.roidb[1].is_hard, vec![true]);

    let imdb = imdb.prepare(true)?;
    assert_eq!(imdb.roidb.len(), 4);
    let flipped = &imdb.roidb[2];
    assert!(flipped.flipped);
    assert_eq!(flipped.boxes, vec![[26.0, 5.0, 35.0, 12.0]]);
    Ok(())
}

#[test]
fn unknown_category_is_reported() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let path = dir.path().join("annotations").join("optha_trainval.json");
    let raw = fs::read_to_string(&path)?.replace("\"category_id\": 2", "\"category_id\": 9");
    fs::write(&path, raw)?;

    let err = get_imdb("optha_trainval", dir.path()).unwrap_err();
    assert!(matches!(
        err,
        DatasetError::UnknownReference { what: "category", id: 9, .. }
    ));
    Ok(())
}

#[test]
fn data_layer_rescales_and_subtracts_means() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let imdb = get_imdb("optha_trainval", dir.path())?.prepare(false)?;
    let cfg = DataLayerConfig {
        scales: vec![60],
        max_size: 100,
        ..DataLayerConfig::default()
    };
    let mut layer = RoiDataLayer::new(imdb.roidb, imdb.classes.len(), cfg.clone(), 1024)?;
    assert_eq!(layer.len(), 2);

    for _ in 0..2 {
        let blobs = layer.forward()?;
        assert_eq!(blobs.shape(), [1, 3, 60, 80]);
        assert_eq!(blobs.im_info, [60.0, 80.0, 2.0]);
        assert_eq!(blobs.data.len(), 3 * 60 * 80);
        assert!((blobs.data[0] - (200.0 - cfg.pixel_means[0])).abs() < 1e-3);
        assert!((blobs.data[60 * 80] - (100.0 - cfg.pixel_means[1])).abs() < 1e-3);
        match blobs.im_name.as_str() {
            "a.png" => {
                assert_eq!(blobs.gt_boxes, vec![[8.0, 10.0, 26.0, 24.0, 1.0]]);
                assert_eq!(blobs.dontcare_areas, vec![[40.0, 20.0, 48.0, 28.0]]);
                assert_eq!(blobs.gt_ishard, vec![false]);
            }
            "b.png" => assert_eq!(blobs.gt_ishard, vec![true]),
            other => panic!("unexpected image {other}"),
        }
    }
    assert_eq!(layer.epoch(), 0);
    layer.forward()?;
    assert_eq!(layer.epoch(), 1);
    Ok(())
}

#[test]
fn data_layer_order_is_seeded() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_dataset(dir.path())?;
    let imdb = get_imdb("optha_trainval", dir.path())?.prepare(true)?;
    let order = |seed: u64| -> anyhow::Result<Vec<String>> {
        let mut layer = RoiDataLayer::new(
            imdb.roidb.clone(),
            imdb.num_classes(),
            DataLayerConfig {
                scales: vec![30],
                ..DataLayerConfig::default()
            },
            seed,
        )?;
        let mut names = Vec::new();
        for _ in 0..8 {
            let blobs = layer.forward()?;
            names.push(format!("{}:{}", blobs.im_name, blobs.gt_boxes.len()));
        }
        Ok(names)
    };
    assert_eq!(order(7)?, order(7)?);
    Ok(())
}

#[test]
fn empty_roidb_is_rejected() {
    let err = RoiDataLayer::new(Vec::new(), 2, DataLayerConfig::default(), 0)
        .err()
        .expect("empty roidb must fail");
    assert!(matches!(err, DatasetError::Empty(_)));
}
