use edge_boxes::overlay::{draw_proposals, pixel_box, proposal_color, render_overlay};
use edge_boxes::Proposal;
use image::{Rgba, RgbaImage};

fn prop(x1: f64, y1: f64, x2: f64, y2: f64, score: f64) -> Proposal {
    Proposal {
        x1,
        y1,
        x2,
        y2,
        score,
    }
}

#[test]
fn low_scores_are_skipped() {
    let mut img = RgbaImage::new(32, 32);
    let drawn = draw_proposals(
        &mut img,
        &[prop(2.0, 2.0, 20.0, 20.0, 0.05), prop(4.0, 4.0, 28.0, 28.0, 0.5)],
        0.1,
    );
    assert_eq!(drawn, 1);
    assert_eq!(*img.get_pixel(4, 4), proposal_color(0.5));
    assert_eq!(*img.get_pixel(2, 2), Rgba([0, 0, 0, 0]));
}

#[test]
fn boxes_are_clamped_to_the_image() {
    assert_eq!(pixel_box(&prop(-5.0, -5.0, 100.0, 100.0, 1.0), (10, 8)), Some([0, 0, 9, 7]));
    assert_eq!(pixel_box(&prop(8.0, 2.0, 3.0, 6.0, 1.0), (10, 8)), None);
}

#[test]
fn overlay_is_written_to_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let src = dir.path().join("in.png");
    RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255])).save(&src)?;
    let out = dir.path().join("out.png");
    let drawn = render_overlay(&src, &[prop(1.0, 1.0, 12.0, 12.0, 1.0)], 0.1, &out)?;
    assert_eq!(drawn, 1);
    let img = image::open(&out)?.to_rgba8();
    assert_eq!(*img.get_pixel(1, 1), Rgba([0, 0, 255, 255]));
    Ok(())
}
