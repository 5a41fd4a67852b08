use std::f64::consts::PI;

use chrono::Utc;
use image::RgbImage;
use mealscan_lib::models::{
    CaptureArtifact, DepthMap, Intrinsics, Pose, SegmentationMask, Viewpoint,
};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub const WIDTH: u32 = 160;
pub const HEIGHT: u32 = 120;

/// Axis-aligned food block resting on the table (z = 0), centred on the origin.
#[derive(Debug, Clone, Copy)]
pub struct FoodBox {
    pub half_x: f64,
    pub half_y: f64,
    pub height: f64,
}

impl FoodBox {
    /// 10 cm × 10 cm × 3 cm: 300 mL of bounding prism, 180 mL at the default fill.
    pub fn plate() -> Self {
        Self {
            half_x: 0.05,
            half_y: 0.05,
            height: 0.03,
        }
    }

    pub fn prism_ml(&self) -> f64 {
        4.0 * self.half_x * self.half_y * self.height * 1e6
    }
}

/// One rendered view: the capture plus the ground-truth mask.
pub struct RenderedView {
    pub capture: CaptureArtifact,
    pub mask: SegmentationMask,
}

fn top_pose() -> Pose {
    // Looking straight down from 40 cm: camera x → world x, camera y → world -y.
    Pose::new(
        UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI),
        Vector3::new(0.0, 0.0, 0.4),
    )
}

fn side_pose() -> Pose {
    // Level with the table, 40 cm back along -x, looking along +x.
    let columns = Matrix3::from_columns(&[
        Vector3::new(0.0, -1.0, 0.0),
        Vector3::new(0.0, 0.0, -1.0),
        Vector3::new(1.0, 0.0, 0.0),
    ]);
    Pose::new(
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(columns)),
        Vector3::new(-0.4, 0.0, 0.015),
    )
}

fn top_intrinsics() -> Intrinsics {
    Intrinsics {
        fx: 220.0,
        fy: 220.0,
        cx: 80.0,
        cy: 60.0,
    }
}

fn side_intrinsics() -> Intrinsics {
    Intrinsics {
        fx: 400.0,
        fy: 400.0,
        cx: 80.0,
        cy: 60.0,
    }
}

/// Ray-cast `food` from `viewpoint`, then drop `dropout` of the food's depth samples
/// with a seeded generator.
pub fn render(food: &FoodBox, viewpoint: Viewpoint, dropout: f64, seed: u64) -> RenderedView {
    let (pose, intrinsics) = match viewpoint {
        Viewpoint::Top => (top_pose(), top_intrinsics()),
        Viewpoint::Side => (side_pose(), side_intrinsics()),
    };
    let mut rng = StdRng::seed_from_u64(seed);
    let mut depth = Vec::with_capacity((WIDTH * HEIGHT) as usize);
    let mut members = Vec::with_capacity((WIDTH * HEIGHT) as usize);

    for v in 0..HEIGHT {
        for u in 0..WIDTH {
            let dx = (u as f64 - intrinsics.cx) / intrinsics.fx;
            let dy = (v as f64 - intrinsics.cy) / intrinsics.fy;
            let (hit, distance) = match viewpoint {
                Viewpoint::Top => {
                    // Ray: (0, 0, 0.4) + t·(dx, -dy, -1); top face at z = height.
                    let t = 0.4 - food.height;
                    let (x, y) = (t * dx, -t * dy);
                    let hit = x.abs() <= food.half_x && y.abs() <= food.half_y;
                    (hit, if hit { t } else { 0.4 })
                }
                Viewpoint::Side => {
                    // Ray: (-0.4, 0, 0.015) + t·(1, -dx, -dy); near face at x = -half_x.
                    let t = 0.4 - food.half_x;
                    let (y, z) = (-t * dx, 0.015 - t * dy);
                    let hit = y.abs() <= food.half_y
                        && (0.0..=food.height).contains(&z);
                    (hit, if hit { t } else { 1.0 })
                }
            };

            members.push(hit);
            if hit && rng.gen::<f64>() < dropout {
                depth.push(DepthMap::INVALID);
            } else {
                depth.push(distance as f32);
            }
        }
    }

    let capture = CaptureArtifact::new(
        viewpoint,
        RgbImage::new(WIDTH, HEIGHT),
        DepthMap::new(WIDTH, HEIGHT, depth).expect("synthetic depth is valid"),
        intrinsics,
        pose,
        Utc::now(),
    )
    .expect("synthetic capture is valid");
    let mask = SegmentationMask::from_booleans(WIDTH, HEIGHT, &members)
        .expect("synthetic mask matches the frame");

    RenderedView { capture, mask }
}
