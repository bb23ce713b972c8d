//! Quad geometry for laying the processed texture onto the display surface

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn rotated_clockwise(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    /// Number of quarter turns
    fn steps(self) -> usize {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }

    fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Policy for reconciling texture and surface aspect ratios
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentMode {
    #[default]
    Fit,
    Fill,
    Stretch,
}

impl ContentMode {
    pub fn next(self) -> Self {
        match self {
            ContentMode::Fit => ContentMode::Fill,
            ContentMode::Fill => ContentMode::Stretch,
            ContentMode::Stretch => ContentMode::Fit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutParameters {
    pub rotation: Rotation,
    pub content_mode: ContentMode,
    pub mirrored: bool,
    pub front_facing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
}

const fn v(x: f32, y: f32) -> Vertex {
    Vertex { x, y }
}

/// Texture coordinates for the strip order bottom-left, bottom-right, top-left, top-right.
/// Each table is the previous one with its corners relabelled one step around the square.
const TEXTURE_COORDINATES: [[Vertex; 4]; 4] = [
    [v(0.0, 1.0), v(1.0, 1.0), v(0.0, 0.0), v(1.0, 0.0)],
    [v(1.0, 1.0), v(1.0, 0.0), v(0.0, 1.0), v(0.0, 0.0)],
    [v(1.0, 0.0), v(0.0, 0.0), v(1.0, 1.0), v(0.0, 1.0)],
    [v(0.0, 0.0), v(0.0, 1.0), v(1.0, 0.0), v(1.0, 1.0)],
];

/// Four-vertex triangle strip plus matching texture coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadGeometry {
    pub positions: [Vertex; 4],
    pub tex_coords: [Vertex; 4],
}

impl QuadGeometry {
    pub fn scale(&self) -> (f32, f32) {
        (self.positions[1].x, self.positions[2].y)
    }
}

/// Compute the quad for `texture` shown on `surface` under `params`.
///
/// Zero-sized inputs leave both scale factors at 1.
pub fn calculate(params: &LayoutParameters, texture: Size, surface: Size) -> QuadGeometry {
    let mut scale_x = 1.0f32;
    let mut scale_y = 1.0f32;

    if params.content_mode != ContentMode::Stretch && !texture.is_empty() && !surface.is_empty() {
        let (tex_w, tex_h) = if params.rotation.swaps_axes() {
            (texture.height, texture.width)
        } else {
            (texture.width, texture.height)
        };
        let sx = surface.width as f32 / tex_w as f32;
        let sy = surface.height as f32 / tex_h as f32;

        let fill = params.content_mode == ContentMode::Fill;
        if sx < sy {
            if fill {
                scale_x = sy / sx;
            } else {
                scale_y = sx / sy;
            }
        } else if fill {
            scale_y = sx / sy;
        } else {
            scale_x = sy / sx;
        }
    }

    if params.mirrored != params.front_facing {
        scale_x = -scale_x;
    }

    QuadGeometry {
        positions: [
            v(-scale_x, -scale_y),
            v(scale_x, -scale_y),
            v(-scale_x, scale_y),
            v(scale_x, scale_y),
        ],
        tex_coords: TEXTURE_COORDINATES[params.rotation.steps()],
    }
}

struct ActiveLayout {
    params: LayoutParameters,
    texture: Option<Size>,
    surface: Option<Size>,
}

/// Double-buffered layout parameters and the geometry derived from them.
///
/// Writers only touch the pending copy. The pending copy is promoted to active in one step
/// at the start of every recomputation, which happens only when the texture or surface
/// size changes or on [`LayoutController::invalidate`].
pub struct LayoutController {
    pending: Mutex<LayoutParameters>,
    active: Mutex<ActiveLayout>,
    geometry: ArcSwapOption<QuadGeometry>,
    recomputations: AtomicU64,
}

impl LayoutController {
    pub fn new(initial: LayoutParameters) -> Self {
        Self {
            pending: Mutex::new(initial),
            active: Mutex::new(ActiveLayout {
                params: initial,
                texture: None,
                surface: None,
            }),
            geometry: ArcSwapOption::empty(),
            recomputations: AtomicU64::new(0),
        }
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        lock(&self.pending).rotation = rotation;
    }

    pub fn set_content_mode(&self, content_mode: ContentMode) {
        lock(&self.pending).content_mode = content_mode;
    }

    pub fn set_mirrored(&self, mirrored: bool) {
        lock(&self.pending).mirrored = mirrored;
    }

    pub fn set_front_facing(&self, front_facing: bool) {
        lock(&self.pending).front_facing = front_facing;
    }

    pub fn set_parameters(&self, params: LayoutParameters) {
        *lock(&self.pending) = params;
    }

    /// Copy of the pending parameters, including writes not yet promoted
    pub fn pending(&self) -> LayoutParameters {
        *lock(&self.pending)
    }

    /// Parameters used by the current geometry
    pub fn active(&self) -> LayoutParameters {
        lock(&self.active).params
    }

    pub fn texture_resized(&self, size: Size) {
        let mut active = lock(&self.active);
        if active.texture == Some(size) {
            return;
        }
        active.texture = Some(size);
        self.recompute(&mut active);
    }

    pub fn surface_resized(&self, size: Size) {
        let mut active = lock(&self.active);
        if active.surface == Some(size) {
            return;
        }
        active.surface = Some(size);
        self.recompute(&mut active);
    }

    /// Recompute with the current sizes, picking up pending parameter writes
    pub fn invalidate(&self) {
        let mut active = lock(&self.active);
        self.recompute(&mut active);
    }

    pub fn geometry(&self) -> Option<Arc<QuadGeometry>> {
        self.geometry.load_full()
    }

    /// Number of times the geometry has been calculated
    pub fn recomputations(&self) -> u64 {
        self.recomputations.load(Ordering::Relaxed)
    }

    fn recompute(&self, active: &mut ActiveLayout) {
        let (Some(texture), Some(surface)) = (active.texture, active.surface) else {
            return;
        };
        if texture.is_empty() || surface.is_empty() {
            return;
        }

        active.params = *lock(&self.pending);
        let geometry = calculate(&active.params, texture, surface);
        debug!(
            ?texture,
            ?surface,
            params = ?active.params,
            scale = ?geometry.scale(),
            "Recomputed quad geometry"
        );
        self.geometry.store(Some(Arc::new(geometry)));
        self.recomputations.fetch_add(1, Ordering::Relaxed);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROTATIONS: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    fn params(rotation: Rotation, content_mode: ContentMode) -> LayoutParameters {
        LayoutParameters {
            rotation,
            content_mode,
            ..Default::default()
        }
    }

    fn sizes() -> Vec<(Size, Size)> {
        vec![
            (Size::new(1080, 1080), Size::new(1080, 1920)),
            (Size::new(1920, 1080), Size::new(800, 600)),
            (Size::new(640, 480), Size::new(2560, 1440)),
            (Size::new(720, 720), Size::new(300, 900)),
        ]
    }

    #[test]
    fn stretch_ignores_aspect_ratio() {
        for rotation in ROTATIONS {
            for (texture, surface) in sizes() {
                let g = calculate(&params(rotation, ContentMode::Stretch), texture, surface);
                assert_eq!(g.scale(), (1.0, 1.0));
            }
        }
    }

    #[test]
    fn fit_clamps_the_limiting_axis_to_one() {
        for rotation in ROTATIONS {
            for (texture, surface) in sizes() {
                let (sx, sy) = calculate(&params(rotation, ContentMode::Fit), texture, surface).scale();
                assert_eq!(sx.abs().max(sy.abs()), 1.0, "{texture:?} on {surface:?}");
                assert!(sx.abs().min(sy.abs()) <= 1.0);
            }
        }
    }

    #[test]
    fn fill_clamps_the_covering_axis_to_one() {
        for rotation in ROTATIONS {
            for (texture, surface) in sizes() {
                let (sx, sy) = calculate(&params(rotation, ContentMode::Fill), texture, surface).scale();
                assert_eq!(sx.abs().min(sy.abs()), 1.0, "{texture:?} on {surface:?}");
                assert!(sx.abs().max(sy.abs()) >= 1.0);
            }
        }
    }

    #[test]
    fn fit_letterboxes_square_texture_on_portrait_surface() {
        let (sx, sy) = calculate(
            &params(Rotation::Deg0, ContentMode::Fit),
            Size::new(1080, 1080),
            Size::new(1080, 1920),
        )
        .scale();
        assert_eq!(sx, 1.0);
        assert!((sy - 1080.0 / 1920.0).abs() < 1e-6);
    }

    #[test]
    fn quarter_rotation_swaps_texture_axes() {
        let texture = Size::new(1920, 1080);
        let surface = Size::new(1080, 1920);
        let upright = calculate(&params(Rotation::Deg0, ContentMode::Fit), texture, surface).scale();
        let turned = calculate(&params(Rotation::Deg90, ContentMode::Fit), texture, surface).scale();
        assert_ne!(upright, turned);
        assert_eq!(turned, (1.0, 1.0));
    }

    #[test]
    fn mirroring_follows_xor_of_mirrored_and_front_facing() {
        for rotation in ROTATIONS {
            for mode in [ContentMode::Fit, ContentMode::Fill, ContentMode::Stretch] {
                let base = calculate(&params(rotation, mode), Size::new(1920, 1080), Size::new(800, 600));
                for mirrored in [false, true] {
                    for front_facing in [false, true] {
                        let p = LayoutParameters {
                            mirrored,
                            front_facing,
                            ..params(rotation, mode)
                        };
                        let (sx, sy) = calculate(&p, Size::new(1920, 1080), Size::new(800, 600)).scale();
                        let flipped = sx.signum() != base.scale().0.signum();
                        assert_eq!(flipped, mirrored != front_facing);
                        assert_eq!(sx.abs(), base.scale().0.abs());
                        assert_eq!(sy, base.scale().1);
                    }
                }
            }
        }
    }

    #[test]
    fn zero_sized_inputs_do_not_divide_by_zero() {
        let g = calculate(
            &params(Rotation::Deg0, ContentMode::Fit),
            Size::new(0, 1080),
            Size::new(800, 600),
        );
        assert_eq!(g.scale(), (1.0, 1.0));
    }

    #[test]
    fn texture_coordinates_are_corner_bijections() {
        let corners = [v(0.0, 0.0), v(1.0, 0.0), v(0.0, 1.0), v(1.0, 1.0)];
        for table in TEXTURE_COORDINATES {
            for corner in corners {
                assert_eq!(table.iter().filter(|&&c| c == corner).count(), 1);
            }
        }
    }

    #[test]
    fn tables_are_successive_relabellings() {
        // Strip slots in order around the quad: BL, BR, TR, TL
        const CYCLE: [usize; 4] = [0, 1, 3, 2];
        let base = TEXTURE_COORDINATES[0];
        for (steps, table) in TEXTURE_COORDINATES.iter().enumerate() {
            for (i, slot) in CYCLE.iter().enumerate() {
                assert_eq!(table[*slot], base[CYCLE[(i + steps) % 4]]);
            }
        }
    }

    #[test]
    fn four_quarter_turns_are_identity() {
        for rotation in ROTATIONS {
            let mut r = rotation;
            for _ in 0..4 {
                r = r.rotated_clockwise();
            }
            assert_eq!(r, rotation);
            assert_eq!(TEXTURE_COORDINATES[r.steps()], TEXTURE_COORDINATES[rotation.steps()]);
        }
    }

    #[test]
    fn controller_waits_for_both_sizes() {
        let layout = LayoutController::new(LayoutParameters::default());
        layout.surface_resized(Size::new(1080, 1080));
        assert!(layout.geometry().is_none());
        layout.texture_resized(Size::new(1080, 1080));
        assert_eq!(layout.recomputations(), 1);
        assert_eq!(layout.geometry().unwrap().scale(), (1.0, 1.0));
    }

    #[test]
    fn unchanged_sizes_do_not_recompute() {
        let layout = LayoutController::new(LayoutParameters::default());
        layout.surface_resized(Size::new(800, 600));
        layout.texture_resized(Size::new(720, 720));
        layout.texture_resized(Size::new(720, 720));
        layout.surface_resized(Size::new(800, 600));
        assert_eq!(layout.recomputations(), 1);
    }

    #[test]
    fn pending_parameters_apply_only_on_recompute() {
        let layout = LayoutController::new(LayoutParameters::default());
        layout.surface_resized(Size::new(800, 600));
        layout.texture_resized(Size::new(720, 720));

        layout.set_rotation(Rotation::Deg180);
        layout.set_content_mode(ContentMode::Stretch);
        assert_eq!(layout.active().rotation, Rotation::Deg0);
        assert_eq!(layout.geometry().unwrap().tex_coords, TEXTURE_COORDINATES[0]);

        layout.texture_resized(Size::new(480, 480));
        let active = layout.active();
        assert_eq!(active.rotation, Rotation::Deg180);
        assert_eq!(active.content_mode, ContentMode::Stretch);
        assert_eq!(layout.geometry().unwrap().tex_coords, TEXTURE_COORDINATES[2]);
    }

    #[test]
    fn invalidate_promotes_pending_parameters() {
        let layout = LayoutController::new(LayoutParameters::default());
        layout.surface_resized(Size::new(800, 600));
        layout.texture_resized(Size::new(720, 720));
        layout.set_mirrored(true);
        layout.invalidate();
        assert!(layout.active().mirrored);
        assert!(layout.geometry().unwrap().scale().0 < 0.0);
        assert_eq!(layout.recomputations(), 2);
    }
}
