use crate::core::track::Track;
use anyhow::Context;
use helpers::general::InputValueError;
use glam::DVec2;
use helpers::geometry::distance_to_segment;
use serde::Deserialize;

/// Wall strip thickness as a fraction of the block size.
pub const WALL_THICKNESS: f64 = 0.12;

/// Terrain classes a sensor can observe. The ordering is the severity ordering used when several
/// wheels stand on different terrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Terrain {
    Road,
    Curb,
    Grass,
    Gravel,
    Sand,
    Wall,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub fn new(r: u8, g: u8, b: u8) -> RgbColor {
        RgbColor { r, g, b }
    }

    /// parse converts a CSS colour string, e.g. "#ff0000" or "orange".
    pub fn parse(color: &str) -> anyhow::Result<RgbColor> {
        let tmp_color = color
            .parse::<css_color_parser::Color>()
            .context(format!("Could not parse color {}!", color))?;

        Ok(RgbColor {
            r: tmp_color.r,
            g: tmp_color.g,
            b: tmp_color.b,
        })
    }

    fn matches(&self, other: &RgbColor, tolerance: u8) -> bool {
        self.r.abs_diff(other.r) <= tolerance
            && self.g.abs_diff(other.g) <= tolerance
            && self.b.abs_diff(other.b) <= tolerance
    }
}

/// PalettePars contains the colours of the raster sensing backend as CSS colour strings.
/// * `tolerance` - Allowed deviation per colour channel when classifying a pixel
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PalettePars {
    pub road: String,
    pub wall: String,
    pub grass: String,
    pub gravel: String,
    pub sand: String,
    pub curb: String,
    pub finish: String,
    pub checkpoint: String,
    pub tolerance: u8,
}

impl Default for PalettePars {
    fn default() -> Self {
        PalettePars {
            road: String::from("#6e6e6e"),
            wall: String::from("#141414"),
            grass: String::from("#00c800"),
            gravel: String::from("#aaa08c"),
            sand: String::from("#e6d28c"),
            curb: String::from("#fac8c8"),
            finish: String::from("#ffffff"),
            checkpoint: String::from("#ffa500"),
            tolerance: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Palette {
    pub road: RgbColor,
    pub wall: RgbColor,
    pub grass: RgbColor,
    pub gravel: RgbColor,
    pub sand: RgbColor,
    pub curb: RgbColor,
    pub finish: RgbColor,
    pub checkpoint: RgbColor,
    pub tolerance: u8,
}

impl Palette {
    pub fn from_pars(pars: &PalettePars) -> anyhow::Result<Palette> {
        let palette = Palette {
            road: RgbColor::parse(&pars.road)?,
            wall: RgbColor::parse(&pars.wall)?,
            grass: RgbColor::parse(&pars.grass)?,
            gravel: RgbColor::parse(&pars.gravel)?,
            sand: RgbColor::parse(&pars.sand)?,
            curb: RgbColor::parse(&pars.curb)?,
            finish: RgbColor::parse(&pars.finish)?,
            checkpoint: RgbColor::parse(&pars.checkpoint)?,
            tolerance: pars.tolerance,
        };

        // every colour must be classifiable unambiguously
        let named = palette.named_colors();
        for (i, (name_a, color_a)) in named.iter().enumerate() {
            for (name_b, color_b) in named.iter().skip(i + 1) {
                if color_a.matches(color_b, palette.tolerance.saturating_mul(2)) {
                    return Err(InputValueError::new(
                        "palette",
                        &format!("colors {} and {} are not distinguishable", name_a, name_b),
                    )
                    .into());
                }
            }
        }

        Ok(palette)
    }

    fn named_colors(&self) -> [(&'static str, RgbColor); 8] {
        [
            ("road", self.road),
            ("wall", self.wall),
            ("grass", self.grass),
            ("gravel", self.gravel),
            ("sand", self.sand),
            ("curb", self.curb),
            ("finish", self.finish),
            ("checkpoint", self.checkpoint),
        ]
    }

    /// classify maps a pixel colour to terrain. Finish and checkpoint lines as well as unknown
    /// colours count as road.
    pub fn classify(&self, color: &RgbColor) -> Terrain {
        let table = [
            (self.wall, Terrain::Wall),
            (self.grass, Terrain::Grass),
            (self.gravel, Terrain::Gravel),
            (self.sand, Terrain::Sand),
            (self.curb, Terrain::Curb),
        ];

        table
            .iter()
            .find(|(c, _)| c.matches(color, self.tolerance))
            .map(|(_, terrain)| *terrain)
            .unwrap_or(Terrain::Road)
    }

    pub fn color_of(&self, terrain: Terrain) -> RgbColor {
        match terrain {
            Terrain::Road => self.road,
            Terrain::Curb => self.curb,
            Terrain::Grass => self.grass,
            Terrain::Gravel => self.gravel,
            Terrain::Sand => self.sand,
            Terrain::Wall => self.wall,
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette {
            road: RgbColor::new(110, 110, 110),
            wall: RgbColor::new(20, 20, 20),
            grass: RgbColor::new(0, 200, 0),
            gravel: RgbColor::new(170, 160, 140),
            sand: RgbColor::new(230, 210, 140),
            curb: RgbColor::new(250, 200, 200),
            finish: RgbColor::new(255, 255, 255),
            checkpoint: RgbColor::new(255, 165, 0),
            tolerance: 8,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// SURFACE -----------------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

/// Surface answers which terrain lies under a pixel. All cars of a session sense the same
/// surface.
pub trait Surface {
    /// (width, height) in pixels.
    fn size(&self) -> (u32, u32);

    /// terrain_at returns the terrain at pixel (x, y). Callers keep (x, y) inside the surface.
    fn terrain_at(&self, x: f64, y: f64) -> Terrain;

    fn in_bounds(&self, x: f64, y: f64) -> bool {
        let (w, h) = self.size();
        x >= 0.0 && y >= 0.0 && x < w as f64 && y < h as f64
    }
}

/// TileKind is the geometric meaning of a tile index in its unrotated orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Open,
    WallNorth,
    WallsNorthSouth,
    WallsNorthWest,
    Curve90,
    Curve45,
    GravelTrap,
    SandTrap,
    CurbedStraight,
}

impl TileKind {
    pub fn from_index(idx: u8) -> Option<TileKind> {
        match idx {
            0 => Some(TileKind::Open),
            1 => Some(TileKind::WallNorth),
            2 => Some(TileKind::WallsNorthSouth),
            3 => Some(TileKind::WallsNorthWest),
            4 => Some(TileKind::Curve90),
            5 => Some(TileKind::Curve45),
            6 => Some(TileKind::GravelTrap),
            7 => Some(TileKind::SandTrap),
            8 => Some(TileKind::CurbedStraight),
            _ => None,
        }
    }

    /// terrain_at returns the terrain at the cell-local point (du, dv) measured from the cell
    /// centre in block units, i.e. du, dv in [-0.5, 0.5). North is -dv.
    pub fn terrain_at(&self, du: f64, dv: f64) -> Terrain {
        let north = dv < -0.5 + WALL_THICKNESS;
        let south = dv >= 0.5 - WALL_THICKNESS;
        let west = du < -0.5 + WALL_THICKNESS;
        let east = du >= 0.5 - WALL_THICKNESS;

        let is_wall = match self {
            TileKind::Open | TileKind::GravelTrap | TileKind::SandTrap => false,
            TileKind::WallNorth => north,
            TileKind::WallsNorthSouth => north || south,
            TileKind::WallsNorthWest => north || west,
            TileKind::Curve90 => north || west || (south && east),
            TileKind::Curve45 => (du + 0.5) + (dv + 0.5) < 0.5,
            TileKind::CurbedStraight => {
                return if north || south {
                    Terrain::Curb
                } else {
                    Terrain::Road
                }
            }
        };

        if is_wall {
            Terrain::Wall
        } else {
            match self {
                TileKind::GravelTrap => Terrain::Gravel,
                TileKind::SandTrap => Terrain::Sand,
                _ => Terrain::Road,
            }
        }
    }
}

/// TileGrid is the geometric sensing backend. It evaluates the tile catalogue directly, i.e.
/// without rendering any pixels.
#[derive(Debug, Clone)]
pub struct TileGrid {
    grid_size: u32,
    block_size: u32,
    screen_size: u32,
    cells: Vec<Option<(TileKind, u16)>>,
}

impl TileGrid {
    pub fn new(track: &Track) -> TileGrid {
        let gs = track.grid_size as usize;
        let mut cells = vec![None; gs * gs];

        for cell_y in 0..gs {
            for cell_x in 0..gs {
                cells[cell_y * gs + cell_x] = track
                    .tile_at(cell_x as i64, cell_y as i64)
                    .and_then(|t| TileKind::from_index(t.tile_index).map(|k| (k, t.rotation)));
            }
        }

        TileGrid {
            grid_size: track.grid_size,
            block_size: track.block_size,
            screen_size: track.screen_size,
            cells,
        }
    }
}

impl Surface for TileGrid {
    fn size(&self) -> (u32, u32) {
        (self.screen_size, self.screen_size)
    }

    fn terrain_at(&self, x: f64, y: f64) -> Terrain {
        let bs = self.block_size as f64;
        let cell_x = (x / bs).floor();
        let cell_y = (y / bs).floor();

        if cell_x < 0.0
            || cell_y < 0.0
            || cell_x >= self.grid_size as f64
            || cell_y >= self.grid_size as f64
        {
            return Terrain::Grass;
        }

        let idx = cell_y as usize * self.grid_size as usize + cell_x as usize;
        let (kind, rotation) = match self.cells[idx] {
            Some(cell) => cell,
            None => return Terrain::Grass,
        };

        let mut du = x / bs - cell_x - 0.5;
        let mut dv = y / bs - cell_y - 0.5;

        // tiles are rotated counter-clockwise on screen, undo the rotation to get the canonical
        // point
        for _ in 0..rotation / 90 {
            let tmp = du;
            du = -dv;
            dv = tmp;
        }

        kind.terrain_at(du, dv)
    }
}

/// FrameBuffer is the raster sensing backend. Pixels are classified by colour through the
/// palette.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<RgbColor>,
    palette: Palette,
}

impl FrameBuffer {
    /// from_pixels wraps an existing image given in row-major order.
    pub fn from_pixels(
        width: u32,
        height: u32,
        pixels: Vec<RgbColor>,
        palette: Palette,
    ) -> anyhow::Result<FrameBuffer> {
        if pixels.len() != (width * height) as usize {
            return Err(InputValueError::new(
                "pixels",
                &format!(
                    "expected {} pixels for {}x{}, got {}",
                    width * height,
                    width,
                    height,
                    pixels.len()
                ),
            )
            .into());
        }

        Ok(FrameBuffer {
            width,
            height,
            pixels,
            palette,
        })
    }

    /// render rasterizes the track using the palette colours. Finish line and checkpoints are
    /// painted on top with a thickness of a tenth of a block, but never over walls.
    pub fn render(track: &Track, palette: &Palette) -> FrameBuffer {
        let grid = TileGrid::new(track);
        let (width, height) = grid.size();
        let mut pixels = Vec::with_capacity((width * height) as usize);

        for y in 0..height {
            for x in 0..width {
                let terrain = grid.terrain_at(x as f64 + 0.5, y as f64 + 0.5);
                pixels.push(palette.color_of(terrain));
            }
        }

        let mut fb = FrameBuffer {
            width,
            height,
            pixels,
            palette: palette.to_owned(),
        };

        let thickness = (track.block_size / 10).max(1) as f64;
        let gates = track.gates();

        if let Some((p1, p2)) = gates.finish {
            fb.paint_line(p1, p2, thickness, palette.finish);
        }
        for (q1, q2) in gates.checkpoints.iter() {
            fb.paint_line(*q1, *q2, thickness, palette.checkpoint);
        }

        fb
    }

    fn paint_line(&mut self, a: DVec2, b: DVec2, thickness: f64, color: RgbColor) {
        let half = thickness / 2.0;
        let x_min = (a.x.min(b.x) - half).floor().max(0.0) as u32;
        let y_min = (a.y.min(b.y) - half).floor().max(0.0) as u32;
        let x_max = ((a.x.max(b.x) + half).ceil().max(0.0) as u32).min(self.width);
        let y_max = ((a.y.max(b.y) + half).ceil().max(0.0) as u32).min(self.height);

        for y in y_min..y_max {
            for x in x_min..x_max {
                let centre = DVec2::new(x as f64 + 0.5, y as f64 + 0.5);
                if distance_to_segment(centre, a, b) > half {
                    continue;
                }
                let idx = (y * self.width + x) as usize;
                if self.palette.classify(&self.pixels[idx]) != Terrain::Wall {
                    self.pixels[idx] = color;
                }
            }
        }
    }

    pub fn pixel_at(&self, x: u32, y: u32) -> Option<RgbColor> {
        if x < self.width && y < self.height {
            Some(self.pixels[(y * self.width + x) as usize])
        } else {
            None
        }
    }
}

impl Surface for FrameBuffer {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn terrain_at(&self, x: f64, y: f64) -> Terrain {
        let px = (x.max(0.0) as u32).min(self.width.saturating_sub(1));
        let py = (y.max(0.0) as u32).min(self.height.saturating_sub(1));

        match self.pixel_at(px, py) {
            Some(color) => self.palette.classify(&color),
            None => Terrain::Grass,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(rows: &str) -> Track {
        Track::from_reader("test", rows.as_bytes(), 800).unwrap()
    }

    #[test]
    fn default_pars_match_default_palette() {
        let palette = Palette::from_pars(&PalettePars::default()).unwrap();
        let fallback = Palette::default();
        assert_eq!(palette.road, fallback.road);
        assert_eq!(palette.checkpoint, fallback.checkpoint);
        assert_eq!(palette.curb, fallback.curb);
    }

    #[test]
    fn ambiguous_palette_is_rejected() {
        let pars = PalettePars {
            grass: String::from("#141414"),
            ..PalettePars::default()
        };
        assert!(Palette::from_pars(&pars).is_err());
    }

    #[test]
    fn classification_of_lines_and_unknown_colors() {
        let palette = Palette::default();
        assert_eq!(palette.classify(&palette.finish), Terrain::Road);
        assert_eq!(palette.classify(&palette.checkpoint), Terrain::Road);
        assert_eq!(palette.classify(&RgbColor::new(1, 2, 250)), Terrain::Road);
        assert_eq!(palette.classify(&RgbColor::new(22, 18, 20)), Terrain::Wall);
        assert_eq!(palette.classify(&palette.grass), Terrain::Grass);
    }

    #[test]
    fn rotated_wall_tiles() {
        // grid 4 -> block 200, wall strip 24px
        let grid = TileGrid::new(&track("4\n0,0,1,0\n1,0,1,90\n2,0,1,180\n3,0,1,270\n"));

        // unrotated: north wall
        assert_eq!(grid.terrain_at(100.0, 5.0), Terrain::Wall);
        assert_eq!(grid.terrain_at(100.0, 195.0), Terrain::Road);
        // 90 deg counter-clockwise: west wall
        assert_eq!(grid.terrain_at(205.0, 100.0), Terrain::Wall);
        assert_eq!(grid.terrain_at(300.0, 5.0), Terrain::Road);
        // 180 deg: south wall
        assert_eq!(grid.terrain_at(500.0, 195.0), Terrain::Wall);
        assert_eq!(grid.terrain_at(500.0, 5.0), Terrain::Road);
        // 270 deg: east wall
        assert_eq!(grid.terrain_at(795.0, 100.0), Terrain::Wall);
        // empty cell
        assert_eq!(grid.terrain_at(100.0, 300.0), Terrain::Grass);
    }

    #[test]
    fn catalogue_terrain() {
        assert_eq!(TileKind::GravelTrap.terrain_at(0.0, 0.0), Terrain::Gravel);
        assert_eq!(TileKind::SandTrap.terrain_at(0.0, 0.0), Terrain::Sand);
        assert_eq!(TileKind::CurbedStraight.terrain_at(0.0, -0.45), Terrain::Curb);
        assert_eq!(TileKind::CurbedStraight.terrain_at(0.0, 0.0), Terrain::Road);
        assert_eq!(TileKind::Curve90.terrain_at(0.45, 0.45), Terrain::Wall);
        assert_eq!(TileKind::Curve90.terrain_at(0.0, 0.0), Terrain::Road);
        assert_eq!(TileKind::Curve45.terrain_at(-0.4, -0.4), Terrain::Wall);
        assert_eq!(TileKind::Curve45.terrain_at(0.0, 0.0), Terrain::Road);
        assert!(TileKind::from_index(9).is_none());
    }

    #[test]
    fn raster_backend_agrees_with_grid_and_keeps_walls() {
        let t = track("4\n0,0,2,0\n1,0,2,0\nfinish,1,0,1,1\n");
        let palette = Palette::default();
        let grid = TileGrid::new(&t);
        let fb = FrameBuffer::render(&t, &palette);

        assert_eq!(fb.size(), (800, 800));
        // finish line runs vertically through x = 300, painted on road only
        assert_eq!(fb.pixel_at(300, 100), Some(palette.finish));
        assert_eq!(fb.terrain_at(300.0, 100.0), Terrain::Road);
        assert_eq!(fb.terrain_at(300.0, 5.0), Terrain::Wall);
        assert_eq!(fb.terrain_at(300.0, 5.0), grid.terrain_at(300.5, 5.5));
        assert_eq!(fb.terrain_at(50.0, 300.0), Terrain::Grass);
    }
}
