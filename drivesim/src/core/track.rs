use anyhow::{bail, Context};
use csv::{ReaderBuilder, StringRecord, Trim};
use glam::DVec2;
use std::fs::OpenOptions;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Number of entries in the tile catalogue (valid tile indices are 0..NO_TILE_KINDS).
pub const NO_TILE_KINDS: u8 = 9;

/// PlacedTile is a single entry of the track file.
/// * `cell_x`, `cell_y` - Grid cell the tile is placed on
/// * `tile_index` - Index into the tile catalogue
/// * `rotation` - (deg) Rotation of the tile, multiple of 90 and normalized to [0, 360)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedTile {
    pub cell_x: u32,
    pub cell_y: u32,
    pub tile_index: u8,
    pub rotation: u16,
}

/// CellSegment is a line segment given in cell coordinates. Each endpoint refers to the pixel
/// centre of that cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSegment {
    pub start: (i32, i32),
    pub end: (i32, i32),
}

/// Gates contains the finish line and the ordered checkpoints converted to pixel coordinates.
#[derive(Debug, Clone, Default)]
pub struct Gates {
    pub checkpoints: Vec<(DVec2, DVec2)>,
    pub finish: Option<(DVec2, DVec2)>,
}

impl Gates {
    pub fn no_checkpoints(&self) -> usize {
        self.checkpoints.len()
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub name: String,
    pub grid_size: u32,
    pub block_size: u32,
    pub screen_size: u32,
    pub tiles: Vec<PlacedTile>,
    pub spawn: Option<(u32, u32)>,
    pub finish_line: Option<CellSegment>,
    pub checkpoints: Vec<CellSegment>,
    cell_lookup: Vec<Option<usize>>,
}

impl Track {
    /// from_csv loads a track file. The track name is the file stem.
    pub fn from_csv(filepath: &Path, screen_size: u32) -> anyhow::Result<Track> {
        let fh = OpenOptions::new()
            .read(true)
            .open(filepath)
            .context(format!(
                "Failed to open track file {}!",
                filepath.to_string_lossy()
            ))?;

        let name = filepath
            .file_stem()
            .map(|x| x.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("unnamed"));

        Track::from_reader(&name, fh, screen_size).context(format!(
            "Failed to parse track file {}!",
            filepath.to_string_lossy()
        ))
    }

    /// from_reader parses the track format: the first record holds the grid size, the following
    /// records are `spawn,x,y`, `finish,x1,y1,x2,y2`, `checkpoint,x1,y1,x2,y2` (in traversal
    /// order) or untagged tiles `x,y,tile_index,rotation_degrees`.
    pub fn from_reader<R: Read>(name: &str, rdr: R, screen_size: u32) -> anyhow::Result<Track> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .comment(Some(b'#'))
            .from_reader(rdr);

        let mut records = csv_reader.records();

        // grid size
        let first = match records.next() {
            Some(record) => record.context("Failed to read grid size record!")?,
            None => bail!("Track file is empty, grid size is missing!"),
        };
        let grid_size: u32 = parse_field(&first, 0, "grid size", 1)?;

        if grid_size == 0 {
            bail!("Grid size must be positive!")
        }
        if screen_size < grid_size {
            bail!(
                "Screen size {}px is too small for a grid of {} cells!",
                screen_size,
                grid_size
            )
        }

        let mut tiles = vec![];
        let mut spawn = None;
        let mut finish_line = None;
        let mut checkpoints = vec![];

        for (i, record) in records.enumerate() {
            let row = i + 2;
            let record = record.context(format!("Failed to read row {}!", row))?;

            match record.get(0).unwrap_or("") {
                "spawn" => {
                    expect_len(&record, 3, row)?;
                    let x: u32 = parse_field(&record, 1, "spawn x", row)?;
                    let y: u32 = parse_field(&record, 2, "spawn y", row)?;
                    if x >= grid_size || y >= grid_size {
                        bail!("Spawn cell ({}, {}) in row {} lies outside the grid!", x, y, row)
                    }
                    spawn = Some((x, y));
                }
                "finish" => {
                    expect_len(&record, 5, row)?;
                    finish_line = Some(parse_segment(&record, row)?);
                }
                "checkpoint" => {
                    expect_len(&record, 5, row)?;
                    checkpoints.push(parse_segment(&record, row)?);
                }
                _ => {
                    expect_len(&record, 4, row)?;
                    let cell_x: u32 = parse_field(&record, 0, "cell x", row)?;
                    let cell_y: u32 = parse_field(&record, 1, "cell y", row)?;
                    let tile_index: u8 = parse_field(&record, 2, "tile index", row)?;
                    let rotation: i32 = parse_field(&record, 3, "rotation", row)?;

                    if cell_x >= grid_size || cell_y >= grid_size {
                        bail!(
                            "Tile cell ({}, {}) in row {} lies outside the {}x{} grid!",
                            cell_x,
                            cell_y,
                            row,
                            grid_size,
                            grid_size
                        )
                    }
                    if tile_index >= NO_TILE_KINDS {
                        bail!("Unknown tile index {} in row {}!", tile_index, row)
                    }
                    if rotation % 90 != 0 {
                        bail!(
                            "Rotation {} in row {} is not a multiple of 90 degrees!",
                            rotation,
                            row
                        )
                    }

                    tiles.push(PlacedTile {
                        cell_x,
                        cell_y,
                        tile_index,
                        rotation: rotation.rem_euclid(360) as u16,
                    });
                }
            }
        }

        // later tiles on the same cell replace earlier ones
        let mut cell_lookup = vec![None; (grid_size * grid_size) as usize];
        for (idx, tile) in tiles.iter().enumerate() {
            cell_lookup[(tile.cell_y * grid_size + tile.cell_x) as usize] = Some(idx);
        }

        Ok(Track {
            name: name.to_owned(),
            grid_size,
            block_size: screen_size / grid_size,
            screen_size,
            tiles,
            spawn,
            finish_line,
            checkpoints,
            cell_lookup,
        })
    }

    /// cell_to_px returns the pixel coordinate of the centre of cell coordinate c.
    pub fn cell_to_px(&self, c: i32) -> f64 {
        let bs = self.block_size as i32;
        (c * bs + bs / 2) as f64
    }

    pub fn cell_centre(&self, cell: (i32, i32)) -> DVec2 {
        DVec2::new(self.cell_to_px(cell.0), self.cell_to_px(cell.1))
    }

    /// car_size returns (width, height) of a car in pixels. Width is the length along the
    /// heading.
    pub fn car_size(&self) -> (f64, f64) {
        let bs = self.block_size as f64;
        (0.5 * bs, 0.25 * bs)
    }

    /// tile_at returns the tile placed on a cell, `None` for empty cells (grass) and cells
    /// outside the grid.
    pub fn tile_at(&self, cell_x: i64, cell_y: i64) -> Option<&PlacedTile> {
        let gs = self.grid_size as i64;
        if cell_x < 0 || cell_y < 0 || cell_x >= gs || cell_y >= gs {
            return None;
        }
        self.cell_lookup[(cell_y * gs + cell_x) as usize].map(|idx| &self.tiles[idx])
    }

    /// spawn_positions returns the start positions of no_cars cars. Without staggering all cars
    /// share the centre of the spawn cell (cell (0, 0) if no spawn is set). With staggering the
    /// cars are placed in two columns behind the spawn point such that the axis-aligned bounding
    /// boxes of their rectangles do not overlap at heading yaw.
    pub fn spawn_positions(&self, no_cars: usize, staggered: bool, yaw: f64) -> Vec<DVec2> {
        let (sx, sy) = self.spawn.unwrap_or((0, 0));
        let centre = self.cell_centre((sx as i32, sy as i32));

        if !staggered || no_cars <= 1 {
            return vec![centre; no_cars];
        }

        let (w, h) = self.car_size();
        let forward = DVec2::from_angle(yaw);
        let right = DVec2::from_angle(yaw + std::f64::consts::FRAC_PI_2);

        // bounding box of a car rotated by yaw
        let (sin_yaw, cos_yaw) = (yaw.sin().abs(), yaw.cos().abs());
        let bbox = DVec2::new(cos_yaw * w + sin_yaw * h, sin_yaw * w + cos_yaw * h);

        let col_gap = 1.5 * separation(bbox, right);
        let row_gap = 1.5 * separation(bbox, forward);

        (0..no_cars)
            .map(|i| {
                let row = (i / 2) as f64;
                let col = (i % 2) as f64;
                centre + right * ((col - 0.5) * col_gap) - forward * (row * row_gap)
            })
            .collect()
    }

    /// gates converts finish line and checkpoints into pixel coordinates.
    pub fn gates(&self) -> Gates {
        let to_px = |seg: &CellSegment| (self.cell_centre(seg.start), self.cell_centre(seg.end));

        Gates {
            checkpoints: self.checkpoints.iter().map(to_px).collect(),
            finish: self.finish_line.as_ref().map(to_px),
        }
    }
}

/// separation returns the distance along the unit vector dir after which two boxes of size bbox
/// are separated on at least one axis.
fn separation(bbox: DVec2, dir: DVec2) -> f64 {
    let along = |extent: f64, component: f64| {
        if component.abs() > 1e-9 {
            extent / component.abs()
        } else {
            f64::INFINITY
        }
    };
    along(bbox.x, dir.x).min(along(bbox.y, dir.y))
}

// -------------------------------------------------------------------------------------------------
// PARSING HELPERS ---------------------------------------------------------------------------------
// -------------------------------------------------------------------------------------------------

fn expect_len(record: &StringRecord, len: usize, row: usize) -> anyhow::Result<()> {
    if record.len() != len {
        bail!(
            "Row {} has {} fields, expected {} ({:?})!",
            row,
            record.len(),
            len,
            record
        )
    }
    Ok(())
}

fn parse_field<T: FromStr>(
    record: &StringRecord,
    idx: usize,
    what: &str,
    row: usize,
) -> anyhow::Result<T> {
    let raw = record.get(idx).unwrap_or("");
    match raw.parse::<T>() {
        Ok(val) => Ok(val),
        Err(_) => bail!("Could not parse {} '{}' in row {}!", what, raw, row),
    }
}

fn parse_segment(record: &StringRecord, row: usize) -> anyhow::Result<CellSegment> {
    Ok(CellSegment {
        start: (
            parse_field(record, 1, "x1", row)?,
            parse_field(record, 2, "y1", row)?,
        ),
        end: (
            parse_field(record, 3, "x2", row)?,
            parse_field(record, 4, "y2", row)?,
        ),
    })
}
