//! Write path of the tile database

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::core::progress::Progress;
use crate::core::types::{DVec3, Result};
use crate::core::Error;
use crate::math::DAabb;
use super::TilePos;

/// Default number of points between flush passes
pub const DEFAULT_FLUSH_INTERVAL: u64 = 1_000_000;

struct Tile {
    pos: TilePos,
    // Positions relative to the global offset, xyz triples
    position: Vec<f32>,
    intensity: Vec<f32>,
    recently_used: bool,
}

impl Tile {
    fn new(pos: TilePos) -> Self {
        Self {
            pos,
            position: Vec::new(),
            intensity: Vec::new(),
            recently_used: false,
        }
    }

    fn num_points(&self) -> usize {
        self.position.len() / 3
    }

    fn size_bytes(&self) -> usize {
        4 * (self.position.capacity() + self.intensity.capacity())
    }

    fn is_empty(&self) -> bool {
        self.position.is_empty()
    }
}

/// Streaming writer for a disk-tiled point database.
///
/// Points arrive in arbitrary order; each is appended to the in-memory
/// buffer of its grid tile. Every `flush_interval` points, tiles that were
/// not touched since the previous pass are appended to their payload files
/// and their buffers cleared, keeping peak memory proportional to the
/// recently active tile set rather than the whole cloud.
pub struct PointDbWriter {
    dir: PathBuf,
    bounding_box: DAabb,
    compute_bounds: bool,
    tile_size: f64,
    flush_interval: u64,
    offset: DVec3,
    have_offset: bool,
    tiles: HashMap<TilePos, Tile>,
    // One-element MRU key, short-circuits the map lookup on runs of
    // spatially sequential input
    prev_tile: Option<TilePos>,
    points_written: u64,
}

impl PointDbWriter {
    /// Create a new database directory. Errors if `dir` already exists.
    ///
    /// An empty `bounding_box` means "grow to fit the input"; a non-empty
    /// one is a fixed bound the caller promises all points satisfy.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        bounding_box: DAabb,
        tile_size: f64,
        flush_interval: u64,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.is_dir() {
            return Err(Error::TileDb(format!(
                "point output directory already exists: {}",
                dir.display()
            )));
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            compute_bounds: bounding_box.is_empty(),
            bounding_box,
            tile_size,
            flush_interval,
            offset: DVec3::ZERO,
            have_offset: false,
            tiles: HashMap::new(),
            prev_tile: None,
            points_written: 0,
        })
    }

    pub fn bounding_box(&self) -> DAabb {
        self.bounding_box
    }

    pub fn points_written(&self) -> u64 {
        self.points_written
    }

    /// Total bytes currently buffered across all tiles
    pub fn cache_size_bytes(&self) -> usize {
        self.tiles.values().map(|t| t.size_bytes()).sum()
    }

    /// Append one point. The global offset is taken from the first point.
    pub fn write_point(&mut self, p: DVec3, intensity: f32) -> Result<()> {
        if !self.have_offset {
            self.offset = p;
            self.have_offset = true;
        }
        if self.compute_bounds {
            self.bounding_box.expand(p);
        }
        debug_assert!(self.bounding_box.contains_point(p));
        let pos = TilePos::new(
            (p.x / self.tile_size).floor() as i64,
            (p.y / self.tile_size).floor() as i64,
            (p.z / self.tile_size).floor() as i64,
        );
        let offset = self.offset;
        let tile = self.find_tile(pos);
        tile.position.push((p.x - offset.x) as f32);
        tile.position.push((p.y - offset.y) as f32);
        tile.position.push((p.z - offset.z) as f32);
        tile.intensity.push(intensity);
        self.points_written += 1;
        if self.points_written % self.flush_interval == 0 {
            self.flush_tiles(false)?;
        }
        Ok(())
    }

    /// Force-flush all buffers and write the config file. Consumes the
    /// writer; the directory is a complete database afterwards.
    pub fn close(mut self) -> Result<()> {
        self.flush_tiles(true)?;
        let mut config = BufWriter::new(File::create(self.dir.join("config.txt"))?);
        writeln!(config, "{}", self.tile_size)?;
        writeln!(
            config,
            "{:.17e} {:.17e} {:.17e} {:.17e} {:.17e} {:.17e}",
            self.bounding_box.min.x,
            self.bounding_box.min.y,
            self.bounding_box.min.z,
            self.bounding_box.max.x,
            self.bounding_box.max.y,
            self.bounding_box.max.z,
        )?;
        writeln!(
            config,
            "{:.17e} {:.17e} {:.17e}",
            self.offset.x, self.offset.y, self.offset.z
        )?;
        let mut positions: Vec<TilePos> = self.tiles.keys().copied().collect();
        positions.sort();
        for pos in positions {
            writeln!(config, "{} {} {}", pos.x, pos.y, pos.z)?;
        }
        config.flush()?;
        log::info!(
            "Wrote point database {} ({} points, {} tiles)",
            self.dir.display(),
            self.points_written,
            self.tiles.len()
        );
        Ok(())
    }

    fn find_tile(&mut self, pos: TilePos) -> &mut Tile {
        if self.prev_tile != Some(pos) {
            self.tiles.entry(pos).or_insert_with(|| Tile::new(pos));
            self.prev_tile = Some(pos);
        }
        let tile = self
            .tiles
            .get_mut(&pos)
            .unwrap_or_else(|| unreachable!("tile inserted above"));
        tile.recently_used = true;
        tile
    }

    /// One flush pass: append cold tiles (or all of them) to disk and
    /// clear their buffers.
    fn flush_tiles(&mut self, force_flush_all: bool) -> Result<()> {
        for tile in self.tiles.values_mut() {
            if (force_flush_all || !tile.recently_used) && !tile.is_empty() {
                flush_to_disk(&self.dir, tile)?;
            }
            tile.recently_used = false;
        }
        Ok(())
    }
}

fn flush_to_disk(dir: &Path, tile: &mut Tile) -> Result<()> {
    let path = dir.join(tile.pos.file_name());
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    if file.metadata()?.len() > 0 {
        log::debug!(
            "Reopening {} to flush {} points",
            path.display(),
            tile.num_points()
        );
    }
    let mut out = BufWriter::new(file);
    // Interleave to the on-disk record layout, then write one slab
    let n = tile.num_points();
    let mut records: Vec<f32> = Vec::with_capacity(4 * n);
    for i in 0..n {
        records.extend_from_slice(&tile.position[3 * i..3 * i + 3]);
        records.push(tile.intensity[i]);
    }
    out.write_all(bytemuck::cast_slice(&records))?;
    out.flush()?;
    tile.position = Vec::new();
    tile.intensity = Vec::new();
    Ok(())
}

/// Ingest whitespace-separated `x y z [intensity]` text files into a new
/// point database directory. Unparseable lines are logged and skipped;
/// with a fixed bound, points outside it are skipped too.
pub fn convert_text_to_pointdb(
    out_dir: &Path,
    input_files: &[PathBuf],
    bounding_box: DAabb,
    tile_size: f64,
    progress: &mut dyn Progress,
) -> Result<()> {
    let mut writer = PointDbWriter::create(
        out_dir,
        bounding_box,
        tile_size,
        DEFAULT_FLUSH_INTERVAL,
    )?;
    let use_bounds = !bounding_box.is_empty();
    for (file_idx, path) in input_files.iter().enumerate() {
        progress.begin(&format!(
            "Ingest file {} of {}: {}",
            file_idx + 1,
            input_files.len(),
            path.display()
        ));
        let file = File::open(path)?;
        let total_bytes = file.metadata()?.len().max(1);
        let mut bytes_read = 0u64;
        let reader = BufReader::new(file);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            bytes_read += line.len() as u64 + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed.split_whitespace().map(str::parse::<f64>);
            let parsed = (
                fields.next().transpose(),
                fields.next().transpose(),
                fields.next().transpose(),
                fields.next().transpose(),
            );
            let (x, y, z, intensity) = match parsed {
                (Ok(Some(x)), Ok(Some(y)), Ok(Some(z)), Ok(intensity)) => {
                    (x, y, z, intensity.unwrap_or(1.0))
                }
                _ => {
                    log::warn!(
                        "Skipping unparseable line {} in {}",
                        line_no + 1,
                        path.display()
                    );
                    continue;
                }
            };
            let p = DVec3::new(x, y, z);
            if use_bounds && !bounding_box.contains_point(p) {
                log::warn!(
                    "Skipping out-of-bounds point {:?} at line {} in {}",
                    p,
                    line_no + 1,
                    path.display()
                );
                continue;
            }
            writer.write_point(p, intensity as f32)?;
            if writer.points_written() % 1_000_000 == 0 {
                log::debug!(
                    "Cache size: {:.2} MB",
                    writer.cache_size_bytes() as f64 / 1e6
                );
            }
            progress.update(bytes_read as f64 / total_bytes as f64);
        }
    }
    writer.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::NullProgress;

    #[test]
    fn test_create_refuses_existing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = PointDbWriter::create(dir.path(), DAabb::empty(), 100.0, 1000);
        assert!(matches!(err, Err(Error::TileDb(_))));
    }

    #[test]
    fn test_bounds_grow_from_input() {
        let dir = tempfile::tempdir().unwrap();
        let db_dir = dir.path().join("db");
        let mut w = PointDbWriter::create(&db_dir, DAabb::empty(), 10.0, 1000).unwrap();
        w.write_point(DVec3::new(1.0, 2.0, 3.0), 0.5).unwrap();
        w.write_point(DVec3::new(-5.0, 20.0, 0.0), 0.5).unwrap();
        let bb = w.bounding_box();
        assert_eq!(bb.min, DVec3::new(-5.0, 2.0, 0.0));
        assert_eq!(bb.max, DVec3::new(1.0, 20.0, 3.0));
        w.close().unwrap();
        assert!(db_dir.join("config.txt").is_file());
    }

    #[test]
    fn test_text_ingest_skips_bad_lines() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("points.xyz");
        std::fs::write(&input, "1 2 3 0.5\nnot a point\n4 5 6\n").unwrap();
        let db_dir = dir.path().join("db");
        convert_text_to_pointdb(
            &db_dir,
            &[input],
            DAabb::empty(),
            100.0,
            &mut NullProgress,
        )
        .unwrap();
        let db = crate::tiledb::PointDb::open(&db_dir, 10 << 20).unwrap();
        let bb = db.bounding_box();
        let (pos, intensity) = db_query_all(db, bb);
        assert_eq!(pos.len(), 6);
        assert_eq!(intensity, vec![0.5, 1.0]);
    }

    fn db_query_all(mut db: crate::tiledb::PointDb, bb: DAabb) -> (Vec<f32>, Vec<f32>) {
        // Nudge the box so half-open filtering keeps the max corner
        let grown = DAabb::new(bb.min, bb.max + DVec3::splat(1.0));
        let mut pos = Vec::new();
        let mut intensity = Vec::new();
        db.query(&grown, &mut pos, &mut intensity).unwrap();
        (pos, intensity)
    }
}
