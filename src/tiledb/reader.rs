//! Read path of the tile database

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::core::types::{DVec3, Result, Vec3};
use crate::core::Error;
use crate::hcloud::codec;
use crate::math::DAabb;
use super::TilePos;

struct Tile {
    pos: TilePos,
    file_name: PathBuf,
    // Offset-relative positions, xyz triples; empty until loaded
    position: Vec<f32>,
    intensity: Vec<f32>,
    recently_used: bool,
}

impl Tile {
    fn size_bytes(&self) -> usize {
        4 * (self.position.capacity() + self.intensity.capacity())
    }

    fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    fn clear(&mut self) {
        self.position = Vec::new();
        self.intensity = Vec::new();
    }
}

/// Read-only spatial access to a point database directory.
///
/// Tiles load lazily on first query touching them and are cached whole.
/// When loaded bytes exceed the cache budget, tiles not touched since the
/// last trim are cleared (never forgotten; they reload on demand).
pub struct PointDb {
    bounding_box: DAabb,
    tile_size: f64,
    offset: DVec3,
    max_cache_bytes: usize,
    cache_bytes: usize,
    bytes_since_trim: usize,
    tiles: HashMap<TilePos, Tile>,
}

impl PointDb {
    /// Open an existing database directory.
    pub fn open<P: AsRef<Path>>(dir: P, max_cache_bytes: usize) -> Result<Self> {
        let dir = dir.as_ref();
        log::debug!(
            "Point DB cache budget: {:.2} MB",
            max_cache_bytes as f64 / (1024.0 * 1024.0)
        );
        let config_path = dir.join("config.txt");
        let text = std::fs::read_to_string(&config_path).map_err(|e| {
            Error::TileDb(format!(
                "could not read DB config file {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let db = Self::parse_config(&text)
            .ok_or_else(|| {
                Error::TileDb(format!(
                    "malformed DB config file: {}",
                    config_path.display()
                ))
            })
            .map(|(tile_size, bounding_box, offset, positions)| {
                let tiles = positions
                    .into_iter()
                    .map(|pos| {
                        (
                            pos,
                            Tile {
                                pos,
                                file_name: dir.join(pos.file_name()),
                                position: Vec::new(),
                                intensity: Vec::new(),
                                recently_used: false,
                            },
                        )
                    })
                    .collect();
                Self {
                    bounding_box,
                    tile_size,
                    offset,
                    max_cache_bytes,
                    cache_bytes: 0,
                    bytes_since_trim: 0,
                    tiles,
                }
            })?;
        if db.tile_size <= 0.0 {
            return Err(Error::TileDb(format!(
                "bad tile size {} in {}",
                db.tile_size,
                config_path.display()
            )));
        }
        log::info!(
            "Loaded config file {}: {} tiles",
            config_path.display(),
            db.tiles.len()
        );
        Ok(db)
    }

    fn parse_config(text: &str) -> Option<(f64, DAabb, DVec3, Vec<TilePos>)> {
        let mut tokens = text.split_whitespace();
        let mut next_f64 = || tokens.next()?.parse::<f64>().ok();
        let tile_size = next_f64()?;
        let bounding_box = DAabb::new(
            DVec3::new(next_f64()?, next_f64()?, next_f64()?),
            DVec3::new(next_f64()?, next_f64()?, next_f64()?),
        );
        let offset = DVec3::new(next_f64()?, next_f64()?, next_f64()?);
        let rest: Vec<i64> = text
            .split_whitespace()
            .skip(10)
            .map(|t| t.parse::<i64>())
            .collect::<std::result::Result<_, _>>()
            .ok()?;
        if rest.len() % 3 != 0 {
            return None;
        }
        let positions = rest
            .chunks_exact(3)
            .map(|c| TilePos::new(c[0], c[1], c[2]))
            .collect();
        Some((tile_size, bounding_box, offset, positions))
    }

    pub fn bounding_box(&self) -> DAabb {
        self.bounding_box
    }

    pub fn offset(&self) -> DVec3 {
        self.offset
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Collect all points inside `bounding_box` (half-open on the max
    /// side) into flat position/intensity arrays. Positions returned are
    /// relative to [`Self::offset`].
    pub fn query(
        &mut self,
        bounding_box: &DAabb,
        position: &mut Vec<f32>,
        intensity: &mut Vec<f32>,
    ) -> Result<()> {
        position.clear();
        intensity.clear();
        let start = (bounding_box.min / self.tile_size).floor();
        let end = (bounding_box.max / self.tile_size).ceil();
        let offset_min = (bounding_box.min - self.offset).as_vec3();
        let offset_max = (bounding_box.max - self.offset).as_vec3();
        for tz in start.z as i64..end.z as i64 {
            for ty in start.y as i64..end.y as i64 {
                for tx in start.x as i64..end.x as i64 {
                    let Some(tile) = self.find_tile(TilePos::new(tx, ty, tz))? else {
                        continue;
                    };
                    let n = tile.intensity.len();
                    for i in 0..n {
                        let p = Vec3::new(
                            tile.position[3 * i],
                            tile.position[3 * i + 1],
                            tile.position[3 * i + 2],
                        );
                        if p.x < offset_min.x || p.x >= offset_max.x
                            || p.y < offset_min.y || p.y >= offset_max.y
                            || p.z < offset_min.z || p.z >= offset_max.z
                        {
                            continue;
                        }
                        position.extend_from_slice(&[p.x, p.y, p.z]);
                        intensity.push(tile.intensity[i]);
                    }
                }
            }
        }
        Ok(())
    }

    /// Look up a tile, loading it from disk if needed. None for grid
    /// cells that hold no tile.
    fn find_tile(&mut self, pos: TilePos) -> Result<Option<&Tile>> {
        if !self.tiles.contains_key(&pos) {
            return Ok(None);
        }
        let tile = self
            .tiles
            .get_mut(&pos)
            .unwrap_or_else(|| unreachable!("checked above"));
        tile.recently_used = true;
        if tile.is_empty() {
            read_tile_from_disk(tile)?;
            let s = tile.size_bytes();
            self.bytes_since_trim += s;
            self.cache_bytes += s;
            if self.cache_bytes > self.max_cache_bytes {
                self.trim_cache(true);
            } else if self.bytes_since_trim > self.max_cache_bytes / 2 {
                self.bytes_since_trim = 0;
                self.trim_cache(false);
            }
        }
        Ok(self.tiles.get(&pos))
    }

    /// Reset recently-used marks; with `do_clear`, also drop the buffers
    /// of tiles that were cold.
    fn trim_cache(&mut self, do_clear: bool) {
        for tile in self.tiles.values_mut() {
            if tile.recently_used {
                tile.recently_used = false;
            } else if do_clear {
                self.cache_bytes -= tile.size_bytes();
                tile.clear();
            }
        }
    }
}

fn read_tile_from_disk(tile: &mut Tile) -> Result<()> {
    let mut file = File::open(&tile.file_name)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    if bytes.len() % 16 != 0 {
        return Err(Error::TileDb(format!(
            "tile file {} is not a whole number of point records",
            tile.file_name.display()
        )));
    }
    let num_points = bytes.len() / 16;
    tile.position.reserve_exact(3 * num_points);
    tile.intensity.reserve_exact(num_points);
    // Copying decode; a borrowed f32 view of the byte buffer would
    // depend on its alignment
    let records = codec::decode_f32_slab(&bytes);
    for rec in records.chunks_exact(4) {
        tile.position.extend_from_slice(&rec[..3]);
        tile.intensity.push(rec[3]);
    }
    log::debug!("Cached tile {:?}", tile.pos);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiledb::writer::PointDbWriter;

    fn build_db(dir: &Path, points: &[(DVec3, f32)], tile_size: f64) {
        let mut w = PointDbWriter::create(dir, DAabb::empty(), tile_size, 3).unwrap();
        for &(p, i) in points {
            w.write_point(p, i).unwrap();
        }
        w.close().unwrap();
    }

    #[test]
    fn test_write_read_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("db");
        let points: Vec<(DVec3, f32)> = (0..100)
            .map(|i| {
                let f = i as f64;
                (DVec3::new(f * 0.7, (f * 13.0) % 31.0, f % 17.0), i as f32)
            })
            .collect();
        build_db(&dir, &points, 10.0);

        let mut db = PointDb::open(&dir, 1 << 20).unwrap();
        let offset = db.offset();
        let query = DAabb::new(DVec3::splat(-1.0), DVec3::splat(1000.0));
        let mut pos = Vec::new();
        let mut intensity = Vec::new();
        db.query(&query, &mut pos, &mut intensity).unwrap();
        assert_eq!(intensity.len(), points.len());
        // Every input point comes back (order differs across tiles)
        let mut got: Vec<i64> = intensity.iter().map(|&x| x as i64).collect();
        got.sort();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
        for (k, &i) in intensity.iter().enumerate() {
            let expect = points[i as usize].0 - offset;
            let p = DVec3::new(
                pos[3 * k] as f64,
                pos[3 * k + 1] as f64,
                pos[3 * k + 2] as f64,
            );
            assert!((p - expect).length() < 1e-4);
        }
    }

    #[test]
    fn test_query_filters_by_box() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("db");
        let points = vec![
            (DVec3::new(1.0, 1.0, 1.0), 1.0),
            (DVec3::new(5.0, 5.0, 5.0), 2.0),
            (DVec3::new(25.0, 25.0, 25.0), 3.0),
        ];
        build_db(&dir, &points, 10.0);
        let mut db = PointDb::open(&dir, 1 << 20).unwrap();
        let mut pos = Vec::new();
        let mut intensity = Vec::new();
        db.query(
            &DAabb::new(DVec3::ZERO, DVec3::splat(10.0)),
            &mut pos,
            &mut intensity,
        )
        .unwrap();
        let mut got = intensity.clone();
        got.sort_by(f32::total_cmp);
        assert_eq!(got, vec![1.0, 2.0]);
    }

    #[test]
    fn test_budget_trim_keeps_answers_correct() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("db");
        let points: Vec<(DVec3, f32)> = (0..64)
            .map(|i| {
                let x = (i % 4) as f64 * 10.0 + 5.0;
                let y = ((i / 4) % 4) as f64 * 10.0 + 5.0;
                let z = (i / 16) as f64 * 10.0 + 5.0;
                (DVec3::new(x, y, z), i as f32)
            })
            .collect();
        build_db(&dir, &points, 10.0);
        // Budget fits roughly one tile, forcing constant trims
        let mut db = PointDb::open(&dir, 64).unwrap();
        let mut pos = Vec::new();
        let mut intensity = Vec::new();
        for pass in 0..2 {
            db.query(
                &DAabb::new(DVec3::ZERO, DVec3::splat(40.0)),
                &mut pos,
                &mut intensity,
            )
            .unwrap();
            assert_eq!(intensity.len(), 64, "pass {}", pass);
        }
    }

    #[test]
    fn test_open_missing_config_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            PointDb::open(tmp.path(), 1 << 20),
            Err(Error::TileDb(_))
        ));
    }
}
