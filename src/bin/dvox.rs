//! dvox - batch voxelizer for unstructured point clouds
//!
//! Converts point cloud files through a two-stage pipeline: text inputs
//! into a disk-tiled point database, then the database into a
//! hierarchical voxelized cloud.
//!
//! Usage:
//!     dvox [OPTIONS] <INPUT>... <OUTPUT>
//!
//! Inputs can be .xyz text files or a .pointdb directory; output can be
//! a .pointdb directory or a .hcloud file.

use std::env;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Instant;

use hcloud::core::types::DVec3;
use hcloud::core::LogProgress;
use hcloud::math::DAabb;
use hcloud::tiledb::{convert_text_to_pointdb, PointDb};
use hcloud::voxel::voxelize_point_cloud;

fn print_help() {
    eprintln!("dvox - voxelize unstructured point clouds");
    eprintln!();
    eprintln!("Usage: dvox [OPTIONS] <INPUT>... <OUTPUT>");
    eprintln!();
    eprintln!("Inputs can be .xyz text or a .pointdb directory; the output");
    eprintln!("is a .pointdb directory or a .hcloud file.");
    eprintln!();
    eprintln!("Voxelization options:");
    eprintln!("    --bound <MINX> <MINY> <MINZ> <WIDTH>");
    eprintln!("                            Root cell for the output octree");
    eprintln!("                            (default: 0 0 0 1000)");
    eprintln!("    --point-radius <R>      Assumed point radius during voxelization (default: 0.2)");
    eprintln!("    --brick-resolution <N>  Resolution of octree bricks (default: 8)");
    eprintln!("    --leaf-node-width <W>   Desired width of octree leaf nodes (default: 2.5)");
    eprintln!();
    eprintln!("Point database options:");
    eprintln!("    --db-tile-size <S>      Tile size of the point database (default: 100)");
    eprintln!("    --db-cache-size <MB>    In-memory cache budget in MB (default: 100)");
    eprintln!();
    eprintln!("    -h, --help              Show this help message");
    eprintln!();
    eprintln!("Example:");
    eprintln!("    dvox scan1.xyz scan2.xyz scans.pointdb");
    eprintln!("    dvox --leaf-node-width 1.25 scans.pointdb scans.hcloud");
}

#[derive(Debug)]
struct Args {
    inputs: Vec<PathBuf>,
    output: PathBuf,
    bound_min: DVec3,
    root_node_width: f64,
    point_radius: f32,
    brick_res: usize,
    leaf_node_width: f64,
    db_tile_size: f64,
    db_cache_size_mb: f64,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut bound_min = DVec3::ZERO;
    let mut root_node_width: f64 = 1000.0;
    let mut point_radius: f32 = 0.2;
    let mut brick_res: usize = 8;
    let mut leaf_node_width: f64 = 2.5;
    let mut db_tile_size: f64 = 100.0;
    let mut db_cache_size_mb: f64 = 100.0;
    let mut paths: Vec<PathBuf> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "--bound" => {
                if i + 4 >= args.len() {
                    return Err("--bound needs four values: min_x min_y min_z width".to_string());
                }
                let mut vals = [0.0f64; 4];
                for v in vals.iter_mut() {
                    i += 1;
                    *v = args[i]
                        .parse()
                        .map_err(|_| format!("Invalid bound value: {}", args[i]))?;
                }
                bound_min = DVec3::new(vals[0], vals[1], vals[2]);
                root_node_width = vals[3];
            }
            "--point-radius" => {
                i += 1;
                point_radius = parse_value(&args, i, "--point-radius")?;
            }
            "--brick-resolution" => {
                i += 1;
                brick_res = parse_value(&args, i, "--brick-resolution")?;
            }
            "--leaf-node-width" => {
                i += 1;
                leaf_node_width = parse_value(&args, i, "--leaf-node-width")?;
            }
            "--db-tile-size" => {
                i += 1;
                db_tile_size = parse_value(&args, i, "--db-tile-size")?;
            }
            "--db-cache-size" => {
                i += 1;
                db_cache_size_mb = parse_value(&args, i, "--db-cache-size")?;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            path => {
                paths.push(PathBuf::from(path));
            }
        }
        i += 1;
    }

    if paths.len() < 2 {
        return Err("Expected at least one input and one output path".to_string());
    }
    let output = paths.pop().unwrap_or_default();

    Ok(Args {
        inputs: paths,
        output,
        bound_min,
        root_node_width,
        point_radius,
        brick_res,
        leaf_node_width,
        db_tile_size,
        db_cache_size_mb,
    })
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let value = args
        .get(i)
        .ok_or_else(|| format!("Missing value for {}", flag))?;
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

fn has_extension(path: &PathBuf, ext: &str) -> bool {
    path.extension().map_or(false, |e| e == ext)
}

fn run(args: &Args) -> hcloud::core::types::Result<()> {
    let mut progress = LogProgress::default();
    if has_extension(&args.output, "pointdb") {
        convert_text_to_pointdb(
            &args.output,
            &args.inputs,
            DAabb::empty(),
            args.db_tile_size,
            &mut progress,
        )?;
    } else {
        let cache_bytes = (args.db_cache_size_mb * 1024.0 * 1024.0) as usize;
        let mut db = PointDb::open(&args.inputs[0], cache_bytes)?;

        let leaf_depth = (args.root_node_width / args.leaf_node_width).log2().round() as usize;
        log::info!(
            "Leaf node width = {:.3}",
            args.root_node_width / (1u64 << leaf_depth) as f64
        );
        let out = BufWriter::new(File::create(&args.output)?);
        let header = voxelize_point_cloud(
            out,
            &mut db,
            args.point_radius,
            args.bound_min,
            args.root_node_width,
            leaf_depth,
            args.brick_res,
            &mut progress,
        )?;
        log::info!(
            "Wrote {}: {} points in {} voxels",
            args.output.display(),
            header.num_points,
            header.num_voxels
        );
    }
    Ok(())
}

fn main() {
    hcloud::core::logging::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if !has_extension(&args.output, "pointdb") {
        if args.inputs.len() != 1 || !has_extension(&args.inputs[0], "pointdb") {
            eprintln!("Error: .hcloud output needs exactly one .pointdb input");
            std::process::exit(1);
        }
        if !has_extension(&args.output, "hcloud") {
            eprintln!("Error: output must be a .pointdb directory or .hcloud file");
            std::process::exit(1);
        }
    }

    let start = Instant::now();
    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log::info!("Finished in {:.2}s", start.elapsed().as_secs_f64());
}
