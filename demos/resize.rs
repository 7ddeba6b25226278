use std::env;
use std::error::Error;
use std::fs;
use std::path::PathBuf;

use multicarve::{Carver, VMap};

const USAGE: &str =
    "usage: resize <input> <width> <height> [--rigidity <r>] [--vmap-in <file>] [--vmap-out <file>]";

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let input: PathBuf = args.next().ok_or(USAGE)?.into();
    let target_w: usize = args.next().ok_or(USAGE)?.parse()?;
    let target_h: usize = args.next().ok_or(USAGE)?.parse()?;

    let mut rigidity = 0.0;
    let mut vmap_in: Option<PathBuf> = None;
    let mut vmap_out: Option<PathBuf> = None;
    while let Some(flag) = args.next() {
        let value = args.next().ok_or(USAGE)?;
        match flag.as_str() {
            "--rigidity" => rigidity = value.parse()?,
            "--vmap-in" => vmap_in = Some(value.into()),
            "--vmap-out" => vmap_out = Some(value.into()),
            _ => return Err(USAGE.into()),
        }
    }

    let decoded = image::open(&input)?;
    if vmap_out.is_some()
        && target_w != decoded.width() as usize
        && target_h != decoded.height() as usize
    {
        return Err(
            "a seam schedule covers one axis: change only width or height with --vmap-out".into(),
        );
    }

    let mut carver = Carver::from_dynamic(&decoded)?;
    if let Some(path) = &vmap_in {
        // reuse a previously saved seam schedule instead of carving again
        let vmap = VMap::from_bytes(&fs::read(path)?)?;
        carver.vmap_load(&vmap)?;
        println!("seam schedule loaded from {}", path.display());
    } else {
        carver.init(1, rigidity)?;
    }

    carver.resize(target_w, target_h)?;

    if let Some(path) = &vmap_out {
        fs::write(path, carver.vmap_dump()?.to_bytes())?;
        println!("seam schedule saved to {}", path.display());
    }

    let stem = input.file_stem().ok_or("input file has no name")?;
    let ext = input.extension().ok_or("input file has no extension")?;
    let output = input.with_file_name(format!(
        "{}_carved.{}",
        stem.to_string_lossy(),
        ext.to_string_lossy()
    ));
    carver.to_dynamic()?.save(&output)?;
    println!("carved image written to {}", output.display());
    Ok(())
}
