//! Binary deformation-field files.
//!
//! Each field is stored as two little-endian component files sharing a path
//! stem, `<stem>-x.def` and `<stem>-y.def`. A component file carries a magic
//! tag, the grid depth and shape, then the displacement samples in row-major
//! order as `f64`.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use tracing::debug;

use crate::error::{Result, SerialignError};
use crate::field::DeformationField;

const MAGIC: &[u8; 4] = b"SDEF";

/// Write `field` as `<stem>-x.def` / `<stem>-y.def`.
pub fn save_deformation(stem: &Path, field: &DeformationField) -> Result<()> {
    save_component(&component_path(stem, 'x'), field.depth, &field.dx)?;
    save_component(&component_path(stem, 'y'), field.depth, &field.dy)?;
    debug!(stem = %stem.display(), depth = field.depth, "deformation saved");
    Ok(())
}

/// Read the field written by [`save_deformation`] for `stem`.
pub fn load_deformation(stem: &Path) -> Result<DeformationField> {
    let (depth_x, dx) = load_component(&component_path(stem, 'x'))?;
    let (depth_y, dy) = load_component(&component_path(stem, 'y'))?;
    if depth_x != depth_y || dx.dim() != dy.dim() {
        return Err(SerialignError::InvalidDeformationFile(format!(
            "component mismatch for {}",
            stem.display()
        )));
    }
    Ok(DeformationField {
        dx,
        dy,
        depth: depth_x,
    })
}

fn component_path(stem: &Path, axis: char) -> std::path::PathBuf {
    let mut name = stem.as_os_str().to_os_string();
    name.push(format!("-{axis}.def"));
    name.into()
}

fn save_component(path: &Path, depth: usize, component: &Array2<f64>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(MAGIC)?;
    let (ny, nx) = component.dim();
    writer.write_u32::<LittleEndian>(depth as u32)?;
    writer.write_u32::<LittleEndian>(ny as u32)?;
    writer.write_u32::<LittleEndian>(nx as u32)?;
    for &v in component.iter() {
        writer.write_f64::<LittleEndian>(v)?;
    }
    writer.flush()?;
    Ok(())
}

fn load_component(path: &Path) -> Result<(usize, Array2<f64>)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(SerialignError::InvalidDeformationFile(format!(
            "bad magic in {}",
            path.display()
        )));
    }
    let depth = reader.read_u32::<LittleEndian>()? as usize;
    let ny = reader.read_u32::<LittleEndian>()? as usize;
    let nx = reader.read_u32::<LittleEndian>()? as usize;
    if ny < 2 || nx < 2 {
        return Err(SerialignError::InvalidDeformationFile(format!(
            "degenerate grid {ny}x{nx} in {}",
            path.display()
        )));
    }
    let mut samples = Vec::with_capacity(ny * nx);
    for _ in 0..ny * nx {
        samples.push(reader.read_f64::<LittleEndian>()?);
    }
    let component = Array2::from_shape_vec((ny, nx), samples)
        .map_err(|e| SerialignError::InvalidDeformationFile(e.to_string()))?;
    Ok((depth, component))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridHierarchy;

    #[test]
    fn save_then_load_preserves_samples() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("deformation_00");

        let grid = *GridHierarchy::for_image(5, 5).unwrap().finest();
        let mut field = DeformationField::identity(&grid);
        field.dx[[2, 3]] = 0.125;
        field.dy[[4, 1]] = -0.5;

        save_deformation(&stem, &field).unwrap();
        let loaded = load_deformation(&stem).unwrap();
        assert_eq!(loaded.depth, field.depth);
        assert_eq!(loaded.dx, field.dx);
        assert_eq!(loaded.dy, field.dy);
    }

    #[test]
    fn rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk-x.def");
        std::fs::write(&path, b"NOPE0000").unwrap();
        std::fs::write(dir.path().join("junk-y.def"), b"NOPE0000").unwrap();

        let err = load_deformation(&dir.path().join("junk")).unwrap_err();
        assert!(matches!(err, SerialignError::InvalidDeformationFile(_)));
    }
}
