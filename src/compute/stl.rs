//! ASCII STL export of a built body's skin.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::mesh::SoftBodyMesh;

/// Write the skin faces of `mesh`, after placement, as an ASCII STL solid.
pub fn write_stl<W: Write>(mesh: &SoftBodyMesh, name: &str, writer: &mut W) -> io::Result<()> {
    writeln!(writer, "solid {name}")?;
    for face in &mesh.faces {
        let [a, b, c] = mesh.face_points(face);
        let n = (b - a).cross(c - a).normalized();

        writeln!(writer, "  facet normal {:e} {:e} {:e}", n.x, n.y, n.z)?;
        writeln!(writer, "    outer loop")?;
        for v in [a, b, c] {
            writeln!(writer, "      vertex {:e} {:e} {:e}", v.x, v.y, v.z)?;
        }
        writeln!(writer, "    endloop")?;
        writeln!(writer, "  endfacet")?;
    }
    writeln!(writer, "endsolid {name}")
}

/// Write `mesh` to an STL file named after its stem.
pub fn export_stl(mesh: &SoftBodyMesh, path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("body");

    let mut writer = BufWriter::new(File::create(path)?);
    write_stl(mesh, name, &mut writer)?;
    writer.flush()?;

    log::info!("Wrote {} faces to {}", mesh.faces.len(), path.display());
    Ok(())
}
